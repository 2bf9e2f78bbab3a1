// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::fs::File;
use std::path::Path;

use cadenza_core::errors::{
    decode_error, invalid_argument_error, reset_error, unsupported_error, Error, Result,
    VerifyMismatch,
};
use cadenza_core::io::{
    validate_sink_capabilities, BitWriterLtr, BufReader, ByteSink, SeekableSink, SinkCapabilities,
};
use cadenza_utils_xiph::flac::{
    MetadataBlock, MetadataBlockData, MetadataBlockType, SeekPoint, SeekTable, StreamInfo,
    VorbisComment, FLAC_STREAM_MARKER,
};

use log::{debug, warn};

use crate::decoder::{read_frame, FrameBuf, StreamParams};
use crate::frame::{is_sample_rate_codable, sync_frame, FLAC_MAX_FRAME_NUMBER};
use crate::frame_encoder::{loose_stereo_period, FrameEncoder, FrameParams};
use crate::lpc::{
    auto_qlp_coeff_precision, MAX_LPC_ORDER, MAX_QLP_COEFF_PRECISION, MIN_QLP_COEFF_PRECISION,
};
use crate::options::{EncoderOptions, MAX_COMPRESSION_LEVEL};
use crate::residual::{ResidualSearch, MAX_PARTITION_ORDER};
use crate::validate::Validator;
use crate::window::parse_apodization;

/// The vendor string written to the Vorbis comment block.
pub const VENDOR_STRING: &str = concat!("Cadenza FLAC ", env!("CARGO_PKG_VERSION"));

const MIN_BLOCKSIZE: u32 = 16;
const MAX_BLOCKSIZE: u32 = 65535;
const MAX_CHANNELS: u32 = 8;
const MIN_BITS_PER_SAMPLE: u32 = 4;
const MAX_BITS_PER_SAMPLE: u32 = 32;
const MAX_SAMPLE_RATE: u32 = 655_350;

/// Limits of the streamable subset.
const SUBSET_MAX_BLOCKSIZE: u32 = 16384;
const SUBSET_MAX_BLOCKSIZE_48K: u32 = 4608;
const SUBSET_MAX_LPC_ORDER_48K: u32 = 12;
const SUBSET_MAX_PARTITION_ORDER: u32 = 8;

/// The state of a `StreamEncoder`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncoderState {
    /// The encoder is initialized and accepting audio.
    Ok,
    /// The encoder is not initialized.
    Uninitialized,
    /// The verify decoder could not decode an encoded frame.
    VerifyDecoderError,
    /// An encoded frame did not decode to the audio it was encoded from.
    VerifyMismatchInAudioData,
    /// The sink failed a write.
    ClientError,
    /// The sink failed a seek or tell.
    IoError,
    /// A frame or metadata block could not be framed.
    FramingError,
    /// A resource limit was reached.
    MemoryError,
}

impl EncoderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderState::Ok => "OK",
            EncoderState::Uninitialized => "UNINITIALIZED",
            EncoderState::VerifyDecoderError => "VERIFY_DECODER_ERROR",
            EncoderState::VerifyMismatchInAudioData => "VERIFY_MISMATCH_IN_AUDIO_DATA",
            EncoderState::ClientError => "CLIENT_ERROR",
            EncoderState::IoError => "IO_ERROR",
            EncoderState::FramingError => "FRAMING_ERROR",
            EncoderState::MemoryError => "MEMORY_ALLOCATION_ERROR",
        }
    }
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decodes encoded frames to compare them against the audio they were encoded from.
struct Verifier {
    params: StreamParams,
    buf: FrameBuf,
}

impl Verifier {
    /// Decodes `frame` and compares it against `channels`. Returns the first mismatch.
    fn verify(
        &mut self,
        frame: &[u8],
        frame_number: u32,
        first_sample: u64,
        channels: &[&[i32]],
    ) -> Result<Option<VerifyMismatch>> {
        let mut reader = BufReader::new(frame);

        let sync = sync_frame(&mut reader)?;

        let decoded = match read_frame(&mut reader, sync, &self.params, &mut self.buf)? {
            Ok(decoded) => decoded,
            Err(status) => {
                warn!("verification: encoded frame {} is unreadable: {}", frame_number, status);
                return decode_error("flac: verify decoder could not decode a frame");
            }
        };

        if decoded.n_samples as usize != channels.first().map_or(0, |ch| ch.len()) {
            return decode_error("flac: verify decoder decoded the wrong number of samples");
        }

        for (ch, (expected, got)) in channels.iter().zip(self.buf.channels(0)).enumerate() {
            if let Some(i) = expected.iter().zip(got.iter()).position(|(e, g)| e != g) {
                return Ok(Some(VerifyMismatch {
                    absolute_sample: first_sample + i as u64,
                    frame_number,
                    channel: ch as u32,
                    sample: i as u32,
                    expected: expected[i],
                    got: got[i],
                }));
            }
        }

        Ok(None)
    }
}

/// Where a metadata block that is rewritten at the end of the stream was written.
struct BlockLocation {
    /// The byte offset of the block body.
    pos: u64,
}

/// Free Lossless Audio Codec (FLAC) stream encoder.
///
/// An encoder is configured, initialized with a byte sink, fed planar or interleaved audio, and
/// finally finished. Metadata blocks to write are supplied before initialization.
pub struct StreamEncoder<S: ByteSink> {
    options: EncoderOptions,
    metadata: Vec<MetadataBlock>,
    state: EncoderState,
    sink: Option<S>,
    frame_encoder: Option<FrameEncoder>,
    verifier: Option<Verifier>,
    verify_mismatch: Option<VerifyMismatch>,
    validator: Validator,
    /// Audio waiting for a complete block.
    pending: Vec<Vec<i32>>,
    writer: BitWriterLtr,
    stream_info: StreamInfo,
    seek_table: Option<(SeekTable, BlockLocation)>,
    /// The byte offset of the first frame.
    first_frame_pos: u64,
    bytes_written: u64,
    samples_written: u64,
    frames_written: u32,
}

impl<S: ByteSink> StreamEncoder<S> {
    /// Instantiate a new, uninitialized, encoder.
    pub fn new(options: EncoderOptions) -> Self {
        StreamEncoder {
            options,
            metadata: Vec::new(),
            state: EncoderState::Uninitialized,
            sink: None,
            frame_encoder: None,
            verifier: None,
            verify_mismatch: None,
            validator: Default::default(),
            pending: Vec::new(),
            writer: BitWriterLtr::new(),
            stream_info: Default::default(),
            seek_table: None,
            first_frame_pos: 0,
            bytes_written: 0,
            samples_written: 0,
            frames_written: 0,
        }
    }

    fn set_option(&mut self, f: impl FnOnce(&mut EncoderOptions)) -> bool {
        if self.state != EncoderState::Uninitialized {
            return false;
        }

        f(&mut self.options);
        true
    }

    pub fn set_verify(&mut self, value: bool) -> bool {
        self.set_option(|options| options.verify = value)
    }

    pub fn set_streamable_subset(&mut self, value: bool) -> bool {
        self.set_option(|options| options.streamable_subset = value)
    }

    pub fn set_channels(&mut self, value: u32) -> bool {
        self.set_option(|options| options.channels = value)
    }

    pub fn set_bits_per_sample(&mut self, value: u32) -> bool {
        self.set_option(|options| options.bits_per_sample = value)
    }

    pub fn set_sample_rate(&mut self, value: u32) -> bool {
        self.set_option(|options| options.sample_rate = value)
    }

    /// Sets every option controlled by a compression level, 0 to 8. Higher levels are clamped.
    pub fn set_compression_level(&mut self, level: u32) -> bool {
        self.set_option(|options| options.set_compression_level(level.min(MAX_COMPRESSION_LEVEL)))
    }

    pub fn set_blocksize(&mut self, value: u32) -> bool {
        self.set_option(|options| options.blocksize = value)
    }

    pub fn set_do_mid_side_stereo(&mut self, value: bool) -> bool {
        self.set_option(|options| options.do_mid_side_stereo = value)
    }

    pub fn set_loose_mid_side_stereo(&mut self, value: bool) -> bool {
        self.set_option(|options| options.loose_mid_side_stereo = value)
    }

    /// Sets the apodization windows. Returns false if the string cannot be parsed.
    pub fn set_apodization(&mut self, spec: &str) -> bool {
        if let Err(err) = parse_apodization(spec) {
            warn!("flac: invalid apodization '{}': {}", spec, err);
            return false;
        }

        self.set_option(|options| options.apodization = spec.to_string())
    }

    pub fn set_max_lpc_order(&mut self, value: u32) -> bool {
        self.set_option(|options| options.max_lpc_order = value)
    }

    pub fn set_qlp_coeff_precision(&mut self, value: u32) -> bool {
        self.set_option(|options| options.qlp_coeff_precision = value)
    }

    pub fn set_do_qlp_coeff_prec_search(&mut self, value: bool) -> bool {
        self.set_option(|options| options.do_qlp_coeff_prec_search = value)
    }

    pub fn set_do_escape_coding(&mut self, value: bool) -> bool {
        self.set_option(|options| options.do_escape_coding = value)
    }

    pub fn set_do_exhaustive_model_search(&mut self, value: bool) -> bool {
        self.set_option(|options| options.do_exhaustive_model_search = value)
    }

    pub fn set_min_residual_partition_order(&mut self, value: u32) -> bool {
        self.set_option(|options| options.min_residual_partition_order = value)
    }

    pub fn set_max_residual_partition_order(&mut self, value: u32) -> bool {
        self.set_option(|options| options.max_residual_partition_order = value)
    }

    pub fn set_rice_parameter_search_dist(&mut self, value: u32) -> bool {
        self.set_option(|options| options.rice_parameter_search_dist = value)
    }

    pub fn set_total_samples_estimate(&mut self, value: u64) -> bool {
        self.set_option(|options| options.total_samples_estimate = value)
    }

    /// Sets the metadata blocks written after the stream information block. The `is_last` flags
    /// of the blocks are ignored.
    pub fn set_metadata(&mut self, metadata: Vec<MetadataBlock>) -> bool {
        if self.state != EncoderState::Uninitialized {
            return false;
        }

        self.metadata = metadata;
        true
    }

    /// Gets the options.
    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Gets the current state.
    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Gets the current state as a string.
    pub fn resolved_state_string(&self) -> &'static str {
        self.state.as_str()
    }

    /// Gets the mismatch found by verification, if any.
    pub fn verify_mismatch(&self) -> Option<&VerifyMismatch> {
        self.verify_mismatch.as_ref()
    }

    /// Gets the stream information block as it currently stands.
    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    /// Gets the number of samples per channel encoded so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Gets a reference to the sink.
    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    /// Unwraps the encoder, returning the sink.
    pub fn into_sink(self) -> Option<S> {
        self.sink
    }

    /// Checks the options, and returns a copy with those selected automatically resolved.
    fn resolve_options(&self) -> Result<EncoderOptions> {
        let mut options = self.options.clone();

        if options.channels == 0 || options.channels > MAX_CHANNELS {
            return unsupported_error("flac: invalid number of channels");
        }

        if options.bits_per_sample < MIN_BITS_PER_SAMPLE
            || options.bits_per_sample > MAX_BITS_PER_SAMPLE
        {
            return unsupported_error("flac: invalid bits per sample");
        }

        if options.sample_rate == 0 || options.sample_rate > MAX_SAMPLE_RATE {
            return unsupported_error("flac: invalid sample rate");
        }

        if options.blocksize < MIN_BLOCKSIZE || options.blocksize > MAX_BLOCKSIZE {
            return unsupported_error("flac: invalid block size");
        }

        if options.max_lpc_order > MAX_LPC_ORDER {
            return unsupported_error("flac: invalid maximum lpc order");
        }

        if options.blocksize <= options.max_lpc_order {
            return unsupported_error("flac: block size must exceed the maximum lpc order");
        }

        if options.qlp_coeff_precision == 0 {
            options.qlp_coeff_precision =
                auto_qlp_coeff_precision(options.bits_per_sample, options.blocksize as usize);
        }
        else if options.qlp_coeff_precision < MIN_QLP_COEFF_PRECISION
            || options.qlp_coeff_precision > MAX_QLP_COEFF_PRECISION
        {
            return unsupported_error("flac: invalid quantized coefficient precision");
        }

        if options.channels != 2 {
            options.do_mid_side_stereo = false;
        }

        if !options.do_mid_side_stereo {
            options.loose_mid_side_stereo = false;
        }

        options.max_residual_partition_order =
            options.max_residual_partition_order.min(MAX_PARTITION_ORDER);

        options.min_residual_partition_order =
            options.min_residual_partition_order.min(options.max_residual_partition_order);

        if options.streamable_subset {
            if !matches!(options.bits_per_sample, 8 | 12 | 16 | 20 | 24 | 32) {
                return unsupported_error("flac: bits per sample is not in the streamable subset");
            }

            if !is_sample_rate_codable(options.sample_rate) {
                return unsupported_error("flac: sample rate is not in the streamable subset");
            }

            if options.blocksize > SUBSET_MAX_BLOCKSIZE {
                return unsupported_error("flac: block size is not in the streamable subset");
            }

            if options.sample_rate <= 48000
                && (options.blocksize > SUBSET_MAX_BLOCKSIZE_48K
                    || options.max_lpc_order > SUBSET_MAX_LPC_ORDER_48K)
            {
                return unsupported_error(
                    "flac: block size or lpc order is not in the streamable subset",
                );
            }

            if options.max_residual_partition_order > SUBSET_MAX_PARTITION_ORDER {
                return unsupported_error(
                    "flac: residual partition order is not in the streamable subset",
                );
            }
        }

        Ok(options)
    }

    /// Checks the metadata blocks to be written.
    fn validate_metadata(&self) -> Result<()> {
        let mut n_seek_tables = 0;
        let mut n_vorbis_comments = 0;

        for block in self.metadata.iter() {
            match &block.data {
                MetadataBlockData::StreamInfo(_) => {
                    return invalid_argument_error("flac: stream information block is generated")
                }
                MetadataBlockData::SeekTable(table) => {
                    n_seek_tables += 1;

                    if !table.is_legal() {
                        return invalid_argument_error("flac: seek table is not legal");
                    }
                }
                MetadataBlockData::VorbisComment(_) => n_vorbis_comments += 1,
                MetadataBlockData::CueSheet(cue_sheet) => {
                    if let Err(err) = cue_sheet.is_legal(cue_sheet.is_cd) {
                        warn!("flac: {}", err);
                        return invalid_argument_error("flac: cue sheet is not legal");
                    }
                }
                MetadataBlockData::Picture(picture) => {
                    if let Err(err) = picture.is_legal() {
                        warn!("flac: {}", err);
                        return invalid_argument_error("flac: picture is not legal");
                    }
                }
                _ => (),
            }
        }

        if n_seek_tables > 1 || n_vorbis_comments > 1 {
            return invalid_argument_error("flac: more than one seek table or vorbis comment block");
        }

        Ok(())
    }

    /// Initializes the encoder to write to `sink`, and writes the stream marker and metadata.
    pub fn init_stream(&mut self, sink: S) -> Result<()> {
        if self.state != EncoderState::Uninitialized {
            return invalid_argument_error("flac: encoder is already initialized");
        }

        validate_sink_capabilities(sink.capabilities())?;

        let resolved = self.resolve_options()?;
        self.validate_metadata()?;

        let apodizations = match parse_apodization(&resolved.apodization) {
            Ok(apodizations) => apodizations,
            Err(err) => {
                warn!("flac: invalid apodization '{}': {}", resolved.apodization, err);
                return invalid_argument_error("flac: invalid apodization");
            }
        };

        self.options = resolved;

        let options = &self.options;

        let params = FrameParams {
            sample_rate: options.sample_rate,
            bits_per_sample: options.bits_per_sample,
            do_mid_side_stereo: options.do_mid_side_stereo,
            loose_mid_side_stereo: options.loose_mid_side_stereo,
            stereo_period: loose_stereo_period(options.sample_rate, options.blocksize),
            max_lpc_order: options.max_lpc_order,
            qlp_coeff_precision: options.qlp_coeff_precision,
            do_qlp_coeff_prec_search: options.do_qlp_coeff_prec_search,
            do_exhaustive_model_search: options.do_exhaustive_model_search,
            residual: ResidualSearch {
                min_partition_order: options.min_residual_partition_order,
                max_partition_order: options.max_residual_partition_order,
                rice_param_search_dist: options.rice_parameter_search_dist.max(1),
                do_escape_coding: options.do_escape_coding,
            },
        };

        debug!(
            "flac: encoding channels={}, bps={}, sample_rate={}, blocksize={}, qlp_precision={}",
            options.channels,
            options.bits_per_sample,
            options.sample_rate,
            options.blocksize,
            options.qlp_coeff_precision,
        );

        self.stream_info = StreamInfo {
            block_len_min: options.blocksize as u16,
            block_len_max: options.blocksize as u16,
            frame_byte_len_min: 0,
            frame_byte_len_max: 0,
            sample_rate: options.sample_rate,
            n_channels: options.channels,
            bits_per_sample: options.bits_per_sample,
            n_samples: Some(options.total_samples_estimate).filter(|&n| n > 0),
            md5: None,
        };

        self.verifier = if options.verify {
            Some(Verifier {
                params: StreamParams {
                    sample_rate: Some(options.sample_rate),
                    bits_per_sample: Some(options.bits_per_sample),
                    n_channels: Some(options.channels),
                    fixed_block_len: Some(options.blocksize),
                },
                buf: Default::default(),
            })
        }
        else {
            None
        };

        self.frame_encoder = Some(FrameEncoder::new(params, apodizations));
        self.pending = vec![Vec::with_capacity(options.blocksize as usize); options.channels as usize];
        self.validator = Default::default();
        self.verify_mismatch = None;
        self.seek_table = None;
        self.bytes_written = 0;
        self.samples_written = 0;
        self.frames_written = 0;

        self.sink = Some(sink);
        self.state = EncoderState::Ok;

        if let Err(err) = self.write_metadata() {
            if self.state == EncoderState::Ok {
                self.state = EncoderState::FramingError;
            }
            return Err(err);
        }

        Ok(())
    }

    /// Writes the stream marker, the stream information block, and the supplied metadata blocks.
    /// A Vorbis comment block with the vendor string is added if none was supplied.
    fn write_metadata(&mut self) -> Result<()> {
        let mut blocks = Vec::with_capacity(self.metadata.len() + 2);

        blocks.push(MetadataBlock::new(MetadataBlockData::StreamInfo(self.stream_info.clone())));

        let has_vorbis_comment =
            self.metadata.iter().any(|block| block.block_type() == MetadataBlockType::VorbisComment);

        if !has_vorbis_comment {
            let comment = VorbisComment::new(VENDOR_STRING);
            blocks.push(MetadataBlock::new(MetadataBlockData::VorbisComment(comment)));
        }

        blocks.extend(self.metadata.iter().cloned());

        let n_blocks = blocks.len();

        for (i, block) in blocks.iter_mut().enumerate() {
            block.is_last = i + 1 == n_blocks;
        }

        self.writer.clear();
        self.writer.write_bytes(&FLAC_STREAM_MARKER);

        for block in blocks.iter() {
            // The body follows the 4 byte header.
            let body_pos = self.bytes_written + self.writer.bytes().len() as u64 + 4;

            block.write(&mut self.writer)?;

            if let MetadataBlockData::SeekTable(table) = &block.data {
                self.seek_table = Some((table.clone(), BlockLocation { pos: body_pos }));
            }
        }

        self.flush_writer(0)?;

        self.first_frame_pos = self.bytes_written;

        Ok(())
    }

    /// Writes the contents of the writer to the sink.
    fn flush_writer(&mut self, samples: u32) -> Result<()> {
        let sink = match self.sink.as_mut() {
            Some(sink) => sink,
            None => return invalid_argument_error("flac: encoder is not initialized"),
        };

        if let Err(err) = sink.write(self.writer.bytes(), samples, self.frames_written) {
            self.state = EncoderState::ClientError;
            return Err(err.into());
        }

        self.bytes_written += self.writer.bytes().len() as u64;
        self.writer.clear();

        Ok(())
    }

    fn check_ok(&self) -> Result<()> {
        match self.state {
            EncoderState::Ok => Ok(()),
            EncoderState::Uninitialized => invalid_argument_error("flac: encoder is not initialized"),
            _ => reset_error(),
        }
    }

    /// Checks that every sample fits in the configured bits per sample.
    fn check_range<'a>(&self, mut samples: impl Iterator<Item = &'a i32>) -> Result<()> {
        let bps = self.options.bits_per_sample;

        let max = (1i64 << (bps - 1)) - 1;
        let min = -(1i64 << (bps - 1));

        if samples.any(|&s| i64::from(s) < min || i64::from(s) > max) {
            return invalid_argument_error("flac: sample exceeds the bits per sample");
        }

        Ok(())
    }

    /// Encodes planar audio, one slice of samples per channel. Every slice must have the same
    /// length.
    pub fn process(&mut self, channels: &[&[i32]]) -> Result<()> {
        self.check_ok()?;

        if channels.len() != self.options.channels as usize {
            return invalid_argument_error("flac: wrong number of channel buffers");
        }

        let n_samples = channels.first().map_or(0, |ch| ch.len());

        if channels.iter().any(|ch| ch.len() != n_samples) {
            return invalid_argument_error("flac: channel buffers have different lengths");
        }

        self.check_range(channels.iter().flat_map(|ch| ch.iter()))?;

        let blocksize = self.options.blocksize as usize;

        let mut start = 0;

        while start < n_samples {
            let space = blocksize - self.pending[0].len();
            let end = n_samples.min(start + space);

            for (pending, samples) in self.pending.iter_mut().zip(channels) {
                pending.extend_from_slice(&samples[start..end]);
            }

            start = end;

            if self.pending[0].len() == blocksize {
                self.encode_pending()?;
            }
        }

        Ok(())
    }

    /// Encodes interleaved audio. The number of samples must be a multiple of the number of
    /// channels.
    pub fn process_interleaved(&mut self, samples: &[i32]) -> Result<()> {
        self.check_ok()?;

        let n_channels = self.options.channels as usize;

        if samples.len() % n_channels != 0 {
            return invalid_argument_error("flac: interleaved buffer is not a whole number of frames");
        }

        self.check_range(samples.iter())?;

        let blocksize = self.options.blocksize as usize;

        for frame in samples.chunks_exact(n_channels) {
            for (pending, &sample) in self.pending.iter_mut().zip(frame) {
                pending.push(sample);
            }

            if self.pending[0].len() == blocksize {
                self.encode_pending()?;
            }
        }

        Ok(())
    }

    /// Encodes the pending audio as one frame.
    fn encode_pending(&mut self) -> Result<()> {
        let n_samples = self.pending[0].len();

        if n_samples == 0 {
            return Ok(());
        }

        if u64::from(self.frames_written) > FLAC_MAX_FRAME_NUMBER {
            self.state = EncoderState::FramingError;
            return unsupported_error("flac: too many frames");
        }

        let frame_encoder = match self.frame_encoder.as_mut() {
            Some(frame_encoder) => frame_encoder,
            None => return invalid_argument_error("flac: encoder is not initialized"),
        };

        let channels: Vec<&[i32]> = self.pending.iter().map(|ch| &ch[..]).collect();

        self.validator.update(&channels, self.options.bits_per_sample);

        self.writer.clear();
        frame_encoder.encode(self.frames_written, &channels, &mut self.writer);

        if let Some(verifier) = self.verifier.as_mut() {
            match verifier.verify(
                self.writer.bytes(),
                self.frames_written,
                self.samples_written,
                &channels,
            ) {
                Ok(None) => (),
                Ok(Some(mismatch)) => {
                    warn!("verification: mismatch at {}", mismatch);
                    self.verify_mismatch = Some(mismatch.clone());
                    self.state = EncoderState::VerifyMismatchInAudioData;
                    return Err(Error::VerifyError(Box::new(mismatch)));
                }
                Err(err) => {
                    self.state = EncoderState::VerifyDecoderError;
                    return Err(err);
                }
            }
        }

        let frame_len = self.writer.bytes().len() as u32;
        let frame_pos = self.bytes_written;

        self.update_seek_table(frame_pos, n_samples as u32);

        self.flush_writer(n_samples as u32)?;

        let info = &mut self.stream_info;

        if info.frame_byte_len_min == 0 || frame_len < info.frame_byte_len_min {
            info.frame_byte_len_min = frame_len;
        }

        info.frame_byte_len_max = info.frame_byte_len_max.max(frame_len);

        self.samples_written += n_samples as u64;
        self.frames_written += 1;

        for pending in self.pending.iter_mut() {
            pending.clear();
        }

        let total_frames_estimate = match self.options.total_samples_estimate {
            0 => 0,
            n => {
                let blocksize = u64::from(self.options.blocksize);
                ((n + blocksize - 1) / blocksize) as u32
            }
        };

        if let Some(sink) = self.sink.as_mut() {
            sink.progress(
                self.bytes_written,
                self.samples_written,
                self.frames_written,
                total_frames_estimate,
            );
        }

        Ok(())
    }

    /// Fills the seek points that target samples within the frame about to be written.
    fn update_seek_table(&mut self, frame_pos: u64, n_samples: u32) {
        let (table, _) = match self.seek_table.as_mut() {
            Some(seek_table) => seek_table,
            None => return,
        };

        let first = self.samples_written;
        let end = first + u64::from(n_samples);
        let offset = frame_pos - self.first_frame_pos;

        for point in table.points.iter_mut() {
            if point.is_placeholder() || point.frame_samples != 0 {
                continue;
            }

            if point.sample_number >= first && point.sample_number < end {
                point.sample_number = first;
                point.stream_offset = offset;
                point.frame_samples = n_samples;
            }
        }
    }

    /// Encodes any pending audio, then completes the stream information and seek table. If the
    /// sink can seek, both blocks are rewritten. The encoder returns to the uninitialized state
    /// and keeps its options and sink.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == EncoderState::Uninitialized {
            return Ok(());
        }

        let result = self.finish_stream();

        self.frame_encoder = None;
        self.verifier = None;
        self.pending.clear();
        self.state = EncoderState::Uninitialized;

        result
    }

    fn finish_stream(&mut self) -> Result<()> {
        self.check_ok()?;

        self.encode_pending()?;

        let md5 = self.validator.md5();

        self.stream_info.md5 = Some(md5);

        if self.samples_written > 0 {
            self.stream_info.n_samples = Some(self.samples_written);
        }

        if let Some(estimate) = Some(self.options.total_samples_estimate).filter(|&n| n > 0) {
            if estimate != self.samples_written {
                debug!(
                    "flac: total samples estimate {} differs from {} samples written",
                    estimate, self.samples_written
                );
            }
        }

        let sink = match self.sink.as_mut() {
            Some(sink) => sink,
            None => return invalid_argument_error("flac: encoder is not initialized"),
        };

        if !sink.capabilities().contains(SinkCapabilities::SEEK) {
            debug!("flac: sink is not seekable, stream information block is not updated");
            return Ok(());
        }

        // The stream information block body follows the stream marker and the block header.
        let mut writer = BitWriterLtr::new();
        self.stream_info.write(&mut writer);

        let mut blocks = vec![(8, writer.into_inner())];

        if let Some((table, location)) = self.seek_table.as_mut() {
            // Points past the end of the stream were never filled.
            for point in table.points.iter_mut().filter(|point| point.frame_samples == 0) {
                *point = SeekPoint::placeholder();
            }

            table.sort();

            let mut writer = BitWriterLtr::new();
            table.write(&mut writer);

            blocks.push((location.pos, writer.into_inner()));
        }

        for (pos, body) in blocks {
            let result =
                sink.seek(pos).and_then(|_| sink.write(&body, 0, self.frames_written));

            if let Err(err) = result {
                self.state = EncoderState::IoError;
                return Err(err.into());
            }
        }

        if let Err(err) = sink.seek(self.bytes_written) {
            self.state = EncoderState::IoError;
            return Err(err.into());
        }

        Ok(())
    }
}

impl StreamEncoder<SeekableSink<File>> {
    /// Initializes the encoder to write to a new file at `path`.
    pub fn init_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.state != EncoderState::Uninitialized {
            return invalid_argument_error("flac: encoder is already initialized");
        }

        let file = File::create(path)?;

        self.init_stream(SeekableSink::new(file))
    }
}
