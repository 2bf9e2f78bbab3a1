// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::fs::File;
use std::path::Path;

use cadenza_core::checksum::{Crc16Ansi, Crc8Ccitt};
use cadenza_core::errors::{
    invalid_argument_error, is_end_of_stream, reset_error, seek_error, Error, Result,
    SeekErrorKind,
};
use cadenza_core::io::{
    validate_source_capabilities, BitStreamLtr, ByteSource, Monitor, MonitorStream, ReadBytes,
    SeekableSource, SourceCapabilities, SourceStream,
};
use cadenza_utils_xiph::flac::{
    MetadataBlock, MetadataBlockData, MetadataBlockHeader, MetadataBlockType, SeekTable,
    StreamInfo, FLAC_STREAM_MARKER,
};

use log::{debug, info, log_enabled, warn};
use smallvec::SmallVec;

use crate::frame::*;
use crate::options::{DecoderOptions, MetadataFilter};
use crate::subframe::{read_subframe, SubFrameInfo};
use crate::validate::Validator;

fn decorrelate_left_side(left: &[i64], side: &mut [i64]) {
    for (s, l) in side.iter_mut().zip(left) {
        *s = l.wrapping_sub(*s);
    }
}

fn decorrelate_mid_side(mid: &mut [i64], side: &mut [i64]) {
    for (m, s) in mid.iter_mut().zip(side) {
        // Mid (M) is given as M = (L + R) >> 1, while Side (S) is given as S = L - R. The bit
        // dropped from the mid channel is the same as the least-significant bit of S, since L + R
        // and L - R are either both odd or both even.
        //
        // Therefore, restoring that bit, the channels are:
        //      - L = (2*M + (S & 1) + S) / 2
        //      - R = (2*M + (S & 1) - S) / 2
        let mid = m.wrapping_shl(1) | (*s & 1);
        let side = *s;
        *m = mid.wrapping_add(side) >> 1;
        *s = mid.wrapping_sub(side) >> 1;
    }
}

fn decorrelate_right_side(right: &[i64], side: &mut [i64]) {
    for (s, r) in side.iter_mut().zip(right) {
        *s = s.wrapping_add(*r);
    }
}

/// A recoverable problem found in the stream. Each is reported to the decode handler, after which
/// the decoder searches for the next frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Bytes that do not belong to a frame were skipped, or a frame header could not be parsed.
    LostSync,
    /// A frame header failed its checksum.
    BadHeader,
    /// A frame failed its checksum. The frame is discarded.
    FrameCrcMismatch,
    /// A frame or metadata block uses a reserved or inconsistent coding. It is discarded.
    UnparseableStream,
}

impl ErrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::LostSync => "LOST_SYNC",
            ErrorStatus::BadHeader => "BAD_HEADER",
            ErrorStatus::FrameCrcMismatch => "FRAME_CRC_MISMATCH",
            ErrorStatus::UnparseableStream => "UNPARSEABLE_STREAM",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state of a `StreamDecoder`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecoderState {
    /// Looking for the stream marker, or the first frame of a stream without metadata.
    SearchForMetadata,
    /// Reading metadata blocks.
    ReadMetadata,
    /// Looking for the synchronization code of the next frame.
    SearchForFrameSync,
    /// Reading a frame.
    ReadFrame,
    /// The end of the stream was reached.
    EndOfStream,
    /// The source, or the decode handler, aborted decoding. A reset is required.
    Aborted,
    /// A seek failed. A reset is required.
    SeekError,
    /// A resource limit was reached. A reset is required.
    MemoryError,
    /// The decoder is not initialized.
    Uninitialized,
}

impl DecoderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecoderState::SearchForMetadata => "SEARCH_FOR_METADATA",
            DecoderState::ReadMetadata => "READ_METADATA",
            DecoderState::SearchForFrameSync => "SEARCH_FOR_FRAME_SYNC",
            DecoderState::ReadFrame => "READ_FRAME",
            DecoderState::EndOfStream => "END_OF_STREAM",
            DecoderState::Aborted => "ABORTED",
            DecoderState::SeekError => "SEEK_ERROR",
            DecoderState::MemoryError => "MEMORY_ALLOCATION_ERROR",
            DecoderState::Uninitialized => "UNINITIALIZED",
        }
    }
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The response of a decode handler to a decoded frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    Continue,
    Abort,
}

/// A decoded frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub header: FrameHeader,
    /// The sample rate, taken from the frame header or the stream information block.
    pub sample_rate: u32,
    /// The bits per sample, taken from the frame header or the stream information block.
    pub bits_per_sample: u32,
    /// The number of the first delivered sample within the stream.
    pub first_sample: u64,
    /// The number of samples per channel delivered. Less than the block length of the frame for
    /// the first frame after a seek.
    pub n_samples: u32,
    /// How each channel was coded, in the order the subframes appear in the frame.
    pub subframes: SmallVec<[SubFrameInfo; 8]>,
    /// The frame checksum read from the frame footer.
    pub crc16: u16,
}

/// A `DecodeHandler` receives the output of a `StreamDecoder`.
pub trait DecodeHandler {
    /// Receives a decoded frame as one slice of samples per channel.
    fn write(&mut self, frame: &Frame, channels: &[&[i32]]) -> WriteStatus;

    /// Receives a metadata block selected by the metadata filter.
    fn metadata(&mut self, _block: &MetadataBlock) {}

    /// Receives a recoverable error.
    fn error(&mut self, _status: ErrorStatus) {}
}

/// The result of finishing a stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FinishResult {
    /// If MD5 checking was enabled, and the stream information block had a signature, true if the
    /// decoded audio matched the signature.
    pub md5_ok: Option<bool>,
}

/// The stream parameters a frame header may defer to.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct StreamParams {
    pub sample_rate: Option<u32>,
    pub bits_per_sample: Option<u32>,
    pub n_channels: Option<u32>,
    /// The block length of a fixed-blocksize stream.
    pub fixed_block_len: Option<u32>,
}

impl From<&StreamInfo> for StreamParams {
    fn from(info: &StreamInfo) -> Self {
        let fixed_block_len = if info.block_len_min == info.block_len_max {
            Some(u32::from(info.block_len_max))
        }
        else {
            None
        };

        StreamParams {
            sample_rate: Some(info.sample_rate),
            bits_per_sample: Some(info.bits_per_sample),
            n_channels: Some(info.n_channels),
            fixed_block_len,
        }
    }
}

/// Planar audio of the last decoded frame.
#[derive(Default)]
pub(crate) struct FrameBuf {
    /// Subframe samples, wide enough for a side channel.
    wide: Vec<Vec<i64>>,
    pcm: Vec<Vec<i32>>,
    n_samples: usize,
}

impl FrameBuf {
    fn prepare(&mut self, n_channels: usize, n_samples: usize) {
        self.wide.resize_with(n_channels, Vec::new);
        self.pcm.resize_with(n_channels, Vec::new);

        for ch in self.wide.iter_mut() {
            ch.resize(n_samples, 0);
        }

        for ch in self.pcm.iter_mut() {
            ch.resize(n_samples, 0);
        }

        self.n_samples = n_samples;
    }

    /// Gets the samples of every channel, starting from sample `start`.
    pub(crate) fn channels(&self, start: usize) -> SmallVec<[&[i32]; 8]> {
        self.pcm.iter().map(|ch| &ch[start..self.n_samples]).collect()
    }
}

/// Reads and decodes the frame following the synchronization code `sync` into `buf`.
///
/// Problems with the frame itself are returned as an `ErrorStatus`. Errors of the underlying
/// reader, including the end of the stream, are returned as an `Error`.
pub(crate) fn read_frame<B: ReadBytes>(
    reader: &mut B,
    sync: u16,
    params: &StreamParams,
    buf: &mut FrameBuf,
) -> Result<std::result::Result<Frame, ErrorStatus>> {
    // Both checksums cover the synchronization code.
    let mut crc16 = Crc16Ansi::new(0);
    crc16.process_double_bytes(sync.to_be_bytes());

    let mut crc8 = Crc8Ccitt::new(0);
    crc8.process_double_bytes(sync.to_be_bytes());

    let mut frame_reader = MonitorStream::new(reader, crc16);

    let header = {
        let mut header_reader = MonitorStream::new(&mut frame_reader, crc8);

        let header = match read_frame_header(&mut header_reader, sync) {
            Ok(header) => header,
            Err(Error::DecodeError(_)) => return Ok(Err(ErrorStatus::LostSync)),
            Err(err) => return Err(err),
        };

        // The checksum of a header followed by its checksum is 0.
        if header_reader.monitor().crc() != 0 {
            return Ok(Err(ErrorStatus::BadHeader));
        }

        header
    };

    // Use the bits per sample and sample rate as stated in the frame header, falling back to the
    // stream information if provided.
    let bits_per_sample = match header.bits_per_sample.or(params.bits_per_sample) {
        Some(bps) => bps,
        None => return Ok(Err(ErrorStatus::UnparseableStream)),
    };

    let sample_rate = match header.sample_rate.or(params.sample_rate) {
        Some(rate) => rate,
        None => return Ok(Err(ErrorStatus::UnparseableStream)),
    };

    let n_channels = header.channel_assignment.n_channels();

    // A frame may not change the channel count or bit depth of a stream.
    if params.n_channels.map_or(false, |n| n != n_channels)
        || params.bits_per_sample.map_or(false, |bps| bps != bits_per_sample)
    {
        return Ok(Err(ErrorStatus::UnparseableStream));
    }

    let n_samples = header.block_num_samples as usize;

    buf.prepare(n_channels as usize, n_samples);

    let mut subframes = SmallVec::new();

    {
        // Subframes are not byte-aligned. The bit stream reads a byte at a time so that the frame
        // checksum observes exactly the bytes of the subframes.
        let mut bs = BitStreamLtr::new(&mut frame_reader);

        // For Left/Side, Mid/Side, and Right/Side channel configurations, the Side (Difference)
        // channel requires an extra bit per sample.
        let side_bits = header.channel_assignment.side_bits();

        for (ch, samples) in buf.wide.iter_mut().enumerate() {
            let extra_bits = side_bits.get(ch).copied().unwrap_or(0);

            match read_subframe(&mut bs, bits_per_sample + extra_bits, samples) {
                Ok(info) => subframes.push(info),
                Err(Error::DecodeError(_)) => return Ok(Err(ErrorStatus::UnparseableStream)),
                Err(err) => return Err(err),
            }
        }

        // The remainder of the last byte is padding.
    }

    let crc16 = frame_reader.read_be_u16()?;

    if frame_reader.monitor().crc() != 0 {
        return Ok(Err(ErrorStatus::FrameCrcMismatch));
    }

    match header.channel_assignment {
        ChannelAssignment::Independent(_) => (),
        ChannelAssignment::LeftSide => {
            let (left, side) = buf.wide.split_at_mut(1);
            decorrelate_left_side(&left[0], &mut side[0]);
        }
        ChannelAssignment::RightSide => {
            let (side, right) = buf.wide.split_at_mut(1);
            decorrelate_right_side(&right[0], &mut side[0]);
        }
        ChannelAssignment::MidSide => {
            let (mid, side) = buf.wide.split_at_mut(1);
            decorrelate_mid_side(&mut mid[0], &mut side[0]);
        }
    }

    for (wide, pcm) in buf.wide.iter().zip(buf.pcm.iter_mut()) {
        for (out, &sample) in pcm.iter_mut().zip(wide.iter()) {
            *out = sample as i32;
        }
    }

    let first_sample = match header.block_sequence {
        BlockSequence::BySample(sample) => sample,
        BlockSequence::ByFrame(frame) => {
            let block_len = params.fixed_block_len.unwrap_or(header.block_num_samples);
            u64::from(frame) * u64::from(block_len)
        }
    };

    Ok(Ok(Frame {
        n_samples: header.block_num_samples,
        header,
        sample_rate,
        bits_per_sample,
        first_sample,
        subframes,
        crc16,
    }))
}

/// The outcome of a single step of the decoder's state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    /// The state changed without any output.
    Searched,
    /// A metadata block was read.
    Metadata,
    /// A frame was read.
    Frame,
    /// No further progress is possible.
    Stopped,
}

/// How a frame is handled once decoded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FrameMode {
    Deliver,
    Skip,
}

/// A frame located while searching for a seek target.
struct Landmark {
    pos: u64,
    first_sample: u64,
    n_samples: u32,
}

/// The maximum byte distance below which a seek stops bisecting and decodes forward.
const SEEK_LINEAR_SEARCH_LEN: u64 = 2 * 8 * 1024;

/// Free Lossless Audio Codec (FLAC) stream decoder.
///
/// A decoder is configured, initialized with a byte source, and then driven by the `process_*`
/// functions. Output is delivered to a [`DecodeHandler`] passed to every driving function.
pub struct StreamDecoder {
    options: DecoderOptions,
    state: DecoderState,
    reader: Option<SourceStream>,
    stream_info: Option<StreamInfo>,
    seek_table: Option<SeekTable>,
    /// The byte position of the first frame.
    first_frame_pos: u64,
    /// The synchronization code of the frame about to be read.
    sync: u16,
    /// Set after an error was reported, until a frame is read successfully.
    is_resyncing: bool,
    is_md5_checking: bool,
    validator: Validator,
    buf: FrameBuf,
    last_frame: Option<Frame>,
    /// The byte position following the last decoded frame.
    decode_pos: u64,
    /// The target of an ongoing seek.
    seek_target: Option<u64>,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        StreamDecoder::new(Default::default())
    }
}

impl StreamDecoder {
    /// Instantiate a new, uninitialized, decoder.
    pub fn new(options: DecoderOptions) -> Self {
        StreamDecoder {
            options,
            state: DecoderState::Uninitialized,
            reader: None,
            stream_info: None,
            seek_table: None,
            first_frame_pos: 0,
            sync: 0,
            is_resyncing: false,
            is_md5_checking: false,
            validator: Default::default(),
            buf: Default::default(),
            last_frame: None,
            decode_pos: 0,
            seek_target: None,
        }
    }

    fn set_option(&mut self, f: impl FnOnce(&mut DecoderOptions)) -> bool {
        if self.state != DecoderState::Uninitialized {
            return false;
        }

        f(&mut self.options);
        true
    }

    fn set_filter(&mut self, f: impl FnOnce(&mut MetadataFilter)) -> bool {
        self.set_option(|options| f(&mut options.metadata_filter))
    }

    /// Enables or disables MD5 checking. Returns false if the decoder is initialized.
    pub fn set_md5_checking(&mut self, value: bool) -> bool {
        self.set_option(|options| options.md5_checking = value)
    }

    pub fn set_metadata_respond(&mut self, block_type: MetadataBlockType) -> bool {
        self.set_filter(|filter| filter.respond(block_type))
    }

    pub fn set_metadata_respond_application(&mut self, id: [u8; 4]) -> bool {
        self.set_filter(|filter| filter.respond_application(id))
    }

    pub fn set_metadata_respond_all(&mut self) -> bool {
        self.set_filter(|filter| filter.respond_all())
    }

    pub fn set_metadata_ignore(&mut self, block_type: MetadataBlockType) -> bool {
        self.set_filter(|filter| filter.ignore(block_type))
    }

    pub fn set_metadata_ignore_application(&mut self, id: [u8; 4]) -> bool {
        self.set_filter(|filter| filter.ignore_application(id))
    }

    pub fn set_metadata_ignore_all(&mut self) -> bool {
        self.set_filter(|filter| filter.ignore_all())
    }

    /// Initializes the decoder to read from `source`.
    ///
    /// A source that can seek must also be able to tell, report its length, and report the end of
    /// the stream.
    pub fn init_stream(&mut self, source: Box<dyn ByteSource>) -> Result<()> {
        if self.state != DecoderState::Uninitialized {
            return invalid_argument_error("flac: decoder is already initialized");
        }

        validate_source_capabilities(source.capabilities())?;

        self.reader = Some(SourceStream::new(source));
        self.begin_stream();

        Ok(())
    }

    /// Initializes the decoder to read the file at `path`.
    pub fn init_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.state != DecoderState::Uninitialized {
            return invalid_argument_error("flac: decoder is already initialized");
        }

        let file = File::open(path)?;

        self.init_stream(Box::new(SeekableSource::new(file)))
    }

    fn begin_stream(&mut self) {
        self.state = DecoderState::SearchForMetadata;
        self.stream_info = None;
        self.seek_table = None;
        self.first_frame_pos = 0;
        self.is_resyncing = false;
        self.is_md5_checking = self.options.md5_checking;
        self.validator = Default::default();
        self.last_frame = None;
        self.decode_pos = 0;
        self.seek_target = None;
    }

    /// Gets the current state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Gets the current state as a string.
    pub fn resolved_state_string(&self) -> &'static str {
        self.state.as_str()
    }

    /// Returns true if the decoded audio is being checked against the stream's MD5 signature.
    /// Checking stops after a seek or a skipped frame.
    pub fn md5_checking(&self) -> bool {
        if self.state == DecoderState::Uninitialized {
            self.options.md5_checking
        }
        else {
            self.is_md5_checking
        }
    }

    /// Gets the stream information block, if read.
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream_info.as_ref()
    }

    /// Gets the total number of samples per channel, if known.
    pub fn total_samples(&self) -> Option<u64> {
        self.stream_info.as_ref().and_then(|info| info.n_samples)
    }

    /// Gets the number of channels of the last decoded frame, or of the stream.
    pub fn channels(&self) -> u32 {
        match (&self.last_frame, &self.stream_info) {
            (Some(frame), _) => frame.header.channel_assignment.n_channels(),
            (None, Some(info)) => info.n_channels,
            _ => 0,
        }
    }

    /// Gets the channel assignment of the last decoded frame.
    pub fn channel_assignment(&self) -> Option<ChannelAssignment> {
        self.last_frame.as_ref().map(|frame| frame.header.channel_assignment)
    }

    /// Gets the bits per sample of the last decoded frame, or of the stream.
    pub fn bits_per_sample(&self) -> u32 {
        match (&self.last_frame, &self.stream_info) {
            (Some(frame), _) => frame.bits_per_sample,
            (None, Some(info)) => info.bits_per_sample,
            _ => 0,
        }
    }

    /// Gets the sample rate of the last decoded frame, or of the stream.
    pub fn sample_rate(&self) -> u32 {
        match (&self.last_frame, &self.stream_info) {
            (Some(frame), _) => frame.sample_rate,
            (None, Some(info)) => info.sample_rate,
            _ => 0,
        }
    }

    /// Gets the block length of the last decoded frame.
    pub fn blocksize(&self) -> u32 {
        self.last_frame.as_ref().map_or(0, |frame| frame.header.block_num_samples)
    }

    /// Gets the byte position following the last decoded frame. Requires a source that can tell.
    pub fn decode_position(&self) -> Option<u64> {
        let reader = self.reader.as_ref()?;

        if !reader.capabilities().contains(SourceCapabilities::TELL) {
            return None;
        }

        Some(self.decode_pos)
    }

    fn check_processable(&self) -> Result<()> {
        match self.state {
            DecoderState::Uninitialized => invalid_argument_error("flac: decoder is not initialized"),
            DecoderState::Aborted | DecoderState::SeekError | DecoderState::MemoryError => {
                reset_error()
            }
            _ => Ok(()),
        }
    }

    /// Updates the state following a failed step and gets the error to return.
    fn fail(&mut self, err: Error) -> Error {
        let is_aborted = self.reader.as_ref().map_or(false, |reader| reader.is_aborted());

        if is_aborted || matches!(err, Error::Aborted) {
            self.state = DecoderState::Aborted;
            return Error::Aborted;
        }

        match err {
            Error::IoError(_) if is_end_of_stream(&err) => self.state = DecoderState::EndOfStream,
            Error::IoError(_) => self.state = DecoderState::Aborted,
            Error::LimitError(_) => self.state = DecoderState::MemoryError,
            _ => (),
        }

        err
    }

    fn step<H: DecodeHandler + ?Sized>(&mut self, handler: &mut H, mode: FrameMode) -> Result<Step> {
        let step = match self.state {
            DecoderState::SearchForMetadata => {
                self.find_metadata(handler)?;
                Step::Searched
            }
            DecoderState::ReadMetadata => {
                self.read_metadata(handler)?;
                Step::Metadata
            }
            DecoderState::SearchForFrameSync => {
                self.find_frame_sync(handler)?;
                Step::Searched
            }
            DecoderState::ReadFrame => match self.decode_frame(handler, mode)? {
                Some(_) => Step::Frame,
                None => Step::Searched,
            },
            _ => Step::Stopped,
        };

        Ok(step)
    }

    fn run<H, F>(&mut self, handler: &mut H, mode: FrameMode, mut is_done: F) -> Result<()>
    where
        H: DecodeHandler + ?Sized,
        F: FnMut(Step, DecoderState) -> bool,
    {
        self.check_processable()?;

        loop {
            let step = match self.step(handler, mode) {
                Ok(step) => step,
                Err(err) => return Err(self.fail(err)),
            };

            if step == Step::Stopped || is_done(step, self.state) {
                return Ok(());
            }
        }
    }

    /// Decodes a single metadata block or a single frame.
    pub fn process_single<H: DecodeHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        self.run(handler, FrameMode::Deliver, |step, _| {
            matches!(step, Step::Metadata | Step::Frame)
        })
    }

    /// Decodes until all metadata blocks have been read.
    pub fn process_until_end_of_metadata<H: DecodeHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<()> {
        self.run(handler, FrameMode::Deliver, |_, state| {
            !matches!(state, DecoderState::SearchForMetadata | DecoderState::ReadMetadata)
        })
    }

    /// Decodes until the end of the stream.
    pub fn process_until_end_of_stream<H: DecodeHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<()> {
        self.run(handler, FrameMode::Deliver, |_, _| false)
    }

    /// Reads the next frame without delivering it. Reads the metadata first, if required.
    ///
    /// A skipped frame cannot contribute to the MD5 signature. MD5 checking is disabled.
    pub fn skip_single_frame<H: DecodeHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        self.process_until_end_of_metadata(handler)?;

        if self.is_md5_checking {
            debug!("flac: md5 checking disabled by skipping a frame");
            self.is_md5_checking = false;
        }

        self.run(handler, FrameMode::Skip, |step, _| step == Step::Frame)
    }

    fn reader(&mut self) -> Result<&mut SourceStream> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader),
            None => invalid_argument_error("flac: decoder is not initialized"),
        }
    }

    /// Searches for the stream marker, skipping any ID3v2 tags. A stream starting with a frame has
    /// no metadata.
    fn find_metadata<H: DecodeHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        let mut has_lost_sync = false;

        loop {
            let reader = self.reader()?;

            let mut marker = [0u8; 4];

            match reader.read_buf_exact(&mut marker) {
                Ok(()) => (),
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.state = DecoderState::EndOfStream;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }

            if marker == FLAC_STREAM_MARKER {
                self.state = DecoderState::ReadMetadata;
                return Ok(());
            }

            if &marker[..3] == b"ID3" {
                // The version and flags, then a 28-bit size stored 7 bits per byte.
                let _minor_version = reader.read_u8()?;
                let flags = reader.read_u8()?;
                let size = reader
                    .read_quad_bytes()?
                    .iter()
                    .fold(0u64, |size, &byte| (size << 7) | u64::from(byte & 0x7f));

                // A footer duplicates the header.
                let footer_len = if flags & 0x10 != 0 { 10 } else { 0 };

                info!("flac: skipping {} bytes of id3v2 tag", size + footer_len);

                reader.ignore_bytes(size + footer_len)?;
                continue;
            }

            if marker[0] == 0xff && marker[1] & 0xfc == 0xf8 {
                // A stream without metadata.
                reader.seek_buffered_rel(-4);
                self.first_frame_pos = reader.pos();
                self.state = DecoderState::SearchForFrameSync;
                return Ok(());
            }

            // Slide the search along by one byte.
            reader.seek_buffered_rel(-3);

            if !has_lost_sync {
                has_lost_sync = true;
                handler.error(ErrorStatus::LostSync);
            }
        }
    }

    /// Reads a single metadata block, and delivers it if selected by the metadata filter.
    fn read_metadata<H: DecodeHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        let filter = &self.options.metadata_filter;

        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return invalid_argument_error("flac: decoder is not initialized"),
        };

        let header = match MetadataBlockHeader::read(reader) {
            Ok(header) => header,
            Err(Error::DecodeError(err)) => {
                // The length of an invalid block is unknown.
                warn!("{}", err);
                handler.error(ErrorStatus::UnparseableStream);
                self.state = DecoderState::SearchForFrameSync;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        // The stream information and seek table are always read. Application blocks are read to
        // check their identifier.
        let is_wanted = match header.block_type {
            MetadataBlockType::StreamInfo
            | MetadataBlockType::SeekTable
            | MetadataBlockType::Application => true,
            block_type => filter.is_type_responded(block_type),
        };

        if is_wanted {
            let body = reader.read_boxed_slice_exact(header.block_len as usize)?;

            match MetadataBlockData::read(header.block_type, &body) {
                Ok(data) => {
                    let block = MetadataBlock { is_last: header.is_last, data };

                    match &block.data {
                        MetadataBlockData::StreamInfo(info) => {
                            if self.stream_info.is_some() {
                                warn!("flac: found more than one stream info block");
                            }
                            else {
                                debug!(
                                    "flac: stream info: sample_rate={}, channels={}, bps={}, \
                                     n_samples={:?}",
                                    info.sample_rate,
                                    info.n_channels,
                                    info.bits_per_sample,
                                    info.n_samples,
                                );
                                self.stream_info = Some(info.clone());
                            }
                        }
                        MetadataBlockData::SeekTable(table) => {
                            self.seek_table = Some(table.clone());
                        }
                        _ => (),
                    }

                    if filter.is_responded(&block) {
                        handler.metadata(&block);
                    }
                }
                Err(Error::DecodeError(err)) => {
                    warn!("{}", err);
                    handler.error(ErrorStatus::UnparseableStream);
                }
                Err(err) => return Err(err),
            }
        }
        else {
            info!(
                "flac: ignoring {} bytes of {} block",
                header.block_len,
                header.block_type.name()
            );
            reader.ignore_bytes(u64::from(header.block_len))?;
        }

        if header.is_last {
            self.first_frame_pos = reader.pos();
            self.state = DecoderState::SearchForFrameSync;

            if self.is_md5_checking && self.stream_info.as_ref().map_or(true, |i| i.md5.is_none())
            {
                warn!("flac: md5 checking requested but the stream has no md5 signature");
            }
        }

        Ok(())
    }

    /// Searches for the next frame synchronization code. Skipped bytes are reported as a loss of
    /// synchronization.
    fn find_frame_sync<H: DecodeHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        let is_resyncing = self.is_resyncing;

        let reader = self.reader()?;

        let start = reader.pos();

        let sync = match sync_frame(reader) {
            Ok(sync) => sync,
            Err(ref err) if is_end_of_stream(err) => {
                self.state = DecoderState::EndOfStream;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let skipped = reader.pos() - start - 2;

        self.sync = sync;
        self.state = DecoderState::ReadFrame;

        if skipped > 0 && !is_resyncing {
            debug!("flac: skipped {} bytes to find a frame", skipped);
            self.is_resyncing = true;
            handler.error(ErrorStatus::LostSync);
        }

        Ok(())
    }

    fn params(&self) -> StreamParams {
        self.stream_info.as_ref().map(StreamParams::from).unwrap_or_default()
    }

    /// Reads the frame following the synchronization code, and delivers it if required. Returns the
    /// number of samples per channel delivered, or `None` if the frame was unreadable.
    fn decode_frame<H: DecodeHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        mode: FrameMode,
    ) -> Result<Option<u32>> {
        let params = self.params();

        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return invalid_argument_error("flac: decoder is not initialized"),
        };

        let header_pos = reader.pos();

        let mut frame = match read_frame(reader, self.sync, &params, &mut self.buf)? {
            Ok(frame) => frame,
            Err(status) => {
                warn!("flac: discarding frame: {}", status);

                // The synchronization code may have been a false positive. Search again from the
                // byte following it.
                if matches!(status, ErrorStatus::LostSync | ErrorStatus::BadHeader) {
                    let delta = reader.pos() - header_pos;
                    reader.seek_buffered_rel(-(delta as isize));
                }

                self.is_resyncing = true;
                self.state = DecoderState::SearchForFrameSync;

                handler.error(status);
                return Ok(None);
            }
        };

        self.decode_pos = reader.pos();
        self.is_resyncing = false;
        self.state = DecoderState::SearchForFrameSync;

        // Trim the frame containing the target of a seek, and skip the frames preceding it.
        let mut start = 0;

        if let Some(target) = self.seek_target {
            let end = frame.first_sample + u64::from(frame.n_samples);

            if end <= target {
                return Ok(Some(0));
            }

            // The seek landed after the frame containing the target.
            if frame.first_sample > target {
                self.seek_target = None;
                return seek_error(SeekErrorKind::LostSync);
            }

            start = target.saturating_sub(frame.first_sample) as usize;
            self.seek_target = None;
        }

        frame.first_sample += start as u64;
        frame.n_samples -= start as u32;

        let channels = self.buf.channels(start);

        if mode == FrameMode::Deliver {
            if self.is_md5_checking {
                self.validator.update(&channels, frame.bits_per_sample);
            }

            if handler.write(&frame, &channels) == WriteStatus::Abort {
                self.last_frame = Some(frame);
                return Err(Error::Aborted);
            }
        }

        let n_samples = frame.n_samples;

        self.last_frame = Some(frame);

        Ok(Some(n_samples))
    }

    /// Seeks to the frame containing `sample`, and delivers that frame starting at `sample`.
    ///
    /// The source must be seekable. MD5 checking is disabled by a seek.
    pub fn seek_absolute<H: DecodeHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        sample: u64,
    ) -> Result<()> {
        self.check_processable()?;

        let caps = self.reader()?.capabilities();

        if !caps.contains(SourceCapabilities::SEEK) {
            return seek_error(SeekErrorKind::Unseekable);
        }

        if matches!(self.state, DecoderState::SearchForMetadata | DecoderState::ReadMetadata) {
            self.process_until_end_of_metadata(handler)?;
        }

        if let Some(total) = self.total_samples() {
            if sample >= total {
                return seek_error(SeekErrorKind::OutOfRange);
            }
        }

        if self.is_md5_checking {
            debug!("flac: md5 checking disabled by seeking");
            self.is_md5_checking = false;
        }

        match self.seek_inner(handler, sample) {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = self.fail(err);

                // Abort takes precedence over a seek error.
                if self.state != DecoderState::Aborted {
                    self.state = DecoderState::SeekError;
                }

                Err(err)
            }
        }
    }

    fn seek_inner<H: DecodeHandler + ?Sized>(&mut self, handler: &mut H, sample: u64) -> Result<()> {
        debug!("flac: seeking to sample {}", sample);

        let mut lo = self.first_frame_pos;
        let mut hi = match self.reader()?.byte_len() {
            Some(len) => len,
            None => return seek_error(SeekErrorKind::Unseekable),
        };

        // Narrow the search using the seek table.
        if let Some(table) = &self.seek_table {
            for point in table.points.iter().filter(|point| !point.is_placeholder()) {
                let pos = self.first_frame_pos + point.stream_offset;

                if point.sample_number <= sample {
                    lo = lo.max(pos);
                }
                else {
                    hi = hi.min(pos);
                }
            }
        }

        if hi < lo {
            hi = lo;
        }

        // Bisect the byte range until it is short enough to decode forward.
        while hi - lo > SEEK_LINEAR_SEARCH_LEN {
            let mid = lo + (hi - lo) / 2;

            match self.find_landmark(mid, hi)? {
                Some(landmark) if sample < landmark.first_sample => hi = mid,
                Some(landmark) => {
                    lo = landmark.pos;

                    if sample < landmark.first_sample + u64::from(landmark.n_samples) {
                        break;
                    }
                }
                None => hi = mid,
            }
        }

        self.reader()?.seek(lo)?;

        self.seek_target = Some(sample);
        self.is_resyncing = true;
        self.state = DecoderState::SearchForFrameSync;

        loop {
            match self.state {
                DecoderState::SearchForFrameSync => self.find_frame_sync(handler)?,
                DecoderState::ReadFrame => {
                    if let Some(n_samples) = self.decode_frame(handler, FrameMode::Deliver)? {
                        if n_samples > 0 {
                            return Ok(());
                        }
                    }
                }
                _ => {
                    self.seek_target = None;
                    return seek_error(SeekErrorKind::LostSync);
                }
            }
        }
    }

    /// Finds the first readable frame starting at or after `pos` and before `end`.
    fn find_landmark(&mut self, pos: u64, end: u64) -> Result<Option<Landmark>> {
        let params = self.params();

        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return invalid_argument_error("flac: decoder is not initialized"),
        };

        reader.seek(pos)?;

        loop {
            let sync = match sync_frame(reader) {
                Ok(sync) => sync,
                Err(ref err) if is_end_of_stream(err) => return Ok(None),
                Err(err) => return Err(err),
            };

            let header_pos = reader.pos();
            let frame_pos = header_pos - 2;

            if frame_pos >= end {
                return Ok(None);
            }

            match read_frame(reader, sync, &params, &mut self.buf) {
                Ok(Ok(frame)) => {
                    return Ok(Some(Landmark {
                        pos: frame_pos,
                        first_sample: frame.first_sample,
                        n_samples: frame.n_samples,
                    }));
                }
                Ok(Err(_)) => {
                    reader.seek(header_pos)?;
                }
                Err(ref err) if is_end_of_stream(err) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }

    /// Discards any buffered audio and prepares to search for the next frame. MD5 checking is
    /// disabled.
    pub fn flush(&mut self) -> Result<()> {
        if self.state == DecoderState::Uninitialized {
            return invalid_argument_error("flac: decoder is not initialized");
        }

        self.is_md5_checking = false;
        self.seek_target = None;
        self.is_resyncing = false;

        if !matches!(self.state, DecoderState::SearchForMetadata | DecoderState::ReadMetadata) {
            self.state = DecoderState::SearchForFrameSync;
        }

        Ok(())
    }

    /// Resets the decoder to the start of the stream, keeping the source and options. A seekable
    /// source is rewound, otherwise decoding restarts from the current position of the source.
    pub fn reset(&mut self) -> Result<()> {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => return invalid_argument_error("flac: decoder is not initialized"),
        };

        let mut source = reader.into_inner();

        if source.capabilities().contains(SourceCapabilities::SEEK) {
            source.seek(0)?;
        }

        self.reader = Some(SourceStream::new(source));
        self.begin_stream();

        Ok(())
    }

    /// Finishes decoding, checks the MD5 signature if enabled, and releases the source. The
    /// decoder returns to the uninitialized state and keeps its options.
    pub fn finish(&mut self) -> FinishResult {
        let mut result: FinishResult = Default::default();

        if self.state == DecoderState::Uninitialized {
            return result;
        }

        if self.is_md5_checking {
            // Try to get the expected MD5 checksum and compare it against the decoded checksum.
            if let Some(expected) = self.stream_info.as_ref().and_then(|info| info.md5) {
                let decoded = self.validator.md5();

                // Only generate the expected and decoded MD5 checksum strings if logging is
                // enabled at the debug level.
                if log_enabled!(log::Level::Debug) {
                    debug!("verification: expected md5 = {}", hex(&expected));
                    debug!("verification: decoded md5  = {}", hex(&decoded));
                }

                result.md5_ok = Some(decoded == expected);
            }
            else {
                warn!("verification requested but the expected md5 checksum was not provided");
            }
        }

        self.reader = None;
        self.begin_stream();
        self.state = DecoderState::Uninitialized;

        result
    }
}

fn hex(digest: &[u8; 16]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::io::ReadOnlySource;

    #[derive(Default)]
    struct Collect {
        errors: Vec<ErrorStatus>,
        n_frames: usize,
    }

    impl DecodeHandler for Collect {
        fn write(&mut self, _: &Frame, _: &[&[i32]]) -> WriteStatus {
            self.n_frames += 1;
            WriteStatus::Continue
        }

        fn error(&mut self, status: ErrorStatus) {
            self.errors.push(status);
        }
    }

    #[test]
    fn verify_decorrelate() {
        let left = [10i64, -3, 7];
        let right = [4i64, 5, -8];
        let side: Vec<i64> = left.iter().zip(&right).map(|(l, r)| l - r).collect();
        let mid: Vec<i64> = left.iter().zip(&right).map(|(l, r)| (l + r) >> 1).collect();

        let mut out = side.clone();
        decorrelate_left_side(&left, &mut out);
        assert_eq!(out, right);

        let mut out = side.clone();
        decorrelate_right_side(&right, &mut out);
        assert_eq!(out, left);

        let (mut m, mut s) = (mid, side);
        decorrelate_mid_side(&mut m, &mut s);
        assert_eq!(m, left);
        assert_eq!(s, right);
    }

    #[test]
    fn verify_state_strings() {
        assert_eq!(DecoderState::SearchForFrameSync.to_string(), "SEARCH_FOR_FRAME_SYNC");
        assert_eq!(ErrorStatus::FrameCrcMismatch.to_string(), "FRAME_CRC_MISMATCH");
    }

    #[test]
    fn verify_uninitialized() {
        let mut decoder = StreamDecoder::default();
        let mut handler = Collect::default();

        assert_eq!(decoder.state(), DecoderState::Uninitialized);
        assert!(matches!(
            decoder.process_single(&mut handler),
            Err(Error::InvalidArgument(_))
        ));
        assert!(decoder.set_md5_checking(true));
        assert!(decoder.md5_checking());
    }

    #[test]
    fn verify_garbage_stream() {
        let data = vec![0x55u8; 100];

        let mut decoder = StreamDecoder::default();
        decoder.init_stream(Box::new(ReadOnlySource::new(std::io::Cursor::new(data)))).unwrap();

        // Options are fixed once initialized.
        assert!(!decoder.set_md5_checking(true));

        let mut handler = Collect::default();
        decoder.process_until_end_of_stream(&mut handler).unwrap();

        assert_eq!(decoder.state(), DecoderState::EndOfStream);
        assert_eq!(handler.errors, vec![ErrorStatus::LostSync]);
        assert_eq!(handler.n_frames, 0);

        assert_eq!(decoder.finish(), FinishResult { md5_ok: None });
        assert_eq!(decoder.state(), DecoderState::Uninitialized);
    }
}
