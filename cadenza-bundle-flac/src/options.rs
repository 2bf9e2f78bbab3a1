// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_utils_xiph::flac::{MetadataBlock, MetadataBlockData, MetadataBlockType};

/// `DecoderOptions` is the set of options a `StreamDecoder` uses.
#[derive(Clone, Debug, Default)]
pub struct DecoderOptions {
    /// Compute the MD5 signature of the decoded audio and compare it against the signature in the
    /// stream information block when the stream is finished. Default: `false`.
    pub md5_checking: bool,
    /// The metadata blocks delivered to the decode handler. Default: only the stream information
    /// block.
    pub metadata_filter: MetadataFilter,
}

/// `MetadataFilter` selects the metadata blocks delivered to a decode handler.
///
/// Blocks are selected by type. Application blocks may additionally be selected by their
/// application identifier: an identifier in the exception list inverts the decision made for its
/// type. The stream information block is always delivered.
#[derive(Clone, Debug)]
pub struct MetadataFilter {
    /// One bit per block type code.
    respond: u128,
    application_ids: Vec<[u8; 4]>,
}

impl Default for MetadataFilter {
    fn default() -> Self {
        let mut filter = MetadataFilter { respond: 0, application_ids: Vec::new() };
        filter.respond(MetadataBlockType::StreamInfo);
        filter
    }
}

impl MetadataFilter {
    fn bit(block_type: MetadataBlockType) -> u128 {
        1 << block_type.code()
    }

    pub(crate) fn is_type_responded(&self, block_type: MetadataBlockType) -> bool {
        self.respond & MetadataFilter::bit(block_type) != 0
    }

    /// Deliver all blocks of the given type.
    pub fn respond(&mut self, block_type: MetadataBlockType) {
        self.respond |= MetadataFilter::bit(block_type);

        if block_type == MetadataBlockType::Application {
            self.application_ids.clear();
        }
    }

    /// Do not deliver blocks of the given type.
    pub fn ignore(&mut self, block_type: MetadataBlockType) {
        self.respond &= !MetadataFilter::bit(block_type);

        if block_type == MetadataBlockType::Application {
            self.application_ids.clear();
        }
    }

    /// Deliver application blocks with the given identifier even though application blocks are
    /// ignored.
    pub fn respond_application(&mut self, id: [u8; 4]) {
        if !self.is_type_responded(MetadataBlockType::Application) {
            self.application_ids.push(id);
        }
    }

    /// Do not deliver application blocks with the given identifier even though application blocks
    /// are delivered.
    pub fn ignore_application(&mut self, id: [u8; 4]) {
        if self.is_type_responded(MetadataBlockType::Application) {
            self.application_ids.push(id);
        }
    }

    /// Deliver all blocks.
    pub fn respond_all(&mut self) {
        self.respond = u128::MAX;
        self.application_ids.clear();
    }

    /// Deliver only the stream information block.
    pub fn ignore_all(&mut self) {
        self.respond = 0;
        self.application_ids.clear();
    }

    /// Returns true if the block should be delivered.
    pub fn is_responded(&self, block: &MetadataBlock) -> bool {
        match &block.data {
            MetadataBlockData::StreamInfo(_) => true,
            MetadataBlockData::Application(app) => {
                let is_exception = self.application_ids.contains(&app.id);
                self.is_type_responded(MetadataBlockType::Application) != is_exception
            }
            data => self.is_type_responded(data.block_type()),
        }
    }
}

/// The default apodization.
pub const DEFAULT_APODIZATION: &str = "tukey(5e-1)";

/// The compression level used by default.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 5;

/// The highest compression level. Higher levels are clamped.
pub const MAX_COMPRESSION_LEVEL: u32 = 8;

struct CompressionPreset {
    blocksize: u32,
    do_mid_side_stereo: bool,
    loose_mid_side_stereo: bool,
    apodization: &'static str,
    max_lpc_order: u32,
    max_residual_partition_order: u32,
}

const fn preset(
    blocksize: u32,
    do_mid_side_stereo: bool,
    loose_mid_side_stereo: bool,
    apodization: &'static str,
    max_lpc_order: u32,
    max_residual_partition_order: u32,
) -> CompressionPreset {
    CompressionPreset {
        blocksize,
        do_mid_side_stereo,
        loose_mid_side_stereo,
        apodization,
        max_lpc_order,
        max_residual_partition_order,
    }
}

const TUKEY_PARTIAL: &str = "tukey(5e-1);partial_tukey(2)";
const TUKEY_PARTIAL_PUNCHOUT: &str = "tukey(5e-1);partial_tukey(2);punchout_tukey(3)";

/// Compression levels 0 through 8. Every level uses an automatically chosen coefficient precision
/// without a precision search, no escape coding, and no exhaustive model search.
const COMPRESSION_PRESETS: [CompressionPreset; 9] = [
    preset(1152, false, false, DEFAULT_APODIZATION, 0, 3),
    preset(1152, true, true, DEFAULT_APODIZATION, 0, 3),
    preset(1152, true, false, DEFAULT_APODIZATION, 0, 3),
    preset(4096, false, false, DEFAULT_APODIZATION, 6, 4),
    preset(4096, true, true, DEFAULT_APODIZATION, 8, 4),
    preset(4096, true, false, DEFAULT_APODIZATION, 8, 5),
    preset(4096, true, false, TUKEY_PARTIAL, 8, 6),
    preset(4096, true, false, TUKEY_PARTIAL, 12, 6),
    preset(4096, true, false, TUKEY_PARTIAL_PUNCHOUT, 12, 6),
];

/// `EncoderOptions` is the set of options a `StreamEncoder` uses.
///
/// The default options describe a 16-bit stereo stream at 44.1 kHz compressed at level 5.
#[derive(Clone, Debug)]
pub struct EncoderOptions {
    /// Decode every encoded frame and compare it against the input. Default: `false`.
    pub verify: bool,
    /// Restrict the configuration to the streamable subset of the format. Default: `true`.
    pub streamable_subset: bool,
    /// The number of channels, 1 to 8. Default: `2`.
    pub channels: u32,
    /// The number of bits per sample, 4 to 32. Default: `16`.
    pub bits_per_sample: u32,
    /// The sample rate in Hz. Default: `44100`.
    pub sample_rate: u32,
    /// The number of samples per channel in a block.
    pub blocksize: u32,
    /// Try coding stereo as a mid and side channel pair, or a channel and side channel pair.
    pub do_mid_side_stereo: bool,
    /// Only re-evaluate the stereo decorrelation periodically.
    pub loose_mid_side_stereo: bool,
    /// A `;` separated list of windows to apply before linear predictive analysis.
    pub apodization: String,
    /// The maximum linear predictor order, 0 disables linear prediction.
    pub max_lpc_order: u32,
    /// The quantized coefficient precision in bits, 0 selects a precision automatically.
    pub qlp_coeff_precision: u32,
    /// Try every coefficient precision.
    pub do_qlp_coeff_prec_search: bool,
    /// Code partitions with unencoded samples when cheaper.
    pub do_escape_coding: bool,
    /// Compute the exact cost of every predictor order rather than estimating the best.
    pub do_exhaustive_model_search: bool,
    pub min_residual_partition_order: u32,
    pub max_residual_partition_order: u32,
    /// The distance from the estimated Rice parameter searched for a better parameter.
    pub rice_parameter_search_dist: u32,
    /// The expected number of samples per channel, or 0 if unknown.
    pub total_samples_estimate: u64,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        let mut options = EncoderOptions {
            verify: false,
            streamable_subset: true,
            channels: 2,
            bits_per_sample: 16,
            sample_rate: 44_100,
            blocksize: 0,
            do_mid_side_stereo: false,
            loose_mid_side_stereo: false,
            apodization: String::new(),
            max_lpc_order: 0,
            qlp_coeff_precision: 0,
            do_qlp_coeff_prec_search: false,
            do_escape_coding: false,
            do_exhaustive_model_search: false,
            min_residual_partition_order: 0,
            max_residual_partition_order: 0,
            rice_parameter_search_dist: 0,
            total_samples_estimate: 0,
        };

        options.set_compression_level(DEFAULT_COMPRESSION_LEVEL);
        options
    }
}

impl EncoderOptions {
    /// Instantiate options for a stream, compressed at the default level.
    pub fn new(channels: u32, bits_per_sample: u32, sample_rate: u32) -> Self {
        EncoderOptions { channels, bits_per_sample, sample_rate, ..Default::default() }
    }

    /// Sets all the options controlled by a compression level. Levels above 8 are clamped.
    pub fn set_compression_level(&mut self, level: u32) {
        let preset = &COMPRESSION_PRESETS[level.min(MAX_COMPRESSION_LEVEL) as usize];

        self.blocksize = preset.blocksize;
        self.do_mid_side_stereo = preset.do_mid_side_stereo;
        self.loose_mid_side_stereo = preset.loose_mid_side_stereo;
        self.apodization = preset.apodization.to_string();
        self.max_lpc_order = preset.max_lpc_order;
        self.qlp_coeff_precision = 0;
        self.do_qlp_coeff_prec_search = false;
        self.do_escape_coding = false;
        self.do_exhaustive_model_search = false;
        self.min_residual_partition_order = 0;
        self.max_residual_partition_order = preset.max_residual_partition_order;
        self.rice_parameter_search_dist = 0;
    }

    /// Builder-style variant of [`EncoderOptions::set_compression_level`].
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.set_compression_level(level);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_utils_xiph::flac::{Application, VorbisComment};

    fn application(id: &[u8; 4]) -> MetadataBlock {
        MetadataBlock::new(MetadataBlockData::Application(Application {
            id: *id,
            data: Box::new([]),
        }))
    }

    fn comment() -> MetadataBlock {
        MetadataBlock::new(MetadataBlockData::VorbisComment(VorbisComment::default()))
    }

    #[test]
    fn verify_default_filter() {
        let filter = MetadataFilter::default();
        assert!(!filter.is_responded(&comment()));
        assert!(!filter.is_responded(&application(b"abcd")));
        assert!(filter.is_responded(&MetadataBlock::new(MetadataBlockData::StreamInfo(
            Default::default()
        ))));
    }

    #[test]
    fn verify_application_exceptions() {
        let mut filter = MetadataFilter::default();

        // Ignored by type, but one identifier is responded to.
        filter.respond_application(*b"abcd");
        assert!(filter.is_responded(&application(b"abcd")));
        assert!(!filter.is_responded(&application(b"wxyz")));

        // Responding to the type clears the exceptions.
        filter.respond(MetadataBlockType::Application);
        filter.ignore_application(*b"wxyz");
        assert!(filter.is_responded(&application(b"abcd")));
        assert!(!filter.is_responded(&application(b"wxyz")));

        filter.respond_all();
        assert!(filter.is_responded(&application(b"wxyz")));
        assert!(filter.is_responded(&comment()));

        // The stream information block is always delivered.
        filter.ignore_all();
        assert!(!filter.is_responded(&comment()));
        filter.ignore(MetadataBlockType::StreamInfo);
        assert!(filter.is_responded(&MetadataBlock::new(MetadataBlockData::StreamInfo(
            Default::default()
        ))));
    }

    #[test]
    fn verify_compression_levels() {
        let options = EncoderOptions::default();
        assert_eq!(options.blocksize, 4096);
        assert_eq!(options.max_lpc_order, 8);
        assert_eq!(options.max_residual_partition_order, 5);
        assert!(options.do_mid_side_stereo && !options.loose_mid_side_stereo);

        let options = EncoderOptions::new(1, 24, 96_000).with_compression_level(0);
        assert_eq!(options.blocksize, 1152);
        assert_eq!(options.max_lpc_order, 0);
        assert!(!options.do_mid_side_stereo);
        assert_eq!(options.channels, 1);

        let options = EncoderOptions::default().with_compression_level(42);
        assert_eq!(options.max_lpc_order, 12);
        assert_eq!(options.apodization, TUKEY_PARTIAL_PUNCHOUT);
    }
}
