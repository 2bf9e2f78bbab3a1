// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use cadenza_core::checksum::Crc8Ccitt;
use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{BitWriterLtr, Monitor, ReadBytes};

/// The maximum FLAC frame header size including the sync bytes.
pub const FLAC_MAX_FRAME_HEADER_SIZE: usize = 16;

/// The largest frame number of a fixed-blocksize stream (31 bits).
pub const FLAC_MAX_FRAME_NUMBER: u64 = 0x7fff_ffff;
/// The largest sample number of a variable-blocksize stream (36 bits).
pub const FLAC_MAX_SAMPLE_NUMBER: u64 = 0x000f_ffff_ffff;

/// The sequence number of a frame. Fixed-blocksize streams number frames, while
/// variable-blocksize streams number the first sample of each frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockSequence {
    BySample(u64),
    ByFrame(u32),
}

/// `ChannelAssignment` describes the mapping between the samples decoded from a subframe and the
/// channel those samples belong to. It is also through the `ChannelAssignment` that the decoder is
/// instructed on how to decorrelate stereo channels.
///
/// For LeftSide or RightSide channel assignments, one channel is stored independently while the
/// other stores a difference. The Difference is always stored as Left - Right. For the MidSide
/// channel assignment, no channels are stored independently, rather, a Mid (average) channel and a
/// Difference channel are stored.
///
/// Assignments are ordered. When two assignments code a frame equally well, the encoder picks the
/// lesser one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelAssignment {
    /// All channels are independently coded and no decorrelation step is required.
    Independent(u32),
    /// Channel 0 is the Left channel, and channel 1 is a Difference channel. The Right channel
    /// is restored by subtracting the Difference channel from the Left channel (R = L - D).
    LeftSide,
    /// Channel 0 is the Difference channel, and channel 1 is the Right channel. The Left channel
    /// is restored by adding the Difference channel to the Right channel (L = R + D).
    RightSide,
    /// Channel 0 is the Mid channel (Left/2 + Right/2), and channel 1 is the Difference channel
    /// (Left - Right). Therefore, if M = L/2 + R/2 and D = L - R, solving for L and R the left
    /// and right channels are: L = S/2 + M, and R = M - S/2.
    MidSide,
}

impl ChannelAssignment {
    /// Gets the number of channels coded in a frame with this assignment.
    pub fn n_channels(&self) -> u32 {
        match self {
            ChannelAssignment::Independent(channels) => *channels,
            _ => 2,
        }
    }

    /// Gets the 4-bit code of the assignment in a frame header.
    pub fn code(&self) -> u32 {
        match self {
            ChannelAssignment::Independent(channels) => channels - 1,
            ChannelAssignment::LeftSide => 0x8,
            ChannelAssignment::RightSide => 0x9,
            ChannelAssignment::MidSide => 0xa,
        }
    }

    /// Gets the extra bits per sample required to code each channel's subframe.
    pub fn side_bits(&self) -> [u32; 2] {
        match self {
            ChannelAssignment::Independent(_) => [0, 0],
            ChannelAssignment::LeftSide => [0, 1],
            ChannelAssignment::RightSide => [1, 0],
            ChannelAssignment::MidSide => [0, 1],
        }
    }
}

impl fmt::Display for ChannelAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAssignment::Independent(_) => f.write_str("INDEPENDENT"),
            ChannelAssignment::LeftSide => f.write_str("LEFT_SIDE"),
            ChannelAssignment::RightSide => f.write_str("RIGHT_SIDE"),
            ChannelAssignment::MidSide => f.write_str("MID_SIDE"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub block_sequence: BlockSequence,
    pub block_num_samples: u32,
    pub channel_assignment: ChannelAssignment,
    /// The bits per sample, or `None` if it must be taken from the stream information block.
    pub bits_per_sample: Option<u32>,
    /// The sample rate, or `None` if it must be taken from the stream information block.
    pub sample_rate: Option<u32>,
    /// The CRC-8 of the header as read from the stream. The CRC is always computed when writing.
    pub crc8: u8,
}

pub fn sync_frame<B: ReadBytes>(reader: &mut B) -> Result<u16> {
    let mut sync = 0u16;

    // Synchronize stream to Frame Header. FLAC specifies a byte-aligned 14 bit sync code of
    // `0b11_1111_1111_1110`. This would be difficult to find on its own. Expand the search to
    // a 16-bit field of `0b1111_1111_1111_10xx` and search a word at a time.
    while (sync & 0xfffc) != 0xfff8 {
        sync = sync.wrapping_shl(8) | u16::from(reader.read_u8()?);
    }

    Ok(sync)
}

/// Reads a frame header, including its trailing CRC-8, following the synchronization code `sync`.
///
/// The CRC is not checked. Callers that need to validate the header should read it through a
/// [`Crc8Ccitt`] monitor that has processed the synchronization code. The CRC of a valid header
/// followed by its CRC-8 is 0.
pub fn read_frame_header<B: ReadBytes>(reader: &mut B, sync: u16) -> Result<FrameHeader> {
    // Extract the blocking strategy from the expanded synchronization code. Fixed-blocksize
    // streams clear the bit.
    let is_variable = sync & 0x1 == 0x1;

    // Read all the standard frame description fields as one 16-bit value and extract the
    // fields.
    let desc = reader.read_be_u16()?;

    let block_size_enc = u32::from((desc & 0xf000) >> 12);
    let sample_rate_enc = u32::from((desc & 0x0f00) >> 8);
    let channels_enc = u32::from((desc & 0x00f0) >> 4);
    let bits_per_sample_enc = u32::from((desc & 0x000e) >> 1);

    if (desc & 0x0001) == 1 {
        return decode_error("flac: frame header reserved bit is not set to mandatory value");
    }

    let block_sequence = if is_variable {
        // Variable-blocksize streams sequence blocks by a sample number.
        let sample = match utf8_decode_be_u64(reader)? {
            Some(sample) => sample,
            None => return decode_error("flac: sample sequence number is not valid"),
        };

        // The sample number should only be 36-bits. Since it is UTF8 encoded, the actual length
        // cannot be enforced by the decoder. Return an error if the sample number exceeds the
        // maximum 36-bit value.
        if sample > FLAC_MAX_SAMPLE_NUMBER {
            return decode_error("flac: sample sequence number exceeds 36-bits");
        }

        BlockSequence::BySample(sample)
    }
    else {
        // Fixed-blocksize streams sequence blocks by a frame number.
        let frame = match utf8_decode_be_u64(reader)? {
            Some(frame) => frame,
            None => return decode_error("flac: frame sequence number is not valid"),
        };

        if frame > FLAC_MAX_FRAME_NUMBER {
            return decode_error("flac: frame sequence number exceeds 31-bits");
        }

        BlockSequence::ByFrame(frame as u32)
    };

    let block_num_samples = match block_size_enc {
        0x1 => 192,
        0x2..=0x5 => 576 * (1 << (block_size_enc - 2)),
        0x6 => u32::from(reader.read_u8()?) + 1,
        0x7 => {
            let block_size = reader.read_be_u16()?;
            if block_size == 0xffff {
                return decode_error("flac: block size not allowed to be greater than 65535");
            }
            u32::from(block_size) + 1
        }
        0x8..=0xf => 256 * (1 << (block_size_enc - 8)),
        _ => {
            return decode_error("flac: block size set to reserved value");
        }
    };

    let sample_rate = match sample_rate_enc {
        0x0 => None, // Get from StreamInfo if possible.
        0x1 => Some(88_200),
        0x2 => Some(176_400),
        0x3 => Some(192_000),
        0x4 => Some(8_000),
        0x5 => Some(16_000),
        0x6 => Some(22_050),
        0x7 => Some(24_000),
        0x8 => Some(32_000),
        0x9 => Some(44_100),
        0xa => Some(48_000),
        0xb => Some(96_000),
        0xc => Some(u32::from(reader.read_u8()?) * 1000),
        0xd => Some(u32::from(reader.read_be_u16()?)),
        0xe => Some(u32::from(reader.read_be_u16()?) * 10),
        _ => {
            return decode_error("flac: sample rate set to reserved value");
        }
    };

    if let Some(rate) = sample_rate {
        if !(1..=655_350).contains(&rate) {
            return decode_error("flac: sample rate out of bounds");
        }
    }

    let bits_per_sample = match bits_per_sample_enc {
        0x0 => None, // Get from StreamInfo if possible.
        0x1 => Some(8),
        0x2 => Some(12),
        0x4 => Some(16),
        0x5 => Some(20),
        0x6 => Some(24),
        0x7 => Some(32),
        _ => {
            return decode_error("flac: bits per sample set to reserved value");
        }
    };

    let channel_assignment = match channels_enc {
        0x0..=0x7 => ChannelAssignment::Independent(channels_enc + 1),
        0x8 => ChannelAssignment::LeftSide,
        0x9 => ChannelAssignment::RightSide,
        0xa => ChannelAssignment::MidSide,
        _ => {
            return decode_error("flac: channel assignment set to reserved value");
        }
    };

    let crc8 = reader.read_u8()?;

    Ok(FrameHeader {
        block_sequence,
        block_num_samples,
        channel_assignment,
        bits_per_sample,
        sample_rate,
        crc8,
    })
}

/// Gets the code of a block size that does not require an extension field.
fn block_size_code(block_num_samples: u32) -> Option<u32> {
    match block_num_samples {
        192 => Some(0x1),
        576 | 1152 | 2304 | 4608 => Some(0x2 + (block_num_samples / 576).trailing_zeros()),
        256 | 512 | 1024 | 2048 | 4096 | 8192 | 16384 | 32768 => {
            Some(0x8 + (block_num_samples / 256).trailing_zeros())
        }
        _ => None,
    }
}

/// Gets the code of a sample rate that does not require an extension field.
fn sample_rate_code(sample_rate: u32) -> Option<u32> {
    match sample_rate {
        88_200 => Some(0x1),
        176_400 => Some(0x2),
        192_000 => Some(0x3),
        8_000 => Some(0x4),
        16_000 => Some(0x5),
        22_050 => Some(0x6),
        24_000 => Some(0x7),
        32_000 => Some(0x8),
        44_100 => Some(0x9),
        48_000 => Some(0xa),
        96_000 => Some(0xb),
        _ => None,
    }
}

/// Returns true if the sample rate can be stated in a frame header, either directly or via an
/// extension field.
pub fn is_sample_rate_codable(sample_rate: u32) -> bool {
    sample_rate_code(sample_rate).is_some()
        || (sample_rate % 1000 == 0 && sample_rate / 1000 <= 255)
        || sample_rate <= 0xffff
        || (sample_rate % 10 == 0 && sample_rate / 10 <= 0xffff)
}

fn bits_per_sample_code(bits_per_sample: u32) -> u32 {
    match bits_per_sample {
        8 => 0x1,
        12 => 0x2,
        16 => 0x4,
        20 => 0x5,
        24 => 0x6,
        32 => 0x7,
        _ => 0x0,
    }
}

impl FrameHeader {
    /// Writes the header, including the synchronization code and CRC-8, and returns the CRC-8.
    ///
    /// A sample rate or bit depth of `None`, or one that cannot be coded in a frame header, is
    /// coded as "get from the stream information block".
    pub fn write(&self, writer: &mut BitWriterLtr) -> u8 {
        let mut header = BitWriterLtr::with_capacity(FLAC_MAX_FRAME_HEADER_SIZE);

        let is_variable = matches!(self.block_sequence, BlockSequence::BySample(_));

        header.write_bits_leq32(0x3ffe, 14);
        header.write_bit(false);
        header.write_bit(is_variable);

        // Block size, with an optional 8 or 16-bit extension.
        let (block_size_enc, block_size_ext) = match block_size_code(self.block_num_samples) {
            Some(code) => (code, None),
            None if self.block_num_samples <= 256 => (0x6, Some((self.block_num_samples - 1, 8))),
            None => (0x7, Some((self.block_num_samples - 1, 16))),
        };

        // Sample rate, with an optional 8 or 16-bit extension.
        let (sample_rate_enc, sample_rate_ext) = match self.sample_rate {
            Some(rate) => match sample_rate_code(rate) {
                Some(code) => (code, None),
                None if rate % 1000 == 0 && rate / 1000 <= 255 => (0xc, Some((rate / 1000, 8))),
                None if rate <= 0xffff => (0xd, Some((rate, 16))),
                None if rate % 10 == 0 && rate / 10 <= 0xffff => (0xe, Some((rate / 10, 16))),
                None => (0x0, None),
            },
            None => (0x0, None),
        };

        header.write_bits_leq32(block_size_enc, 4);
        header.write_bits_leq32(sample_rate_enc, 4);
        header.write_bits_leq32(self.channel_assignment.code(), 4);
        header.write_bits_leq32(self.bits_per_sample.map_or(0, bits_per_sample_code), 3);
        header.write_bit(false);

        let number = match self.block_sequence {
            BlockSequence::BySample(sample) => sample,
            BlockSequence::ByFrame(frame) => u64::from(frame),
        };

        utf8_encode_be_u64(&mut header, number);

        if let Some((value, width)) = block_size_ext {
            header.write_bits_leq32(value, width);
        }

        if let Some((value, width)) = sample_rate_ext {
            header.write_bits_leq32(value, width);
        }

        let mut crc8 = Crc8Ccitt::new(0);
        crc8.process_buf_bytes(header.bytes());

        let crc = crc8.crc();

        writer.write_bytes(header.bytes());
        writer.write_bits_leq32(u32::from(crc), 8);

        crc
    }
}

/// Decodes a big-endian unsigned integer encoded via extended UTF8. In this context, extended UTF8
/// simply means the encoded UTF8 value may be up to 7 bytes for a maximum integer bit width of
/// 36-bits.
fn utf8_decode_be_u64<B: ReadBytes>(src: &mut B) -> Result<Option<u64>> {
    // Read the first byte of the UTF8 encoded integer.
    let mut state = u64::from(src.read_u8()?);

    // UTF8 prefixes 1s followed by a 0 to indicate the total number of bytes within the multi-byte
    // sequence. Using ranges, determine the mask that will overlap the data bits within the first
    // byte of the sequence. For values 0-128, return the value immediately. If the value falls out
    // of range return None as this is either not the start of a UTF8 sequence or the prefix is
    // incorrect.
    let mask: u8 = match state {
        0x00..=0x7f => return Ok(Some(state)),
        0xc0..=0xdf => 0x1f,
        0xe0..=0xef => 0x0f,
        0xf0..=0xf7 => 0x07,
        0xf8..=0xfb => 0x03,
        0xfc..=0xfd => 0x01,
        0xfe => 0x00,
        _ => return Ok(None),
    };

    // Obtain the data bits from the first byte by using the data mask.
    state &= u64::from(mask);

    // Read the remaining bytes within the UTF8 sequence. Since the mask 0s out the UTF8 prefix
    // of 1s which indicate the length of the multi-byte sequence in bytes, plus an additional 0
    // bit, the number of remaining bytes to read is the number of zeros in the mask minus 2.
    // To avoid extra computation, simply loop from 2 to the number of zeros.
    for _i in 2..mask.leading_zeros() {
        let byte = src.read_u8()?;

        // Each subsequent byte after the first in UTF8 is prefixed with 0b10xx_xxxx.
        if byte & 0xc0 != 0x80 {
            return Ok(None);
        }

        // Append the six useful bits to the result.
        state = (state << 6) | u64::from(byte & 0x3f);
    }

    Ok(Some(state))
}

/// Encodes an unsigned integer of up-to 36 bits using extended UTF8.
fn utf8_encode_be_u64(writer: &mut BitWriterLtr, value: u64) {
    debug_assert!(value <= FLAC_MAX_SAMPLE_NUMBER);

    if value < 0x80 {
        writer.write_bits_leq32(value as u32, 8);
        return;
    }

    // Find the number of continuation bytes. Each carries 6 bits, while the leading byte of an
    // n-byte sequence carries 7 - n bits.
    let mut n_cont = 1;

    while value >= 1 << (6 * n_cont + 6 - n_cont) {
        n_cont += 1;
    }

    let prefix = !(0xffu32 >> (n_cont + 1)) & 0xff;

    writer.write_bits_leq32(prefix | (value >> (6 * n_cont)) as u32, 8);

    for i in (0..n_cont).rev() {
        writer.write_bits_leq32(0x80 | ((value >> (6 * i)) & 0x3f) as u32, 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::io::{BufReader, MonitorStream};

    #[test]
    fn verify_utf8_decode_be_u64() {
        let mut stream = BufReader::new(&[
            0x24, 0xc2, 0xa2, 0xe0, 0xa4, 0xb9, 0xe2, 0x82, //
            0xac, 0xf0, 0x90, 0x8d, 0x88, 0xff, 0x80, 0xbf, //
        ]);

        assert_eq!(utf8_decode_be_u64(&mut stream).unwrap(), Some(36));
        assert_eq!(utf8_decode_be_u64(&mut stream).unwrap(), Some(162));
        assert_eq!(utf8_decode_be_u64(&mut stream).unwrap(), Some(2361));
        assert_eq!(utf8_decode_be_u64(&mut stream).unwrap(), Some(8364));
        assert_eq!(utf8_decode_be_u64(&mut stream).unwrap(), Some(66376));
        assert_eq!(utf8_decode_be_u64(&mut stream).unwrap(), None);
        assert_eq!(utf8_decode_be_u64(&mut stream).unwrap(), None);
        assert_eq!(utf8_decode_be_u64(&mut stream).unwrap(), None);
    }

    #[test]
    fn verify_utf8_encode_be_u64() {
        let values = [0, 36, 0x7f, 0x80, 162, 2361, 8364, 66376, 0x7fff_ffff, FLAC_MAX_SAMPLE_NUMBER];

        for &value in values.iter() {
            let mut writer = BitWriterLtr::new();
            utf8_encode_be_u64(&mut writer, value);
            let buf = writer.into_inner();

            assert!(buf.len() <= 7);
            assert_eq!(utf8_decode_be_u64(&mut BufReader::new(&buf)).unwrap(), Some(value));
        }

        let mut writer = BitWriterLtr::new();
        utf8_encode_be_u64(&mut writer, 8364);
        assert_eq!(writer.into_inner(), [0xe2, 0x82, 0xac]);
    }

    fn write_and_read(header: &FrameHeader) -> FrameHeader {
        let mut writer = BitWriterLtr::new();
        let crc8 = header.write(&mut writer);
        let buf = writer.into_inner();

        assert_eq!(buf[buf.len() - 1], crc8);

        let mut reader = BufReader::new(&buf);
        let sync = sync_frame(&mut reader).unwrap();

        let mut crc8 = Crc8Ccitt::new(0);
        crc8.process_double_bytes(sync.to_be_bytes());

        let mut reader_crc8 = MonitorStream::new(&mut reader, crc8);
        let read = read_frame_header(&mut reader_crc8, sync).unwrap();

        // A header followed by its CRC has a CRC of 0.
        assert_eq!(reader_crc8.monitor().crc(), 0);

        read
    }

    #[test]
    fn verify_frame_header_round_trip() {
        let headers = [
            (BlockSequence::ByFrame(0), 4096, ChannelAssignment::Independent(2), 16, 44_100),
            (BlockSequence::ByFrame(1234), 1000, ChannelAssignment::MidSide, 24, 96_000),
            (BlockSequence::ByFrame(0x7fff_ffff), 192, ChannelAssignment::LeftSide, 8, 22_050),
            (BlockSequence::BySample(0xf_ffff_ffff), 17, ChannelAssignment::RightSide, 32, 11_000),
            (BlockSequence::BySample(4096), 65535, ChannelAssignment::Independent(8), 12, 12_345),
            (BlockSequence::BySample(1), 4608, ChannelAssignment::Independent(1), 20, 100_010),
        ];

        for &(block_sequence, block_num_samples, channel_assignment, bps, rate) in headers.iter() {
            let header = FrameHeader {
                block_sequence,
                block_num_samples,
                channel_assignment,
                bits_per_sample: Some(bps),
                sample_rate: Some(rate),
                crc8: 0,
            };

            let read = write_and_read(&header);

            assert_eq!(read.block_sequence, header.block_sequence);
            assert_eq!(read.block_num_samples, header.block_num_samples);
            assert_eq!(read.channel_assignment, header.channel_assignment);
            assert_eq!(read.bits_per_sample, header.bits_per_sample);
            assert_eq!(read.sample_rate, header.sample_rate);
        }
    }

    #[test]
    fn verify_frame_header_uncodable_fields() {
        // 17-bit audio and a 700kHz sample rate must be taken from the stream information block.
        let header = FrameHeader {
            block_sequence: BlockSequence::ByFrame(3),
            block_num_samples: 4096,
            channel_assignment: ChannelAssignment::Independent(2),
            bits_per_sample: Some(17),
            sample_rate: Some(700_001),
            crc8: 0,
        };

        let read = write_and_read(&header);

        assert_eq!(read.bits_per_sample, None);
        assert_eq!(read.sample_rate, None);
    }

    #[test]
    fn verify_frame_header_rejects_reserved_values() {
        // Reserved block size code 0.
        let mut reader = BufReader::new(&[0x09, 0x18, 0x00, 0x00]);
        assert!(read_frame_header(&mut reader, 0xfff8).is_err());

        // Reserved channel assignment 0xb.
        let mut reader = BufReader::new(&[0xc9, 0xb8, 0x00, 0x00]);
        assert!(read_frame_header(&mut reader, 0xfff8).is_err());

        // Reserved bits per sample code 3.
        let mut reader = BufReader::new(&[0xc9, 0x16, 0x00, 0x00]);
        assert!(read_frame_header(&mut reader, 0xfff8).is_err());
    }

    #[test]
    fn verify_sync_frame() {
        let mut reader = BufReader::new(&[0x00, 0xff, 0x12, 0xff, 0xf9, 0xc9]);
        assert_eq!(sync_frame(&mut reader).unwrap(), 0xfff9);
        assert_eq!(reader.read_u8().unwrap(), 0xc9);

        let mut reader = BufReader::new(&[0x00, 0xff, 0xf4]);
        assert!(sync_frame(&mut reader).is_err());
    }
}
