// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::errors::{decode_error, is_end_of_stream, limit_error, Result};
use cadenza_core::io::*;

use super::{CueSheet, Picture, SeekTable, VorbisComment};

/// The maximum length of a metadata block body in bytes.
pub const MAX_METADATA_BLOCK_LEN: u32 = (1 << 24) - 1;

/// The type of a metadata block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MetadataBlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    VorbisComment,
    CueSheet,
    Picture,
    /// A block type reserved for future use, in the range 7 to 126.
    Undefined(u8),
}

impl MetadataBlockType {
    /// Gets the block type for the 7-bit block type code. Code 127 is invalid.
    pub fn from_code(code: u8) -> Result<MetadataBlockType> {
        let block_type = match code {
            0 => MetadataBlockType::StreamInfo,
            1 => MetadataBlockType::Padding,
            2 => MetadataBlockType::Application,
            3 => MetadataBlockType::SeekTable,
            4 => MetadataBlockType::VorbisComment,
            5 => MetadataBlockType::CueSheet,
            6 => MetadataBlockType::Picture,
            7..=126 => MetadataBlockType::Undefined(code),
            _ => return decode_error("flac: invalid metadata block type"),
        };

        Ok(block_type)
    }

    /// Gets the 7-bit block type code.
    pub fn code(&self) -> u8 {
        match *self {
            MetadataBlockType::StreamInfo => 0,
            MetadataBlockType::Padding => 1,
            MetadataBlockType::Application => 2,
            MetadataBlockType::SeekTable => 3,
            MetadataBlockType::VorbisComment => 4,
            MetadataBlockType::CueSheet => 5,
            MetadataBlockType::Picture => 6,
            MetadataBlockType::Undefined(code) => code,
        }
    }

    /// Gets the canonical name of the block type.
    pub fn name(&self) -> &'static str {
        match *self {
            MetadataBlockType::StreamInfo => "STREAMINFO",
            MetadataBlockType::Padding => "PADDING",
            MetadataBlockType::Application => "APPLICATION",
            MetadataBlockType::SeekTable => "SEEKTABLE",
            MetadataBlockType::VorbisComment => "VORBIS_COMMENT",
            MetadataBlockType::CueSheet => "CUESHEET",
            MetadataBlockType::Picture => "PICTURE",
            MetadataBlockType::Undefined(_) => "UNDEFINED",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// The minimum and maximum number of decoded samples per block of audio.
    pub block_len_min: u16,
    pub block_len_max: u16,
    /// The minimum and maximum byte length of an encoded block (frame) of audio. Either value may
    /// be 0 if unknown.
    pub frame_byte_len_min: u32,
    pub frame_byte_len_max: u32,
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// The number of channels.
    pub n_channels: u32,
    /// The number of bits per sample of the stream.
    pub bits_per_sample: u32,
    /// The total number of samples in the stream, if available.
    pub n_samples: Option<u64>,
    /// The MD5 hash value of the decoded audio.
    pub md5: Option<[u8; 16]>,
}

impl StreamInfo {
    /// The length of a stream information block body in bytes.
    pub const LEN: u32 = 34;

    /// Read a stream information block.
    pub fn read<B: ReadBytes>(reader: &mut B) -> Result<StreamInfo> {
        let mut info = StreamInfo::default();

        // Read the block length bounds in number of samples.
        info.block_len_min = reader.read_be_u16()?;
        info.block_len_max = reader.read_be_u16()?;

        // Validate the block length bounds are in the range [16, 65535] samples.
        if info.block_len_min < 16 || info.block_len_max < 16 {
            return decode_error("flac: minimum block length is 16 samples");
        }

        // Validate the maximum block size is greater than or equal to the minimum block size.
        if info.block_len_max < info.block_len_min {
            return decode_error("flac: maximum block length is less than the minimum block length");
        }

        // Read the frame byte length bounds.
        info.frame_byte_len_min = reader.read_be_u24()?;
        info.frame_byte_len_max = reader.read_be_u24()?;

        // Validate the maximum frame byte length is greater than or equal to the minimum frame byte
        // length if both are known. A value of 0 for either indicates the respective byte length is
        // unknown. Valid values are in the range [0, (2^24) - 1] bytes.
        if info.frame_byte_len_min > 0
            && info.frame_byte_len_max > 0
            && info.frame_byte_len_max < info.frame_byte_len_min
        {
            return decode_error("flac: maximum frame length is less than the minimum frame length");
        }

        let mut br = BitStreamLtr::new(reader);

        // Read sample rate, valid rates are [1, 655350] Hz.
        info.sample_rate = br.read_bits_leq32(20)?;

        if info.sample_rate < 1 || info.sample_rate > 655_350 {
            return decode_error("flac: stream sample rate out of bounds");
        }

        // Read number of channels minus 1. Valid number of channels are 1-8.
        info.n_channels = br.read_bits_leq32(3)? + 1;

        // Read bits per sample minus 1. Valid number of bits per sample are 4-32.
        info.bits_per_sample = br.read_bits_leq32(5)? + 1;

        if info.bits_per_sample < 4 {
            return decode_error("flac: stream bits per sample are out of bounds");
        }

        // Read the total number of samples. All values are valid. A value of 0 indiciates a stream
        // of unknown length.
        info.n_samples = match br.read_bits_leq64(36)? {
            0 => None,
            samples => Some(samples),
        };

        // Read the decoded audio data MD5. If the MD5 buffer is zeroed then no checksum is present.
        let mut md5 = [0; 16];
        reader.read_buf_exact(&mut md5)?;

        if md5 != [0; 16] {
            info.md5 = Some(md5);
        }

        Ok(info)
    }

    /// Write a stream information block body.
    ///
    /// Fields are truncated to their coded widths. A total sample count that does not fit in 36
    /// bits is written as 0 (unknown).
    pub fn write(&self, writer: &mut BitWriterLtr) {
        writer.write_bits_leq32(u32::from(self.block_len_min), 16);
        writer.write_bits_leq32(u32::from(self.block_len_max), 16);
        writer.write_bits_leq32(self.frame_byte_len_min, 24);
        writer.write_bits_leq32(self.frame_byte_len_max, 24);
        writer.write_bits_leq32(self.sample_rate, 20);
        writer.write_bits_leq32(self.n_channels.saturating_sub(1), 3);
        writer.write_bits_leq32(self.bits_per_sample.saturating_sub(1), 5);

        let n_samples = match self.n_samples {
            Some(n_samples) if n_samples < 1 << 36 => n_samples,
            _ => 0,
        };

        writer.write_bits_leq64(n_samples, 36);
        writer.write_bytes(&self.md5.unwrap_or([0; 16]));
    }

    /// Check if the size is valid for a stream information block.
    pub fn is_valid_size(size: u64) -> bool {
        size == u64::from(StreamInfo::LEN)
    }
}

/// A vendor-specific application block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Application {
    /// The registered application identifier.
    pub id: [u8; 4],
    /// The application data.
    pub data: Box<[u8]>,
}

impl Application {
    fn read(reader: &mut BufReader<'_>) -> Result<Application> {
        let id = reader.read_quad_bytes()?;
        let data = Box::from(reader.read_buf_bytes_available_ref());
        Ok(Application { id, data })
    }
}

/// The body of a metadata block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataBlockData {
    StreamInfo(StreamInfo),
    /// Padding of the given length in bytes.
    Padding(u32),
    Application(Application),
    SeekTable(SeekTable),
    VorbisComment(VorbisComment),
    CueSheet(CueSheet),
    Picture(Picture),
    /// An opaque block of a reserved type.
    Undefined { block_type: u8, data: Box<[u8]> },
}

impl MetadataBlockData {
    /// Gets the type of the block.
    pub fn block_type(&self) -> MetadataBlockType {
        match self {
            MetadataBlockData::StreamInfo(_) => MetadataBlockType::StreamInfo,
            MetadataBlockData::Padding(_) => MetadataBlockType::Padding,
            MetadataBlockData::Application(_) => MetadataBlockType::Application,
            MetadataBlockData::SeekTable(_) => MetadataBlockType::SeekTable,
            MetadataBlockData::VorbisComment(_) => MetadataBlockType::VorbisComment,
            MetadataBlockData::CueSheet(_) => MetadataBlockType::CueSheet,
            MetadataBlockData::Picture(_) => MetadataBlockType::Picture,
            MetadataBlockData::Undefined { block_type, .. } => {
                MetadataBlockType::Undefined(*block_type)
            }
        }
    }

    /// Gets the length of the encoded body in bytes.
    pub fn len(&self) -> u64 {
        match self {
            MetadataBlockData::StreamInfo(_) => u64::from(StreamInfo::LEN),
            MetadataBlockData::Padding(len) => u64::from(*len),
            MetadataBlockData::Application(app) => 4 + app.data.len() as u64,
            MetadataBlockData::SeekTable(table) => table.encoded_len(),
            MetadataBlockData::VorbisComment(comment) => comment.encoded_len(),
            MetadataBlockData::CueSheet(cue_sheet) => cue_sheet.encoded_len(),
            MetadataBlockData::Picture(picture) => picture.encoded_len(),
            MetadataBlockData::Undefined { data, .. } => data.len() as u64,
        }
    }

    /// Returns true if the encoded body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses a block body of the given type. The body must be consumed exactly.
    pub fn read(block_type: MetadataBlockType, body: &[u8]) -> Result<MetadataBlockData> {
        let mut reader = BufReader::new(body);

        let data = match read_body(block_type, &mut reader) {
            Ok(data) => data,
            Err(ref err) if is_end_of_stream(err) => {
                return decode_error("flac: metadata block is shorter than its contents")
            }
            Err(err) => return Err(err),
        };

        if reader.bytes_available() > 0 {
            return decode_error("flac: metadata block is longer than its contents");
        }

        Ok(data)
    }

    /// Writes the block body.
    pub fn write(&self, writer: &mut BitWriterLtr) {
        match self {
            MetadataBlockData::StreamInfo(info) => info.write(writer),
            MetadataBlockData::Padding(len) => writer.write_bytes(&vec![0; *len as usize]),
            MetadataBlockData::Application(app) => {
                writer.write_bytes(&app.id);
                writer.write_bytes(&app.data);
            }
            MetadataBlockData::SeekTable(table) => table.write(writer),
            MetadataBlockData::VorbisComment(comment) => comment.write(writer),
            MetadataBlockData::CueSheet(cue_sheet) => cue_sheet.write(writer),
            MetadataBlockData::Picture(picture) => picture.write(writer),
            MetadataBlockData::Undefined { data, .. } => writer.write_bytes(data),
        }
    }
}

fn read_body(block_type: MetadataBlockType, reader: &mut BufReader<'_>) -> Result<MetadataBlockData> {
    let data = match block_type {
        MetadataBlockType::StreamInfo => MetadataBlockData::StreamInfo(StreamInfo::read(reader)?),
        MetadataBlockType::Padding => {
            let len = reader.read_buf_bytes_available_ref().len();
            MetadataBlockData::Padding(len as u32)
        }
        MetadataBlockType::Application => MetadataBlockData::Application(Application::read(reader)?),
        MetadataBlockType::SeekTable => MetadataBlockData::SeekTable(SeekTable::read(reader)?),
        MetadataBlockType::VorbisComment => {
            MetadataBlockData::VorbisComment(VorbisComment::read(reader)?)
        }
        MetadataBlockType::CueSheet => MetadataBlockData::CueSheet(CueSheet::read(reader)?),
        MetadataBlockType::Picture => MetadataBlockData::Picture(Picture::read(reader)?),
        MetadataBlockType::Undefined(code) => MetadataBlockData::Undefined {
            block_type: code,
            data: Box::from(reader.read_buf_bytes_available_ref()),
        },
    };

    Ok(data)
}

/// A metadata block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataBlock {
    /// Set if this is the last metadata block before the audio frames.
    pub is_last: bool,
    pub data: MetadataBlockData,
}

impl MetadataBlock {
    /// Instantiate a new block that is not the last block.
    pub fn new(data: MetadataBlockData) -> Self {
        MetadataBlock { is_last: false, data }
    }

    /// Gets the type of the block.
    pub fn block_type(&self) -> MetadataBlockType {
        self.data.block_type()
    }

    /// Gets the length of the encoded body in bytes.
    pub fn len(&self) -> u64 {
        self.data.len()
    }

    /// Returns true if the encoded body is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads a complete metadata block, header and body.
    pub fn read<B: ReadBytes>(reader: &mut B) -> Result<MetadataBlock> {
        let header = MetadataBlockHeader::read(reader)?;
        let body = reader.read_boxed_slice_exact(header.block_len as usize)?;

        let data = MetadataBlockData::read(header.block_type, &body)?;

        Ok(MetadataBlock { is_last: header.is_last, data })
    }

    /// Writes a complete metadata block, header and body.
    pub fn write(&self, writer: &mut BitWriterLtr) -> Result<()> {
        let len = self.len();

        if len > u64::from(MAX_METADATA_BLOCK_LEN) {
            return limit_error("flac: metadata block exceeds the maximum block length");
        }

        let header = MetadataBlockHeader {
            is_last: self.is_last,
            block_type: self.block_type(),
            block_len: len as u32,
        };

        header.write(writer);
        self.data.write(writer);

        Ok(())
    }
}

/// A metadata block header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MetadataBlockHeader {
    pub is_last: bool,
    pub block_type: MetadataBlockType,
    pub block_len: u32,
}

impl MetadataBlockHeader {
    /// The length of a metadata block header in bytes.
    pub const LEN: u32 = 4;

    /// Read a metadata block header.
    pub fn read<B: ReadBytes>(reader: &mut B) -> Result<MetadataBlockHeader> {
        let header_enc = reader.read_u8()?;

        // First bit of the header indicates if this is the last metadata block.
        let is_last = (header_enc & 0x80) == 0x80;

        // The next 7 bits of the header indicates the block type.
        let block_type = MetadataBlockType::from_code(header_enc & 0x7f)?;

        let block_len = reader.read_be_u24()?;

        Ok(MetadataBlockHeader { is_last, block_type, block_len })
    }

    /// Write a metadata block header.
    pub fn write(&self, writer: &mut BitWriterLtr) {
        writer.write_bit(self.is_last);
        writer.write_bits_leq32(u32::from(self.block_type.code()), 7);
        writer.write_bits_leq32(self.block_len, 24);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::errors::Error;

    fn round_trip(block: &MetadataBlock) -> MetadataBlock {
        let mut writer = BitWriterLtr::new();
        block.write(&mut writer).unwrap();

        let buf = writer.into_inner();
        assert_eq!(buf.len() as u64, 4 + block.len());

        let mut reader = BufReader::new(&buf);
        let read = MetadataBlock::read(&mut reader).unwrap();
        assert_eq!(reader.bytes_available(), 0);
        read
    }

    fn stream_info() -> StreamInfo {
        StreamInfo {
            block_len_min: 4096,
            block_len_max: 4096,
            frame_byte_len_min: 14,
            frame_byte_len_max: 12_345,
            sample_rate: 44_100,
            n_channels: 2,
            bits_per_sample: 16,
            n_samples: Some(0x8_1234_5678),
            md5: Some([0xd4; 16]),
        }
    }

    #[test]
    fn verify_stream_info_round_trip() {
        let mut block = MetadataBlock::new(MetadataBlockData::StreamInfo(stream_info()));
        block.is_last = true;

        assert_eq!(round_trip(&block), block);

        let unknown = StreamInfo { n_samples: None, md5: None, ..stream_info() };
        let block = MetadataBlock::new(MetadataBlockData::StreamInfo(unknown));
        assert_eq!(round_trip(&block), block);
    }

    #[test]
    fn verify_stream_info_rejects_bad_bounds() {
        let info = StreamInfo { block_len_min: 8192, ..stream_info() };

        let mut writer = BitWriterLtr::new();
        info.write(&mut writer);
        let buf = writer.into_inner();

        assert!(StreamInfo::read(&mut BufReader::new(&buf)).is_err());
    }

    #[test]
    fn verify_padding_application_undefined_round_trip() {
        let blocks = [
            MetadataBlock::new(MetadataBlockData::Padding(0)),
            MetadataBlock::new(MetadataBlockData::Padding(100)),
            MetadataBlock::new(MetadataBlockData::Application(Application {
                id: *b"ATCH",
                data: Box::new([1, 2, 3]),
            })),
            MetadataBlock::new(MetadataBlockData::Undefined {
                block_type: 99,
                data: Box::new([0xaa; 7]),
            }),
        ];

        for block in blocks.iter() {
            assert_eq!(&round_trip(block), block);
        }
    }

    #[test]
    fn verify_block_type_codes() {
        for code in 0..127 {
            assert_eq!(MetadataBlockType::from_code(code).unwrap().code(), code);
        }

        assert!(MetadataBlockType::from_code(127).is_err());
        assert_eq!(MetadataBlockType::from_code(4).unwrap().name(), "VORBIS_COMMENT");
        assert_eq!(MetadataBlockType::from_code(42).unwrap().name(), "UNDEFINED");

        // A header with type 127.
        let mut reader = BufReader::new(&[0xff, 0x00, 0x00, 0x00]);
        assert!(matches!(MetadataBlock::read(&mut reader), Err(Error::DecodeError(_))));
    }

    #[test]
    fn verify_body_length_mismatch() {
        // An application block must have at least an identifier.
        assert!(matches!(
            MetadataBlockData::read(MetadataBlockType::Application, &[1, 2]),
            Err(Error::DecodeError(_))
        ));

        // A stream information block with trailing data.
        let mut writer = BitWriterLtr::new();
        stream_info().write(&mut writer);
        writer.write_bits_leq32(0, 8);
        let buf = writer.into_inner();

        assert!(matches!(
            MetadataBlockData::read(MetadataBlockType::StreamInfo, &buf),
            Err(Error::DecodeError(_))
        ));

        // A truncated body is an I/O error.
        let mut reader = BufReader::new(&[0x01, 0x00, 0x00, 0x10, 0x00]);
        assert!(matches!(MetadataBlock::read(&mut reader), Err(Error::IoError(_))));
    }
}
