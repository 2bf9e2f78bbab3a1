// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{BitWriterLtr, BufReader, ReadBytes};
use cadenza_core::util::text::printable_ascii_to_string;

const CATALOG_NUMBER_LEN: usize = 128;
const ISRC_LEN: usize = 12;

/// The number of samples in one CD-DA frame (1/75th of a second at 44.1kHz).
const CD_DA_FRAME_SAMPLES: u64 = 588;

/// The track number of the CD-DA lead-out track.
pub const CD_DA_LEAD_OUT_TRACK: u8 = 170;

/// An index point within a cue sheet track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CueSheetIndex {
    /// The offset in samples relative to the track offset.
    pub offset: u64,
    /// The index point number.
    pub number: u8,
}

/// A cue sheet track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CueSheetTrack {
    /// The track offset in samples relative to the start of the stream.
    pub offset: u64,
    /// The track number.
    pub number: u8,
    /// The International Standard Recording Code, up-to 12 ASCII characters.
    pub isrc: String,
    pub is_audio: bool,
    pub pre_emphasis: bool,
    pub indices: Vec<CueSheetIndex>,
}

impl Default for CueSheetTrack {
    fn default() -> Self {
        CueSheetTrack {
            offset: 0,
            number: 0,
            isrc: String::new(),
            is_audio: true,
            pre_emphasis: false,
            indices: Vec::new(),
        }
    }
}

impl CueSheetTrack {
    /// Returns a track with exactly `n_indices` index points. Index points are truncated from the
    /// end, or zeroed index points are appended.
    pub fn resize_indices(mut self, n_indices: usize) -> Self {
        self.indices.resize(n_indices, CueSheetIndex::default());
        self
    }

    fn read(reader: &mut BufReader<'_>) -> Result<CueSheetTrack> {
        let offset = reader.read_be_u64()?;
        let number = reader.read_u8()?;

        let isrc = match printable_ascii_to_string(reader.read_buf_bytes_ref(ISRC_LEN)?) {
            Some(s) => s,
            None => return decode_error("flac: cuesheet track ISRC contains invalid characters"),
        };

        // The first two bits are flags. The remaining 6 bits and 13 bytes are reserved.
        let flags = reader.read_u8()?;

        let is_audio = (flags & 0x80) == 0x00;
        let pre_emphasis = (flags & 0x40) == 0x40;

        reader.ignore_bytes(13)?;

        let n_indices = reader.read_u8()?;

        let mut indices = Vec::with_capacity(usize::from(n_indices));

        for _ in 0..n_indices {
            let offset = reader.read_be_u64()?;
            let number = reader.read_u8()?;

            // 3 reserved bytes.
            reader.ignore_bytes(3)?;

            indices.push(CueSheetIndex { offset, number });
        }

        Ok(CueSheetTrack { offset, number, isrc, is_audio, pre_emphasis, indices })
    }

    fn write(&self, writer: &mut BitWriterLtr) {
        writer.write_bits_leq64(self.offset, 64);
        writer.write_bits_leq32(u32::from(self.number), 8);
        write_fixed_ascii(writer, &self.isrc, ISRC_LEN);
        writer.write_bit(!self.is_audio);
        writer.write_bit(self.pre_emphasis);
        writer.write_bits_leq32(0, 6);
        writer.write_bytes(&[0; 13]);
        writer.write_bits_leq32(self.indices.len() as u32, 8);

        for index in self.indices.iter() {
            writer.write_bits_leq64(index.offset, 64);
            writer.write_bits_leq32(u32::from(index.number), 8);
            writer.write_bytes(&[0; 3]);
        }
    }

    fn encoded_len(&self) -> u64 {
        36 + 12 * self.indices.len() as u64
    }
}

/// A cue sheet block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CueSheet {
    /// The media catalog number, up-to 128 ASCII characters.
    pub media_catalog_number: String,
    /// The number of lead-in samples. Only meaningful for CD-DA cue sheets.
    pub lead_in: u64,
    /// Set if the cue sheet corresponds to a compact disc.
    pub is_cd: bool,
    pub tracks: Vec<CueSheetTrack>,
}

/// Writes `s` as a NUL-padded field of exactly `len` bytes. Longer strings are truncated.
fn write_fixed_ascii(writer: &mut BitWriterLtr, s: &str, len: usize) {
    let bytes = &s.as_bytes()[..s.len().min(len)];
    writer.write_bytes(bytes);
    writer.write_bytes(&vec![0; len - bytes.len()]);
}

impl CueSheet {
    pub(super) fn read(reader: &mut BufReader<'_>) -> Result<CueSheet> {
        // Read cuesheet catalog number. The catalog number only allows printable ASCII characters.
        let catalog = reader.read_buf_bytes_ref(CATALOG_NUMBER_LEN)?;

        let media_catalog_number = match printable_ascii_to_string(catalog) {
            Some(s) => s,
            None => return decode_error("flac: cuesheet catalog number contains invalid characters"),
        };

        // Number of lead-in samples.
        let lead_in = reader.read_be_u64()?;

        // Next bit is set for CD-DA cuesheets. The remaining 7 bits and 258 bytes are reserved.
        let is_cd = (reader.read_u8()? & 0x80) == 0x80;

        reader.ignore_bytes(258)?;

        let n_tracks = reader.read_u8()?;

        let mut tracks = Vec::with_capacity(usize::from(n_tracks));

        for _ in 0..n_tracks {
            tracks.push(CueSheetTrack::read(reader)?);
        }

        Ok(CueSheet { media_catalog_number, lead_in, is_cd, tracks })
    }

    pub(super) fn write(&self, writer: &mut BitWriterLtr) {
        write_fixed_ascii(writer, &self.media_catalog_number, CATALOG_NUMBER_LEN);
        writer.write_bits_leq64(self.lead_in, 64);
        writer.write_bit(self.is_cd);
        writer.write_bits_leq32(0, 7);
        writer.write_bytes(&[0; 258]);
        writer.write_bits_leq32(self.tracks.len() as u32, 8);

        for track in self.tracks.iter() {
            track.write(writer);
        }
    }

    pub(super) fn encoded_len(&self) -> u64 {
        let tracks: u64 = self.tracks.iter().map(CueSheetTrack::encoded_len).sum();
        396 + tracks
    }

    /// Returns a cue sheet with exactly `n_tracks` tracks. Tracks are truncated from the end, or
    /// default tracks are appended.
    pub fn resize_tracks(mut self, n_tracks: usize) -> Self {
        self.tracks.resize(n_tracks, CueSheetTrack::default());
        self
    }

    /// Checks the cue sheet for legality. If `check_cd_da_subset` is set, the stricter rules for
    /// cue sheets describing a CD-DA disc are also checked. On failure, the broken rule is
    /// returned.
    pub fn is_legal(&self, check_cd_da_subset: bool) -> std::result::Result<(), &'static str> {
        if self.media_catalog_number.len() > CATALOG_NUMBER_LEN {
            return Err("cue sheet media catalog number is longer than 128 characters");
        }

        if check_cd_da_subset {
            if self.lead_in < 2 * 44_100 {
                return Err("CD-DA cue sheet must have a lead-in length of at least 2 seconds");
            }
            if self.lead_in % CD_DA_FRAME_SAMPLES != 0 {
                return Err("CD-DA cue sheet lead-in length must be evenly divisible by 588 samples");
            }
        }

        let last = match self.tracks.last() {
            Some(track) => track,
            None => return Err("cue sheet must have at least one track (the lead-out)"),
        };

        if check_cd_da_subset && last.number != CD_DA_LEAD_OUT_TRACK {
            return Err("CD-DA cue sheet must have a lead-out track number 170 (0xAA)");
        }

        if self.tracks.len() > 256 {
            return Err("cue sheet has more than 255 tracks");
        }

        for (i, track) in self.tracks.iter().enumerate() {
            if track.number == 0 {
                return Err("cue sheet may not have a track number 0");
            }

            if track.isrc.len() > ISRC_LEN {
                return Err("cue sheet track ISRC is longer than 12 characters");
            }

            if check_cd_da_subset {
                if !((1..=99).contains(&track.number) || track.number == CD_DA_LEAD_OUT_TRACK) {
                    return Err("CD-DA cue sheet track number must be 1-99 or 170");
                }

                if track.offset % CD_DA_FRAME_SAMPLES != 0 {
                    return Err("CD-DA cue sheet track offset must be evenly divisible by 588 samples");
                }
            }

            if i + 1 < self.tracks.len() {
                match track.indices.first() {
                    None => return Err("cue sheet track must have at least one index point"),
                    Some(index) if index.number > 1 => {
                        return Err("cue sheet track's first index number must be 0 or 1")
                    }
                    _ => (),
                }
            }

            for (j, index) in track.indices.iter().enumerate() {
                if check_cd_da_subset && index.offset % CD_DA_FRAME_SAMPLES != 0 {
                    return Err(
                        "CD-DA cue sheet track index offset must be evenly divisible by 588 samples",
                    );
                }

                if j > 0 && u16::from(index.number) != u16::from(track.indices[j - 1].number) + 1 {
                    return Err("cue sheet track index numbers must increase by 1");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::io::FiniteStream;

    fn cd_cue_sheet() -> CueSheet {
        let mut cue_sheet = CueSheet {
            media_catalog_number: "1234567890123".into(),
            lead_in: 88_200,
            is_cd: true,
            tracks: vec![],
        }
        .resize_tracks(3);

        cue_sheet.tracks[0] = CueSheetTrack {
            offset: 0,
            number: 1,
            isrc: "USRC17607839".into(),
            ..Default::default()
        }
        .resize_indices(2);
        cue_sheet.tracks[0].indices[1] = CueSheetIndex { offset: 588 * 10, number: 1 };

        cue_sheet.tracks[1] = CueSheetTrack { offset: 588 * 1000, number: 2, ..Default::default() }
            .resize_indices(1);
        cue_sheet.tracks[1].indices[0].number = 1;
        cue_sheet.tracks[1].pre_emphasis = true;

        cue_sheet.tracks[2] =
            CueSheetTrack { offset: 588 * 5000, number: 170, is_audio: false, ..Default::default() };

        cue_sheet
    }

    #[test]
    fn verify_cue_sheet_round_trip() {
        let cue_sheet = cd_cue_sheet();

        let mut writer = BitWriterLtr::new();
        cue_sheet.write(&mut writer);
        let buf = writer.into_inner();

        assert_eq!(buf.len() as u64, cue_sheet.encoded_len());

        let mut reader = BufReader::new(&buf);
        assert_eq!(CueSheet::read(&mut reader).unwrap(), cue_sheet);
        assert_eq!(reader.bytes_available(), 0);
    }

    #[test]
    fn verify_cue_sheet_legality() {
        let cue_sheet = cd_cue_sheet();
        assert_eq!(cue_sheet.is_legal(true), Ok(()));

        let mut bad = cue_sheet.clone();
        bad.tracks[1].offset += 1;
        assert!(bad.is_legal(true).is_err());
        assert_eq!(bad.is_legal(false), Ok(()));

        let mut bad = cue_sheet.clone();
        bad.tracks[2].number = 3;
        assert!(bad.is_legal(true).is_err());

        let mut bad = cue_sheet.clone();
        bad.tracks[0].indices[1].number = 3;
        assert!(bad.is_legal(false).is_err());

        let bad = cue_sheet.clone().resize_tracks(0);
        assert!(bad.is_legal(false).is_err());

        let mut bad = cue_sheet;
        bad.lead_in = 0;
        assert!(bad.is_legal(true).is_err());
    }
}
