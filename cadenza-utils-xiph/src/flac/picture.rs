// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{BitWriterLtr, BufReader, ReadBytes};
use cadenza_core::util::text::{is_printable_ascii, printable_ascii_to_string};

/// The usage of a picture, as defined by the ID3v2 APIC frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PictureType {
    Other,
    FileIcon,
    OtherFileIcon,
    #[default]
    FrontCover,
    BackCover,
    LeafletPage,
    Media,
    LeadArtist,
    Artist,
    Conductor,
    Band,
    Composer,
    Lyricist,
    RecordingLocation,
    DuringRecording,
    DuringPerformance,
    VideoScreenCapture,
    Fish,
    Illustration,
    BandLogotype,
    PublisherLogotype,
    /// A picture type code outside the defined range.
    Unknown(u32),
}

/// Picture types in code order.
const PICTURE_TYPES: [(PictureType, &str); 21] = [
    (PictureType::Other, "Other"),
    (PictureType::FileIcon, "32x32 pixels 'file icon' (PNG only)"),
    (PictureType::OtherFileIcon, "Other file icon"),
    (PictureType::FrontCover, "Cover (front)"),
    (PictureType::BackCover, "Cover (back)"),
    (PictureType::LeafletPage, "Leaflet page"),
    (PictureType::Media, "Media (e.g. label side of CD)"),
    (PictureType::LeadArtist, "Lead artist/lead performer/soloist"),
    (PictureType::Artist, "Artist/performer"),
    (PictureType::Conductor, "Conductor"),
    (PictureType::Band, "Band/Orchestra"),
    (PictureType::Composer, "Composer"),
    (PictureType::Lyricist, "Lyricist/text writer"),
    (PictureType::RecordingLocation, "Recording Location"),
    (PictureType::DuringRecording, "During recording"),
    (PictureType::DuringPerformance, "During performance"),
    (PictureType::VideoScreenCapture, "Movie/video screen capture"),
    (PictureType::Fish, "A bright coloured fish"),
    (PictureType::Illustration, "Illustration"),
    (PictureType::BandLogotype, "Band/artist logotype"),
    (PictureType::PublisherLogotype, "Publisher/Studio logotype"),
];

impl PictureType {
    pub fn from_u32(code: u32) -> PictureType {
        match PICTURE_TYPES.get(code as usize) {
            Some((picture_type, _)) => *picture_type,
            None => PictureType::Unknown(code),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            PictureType::Unknown(code) => *code,
            _ => PICTURE_TYPES.iter().position(|(t, _)| t == self).unwrap_or(0) as u32,
        }
    }

    /// Gets a human readable description of the picture type.
    pub fn name(&self) -> &'static str {
        match self {
            PictureType::Unknown(_) => "Unknown",
            _ => PICTURE_TYPES[self.as_u32() as usize].1,
        }
    }
}

/// A picture block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Picture {
    pub picture_type: PictureType,
    /// The MIME type of the picture data. The special type `-->` indicates that the data is a URL.
    pub mime_type: String,
    pub description: String,
    /// The width of the picture in pixels.
    pub width: u32,
    /// The height of the picture in pixels.
    pub height: u32,
    /// The colour depth of the picture in bits-per-pixel.
    pub depth: u32,
    /// The number of colours used for indexed-colour pictures, or 0.
    pub colors: u32,
    pub data: Box<[u8]>,
}

impl Picture {
    pub(super) fn read(reader: &mut BufReader<'_>) -> Result<Picture> {
        let picture_type = PictureType::from_u32(reader.read_be_u32()?);

        // Read the MIME type. Non-printable ASCII characters are invalid.
        let mime_type_len = reader.read_be_u32()? as usize;

        let mime_type = match printable_ascii_to_string(reader.read_buf_bytes_ref(mime_type_len)?) {
            Some(s) => s,
            None => return decode_error("flac: picture mime-type contains invalid characters"),
        };

        // Read the description, which is UTF-8.
        let desc_len = reader.read_be_u32()? as usize;

        let description = String::from_utf8_lossy(reader.read_buf_bytes_ref(desc_len)?).into_owned();

        let width = reader.read_be_u32()?;
        let height = reader.read_be_u32()?;
        let depth = reader.read_be_u32()?;
        let colors = reader.read_be_u32()?;

        let data_len = reader.read_be_u32()? as usize;
        let data = Box::from(reader.read_buf_bytes_ref(data_len)?);

        Ok(Picture { picture_type, mime_type, description, width, height, depth, colors, data })
    }

    pub(super) fn write(&self, writer: &mut BitWriterLtr) {
        writer.write_bits_leq32(self.picture_type.as_u32(), 32);
        writer.write_bits_leq32(self.mime_type.len() as u32, 32);
        writer.write_bytes(self.mime_type.as_bytes());
        writer.write_bits_leq32(self.description.len() as u32, 32);
        writer.write_bytes(self.description.as_bytes());
        writer.write_bits_leq32(self.width, 32);
        writer.write_bits_leq32(self.height, 32);
        writer.write_bits_leq32(self.depth, 32);
        writer.write_bits_leq32(self.colors, 32);
        writer.write_bits_leq32(self.data.len() as u32, 32);
        writer.write_bytes(&self.data);
    }

    pub(super) fn encoded_len(&self) -> u64 {
        32 + (self.mime_type.len() + self.description.len() + self.data.len()) as u64
    }

    /// Checks the picture for legality. The MIME type must be printable ASCII.
    pub fn is_legal(&self) -> std::result::Result<(), &'static str> {
        if !is_printable_ascii(&self.mime_type) {
            return Err("MIME type string must contain only printable ASCII characters (0x20-0x7e)");
        }

        if self.description.contains('\0') {
            return Err("description string must not contain NUL characters");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::io::FiniteStream;

    #[test]
    fn verify_picture_type_names() {
        assert_eq!(PictureType::from_u32(3), PictureType::FrontCover);
        assert_eq!(PictureType::FrontCover.as_u32(), 3);
        assert_eq!(PictureType::FrontCover.name(), "Cover (front)");
        assert_eq!(PictureType::from_u32(17).name(), "A bright coloured fish");
        assert_eq!(PictureType::from_u32(20), PictureType::PublisherLogotype);
        assert_eq!(PictureType::from_u32(21), PictureType::Unknown(21));
        assert_eq!(PictureType::Unknown(21).as_u32(), 21);
        assert_eq!(PictureType::Unknown(21).name(), "Unknown");

        for code in 0..21 {
            assert_eq!(PictureType::from_u32(code).as_u32(), code);
        }
    }

    #[test]
    fn verify_picture_round_trip() {
        let picture = Picture {
            picture_type: PictureType::BackCover,
            mime_type: "image/png".into(),
            description: "Rückseite".into(),
            width: 640,
            height: 480,
            depth: 24,
            colors: 0,
            data: Box::from(&[0x89, b'P', b'N', b'G', 1, 2, 3][..]),
        };

        assert_eq!(picture.is_legal(), Ok(()));

        let mut writer = BitWriterLtr::new();
        picture.write(&mut writer);
        let buf = writer.into_inner();

        assert_eq!(buf.len() as u64, picture.encoded_len());

        let mut reader = BufReader::new(&buf);
        assert_eq!(Picture::read(&mut reader).unwrap(), picture);
        assert_eq!(reader.bytes_available(), 0);
    }

    #[test]
    fn verify_picture_rejects_bad_mime_type() {
        let picture = Picture { mime_type: "image/\x01".into(), ..Default::default() };
        assert!(picture.is_legal().is_err());

        let mut writer = BitWriterLtr::new();
        picture.write(&mut writer);
        let buf = writer.into_inner();

        assert!(Picture::read(&mut BufReader::new(&buf)).is_err());
    }
}
