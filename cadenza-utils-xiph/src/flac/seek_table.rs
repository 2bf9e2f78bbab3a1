// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{BitWriterLtr, BufReader, FiniteStream, ReadBytes};

/// A seek point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    /// The number of the first sample in the target frame, or [`SeekPoint::PLACEHOLDER`].
    pub sample_number: u64,
    /// The byte offset of the target frame from the first byte of the first frame.
    pub stream_offset: u64,
    /// The number of samples in the target frame.
    pub frame_samples: u32,
}

impl SeekPoint {
    /// The sample number of a placeholder seek point.
    pub const PLACEHOLDER: u64 = u64::MAX;

    /// The length of an encoded seek point in bytes.
    pub const LEN: u64 = 18;

    /// Instantiate a placeholder seek point.
    pub fn placeholder() -> Self {
        SeekPoint { sample_number: SeekPoint::PLACEHOLDER, stream_offset: 0, frame_samples: 0 }
    }

    /// Returns true if this is a placeholder seek point.
    pub fn is_placeholder(&self) -> bool {
        self.sample_number == SeekPoint::PLACEHOLDER
    }
}

impl Default for SeekPoint {
    fn default() -> Self {
        SeekPoint::placeholder()
    }
}

/// A seek table block.
///
/// The template builders append points with only the sample number set. The encoder fills in the
/// stream offset and frame length of each point once the stream has been encoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeekTable {
    pub points: Vec<SeekPoint>,
}

impl SeekTable {
    pub(super) fn read(reader: &mut BufReader<'_>) -> Result<SeekTable> {
        let len = reader.bytes_available();

        // The number of seek table entries is always the block length divided by the length of a
        // single entry, 18 bytes.
        if len % SeekPoint::LEN != 0 {
            return decode_error("flac: seek table length is not a multiple of the seek point length");
        }

        let count = len / SeekPoint::LEN;

        let mut points = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let sample_number = reader.read_be_u64()?;
            let stream_offset = reader.read_be_u64()?;
            let frame_samples = u32::from(reader.read_be_u16()?);

            points.push(SeekPoint { sample_number, stream_offset, frame_samples });
        }

        Ok(SeekTable { points })
    }

    /// Writes the body of the seek table block.
    pub fn write(&self, writer: &mut BitWriterLtr) {
        for point in self.points.iter() {
            writer.write_bits_leq64(point.sample_number, 64);
            writer.write_bits_leq64(point.stream_offset, 64);
            writer.write_bits_leq32(point.frame_samples, 16);
        }
    }

    pub(super) fn encoded_len(&self) -> u64 {
        SeekPoint::LEN * self.points.len() as u64
    }

    /// Returns a table with exactly `n_points` points. Points are truncated from the end, or new
    /// placeholder points are appended.
    pub fn resize_points(mut self, n_points: usize) -> Self {
        self.points.resize(n_points, SeekPoint::placeholder());
        self
    }

    /// Returns the table with `count` placeholder points appended.
    pub fn with_placeholders(mut self, count: usize) -> Self {
        self.points.extend(std::iter::repeat(SeekPoint::placeholder()).take(count));
        self
    }

    /// Returns the table with a point appended for the given sample.
    pub fn with_point(mut self, sample_number: u64) -> Self {
        self.points.push(SeekPoint { sample_number, stream_offset: 0, frame_samples: 0 });
        self
    }

    /// Returns the table with `count` points, evenly spaced over a stream of `n_samples` samples,
    /// appended. The first point is always sample 0.
    pub fn with_spaced_points(mut self, count: u32, n_samples: u64) -> Self {
        if count > 0 && n_samples > 0 {
            for j in 0..u64::from(count) {
                let sample_number = (u128::from(n_samples) * u128::from(j) / u128::from(count)) as u64;
                self = self.with_point(sample_number);
            }
        }
        self
    }

    /// Returns the table with a point every `interval` samples, over a stream of `n_samples`
    /// samples, appended.
    pub fn with_spaced_points_by_samples(mut self, interval: u32, n_samples: u64) -> Self {
        if interval > 0 && n_samples > 0 {
            let interval = u64::from(interval);

            let mut count = 1 + n_samples / interval;

            if n_samples % interval == 0 {
                count -= 1;
            }

            for j in 0..count {
                self = self.with_point(j * interval);
            }
        }
        self
    }

    /// Sorts the points by ascending sample number. Duplicate points are converted to placeholders,
    /// and all placeholders are moved to the end of the table. Returns the number of points that
    /// are not placeholders.
    pub fn sort(&mut self) -> usize {
        // Placeholders have the largest possible sample number and so sort to the end.
        self.points.sort_by_key(|point| point.sample_number);

        let mut unique = 0;

        for i in 0..self.points.len() {
            let point = self.points[i];

            if point.is_placeholder() {
                break;
            }

            if unique == 0 || self.points[unique - 1].sample_number != point.sample_number {
                self.points[unique] = point;
                unique += 1;
            }
        }

        for point in self.points[unique..].iter_mut() {
            *point = SeekPoint::placeholder();
        }

        unique
    }

    /// Returns true if the points are in strictly ascending order of sample number, with any
    /// placeholders at the end of the table.
    pub fn is_legal(&self) -> bool {
        let mut prev: Option<u64> = None;

        for point in self.points.iter() {
            if let Some(prev) = prev {
                if !point.is_placeholder() && point.sample_number <= prev {
                    return false;
                }
            }

            if point.frame_samples > u32::from(u16::MAX) {
                return false;
            }

            prev = Some(point.sample_number);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(sample_number: u64) -> SeekPoint {
        SeekPoint { sample_number, stream_offset: 0, frame_samples: 0 }
    }

    #[test]
    fn verify_seek_table_read_write() {
        let table = SeekTable {
            points: vec![
                SeekPoint { sample_number: 0, stream_offset: 0, frame_samples: 4096 },
                SeekPoint { sample_number: 4096, stream_offset: 8_000, frame_samples: 4096 },
                SeekPoint::placeholder(),
            ],
        };

        let mut writer = BitWriterLtr::new();
        table.write(&mut writer);
        let buf = writer.into_inner();

        assert_eq!(buf.len() as u64, table.encoded_len());
        assert_eq!(SeekTable::read(&mut BufReader::new(&buf)).unwrap(), table);

        assert!(SeekTable::read(&mut BufReader::new(&buf[..20])).is_err());
    }

    #[test]
    fn verify_seek_table_templates() {
        let table = SeekTable::default().with_spaced_points(4, 100);
        let samples: Vec<u64> = table.points.iter().map(|p| p.sample_number).collect();
        assert_eq!(samples, [0, 25, 50, 75]);

        let table = SeekTable::default().with_spaced_points_by_samples(10, 30);
        let samples: Vec<u64> = table.points.iter().map(|p| p.sample_number).collect();
        assert_eq!(samples, [0, 10, 20]);

        let table = SeekTable::default().with_spaced_points_by_samples(10, 31);
        assert_eq!(table.points.len(), 4);

        let table = SeekTable::default().with_point(5).with_placeholders(2).resize_points(5);
        assert_eq!(table.points.len(), 5);
        assert!(table.points[1..].iter().all(SeekPoint::is_placeholder));
        assert!(table.is_legal());

        let table = table.resize_points(1);
        assert_eq!(table.points, [point(5)]);
    }

    #[test]
    fn verify_seek_table_sort() {
        let mut table = SeekTable {
            points: vec![point(30), SeekPoint::placeholder(), point(10), point(30), point(20)],
        };

        assert!(!table.is_legal());
        assert_eq!(table.sort(), 3);
        assert!(table.is_legal());

        let samples: Vec<u64> = table.points.iter().map(|p| p.sample_number).collect();
        assert_eq!(samples, [10, 20, 30, SeekPoint::PLACEHOLDER, SeekPoint::PLACEHOLDER]);
    }

    #[test]
    fn verify_seek_table_legality() {
        assert!(SeekTable::default().is_legal());
        assert!(SeekTable { points: vec![point(0), point(1)] }.is_legal());
        assert!(!SeekTable { points: vec![point(1), point(1)] }.is_legal());
        assert!(!SeekTable { points: vec![SeekPoint::placeholder(), point(1)] }.is_legal());
    }
}
