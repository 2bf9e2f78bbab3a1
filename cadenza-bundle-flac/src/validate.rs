// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::checksum::Md5;
use cadenza_core::io::Monitor;

/// `Validator` computes the MD5 signature of decoded audio.
///
/// The signature covers the samples interleaved, each stored little-endian in the fewest whole
/// bytes that hold the stream's bits per sample.
#[derive(Default)]
pub struct Validator {
    state: Md5,
    buf: Vec<u8>,
}

impl Validator {
    /// Hashes a block of planar audio. Every channel must have the same length.
    pub fn update(&mut self, channels: &[&[i32]], bps: u32) {
        if bps == 0 {
            return;
        }

        let width = ((bps + 7) / 8).min(4) as usize;
        let n_frames = channels.first().map_or(0, |ch| ch.len());

        self.buf.clear();
        self.buf.reserve(channels.len() * n_frames * width);

        // Truncating the little-endian representation keeps the sign of samples in range.
        for i in 0..n_frames {
            for samples in channels {
                self.buf.extend_from_slice(&samples[i].to_le_bytes()[..width]);
            }
        }

        self.state.process_buf_bytes(&self.buf);
    }

    /// Gets the signature of all audio hashed so far.
    pub fn md5(&self) -> [u8; 16] {
        self.state.md5()
    }
}

#[cfg(test)]
mod tests {
    use super::Validator;

    fn hex(digest: [u8; 16]) -> String {
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn verify_empty_stream() {
        let validator = Validator::default();
        assert_eq!(hex(validator.md5()), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn verify_16_bit_stereo() {
        let mut validator = Validator::default();
        validator.update(&[&[1, 2], &[-1, 3]], 16);
        assert_eq!(hex(validator.md5()), "f4e311275c072253144564878bd8105b");
    }

    #[test]
    fn verify_24_bit_stereo_in_parts() {
        // Interleaved little-endian 24-bit samples, hashed across two updates.
        let mut validator = Validator::default();
        validator.update(&[&[0x123456], &[-1]], 24);
        validator.update(&[&[1], &[-2]], 20);
        assert_eq!(hex(validator.md5()), "8ab8960d253955f03a8c258fa69f07e8");
    }
}
