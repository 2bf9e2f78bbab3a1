// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::io::Monitor;

/// Generates the byte-wise lookup table for an MSB-first 8-bit CRC with the given polynomial.
const fn crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;

        while bit < 8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            bit += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// CRC-8 polynomial x^8 + x^2 + x^1 + x^0.
const CRC8_CCITT_TABLE: [u8; 256] = crc8_table(0x07);

/// `Crc8Ccitt` implements the CRC-8 algorithm using the CCITT polynomial.
///
/// * Polynomial = 0x07
/// * RefIn = false
/// * RefOut = false
/// * XorOut = false
#[derive(Clone, Copy, Debug)]
pub struct Crc8Ccitt {
    state: u8,
}

impl Crc8Ccitt {
    /// Instantiate a `Crc8Ccitt` instance with an initial state.
    pub fn new(state: u8) -> Self {
        Crc8Ccitt { state }
    }

    /// Returns the computed CRC.
    pub fn crc(&self) -> u8 {
        self.state
    }
}

impl Monitor for Crc8Ccitt {
    #[inline(always)]
    fn process_byte(&mut self, byte: u8) {
        self.state = CRC8_CCITT_TABLE[usize::from(self.state ^ byte)];
    }

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.state = CRC8_CCITT_TABLE[usize::from(self.state ^ byte)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Crc8Ccitt;
    use crate::io::Monitor;

    #[test]
    fn verify_crc8_ccitt() {
        // Standard check value of CRC-8/SMBUS.
        let mut crc = Crc8Ccitt::new(0);
        crc.process_buf_bytes(b"123456789");
        assert_eq!(crc.crc(), 0xf4);

        // A FLAC frame header: fixed blocksize, 4096 samples, 44.1kHz, stereo, 16-bit, frame 0.
        let mut crc = Crc8Ccitt::new(0);
        for byte in [0xff, 0xf8, 0xc9, 0x18, 0x00] {
            crc.process_byte(byte);
        }
        assert_eq!(crc.crc(), 0xc2);
    }
}
