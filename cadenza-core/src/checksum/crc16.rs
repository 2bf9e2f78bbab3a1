// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::io::Monitor;

/// Generates the byte-wise lookup table for an MSB-first 16-bit CRC with the given polynomial.
const fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;

        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            bit += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// CRC-16 polynomial x^16 + x^15 + x^2 + x^0.
const CRC16_ANSI_TABLE: [u16; 256] = crc16_table(0x8005);

/// `Crc16Ansi` implements the CRC-16 algorithm using the ANSI polynomial.
///
/// * Polynomial = 0x8005
/// * RefIn = false
/// * RefOut = false
/// * XorOut = false
#[derive(Clone, Copy, Debug)]
pub struct Crc16Ansi {
    state: u16,
}

impl Crc16Ansi {
    /// Instantiate a `Crc16Ansi` instance with an initial state.
    pub fn new(state: u16) -> Self {
        Crc16Ansi { state }
    }

    /// Returns the computed CRC.
    pub fn crc(&self) -> u16 {
        self.state
    }
}

impl Monitor for Crc16Ansi {
    #[inline(always)]
    fn process_byte(&mut self, byte: u8) {
        let idx = usize::from((self.state >> 8) as u8 ^ byte);
        self.state = (self.state << 8) ^ CRC16_ANSI_TABLE[idx];
    }

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            let idx = usize::from((self.state >> 8) as u8 ^ byte);
            self.state = (self.state << 8) ^ CRC16_ANSI_TABLE[idx];
        }
    }
}
