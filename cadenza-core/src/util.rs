// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `util` module provides a repository of commonly used utility functions sorted into distinct
//! categories.

pub mod bits {
    //! Utilities for bit manipulation.

    /// Sign extends an arbitrary, 32-bit or less, signed two's complement integer stored within an
    /// u32 to a full width i32.
    #[inline(always)]
    pub fn sign_extend_leq32_to_i32(value: u32, width: u32) -> i32 {
        // Rust uses an arithmetic shift right (the original sign bit is repeatedly shifted on) for
        // signed integer types. Therefore, shift the value to the right-hand side of the integer,
        // then shift it back to extend the sign bit.
        (value.wrapping_shl(32 - width) as i32).wrapping_shr(32 - width)
    }

    /// Sign extends an arbitrary, 64-bit or less, signed two's complement integer stored within an
    /// u64 to a full width i64.
    #[inline(always)]
    pub fn sign_extend_leq64_to_i64(value: u64, width: u32) -> i64 {
        (value.wrapping_shl(64 - width) as i64).wrapping_shr(64 - width)
    }

    /// Returns a mask of the `width` least-significant bits. A width of 64 or more yields all ones.
    #[inline(always)]
    pub fn mask_lower_u64(width: u32) -> u64 {
        if width >= u64::BITS {
            u64::MAX
        }
        else {
            (1 << width) - 1
        }
    }

    /// Folds a signed integer into an unsigned integer such that values of small magnitude, either
    /// positive or negative, map to small unsigned values.
    ///
    /// ```text
    /// Input  => 0 -1  1 -2  2 -3  3
    /// Output => 0  1  2  3  4  5  6
    /// ```
    #[inline(always)]
    pub fn fold_i32_to_u32(value: i32) -> u32 {
        ((value << 1) ^ (value >> 31)) as u32
    }

    /// The inverse of [`fold_i32_to_u32`].
    #[inline(always)]
    pub fn unfold_u32_to_i32(word: u32) -> i32 {
        // The LSB selects the sign. XORing the halved word with either 0 or -1 yields either the
        // halved word, or its one's complement.
        ((word >> 1) as i32) ^ -((word & 0x1) as i32)
    }

    /// Gets the minimum number of bits required to store `value` as a signed two's complement
    /// integer.
    #[inline(always)]
    pub fn signed_bit_width(value: i64) -> u32 {
        if value >= 0 {
            u64::BITS - (value as u64).leading_zeros() + 1
        }
        else {
            u64::BITS - (!value as u64).leading_zeros() + 1
        }
    }

}

pub mod text {
    //! Utilities for converting fixed-width text fields.

    /// Converts a string of bytes to an ASCII string if all characters are within the printable
    /// ASCII range. If a null byte is encounted, the string terminates at that point.
    pub fn printable_ascii_to_string(bytes: &[u8]) -> Option<String> {
        let mut result = String::with_capacity(bytes.len());

        for c in bytes {
            match c {
                0x00 => break,
                0x20..=0x7e => result.push(char::from(*c)),
                _ => return None,
            }
        }

        Some(result)
    }

    /// Returns true if every character of `s` is printable ASCII.
    pub fn is_printable_ascii(s: &str) -> bool {
        s.bytes().all(|c| (0x20..=0x7e).contains(&c))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn verify_printable_ascii_to_string() {
            assert_eq!(printable_ascii_to_string(b"ABC\0\0\0").as_deref(), Some("ABC"));
            assert_eq!(printable_ascii_to_string(b"\0junk").as_deref(), Some(""));
            assert_eq!(printable_ascii_to_string(b"A\x01"), None);
        }
    }
}
