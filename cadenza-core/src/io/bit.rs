// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;
use std::io;

use crate::io::ReadBytes;
use crate::util::bits::*;

fn end_of_bitstream_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of bitstream"))
}

mod private {
    use std::io;

    pub trait FetchBitsLtr {
        /// Discard any remaining bits in the source and fetch new bits.
        fn fetch_bits(&mut self) -> io::Result<()>;

        /// Get all the bits in the source.
        fn get_bits(&self) -> u64;

        /// Get the number of bits left in the source.
        fn num_bits_left(&self) -> u32;

        /// Consume `num` bits from the source.
        fn consume_bits(&mut self, num: u32);
    }
}

/// A `FiniteBitStream` is a bit stream that has a known length in bits.
pub trait FiniteBitStream {
    /// Gets the number of bits left unread.
    fn bits_left(&self) -> u64;
}

/// `ReadBitsLtr` reads bits from most-significant to least-significant.
///
/// Field widths must be in the range `1..=32` for the `leq32` variants and `1..=64` for the
/// `leq64` variants. Any other width is a programming error and panics.
pub trait ReadBitsLtr: private::FetchBitsLtr {
    /// Discards any saved bits and resets the `BitStream` to prepare it for a byte-aligned read.
    #[inline(always)]
    fn realign(&mut self) {
        let skip = self.num_bits_left() & 0x7;
        self.consume_bits(skip);
    }

    /// Returns true if the next bit to be read is the first bit of a byte.
    #[inline(always)]
    fn is_aligned(&self) -> bool {
        self.num_bits_left() & 0x7 == 0
    }

    /// Ignores the specified number of bits from the stream or returns an error.
    #[inline(always)]
    fn ignore_bits(&mut self, mut num_bits: u32) -> io::Result<()> {
        if num_bits <= self.num_bits_left() {
            self.consume_bits(num_bits);
        }
        else {
            // Consume whole bit caches directly.
            while num_bits > self.num_bits_left() {
                num_bits -= self.num_bits_left();
                self.fetch_bits()?;
            }

            if num_bits > 0 {
                // Shift out in two parts to prevent panicing when num_bits == 64.
                self.consume_bits(num_bits - 1);
                self.consume_bits(1);
            }
        }

        Ok(())
    }

    /// Ignores one bit from the stream or returns an error.
    #[inline(always)]
    fn ignore_bit(&mut self) -> io::Result<()> {
        self.ignore_bits(1)
    }

    /// Read a single bit as a boolean value or returns an error.
    #[inline(always)]
    fn read_bit(&mut self) -> io::Result<bool> {
        if self.num_bits_left() < 1 {
            self.fetch_bits()?;
        }

        let bit = self.get_bits() & (1 << 63) != 0;

        self.consume_bits(1);
        Ok(bit)
    }

    /// Reads up to 32-bits and interprets them as an unsigned integer or returns an error.
    #[inline(always)]
    fn read_bits_leq32(&mut self, mut bit_width: u32) -> io::Result<u32> {
        assert!(bit_width > 0 && bit_width <= u32::BITS, "invalid bit width {}", bit_width);

        // Since bit_width is always > 0, this shift operation is always < 64, and will therefore
        // never panic.
        let mut bits = self.get_bits() >> (u64::BITS - bit_width);

        while bit_width > self.num_bits_left() {
            bit_width -= self.num_bits_left();

            self.fetch_bits()?;

            bits |= self.get_bits() >> (u64::BITS - bit_width);
        }

        self.consume_bits(bit_width);

        Ok(bits as u32)
    }

    /// Reads up to 32-bits and interprets them as a signed two's complement integer or returns an
    /// error.
    #[inline(always)]
    fn read_bits_leq32_signed(&mut self, bit_width: u32) -> io::Result<i32> {
        let value = self.read_bits_leq32(bit_width)?;
        Ok(sign_extend_leq32_to_i32(value, bit_width))
    }

    /// Reads up to 64-bits and interprets them as an unsigned integer or returns an error.
    #[inline(always)]
    fn read_bits_leq64(&mut self, mut bit_width: u32) -> io::Result<u64> {
        assert!(bit_width > 0 && bit_width <= u64::BITS, "invalid bit width {}", bit_width);

        let mut bits = self.get_bits() >> (u64::BITS - bit_width);

        while bit_width > self.num_bits_left() {
            bit_width -= self.num_bits_left();

            self.fetch_bits()?;

            bits |= self.get_bits() >> (u64::BITS - bit_width);
        }

        // Shift in two parts to prevent panicing when bit_width == 64.
        self.consume_bits(bit_width - 1);
        self.consume_bits(1);

        Ok(bits)
    }

    /// Reads up to 64-bits and interprets them as a signed two's complement integer or returns an
    /// error.
    #[inline(always)]
    fn read_bits_leq64_signed(&mut self, bit_width: u32) -> io::Result<i64> {
        let value = self.read_bits_leq64(bit_width)?;
        Ok(sign_extend_leq64_to_i64(value, bit_width))
    }

    /// Reads and returns a unary zeros encoded integer (`n` zeros terminated by a one) or an
    /// error.
    #[inline(always)]
    fn read_unary_zeros(&mut self) -> io::Result<u32> {
        let mut num = 0;

        loop {
            // Get the number of leading zeros.
            let n_zeros = self.get_bits().leading_zeros();

            if n_zeros >= self.num_bits_left() {
                // If the number of zeros exceeds the number of bits left then all the remaining
                // bits were 0.
                num += self.num_bits_left();
                self.fetch_bits()?;
            }
            else {
                // Otherwise, a 1 bit was encountered after `n_zeros` 0 bits.
                num += n_zeros;

                // Since bits are shifted off the cache after they're consumed, for there to be a
                // 1 bit there must be atleast one extra available bit in the cache that can be
                // consumed after the 0 bits.
                self.consume_bits(n_zeros);
                self.consume_bits(1);

                break;
            }
        }

        Ok(num)
    }

    /// Reads and returns a unary ones encoded integer (`n` ones terminated by a zero) or an
    /// error.
    #[inline(always)]
    fn read_unary_ones(&mut self) -> io::Result<u32> {
        // Note: This algorithm is identical to read_unary_zeros except flipped for 1s.
        let mut num = 0;

        loop {
            let n_ones = self.get_bits().leading_ones();

            if n_ones >= self.num_bits_left() {
                num += self.num_bits_left();
                self.fetch_bits()?;
            }
            else {
                num += n_ones;

                self.consume_bits(n_ones);
                self.consume_bits(1);

                break;
            }
        }

        Ok(num)
    }
}

/// `BitStreamLtr` reads bits from most-significant to least-significant from any source
/// that implements [`ReadBytes`].
///
/// Stated another way, if N-bits are read from a `BitReaderLtr` then bit 0, the first bit read,
/// is the most-significant bit, and bit N-1, the last bit read, is the least-significant.
///
/// Bytes are fetched from the source one at a time, therefore at most 7 bits are ever buffered.
/// A checksum monitoring the source observes exactly the bytes the bit stream has started to
/// consume.
pub struct BitStreamLtr<'a, B: ReadBytes> {
    reader: &'a mut B,
    bits: u64,
    n_bits_left: u32,
}

impl<'a, B: ReadBytes> BitStreamLtr<'a, B> {
    /// Instantiate a new `BitStreamLtr` with the given source.
    pub fn new(reader: &'a mut B) -> Self {
        BitStreamLtr { reader, bits: 0, n_bits_left: 0 }
    }
}

impl<B: ReadBytes> private::FetchBitsLtr for BitStreamLtr<'_, B> {
    #[inline(always)]
    fn fetch_bits(&mut self) -> io::Result<()> {
        self.bits = u64::from(self.reader.read_u8()?) << 56;
        self.n_bits_left = u8::BITS;
        Ok(())
    }

    #[inline(always)]
    fn get_bits(&self) -> u64 {
        self.bits
    }

    #[inline(always)]
    fn num_bits_left(&self) -> u32 {
        self.n_bits_left
    }

    #[inline(always)]
    fn consume_bits(&mut self, num: u32) {
        self.n_bits_left -= num;
        self.bits <<= num;
    }
}

impl<B: ReadBytes> ReadBitsLtr for BitStreamLtr<'_, B> {}

/// `BitReaderLtr` reads bits from most-significant to least-significant from any `&[u8]`.
///
/// Stated another way, if N-bits are read from a `BitReaderLtr` then bit 0, the first bit read,
/// is the most-significant bit, and bit N-1, the last bit read, is the least-significant.
pub struct BitReaderLtr<'a> {
    buf: &'a [u8],
    bits: u64,
    n_bits_left: u32,
}

impl<'a> BitReaderLtr<'a> {
    /// Instantiate a new `BitReaderLtr` with the given buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        BitReaderLtr { buf, bits: 0, n_bits_left: 0 }
    }
}

impl private::FetchBitsLtr for BitReaderLtr<'_> {
    fn fetch_bits(&mut self) -> io::Result<()> {
        let mut buf = [0u8; std::mem::size_of::<u64>()];

        let read_len = min(self.buf.len(), std::mem::size_of::<u64>());

        if read_len == 0 {
            return end_of_bitstream_error();
        }

        buf[..read_len].copy_from_slice(&self.buf[..read_len]);

        self.buf = &self.buf[read_len..];

        self.bits = u64::from_be_bytes(buf);
        self.n_bits_left = (read_len as u32) << 3;

        Ok(())
    }

    #[inline(always)]
    fn get_bits(&self) -> u64 {
        self.bits
    }

    #[inline(always)]
    fn num_bits_left(&self) -> u32 {
        self.n_bits_left
    }

    #[inline(always)]
    fn consume_bits(&mut self, num: u32) {
        self.n_bits_left -= num;
        self.bits <<= num;
    }
}

impl ReadBitsLtr for BitReaderLtr<'_> {}

impl FiniteBitStream for BitReaderLtr<'_> {
    fn bits_left(&self) -> u64 {
        (8 * self.buf.len() as u64) + u64::from(self.n_bits_left)
    }
}

/// `BitWriterLtr` writes bits from most-significant to least-significant into a growable byte
/// buffer.
///
/// Complete bytes are appended to the buffer as soon as they are available. Up-to 7 bits are held
/// back until the next write, or until the writer is realigned, at which point the partial byte
/// is padded with 0 bits.
#[derive(Default)]
pub struct BitWriterLtr {
    buf: Vec<u8>,
    /// Pending bits, right-aligned.
    bits: u64,
    n_bits: u32,
}

impl BitWriterLtr {
    /// Instantiate a new, empty, `BitWriterLtr`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Instantiate a new `BitWriterLtr` with space reserved for `len` bytes.
    pub fn with_capacity(len: usize) -> Self {
        BitWriterLtr { buf: Vec::with_capacity(len), bits: 0, n_bits: 0 }
    }

    /// Gets the total number of bits written.
    pub fn bits_written(&self) -> u64 {
        8 * self.buf.len() as u64 + u64::from(self.n_bits)
    }

    /// Returns true if the writer is positioned on a byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.n_bits == 0
    }

    /// Gets the complete bytes written so far. A partial byte is not included.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Discards everything written.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.bits = 0;
        self.n_bits = 0;
    }

    /// Writes a single bit.
    #[inline(always)]
    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits_leq32(u32::from(bit), 1);
    }

    /// Writes the `bit_width` least-significant bits of `value`. Bits of `value` above
    /// `bit_width` are ignored.
    #[inline(always)]
    pub fn write_bits_leq32(&mut self, value: u32, bit_width: u32) {
        assert!(bit_width > 0 && bit_width <= u32::BITS, "invalid bit width {}", bit_width);

        self.bits = (self.bits << bit_width) | (u64::from(value) & mask_lower_u64(bit_width));
        self.n_bits += bit_width;

        while self.n_bits >= 8 {
            self.n_bits -= 8;
            self.buf.push((self.bits >> self.n_bits) as u8);
        }

        self.bits &= mask_lower_u64(self.n_bits);
    }

    /// Writes `value` as a `bit_width`-bit two's complement integer. The value must be
    /// representable in `bit_width` bits.
    #[inline(always)]
    pub fn write_bits_leq32_signed(&mut self, value: i32, bit_width: u32) {
        debug_assert!(bit_width == 32 || signed_bit_width(i64::from(value)) <= bit_width);
        self.write_bits_leq32(value as u32, bit_width);
    }

    /// Writes the `bit_width` least-significant bits of `value`.
    pub fn write_bits_leq64(&mut self, value: u64, bit_width: u32) {
        assert!(bit_width > 0 && bit_width <= u64::BITS, "invalid bit width {}", bit_width);

        if bit_width > u32::BITS {
            self.write_bits_leq32((value >> 32) as u32, bit_width - u32::BITS);
            self.write_bits_leq32(value as u32, u32::BITS);
        }
        else {
            self.write_bits_leq32(value as u32, bit_width);
        }
    }

    /// Writes `value` as a `bit_width`-bit two's complement integer.
    pub fn write_bits_leq64_signed(&mut self, value: i64, bit_width: u32) {
        debug_assert!(bit_width == 64 || signed_bit_width(value) <= bit_width);
        self.write_bits_leq64(value as u64, bit_width);
    }

    /// Writes `num` as `num` 0 bits followed by a terminating 1 bit.
    pub fn write_unary_zeros(&mut self, mut num: u32) {
        while num >= u32::BITS {
            self.write_bits_leq32(0, u32::BITS);
            num -= u32::BITS;
        }

        self.write_bits_leq32(1, num + 1);
    }

    /// Writes `num` as `num` 1 bits followed by a terminating 0 bit.
    pub fn write_unary_ones(&mut self, mut num: u32) {
        while num >= u32::BITS {
            self.write_bits_leq32(u32::MAX, u32::BITS);
            num -= u32::BITS;
        }

        self.write_bits_leq32((mask_lower_u64(num) << 1) as u32, num + 1);
    }

    /// Writes a span of bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.is_aligned() {
            self.buf.extend_from_slice(bytes);
        }
        else {
            for &byte in bytes {
                self.write_bits_leq32(u32::from(byte), 8);
            }
        }
    }

    /// Pads the current byte with 0 bits such that the next write begins on a byte boundary.
    pub fn realign(&mut self) {
        if self.n_bits > 0 {
            self.write_bits_leq32(0, 8 - self.n_bits);
        }
    }

    /// Pads any partial byte and returns the written bytes.
    pub fn into_inner(mut self) -> Vec<u8> {
        self.realign();
        self.buf
    }
}
