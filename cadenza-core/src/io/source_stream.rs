// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;

use log::debug;

use super::{ByteSource, ReadBytes, ReadStatus, SourceCapabilities};

const END_OF_STREAM_ERROR_STR: &str = "end of stream";
const ABORTED_ERROR_STR: &str = "source aborted the read";

/// A `SourceStream` is the buffered byte reader placed in front of a [`ByteSource`].
///
/// To amortize the overhead of calling into the source, `SourceStream` implements a read-ahead
/// buffer. The read-ahead length starts at 1kB, and doubles in length as more sequential reads are
/// performed until it reaches 32kB.
///
/// Up-to `HISTORY_LEN` already read bytes are retained whenever the buffer is compacted, which
/// allows a reader to backtrack a short distance after a false frame sync. A call to
/// [`SourceStream::seek`] invalidates the buffer unless the target lies within it.
///
/// When the source requests an abort, the read fails with an I/O error and
/// [`SourceStream::is_aborted`] becomes true.
pub struct SourceStream {
    /// The source reader.
    inner: Box<dyn ByteSource>,
    /// The buffer.
    buf: Box<[u8]>,
    /// The read position.
    read_pos: usize,
    /// The write position.
    write_pos: usize,
    /// The current block size for a new read.
    read_block_len: usize,
    /// Absolute position of the inner source.
    abs_pos: u64,
    /// The source requested an abort.
    is_aborted: bool,
}

impl SourceStream {
    const MIN_BLOCK_LEN: usize = 1024;
    const MAX_BLOCK_LEN: usize = 32 * 1024;
    const HISTORY_LEN: usize = 4 * 1024;

    /// Instantiate a new `SourceStream` reading from `source`. The stream position of the source
    /// is assumed to be 0.
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        SourceStream {
            inner: source,
            buf: vec![0; Self::HISTORY_LEN + 2 * Self::MAX_BLOCK_LEN].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            read_block_len: Self::MIN_BLOCK_LEN,
            abs_pos: 0,
            is_aborted: false,
        }
    }

    /// Unwraps this `SourceStream`, returning the inner source. Buffered data is lost.
    pub fn into_inner(self) -> Box<dyn ByteSource> {
        self.inner
    }

    /// Gets the capabilities of the inner source.
    pub fn capabilities(&self) -> SourceCapabilities {
        self.inner.capabilities()
    }

    /// Returns true if the source requested an abort.
    pub fn is_aborted(&self) -> bool {
        self.is_aborted
    }

    /// Gets the total length of the source in bytes, if the source can report it.
    pub fn byte_len(&mut self) -> Option<u64> {
        if self.inner.capabilities().contains(SourceCapabilities::LENGTH) {
            self.inner.length().ok()
        }
        else {
            None
        }
    }

    /// Get the number of bytes buffered but not yet read.
    pub fn unread_buffer_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Gets the number of bytes buffered and read.
    ///
    /// Note: this is the maximum number of bytes that can be seeked backwards within the buffer.
    pub fn read_buffer_len(&self) -> usize {
        self.read_pos
    }

    /// Seek within the buffered data relative to the current position. The seekable length is
    /// defined by the inclusive range `[ -read_buffer_len(), unread_buffer_len() ]`.
    pub fn seek_buffered_rel(&mut self, delta: isize) -> u64 {
        if delta < 0 {
            let abs_delta = cmp::min(delta.unsigned_abs(), self.read_buffer_len());
            self.read_pos -= abs_delta;
        }
        else if delta > 0 {
            let abs_delta = cmp::min(delta as usize, self.unread_buffer_len());
            self.read_pos += abs_delta;
        }

        self.pos()
    }

    /// Seeks the stream to the absolute byte offset `pos`. The inner source is only seeked if
    /// `pos` lies outside of the buffered data.
    pub fn seek(&mut self, pos: u64) -> io::Result<u64> {
        let buf_start = self.abs_pos - self.write_pos as u64;

        if pos >= buf_start && pos <= self.abs_pos {
            self.read_pos = (pos - buf_start) as usize;
            return Ok(pos);
        }

        debug!("source: seeking to byte {} outside the buffered range", pos);

        self.inner.seek(pos)?;
        self.reset(pos);

        Ok(pos)
    }

    /// Returns true if all data has been read and the source has no more data.
    pub fn is_end_of_stream(&mut self) -> io::Result<bool> {
        self.fetch()?;
        Ok(self.is_buffer_exhausted())
    }

    #[inline(always)]
    fn is_buffer_exhausted(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// If the buffer has been exhausted, fetch a new block of data to replenish the buffer.
    fn fetch(&mut self) -> io::Result<()> {
        if !self.is_buffer_exhausted() {
            return Ok(());
        }

        if self.is_aborted {
            return Err(io::Error::new(io::ErrorKind::Other, ABORTED_ERROR_STR));
        }

        // Compact the buffer if the next block would not fit, retaining some history.
        if self.write_pos + self.read_block_len > self.buf.len() {
            let keep = cmp::min(self.read_pos, Self::HISTORY_LEN);
            self.buf.copy_within(self.read_pos - keep..self.write_pos, 0);
            self.read_pos = keep;
            self.write_pos = keep;
        }

        let block = &mut self.buf[self.write_pos..self.write_pos + self.read_block_len];

        match self.inner.read(block)? {
            ReadStatus::Read(len) => {
                let len = cmp::min(len, self.read_block_len);
                self.write_pos += len;
                self.abs_pos += len as u64;
            }
            ReadStatus::EndOfStream => (),
            ReadStatus::Abort => {
                debug!("source: aborted at byte {}", self.abs_pos);
                self.is_aborted = true;
                return Err(io::Error::new(io::ErrorKind::Other, ABORTED_ERROR_STR));
            }
        }

        self.read_block_len = cmp::min(self.read_block_len << 1, Self::MAX_BLOCK_LEN);

        Ok(())
    }

    /// If the buffer has been exhausted, fetch a new block of data to replenish the buffer. If
    /// no more data could be fetched, return an end-of-stream error.
    fn fetch_or_eof(&mut self) -> io::Result<()> {
        self.fetch()?;

        if self.is_buffer_exhausted() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, END_OF_STREAM_ERROR_STR));
        }

        Ok(())
    }

    /// Resets the read-ahead buffer, and sets the absolute stream position to `pos`.
    fn reset(&mut self, pos: u64) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.read_block_len = Self::MIN_BLOCK_LEN;
        self.abs_pos = pos;
    }
}

impl ReadBytes for SourceStream {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        if self.is_buffer_exhausted() {
            self.fetch_or_eof()?;
        }

        let value = self.buf[self.read_pos];
        self.read_pos += 1;

        Ok(value)
    }

    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        let mut bytes = [0; 2];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_triple_bytes(&mut self) -> io::Result<[u8; 3]> {
        let mut bytes = [0; 3];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        let mut bytes = [0; 4];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.fetch_or_eof()?;

        let len = cmp::min(buf.len(), self.unread_buffer_len());
        buf[..len].copy_from_slice(&self.buf[self.read_pos..self.read_pos + len]);
        self.read_pos += len;

        Ok(len)
    }

    fn read_buf_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let count = self.read_buf(buf)?;
            buf = &mut buf[count..];
        }

        Ok(())
    }

    fn ignore_bytes(&mut self, mut count: u64) -> io::Result<()> {
        while count > 0 {
            self.fetch_or_eof()?;

            let len = cmp::min(count, self.unread_buffer_len() as u64);
            self.read_pos += len as usize;
            count -= len;
        }

        Ok(())
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.abs_pos - self.unread_buffer_len() as u64
    }
}
