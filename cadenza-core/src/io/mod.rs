// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements composable bit- and byte-level I/O.
//!
//! The following nomenclature is used to denote where the data being read is sourced from:
//!  * A `Stream` consumes any source implementing [`ReadBytes`] one byte at a time.
//!  * A `Reader` consumes a `&[u8]`.
//!  * A `Writer` produces a `Vec<u8>`.
//!
//! The sole exception to this rule is [`SourceStream`] which consumes a [`ByteSource`].
//!
//! All `Reader`s and `Stream`s operating on bytes of data at a time implement the [`ReadBytes`]
//! trait. Likewise, all `Reader`s and `Stream`s operating on bits of data at a time implement the
//! [`ReadBitsLtr`] trait.
//!
//! Byte sources and sinks advertise their optional operations with a capability set. The pairing
//! rules of a capability set are checked once, when a decoder or encoder is initialized, using
//! [`validate_source_capabilities`] and [`validate_sink_capabilities`].

use std::io;
use std::mem;

use bitflags::bitflags;

use crate::errors::{capability_error, Result};

mod bit;
mod buf_reader;
mod monitor_stream;
mod source_stream;

pub use bit::*;
pub use buf_reader::BufReader;
pub use monitor_stream::{Monitor, MonitorStream};
pub use source_stream::SourceStream;

bitflags! {
    /// The optional operations supported by a [`ByteSource`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SourceCapabilities: u8 {
        /// The source can be repositioned with [`ByteSource::seek`].
        const SEEK   = 0x01;
        /// The source can report its position with [`ByteSource::tell`].
        const TELL   = 0x02;
        /// The source can report its total length with [`ByteSource::length`].
        const LENGTH = 0x04;
        /// The source can report if it is positioned at its end with [`ByteSource::eof`].
        const EOF    = 0x08;
    }
}

bitflags! {
    /// The optional operations supported by a [`ByteSink`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SinkCapabilities: u8 {
        /// The sink can be repositioned with [`ByteSink::seek`].
        const SEEK = 0x01;
        /// The sink can report its position with [`ByteSink::tell`].
        const TELL = 0x02;
    }
}

/// The outcome of a successful call to [`ByteSource::read`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// A non-zero number of bytes were read into the buffer.
    Read(usize),
    /// The source has no more bytes.
    EndOfStream,
    /// The client requested the decode to be aborted.
    Abort,
}

fn unsupported_op(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("{} is not supported by this source or sink", op))
}

/// A `ByteSource` supplies the bytes of an encoded stream to a decoder.
///
/// Only [`ByteSource::read`] is mandatory. The remaining operations are only called if they are
/// advertised by [`ByteSource::capabilities`].
pub trait ByteSource {
    /// Reads up-to `buf.len()` bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus>;

    /// Gets the optional operations supported by the source.
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::empty()
    }

    /// Repositions the source to the absolute byte offset `pos`.
    fn seek(&mut self, _pos: u64) -> io::Result<()> {
        Err(unsupported_op("seek"))
    }

    /// Gets the absolute byte offset of the source.
    fn tell(&mut self) -> io::Result<u64> {
        Err(unsupported_op("tell"))
    }

    /// Gets the total length of the source in bytes.
    fn length(&mut self) -> io::Result<u64> {
        Err(unsupported_op("length"))
    }

    /// Returns true if the source is positioned at its end.
    fn eof(&mut self) -> bool {
        false
    }
}

/// A `ByteSink` receives the bytes produced by an encoder.
///
/// Only [`ByteSink::write`] is mandatory. Seeking is used to rewrite the stream information and
/// seek table once encoding has finished.
pub trait ByteSink {
    /// Writes all of `buf`. `samples` is the number of inter-channel samples contained in `buf`,
    /// which is 0 for metadata, and `current_frame` is the number of the frame being written.
    ///
    /// Any error is fatal to the encoder.
    fn write(&mut self, buf: &[u8], samples: u32, current_frame: u32) -> io::Result<()>;

    /// Gets the optional operations supported by the sink.
    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::empty()
    }

    /// Repositions the sink to the absolute byte offset `pos`.
    fn seek(&mut self, _pos: u64) -> io::Result<()> {
        Err(unsupported_op("seek"))
    }

    /// Gets the absolute byte offset of the sink.
    fn tell(&mut self) -> io::Result<u64> {
        Err(unsupported_op("tell"))
    }

    /// Called after every encoded frame is written.
    fn progress(
        &mut self,
        _bytes_written: u64,
        _samples_written: u64,
        _frames_written: u32,
        _total_frames_estimate: u32,
    ) {
    }
}

/// Checks that a source capability set is usable. Seeking requires a source to also report its
/// position, length, and end-of-stream condition.
pub fn validate_source_capabilities(caps: SourceCapabilities) -> Result<()> {
    let seek_deps = SourceCapabilities::TELL | SourceCapabilities::LENGTH | SourceCapabilities::EOF;

    if caps.contains(SourceCapabilities::SEEK) && !caps.contains(seek_deps) {
        return capability_error("seekable source must also support tell, length, and eof");
    }

    Ok(())
}

/// Checks that a sink capability set is usable. Seek and tell must be supported together.
pub fn validate_sink_capabilities(caps: SinkCapabilities) -> Result<()> {
    let has_seek = caps.contains(SinkCapabilities::SEEK);
    let has_tell = caps.contains(SinkCapabilities::TELL);

    if has_seek != has_tell {
        return capability_error("sink must support both seek and tell, or neither");
    }

    Ok(())
}

/// `ReadOnlySource` wraps any source implementing [`std::io::Read`] in an unseekable
/// [`ByteSource`].
pub struct ReadOnlySource<R: io::Read> {
    inner: R,
}

impl<R: io::Read> ReadOnlySource<R> {
    /// Instantiates a new `ReadOnlySource<R>` by taking ownership and wrapping the provided
    /// `Read`er.
    pub fn new(inner: R) -> Self {
        ReadOnlySource { inner }
    }

    /// Gets a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwraps this `ReadOnlySource<R>`, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn read_retrying<R: io::Read>(inner: &mut R, buf: &mut [u8]) -> io::Result<ReadStatus> {
    loop {
        match inner.read(buf) {
            Ok(0) if !buf.is_empty() => return Ok(ReadStatus::EndOfStream),
            Ok(len) => return Ok(ReadStatus::Read(len)),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

impl<R: io::Read> ByteSource for ReadOnlySource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        read_retrying(&mut self.inner, buf)
    }
}

/// `SeekableSource` wraps any source implementing [`std::io::Read`] and [`std::io::Seek`] in a
/// [`ByteSource`] supporting all optional operations.
pub struct SeekableSource<R: io::Read + io::Seek> {
    inner: R,
    len: Option<u64>,
}

impl<R: io::Read + io::Seek> SeekableSource<R> {
    /// Instantiates a new `SeekableSource<R>`.
    pub fn new(inner: R) -> Self {
        SeekableSource { inner, len: None }
    }

    /// Gets a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwraps this `SeekableSource<R>`, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: io::Read + io::Seek> ByteSource for SeekableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        read_retrying(&mut self.inner, buf)
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::all()
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(io::SeekFrom::Start(pos)).map(|_| ())
    }

    fn tell(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    fn length(&mut self) -> io::Result<u64> {
        if let Some(len) = self.len {
            return Ok(len);
        }

        let pos = self.inner.stream_position()?;
        let len = self.inner.seek(io::SeekFrom::End(0))?;
        self.inner.seek(io::SeekFrom::Start(pos))?;

        self.len = Some(len);
        Ok(len)
    }

    fn eof(&mut self) -> bool {
        match (self.tell(), self.length()) {
            (Ok(pos), Ok(len)) => pos >= len,
            _ => false,
        }
    }
}

/// `WriteOnlySink` wraps any sink implementing [`std::io::Write`] in an unseekable [`ByteSink`].
pub struct WriteOnlySink<W: io::Write> {
    inner: W,
}

impl<W: io::Write> WriteOnlySink<W> {
    /// Instantiates a new `WriteOnlySink<W>`.
    pub fn new(inner: W) -> Self {
        WriteOnlySink { inner }
    }

    /// Gets a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwraps this `WriteOnlySink<W>`, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> ByteSink for WriteOnlySink<W> {
    fn write(&mut self, buf: &[u8], _samples: u32, _current_frame: u32) -> io::Result<()> {
        self.inner.write_all(buf)
    }
}

/// `SeekableSink` wraps any sink implementing [`std::io::Write`] and [`std::io::Seek`] in a
/// [`ByteSink`] that supports seek and tell.
pub struct SeekableSink<W: io::Write + io::Seek> {
    inner: W,
}

impl<W: io::Write + io::Seek> SeekableSink<W> {
    /// Instantiates a new `SeekableSink<W>`.
    pub fn new(inner: W) -> Self {
        SeekableSink { inner }
    }

    /// Gets a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwraps this `SeekableSink<W>`, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write + io::Seek> ByteSink for SeekableSink<W> {
    fn write(&mut self, buf: &[u8], _samples: u32, _current_frame: u32) -> io::Result<()> {
        self.inner.write_all(buf)
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::all()
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(io::SeekFrom::Start(pos)).map(|_| ())
    }

    fn tell(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }
}

impl<T: ByteSink + ?Sized> ByteSink for &mut T {
    fn write(&mut self, buf: &[u8], samples: u32, current_frame: u32) -> io::Result<()> {
        (**self).write(buf, samples, current_frame)
    }

    fn capabilities(&self) -> SinkCapabilities {
        (**self).capabilities()
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        (**self).seek(pos)
    }

    fn tell(&mut self) -> io::Result<u64> {
        (**self).tell()
    }

    fn progress(&mut self, bytes: u64, samples: u64, frames: u32, total_frames: u32) {
        (**self).progress(bytes, samples, frames, total_frames)
    }
}

/// `ReadBytes` provides methods to read bytes and interpret them as little- or big-endian
/// unsigned integers of standard widths.
pub trait ReadBytes {
    /// Reads a single byte from the stream and returns it or an error.
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Reads two bytes from the stream and returns them in read-order or an error.
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]>;

    /// Reads three bytes from the stream and returns them in read-order or an error.
    fn read_triple_bytes(&mut self) -> io::Result<[u8; 3]>;

    /// Reads four bytes from the stream and returns them in read-order or an error.
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]>;

    /// Reads up-to the number of bytes required to fill buf or returns an error.
    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads exactly the number of bytes required to fill be provided buffer or returns an error.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Reads a single unsigned byte from the stream and returns it or an error.
    #[inline(always)]
    fn read_u8(&mut self) -> io::Result<u8> {
        self.read_byte()
    }

    /// Reads two bytes from the stream and interprets them as an unsigned 16-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u16(&mut self) -> io::Result<u16> {
        Ok(u16::from_be_bytes(self.read_double_bytes()?))
    }

    /// Reads three bytes from the stream and interprets them as an unsigned 24-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u24(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; mem::size_of::<u32>()];
        buf[0..3].clone_from_slice(&self.read_triple_bytes()?);
        Ok(u32::from_be_bytes(buf) >> 8)
    }

    /// Reads four bytes from the stream and interprets them as an unsigned 32-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads four bytes from the stream and interprets them as an unsigned 32-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_be_bytes(self.read_quad_bytes()?))
    }

    /// Reads eight bytes from the stream and interprets them as an unsigned 64-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; mem::size_of::<u64>()];
        self.read_buf_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads exactly the number of bytes requested, and returns a boxed slice of the data or an
    /// error.
    fn read_boxed_slice_exact(&mut self, len: usize) -> io::Result<Box<[u8]>> {
        let mut buf = vec![0u8; len];
        self.read_buf_exact(&mut buf)?;
        Ok(buf.into_boxed_slice())
    }

    /// Ignores the specified number of bytes from the stream or returns an error.
    fn ignore_bytes(&mut self, count: u64) -> io::Result<()>;

    /// Gets the position of the stream.
    fn pos(&self) -> u64;
}

impl<R: ReadBytes> ReadBytes for &mut R {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        (*self).read_byte()
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        (*self).read_double_bytes()
    }

    #[inline(always)]
    fn read_triple_bytes(&mut self) -> io::Result<[u8; 3]> {
        (*self).read_triple_bytes()
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        (*self).read_quad_bytes()
    }

    #[inline(always)]
    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (*self).read_buf(buf)
    }

    #[inline(always)]
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (*self).read_buf_exact(buf)
    }

    #[inline(always)]
    fn ignore_bytes(&mut self, count: u64) -> io::Result<()> {
        (*self).ignore_bytes(count)
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        (**self).pos()
    }
}

impl<F: FiniteStream> FiniteStream for &mut F {
    fn byte_len(&self) -> u64 {
        (**self).byte_len()
    }

    fn bytes_read(&self) -> u64 {
        (**self).bytes_read()
    }

    fn bytes_available(&self) -> u64 {
        (**self).bytes_available()
    }
}

/// A `FiniteStream` is a stream that has a known length in bytes.
pub trait FiniteStream {
    /// Returns the length of the the stream in bytes.
    fn byte_len(&self) -> u64;

    /// Returns the number of bytes that have been read.
    fn bytes_read(&self) -> u64;

    /// Returns the number of bytes available for reading.
    fn bytes_available(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_source_capability_pairing() {
        assert!(validate_source_capabilities(SourceCapabilities::empty()).is_ok());
        assert!(validate_source_capabilities(SourceCapabilities::all()).is_ok());
        assert!(validate_source_capabilities(SourceCapabilities::TELL).is_ok());
        assert!(validate_source_capabilities(
            SourceCapabilities::SEEK | SourceCapabilities::TELL | SourceCapabilities::LENGTH
        )
        .is_err());
    }

    #[test]
    fn verify_sink_capability_pairing() {
        assert!(validate_sink_capabilities(SinkCapabilities::empty()).is_ok());
        assert!(validate_sink_capabilities(SinkCapabilities::all()).is_ok());
        assert!(validate_sink_capabilities(SinkCapabilities::SEEK).is_err());
        assert!(validate_sink_capabilities(SinkCapabilities::TELL).is_err());
    }

    #[test]
    fn verify_seekable_source() {
        let mut source = SeekableSource::new(io::Cursor::new(vec![1u8, 2, 3, 4, 5]));

        let mut buf = [0u8; 3];
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::Read(3));
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(source.length().unwrap(), 5);
        assert_eq!(source.tell().unwrap(), 3);
        assert!(!source.eof());

        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::Read(2));
        assert!(source.eof());
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::EndOfStream);

        source.seek(1).unwrap();
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::Read(3));
        assert_eq!(buf, [2, 3, 4]);
    }

    #[test]
    fn verify_read_only_source() {
        let mut source = ReadOnlySource::new(&[9u8, 8][..]);
        assert!(validate_source_capabilities(source.capabilities()).is_ok());
        assert!(source.seek(0).is_err());

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::Read(2));
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::EndOfStream);
    }
}
