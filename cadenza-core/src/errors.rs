// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `SeekErrorKind` is a list of generic reasons why a seek may fail.
#[derive(Debug)]
pub enum SeekErrorKind {
    /// The stream is not seekable at all.
    Unseekable,
    /// The sample to seek to is out of range.
    OutOfRange,
    /// The stream could not be resynchronized after seeking.
    LostSync,
}

impl SeekErrorKind {
    fn as_str(&self) -> &'static str {
        match *self {
            SeekErrorKind::Unseekable => "stream is not seekable",
            SeekErrorKind::OutOfRange => "requested seek sample is out-of-range for stream",
            SeekErrorKind::LostSync => "could not find a frame at the seeked position",
        }
    }
}

/// A record of the first sample that did not survive an encode-decode round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyMismatch {
    /// The absolute sample (inter-channel sample index) within the stream.
    pub absolute_sample: u64,
    /// The number of the frame containing the sample.
    pub frame_number: u32,
    /// The channel index.
    pub channel: u32,
    /// The sample index within the frame.
    pub sample: u32,
    /// The sample value provided to the encoder.
    pub expected: i32,
    /// The sample value decoded from the encoded frame.
    pub got: i32,
}

impl fmt::Display for VerifyMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sample {} (frame {}, channel {}, offset {}): expected {}, got {}",
            self.absolute_sample, self.frame_number, self.channel, self.sample, self.expected, self.got
        )
    }
}

/// `Error` provides an enumeration of all possible errors reported by Cadenza.
#[derive(Debug)]
pub enum Error {
    /// An IO error occured while reading, writing, or seeking the stream.
    IoError(std::io::Error),
    /// The stream contained malformed data and could not be decoded.
    DecodeError(&'static str),
    /// The stream could not be seeked.
    SeekError(SeekErrorKind),
    /// An unsupported stream feature or encoder configuration was encounted.
    Unsupported(&'static str),
    /// A byte source or sink advertised an invalid combination of capabilities.
    CapabilityError(&'static str),
    /// A default or user-defined limit was reached, or a resource could not be allocated.
    LimitError(&'static str),
    /// The caller provided an invalid argument, or called an operation in the wrong state.
    InvalidArgument(&'static str),
    /// The encoder's self-verification found a sample that did not decode to its original value.
    VerifyError(Box<VerifyMismatch>),
    /// A byte source, byte sink, or handler requested the operation to be aborted.
    Aborted,
    /// The encoder or decoder needs to be reset before continuing.
    ResetRequired,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => err.fmt(f),
            Error::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::SeekError(ref kind) => {
                write!(f, "seek error: {}", kind.as_str())
            }
            Error::Unsupported(feature) => {
                write!(f, "unsupported feature: {}", feature)
            }
            Error::CapabilityError(msg) => {
                write!(f, "invalid capabilities: {}", msg)
            }
            Error::LimitError(constraint) => {
                write!(f, "limit reached: {}", constraint)
            }
            Error::InvalidArgument(msg) => {
                write!(f, "invalid argument: {}", msg)
            }
            Error::VerifyError(ref mismatch) => {
                write!(f, "verification failed: {}", mismatch)
            }
            Error::Aborted => {
                write!(f, "operation aborted")
            }
            Error::ResetRequired => {
                write!(f, "instance needs to be reset")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Convenience function to create a seek error.
pub fn seek_error<T>(kind: SeekErrorKind) -> Result<T> {
    Err(Error::SeekError(kind))
}

/// Convenience function to create an unsupport feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}

/// Convenience function to create a capability error.
pub fn capability_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::CapabilityError(desc))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(Error::LimitError(constraint))
}

/// Convenience function to create an invalid argument error.
pub fn invalid_argument_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::InvalidArgument(desc))
}

/// Convenience function to create a reset required error.
pub fn reset_error<T>() -> Result<T> {
    Err(Error::ResetRequired)
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream")))
}

/// Returns true if the error is an I/O error caused by reaching the end of the stream.
pub fn is_end_of_stream(err: &Error) -> bool {
    matches!(err, Error::IoError(ref io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof)
}
