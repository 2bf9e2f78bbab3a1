// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Project Cadenza
//!
//! Cadenza is a 100% pure Rust implementation of the Free Lossless Audio Codec (FLAC) stream
//! format: a stream decoder, a stream encoder, and the metadata block model they share.
//!
//! # Usage
//!
//! To decode a stream:
//!
//! 1.  Implement [`DecodeHandler`] to receive decoded audio, metadata blocks, and recoverable
//!     errors.
//! 2.  Instantiate a [`StreamDecoder`] with [`DecoderOptions`]. The options select which
//!     metadata blocks are delivered, and if the audio is checked against the stream's MD5
//!     signature.
//! 3.  Initialize the decoder with a [`ByteSource`][core::io::ByteSource] using
//!     [`init_stream`][StreamDecoder::init_stream], or with a path using
//!     [`init_file`][StreamDecoder::init_file]. The [`ReadOnlySource`][core::io::ReadOnlySource]
//!     and [`SeekableSource`][core::io::SeekableSource] adapters wrap any `std::io::Read`.
//! 4.  Drive the decoder with [`process_until_end_of_stream`][StreamDecoder::process_until_end_of_stream],
//!     or step through the stream with [`process_single`][StreamDecoder::process_single]. A
//!     seekable source also supports [`seek_absolute`][StreamDecoder::seek_absolute].
//! 5.  Call [`finish`][StreamDecoder::finish] to get the result of the MD5 check.
//!
//! To encode a stream:
//!
//! 1.  Instantiate a [`StreamEncoder`] with [`EncoderOptions`] describing the audio, and a
//!     compression level from 0 to 8.
//! 2.  Optionally, supply metadata blocks with [`set_metadata`][StreamEncoder::set_metadata].
//! 3.  Initialize the encoder with a [`ByteSink`][core::io::ByteSink]. If the sink can seek, the
//!     stream information block is completed when the stream is finished.
//! 4.  Feed audio with [`process`][StreamEncoder::process] or
//!     [`process_interleaved`][StreamEncoder::process_interleaved].
//! 5.  Call [`finish`][StreamEncoder::finish] to encode the final block.

pub use cadenza_bundle_flac::*;

pub use cadenza_core as core;

pub mod metadata {
    //! The FLAC metadata block model.
    pub use cadenza_utils_xiph::flac::*;
}
