// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A pure Rust FLAC stream decoder and encoder.
//!
//! [`StreamDecoder`] reads a FLAC stream from a [`ByteSource`](cadenza_core::io::ByteSource) and
//! delivers metadata blocks and decoded audio to a [`DecodeHandler`]. [`StreamEncoder`] encodes
//! planar or interleaved audio and writes the stream to a [`ByteSink`](cadenza_core::io::ByteSink).

mod decoder;
mod encoder;
mod fixed;
mod frame;
mod frame_encoder;
mod lpc;
mod options;
mod residual;
mod subframe;
mod validate;
mod window;

pub use decoder::{
    DecodeHandler, DecoderState, ErrorStatus, FinishResult, Frame, StreamDecoder, WriteStatus,
};
pub use encoder::{EncoderState, StreamEncoder, VENDOR_STRING};
pub use frame::{BlockSequence, ChannelAssignment, FrameHeader};
pub use subframe::{SubFrameInfo, SubFrameKind};
pub use options::{
    DecoderOptions, EncoderOptions, MetadataFilter, DEFAULT_APODIZATION, DEFAULT_COMPRESSION_LEVEL,
    MAX_COMPRESSION_LEVEL,
};
pub use window::{parse_apodization, Apodization, MAX_APODIZATIONS};
