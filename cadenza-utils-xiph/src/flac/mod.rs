// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The FLAC metadata block model.
//!
//! A FLAC stream starts with the `fLaC` marker followed by one or more metadata blocks. The first
//! block is always the stream information block. Every block can be read from, and written to,
//! its exact binary representation.

mod cue_sheet;
mod metadata;
mod picture;
mod seek_table;
mod vorbis_comment;

pub use cue_sheet::{CueSheet, CueSheetIndex, CueSheetTrack, CD_DA_LEAD_OUT_TRACK};
pub use metadata::*;
pub use picture::{Picture, PictureType};
pub use seek_table::{SeekPoint, SeekTable};
pub use vorbis_comment::{is_legal_field_name, split_entry, VorbisComment};

/// The FLAC stream marker.
pub const FLAC_STREAM_MARKER: [u8; 4] = *b"fLaC";
