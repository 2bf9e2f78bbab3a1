// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::borrow::Cow;

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{BitWriterLtr, BufReader, FiniteStream, ReadBytes};

use log::warn;

/// A Vorbis comment block.
///
/// Each comment is an entry of the form `NAME=value`. Field names are case-insensitive ASCII.
/// Entries are kept in stream order.
///
/// The vendor string and the entries are held as the bytes read from the stream. Values are
/// normally UTF-8, but a block that is not is still written back byte for byte.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VorbisComment {
    /// The vendor string.
    pub vendor: Vec<u8>,
    /// The comment entries.
    pub comments: Vec<Vec<u8>>,
}

/// Splits a comment entry into its field name and value. Returns `None` if the entry has no `=`
/// separator.
pub fn split_entry(entry: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = entry.iter().position(|&c| c == b'=')?;
    Some((&entry[..pos], &entry[pos + 1..]))
}

/// Returns true if `name` is a legal field name: printable ASCII excluding `=`.
pub fn is_legal_field_name(name: &[u8]) -> bool {
    name.iter().all(|&c| (0x20..=0x7d).contains(&c) && c != b'=')
}

fn read_string(reader: &mut BufReader<'_>) -> Result<Vec<u8>> {
    // Lengths are little-endian.
    let len = reader.read_u32()?;

    let bytes = reader.read_buf_bytes_ref(len as usize)?;

    if std::str::from_utf8(bytes).is_err() {
        warn!("flac: vorbis comment string is not valid utf-8");
    }

    Ok(bytes.to_vec())
}

fn write_string(writer: &mut BitWriterLtr, s: &[u8]) {
    writer.write_bytes(&(s.len() as u32).to_le_bytes());
    writer.write_bytes(s);
}

impl VorbisComment {
    /// Instantiate an empty block with the given vendor string.
    pub fn new(vendor: &str) -> Self {
        VorbisComment { vendor: vendor.as_bytes().to_vec(), comments: Vec::new() }
    }

    pub(super) fn read(reader: &mut BufReader<'_>) -> Result<VorbisComment> {
        let vendor = read_string(reader)?;

        // Read the number of comments.
        let n_comments = reader.read_u32()? as u64;

        // Every comment is at least 4 bytes long.
        if n_comments > reader.bytes_available() / 4 {
            return decode_error("flac: vorbis comment count exceeds the block length");
        }

        let mut comments = Vec::with_capacity(n_comments as usize);

        for _ in 0..n_comments {
            comments.push(read_string(reader)?);
        }

        Ok(VorbisComment { vendor, comments })
    }

    pub(super) fn write(&self, writer: &mut BitWriterLtr) {
        write_string(writer, &self.vendor);
        writer.write_bytes(&(self.comments.len() as u32).to_le_bytes());

        for comment in self.comments.iter() {
            write_string(writer, comment);
        }
    }

    pub(super) fn encoded_len(&self) -> u64 {
        let comments: u64 = self.comments.iter().map(|c| 4 + c.len() as u64).sum();
        8 + self.vendor.len() as u64 + comments
    }

    /// Gets the vendor string. Invalid UTF-8 sequences are replaced.
    pub fn vendor_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.vendor)
    }

    /// Returns a block with exactly `n_comments` comments. Comments are truncated from the end, or
    /// new empty comments are appended.
    pub fn resize_comments(mut self, n_comments: usize) -> Self {
        self.comments.resize(n_comments, Vec::new());
        self
    }

    /// Appends an entry with the given field name and value.
    pub fn push_entry(&mut self, name: &str, value: &str) {
        self.comments.push(format!("{}={}", name, value).into_bytes());
    }

    /// Gets the values of all entries with the given field name, in stream order. Invalid UTF-8
    /// sequences in a value are replaced.
    pub fn entries_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Cow<'a, str>> + 'a {
        self.comments.iter().filter_map(move |entry| match split_entry(entry) {
            Some((field, value)) if field.eq_ignore_ascii_case(name.as_bytes()) => {
                Some(String::from_utf8_lossy(value))
            }
            _ => None,
        })
    }

    /// Removes all entries with the given field name. Returns the number of entries removed.
    pub fn remove_entries_named(&mut self, name: &str) -> usize {
        let len = self.comments.len();

        self.comments.retain(|entry| match split_entry(entry) {
            Some((field, _)) => !field.eq_ignore_ascii_case(name.as_bytes()),
            None => true,
        });

        len - self.comments.len()
    }

    /// Returns true if every entry has a legal field name and a `=` separator.
    pub fn is_legal(&self) -> bool {
        self.comments.iter().all(|entry| match split_entry(entry) {
            Some((name, _)) => is_legal_field_name(name),
            None => false,
        })
    }
}
