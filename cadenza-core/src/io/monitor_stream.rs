// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use super::ReadBytes;

/// A `Monitor` observes every byte read through a [`MonitorStream`]. The CRC and MD5 checksums
/// are monitors.
pub trait Monitor {
    fn process_byte(&mut self, byte: u8);

    fn process_buf_bytes(&mut self, buf: &[u8]);

    #[inline(always)]
    fn process_double_bytes(&mut self, buf: [u8; 2]) {
        self.process_buf_bytes(&buf);
    }

    #[inline(always)]
    fn process_triple_bytes(&mut self, buf: [u8; 3]) {
        self.process_buf_bytes(&buf);
    }

    #[inline(always)]
    fn process_quad_bytes(&mut self, buf: [u8; 4]) {
        self.process_buf_bytes(&buf);
    }
}

/// A `MonitorStream` forwards every byte read from the inner stream to a [`Monitor`].
///
/// Monitor streams nest. A frame reader wraps the source in a stream monitoring the frame
/// checksum, then wraps that in a second stream monitoring the header checksum.
pub struct MonitorStream<B: ReadBytes, M: Monitor> {
    inner: B,
    monitor: M,
}

impl<B: ReadBytes, M: Monitor> MonitorStream<B, M> {
    pub fn new(inner: B, monitor: M) -> MonitorStream<B, M> {
        MonitorStream { inner, monitor }
    }

    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    /// Consumes the stream, returning the inner stream and the monitor.
    pub fn into_parts(self) -> (B, M) {
        (self.inner, self.monitor)
    }

    #[inline(always)]
    fn observe<const N: usize>(&mut self, bytes: [u8; N]) -> [u8; N] {
        self.monitor.process_buf_bytes(&bytes);
        bytes
    }
}

impl<B: ReadBytes, M: Monitor> ReadBytes for MonitorStream<B, M> {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        let byte = self.inner.read_byte()?;
        self.monitor.process_byte(byte);
        Ok(byte)
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> io::Result<[u8; 2]> {
        let bytes = self.inner.read_double_bytes()?;
        Ok(self.observe(bytes))
    }

    #[inline(always)]
    fn read_triple_bytes(&mut self) -> io::Result<[u8; 3]> {
        let bytes = self.inner.read_triple_bytes()?;
        Ok(self.observe(bytes))
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> io::Result<[u8; 4]> {
        let bytes = self.inner.read_quad_bytes()?;
        Ok(self.observe(bytes))
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.inner.read_buf(buf)?;
        self.monitor.process_buf_bytes(&buf[..len]);
        Ok(len)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_buf_exact(buf)?;
        self.monitor.process_buf_bytes(buf);
        Ok(())
    }

    fn ignore_bytes(&mut self, mut count: u64) -> io::Result<()> {
        // Ignored bytes are still observed.
        let mut buf = [0u8; 64];

        while count > 0 {
            let len = count.min(buf.len() as u64) as usize;
            self.read_buf_exact(&mut buf[..len])?;
            count -= len as u64;
        }

        Ok(())
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.inner.pos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::BufReader;

    #[derive(Default)]
    struct Tally {
        count: usize,
        sum: u32,
    }

    impl Monitor for Tally {
        fn process_byte(&mut self, byte: u8) {
            self.count += 1;
            self.sum += u32::from(byte);
        }

        fn process_buf_bytes(&mut self, buf: &[u8]) {
            for &byte in buf {
                self.process_byte(byte);
            }
        }
    }

    #[test]
    fn verify_nested_monitors() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        let mut outer = MonitorStream::new(BufReader::new(&data), Tally::default());
        outer.read_double_bytes().unwrap();

        {
            let mut inner = MonitorStream::new(&mut outer, Tally::default());
            inner.read_quad_bytes().unwrap();
            assert_eq!(inner.monitor().count, 4);
            assert_eq!(inner.monitor().sum, 3 + 4 + 5 + 6);
        }

        outer.ignore_bytes(3).unwrap();
        assert_eq!(outer.monitor().count, 9);
        assert_eq!(outer.monitor().sum, 45);
        assert_eq!(outer.pos(), 9);

        let (mut reader, tally) = outer.into_parts();
        assert_eq!(tally.count, 9);
        assert_eq!(reader.read_u8().unwrap(), 10);
    }
}
