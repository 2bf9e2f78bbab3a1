// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::checksum::Crc16Ansi;
use cadenza_core::io::{BitWriterLtr, Monitor};

use log::trace;

use crate::fixed::{best_fixed_order, MAX_FIXED_ORDER};
use crate::frame::*;
use crate::residual::ResidualSearch;
use crate::subframe::{encode_subframe, SubFrame, SubFrameSearch};
use crate::window::Apodization;

/// The encoding parameters shared by every frame of a stream.
#[derive(Clone, Debug)]
pub struct FrameParams {
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub do_mid_side_stereo: bool,
    /// Re-evaluate the stereo decorrelation only every `stereo_period` frames.
    pub loose_mid_side_stereo: bool,
    pub stereo_period: u32,
    pub max_lpc_order: u32,
    pub qlp_coeff_precision: u32,
    pub do_qlp_coeff_prec_search: bool,
    pub do_exhaustive_model_search: bool,
    pub residual: ResidualSearch,
}

/// Gets the number of frames between stereo decorrelation decisions in loose mode. This is roughly
/// 0.4 seconds worth of frames.
pub fn loose_stereo_period(sample_rate: u32, block_len: u32) -> u32 {
    let period = (f64::from(sample_rate) * 0.4 / f64::from(block_len)).round();
    (period as u32).max(1)
}

/// A stereo pair of signals, and the channel assignment it codes.
const STEREO_PAIRS: [(ChannelAssignment, usize, usize); 4] = [
    (ChannelAssignment::Independent(2), LEFT, RIGHT),
    (ChannelAssignment::LeftSide, LEFT, SIDE),
    (ChannelAssignment::RightSide, SIDE, RIGHT),
    (ChannelAssignment::MidSide, MID, SIDE),
];

const LEFT: usize = 0;
const RIGHT: usize = 1;
const MID: usize = 2;
const SIDE: usize = 3;

/// `FrameEncoder` encodes blocks of planar audio into frames.
pub struct FrameEncoder {
    params: FrameParams,
    apodizations: Vec<Apodization>,
    /// Windows for blocks of `window_len` samples.
    windows: Vec<Vec<f64>>,
    window_len: usize,
    /// The signals of a stereo block: left, right, mid, and side.
    stereo: [Vec<i64>; 4],
    /// The last stereo decision, and the number of frames it has been reused for.
    last_assignment: Option<ChannelAssignment>,
    frames_since_decision: u32,
}

impl FrameEncoder {
    pub fn new(params: FrameParams, apodizations: Vec<Apodization>) -> Self {
        FrameEncoder {
            params,
            apodizations,
            windows: Vec::new(),
            window_len: 0,
            stereo: Default::default(),
            last_assignment: None,
            frames_since_decision: 0,
        }
    }

    /// Generates the windows for a block of `n` samples, unless already generated.
    fn prepare_windows(&mut self, n: usize) {
        if self.params.max_lpc_order == 0 || self.window_len == n {
            return;
        }

        self.windows = self
            .apodizations
            .iter()
            .map(|apodization| {
                let mut window = vec![0.0; n];
                apodization.generate(&mut window);
                window
            })
            .collect();

        self.window_len = n;
    }

    /// Encodes a frame numbered `frame_num` from `channels`, one slice of samples per channel, and
    /// writes it to `writer`. Returns the channel assignment used.
    pub fn encode(
        &mut self,
        frame_num: u32,
        channels: &[&[i32]],
        writer: &mut BitWriterLtr,
    ) -> ChannelAssignment {
        let n = channels.first().map_or(0, |ch| ch.len());
        let bps = self.params.bits_per_sample;

        self.prepare_windows(n);

        let search = SubFrameSearch {
            windows: &self.windows,
            max_lpc_order: self.params.max_lpc_order,
            qlp_coeff_precision: self.params.qlp_coeff_precision,
            do_qlp_coeff_prec_search: self.params.do_qlp_coeff_prec_search,
            do_exhaustive_model_search: self.params.do_exhaustive_model_search,
            residual: self.params.residual,
        };

        let is_stereo = channels.len() == 2 && self.params.do_mid_side_stereo;

        let (channel_assignment, subframes) = if is_stereo {
            for (signal, samples) in self.stereo.iter_mut().zip(channels) {
                signal.clear();
                signal.extend(samples.iter().map(|&s| i64::from(s)));
            }

            let [left, right, mid, side] = &mut self.stereo;

            mid.clear();
            side.clear();

            for (&l, &r) in left.iter().zip(right.iter()) {
                mid.push((l + r) >> 1);
                side.push(l - r);
            }

            // Reuse the previous decision while it is fresh.
            let reuse = match self.last_assignment {
                Some(assignment) if self.params.loose_mid_side_stereo => {
                    if self.frames_since_decision < self.params.stereo_period {
                        Some(assignment)
                    }
                    else {
                        None
                    }
                }
                _ => None,
            };

            let result = match reuse {
                Some(assignment) => {
                    self.frames_since_decision += 1;
                    (assignment, encode_pair(&self.stereo, assignment, bps, &search))
                }
                None => {
                    self.frames_since_decision = 1;

                    if self.params.do_exhaustive_model_search {
                        choose_stereo_exhaustive(&self.stereo, bps, &search)
                    }
                    else {
                        let assignment = choose_stereo_estimate(&self.stereo);
                        (assignment, encode_pair(&self.stereo, assignment, bps, &search))
                    }
                }
            };

            self.last_assignment = Some(result.0);

            result
        }
        else {
            let subframes = channels
                .iter()
                .map(|samples| {
                    let samples: Vec<i64> = samples.iter().map(|&s| i64::from(s)).collect();
                    encode_subframe(&samples, bps, &search)
                })
                .collect::<Vec<_>>();

            (ChannelAssignment::Independent(channels.len() as u32), subframes)
        };

        trace!("frame: num={}, n_samples={}, channels={}", frame_num, n, channel_assignment);

        let header = FrameHeader {
            block_sequence: BlockSequence::ByFrame(frame_num),
            block_num_samples: n as u32,
            channel_assignment,
            bits_per_sample: Some(bps),
            sample_rate: Some(self.params.sample_rate),
            crc8: 0,
        };

        write_frame(writer, &header, &subframes, bps);

        channel_assignment
    }
}

/// Writes a complete frame: header, subframes, padding, and the CRC-16 footer.
pub fn write_frame(writer: &mut BitWriterLtr, header: &FrameHeader, subframes: &[SubFrame], bps: u32) {
    let start = writer.bytes().len();

    header.write(writer);

    let side_bits = header.channel_assignment.side_bits();

    for (ch, subframe) in subframes.iter().enumerate() {
        subframe.write(writer, bps + side_bits.get(ch).copied().unwrap_or(0));
    }

    writer.realign();

    let mut crc16 = Crc16Ansi::new(0);
    crc16.process_buf_bytes(&writer.bytes()[start..]);

    writer.write_bits_leq32(u32::from(crc16.crc()), 16);
}

/// Gets the number of bits per sample of a stereo signal. The side signal needs one more bit.
fn signal_bps(signal: usize, bps: u32) -> u32 {
    if signal == SIDE {
        bps + 1
    }
    else {
        bps
    }
}

fn pair_of(assignment: ChannelAssignment) -> (usize, usize) {
    STEREO_PAIRS
        .iter()
        .find(|(a, _, _)| *a == assignment)
        .map_or((LEFT, RIGHT), |&(_, first, second)| (first, second))
}

fn encode_pair(
    stereo: &[Vec<i64>; 4],
    assignment: ChannelAssignment,
    bps: u32,
    search: &SubFrameSearch<'_>,
) -> Vec<SubFrame> {
    let (first, second) = pair_of(assignment);

    vec![
        encode_subframe(&stereo[first], signal_bps(first, bps), search),
        encode_subframe(&stereo[second], signal_bps(second, bps), search),
    ]
}

/// Encodes all four stereo signals and picks the pair with the smallest coded size.
fn choose_stereo_exhaustive(
    stereo: &[Vec<i64>; 4],
    bps: u32,
    search: &SubFrameSearch<'_>,
) -> (ChannelAssignment, Vec<SubFrame>) {
    let mut subframes: Vec<SubFrame> = stereo
        .iter()
        .enumerate()
        .map(|(signal, samples)| encode_subframe(samples, signal_bps(signal, bps), search))
        .collect();

    let bits: Vec<u64> = subframes
        .iter()
        .enumerate()
        .map(|(signal, subframe)| subframe.bit_len(signal_bps(signal, bps)))
        .collect();

    let (assignment, first, second) = best_pair(&bits);

    trace!("stereo: bits={:?}, choice={}", bits, assignment);

    // Take the second signal first so the first signal's index is unaffected.
    let (lo, hi) = (first.min(second), first.max(second));
    let hi_subframe = subframes.swap_remove(hi);
    let lo_subframe = subframes.swap_remove(lo);

    let pair = if first < second {
        vec![lo_subframe, hi_subframe]
    }
    else {
        vec![hi_subframe, lo_subframe]
    };

    (assignment, pair)
}

/// Estimates the cheapest stereo pair from the fixed predictor residual of each signal.
fn choose_stereo_estimate(stereo: &[Vec<i64>; 4]) -> ChannelAssignment {
    let costs: Vec<u64> = stereo
        .iter()
        .map(|samples| {
            let max_order = MAX_FIXED_ORDER.min(samples.len().saturating_sub(1) as u32);
            best_fixed_order(samples, max_order).1
        })
        .collect();

    let (assignment, _, _) = best_pair(&costs);

    trace!("stereo: costs={:?}, choice={}", costs, assignment);

    assignment
}

/// Picks the pair of signals with the lowest total cost. Ties resolve to the first pair in
/// assignment order.
fn best_pair(costs: &[u64]) -> (ChannelAssignment, usize, usize) {
    let mut best = STEREO_PAIRS[0];
    let mut best_cost = u64::MAX;

    for &(assignment, first, second) in STEREO_PAIRS.iter() {
        let cost = costs[first].saturating_add(costs[second]);

        if cost < best_cost {
            best = (assignment, first, second);
            best_cost = cost;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(do_mid_side_stereo: bool, do_exhaustive_model_search: bool) -> FrameParams {
        FrameParams {
            sample_rate: 44100,
            bits_per_sample: 16,
            do_mid_side_stereo,
            loose_mid_side_stereo: false,
            stereo_period: 1,
            max_lpc_order: 8,
            qlp_coeff_precision: 12,
            do_qlp_coeff_prec_search: false,
            do_exhaustive_model_search,
            residual: ResidualSearch {
                min_partition_order: 0,
                max_partition_order: 4,
                rice_param_search_dist: 1,
                do_escape_coding: false,
            },
        }
    }

    #[test]
    fn verify_loose_stereo_period() {
        assert_eq!(loose_stereo_period(44100, 4096), 4);
        assert_eq!(loose_stereo_period(8000, 4608), 1);
        assert_eq!(loose_stereo_period(192000, 1152), 67);
    }

    #[test]
    fn verify_best_pair_ties() {
        // Every pair costs the same: independent wins.
        assert_eq!(best_pair(&[1, 1, 1, 1]).0, ChannelAssignment::Independent(2));
        // Left/side and mid/side cost the same: left/side wins.
        assert_eq!(best_pair(&[1, 9, 9, 0]).0, ChannelAssignment::LeftSide);
        assert_eq!(best_pair(&[9, 1, 9, 0]).0, ChannelAssignment::RightSide);
        assert_eq!(best_pair(&[9, 9, 1, 0]).0, ChannelAssignment::MidSide);
    }

    #[test]
    fn verify_identical_channels_use_side() {
        let signal: Vec<i32> = (0..1024).map(|i| ((i * 37) % 2001) - 1000).collect();

        for exhaustive in [false, true] {
            let mut encoder = FrameEncoder::new(params(true, exhaustive), vec![Apodization::Hann]);
            let mut writer = BitWriterLtr::new();

            // The side signal is silent, so a side assignment is always cheaper than independent.
            let assignment = encoder.encode(0, &[&signal, &signal], &mut writer);
            assert_ne!(assignment, ChannelAssignment::Independent(2));
            assert_ne!(assignment, ChannelAssignment::MidSide);
        }
    }

    #[test]
    fn verify_frame_crc() {
        let signal: Vec<i32> = (0..256).map(|i| (i % 7) * 100).collect();

        let mut encoder = FrameEncoder::new(params(false, false), vec![Apodization::Hann]);
        let mut writer = BitWriterLtr::new();

        let assignment = encoder.encode(3, &[&signal], &mut writer);
        assert_eq!(assignment, ChannelAssignment::Independent(1));

        let bytes = writer.bytes();
        assert_eq!(&bytes[..2], &[0xff, 0xf8]);

        // The checksum of a frame followed by its checksum is 0.
        let mut crc16 = Crc16Ansi::new(0);
        crc16.process_buf_bytes(bytes);
        assert_eq!(crc16.crc(), 0);
    }
}
