// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Partitioned Rice coding of prediction residuals.

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{BitWriterLtr, ReadBitsLtr};
use cadenza_core::util::bits::{fold_i32_to_u32, signed_bit_width, unfold_u32_to_i32};

/// The largest partition order that can be coded.
pub const MAX_PARTITION_ORDER: u32 = 15;

/// The largest Rice parameter of the 4-bit parameter coding method.
const MAX_RICE_PARAM: u32 = 14;
/// The largest Rice parameter of the 5-bit parameter coding method.
const MAX_RICE2_PARAM: u32 = 30;

/// The residual coding method.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodingMethod {
    /// Partitions have a 4-bit Rice parameter.
    Rice,
    /// Partitions have a 5-bit Rice parameter.
    Rice2,
}

impl CodingMethod {
    fn param_bit_width(&self) -> u32 {
        match self {
            CodingMethod::Rice => 4,
            CodingMethod::Rice2 => 5,
        }
    }

    fn escape_code(&self) -> u32 {
        (1 << self.param_bit_width()) - 1
    }
}

/// The coding of one residual partition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RicePartition {
    /// Residuals are Rice coded with the given parameter.
    Rice(u32),
    /// Residuals are stored as signed integers of the given bit width. A width of 0 means all
    /// residuals are 0.
    Escaped(u32),
}

/// A coded residual.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Residual {
    pub method: CodingMethod,
    pub partition_order: u32,
    pub partitions: Vec<RicePartition>,
    /// The residual of every predicted sample. The first partition is shorter than the others by
    /// the predictor order.
    pub residuals: Vec<i32>,
    /// The number of warm-up samples preceding the residuals, equal to the predictor order.
    pub warm_up: usize,
}

pub fn decode_residual<B: ReadBitsLtr>(
    bs: &mut B,
    n_prelude_samples: u32,
    buf: &mut [i64],
) -> Result<()> {
    let method_enc = bs.read_bits_leq32(2)?;

    // The FLAC format defines two residual coding methods: Rice and Rice2. The
    // only difference between the two is the bit width of the Rice parameter. Note the
    // bit width based on the residual encoding method and use the same code path for
    // both cases.
    let param_bit_width = match method_enc {
        0x0 => 4,
        0x1 => 5,
        _ => {
            return decode_error("flac: residual method set to reserved value");
        }
    };

    // Read the partition order.
    let order = bs.read_bits_leq32(4)?;

    // The number of partitions is equal to 2^order.
    let n_partitions = 1usize << order;

    // In general, all partitions have the same number of samples such that the sum of all partition
    // lengths equal the block length. The number of samples in a partition can therefore be
    // calculated with block_size / 2^order *in general*. However, since there are warm-up samples
    // stored verbatim, the first partition has n_prelude_samples less samples. Likewise, if there
    // is only one partition, then it too has n_prelude_samples less samples.
    let n_partition_samples = buf.len() >> order;

    // The size of the first (and/or only) partition as per the format is n_partition_samples
    // minus the number of warm-up samples (which is the predictor order). Ensure the number of
    // samples in these types of partitions cannot be negative.
    if n_prelude_samples as usize > n_partition_samples {
        return decode_error("flac: residual partition too small for given predictor order");
    }

    // Ensure that the sum of all partition lengths equal the block size.
    if n_partitions * n_partition_samples != buf.len() {
        return decode_error("flac: block size is not same as encoded residual");
    }

    // Decode the first partition as it may have less than n_partition_samples samples.
    decode_rice_partition(
        bs,
        param_bit_width,
        &mut buf[n_prelude_samples as usize..n_partition_samples],
    )?;

    // Decode the remaining partitions.
    if n_partition_samples > 0 {
        for buf_chunk in buf[n_partition_samples..].chunks_mut(n_partition_samples) {
            decode_rice_partition(bs, param_bit_width, buf_chunk)?;
        }
    }

    Ok(())
}

fn decode_rice_partition<B: ReadBitsLtr>(
    bs: &mut B,
    param_bit_width: u32,
    buf: &mut [i64],
) -> Result<()> {
    // Read the encoding parameter, generally the Rice parameter.
    let rice_param = bs.read_bits_leq32(param_bit_width)?;

    // If the Rice parameter is all 1s (e.g., 0xf for a 4bit parameter, 0x1f for a 5bit parameter),
    // then it indicates that residuals in this partition are not Rice encoded, rather they are
    // binary encoded. Conversely, if the parameter is less than this value, the residuals are Rice
    // encoded.
    if rice_param < (1 << param_bit_width) - 1 {
        // Read each rice encoded residual and store in buffer. A parameter of 0 codes the
        // quotient alone.
        for sample in buf.iter_mut() {
            let q = bs.read_unary_zeros()?;
            let r = if rice_param > 0 { bs.read_bits_leq32(rice_param)? } else { 0 };

            if rice_param > 0 && q >= 1 << (32 - rice_param) {
                return decode_error("flac: rice coded residual exceeds 32 bits");
            }

            *sample = i64::from(unfold_u32_to_i32((q << rice_param) | r));
        }
    }
    else {
        let residual_bits = bs.read_bits_leq32(5)?;

        // Read each binary encoded residual and store in buffer. A width of 0 means every
        // residual is 0.
        if residual_bits == 0 {
            buf.fill(0);
        }
        else {
            for sample in buf.iter_mut() {
                *sample = i64::from(bs.read_bits_leq32_signed(residual_bits)?);
            }
        }
    }

    Ok(())
}

impl Residual {
    /// Gets the number of bits the coded residual occupies.
    pub fn bit_len(&self) -> u64 {
        let param_bits = u64::from(self.method.param_bit_width());

        let mut bits = 2 + 4;

        for (partition, residuals) in self.partitions.iter().zip(self.partition_chunks()) {
            bits += param_bits;

            bits += match *partition {
                RicePartition::Rice(k) => rice_partition_bits(residuals, k),
                RicePartition::Escaped(width) => 5 + u64::from(width) * residuals.len() as u64,
            };
        }

        bits
    }

    /// Iterates over the residuals of each partition.
    fn partition_chunks(&self) -> impl Iterator<Item = &[i32]> + '_ {
        let n_partitions = self.partitions.len();

        // The residuals exclude the warm-up samples, which all belong to the first partition.
        let block_len = (self.residuals.len() + self.warm_up) >> self.partition_order;
        let first_len = block_len - self.warm_up;

        let (first, rest) = self.residuals.split_at(first_len);

        std::iter::once(first).chain(rest.chunks(block_len.max(1))).take(n_partitions)
    }

    pub fn write(&self, writer: &mut BitWriterLtr) {
        writer.write_bits_leq32(
            match self.method {
                CodingMethod::Rice => 0,
                CodingMethod::Rice2 => 1,
            },
            2,
        );
        writer.write_bits_leq32(self.partition_order, 4);

        let param_bits = self.method.param_bit_width();

        for (partition, residuals) in self.partitions.iter().zip(self.partition_chunks()) {
            match *partition {
                RicePartition::Rice(k) => {
                    writer.write_bits_leq32(k, param_bits);

                    for &residual in residuals {
                        write_rice(writer, fold_i32_to_u32(residual), k);
                    }
                }
                RicePartition::Escaped(width) => {
                    writer.write_bits_leq32(self.method.escape_code(), param_bits);
                    writer.write_bits_leq32(width, 5);

                    if width > 0 {
                        for &residual in residuals {
                            writer.write_bits_leq32_signed(residual, width);
                        }
                    }
                }
            }
        }
    }
}

/// Writes a folded value as a Rice code with parameter `k`. The quotient is written as unary
/// zeros terminated by a one, followed by the `k` low bits of the value.
#[inline(always)]
pub fn write_rice(writer: &mut BitWriterLtr, value: u32, k: u32) {
    writer.write_unary_zeros(value >> k);

    if k > 0 {
        writer.write_bits_leq32(value, k);
    }
}

/// Gets the exact number of bits, excluding the parameter, required to Rice code `residuals` with
/// parameter `k`.
fn rice_partition_bits(residuals: &[i32], k: u32) -> u64 {
    residuals.iter().map(|&r| 1 + u64::from(k) + u64::from(fold_i32_to_u32(r) >> k)).sum()
}

/// Gets the Rice parameter closest to optimal for a partition of `n` residuals whose folded values
/// sum to `sum`.
fn estimate_rice_param(n: u64, sum: u64, max_param: u32) -> u32 {
    // The optimal parameter is approximately log2 of the mean folded value.
    let mut k = 0;

    while k < max_param && (n << (k + 1)) < sum {
        k += 1;
    }

    k
}

/// Options controlling the search for the best residual coding.
#[derive(Copy, Clone, Debug)]
pub struct ResidualSearch {
    pub min_partition_order: u32,
    pub max_partition_order: u32,
    /// Rice parameters within this distance of the estimate are tried. At least 1.
    pub rice_param_search_dist: u32,
    pub do_escape_coding: bool,
}

/// Gets the largest usable partition order for a block. Every partition must divide the block
/// evenly, and the first partition must be longer than the predictor order.
pub fn max_partition_order_for(block_len: usize, predictor_order: u32, limit: u32) -> u32 {
    let mut order = limit.min(block_len.trailing_zeros()).min(MAX_PARTITION_ORDER);

    while order > 0 && (block_len >> order) <= predictor_order as usize {
        order -= 1;
    }

    order
}

/// Finds the cheapest coding of `residuals`, the residual of a block of `block_len` samples
/// predicted with a predictor of order `predictor_order`. Among equally cheap codings, the lowest
/// partition order is chosen.
pub fn encode_residual(
    residuals: Vec<i32>,
    block_len: usize,
    predictor_order: u32,
    search: &ResidualSearch,
) -> Residual {
    debug_assert_eq!(residuals.len() + predictor_order as usize, block_len);

    let max_order = max_partition_order_for(block_len, predictor_order, search.max_partition_order);
    let min_order = search.min_partition_order.min(max_order);

    let dist = search.rice_param_search_dist.max(1);

    let mut best: Option<(u64, u32, Vec<RicePartition>)> = None;

    for order in min_order..=max_order {
        let partition_len = block_len >> order;

        let mut bits = 2 + 4;
        let mut partitions = Vec::with_capacity(1 << order);

        let mut start = 0;

        for p in 0..(1usize << order) {
            let len = if p == 0 { partition_len - predictor_order as usize } else { partition_len };
            let chunk = &residuals[start..start + len];
            start += len;

            let (cost, partition) = best_partition_coding(chunk, dist, search.do_escape_coding);

            bits += cost;
            partitions.push(partition);
        }

        // Parameter fields.
        bits += partitions.len() as u64 * u64::from(coding_method_for(&partitions).param_bit_width());

        if best.as_ref().map_or(true, |(best_bits, _, _)| bits < *best_bits) {
            best = Some((bits, order, partitions));
        }
    }

    let (_, partition_order, partitions) = match best {
        Some(best) => best,
        None => (0, 0, vec![RicePartition::Rice(0)]),
    };

    let method = coding_method_for(&partitions);

    Residual { method, partition_order, partitions, residuals, warm_up: predictor_order as usize }
}

/// A partition with a parameter above 14 requires the 5-bit parameter method for the entire
/// residual.
fn coding_method_for(partitions: &[RicePartition]) -> CodingMethod {
    if partitions.iter().any(|p| matches!(*p, RicePartition::Rice(k) if k > MAX_RICE_PARAM)) {
        CodingMethod::Rice2
    }
    else {
        CodingMethod::Rice
    }
}

/// Gets the cost in bits, excluding the parameter field, and the coding of a single partition.
fn best_partition_coding(residuals: &[i32], dist: u32, do_escape: bool) -> (u64, RicePartition) {
    let n = residuals.len() as u64;
    let sum: u64 = residuals.iter().map(|&r| u64::from(fold_i32_to_u32(r))).sum();

    let estimate = estimate_rice_param(n, sum, MAX_RICE2_PARAM);

    let lo = estimate.saturating_sub(dist);
    let hi = (estimate + dist).min(MAX_RICE2_PARAM);

    let mut best_k = lo;
    let mut best_bits = u64::MAX;

    for k in lo..=hi {
        let bits = rice_partition_bits(residuals, k);

        if bits < best_bits {
            best_bits = bits;
            best_k = k;
        }
    }

    if do_escape {
        let width = residuals
            .iter()
            .map(|&r| if r == 0 { 0 } else { signed_bit_width(i64::from(r)) })
            .max()
            .unwrap_or(0);

        // The raw width field is 5 bits wide.
        if width < 32 {
            let bits = 5 + u64::from(width) * n;

            if bits < best_bits {
                return (bits, RicePartition::Escaped(width));
            }
        }
    }

    (best_bits, RicePartition::Rice(best_k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::io::BitReaderLtr;

    fn search(max_partition_order: u32, do_escape_coding: bool) -> ResidualSearch {
        ResidualSearch {
            min_partition_order: 0,
            max_partition_order,
            rice_param_search_dist: 1,
            do_escape_coding,
        }
    }

    fn decode(buf: &[u8], predictor_order: u32, block_len: usize) -> Vec<i64> {
        let mut samples = vec![0; block_len];
        decode_residual(&mut BitReaderLtr::new(buf), predictor_order, &mut samples).unwrap();
        samples
    }

    fn check_round_trip(residual: &Residual, block_len: usize, predictor_order: u32) {
        let mut writer = BitWriterLtr::new();
        residual.write(&mut writer);

        assert_eq!(writer.bits_written(), residual.bit_len());

        let decoded = decode(&writer.into_inner(), predictor_order, block_len);

        let expected: Vec<i64> = residual.residuals.iter().map(|&r| i64::from(r)).collect();
        assert_eq!(&decoded[predictor_order as usize..], &expected[..]);
    }

    #[test]
    fn verify_all_zero_residual() {
        let residual = encode_residual(vec![0; 4096 - 2], 4096, 2, &search(8, false));

        assert_eq!(residual.partition_order, 0);
        assert_eq!(residual.method, CodingMethod::Rice);
        assert_eq!(residual.partitions, [RicePartition::Rice(0)]);
        assert_eq!(residual.bit_len(), 2 + 4 + 4 + 4094);

        check_round_trip(&residual, 4096, 2);
    }

    #[test]
    fn verify_residual_round_trip() {
        // A quiet section followed by a loud section favours multiple partitions.
        let mut residuals: Vec<i32> = (0..1020).map(|i| (i % 7) - 3).collect();
        residuals.extend((0..1024).map(|i| ((i * 7919) % 20001) - 10000));
        residuals.extend((0..2048).map(|i| ((i * 31) % 17) - 8));

        let residual = encode_residual(residuals, 4096, 4, &search(6, false));

        assert!(residual.partition_order > 0);
        check_round_trip(&residual, 4096, 4);
    }

    #[test]
    fn verify_rice2_and_escape() {
        // Residuals near the limits of a 32-bit integer need large parameters.
        let residuals: Vec<i32> =
            (0..256).map(|i| if i % 2 == 0 { i32::MAX - i } else { i32::MIN + i }).collect();

        let residual = encode_residual(residuals, 256, 0, &search(0, false));
        assert_eq!(residual.method, CodingMethod::Rice2);
        check_round_trip(&residual, 256, 0);

        // Uniformly spread small residuals are cheaper stored raw.
        let residuals: Vec<i32> = (0..256).map(|i| [-4, 3, 0, -1][i % 4]).collect();

        let residual = encode_residual(residuals, 256, 0, &search(0, true));
        assert_eq!(residual.partitions, [RicePartition::Escaped(3)]);
        check_round_trip(&residual, 256, 0);
    }

    #[test]
    fn verify_max_partition_order_for() {
        assert_eq!(max_partition_order_for(4096, 0, 15), 12);
        assert_eq!(max_partition_order_for(4096, 8, 15), 8);
        assert_eq!(max_partition_order_for(4096, 32, 6), 6);
        assert_eq!(max_partition_order_for(1152, 0, 8), 7);
        assert_eq!(max_partition_order_for(4095, 0, 8), 0);
    }

    #[test]
    fn verify_decode_rejects_bad_partitioning() {
        // Rice method, partition order 4, with a block of 8 samples.
        let mut writer = BitWriterLtr::new();
        writer.write_bits_leq32(0, 2);
        writer.write_bits_leq32(4, 4);
        let buf = writer.into_inner();

        let mut samples = vec![0; 8];
        assert!(decode_residual(&mut BitReaderLtr::new(&buf), 0, &mut samples).is_err());
    }
}
