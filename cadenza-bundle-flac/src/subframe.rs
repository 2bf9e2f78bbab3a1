// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subframes: the coded signal of one channel of a frame.

use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::{BitWriterLtr, ReadBitsLtr};
use cadenza_core::util::bits::sign_extend_leq32_to_i32;

use log::trace;

use crate::fixed::{best_fixed_order, fixed_predict, fixed_residual, MAX_FIXED_ORDER};
use crate::lpc::*;
use crate::residual::{decode_residual, encode_residual, Residual, ResidualSearch};

/// The coding method of a subframe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubFrameKind {
    Constant,
    Verbatim,
    Fixed,
    Lpc,
}

impl SubFrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubFrameKind::Constant => "CONSTANT",
            SubFrameKind::Verbatim => "VERBATIM",
            SubFrameKind::Fixed => "FIXED",
            SubFrameKind::Lpc => "LPC",
        }
    }
}

/// Describes how one channel of a decoded frame was coded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubFrameInfo {
    pub kind: SubFrameKind,
    /// The predictor order. 0 for constant and verbatim subframes.
    pub order: u32,
    /// The number of low-order zero bits removed from every sample.
    pub wasted_bits: u32,
}

/// Reads a subframe of `bps` bits per sample and decodes it into `buf`. The length of `buf` is the
/// block length. Returns how the subframe was coded.
pub fn read_subframe<B: ReadBitsLtr>(
    bs: &mut B,
    frame_bps: u32,
    buf: &mut [i64],
) -> Result<SubFrameInfo> {
    // First sub-frame bit must always 0.
    if bs.read_bit()? {
        return decode_error("flac: subframe padding is not 0");
    }

    // Next 6 bits designate the sub-frame type.
    let subframe_type_enc = bs.read_bits_leq32(6)?;

    let (kind, order) = match subframe_type_enc {
        0x00 => (SubFrameKind::Constant, 0),
        0x01 => (SubFrameKind::Verbatim, 0),
        0x08..=0x0f => {
            let order = subframe_type_enc & 0x07;
            // The Fixed Predictor only supports orders between 0 and 4.
            if order > MAX_FIXED_ORDER {
                return decode_error("flac: fixed predictor orders of greater than 4 are invalid");
            }
            (SubFrameKind::Fixed, order)
        }
        0x20..=0x3f => (SubFrameKind::Lpc, (subframe_type_enc & 0x1f) + 1),
        _ => {
            return decode_error("flac: subframe type set to reserved value");
        }
    };

    // Bit 7 of the sub-frame header designates if there are any dropped (wasted in FLAC terms)
    // bits per sample in the audio sub-block. If the bit is set, unary decode the number of
    // dropped bits per sample.
    let dropped_bps = if bs.read_bit()? { bs.read_unary_zeros()?.saturating_add(1) } else { 0 };

    // The bits per sample stated in the frame header is for the decoded audio sub-block samples.
    // However, it is likely that the lower order bits of all the samples are simply 0. Therefore,
    // the encoder will truncate `dropped_bps` of lower order bits for every sample in a sub-block.
    // The decoder simply needs to shift left all samples by `dropped_bps` after decoding the
    // sub-frame and obtaining the truncated audio sub-block samples.
    if dropped_bps >= frame_bps {
        return decode_error("flac: subframe wasted bits exceed the sample size");
    }

    let bps = frame_bps - dropped_bps;

    trace!(
        "\tsubframe: type={}, order={}, bps={}, dropped_bps={}",
        kind.as_str(),
        order,
        bps,
        dropped_bps
    );

    match kind {
        SubFrameKind::Constant => decode_constant(bs, bps, buf)?,
        SubFrameKind::Verbatim => decode_verbatim(bs, bps, buf)?,
        SubFrameKind::Fixed => decode_fixed_linear(bs, bps, order, buf)?,
        SubFrameKind::Lpc => decode_linear(bs, bps, order, buf)?,
    };

    // Shift the samples to account for the dropped bits.
    samples_shl(dropped_bps, buf);

    Ok(SubFrameInfo { kind, order, wasted_bits: dropped_bps })
}

#[inline(always)]
fn samples_shl(shift: u32, buf: &mut [i64]) {
    if shift > 0 {
        for sample in buf.iter_mut() {
            *sample = sample.wrapping_shl(shift);
        }
    }
}

/// Reads a `bps`-bit signed sample. The side channel of a 32-bit stream has 33-bit samples.
#[inline(always)]
fn read_sample<B: ReadBitsLtr>(bs: &mut B, bps: u32) -> Result<i64> {
    if bps <= 32 {
        Ok(i64::from(sign_extend_leq32_to_i32(bs.read_bits_leq32(bps)?, bps)))
    }
    else {
        Ok(bs.read_bits_leq64_signed(bps)?)
    }
}

fn decode_constant<B: ReadBitsLtr>(bs: &mut B, bps: u32, buf: &mut [i64]) -> Result<()> {
    let const_sample = read_sample(bs, bps)?;

    buf.fill(const_sample);

    Ok(())
}

fn decode_verbatim<B: ReadBitsLtr>(bs: &mut B, bps: u32, buf: &mut [i64]) -> Result<()> {
    for sample in buf.iter_mut() {
        *sample = read_sample(bs, bps)?;
    }

    Ok(())
}

fn decode_fixed_linear<B: ReadBitsLtr>(
    bs: &mut B,
    bps: u32,
    order: u32,
    buf: &mut [i64],
) -> Result<()> {
    if order as usize > buf.len() {
        return decode_error("flac: fixed predictor order exceeds the block length");
    }

    // The first `order` samples are encoded verbatim to warm-up the LPC decoder.
    decode_verbatim(bs, bps, &mut buf[..order as usize])?;

    // Decode the residuals for the predicted samples.
    decode_residual(bs, order, buf)?;

    // Run the Fixed predictor (appends to residuals).
    fixed_predict(order, buf);

    Ok(())
}

fn decode_linear<B: ReadBitsLtr>(bs: &mut B, bps: u32, order: u32, buf: &mut [i64]) -> Result<()> {
    // The order of the Linear Predictor should be between 1 and 32.
    debug_assert!(order > 0 && order <= MAX_LPC_ORDER);

    if order as usize > buf.len() {
        return decode_error("flac: lpc order exceeds the block length");
    }

    // The first `order` samples are encoded verbatim to warm-up the LPC decoder.
    decode_verbatim(bs, bps, &mut buf[0..order as usize])?;

    // Quantized linear predictor (QLP) coefficients precision in bits (1-16).
    let qlp_precision = bs.read_bits_leq32(4)? + 1;

    if qlp_precision > MAX_QLP_COEFF_PRECISION {
        return decode_error("flac: qlp precision set to reserved value");
    }

    // QLP coefficients bit shift [-16, 15].
    let qlp_coeff_shift = sign_extend_leq32_to_i32(bs.read_bits_leq32(5)?, 5);

    if qlp_coeff_shift < 0 {
        return decode_error("flac: lpc shifts less than 0 are invalid");
    }

    let mut qlp_coeffs = [0i32; MAX_LPC_ORDER as usize];

    for c in qlp_coeffs.iter_mut().take(order as usize) {
        *c = sign_extend_leq32_to_i32(bs.read_bits_leq32(qlp_precision)?, qlp_precision);
    }

    decode_residual(bs, order, buf)?;

    lpc_predict_dispatch(&qlp_coeffs[..order as usize], qlp_coeff_shift as u32, buf);

    Ok(())
}

/// The prediction model of a subframe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubFrameModel {
    /// Every sample has the same value.
    Constant(i64),
    /// Samples are stored as-is.
    Verbatim(Vec<i64>),
    /// A fixed polynomial predictor.
    Fixed { order: u32, warm_up: Vec<i64>, residual: Residual },
    /// A linear predictor with quantized coefficients.
    Lpc {
        precision: u32,
        shift: u32,
        coeffs: Vec<i32>,
        warm_up: Vec<i64>,
        residual: Residual,
    },
}

/// An encoded subframe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubFrame {
    pub model: SubFrameModel,
    /// The number of low-order zero bits removed from every sample before coding.
    pub wasted_bits: u32,
}

/// Writes a `bps`-bit signed sample.
#[inline(always)]
fn write_sample(writer: &mut BitWriterLtr, sample: i64, bps: u32) {
    if bps <= 32 {
        writer.write_bits_leq32_signed(sample as i32, bps);
    }
    else {
        writer.write_bits_leq64_signed(sample, bps);
    }
}

impl SubFrame {
    /// Gets the description a decoder reports for this subframe.
    pub fn info(&self) -> SubFrameInfo {
        let (kind, order) = match &self.model {
            SubFrameModel::Constant(_) => (SubFrameKind::Constant, 0),
            SubFrameModel::Verbatim(_) => (SubFrameKind::Verbatim, 0),
            SubFrameModel::Fixed { order, .. } => (SubFrameKind::Fixed, *order),
            SubFrameModel::Lpc { coeffs, .. } => (SubFrameKind::Lpc, coeffs.len() as u32),
        };

        SubFrameInfo { kind, order, wasted_bits: self.wasted_bits }
    }

    fn type_code(&self) -> u32 {
        match &self.model {
            SubFrameModel::Constant(_) => 0x00,
            SubFrameModel::Verbatim(_) => 0x01,
            SubFrameModel::Fixed { order, .. } => 0x08 | order,
            SubFrameModel::Lpc { coeffs, .. } => 0x20 | (coeffs.len() as u32 - 1),
        }
    }

    /// Gets the exact number of bits the subframe occupies when coded with `bps` bits per sample.
    pub fn bit_len(&self, bps: u32) -> u64 {
        let bps = u64::from(bps - self.wasted_bits);

        // Padding bit, type, wasted bits flag, and unary coded wasted bits.
        let header = 8 + u64::from(self.wasted_bits);

        let body = match &self.model {
            SubFrameModel::Constant(_) => bps,
            SubFrameModel::Verbatim(samples) => bps * samples.len() as u64,
            SubFrameModel::Fixed { warm_up, residual, .. } => {
                bps * warm_up.len() as u64 + residual.bit_len()
            }
            SubFrameModel::Lpc { precision, coeffs, warm_up, residual, .. } => {
                bps * warm_up.len() as u64
                    + 4
                    + 5
                    + u64::from(*precision) * coeffs.len() as u64
                    + residual.bit_len()
            }
        };

        header + body
    }

    /// Writes the subframe with `bps` bits per sample.
    pub fn write(&self, writer: &mut BitWriterLtr, bps: u32) {
        writer.write_bit(false);
        writer.write_bits_leq32(self.type_code(), 6);

        if self.wasted_bits > 0 {
            writer.write_bit(true);
            writer.write_unary_zeros(self.wasted_bits - 1);
        }
        else {
            writer.write_bit(false);
        }

        let bps = bps - self.wasted_bits;

        match &self.model {
            SubFrameModel::Constant(value) => write_sample(writer, *value, bps),
            SubFrameModel::Verbatim(samples) => {
                for &sample in samples {
                    write_sample(writer, sample, bps);
                }
            }
            SubFrameModel::Fixed { warm_up, residual, .. } => {
                for &sample in warm_up {
                    write_sample(writer, sample, bps);
                }

                residual.write(writer);
            }
            SubFrameModel::Lpc { precision, shift, coeffs, warm_up, residual } => {
                for &sample in warm_up {
                    write_sample(writer, sample, bps);
                }

                writer.write_bits_leq32(precision - 1, 4);
                writer.write_bits_leq32_signed(*shift as i32, 5);

                for &coeff in coeffs {
                    writer.write_bits_leq32_signed(coeff, *precision);
                }

                residual.write(writer);
            }
        }
    }
}

/// Options controlling the search for the best subframe model.
#[derive(Clone, Debug)]
pub struct SubFrameSearch<'a> {
    /// Apodization windows, each as long as the block.
    pub windows: &'a [Vec<f64>],
    /// The maximum linear predictor order, or 0 to disable linear prediction.
    pub max_lpc_order: u32,
    /// The quantized coefficient precision.
    pub qlp_coeff_precision: u32,
    /// Try every precision from the minimum up-to `qlp_coeff_precision`.
    pub do_qlp_coeff_prec_search: bool,
    /// Evaluate the exact cost of every predictor order instead of estimating the best order.
    pub do_exhaustive_model_search: bool,
    pub residual: ResidualSearch,
}

/// The running best candidate of a subframe search.
struct Best {
    bits: u64,
    model: SubFrameModel,
}

impl Best {
    /// Replaces the best candidate if `model` is strictly cheaper. The search tries candidates in
    /// the order of their type codes, so equally cheap candidates resolve to the lowest type.
    fn offer(&mut self, model: SubFrameModel, bits: u64) {
        if bits < self.bits {
            self.bits = bits;
            self.model = model;
        }
    }
}

/// Gets the coded length of a model without wasted bits.
fn model_bits(model: SubFrameModel, bps: u32) -> (SubFrameModel, u64) {
    let subframe = SubFrame { model, wasted_bits: 0 };
    let bits = subframe.bit_len(bps);
    (subframe.model, bits)
}

/// Encodes the samples of one channel of a block, of `bps` bits per sample, choosing the
/// cheapest model.
pub fn encode_subframe(samples: &[i64], bps: u32, search: &SubFrameSearch<'_>) -> SubFrame {
    let n = samples.len();

    // A block of identical samples is always cheapest as a constant.
    if samples.iter().all(|&s| s == samples[0]) {
        return SubFrame { model: SubFrameModel::Constant(samples[0]), wasted_bits: 0 };
    }

    // Low-order bits that are zero in every sample are wasted.
    let wasted_bits = samples.iter().fold(0, |acc, &s| acc | s).trailing_zeros().min(bps - 1);

    let shifted: Vec<i64>;

    let samples = if wasted_bits > 0 {
        shifted = samples.iter().map(|&s| s >> wasted_bits).collect();
        &shifted[..]
    }
    else {
        samples
    };

    let bps = bps - wasted_bits;

    let (model, bits) = model_bits(SubFrameModel::Verbatim(samples.to_vec()), bps);
    let mut best = Best { bits, model };

    // Fixed predictors.
    let max_fixed_order = MAX_FIXED_ORDER.min(n as u32 - 1);

    let fixed_orders = if search.do_exhaustive_model_search {
        0..=max_fixed_order
    }
    else {
        let (order, _) = best_fixed_order(samples, max_fixed_order);
        order..=order
    };

    for order in fixed_orders {
        if let Some(residuals) = fixed_residual(order, samples) {
            let residual = encode_residual(residuals, n, order, &search.residual);

            let warm_up = samples[..order as usize].to_vec();

            let (model, bits) = model_bits(SubFrameModel::Fixed { order, warm_up, residual }, bps);
            best.offer(model, bits);
        }
    }

    // Linear predictors.
    let max_lpc_order = search.max_lpc_order.min(n as u32 - 1).min(MAX_LPC_ORDER);

    if max_lpc_order > 0 {
        let mut windowed = vec![0.0; n];
        let mut autoc = vec![0.0; max_lpc_order as usize + 1];

        for window in search.windows.iter() {
            debug_assert_eq!(window.len(), n);

            for ((x, &s), &w) in windowed.iter_mut().zip(samples).zip(window) {
                *x = s as f64 * w;
            }

            compute_autocorrelation(&windowed, &mut autoc);

            let lp = compute_lp_coefficients(&autoc, max_lpc_order);

            if lp.max_order() == 0 {
                continue;
            }

            let orders = if search.do_exhaustive_model_search {
                1..=lp.max_order()
            }
            else {
                let overhead = bps
                    + if search.do_qlp_coeff_prec_search {
                        MAX_QLP_COEFF_PRECISION
                    }
                    else {
                        search.qlp_coeff_precision
                    };

                let order = compute_best_order(&lp.errors, n, overhead);
                order..=order
            };

            for order in orders {
                let coeffs = &lp.coeffs[order as usize - 1];
                evaluate_lpc_order(samples, bps, order, coeffs, search, &mut best);
            }
        }
    }

    let subframe = SubFrame { model: best.model, wasted_bits };

    trace!(
        "\tsubframe: bits={}, wasted_bits={}, model={}",
        best.bits,
        wasted_bits,
        subframe.info().kind.as_str()
    );

    subframe
}

/// Evaluates a linear predictor of order `order` with coefficients `lp` at every candidate
/// precision.
fn evaluate_lpc_order(
    samples: &[i64],
    bps: u32,
    order: u32,
    lp: &[f64],
    search: &SubFrameSearch<'_>,
    best: &mut Best,
) {
    let n = samples.len();

    // Limit the precision such that decoding streams of up-to 17 bits per sample needs only
    // 32-bit arithmetic.
    let max_for_bps = |precision: u32| {
        if bps <= 17 {
            precision.min(32 - bps - order.ilog2()).max(MIN_QLP_COEFF_PRECISION)
        }
        else {
            precision
        }
    };

    let (min_precision, max_precision) = if search.do_qlp_coeff_prec_search {
        (MIN_QLP_COEFF_PRECISION, max_for_bps(MAX_QLP_COEFF_PRECISION))
    }
    else {
        let precision = max_for_bps(search.qlp_coeff_precision);
        (precision, precision)
    };

    let mut qlp = vec![0i32; order as usize];

    for precision in min_precision..=max_precision {
        let shift = match quantize_coefficients(lp, precision, &mut qlp) {
            Ok(shift) => shift,
            Err(err) => {
                trace!("\tlpc: order={}, precision={}, {:?}", order, precision, err);
                continue;
            }
        };

        let residuals = match lpc_residual(samples, &qlp, shift) {
            Some(residuals) => residuals,
            None => continue,
        };

        let residual = encode_residual(residuals, n, order, &search.residual);

        let model = SubFrameModel::Lpc {
            precision,
            shift,
            coeffs: qlp.clone(),
            warm_up: samples[..order as usize].to_vec(),
            residual,
        };

        let (model, bits) = model_bits(model, bps);
        best.offer(model, bits);
    }
}
