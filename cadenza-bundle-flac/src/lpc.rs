// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Linear predictive coding.
//!
//! Analysis runs on windowed samples in floating point: autocorrelation, then the Levinson-Durbin
//! recursion yields a set of predictor coefficients for every order. Coefficients are then
//! quantized to integers with a common shift, and prediction itself is exact integer arithmetic.

/// The largest linear predictor order.
pub const MAX_LPC_ORDER: u32 = 32;

/// The smallest usable quantized coefficient precision when searching precisions.
pub const MIN_QLP_COEFF_PRECISION: u32 = 5;

/// The largest quantized coefficient precision. A coded precision of 16 is reserved.
pub const MAX_QLP_COEFF_PRECISION: u32 = 15;

/// The largest quantized coefficient shift.
const MAX_QLP_SHIFT: i32 = 15;

/// The smallest quantized coefficient shift representable in the 5-bit signed shift field.
const MIN_QLP_SHIFT: i32 = -16;

/// An error quantizing predictor coefficients.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QuantizeError {
    /// All coefficients are 0.
    ZeroCoefficients,
    /// The coefficients are too large to represent at the requested precision.
    CoefficientOverflow,
}

/// Computes the autocorrelation of `data` for lags `0..autoc.len()`.
pub fn compute_autocorrelation(data: &[f64], autoc: &mut [f64]) {
    for (lag, value) in autoc.iter_mut().enumerate() {
        *value = if lag < data.len() {
            data[lag..].iter().zip(data).map(|(a, b)| a * b).sum()
        }
        else {
            0.0
        };
    }
}

/// Predictor coefficients of every order up-to some maximum.
pub struct LpCoefficients {
    /// `coeffs[i]` holds the `i + 1` coefficients of the order `i + 1` predictor.
    pub coeffs: Vec<Vec<f64>>,
    /// `errors[i]` holds the prediction error of the order `i + 1` predictor.
    pub errors: Vec<f64>,
}

impl LpCoefficients {
    /// The largest order for which coefficients were computed.
    pub fn max_order(&self) -> u32 {
        self.coeffs.len() as u32
    }
}

/// Computes predictor coefficients for orders `1..=max_order` from the autocorrelation `autoc`
/// using the Levinson-Durbin recursion. `autoc` must contain at least `max_order + 1` lags.
///
/// The recursion stops early if the prediction error reaches zero or is not finite, therefore
/// fewer than `max_order` orders may be returned. No coefficients are returned if `autoc[0]` is 0.
pub fn compute_lp_coefficients(autoc: &[f64], max_order: u32) -> LpCoefficients {
    debug_assert!(autoc.len() > max_order as usize);

    let mut result = LpCoefficients { coeffs: Vec::new(), errors: Vec::new() };

    // A zero energy signal cannot be predicted.
    if autoc[0].is_nan() || autoc[0] <= 0.0 {
        return result;
    }

    let max_order = max_order as usize;

    let mut lpc = vec![0.0f64; max_order];
    let mut err = autoc[0];

    for i in 0..max_order {
        // Sum up this iteration's reflection coefficient.
        let mut r = -autoc[i + 1];

        for j in 0..i {
            r -= lpc[j] * autoc[i - j];
        }

        r /= err;

        // Update the LPC coefficients and the total error.
        lpc[i] = r;

        let mut j = 0;

        while j < (i >> 1) {
            let tmp = lpc[j];
            lpc[j] += r * lpc[i - 1 - j];
            lpc[i - 1 - j] += r * tmp;
            j += 1;
        }

        if i & 1 == 1 {
            lpc[j] += lpc[j] * r;
        }

        err *= 1.0 - r * r;

        if !err.is_finite() {
            break;
        }

        result.coeffs.push(lpc[..=i].iter().map(|c| -c).collect());
        result.errors.push(err);

        // A perfect predictor was found.
        if err == 0.0 {
            break;
        }
    }

    result
}

/// Quantizes the predictor coefficients `lp` into `qlp` using at most `precision` bits per
/// coefficient, including the sign bit. Returns the shift that must be applied to predictions
/// made with the quantized coefficients.
///
/// Rounding error is carried from one coefficient into the next.
pub fn quantize_coefficients(
    lp: &[f64],
    precision: u32,
    qlp: &mut [i32],
) -> Result<u32, QuantizeError> {
    debug_assert!(precision > 1 && precision <= MAX_QLP_COEFF_PRECISION);
    debug_assert_eq!(lp.len(), qlp.len());

    // Drop one bit for the sign.
    let precision = precision - 1;

    let qmax = (1i32 << precision) - 1;
    let qmin = -(1i32 << precision);

    let cmax = lp.iter().fold(0.0f64, |max, c| max.max(c.abs()));

    if cmax.is_nan() || cmax <= 0.0 {
        return Err(QuantizeError::ZeroCoefficients);
    }

    // The binary exponent of the largest coefficient, floor(log2(cmax)).
    let log2cmax = ((cmax.to_bits() >> 52) & 0x7ff) as i32 - 1023;

    let shift = (precision as i32 - log2cmax - 1).min(MAX_QLP_SHIFT);

    if shift < MIN_QLP_SHIFT {
        return Err(QuantizeError::CoefficientOverflow);
    }

    // A negative shift cannot be coded, so the coefficients are scaled down instead.
    let scale = if shift >= 0 { f64::from(1u32 << shift) } else { 1.0 / f64::from(1u32 << -shift) };

    let mut error = 0.0;

    for (q, &c) in qlp.iter_mut().zip(lp) {
        error += c * scale;

        let rounded = (error.round() as i32).clamp(qmin, qmax);

        error -= f64::from(rounded);
        *q = rounded;
    }

    Ok(shift.max(0) as u32)
}

/// Gets the prediction of a predictor with quantized coefficients `qlp` for the sample following
/// `history`. `qlp[0]` applies to the last sample of `history`.
#[inline(always)]
fn predict(qlp: &[i32], shift: u32, history: &[i64]) -> i64 {
    let sum = qlp
        .iter()
        .zip(history.iter().rev())
        .fold(0i64, |sum, (&c, &s)| sum.wrapping_add(i64::from(c).wrapping_mul(s)));

    sum >> shift
}

/// Computes the residual of `samples` for the quantized predictor `qlp`. Returns `None` if any
/// residual does not fit in a 32-bit signed integer.
pub fn lpc_residual(samples: &[i64], qlp: &[i32], shift: u32) -> Option<Vec<i32>> {
    let order = qlp.len();

    let mut residuals = Vec::with_capacity(samples.len().saturating_sub(order));

    for i in order..samples.len() {
        let residual = samples[i].wrapping_sub(predict(qlp, shift, &samples[i - order..i]));
        residuals.push(i32::try_from(residual).ok()?);
    }

    Some(residuals)
}

/// Restores the samples of `buf` in-place using the predictor with coefficients `qlp`. The first
/// `qlp.len()` samples of `buf` are warm-up samples, and the remainder are residuals.
///
/// Coefficients are in coding order, `qlp[0]` applies to the previous sample.
pub fn lpc_predict_dispatch(qlp: &[i32], shift: u32, buf: &mut [i64]) {
    let order = qlp.len();

    debug_assert!(order > 0 && order <= MAX_LPC_ORDER as usize);

    // Store the coefficients in reverse order such that the first coefficient is at index 31.
    let mut coeffs = [0i32; 32];

    for (c, &q) in coeffs.iter_mut().rev().zip(qlp) {
        *c = q;
    }

    // Helper function to dispatch to a predictor with a maximum order of N.
    #[inline(always)]
    fn lpc<const N: usize>(order: usize, coeffs: &[i32; 32], shift: u32, buf: &mut [i64]) {
        // The slice is exactly N long, so the conversion cannot fail.
        if let Ok(coeffs_n) = (&coeffs[32 - N..32]).try_into() {
            lpc_predict::<N>(order, coeffs_n, shift, buf);
        }
    }

    // Pick the best length linear predictor to use based on the order. Most FLAC streams use
    // the subset format and have an order <= 12. Therefore, for orders <= 12, dispatch to
    // predictors that roughly match the order. If a predictor is too long for a given order,
    // then there will be wasted computations. On the other hand, it is not worth the code bloat
    // to specialize for every order <= 12.
    match order {
        0..=4 => lpc::<4>(order, &coeffs, shift, buf),
        5..=6 => lpc::<6>(order, &coeffs, shift, buf),
        7..=8 => lpc::<8>(order, &coeffs, shift, buf),
        9..=10 => lpc::<10>(order, &coeffs, shift, buf),
        11..=12 => lpc::<12>(order, &coeffs, shift, buf),
        _ => lpc::<32>(order, &coeffs, shift, buf),
    };
}

/// Generalized Linear Predictive Coding (LPC) decoder. The exact number of coefficients given is
/// specified by `order`. Coefficients must be stored in reverse order in `coeffs` with the first
/// coefficient at index N-1. Coefficients at indices less than N - `order` must be 0.
/// It is expected that the first `order` samples in `buf` are warm-up samples.
fn lpc_predict<const N: usize>(order: usize, coeffs: &[i32; N], coeff_shift: u32, buf: &mut [i64]) {
    // Order must be less than or equal to the number of coefficients.
    debug_assert!(order <= coeffs.len());

    // Order must be less than to equal to the number of samples the buffer can hold.
    debug_assert!(order <= buf.len());

    // The main, efficient, predictor loop needs N previous samples to run. Since order <= N,
    // calculate enough samples to reach N.
    let n_prefill = N.min(buf.len()) - order;

    for i in order..order + n_prefill {
        let predicted = coeffs[N - order..N]
            .iter()
            .zip(&buf[i - order..i])
            .fold(0i64, |sum, (&c, &s)| sum.wrapping_add(i64::from(c).wrapping_mul(s)));

        buf[i] = buf[i].wrapping_add(predicted >> coeff_shift);
    }

    // If the pre-fill operation filled the entire sample buffer, return immediately.
    if buf.len() <= N {
        return;
    }

    // Main predictor loop. Calculate each sample by applying what is essentially an IIR filter.
    for i in N..buf.len() {
        let predicted = coeffs
            .iter()
            .zip(&buf[i - N..i])
            .fold(0i64, |sum, (&c, &s)| sum.wrapping_add(i64::from(c).wrapping_mul(s)));

        buf[i] = buf[i].wrapping_add(predicted >> coeff_shift);
    }
}

/// Gets the expected number of bits per residual sample for a predictor with prediction error
/// `lpc_error` over `n_samples` samples.
pub fn expected_bits_per_residual_sample(lpc_error: f64, n_samples: usize) -> f64 {
    if lpc_error > 0.0 {
        let bps = 0.5 * (0.5 / n_samples as f64 * lpc_error).log2();
        bps.max(0.0)
    }
    else if lpc_error < 0.0 {
        // Error should not be negative but can happen due to inadequate floating-point resolution.
        1e32
    }
    else {
        0.0
    }
}

/// Estimates the best predictor order given the prediction error of each order. Every order costs
/// `overhead_bits_per_order` bits in addition to its expected residual bits.
pub fn compute_best_order(errors: &[f64], n_samples: usize, overhead_bits_per_order: u32) -> u32 {
    let mut best_order = 1;
    let mut best_bits = f64::MAX;

    for (i, &error) in errors.iter().enumerate() {
        let order = i + 1;

        let bits = expected_bits_per_residual_sample(error, n_samples)
            * n_samples.saturating_sub(order) as f64
            + (order as f64) * f64::from(overhead_bits_per_order);

        if bits < best_bits {
            best_bits = bits;
            best_order = order as u32;
        }
    }

    best_order
}

/// Gets the quantized coefficient precision to use when none is configured.
pub fn auto_qlp_coeff_precision(bits_per_sample: u32, block_len: usize) -> u32 {
    if bits_per_sample < 16 {
        (2 + bits_per_sample / 2).max(MIN_QLP_COEFF_PRECISION)
    }
    else if bits_per_sample == 16 {
        match block_len {
            0..=192 => 7,
            193..=384 => 8,
            385..=576 => 9,
            577..=1152 => 10,
            1153..=2304 => 11,
            2305..=4608 => 12,
            _ => 13,
        }
    }
    else {
        match block_len {
            0..=384 => 13,
            385..=1152 => 14,
            _ => 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_autocorrelation() {
        let mut autoc = [0.0; 4];
        compute_autocorrelation(&[1.0, 2.0, 3.0], &mut autoc);
        assert_eq!(autoc, [14.0, 8.0, 3.0, 0.0]);
    }

    #[test]
    fn verify_levinson_durbin_first_order() {
        // For a first order predictor, the coefficient is autoc[1] / autoc[0].
        let lp = compute_lp_coefficients(&[4.0, 2.0, 1.0], 2);

        assert_eq!(lp.max_order(), 2);
        assert!((lp.coeffs[0][0] - 0.5).abs() < 1e-12);
        assert!((lp.errors[0] - 3.0).abs() < 1e-12);

        // An exponentially decaying autocorrelation is perfectly modelled by the first order, so
        // the second order coefficient vanishes.
        assert!((lp.coeffs[1][0] - 0.5).abs() < 1e-12);
        assert!(lp.coeffs[1][1].abs() < 1e-12);
    }

    #[test]
    fn verify_levinson_durbin_silence() {
        let lp = compute_lp_coefficients(&[0.0; 9], 8);
        assert_eq!(lp.max_order(), 0);
    }

    #[test]
    fn verify_quantize_coefficients() {
        let mut qlp = [0; 2];

        // The largest coefficient, 1.5, has a binary exponent of 0. With 8 bits of precision
        // (7 bits of magnitude) the shift is 7 - 0 - 1 = 6.
        let shift = quantize_coefficients(&[1.5, -0.75], 8, &mut qlp).unwrap();
        assert_eq!(shift, 6);
        assert_eq!(qlp, [96, -48]);

        assert_eq!(
            quantize_coefficients(&[0.0, 0.0], 8, &mut qlp),
            Err(QuantizeError::ZeroCoefficients)
        );

        // Enormous coefficients require a shift below the minimum.
        assert_eq!(
            quantize_coefficients(&[1e9, 0.0], 5, &mut qlp),
            Err(QuantizeError::CoefficientOverflow)
        );

        // Large coefficients are scaled down, and the shift becomes 0.
        let shift = quantize_coefficients(&[1000.0, 0.0], 8, &mut qlp).unwrap();
        assert_eq!(shift, 0);
        assert_eq!(qlp, [125, 0]);
    }

    #[test]
    fn verify_lpc_predict_restores_residual() {
        let samples: Vec<i64> =
            (0..300).map(|i| ((i as f64 * 0.05).sin() * 20000.0) as i64 + (i % 3)).collect();

        for order in [1usize, 2, 5, 8, 12, 17, 32] {
            let qlp: Vec<i32> =
                (0..order).map(|j| if j == 0 { 900 } else { -(j as i32) * 7 }).collect();

            let residuals = lpc_residual(&samples, &qlp, 9).unwrap();

            let mut buf = samples[..order].to_vec();
            buf.extend(residuals.iter().map(|&r| i64::from(r)));

            lpc_predict_dispatch(&qlp, 9, &mut buf);
            assert_eq!(buf, samples);
        }
    }

    #[test]
    fn verify_compute_best_order() {
        // The error stops improving after the second order.
        let errors = [1e9, 1e6, 9.99e5, 9.98e5];
        assert_eq!(compute_best_order(&errors, 4096, 16 + 12), 2);

        assert_eq!(expected_bits_per_residual_sample(0.0, 4096), 0.0);
        assert_eq!(expected_bits_per_residual_sample(-1.0, 4096), 1e32);
    }

    #[test]
    fn verify_auto_qlp_coeff_precision() {
        assert_eq!(auto_qlp_coeff_precision(8, 4096), 6);
        assert_eq!(auto_qlp_coeff_precision(4, 4096), 5);
        assert_eq!(auto_qlp_coeff_precision(16, 192), 7);
        assert_eq!(auto_qlp_coeff_precision(16, 4096), 12);
        assert_eq!(auto_qlp_coeff_precision(16, 8192), 13);
        assert_eq!(auto_qlp_coeff_precision(24, 4096), 15);
        assert_eq!(auto_qlp_coeff_precision(24, 1152), 14);
    }
}
