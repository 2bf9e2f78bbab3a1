// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed polynomial predictors of order 0 through 4.

/// The largest fixed predictor order.
pub const MAX_FIXED_ORDER: u32 = 4;

/// Gets the prediction of a fixed predictor of order `order` for the sample following `history`.
/// The last `order` samples of `history` are used.
#[inline(always)]
fn predict(order: u32, history: &[i64]) -> i64 {
    let n = history.len();

    match order {
        // A 0th order predictor always predicts 0.
        0 => 0,
        // A 1st order predictor always returns the previous sample since the polynomial is:
        // s(i) = 1*s(i-1).
        1 => history[n - 1],
        // A 2nd order predictor uses the polynomial: s(i) = 2*s(i-1) - 1*s(i-2).
        2 => history[n - 1].wrapping_mul(2).wrapping_sub(history[n - 2]),
        // A 3rd order predictor uses the polynomial: s(i) = 3*s(i-1) - 3*s(i-2) + 1*s(i-3).
        3 => history[n - 1]
            .wrapping_sub(history[n - 2])
            .wrapping_mul(3)
            .wrapping_add(history[n - 3]),
        // A 4th order predictor uses the polynomial:
        // s(i) = 4*s(i-1) - 6*s(i-2) + 4*s(i-3) - 1*s(i-4).
        4 => history[n - 1]
            .wrapping_add(history[n - 3])
            .wrapping_mul(4)
            .wrapping_sub(history[n - 2].wrapping_mul(6))
            .wrapping_sub(history[n - 4]),
        _ => unreachable!(),
    }
}

/// Restores the samples of `buf` in-place. The first `order` samples of `buf` are warm-up samples,
/// and the remainder are residuals.
pub fn fixed_predict(order: u32, buf: &mut [i64]) {
    debug_assert!(order <= MAX_FIXED_ORDER);

    // A 0th order predictor adds nothing to any of the samples.
    if order == 0 {
        return;
    }

    for i in order as usize..buf.len() {
        buf[i] = buf[i].wrapping_add(predict(order, &buf[..i]));
    }
}

/// Computes the residual of `samples` for a fixed predictor of order `order`. Returns `None` if
/// any residual does not fit in a 32-bit signed integer.
pub fn fixed_residual(order: u32, samples: &[i64]) -> Option<Vec<i32>> {
    debug_assert!(order <= MAX_FIXED_ORDER);

    let order = order as usize;

    let mut residuals = Vec::with_capacity(samples.len().saturating_sub(order));

    for i in order..samples.len() {
        let residual = samples[i].wrapping_sub(predict(order as u32, &samples[..i]));
        residuals.push(i32::try_from(residual).ok()?);
    }

    Some(residuals)
}

/// Estimates the best fixed predictor order for `samples` by comparing the sum of absolute
/// residuals of each order up-to `max_order`. Also returns the sum of absolute residuals of the
/// chosen order.
pub fn best_fixed_order(samples: &[i64], max_order: u32) -> (u32, u64) {
    let max_order = max_order.min(MAX_FIXED_ORDER) as usize;

    let mut sums = [0u64; MAX_FIXED_ORDER as usize + 1];

    // Every order is evaluated over the same range so the sums are comparable.
    for i in max_order..samples.len() {
        for (order, sum) in sums.iter_mut().enumerate().take(max_order + 1) {
            let error = samples[i].wrapping_sub(predict(order as u32, &samples[..i]));
            *sum = sum.saturating_add(error.unsigned_abs());
        }
    }

    let mut best = 0;

    for order in 1..=max_order {
        if sums[order] < sums[best] {
            best = order;
        }
    }

    (best as u32, sums[best])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_fixed_predict_restores_residual() {
        let samples: Vec<i64> = (0..64).map(|i| (i * i * 3 - 40 * i + 7) % 1000).collect();

        for order in 0..=MAX_FIXED_ORDER {
            let residuals = fixed_residual(order, &samples).unwrap();

            let mut buf = samples[..order as usize].to_vec();
            buf.extend(residuals.iter().map(|&r| i64::from(r)));

            fixed_predict(order, &mut buf);
            assert_eq!(buf, samples);
        }
    }

    #[test]
    fn verify_fixed_residual_of_polynomials() {
        // A quadratic is perfectly predicted by the 3rd order predictor.
        let samples: Vec<i64> = (0..32).map(|i| 2 * i * i + 3 * i - 5).collect();
        assert!(fixed_residual(3, &samples).unwrap().iter().all(|&r| r == 0));

        // A cubic is perfectly predicted by the 4th order predictor.
        let samples: Vec<i64> = (0..32).map(|i| i * i * i - 7 * i).collect();
        assert!(fixed_residual(4, &samples).unwrap().iter().all(|&r| r == 0));
    }

    #[test]
    fn verify_fixed_residual_overflow() {
        let samples = [i64::from(i32::MIN), i64::from(i32::MAX)];
        assert_eq!(fixed_residual(0, &samples), Some(vec![i32::MIN, i32::MAX]));
        assert_eq!(fixed_residual(1, &samples), None);
    }

    #[test]
    fn verify_best_fixed_order() {
        // A straight line favours the 2nd order predictor since it is predicted perfectly.
        let samples: Vec<i64> = (0..256).map(|i| 100 + 7 * i).collect();
        assert_eq!(best_fixed_order(&samples, 4), (2, 0));

        // Alternating samples are best left unpredicted.
        let samples: Vec<i64> = (0..256).map(|i| if i % 2 == 0 { 50 } else { -50 }).collect();
        assert_eq!(best_fixed_order(&samples, 4).0, 0);

        // A cubic is predicted perfectly by the 4th order predictor only.
        let samples: Vec<i64> = (0..256).map(|i| i * i * i).collect();
        assert_eq!(best_fixed_order(&samples, 4), (4, 0));
        assert_eq!(best_fixed_order(&samples, 3).0, 3);
    }
}
