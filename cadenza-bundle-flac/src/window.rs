// Cadenza
// Copyright (c) 2019-2024 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Apodization windows applied to a block before linear prediction analysis.

use std::f64::consts::PI;

/// The maximum number of windows an apodization string may expand into.
pub const MAX_APODIZATIONS: usize = 32;

/// Window types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Apodization {
    Bartlett,
    BartlettHann,
    Blackman,
    BlackmanHarris4Term92Db,
    Connes,
    Flattop,
    /// Gaussian window with the given standard deviation, `0 < stddev <= 0.5`.
    Gauss(f64),
    Hamming,
    Hann,
    KaiserBessel,
    Nuttall,
    Rectangle,
    Triangle,
    /// Tukey window with the given tapered fraction, `0 <= p <= 1`.
    Tukey(f64),
    /// A Tukey window covering only the part of the block between `start` and `end`, given as
    /// fractions of the block length. The rest of the block is zeroed.
    PartialTukey { p: f64, start: f64, end: f64 },
    /// The complement of a partial Tukey window: the part of the block between `start` and `end` is
    /// zeroed, and the parts before and after are Tukey windows.
    PunchoutTukey { p: f64, start: f64, end: f64 },
    Welch,
}

/// Windows that take no parameters, by name.
static PLAIN_WINDOWS: [(&str, Apodization); 13] = [
    ("bartlett", Apodization::Bartlett),
    ("bartlett_hann", Apodization::BartlettHann),
    ("blackman", Apodization::Blackman),
    ("blackman_harris_4term_92db", Apodization::BlackmanHarris4Term92Db),
    ("connes", Apodization::Connes),
    ("flattop", Apodization::Flattop),
    ("hamming", Apodization::Hamming),
    ("hann", Apodization::Hann),
    ("kaiser_bessel", Apodization::KaiserBessel),
    ("nuttall", Apodization::Nuttall),
    ("rectangle", Apodization::Rectangle),
    ("triangle", Apodization::Triangle),
    ("welch", Apodization::Welch),
];

/// Splits `spec` of the form `name(args)` into `name` and `args`.
fn split_call(spec: &str) -> Option<(&str, &str)> {
    let (name, rest) = spec.split_once('(')?;
    let args = rest.strip_suffix(')')?;
    Some((name, args))
}

fn parse_number(arg: &str) -> Result<f64, &'static str> {
    match arg.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err("apodization parameter is not a number"),
    }
}

/// Parses the arguments of a `partial_tukey` or `punchout_tukey` window of the form
/// `n[/overlap[/p]]` into the number of parts, the overlap, and the Tukey parameter.
fn parse_multiple_tukey_args(
    args: &str,
    default_overlap: f64,
) -> Result<(u32, f64, f64), &'static str> {
    let mut parts = args.split('/');

    let n = parse_number(parts.next().unwrap_or(""))?;

    let overlap = match parts.next() {
        Some(arg) => parse_number(arg)?.min(0.99),
        None => default_overlap,
    };

    let p = match parts.next() {
        Some(arg) => parse_number(arg)?,
        None => 0.2,
    };

    if parts.next().is_some() {
        return Err("too many apodization parameters");
    }

    Ok((n.max(0.0) as u32, overlap, p))
}

/// Parses an apodization specification: a `;` separated list of window names, some of which take
/// parameters in parenthesis. For example, `tukey(0.5);partial_tukey(2);punchout_tukey(3)`.
///
/// A `partial_tukey` or `punchout_tukey` window of `n > 1` parts expands into `n` windows.
pub fn parse_apodization(spec: &str) -> Result<Vec<Apodization>, &'static str> {
    let mut windows = Vec::new();

    for item in spec.split(';').map(str::trim).filter(|item| !item.is_empty()) {
        if let Some((_, window)) = PLAIN_WINDOWS.iter().find(|(name, _)| *name == item) {
            windows.push(*window);
            continue;
        }

        let (name, args) = match split_call(item) {
            Some(call) => call,
            None => return Err("unknown apodization window"),
        };

        match name {
            "tukey" => {
                let p = parse_number(args)?;

                if !(0.0..=1.0).contains(&p) {
                    return Err("tukey parameter must be between 0 and 1");
                }

                windows.push(Apodization::Tukey(p));
            }
            "gauss" => {
                let stddev = parse_number(args)?;

                if stddev <= 0.0 || stddev > 0.5 {
                    return Err("gauss parameter must be greater than 0 and at most 0.5");
                }

                windows.push(Apodization::Gauss(stddev));
            }
            "partial_tukey" | "punchout_tukey" => {
                let is_partial = name == "partial_tukey";

                let (n, overlap, p) =
                    parse_multiple_tukey_args(args, if is_partial { 0.1 } else { 0.2 })?;

                if n <= 1 {
                    windows.push(Apodization::Tukey(p));
                    continue;
                }

                let overlap_units = 1.0 / (1.0 - overlap) - 1.0;
                let total = f64::from(n) + overlap_units;

                for m in 0..n {
                    let start = f64::from(m) / total;
                    let end = (f64::from(m) + 1.0 + overlap_units) / total;

                    windows.push(if is_partial {
                        Apodization::PartialTukey { p, start, end }
                    }
                    else {
                        Apodization::PunchoutTukey { p, start, end }
                    });
                }
            }
            _ => return Err("unknown apodization window"),
        }

        if windows.len() > MAX_APODIZATIONS {
            return Err("too many apodization windows");
        }
    }

    if windows.is_empty() {
        return Err("no apodization windows");
    }

    Ok(windows)
}

/// Evaluates a raised cosine series `a0 - a1*cos(x) + a2*cos(2x) - a3*cos(3x) + a4*cos(4x)` with
/// `x = 2*pi*n/N` for every sample.
fn cosine_series(dst: &mut [f64], a: [f64; 5]) {
    let denom = (dst.len() - 1) as f64;

    for (n, w) in dst.iter_mut().enumerate() {
        let x = 2.0 * PI * n as f64 / denom;

        *w = a[0] - a[1] * x.cos() + a[2] * (2.0 * x).cos() - a[3] * (3.0 * x).cos()
            + a[4] * (4.0 * x).cos();
    }
}

/// The rising half of a Hann window with `np` steps, evaluated at step `i`.
#[inline(always)]
fn hann_step(i: i64, np: i64) -> f64 {
    0.5 - 0.5 * (PI * i as f64 / np as f64).cos()
}

fn tukey(dst: &mut [f64], p: f64) {
    if p <= 0.0 {
        dst.fill(1.0);
    }
    else if p >= 1.0 {
        cosine_series(dst, [0.5, 0.5, 0.0, 0.0, 0.0]);
    }
    else {
        let len = dst.len();
        let np = (p / 2.0 * len as f64) as usize;

        // Start with a rectangle, then replace the ends with the halves of a Hann window.
        dst.fill(1.0);

        if np > 1 {
            let np = np - 1;

            for n in 0..=np {
                dst[n] = hann_step(n as i64, np as i64);
                dst[len - np - 1 + n] = hann_step((n + np) as i64, np as i64);
            }
        }
    }
}

fn partial_tukey(dst: &mut [f64], p: f64, start: f64, end: f64) {
    let p = p.clamp(0.05, 0.95);

    let len = dst.len() as i64;
    let start_n = (start * len as f64) as i64;
    let end_n = (end * len as f64) as i64;
    let np = (p / 2.0 * (end_n - start_n) as f64) as i64;

    for (n, w) in dst.iter_mut().enumerate() {
        let n = n as i64;

        *w = if n < start_n {
            0.0
        }
        else if n < start_n + np {
            hann_step(n - start_n + 1, np)
        }
        else if n < end_n - np {
            1.0
        }
        else if n < end_n {
            hann_step(end_n - n, np)
        }
        else {
            0.0
        };
    }
}

fn punchout_tukey(dst: &mut [f64], p: f64, start: f64, end: f64) {
    let p = p.clamp(0.05, 0.95);

    let len = dst.len() as i64;
    let start_n = (start * len as f64) as i64;
    let end_n = (end * len as f64) as i64;
    let ns = (p / 2.0 * start_n as f64) as i64;
    let ne = (p / 2.0 * (len - end_n) as f64) as i64;

    for (n, w) in dst.iter_mut().enumerate() {
        let n = n as i64;

        *w = if n < ns {
            hann_step(n + 1, ns)
        }
        else if n < start_n - ns {
            1.0
        }
        else if n < start_n {
            hann_step(start_n - n, ns)
        }
        else if n < end_n {
            0.0
        }
        else if n < end_n + ne {
            hann_step(n - end_n + 1, ne)
        }
        else if n < len - ne {
            1.0
        }
        else {
            hann_step(len - n, ne)
        };
    }
}

impl Apodization {
    /// Calculates the window coefficients for a block of `dst.len()` samples.
    pub fn generate(&self, dst: &mut [f64]) {
        // Every window degenerates to a rectangle for blocks this short.
        if dst.len() < 2 {
            dst.fill(1.0);
            return;
        }

        let n_max = (dst.len() - 1) as f64;
        let half = n_max / 2.0;

        match *self {
            Apodization::Bartlett => {
                for (n, w) in dst.iter_mut().enumerate() {
                    *w = 1.0 - (2.0 * n as f64 / n_max - 1.0).abs();
                }
            }
            Apodization::BartlettHann => {
                for (n, w) in dst.iter_mut().enumerate() {
                    let x = n as f64 / n_max;
                    *w = 0.62 - 0.48 * (x - 0.5).abs() - 0.38 * (2.0 * PI * x).cos();
                }
            }
            Apodization::Blackman => cosine_series(dst, [0.42, 0.5, 0.08, 0.0, 0.0]),
            Apodization::BlackmanHarris4Term92Db => {
                cosine_series(dst, [0.35875, 0.48829, 0.14128, 0.01168, 0.0])
            }
            Apodization::Connes => {
                for (n, w) in dst.iter_mut().enumerate() {
                    let k = (n as f64 - half) / half;
                    let k = 1.0 - k * k;
                    *w = k * k;
                }
            }
            Apodization::Flattop => cosine_series(
                dst,
                [0.21557895, 0.41663158, 0.277263158, 0.083578947, 0.006947368],
            ),
            Apodization::Gauss(stddev) => {
                for (n, w) in dst.iter_mut().enumerate() {
                    let k = (n as f64 - half) / (stddev * half);
                    *w = (-0.5 * k * k).exp();
                }
            }
            Apodization::Hamming => cosine_series(dst, [0.54, 0.46, 0.0, 0.0, 0.0]),
            Apodization::Hann => cosine_series(dst, [0.5, 0.5, 0.0, 0.0, 0.0]),
            Apodization::KaiserBessel => cosine_series(dst, [0.402, 0.498, 0.098, 0.001, 0.0]),
            Apodization::Nuttall => {
                cosine_series(dst, [0.3635819, 0.4891775, 0.1365995, 0.0106411, 0.0])
            }
            Apodization::Rectangle => dst.fill(1.0),
            Apodization::Triangle => {
                let len = dst.len();
                let denom = len as f64 + 1.0;

                for (i, w) in dst.iter_mut().enumerate() {
                    let n = i + 1;

                    *w = if n <= (len + 1) / 2 {
                        2.0 * n as f64 / denom
                    }
                    else {
                        2.0 * (len - n + 1) as f64 / denom
                    };
                }
            }
            Apodization::Tukey(p) => tukey(dst, p),
            Apodization::PartialTukey { p, start, end } => partial_tukey(dst, p, start, end),
            Apodization::PunchoutTukey { p, start, end } => punchout_tukey(dst, p, start, end),
            Apodization::Welch => {
                for (n, w) in dst.iter_mut().enumerate() {
                    let k = (n as f64 - half) / half;
                    *w = 1.0 - k * k;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(window: Apodization, len: usize) -> Vec<f64> {
        let mut dst = vec![0.0; len];
        window.generate(&mut dst);
        dst
    }

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());

        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{} != {}", x, y);
        }
    }

    #[test]
    fn verify_parse_apodization() {
        assert_eq!(parse_apodization("tukey(5e-1)"), Ok(vec![Apodization::Tukey(0.5)]));
        assert_eq!(
            parse_apodization("hann; welch;gauss(0.25)"),
            Ok(vec![Apodization::Hann, Apodization::Welch, Apodization::Gauss(0.25)])
        );

        let windows = parse_apodization("tukey(5e-1);partial_tukey(2);punchout_tukey(3)").unwrap();
        assert_eq!(windows.len(), 6);
        assert!(matches!(windows[1], Apodization::PartialTukey { .. }));
        assert!(matches!(windows[5], Apodization::PunchoutTukey { .. }));

        // A single part degenerates to a plain Tukey window.
        assert_eq!(
            parse_apodization("partial_tukey(1/0.5/0.3)"),
            Ok(vec![Apodization::Tukey(0.3)])
        );

        assert!(parse_apodization("sine").is_err());
        assert!(parse_apodization("tukey(2)").is_err());
        assert!(parse_apodization("gauss(0.75)").is_err());
        assert!(parse_apodization("tukey(0.5").is_err());
        assert!(parse_apodization("").is_err());
        assert!(parse_apodization("partial_tukey(40)").is_err());
    }

    #[test]
    fn verify_partial_tukey_bounds() {
        // Two parts with 10% overlap.
        let windows = parse_apodization("partial_tukey(2)").unwrap();

        match windows[0] {
            Apodization::PartialTukey { p, start, end } => {
                assert_eq!(p, 0.2);
                assert_eq!(start, 0.0);
                assert!((end - (1.0 + 1.0 / 9.0) / (2.0 + 1.0 / 9.0)).abs() < 1e-9);
            }
            _ => panic!("expected a partial tukey window"),
        }
    }

    #[test]
    fn verify_simple_windows() {
        assert_close(&generate(Apodization::Rectangle, 4), &[1.0; 4]);
        assert_close(&generate(Apodization::Hann, 5), &[0.0, 0.5, 1.0, 0.5, 0.0]);
        assert_close(&generate(Apodization::Bartlett, 5), &[0.0, 0.5, 1.0, 0.5, 0.0]);
        assert_close(&generate(Apodization::Welch, 5), &[0.0, 0.75, 1.0, 0.75, 0.0]);
        assert_close(&generate(Apodization::Triangle, 3), &[0.5, 1.0, 0.5]);
        assert_close(&generate(Apodization::Hamming, 3), &[0.08, 1.0, 0.08]);

        // Windows are symmetric.
        for window in [Apodization::Blackman, Apodization::Nuttall, Apodization::Gauss(0.4)] {
            let w = generate(window, 64);

            for n in 0..32 {
                assert!((w[n] - w[63 - n]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn verify_tukey_window() {
        assert_eq!(generate(Apodization::Tukey(0.0), 16), generate(Apodization::Rectangle, 16));
        assert_close(&generate(Apodization::Tukey(1.0), 16), &generate(Apodization::Hann, 16));

        let w = generate(Apodization::Tukey(0.5), 64);

        // The tapers are 16 samples long, the middle is flat.
        assert_eq!(w[0], 0.0);
        assert_eq!(w[63], 0.0);
        assert!(w[16..48].iter().all(|&x| x == 1.0));
        assert!(w[1] > 0.0 && w[1] < 1.0);
    }

    #[test]
    fn verify_partial_and_punchout_tukey() {
        let w = generate(Apodization::PartialTukey { p: 0.2, start: 0.5, end: 1.0 }, 64);
        assert!(w[..32].iter().all(|&x| x == 0.0));
        assert!(w[40..58].iter().all(|&x| x == 1.0));

        let w = generate(Apodization::PunchoutTukey { p: 0.2, start: 0.25, end: 0.5 }, 64);
        assert!(w[16..32].iter().all(|&x| x == 0.0));
        assert!(w[4..12].iter().all(|&x| x == 1.0));
        assert!(w[40..60].iter().all(|&x| x == 1.0));
    }
}
