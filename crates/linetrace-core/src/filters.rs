//! Numeric helpers
//!
//! Interpolation, smoothing and order statistics shared by the pipeline stages.
//! Semantics follow the usual array-library conventions: clamped linear
//! interpolation, Gaussian filters with a 4-sigma kernel, and polynomial-fit edges for
//! Savitzky-Golay derivatives.

use nalgebra::DMatrix;

/// Boundary handling for 1-D filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryMode {
    /// Half-sample symmetric reflection: `d c b a | a b c d | d c b a`
    Reflect,
    /// Periodic extension for closed loops
    Wrap,
}

/// `n` evenly spaced values from `start` to `end` inclusive
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Arithmetic mean, NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance, NaN for an empty slice
pub fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    if m.is_nan() {
        return f64::NAN;
    }
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator), NaN below two values
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Median of the values, NaN for an empty slice
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Percentile `q` in [0, 100] with linear interpolation between ranks
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Index pair bracketing `x` in non-decreasing `xp`: `(lo, hi)` with
/// `xp[lo] <= x < xp[hi]`, or `None` when `x` is outside the range
fn bracket(x: f64, xp: &[f64]) -> Option<(usize, usize)> {
    let upper = xp.partition_point(|&v| v <= x);
    if upper == 0 || upper == xp.len() {
        None
    } else {
        Some((upper - 1, upper))
    }
}

fn lerp(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    let span = x1 - x0;
    if span == 0.0 {
        y0
    } else {
        y0 + (y1 - y0) * (x - x0) / span
    }
}

/// Linear interpolation over non-decreasing `xp`, holding the edge values outside
/// the sample range
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    if xp.is_empty() {
        return f64::NAN;
    }
    match bracket(x, xp) {
        Some((lo, hi)) => lerp(x, xp[lo], xp[hi], fp[lo], fp[hi]),
        None if x < xp[0] => fp[0],
        None => fp[fp.len() - 1],
    }
}

/// Linear interpolation that continues the first and last segments outside the
/// sample range
pub fn interp_extrapolate(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len();
    if n < 2 {
        return fp.first().copied().unwrap_or(f64::NAN);
    }
    if x < xp[0] {
        return lerp(x, xp[0], xp[1], fp[0], fp[1]);
    }
    if x > xp[n - 1] {
        return lerp(x, xp[n - 2], xp[n - 1], fp[n - 2], fp[n - 1]);
    }
    match bracket(x, xp) {
        Some((lo, hi)) => lerp(x, xp[lo], xp[hi], fp[lo], fp[hi]),
        None => fp[n - 1],
    }
}

/// Value of the sample nearest to `x`; ties go to the earlier sample and the
/// edges clamp
pub fn interp_nearest(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    if xp.is_empty() {
        return f64::NAN;
    }
    match bracket(x, xp) {
        Some((lo, hi)) => {
            if x - xp[lo] <= xp[hi] - x {
                fp[lo]
            } else {
                fp[hi]
            }
        }
        None if x < xp[0] => fp[0],
        None => fp[fp.len() - 1],
    }
}

/// Sort `(x, y)` pairs by x and keep the first pair of each distinct x
pub fn unique_by_x(xs: &[f64], ys: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut order: Vec<usize> = (0..xs.len()).collect();
    order.sort_by(|&a, &b| xs[a].total_cmp(&xs[b]));
    let mut ux = Vec::with_capacity(xs.len());
    let mut uy = Vec::with_capacity(xs.len());
    for i in order {
        if ux.last().map_or(true, |&last: &f64| xs[i] > last) {
            ux.push(xs[i]);
            uy.push(ys[i]);
        }
    }
    (ux, uy)
}

/// Cumulative sum of consecutive Euclidean steps, starting at 0
pub fn cumulative_distance(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(xs.len());
    let mut acc = 0.0;
    for i in 0..xs.len() {
        if i > 0 {
            acc += (xs[i] - xs[i - 1]).hypot(ys[i] - ys[i - 1]);
        }
        out.push(acc);
    }
    out
}

fn boundary_index(i: isize, n: usize, mode: BoundaryMode) -> usize {
    let n_i = n as isize;
    match mode {
        BoundaryMode::Wrap => i.rem_euclid(n_i) as usize,
        BoundaryMode::Reflect => {
            let period = 2 * n_i;
            let m = i.rem_euclid(period);
            if m >= n_i {
                (period - 1 - m) as usize
            } else {
                m as usize
            }
        }
    }
}

/// 1-D Gaussian smoothing with a kernel truncated at 4 sigma
pub fn gaussian_filter1d(data: &[f64], sigma: f64, mode: BoundaryMode) -> Vec<f64> {
    let n = data.len();
    if n == 0 || sigma <= 0.0 {
        return data.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= total;
    }

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * data[boundary_index(i + k as isize - radius, n, mode)])
                .sum()
        })
        .collect()
}

fn falling_factorial(j: usize, d: usize) -> f64 {
    ((j + 1 - d)..=j).map(|v| v as f64).product()
}

fn poly_derivative(coeffs: &[f64], deriv: usize, t: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .skip(deriv)
        .map(|(j, c)| c * falling_factorial(j, deriv) * t.powi((j - deriv) as i32))
        .sum()
}

/// Savitzky-Golay derivative of order `deriv` for samples spaced `delta` apart.
///
/// Interior points use the least-squares convolution weights; the first and last
/// half-windows evaluate the polynomial fitted to the edge window. A window longer
/// than the data shrinks to the largest odd length that fits; when no window above
/// the polynomial degree fits, the result is all zeros.
pub fn savgol_filter(
    data: &[f64],
    window: usize,
    degree: usize,
    deriv: usize,
    delta: f64,
) -> Vec<f64> {
    let n = data.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    if window <= degree || deriv > degree {
        return vec![0.0; n];
    }

    // polynomial in u = t / half, u in [-1, 1]
    let half = window / 2;
    let span = half.max(1) as f64;
    let design = DMatrix::from_fn(window, degree + 1, |r, c| {
        ((r as f64 - half as f64) / span).powi(c as i32)
    });
    let gram = design.transpose() * &design;
    let projector = match gram.try_inverse() {
        Some(inv) => inv * design.transpose(),
        None => return vec![0.0; n],
    };

    let step = if delta == 0.0 { 1.0 } else { delta };
    let scale = (step * span).powi(deriv as i32);
    let fit = |start: usize| -> Vec<f64> {
        (0..=degree)
            .map(|j| {
                (0..window)
                    .map(|k| projector[(j, k)] * data[start + k])
                    .sum()
            })
            .collect()
    };

    let mut out = vec![0.0; n];
    let centre_weights: Vec<f64> = (0..window)
        .map(|k| projector[(deriv, k)] * falling_factorial(deriv, deriv))
        .collect();
    for i in half..n - half {
        let acc: f64 = centre_weights
            .iter()
            .enumerate()
            .map(|(k, w)| w * data[i - half + k])
            .sum();
        out[i] = acc / scale;
    }

    let head = fit(0);
    for (i, slot) in out.iter_mut().enumerate().take(half) {
        let u = (i as f64 - half as f64) / span;
        *slot = poly_derivative(&head, deriv, u) / scale;
    }
    let tail_start = n - window;
    let tail = fit(tail_start);
    for i in (n - half)..n {
        let u = ((i - tail_start) as f64 - half as f64) / span;
        out[i] = poly_derivative(&tail, deriv, u) / scale;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace_endpoints() {
        let v = linspace(0.0, 1.0, 5);
        assert_eq!(v, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_median_and_percentile() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
        assert!((percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 95.0) - 4.8).abs() < 1e-12);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
    }

    #[test]
    fn test_sample_std() {
        let s = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s - 2.138_089_935).abs() < 1e-6);
        assert!(sample_std(&[1.0]).is_nan());
    }

    #[test]
    fn test_interp_clamps() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 40.0];
        assert_eq!(interp(-1.0, &xp, &fp), 0.0);
        assert_eq!(interp(0.5, &xp, &fp), 5.0);
        assert_eq!(interp(1.5, &xp, &fp), 25.0);
        assert_eq!(interp(3.0, &xp, &fp), 40.0);
    }

    #[test]
    fn test_interp_duplicate_x() {
        let xp = [0.0, 1.0, 1.0, 2.0];
        let fp = [0.0, 1.0, 5.0, 6.0];
        assert_eq!(interp(1.5, &xp, &fp), 5.5);
    }

    #[test]
    fn test_interp_extrapolate() {
        let xp = [1.0, 2.0, 3.0];
        let fp = [10.0, 20.0, 30.0];
        assert_eq!(interp_extrapolate(0.0, &xp, &fp), 0.0);
        assert_eq!(interp_extrapolate(4.0, &xp, &fp), 40.0);
        assert_eq!(interp_extrapolate(2.0, &xp, &fp), 20.0);
    }

    #[test]
    fn test_interp_nearest() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [5.0, 6.0, 7.0];
        assert_eq!(interp_nearest(0.4, &xp, &fp), 5.0);
        assert_eq!(interp_nearest(0.6, &xp, &fp), 6.0);
        assert_eq!(interp_nearest(-3.0, &xp, &fp), 5.0);
        assert_eq!(interp_nearest(9.0, &xp, &fp), 7.0);
    }

    #[test]
    fn test_unique_by_x_keeps_first() {
        let (x, y) = unique_by_x(&[2.0, 1.0, 1.0, 3.0], &[20.0, 10.0, 11.0, 30.0]);
        assert_eq!(x, vec![1.0, 2.0, 3.0]);
        assert_eq!(y, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_gaussian_preserves_constant() {
        let data = vec![3.0; 20];
        for mode in [BoundaryMode::Reflect, BoundaryMode::Wrap] {
            for v in gaussian_filter1d(&data, 2.0, mode) {
                assert!((v - 3.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_gaussian_wrap_is_periodic() {
        let mut data = vec![0.0; 10];
        data[0] = 1.0;
        let out = gaussian_filter1d(&data, 1.0, BoundaryMode::Wrap);
        assert!((out[1] - out[9]).abs() < 1e-12);
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(boundary_index(-1, 4, BoundaryMode::Reflect), 0);
        assert_eq!(boundary_index(-2, 4, BoundaryMode::Reflect), 1);
        assert_eq!(boundary_index(4, 4, BoundaryMode::Reflect), 3);
        assert_eq!(boundary_index(5, 4, BoundaryMode::Reflect), 2);
        assert_eq!(boundary_index(-1, 4, BoundaryMode::Wrap), 3);
    }

    #[test]
    fn test_savgol_derivatives_of_cubic() {
        let delta = 0.5;
        let xs: Vec<f64> = (0..60).map(|i| i as f64 * delta).collect();
        let ys: Vec<f64> = xs.iter().map(|x| x * x * x - 2.0 * x).collect();
        let d1 = savgol_filter(&ys, 11, 3, 1, delta);
        let d2 = savgol_filter(&ys, 11, 3, 2, delta);
        for (i, x) in xs.iter().enumerate() {
            assert!((d1[i] - (3.0 * x * x - 2.0)).abs() < 1e-6, "d1 mismatch at {}", i);
            assert!((d2[i] - 6.0 * x).abs() < 1e-6, "d2 mismatch at {}", i);
        }
    }

    #[test]
    fn test_savgol_short_input() {
        assert_eq!(savgol_filter(&[1.0, 2.0], 101, 3, 1, 1.0), vec![0.0, 0.0]);
        let d1 = savgol_filter(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], 101, 3, 1, 1.0);
        for v in d1 {
            assert!((v - 1.0).abs() < 1e-9);
        }
    }
}
