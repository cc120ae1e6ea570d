//! Curvature of the canonical line

use crate::config::CanonicalConfig;
use crate::filters::{gaussian_filter1d, mean, savgol_filter, BoundaryMode};

/// Unsigned curvature (1/m) of a densely sampled line.
///
/// Derivatives come from Savitzky-Golay fits over arc length; non-finite values are
/// zeroed before Gaussian smoothing.
pub fn curvature(x: &[f64], y: &[f64], dist: &[f64], config: &CanonicalConfig) -> Vec<f64> {
    if x.len() < 3 {
        return vec![0.0; x.len()];
    }
    let steps: Vec<f64> = dist.windows(2).map(|w| w[1] - w[0]).collect();
    let ds = mean(&steps);
    let delta = if ds.is_finite() && ds > 0.0 { ds } else { 1.0 };

    let (w, p) = (config.savgol_window, config.savgol_degree);
    let dx = savgol_filter(x, w, p, 1, delta);
    let dy = savgol_filter(y, w, p, 1, delta);
    let ddx = savgol_filter(x, w, p, 2, delta);
    let ddy = savgol_filter(y, w, p, 2, delta);

    let raw: Vec<f64> = (0..x.len())
        .map(|i| {
            let k = (dx[i] * ddy[i] - dy[i] * ddx[i]).abs()
                / (dx[i] * dx[i] + dy[i] * dy[i]).powf(1.5);
            if k.is_finite() {
                k
            } else {
                0.0
            }
        })
        .collect();
    gaussian_filter1d(&raw, config.curvature_sigma, BoundaryMode::Reflect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::cumulative_distance;

    #[test]
    fn test_circle_curvature() {
        let r = 150.0;
        let n = 2000;
        let (x, y): (Vec<f64>, Vec<f64>) = (0..n)
            .map(|i| {
                let a = i as f64 / n as f64 * 2.0 * std::f64::consts::PI;
                (r * a.cos(), r * a.sin())
            })
            .unzip();
        let dist = cumulative_distance(&x, &y);
        let k = curvature(&x, &y, &dist, &CanonicalConfig::default());
        for (i, v) in k.iter().enumerate().skip(100).take(n - 200) {
            assert!((v - 1.0 / r).abs() < 1e-4, "curvature {} at {}", v, i);
        }
    }

    #[test]
    fn test_straight_line_has_zero_curvature() {
        let x: Vec<f64> = (0..300).map(|i| i as f64).collect();
        let y = vec![5.0; 300];
        let dist = cumulative_distance(&x, &y);
        for v in curvature(&x, &y, &dist, &CanonicalConfig::default()) {
            assert!(v.abs() < 1e-9);
        }
    }
}
