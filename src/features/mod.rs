//! # Absorption-band feature detection
//!
//! Three narrow absorption bands refine ambiguous classes: **e** (0.50 µm), **h** (0.70 µm,
//! the hydration band gating `Ch`), and **k** (0.90 µm). [`detect`] decides, for one
//! spectrum and one band, between three states:
//!
//! - *not observed* — the spectrum does not fully cover the band window (or holds fewer
//!   than [`DetectionParams::min_points`] samples in it): `present` is `None`;
//! - *observed, absent* — the window is covered but the fitted band fails the presence
//!   criteria: `present` is `Some(false)`;
//! - *observed, present* — `present` is `Some(true)`.
//!
//! The fit is purely numerical and stateless: a linear continuum through the two window
//! boundary samples, reflectance divided by the continuum, a low-degree polynomial fitted
//! to the ratio, and the band center taken at the deepest interior local minimum of that
//! polynomial. The band is present when the center falls within
//! [`DetectionParams::center_tolerance`] standard deviations of the expected center and the
//! depth reaches [`DetectionParams::min_depth`] percent.
//!
//! Only this polynomial mode is implemented; the legacy energy-space Gaussian fit is not
//! part of the classification path.

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::constants::Micron;
use crate::taxo_errors::TaxoError;

/// Name of a diagnostic absorption band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureName {
    E,
    H,
    K,
}

impl FeatureName {
    pub const ALL: [FeatureName; 3] = [FeatureName::E, FeatureName::H, FeatureName::K];

    /// Wavelength window `[lower, upper]` the band lives in, in microns.
    pub fn window(self) -> (Micron, Micron) {
        match self {
            FeatureName::E => (0.45, 0.54),
            FeatureName::H => (0.55, 0.86),
            FeatureName::K => (0.75, 1.10),
        }
    }

    /// Expected band center and its standard deviation, in microns.
    pub fn expected_center(self) -> (Micron, Micron) {
        match self {
            FeatureName::E => (0.50, 0.01),
            FeatureName::H => (0.69, 0.03),
            FeatureName::K => (0.90, 0.05),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeatureName::E => "e",
            FeatureName::H => "h",
            FeatureName::K => "k",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for FeatureName {
    type Err = TaxoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "e" => Ok(FeatureName::E),
            "h" => Ok(FeatureName::H),
            "k" => Ok(FeatureName::K),
            _ => Err(TaxoError::UnknownFeature(s.to_string())),
        }
    }
}

/// One detected (or undetermined) absorption band of one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: FeatureName,
    /// Whether the spectrum covers the band window with enough samples.
    pub is_observed: bool,
    /// `Some(true)` present, `Some(false)` observed but absent, `None` undetermined
    /// (window not covered, or the fit degenerated).
    pub present: Option<bool>,
    /// Fitted band center in microns; NaN when no local minimum exists.
    pub center: Micron,
    /// Band depth below the continuum, in percent; NaN when not observed.
    pub depth: f64,
    /// Depth over the local noise floor; NaN when no noise estimate is available.
    pub snr: f64,
}

impl Feature {
    /// The explicit "window not covered" state.
    pub fn not_observed(name: FeatureName) -> Self {
        Feature {
            name,
            is_observed: false,
            present: None,
            center: f64::NAN,
            depth: f64::NAN,
            snr: f64::NAN,
        }
    }

    /// True only when the band was observed and passed the presence criteria.
    pub fn is_present(&self) -> bool {
        self.present == Some(true)
    }
}

/// Tunable parameters of the band fit.
///
/// The defaults reproduce the trained classification path; the builder exists for
/// sensitivity studies, not for routine use.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    /// Degree of the polynomial fitted to the continuum-removed band.
    pub degree: usize,
    /// Number of evaluation samples used to locate the fit minimum.
    pub n_samples: usize,
    /// Minimum band depth (percent) for presence.
    pub min_depth: f64,
    /// Allowed distance of the fitted center from the expected center, in standard
    /// deviations of the expected center.
    pub center_tolerance: f64,
    /// Minimum number of in-window samples for the band to count as observed.
    pub min_points: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        DetectionParams {
            degree: 4,
            n_samples: 512,
            min_depth: 0.5,
            center_tolerance: 3.0,
            min_points: 4,
        }
    }
}

impl DetectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> DetectionParamsBuilder {
        DetectionParamsBuilder::new()
    }
}

/// Fluent builder for [`DetectionParams`].
#[derive(Debug, Clone, Default)]
pub struct DetectionParamsBuilder {
    params: DetectionParams,
}

impl DetectionParamsBuilder {
    pub fn new() -> Self {
        DetectionParamsBuilder {
            params: DetectionParams::default(),
        }
    }

    pub fn degree(mut self, v: usize) -> Self {
        self.params.degree = v;
        self
    }

    pub fn n_samples(mut self, v: usize) -> Self {
        self.params.n_samples = v;
        self
    }

    pub fn min_depth(mut self, v: f64) -> Self {
        self.params.min_depth = v;
        self
    }

    pub fn center_tolerance(mut self, v: f64) -> Self {
        self.params.center_tolerance = v;
        self
    }

    pub fn min_points(mut self, v: usize) -> Self {
        self.params.min_points = v;
        self
    }

    pub fn build(self) -> Result<DetectionParams, TaxoError> {
        let p = &self.params;
        if p.degree < 2 {
            return Err(TaxoError::InvalidDetectionParams(
                "polynomial degree must be at least 2".into(),
            ));
        }
        if p.n_samples < 16 {
            return Err(TaxoError::InvalidDetectionParams(
                "need at least 16 evaluation samples".into(),
            ));
        }
        if p.min_points < 3 {
            return Err(TaxoError::InvalidDetectionParams(
                "need at least 3 in-window points".into(),
            ));
        }
        if !(p.min_depth > 0.0) || !(p.center_tolerance > 0.0) {
            return Err(TaxoError::InvalidDetectionParams(
                "thresholds must be positive".into(),
            ));
        }
        Ok(self.params)
    }
}

/// Fit one absorption band and decide its presence.
///
/// Arguments
/// -----------------
/// * `wave`: wavelength in microns, strictly ascending.
/// * `refl`: reflectance, aligned with `wave`.
/// * `refl_err`: optional per-bin uncertainties used for the noise floor.
/// * `name`: which band to fit.
/// * `params`: fit configuration (see [`DetectionParams`]).
///
/// Return
/// ----------
/// * The [`Feature`] record. Detection never fails: insufficient coverage or a degenerate
///   fit degrade to the explicit *not observed* / *absent* states.
pub fn detect(
    wave: &[Micron],
    refl: &[f64],
    refl_err: Option<&[f64]>,
    name: FeatureName,
    params: &DetectionParams,
) -> Feature {
    let (lower, upper) = name.window();

    // Coverage gate: the full window must be observed, with enough samples inside.
    if wave.is_empty() || wave[0] > lower || wave[wave.len() - 1] < upper {
        return Feature::not_observed(name);
    }
    let in_window: Vec<usize> = (0..wave.len())
        .filter(|&i| wave[i] >= lower && wave[i] <= upper)
        .collect();
    if in_window.len() < params.min_points {
        return Feature::not_observed(name);
    }

    let first = in_window[0];
    let last = in_window[in_window.len() - 1];

    // Linear continuum through the two boundary samples.
    let (w0, r0) = (wave[first], refl[first]);
    let (w1, r1) = (wave[last], refl[last]);
    if w1 == w0 {
        return Feature::not_observed(name);
    }
    let continuum = |w: Micron| r0 + (r1 - r0) * (w - w0) / (w1 - w0);

    // Continuum-removed band, with degenerate continuum values dropped.
    let mut xs = Vec::with_capacity(in_window.len());
    let mut ys = Vec::with_capacity(in_window.len());
    let mid = 0.5 * (lower + upper);
    for &i in &in_window {
        let c = continuum(wave[i]);
        if c > 0.0 {
            xs.push(wave[i] - mid);
            ys.push(refl[i] / c);
        }
    }
    if xs.len() < params.min_points {
        return Feature::not_observed(name);
    }

    let degree = params.degree.min(xs.len() - 1);
    let Some(coeffs) = polyfit(&xs, &ys, degree) else {
        return Feature {
            name,
            is_observed: true,
            present: None,
            center: f64::NAN,
            depth: f64::NAN,
            snr: f64::NAN,
        };
    };

    // Band center: deepest interior local minimum of the fitted polynomial.
    let (center, fit_at_center) = match deepest_minimum(&coeffs, w0 - mid, w1 - mid, params.n_samples)
    {
        Some((x, y)) => (x + mid, y),
        None => {
            return Feature {
                name,
                is_observed: true,
                present: Some(false),
                center: f64::NAN,
                depth: f64::NAN,
                snr: f64::NAN,
            }
        }
    };

    let depth = (1.0 - fit_at_center) * 100.0;

    // Noise floor: propagated uncertainties when available, fit residuals otherwise.
    let noise = match refl_err {
        Some(err) => {
            let mut total = 0.0;
            let mut count = 0usize;
            for &i in &in_window {
                let c = continuum(wave[i]);
                if c > 0.0 && err[i].is_finite() {
                    total += err[i] / c;
                    count += 1;
                }
            }
            if count > 0 {
                100.0 * total / count as f64
            } else {
                residual_noise(&xs, &ys, &coeffs)
            }
        }
        None => residual_noise(&xs, &ys, &coeffs),
    };
    let snr = if noise.is_finite() && noise > 0.0 {
        depth / noise
    } else {
        f64::NAN
    };

    let (expected, sigma) = name.expected_center();
    let centered = (center - expected).abs() <= params.center_tolerance * sigma;
    let present = centered && depth >= params.min_depth;

    Feature {
        name,
        is_observed: true,
        present: Some(present),
        center,
        depth,
        snr,
    }
}

/// Least-squares polynomial fit, lowest coefficient first. Returns `None` when the
/// Vandermonde system cannot be solved.
fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Option<Vec<f64>> {
    let rows = xs.len();
    let cols = degree + 1;
    let vandermonde = DMatrix::from_fn(rows, cols, |r, c| xs[r].powi(c as i32));
    let rhs = DVector::from_column_slice(ys);

    let svd = vandermonde.svd(true, true);
    svd.solve(&rhs, 1e-12).ok().map(|c| c.iter().copied().collect())
}

fn poly_eval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Deepest interior local minimum of the polynomial over `[lo, hi]`, found by dense
/// sampling. Returns `None` when the curve is monotonic over the window.
fn deepest_minimum(coeffs: &[f64], lo: f64, hi: f64, n_samples: usize) -> Option<(f64, f64)> {
    let step = (hi - lo) / (n_samples - 1) as f64;
    let values: Vec<f64> = (0..n_samples)
        .map(|i| poly_eval(coeffs, lo + i as f64 * step))
        .collect();

    let mut best: Option<(f64, f64)> = None;
    for i in 1..n_samples - 1 {
        if values[i] < values[i - 1] && values[i] <= values[i + 1] {
            let x = lo + i as f64 * step;
            match best {
                Some((_, y)) if values[i] >= y => {}
                _ => best = Some((x, values[i])),
            }
        }
    }
    best
}

/// Standard deviation of the fit residuals, in the same percent units as the depth.
fn residual_noise(xs: &[f64], ys: &[f64], coeffs: &[f64]) -> f64 {
    let n = xs.len();
    let mean_sq = xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| (y - poly_eval(coeffs, x)).powi(2))
        .sum::<f64>()
        / n as f64;
    100.0 * mean_sq.sqrt()
}
