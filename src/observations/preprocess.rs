//! # Preprocessing: the gridded, normalized view of an observation
//!
//! Classification does not consume raw instrument sampling. This module derives a
//! [`Preprocessed`] view from an immutable [`Observation`](crate::observations::Observation):
//!
//! 1. **Resampling** — reflectance is linearly interpolated onto the trained
//!    [`WAVELENGTH_GRID`]. Beyond the observed range, linear extrapolation from the two
//!    boundary samples is allowed up to [`EXTRAPOLATION_LIMIT`] of the grid span; bins
//!    further out stay `NaN` (missing).
//! 2. **Normalization** — the resampled reflectance is anchored against the reference
//!    library ([`ReferenceLibrary::normalize`]): nearest-neighbor brightness rescaling,
//!    log10 transform, alpha subtraction.
//! 3. **Albedo** — the albedo is log10-transformed; a missing albedo becomes `NaN`.
//!
//! The original observation is never mutated; both the raw-resampled and the normalized
//! arrays stay available on the view.

use nalgebra::DVector;

use crate::constants::{LogAlbedo, Micron, EXTRAPOLATION_LIMIT, N_INPUT, WAVELENGTH_GRID};
use crate::normalization::ReferenceLibrary;
use crate::observations::Observation;

/// The preprocessed, model-facing view of one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    /// Raw reflectance resampled onto the trained grid (`NaN` = missing bin).
    pub resampled: DVector<f64>,
    /// Log-reflectance after neighbor rescaling and alpha subtraction (`NaN` = missing bin).
    pub normalized: DVector<f64>,
    /// Shift constant transferred from the nearest reference spectra.
    pub alpha: f64,
    /// log10 of the geometric albedo, `NaN` when the albedo is unknown.
    pub log_albedo: LogAlbedo,
}

impl Preprocessed {
    /// The all-missing view attached to unclassifiable results.
    pub fn missing() -> Self {
        Preprocessed {
            resampled: DVector::from_element(WAVELENGTH_GRID.len(), f64::NAN),
            normalized: DVector::from_element(WAVELENGTH_GRID.len(), f64::NAN),
            alpha: f64::NAN,
            log_albedo: f64::NAN,
        }
    }

    /// Number of non-missing model input columns: observed normalized bins, plus one
    /// when the albedo is known. This is the completeness count squared by the
    /// aggregator's weighting.
    pub fn n_observed_columns(&self) -> usize {
        let bins = self.normalized.iter().filter(|v| v.is_finite()).count();
        bins + usize::from(self.log_albedo.is_finite())
    }

    /// The latent-model input vector: normalized bins followed by the log-albedo column.
    pub fn latent_input(&self) -> DVector<f64> {
        let mut input = DVector::from_element(N_INPUT, f64::NAN);
        input.rows_mut(0, self.normalized.len()).copy_from(&self.normalized);
        input[N_INPUT - 1] = self.log_albedo;
        input
    }
}

/// Derive the preprocessed view of an observation.
///
/// Arguments
/// -----------------
/// * `observation`: the validated observation to preprocess.
/// * `library`: the frozen reference library used for log-normalization.
///
/// Return
/// ----------
/// * The [`Preprocessed`] view; bins outside the observed range (plus the allowed
///   extrapolation margin) are `NaN`.
pub fn preprocess(observation: &Observation, library: &ReferenceLibrary) -> Preprocessed {
    let resampled = resample_to_grid(observation.wave(), observation.refl());
    let (normalized, alpha) = library.normalize(&resampled);
    let log_albedo = observation.albedo().map_or(f64::NAN, f64::log10);

    Preprocessed {
        resampled,
        normalized,
        alpha,
        log_albedo,
    }
}

/// Linearly resample a spectrum onto the trained wavelength grid.
///
/// Grid bins inside the observed range are interpolated between the bracketing samples.
/// Bins beyond either end are linearly extrapolated from the two boundary samples, but only
/// within [`EXTRAPOLATION_LIMIT`] of the grid span; everything further out is `NaN`.
pub(crate) fn resample_to_grid(wave: &[Micron], refl: &[f64]) -> DVector<f64> {
    let n = wave.len();
    let grid_span = WAVELENGTH_GRID[WAVELENGTH_GRID.len() - 1] - WAVELENGTH_GRID[0];
    let margin = EXTRAPOLATION_LIMIT * grid_span;
    let (wmin, wmax) = (wave[0], wave[n - 1]);

    DVector::from_iterator(
        WAVELENGTH_GRID.len(),
        WAVELENGTH_GRID.iter().map(|&g| {
            if g >= wmin && g <= wmax {
                interpolate(wave, refl, g)
            } else if n >= 2 && g < wmin && wmin - g <= margin {
                extrapolate(wave[0], refl[0], wave[1], refl[1], g)
            } else if n >= 2 && g > wmax && g - wmax <= margin {
                extrapolate(wave[n - 2], refl[n - 2], wave[n - 1], refl[n - 1], g)
            } else {
                f64::NAN
            }
        }),
    )
}

/// Linear interpolation at `x`, with `wave` strictly ascending and `x` inside its range.
fn interpolate(wave: &[Micron], refl: &[f64], x: Micron) -> f64 {
    let upper = wave.partition_point(|w| *w < x);
    if upper == 0 {
        return refl[0];
    }
    if wave[upper - 1] == x {
        return refl[upper - 1];
    }
    let (w0, w1) = (wave[upper - 1], wave[upper]);
    let (r0, r1) = (refl[upper - 1], refl[upper]);
    r0 + (r1 - r0) * (x - w0) / (w1 - w0)
}

fn extrapolate(w0: Micron, r0: f64, w1: Micron, r1: f64, x: Micron) -> f64 {
    r0 + (r1 - r0) * (x - w0) / (w1 - w0)
}
