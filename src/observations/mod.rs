//! # Observed reflectance spectra
//!
//! An [`Observation`] is one reflectance spectrum of one asteroid: ordered wavelength bins,
//! reflectance values, optional per-bin uncertainties, and an optional geometric albedo.
//!
//! Construction goes through [`Observation::new`], which **sanitizes then validates**:
//!
//! 1. Samples with a non-finite wavelength or reflectance are dropped.
//! 2. The remaining samples are sorted by wavelength; exact duplicate wavelengths keep the
//!    first occurrence, so the stored grid is strictly ascending.
//! 3. A non-finite or non-positive albedo is treated as absent.
//! 4. Mismatched array lengths and an empty surviving spectrum are reported as
//!    [`TaxoError`](crate::taxo_errors::TaxoError) at construction time, never later inside
//!    classification.
//!
//! Once built, an observation is immutable. Classification derives a separate
//! [`Preprocessed`](crate::observations::preprocess::Preprocessed) view from it and leaves
//! the original arrays untouched, so callers always see the data they supplied.

pub mod preprocess;

pub use preprocess::{preprocess, Preprocessed};

use itertools::Itertools;

use crate::constants::{Albedo, Micron, MIN_CLASSIFIABLE_BINS, WAVELENGTH_GRID};
use crate::taxo_errors::TaxoError;

/// One reflectance spectrum with optional uncertainties and albedo.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    wave: Vec<Micron>,
    refl: Vec<f64>,
    refl_err: Option<Vec<f64>>,
    albedo: Option<Albedo>,
}

impl Observation {
    /// Build an observation from raw instrument or archive arrays.
    ///
    /// Arguments
    /// -----------------
    /// * `wave`: wavelength of each sample, in microns.
    /// * `refl`: reflectance of each sample (same length as `wave`).
    /// * `refl_err`: optional per-sample reflectance uncertainty (same length as `refl`).
    /// * `albedo`: optional geometric albedo.
    ///
    /// Return
    /// ----------
    /// * The sanitized, validated observation, or a [`TaxoError`] when the arrays are
    ///   malformed (mismatched lengths, nothing left after dropping non-finite samples).
    pub fn new(
        wave: Vec<Micron>,
        refl: Vec<f64>,
        refl_err: Option<Vec<f64>>,
        albedo: Option<Albedo>,
    ) -> Result<Self, TaxoError> {
        if wave.len() != refl.len() {
            return Err(TaxoError::MismatchedArrayLengths {
                wave: wave.len(),
                refl: refl.len(),
            });
        }
        if let Some(err) = &refl_err {
            if err.len() != refl.len() {
                return Err(TaxoError::MismatchedUncertaintyLength {
                    err: err.len(),
                    refl: refl.len(),
                });
            }
        }

        let (wave, refl, refl_err) = sanitize(wave, refl, refl_err);
        if wave.is_empty() {
            return Err(TaxoError::EmptySpectrum);
        }

        let albedo = albedo.filter(|a| a.is_finite() && *a > 0.0);

        Ok(Observation {
            wave,
            refl,
            refl_err,
            albedo,
        })
    }

    /// Wavelength bins in microns, strictly ascending.
    pub fn wave(&self) -> &[Micron] {
        &self.wave
    }

    /// Reflectance values, aligned with [`wave`](Observation::wave).
    pub fn refl(&self) -> &[f64] {
        &self.refl
    }

    /// Per-bin reflectance uncertainties, when provided.
    pub fn refl_err(&self) -> Option<&[f64]> {
        self.refl_err.as_deref()
    }

    /// Geometric albedo, when known and valid.
    pub fn albedo(&self) -> Option<Albedo> {
        self.albedo
    }

    /// First and last observed wavelength.
    pub fn wave_range(&self) -> (Micron, Micron) {
        (self.wave[0], self.wave[self.wave.len() - 1])
    }

    /// True when the observed range fully covers `[lower, upper]`.
    pub fn covers(&self, lower: Micron, upper: Micron) -> bool {
        let (wmin, wmax) = self.wave_range();
        wmin <= lower && wmax >= upper
    }

    /// Whether this spectrum can be classified at all: enough resampled grid coverage,
    /// or an albedo to fall back on.
    pub fn is_classifiable(&self) -> bool {
        if self.albedo.is_some() {
            return true;
        }
        let resampled = preprocess::resample_to_grid(&self.wave, &self.refl);
        let observed = resampled.iter().filter(|r| r.is_finite()).count();
        observed >= MIN_CLASSIFIABLE_BINS
    }

    /// Number of trained grid bins falling inside the observed wavelength range.
    pub fn grid_bins_in_range(&self) -> usize {
        let (wmin, wmax) = self.wave_range();
        WAVELENGTH_GRID
            .iter()
            .filter(|g| **g >= wmin && **g <= wmax)
            .count()
    }
}

/// Drop non-finite samples, then sort by wavelength keeping the first of any duplicates.
fn sanitize(
    wave: Vec<Micron>,
    refl: Vec<f64>,
    refl_err: Option<Vec<f64>>,
) -> (Vec<Micron>, Vec<f64>, Option<Vec<f64>>) {
    let has_err = refl_err.is_some();
    let err = refl_err.unwrap_or_default();

    let mut samples: Vec<(Micron, f64, f64)> = wave
        .into_iter()
        .zip(refl)
        .enumerate()
        .filter(|(_, (w, r))| w.is_finite() && r.is_finite())
        .map(|(i, (w, r))| (w, r, if has_err { err[i] } else { f64::NAN }))
        .collect();

    samples.sort_by(|a, b| a.0.total_cmp(&b.0));
    let samples = samples
        .into_iter()
        .dedup_by(|a, b| a.0 == b.0)
        .collect::<Vec<_>>();

    let wave = samples.iter().map(|s| s.0).collect();
    let refl = samples.iter().map(|s| s.1).collect();
    let refl_err = has_err.then(|| samples.iter().map(|s| s.2).collect());
    (wave, refl, refl_err)
}
