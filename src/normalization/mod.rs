//! # Reference-neighbor log-normalization
//!
//! The classifier operates on log-reflectance mean-centered by a clustering-derived shift
//! constant (*alpha*). A new spectrum does not carry an alpha of its own, so this module
//! anchors it against a **frozen library of previously-classified reference spectra**, each
//! stored on the trained grid with its precomputed alpha:
//!
//! 1. Find the [`N_NEIGHBORS`] reference spectra closest in L2 distance over the
//!    **overlapping observed bins only**, with both sides independently L2-normalized over
//!    that bin subset (shape comparison, not brightness).
//! 2. Transfer the mean of the neighbors' alphas to the new spectrum.
//! 3. Rescale the new spectrum so its mean over the observed bins matches the neighbors'
//!    mean over the same bins, anchoring its brightness level.
//! 4. Log10-transform and subtract alpha.
//!
//! The library is a frozen artifact embedded in the crate; alternative tables can be loaded
//! from any reader or path, mirroring how other trained tables are handled.

use std::io::Read;

use camino::Utf8Path;
use nalgebra::DVector;
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;

use crate::constants::{N_GRID, N_NEIGHBORS};
use crate::taxo_errors::TaxoError;

static EMBEDDED_NEIGHBORS: &str = include_str!("data/neighbors.csv");

static EMBEDDED_LIBRARY: Lazy<ReferenceLibrary> = Lazy::new(|| {
    ReferenceLibrary::from_reader(EMBEDDED_NEIGHBORS.as_bytes())
        .expect("embedded reference library must parse")
});

/// The frozen library of classified reference spectra used for log-normalization.
#[derive(Debug, Clone)]
pub struct ReferenceLibrary {
    labels: Vec<String>,
    refl: Vec<DVector<f64>>,
    alpha: Vec<f64>,
}

impl ReferenceLibrary {
    /// The reference library embedded in the crate, parsed once and shared.
    pub fn embedded() -> &'static ReferenceLibrary {
        &EMBEDDED_LIBRARY
    }

    /// Build a library from explicit records.
    ///
    /// Arguments
    /// -----------------
    /// * `labels`: class label of each reference spectrum (informative only).
    /// * `refl`: complete reflectance vectors on the trained grid.
    /// * `alpha`: the per-spectrum shift constants.
    ///
    /// Return
    /// ----------
    /// * The library, or a [`TaxoError`] if the records are inconsistent (mismatched
    ///   counts, wrong grid length, non-finite values, empty library).
    pub fn from_records(
        labels: Vec<String>,
        refl: Vec<DVector<f64>>,
        alpha: Vec<f64>,
    ) -> Result<Self, TaxoError> {
        if refl.is_empty() {
            return Err(TaxoError::InvalidReferenceLibrary(
                "library holds no reference spectra".into(),
            ));
        }
        if labels.len() != refl.len() || alpha.len() != refl.len() {
            return Err(TaxoError::InvalidReferenceLibrary(format!(
                "mismatched record counts: {} labels, {} spectra, {} alphas",
                labels.len(),
                refl.len(),
                alpha.len()
            )));
        }
        for (i, spectrum) in refl.iter().enumerate() {
            if spectrum.len() != N_GRID {
                return Err(TaxoError::InvalidReferenceLibrary(format!(
                    "reference {i} has {} bins, expected {N_GRID}",
                    spectrum.len()
                )));
            }
            if spectrum.iter().any(|v| !v.is_finite()) || !alpha[i].is_finite() {
                return Err(TaxoError::InvalidReferenceLibrary(format!(
                    "reference {i} carries non-finite values"
                )));
            }
        }
        Ok(ReferenceLibrary {
            labels,
            refl,
            alpha,
        })
    }

    /// Parse a library from CSV content: `class, alpha, <one column per grid bin>`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TaxoError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut labels = Vec::new();
        let mut refl = Vec::new();
        let mut alpha = Vec::new();

        for record in csv_reader.records() {
            let record = record?;
            if record.len() != N_GRID + 2 {
                return Err(TaxoError::InvalidReferenceLibrary(format!(
                    "expected {} columns per record, found {}",
                    N_GRID + 2,
                    record.len()
                )));
            }
            labels.push(record[0].to_string());
            alpha.push(parse_field(&record[1])?);
            let values = record
                .iter()
                .skip(2)
                .map(parse_field)
                .collect::<Result<Vec<f64>, TaxoError>>()?;
            refl.push(DVector::from_vec(values));
        }

        ReferenceLibrary::from_records(labels, refl, alpha)
    }

    /// Load a library from a CSV file on disk.
    pub fn from_path(path: &Utf8Path) -> Result<Self, TaxoError> {
        let file = std::fs::File::open(path.as_std_path())?;
        ReferenceLibrary::from_reader(file)
    }

    pub fn len(&self) -> usize {
        self.refl.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refl.is_empty()
    }

    /// Class labels of the reference spectra, aligned with their storage order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Normalize a resampled spectrum against the library.
    ///
    /// Arguments
    /// -----------------
    /// * `resampled`: reflectance on the trained grid, `NaN` marking missing bins.
    ///
    /// Return
    /// ----------
    /// * `(normalized, alpha)`: the log-reflectance vector (missing bins stay `NaN`) and
    ///   the transferred shift constant. A spectrum with no observed bins yields an
    ///   all-`NaN` vector and a `NaN` alpha.
    pub fn normalize(&self, resampled: &DVector<f64>) -> (DVector<f64>, f64) {
        let observed: Vec<usize> = (0..resampled.len())
            .filter(|&i| resampled[i].is_finite())
            .collect();
        if observed.is_empty() {
            return (
                DVector::from_element(resampled.len(), f64::NAN),
                f64::NAN,
            );
        }

        let neighbors = self.nearest_neighbors(resampled, &observed);

        let alpha = neighbors.iter().map(|&i| self.alpha[i]).sum::<f64>() / neighbors.len() as f64;

        // Anchor the brightness level: the spectrum's mean over observed bins is pulled to
        // the neighbors' mean over the same bins.
        let own_level =
            observed.iter().map(|&i| resampled[i]).sum::<f64>() / observed.len() as f64;
        let neighbor_level = neighbors
            .iter()
            .map(|&n| {
                observed.iter().map(|&i| self.refl[n][i]).sum::<f64>() / observed.len() as f64
            })
            .sum::<f64>()
            / neighbors.len() as f64;
        let scale = neighbor_level / own_level;

        let normalized = DVector::from_iterator(
            resampled.len(),
            resampled.iter().map(|&r| {
                let rescaled = r * scale;
                if rescaled.is_finite() && rescaled > 0.0 {
                    rescaled.log10() - alpha
                } else {
                    f64::NAN
                }
            }),
        );
        (normalized, alpha)
    }

    /// Indices of the [`N_NEIGHBORS`] references closest in shape over the observed bins.
    fn nearest_neighbors(&self, resampled: &DVector<f64>, observed: &[usize]) -> Vec<usize> {
        let query = unit_subvector(resampled, observed);

        let mut order: Vec<usize> = (0..self.refl.len()).collect();
        order.sort_by_key(|&n| {
            let candidate = unit_subvector(&self.refl[n], observed);
            OrderedFloat((&query - candidate).norm())
        });
        order.truncate(N_NEIGHBORS.min(self.refl.len()));
        order
    }
}

/// Extract the observed bins and scale the subvector to unit L2 norm.
fn unit_subvector(spectrum: &DVector<f64>, observed: &[usize]) -> DVector<f64> {
    let sub = DVector::from_iterator(observed.len(), observed.iter().map(|&i| spectrum[i]));
    let norm = sub.norm();
    if norm > 0.0 {
        sub / norm
    } else {
        sub
    }
}

fn parse_field(field: &str) -> Result<f64, TaxoError> {
    field
        .parse::<f64>()
        .map_err(|_| TaxoError::InvalidReferenceLibrary(format!("bad numeric field: {field:?}")))
}

#[cfg(test)]
mod normalization_test {
    use approx::assert_relative_eq;

    use super::*;

    fn toy_library() -> ReferenceLibrary {
        // Three flat references at different brightness levels; alphas grow with slope.
        let flat = DVector::from_element(N_GRID, 1.0);
        let bright = DVector::from_element(N_GRID, 2.0);
        let red = DVector::from_iterator(N_GRID, (0..N_GRID).map(|i| 1.0 + 0.02 * i as f64));
        ReferenceLibrary::from_records(
            vec!["C".into(), "E".into(), "D".into()],
            vec![flat, bright, red],
            vec![0.0, 0.0, 0.2],
        )
        .unwrap()
    }

    #[test]
    fn test_embedded_library_loads() {
        let library = ReferenceLibrary::embedded();
        assert!(library.len() >= N_NEIGHBORS);
        assert!(library.labels().iter().all(|l| !l.is_empty()));
    }

    #[test]
    fn test_shape_distance_ignores_brightness() {
        let library = toy_library();
        // A flat spectrum at 0.5: identical in shape to both flat references,
        // different from the sloped one.
        let query = DVector::from_element(N_GRID, 0.5);
        let observed: Vec<usize> = (0..N_GRID).collect();
        let neighbors = library.nearest_neighbors(&query, &observed);
        assert_eq!(neighbors.len(), 3);
        // The red reference must rank last.
        assert_eq!(neighbors[2], 2);
    }

    #[test]
    fn test_normalize_anchors_brightness_and_transfers_alpha() {
        let flat = DVector::from_element(N_GRID, 1.0);
        let library = ReferenceLibrary::from_records(
            vec!["C".into()],
            vec![flat],
            vec![0.1],
        )
        .unwrap();

        // A flat spectrum at 0.25 is rescaled onto the reference level (1.0), so the
        // log-reflectance is 0 everywhere and only the alpha shift remains.
        let query = DVector::from_element(N_GRID, 0.25);
        let (normalized, alpha) = library.normalize(&query);
        assert_relative_eq!(alpha, 0.1);
        for value in normalized.iter() {
            assert_relative_eq!(*value, -0.1, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_normalize_empty_mask() {
        let library = toy_library();
        let query = DVector::from_element(N_GRID, f64::NAN);
        let (normalized, alpha) = library.normalize(&query);
        assert!(alpha.is_nan());
        assert!(normalized.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_from_records_rejects_inconsistency() {
        let result = ReferenceLibrary::from_records(vec![], vec![], vec![]);
        assert!(matches!(result, Err(TaxoError::InvalidReferenceLibrary(_))));

        let short = DVector::from_element(3, 1.0);
        let result = ReferenceLibrary::from_records(vec!["C".into()], vec![short], vec![0.0]);
        assert!(matches!(result, Err(TaxoError::InvalidReferenceLibrary(_))));
    }
}
