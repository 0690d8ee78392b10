//! # Cluster-to-class resolution
//!
//! The latent model reports *cluster* responsibilities, but callers want *class*
//! probabilities. [`resolve`] converts one into the other by routing every cluster's
//! responsibility mass through that cluster's entry in the frozen
//! [`ClusterTable`](crate::cluster_table::ClusterTable):
//!
//! 1. Every class starts at probability zero.
//! 2. **Core clusters** hand their full mass to their mapped class.
//! 3. **X-complex clusters** split by albedo into P/M/E through the shared 1-D mixture;
//!    without an albedo the whole mass goes to X.
//! 4. **Continuum clusters** split across their candidate classes proportionally to their
//!    dedicated mixture evaluated at the cluster's latent coordinates. The L/M and D/S
//!    clusters use their own rules (albedo brightness, hand-tuned thresholds) instead.
//! 5. **E-type rescue**: when the albedo mixture assigns the observation to E, two thirds
//!    of the mass accumulated in K, L, and M moves to E — E-types overlap those classes
//!    spectrally and only the albedo separates them.
//! 6. The **wide cluster** (the most class-ambiguous continuum cluster) resolves last,
//!    after the rescue.
//!
//! The returned vector conserves the routed responsibility mass to within
//! [`PROB_EPS`](crate::constants::PROB_EPS); any NaN leaking out of the frozen artifacts is
//! reported as an internal error rather than silently producing a wrong class. The final
//! argmax (with its canonical-order tie-break) belongs to the caller, after any
//! feature-flag adjustment.

use nalgebra::DVector;

use crate::classes::{Class, ClassProbabilities};
use crate::cluster_table::{ClusterKind, ClusterTable, ALBEDO_COMPONENT_CLASSES};
use crate::constants::{ClusterId, LogAlbedo, PROB_EPS};
use crate::taxo_errors::TaxoError;

/// log10-albedo below which the hand-tuned D/S rule routes mass to D.
const DS_LOG_ALBEDO_SPLIT: LogAlbedo = -1.0;

/// Latent dimension (0-based, i.e. z3) consulted by the D/S rule without an albedo.
const DS_LATENT_DIM: usize = 2;

/// Fraction of K/L/M mass the E-type rescue transfers to E.
const E_RESCUE_FRACTION: f64 = 2.0 / 3.0;

/// Convert cluster responsibilities into class probabilities.
///
/// Arguments
/// -----------------
/// * `table`: the frozen per-cluster resolution table.
/// * `responsibilities`: one probability per cluster, summing to 1.
/// * `latent_scores`: the observation's latent coordinates (z1…).
/// * `log_albedo`: log10 of the geometric albedo, NaN when unknown.
///
/// Return
/// ----------
/// * The class-probability vector, mass-conserving to within
///   [`PROB_EPS`](crate::constants::PROB_EPS), or a [`TaxoError`] when the inputs or the
///   frozen artifacts are inconsistent.
pub fn resolve(
    table: &ClusterTable,
    responsibilities: &DVector<f64>,
    latent_scores: &DVector<f64>,
    log_albedo: LogAlbedo,
) -> Result<ClassProbabilities, TaxoError> {
    if responsibilities.len() != table.n_clusters() {
        return Err(TaxoError::LatentContract(format!(
            "{} responsibilities for a {}-cluster table",
            responsibilities.len(),
            table.n_clusters()
        )));
    }
    if let Some(bad) = (0..responsibilities.len()).find(|&i| !responsibilities[i].is_finite()) {
        return Err(TaxoError::DegenerateMixtureOutput(bad));
    }

    let mut probs = ClassProbabilities::zeros();

    for id in 0..table.n_clusters() {
        if table.wide_cluster() == Some(id) {
            continue;
        }
        route_cluster(table, id, responsibilities[id], latent_scores, log_albedo, &mut probs)?;
    }

    e_type_rescue(table, log_albedo, &mut probs)?;

    if let Some(id) = table.wide_cluster() {
        route_cluster(table, id, responsibilities[id], latent_scores, log_albedo, &mut probs)?;
    }

    validate_mass(&probs, responsibilities.sum())?;
    Ok(probs)
}

/// Route one cluster's responsibility mass according to its table entry.
fn route_cluster(
    table: &ClusterTable,
    id: ClusterId,
    mass: f64,
    latent_scores: &DVector<f64>,
    log_albedo: LogAlbedo,
    probs: &mut ClassProbabilities,
) -> Result<(), TaxoError> {
    if mass == 0.0 {
        return Ok(());
    }
    let kind = table
        .kind(id)
        .ok_or(TaxoError::MissingClusterEntry(id))?;

    match kind {
        ClusterKind::Core(class) => probs.add(*class, mass),

        ClusterKind::XComplex => {
            if log_albedo.is_nan() {
                probs.add(Class::X, mass);
            } else {
                let split = table.albedo_split(log_albedo)?;
                for (class, share) in ALBEDO_COMPONENT_CLASSES.iter().zip(split) {
                    probs.add(*class, mass * share);
                }
            }
        }

        ClusterKind::ContinuumGmm {
            dims,
            classes,
            mixture,
            ..
        } => {
            let point = latent_point(latent_scores, dims)?;
            let shares = mixture.predict_proba(&point)?;
            for (class, share) in classes.iter().zip(shares) {
                probs.add(*class, mass * share);
            }
        }

        ClusterKind::LuminosityLm => route_lm(table, mass, log_albedo, probs)?,

        ClusterKind::ThresholdDs => route_ds(mass, latent_scores, log_albedo, probs)?,
    }
    Ok(())
}

/// The L/M pair. M membership is an albedo statement: a brightness the albedo mixture does
/// not read as M sends everything to L, an M-like brightness splits by the M share, and a
/// missing albedo leaves the mass on the spectral side (L).
fn route_lm(
    table: &ClusterTable,
    mass: f64,
    log_albedo: LogAlbedo,
    probs: &mut ClassProbabilities,
) -> Result<(), TaxoError> {
    if log_albedo.is_nan() {
        probs.add(Class::L, mass);
        return Ok(());
    }
    if table.albedo_class(log_albedo)? != Class::M {
        probs.add(Class::L, mass);
        return Ok(());
    }
    let split = table.albedo_split(log_albedo)?;
    let m_share = split[1];
    probs.add(Class::M, mass * m_share);
    probs.add(Class::L, mass * (1.0 - m_share));
    Ok(())
}

/// The hand-tuned D/S correction: a dark albedo means D, a bright one S; without an albedo
/// the sign of z3 decides. Deliberately a threshold rule, not a trained mixture.
fn route_ds(
    mass: f64,
    latent_scores: &DVector<f64>,
    log_albedo: LogAlbedo,
    probs: &mut ClassProbabilities,
) -> Result<(), TaxoError> {
    let dark = if log_albedo.is_nan() {
        if DS_LATENT_DIM >= latent_scores.len() {
            return Err(TaxoError::LatentContract(format!(
                "D/S rule needs latent dimension z{}, model provides {}",
                DS_LATENT_DIM + 1,
                latent_scores.len()
            )));
        }
        latent_scores[DS_LATENT_DIM] >= 0.0
    } else {
        log_albedo <= DS_LOG_ALBEDO_SPLIT
    };
    probs.add(if dark { Class::D } else { Class::S }, mass);
    Ok(())
}

/// Move two thirds of the K/L/M mass to E when the albedo reads as E-like.
fn e_type_rescue(
    table: &ClusterTable,
    log_albedo: LogAlbedo,
    probs: &mut ClassProbabilities,
) -> Result<(), TaxoError> {
    if log_albedo.is_nan() {
        return Ok(());
    }
    if table.albedo_class(log_albedo)? != Class::E {
        return Ok(());
    }
    for class in [Class::K, Class::L, Class::M] {
        let moved = probs.get(class) * E_RESCUE_FRACTION;
        probs.add(class, -moved);
        probs.add(Class::E, moved);
    }
    Ok(())
}

/// Pick the latent coordinates a continuum mixture is evaluated on.
fn latent_point(
    latent_scores: &DVector<f64>,
    dims: &[usize],
) -> Result<DVector<f64>, TaxoError> {
    if let Some(&bad) = dims.iter().find(|&&d| d >= latent_scores.len()) {
        return Err(TaxoError::LatentContract(format!(
            "cluster mixture needs latent dimension z{}, model provides {}",
            bad + 1,
            latent_scores.len()
        )));
    }
    Ok(DVector::from_iterator(
        dims.len(),
        dims.iter().map(|&d| latent_scores[d]),
    ))
}

/// Every entry must be a valid probability and the total must match the routed mass.
fn validate_mass(probs: &ClassProbabilities, routed: f64) -> Result<(), TaxoError> {
    for (class, p) in probs.iter() {
        if !p.is_finite() || p < -PROB_EPS || p > 1.0 + PROB_EPS {
            return Err(TaxoError::InconsistentResolution(format!(
                "class {class} ended at probability {p}"
            )));
        }
    }
    let total = probs.total();
    if (total - routed).abs() > PROB_EPS {
        return Err(TaxoError::InconsistentResolution(format!(
            "routed mass {routed} resolved to total probability {total}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod resolver_test {
    use approx::assert_relative_eq;
    use smallvec::smallvec;

    use super::*;
    use crate::mixtures::GaussianMixture;

    fn albedo_mixture() -> GaussianMixture {
        GaussianMixture::univariate(&[
            (0.52, -1.35, 0.050),
            (0.35, -0.88, 0.038),
            (0.13, -0.28, 0.030),
        ])
        .unwrap()
    }

    fn table(entries: Vec<ClusterKind>) -> ClusterTable {
        let entries = entries.into_iter().enumerate().collect();
        ClusterTable::from_parts(entries, albedo_mixture()).unwrap()
    }

    fn symmetric_pair(a: Class, b: Class, wide: bool) -> ClusterKind {
        ClusterKind::ContinuumGmm {
            dims: smallvec![0],
            classes: vec![a, b],
            mixture: GaussianMixture::univariate(&[(0.5, -1.0, 1.0), (0.5, 1.0, 1.0)]).unwrap(),
            wide,
        }
    }

    fn scores(z: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(z)
    }

    #[test]
    fn test_core_clusters_route_full_mass() {
        let table = table(vec![ClusterKind::Core(Class::S), ClusterKind::Core(Class::C)]);
        let probs = resolve(
            &table,
            &DVector::from_vec(vec![0.7, 0.3]),
            &scores(&[0.0; 4]),
            f64::NAN,
        )
        .unwrap();

        assert_relative_eq!(probs.get(Class::S), 0.7);
        assert_relative_eq!(probs.get(Class::C), 0.3);
        assert_relative_eq!(probs.total(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_x_complex_without_albedo_goes_to_x() {
        let table = table(vec![ClusterKind::XComplex]);
        let probs = resolve(
            &table,
            &DVector::from_vec(vec![1.0]),
            &scores(&[0.0; 4]),
            f64::NAN,
        )
        .unwrap();
        assert_relative_eq!(probs.get(Class::X), 1.0);
    }

    #[test]
    fn test_x_complex_splits_by_albedo() {
        let table = table(vec![ClusterKind::XComplex]);
        // Dark surface: the P component dominates.
        let probs = resolve(
            &table,
            &DVector::from_vec(vec![1.0]),
            &scores(&[0.0; 4]),
            -1.40,
        )
        .unwrap();

        assert!(probs.get(Class::P) > 0.9);
        assert!(probs.get(Class::X) == 0.0);
        let total = probs.get(Class::P) + probs.get(Class::M) + probs.get(Class::E);
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_continuum_split_follows_the_mixture() {
        let table = table(vec![
            ClusterKind::Core(Class::V),
            symmetric_pair(Class::K, Class::L, false),
        ]);

        // Equal split at the symmetry point, cluster mass 0.4.
        let probs = resolve(
            &table,
            &DVector::from_vec(vec![0.6, 0.4]),
            &scores(&[0.0, 0.0, 0.0, 0.0]),
            f64::NAN,
        )
        .unwrap();
        assert_relative_eq!(probs.get(Class::K), 0.2, epsilon = 1e-12);
        assert_relative_eq!(probs.get(Class::L), 0.2, epsilon = 1e-12);

        // Off-center, the split must follow the mixture's own predict_proba.
        let z1 = 0.4236;
        let probs = resolve(
            &table,
            &DVector::from_vec(vec![0.6, 0.4]),
            &scores(&[z1, 0.0, 0.0, 0.0]),
            f64::NAN,
        )
        .unwrap();
        let mixture = GaussianMixture::univariate(&[(0.5, -1.0, 1.0), (0.5, 1.0, 1.0)]).unwrap();
        let shares = mixture
            .predict_proba(&DVector::from_vec(vec![z1]))
            .unwrap();
        assert_relative_eq!(probs.get(Class::K), 0.4 * shares[0], epsilon = 1e-12);
        assert_relative_eq!(probs.get(Class::L), 0.4 * shares[1], epsilon = 1e-12);
    }

    #[test]
    fn test_lm_rule() {
        let table = table(vec![ClusterKind::LuminosityLm]);
        let resp = DVector::from_vec(vec![1.0]);

        // No albedo: spectral side, everything L.
        let probs = resolve(&table, &resp, &scores(&[0.0; 4]), f64::NAN).unwrap();
        assert_relative_eq!(probs.get(Class::L), 1.0);

        // Bright, E-like albedo is not M-like: everything L.
        let probs = resolve(&table, &resp, &scores(&[0.0; 4]), -0.26).unwrap();
        assert_relative_eq!(probs.get(Class::L), 1.0);
        assert_relative_eq!(probs.get(Class::M), 0.0);

        // M-like albedo: the M share goes to M, the rest stays L.
        let probs = resolve(&table, &resp, &scores(&[0.0; 4]), -0.88).unwrap();
        let m_share = table.albedo_split(-0.88).unwrap()[1];
        assert_relative_eq!(probs.get(Class::M), m_share, epsilon = 1e-12);
        assert_relative_eq!(probs.get(Class::L), 1.0 - m_share, epsilon = 1e-12);
    }

    #[test]
    fn test_ds_rule() {
        let table = table(vec![ClusterKind::ThresholdDs]);
        let resp = DVector::from_vec(vec![1.0]);

        // Dark albedo: D. Bright albedo: S.
        let probs = resolve(&table, &resp, &scores(&[0.0; 4]), -1.4).unwrap();
        assert_relative_eq!(probs.get(Class::D), 1.0);
        let probs = resolve(&table, &resp, &scores(&[0.0; 4]), -0.5).unwrap();
        assert_relative_eq!(probs.get(Class::S), 1.0);

        // No albedo: the sign of z3 decides.
        let probs = resolve(&table, &resp, &scores(&[0.0, 0.0, 1.0, 0.0]), f64::NAN).unwrap();
        assert_relative_eq!(probs.get(Class::D), 1.0);
        let probs = resolve(&table, &resp, &scores(&[0.0, 0.0, -1.0, 0.0]), f64::NAN).unwrap();
        assert_relative_eq!(probs.get(Class::S), 1.0);
    }

    #[test]
    fn test_e_type_rescue_moves_two_thirds() {
        let table = table(vec![ClusterKind::Core(Class::K)]);
        // Bright albedo reads as E: two thirds of the K mass must migrate.
        let probs = resolve(
            &table,
            &DVector::from_vec(vec![1.0]),
            &scores(&[0.0; 4]),
            -0.26,
        )
        .unwrap();

        assert_relative_eq!(probs.get(Class::K), 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(probs.get(Class::E), 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(probs.total(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rescue_skips_dark_albedo_and_missing_albedo() {
        let table = table(vec![ClusterKind::Core(Class::K)]);
        let probs = resolve(
            &table,
            &DVector::from_vec(vec![1.0]),
            &scores(&[0.0; 4]),
            -1.4,
        )
        .unwrap();
        assert_relative_eq!(probs.get(Class::K), 1.0);

        let probs = resolve(
            &table,
            &DVector::from_vec(vec![1.0]),
            &scores(&[0.0; 4]),
            f64::NAN,
        )
        .unwrap();
        assert_relative_eq!(probs.get(Class::K), 1.0);
    }

    #[test]
    fn test_wide_cluster_resolves_after_the_rescue() {
        let table = table(vec![
            ClusterKind::Core(Class::K),
            symmetric_pair(Class::K, Class::L, true),
        ]);
        // Bright, E-like albedo. The core K mass (0.5) is rescued; the wide cluster's
        // contribution (0.25 K + 0.25 L at the symmetry point) lands afterwards, untouched.
        let probs = resolve(
            &table,
            &DVector::from_vec(vec![0.5, 0.5]),
            &scores(&[0.0; 4]),
            -0.26,
        )
        .unwrap();

        assert_relative_eq!(probs.get(Class::E), 0.5 * 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(probs.get(Class::K), 0.5 / 3.0 + 0.25, epsilon = 1e-12);
        assert_relative_eq!(probs.get(Class::L), 0.25, epsilon = 1e-12);
        assert_relative_eq!(probs.total(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_responsibility_is_an_error() {
        let table = table(vec![ClusterKind::Core(Class::S), ClusterKind::Core(Class::C)]);
        let result = resolve(
            &table,
            &DVector::from_vec(vec![0.5, f64::NAN]),
            &scores(&[0.0; 4]),
            f64::NAN,
        );
        assert!(matches!(result, Err(TaxoError::DegenerateMixtureOutput(1))));
    }

    #[test]
    fn test_responsibility_length_mismatch_is_an_error() {
        let table = table(vec![ClusterKind::Core(Class::S)]);
        let result = resolve(
            &table,
            &DVector::from_vec(vec![0.5, 0.5]),
            &scores(&[0.0; 4]),
            f64::NAN,
        );
        assert!(matches!(result, Err(TaxoError::LatentContract(_))));
    }

    #[test]
    fn test_mass_conservation_across_a_mixed_table() {
        let table = table(vec![
            ClusterKind::Core(Class::S),
            ClusterKind::XComplex,
            symmetric_pair(Class::B, Class::C, false),
            ClusterKind::LuminosityLm,
            ClusterKind::ThresholdDs,
        ]);
        let resp = DVector::from_vec(vec![0.2, 0.25, 0.3, 0.15, 0.1]);
        let probs = resolve(&table, &resp, &scores(&[0.3, -0.2, 0.5, 0.1]), -0.9).unwrap();

        assert_relative_eq!(probs.total(), 1.0, epsilon = 1e-9);
        for (_, p) in probs.iter() {
            assert!((0.0..=1.0).contains(&p));
        }
    }
}
