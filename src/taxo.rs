//! # Taxo: the classification façade
//!
//! This module defines the [`Taxo`] struct, the central façade that wires together:
//!
//! 1. **Frozen artifacts** — the per-cluster resolution table
//!    ([`ClusterTable`](crate::cluster_table::ClusterTable)) and the normalization
//!    reference library ([`ReferenceLibrary`](crate::normalization::ReferenceLibrary)),
//!    loaded once at construction and read-only afterwards.
//! 2. **The latent factor model** — injected by the caller behind the
//!    [`LatentModel`](crate::latent::LatentModel) trait; only its inference contract is
//!    consumed.
//! 3. **Feature detection** — e/h/k band fitting with the configured
//!    [`DetectionParams`](crate::features::DetectionParams).
//!
//! ## Classification pipeline
//!
//! [`classify`](Taxo::classify) runs, in order: the classifiability gate (spectral grid
//! coverage or an albedo, otherwise the explicit unclassifiable result), preprocessing
//! (resampling, reference-neighbor log-normalization, log-albedo), feature detection on the
//! **raw** arrays, latent inference (responsibilities, imputation, latent scores), the
//! cluster-to-class resolver, h-feature folding into `Ch`, and the final deterministic
//! argmax.
//!
//! Each call is independent and side-effect free on shared state; the loaded artifacts are
//! never mutated. [`classify_all`](Taxo::classify_all) maps a batch to per-observation
//! results so one failing spectrum cannot abort the rest.

use std::sync::Arc;

use crate::classes::{Class, ClassProbabilities};
use crate::classification::{ClassifiedResult, FeatureSet};
use crate::cluster_table::ClusterTable;
use crate::constants::N_LATENT;
use crate::features::{detect, DetectionParams, FeatureName};
use crate::latent::LatentModel;
use crate::normalization::ReferenceLibrary;
use crate::observations::{preprocess, Observation};
use crate::resolver::resolve;
use crate::taxo_errors::TaxoError;

/// Classes whose probability mass folds into `Ch` when the h band is present.
const H_FOLD_SOURCES: [Class; 3] = [Class::C, Class::B, Class::P];

/// Classes whose argmax triggers the h-feature fold.
const H_FOLD_CANDIDATES: [Class; 5] = [Class::B, Class::C, Class::Ch, Class::P, Class::X];

/// The classification context: frozen artifacts plus the injected latent model.
#[derive(Clone)]
pub struct Taxo {
    cluster_table: Arc<ClusterTable>,
    reference_library: Arc<ReferenceLibrary>,
    latent_model: Arc<dyn LatentModel>,
    detection: DetectionParams,
}

impl Taxo {
    /// Construct a context over the artifacts embedded in the crate.
    ///
    /// Arguments
    /// -----------------
    /// * `latent_model`: the frozen latent factor model to run inference with.
    ///
    /// Return
    /// ----------
    /// * The ready-to-use context, or a [`TaxoError`] when the model dimensions do not
    ///   match the embedded cluster table.
    pub fn new(latent_model: Arc<dyn LatentModel>) -> Result<Self, TaxoError> {
        Taxo::with_artifacts(
            Arc::new(ClusterTable::embedded().clone()),
            Arc::new(ReferenceLibrary::embedded().clone()),
            latent_model,
            DetectionParams::default(),
        )
    }

    /// Construct a context over explicit artifacts.
    ///
    /// Arguments
    /// -----------------
    /// * `cluster_table`: the per-cluster resolution table.
    /// * `reference_library`: the normalization reference library.
    /// * `latent_model`: the frozen latent factor model.
    /// * `detection`: feature detection parameters.
    ///
    /// Return
    /// ----------
    /// * The context, or a [`TaxoError`] when the model and the table disagree on the
    ///   number of clusters or latent dimensions.
    pub fn with_artifacts(
        cluster_table: Arc<ClusterTable>,
        reference_library: Arc<ReferenceLibrary>,
        latent_model: Arc<dyn LatentModel>,
        detection: DetectionParams,
    ) -> Result<Self, TaxoError> {
        if latent_model.n_clusters() != cluster_table.n_clusters() {
            return Err(TaxoError::LatentContract(format!(
                "model predicts {} clusters, table resolves {}",
                latent_model.n_clusters(),
                cluster_table.n_clusters()
            )));
        }
        if latent_model.n_latent() < N_LATENT {
            return Err(TaxoError::LatentContract(format!(
                "model provides {} latent dimensions, the resolver consumes {N_LATENT}",
                latent_model.n_latent()
            )));
        }
        Ok(Taxo {
            cluster_table,
            reference_library,
            latent_model,
            detection,
        })
    }

    /// The loaded cluster resolution table.
    pub fn cluster_table(&self) -> &ClusterTable {
        &self.cluster_table
    }

    /// The loaded normalization reference library.
    pub fn reference_library(&self) -> &ReferenceLibrary {
        &self.reference_library
    }

    /// Classify one observation.
    ///
    /// Arguments
    /// -----------------
    /// * `observation`: the validated, immutable observation.
    ///
    /// Return
    /// ----------
    /// * The eagerly populated [`ClassifiedResult`]. Insufficient input coverage yields
    ///   `Ok` with the explicit unclassifiable result; a [`TaxoError`] signals a broken
    ///   inference contract or corrupted frozen artifacts, never a property of the sky.
    pub fn classify(&self, observation: &Observation) -> Result<ClassifiedResult, TaxoError> {
        // Band detection only depends on the raw arrays, so unclassifiable spectra still
        // report their features.
        let features = self.detect_features(observation);

        if !observation.is_classifiable() {
            return Ok(ClassifiedResult::unclassifiable(features));
        }

        let preprocessed = preprocess(observation, &self.reference_library);
        let input = preprocessed.latent_input();

        let responsibilities = self.latent_model.predict_proba(&input)?;
        let imputed = self.latent_model.impute(&input)?;
        let latent_scores = self.latent_model.transform(&imputed)?;

        let mut probabilities = resolve(
            &self.cluster_table,
            &responsibilities,
            &latent_scores,
            preprocessed.log_albedo,
        )?;

        fold_h_feature(&mut probabilities, features.h.is_present());

        let class = probabilities
            .argmax()
            .map(|c| c.label().to_string())
            .unwrap_or_default();

        Ok(ClassifiedResult {
            class,
            probabilities,
            latent_scores,
            responsibilities,
            features,
            preprocessed,
        })
    }

    /// Classify a batch, isolating failures per observation.
    ///
    /// One observation hitting an internal error does not abort the others; callers decide
    /// whether to skip or surface the per-item errors.
    pub fn classify_all(
        &self,
        observations: &[Observation],
    ) -> Vec<Result<ClassifiedResult, TaxoError>> {
        observations.iter().map(|obs| self.classify(obs)).collect()
    }

    fn detect_features(&self, observation: &Observation) -> FeatureSet {
        let run = |name: FeatureName| {
            detect(
                observation.wave(),
                observation.refl(),
                observation.refl_err(),
                name,
                &self.detection,
            )
        };
        FeatureSet {
            e: run(FeatureName::E),
            h: run(FeatureName::H),
            k: run(FeatureName::K),
        }
    }
}

/// Fold C/B/P mass into `Ch` when the h band is present and the leading class belongs to
/// the candidate set. A one-way merge: the sources are zeroed, nothing is renormalized.
fn fold_h_feature(probabilities: &mut ClassProbabilities, h_present: bool) {
    if !h_present {
        return;
    }
    let Some(best) = probabilities.argmax() else {
        return;
    };
    if !H_FOLD_CANDIDATES.contains(&best) {
        return;
    }
    let folded: f64 = H_FOLD_SOURCES
        .iter()
        .map(|&class| probabilities.get(class))
        .sum();
    probabilities.add(Class::Ch, folded);
    for class in H_FOLD_SOURCES {
        probabilities.set(class, 0.0);
    }
}

#[cfg(test)]
mod taxo_test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_fold_h_feature_merges_cbp_into_ch() {
        let mut probs = ClassProbabilities::zeros();
        probs.set(Class::C, 0.5);
        probs.set(Class::B, 0.2);
        probs.set(Class::P, 0.1);
        probs.set(Class::S, 0.2);

        fold_h_feature(&mut probs, true);

        assert_relative_eq!(probs.get(Class::Ch), 0.8);
        assert_relative_eq!(probs.get(Class::C), 0.0);
        assert_relative_eq!(probs.get(Class::B), 0.0);
        assert_relative_eq!(probs.get(Class::P), 0.0);
        assert_relative_eq!(probs.get(Class::S), 0.2);
    }

    #[test]
    fn test_fold_h_feature_requires_candidate_argmax() {
        let mut probs = ClassProbabilities::zeros();
        probs.set(Class::S, 0.6);
        probs.set(Class::C, 0.4);

        fold_h_feature(&mut probs, true);

        // S leads: the fold must not fire.
        assert_relative_eq!(probs.get(Class::C), 0.4);
        assert_relative_eq!(probs.get(Class::Ch), 0.0);
    }

    #[test]
    fn test_fold_h_feature_noop_without_h() {
        let mut probs = ClassProbabilities::zeros();
        probs.set(Class::C, 0.9);
        fold_h_feature(&mut probs, false);
        assert_relative_eq!(probs.get(Class::C), 0.9);
    }
}
