//! # Classification results
//!
//! The output of one [`classify`](crate::taxo::Taxo::classify) call: a fixed-shape record
//! populated eagerly by the orchestrator. There is no lazily-materialized state — every
//! field is final when the call returns, and the input observation is left untouched (the
//! preprocessed arrays live here, under their own names).

use nalgebra::DVector;

use crate::classes::ClassProbabilities;
use crate::features::{Feature, FeatureName};
use crate::observations::Preprocessed;

/// The three diagnostic bands of one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub e: Feature,
    pub h: Feature,
    pub k: Feature,
}

impl FeatureSet {
    pub fn get(&self, name: FeatureName) -> &Feature {
        match name {
            FeatureName::E => &self.e,
            FeatureName::H => &self.h,
            FeatureName::K => &self.k,
        }
    }

    /// All bands reported as not observed (used by unclassifiable results built without
    /// any spectral coverage).
    pub fn not_observed() -> Self {
        FeatureSet {
            e: Feature::not_observed(FeatureName::E),
            h: Feature::not_observed(FeatureName::H),
            k: Feature::not_observed(FeatureName::K),
        }
    }
}

/// The complete result of classifying one observation.
#[derive(Debug, Clone)]
pub struct ClassifiedResult {
    /// Most probable class label, or the empty string for unclassifiable input.
    pub class: String,
    /// Probability per class. After h-feature folding the entries need not sum to 1.
    pub probabilities: ClassProbabilities,
    /// Latent coordinates of the (imputed) observation; empty for unclassifiable input.
    pub latent_scores: DVector<f64>,
    /// Cluster responsibilities; empty for unclassifiable input.
    pub responsibilities: DVector<f64>,
    /// Detected absorption bands.
    pub features: FeatureSet,
    /// The gridded, normalized view the model consumed.
    pub preprocessed: Preprocessed,
}

impl ClassifiedResult {
    /// The explicit "cannot classify this input" result: empty label, all-NaN
    /// probabilities. Feature detections are kept — they only depend on the raw arrays.
    pub fn unclassifiable(features: FeatureSet) -> Self {
        ClassifiedResult {
            class: String::new(),
            probabilities: ClassProbabilities::undetermined(),
            latent_scores: DVector::zeros(0),
            responsibilities: DVector::zeros(0),
            features,
            preprocessed: Preprocessed::missing(),
        }
    }

    /// True when classification produced a class label.
    pub fn is_classified(&self) -> bool {
        !self.class.is_empty()
    }

    /// Completeness of the model input: observed bins plus albedo availability.
    pub fn n_observed_columns(&self) -> usize {
        self.preprocessed.n_observed_columns()
    }
}
