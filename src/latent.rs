//! # Latent factor model interface
//!
//! The latent mixture-of-factor-analyzers model is trained ahead of time and consumed here
//! as a frozen black box. The core only relies on the three-method inference contract below
//! and assumes nothing about the model internals; in particular the model must tolerate
//! **partially-missing input** (`NaN` bins and/or a `NaN` albedo column), computing cluster
//! responsibilities from the observed dimensions only.
//!
//! The input vector layout is fixed by [`Preprocessed::latent_input`]
//! (crate::observations::Preprocessed::latent_input): [`N_GRID`](crate::constants::N_GRID)
//! normalized log-reflectance bins followed by one log-albedo column.
//!
//! Implementations are injected into [`Taxo`](crate::taxo::Taxo) by the caller; training,
//! persistence, and parameter management stay outside this crate.

use nalgebra::DVector;

use crate::taxo_errors::TaxoError;

/// Inference contract of the frozen latent factor model.
pub trait LatentModel: Send + Sync {
    /// Number of clusters in the trained partition. Must match the cluster table.
    fn n_clusters(&self) -> usize;

    /// Number of latent dimensions produced by [`transform`](LatentModel::transform).
    fn n_latent(&self) -> usize;

    /// Posterior cluster responsibilities for one input vector.
    ///
    /// The returned vector has length [`n_clusters`](LatentModel::n_clusters) and sums
    /// to 1. Missing input dimensions (`NaN`) must be marginalized out, not propagated.
    fn predict_proba(&self, input: &DVector<f64>) -> Result<DVector<f64>, TaxoError>;

    /// Fill missing input dimensions with their model-expected values.
    fn impute(&self, input: &DVector<f64>) -> Result<DVector<f64>, TaxoError>;

    /// Project a complete (imputed) input vector onto the latent dimensions.
    fn transform(&self, imputed: &DVector<f64>) -> Result<DVector<f64>, TaxoError>;
}
