//! # Frozen Gaussian mixture evaluation
//!
//! The resolver splits cluster responsibility mass with small pre-trained Gaussian Mixture
//! Models over one or two latent dimensions (or over the log-albedo). Training happened
//! elsewhere; this module only **evaluates** mixtures whose weights, means, and covariances
//! are frozen configuration data.
//!
//! Densities are computed through the Cholesky factor of each covariance, with the
//! responsibilities normalized in log space so tail evaluations stay finite.

use nalgebra::{DMatrix, DVector};

use crate::taxo_errors::TaxoError;

/// A frozen Gaussian mixture over 1–2 dimensions with full covariances.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    weights: Vec<f64>,
    means: Vec<DVector<f64>>,
    chol_lower: Vec<DMatrix<f64>>,
    log_norm: Vec<f64>,
    dim: usize,
}

impl GaussianMixture {
    /// Build a mixture from frozen parameters.
    ///
    /// Arguments
    /// -----------------
    /// * `weights`: mixing weights, positive, summing to 1 (within 1e-6).
    /// * `means`: one mean vector per component, all of the same dimension.
    /// * `covariances`: one symmetric positive-definite matrix per component.
    ///
    /// Return
    /// ----------
    /// * The mixture with precomputed Cholesky factors, or a [`TaxoError`] describing the
    ///   first inconsistency found.
    pub fn new(
        weights: Vec<f64>,
        means: Vec<DVector<f64>>,
        covariances: Vec<DMatrix<f64>>,
    ) -> Result<Self, TaxoError> {
        if weights.is_empty() {
            return Err(TaxoError::InvalidMixture("no components".into()));
        }
        if means.len() != weights.len() || covariances.len() != weights.len() {
            return Err(TaxoError::InvalidMixture(format!(
                "component count mismatch: {} weights, {} means, {} covariances",
                weights.len(),
                means.len(),
                covariances.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(TaxoError::InvalidMixture(
                "weights must be positive and finite".into(),
            ));
        }
        let weight_sum: f64 = weights.iter().sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(TaxoError::InvalidMixture(format!(
                "weights sum to {weight_sum}, expected 1"
            )));
        }

        let dim = means[0].len();
        let mut chol_lower = Vec::with_capacity(weights.len());
        let mut log_norm = Vec::with_capacity(weights.len());
        for (k, (mean, cov)) in means.iter().zip(&covariances).enumerate() {
            if mean.len() != dim {
                return Err(TaxoError::InvalidMixture(format!(
                    "component {k} mean has dimension {}, expected {dim}",
                    mean.len()
                )));
            }
            if cov.nrows() != dim || cov.ncols() != dim {
                return Err(TaxoError::InvalidMixture(format!(
                    "component {k} covariance is {}x{}, expected {dim}x{dim}",
                    cov.nrows(),
                    cov.ncols()
                )));
            }
            let chol = cov.clone().cholesky().ok_or_else(|| {
                TaxoError::InvalidMixture(format!(
                    "component {k} covariance is not positive definite"
                ))
            })?;
            let lower = chol.l();
            let log_det_sqrt: f64 = (0..dim).map(|i| lower[(i, i)].ln()).sum();
            log_norm.push(-0.5 * dim as f64 * (2.0 * std::f64::consts::PI).ln() - log_det_sqrt);
            chol_lower.push(lower);
        }

        Ok(GaussianMixture {
            weights,
            means,
            chol_lower,
            log_norm,
            dim,
        })
    }

    /// Convenience constructor for 1-D mixtures given `(weight, mean, variance)` triples.
    pub fn univariate(components: &[(f64, f64, f64)]) -> Result<Self, TaxoError> {
        let weights = components.iter().map(|c| c.0).collect();
        let means = components
            .iter()
            .map(|c| DVector::from_vec(vec![c.1]))
            .collect();
        let covariances = components
            .iter()
            .map(|c| DMatrix::from_element(1, 1, c.2))
            .collect();
        GaussianMixture::new(weights, means, covariances)
    }

    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Mean vectors of the components, in storage order.
    pub fn means(&self) -> &[DVector<f64>] {
        &self.means
    }

    /// Posterior component probabilities for one point.
    ///
    /// Arguments
    /// -----------------
    /// * `x`: the evaluation point; must be finite and of the mixture dimension.
    ///
    /// Return
    /// ----------
    /// * One probability per component, summing to 1, or a [`TaxoError`] when the input
    ///   does not satisfy the evaluation contract.
    pub fn predict_proba(&self, x: &DVector<f64>) -> Result<Vec<f64>, TaxoError> {
        if x.len() != self.dim {
            return Err(TaxoError::InvalidMixture(format!(
                "evaluation point has dimension {}, expected {}",
                x.len(),
                self.dim
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(TaxoError::InvalidMixture(
                "evaluation point is not finite".into(),
            ));
        }

        let log_joint: Vec<f64> = (0..self.weights.len())
            .map(|k| self.weights[k].ln() + self.log_density(k, x))
            .collect();

        // Normalize in log space: exp(l - max) never overflows, and at least the best
        // component contributes exactly 1.
        let max = log_joint.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return Err(TaxoError::InvalidMixture(
                "all component densities vanished".into(),
            ));
        }
        let unnormalized: Vec<f64> = log_joint.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = unnormalized.iter().sum();
        Ok(unnormalized.into_iter().map(|p| p / total).collect())
    }

    /// Index of the most probable component for one point.
    pub fn map_component(&self, x: &DVector<f64>) -> Result<usize, TaxoError> {
        let proba = self.predict_proba(x)?;
        let mut best = 0;
        for (k, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = k;
            }
        }
        Ok(best)
    }

    /// Log density of component `k` at `x`.
    fn log_density(&self, k: usize, x: &DVector<f64>) -> f64 {
        let diff = x - &self.means[k];
        let z = self.chol_lower[k]
            .solve_lower_triangular(&diff)
            .expect("Cholesky factor has a non-singular diagonal");
        self.log_norm[k] - 0.5 * z.norm_squared()
    }
}
