use nalgebra::DVector;

use taxo::latent::LatentModel;
use taxo::observations::Observation;
use taxo::taxo_errors::TaxoError;

/// A frozen stand-in latent model that puts the full responsibility mass on one cluster.
pub struct OneHotLatentModel {
    pub n_clusters: usize,
    pub cluster: usize,
    pub scores: Vec<f64>,
}

impl LatentModel for OneHotLatentModel {
    fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    fn n_latent(&self) -> usize {
        self.scores.len()
    }

    fn predict_proba(&self, _input: &DVector<f64>) -> Result<DVector<f64>, TaxoError> {
        let mut responsibilities = DVector::zeros(self.n_clusters);
        responsibilities[self.cluster] = 1.0;
        Ok(responsibilities)
    }

    fn impute(&self, input: &DVector<f64>) -> Result<DVector<f64>, TaxoError> {
        Ok(input.map(|v| if v.is_finite() { v } else { 0.0 }))
    }

    fn transform(&self, _imputed: &DVector<f64>) -> Result<DVector<f64>, TaxoError> {
        Ok(DVector::from_column_slice(&self.scores))
    }
}

/// A frozen stand-in latent model with explicit responsibilities and latent scores.
pub struct FixedLatentModel {
    pub responsibilities: Vec<f64>,
    pub scores: Vec<f64>,
}

impl LatentModel for FixedLatentModel {
    fn n_clusters(&self) -> usize {
        self.responsibilities.len()
    }

    fn n_latent(&self) -> usize {
        self.scores.len()
    }

    fn predict_proba(&self, _input: &DVector<f64>) -> Result<DVector<f64>, TaxoError> {
        Ok(DVector::from_column_slice(&self.responsibilities))
    }

    fn impute(&self, input: &DVector<f64>) -> Result<DVector<f64>, TaxoError> {
        Ok(input.map(|v| if v.is_finite() { v } else { 0.0 }))
    }

    fn transform(&self, _imputed: &DVector<f64>) -> Result<DVector<f64>, TaxoError> {
        Ok(DVector::from_column_slice(&self.scores))
    }
}

/// A flat spectrum densely covering the whole trained grid.
pub fn flat_spectrum(albedo: Option<f64>) -> Observation {
    let wave: Vec<f64> = (0..420).map(|i| 0.43 + i as f64 * 0.005).collect();
    let refl = vec![1.0; wave.len()];
    Observation::new(wave, refl, None, albedo).unwrap()
}

/// A full-grid spectrum with one Gaussian absorption band on a shallow red slope.
pub fn band_spectrum(center: f64, sigma: f64, depth: f64, albedo: Option<f64>) -> Observation {
    let wave: Vec<f64> = (0..420).map(|i| 0.43 + i as f64 * 0.005).collect();
    let refl = wave
        .iter()
        .map(|w| {
            let band = depth * (-((w - center) / sigma).powi(2) / 2.0).exp();
            (1.0 + 0.05 * (w - 0.55)) * (1.0 - band)
        })
        .collect();
    Observation::new(wave, refl, None, albedo).unwrap()
}

/// A spectrum covering only 0.45–0.55 µm.
pub fn narrow_blue_spectrum(albedo: Option<f64>) -> Observation {
    let wave: Vec<f64> = (0..40).map(|i| 0.45 + i as f64 * 0.0025).collect();
    let refl = vec![1.0; wave.len()];
    Observation::new(wave, refl, None, albedo).unwrap()
}

/// A thermal-infrared spectrum entirely outside the trained grid.
pub fn off_grid_spectrum(albedo: Option<f64>) -> Observation {
    let wave: Vec<f64> = (0..60).map(|i| 3.0 + i as f64 * 0.02).collect();
    let refl = vec![1.0; wave.len()];
    Observation::new(wave, refl, None, albedo).unwrap()
}
