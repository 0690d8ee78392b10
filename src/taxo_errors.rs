use thiserror::Error;

use crate::constants::ClusterId;

#[derive(Error, Debug)]
pub enum TaxoError {
    #[error("Mismatched spectrum arrays: {wave} wavelength bins vs {refl} reflectance values")]
    MismatchedArrayLengths { wave: usize, refl: usize },

    #[error("Mismatched uncertainty array: {err} values for {refl} reflectance bins")]
    MismatchedUncertaintyLength { err: usize, refl: usize },

    #[error("Spectrum is empty after removing non-finite samples")]
    EmptySpectrum,

    #[error("Unknown taxonomic class: {0}")]
    UnknownClass(String),

    #[error("Unknown spectral feature: {0}")]
    UnknownFeature(String),

    #[error("Invalid feature detection parameters: {0}")]
    InvalidDetectionParams(String),

    #[error("Unknown latent dimension: {0}")]
    UnknownLatentDimension(String),

    #[error("Cluster table parsing failed on line: {0}")]
    ClusterTableParsing(String),

    #[error("Cluster table entry missing for cluster {0}")]
    MissingClusterEntry(ClusterId),

    #[error("Duplicate cluster table entry for cluster {0}")]
    DuplicateClusterEntry(ClusterId),

    #[error("Invalid Gaussian mixture: {0}")]
    InvalidMixture(String),

    #[error("Invalid reference library: {0}")]
    InvalidReferenceLibrary(String),

    #[error("CSV reading error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Latent model broke its inference contract: {0}")]
    LatentContract(String),

    #[error("Trained mixture produced a non-finite probability for cluster {0}")]
    DegenerateMixtureOutput(ClusterId),

    #[error("Cluster resolution lost probability mass: {0}")]
    InconsistentResolution(String),

    #[error("Cannot aggregate an empty set of classified observations")]
    NoObservations,
}
