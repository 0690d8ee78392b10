//! # Constants and type definitions for taxo
//!
//! This module centralizes the **fixed wavelength grid**, **numeric thresholds**, and **common
//! type definitions** used throughout the `taxo` library.
//!
//! ## Overview
//!
//! - The trained wavelength grid (visible + near-infrared, two step sizes)
//! - Unit type aliases (microns, albedo, log-albedo)
//! - Identifiers for clusters and latent dimensions
//! - Container types shared across modules
//!
//! These definitions are consumed by preprocessing, feature detection, the cluster-to-class
//! resolver, and the aggregator. All of them describe frozen properties of the trained model;
//! none are computed at classification time.

use smallvec::SmallVec;

use crate::classification::ClassifiedResult;

// -------------------------------------------------------------------------------------------------
// Wavelength grid
// -------------------------------------------------------------------------------------------------

/// Number of bins in the trained wavelength grid.
pub const N_GRID: usize = 39;

/// Grid step in the visible range (below [`GRID_BREAK`]), in microns.
pub const GRID_STEP_VIS: f64 = 0.025;

/// Grid step in the near-infrared range (above [`GRID_BREAK`]), in microns.
pub const GRID_STEP_NIR: f64 = 0.10;

/// Wavelength at which the grid switches step size, in microns.
pub const GRID_BREAK: f64 = 1.05;

/// The fixed wavelength grid the model was trained on: 0.45–1.05 µm sampled every 0.025 µm,
/// then 1.15–2.45 µm sampled every 0.10 µm.
pub const WAVELENGTH_GRID: [Micron; N_GRID] = [
    0.450, 0.475, 0.500, 0.525, 0.550, 0.575, 0.600, 0.625, 0.650, 0.675, 0.700, 0.725, 0.750,
    0.775, 0.800, 0.825, 0.850, 0.875, 0.900, 0.925, 0.950, 0.975, 1.000, 1.025, 1.050, 1.150,
    1.250, 1.350, 1.450, 1.550, 1.650, 1.750, 1.850, 1.950, 2.050, 2.150, 2.250, 2.350, 2.450,
];

/// Fraction of the grid span over which reflectance may be extrapolated beyond the observed
/// wavelength range during resampling. Bins further out stay missing.
pub const EXTRAPOLATION_LIMIT: f64 = 0.047;

/// Minimum number of non-missing resampled bins for a spectrum to be classifiable without
/// an albedo. Shorter spectra produce the explicit unclassifiable result.
pub const MIN_CLASSIFIABLE_BINS: usize = 10;

// -------------------------------------------------------------------------------------------------
// Trained model dimensions
// -------------------------------------------------------------------------------------------------

/// Number of clusters in the trained latent partition.
pub const N_CLUSTERS: usize = 50;

/// Number of latent dimensions produced by the factor model (z1–z4).
pub const N_LATENT: usize = 4;

/// Length of the latent-model input vector: the grid bins followed by the log-albedo column.
pub const N_INPUT: usize = N_GRID + 1;

/// Number of nearest reference spectra used by the log-normalization.
pub const N_NEIGHBORS: usize = 5;

/// Tolerance on probability bookkeeping (mass conservation checks).
pub const PROB_EPS: f64 = 1e-6;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Wavelength in microns
pub type Micron = f64;
/// Geometric albedo (dimensionless, positive)
pub type Albedo = f64;
/// Base-10 logarithm of the geometric albedo
pub type LogAlbedo = f64;
/// Identifier of a cluster in the trained latent partition (0..[`N_CLUSTERS`])
pub type ClusterId = usize;

/// A small, inline-optimized container for the classified observations of a single asteroid.
pub type ClassifiedSet = SmallVec<[ClassifiedResult; 4]>;
