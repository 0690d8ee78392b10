//! # The frozen cluster resolution table
//!
//! The latent partition has [`N_CLUSTERS`](crate::constants::N_CLUSTERS) clusters, and each
//! one resolves to taxonomic classes in its own way. This module loads that mapping as an
//! opaque, read-only table keyed by cluster id, decoupling the resolver's algorithm from the
//! trained numeric values.
//!
//! Every cluster is one of:
//!
//! - **core** — the cluster maps 1:1 to a class;
//! - **xcomplex** — ambiguous among E/M/P, split by the shared 3-component albedo mixture
//!   (or routed to X when the albedo is missing);
//! - **gmm** — a continuum cluster with 2+ candidate classes, split by a dedicated mixture
//!   over named latent dimensions;
//! - **wide** — the single most ambiguous continuum cluster, resolved *after* the E-type
//!   rescue;
//! - **lum** — the L/M pair resolved by albedo brightness;
//! - **split** — the hand-tuned D/S threshold rule (no trained mixture).
//!
//! The table is parsed from a small line-oriented text format (embedded in the crate, also
//! loadable from a path or any string) with `!` comments, mirroring how the other frozen
//! artifacts of this crate are stored.

use std::collections::HashMap;
use std::str::FromStr;

use ahash::RandomState;
use camino::Utf8Path;
use nalgebra::{DMatrix, DVector};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map, map_res},
    multi::separated_list1,
    number::complete::double,
    sequence::{delimited, preceded},
    IResult, Parser,
};
use once_cell::sync::Lazy;
use smallvec::SmallVec;

use crate::classes::Class;
use crate::constants::{ClusterId, LogAlbedo, N_LATENT};
use crate::mixtures::GaussianMixture;
use crate::taxo_errors::TaxoError;

static EMBEDDED_TABLE: &str = include_str!("data/clusters.table");

static EMBEDDED: Lazy<ClusterTable> =
    Lazy::new(|| EMBEDDED_TABLE.parse().expect("embedded cluster table must parse"));

/// Classes attached to the albedo-mixture components, ascending in mean brightness.
pub const ALBEDO_COMPONENT_CLASSES: [Class; 3] = [Class::P, Class::M, Class::E];

/// How one cluster's responsibility mass resolves to classes.
#[derive(Debug, Clone)]
pub enum ClusterKind {
    /// Full mass to one class.
    Core(Class),
    /// Split by albedo into P/M/E, or routed to X without an albedo.
    XComplex,
    /// Split across candidate classes by a dedicated mixture over latent dimensions.
    ContinuumGmm {
        /// Latent dimension indices the mixture is evaluated on (0-based).
        dims: SmallVec<[usize; 2]>,
        /// Candidate classes, aligned with the mixture components.
        classes: Vec<Class>,
        mixture: GaussianMixture,
        /// The widest continuum cluster resolves after the E-type rescue.
        wide: bool,
    },
    /// The L/M pair: albedo brightness decides, without an albedo the mass stays spectral (L).
    LuminosityLm,
    /// The hand-tuned D/S threshold correction.
    ThresholdDs,
}

/// The frozen, read-only resolution table.
#[derive(Debug, Clone)]
pub struct ClusterTable {
    entries: HashMap<ClusterId, ClusterKind, RandomState>,
    albedo_mixture: GaussianMixture,
    wide_cluster: Option<ClusterId>,
}

impl ClusterTable {
    /// The table embedded in the crate, parsed once and shared.
    pub fn embedded() -> &'static ClusterTable {
        &EMBEDDED
    }

    /// Assemble a table from already-built entries.
    ///
    /// Arguments
    /// -----------------
    /// * `entries`: one `(cluster id, kind)` pair per cluster; ids must form a contiguous
    ///   range starting at 0.
    /// * `albedo_mixture`: the shared 1-D, 3-component X-complex albedo mixture with
    ///   component means ascending (P, M, E).
    ///
    /// Return
    /// ----------
    /// * The validated table, or the [`TaxoError`] describing the first inconsistency.
    pub fn from_parts(
        entries: Vec<(ClusterId, ClusterKind)>,
        albedo_mixture: GaussianMixture,
    ) -> Result<Self, TaxoError> {
        if albedo_mixture.dim() != 1 || albedo_mixture.n_components() != 3 {
            return Err(TaxoError::InvalidMixture(format!(
                "albedo mixture must be 1-D with 3 components, got {}-D with {}",
                albedo_mixture.dim(),
                albedo_mixture.n_components()
            )));
        }
        let albedo_means: Vec<f64> = albedo_mixture.means().iter().map(|m| m[0]).collect();
        if !(albedo_means[0] < albedo_means[1] && albedo_means[1] < albedo_means[2]) {
            return Err(TaxoError::InvalidMixture(
                "albedo mixture component means must ascend (P, M, E)".into(),
            ));
        }

        let n = entries.len();
        let mut map: HashMap<ClusterId, ClusterKind, RandomState> = HashMap::default();
        let mut wide_cluster = None;

        for (id, kind) in entries {
            if let ClusterKind::ContinuumGmm {
                dims,
                classes,
                mixture,
                wide,
            } = &kind
            {
                if classes.len() != mixture.n_components() {
                    return Err(TaxoError::InvalidMixture(format!(
                        "cluster {id}: {} candidate classes for {} mixture components",
                        classes.len(),
                        mixture.n_components()
                    )));
                }
                if dims.len() != mixture.dim() {
                    return Err(TaxoError::InvalidMixture(format!(
                        "cluster {id}: {} latent dimensions for a {}-D mixture",
                        dims.len(),
                        mixture.dim()
                    )));
                }
                if let Some(&bad) = dims.iter().find(|&&d| d >= N_LATENT) {
                    return Err(TaxoError::UnknownLatentDimension(format!(
                        "z{} (cluster {id})",
                        bad + 1
                    )));
                }
                if *wide {
                    if wide_cluster.is_some() {
                        return Err(TaxoError::ClusterTableParsing(
                            "more than one wide cluster".into(),
                        ));
                    }
                    wide_cluster = Some(id);
                }
            }
            if map.insert(id, kind).is_some() {
                return Err(TaxoError::DuplicateClusterEntry(id));
            }
        }

        for id in 0..n {
            if !map.contains_key(&id) {
                return Err(TaxoError::MissingClusterEntry(id));
            }
        }

        Ok(ClusterTable {
            entries: map,
            albedo_mixture,
            wide_cluster,
        })
    }

    /// Load a table from a text file on disk.
    pub fn from_path(path: &Utf8Path) -> Result<Self, TaxoError> {
        std::fs::read_to_string(path.as_std_path())?.parse()
    }

    /// Number of clusters the table covers.
    pub fn n_clusters(&self) -> usize {
        self.entries.len()
    }

    /// Resolution kind of one cluster.
    pub fn kind(&self, id: ClusterId) -> Option<&ClusterKind> {
        self.entries.get(&id)
    }

    /// Id of the wide continuum cluster, when the table defines one.
    pub fn wide_cluster(&self) -> Option<ClusterId> {
        self.wide_cluster
    }

    /// The shared X-complex albedo mixture.
    pub fn albedo_mixture(&self) -> &GaussianMixture {
        &self.albedo_mixture
    }

    /// P/M/E shares of the albedo mixture at one log-albedo.
    pub fn albedo_split(&self, log_albedo: LogAlbedo) -> Result<[f64; 3], TaxoError> {
        let proba = self
            .albedo_mixture
            .predict_proba(&DVector::from_vec(vec![log_albedo]))?;
        Ok([proba[0], proba[1], proba[2]])
    }

    /// The class the albedo mixture assigns at one log-albedo (P, M, or E).
    pub fn albedo_class(&self, log_albedo: LogAlbedo) -> Result<Class, TaxoError> {
        let component = self
            .albedo_mixture
            .map_component(&DVector::from_vec(vec![log_albedo]))?;
        Ok(ALBEDO_COMPONENT_CLASSES[component])
    }
}

impl FromStr for ClusterTable {
    type Err = TaxoError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        parse_cluster_table(content)
    }
}

// -------------------------------------------------------------------------------------------------
// Text format parsing
// -------------------------------------------------------------------------------------------------

enum RawLine<'a> {
    Albedo(RawMixture),
    Cluster { id: ClusterId, kind: RawKind<'a> },
}

enum RawKind<'a> {
    Core(&'a str),
    XComplex,
    Lum,
    Split,
    Gmm {
        wide: bool,
        dims: Vec<usize>,
        classes: Vec<&'a str>,
        mixture: RawMixture,
    },
}

struct RawMixture {
    weights: Vec<f64>,
    means: Vec<Vec<f64>>,
    covariances: Vec<Vec<f64>>,
}

fn parse_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>()).parse(input)
}

/// `a, b, c` — one mixture component (or a weight list).
fn parse_float_list(input: &str) -> IResult<&str, Vec<f64>> {
    separated_list1(
        preceded(multispace0, char(',')),
        preceded(multispace0, double),
    )
    .parse(input)
}

/// `a, b; c, d; …` — per-component value lists.
fn parse_component_lists(input: &str) -> IResult<&str, Vec<Vec<f64>>> {
    separated_list1(preceded(multispace0, char(';')), parse_float_list).parse(input)
}

/// `z1` or `z1,z3` — named latent dimensions, mapped to 0-based indices.
fn parse_dims(input: &str) -> IResult<&str, Vec<usize>> {
    separated_list1(
        preceded(multispace0, char(',')),
        map_res(
            preceded(preceded(multispace0, char('z')), parse_usize),
            |z| if z == 0 { Err(()) } else { Ok(z - 1) },
        ),
    )
    .parse(input)
}

/// `[A, S, …]` — candidate class labels.
fn parse_class_list(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        preceded(multispace0, char('[')),
        separated_list1(
            preceded(multispace0, char(',')),
            preceded(multispace0, alpha1),
        ),
        preceded(multispace0, char(']')),
    )
    .parse(input)
}

/// `@ <weights> | <means> | <covariances>` — the frozen mixture parameters.
fn parse_mixture(input: &str) -> IResult<&str, RawMixture> {
    map(
        (
            preceded(preceded(multispace0, char('@')), parse_float_list),
            preceded(preceded(multispace0, char('|')), parse_component_lists),
            preceded(preceded(multispace0, char('|')), parse_component_lists),
        ),
        |(weights, means, covariances)| RawMixture {
            weights,
            means,
            covariances,
        },
    )
    .parse(input)
}

fn parse_kind(input: &str) -> IResult<&str, RawKind> {
    alt((
        map(
            preceded(
                preceded(multispace0, tag("core")),
                preceded(multispace1, alpha1),
            ),
            RawKind::Core,
        ),
        map(preceded(multispace0, tag("xcomplex")), |_| RawKind::XComplex),
        map(preceded(multispace0, tag("lum")), |_| RawKind::Lum),
        map(preceded(multispace0, tag("split")), |_| RawKind::Split),
        map(
            (
                preceded(multispace0, alt((tag("wide"), tag("gmm")))),
                preceded(multispace1, parse_dims),
                parse_class_list,
                parse_mixture,
            ),
            |(keyword, dims, classes, mixture)| RawKind::Gmm {
                wide: keyword == "wide",
                dims,
                classes,
                mixture,
            },
        ),
    ))
    .parse(input)
}

fn parse_line(input: &str) -> IResult<&str, RawLine> {
    alt((
        map(
            preceded(preceded(tag("albedo"), preceded(multispace0, char(':'))), parse_mixture),
            RawLine::Albedo,
        ),
        map(
            (
                parse_usize,
                preceded(multispace0, char(':')),
                parse_kind,
            ),
            |(id, _, kind)| RawLine::Cluster { id, kind },
        ),
    ))
    .parse(input)
}

/// Turn per-component mean/covariance value lists into a [`GaussianMixture`].
fn build_mixture(raw: RawMixture, context: &str) -> Result<GaussianMixture, TaxoError> {
    let dim = raw
        .means
        .first()
        .map(|m| m.len())
        .ok_or_else(|| TaxoError::InvalidMixture(format!("{context}: no components")))?;

    let means = raw.means.into_iter().map(DVector::from_vec).collect();
    let covariances = raw
        .covariances
        .into_iter()
        .map(|values| match (dim, values.as_slice()) {
            (1, [v]) => Ok(DMatrix::from_element(1, 1, *v)),
            (2, [c11, c12, c22]) => {
                Ok(DMatrix::from_row_slice(2, 2, &[*c11, *c12, *c12, *c22]))
            }
            _ => Err(TaxoError::InvalidMixture(format!(
                "{context}: covariance needs 1 value in 1-D or 3 values (c11, c12, c22) in 2-D, \
                 got {} for dimension {dim}",
                values.len()
            ))),
        })
        .collect::<Result<Vec<_>, TaxoError>>()?;

    GaussianMixture::new(raw.weights, means, covariances)
}

fn parse_cluster_table(content: &str) -> Result<ClusterTable, TaxoError> {
    let mut entries = Vec::new();
    let mut albedo = None;

    for raw_line in content.lines() {
        let line = raw_line.split('!').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let (_, parsed) = all_consuming(parse_line)
            .parse(line)
            .map_err(|_| TaxoError::ClusterTableParsing(raw_line.trim().to_string()))?;

        match parsed {
            RawLine::Albedo(raw) => {
                if albedo.is_some() {
                    return Err(TaxoError::ClusterTableParsing(
                        "duplicate albedo mixture line".into(),
                    ));
                }
                albedo = Some(build_mixture(raw, "albedo mixture")?);
            }
            RawLine::Cluster { id, kind } => {
                let kind = match kind {
                    RawKind::Core(label) => ClusterKind::Core(label.parse()?),
                    RawKind::XComplex => ClusterKind::XComplex,
                    RawKind::Lum => ClusterKind::LuminosityLm,
                    RawKind::Split => ClusterKind::ThresholdDs,
                    RawKind::Gmm {
                        wide,
                        dims,
                        classes,
                        mixture,
                    } => ClusterKind::ContinuumGmm {
                        dims: SmallVec::from_vec(dims),
                        classes: classes
                            .into_iter()
                            .map(Class::try_from)
                            .collect::<Result<Vec<_>, _>>()?,
                        mixture: build_mixture(mixture, &format!("cluster {id}"))?,
                        wide,
                    },
                };
                entries.push((id, kind));
            }
        }
    }

    let albedo = albedo.ok_or_else(|| {
        TaxoError::ClusterTableParsing("table defines no albedo mixture".into())
    })?;
    ClusterTable::from_parts(entries, albedo)
}

#[cfg(test)]
mod cluster_table_test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::constants::N_CLUSTERS;

    #[test]
    fn test_embedded_table_loads_and_covers_all_clusters() {
        let table = ClusterTable::embedded();
        assert_eq!(table.n_clusters(), N_CLUSTERS);

        // The X-complex members and the special rules sit on their trained cluster ids.
        for id in [13, 23, 25, 31, 42] {
            assert!(matches!(table.kind(id), Some(ClusterKind::XComplex)));
        }
        assert!(matches!(table.kind(37), Some(ClusterKind::LuminosityLm)));
        assert!(matches!(table.kind(44), Some(ClusterKind::ThresholdDs)));
        assert_eq!(table.wide_cluster(), Some(29));

        let Some(ClusterKind::ContinuumGmm { classes, wide, .. }) = table.kind(29) else {
            panic!("cluster 29 must be the wide continuum cluster");
        };
        assert!(*wide);
        assert_eq!(classes.len(), 9);
    }

    #[test]
    fn test_parse_core_line() {
        let (_, parsed) = parse_line("12: core D").unwrap();
        let RawLine::Cluster { id, kind: RawKind::Core(label) } = parsed else {
            panic!("expected a core cluster line");
        };
        assert_eq!(id, 12);
        assert_eq!(label, "D");
    }

    #[test]
    fn test_parse_gmm_line() {
        let (_, parsed) =
            parse_line("17: gmm z1,z3 [K, L] @ 0.45, 0.55 | -0.5, 0.1; 0.6, -0.2 | 0.3, 0.02, 0.25; 0.25, -0.01, 0.3")
                .unwrap();
        let RawLine::Cluster { id: 17, kind: RawKind::Gmm { wide, dims, classes, mixture } } =
            parsed
        else {
            panic!("expected a gmm cluster line");
        };
        assert!(!wide);
        assert_eq!(dims, vec![0, 2]);
        assert_eq!(classes, vec!["K", "L"]);
        assert_eq!(mixture.weights, vec![0.45, 0.55]);
        assert_eq!(mixture.means, vec![vec![-0.5, 0.1], vec![0.6, -0.2]]);
        assert_eq!(mixture.covariances.len(), 2);
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        assert!(matches!(
            "0: core S\nnot a line\n".parse::<ClusterTable>(),
            Err(TaxoError::ClusterTableParsing(_))
        ));
        // z0 is not a valid latent dimension name.
        assert!("0: gmm z0 [K, L] @ 0.5, 0.5 | -1; 1 | 0.3; 0.3"
            .parse::<ClusterTable>()
            .is_err());
    }

    #[test]
    fn test_table_validation() {
        let albedo_line = "albedo: @ 0.52, 0.35, 0.13 | -1.35; -0.88; -0.28 | 0.05; 0.04; 0.03";

        // Missing cluster 1.
        let content = format!("{albedo_line}\n0: core S\n2: core C\n");
        assert!(matches!(
            content.parse::<ClusterTable>(),
            Err(TaxoError::MissingClusterEntry(1))
        ));

        // Duplicate id.
        let content = format!("{albedo_line}\n0: core S\n0: core C\n");
        assert!(matches!(
            content.parse::<ClusterTable>(),
            Err(TaxoError::DuplicateClusterEntry(0))
        ));

        // Component count must match the candidate class list.
        let content =
            format!("{albedo_line}\n0: gmm z1 [K, L, M] @ 0.5, 0.5 | -1; 1 | 0.3; 0.3\n");
        assert!(matches!(
            content.parse::<ClusterTable>(),
            Err(TaxoError::InvalidMixture(_))
        ));

        // Albedo means must ascend.
        let bad_albedo = "albedo: @ 0.5, 0.3, 0.2 | -0.2; -0.9; -1.3 | 0.05; 0.04; 0.03";
        let content = format!("{bad_albedo}\n0: core S\n");
        assert!(matches!(
            content.parse::<ClusterTable>(),
            Err(TaxoError::InvalidMixture(_))
        ));

        // No albedo line at all.
        assert!(matches!(
            "0: core S\n".parse::<ClusterTable>(),
            Err(TaxoError::ClusterTableParsing(_))
        ));
    }

    #[test]
    fn test_albedo_split_and_class() {
        let table = ClusterTable::embedded();

        // A dark albedo (pv = 0.04, log10 = -1.40) lands on the P component.
        let split = table.albedo_split(-1.40).unwrap();
        assert!(split[0] > split[1] && split[0] > split[2]);
        assert_eq!(table.albedo_class(-1.40).unwrap(), Class::P);
        assert_relative_eq!(split.iter().sum::<f64>(), 1.0, epsilon = 1e-9);

        // A bright albedo (pv = 0.55, log10 ~ -0.26) lands on E.
        assert_eq!(table.albedo_class(-0.26).unwrap(), Class::E);
        // Intermediate brightness lands on M.
        assert_eq!(table.albedo_class(-0.88).unwrap(), Class::M);
    }
}
