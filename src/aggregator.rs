//! # Per-asteroid aggregation
//!
//! One asteroid usually has several classified spectra, observed with different wavelength
//! coverage and with or without an albedo. [`aggregate`] combines them into one consensus
//! class:
//!
//! - a **single** observation contributes its class directly (collapsed to the first
//!   character, dropping subtype suffixes);
//! - **multiple** observations vote per class with a weighted average of their class
//!   probabilities, the weight being the squared completeness of each observation's model
//!   input (observed bins + albedo), normalized by the group maximum — a complete spectrum
//!   with a moderate probability outvotes a sparse one with a high probability;
//! - **feature flags** merge across observations: present anywhere wins, an explicit
//!   absence beats no data, otherwise the flag stays undetermined;
//! - the consensus label then takes the asteroid-level adjustments, in order: a C/B/P/X
//!   consensus with the h band present becomes `Ch`; otherwise an E/M/P/X consensus gains
//!   the `e` and/or `k` suffix per the merged flags.
//!
//! Unclassifiable members never abort the aggregate: their probabilities are skipped,
//! their detected features still feed the flag merge.

use serde::{Deserialize, Serialize};

use crate::classes::Class;
use crate::classification::ClassifiedResult;
use crate::features::FeatureName;
use crate::taxo_errors::TaxoError;

/// The consensus classification of one asteroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsteroidClass {
    /// Consensus class label, possibly suffixed (`Ch`, `Xe`, `Mek`, …); empty when no
    /// member observation could be classified.
    pub class: String,
    /// Merged e band flag: present / absent / undetermined.
    pub feature_e: Option<bool>,
    /// Merged h band flag.
    pub feature_h: Option<bool>,
    /// Merged k band flag.
    pub feature_k: Option<bool>,
    /// Number of classified observations that voted.
    pub n_used: usize,
}

/// Combine the classified observations of one asteroid into a consensus class.
///
/// Arguments
/// -----------------
/// * `results`: all classified observations of the asteroid (unclassifiable members are
///   tolerated and skipped for the vote).
///
/// Return
/// ----------
/// * The [`AsteroidClass`], or [`TaxoError::NoObservations`] for an empty input slice.
pub fn aggregate(results: &[ClassifiedResult]) -> Result<AsteroidClass, TaxoError> {
    if results.is_empty() {
        return Err(TaxoError::NoObservations);
    }

    let feature_e = merge_flag(results, FeatureName::E);
    let feature_h = merge_flag(results, FeatureName::H);
    let feature_k = merge_flag(results, FeatureName::K);

    let classified: Vec<&ClassifiedResult> =
        results.iter().filter(|r| r.is_classified()).collect();

    let consensus = match classified.as_slice() {
        [] => None,
        [single] => single.class.chars().next(),
        group => weighted_consensus(group).map(|class| {
            class
                .label()
                .chars()
                .next()
                .expect("class labels are non-empty")
        }),
    };

    let class = match consensus {
        Some(letter) => adjust_label(letter, feature_e, feature_h, feature_k),
        None => String::new(),
    };

    Ok(AsteroidClass {
        class,
        feature_e,
        feature_h,
        feature_k,
        n_used: classified.len(),
    })
}

/// Per-class weighted vote across multiple observations.
///
/// The weight of observation *i* is `(observed columns)²`, normalized by the maximum
/// weight in the group; the winning class maximizes the weighted mean probability, ties
/// breaking toward the canonical class order.
fn weighted_consensus(group: &[&ClassifiedResult]) -> Option<Class> {
    let raw: Vec<f64> = group
        .iter()
        .map(|r| (r.n_observed_columns() as f64).powi(2))
        .collect();
    let max_weight = raw.iter().cloned().fold(0.0, f64::max);
    // A group of albedo-less, bin-less votes degrades to an unweighted mean.
    let weights: Vec<f64> = if max_weight > 0.0 {
        raw.iter().map(|w| w / max_weight).collect()
    } else {
        vec![1.0; raw.len()]
    };
    let weight_sum: f64 = weights.iter().sum();

    let mut best: Option<(Class, f64)> = None;
    for class in Class::ALL {
        let score = group
            .iter()
            .zip(&weights)
            .map(|(r, w)| {
                let p = r.probabilities.get(class);
                if p.is_finite() {
                    w * p
                } else {
                    0.0
                }
            })
            .sum::<f64>()
            / weight_sum;
        match best {
            Some((_, bs)) if score <= bs => {}
            _ => best = Some((class, score)),
        }
    }
    best.map(|(c, _)| c)
}

/// Merge one band's presence across observations: any presence wins, an explicit absence
/// beats no data.
fn merge_flag(results: &[ClassifiedResult], name: FeatureName) -> Option<bool> {
    let mut merged = None;
    for result in results {
        match result.features.get(name).present {
            Some(true) => return Some(true),
            Some(false) => merged = Some(false),
            None => {}
        }
    }
    merged
}

/// Asteroid-level label adjustments. The `Ch` fold and the e/k suffixes are mutually
/// exclusive: `Ch` carries no suffixes.
fn adjust_label(
    letter: char,
    feature_e: Option<bool>,
    feature_h: Option<bool>,
    feature_k: Option<bool>,
) -> String {
    let mut label = letter.to_string();
    if feature_h == Some(true) && matches!(letter, 'B' | 'C' | 'P' | 'X') {
        return "Ch".to_string();
    }
    if matches!(letter, 'E' | 'M' | 'P' | 'X') {
        if feature_e == Some(true) {
            label.push('e');
        }
        if feature_k == Some(true) {
            label.push('k');
        }
    }
    label
}
