//! Factor engine: the seven PDE correction factors.
//!
//! F1, F2 and F6 are constants. F3, F4 and F5 are derived from the run's evidence
//! by deterministic rules. α defaults to 1 and is replaced by a bioavailability
//! ratio when the clinical evidence was found for a different route.

pub mod bioavailability;
pub mod duration;
pub mod severity;
pub mod toxicity;
pub mod wording;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use bioavailability::{AlphaComputation, BioavailabilityEstimate, adjustment_factor, compute_alpha};
pub use duration::compute_f3;
pub use severity::{SeverityJudgement, compute_f5, judge_f5};
pub use toxicity::compute_f4;

/// Identifier of a factor; declaration order is the serialization order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FactorId {
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    #[serde(rename = "α")]
    Alpha,
}

impl FactorId {
    pub const ALL: [FactorId; 7] = [
        FactorId::F1,
        FactorId::F2,
        FactorId::F3,
        FactorId::F4,
        FactorId::F5,
        FactorId::F6,
        FactorId::Alpha,
    ];
}

impl fmt::Display for FactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FactorId::F1 => "F1",
            FactorId::F2 => "F2",
            FactorId::F3 => "F3",
            FactorId::F4 => "F4",
            FactorId::F5 => "F5",
            FactorId::F6 => "F6",
            FactorId::Alpha => "α",
        };
        f.write_str(text)
    }
}

/// One factor value. `value: None` means "No Data": the evidence did not support a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    #[serde(rename = "factors")]
    pub id: FactorId,
    pub value: Option<f64>,
    pub rationale: String,
}

impl Factor {
    pub fn new(id: FactorId, value: f64, rationale: impl Into<String>) -> Self {
        Self {
            id,
            value: Some(value),
            rationale: rationale.into(),
        }
    }

    pub fn no_data(id: FactorId, rationale: impl Into<String>) -> Self {
        Self {
            id,
            value: None,
            rationale: rationale.into(),
        }
    }
}

pub const F1_RATIONALE: &str = "Based on the selection of human therapeutic dose.";
pub const F2_RATIONALE: &str =
    "Conventionally used to allow for differences between individuals in the human population.";
pub const F6_RATIONALE: &str = "Generic drugs and non-clinical data available";
pub const ALPHA_DEFAULT_RATIONALE: &str = "No pharmacokinetic correction is carried out for PDE calculation since the same route of administration is used.";

/// The run-invariant factors: F1, F2, F6 and the same-route α
pub fn constant_factors() -> [Factor; 4] {
    [
        Factor::new(FactorId::F1, 1.0, F1_RATIONALE),
        Factor::new(FactorId::F2, 10.0, F2_RATIONALE),
        Factor::new(FactorId::F6, 1.0, F6_RATIONALE),
        Factor::new(FactorId::Alpha, 1.0, ALPHA_DEFAULT_RATIONALE),
    ]
}

/// Factors keyed by id while a run is computing them.
///
/// Setting a factor replaces any earlier entry with the same id, so the α
/// substitution for a route mismatch is a plain insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorSet {
    entries: BTreeMap<FactorId, Factor>,
}

impl FactorSet {
    /// A set holding only the constant factors
    pub fn with_constants() -> Self {
        constant_factors().into_iter().collect()
    }

    pub fn set(&mut self, factor: Factor) {
        self.entries.insert(factor.id, factor);
    }

    pub fn get(&self, id: FactorId) -> Option<&Factor> {
        self.entries.get(&id)
    }

    /// Exactly seven entries in id order; ids nothing computed carry `value: null`
    pub fn into_ordered(mut self) -> Vec<Factor> {
        FactorId::ALL
            .iter()
            .map(|id| {
                self.entries.remove(id).unwrap_or_else(|| {
                    Factor::no_data(*id, format!("{} could not be computed for this run.", id))
                })
            })
            .collect()
    }
}

impl FromIterator<Factor> for FactorSet {
    fn from_iter<I: IntoIterator<Item = Factor>>(factors: I) -> Self {
        let mut set = Self::default();
        for factor in factors {
            set.set(factor);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_factors_always_hold_seven_entries() {
        let factors = FactorSet::default().into_ordered();
        let ids: Vec<FactorId> = factors.iter().map(|f| f.id).collect();
        assert_eq!(ids, FactorId::ALL.to_vec());
        assert!(factors.iter().all(|f| f.value.is_none()));
    }

    #[test]
    fn setting_alpha_replaces_the_default() {
        let mut set = FactorSet::with_constants();
        set.set(Factor::new(FactorId::Alpha, 2.0, "80% vs 100%"));

        let factors = set.into_ordered();
        let alphas: Vec<&Factor> = factors.iter().filter(|f| f.id == FactorId::Alpha).collect();
        assert_eq!(alphas.len(), 1);
        assert_eq!(alphas[0].value, Some(2.0));
    }

    #[test]
    fn factor_ids_serialize_with_report_names() {
        let factor = Factor::new(FactorId::Alpha, 1.0, ALPHA_DEFAULT_RATIONALE);
        let value = serde_json::to_value(&factor).unwrap();
        assert_eq!(value["factors"], "α");
        assert_eq!(value["value"], 1.0);
    }
}
