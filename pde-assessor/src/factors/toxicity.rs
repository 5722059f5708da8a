//! F4: nature of the toxicity, the worst of three evidence categories.

use std::sync::LazyLock;

use regex::Regex;

use super::wording::mentions_affirmed;
use super::{Factor, FactorId};
use crate::models::{HazardRecord, ToxicityType, Verdict};

static BOX_WARNING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)black\s+box\s+warning\s*:\s*\**\s*(.*?)\s*(?:<br>|###|\z)")
        .expect("box warning pattern is valid")
});

const TERATOGEN_TERMS: &[&str] = &["teratogen", "malformation", "birth defect", "congenital anomal"];
const MATERNAL_TOXICITY_TERMS: &[&str] = &["with maternal toxicity", "maternally toxic", "maternal toxicity was observed"];
const NEUROTOXICITY_TERMS: &[&str] = &["neurotoxic"];
const NO_BOX_WARNING: &[&str] = &["none", "no ", "not ", "n/a", "there is no", "there are no"];

/// One category's score, or why it has none
#[derive(Debug, Clone, PartialEq)]
struct SubScore {
    category: &'static str,
    value: Option<f64>,
    justification: String,
}

impl SubScore {
    fn scored(category: &'static str, value: f64, justification: impl Into<String>) -> Self {
        Self {
            category,
            value: Some(value),
            justification: justification.into(),
        }
    }

    fn no_data(category: &'static str, justification: impl Into<String>) -> Self {
        Self {
            category,
            value: None,
            justification: justification.into(),
        }
    }

    fn describe(&self) -> String {
        let value = self
            .value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "No Data".to_string());
        format!("{}: {} ({}).", capitalize(self.category), self.justification, value)
    }
}

/// Compute F4 as the highest of the reproductive, animal toxicology and clinical scores
pub fn compute_f4(clinical_text: Option<&str>, hazards: &[HazardRecord]) -> Factor {
    let scores = [
        reproductive_value(clinical_text, hazards),
        animal_tox_value(clinical_text, hazards),
        clinical_value(clinical_text),
    ];

    let details: Vec<String> = scores.iter().map(SubScore::describe).collect();
    let Some(max) = scores.iter().filter_map(|s| s.value).reduce(f64::max) else {
        return Factor::no_data(
            FactorId::F4,
            format!("{} No category had sufficient data.", details.join(" ")),
        );
    };

    let contributors: Vec<&str> = scores
        .iter()
        .filter(|s| s.value == Some(max))
        .map(|s| s.category)
        .collect();

    Factor::new(
        FactorId::F4,
        max,
        format!(
            "{} The highest value, {}, was selected from {}.",
            details.join(" "),
            max,
            contributors.join(" and ")
        ),
    )
}

fn reproductive_value(clinical_text: Option<&str>, hazards: &[HazardRecord]) -> SubScore {
    const CATEGORY: &str = "reproductive studies";
    let Some(record) = find(hazards, ToxicityType::ReproductiveDevelopmental) else {
        return SubScore::no_data(CATEGORY, "no reproductive/developmental evidence");
    };

    match record.verdict {
        Verdict::Unknown => SubScore::no_data(CATEGORY, "reproductive/developmental toxicity is unknown"),
        Verdict::No => SubScore::scored(CATEGORY, 1.0, "no fetal or teratogenic toxicity reported"),
        Verdict::Yes => {
            let evidence = format!("{} {}", record.detail, clinical_text.unwrap_or_default()).to_lowercase();
            let teratogenic = mentions_affirmed(&evidence, TERATOGEN_TERMS);
            let maternal = mentions_affirmed(&evidence, MATERNAL_TOXICITY_TERMS);
            let (value, effect) = match (teratogenic, maternal) {
                (false, true) => (1.0, "fetal toxicity with maternal toxicity"),
                (false, false) => (5.0, "fetal toxicity without maternal toxicity"),
                (true, true) => (5.0, "teratogenic effect with maternal toxicity"),
                (true, false) => (10.0, "teratogenic effect without maternal toxicity"),
            };
            SubScore::scored(CATEGORY, value, effect)
        }
    }
}

fn animal_tox_value(clinical_text: Option<&str>, hazards: &[HazardRecord]) -> SubScore {
    const CATEGORY: &str = "animal toxicology studies";
    let mut present: Vec<&str> = [
        ToxicityType::Carcinogen,
        ToxicityType::Genotoxicant,
        ToxicityType::HighlySensitizing,
    ]
    .into_iter()
    .filter(|t| find(hazards, *t).is_some_and(|r| r.verdict == Verdict::Yes))
    .map(|t| t.label())
    .collect();

    if let Some(record) = find(hazards, ToxicityType::ReproductiveDevelopmental) {
        if record.verdict == Verdict::Yes && mentions_affirmed(&record.detail.to_lowercase(), TERATOGEN_TERMS) {
            present.push("Teratogenicity");
        }
    }
    if clinical_text.is_some_and(|t| mentions_affirmed(&t.to_lowercase(), NEUROTOXICITY_TERMS)) {
        present.push("Neurotoxicity");
    }

    if !present.is_empty() {
        return SubScore::scored(CATEGORY, 10.0, format!("{} present", present.join(", ")));
    }
    if hazards.iter().any(|r| r.verdict == Verdict::No) {
        return SubScore::scored(
            CATEGORY,
            1.0,
            "none of carcinogenicity, genotoxicity, neurotoxicity, teratogenicity or high sensitizing potential present",
        );
    }
    SubScore::no_data(CATEGORY, "hazard verdicts are unknown")
}

fn clinical_value(clinical_text: Option<&str>) -> SubScore {
    const CATEGORY: &str = "clinical studies";
    let Some(text) = clinical_text.filter(|t| !t.trim().is_empty()) else {
        return SubScore::no_data(CATEGORY, "no clinical data for this route");
    };

    match box_warning(text) {
        Some(warning) => SubScore::scored(CATEGORY, 5.0, format!("black box warning present ({})", warning)),
        None => SubScore::scored(CATEGORY, 1.0, "no black box warning and no severe toxicity at the lowest clinical dose"),
    }
}

/// The substantive text of a black box warning, if the clinical text carries one
pub fn box_warning(clinical_text: &str) -> Option<String> {
    let caps = BOX_WARNING.captures(clinical_text)?;
    let warning = caps.get(1)?.as_str().trim_matches(|c: char| c == '*' || c.is_whitespace());
    let lowered = warning.to_lowercase();
    if warning.is_empty() || NO_BOX_WARNING.iter().any(|p| lowered.starts_with(p)) {
        return None;
    }
    Some(warning.to_string())
}

fn find(hazards: &[HazardRecord], toxicity_type: ToxicityType) -> Option<&HazardRecord> {
    hazards.iter().find(|r| r.toxicity_type == toxicity_type)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
