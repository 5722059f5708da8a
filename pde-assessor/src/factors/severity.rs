//! F5: NOAEL / LOAEL classification of the point of departure.

use super::wording::{first_affirmed, mentions_affirmed};
use super::{Factor, FactorId};
use crate::models::{EvidenceAnswer, PoDRecord, value_text};

const NOAEL_TERMS: &[&str] = &["noael", "no observed adverse", "no-observed-adverse", "no adverse effect level"];
const LOAEL_TERMS: &[&str] = &["loael", "lowest observed adverse", "lowest-observed-adverse"];

/// Severity rubric for LOAEL effects, most severe first
const SEVERITY_RUBRIC: [(f64, &str, &[&str]); 4] = [
    (
        5.0,
        "irreversible or life-threatening effects",
        &["irreversible", "fatal", "death", "life-threatening", "teratogen", "carcinogen"],
    ),
    (
        4.0,
        "serious organ toxicity",
        &[
            "hepatotoxic",
            "nephrotoxic",
            "cardiotoxic",
            "neurotoxic",
            "organ toxicity",
            "organ damage",
            "serious",
            "severe",
        ],
    ),
    (3.0, "moderate effects", &["moderate"]),
    (2.0, "mild or transient effects", &["mild", "transient", "reversible", "minor"]),
];
const UNSPECIFIED_SEVERITY: f64 = 3.0;

/// Outcome of the deterministic F5 rules
#[derive(Debug, Clone, PartialEq)]
pub enum SeverityJudgement {
    Decided(Factor),
    /// A PoD exists but its text names neither effect level
    Undetermined,
}

/// Apply the keyword rules; the caller decides what to do with an undetermined level
pub fn judge_f5(pod: &PoDRecord, clinical_text: Option<&str>) -> SeverityJudgement {
    if pod.value.is_none() {
        return SeverityJudgement::Decided(Factor::no_data(
            FactorId::F5,
            "No Data: the point of departure could not be determined, so the effect level cannot be classified.",
        ));
    }

    // The level stated first wins; negated mentions ("no LOAEL was identified") do not count.
    let narrative = pod.narrative.to_lowercase();
    let noael = first_affirmed(&narrative, NOAEL_TERMS);
    let loael = first_affirmed(&narrative, LOAEL_TERMS);
    let is_loael = match (noael, loael) {
        (None, None) => return SeverityJudgement::Undetermined,
        (Some(noael), Some(loael)) => loael < noael,
        (noael, _) => noael.is_none(),
    };

    if is_loael {
        let evidence = format!("{} {}", narrative, clinical_text.unwrap_or_default().to_lowercase());
        return SeverityJudgement::Decided(loael_factor(&evidence));
    }
    SeverityJudgement::Decided(Factor::new(
        FactorId::F5,
        1.0,
        "Effect_Level: NOAEL. The point of departure derives from a no-observed-adverse-effect level.",
    ))
}

/// Deterministic F5; an undetermined effect level is reported as No Data
pub fn compute_f5(pod: &PoDRecord, clinical_text: Option<&str>) -> Factor {
    match judge_f5(pod, clinical_text) {
        SeverityJudgement::Decided(factor) => factor,
        SeverityJudgement::Undetermined => Factor::no_data(
            FactorId::F5,
            "No Data: the point of departure names neither a NOAEL nor a LOAEL.",
        ),
    }
}

fn loael_factor(evidence: &str) -> Factor {
    let (value, reason) = SEVERITY_RUBRIC
        .iter()
        .find(|(_, _, terms)| mentions_affirmed(evidence, terms))
        .map(|(value, label, _)| (*value, *label))
        .unwrap_or((UNSPECIFIED_SEVERITY, "effect severity not specified"));

    Factor::new(
        FactorId::F5,
        value,
        format!(
            "Effect_Level: LOAEL. Adverse effects were observed at the point of departure; a value of {} was chosen within the LOAEL range (2-5) for {}.",
            value, reason
        ),
    )
}

/// Accept a reasoning model's F5 answer only if it is consistent with the rules:
/// NOAEL means 1, LOAEL means an integer from 2 to 5.
pub fn from_model_answer(answer: &EvidenceAnswer) -> Option<Factor> {
    if !answer.is_success() {
        return None;
    }
    let level = answer.field_text("Effect_Level")?.to_ascii_uppercase();
    let rationale = answer
        .field_text("Rationale")
        .unwrap_or_else(|| "Classified by the reasoning model.".to_string());

    match level.as_str() {
        "NOAEL" => Some(Factor::new(FactorId::F5, 1.0, format!("Effect_Level: NOAEL. {}", rationale))),
        "LOAEL" => {
            let value = answer.field("F5_value").and_then(|v| {
                v.as_f64()
                    .or_else(|| value_text(v).and_then(|t| t.parse::<f64>().ok()))
            })?;
            let valid = value.fract() == 0.0 && (2.0..=5.0).contains(&value);
            valid.then(|| Factor::new(FactorId::F5, value, format!("Effect_Level: LOAEL. {}", rationale)))
        }
        _ => None,
    }
}
