//! F3: study / treatment duration.
//!
//! Rules are tried in order and the first one that fires decides:
//! an explicit duration, then duration wording, then the indication's usual
//! treatment length. No match leaves F3 undetermined.

use std::sync::LazyLock;

use regex::Regex;

use super::{Factor, FactorId};

const TWO_WEEKS_DAYS: f64 = 14.0;

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+(?:\.\d+)?)(?:\s*(?:-|–|to)\s*(\d+(?:\.\d+)?))?\s*(day|week|month|year)s?\b",
    )
    .expect("duration pattern is valid")
});

static AGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:of\s+age|old|postnatal|gestation)").expect("age pattern is valid")
});

static NON_DURATION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\baged?|\bevery|(?:^|[\s(])(?:≥|>=|>|<|≤|<=)|older\s+than|younger\s+than|at\s+least)\s*$")
        .expect("prefix pattern is valid")
});

static TREATMENT_CONTEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:for|over|lasting|duration\s+of|course\s+of|period\s+of|up\s+to)\s+(?:(?:a|an|the)\s+)?(?:(?:total|maximum|minimum)\s+of\s+)?$",
    )
    .expect("treatment context pattern is valid")
});

static CRITICAL_EFFECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)in clinical data were (?:the )?treatment of ([^.\n]+)").expect("critical effect pattern is valid")
});

const LONG_TERM_WORDING: &[&str] = &[
    "chronic treatment",
    "chronic therapy",
    "chronic use",
    "chronic administration",
    "long-term",
    "long term",
    "lifelong",
    "maintenance therapy",
];

const SHORT_TERM_WORDING: &[&str] = &[
    "acute treatment",
    "acute therapy",
    "short-term",
    "short term",
    "single dose",
    "single-dose",
];

const MEDIUM_TERM_WORDING: &[&str] = &["a few weeks", "intermediate duration", "intermediate-term"];

struct IndicationBucket {
    value: f64,
    label: &'static str,
    conditions: &'static [&'static str],
}

const INDICATION_BUCKETS: [IndicationBucket; 3] = [
    IndicationBucket {
        value: 1.0,
        label: "long-term use condition",
        conditions: &[
            "hiv",
            "hepatitis b",
            "hypertension",
            "diabetes",
            "hyperlipidemia",
            "hypercholesterolemia",
            "asthma",
            "heart failure",
            "depression",
            "anxiety",
            "schizophrenia",
            "bipolar",
            "rheumatoid arthritis",
            "lupus",
            "parkinson",
            "epilepsy",
            "seizure",
            "multiple sclerosis",
            "hyperthyroidism",
            "hypothyroidism",
            "osteoporosis",
            "transplant",
            "chronic pain",
        ],
    },
    IndicationBucket {
        value: 5.0,
        label: "medium-term use condition",
        conditions: &[
            "subacute",
            "eczema",
            "psoriasis",
            "dermatitis",
            "acne",
            "gastric ulcer",
            "peptic ulcer",
            "duodenal ulcer",
            "colitis",
            "post-surgical",
            "postoperative recovery",
        ],
    },
    IndicationBucket {
        value: 10.0,
        label: "short-term use condition",
        conditions: &[
            "common cold",
            "influenza",
            "flu",
            "acute bronchitis",
            "headache",
            "toothache",
            "muscle pain",
            "acute pain",
            "urticaria",
            "allergic reaction",
            "acute allerg",
            "tonsillitis",
            "otitis media",
            "insomnia",
            "diarrhea",
            "diarrhoea",
            "constipation",
            "fever",
            "sprain",
            "abrasion",
            "perioperative",
            "respiratory infection",
            "urinary tract infection",
        ],
    },
];

/// Compute F3 from the clinical study text
pub fn compute_f3(study_text: Option<&str>) -> Factor {
    let Some(text) = study_text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Factor::no_data(
            FactorId::F3,
            "Duration not provided: no clinical data was available for this route.",
        );
    };

    if let Some(factor) = explicit_duration(text) {
        return factor;
    }
    if let Some(factor) = duration_wording(text) {
        return factor;
    }
    if let Some(factor) = indication_category(text) {
        return factor;
    }

    Factor::no_data(
        FactorId::F3,
        "Study duration is ambiguous: no explicit duration, duration description or classifiable indication was found.",
    )
}

fn explicit_duration(text: &str) -> Option<Factor> {
    let (days, phrase) = DURATION
        .captures_iter(text)
        .filter(|caps| {
            let whole = caps.get(0).map(|m| (m.start(), m.end()));
            whole.is_some_and(|(start, end)| {
                let before = line_before(text, start);
                TREATMENT_CONTEXT.is_match(before)
                    && !NON_DURATION_PREFIX.is_match(before)
                    && !AGE_SUFFIX.is_match(&text[end..])
            })
        })
        .filter_map(|caps| {
            let low: f64 = caps.get(1)?.as_str().parse().ok()?;
            let high: f64 = match caps.get(2) {
                Some(m) => m.as_str().parse().ok()?,
                None => low,
            };
            let unit_days = match caps.get(3)?.as_str().to_ascii_lowercase().as_str() {
                "day" => 1.0,
                "week" => 7.0,
                "month" => 30.0,
                "year" => 365.0,
                _ => return None,
            };
            Some((low.max(high) * unit_days, caps.get(0)?.as_str().to_string()))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))?;

    let (value, comparison) = if (days - TWO_WEEKS_DAYS).abs() < f64::EPSILON {
        (5.0, "= 2 weeks")
    } else if days < TWO_WEEKS_DAYS {
        (10.0, "< 2 weeks")
    } else {
        (1.0, "> 2 weeks")
    };

    Some(Factor::new(
        FactorId::F3,
        value,
        format!(
            "Explicit duration rule: the study reports a treatment duration of {} ({}).",
            phrase.trim(),
            comparison
        ),
    ))
}

/// Text preceding `start` on the same line and table cell
fn line_before(text: &str, start: usize) -> &str {
    let head = &text[..start];
    let from = head.rfind(['\n', '|']).map_or(0, |i| i + 1);
    &head[from..]
}

fn duration_wording(text: &str) -> Option<Factor> {
    let lowered = text.to_lowercase();
    let groups: [(&[&str], f64, &str); 3] = [
        (LONG_TERM_WORDING, 1.0, "chronic / long-term"),
        (SHORT_TERM_WORDING, 10.0, "acute / short-term"),
        (MEDIUM_TERM_WORDING, 5.0, "intermediate"),
    ];

    groups.iter().find_map(|(phrases, value, label)| {
        phrases.iter().find(|p| lowered.contains(*p)).map(|phrase| {
            Factor::new(
                FactorId::F3,
                *value,
                format!(
                    "Duration description rule: no explicit duration; the text describes {} use (\"{}\").",
                    label, phrase
                ),
            )
        })
    })
}

fn indication_category(text: &str) -> Option<Factor> {
    let lowered = text.to_lowercase();
    let critical = CRITICAL_EFFECT
        .captures(&lowered)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    // The critical-effects sentence names the treated disease; prefer it over the whole text.
    critical
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(lowered.as_str()))
        .find_map(classify_indication)
}

fn classify_indication(text: &str) -> Option<Factor> {
    INDICATION_BUCKETS.iter().find_map(|bucket| {
        bucket
            .conditions
            .iter()
            .find(|condition| contains_word(text, condition))
            .map(|condition| {
                Factor::new(
                    FactorId::F3,
                    bucket.value,
                    format!(
                        "Treatment type rule: no duration information; \"{}\" is a {}.",
                        condition, bucket.label
                    ),
                )
            })
    })
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_explicit_duration_scores_ten() {
        let f3 = compute_f3(Some("Patients were treated with a duration of 10 days."));
        assert_eq!(f3.value, Some(10.0));
        assert!(f3.rationale.contains("Explicit duration"));
    }

    #[test]
    fn exactly_two_weeks_scores_five() {
        assert_eq!(compute_f3(Some("Treatment for 2 weeks")).value, Some(5.0));
        assert_eq!(compute_f3(Some("given for 14 days")).value, Some(5.0));
    }

    #[test]
    fn longest_duration_wins() {
        let f3 = compute_f3(Some("Loading for 5 days then continued for 48 weeks"));
        assert_eq!(f3.value, Some(1.0));
    }

    #[test]
    fn age_limits_are_not_durations() {
        let f3 = compute_f3(Some("Approved in patients ≥3 months of age for long-term administration"));
        assert_eq!(f3.value, Some(1.0));
        assert!(f3.rationale.contains("Duration description"));
    }

    #[test]
    fn population_age_bands_are_not_durations() {
        let f3 = compute_f3(Some("| Children 6 to 12 years | Acute otitis media | Oral | 250 mg three times daily |"));
        assert_eq!(f3.value, Some(10.0));
        assert!(f3.rationale.contains("otitis media"));

        let f3 = compute_f3(Some("Infants 1-24 months: 10 mg/kg twice daily for 5 days"));
        assert_eq!(f3.value, Some(10.0));
        assert!(f3.rationale.contains("5 days"));
    }

    #[test]
    fn numbers_without_treatment_wording_are_ignored() {
        let f3 = compute_f3(Some("Adults 18 to 65 years with hypertension"));
        assert_eq!(f3.value, Some(1.0));
        assert!(f3.rationale.contains("Treatment type rule"));
    }

    #[test]
    fn long_term_wording_scores_one() {
        let f3 = compute_f3(Some("Intended for long-term administration."));
        assert_eq!(f3.value, Some(1.0));
    }

    #[test]
    fn indication_bucket_from_critical_effects_sentence() {
        let text = "The critical or lead effects of Abacavir in clinical data were treatment of HIV-1 infection.";
        let f3 = compute_f3(Some(text));
        assert_eq!(f3.value, Some(1.0));
        assert!(f3.rationale.contains("hiv"));
    }

    #[test]
    fn short_term_indication_scores_ten() {
        let f3 = compute_f3(Some("Used to relieve headache."));
        assert_eq!(f3.value, Some(10.0));
    }

    #[test]
    fn unmatched_text_is_undetermined() {
        let f3 = compute_f3(Some("The compound is a white powder."));
        assert_eq!(f3.value, None);
        assert!(f3.rationale.contains("ambiguous"));
    }

    #[test]
    fn missing_text_is_undetermined() {
        assert_eq!(compute_f3(None).value, None);
        assert_eq!(compute_f3(Some("   ")).value, None);
    }
}
