//! α: route-to-route bioavailability correction.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{Factor, FactorId};

static PERCENT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<=|>=|≤|≥|<|>|~)?\s*(\d+(?:\.\d+)?)\s*%?(?:\s*(?:-|–|to)\s*(\d+(?:\.\d+)?))?")
        .expect("percentage pattern is valid")
});

/// Typical bioavailability by route, as (route keywords, low %, high %)
const ROUTE_HIERARCHY: &[(&[&str], f64, f64)] = &[
    (&["intravenous", "iv"], 100.0, 100.0),
    (&["inhalation", "inhaled", "inhal"], 80.0, 100.0),
    (&["intramuscular", "im"], 75.0, 100.0),
    (&["subcutaneous", "sc"], 75.0, 100.0),
    (&["sublingual", "buccal"], 30.0, 70.0),
    (&["oral"], 5.0, 100.0),
    (&["rectal"], 30.0, 50.0),
    (&["transdermal"], 5.0, 25.0),
    (&["topical", "cutaneous", "dermal"], 0.0, 5.0),
];

/// Adjustment factor for a bioavailability percentage
pub fn adjustment_factor(percent: f64) -> f64 {
    if percent < 1.0 {
        100.0
    } else if percent < 50.0 {
        10.0
    } else if percent < 90.0 {
        2.0
    } else {
        1.0
    }
}

/// A single bioavailability percentage for one route, with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct BioavailabilityEstimate {
    pub route: String,
    pub percent: f64,
    pub basis: String,
}

impl BioavailabilityEstimate {
    /// Use the reported value when it parses, otherwise the typical range for the route
    pub fn resolve(route: &str, reported: Option<&Value>) -> Option<Self> {
        if let Some((percent, text)) = reported.and_then(parse_reported) {
            return Some(Self {
                route: route.to_string(),
                percent,
                basis: format!("reported {}", text),
            });
        }

        let (low, high) = typical_range(route)?;
        let percent = if low == 0.0 { high / 2.0 } else { (low + high) / 2.0 };
        let range = if low == high {
            format!("{}%", low)
        } else if low == 0.0 {
            format!("<{}%", high)
        } else {
            format!("{}-{}%", low, high)
        };
        Some(Self {
            route: route.to_string(),
            percent,
            basis: format!("estimated from the typical {} range for the route", range),
        })
    }
}

/// The α computation with both sides shown
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaComputation {
    pub source: BioavailabilityEstimate,
    pub target: BioavailabilityEstimate,
    pub source_factor: f64,
    pub target_factor: f64,
    pub alpha: f64,
}

impl AlphaComputation {
    pub fn into_factor(self, drug_name: &str) -> Factor {
        let rationale = format!(
            "{} {} bioavailability: {}% ({}), adjustment factor {}. {} bioavailability: {}% ({}), adjustment factor {}. α = source adjustment factor / target adjustment factor = {} / {} = {}.",
            drug_name,
            self.source.route,
            self.source.percent,
            self.source.basis,
            self.source_factor,
            self.target.route,
            self.target.percent,
            self.target.basis,
            self.target_factor,
            self.source_factor,
            self.target_factor,
            self.alpha
        );
        Factor::new(FactorId::Alpha, self.alpha, rationale)
    }
}

/// α = source adjustment factor / target adjustment factor
pub fn compute_alpha(source: BioavailabilityEstimate, target: BioavailabilityEstimate) -> AlphaComputation {
    let source_factor = adjustment_factor(source.percent);
    let target_factor = adjustment_factor(target.percent);
    AlphaComputation {
        source,
        target,
        source_factor,
        target_factor,
        alpha: source_factor / target_factor,
    }
}

/// Parse "80%", "75-100%", "<5%", "≥90%" or a bare number into one percentage.
///
/// Ranges become their midpoint, an upper bound `<a` becomes `a/2`, a lower bound `>a` becomes `a`.
pub fn parse_percentage(text: &str) -> Option<f64> {
    let caps = PERCENT_RANGE.captures(text)?;
    let first: f64 = caps.get(2)?.as_str().parse().ok()?;
    let percent = match (caps.get(1).map(|m| m.as_str()), caps.get(3)) {
        (_, Some(high)) => {
            let high: f64 = high.as_str().parse().ok()?;
            (first + high) / 2.0
        }
        (Some("<" | "<=" | "≤"), None) => first / 2.0,
        _ => first,
    };
    (0.0..=100.0).contains(&percent).then_some(percent)
}

fn parse_reported(value: &Value) -> Option<(f64, String)> {
    match value {
        Value::Number(n) => {
            let percent = n.as_f64().filter(|p| (0.0..=100.0).contains(p))?;
            Some((percent, format!("{}%", percent)))
        }
        Value::String(s) => parse_percentage(s).map(|p| (p, s.trim().to_string())),
        _ => None,
    }
}

fn typical_range(route: &str) -> Option<(f64, f64)> {
    let lowered = route.trim().to_lowercase();
    ROUTE_HIERARCHY
        .iter()
        .find(|(names, _, _)| {
            names
                .iter()
                .any(|name| lowered == *name || lowered.split(|c: char| !c.is_alphanumeric()).any(|w| w == *name))
        })
        .map(|(_, low, high)| (*low, *high))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discretization_boundaries() {
        assert_eq!(adjustment_factor(0.5), 100.0);
        assert_eq!(adjustment_factor(1.0), 10.0);
        assert_eq!(adjustment_factor(49.9), 10.0);
        assert_eq!(adjustment_factor(50.0), 2.0);
        assert_eq!(adjustment_factor(89.9), 2.0);
        assert_eq!(adjustment_factor(90.0), 1.0);
    }

    #[test]
    fn eighty_percent_against_intravenous_is_two() {
        let source = BioavailabilityEstimate::resolve("Oral", Some(&json!("80%"))).unwrap();
        let target = BioavailabilityEstimate::resolve("Intravenous", Some(&json!(100))).unwrap();
        let computation = compute_alpha(source, target);
        assert_eq!(computation.alpha, 2.0);

        let factor = computation.into_factor("Aspirin");
        assert_eq!(factor.value, Some(2.0));
        assert!(factor.rationale.contains("80%"));
        assert!(factor.rationale.contains("2 / 1 = 2"));
    }

    #[test]
    fn percentages_parse_ranges_and_bounds() {
        assert_eq!(parse_percentage("80-100%"), Some(90.0));
        assert_eq!(parse_percentage("<5%"), Some(2.5));
        assert_eq!(parse_percentage("≥90%"), Some(90.0));
        assert_eq!(parse_percentage("approximately 83%"), Some(83.0));
        assert_eq!(parse_percentage("unknown"), None);
    }

    #[test]
    fn unreported_routes_fall_back_to_hierarchy() {
        let topical = BioavailabilityEstimate::resolve("Topical", None).unwrap();
        assert_eq!(topical.percent, 2.5);
        assert!(topical.basis.contains("<5%"));

        let inhalation = BioavailabilityEstimate::resolve("Inhalation", Some(&json!("not reported"))).unwrap();
        assert_eq!(inhalation.percent, 90.0);

        assert!(BioavailabilityEstimate::resolve("Intravitreal", None).is_none());
    }

    #[test]
    fn alpha_stays_within_bounds() {
        let low = BioavailabilityEstimate::resolve("Topical", Some(&json!("0.5%"))).unwrap();
        let high = BioavailabilityEstimate::resolve("Intravenous", None).unwrap();
        assert_eq!(compute_alpha(low.clone(), high.clone()).alpha, 100.0);
        assert_eq!(compute_alpha(high, low).alpha, 0.01);
    }
}
