use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use pde_flow::{Context, GraphError, Result, Task, TaskResult};
use regex::Regex;
use tracing::{debug, info, warn};

use super::types::{StageOutput, session_keys, stage_ids};
use crate::evidence::EvidenceClient;
use crate::models::{ClinicalDossier, DrugQuery, EvidenceAnswer, PoDRecord};

/// Assumptions a derivation may use when the label is silent
pub const STANDARD_ASSUMPTIONS: &str = r#"1. Droppers/Drops:
    - Standard drop volume: 0.05 mL/drop
    - Standard dropper size: 1 mL
    - Minimum drops per application: 1 drop
2. Topical applications:
    - Standard application amount: 2 mg/cm² or thin film
    - Default application frequency: twice daily if not specified
    - Standard application length for lines/strips: 2.5 cm
    - Standard area for "thin film": 10 cm²
3. Oral solutions/suspensions:
    - Standard teaspoon: 5 mL
    - Standard tablespoon: 15 mL
4. Spray applications:
    - Standard spray volume: 0.1 mL/spray
    - Minimum sprays per application: 1 spray"#;

/// Numbers the standard assumptions and unit conversions introduce
const STANDARD_NUMBERS: [f64; 10] = [0.05, 1.0, 2.0, 2.5, 10.0, 5.0, 15.0, 0.1, 24.0, 1000.0];

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").expect("number pattern is valid"));

/// Minimum daily therapeutic dose from the clinical dossier
pub struct PointOfDepartureTask {
    evidence: Arc<dyn EvidenceClient>,
}

impl PointOfDepartureTask {
    pub fn new(evidence: Arc<dyn EvidenceClient>) -> Self {
        Self { evidence }
    }

    pub async fn compute(&self, ingredient: &str, dossier: &ClinicalDossier) -> StageOutput<PoDRecord> {
        let Some(content) = dossier_content(dossier) else {
            return StageOutput::ok(PoDRecord::undetermined(
                "No clinical dosage evidence is available for this route, so no point of departure can be derived.",
                Vec::new(),
            ));
        };

        let answer = self.evidence.ask(&pod_prompt(ingredient, &content)).await;
        if !answer.is_success() {
            debug!(raw = %answer.raw_response, "point of departure request failed");
            return StageOutput::degraded(
                PoDRecord::undetermined(
                    format!("The point of departure could not be computed: {}", answer.error_message()),
                    Vec::new(),
                ),
                format!("point of departure unavailable: {}", answer.error_message()),
            );
        }

        StageOutput::ok(record_from_answer(&answer, &content))
    }
}

/// Clinical text plus structured dosage, the only material a derivation may draw on
fn dossier_content(dossier: &ClinicalDossier) -> Option<String> {
    let clinical = dossier.clinical_text()?;
    let dosage = dossier
        .dosage_detail()
        .and_then(|d| serde_json::to_string(d).ok())
        .unwrap_or_else(|| "{}".to_string());
    Some(format!("clinical={}\ndosage_detail={}", clinical, dosage))
}

/// Validate the model's derivation; anything it cannot justify becomes a null value
pub fn record_from_answer(answer: &EvidenceAnswer, source: &str) -> PoDRecord {
    let narrative = answer.field_text("PoD_calculate_detail").unwrap_or_default();
    let assumptions = answer.field_list("assumptions_made");

    let Some(value) = answer.field_f64("PoD") else {
        return PoDRecord::undetermined(narrative, assumptions);
    };

    let unit = answer.field_text("PoD_unit").unwrap_or_default();
    let Some(mg_per_day) = to_mg_per_day(value, &unit) else {
        warn!(value, unit = %unit, "point of departure unit cannot be normalised");
        return PoDRecord::undetermined(
            format!("{} The reported unit '{}' cannot be converted to mg/day.", narrative, unit)
                .trim()
                .to_string(),
            assumptions,
        );
    };

    if mg_per_day <= 0.0 {
        return PoDRecord::undetermined(narrative, assumptions);
    }

    if let Some(rejected) = unsupported_assumption(&assumptions, source) {
        warn!(assumption = %rejected, "point of departure relies on a non-standard assumption");
        return PoDRecord::undetermined(
            format!(
                "{} Rejected: the assumption '{}' is outside the standard assumption set.",
                narrative, rejected
            )
            .trim()
            .to_string(),
            assumptions,
        );
    }

    PoDRecord::determined(mg_per_day, narrative, assumptions)
}

pub fn to_mg_per_day(value: f64, unit: &str) -> Option<f64> {
    let unit: String = unit
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    let factor = match unit.as_str() {
        "mg/day" | "mg/d" | "mgperday" => 1.0,
        "g/day" | "g/d" => 1000.0,
        "mcg/day" | "µg/day" | "μg/day" | "ug/day" | "mcg/d" | "µg/d" | "ug/d" => 0.001,
        _ => return None,
    };
    Some((value * factor * 1e6).round() / 1e6)
}

/// First assumption naming a number found neither in the standard set nor in the source material
pub fn unsupported_assumption(assumptions: &[String], source: &str) -> Option<String> {
    let known: Vec<f64> = NUMBER
        .find_iter(source)
        .filter_map(|m| m.as_str().parse().ok())
        .chain(STANDARD_NUMBERS)
        .collect();

    assumptions
        .iter()
        .find(|assumption| {
            NUMBER
                .find_iter(assumption)
                .filter_map(|m| m.as_str().parse::<f64>().ok())
                .any(|n| !known.iter().any(|k| (k - n).abs() < 1e-9))
        })
        .cloned()
}

pub fn pod_prompt(ingredient: &str, content: &str) -> String {
    format!(
        r#"Content Start
```
{content}
```
Content End

Based only on the content above, calculate the minimum daily therapeutic dose of {ingredient} in adults (Point of Departure, PoD) in mg/day.

Answer only with this JSON object inside a ```json block:

```json
{{
    "PoD": <number or null>,
    "PoD_unit": <"mg/day" or null>,
    "PoD_calculate_detail": "every calculation step including unit conversions, or why no value can be given",
    "assumptions_made": ["each assumption used"]
}}
```

Instructions:
- "PoD" is the number only, without units, converted to mg/day.
- If several dosage forms exist, use the lowest effective dose.
- For time-dependent regimens, use the minimum daily maintenance dose.
- Record every assumption you used.

Standard assumptions, allowed only when the content does not state the value:
{assumptions}

Set "PoD" and "PoD_unit" to null only if:
- no dosage information is available even after the standard assumptions
- the drug is contraindicated for this route
- the calculation would need an assumption not listed above
"#,
        content = content,
        ingredient = ingredient,
        assumptions = STANDARD_ASSUMPTIONS
    )
}

#[async_trait]
impl Task for PointOfDepartureTask {
    fn id(&self) -> &str {
        stage_ids::POD
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: DrugQuery = context
            .get(session_keys::QUERY)
            .await
            .ok_or_else(|| GraphError::ContextError("Drug query not found in context".to_string()))?;
        let dossier: ClinicalDossier = context.get(session_keys::CLINICAL).await.unwrap_or_default();

        info!(drug = %query.name, "Computing point of departure");
        let output = self.compute(&query.name, &dossier).await;
        let status = match output.value.value {
            Some(value) => format!("PoD {} {}", value, PoDRecord::UNIT),
            None => "PoD undetermined".to_string(),
        };
        output.store(&context, session_keys::POD, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SOURCE: &str = "clinical=| Adults | HIV-1 infection | Oral | 600 mg once daily or 300 mg twice daily |\ndosage_detail={\"frequency\":\"twice daily\",\"amount_per_use\":\"300 mg\"}";

    fn answer(fields: Value) -> EvidenceAnswer {
        EvidenceAnswer::success(fields.as_object().unwrap().clone(), vec![], "{}")
    }

    #[test]
    fn accepts_a_value_backed_by_the_label() {
        let record = record_from_answer(
            &answer(json!({
                "PoD": 600,
                "PoD_unit": "mg/day",
                "PoD_calculate_detail": "300 mg twice daily = 600 mg/day",
                "assumptions_made": ["Adult dose of 300 mg twice daily taken from the label"]
            })),
            SOURCE,
        );
        assert_eq!(record.value, Some(600.0));
        assert_eq!(record.unit.as_deref(), Some("mg/day"));
        assert_eq!(record.point_of_departure, "600 mg/day");
    }

    #[test]
    fn grams_are_normalised() {
        assert_eq!(to_mg_per_day(0.6, "g/day"), Some(600.0));
        assert_eq!(to_mg_per_day(600.0, " MG / day"), Some(600.0));
        assert_eq!(to_mg_per_day(500.0, "mcg/day"), Some(0.5));
        assert_eq!(to_mg_per_day(3.0, "tablets/day"), None);
    }

    #[test]
    fn invented_assumptions_null_the_value() {
        let record = record_from_answer(
            &answer(json!({
                "PoD": 42,
                "PoD_unit": "mg/day",
                "PoD_calculate_detail": "Assumed a 70 kg adult at 0.6 mg/kg",
                "assumptions_made": ["Body weight of 70 kg"]
            })),
            SOURCE,
        );
        assert_eq!(record.value, None);
        assert_eq!(record.unit, None);
        assert!(record.narrative.contains("Body weight of 70 kg"));
        assert_eq!(record.assumptions, vec!["Body weight of 70 kg"]);
    }

    #[test]
    fn standard_assumptions_are_allowed() {
        let assumptions = vec!["Thin film covers 10 cm² at 2 mg/cm², applied twice daily".to_string()];
        assert_eq!(unsupported_assumption(&assumptions, "clinical=apply a thin film"), None);
    }

    #[test]
    fn null_pod_is_a_valid_answer() {
        let record = record_from_answer(
            &answer(json!({"PoD": null, "PoD_unit": null, "PoD_calculate_detail": "Contraindicated for this route"})),
            SOURCE,
        );
        assert_eq!(record.value, None);
        assert_eq!(record.narrative, "Contraindicated for this route");
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EvidenceClient for Counting {
        async fn ask(&self, _prompt: &str) -> EvidenceAnswer {
            self.0.fetch_add(1, Ordering::SeqCst);
            EvidenceAnswer::failure("unused", "")
        }
    }

    #[tokio::test]
    async fn missing_dossier_skips_the_model() {
        let client = Arc::new(Counting(AtomicUsize::new(0)));
        let task = PointOfDepartureTask::new(client.clone());

        let output = task.compute("Abacavir", &ClinicalDossier::not_found(vec![])).await;
        assert_eq!(output.failure, None);
        assert_eq!(output.value.value, None);
        assert_eq!(client.0.load(Ordering::SeqCst), 0);
    }
}
