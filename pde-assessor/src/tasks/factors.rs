use std::sync::Arc;

use async_trait::async_trait;
use pde_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::{debug, info};

use super::types::{session_keys, stage_ids};
use crate::evidence::EvidenceClient;
use crate::factors::{Factor, FactorId, FactorSet, SeverityJudgement, compute_f3, compute_f4, judge_f5, severity};
use crate::models::{ClinicalDossier, HazardRecord, PoDRecord};

/// Computes F3, F4 and F5 over the constant factors
pub struct FactorEngineTask {
    reasoning: Arc<dyn EvidenceClient>,
}

impl FactorEngineTask {
    pub fn new(reasoning: Arc<dyn EvidenceClient>) -> Self {
        Self { reasoning }
    }

    pub async fn compute(&self, dossier: &ClinicalDossier, hazards: &[HazardRecord], pod: &PoDRecord) -> FactorSet {
        let clinical = dossier.clinical_text();
        let mut factors = FactorSet::with_constants();
        factors.set(compute_f3(clinical));
        factors.set(compute_f4(clinical, hazards));
        factors.set(self.f5(pod, clinical).await);
        factors
    }

    /// Keyword rules first; the reasoning model only when they cannot classify the effect level
    async fn f5(&self, pod: &PoDRecord, clinical: Option<&str>) -> Factor {
        match judge_f5(pod, clinical) {
            SeverityJudgement::Decided(factor) => factor,
            SeverityJudgement::Undetermined => {
                let answer = self.reasoning.ask(&severity_prompt(pod, clinical)).await;
                severity::from_model_answer(&answer).unwrap_or_else(|| {
                    debug!(raw = %answer.raw_response, "F5 answer rejected");
                    Factor::no_data(
                        FactorId::F5,
                        "No Data: neither a NOAEL nor a LOAEL could be established from the point of departure.",
                    )
                })
            }
        }
    }
}

pub fn severity_prompt(pod: &PoDRecord, clinical: Option<&str>) -> String {
    format!(
        r#"Point of departure: {pod}
Derivation: {narrative}

Clinical information:
{clinical}

Classify the point of departure:
- NOAEL if no adverse effect is observed at this dose. F5 = 1.
- LOAEL if adverse effects are observed at this dose. F5 is an integer from 2 to 5, higher for more severe or irreversible effects.

Answer only with this JSON object inside a ```json block:

```json
{{
    "Effect_Level": "NOAEL or LOAEL",
    "F5_value": 1,
    "Rationale": "why this level and value were chosen"
}}
```
"#,
        pod = pod.point_of_departure,
        narrative = pod.narrative,
        clinical = clinical.unwrap_or("None available")
    )
}

#[async_trait]
impl Task for FactorEngineTask {
    fn id(&self) -> &str {
        stage_ids::FACTORS
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let dossier: ClinicalDossier = context.get(session_keys::CLINICAL).await.unwrap_or_default();
        let hazards: Vec<HazardRecord> = context.get(session_keys::HAZARDS).await.unwrap_or_default();
        let pod: PoDRecord = context.get(session_keys::POD).await.unwrap_or_default();

        info!(hazards = hazards.len(), has_clinical = dossier.has_evidence(), "Computing factors");
        let factors = self.compute(&dossier, &hazards, &pod).await.into_ordered();

        let summary: Vec<String> = factors
            .iter()
            .map(|f| match f.value {
                Some(v) => format!("{}={}", f.id, v),
                None => format!("{}=No Data", f.id),
            })
            .collect();
        context.set(session_keys::FACTORS, factors).await?;

        Ok(TaskResult::new_with_status(NextAction::Continue, summary.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvidenceAnswer, ToxicityType, Verdict};
    use serde_json::json;

    struct Answers(EvidenceAnswer);

    #[async_trait]
    impl EvidenceClient for Answers {
        async fn ask(&self, _prompt: &str) -> EvidenceAnswer {
            self.0.clone()
        }
    }

    fn model(fields: serde_json::Value) -> Arc<Answers> {
        Arc::new(Answers(EvidenceAnswer::success(fields.as_object().unwrap().clone(), vec![], "{}")))
    }

    fn sensitizing() -> Vec<HazardRecord> {
        vec![HazardRecord {
            toxicity_type: ToxicityType::HighlySensitizing,
            verdict: Verdict::Yes,
            detail: "HLA-B*5701".into(),
            reference_links: vec![],
        }]
    }

    #[tokio::test]
    async fn keyword_rules_do_not_consult_the_model() {
        let task = FactorEngineTask::new(model(json!({"Effect_Level": "LOAEL", "F5_value": 5})));
        let pod = PoDRecord::determined(50.0, "NOAEL of 50 mg/kg/day", vec![]);

        let factors = task.compute(&ClinicalDossier::not_found(vec![]), &sensitizing(), &pod).await;
        assert_eq!(factors.get(FactorId::F5).unwrap().value, Some(1.0));
        assert_eq!(factors.get(FactorId::F4).unwrap().value, Some(10.0));
        assert_eq!(factors.get(FactorId::F3).unwrap().value, None);
        assert_eq!(factors.get(FactorId::F2).unwrap().value, Some(10.0));
    }

    #[tokio::test]
    async fn model_fills_an_unclassified_effect_level() {
        let task = FactorEngineTask::new(model(json!({"Effect_Level": "LOAEL", "F5_value": 4, "Rationale": "hepatotoxicity"})));
        let pod = PoDRecord::determined(600.0, "300 mg twice daily", vec![]);

        let factors = task.compute(&ClinicalDossier::not_found(vec![]), &[], &pod).await;
        assert_eq!(factors.get(FactorId::F5).unwrap().value, Some(4.0));
    }

    #[tokio::test]
    async fn out_of_range_model_answers_are_no_data() {
        let task = FactorEngineTask::new(model(json!({"Effect_Level": "LOAEL", "F5_value": 7})));
        let pod = PoDRecord::determined(600.0, "300 mg twice daily", vec![]);

        let factors = task.compute(&ClinicalDossier::not_found(vec![]), &[], &pod).await;
        assert_eq!(factors.get(FactorId::F5).unwrap().value, None);
    }

    #[tokio::test]
    async fn stores_seven_ordered_factors() {
        let context = Context::new();
        let task = FactorEngineTask::new(model(json!({})));

        task.run(context.clone()).await.unwrap();
        let factors: Vec<Factor> = context.get(session_keys::FACTORS).await.unwrap();
        let ids: Vec<FactorId> = factors.iter().map(|f| f.id).collect();
        assert_eq!(ids, FactorId::ALL.to_vec());
    }
}
