use std::sync::Arc;

use async_trait::async_trait;
use pde_flow::{Context, GraphError, Result, Task, TaskResult};
use tracing::{debug, info, warn};

use super::types::{StageOutput, session_keys, stage_ids};
use crate::evidence::EvidenceClient;
use crate::factors::{BioavailabilityEstimate, Factor, FactorId, FactorSet, compute_alpha};
use crate::models::{ClinicalDossier, DrugQuery, same_route};

/// Recomputes α when the clinical evidence covers a different route than requested
pub struct AlphaCorrectionTask {
    reasoning: Arc<dyn EvidenceClient>,
}

impl AlphaCorrectionTask {
    pub fn new(reasoning: Arc<dyn EvidenceClient>) -> Self {
        Self { reasoning }
    }

    /// α for evidence gathered on `source_route` applied to `target_route`.
    ///
    /// Bioavailability comes from the model when it reports a usable percentage and
    /// from the typical range of the route otherwise.
    pub async fn compute_alpha(&self, drug_name: &str, source_route: &str, target_route: &str) -> StageOutput<Factor> {
        let answer = self
            .reasoning
            .ask(&bioavailability_prompt(drug_name, source_route, target_route))
            .await;
        if !answer.is_success() {
            warn!(drug = %drug_name, error = %answer.error_message(), "bioavailability request failed, using route ranges");
            debug!(raw = %answer.raw_response, "failed bioavailability response");
        }

        let source = BioavailabilityEstimate::resolve(source_route, answer.field("source_bioavailability"));
        let target = BioavailabilityEstimate::resolve(target_route, answer.field("target_bioavailability"));

        match (source, target) {
            (Some(source), Some(target)) => {
                let computation = compute_alpha(source, target);
                info!(
                    drug = %drug_name,
                    source = %source_route,
                    target = %target_route,
                    alpha = computation.alpha,
                    "α recomputed"
                );
                StageOutput::ok(computation.into_factor(drug_name))
            }
            (source, target) => {
                let unknown: Vec<&str> = [(source_route, source.is_none()), (target_route, target.is_none())]
                    .into_iter()
                    .filter(|(_, missing)| *missing)
                    .map(|(route, _)| route)
                    .collect();
                let message = format!("no bioavailability estimate for route {}", unknown.join(" and "));
                StageOutput::degraded(
                    Factor::no_data(
                        FactorId::Alpha,
                        format!(
                            "No Data: evidence was found for {} but {} was requested, and {}.",
                            source_route, target_route, message
                        ),
                    ),
                    message,
                )
            }
        }
    }
}

/// True when the dossier resolved to a route other than the one requested
pub fn needs_correction(context: &Context) -> bool {
    let query: Option<DrugQuery> = context.get_sync(session_keys::QUERY);
    let dossier: Option<ClinicalDossier> = context.get_sync(session_keys::CLINICAL);
    match (query, dossier) {
        (Some(query), Some(dossier)) => dossier.route().is_some_and(|route| !same_route(route, &query.route)),
        _ => false,
    }
}

pub fn bioavailability_prompt(drug_name: &str, source_route: &str, target_route: &str) -> String {
    format!(
        r#"Estimate the absolute bioavailability of {drug} by the {source} route and by the {target} route.

Use reported human data where it exists. Otherwise estimate from the typical range of the route, the physicochemical properties of {drug}, and drugs of the same class, and say so.

Answer only with this JSON object inside a ```json block:

```json
{{
    "source_route": "{source}",
    "source_bioavailability": "percentage, e.g. 83%",
    "target_route": "{target}",
    "target_bioavailability": "percentage, e.g. 100%",
    "rationale": "where each number comes from"
}}
```
"#,
        drug = drug_name,
        source = source_route,
        target = target_route
    )
}

#[async_trait]
impl Task for AlphaCorrectionTask {
    fn id(&self) -> &str {
        stage_ids::ALPHA
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: DrugQuery = context
            .get(session_keys::QUERY)
            .await
            .ok_or_else(|| GraphError::ContextError("Drug query not found in context".to_string()))?;
        let dossier: ClinicalDossier = context.get(session_keys::CLINICAL).await.unwrap_or_default();
        let source_route = dossier
            .route()
            .ok_or_else(|| GraphError::ContextError("Clinical dossier has no resolved route".to_string()))?;

        info!(drug = %query.name, source = %source_route, target = %query.route, "Correcting α for route substitution");
        let output = self.compute_alpha(&query.name, source_route, &query.route).await;

        let mut factors: FactorSet = context
            .get::<Vec<Factor>>(session_keys::FACTORS)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();
        let status = match output.value.value {
            Some(alpha) => format!("α = {}", alpha),
            None => "α undetermined".to_string(),
        };
        factors.set(output.value);

        StageOutput {
            value: factors.into_ordered(),
            failure: output.failure,
        }
        .store(&context, session_keys::FACTORS, status)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::constant_factors;
    use crate::models::EvidenceAnswer;
    use serde_json::json;

    struct Answers(EvidenceAnswer);

    #[async_trait]
    impl EvidenceClient for Answers {
        async fn ask(&self, _prompt: &str) -> EvidenceAnswer {
            self.0.clone()
        }
    }

    fn reasoning(answer: EvidenceAnswer) -> Arc<Answers> {
        Arc::new(Answers(answer))
    }

    #[tokio::test]
    async fn reported_percentages_give_the_ratio() {
        let fields = json!({"source_bioavailability": "80%", "target_bioavailability": "100%"});
        let task = AlphaCorrectionTask::new(reasoning(EvidenceAnswer::success(
            fields.as_object().unwrap().clone(),
            vec![],
            "{}",
        )));

        let output = task.compute_alpha("Abacavir", "Oral", "Intravenous").await;
        assert_eq!(output.failure, None);
        assert_eq!(output.value.value, Some(2.0));
        assert!(output.value.rationale.contains("= 2 / 1 = 2."));
    }

    #[tokio::test]
    async fn failed_model_falls_back_to_route_ranges() {
        let task = AlphaCorrectionTask::new(reasoning(EvidenceAnswer::failure("HTTP 502", "")));

        let output = task.compute_alpha("Hydrocortisone", "Topical", "Oral").await;
        assert_eq!(output.failure, None);
        // topical <5% → 10, oral midpoint 52.5% → 2
        assert_eq!(output.value.value, Some(5.0));
    }

    #[tokio::test]
    async fn unknown_route_is_no_data() {
        let task = AlphaCorrectionTask::new(reasoning(EvidenceAnswer::failure("HTTP 502", "")));

        let output = task.compute_alpha("Abacavir", "Intrathecal", "Oral").await;
        assert_eq!(output.value.value, None);
        assert!(output.failure.unwrap().contains("Intrathecal"));
    }

    #[tokio::test]
    async fn condition_compares_resolved_and_requested_routes() {
        let context = Context::new();
        context.set(session_keys::QUERY, DrugQuery::new("Abacavir", "oral")).await.unwrap();
        assert!(!needs_correction(&context));

        context
            .set(session_keys::CLINICAL, ClinicalDossier::not_found(vec![]))
            .await
            .unwrap();
        assert!(!needs_correction(&context));
    }

    #[tokio::test]
    async fn run_replaces_only_alpha() {
        let context = Context::new();
        context.set(session_keys::QUERY, DrugQuery::new("Abacavir", "Intravenous")).await.unwrap();
        context.set(session_keys::FACTORS, constant_factors().to_vec()).await.unwrap();
        let sections = crate::tasks::clinical::ClinicalSections {
            therapeutic_doses_table: "| Species | Treatment | Route | Dosage |\n|---|---|---|---|\n| Adults | HIV | Oral | 300 mg |".into(),
            adverse_effects: "Nausea.".into(),
            warning: "Caution.".into(),
            box_warning: "Black Box Warning: hypersensitivity.".into(),
            critical_effects: "The critical or lead effects of abacavir in clinical data were treatment of HIV.".into(),
        };
        let dossier = ClinicalDossier::found("Oral", &sections, Default::default(), vec![]);
        context.set(session_keys::CLINICAL, dossier).await.unwrap();
        assert!(needs_correction(&context));

        let fields = json!({"source_bioavailability": 83, "target_bioavailability": 100});
        let task = AlphaCorrectionTask::new(reasoning(EvidenceAnswer::success(
            fields.as_object().unwrap().clone(),
            vec![],
            "{}",
        )));
        task.run(context.clone()).await.unwrap();

        let factors: Vec<Factor> = context.get(session_keys::FACTORS).await.unwrap();
        assert_eq!(factors.len(), 7);
        let alpha = factors.iter().find(|f| f.id == FactorId::Alpha).unwrap();
        assert_eq!(alpha.value, Some(2.0));
        let f1 = factors.iter().find(|f| f.id == FactorId::F1).unwrap();
        assert_eq!(f1.value, Some(1.0));
    }
}
