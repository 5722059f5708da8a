use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use pde_flow::{Context, GraphError, Result, Task, TaskResult};
use tracing::{debug, info, warn};

use super::types::{StageOutput, session_keys, stage_ids};
use crate::evidence::EvidenceClient;
use crate::merge::{FieldMerge, first_non_empty};
use crate::models::{DrugQuery, Pharmacology};

/// Topics searched separately; earlier topics win when two answers fill the same field
const TOPICS: [&str; 4] = [
    "Pharmacokinetics (Absorption, Distribution, Metabolism, Excretion)",
    "Indication",
    "Pharmacodynamics",
    "Mechanism of Action",
];

pub struct PharmacologyTask {
    evidence: Arc<dyn EvidenceClient>,
}

impl PharmacologyTask {
    pub fn new(evidence: Arc<dyn EvidenceClient>) -> Self {
        Self { evidence }
    }

    pub async fn resolve(&self, name: &str) -> StageOutput<Pharmacology> {
        let questions = TOPICS.map(|topic| async move { (topic, self.evidence.ask(&pharmacology_prompt(name, topic)).await) });

        let mut partials = Vec::with_capacity(TOPICS.len());
        let mut failures = Vec::new();
        for (topic, answer) in join_all(questions).await {
            if answer.is_success() {
                partials.push(Pharmacology::from_answer(&answer));
            } else {
                warn!(drug = %name, topic, error = %answer.error_message(), "pharmacology question failed");
                debug!(raw = %answer.raw_response, "failed pharmacology response");
                failures.push(format!("{}: {}", topic, answer.error_message()));
            }
        }

        let pharmacology: Pharmacology = first_non_empty(partials);
        if failures.is_empty() {
            StageOutput::ok(pharmacology)
        } else {
            StageOutput::degraded(pharmacology, format!("pharmacology degraded ({})", failures.join(", ")))
        }
    }
}

pub fn pharmacology_prompt(name: &str, topic: &str) -> String {
    format!(
        r#"# Task: Search the {topic} information of the drug {name}

Answer only with this JSON object inside a ```json block. Fill the fields the search covers and use null for the rest:

```json
{{
    "drug_name": "{name}",
    "Pharmacokinetics": {{
        "Absorption": "...",
        "Distribution": "...",
        "Metabolism": "...",
        "Excretion": "..."
    }},
    "Indication": "...",
    "Pharmacodynamics": "...",
    "Mechanism of Action": "...",
    "reference_links": ["links to the sources"]
}}
```
"#,
        name = name,
        topic = topic
    )
}

#[async_trait]
impl Task for PharmacologyTask {
    fn id(&self) -> &str {
        stage_ids::PHARMACOLOGY
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: DrugQuery = context
            .get(session_keys::QUERY)
            .await
            .ok_or_else(|| GraphError::ContextError("Drug query not found in context".to_string()))?;

        info!(drug = %query.name, "Resolving pharmacology");
        let output = self.resolve(&query.name).await;
        let status = format!("{} pharmacology fields missing", output.value.missing_fields().len());
        output.store(&context, session_keys::PHARMACOLOGY, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvidenceAnswer;
    use serde_json::json;

    struct PerTopic;

    #[async_trait]
    impl EvidenceClient for PerTopic {
        async fn ask(&self, prompt: &str) -> EvidenceAnswer {
            let fields = if prompt.contains("Search the Pharmacokinetics") {
                json!({"Pharmacokinetics": {"Absorption": "Rapid, bioavailability 83%", "Excretion": "Urine"}, "Indication": "HIV"})
            } else if prompt.contains("Search the Indication") {
                json!({"Indication": "HIV-1 infection in combination therapy"})
            } else if prompt.contains("Search the Mechanism") {
                json!({"Mechanism of Action": "Carbovir triphosphate inhibits reverse transcriptase"})
            } else {
                return EvidenceAnswer::failure("timed out", "");
            };
            EvidenceAnswer::success(fields.as_object().unwrap().clone(), vec![], "{}")
        }
    }

    #[tokio::test]
    async fn merges_topics_in_priority_order() {
        let task = PharmacologyTask::new(Arc::new(PerTopic));
        let output = task.resolve("Abacavir").await;

        let pharmacology = output.value;
        assert_eq!(pharmacology.indication.as_deref(), Some("HIV"));
        assert_eq!(pharmacology.pharmacokinetics.excretion.as_deref(), Some("Urine"));
        assert!(pharmacology.mechanism_of_action.is_some());
        assert_eq!(pharmacology.pharmacodynamics, None);
        assert!(output.failure.unwrap().contains("Pharmacodynamics: timed out"));
    }

    struct AlwaysAnswers;

    #[async_trait]
    impl EvidenceClient for AlwaysAnswers {
        async fn ask(&self, _prompt: &str) -> EvidenceAnswer {
            let fields = json!({"Indication": "HIV-1 infection"});
            EvidenceAnswer::success(fields.as_object().unwrap().clone(), vec![], "{}")
        }
    }

    #[tokio::test]
    async fn every_topic_answered_is_not_degraded() {
        let output = PharmacologyTask::new(Arc::new(AlwaysAnswers)).resolve("Abacavir").await;
        assert_eq!(output.failure, None);
        assert_eq!(output.value.indication.as_deref(), Some("HIV-1 infection"));
    }
}
