use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use pde_flow::{Context, GraphError, Result, Task, TaskResult};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::types::{StageOutput, session_keys, stage_ids};
use crate::evidence::EvidenceClient;
use crate::models::{DrugQuery, EvidenceAnswer, HazardRecord, ToxicityType, Verdict, reference_links, value_f64, value_text};

/// Four independent toxicity questions, one per [`ToxicityType`]
pub struct HazardSurveyTask {
    evidence: Arc<dyn EvidenceClient>,
}

impl HazardSurveyTask {
    pub fn new(evidence: Arc<dyn EvidenceClient>) -> Self {
        Self { evidence }
    }

    /// Always yields one record per toxicity type; failed questions become Unknown
    pub async fn survey(&self, ingredient: &str) -> StageOutput<Vec<HazardRecord>> {
        let questions = ToxicityType::ALL.map(|toxicity_type| async move {
            let answer = self.evidence.ask(&hazard_prompt(ingredient, toxicity_type)).await;
            (toxicity_type, answer)
        });

        let mut records = Vec::with_capacity(ToxicityType::ALL.len());
        let mut failures = Vec::new();
        for (toxicity_type, answer) in join_all(questions).await {
            if !answer.is_success() {
                warn!(drug = %ingredient, toxicity = %toxicity_type, error = %answer.error_message(), "hazard question failed");
                debug!(raw = %answer.raw_response, "failed hazard response");
                failures.push(format!("{}: {}", toxicity_type, answer.error_message()));
            }
            records.push(record_from_answer(toxicity_type, &answer));
        }

        if failures.is_empty() {
            StageOutput::ok(records)
        } else {
            StageOutput::degraded(records, format!("hazard survey degraded ({})", failures.join(", ")))
        }
    }
}

pub fn record_from_answer(toxicity_type: ToxicityType, answer: &EvidenceAnswer) -> HazardRecord {
    if !answer.is_success() {
        return HazardRecord::unknown(
            toxicity_type,
            format!("No evidence could be retrieved: {}", answer.error_message()),
        );
    }

    let detail = answer
        .field_text("result_detail")
        .or_else(|| answer.field_text("content"))
        .unwrap_or_else(|| "Insufficient evidence.".to_string());

    HazardRecord {
        toxicity_type,
        verdict: resolve_verdict(answer),
        detail,
        reference_links: reference_links(answer),
    }
}

/// The verdict backed by the highest-priority source level.
///
/// When the answer lists its sources, the most authoritative level holding a Yes or No
/// decides and disagreement inside that level is Unknown. Otherwise the reported
/// `result` is taken as given.
pub fn resolve_verdict(answer: &EvidenceAnswer) -> Verdict {
    let mut sourced: Vec<(u32, Verdict)> = answer
        .field("sources")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|source| {
            let level = source.get("level").and_then(value_f64)?;
            let verdict = source.get("verdict").and_then(value_text).map(|v| Verdict::parse(&v))?;
            (level >= 1.0 && verdict != Verdict::Unknown).then_some((level as u32, verdict))
        })
        .collect();

    if sourced.is_empty() {
        return answer
            .field_text("result")
            .map(|r| Verdict::parse(&r))
            .unwrap_or(Verdict::Unknown);
    }

    sourced.sort_by_key(|(level, _)| *level);
    let top = sourced[0].0;
    let mut at_top = sourced.iter().filter(|(level, _)| *level == top).map(|(_, v)| *v);
    let first = at_top.next().unwrap_or(Verdict::Unknown);
    if at_top.all(|v| v == first) {
        first
    } else {
        Verdict::Unknown
    }
}

pub fn hazard_prompt(ingredient: &str, toxicity_type: ToxicityType) -> String {
    format!(
        r#"# Task: Find whether the drug active ingredient {ingredient} is a {kind}

Answer only with this JSON object inside a ```json block:

```json
{{
    "ingredient_name": "{ingredient}",
    "section_name": "{kind}",
    "content": "what the sources say about {kind}",
    "reference_links": ["links to the sources"],
    "sources": [{{"level": 1, "verdict": "Yes/No"}}],
    "result": "Yes/No/Unknown",
    "result_detail": "explanation of the conclusion, naming any conflicts between sources"
}}
```

Source levels, most authoritative first:
1. Regulatory authorities (FDA, EMA, WHO, ECHA)
2. Official pharmacopeias
3. Peer-reviewed literature (PubMed, ScienceDirect)
4. Other validated sources
5. Other sources

List every source you relied on in "sources" with its level.
A higher level overrides a lower one. If sources at the same level disagree, the result is "Unknown".
Use "Unknown" as well when evidence is insufficient or absent.
"#,
        ingredient = ingredient,
        kind = toxicity_type
    )
}

#[async_trait]
impl Task for HazardSurveyTask {
    fn id(&self) -> &str {
        stage_ids::HAZARDS
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: DrugQuery = context
            .get(session_keys::QUERY)
            .await
            .ok_or_else(|| GraphError::ContextError("Drug query not found in context".to_string()))?;

        info!(drug = %query.name, "Surveying toxicity hazards");
        let output = self.survey(&query.name).await;
        let yes: Vec<String> = output
            .value
            .iter()
            .filter(|r| r.verdict == Verdict::Yes)
            .map(|r| r.toxicity_type.to_string())
            .collect();
        let status = format!("{} hazard records, positive: [{}]", output.value.len(), yes.join(", "));
        output.store(&context, session_keys::HAZARDS, status).await
    }
}
