use std::sync::Arc;
use std::time::Duration;

use pde_flow::{Context, FanOutTask, Graph, GraphBuilder, Task};
use tracing::{Instrument, error, info, info_span, warn};

use crate::evidence::{EvidenceClient, IdentityLookup};
use crate::models::{AssessmentRequest, Report};
use crate::report::assemble_report;
use crate::tasks::*;

/// The external collaborators one assessment talks to
#[derive(Clone)]
pub struct EvidenceSources {
    /// Retrieval-augmented search for identity, pharmacology, clinical and hazard evidence
    pub search: Arc<dyn EvidenceClient>,
    /// Extraction and reasoning for PoD, F5 and bioavailability
    pub reasoning: Arc<dyn EvidenceClient>,
    pub identity: Arc<dyn IdentityLookup>,
}

pub const EVIDENCE_FAN_OUT: &str = "evidence";
pub const ASSESSMENT_GRAPH: &str = "pde_assessment";

/// Each evidence stage and the context key its output lands in
const EVIDENCE_OUTPUTS: [(&str, &str); 4] = [
    (stage_ids::IDENTITY, session_keys::IDENTITY),
    (stage_ids::PHARMACOLOGY, session_keys::PHARMACOLOGY),
    (stage_ids::CLINICAL, session_keys::CLINICAL),
    (stage_ids::HAZARDS, session_keys::HAZARDS),
];

/// evidence (identity | pharmacology | clinical | hazards) → PoD → factors → α when the route was substituted
pub fn build_assessment_workflow(sources: &EvidenceSources, stage_timeout: Option<Duration>) -> Graph {
    let evidence_children: Vec<Arc<dyn Task>> = vec![
        Arc::new(ChemicalIdentityTask::new(sources.identity.clone(), sources.search.clone())),
        Arc::new(PharmacologyTask::new(sources.search.clone())),
        Arc::new(ClinicalDossierTask::new(sources.search.clone())),
        Arc::new(HazardSurveyTask::new(sources.search.clone())),
    ];
    let evidence_task = Arc::new(FanOutTask::new(EVIDENCE_FAN_OUT, evidence_children));
    let evidence_id = evidence_task.id().to_string();

    let pod_task = Arc::new(PointOfDepartureTask::new(sources.reasoning.clone()));
    let pod_id = pod_task.id().to_string();

    let factors_task = Arc::new(FactorEngineTask::new(sources.reasoning.clone()));
    let factors_id = factors_task.id().to_string();

    let alpha_task = Arc::new(AlphaCorrectionTask::new(sources.reasoning.clone()));
    let alpha_id = alpha_task.id().to_string();

    let builder = GraphBuilder::new(ASSESSMENT_GRAPH)
        .add_task(evidence_task)
        .add_task(pod_task)
        .add_task(factors_task)
        .add_task(alpha_task)
        .add_edge(&evidence_id, &pod_id)
        .add_edge(&pod_id, &factors_id)
        .add_conditional_edge(&factors_id, &alpha_id, alpha::needs_correction);

    match stage_timeout {
        Some(limit) => builder.with_stage_timeout(limit).build(),
        None => builder.build(),
    }
}

/// Runs the assessment workflow for one drug and route at a time.
///
/// Cheap to clone; every run gets its own [`Context`], so concurrent runs share
/// nothing but the evidence clients (and their caches).
#[derive(Clone)]
pub struct Assessor {
    graph: Arc<Graph>,
}

impl Assessor {
    pub fn new(sources: EvidenceSources) -> Self {
        Self::with_stage_timeout(sources, None)
    }

    pub fn with_stage_timeout(sources: EvidenceSources, stage_timeout: Option<Duration>) -> Self {
        Self {
            graph: Arc::new(build_assessment_workflow(&sources, stage_timeout)),
        }
    }

    /// Run the pipeline; every failure ends up in the report's status and message
    pub async fn assess(&self, request: &AssessmentRequest) -> Report {
        let query = request.query();
        let span = info_span!("assessment", drug = %query.name, route = %query.route);

        async {
            let context = Context::new();

            if let Err(e) = context.set(session_keys::QUERY, &query).await {
                context.record_failure(self.graph.id.clone(), e.to_string()).await;
            } else {
                match self.graph.execute(context.clone()).await {
                    Ok(summary) => info!(stages = summary.outcomes.len(), failed = summary.failed().count(), "assessment finished"),
                    Err(e) => {
                        error!(error = %e, "assessment graph aborted");
                        context.record_failure(self.graph.id.clone(), e.to_string()).await;
                    }
                }
            }

            charge_unfinished_evidence(&context, &self.graph.id).await;
            let failures = context.failures().await;
            let report = assemble_report(request, &context, &failures).await;
            info!(status = ?report.status, "report assembled");
            report
        }
        .instrument(span)
        .await
    }
}

/// When the fan-out or the whole run was cut off, every evidence stage that neither
/// stored its output nor recorded a failure of its own is charged with that failure.
async fn charge_unfinished_evidence(context: &Context, graph_id: &str) {
    let failures = context.failures().await;
    let Some(cause) = failures
        .iter()
        .find(|f| f.task_id == EVIDENCE_FAN_OUT || f.task_id == graph_id)
    else {
        return;
    };

    for (stage_id, key) in EVIDENCE_OUTPUTS {
        let settled = context.contains(key) || failures.iter().any(|f| f.task_id == stage_id);
        if !settled {
            warn!(task_id = stage_id, cause = %cause.task_id, "evidence stage did not finish");
            context
                .record_failure(stage_id, format!("did not finish: {}", cause.message))
                .await;
        }
    }
}
