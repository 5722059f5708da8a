//! Assembly of the interchange [`Report`] from a finished (or failed) graph run.

use std::collections::HashSet;

use pde_flow::{Context, StageFailure};

use crate::factors::{Factor, FactorSet};
use crate::models::{
    AssessmentRequest, ChemicalIdentity, ClinicalDossier, HazardRecord, Pharmacology, PoDRecord, Report, ReportStatus,
    ToxicityType,
};
use crate::tasks::{session_keys, stage_ids};

/// Read every stage output from the context, substituting each stage's empty state
/// for anything a failed stage never stored.
pub async fn assemble_report(request: &AssessmentRequest, context: &Context, failures: &[StageFailure]) -> Report {
    let query = request.query();

    let chemical_info: ChemicalIdentity = context.get(session_keys::IDENTITY).await.unwrap_or_else(|| ChemicalIdentity {
        name: Some(query.name.clone()),
        ..Default::default()
    });
    let pharmacokinetics: Pharmacology = context.get(session_keys::PHARMACOLOGY).await.unwrap_or_default();
    let clinical_info: ClinicalDossier = context.get(session_keys::CLINICAL).await.unwrap_or_default();
    let hazards: Vec<HazardRecord> = context.get(session_keys::HAZARDS).await.unwrap_or_default();
    let pod_info: PoDRecord = context
        .get(session_keys::POD)
        .await
        .unwrap_or_else(|| PoDRecord::undetermined("The point of departure was not computed for this run.", Vec::new()));
    let factors: FactorSet = context
        .get::<Vec<Factor>>(session_keys::FACTORS)
        .await
        .unwrap_or_default()
        .into_iter()
        .collect();

    let (status, message) = summarize(failures);

    Report {
        apid: request.apid.clone(),
        api_id: request.api_id.clone(),
        drug_name: query.name,
        route: query.route,
        chemical_info,
        pharmacokinetics,
        clinical_info,
        hazard_info: complete_hazards(hazards),
        pod_info,
        factors: factors.into_ordered(),
        status,
        message,
    }
}

/// One record per toxicity type in fixed order; types nobody answered are Unknown
pub fn complete_hazards(records: Vec<HazardRecord>) -> Vec<HazardRecord> {
    ToxicityType::ALL
        .iter()
        .map(|toxicity_type| {
            records
                .iter()
                .find(|r| r.toxicity_type == *toxicity_type)
                .cloned()
                .unwrap_or_else(|| HazardRecord::unknown(*toxicity_type, "The hazard survey did not complete."))
        })
        .collect()
}

/// Success without failures, error when every evidence stage failed, partial otherwise
pub fn summarize(failures: &[StageFailure]) -> (ReportStatus, String) {
    if failures.is_empty() {
        return (ReportStatus::Success, String::new());
    }

    let failed: HashSet<&str> = failures.iter().map(|f| f.task_id.as_str()).collect();
    let status = if stage_ids::EVIDENCE_STAGES.iter().all(|id| failed.contains(id)) {
        ReportStatus::Error
    } else {
        ReportStatus::PartialSuccess
    };

    let message = failures
        .iter()
        .map(|f| format!("{}: {}", f.task_id, f.message))
        .collect::<Vec<_>>()
        .join("; ");
    (status, message)
}
