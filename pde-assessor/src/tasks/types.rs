use pde_flow::{Context, GraphError, NextAction, Result, TaskResult};
use serde::Serialize;

/// Context keys shared by the assessment stages
pub mod session_keys {
    pub const QUERY: &str = "query";
    pub const IDENTITY: &str = "chemical_identity";
    pub const PHARMACOLOGY: &str = "pharmacology";
    pub const CLINICAL: &str = "clinical_dossier";
    pub const HAZARDS: &str = "hazard_records";
    pub const POD: &str = "pod_record";
    pub const FACTORS: &str = "factors";
}

/// Stage (task) ids, also used in failure messages
pub mod stage_ids {
    pub const IDENTITY: &str = "chemical_identity";
    pub const PHARMACOLOGY: &str = "pharmacology";
    pub const CLINICAL: &str = "clinical_dossier";
    pub const HAZARDS: &str = "hazard_survey";
    pub const POD: &str = "point_of_departure";
    pub const FACTORS: &str = "factor_engine";
    pub const ALPHA: &str = "alpha_correction";

    /// Stages that gather evidence; a run where all of them failed is an error
    pub const EVIDENCE_STAGES: [&str; 4] = [IDENTITY, PHARMACOLOGY, CLINICAL, HAZARDS];
}

/// A stage's output together with whether it had to degrade because of an error.
///
/// Degraded output is still stored so downstream stages see the stage's
/// insufficient-data state rather than a missing key.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput<T> {
    pub value: T,
    pub failure: Option<String>,
}

impl<T: Serialize> StageOutput<T> {
    pub fn ok(value: T) -> Self {
        Self { value, failure: None }
    }

    pub fn degraded(value: T, failure: impl Into<String>) -> Self {
        Self {
            value,
            failure: Some(failure.into()),
        }
    }

    /// Store the value under `key`, then report the failure (if any) to the graph
    pub async fn store(self, context: &Context, key: &str, status: impl Into<String>) -> Result<TaskResult> {
        context.set(key, self.value).await?;
        match self.failure {
            Some(message) => Err(GraphError::TaskExecutionFailed(message)),
            None => Ok(TaskResult::new_with_status(NextAction::Continue, status)),
        }
    }
}
