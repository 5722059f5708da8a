pub mod batch;
pub mod config;
pub mod evidence;
pub mod factors;
pub mod merge;
pub mod models;
pub mod report;
pub mod service;
pub mod tasks;
pub mod workflow;

pub use config::AssessorConfig;
pub use models::{AssessmentRequest, Report, ReportStatus};
pub use workflow::{Assessor, EvidenceSources, build_assessment_workflow};
