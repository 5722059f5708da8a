pub mod alpha;
pub mod clinical;
pub mod factors;
pub mod hazards;
pub mod identity;
pub mod pharmacology;
pub mod pod;
pub mod types;

pub use alpha::AlphaCorrectionTask;
pub use clinical::{ClinicalDossierTask, ClinicalSections, DossierContractError};
pub use factors::FactorEngineTask;
pub use hazards::HazardSurveyTask;
pub use identity::ChemicalIdentityTask;
pub use pharmacology::PharmacologyTask;
pub use pod::PointOfDepartureTask;
pub use types::{StageOutput, session_keys, stage_ids};
