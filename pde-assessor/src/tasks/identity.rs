use std::sync::Arc;

use async_trait::async_trait;
use pde_flow::{Context, GraphError, Result, Task, TaskResult};
use tracing::{debug, info, warn};

use super::types::{StageOutput, session_keys, stage_ids};
use crate::evidence::{EvidenceClient, IdentityError, IdentityLookup};
use crate::merge::{FieldMerge, first_non_empty, missing_identity_fields};
use crate::models::{ChemicalIdentity, DrugQuery};

/// Chemical database first, evidence model for whatever the database left empty
pub struct ChemicalIdentityTask {
    lookup: Arc<dyn IdentityLookup>,
    evidence: Arc<dyn EvidenceClient>,
}

impl ChemicalIdentityTask {
    pub fn new(lookup: Arc<dyn IdentityLookup>, evidence: Arc<dyn EvidenceClient>) -> Self {
        Self { lookup, evidence }
    }

    pub async fn resolve(&self, name: &str) -> StageOutput<ChemicalIdentity> {
        let mut errors = Vec::new();

        let database = match self.lookup.resolve(name).await {
            Ok(identity) => identity,
            Err(IdentityError::NotFound(_)) => {
                info!(drug = %name, "compound not in chemical database");
                ChemicalIdentity::default()
            }
            Err(e) => {
                warn!(drug = %name, error = %e, "chemical database lookup failed");
                errors.push(e.to_string());
                ChemicalIdentity::default()
            }
        };

        let missing = missing_identity_fields(&database);
        let evidence = if missing.is_empty() {
            ChemicalIdentity::default()
        } else {
            debug!(drug = %name, missing = ?missing, "asking evidence model for identity gaps");
            let answer = self.evidence.ask(&identity_prompt(name, &missing)).await;
            if answer.is_success() {
                ChemicalIdentity::from_answer(&answer)
            } else {
                debug!(raw = %answer.raw_response, "identity evidence request failed");
                errors.push(format!("identity evidence unavailable: {}", answer.error_message()));
                ChemicalIdentity::default()
            }
        };

        let fallback = ChemicalIdentity {
            name: Some(name.to_string()),
            ..Default::default()
        };
        let identity = first_non_empty([database, evidence, fallback]);

        if errors.is_empty() {
            StageOutput::ok(identity)
        } else {
            StageOutput::degraded(identity, errors.join("; "))
        }
    }
}

pub fn identity_prompt(name: &str, missing: &[&str]) -> String {
    format!(
        r#"# Task: Find the chemical identifiers of the drug active ingredient {name}

Fields still needed: {missing}

Answer only with this JSON object inside a ```json block, using null for anything you cannot find:

```json
{{
    "drug_name": "Paracetamol",
    "Synonyms": ["Acetaminophen", "APAP"],
    "CAS Number": "103-90-2",
    "Molecular Formula": "C8H9NO2",
    "Molecular Weight": "151.16 g/mol",
    "Smiles": "CC(=O)NC1=CC=C(O)C=C1",
    "InchI Key": "RZVAJINKPMORJF-UHFFFAOYSA-N",
    "IUPAC Name": "N-(4-hydroxyphenyl)acetamide",
    "Description": "Analgesic and antipyretic",
    "ATC Code": "N02BE01",
    "Pharmacotherapeutic Group": "Analgesics and antipyretics",
    "Appearance": "White crystalline powder",
    "Solubility": "Slightly soluble in water (14 mg/mL at 25 C)",
    "reference_links": ["https://pubchem.ncbi.nlm.nih.gov/compound/1983"]
}}
```

The values above illustrate the format only; report {name}.
"#,
        name = name,
        missing = missing.join(", ")
    )
}

#[async_trait]
impl Task for ChemicalIdentityTask {
    fn id(&self) -> &str {
        stage_ids::IDENTITY
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: DrugQuery = context
            .get(session_keys::QUERY)
            .await
            .ok_or_else(|| GraphError::ContextError("Drug query not found in context".to_string()))?;

        info!(drug = %query.name, "Resolving chemical identity");
        let output = self.resolve(&query.name).await;
        let status = format!(
            "identity {:?}, {} fields missing",
            output.value.status,
            output.value.missing_fields().len()
        );
        output.store(&context, session_keys::IDENTITY, status).await
    }
}
