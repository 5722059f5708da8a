#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pde_assessor::EvidenceSources;
use pde_assessor::evidence::{EvidenceClient, IdentityError, IdentityLookup};
use pde_assessor::models::{ChemicalIdentity, EvidenceAnswer};
use serde_json::{Value, json};

pub const ABACAVIR_MARKDOWN: &str = "### Clinical Therapeutic Doses\n\n| Species | Treatment | Route | Dosage |\n|---------|-----------|--------|---------|\n| Adults | HIV-1 infection | Oral | 600 mg once daily or 300 mg twice daily |\n\n<br>\n\n### Adverse Effects\n\nNausea, vomiting, fever and fatigue.\n\n<br>\n\n### Warning\n\nUse with caution in patients with cardiovascular disease.\n\n<br>\n\n### Box warning\n\n**Black Box Warning:**\n\nSerious and sometimes fatal hypersensitivity reactions have occurred with abacavir.\n\n<br>\n\n### Clinical Critical Effects\n\nThe critical or lead effects of abacavir in clinical data were the treatment of HIV-1 infection[1][3].";

pub fn answer(fields: Value) -> EvidenceAnswer {
    let fields = fields.as_object().cloned().unwrap_or_default();
    EvidenceAnswer::success(fields, vec!["https://dailymed.nlm.nih.gov".to_string()], "{}")
}

/// Answers the first rule whose needle appears in the prompt; unmatched prompts fail
pub struct ScriptedClient {
    rules: Vec<(String, EvidenceAnswer)>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, needle: &str, answer: EvidenceAnswer) -> Self {
        self.rules.push((needle.to_string(), answer));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceClient for ScriptedClient {
    async fn ask(&self, prompt: &str) -> EvidenceAnswer {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| EvidenceAnswer::failure("HTTP 503: service unavailable", ""))
    }
}

pub enum FakeDatabase {
    Found(ChemicalIdentity),
    Down,
}

#[async_trait]
impl IdentityLookup for FakeDatabase {
    async fn resolve(&self, name: &str) -> Result<ChemicalIdentity, IdentityError> {
        match self {
            FakeDatabase::Found(identity) => Ok(identity.clone()),
            FakeDatabase::Down => Err(IdentityError::Transport(format!("connection refused looking up {}", name))),
        }
    }
}

pub fn abacavir_identity() -> ChemicalIdentity {
    ChemicalIdentity {
        name: Some("Abacavir".into()),
        synonyms: vec!["ABC".into(), "Ziagen".into()],
        cas_number: Some("136470-78-5".into()),
        molecular_formula: Some("C14H18N6O".into()),
        molecular_weight: Some("286.33".into()),
        smiles: Some("C1CC1NC2=C3C(=NC(=N2)N)N(C=N3)C4CC(C=C4)CO".into()),
        inchi_key: Some("MCGSCOLBFJQGHM-SCZZXKLOSA-N".into()),
        iupac_name: Some("[(1S,4R)-4-[2-amino-6-(cyclopropylamino)purin-9-yl]cyclopent-2-en-1-yl]methanol".into()),
        description: Some("A nucleoside reverse transcriptase inhibitor.".into()),
        atc_code: Some("J05AF06".into()),
        pharmacotherapeutic_group: Some("Antivirals for systemic use".into()),
        appearance: Some("White to off-white solid".into()),
        solubility: Some("77 mg/mL in water".into()),
        ..Default::default()
    }
}

fn hazard(result: &str, detail: &str) -> EvidenceAnswer {
    answer(json!({
        "content": detail,
        "sources": [{"level": 1, "verdict": result}],
        "result": result,
        "result_detail": detail,
        "reference_links": ["https://go.drugbank.com/drugs/DB01048"]
    }))
}

/// Search model answering every evidence question about abacavir; `route` is what the
/// clinical evidence reports covering
pub fn abacavir_search(route: &str) -> ScriptedClient {
    ScriptedClient::new()
        .on(
            "# Task: Search the",
            answer(json!({
                "drug_name": "Abacavir",
                "Pharmacokinetics": {
                    "Absorption": "Rapidly absorbed, oral bioavailability 83%.",
                    "Distribution": "Vd 0.86 L/kg.",
                    "Metabolism": "Alcohol dehydrogenase and glucuronyl transferase.",
                    "Excretion": "Mostly urine as metabolites."
                },
                "Indication": "HIV-1 infection in combination therapy.",
                "Pharmacodynamics": "Inhibits HIV-1 reverse transcriptase.",
                "Mechanism of Action": "Carbovir triphosphate terminates viral DNA chains."
            })),
        )
        .on(
            "# Task: Find the prescribing information",
            answer(json!({
                "ingredients": ["Abacavir"],
                "route": route,
                "result": ABACAVIR_MARKDOWN,
                "dosage_detail": {
                    "frequency": "once or twice daily",
                    "amount_per_use": "300 mg",
                    "formulations": ["tablet", "oral solution"],
                    "min_daily_dose": "600 mg"
                }
            })),
        )
        .on("is a Genotoxicant", hazard("No", "Negative in Ames and micronucleus assays."))
        .on("is a Carcinogen", hazard("No", "No carcinogenicity signal in human use."))
        .on(
            "is a Reproductive/Developmental Toxicant",
            hazard("No", "No increase in birth defects in the pregnancy registry."),
        )
        .on(
            "is a Highly Sensitizing Potential",
            hazard("Yes", "HLA-B*5701 associated hypersensitivity reactions."),
        )
}

/// Reasoning model answering the PoD and bioavailability questions
pub fn abacavir_reasoning() -> ScriptedClient {
    ScriptedClient::new()
        .on(
            "Content Start",
            answer(json!({
                "PoD": 600,
                "PoD_unit": "mg/day",
                "PoD_calculate_detail": "The lowest adult dose is 300 mg twice daily, 300 mg × 2 = 600 mg/day, a therapeutic dose treated as a NOAEL.",
                "assumptions_made": []
            })),
        )
        .on(
            "Estimate the absolute bioavailability",
            answer(json!({
                "source_bioavailability": "83%",
                "target_bioavailability": "100%",
                "rationale": "Oral bioavailability is reported as 83%; intravenous is complete."
            })),
        )
}

pub fn sources(search: Arc<dyn EvidenceClient>, reasoning: Arc<dyn EvidenceClient>, database: FakeDatabase) -> EvidenceSources {
    EvidenceSources {
        search,
        reasoning,
        identity: Arc::new(database),
    }
}
