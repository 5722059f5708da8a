use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::factors::Factor;

/// Input to one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugQuery {
    pub name: String,
    pub route: String,
}

impl DrugQuery {
    pub fn new(name: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            route: route.into().trim().to_string(),
        }
    }
}

/// Routes compare case-insensitively and ignore surrounding whitespace
pub fn same_route(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// One assessment request as it arrives from a batch row or the HTTP service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentRequest {
    pub drug_name: String,
    pub route: String,
    #[serde(rename = "APID", default, skip_serializing_if = "Option::is_none")]
    pub apid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id: Option<String>,
}

impl AssessmentRequest {
    pub fn new(drug_name: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            drug_name: drug_name.into(),
            route: route.into(),
            apid: None,
            api_id: None,
        }
    }

    pub fn query(&self) -> DrugQuery {
        DrugQuery::new(self.drug_name.clone(), self.route.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStatus {
    Success,
    Error,
}

/// What an evidence model returned for one question. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAnswer {
    pub fields: Map<String, Value>,
    pub citations: Vec<String>,
    pub raw_response: String,
    pub status: AnswerStatus,
    pub error_detail: Option<String>,
}

impl EvidenceAnswer {
    pub fn success(fields: Map<String, Value>, citations: Vec<String>, raw: impl Into<String>) -> Self {
        Self {
            fields,
            citations,
            raw_response: raw.into(),
            status: AnswerStatus::Success,
            error_detail: None,
        }
    }

    pub fn failure(detail: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            fields: Map::new(),
            citations: Vec::new(),
            raw_response: raw.into(),
            status: AnswerStatus::Error,
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AnswerStatus::Success
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Non-empty text value of a field; numbers are rendered, placeholders are dropped
    pub fn field_text(&self, key: &str) -> Option<String> {
        self.field(key).and_then(value_text)
    }

    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.field(key).and_then(value_f64)
    }

    /// A list field; a lone string is treated as a one-element list
    pub fn field_list(&self, key: &str) -> Vec<String> {
        self.field(key).map(value_list).unwrap_or_default()
    }

    pub fn error_message(&self) -> String {
        self.error_detail
            .clone()
            .unwrap_or_else(|| "evidence request failed".to_string())
    }
}

/// Text content of a JSON value, treating empty strings and "null"/"N/A" as absent
pub fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    match text.to_ascii_lowercase().as_str() {
        "" | "null" | "none" | "n/a" => None,
        _ => Some(text),
    }
}

pub fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

/// Links named in the answer body followed by provider citations, without duplicates
pub fn reference_links(answer: &EvidenceAnswer) -> Vec<String> {
    let mut links = answer.field_list("reference_links");
    for citation in &answer.citations {
        if !links.contains(citation) {
            links.push(citation.clone());
        }
    }
    links
}

pub fn value_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_text).collect(),
        other => value_text(other).into_iter().collect(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    Complete,
    Partial,
    #[default]
    NotFound,
}

/// Chemical identifiers for a drug ingredient
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChemicalIdentity {
    #[serde(rename = "drug_name")]
    pub name: Option<String>,
    #[serde(rename = "Synonyms", default)]
    pub synonyms: Vec<String>,
    #[serde(rename = "CAS Number")]
    pub cas_number: Option<String>,
    #[serde(rename = "Molecular Formula")]
    pub molecular_formula: Option<String>,
    #[serde(rename = "Molecular Weight")]
    pub molecular_weight: Option<String>,
    #[serde(rename = "Smiles")]
    pub smiles: Option<String>,
    #[serde(rename = "InchI Key")]
    pub inchi_key: Option<String>,
    #[serde(rename = "IUPAC Name")]
    pub iupac_name: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
    #[serde(rename = "ATC Code")]
    pub atc_code: Option<String>,
    #[serde(rename = "Pharmacotherapeutic Group")]
    pub pharmacotherapeutic_group: Option<String>,
    #[serde(rename = "Appearance")]
    pub appearance: Option<String>,
    #[serde(rename = "Solubility")]
    pub solubility: Option<String>,
    #[serde(default)]
    pub reference_links: Vec<String>,
    #[serde(default)]
    pub status: IdentityStatus,
}

impl ChemicalIdentity {
    /// Read an identity out of an evidence answer using the report's field names
    pub fn from_answer(answer: &EvidenceAnswer) -> Self {
        Self {
            name: answer.field_text("drug_name"),
            synonyms: answer.field_list("Synonyms"),
            cas_number: answer.field_text("CAS Number"),
            molecular_formula: answer.field_text("Molecular Formula"),
            molecular_weight: answer.field_text("Molecular Weight"),
            smiles: answer.field_text("Smiles"),
            inchi_key: answer.field_text("InchI Key"),
            iupac_name: answer.field_text("IUPAC Name"),
            description: answer.field_text("Description"),
            atc_code: answer.field_text("ATC Code"),
            pharmacotherapeutic_group: answer.field_text("Pharmacotherapeutic Group"),
            appearance: answer.field_text("Appearance"),
            solubility: answer.field_text("Solubility"),
            reference_links: reference_links(answer),
            status: IdentityStatus::NotFound,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pharmacokinetics {
    #[serde(rename = "Absorption")]
    pub absorption: Option<String>,
    #[serde(rename = "Distribution")]
    pub distribution: Option<String>,
    #[serde(rename = "Metabolism")]
    pub metabolism: Option<String>,
    #[serde(rename = "Excretion")]
    pub excretion: Option<String>,
}

/// Pharmacokinetic and mechanism text for a drug
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pharmacology {
    #[serde(rename = "Pharmacokinetics", default)]
    pub pharmacokinetics: Pharmacokinetics,
    #[serde(rename = "Indication")]
    pub indication: Option<String>,
    #[serde(rename = "Pharmacodynamics")]
    pub pharmacodynamics: Option<String>,
    #[serde(rename = "Mechanism of Action")]
    pub mechanism_of_action: Option<String>,
    #[serde(default)]
    pub reference_links: Vec<String>,
}

impl Pharmacology {
    pub fn from_answer(answer: &EvidenceAnswer) -> Self {
        let pk = answer.field("Pharmacokinetics");
        let pk_text = |key: &str| pk.and_then(|v| v.get(key)).and_then(value_text);

        Self {
            pharmacokinetics: Pharmacokinetics {
                absorption: pk_text("Absorption"),
                distribution: pk_text("Distribution"),
                metabolism: pk_text("Metabolism"),
                excretion: pk_text("Excretion"),
            },
            indication: answer.field_text("Indication"),
            pharmacodynamics: answer.field_text("Pharmacodynamics"),
            mechanism_of_action: answer.field_text("Mechanism of Action"),
            reference_links: reference_links(answer),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indication.is_none()
            && self.pharmacodynamics.is_none()
            && self.mechanism_of_action.is_none()
            && self.pharmacokinetics == Pharmacokinetics::default()
    }
}

/// Structured dosing metadata extracted next to the clinical dossier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DosageDetail {
    pub frequency: Option<String>,
    pub amount_per_use: Option<String>,
    #[serde(default)]
    pub percentages: Vec<String>,
    #[serde(default)]
    pub formulations: Vec<String>,
    pub strength: Option<String>,
    pub min_daily_dose: Option<String>,
}

impl DosageDetail {
    /// Lenient read: models return numbers, strings or lists for the same field
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let text = |key: &str| object.get(key).and_then(value_text);
        let list = |key: &str| object.get(key).map(value_list).unwrap_or_default();
        Some(Self {
            frequency: text("frequency"),
            amount_per_use: text("amount_per_use"),
            percentages: list("percentages"),
            formulations: list("formulations"),
            strength: text("strength"),
            min_daily_dose: text("min_daily_dose"),
        })
    }
}

/// Route-specific clinical evidence.
///
/// Route, markdown sections and dosage detail are either all present (evidence was
/// found for the requested route or a substitute) or all absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalDossier {
    #[serde(rename = "Clinical")]
    clinical: Option<String>,
    route: Option<String>,
    dosage_detail: Option<DosageDetail>,
    #[serde(default)]
    reference_links: Vec<String>,
}

impl ClinicalDossier {
    /// No clinical evidence for the requested route
    pub fn not_found(reference_links: Vec<String>) -> Self {
        Self {
            clinical: None,
            route: None,
            dosage_detail: None,
            reference_links,
        }
    }

    pub fn found(
        route: impl Into<String>,
        sections: &crate::tasks::clinical::ClinicalSections,
        dosage_detail: DosageDetail,
        reference_links: Vec<String>,
    ) -> Self {
        Self {
            clinical: Some(sections.to_markdown()),
            route: Some(route.into()),
            dosage_detail: Some(dosage_detail),
            reference_links,
        }
    }

    pub fn clinical_text(&self) -> Option<&str> {
        self.clinical.as_deref()
    }

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn dosage_detail(&self) -> Option<&DosageDetail> {
        self.dosage_detail.as_ref()
    }

    pub fn reference_links(&self) -> &[String] {
        &self.reference_links
    }

    pub fn has_evidence(&self) -> bool {
        self.clinical.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToxicityType {
    Genotoxicant,
    Carcinogen,
    #[serde(rename = "Reproductive/Developmental Toxicant")]
    ReproductiveDevelopmental,
    #[serde(rename = "Highly Sensitizing Potential")]
    HighlySensitizing,
}

impl ToxicityType {
    pub const ALL: [ToxicityType; 4] = [
        ToxicityType::Genotoxicant,
        ToxicityType::Carcinogen,
        ToxicityType::ReproductiveDevelopmental,
        ToxicityType::HighlySensitizing,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ToxicityType::Genotoxicant => "Genotoxicant",
            ToxicityType::Carcinogen => "Carcinogen",
            ToxicityType::ReproductiveDevelopmental => "Reproductive/Developmental Toxicant",
            ToxicityType::HighlySensitizing => "Highly Sensitizing Potential",
        }
    }
}

impl fmt::Display for ToxicityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Verdict {
    /// Lenient read of a model's verdict; anything unrecognised is Unknown
    pub fn parse(text: &str) -> Self {
        let lowered = text.trim().trim_matches(|c: char| c == '"' || c == '.').to_ascii_lowercase();
        match lowered.as_str() {
            "yes" | "y" | "true" | "positive" => Verdict::Yes,
            "no" | "n" | "false" | "negative" => Verdict::No,
            _ => Verdict::Unknown,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Verdict::Yes => "Yes",
            Verdict::No => "No",
            Verdict::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// One toxicity-category verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardRecord {
    #[serde(rename = "param1")]
    pub toxicity_type: ToxicityType,
    #[serde(rename = "param2")]
    pub verdict: Verdict,
    #[serde(rename = "param3")]
    pub detail: String,
    #[serde(default)]
    pub reference_links: Vec<String>,
}

impl HazardRecord {
    pub fn unknown(toxicity_type: ToxicityType, detail: impl Into<String>) -> Self {
        Self {
            toxicity_type,
            verdict: Verdict::Unknown,
            detail: detail.into(),
            reference_links: Vec::new(),
        }
    }
}

/// Minimum daily therapeutic dose. A null value is a valid terminal answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoDRecord {
    #[serde(rename = "PoD_value")]
    pub value: Option<f64>,
    #[serde(rename = "PoD_unit")]
    pub unit: Option<String>,
    pub point_of_departure: String,
    #[serde(rename = "point_of_departure_detail")]
    pub narrative: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl PoDRecord {
    pub const UNIT: &'static str = "mg/day";

    pub fn determined(value: f64, narrative: impl Into<String>, assumptions: Vec<String>) -> Self {
        Self {
            value: Some(value),
            unit: Some(Self::UNIT.to_string()),
            point_of_departure: format!("{} {}", value, Self::UNIT),
            narrative: narrative.into(),
            assumptions,
        }
    }

    pub fn undetermined(narrative: impl Into<String>, assumptions: Vec<String>) -> Self {
        Self {
            value: None,
            unit: None,
            point_of_departure: String::new(),
            narrative: narrative.into(),
            assumptions,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Success,
    PartialSuccess,
    Error,
}

/// The interchange record for one drug + route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "APID", default, skip_serializing_if = "Option::is_none")]
    pub apid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id: Option<String>,
    pub drug_name: String,
    pub route: String,
    pub chemical_info: ChemicalIdentity,
    pub pharmacokinetics: Pharmacology,
    pub clinical_info: ClinicalDossier,
    pub hazard_info: Vec<HazardRecord>,
    #[serde(rename = "PoD_info")]
    pub pod_info: PoDRecord,
    pub factors: Vec<Factor>,
    pub status: ReportStatus,
    pub message: String,
}
