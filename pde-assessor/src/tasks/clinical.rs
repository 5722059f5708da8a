use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use pde_flow::{Context, GraphError, Result, Task, TaskResult};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{StageOutput, session_keys, stage_ids};
use crate::evidence::{EvidenceClient, unescape_markdown};
use crate::models::{ClinicalDossier, DosageDetail, DrugQuery, EvidenceAnswer, reference_links, same_route};

pub const SECTION_TITLES: [&str; 5] = [
    "Clinical Therapeutic Doses",
    "Adverse Effects",
    "Warning",
    "Box warning",
    "Clinical Critical Effects",
];

const TABLE_COLUMNS: [&str; 4] = ["species", "treatment", "route", "dosage"];
const BOX_WARNING_PREFIX: &str = "Black Box Warning:";
const SEPARATOR: &str = "<br>";

static CRITICAL_EFFECTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^The critical or lead effects of .+? in clinical data were (?:the )?treatment of .+?\.")
        .expect("critical effects pattern is valid")
});

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?\s*([A-Za-z][A-Za-z0-9]*)\b[^>]*>").expect("html tag pattern is valid")
});

/// Ways a clinical markdown document can break the five-section contract
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DossierContractError {
    #[error("expected 5 sections separated by <br>, found {0}")]
    SectionCount(usize),

    #[error("section {position} should be titled '### {expected}', found '{found}'")]
    SectionOrder {
        position: usize,
        expected: &'static str,
        found: String,
    },

    #[error("section '{0}' is empty")]
    EmptySection(&'static str),

    #[error("Clinical Therapeutic Doses must be a markdown table with columns Species | Treatment | Route | Dosage")]
    DoseTable,

    #[error("Box warning must start with \"Black Box Warning:\"")]
    BoxWarningPrefix,

    #[error("Clinical Critical Effects does not follow the required sentence")]
    CriticalEffectsTemplate,

    #[error("HTML tag <{0}> is not allowed")]
    ForbiddenHtml(String),
}

/// The five validated sections of a clinical dossier, bodies without their titles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicalSections {
    pub therapeutic_doses_table: String,
    pub adverse_effects: String,
    pub warning: String,
    pub box_warning: String,
    pub critical_effects: String,
}

impl ClinicalSections {
    /// Validate model markdown against the section contract.
    ///
    /// Literal `\n` escapes are normalised first; everything else must already match.
    pub fn parse(markdown: &str) -> std::result::Result<Self, DossierContractError> {
        let text = unescape_markdown(markdown);

        if let Some(tag) = HTML_TAG
            .captures_iter(&text)
            .map(|c| c[1].to_ascii_lowercase())
            .find(|tag| tag != "br")
        {
            return Err(DossierContractError::ForbiddenHtml(tag));
        }

        let parts: Vec<&str> = text.split(SEPARATOR).map(str::trim).collect();
        if parts.len() != SECTION_TITLES.len() {
            return Err(DossierContractError::SectionCount(parts.len()));
        }

        let mut bodies = Vec::with_capacity(SECTION_TITLES.len());
        for (position, (part, expected)) in parts.iter().copied().zip(SECTION_TITLES).enumerate() {
            let (title_line, body) = part.split_once('\n').unwrap_or((part, ""));
            let title = title_line.trim().trim_start_matches('#').trim();
            if !title_line.trim_start().starts_with("###") || !title.eq_ignore_ascii_case(expected) {
                return Err(DossierContractError::SectionOrder {
                    position: position + 1,
                    expected,
                    found: title_line.trim().to_string(),
                });
            }
            let body = body.trim();
            if body.is_empty() {
                return Err(DossierContractError::EmptySection(expected));
            }
            bodies.push(body.to_string());
        }

        let [table, adverse, warning, box_warning, critical]: [String; 5] = bodies
            .try_into()
            .map_err(|v: Vec<String>| DossierContractError::SectionCount(v.len()))?;

        if !is_dose_table(&table) {
            return Err(DossierContractError::DoseTable);
        }
        if !box_warning.trim_start_matches('*').trim_start().starts_with(BOX_WARNING_PREFIX) {
            return Err(DossierContractError::BoxWarningPrefix);
        }
        if !CRITICAL_EFFECTS.is_match(critical.trim_start_matches('*').trim_start()) {
            return Err(DossierContractError::CriticalEffectsTemplate);
        }

        Ok(Self {
            therapeutic_doses_table: table,
            adverse_effects: adverse,
            warning,
            box_warning,
            critical_effects: critical,
        })
    }

    /// Canonical markdown; parsing the output yields the same sections
    pub fn to_markdown(&self) -> String {
        let bodies = [
            &self.therapeutic_doses_table,
            &self.adverse_effects,
            &self.warning,
            &self.box_warning,
            &self.critical_effects,
        ];
        SECTION_TITLES
            .iter()
            .zip(bodies)
            .map(|(title, body)| format!("### {}\n\n{}", title, body))
            .collect::<Vec<_>>()
            .join(&format!("\n\n{}\n\n", SEPARATOR))
    }
}

fn table_cells(line: &str) -> Vec<String> {
    line.trim()
        .trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_ascii_lowercase())
        .collect()
}

/// Header with the four required columns, a separator row and at least one data row
fn is_dose_table(body: &str) -> bool {
    let rows: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('|'))
        .collect();
    if rows.len() < 3 {
        return false;
    }

    let separator_ok = table_cells(rows[1])
        .iter()
        .all(|cell| !cell.is_empty() && cell.chars().all(|c| c == '-' || c == ':'));

    table_cells(rows[0]) == TABLE_COLUMNS && separator_ok && rows[2..].iter().all(|row| table_cells(row).len() == 4)
}

/// Searches route-specific clinical evidence and validates it into a [`ClinicalDossier`]
pub struct ClinicalDossierTask {
    evidence: Arc<dyn EvidenceClient>,
}

impl ClinicalDossierTask {
    pub fn new(evidence: Arc<dyn EvidenceClient>) -> Self {
        Self { evidence }
    }

    pub async fn build(&self, query: &DrugQuery) -> StageOutput<ClinicalDossier> {
        let answer = self.evidence.ask(&clinical_prompt(query)).await;
        dossier_from_answer(query, &answer)
    }
}

/// Turn the evidence answer into a dossier; violations of the contract count as no evidence
pub fn dossier_from_answer(query: &DrugQuery, answer: &EvidenceAnswer) -> StageOutput<ClinicalDossier> {
    let links = reference_links(answer);

    if !answer.is_success() {
        debug!(raw = %answer.raw_response, "clinical evidence request failed");
        return StageOutput::degraded(
            ClinicalDossier::not_found(links),
            format!("clinical evidence unavailable: {}", answer.error_message()),
        );
    }

    let (Some(route), Some(result)) = (answer.field_text("route"), answer.field_text("result")) else {
        info!(drug = %query.name, route = %query.route, "no clinical evidence found");
        return StageOutput::ok(ClinicalDossier::not_found(links));
    };

    let sections = match ClinicalSections::parse(&result) {
        Ok(sections) => sections,
        Err(e) => {
            warn!(drug = %query.name, error = %e, "clinical markdown rejected");
            debug!(raw = %answer.raw_response, "rejected clinical response");
            return StageOutput::degraded(
                ClinicalDossier::not_found(links),
                format!("clinical dossier violates the section contract: {}", e),
            );
        }
    };

    let dosage = answer
        .field("dosage_detail")
        .and_then(DosageDetail::from_value)
        .unwrap_or_default();

    if !same_route(&route, &query.route) {
        info!(requested = %query.route, resolved = %route, "clinical evidence found for a substitute route");
    }
    StageOutput::ok(ClinicalDossier::found(route, &sections, dosage, links))
}

pub fn clinical_prompt(query: &DrugQuery) -> String {
    format!(
        r####"# Task: Find the prescribing information for {drug} given by the {route} route

Prefer sources in this order:
1. Official package inserts and prescribing information
2. Regulatory documents (DailyMed, FDA, EMA, NMPA, PMDA, EMC, DPD, MIMS)
3. Summary of Product Characteristics
4. Official drug monographs
5. Professional pharmaceutical databases
6. Other sources

Answer only with this JSON object inside a ```json block:

```json
{{
    "ingredients": ["every active ingredient of the product"],
    "route": "route the evidence below actually covers",
    "result": "### Clinical Therapeutic Doses\n\n| Species | Treatment | Route | Dosage |\n|---------|-----------|-------|--------|\n| ... | ... | ... | ... |\n\n<br>\n\n### Adverse Effects\n\n[one paragraph]\n\n<br>\n\n### Warning\n\n[one paragraph]\n\n<br>\n\n### Box warning\n\n**Black Box Warning:**\n\n[one paragraph, or None]\n\n<br>\n\n### Clinical Critical Effects\n\nThe critical or lead effects of [drug name] in clinical data were treatment of [disease].",
    "dosage_detail": {{
        "frequency": "applications per day, e.g. 'twice daily'",
        "amount_per_use": "quantity per application",
        "percentages": ["active ingredient concentration, e.g. '0.05%'"],
        "formulations": ["available formulations"],
        "strength": "potency if available",
        "min_daily_dose": "minimum recommended daily dose if stated"
    }},
    "reference_links": ["sources used"]
}}
```

Rules:
- If nothing is documented for the {route} route but another route is, describe that route and name it in "route".
- If nothing is documented for any route, set "route", "result" and "dosage_detail" to null.
- "result" has exactly five sections in the order shown, each titled with ###, separated by <br>.
- Clinical Therapeutic Doses is a markdown table with the four columns shown.
- Box warning starts with "Black Box Warning:".
- Clinical Critical Effects uses the sentence shown.
- No HTML tags other than <br>.
"####,
        drug = query.name,
        route = query.route
    )
}

#[async_trait]
impl Task for ClinicalDossierTask {
    fn id(&self) -> &str {
        stage_ids::CLINICAL
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let query: DrugQuery = context
            .get(session_keys::QUERY)
            .await
            .ok_or_else(|| GraphError::ContextError("Drug query not found in context".to_string()))?;

        info!(drug = %query.name, route = %query.route, "Building clinical dossier");
        let output = self.build(&query).await;
        let status = match output.value.route() {
            Some(route) => format!("clinical evidence found for route {}", route),
            None => "no clinical evidence found".to_string(),
        };
        output.store(&context, session_keys::CLINICAL, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) const ABACAVIR_MARKDOWN: &str = "### Clinical Therapeutic Doses\n\n| Species | Treatment | Route | Dosage |\n|---------|-----------|--------|---------|\n| Adults | HIV-1 infection | Oral | 600 mg once daily or 300 mg twice daily |\n\n<br>\n\n### Adverse Effects\n\nNausea, vomiting, fever and fatigue.\n\n<br>\n\n### Warning\n\nUse with caution in patients with cardiovascular disease.\n\n<br>\n\n### Box warning\n\n**Black Box Warning:**\n\nSerious and sometimes fatal hypersensitivity reactions have occurred with abacavir.\n\n<br>\n\n### Clinical Critical Effects\n\nThe critical or lead effects of abacavir in clinical data were the treatment of HIV-1 infection[1][3].";

    fn answer(fields: serde_json::Value) -> EvidenceAnswer {
        EvidenceAnswer::success(fields.as_object().unwrap().clone(), vec!["https://dailymed.nlm.nih.gov".into()], "{}")
    }

    #[test]
    fn parses_the_five_sections() {
        let sections = ClinicalSections::parse(ABACAVIR_MARKDOWN).unwrap();
        assert!(sections.therapeutic_doses_table.starts_with("| Species"));
        assert!(sections.box_warning.contains("hypersensitivity"));
        assert!(sections.critical_effects.contains("HIV-1 infection"));
    }

    #[test]
    fn canonical_markdown_parses_back() {
        let sections = ClinicalSections::parse(ABACAVIR_MARKDOWN).unwrap();
        assert_eq!(ClinicalSections::parse(&sections.to_markdown()).unwrap(), sections);
    }

    #[test]
    fn escaped_newlines_are_accepted() {
        let escaped = ABACAVIR_MARKDOWN.replace('\n', "\\n");
        assert!(ClinicalSections::parse(&escaped).is_ok());
    }

    #[test]
    fn contract_violations_are_reported() {
        let four = ABACAVIR_MARKDOWN.replacen("<br>", "", 1);
        assert_eq!(ClinicalSections::parse(&four), Err(DossierContractError::SectionCount(4)));

        let html = ABACAVIR_MARKDOWN.replace("Nausea", "<b>Nausea</b>");
        assert_eq!(ClinicalSections::parse(&html), Err(DossierContractError::ForbiddenHtml("b".into())));

        let no_prefix = ABACAVIR_MARKDOWN.replace("**Black Box Warning:**", "Warning:");
        assert_eq!(ClinicalSections::parse(&no_prefix), Err(DossierContractError::BoxWarningPrefix));

        let free_text = ABACAVIR_MARKDOWN.replace("The critical or lead effects of", "Effects of");
        assert_eq!(
            ClinicalSections::parse(&free_text),
            Err(DossierContractError::CriticalEffectsTemplate)
        );

        let three_columns = ABACAVIR_MARKDOWN.replace("| Species | Treatment | Route | Dosage |", "| Species | Route | Dosage |");
        assert_eq!(ClinicalSections::parse(&three_columns), Err(DossierContractError::DoseTable));
    }

    #[test]
    fn swapped_sections_fail_on_order() {
        let swapped = ABACAVIR_MARKDOWN
            .replace("### Adverse Effects", "### TMP")
            .replace("### Warning", "### Adverse Effects")
            .replace("### TMP", "### Warning");
        assert!(matches!(
            ClinicalSections::parse(&swapped),
            Err(DossierContractError::SectionOrder { position: 2, .. })
        ));
    }

    #[test]
    fn dossier_fields_are_jointly_populated() {
        let query = DrugQuery::new("Abacavir", "Oral");
        let output = dossier_from_answer(
            &query,
            &answer(json!({
                "route": "Oral",
                "result": ABACAVIR_MARKDOWN,
                "dosage_detail": {"frequency": "twice daily", "min_daily_dose": "600 mg"}
            })),
        );
        assert_eq!(output.failure, None);
        assert_eq!(output.value.route(), Some("Oral"));
        assert!(output.value.clinical_text().is_some());
        assert_eq!(output.value.dosage_detail().unwrap().min_daily_dose.as_deref(), Some("600 mg"));
    }

    #[test]
    fn null_route_is_no_evidence_not_failure() {
        let query = DrugQuery::new("Abacavir", "Ophthalmic");
        let output = dossier_from_answer(&query, &answer(json!({"route": null, "result": null, "dosage_detail": null})));
        assert_eq!(output.failure, None);
        assert!(!output.value.has_evidence());
        assert_eq!(output.value.route(), None);
        assert_eq!(output.value.dosage_detail(), None);
    }

    #[test]
    fn broken_markdown_degrades_with_failure() {
        let query = DrugQuery::new("Abacavir", "Oral");
        let output = dossier_from_answer(&query, &answer(json!({"route": "Oral", "result": "Take 300 mg twice daily."})));
        assert!(output.failure.unwrap().contains("section contract"));
        assert!(!output.value.has_evidence());
    }

    #[test]
    fn prompt_carries_the_section_template() {
        let prompt = clinical_prompt(&DrugQuery::new("Abacavir", "Oral"));
        assert!(prompt.starts_with("# Task: Find the prescribing information for Abacavir given by the Oral route"));
        assert!(prompt.contains(r####""result": "### Clinical Therapeutic Doses\n\n| Species | Treatment | Route | Dosage |"####));
        assert!(prompt.contains(r#""dosage_detail": {"#));
        assert!(prompt.contains("**Black Box Warning:**"));
        assert!(prompt.trim_end().ends_with("No HTML tags other than <br>."));
    }

    #[test]
    fn provider_error_degrades_with_failure() {
        let query = DrugQuery::new("Abacavir", "Oral");
        let output = dossier_from_answer(&query, &EvidenceAnswer::failure("HTTP 503", ""));
        assert!(output.failure.unwrap().contains("HTTP 503"));
        assert!(!output.value.has_evidence());
    }
}
