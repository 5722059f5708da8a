use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use super::{IdentityError, IdentityLookup};
use crate::models::{ChemicalIdentity, IdentityStatus};

const MAX_SYNONYMS: usize = 10;
const COMPOUND_PAGE: &str = "https://pubchem.ncbi.nlm.nih.gov/compound";

/// Name → CID → PUG-View record lookup against PubChem
pub struct PubChemLookup {
    http: Client,
    base_url: String,
}

impl PubChemLookup {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, url: &str, name: &str) -> Result<Value, IdentityError> {
        let response = self.http.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(IdentityError::NotFound(name.to_string())),
            status if !status.is_success() => Err(IdentityError::Transport(format!(
                "PubChem returned HTTP {}",
                status.as_u16()
            ))),
            _ => Ok(response.json().await?),
        }
    }

    async fn find_cid(&self, name: &str) -> Result<u64, IdentityError> {
        let url = format!(
            "{}/pug/compound/name/{}/cids/JSON",
            self.base_url,
            urlencoding::encode(name)
        );
        let body = self.get_json(&url, name).await?;
        body["IdentifierList"]["CID"]
            .as_array()
            .and_then(|cids| cids.first())
            .and_then(Value::as_u64)
            .ok_or_else(|| IdentityError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl IdentityLookup for PubChemLookup {
    async fn resolve(&self, name: &str) -> Result<ChemicalIdentity, IdentityError> {
        let cid = self.find_cid(name).await?;
        debug!(drug = %name, cid, "PubChem compound found");

        let url = format!("{}/pug_view/data/compound/{}/JSON", self.base_url, cid);
        let record = self.get_json(&url, name).await?;
        if record.get("Record").is_none() {
            return Err(IdentityError::Decode(format!("PUG-View record for CID {} has no Record", cid)));
        }

        let identity = identity_from_record(name, cid, &record);
        info!(drug = %name, cid, status = ?identity.status, "PubChem identity resolved");
        Ok(identity)
    }
}

/// Read the identity fields out of a PUG-View compound record
pub fn identity_from_record(name: &str, cid: u64, record: &Value) -> ChemicalIdentity {
    let mut headings: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(sections) = record["Record"]["Section"].as_array() {
        for section in sections {
            collect_sections(section, &mut headings);
        }
    }

    let first = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| headings.get(*k).and_then(|values| values.first().cloned()))
    };

    let mut identity = ChemicalIdentity {
        name: Some(name.to_string()),
        synonyms: headings
            .get("Depositor-Supplied Synonyms")
            .map(|s| s.iter().take(MAX_SYNONYMS).cloned().collect())
            .unwrap_or_default(),
        cas_number: first(&["CAS"]),
        molecular_formula: first(&["Molecular Formula"]),
        molecular_weight: first(&["Molecular Weight"]),
        smiles: first(&["SMILES", "Canonical SMILES", "Isomeric SMILES"]),
        inchi_key: first(&["InChIKey"]),
        iupac_name: first(&["IUPAC Name"]),
        description: first(&["Record Description"]),
        atc_code: first(&["ATC Code"]),
        pharmacotherapeutic_group: first(&["Drug Classes", "Pharmacological Classification"]),
        appearance: first(&["Physical Description", "Color/Form"]),
        solubility: first(&["Solubility"]),
        reference_links: vec![format!("{}/{}", COMPOUND_PAGE, cid)],
        status: IdentityStatus::Partial,
    };
    identity.status = crate::merge::identity_status(&identity);
    identity
}

/// Walk the section tree, recording every string value under its TOC heading
fn collect_sections(section: &Value, out: &mut HashMap<String, Vec<String>>) {
    if let Some(heading) = section["TOCHeading"].as_str() {
        let values: Vec<String> = section["Information"]
            .as_array()
            .into_iter()
            .flatten()
            .flat_map(|info| information_strings(&info["Value"]))
            .collect();
        if !values.is_empty() {
            out.entry(heading.to_string()).or_default().extend(values);
        }
    }

    if let Some(children) = section["Section"].as_array() {
        for child in children {
            collect_sections(child, out);
        }
    }
}

fn information_strings(value: &Value) -> Vec<String> {
    if let Some(markup) = value["StringWithMarkup"].as_array() {
        return markup
            .iter()
            .filter_map(|m| m["String"].as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(numbers) = value["Number"].as_array() {
        let unit = value["Unit"].as_str().map(|u| format!(" {}", u)).unwrap_or_default();
        return numbers.iter().map(|n| format!("{}{}", n, unit)).collect();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(values: &[&str]) -> Value {
        json!({"StringWithMarkup": values.iter().map(|v| json!({"String": v})).collect::<Vec<_>>()})
    }

    fn heading(name: &str, value: Value) -> Value {
        json!({"TOCHeading": name, "Information": [{"Value": value}]})
    }

    fn abacavir_record() -> Value {
        json!({
            "Record": {
                "RecordNumber": 441300,
                "Section": [
                    {
                        "TOCHeading": "Names and Identifiers",
                        "Section": [
                            heading("Record Description", strings(&["Abacavir is a nucleoside analogue reverse transcriptase inhibitor."])),
                            {
                                "TOCHeading": "Computed Descriptors",
                                "Section": [
                                    heading("IUPAC Name", strings(&["[(1S,4R)-4-[2-amino-6-(cyclopropylamino)purin-9-yl]cyclopent-2-en-1-yl]methanol"])),
                                    heading("InChIKey", strings(&["MCGSCOLBFJQGHM-SCZZXKLOSA-N"])),
                                    heading("SMILES", strings(&["C1CC1NC2=C3C(=NC(=N2)N)N(C=N3)C4CC(C=C4)CO"])),
                                ]
                            },
                            heading("Molecular Formula", strings(&["C14H18N6O"])),
                            {
                                "TOCHeading": "Other Identifiers",
                                "Section": [heading("CAS", strings(&["136470-78-5", "136470-78-5"]))]
                            },
                            {
                                "TOCHeading": "Synonyms",
                                "Section": [heading("Depositor-Supplied Synonyms", strings(&["abacavir", "Ziagen", "ABC"]))]
                            }
                        ]
                    },
                    {
                        "TOCHeading": "Chemical and Physical Properties",
                        "Section": [
                            heading("Molecular Weight", json!({"StringWithMarkup": [{"String": "286.33"}], "Unit": "g/mol"})),
                            heading("Solubility", json!({"Number": [77], "Unit": "mg/mL"}))
                        ]
                    }
                ]
            }
        })
    }

    #[test]
    fn extracts_identifiers_from_nested_sections() {
        let identity = identity_from_record("Abacavir", 441300, &abacavir_record());

        assert_eq!(identity.cas_number.as_deref(), Some("136470-78-5"));
        assert_eq!(identity.molecular_formula.as_deref(), Some("C14H18N6O"));
        assert_eq!(identity.molecular_weight.as_deref(), Some("286.33"));
        assert_eq!(identity.inchi_key.as_deref(), Some("MCGSCOLBFJQGHM-SCZZXKLOSA-N"));
        assert_eq!(identity.solubility.as_deref(), Some("77 mg/mL"));
        assert_eq!(identity.synonyms, vec!["abacavir", "Ziagen", "ABC"]);
        assert_eq!(
            identity.reference_links,
            vec!["https://pubchem.ncbi.nlm.nih.gov/compound/441300"]
        );
    }

    #[test]
    fn missing_database_fields_leave_identity_partial() {
        let identity = identity_from_record("Abacavir", 441300, &abacavir_record());
        assert_eq!(identity.atc_code, None);
        assert_eq!(identity.status, IdentityStatus::Partial);
    }

    /// Usage: cargo test live_pubchem -- --ignored --nocapture
    #[tokio::test]
    #[ignore]
    async fn live_pubchem() {
        let lookup = PubChemLookup::new("https://pubchem.ncbi.nlm.nih.gov/rest", Duration::from_secs(30));
        let identity = lookup.resolve("Abacavir").await.unwrap();
        println!("{:#?}", identity);
        assert!(identity.cas_number.is_some());
    }
}
