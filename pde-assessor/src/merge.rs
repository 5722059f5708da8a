//! Field-level merging of partial records from several sources.
//!
//! A resolver lists its sources in priority order and folds their partial records
//! with [`first_non_empty`]: for every field the first source that has a value wins,
//! and an empty value never replaces a filled one.

use crate::models::{ChemicalIdentity, IdentityStatus, Pharmacokinetics, Pharmacology};

/// A record whose fields can be filled from a lower-priority partial record
pub trait FieldMerge {
    /// Fill every empty field of `self` from `other`
    fn fill_from(&mut self, other: Self);

    /// Names of fields that are still empty
    fn missing_fields(&self) -> Vec<&'static str>;
}

/// Fold partial records, highest priority first
pub fn first_non_empty<T, I>(partials: I) -> T
where
    T: FieldMerge + Default,
    I: IntoIterator<Item = T>,
{
    partials.into_iter().fold(T::default(), |mut merged, partial| {
        merged.fill_from(partial);
        merged
    })
}

fn fill(slot: &mut Option<String>, candidate: Option<String>) {
    if is_blank(slot) {
        *slot = candidate.filter(|v| !v.trim().is_empty());
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|s| s.trim().is_empty())
}

fn fill_list(slot: &mut Vec<String>, candidate: Vec<String>) {
    if slot.is_empty() {
        *slot = candidate;
    }
}

/// Links from every source are kept, in source order
fn union_links(slot: &mut Vec<String>, candidate: Vec<String>) {
    for link in candidate {
        if !slot.contains(&link) {
            slot.push(link);
        }
    }
}

fn missing(fields: &[(&'static str, &Option<String>)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, value)| is_blank(value))
        .map(|(name, _)| *name)
        .collect()
}

impl FieldMerge for ChemicalIdentity {
    fn fill_from(&mut self, other: Self) {
        fill(&mut self.name, other.name);
        fill_list(&mut self.synonyms, other.synonyms);
        fill(&mut self.cas_number, other.cas_number);
        fill(&mut self.molecular_formula, other.molecular_formula);
        fill(&mut self.molecular_weight, other.molecular_weight);
        fill(&mut self.smiles, other.smiles);
        fill(&mut self.inchi_key, other.inchi_key);
        fill(&mut self.iupac_name, other.iupac_name);
        fill(&mut self.description, other.description);
        fill(&mut self.atc_code, other.atc_code);
        fill(&mut self.pharmacotherapeutic_group, other.pharmacotherapeutic_group);
        fill(&mut self.appearance, other.appearance);
        fill(&mut self.solubility, other.solubility);
        union_links(&mut self.reference_links, other.reference_links);

        self.status = identity_status(self);
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        missing_identity_fields(self)
    }
}

pub fn identity_status(identity: &ChemicalIdentity) -> IdentityStatus {
    match missing_identity_fields(identity).len() {
        0 => IdentityStatus::Complete,
        n if n == IDENTITY_FIELD_COUNT => IdentityStatus::NotFound,
        _ => IdentityStatus::Partial,
    }
}

const IDENTITY_FIELD_COUNT: usize = 12;

/// Identity fields neither source has filled yet
pub fn missing_identity_fields(identity: &ChemicalIdentity) -> Vec<&'static str> {
    let mut names = missing(&[
        ("CAS Number", &identity.cas_number),
        ("Molecular Formula", &identity.molecular_formula),
        ("Molecular Weight", &identity.molecular_weight),
        ("Smiles", &identity.smiles),
        ("InchI Key", &identity.inchi_key),
        ("IUPAC Name", &identity.iupac_name),
        ("Description", &identity.description),
        ("ATC Code", &identity.atc_code),
        ("Pharmacotherapeutic Group", &identity.pharmacotherapeutic_group),
        ("Appearance", &identity.appearance),
        ("Solubility", &identity.solubility),
    ]);
    if identity.synonyms.is_empty() {
        names.push("Synonyms");
    }
    names
}

impl FieldMerge for Pharmacology {
    fn fill_from(&mut self, other: Self) {
        let Pharmacokinetics {
            absorption,
            distribution,
            metabolism,
            excretion,
        } = other.pharmacokinetics;
        fill(&mut self.pharmacokinetics.absorption, absorption);
        fill(&mut self.pharmacokinetics.distribution, distribution);
        fill(&mut self.pharmacokinetics.metabolism, metabolism);
        fill(&mut self.pharmacokinetics.excretion, excretion);
        fill(&mut self.indication, other.indication);
        fill(&mut self.pharmacodynamics, other.pharmacodynamics);
        fill(&mut self.mechanism_of_action, other.mechanism_of_action);
        union_links(&mut self.reference_links, other.reference_links);
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        missing(&[
            ("Absorption", &self.pharmacokinetics.absorption),
            ("Distribution", &self.pharmacokinetics.distribution),
            ("Metabolism", &self.pharmacokinetics.metabolism),
            ("Excretion", &self.pharmacokinetics.excretion),
            ("Indication", &self.indication),
            ("Pharmacodynamics", &self.pharmacodynamics),
            ("Mechanism of Action", &self.mechanism_of_action),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> ChemicalIdentity {
        ChemicalIdentity {
            name: Some("Abacavir".into()),
            cas_number: Some("136470-78-5".into()),
            smiles: Some("C1CC1NC2=C3C(=NC(=N2)N)N(C=N3)C4CC(C=C4)CO".into()),
            reference_links: vec!["https://pubchem.ncbi.nlm.nih.gov/compound/441300".into()],
            ..Default::default()
        }
    }

    fn evidence() -> ChemicalIdentity {
        ChemicalIdentity {
            name: Some("abacavir sulfate".into()),
            cas_number: Some("".into()),
            atc_code: Some("J05AF06".into()),
            synonyms: vec!["Ziagen".into()],
            reference_links: vec!["https://www.ema.europa.eu/ziagen".into()],
            ..Default::default()
        }
    }

    #[test]
    fn earlier_source_wins_per_field() {
        let merged = first_non_empty([database(), evidence()]);
        assert_eq!(merged.name.as_deref(), Some("Abacavir"));
        assert_eq!(merged.cas_number.as_deref(), Some("136470-78-5"));
        assert_eq!(merged.atc_code.as_deref(), Some("J05AF06"));
        assert_eq!(merged.synonyms, vec!["Ziagen"]);
        assert_eq!(merged.reference_links.len(), 2);
        assert_eq!(merged.status, IdentityStatus::Partial);
    }

    #[test]
    fn empty_values_never_replace_filled_ones() {
        let merged = first_non_empty([evidence(), database()]);
        assert_eq!(merged.name.as_deref(), Some("abacavir sulfate"));
        assert_eq!(merged.cas_number.as_deref(), Some("136470-78-5"));
    }

    #[test]
    fn nothing_found_is_not_found() {
        let merged: ChemicalIdentity = first_non_empty([ChemicalIdentity::default(), ChemicalIdentity::default()]);
        assert_eq!(merged.status, IdentityStatus::NotFound);
    }

    #[test]
    fn pharmacology_reports_missing_fields() {
        let partial = Pharmacology {
            indication: Some("HIV-1 infection".into()),
            ..Default::default()
        };
        let merged = first_non_empty([partial]);
        assert!(!merged.missing_fields().contains(&"Indication"));
        assert!(merged.missing_fields().contains(&"Absorption"));
    }
}
