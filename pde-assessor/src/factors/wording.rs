//! Keyword matching that skips negated mentions ("not teratogenic", "no LOAEL").

const CLAUSE_BREAKS: [char; 5] = ['.', ';', ',', '\n', '|'];
const LEADING_NEGATIONS: &[&str] = &["no", "not", "non", "without", "never", "neither", "nor", "absence", "lack", "free"];
const TRAILING_NEGATIONS: &[&str] = &["not", "cannot", "absent", "unavailable", "undetermined"];
const WINDOW: usize = 4;

/// True when at least one occurrence of a term is stated rather than negated
pub fn mentions_affirmed(text: &str, terms: &[&str]) -> bool {
    first_affirmed(text, terms).is_some()
}

/// Byte offset of the earliest non-negated occurrence of any term
pub fn first_affirmed(text: &str, terms: &[&str]) -> Option<usize> {
    terms
        .iter()
        .flat_map(|term| text.match_indices(term).map(|(start, m)| (start, start + m.len())))
        .filter(|(start, end)| !negated(&text[..*start], &text[*end..]))
        .map(|(start, _)| start)
        .min()
}

fn negated(before: &str, after: &str) -> bool {
    let clause = before.rfind(CLAUSE_BREAKS).map_or(before, |i| &before[i + 1..]);
    let leading = words(clause).rev().take(WINDOW).any(|w| {
        let w = w.to_lowercase();
        LEADING_NEGATIONS.contains(&w.as_str()) || w.ends_with("n't")
    });
    if leading {
        return true;
    }

    let clause = after.find(CLAUSE_BREAKS).map_or(after, |i| &after[..i]);
    words(clause).take(WINDOW).any(|w| {
        let w = w.to_lowercase();
        TRAILING_NEGATIONS.contains(&w.as_str()) || w.ends_with("n't")
    })
}

fn words(text: &str) -> impl DoubleEndedIterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'')).filter(|w| !w.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mentions_count() {
        assert!(mentions_affirmed("teratogenic in rabbits", &["teratogen"]));
        assert!(mentions_affirmed("embryo-fetal toxicity with maternal toxicity", &["with maternal toxicity"]));
    }

    #[test]
    fn leading_negations_are_skipped() {
        assert!(!mentions_affirmed("the drug was not teratogenic in rats", &["teratogen"]));
        assert!(!mentions_affirmed("fetal effects at non-maternally toxic doses", &["maternally toxic"]));
        assert!(!mentions_affirmed("no evidence of being neurotoxic", &["neurotoxic"]));
        assert!(!mentions_affirmed("in the absence of malformation", &["malformation"]));
        assert!(!mentions_affirmed("it isn't neurotoxic", &["neurotoxic"]));
    }

    #[test]
    fn trailing_negations_are_skipped() {
        assert!(!mentions_affirmed("a loael was not identified", &["loael"]));
        assert!(!mentions_affirmed("noael could not be established", &["noael"]));
    }

    #[test]
    fn negation_stops_at_the_clause() {
        assert!(mentions_affirmed("not mutagenic; teratogenic in rabbits", &["teratogen"]));
        assert_eq!(first_affirmed("noael of 50 mg/kg/day; no loael was identified", &["loael"]), None);
        assert_eq!(first_affirmed("noael of 50 mg/kg/day; no loael was identified", &["noael"]), Some(0));
    }
}
