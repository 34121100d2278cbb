//! Dataset category extraction: semantic tags derived from dataset file names.

use std::collections::BTreeSet;
use std::path::Path;

/// Token → canonical tag dictionary. Tokens are matched lower-case.
const TAG_DICTIONARY: &[(&str, &str)] = &[
    ("civic", "CivicID"),
    ("civicid", "CivicID"),
    ("swedish", "SwedID"),
    ("sv", "SwedID"),
    ("swe", "SwedID"),
    ("swedid", "SwedID"),
    ("identity", "Identity"),
    ("ident", "Identity"),
    ("privacy", "Privacy"),
    ("private", "Privacy"),
    ("gdpr", "Privacy"),
    ("fairness", "Fairness"),
    ("fair", "Fairness"),
    ("bias", "Fairness"),
    ("nordic", "Nordic"),
    ("nordics", "Nordic"),
    ("transparency", "Transparency"),
    ("transparent", "Transparency"),
    ("ethics", "Ethics"),
    ("ethical", "Ethics"),
    ("politics", "Politics"),
    ("political", "Politics"),
    ("policy", "Politics"),
    ("democracy", "Democracy"),
    ("democratic", "Democracy"),
];

/// Map a single lower-case token to its canonical tag.
pub fn tag_for_token(token: &str) -> Option<&'static str> {
    TAG_DICTIONARY
        .iter()
        .find(|(t, _)| *t == token)
        .map(|(_, tag)| *tag)
}

/// Extract the canonical tags of one dataset name.
///
/// Only the final path component is tokenized.
pub fn categories_for_name(name: &str) -> BTreeSet<String> {
    let file_name = Path::new(name)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(name);

    file_name
        .split(['_', '-', '.'])
        .filter(|t| !t.is_empty())
        .filter_map(|t| tag_for_token(&t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Union of canonical tags across all dataset names.
///
/// Order-independent; empty input yields an empty set.
pub fn extract_categories<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .flat_map(|n| categories_for_name(n.as_ref()))
        .collect()
}
