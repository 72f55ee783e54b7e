use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One target of a campaign. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactEntry {
    /// Normalized to `+` followed by digits only.
    pub number: String,
    pub name: Option<String>,
    /// Extra template variables beyond name/number.
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

impl ContactEntry {
    pub fn new(number: impl Into<String>, name: Option<String>) -> Self {
        Self {
            number: normalize_number(&number.into()),
            name,
            vars: HashMap::new(),
        }
    }
}

/// Strip everything but digits and force a leading `+`. Idempotent: running
/// it over its own output changes nothing.
pub fn normalize_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+{}", digits)
}

/// Parse a newline-separated contact list. Each record is either a bare
/// number or `number,name`. Entries are deduplicated by normalized number,
/// first occurrence wins.
pub fn parse_contact_list(input: &str) -> Vec<ContactEntry> {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut entries = Vec::new();

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (number_part, name_part) = match line.split_once(',') {
            Some((number, name)) => (number.trim(), Some(name.trim())),
            None => (line, None),
        };

        let normalized = normalize_number(number_part);
        if normalized == "+" {
            continue;
        }
        if !seen.insert(normalized.clone()) {
            continue;
        }

        let name = name_part.filter(|n| !n.is_empty()).map(|n| n.to_string());
        entries.push(ContactEntry {
            number: normalized,
            name,
            vars: HashMap::new(),
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "+55 (11) 99999-0001",
            "5511999990001",
            "  +55.11.99999.0001  ",
            "11 9 9999-0001",
        ] {
            let once = normalize_number(raw);
            assert_eq!(normalize_number(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn normalize_strips_formatting_and_prefixes_plus() {
        assert_eq!(normalize_number("55 (11) 99999-0001"), "+5511999990001");
        assert_eq!(normalize_number("+5511999990001"), "+5511999990001");
    }

    #[test]
    fn parse_number_and_optional_name() {
        let entries = parse_contact_list("+5511999990001,Ana\n5511999990002\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].number, "+5511999990001");
        assert_eq!(entries[0].name.as_deref(), Some("Ana"));
        assert_eq!(entries[1].number, "+5511999990002");
        assert_eq!(entries[1].name, None);
    }

    #[test]
    fn parse_dedups_first_seen_wins() {
        let entries = parse_contact_list(
            "+5511999990001,Ana\n55 11 99999-0001,Duplicada\n+5511999990002,Bia",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name.as_deref(), Some("Ana"));
        assert_eq!(entries[1].name.as_deref(), Some("Bia"));
    }

    #[test]
    fn parse_skips_blank_and_digitless_lines() {
        let entries = parse_contact_list("\n  \nsem numero\n+5511999990001\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].number, "+5511999990001");
    }

    #[test]
    fn parse_empty_name_becomes_none() {
        let entries = parse_contact_list("+5511999990001, ");
        assert_eq!(entries[0].name, None);
    }
}
