use crate::constants::DOMAIN_SEPARATOR;
use crate::sorter::config::CountryRule;

/// Returns the lowercased part after the separator, or `None` unless the
/// address contains exactly one separator.
pub fn resolve_domain(address: &str) -> Option<String> {
    let mut parts = address.split(DOMAIN_SEPARATOR);
    let _local = parts.next()?;
    let domain = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(domain.to_lowercase())
}

/// Ordered country to suffix table. The first country whose suffix matches
/// wins, so declaration order is the tie-break.
#[derive(Debug, Clone, Default)]
pub struct CountryTable {
    entries: Vec<(String, Vec<String>)>,
}

impl CountryTable {
    pub fn new(rules: &[CountryRule]) -> Self {
        let entries = rules
            .iter()
            .map(|rule| {
                let suffixes = rule
                    .suffixes
                    .iter()
                    .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                    .filter(|s| !s.is_empty())
                    .map(|s| format!(".{}", s))
                    .collect();
                (rule.code.trim().to_string(), suffixes)
            })
            .collect();

        Self { entries }
    }

    pub fn static_lookup(&self, domain: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, suffixes)| suffixes.iter().any(|suffix| domain.ends_with(suffix.as_str())))
            .map(|(code, _)| code.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
