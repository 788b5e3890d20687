//! First-appearance year extraction from heterogeneous provider metadata.

use crate::instrument::{Metadata, SourceMetadata};
use chrono::Datelike;
use serde::Deserialize;
use serde_json::Value;

/// Earliest year accepted as a first appearance.
pub const MIN_YEAR: u16 = 1900;

/// Outcome of year extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractedYear {
    /// A four-digit year in `[1900, current_year]`.
    Known(u16),
    /// No parseable year; the caller falls back to the default era bucket.
    Unknown,
}

/// Ordered field paths to try for one provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct YearRule {
    /// Provider name, or `"*"` for any provider.
    pub provider: String,
    /// Dot-separated paths into the provider's metadata, tried in order.
    pub fields: Vec<String>,
}

impl YearRule {
    fn new(provider: &str, fields: &[&str]) -> Self {
        Self {
            provider: provider.to_string(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    fn applies_to(&self, provider: &str) -> bool {
        self.provider == "*" || self.provider == provider
    }
}

/// Default rules, most authoritative provider first.
#[must_use]
pub fn default_year_rules() -> Vec<YearRule> {
    vec![
        YearRule::new("marvel", &["firstAppearanceYear", "firstAppearance"]),
        YearRule::new(
            "comicvine",
            &[
                "first_appeared_in_issue.cover_date",
                "first_appeared_in_issue.name",
                "start_year",
            ],
        ),
        YearRule::new("metron", &["first_appearance.cover_date", "cover_date"]),
        YearRule::new("gcd", &["first_issue.publication_date", "year_began"]),
        YearRule::new("superhero", &["biography.first-appearance"]),
        YearRule::new(
            "*",
            &[
                "firstAppearanceYear",
                "first_appearance_year",
                "firstAppearance",
                "first_appearance",
                "year",
            ],
        ),
    ]
}

/// Resolves a canonical first-appearance year.
#[derive(Debug, Clone)]
pub struct YearExtractor {
    rules: Vec<YearRule>,
    current_year: u16,
}

impl YearExtractor {
    /// Creates an extractor with explicit rules and upper bound.
    #[must_use]
    pub fn new(rules: Vec<YearRule>, current_year: u16) -> Self {
        Self {
            rules,
            current_year,
        }
    }

    /// Creates an extractor bounded by the current UTC year.
    #[must_use]
    pub fn with_current_year(rules: Vec<YearRule>) -> Self {
        let year = u16::try_from(chrono::Utc::now().year()).unwrap_or(u16::MAX);
        Self::new(rules, year)
    }

    /// Tries each rule in order against the sources it applies to.
    #[must_use]
    pub fn extract(&self, sources: &SourceMetadata) -> ExtractedYear {
        for rule in &self.rules {
            for (provider, metadata) in sources {
                if !rule.applies_to(provider) {
                    continue;
                }
                for field in &rule.fields {
                    if let Some(year) = lookup(metadata, field).and_then(|v| self.year_of(v)) {
                        return ExtractedYear::Known(year);
                    }
                }
            }
        }
        ExtractedYear::Unknown
    }

    fn year_of(&self, value: &Value) -> Option<u16> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .and_then(|y| u16::try_from(y).ok())
                .filter(|y| self.in_range(*y)),
            Value::String(s) => self.scan_year(s),
            _ => None,
        }
    }

    /// First standalone four-digit run within range.
    fn scan_year(&self, text: &str) -> Option<u16> {
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if !bytes[i].is_ascii_digit() {
                i += 1;
                continue;
            }
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4
                && let Ok(year) = text[start..i].parse::<u16>()
                && self.in_range(year)
            {
                return Some(year);
            }
        }
        None
    }

    fn in_range(&self, year: u16) -> bool {
        (MIN_YEAR..=self.current_year).contains(&year)
    }
}

fn lookup<'a>(metadata: &'a Metadata, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = metadata.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sources(entries: &[(&str, Value)]) -> SourceMetadata {
        entries
            .iter()
            .map(|(p, v)| ((*p).to_string(), v.as_object().cloned().unwrap_or_default()))
            .collect()
    }

    fn extractor() -> YearExtractor {
        YearExtractor::new(default_year_rules(), 2026)
    }

    #[test]
    fn test_extract_numeric_year() {
        let s = sources(&[("marvel", json!({"firstAppearanceYear": 1962}))]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Known(1962));
    }

    #[test]
    fn test_extract_nested_date_string() {
        let s = sources(&[(
            "comicvine",
            json!({"first_appeared_in_issue": {"cover_date": "1939-05-01"}}),
        )]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Known(1939));
    }

    #[test]
    fn test_extract_free_text() {
        let s = sources(&[(
            "superhero",
            json!({"biography": {"first-appearance": "Detective Comics #27 (May 1939)"}}),
        )]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Known(1939));
    }

    #[test]
    fn test_provider_priority() {
        let s = sources(&[
            ("comicvine", json!({"start_year": "1940"})),
            ("marvel", json!({"firstAppearanceYear": 1941})),
        ]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Known(1941));
    }

    #[test]
    fn test_out_of_range_years_ignored() {
        let s = sources(&[("marvel", json!({"firstAppearanceYear": 1850, "firstAppearance": "2099"}))]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Unknown);
    }

    #[test]
    fn test_falls_through_to_next_field() {
        let s = sources(&[("gcd", json!({"first_issue": {"publication_date": "Spring"}, "year_began": 1986}))]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Known(1986));
    }

    #[test]
    fn test_digit_runs_longer_than_four_ignored() {
        let s = sources(&[("metron", json!({"cover_date": "id 19391 then 1977"}))]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Known(1977));
    }

    #[test]
    fn test_wildcard_rule() {
        let s = sources(&[("wikidata", json!({"year": "c. 1975"}))]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Known(1975));
    }

    #[test]
    fn test_unknown_when_nothing_parseable() {
        let s = sources(&[("marvel", json!({"firstAppearance": "Unknown"}))]);
        assert_eq!(extractor().extract(&s), ExtractedYear::Unknown);
        assert_eq!(extractor().extract(&SourceMetadata::new()), ExtractedYear::Unknown);
    }
}
