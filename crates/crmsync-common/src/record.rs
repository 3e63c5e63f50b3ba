use crate::locator::Substitutions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder token for the bare search key.
pub const IDENTIFIER_TOKEN: &str = "identifier";
/// Placeholder token for the search key with the row prefix re-attached.
pub const ROW_IDENTIFIER_TOKEN: &str = "row_identifier";

/// How record identifiers map to CRM search keys and row labels.
///
/// `strip_prefix` is removed (case-insensitively) before searching;
/// `row_prefix` is put back in front of the key when row locators are built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierRules {
    #[serde(default = "default_prefix")]
    pub strip_prefix: Option<String>,
    #[serde(default = "default_prefix")]
    pub row_prefix: Option<String>,
}

impl Default for IdentifierRules {
    fn default() -> Self {
        Self {
            strip_prefix: default_prefix(),
            row_prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> Option<String> {
    Some("SZ".to_string())
}

impl IdentifierRules {
    pub fn plain() -> Self {
        Self {
            strip_prefix: None,
            row_prefix: None,
        }
    }

    pub fn search_key(&self, identifier: &Identifier) -> String {
        let raw = identifier.as_str().trim();
        let stripped = match self.strip_prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix)
                if raw.len() >= prefix.len()
                    && raw.is_char_boundary(prefix.len())
                    && raw[..prefix.len()].eq_ignore_ascii_case(prefix) =>
            {
                &raw[prefix.len()..]
            }
            _ => raw,
        };
        stripped.trim().to_string()
    }

    pub fn row_key(&self, identifier: &Identifier) -> String {
        format!(
            "{}{}",
            self.row_prefix.as_deref().unwrap_or_default(),
            self.search_key(identifier)
        )
    }

    /// Placeholder values for locators keyed by this identifier.
    pub fn substitutions(&self, identifier: &Identifier) -> Substitutions {
        Substitutions::new()
            .with(IDENTIFIER_TOKEN, self.search_key(identifier))
            .with(ROW_IDENTIFIER_TOKEN, self.row_key(identifier))
    }
}

/// Record identifier as it appeared in the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Spreadsheets hand integral ids back as floats (`1234.0`); those are
    /// folded to their integer text.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if let Some(integral) = trimmed.strip_suffix(".0")
            && !integral.is_empty()
            && integral.chars().all(|c| c.is_ascii_digit())
        {
            return Self(integral.to_string());
        }
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::new(value)
    }
}

/// One unit of work: an identifier plus the field values to apply, in
/// source column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub identifier: Identifier,
    pub fields: Vec<(String, String)>,
}

impl Record {
    pub fn new<I, K, V>(identifier: impl Into<Identifier>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            identifier: identifier.into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Fields that carry something to write.
    pub fn updates(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn has_updates(&self) -> bool {
        self.updates().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub identifier: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn new(identifier: impl Into<String>, success: bool) -> Self {
        Self {
            identifier: identifier.into(),
            success,
            timestamp: Utc::now(),
        }
    }
}

/// Per-record outcomes of a batch, keyed by search key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSummary {
    results: BTreeMap<String, OperationResult>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results are write-once; a second result for the same key is rejected
    /// and `false` returned.
    pub fn insert(&mut self, result: OperationResult) -> bool {
        if self.results.contains_key(&result.identifier) {
            return false;
        }
        self.results.insert(result.identifier.clone(), result);
        true
    }

    pub fn get(&self, key: &str) -> Option<&OperationResult> {
        self.results.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.values()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
