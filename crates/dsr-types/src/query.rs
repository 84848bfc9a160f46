//! Declarative prefix queries.
//!
//! A [`QuerySpec`] travels over the wire as JSON. Field names are accepted in
//! both snake_case and the PascalCase spelling used by existing datastore
//! clients (`Prefix`, `KeysOnly`, `Offset`, `Limit`), so a serialized
//! datastore query can be forwarded unchanged.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Description of a prefix query over logical keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    /// Only keys starting with this prefix match. Empty matches everything.
    #[serde(alias = "Prefix")]
    pub prefix: String,
    /// Return keys and sizes without resolving values.
    #[serde(alias = "KeysOnly")]
    pub keys_only: bool,
    /// Number of matches to skip before the first yielded entry.
    #[serde(alias = "Offset")]
    pub offset: u64,
    /// Maximum number of entries to yield. Zero means unbounded.
    #[serde(alias = "Limit")]
    pub limit: u64,
    /// Match the prefix ignoring ASCII case.
    #[serde(alias = "CaseInsensitive")]
    pub case_insensitive: bool,
    /// Result orderings. Not supported; must be empty.
    #[serde(alias = "Orders", skip_serializing_if = "Option::is_none")]
    pub orders: Option<Vec<serde_json::Value>>,
    /// Result filters. Not supported; must be empty.
    #[serde(alias = "Filters", skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<serde_json::Value>>,
}

impl QuerySpec {
    /// Query every key starting with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Set the result limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Set the number of matches to skip.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Request keys and sizes only.
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Match the prefix case-insensitively.
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Decode and validate a JSON-encoded query.
    pub fn from_json(data: &[u8]) -> Result<Self, TypeError> {
        let spec: Self =
            serde_json::from_slice(data).map_err(|e| TypeError::InvalidQuery(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, TypeError> {
        serde_json::to_vec(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Reject features the query engine does not implement.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.orders.as_ref().is_some_and(|o| !o.is_empty()) {
            return Err(TypeError::InvalidQuery("orders are not supported".into()));
        }
        if self.filters.as_ref().is_some_and(|f| !f.is_empty()) {
            return Err(TypeError::InvalidQuery("filters are not supported".into()));
        }
        Ok(())
    }

    /// Returns `true` if `key` falls under this query's prefix.
    pub fn matches(&self, key: &str) -> bool {
        prefix_matches(key.as_bytes(), self.prefix.as_bytes(), self.case_insensitive)
    }

    /// Limit as an `Option`, with zero meaning "no limit".
    pub fn effective_limit(&self) -> Option<u64> {
        (self.limit > 0).then_some(self.limit)
    }
}

/// Prefix test shared by every scan implementation.
///
/// Operates on raw bytes so backends can apply it to undecoded keys.
/// Case folding is ASCII-only.
pub fn prefix_matches(key: &[u8], prefix: &[u8], case_insensitive: bool) -> bool {
    if key.len() < prefix.len() {
        return false;
    }
    let head = &key[..prefix.len()];
    if case_insensitive {
        head.eq_ignore_ascii_case(prefix)
    } else {
        head == prefix
    }
}
