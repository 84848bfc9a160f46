use serde::{Deserialize, Serialize};

/// One result produced by a query stream.
///
/// `value` is `None` when the query was issued with `keys_only`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The caller-visible logical key.
    pub key: String,
    /// Byte length of the value bound to `key`.
    pub size: u64,
    /// The value itself, when requested.
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

impl Entry {
    /// Entry carrying only the key and size.
    pub fn key_only(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            value: None,
        }
    }

    /// Entry carrying its value; `size` is taken from the value length.
    pub fn with_value(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            size: value.len() as u64,
            value: Some(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_value_sets_size() {
        let entry = Entry::with_value("k", vec![1, 2, 3]);
        assert_eq!(entry.size, 3);
        assert_eq!(entry.value.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn key_only_has_null_value_in_json() {
        let entry = Entry::key_only("a/1", 10);
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json["value"].is_null());
        let parsed: Entry = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn missing_value_field_defaults_to_none() {
        let parsed: Entry = serde_json::from_str(r#"{"key":"k","size":3}"#).unwrap();
        assert_eq!(parsed, Entry::key_only("k", 3));
    }
}
