//! Recursive redaction of sensitive fields before data reaches the log stream.

use serde_json::Value;

/// Replacement written over any matched value.
pub const MASK_MARKER: &str = "***MASKED***";

/// Field-name substrings masked when no override is configured.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "refreshToken",
    "accessToken",
    "apiKey",
    "secret",
    "token",
];

/// Masks object values whose keys match a configured substring list,
/// case-insensitively, at any depth.
#[derive(Debug, Clone)]
pub struct Masker {
    fields: Vec<String>,
}

impl Masker {
    /// Build a masker from field-name substrings; blanks are dropped and the
    /// comparison set is lowercased once here.
    pub fn new(fields: impl IntoIterator<Item = String>) -> Self {
        let fields = fields
            .into_iter()
            .filter_map(|field| {
                let trimmed = field.trim().to_lowercase();
                (!trimmed.is_empty()).then_some(trimmed)
            })
            .collect();
        Self { fields }
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.fields.iter().any(|field| key.contains(field))
    }

    /// Pure depth-first transform. Sequences keep order and length, scalars
    /// and nulls pass through, matched keys are overwritten whatever the
    /// value's type or depth. Idempotent on any acyclic input.
    pub fn mask(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, nested)| {
                        if self.is_sensitive(key) {
                            (key.clone(), Value::String(MASK_MARKER.to_string()))
                        } else {
                            (key.clone(), self.mask(nested))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.mask(item)).collect()),
            scalar => scalar.clone(),
        }
    }
}

impl Default for Masker {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS.iter().map(|s| s.to_string()))
    }
}
