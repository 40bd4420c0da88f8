//! Substring-based redaction for logged payloads and metadata.
//!
//! Matching is deliberately coarse. A payload is rendered with its `Debug`
//! implementation, and if that text contains any sensitive substring
//! (case-insensitive) the whole payload is replaced by
//! [`PAYLOAD_REDACTED`]. Field names count: a message with a `password`
//! field is always suppressed, whatever its values.
//!
//! Metadata is redacted per key: a key whose lowercase form contains a
//! sensitive substring has all of its values replaced by [`REDACTED`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use tonic::metadata::{KeyAndValueRef, MetadataMap};

pub const REDACTED: &str = "[REDACTED]";
pub const PAYLOAD_REDACTED: &str = "[REDACTED - Contains sensitive data]";

#[derive(Debug, Clone, Default)]
pub struct Redactor {
    needles: Vec<String>,
}

impl Redactor {
    /// Blank entries are dropped: an empty substring would match everything.
    pub fn new<I, S>(sensitive_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            needles: sensitive_fields
                .into_iter()
                .map(|field| field.as_ref().trim().to_lowercase())
                .filter(|field| !field.is_empty())
                .collect(),
        }
    }

    pub fn is_sensitive(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.needles.iter().any(|needle| lower.contains(needle.as_str()))
    }

    /// Renders `payload` for logging, or [`PAYLOAD_REDACTED`] if any part of
    /// its text looks sensitive.
    pub fn redact_payload<T: Debug + ?Sized>(&self, payload: &T) -> String {
        let rendered = format!("{payload:?}");
        if self.is_sensitive(&rendered) {
            PAYLOAD_REDACTED.to_string()
        } else {
            rendered
        }
    }

    /// Groups `(key, value)` pairs by key, masking sensitive keys.
    pub fn redact_pairs<'a, I>(&self, pairs: I) -> BTreeMap<String, Vec<String>>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in pairs {
            if self.is_sensitive(key) {
                out.insert(key.to_string(), vec![REDACTED.to_string()]);
            } else {
                out.entry(key.to_string()).or_default().push(value);
            }
        }
        out
    }

    pub fn redact_metadata(&self, metadata: &MetadataMap) -> BTreeMap<String, Vec<String>> {
        self.redact_pairs(metadata.iter().map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => (
                key.as_str(),
                value
                    .to_str()
                    .map_or_else(|_| format!("{value:?}"), str::to_string),
            ),
            KeyAndValueRef::Binary(key, value) => (
                key.as_str(),
                String::from_utf8_lossy(value.as_encoded_bytes()).into_owned(),
            ),
        }))
    }
}
