//! Shared FHIR resource model for the gateway and the client store.
//!
//! DESIGN
//! ======
//! Payloads are kept as the decoded `serde_json::Value` they arrived as. The
//! gateway relays them untouched and the client stores them untouched, so
//! the wrappers here only add read-only views over the fields the portal
//! displays. Nothing in this crate rewrites or coerces a resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest id the FHIR `id` datatype allows.
pub const MAX_ID_LEN: usize = 64;

// =============================================================================
// RESOURCE TYPE
// =============================================================================

/// Resource types the portal reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Bundle,
}

impl ResourceType {
    /// Wire name, e.g. `"Patient"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "Patient",
            Self::Bundle => "Bundle",
        }
    }

    /// Relative read path for one instance, e.g. `Patient/42`.
    #[must_use]
    pub fn instance_path(self, id: &str) -> String {
        format!("{}/{id}", self.as_str())
    }
}

/// Check `id` against the FHIR id grammar: `[A-Za-z0-9\-\.]{1,64}`.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
}

// =============================================================================
// BUNDLE
// =============================================================================

/// A search-set bundle of patients exactly as the upstream server returned it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientBundle(Value);

impl PatientBundle {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The decoded JSON, unmodified.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Total reported by the server, when present.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.0.get("total").and_then(Value::as_u64)
    }

    /// `link[relation=next].url`, used for paging.
    #[must_use]
    pub fn next_link(&self) -> Option<&str> {
        self.0
            .get("link")
            .and_then(Value::as_array)?
            .iter()
            .find(|l| l.get("relation").and_then(Value::as_str) == Some("next"))
            .and_then(|l| l.get("url"))
            .and_then(Value::as_str)
    }

    /// Entry resources whose `resourceType` is `Patient`, in bundle order.
    /// Other entries (e.g. `OperationOutcome`) are skipped.
    #[must_use]
    pub fn patients(&self) -> Vec<Patient> {
        let Some(entries) = self.0.get("entry").and_then(Value::as_array) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|e| e.get("resource"))
            .filter(|r| r.get("resourceType").and_then(Value::as_str) == Some(ResourceType::Patient.as_str()))
            .cloned()
            .map(Patient)
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patients().is_empty()
    }
}

// =============================================================================
// PATIENT
// =============================================================================

/// A single patient resource exactly as the upstream server returned it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patient(Value);

impl Patient {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The decoded JSON, unmodified.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    fn array_field(&self, key: &str) -> &[Value] {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice)
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    #[must_use]
    pub fn resource_type(&self) -> Option<&str> {
        self.str_field("resourceType")
    }

    #[must_use]
    pub fn gender(&self) -> Option<&str> {
        self.str_field("gender")
    }

    #[must_use]
    pub fn birth_date(&self) -> Option<&str> {
        self.str_field("birthDate")
    }

    /// `active`, treating an absent flag as inactive.
    #[must_use]
    pub fn active(&self) -> bool {
        self.0.get("active").and_then(Value::as_bool).unwrap_or(false)
    }

    /// First `name` entry rendered as `family given...`, trimmed.
    /// Empty when the patient has no usable name.
    #[must_use]
    pub fn display_name(&self) -> String {
        let Some(name) = self.array_field("name").first() else {
            return String::new();
        };
        let family = name.get("family").and_then(Value::as_str).unwrap_or_default();
        let given = name
            .get("given")
            .and_then(Value::as_array)
            .map(|g| g.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        format!("{family} {given}").trim().to_owned()
    }

    /// `system: value` for every telecom entry, comma-joined.
    #[must_use]
    pub fn telecom_summary(&self) -> String {
        self.array_field("telecom")
            .iter()
            .map(|t| {
                let system = t.get("system").and_then(Value::as_str).unwrap_or_default();
                let value = t.get("value").and_then(Value::as_str).unwrap_or_default();
                format!("{system}: {value}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Identifier values, comma-joined.
    #[must_use]
    pub fn identifier_summary(&self) -> String {
        self.array_field("identifier")
            .iter()
            .map(|i| i.get("value").and_then(Value::as_str).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// First relationship code of every contact, comma-joined.
    #[must_use]
    pub fn contact_summary(&self) -> String {
        self.array_field("contact")
            .iter()
            .map(|c| {
                c.pointer("/relationship/0/coding/0/code")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[must_use]
    pub fn last_updated(&self) -> Option<&str> {
        self.0.pointer("/meta/lastUpdated").and_then(Value::as_str)
    }

    #[must_use]
    pub fn multiple_birth(&self) -> Option<i64> {
        self.0.get("multipleBirthInteger").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn text_status(&self) -> Option<&str> {
        self.0.pointer("/text/status").and_then(Value::as_str)
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
