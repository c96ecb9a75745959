//! Client-side staging area for unsaved operator edits.
//!
//! The ledger buffers every edit until the authority confirms durable
//! persistence. It accepts anything the operator types; validation is
//! the persistence gateway's job, because the staging layer must never
//! reject input mid-edit. Staging the same field twice collapses to the
//! latest value; no intermediate history is kept.
//!
//! The ledger is an owned state object created per editing session and
//! handed to the sync coordinator, never a module-level global. It is
//! cleared only on confirmed save or an explicit discard.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of content a field holds, driving validation and
/// sanitization at the persistence gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Html,
    Url,
    Email,
    Color,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Html => "html",
            FieldType::Url => "url",
            FieldType::Email => "email",
            FieldType::Color => "color",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(FieldType::Text),
            "html" => Some(FieldType::Html),
            "url" => Some(FieldType::Url),
            "email" => Some(FieldType::Email),
            "color" => Some(FieldType::Color),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending edit: a named field and its new raw value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field_name: String,
    pub field_value: String,
    pub field_type: FieldType,
}

/// Staging map of unsaved edits, keyed by field name.
#[derive(Debug, Default)]
pub struct ChangeLedger {
    entries: BTreeMap<String, FieldChange>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the pending value for a field (last write
    /// wins). The field is considered dirty until the ledger is cleared.
    pub fn stage(&mut self, field_name: &str, field_value: &str, field_type: FieldType) {
        self.entries.insert(
            field_name.to_string(),
            FieldChange {
                field_name: field_name.to_string(),
                field_value: field_value.to_string(),
                field_type,
            },
        );
    }

    /// Stage an already-built change.
    pub fn stage_change(&mut self, change: FieldChange) {
        self.entries.insert(change.field_name.clone(), change);
    }

    /// Every staged change in field order. Entries stay staged; clearing
    /// happens only on confirmed success or explicit discard.
    pub fn drain(&self) -> Vec<FieldChange> {
        self.entries.values().cloned().collect()
    }

    /// Forget everything. Called after a confirmed save or "undo all".
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Forget a single field (its save was confirmed).
    pub fn remove(&mut self, field_name: &str) {
        self.entries.remove(field_name);
    }

    /// Field names with unsaved edits, for UI dirty markers and save
    /// button enablement.
    pub fn dirty_fields(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_dirty(&self, field_name: &str) -> bool {
        self.entries.contains_key(field_name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────
