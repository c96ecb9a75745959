//! Bridge message types and envelope decoding.
//!
//! Every message on the cross-origin channel is a JSON envelope:
//! a namespaced `type`, a `payload` object, a millisecond `timestamp`,
//! and a `source` tag naming the sending side. The `type` set is closed;
//! anything outside it decodes to [`Inbound::Unrecognized`] and is
//! ignored rather than treated as an error, so future message types can
//! ship without breaking old receivers.

use crate::ledger::FieldChange;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Namespace prefix shared by every bridge message type.
pub const MESSAGE_PREFIX: &str = "bridge-";

/// The closed set of wire-level `type` values this crate understands.
const RECOGNIZED_TYPES: &[&str] = &[
    "bridge-ready-announce",
    "bridge-enable-edit-mode",
    "bridge-disable-edit-mode",
    "bridge-field-changed",
    "bridge-apply-saved-changes",
    "bridge-request-verification",
    "bridge-verification-response",
    "bridge-force-refresh",
];

/// All message types exchanged over the bridge channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BridgeMessage {
    /// The embedded app announces it has loaded and is listening.
    #[serde(rename = "bridge-ready-announce")]
    ReadyAnnounce {
        /// Whether the app booted with edit mode already on.
        edit_mode: bool,
    },

    /// Authority controller turns the embedded app's edit affordances on.
    #[serde(rename = "bridge-enable-edit-mode")]
    EnableEditMode,

    /// Authority controller turns edit affordances off.
    #[serde(rename = "bridge-disable-edit-mode")]
    DisableEditMode {
        /// True when unsaved visual edits must be reverted to the last
        /// known-good values (the "undo all changes" path).
        discard: bool,
    },

    /// The embedded app reports a single operator edit for staging.
    #[serde(rename = "bridge-field-changed")]
    FieldChanged { change: FieldChange },

    /// Authority broadcasts a persisted change set for re-application.
    /// Applying the same batch twice must be a no-op.
    #[serde(rename = "bridge-apply-saved-changes")]
    ApplySavedChanges {
        batch_id: String,
        changes: Vec<FieldChange>,
    },

    /// Authority asks the embedded app to echo what it applied.
    #[serde(rename = "bridge-request-verification")]
    RequestVerification { batch_id: String },

    /// The embedded app's acknowledgment for a named batch.
    #[serde(rename = "bridge-verification-response")]
    VerificationResponse {
        batch_id: String,
        applied_fields: Vec<String>,
    },

    /// Escalation: the embedded app must hard-reload itself.
    #[serde(rename = "bridge-force-refresh")]
    ForceRefresh { batch_id: String },
}

/// A typed, timestamped unit on the bridge channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: BridgeMessage,
    /// Milliseconds since the Unix epoch at send time.
    pub timestamp: u64,
    /// Tag naming the sending side (e.g. "authority", "embedded-app").
    pub source: String,
}

impl Envelope {
    /// Wrap a message with the current timestamp and the sender tag.
    pub fn new(message: BridgeMessage, source: &str) -> Self {
        Self {
            message,
            timestamp: epoch_millis(),
            source: source.to_string(),
        }
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Outcome of decoding one raw inbound message.
#[derive(Debug)]
pub enum Inbound {
    /// A recognized, well-formed envelope.
    Message(Box<Envelope>),
    /// A `type` outside the recognized set (foreign namespace or a future
    /// bridge verb). Ignored by handlers, never an error.
    Unrecognized { kind: String },
    /// Not JSON, or a recognized `type` with a payload that does not match.
    Malformed,
}

/// Decode one raw message from the channel.
pub fn decode(raw: &str) -> Inbound {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return Inbound::Malformed,
    };

    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    if !RECOGNIZED_TYPES.contains(&kind.as_str()) {
        return Inbound::Unrecognized { kind };
    }

    match serde_json::from_value::<Envelope>(value) {
        Ok(envelope) => Inbound::Message(Box::new(envelope)),
        Err(e) => {
            tracing::warn!(kind, error = %e, "bridge envelope payload did not match its type");
            Inbound::Malformed
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::FieldType;

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope::new(
            BridgeMessage::ApplySavedChanges {
                batch_id: "b1".into(),
                changes: vec![FieldChange {
                    field_name: "hero_title".into(),
                    field_value: "Welcome".into(),
                    field_type: FieldType::Text,
                }],
            },
            "authority",
        );

        let raw = env.encode();
        match decode(&raw) {
            Inbound::Message(parsed) => {
                assert_eq!(parsed.source, "authority");
                match parsed.message {
                    BridgeMessage::ApplySavedChanges { batch_id, changes } => {
                        assert_eq!(batch_id, "b1");
                        assert_eq!(changes.len(), 1);
                        assert_eq!(changes[0].field_name, "hero_title");
                    }
                    other => panic!("wrong message: {other:?}"),
                }
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn wire_type_is_namespaced() {
        let env = Envelope::new(BridgeMessage::EnableEditMode, "authority");
        let value: serde_json::Value = serde_json::from_str(&env.encode()).unwrap();
        assert_eq!(value["type"], "bridge-enable-edit-mode");
    }

    #[test]
    fn unknown_bridge_verb_is_ignored_not_error() {
        let raw = r#"{"type":"bridge-telemetry-ping","payload":{},"timestamp":1,"source":"x"}"#;
        assert!(matches!(decode(raw), Inbound::Unrecognized { kind } if kind == "bridge-telemetry-ping"));
    }

    #[test]
    fn foreign_namespace_is_ignored() {
        let raw = r#"{"type":"webpack-dev-server","payload":{},"timestamp":1,"source":"x"}"#;
        assert!(matches!(decode(raw), Inbound::Unrecognized { .. }));
    }

    #[test]
    fn missing_type_is_unrecognized() {
        let raw = r#"{"payload":{},"timestamp":1}"#;
        assert!(matches!(decode(raw), Inbound::Unrecognized { kind } if kind.is_empty()));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(decode("not json {{{"), Inbound::Malformed));
    }

    #[test]
    fn known_type_with_bad_payload_is_malformed() {
        let raw = r#"{"type":"bridge-force-refresh","payload":{"batch_id":42},"timestamp":1,"source":"x"}"#;
        assert!(matches!(decode(raw), Inbound::Malformed));
    }

    #[test]
    fn recognized_list_covers_every_variant() {
        // Each wire name must decode back to a message, so a rename and the
        // RECOGNIZED_TYPES table cannot drift apart silently.
        for kind in RECOGNIZED_TYPES {
            assert!(kind.starts_with(MESSAGE_PREFIX), "{kind} lost its prefix");
        }
        let samples = [
            Envelope::new(
                BridgeMessage::ReadyAnnounce { edit_mode: false },
                "embedded-app",
            ),
            Envelope::new(BridgeMessage::EnableEditMode, "authority"),
            Envelope::new(BridgeMessage::DisableEditMode { discard: true }, "authority"),
            Envelope::new(
                BridgeMessage::RequestVerification {
                    batch_id: "b".into(),
                },
                "authority",
            ),
            Envelope::new(
                BridgeMessage::VerificationResponse {
                    batch_id: "b".into(),
                    applied_fields: vec![],
                },
                "embedded-app",
            ),
            Envelope::new(
                BridgeMessage::ForceRefresh {
                    batch_id: "b".into(),
                },
                "authority",
            ),
        ];
        for sample in samples {
            assert!(matches!(decode(&sample.encode()), Inbound::Message(_)));
        }
    }
}
