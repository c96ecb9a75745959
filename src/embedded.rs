//! Embedded-application side of the bridge.
//!
//! Everything inbound goes through the origin guard; everything this
//! side does to its document goes through the [`EditSurface`]
//! capability, which is present only when the surrounding context can
//! actually reach the document. The cross-origin fallback is a no-op;
//! a missing capability must never crash the flow.
//!
//! Handlers are idempotent: applying the same saved change set twice
//! leaves the cache and surface in the same state as applying it once.

use crate::bridge::{BridgeMessage, Envelope, OriginGuard};
use crate::cache::LocalContentCache;
use crate::ledger::FieldChange;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Provenance tag written to the cache when a save broadcast lands.
const SOURCE_SAVE_BROADCAST: &str = "save-broadcast";
/// Provenance tag for boot-time reconciliation against a live fetch.
const SOURCE_LIVE_FETCH: &str = "live-fetch";

/// The embedded app's document hooks.
///
/// Implementations assign values; they never accumulate, so repeated
/// application of the same change set is safe.
pub trait EditSurface: Send + Sync {
    /// Assign a field's rendered value.
    fn apply_field(&self, field_name: &str, value: &str);
    /// Toggle edit affordances.
    fn set_edit_mode(&self, enabled: bool);
    /// Revert unsaved visual edits to the last known-good values.
    fn revert_unsaved(&self);
    /// Hard-reload the application.
    fn hard_reload(&self);
}

/// Fallback for contexts with no document access. Every hook is a no-op;
/// the bridge keeps its cache consistent regardless.
pub struct NoopSurface;

impl EditSurface for NoopSurface {
    fn apply_field(&self, _field_name: &str, _value: &str) {}
    fn set_edit_mode(&self, _enabled: bool) {}
    fn revert_unsaved(&self) {}
    fn hard_reload(&self) {
        tracing::warn!("hard reload requested but no document surface is attached");
    }
}

/// Message handler for the embedded application.
pub struct EmbeddedBridge {
    guard: OriginGuard,
    cache: LocalContentCache,
    surface: Arc<dyn EditSurface>,
    source: String,
    edit_mode: AtomicBool,
    /// Change sets already applied, by batch id, so verification can echo
    /// exactly what landed and duplicates stay no-ops.
    applied_batches: Mutex<HashMap<String, Vec<String>>>,
}

impl EmbeddedBridge {
    pub fn new(
        guard: OriginGuard,
        cache: LocalContentCache,
        surface: Arc<dyn EditSurface>,
        source: &str,
    ) -> Self {
        Self {
            guard,
            cache,
            surface,
            source: source.to_string(),
            edit_mode: AtomicBool::new(false),
            applied_batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn edit_mode(&self) -> bool {
        self.edit_mode.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &LocalContentCache {
        &self.cache
    }

    /// The announcement sent when the app finishes loading.
    pub fn ready_announcement(&self) -> Envelope {
        Envelope::new(
            BridgeMessage::ReadyAnnounce {
                edit_mode: self.edit_mode(),
            },
            &self.source,
        )
    }

    /// Boot-time hydration: prefer authority-confirmed content over
    /// compiled-in defaults. With a live snapshot in hand the cache is
    /// corrected to match it; otherwise the cache's last known-good
    /// values are rendered as-is.
    pub fn hydrate(&self, live: Option<&BTreeMap<String, String>>) -> anyhow::Result<()> {
        if let Some(live) = live {
            self.cache.reconcile(live, SOURCE_LIVE_FETCH)?;
        }
        for (name, value) in self.cache.values() {
            self.surface.apply_field(&name, &value);
        }
        Ok(())
    }

    /// Wrap an operator edit for the authority controller to stage.
    pub fn record_edit(&self, change: FieldChange) -> Envelope {
        Envelope::new(BridgeMessage::FieldChanged { change }, &self.source)
    }

    /// Handle one raw inbound message. Returns the envelopes to send back
    /// to the authority side, if any.
    pub fn handle(&self, origin: &str, raw: &str) -> Vec<Envelope> {
        let Some(envelope) = self.guard.accept(origin, raw) else {
            return Vec::new();
        };

        match envelope.message {
            BridgeMessage::EnableEditMode => {
                self.edit_mode.store(true, Ordering::Relaxed);
                self.surface.set_edit_mode(true);
                Vec::new()
            }

            BridgeMessage::DisableEditMode { discard } => {
                self.edit_mode.store(false, Ordering::Relaxed);
                self.surface.set_edit_mode(false);
                if discard {
                    self.surface.revert_unsaved();
                    // Re-render last known-good values over the discarded edits.
                    for (name, value) in self.cache.values() {
                        self.surface.apply_field(&name, &value);
                    }
                }
                Vec::new()
            }

            BridgeMessage::ApplySavedChanges { batch_id, changes } => {
                self.apply_saved(&batch_id, &changes);
                Vec::new()
            }

            BridgeMessage::RequestVerification { batch_id } => {
                let applied = self.applied_batches.lock().get(&batch_id).cloned();
                match applied {
                    Some(applied_fields) => vec![Envelope::new(
                        BridgeMessage::VerificationResponse {
                            batch_id,
                            applied_fields,
                        },
                        &self.source,
                    )],
                    // Never seen the batch: stay silent so the authority
                    // escalates instead of trusting a hollow ack.
                    None => {
                        tracing::warn!(batch_id, "verification requested for unseen batch");
                        Vec::new()
                    }
                }
            }

            BridgeMessage::ForceRefresh { batch_id } => {
                tracing::info!(batch_id, "hard refresh instructed");
                self.surface.hard_reload();
                Vec::new()
            }

            other => {
                tracing::debug!(message = ?other, "ignoring authority-bound message on embedded side");
                Vec::new()
            }
        }
    }

    fn apply_saved(&self, batch_id: &str, changes: &[FieldChange]) {
        let values: BTreeMap<String, String> = changes
            .iter()
            .map(|c| (c.field_name.clone(), c.field_value.clone()))
            .collect();

        if let Err(error) = self.cache.merge(&values, SOURCE_SAVE_BROADCAST) {
            tracing::warn!(%error, "failed to persist saved changes to cache");
        }
        for (name, value) in &values {
            self.surface.apply_field(name, value);
        }

        self.applied_batches
            .lock()
            .insert(batch_id.to_string(), values.keys().cloned().collect());
        tracing::info!(batch_id, fields = values.len(), "applied saved change set");
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::FieldType;
    use tempfile::TempDir;

    const ORIGIN: &str = "https://admin.example";

    #[derive(Default)]
    struct RecordingSurface {
        applied: Mutex<Vec<(String, String)>>,
        edit_mode: AtomicBool,
        reverted: AtomicBool,
        reloaded: AtomicBool,
    }

    impl EditSurface for RecordingSurface {
        fn apply_field(&self, field_name: &str, value: &str) {
            self.applied
                .lock()
                .push((field_name.to_string(), value.to_string()));
        }
        fn set_edit_mode(&self, enabled: bool) {
            self.edit_mode.store(enabled, Ordering::SeqCst);
        }
        fn revert_unsaved(&self) {
            self.reverted.store(true, Ordering::SeqCst);
        }
        fn hard_reload(&self) {
            self.reloaded.store(true, Ordering::SeqCst);
        }
    }

    struct Fixture {
        bridge: EmbeddedBridge,
        surface: Arc<RecordingSurface>,
        _tmp: TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let cache = LocalContentCache::open(tmp.path().join("cache.json"));
        let surface = Arc::new(RecordingSurface::default());
        let bridge = EmbeddedBridge::new(
            OriginGuard::new(&[ORIGIN.to_string()]),
            cache,
            surface.clone(),
            "embedded-app",
        );
        Fixture {
            bridge,
            surface,
            _tmp: tmp,
        }
    }

    fn apply_envelope(batch_id: &str, pairs: &[(&str, &str)]) -> String {
        Envelope::new(
            BridgeMessage::ApplySavedChanges {
                batch_id: batch_id.to_string(),
                changes: pairs
                    .iter()
                    .map(|(name, value)| FieldChange {
                        field_name: (*name).to_string(),
                        field_value: (*value).to_string(),
                        field_type: FieldType::Text,
                    })
                    .collect(),
            },
            "authority",
        )
        .encode()
    }

    #[test]
    fn applies_saved_changes_to_cache_and_surface() {
        let f = fixture();
        let out = f.bridge.handle(ORIGIN, &apply_envelope("b1", &[("title", "Hello")]));
        assert!(out.is_empty());
        assert_eq!(f.bridge.cache().get("title").as_deref(), Some("Hello"));
        assert_eq!(
            f.surface.applied.lock().as_slice(),
            &[("title".to_string(), "Hello".to_string())]
        );
    }

    #[test]
    fn duplicate_apply_is_idempotent() {
        let f = fixture();
        let raw = apply_envelope("b1", &[("title", "Hello")]);
        f.bridge.handle(ORIGIN, &raw);
        let values_after_first = f.bridge.cache().values();
        f.bridge.handle(ORIGIN, &raw);

        assert_eq!(f.bridge.cache().values(), values_after_first);
        // The surface saw an assignment twice, with the same value both times.
        let applied = f.surface.applied.lock();
        assert!(applied.iter().all(|(_, v)| v == "Hello"));
    }

    #[test]
    fn verification_echoes_applied_fields() {
        let f = fixture();
        f.bridge
            .handle(ORIGIN, &apply_envelope("b1", &[("title", "x"), ("tagline", "y")]));

        let request = Envelope::new(
            BridgeMessage::RequestVerification {
                batch_id: "b1".into(),
            },
            "authority",
        );
        let out = f.bridge.handle(ORIGIN, &request.encode());
        assert_eq!(out.len(), 1);
        match &out[0].message {
            BridgeMessage::VerificationResponse {
                batch_id,
                applied_fields,
            } => {
                assert_eq!(batch_id, "b1");
                assert_eq!(
                    applied_fields,
                    &vec!["tagline".to_string(), "title".to_string()]
                );
            }
            other => panic!("expected verification response, got {other:?}"),
        }
    }

    #[test]
    fn verification_for_unseen_batch_stays_silent() {
        let f = fixture();
        let request = Envelope::new(
            BridgeMessage::RequestVerification {
                batch_id: "never-applied".into(),
            },
            "authority",
        );
        assert!(f.bridge.handle(ORIGIN, &request.encode()).is_empty());
    }

    #[test]
    fn foreign_origin_never_mutates_cache() {
        let f = fixture();
        let out = f
            .bridge
            .handle("https://evil.example", &apply_envelope("b1", &[("title", "owned")]));
        assert!(out.is_empty());
        assert!(f.bridge.cache().is_empty());
        assert!(f.surface.applied.lock().is_empty());
    }

    #[test]
    fn edit_mode_toggles_through_surface() {
        let f = fixture();
        let enable = Envelope::new(BridgeMessage::EnableEditMode, "authority");
        f.bridge.handle(ORIGIN, &enable.encode());
        assert!(f.bridge.edit_mode());
        assert!(f.surface.edit_mode.load(Ordering::SeqCst));

        let disable = Envelope::new(BridgeMessage::DisableEditMode { discard: false }, "authority");
        f.bridge.handle(ORIGIN, &disable.encode());
        assert!(!f.bridge.edit_mode());
        assert!(!f.surface.reverted.load(Ordering::SeqCst));
    }

    #[test]
    fn discard_reverts_and_rerenders_known_good_values() {
        let f = fixture();
        f.bridge.handle(ORIGIN, &apply_envelope("b1", &[("title", "good")]));
        f.surface.applied.lock().clear();

        let discard = Envelope::new(BridgeMessage::DisableEditMode { discard: true }, "authority");
        f.bridge.handle(ORIGIN, &discard.encode());

        assert!(f.surface.reverted.load(Ordering::SeqCst));
        assert_eq!(
            f.surface.applied.lock().as_slice(),
            &[("title".to_string(), "good".to_string())]
        );
    }

    #[test]
    fn force_refresh_reloads_through_capability() {
        let f = fixture();
        let refresh = Envelope::new(
            BridgeMessage::ForceRefresh {
                batch_id: "b1".into(),
            },
            "authority",
        );
        f.bridge.handle(ORIGIN, &refresh.encode());
        assert!(f.surface.reloaded.load(Ordering::SeqCst));
    }

    #[test]
    fn noop_surface_never_crashes_the_flow() {
        let tmp = TempDir::new().unwrap();
        let bridge = EmbeddedBridge::new(
            OriginGuard::new(&[ORIGIN.to_string()]),
            LocalContentCache::open(tmp.path().join("cache.json")),
            Arc::new(NoopSurface),
            "embedded-app",
        );
        bridge.handle(ORIGIN, &apply_envelope("b1", &[("title", "x")]));
        let refresh = Envelope::new(
            BridgeMessage::ForceRefresh {
                batch_id: "b1".into(),
            },
            "authority",
        );
        bridge.handle(ORIGIN, &refresh.encode());
        // Cache still tracked the change even with no document attached.
        assert_eq!(bridge.cache().get("title").as_deref(), Some("x"));
    }

    #[test]
    fn hydrate_prefers_live_fetch_over_cache() {
        let f = fixture();
        f.bridge.handle(ORIGIN, &apply_envelope("b1", &[("title", "stale")]));
        f.surface.applied.lock().clear();

        let mut live = BTreeMap::new();
        live.insert("title".to_string(), "fresh".to_string());
        f.bridge.hydrate(Some(&live)).unwrap();

        assert_eq!(f.bridge.cache().get("title").as_deref(), Some("fresh"));
        assert_eq!(
            f.surface.applied.lock().as_slice(),
            &[("title".to_string(), "fresh".to_string())]
        );
    }

    #[test]
    fn ready_announcement_carries_edit_mode() {
        let f = fixture();
        let env = f.bridge.ready_announcement();
        assert_eq!(
            env.message,
            BridgeMessage::ReadyAnnounce { edit_mode: false }
        );
        assert_eq!(env.source, "embedded-app");
    }
}
