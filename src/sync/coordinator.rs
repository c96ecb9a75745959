//! Sync Coordinator: drives one save operation end to end.
//!
//! The coordinator owns the path from staged edits to a verified,
//! observed change on the embedded side:
//!
//! - Drain the ledger and persist the batch through [`PersistClient`],
//!   retrying transport failures up to the attempt cap.
//! - On (at least partial) persistence, broadcast the saved change set to
//!   every allowed origin and ask the embedded app to echo what it
//!   applied.
//! - On silence, escalate: broadcast a hard-refresh instruction, and if
//!   even that goes unacknowledged, rewrite the frame source through the
//!   [`FrameReload`] capability with a cache-busting parameter.
//!
//! The ledger is cleared per field and only on confirmed persistence;
//! a failed save leaves every staged edit in place, and the operator
//! always sees an explicit error instead of a silent drop.

use crate::bridge::{BridgeMessage, BridgeSender, OriginGuard};
use crate::content::BatchResult;
use crate::ledger::{ChangeLedger, FieldChange};
use crate::sync::client::{ClientError, PersistClient};
use crate::sync::retry::{run_with_retry, RetryPolicy};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Phases of one save operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No save in progress.
    Idle,
    /// Persisting the batch at the gateway.
    Saving,
    /// A transport failure occurred; waiting to re-attempt the save.
    Retrying,
    /// The gateway stored at least one field.
    Persisted,
    /// Broadcasting the saved change set to the embedded app.
    Notifying,
    /// Waiting for the embedded app's acknowledgment.
    Verifying,
    /// No acknowledgment arrived; hard-refresh instruction issued.
    ForcedRefresh,
    /// The change set was persisted and observed (or force-reloaded).
    Done,
    /// The save could not be persisted; the ledger is untouched.
    Failed,
}

/// Progress snapshot for UI display.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub batch_id: Option<String>,
    pub attempt: u32,
    pub staged_fields: usize,
}

/// Timing knobs for the notify/verify/escalate sequence.
#[derive(Debug, Clone, Copy)]
pub struct SyncTimings {
    /// Pause between broadcasting changes and requesting verification,
    /// giving the embedded app time to apply them.
    pub notify_delay: Duration,
    /// How long to wait for one verification response.
    pub verify_timeout: Duration,
    /// How many times to re-request verification before escalating.
    pub verify_requests: u32,
    /// How long to wait for a sign of life after a forced refresh.
    pub refresh_timeout: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            notify_delay: Duration::from_millis(250),
            verify_timeout: Duration::from_secs(3),
            verify_requests: 2,
            refresh_timeout: Duration::from_secs(4),
        }
    }
}

/// Why a save operation failed outright.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no staged changes to save")]
    NothingStaged,
    #[error("save failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ClientError },
    #[error("gateway rejected the batch: {0}")]
    Rejected(ClientError),
    #[error("no field in the batch passed validation")]
    NoFieldsSaved { result: BatchResult },
}

/// Final report of one save operation.
#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub batch_id: String,
    pub result: BatchResult,
    pub attempts: u32,
    /// The embedded app acknowledged the change set.
    pub verified: bool,
    /// The forced-refresh path was taken.
    pub escalated: bool,
}

/// Last-resort capability: rewrite the embedded frame's source with a
/// cache-busting parameter. Present only where the frame element can be
/// reached; everywhere else the no-op fallback keeps the flow alive.
pub trait FrameReload: Send + Sync {
    fn reload(&self, cache_bust: &str);
}

/// Fallback used when the frame cannot be touched from this context.
pub struct NoopReload;

impl FrameReload for NoopReload {
    fn reload(&self, cache_bust: &str) {
        tracing::warn!(cache_bust, "frame reload requested but no frame handle is available");
    }
}

/// An acknowledgment that resolves a pending verification.
#[derive(Debug, Clone)]
enum AckKind {
    /// Explicit verification response naming the batch.
    Verified { applied_fields: Vec<String> },
    /// The embedded app re-announced readiness (post-reload boot).
    Ready,
}

/// Rendezvous slot for the acknowledgment of one batch.
struct PendingAck {
    batch_id: String,
    slot: Mutex<Option<AckKind>>,
    notify: Notify,
}

impl PendingAck {
    fn new(batch_id: &str) -> Arc<Self> {
        Arc::new(Self {
            batch_id: batch_id.to_string(),
            slot: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    fn resolve(&self, ack: AckKind) {
        *self.slot.lock() = Some(ack);
        self.notify.notify_one();
    }

    async fn wait(&self, timeout: Duration) -> Option<AckKind> {
        if let Some(ack) = self.slot.lock().take() {
            return Some(ack);
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.slot.lock().take()
    }
}

#[derive(Debug)]
struct CoordinatorState {
    phase: SyncPhase,
    batch_id: Option<String>,
    attempt: u32,
}

/// Orchestrates saves for a single editing session.
pub struct SyncCoordinator {
    ledger: Arc<Mutex<ChangeLedger>>,
    client: Arc<dyn PersistClient>,
    sender: BridgeSender,
    guard: OriginGuard,
    timings: SyncTimings,
    retry: RetryPolicy,
    reload: Arc<dyn FrameReload>,
    state: Mutex<CoordinatorState>,
    pending: Mutex<Option<Arc<PendingAck>>>,
}

impl SyncCoordinator {
    pub fn new(
        ledger: Arc<Mutex<ChangeLedger>>,
        client: Arc<dyn PersistClient>,
        sender: BridgeSender,
        guard: OriginGuard,
        timings: SyncTimings,
        retry: RetryPolicy,
        reload: Arc<dyn FrameReload>,
    ) -> Self {
        Self {
            ledger,
            client,
            sender,
            guard,
            timings,
            retry,
            reload,
            state: Mutex::new(CoordinatorState {
                phase: SyncPhase::Idle,
                batch_id: None,
                attempt: 0,
            }),
            pending: Mutex::new(None),
        }
    }

    /// Current progress for UI display.
    pub fn progress(&self) -> SyncProgress {
        let state = self.state.lock();
        SyncProgress {
            phase: state.phase,
            batch_id: state.batch_id.clone(),
            attempt: state.attempt,
            staged_fields: self.ledger.lock().len(),
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.state.lock().phase = phase;
    }

    // ── Inbound Message Dispatch ────────────────────────────────

    /// Handle one raw message from the channel. Only origin-approved,
    /// recognized envelopes get past the guard; everything relevant to
    /// the controller side is dispatched here.
    pub fn handle_inbound(&self, origin: &str, raw: &str) {
        let Some(envelope) = self.guard.accept(origin, raw) else {
            return;
        };

        match envelope.message {
            BridgeMessage::FieldChanged { change } => {
                tracing::debug!(field = %change.field_name, "staging operator edit");
                self.ledger.lock().stage_change(change);
            }
            BridgeMessage::VerificationResponse {
                batch_id,
                applied_fields,
            } => {
                let pending = self.pending.lock();
                match pending.as_ref() {
                    Some(p) if p.batch_id == batch_id => {
                        p.resolve(AckKind::Verified { applied_fields });
                    }
                    _ => {
                        tracing::debug!(batch_id, "verification response for no pending batch");
                    }
                }
            }
            BridgeMessage::ReadyAnnounce { .. } => {
                // A fresh boot after a forced refresh counts as a sign of
                // life; the app fetches current content on startup.
                if let Some(p) = self.pending.lock().as_ref() {
                    p.resolve(AckKind::Ready);
                }
            }
            other => {
                tracing::debug!(message = ?other, "ignoring embedded-bound message on controller side");
            }
        }
    }

    // ── Edit Session Controls ───────────────────────────────────

    /// Turn the embedded app's edit affordances on.
    pub async fn enable_editing(&self) {
        self.sender.broadcast(BridgeMessage::EnableEditMode).await;
    }

    /// Turn edit affordances off without touching staged state.
    pub async fn disable_editing(&self) {
        self.sender
            .broadcast(BridgeMessage::DisableEditMode { discard: false })
            .await;
    }

    /// "Undo all changes": clear the ledger and instruct the embedded app
    /// to revert any unsaved visual edits to its last known-good values.
    pub async fn discard_all(&self) {
        self.ledger.lock().clear();
        self.sender
            .broadcast(BridgeMessage::DisableEditMode { discard: true })
            .await;
    }

    // ── Save Pipeline ───────────────────────────────────────────

    /// Persist every staged change, notify the embedded app, and verify
    /// the change set was observed.
    pub async fn save(&self, trigger_rebuild: bool) -> Result<SaveReport, SyncError> {
        let changes = self.ledger.lock().drain();
        if changes.is_empty() {
            return Err(SyncError::NothingStaged);
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        {
            let mut state = self.state.lock();
            state.phase = SyncPhase::Saving;
            state.batch_id = Some(batch_id.clone());
            state.attempt = 0;
        }

        let (result, attempts) = match self.persist_with_retry(&changes, trigger_rebuild).await {
            Ok(ok) => ok,
            Err(error) => {
                self.set_phase(SyncPhase::Failed);
                let attempts = self.state.lock().attempt;
                tracing::error!(%error, attempts, "save failed; staged edits preserved");
                return Err(match error {
                    e if e.is_transport() => SyncError::Exhausted { attempts, last: e },
                    e => SyncError::Rejected(e),
                });
            }
        };

        if result.saved_count == 0 {
            // Every field was invalid. Nothing to notify; the operator
            // re-edits and the ledger still holds each field.
            self.set_phase(SyncPhase::Failed);
            return Err(SyncError::NoFieldsSaved { result });
        }
        self.set_phase(SyncPhase::Persisted);

        // Confirmed persistence: release saved fields from the ledger.
        // Failed fields stay staged for the operator to fix.
        {
            let mut ledger = self.ledger.lock();
            for outcome in &result.per_field {
                if outcome.saved {
                    ledger.remove(&outcome.field_name);
                }
            }
        }

        let saved_changes = saved_changes(&changes, &result);
        let pending = PendingAck::new(&batch_id);
        *self.pending.lock() = Some(pending.clone());

        self.set_phase(SyncPhase::Notifying);
        self.sender
            .broadcast(BridgeMessage::ApplySavedChanges {
                batch_id: batch_id.clone(),
                changes: saved_changes,
            })
            .await;
        tokio::time::sleep(self.timings.notify_delay).await;

        self.set_phase(SyncPhase::Verifying);
        let (verified, escalated) = self.verify_or_escalate(&batch_id, &pending).await;

        *self.pending.lock() = None;
        self.set_phase(SyncPhase::Done);
        Ok(SaveReport {
            batch_id,
            result,
            attempts,
            verified,
            escalated,
        })
    }

    async fn persist_with_retry(
        &self,
        changes: &[FieldChange],
        trigger_rebuild: bool,
    ) -> Result<(BatchResult, u32), ClientError> {
        let result = run_with_retry(
            self.retry,
            "save-batch",
            ClientError::is_transport,
            |attempt| {
                {
                    let mut state = self.state.lock();
                    state.attempt = attempt;
                    state.phase = if attempt == 1 {
                        SyncPhase::Saving
                    } else {
                        SyncPhase::Retrying
                    };
                }
                let client = self.client.clone();
                async move { client.save_batch(changes, trigger_rebuild).await }
            },
        )
        .await?;
        let attempts = self.state.lock().attempt;
        Ok((result, attempts))
    }

    /// Request verification (re-asking a bounded number of times), then
    /// escalate through forced refresh down to the frame-reload
    /// capability. Returns `(verified, escalated)`.
    async fn verify_or_escalate(&self, batch_id: &str, pending: &Arc<PendingAck>) -> (bool, bool) {
        let verify = run_with_retry(
            RetryPolicy::new(self.timings.verify_requests, Duration::ZERO),
            "verify",
            |_: &VerifySilence| true,
            |_| {
                let pending = pending.clone();
                let batch_id = batch_id.to_string();
                async move {
                    self.sender
                        .broadcast(BridgeMessage::RequestVerification { batch_id })
                        .await;
                    match pending.wait(self.timings.verify_timeout).await {
                        Some(ack) => Ok(ack),
                        None => Err(VerifySilence),
                    }
                }
            },
        )
        .await;

        if let Ok(AckKind::Verified { applied_fields }) = &verify {
            tracing::info!(
                batch_id,
                applied = applied_fields.len(),
                "embedded app verified change set"
            );
            return (true, false);
        }
        if verify.is_ok() {
            // A bare ready-announce during verification: the app reloaded
            // on its own and will fetch fresh content.
            return (true, false);
        }

        tracing::warn!(batch_id, "no verification response; forcing refresh");
        self.set_phase(SyncPhase::ForcedRefresh);
        self.sender
            .broadcast(BridgeMessage::ForceRefresh {
                batch_id: batch_id.to_string(),
            })
            .await;

        match pending.wait(self.timings.refresh_timeout).await {
            Some(_) => {
                tracing::info!(batch_id, "embedded app came back after forced refresh");
                (true, true)
            }
            None => {
                // Last resort: rewrite the frame source so the next paint
                // cannot come from a stale cache.
                let cache_bust = format!("reload={batch_id}");
                tracing::warn!(batch_id, "forced refresh unacknowledged; reloading frame");
                self.reload.reload(&cache_bust);
                (false, true)
            }
        }
    }
}

/// Marker error for a verification window that elapsed in silence.
#[derive(Debug)]
struct VerifySilence;

impl std::fmt::Display for VerifySilence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("verification window elapsed")
    }
}

/// The subset of a drained batch that actually persisted, carrying the
/// gateway's sanitized values.
fn saved_changes(changes: &[FieldChange], result: &BatchResult) -> Vec<FieldChange> {
    let by_name: HashMap<&str, &FieldChange> = changes
        .iter()
        .map(|c| (c.field_name.as_str(), c))
        .collect();

    result
        .per_field
        .iter()
        .filter(|outcome| outcome.saved)
        .filter_map(|outcome| {
            by_name.get(outcome.field_name.as_str()).map(|original| FieldChange {
                field_name: outcome.field_name.clone(),
                field_value: outcome
                    .value
                    .clone()
                    .unwrap_or_else(|| original.field_value.clone()),
                field_type: original.field_type,
            })
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────
