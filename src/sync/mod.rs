//! Save orchestration between the authority and the embedded app.
//!
//! The bridge channel offers no delivery, ordering, or exactly-once
//! guarantees, so a durable write is not enough; the coordinator drives
//! save → notify → verify and escalates to a forced refresh when the
//! embedded side stays silent. This module adds:
//!
//! - The shared retry/backoff primitive
//! - The persistence-gateway client seam
//! - The sync coordinator (per-save state machine)

pub mod client;
pub mod coordinator;
pub mod retry;

pub use client::{ClientError, HttpGatewayClient, PersistClient};
pub use coordinator::{
    FrameReload, NoopReload, SaveReport, SyncCoordinator, SyncError, SyncPhase, SyncProgress,
    SyncTimings,
};
pub use retry::{run_with_retry, RetryPolicy};
