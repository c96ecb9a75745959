//! Cross-origin bridge channel between the content authority and the
//! embedded frontend.
//!
//! The two sides run in independent event-loop contexts with no shared
//! memory; everything crosses this channel as a typed, timestamped
//! envelope. The channel itself guarantees nothing (messages may be
//! dropped, duplicated, or reordered), so every handler on either side
//! must be idempotent.
//!
//! - [`envelope`]: the message set and the three-way decode
//! - [`origin`]: the allow-list guard and best-effort fan-out delivery

pub mod envelope;
pub mod origin;

pub use envelope::{decode, BridgeMessage, Envelope, Inbound, MESSAGE_PREFIX};
pub use origin::{normalize_origin, BridgeSender, ChannelTransport, FrameTransport, OriginGuard};
