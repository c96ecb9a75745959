//! Origin allow-list guard and fan-out delivery.
//!
//! The receiving context's exact origin cannot be introspected across the
//! boundary, so the sender broadcasts to every origin on an explicit
//! allow-list and the guard on the other side filters. The allow-list is
//! never a wildcard: a message from an origin outside it is dropped before
//! any handler runs, whatever its `type` or payload.

use crate::bridge::envelope::{decode, BridgeMessage, Envelope, Inbound};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

/// Reduce an origin string to canonical `scheme://host[:port]` form.
///
/// Default ports and trailing slashes are dropped so config entries and
/// runtime origins compare equal. Non-http(s) schemes are rejected.
pub fn normalize_origin(origin: &str) -> Option<String> {
    let url = Url::parse(origin.trim()).ok()?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// Inbound security boundary: origin filter plus envelope decode.
#[derive(Debug)]
pub struct OriginGuard {
    allowed: Vec<String>,
    denied: AtomicU64,
}

impl OriginGuard {
    /// Build a guard from configured origins. Entries that fail to
    /// normalize are dropped with a warning rather than silently matched.
    pub fn new(origins: &[String]) -> Self {
        let mut allowed = Vec::new();
        for entry in origins {
            match normalize_origin(entry) {
                Some(o) => allowed.push(o),
                None => tracing::warn!(origin = %entry, "ignoring unparseable allowed origin"),
            }
        }
        Self {
            allowed,
            denied: AtomicU64::new(0),
        }
    }

    /// The normalized allow-list (fan-out targets for the sending side).
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed
    }

    /// Whether an origin is on the allow-list.
    pub fn permits(&self, origin: &str) -> bool {
        match normalize_origin(origin) {
            Some(o) => self.allowed.iter().any(|a| *a == o),
            None => false,
        }
    }

    /// Single entry point for inbound traffic. Returns the envelope only
    /// when the origin is allowed and the message decodes to a recognized
    /// type; everything else is dropped here.
    pub fn accept(&self, origin: &str, raw: &str) -> Option<Envelope> {
        if !self.permits(origin) {
            self.denied.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%origin, "dropping message from disallowed origin");
            return None;
        }
        match decode(raw) {
            Inbound::Message(envelope) => Some(*envelope),
            Inbound::Unrecognized { kind } => {
                tracing::debug!(%origin, kind, "ignoring unrecognized message type");
                None
            }
            Inbound::Malformed => {
                tracing::warn!(%origin, "ignoring malformed bridge message");
                None
            }
        }
    }

    /// Messages dropped by the origin filter since startup.
    pub fn denied_count(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }
}

/// One-way delivery into a frame context at a given origin.
///
/// The channel has no delivery, ordering, or exactly-once guarantees;
/// implementations surface per-attempt failures and nothing more.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn deliver(&self, origin: &str, raw: String) -> anyhow::Result<()>;
}

/// Fan-out sender: one envelope, every allowed origin.
///
/// Per-origin failures are logged and swallowed; the receiving side's
/// guard discards deliveries to origins that were never listening.
pub struct BridgeSender {
    transport: Arc<dyn FrameTransport>,
    origins: Vec<String>,
    source: String,
}

impl BridgeSender {
    pub fn new(transport: Arc<dyn FrameTransport>, guard: &OriginGuard, source: &str) -> Self {
        Self {
            transport,
            origins: guard.allowed_origins().to_vec(),
            source: source.to_string(),
        }
    }

    /// Broadcast a message to every allowed origin.
    pub async fn broadcast(&self, message: BridgeMessage) {
        let raw = Envelope::new(message, &self.source).encode();
        for origin in &self.origins {
            if let Err(error) = self.transport.deliver(origin, raw.clone()).await {
                tracing::warn!(%origin, %error, "bridge delivery failed");
            }
        }
    }
}

/// In-memory transport backed by an unbounded channel. Used by tests and
/// same-process wiring; each delivery is surfaced as `(origin, raw)`.
pub struct ChannelTransport {
    tx: tokio::sync::mpsc::UnboundedSender<(String, String)>,
}

impl ChannelTransport {
    pub fn pair() -> (
        Arc<Self>,
        tokio::sync::mpsc::UnboundedReceiver<(String, String)>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl FrameTransport for ChannelTransport {
    async fn deliver(&self, origin: &str, raw: String) -> anyhow::Result<()> {
        self.tx
            .send((origin.to_string(), raw))
            .map_err(|_| anyhow::anyhow!("channel closed"))
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> OriginGuard {
        OriginGuard::new(&[
            "https://site.example".to_string(),
            "https://staging.example:8443/".to_string(),
        ])
    }

    #[test]
    fn normalizes_default_port_and_trailing_slash() {
        assert_eq!(
            normalize_origin("https://site.example:443/").as_deref(),
            Some("https://site.example")
        );
        assert_eq!(
            normalize_origin("http://localhost:3000").as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(normalize_origin("javascript:alert(1)"), None);
        assert_eq!(normalize_origin("not an origin"), None);
    }

    #[test]
    fn permits_only_listed_origins() {
        let g = guard();
        assert!(g.permits("https://site.example"));
        assert!(g.permits("https://site.example:443"));
        assert!(g.permits("https://staging.example:8443"));
        assert!(!g.permits("https://evil.example"));
        assert!(!g.permits("http://site.example")); // scheme matters
    }

    #[test]
    fn accept_drops_disallowed_origin_regardless_of_type() {
        let g = guard();
        let env = Envelope::new(BridgeMessage::EnableEditMode, "authority");
        assert!(g.accept("https://evil.example", &env.encode()).is_none());
        assert_eq!(g.denied_count(), 1);
    }

    #[test]
    fn accept_passes_allowed_origin() {
        let g = guard();
        let env = Envelope::new(BridgeMessage::EnableEditMode, "authority");
        let got = g.accept("https://site.example", &env.encode());
        assert!(matches!(
            got.map(|e| e.message),
            Some(BridgeMessage::EnableEditMode)
        ));
    }

    #[test]
    fn accept_ignores_unrecognized_and_malformed() {
        let g = guard();
        assert!(g
            .accept("https://site.example", r#"{"type":"other-thing"}"#)
            .is_none());
        assert!(g.accept("https://site.example", "junk").is_none());
        // Neither counts as an origin denial.
        assert_eq!(g.denied_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_fans_out_to_every_origin() {
        let g = guard();
        let (transport, mut rx) = ChannelTransport::pair();
        let sender = BridgeSender::new(transport, &g, "authority");

        sender.broadcast(BridgeMessage::EnableEditMode).await;

        let (first, _) = rx.recv().await.unwrap();
        let (second, _) = rx.recv().await.unwrap();
        let mut got = vec![first, second];
        got.sort();
        assert_eq!(
            got,
            vec![
                "https://site.example".to_string(),
                "https://staging.example:8443".to_string()
            ]
        );
    }
}
