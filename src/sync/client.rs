//! Client side of the persistence gateway.
//!
//! The coordinator talks to the gateway through the [`PersistClient`]
//! trait so tests can script outcomes. The HTTP implementation maps
//! failures into two camps: transport errors (retryable) and rejections
//! the gateway actually issued (terminal; retrying an auth failure or a
//! structural error changes nothing).

use crate::content::BatchResult;
use crate::ledger::FieldChange;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Why a save attempt against the gateway failed.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Network/channel failure; the request may never have arrived.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The gateway received the request and said no.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl ClientError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

/// Seam between the coordinator and the persistence gateway.
#[async_trait]
pub trait PersistClient: Send + Sync {
    async fn save_batch(
        &self,
        changes: &[FieldChange],
        trigger_rebuild: bool,
    ) -> Result<BatchResult, ClientError>;
}

#[derive(Serialize)]
struct SaveBatchBody<'a> {
    changes: &'a [FieldChange],
    trigger_rebuild: bool,
}

/// reqwest-backed gateway client authenticating with the capability key.
pub struct HttpGatewayClient {
    http: reqwest::Client,
    base_url: String,
    capability_key: Option<String>,
}

impl HttpGatewayClient {
    pub fn new(base_url: &str, capability_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            capability_key,
        }
    }

    /// Fetch the authority's current field values (public read path).
    pub async fn fetch_content(
        &self,
    ) -> Result<std::collections::BTreeMap<String, String>, ClientError> {
        let url = format!("{}/content", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message: "content read failed".to_string(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let mut values = std::collections::BTreeMap::new();
        if let Some(map) = body.as_object() {
            for (key, value) in map {
                if key == "_metadata" {
                    continue;
                }
                if let Some(s) = value.as_str() {
                    values.insert(key.clone(), s.to_string());
                }
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl PersistClient for HttpGatewayClient {
    async fn save_batch(
        &self,
        changes: &[FieldChange],
        trigger_rebuild: bool,
    ) -> Result<BatchResult, ClientError> {
        let url = format!("{}/content/save-batch", self.base_url);
        let mut request = self.http.post(&url).json(&SaveBatchBody {
            changes,
            trigger_rebuild,
        });
        if let Some(key) = &self.capability_key {
            request = request.header("X-Capability-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        // 200 = full success, 207 = partial success; both carry a BatchResult.
        if status.is_success() {
            return response
                .json::<BatchResult>()
                .await
                .map_err(|e| ClientError::Transport(e.to_string()));
        }

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| "save rejected".to_string());

        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable_rejections_are_not() {
        assert!(ClientError::Transport("timeout".into()).is_transport());
        assert!(!ClientError::Rejected {
            status: 403,
            message: "invalid credentials".into()
        }
        .is_transport());
    }
}
