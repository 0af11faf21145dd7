// File: src/adapters/http.rs
//
// External API adapter
// 5xx and connection failures are transient; 4xx responses are permanent

use async_trait::async_trait;
use std::time::Duration;

use data_sync_core::adapter::{AdapterError, AdapterKind, ApplyOp, SyncAdapter, SyncEventKind};
use data_sync_core::payload::Payload;

/// Pushes entity mutations to an external REST-style API.
///
/// Conventions: `PUT {base}/{entity_type}/{entity_id}` for create/update,
/// `DELETE` for deletes, `GET` for reads, `GET {base}/{entity_type}` for id
/// listings.
pub struct HttpApiAdapter {
    name: String,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpApiAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Network {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    fn entity_url(&self, entity_type: &str, entity_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, entity_type, entity_id)
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> AdapterError {
        if status.is_server_error() {
            AdapterError::Unavailable {
                message: format!("{}: {}", status, body),
            }
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            AdapterError::Unauthorized {
                message: format!("{}: {}", status, body),
            }
        } else if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            AdapterError::SchemaRejected {
                message: format!("{}: {}", status, body),
            }
        } else {
            AdapterError::InvalidPayload {
                message: format!("{}: {}", status, body),
            }
        }
    }

    fn classify_send_error(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AdapterError::Network {
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl SyncAdapter for HttpApiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::ExternalApi
    }

    async fn apply(&self, op: ApplyOp<'_>) -> Result<(), AdapterError> {
        let url = self.entity_url(op.entity_type, op.entity_id);
        let request = match op.kind {
            SyncEventKind::Create | SyncEventKind::Update | SyncEventKind::BulkUpdate => {
                self.client.put(&url).json(&op.payload.to_json())
            }
            SyncEventKind::Delete => self.client.delete(&url),
        };

        let response = request
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Self::classify_status(status, body))
        }
    }

    async fn read(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Payload>, AdapterError> {
        let url = self.entity_url(entity_type, entity_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }
        let json: serde_json::Value = response.json().await.map_err(|e| {
            AdapterError::Serialization {
                message: format!("invalid JSON from {}: {}", url, e),
            }
        })?;
        Ok(Some(Payload::from_json(&json)))
    }

    async fn list_ids(&self, entity_type: &str) -> Result<Vec<String>, AdapterError> {
        let url = format!("{}/{}", self.base_url, entity_type);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }
        let ids: Vec<String> = response.json().await.map_err(|e| {
            AdapterError::Serialization {
                message: format!("invalid id listing from {}: {}", url, e),
            }
        })?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = HttpApiAdapter::classify_status(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            String::new(),
        );
        assert!(err.is_transient());
    }

    #[test]
    fn auth_and_validation_errors_are_permanent() {
        let unauthorized =
            HttpApiAdapter::classify_status(reqwest::StatusCode::FORBIDDEN, String::new());
        assert!(!unauthorized.is_transient());

        let schema = HttpApiAdapter::classify_status(
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            String::new(),
        );
        assert!(matches!(schema, AdapterError::SchemaRejected { .. }));
    }
}
