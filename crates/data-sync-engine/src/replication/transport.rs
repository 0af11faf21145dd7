// File: src/replication/transport.rs
//
// Replication transports: in-memory delivery for embedded and test
// deployments, HTTP delivery for real regions

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{ReplicationMessage, ReplicationTransport, TransportError};

/// Delivers messages into an in-process buffer. Failure injection makes it
/// double as the test transport.
pub struct InMemoryTransport {
    region: String,
    delivered: Arc<Mutex<Vec<ReplicationMessage>>>,
    reject_all: AtomicBool,
    reject_next: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            delivered: Arc::new(Mutex::new(Vec::new())),
            reject_all: AtomicBool::new(false),
            reject_next: AtomicUsize::new(0),
        }
    }

    /// Messages acknowledged so far, in delivery order.
    pub async fn delivered(&self) -> Vec<ReplicationMessage> {
        self.delivered.lock().await.clone()
    }

    pub async fn delivered_count(&self) -> usize {
        self.delivered.lock().await.len()
    }

    /// Reject every send until cleared.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.reject_all.store(rejecting, Ordering::SeqCst);
    }

    /// Reject exactly the next `count` sends.
    pub fn reject_next(&self, count: usize) {
        self.reject_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReplicationTransport for InMemoryTransport {
    fn region(&self) -> &str {
        &self.region
    }

    async fn send(&self, message: ReplicationMessage) -> Result<(), TransportError> {
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                message: format!("region {} rejecting all messages", self.region),
            });
        }
        let remaining = self.reject_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.reject_next.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Rejected {
                message: format!("region {} rejected message", self.region),
            });
        }
        self.delivered.lock().await.push(message);
        Ok(())
    }
}

/// Delivers messages to a region endpoint over HTTP.
pub struct HttpTransport {
    region: String,
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        region: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            region: region.into(),
            endpoint: endpoint.into(),
            client,
            timeout,
        })
    }
}

#[async_trait]
impl ReplicationTransport for HttpTransport {
    fn region(&self) -> &str {
        &self.region
    }

    async fn send(&self, message: ReplicationMessage) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    TransportError::Network {
                        message: e.to_string(),
                    }
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected {
                message: format!("target responded {}", response.status()),
            })
        }
    }
}
