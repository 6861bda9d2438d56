//! Ingestion transport collaborator (spec §6 "Ingestion interface").

use crate::error::IngestionError;
use crate::record::Log;
use crate::retry::RetryConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A batch of records checked out under one id, ready to send.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: String,
    pub records: Vec<Log>,
}

/// Transport-level events the ingestion client reports out-of-band from a
/// `send` completion: pause/resume of the transport itself, and fatal
/// errors that should disable the whole group.
#[derive(Debug, Clone)]
pub enum IngestionEvent {
    Paused,
    Resumed,
    FatalError { message: String },
}

/// HTTP ingestion client contract (spec §6).
///
/// `send` reports its outcome asynchronously; recoverable failures are not
/// returned as an `Err` the channel must interpret on its own — the client
/// is expected to also emit [`IngestionEvent::Paused`] on its event stream
/// when it judges itself to have entered a paused state, matching the
/// source's `ingestionDidPause` delegate callback.
#[async_trait]
pub trait IngestionClient: Send + Sync {
    async fn is_ready_to_send(&self) -> bool;

    async fn send(&self, batch: Batch, token: Option<String>) -> Result<(), IngestionError>;

    /// Subscribe to pause/resume/fatal notifications. Each subscriber gets
    /// its own receiver; in practice a Channel Group subscribes exactly
    /// once.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<IngestionEvent>;
}

/// Default HTTP-based ingestion client.
///
/// Internally retries recoverable transport errors (network errors, 5xx)
/// a bounded number of times with jittered backoff before giving up on a
/// single `send` call and reporting [`IngestionEvent::Paused`]; the Channel
/// layer itself never retries a failed batch (spec Non-goals).
pub struct HttpIngestionClient {
    http: reqwest::Client,
    url: String,
    retry: RetryConfig,
    events_tx: mpsc::UnboundedSender<IngestionEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<IngestionEvent>>>,
}

impl HttpIngestionClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_retry(url, RetryConfig::default())
    }

    pub fn with_retry(url: impl Into<String>, retry: RetryConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            retry,
            events_tx: tx,
            events_rx: parking_lot::Mutex::new(Some(rx)),
        }
    }

    fn encode(batch: &Batch) -> Vec<u8> {
        batch
            .records
            .iter()
            .flat_map(|r| r.payload.iter().copied())
            .collect()
    }
}

#[async_trait]
impl IngestionClient for HttpIngestionClient {
    async fn is_ready_to_send(&self) -> bool {
        true
    }

    async fn send(&self, batch: Batch, token: Option<String>) -> Result<(), IngestionError> {
        let body = Self::encode(&batch);
        let mut attempt = 0u32;
        let mut delay = self.retry.initial_backoff;

        loop {
            let mut req = self.http.post(&self.url).body(body.clone());
            if let Some(token) = &token {
                req = req.bearer_auth(token);
            }

            let result = req.send().await;

            let outcome = match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if (200..300).contains(&status) {
                        Ok(())
                    } else {
                        let message = resp
                            .text()
                            .await
                            .unwrap_or_else(|_| "<unreadable body>".to_string());
                        Err(IngestionError::Http { status, message })
                    }
                }
                Err(e) => Err(IngestionError::from(e)),
            };

            match &outcome {
                Ok(()) => return outcome,
                Err(e) if e.is_recoverable() && self.retry.should_retry(attempt) => {
                    tokio::time::sleep(delay).await;
                    delay = self.retry.next_backoff(attempt, delay);
                    attempt += 1;
                    continue;
                }
                Err(e) if e.is_recoverable() => {
                    let _ = self.events_tx.send(IngestionEvent::Paused);
                    return outcome;
                }
                Err(_) => return outcome,
            }
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<IngestionEvent> {
        self.events_rx
            .lock()
            .take()
            .expect("HttpIngestionClient::subscribe called more than once")
    }
}

/// Convenience constructor for sharing an [`IngestionClient`] across a
/// Channel Group.
pub fn shared(client: impl IngestionClient + 'static) -> Arc<dyn IngestionClient> {
    Arc::new(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Log;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn batch() -> Batch {
        Batch {
            batch_id: "1".to_string(),
            records: vec![Log::new(bytes::Bytes::from_static(b"hello"))],
        }
    }

    #[tokio::test]
    async fn send_success_returns_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = HttpIngestionClient::new(format!("{}/ingest", server.uri()));
        let result = client.send(batch(), None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn send_non_recoverable_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpIngestionClient::new(format!("{}/ingest", server.uri()));
        let result = client.send(batch(), None).await;
        assert!(matches!(
            result,
            Err(IngestionError::Http { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn send_recoverable_failure_emits_paused_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let retry = RetryConfig::default().with_max_retries(0);
        let client = HttpIngestionClient::with_retry(format!("{}/ingest", server.uri()), retry);
        let mut events = client.subscribe();

        let result = client.send(batch(), None).await;
        assert!(result.is_err());
        assert!(matches!(events.recv().await, Some(IngestionEvent::Paused)));
    }
}
