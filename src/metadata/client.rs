//! Long-poll client for metadata keys
//!
//! Watch parameters travel in the query string. The metadata server
//! ignores `wait_for_change` and `last_etag` when they are sent as headers,
//! which would silently turn every watch into a plain read.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Url};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::WatcherError;

use super::{ChangeToken, MetadataError, WatchKey, WatchOutcome};

/// Added on top of the server-side hold so the server always answers first
const REQUEST_GRACE: Duration = Duration::from_secs(10);

/// Something that can block until a single metadata key changes
#[async_trait]
pub trait KeyWatch: Send {
    /// The key being watched
    fn key(&self) -> &WatchKey;

    /// Wait for the key's value to differ from the last observed one.
    ///
    /// Returns `Err(WatcherError::Cancelled)` only when `cancel` fired;
    /// every other failure is reported as [`WatchOutcome::TransportError`].
    async fn watch(&mut self, cancel: &CancellationToken) -> Result<WatchOutcome, WatcherError>;
}

/// Shared transport to the metadata service
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
    watch_timeout: Duration,
}

impl MetadataClient {
    /// Create a client for the service rooted at `base_url`
    pub fn new(base_url: impl Into<String>, watch_timeout: Duration) -> Result<Self, MetadataError> {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let http = reqwest::Client::builder().no_proxy().build()?;

        Ok(Self {
            http,
            base_url,
            watch_timeout,
        })
    }

    /// Create a watcher for one key, with its own change token
    pub fn watch_key(&self, key: WatchKey) -> KeyClient {
        KeyClient {
            client: self.clone(),
            key,
            token: None,
        }
    }
}

/// Long-poll watcher for a single key
#[derive(Debug)]
pub struct KeyClient {
    client: MetadataClient,
    key: WatchKey,
    /// Token of the last value observed, `None` until the first success
    token: Option<ChangeToken>,
}

impl KeyClient {
    /// Token that the next request will present
    #[cfg(test)]
    pub fn token(&self) -> Option<&ChangeToken> {
        self.token.as_ref()
    }

    fn watch_url(&self) -> Result<Url, MetadataError> {
        let url = format!("{}{}", self.client.base_url, self.key.as_str());
        let last_etag = self
            .token
            .as_ref()
            .map(ChangeToken::as_str)
            .unwrap_or(ChangeToken::INITIAL);
        let timeout_sec = self.client.watch_timeout.as_secs().to_string();

        Url::parse_with_params(
            &url,
            &[
                ("wait_for_change", "true"),
                ("last_etag", last_etag),
                ("timeout_sec", timeout_sec.as_str()),
            ],
        )
        .map_err(|e| MetadataError::InvalidUrl {
            url,
            reason: e.to_string(),
        })
    }

    async fn fetch(&self) -> Result<(String, ChangeToken), MetadataError> {
        let url = self.watch_url()?;
        debug!(%url, "watching metadata key");

        let response = self
            .client
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .timeout(self.client.watch_timeout.saturating_add(REQUEST_GRACE))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                status: status.as_u16(),
                key: self.key.to_string(),
            });
        }

        let token = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(ChangeToken::new)
            .ok_or_else(|| MetadataError::MissingEtag {
                key: self.key.to_string(),
            })?;

        let value = response.text().await?;
        Ok((value, token))
    }
}

#[async_trait]
impl KeyWatch for KeyClient {
    fn key(&self) -> &WatchKey {
        &self.key
    }

    async fn watch(&mut self, cancel: &CancellationToken) -> Result<WatchOutcome, WatcherError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(key = %self.key, "watch cancelled");
                return Err(WatcherError::Cancelled);
            }
            result = self.fetch() => result,
        };

        match result {
            Ok((value, token)) => {
                debug!(key = %self.key, %token, "metadata value observed");
                self.token = Some(token);
                Ok(WatchOutcome::Found(value))
            }
            Err(e) if e.is_not_found() => Ok(WatchOutcome::NotPresent),
            Err(e) => Ok(WatchOutcome::TransportError(e)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeMetadata;
    use super::*;

    async fn stop_state_client(fake: &FakeMetadata) -> KeyClient {
        let base = fake.spawn().await;
        MetadataClient::new(base, Duration::from_secs(60))
            .unwrap()
            .watch_key(WatchKey::stop_state())
    }

    #[test]
    fn test_watch_parameters_are_in_query_string() {
        let client = MetadataClient::new("http://169.254.169.254/computeMetadata/v1", Duration::from_secs(60))
            .unwrap()
            .watch_key(WatchKey::stop_state());

        let url = client.watch_url().unwrap();
        assert_eq!(url.path(), "/computeMetadata/v1/instance/shutdown-details/stop-state");
        assert_eq!(
            url.query(),
            Some("wait_for_change=true&last_etag=NONE&timeout_sec=60")
        );
    }

    #[tokio::test]
    async fn test_found_updates_token() {
        let fake = FakeMetadata::default();
        fake.set(WatchKey::STOP_STATE, "NONE");
        let mut client = stop_state_client(&fake).await;
        let cancel = CancellationToken::new();

        let outcome = client.watch(&cancel).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Found(ref v) if v == "NONE"));
        assert_eq!(client.token(), Some(&ChangeToken::new("1")));
    }

    #[tokio::test]
    async fn test_next_request_carries_previous_token() {
        let fake = FakeMetadata::default();
        fake.set(WatchKey::STOP_STATE, "NONE");
        let mut client = stop_state_client(&fake).await;
        let cancel = CancellationToken::new();

        client.watch(&cancel).await.unwrap();
        fake.set(WatchKey::STOP_STATE, "PENDING_STOP");
        let outcome = client.watch(&cancel).await.unwrap();

        assert!(matches!(outcome, WatchOutcome::Found(ref v) if v == "PENDING_STOP"));
        assert_eq!(fake.seen_etags(), vec!["NONE".to_string(), "1".to_string()]);
        assert_eq!(client.token(), Some(&ChangeToken::new("2")));
    }

    #[tokio::test]
    async fn test_tokens_are_not_shared_between_keys() {
        let fake = FakeMetadata::default();
        fake.set("instance/attributes/a", "NONE");
        fake.set("instance/attributes/b", "NONE");
        let client = MetadataClient::new(fake.spawn().await, Duration::from_secs(60)).unwrap();
        let mut first = client.watch_key(WatchKey::new("instance/attributes/a"));
        let mut second = client.watch_key(WatchKey::new("instance/attributes/b"));
        let cancel = CancellationToken::new();

        first.watch(&cancel).await.unwrap();
        assert_eq!(first.token(), Some(&ChangeToken::new("2")));
        assert_eq!(second.token(), None);

        second.watch(&cancel).await.unwrap();
        assert_eq!(fake.seen_etags(), vec!["NONE", "NONE"]);
    }

    #[tokio::test]
    async fn test_any_success_status_is_found() {
        let fake = FakeMetadata::default();
        fake.set(WatchKey::STOP_STATE, "NONE");
        fake.answer_with(axum::http::StatusCode::NON_AUTHORITATIVE_INFORMATION);
        let mut client = stop_state_client(&fake).await;

        let outcome = client.watch(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Found(ref v) if v == "NONE"));
    }

    #[tokio::test]
    async fn test_huge_watch_timeout_does_not_overflow() {
        let fake = FakeMetadata::default();
        fake.set(WatchKey::STOP_STATE, "NONE");
        let mut client = MetadataClient::new(fake.spawn().await, Duration::from_secs(u64::MAX))
            .unwrap()
            .watch_key(WatchKey::stop_state());

        let outcome = client.watch(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Found(ref v) if v == "NONE"));
    }

    #[tokio::test]
    async fn test_absent_key_is_not_present() {
        let fake = FakeMetadata::default();
        let mut client = stop_state_client(&fake).await;

        let outcome = client.watch(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::NotPresent));
        assert_eq!(client.token(), None);
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let fake = FakeMetadata::default();
        fake.set(WatchKey::STOP_STATE, "NONE");
        fake.fail_with(axum::http::StatusCode::SERVICE_UNAVAILABLE);
        let mut client = stop_state_client(&fake).await;

        match client.watch(&CancellationToken::new()).await.unwrap() {
            WatchOutcome::TransportError(e) => assert_eq!(e.status(), Some(503)),
            other => panic!("expected transport error, got {:?}", other),
        }
        assert_eq!(client.token(), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = MetadataClient::new(format!("http://{}/computeMetadata/v1/", addr), Duration::from_secs(1))
            .unwrap()
            .watch_key(WatchKey::stop_state());

        let outcome = client.watch(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::TransportError(MetadataError::Request(_))));
    }

    #[tokio::test]
    async fn test_header_parameters_are_rejected_by_server() {
        let fake = FakeMetadata::default();
        fake.set(WatchKey::STOP_STATE, "NONE");
        let base = fake.spawn().await;

        let response = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .get(format!("{}{}", base, WatchKey::STOP_STATE))
            .header("Metadata-Flavor", "Google")
            .header("wait_for_change", "true")
            .header("last_etag", "NONE")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_held_request() {
        let fake = FakeMetadata::default();
        fake.set(WatchKey::STOP_STATE, "NONE");
        let mut client = stop_state_client(&fake).await;
        let cancel = CancellationToken::new();

        client.watch(&cancel).await.unwrap();

        // Unchanged token: the server holds the request
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), client.watch(&cancel))
            .await
            .expect("watch should return promptly after cancel");
        assert!(matches!(result, Err(WatcherError::Cancelled)));
        assert_eq!(client.token(), Some(&ChangeToken::new("1")));
    }
}
