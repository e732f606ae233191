//! REST + server-sent-events binding of the backend interfaces.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::RemoteConfig;
use crate::error::{KeepsakeError, Result};
use crate::models::{FeedMessage, Memory, NewMemory};
use crate::photo::NormalizedPhoto;
use crate::remote::traits::{ChangeFeed, FeedSubscription, RemoteStore};

/// Storage bucket holding normalized photos.
const PHOTO_BUCKET: &str = "memory-photos";

/// CRUD client for the `/memories` surface.
#[derive(Clone, Debug)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct UploadResponse {
    path: String,
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let base_url = parse_base_url(&config.base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KeepsakeError::Persist(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(KeepsakeError::from)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_memories(&self) -> Result<Vec<Memory>> {
        let url = self.endpoint("memories")?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| KeepsakeError::Persist(format!("Failed to fetch memories: {e}")))?;
        let response = expect_success(response, "memories").await?;

        response
            .json()
            .await
            .map_err(|e| KeepsakeError::Persist(format!("Failed to parse memories: {e}")))
    }

    async fn insert_memory(&self, draft: &NewMemory) -> Result<Memory> {
        let url = self.endpoint("memories")?;
        let response = self
            .authorize(self.client.post(url))
            .json(draft)
            .send()
            .await
            .map_err(|e| KeepsakeError::Persist(format!("Failed to insert memory: {e}")))?;
        let response = expect_success(response, "memory").await?;

        response
            .json()
            .await
            .map_err(|e| KeepsakeError::Persist(format!("Failed to parse created memory: {e}")))
    }

    async fn update_memory(&self, record: &Memory) -> Result<Memory> {
        let url = self.endpoint(&format!("memories/{}", record.id))?;
        let response = self
            .authorize(self.client.put(url))
            .json(record)
            .send()
            .await
            .map_err(|e| KeepsakeError::Persist(format!("Failed to update memory: {e}")))?;
        let response = expect_success(response, &format!("memory '{}'", record.id)).await?;

        response
            .json()
            .await
            .map_err(|e| KeepsakeError::Persist(format!("Failed to parse updated memory: {e}")))
    }

    async fn delete_memory(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("memories/{id}"))?;
        let response = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(|e| KeepsakeError::Persist(format!("Failed to delete memory: {e}")))?;
        expect_success(response, &format!("memory '{id}'")).await?;
        Ok(())
    }

    async fn upload_photo(&self, photo: &NormalizedPhoto) -> Result<String> {
        let path = photo_path();
        let url = self.endpoint(&format!("storage/{PHOTO_BUCKET}/{path}"))?;
        let response = self
            .authorize(self.client.post(url))
            .header("Content-Type", photo.content_type)
            .body(photo.bytes.clone())
            .send()
            .await
            .map_err(|e| KeepsakeError::Upload(format!("Failed to upload photo: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KeepsakeError::Upload(format!(
                "Photo upload failed: {status} - {body}"
            )));
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| KeepsakeError::Upload(format!("Failed to parse upload response: {e}")))?;
        Ok(uploaded.path)
    }
}

/// Change feed over a server-sent-event stream at `memories/feed`.
#[derive(Clone, Debug)]
pub struct HttpChangeFeed {
    client: Client,
    feed_url: Url,
    auth_token: Option<String>,
}

impl HttpChangeFeed {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let feed_url = parse_base_url(&config.base_url)?.join("memories/feed")?;

        // Connect timeout only: an overall timeout would sever the
        // long-lived stream.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KeepsakeError::Feed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            feed_url,
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl ChangeFeed for HttpChangeFeed {
    async fn subscribe(&self) -> Result<FeedSubscription> {
        let mut request = self
            .client
            .get(self.feed_url.clone())
            .header("Accept", "text/event-stream");
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| KeepsakeError::Feed(format!("Failed to open change feed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KeepsakeError::Feed(format!(
                "Change feed rejected: {status} - {body}"
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = Vec::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            buffer.extend_from_slice(&bytes);
                            while let Some(frame) = take_frame(&mut buffer) {
                                let Some(message) = parse_frame(&frame) else {
                                    continue;
                                };
                                if tx.send(message).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Change feed transport error");
                            break;
                        }
                        None => break,
                    },
                }
            }
            // Dropping tx ends the subscription, which signals the consumer
            // to resubscribe.
        });

        Ok(FeedSubscription::new(rx, cancel))
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    // Url::join replaces the last path segment unless the base ends in '/'.
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

/// Upload path namespaced by timestamp, with a random suffix so concurrent
/// uploads in the same millisecond cannot collide.
fn photo_path() -> String {
    format!(
        "photos/{}-{}",
        Utc::now().timestamp_millis(),
        nanoid::nanoid!(8)
    )
}

async fn expect_success(response: reqwest::Response, subject: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        Err(KeepsakeError::NotFound(subject.to_string()))
    } else {
        Err(KeepsakeError::Persist(format!(
            "Request for {subject} failed: {status} - {body}"
        )))
    }
}

/// Split one blank-line-terminated SSE frame off the front of `buffer`.
fn take_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let lf = buffer
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| (pos, 4));

    let (pos, len) = match (lf, crlf) {
        (Some((lp, ll)), Some((cp, cl))) => {
            if cp < lp {
                (cp, cl)
            } else {
                (lp, ll)
            }
        }
        (Some(found), None) | (None, Some(found)) => found,
        (None, None) => return None,
    };

    let frame = buffer[..pos].to_vec();
    buffer.drain(..pos + len);
    Some(frame)
}

/// Parse the `data:` payload of one frame; comments and other SSE fields are
/// ignored, unparseable payloads are logged and skipped.
fn parse_frame(frame: &[u8]) -> Option<FeedMessage> {
    let text = std::str::from_utf8(frame).ok()?;
    for line in text.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        match serde_json::from_str(data.trim()) {
            Ok(message) => return Some(message),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unparseable feed event");
                return None;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = parse_base_url("http://localhost:3000").unwrap();
        assert_eq!(url.join("memories").unwrap().path(), "/memories");

        let url = parse_base_url("http://localhost:3000/api").unwrap();
        assert_eq!(url.join("memories").unwrap().path(), "/api/memories");
    }

    #[test]
    fn test_photo_path_shape() {
        let path = photo_path();
        assert!(path.starts_with("photos/"));
        let rest = path.trim_start_matches("photos/");
        let (millis, suffix) = rest.split_once('-').unwrap();
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn test_take_frame_waits_for_blank_line() {
        let mut buffer = b"data: {\"a\":1}".to_vec();
        assert!(take_frame(&mut buffer).is_none());

        buffer.extend_from_slice(b"\n\ndata: next");
        let frame = take_frame(&mut buffer).unwrap();
        assert_eq!(frame, b"data: {\"a\":1}");
        assert_eq!(buffer, b"data: next");
        assert!(take_frame(&mut buffer).is_none());
    }

    #[test]
    fn test_take_frame_handles_crlf() {
        let mut buffer = b"data: one\r\n\r\ndata: two\n\n".to_vec();
        assert_eq!(take_frame(&mut buffer).unwrap(), b"data: one");
        assert_eq!(take_frame(&mut buffer).unwrap(), b"data: two");
        assert!(take_frame(&mut buffer).is_none());
    }

    #[test]
    fn test_parse_frame_reads_data_line() {
        let frame = b"event: change\ndata: {\"eventType\":\"delete\",\"old\":{\"id\":\"7\"}}";
        let message = parse_frame(frame).unwrap();
        assert_eq!(message.event.memory_id(), "7");
    }

    #[test]
    fn test_parse_frame_skips_comments_and_garbage() {
        assert!(parse_frame(b": keepalive").is_none());
        assert!(parse_frame(b"data: not json").is_none());
        assert!(parse_frame(b"").is_none());
    }
}
