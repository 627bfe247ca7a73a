//! Transport to the friends API.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::model::{BulkOutcome, Page, PartitionKey, PartitionKind, PushEvent, Relationship};

/// Operations the client needs from the server.
#[async_trait]
pub trait FriendshipTransport: Send + Sync {
    /// Fetch one page of a list.
    async fn fetch_partition(
        &self,
        key: &PartitionKey,
        until_id: Option<&str>,
        limit: u64,
    ) -> ClientResult<Page<Relationship>>;

    /// Send a friend request.
    async fn send_request(&self, target_id: &str) -> ClientResult<Relationship>;

    /// Accept a received request.
    async fn accept_request(&self, id: &str) -> ClientResult<Relationship>;

    /// Reject a received request.
    async fn reject_request(&self, id: &str) -> ClientResult<()>;

    /// Withdraw a sent request.
    async fn cancel_sent_request(&self, id: &str) -> ClientResult<()>;

    /// End a friendship.
    async fn remove_relationship(&self, id: &str) -> ClientResult<()>;

    /// Block a user.
    async fn block_user(&self, user_id: &str) -> ClientResult<()>;

    /// Accept several requests.
    async fn accept_all(&self, ids: &[String]) -> ClientResult<BulkOutcome>;

    /// Reject several requests.
    async fn reject_all(&self, ids: &[String]) -> ClientResult<BulkOutcome>;

    /// Withdraw several sent requests.
    async fn cancel_all_sent(&self, ids: &[String]) -> ClientResult<BulkOutcome>;

    /// Open the real-time stream for the authenticated user.
    async fn subscribe(&self) -> ClientResult<BoxStream<'static, ClientResult<PushEvent>>>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// `FriendshipTransport` over the HTTP API.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `https://example.com/api`)
    /// authenticated with `token`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        debug!(path, "Calling API");
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
            Ok(envelope.data)
        } else {
            match serde_json::from_slice::<ErrorEnvelope>(&bytes) {
                Ok(ErrorEnvelope { error }) => Err(ClientError::Api {
                    code: error.code,
                    message: error.message,
                }),
                Err(_) => Err(ClientError::Api {
                    code: status.as_str().to_string(),
                    message: String::from_utf8_lossy(&bytes).into_owned(),
                }),
            }
        }
    }
}

#[async_trait]
impl FriendshipTransport for HttpTransport {
    async fn fetch_partition(
        &self,
        key: &PartitionKey,
        until_id: Option<&str>,
        limit: u64,
    ) -> ClientResult<Page<Relationship>> {
        let body = json!({ "userId": key.owner, "limit": limit, "untilId": until_id });
        let path = match key.kind {
            PartitionKind::Friends => "/friends/list",
            PartitionKind::Received => "/friends/received",
            PartitionKind::Sent => "/friends/sent",
        };
        self.post(path, &body).await
    }

    async fn send_request(&self, target_id: &str) -> ClientResult<Relationship> {
        self.post("/friends/request", &json!({ "targetId": target_id }))
            .await
    }

    async fn accept_request(&self, id: &str) -> ClientResult<Relationship> {
        self.post("/friends/accept", &json!({ "relationshipId": id }))
            .await
    }

    async fn reject_request(&self, id: &str) -> ClientResult<()> {
        self.post("/friends/reject", &json!({ "relationshipId": id }))
            .await
    }

    async fn cancel_sent_request(&self, id: &str) -> ClientResult<()> {
        self.post("/friends/cancel", &json!({ "relationshipId": id }))
            .await
    }

    async fn remove_relationship(&self, id: &str) -> ClientResult<()> {
        self.post("/friends/remove", &json!({ "relationshipId": id }))
            .await
    }

    async fn block_user(&self, user_id: &str) -> ClientResult<()> {
        let _: serde_json::Value = self
            .post("/blocking/create", &json!({ "userId": user_id }))
            .await?;
        Ok(())
    }

    async fn accept_all(&self, ids: &[String]) -> ClientResult<BulkOutcome> {
        self.post("/friends/accept-all", &json!({ "ids": ids })).await
    }

    async fn reject_all(&self, ids: &[String]) -> ClientResult<BulkOutcome> {
        self.post("/friends/reject-all", &json!({ "ids": ids })).await
    }

    async fn cancel_all_sent(&self, ids: &[String]) -> ClientResult<BulkOutcome> {
        self.post("/friends/cancel-all", &json!({ "ids": ids })).await
    }

    async fn subscribe(&self) -> ClientResult<BoxStream<'static, ClientResult<PushEvent>>> {
        let response = self
            .client
            .get(self.url("/streaming/sse/user"))
            .bearer_auth(&self.token)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                code: status.as_str().to_string(),
                message: "Failed to open event stream".to_string(),
            });
        }

        let state = (
            response.bytes_stream().boxed(),
            SseDecoder::default(),
            VecDeque::<String>::new(),
        );
        let events = stream::unfold(state, |(mut body, mut decoder, mut pending)| async move {
            loop {
                if let Some(data) = pending.pop_front() {
                    let event = serde_json::from_str::<PushEvent>(&data).map_err(ClientError::from);
                    return Some((event, (body, decoder, pending)));
                }
                match body.next().await? {
                    Ok(chunk) => pending.extend(decoder.feed(&chunk)),
                    Err(e) => {
                        warn!(error = %e, "Event stream failed");
                        return Some((Err(ClientError::from(e)), (body, decoder, pending)));
                    }
                }
            }
        });

        Ok(events.boxed())
    }
}

/// Incremental `text/event-stream` parser yielding the data of each event.
/// Comment lines (keep-alives) and other fields are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk of the body. Returns the data of every event completed by
    /// it; a trailing partial line is kept for the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        events
    }
}
