//! Instant-logs client: session bootstrap over HTTP, then a websocket
//! message stream.

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::EdgeError;

/// Buffered messages between the reader task and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Field list requested for instant-logs sessions.
const INSTANT_FIELDS: &str = "ClientIP,EdgeStartTimestamp,ClientRequestURI,\
ClientRequestMethod,EdgeResponseStatus,ClientRequestUserAgent,RayID";

#[derive(Deserialize)]
struct StartSessionResponse {
    result: SessionResult,
}

#[derive(Deserialize)]
struct SessionResult {
    destination_conf: String,
}

/// Client for one zone's instant-logs surface.
pub struct InstantLogsClient {
    base_url: String,
    http: reqwest::Client,
    edge_zone_id: String,
    api_token: String,
}

impl InstantLogsClient {
    pub fn new(base_url: &str, edge_zone_id: &str, api_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            edge_zone_id: edge_zone_id.to_string(),
            api_token: api_token.to_string(),
        }
    }

    /// Create an instant-logs job upstream and return the websocket URL to
    /// stream from (`result.destination_conf`).
    pub async fn start_session(&self) -> Result<String, EdgeError> {
        let url = format!(
            "{}/zones/{}/logpush/edge/jobs",
            self.base_url, self.edge_zone_id
        );
        let body = serde_json::json!({
            "kind": "instant-logs",
            "fields": INSTANT_FIELDS,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !(status.is_success() || status == reqwest::StatusCode::CREATED) {
            let body = crate::logpull::truncated_body(response).await;
            return Err(EdgeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: StartSessionResponse = response
            .json()
            .await
            .map_err(|e| EdgeError::Decode(e.to_string()))?;
        Ok(parsed.result.destination_conf)
    }

    /// Connect to the session websocket and stream raw log lines.
    ///
    /// The returned channel closes when the websocket closes or errors;
    /// dropping the receiver tears the connection down. Each item is one
    /// log record without a trailing newline.
    pub async fn stream(&self, ws_url: &str) -> Result<mpsc::Receiver<Vec<u8>>, EdgeError> {
        let (ws_stream, _response) = connect_async(ws_url)
            .await
            .map_err(|e| EdgeError::WebSocket(e.to_string()))?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut ws_stream = ws_stream;
            while let Some(message) = ws_stream.next().await {
                let payload = match message {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(_)) | Err(_) => break,
                    // Ping/pong handled by the library.
                    Ok(_) => continue,
                };
                if tx.send(payload).await.is_err() {
                    // Consumer went away; close the connection.
                    break;
                }
            }
        });

        Ok(rx)
    }
}
