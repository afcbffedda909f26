//! Logpull API client for a single zone.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{parse_retry_after, EdgeError};

/// Maximum pull window the upstream serves in one request, in seconds.
const MAX_WINDOW_SECS: i64 = 3600;

/// Minimum age of a window's end before the upstream serves it, in seconds.
const MIN_DELAY_SECS: i64 = 60;

/// Cap on error bodies captured into error messages.
const ERROR_BODY_LIMIT: usize = 4096;

/// HTTP client for the `logs/received` endpoint of one zone.
pub struct LogpullClient {
    base_url: String,
    http: reqwest::Client,
    edge_zone_id: String,
    api_token: String,
}

impl LogpullClient {
    /// Create a client for a specific zone.
    ///
    /// * `base_url` - API root, e.g. the platform's `/client/v4`.
    /// * `edge_zone_id` - upstream zone identifier.
    /// * `api_token` - decrypted bearer token.
    pub fn new(
        base_url: &str,
        edge_zone_id: &str,
        api_token: &str,
        request_timeout: Duration,
    ) -> Result<Self, EdgeError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            edge_zone_id: edge_zone_id.to_string(),
            api_token: api_token.to_string(),
        })
    }

    /// Fetch NDJSON log lines for the half-open window `[from, to)`.
    ///
    /// Returns the raw decompressed NDJSON bytes (`reqwest` transparently
    /// handles gzip-encoded responses). An empty body means the window had
    /// no traffic.
    pub async fn pull_logs(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        fields: Option<&[&str]>,
    ) -> Result<Vec<u8>, EdgeError> {
        if to - from > chrono::Duration::seconds(MAX_WINDOW_SECS) {
            return Err(EdgeError::WindowTooLarge);
        }
        if Utc::now() - to < chrono::Duration::seconds(MIN_DELAY_SECS) {
            return Err(EdgeError::NotYetAvailable);
        }

        let url = format!(
            "{}/zones/{}/logs/received",
            self.base_url, self.edge_zone_id
        );
        let mut request = self
            .http
            .get(&url)
            .bearer_auth(&self.api_token)
            .query(&[
                ("start", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("end", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("timestamps", "rfc3339".to_string()),
            ]);
        if let Some(fields) = fields {
            request = request.query(&[("fields", fields.join(","))]);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(EdgeError::RateLimited { retry_after });
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(EdgeError::Forbidden);
        }
        if !status.is_success() {
            let body = truncated_body(response).await;
            return Err(EdgeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Read at most [`ERROR_BODY_LIMIT`] bytes of an error body for diagnostics.
pub(crate) async fn truncated_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            let end = bytes.len().min(ERROR_BODY_LIMIT);
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LogpullClient {
        LogpullClient::new(
            "https://upstream.test/client/v4",
            "zone-tag",
            "token",
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rejects_window_longer_than_one_hour() {
        let to = Utc::now() - chrono::Duration::minutes(5);
        let from = to - chrono::Duration::hours(2);

        let err = client().pull_logs(from, to, None).await.unwrap_err();
        assert!(matches!(err, EdgeError::WindowTooLarge));
    }

    #[tokio::test]
    async fn rejects_window_ending_less_than_a_minute_ago() {
        let to = Utc::now();
        let from = to - chrono::Duration::minutes(30);

        let err = client().pull_logs(from, to, None).await.unwrap_err();
        assert!(matches!(err, EdgeError::NotYetAvailable));
    }
}
