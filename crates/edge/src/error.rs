//! Upstream error taxonomy.
//!
//! Workers branch on these variants: rate limits re-queue with the hinted
//! delay, `Forbidden` and `WindowTooLarge` are terminal policy errors, and
//! everything else retries through the queue's native policy.

use std::time::Duration;

/// Fallback when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    /// Requested pull window exceeds the upstream 1-hour cap. Retrying the
    /// same window can never succeed.
    #[error("edge: window exceeds 1 hour")]
    WindowTooLarge,

    /// The window's end is closer than the upstream's 1-minute serving
    /// delay; the same request succeeds once enough wall-clock has passed.
    #[error("edge: logs not yet available (min 1-minute delay)")]
    NotYetAvailable,

    /// HTTP 429 with the delay hinted by `Retry-After`.
    #[error("edge: rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// HTTP 403: the API is not enabled for this zone's plan.
    #[error("edge: forbidden (feature not available on this plan)")]
    Forbidden,

    #[error("edge: HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("edge: request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("edge: graphql: {0}")]
    Graphql(String),

    #[error("edge: websocket: {0}")]
    WebSocket(String),

    #[error("edge: decode response: {0}")]
    Decode(String),
}

/// Parse a `Retry-After` header value.
///
/// Supports both forms the upstream emits: integer seconds and an HTTP
/// date. Anything unparseable falls back to a 30-second default.
pub fn parse_retry_after(header: Option<&str>) -> Duration {
    let Some(value) = header else {
        return DEFAULT_RETRY_AFTER;
    };

    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(at) = chrono::DateTime::parse_from_rfc2822(value) {
        let until = at.signed_duration_since(chrono::Utc::now());
        return until.to_std().unwrap_or(Duration::ZERO);
    }

    DEFAULT_RETRY_AFTER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_seconds() {
        assert_eq!(parse_retry_after(Some("5")), Duration::from_secs(5));
        assert_eq!(parse_retry_after(Some(" 120 ")), Duration::from_secs(120));
    }

    #[test]
    fn http_date_in_the_future() {
        let at = chrono::Utc::now() + chrono::Duration::seconds(90);
        let header = at.to_rfc2822();

        let delay = parse_retry_after(Some(&header));
        assert!(delay > Duration::from_secs(85) && delay <= Duration::from_secs(90));
    }

    #[test]
    fn http_date_in_the_past_yields_zero() {
        let at = chrono::Utc::now() - chrono::Duration::seconds(90);
        assert_eq!(parse_retry_after(Some(&at.to_rfc2822())), Duration::ZERO);
    }

    #[test]
    fn missing_or_garbage_header_uses_default() {
        assert_eq!(parse_retry_after(None), Duration::from_secs(30));
        assert_eq!(parse_retry_after(Some("soon")), Duration::from_secs(30));
    }
}
