//! Graphql client for the security-events dataset, used for zones whose
//! plan has no logpull access.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EdgeError;

/// Hard cap on events per query imposed upstream. A response of exactly
/// this many events likely dropped data.
pub const SECURITY_EVENTS_LIMIT: usize = 1000;

/// One firewall/security event as returned by the dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub action: String,
    #[serde(rename = "clientIP")]
    pub client_ip: String,
    pub client_request_path: String,
    pub client_request_query: String,
    pub datetime: DateTime<Utc>,
    pub ray_name: String,
    pub rule_id: String,
    pub source: String,
    pub user_agent: String,
}

#[derive(Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<GraphqlErrorEntry>,
}

#[derive(Deserialize)]
struct ResponseData {
    viewer: Viewer,
}

#[derive(Deserialize)]
struct Viewer {
    zones: Vec<ZoneEvents>,
}

#[derive(Deserialize)]
struct ZoneEvents {
    #[serde(rename = "firewallEventsAdaptive")]
    firewall_events_adaptive: Vec<SecurityEvent>,
}

#[derive(Deserialize)]
struct GraphqlErrorEntry {
    message: String,
}

const SECURITY_EVENTS_QUERY: &str = r#"query GetSecurityEvents($zoneTag: string, $start: Time!, $end: Time!) {
    viewer {
        zones(filter: { zoneTag: $zoneTag }) {
            firewallEventsAdaptive(
                filter: { datetime_geq: $start, datetime_leq: $end },
                limit: 1000,
                orderBy: [datetime_DESC]
            ) {
                action
                clientIP
                clientRequestPath
                clientRequestQuery
                datetime
                rayName
                ruleId
                source
                userAgent
            }
        }
    }
}"#;

/// Client for the `/graphql` endpoint.
pub struct GraphqlClient {
    endpoint: String,
    http: reqwest::Client,
    api_token: String,
}

impl GraphqlClient {
    pub fn new(
        base_url: &str,
        api_token: &str,
        request_timeout: Duration,
    ) -> Result<Self, EdgeError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            endpoint: format!("{}/graphql", base_url.trim_end_matches('/')),
            http,
            api_token: api_token.to_string(),
        })
    }

    /// Fetch security events for a zone within `[start, end]`, newest first,
    /// capped at [`SECURITY_EVENTS_LIMIT`].
    ///
    /// An unknown zone (or one the token cannot see) yields an empty list,
    /// matching the dataset's behavior.
    pub async fn security_events(
        &self,
        zone_tag: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, EdgeError> {
        let body = serde_json::json!({
            "query": SECURITY_EVENTS_QUERY,
            "variables": {
                "zoneTag": zone_tag,
                "start": start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "end": end.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(EdgeError::Forbidden);
        }
        if !status.is_success() {
            let body = crate::logpull::truncated_body(response).await;
            return Err(EdgeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GraphqlResponse = response
            .json()
            .await
            .map_err(|e| EdgeError::Decode(e.to_string()))?;

        if let Some(err) = parsed.errors.into_iter().next() {
            return Err(EdgeError::Graphql(err.message));
        }

        let zones = parsed
            .data
            .ok_or_else(|| EdgeError::Decode("response carries neither data nor errors".into()))?
            .viewer
            .zones;

        Ok(zones
            .into_iter()
            .next()
            .map(|z| z.firewall_events_adaptive)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_upstream_field_names() {
        let event = SecurityEvent {
            action: "block".into(),
            client_ip: "192.0.2.1".into(),
            client_request_path: "/admin".into(),
            client_request_query: "".into(),
            datetime: Utc::now(),
            ray_name: "8abc".into(),
            rule_id: "100015".into(),
            source: "waf".into(),
            user_agent: "curl/8".into(),
        };

        let line = serde_json::to_value(&event).unwrap();
        assert_eq!(line["clientIP"], "192.0.2.1");
        assert_eq!(line["clientRequestPath"], "/admin");
        assert_eq!(line["rayName"], "8abc");
    }

    #[test]
    fn response_with_no_zones_parses_to_empty() {
        let parsed: GraphqlResponse = serde_json::from_str(
            r#"{"data":{"viewer":{"zones":[]}},"errors":[]}"#,
        )
        .unwrap();
        assert!(parsed.data.unwrap().viewer.zones.is_empty());
    }
}
