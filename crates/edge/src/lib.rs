//! Clients for the upstream edge platform.
//!
//! Key upstream constraints:
//!   - Pulled logs are served with a minimum 1-minute delay.
//!   - The platform retains logs for at most 6 days; zones must be pulled
//!     before that window closes.
//!   - Maximum pull window per request: 1 hour.
//!   - Business-plan zones stream via instant-logs websockets instead.

pub mod error;
pub mod graphql;
pub mod instant;
pub mod logpull;

pub use error::{parse_retry_after, EdgeError};
pub use graphql::{GraphqlClient, SecurityEvent, SECURITY_EVENTS_LIMIT};
pub use instant::InstantLogsClient;
pub use logpull::LogpullClient;

/// Default upstream API root.
pub const DEFAULT_BASE_URL: &str = "https://api.edge-platform.example/client/v4";
