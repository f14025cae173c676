//! The REST collaborator: gateway discovery only.
//!
//! Everything else a real bot needs from Discord's HTTP API — channels,
//! messages, guild management — is out of scope here; it is treated as an
//! external collaborator in its own right. `GatewayApi` exposes
//! exactly the one operation the core needs to re-shard.
//!
//! Grounded on `gateway-queue/src/lib.rs`'s shape (a single async trait
//! method standing in for a larger HTTP client) and on jamesbt365-serenity's
//! `Cargo.toml`, which reaches for `reqwest` rather than hand-rolling a
//! client on top of raw `hyper`.

use async_trait::async_trait;
use serde::Deserialize;
use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
};

const REST_BASE: &str = "https://discordapp.com/api/v6";

/// The rate limit on how many identifies a token may perform in a rolling
/// window, as returned alongside gateway discovery.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct SessionStartLimit {
    /// The total number of identifies the token may perform per window.
    pub total: u32,
    /// The number of identifies remaining in the current window.
    pub remaining: u32,
    /// Milliseconds until the window resets.
    pub reset_after: u64,
    /// The maximum number of shards that may identify concurrently.
    pub max_concurrency: u32,
}

/// The response body of `GET /gateway/bot`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct GatewayBotInfo {
    /// The websocket URL to connect shards to.
    pub url: String,
    /// Discord's recommended shard count for this token.
    pub shards: u64,
    /// The token's remaining identify budget.
    pub session_start_limit: SessionStartLimit,
}

/// Gateway discovery failed.
#[derive(Debug)]
pub struct RestError {
    kind: RestErrorType,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl RestError {
    fn request(source: reqwest::Error) -> Self {
        Self { kind: RestErrorType::Request, source: Some(Box::new(source)) }
    }

    fn decoding(source: reqwest::Error) -> Self {
        Self { kind: RestErrorType::Decoding, source: Some(Box::new(source)) }
    }

    /// The "falsy/empty result" case: the request succeeded but
    /// carried nothing usable.
    pub(crate) fn empty() -> Self {
        Self { kind: RestErrorType::Empty, source: None }
    }
}

impl Display for RestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            RestErrorType::Request => f.write_str("gateway discovery request failed"),
            RestErrorType::Decoding => f.write_str("gateway discovery response was not the expected shape"),
            RestErrorType::Empty => f.write_str("gateway discovery returned no result"),
        }
    }
}

impl StdError for RestError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn StdError + 'static))
    }
}

/// Type of [`RestError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum RestErrorType {
    /// The HTTP request itself failed (connection, TLS, timeout).
    Request,
    /// The response body didn't match the expected shape.
    Decoding,
    /// The request succeeded but returned a non-success status.
    Empty,
}

/// The one REST operation the core needs: discovering a fresh gateway URL
/// and shard count, and the remaining identify budget for the token.
///
/// A gateway-discovery failure represented as an empty result —
/// is represented here as `Ok(None)` rather than an error, matching the
/// "logged and returned as null; the caller must decide" wording.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Discover the gateway URL, recommended shard count, and remaining
    /// identify budget for `token`.
    async fn get_gateway_bot(&self, token: &str) -> Result<Option<GatewayBotInfo>, RestError>;
}

/// The production implementation, backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestGatewayApi {
    client: reqwest::Client,
}

impl ReqwestGatewayApi {
    /// Wrap an existing `reqwest::Client`, reusing its connection pool.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestGatewayApi {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl GatewayApi for ReqwestGatewayApi {
    async fn get_gateway_bot(&self, token: &str) -> Result<Option<GatewayBotInfo>, RestError> {
        let url = format!("{REST_BASE}/gateway/bot?v=6&encoding=json");

        let response = self
            .client
            .get(url)
            .header("Authorization", token)
            .send()
            .await
            .map_err(RestError::request)?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "gateway discovery returned a non-success status");
            return Ok(None);
        }

        let info = response.json::<GatewayBotInfo>().await.map_err(RestError::decoding)?;
        Ok(Some(info))
    }
}

/// An in-memory stand-in for tests, matching the documented scenario stub:
/// `{url:"ws://x", shards:4, sessionStartLimit:{remaining:1000}}`.
#[cfg(any(test, feature = "test-util"))]
#[derive(Clone, Debug)]
pub struct StubGatewayApi {
    response: Option<GatewayBotInfo>,
}

#[cfg(any(test, feature = "test-util"))]
impl StubGatewayApi {
    /// A stub that always returns `response`.
    pub fn new(response: GatewayBotInfo) -> Self {
        Self { response: Some(response) }
    }

    /// A stub that simulates the "falsy/empty result" discovery failure.
    pub fn empty() -> Self {
        Self { response: None }
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl GatewayApi for StubGatewayApi {
    async fn get_gateway_bot(&self, _token: &str) -> Result<Option<GatewayBotInfo>, RestError> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_the_documented_response_shape() {
        let raw = r#"{
            "url": "wss://gateway.discord.gg",
            "shards": 4,
            "session_start_limit": {
                "total": 1000,
                "remaining": 998,
                "reset_after": 14400000,
                "max_concurrency": 1
            }
        }"#;

        let info: GatewayBotInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.shards, 4);
        assert_eq!(info.session_start_limit.remaining, 998);
    }

    #[tokio::test]
    async fn stub_returns_its_configured_response() {
        let stub = StubGatewayApi::new(GatewayBotInfo {
            url: "ws://x".into(),
            shards: 4,
            session_start_limit: SessionStartLimit { total: 1000, remaining: 1000, reset_after: 0, max_concurrency: 1 },
        });

        let info = stub.get_gateway_bot("token").await.unwrap().unwrap();
        assert_eq!(info.shards, 4);
    }

    #[tokio::test]
    async fn empty_stub_reports_discovery_failure_as_none() {
        let stub = StubGatewayApi::empty();
        assert!(stub.get_gateway_bot("token").await.unwrap().is_none());
    }
}
