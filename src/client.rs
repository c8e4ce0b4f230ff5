//! Live-protocol client surface.
//!
//! The core only consumes this contract; concrete platform clients
//! (connection, authentication, event decoding) live outside the crate.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced across the protocol-client boundary.
///
/// The orchestrator classifies on these variants, so transports must map
/// their own failures into this taxonomy.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("user not found")]
    UserNotFound,

    #[error("rate limited by service, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("transient client error: {0}")]
    Transient(String),
}

/// Typed events delivered by a live chat subscription.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Connected {
        room_id: Option<u64>,
    },
    Disconnected,
    LiveEnded,
    Comment {
        username: String,
        nickname: String,
        content: String,
    },
    Gift {
        username: String,
        nickname: String,
        gift_name: String,
        count: u32,
        /// Whether this event carries the final count of a gift streak
        /// (or the gift cannot streak). Intermediate increments are false.
        streak_final: bool,
    },
    Join {
        username: String,
        nickname: String,
    },
}

/// A live-protocol client for one account.
#[async_trait]
pub trait LiveClient: Send + Sync {
    /// Poll whether the account is currently broadcasting.
    async fn is_live(&self) -> Result<bool, ClientError>;

    /// Fetch broadcast metadata for the current live room.
    async fn room_info(&self) -> Result<serde_json::Value, ClientError>;

    /// Room id of the current broadcast, once known.
    fn room_id(&self) -> Option<u64>;

    /// Open the live event feed. The receiver yields events until the
    /// underlying connection closes, at which point it returns `None`.
    async fn subscribe(&self) -> Result<mpsc::Receiver<LiveEvent>, ClientError>;

    /// Close the client and release its connections. Must be idempotent.
    async fn close(&self);
}

/// Factory for protocol clients.
///
/// The orchestrator discards and recreates clients on transient failures and
/// reconnects, so construction must be cheap and side-effect free.
pub trait LiveClientFactory: Send + Sync {
    fn create(&self, account_id: &str, init: &ClientInit) -> Arc<dyn LiveClient>;
}

/// Explicit per-client initialization.
///
/// Everything a transport needs to authenticate is carried here and passed
/// into each `LiveClientFactory::create` call; the core never configures
/// clients through process-wide environment state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInit {
    /// Authenticated session token, empty for anonymous connections.
    pub session_token: String,
    /// Datacenter hint extracted from the cookie string.
    pub target_idc: String,
}

impl ClientInit {
    const DEFAULT_IDC: &'static str = "useast5";

    /// Parse session input, accepting a bare session token or a full cookie
    /// string.
    ///
    /// Cookie strings (containing both `=` and `;`) are split on `;`; the
    /// token is read from `sessionid` or `sid_tt` and the datacenter hint
    /// from `tt-target-idc`.
    pub fn parse_session(raw: &str) -> Self {
        let raw = raw.trim();
        if !(raw.contains(';') && raw.contains('=')) {
            return Self {
                session_token: raw.to_string(),
                target_idc: Self::DEFAULT_IDC.to_string(),
            };
        }

        let mut session_token = String::new();
        let mut sid_tt = String::new();
        let mut target_idc = Self::DEFAULT_IDC.to_string();
        for part in raw.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "sessionid" => session_token = value.trim().to_string(),
                "sid_tt" => sid_tt = value.trim().to_string(),
                "tt-target-idc" => target_idc = value.trim().to_string(),
                _ => {}
            }
        }
        if session_token.is_empty() {
            session_token = sid_tt;
        }

        Self {
            session_token,
            target_idc,
        }
    }
}
