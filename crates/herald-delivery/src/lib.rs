//! # herald-delivery
//!
//! Message delivery and synchronization core.
//!
//! The pipeline is one-directional:
//!
//! ```text
//! IngestionGateway -> MessageLog::append -> DeliveryRouter -> live push | persisted-only
//! ReconnectionSynchronizer -> MessageLog backlog scan -> drain -> Presence = online
//! ```
//!
//! The store never calls back into the router; the router reacts to store
//! results. Duplicate-send safety rests entirely on the store's atomic
//! conditional insert on `(recipient_id, client_message_id)`.
//!
//! ## Modules
//!
//! - [`log`]: async seam over the Message Store ([`MessageLog`], [`SqliteLog`])
//! - [`push`]: live-push, sync-connection and push-notification collaborators
//! - [`router`]: real-time vs persisted-only decision
//! - [`gateway`]: validated idempotent append with bounded retry
//! - [`sync`]: reconnect backlog drain driving presence transitions
//! - [`pager`]: cursor-chained conversation history

pub mod gateway;
pub mod log;
pub mod pager;
pub mod push;
pub mod router;
pub mod sync;

use std::time::Duration;

use herald_cursor::CursorError;
use herald_db::DbError;
use herald_presence::PresenceError;
use herald_types::{ConnectionId, Sequence};

pub use gateway::{GatewayConfig, IngestionGateway, RetryPolicy, SendAck};
pub use log::{MessageLog, SqliteLog};
pub use pager::{PageConfig, Pager};
pub use push::{ConnectionError, LivePush, LogNotifier, PushNotifier, PushOutcome, SyncConnection};
pub use router::{DeliveryRouter, PersistReason, RouteOutcome, RouterConfig};
pub use sync::{ReconnectionSynchronizer, SyncConfig, SyncPhase, SyncReport};

/// Error types for delivery operations.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The store is temporarily unavailable. Retry with the same
    /// `client_message_id`; never mint a new one.
    #[error("store temporarily unavailable: {0}")]
    TransientStore(String),

    /// A non-retryable store failure.
    #[error("store error: {0}")]
    Store(DbError),

    /// The pagination cursor is forged, garbled or foreign. Drop it and
    /// restart from the newest page.
    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    /// The presence directory could not be consulted.
    #[error("presence unavailable: {0}")]
    PresenceUnavailable(#[from] PresenceError),

    /// The inbound send failed validation.
    #[error("invalid message: {0}")]
    Validation(String),

    /// FinalCheck still found backlog after its bounded rounds.
    #[error("final check did not converge after {rounds} rounds")]
    SyncIterationBoundExceeded { rounds: u32 },

    /// The live connection failed.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The client did not acknowledge a backlog batch in time.
    #[error("acknowledgment timed out after {0:?}")]
    AckTimeout(Duration),

    /// The client acknowledged nothing from a delivered batch.
    #[error("acknowledgment made no progress (last acked: {last_acked:?})")]
    AckStalled { last_acked: Option<Sequence> },

    /// Another connection owns the presence record, or it was removed
    /// (disconnect or expiry) while this connection was syncing.
    #[error("presence lease lost for connection {0}")]
    LeaseLost(ConnectionId),

    /// A server-side fault unrelated to the caller's input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Whether the caller should retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::TransientStore(_))
    }
}

impl From<DbError> for DeliveryError {
    fn from(e: DbError) -> Self {
        if e.is_transient() {
            DeliveryError::TransientStore(e.to_string())
        } else {
            DeliveryError::Store(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
pub(crate) mod testutil;
