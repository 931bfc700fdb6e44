//! # herald-types
//!
//! Shared domain types used across the Herald workspace: the stored
//! message row, its delivery status, presence records and page shapes.

pub mod message;
pub mod page;
pub mod presence;

pub use message::{AppendReceipt, Message, MessageStatus, NewMessage};
pub use page::MessagePage;
pub use presence::{PresenceRecord, PresenceState};

/// Common type aliases.
pub type UserId = String;
pub type ConversationId = String;
/// Client-generated idempotency key for one logical send.
pub type ClientMessageId = String;
/// Server-assigned, time-ordered message id.
pub type MessageId = u64;
/// Per-recipient delivery sequence.
pub type Sequence = u64;
/// Identifies one live connection (and the Synchronizer that owns it).
pub type ConnectionId = u64;

/// Maximum length of any identifier field, in bytes.
pub const MAX_ID_LEN: usize = 128;

/// Default syncing TTL in seconds.
pub const DEFAULT_SYNCING_TTL_SECS: u64 = 60;

/// Default bounded wait for a live-push acknowledgment, in milliseconds.
pub const DEFAULT_PUSH_ACK_TIMEOUT_MS: u64 = 5000;

/// Error returned when parsing a wire-level enum from its string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
