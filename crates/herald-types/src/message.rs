//! Stored message rows and their delivery status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ClientMessageId, ConversationId, MessageId, ParseEnumError, Sequence, UserId};

/// Delivery status of a stored message.
///
/// Status only moves forward: `Sent -> Delivered -> Read`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ts_rs::TS,
)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Durably stored, not yet acknowledged by the recipient.
    Sent,
    /// Acknowledged by the recipient's connection.
    Delivered,
    /// Read by the recipient.
    Read,
}

impl MessageStatus {
    /// Numeric rank persisted in the store. Higher ranks are later states.
    pub fn rank(self) -> i64 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }

    /// Inverse of [`rank`](Self::rank).
    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(MessageStatus::Sent),
            1 => Some(MessageStatus::Delivered),
            2 => Some(MessageStatus::Read),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(ParseEnumError {
                kind: "message status",
                value: other.to_string(),
            }),
        }
    }
}

/// An inbound send, before the store assigns ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    /// Idempotency key. Retries of one logical send must reuse it.
    pub client_message_id: ClientMessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
}

/// A message as stored in the Message Store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Message {
    pub conversation_id: ConversationId,
    /// Monotonic per recipient; assigned once, never reused.
    pub sequence: Sequence,
    /// Server-assigned, time-ordered.
    pub message_id: MessageId,
    pub client_message_id: ClientMessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub status: MessageStatus,
    /// Unix epoch milliseconds.
    pub created_at: u64,
}

impl Message {
    /// The acknowledgment a sender receives for this row.
    pub fn receipt(&self) -> AppendReceipt {
        AppendReceipt {
            message_id: self.message_id,
            sequence: self.sequence,
            status: self.status,
            client_message_id: self.client_message_id.clone(),
        }
    }
}

/// Result of `Append`, identical for a fresh insert and for every retry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct AppendReceipt {
    pub message_id: MessageId,
    pub sequence: Sequence,
    pub status: MessageStatus,
    pub client_message_id: ClientMessageId,
}
