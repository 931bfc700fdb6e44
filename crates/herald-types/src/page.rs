//! Conversation history pages.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// One page of a conversation, newest first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Opaque token resuming after the last message of this page.
    pub next_cursor: Option<String>,
    /// True iff the page is full.
    pub has_more: bool,
}
