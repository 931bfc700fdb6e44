//! Cursor-chained conversation history.
//!
//! Pages run newest first. A cursor anchors on the last message id of the
//! previous page and the next page is every message strictly older, so a
//! deleted anchor still yields the right batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use herald_cursor::{CursorCodec, CursorError};
use herald_types::{ConversationId, MessagePage};

use crate::{DeliveryError, MessageLog, Result};

#[derive(Clone, Debug)]
pub struct PageConfig {
    /// Used when the caller gives no limit.
    pub default_limit: u32,
    /// Requested limits are clamped to this.
    pub max_limit: u32,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 200,
        }
    }
}

pub struct Pager<S> {
    log: Arc<S>,
    codec: CursorCodec,
    config: PageConfig,
}

impl<S: MessageLog> Pager<S> {
    pub fn new(log: Arc<S>, codec: CursorCodec, config: PageConfig) -> Self {
        Self { log, codec, config }
    }

    /// Fetch one page. An invalid cursor is rejected with
    /// [`DeliveryError::InvalidCursor`](crate::DeliveryError::InvalidCursor);
    /// the caller restarts without one.
    pub async fn page(
        &self,
        conversation_id: &ConversationId,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<MessagePage> {
        let limit = limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));

        let before = match cursor {
            Some(token) => match self.codec.decode_for(conversation_id, token) {
                Ok(anchor) => Some(anchor),
                Err(e) => {
                    tracing::debug!(conversation = %conversation_id, error = %e, "rejected cursor");
                    return Err(e.into());
                }
            },
            None => None,
        };

        let messages = self.log.page(conversation_id, before, limit).await?;
        let has_more = messages.len() == limit as usize;
        let next_cursor = match messages.last() {
            Some(last) if has_more => Some(
                self.codec
                    .encode(conversation_id, last.message_id, BTreeMap::new())
                    .map_err(encode_failed)?,
            ),
            _ => None,
        };

        Ok(MessagePage {
            messages,
            next_cursor,
            has_more,
        })
    }
}

/// Issuing a cursor is a server fault, never the caller's bad cursor.
fn encode_failed(e: CursorError) -> DeliveryError {
    DeliveryError::Internal(format!("cursor encoding failed: {e}"))
}
