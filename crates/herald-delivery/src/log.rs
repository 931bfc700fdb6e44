//! Async seam over the durable Message Store.
//!
//! Each call takes the connection lock for the duration of one query and
//! releases it before returning, so nothing holds a store connection
//! while waiting on a client acknowledgment.

use std::future::Future;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use herald_db::queries::messages::{self, AppendOutcome, MessageQuery};
use herald_types::{ConversationId, Message, MessageId, MessageStatus, NewMessage, Sequence};

use crate::now_ms;

/// Data-access contract of the Message Store.
pub trait MessageLog: Send + Sync {
    /// Idempotent append keyed by `(recipient_id, client_message_id)`.
    fn append(
        &self,
        new: &NewMessage,
    ) -> impl Future<Output = herald_db::Result<AppendOutcome>> + Send;

    /// `status = sent` rows for `recipient_id` with
    /// `bound < sequence <= until`, ascending.
    fn backlog(
        &self,
        recipient_id: &str,
        bound: Option<Sequence>,
        until: Option<Sequence>,
        limit: u32,
    ) -> impl Future<Output = herald_db::Result<Vec<Message>>> + Send;

    /// Highest sequence assigned to `recipient_id`.
    fn latest_sequence(
        &self,
        recipient_id: &str,
    ) -> impl Future<Output = herald_db::Result<Option<Sequence>>> + Send;

    /// Forward-only status transition. Returns the number of rows changed.
    fn update_status(
        &self,
        ids: &[MessageId],
        status: MessageStatus,
    ) -> impl Future<Output = herald_db::Result<usize>> + Send;

    /// Mark everything up to `up_to_sequence` as read.
    fn mark_read_through(
        &self,
        recipient_id: &str,
        up_to_sequence: Sequence,
    ) -> impl Future<Output = herald_db::Result<usize>> + Send;

    /// Newest-first conversation page strictly older than `before`.
    fn page(
        &self,
        conversation_id: &ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> impl Future<Output = herald_db::Result<Vec<Message>>> + Send;

    /// Remove one message. Returns `false` if it did not exist.
    fn delete(&self, message_id: MessageId) -> impl Future<Output = herald_db::Result<bool>> + Send;
}

/// [`MessageLog`] backed by the SQLite store.
#[derive(Clone)]
pub struct SqliteLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLog {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Wrap a connection already shared with other components.
    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn shared(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

impl MessageLog for SqliteLog {
    async fn append(&self, new: &NewMessage) -> herald_db::Result<AppendOutcome> {
        let mut conn = self.conn.lock().await;
        messages::append(&mut conn, new, now_ms())
    }

    async fn backlog(
        &self,
        recipient_id: &str,
        bound: Option<Sequence>,
        until: Option<Sequence>,
        limit: u32,
    ) -> herald_db::Result<Vec<Message>> {
        let q = MessageQuery {
            until,
            ..MessageQuery::backlog(recipient_id, bound, limit)
        };
        let conn = self.conn.lock().await;
        messages::query(&conn, &q)
    }

    async fn latest_sequence(&self, recipient_id: &str) -> herald_db::Result<Option<Sequence>> {
        let conn = self.conn.lock().await;
        messages::latest_sequence(&conn, recipient_id)
    }

    async fn update_status(
        &self,
        ids: &[MessageId],
        status: MessageStatus,
    ) -> herald_db::Result<usize> {
        let mut conn = self.conn.lock().await;
        messages::update_status(&mut conn, ids, status)
    }

    async fn mark_read_through(
        &self,
        recipient_id: &str,
        up_to_sequence: Sequence,
    ) -> herald_db::Result<usize> {
        let conn = self.conn.lock().await;
        messages::mark_read_through(&conn, recipient_id, up_to_sequence)
    }

    async fn page(
        &self,
        conversation_id: &ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> herald_db::Result<Vec<Message>> {
        let conn = self.conn.lock().await;
        messages::page(&conn, conversation_id, before, limit)
    }

    async fn delete(&self, message_id: MessageId) -> herald_db::Result<bool> {
        let conn = self.conn.lock().await;
        messages::delete(&conn, message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> SqliteLog {
        SqliteLog::new(herald_db::open_memory().expect("open test db"))
    }

    fn new_message(client_id: &str, content: &str) -> NewMessage {
        NewMessage {
            conversation_id: "c".to_string(),
            client_message_id: client_id.to_string(),
            sender_id: "alice".to_string(),
            recipient_id: "rita".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_retries_store_one_row() {
        let log = log();
        let mut handles = Vec::new();
        for i in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(&new_message("x1", &format!("attempt {i}")))
                    .await
                    .expect("append")
                    .into_message()
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("join"));
        }

        let first = &results[0];
        assert!(results.iter().all(|m| m.message_id == first.message_id
            && m.sequence == first.sequence
            && m.content == first.content));

        let backlog = log.backlog("rita", None, None, 10).await.expect("backlog");
        assert_eq!(backlog.len(), 1);
    }

    #[tokio::test]
    async fn test_backlog_with_ceiling() {
        let log = log();
        for i in 1..=4 {
            log.append(&new_message(&format!("m{i}"), "x")).await.expect("append");
        }
        let rows = log.backlog("rita", Some(1), Some(3), 10).await.expect("backlog");
        assert_eq!(rows.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(log.latest_sequence("rita").await.expect("latest"), Some(4));
    }
}
