//! Test doubles shared by the unit tests in this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use herald_db::queries::messages::AppendOutcome;
use herald_db::DbError;
use herald_presence::{PresenceDirectory, PresenceError};
use herald_types::{
    ConnectionId, ConversationId, Message, MessageId, MessageStatus, NewMessage, PresenceRecord,
    PresenceState, Sequence,
};

use crate::push::{ConnectionError, LivePush, PushNotifier, PushOutcome, SyncConnection};
use crate::{MessageLog, SqliteLog};

pub fn sqlite_log() -> Arc<SqliteLog> {
    Arc::new(SqliteLog::new(herald_db::open_memory().expect("open test db")))
}

/// A send from alice to rita in conversation `c`.
pub fn new_message(client_id: &str, content: &str) -> NewMessage {
    NewMessage {
        conversation_id: "c".to_string(),
        client_message_id: client_id.to_string(),
        sender_id: "alice".to_string(),
        recipient_id: "rita".to_string(),
        content: content.to_string(),
    }
}

pub async fn append(
    log: &SqliteLog,
    conversation: &str,
    client_id: &str,
    sender: &str,
    recipient: &str,
    content: &str,
) -> Message {
    let new = NewMessage {
        conversation_id: conversation.to_string(),
        client_message_id: client_id.to_string(),
        sender_id: sender.to_string(),
        recipient_id: recipient.to_string(),
        content: content.to_string(),
    };
    log.append(&new).await.expect("append").into_message()
}

pub fn online_record(user: &str, connection_id: ConnectionId) -> PresenceRecord {
    PresenceRecord {
        user_id: user.to_string(),
        state: PresenceState::Online,
        server_affinity: "test-node".to_string(),
        connection_id,
        sync_deadline: None,
    }
}

pub fn busy() -> DbError {
    DbError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        None,
    ))
}

/// Store whose first `failures` appends report SQLITE_BUSY.
pub struct FlakyLog {
    inner: SqliteLog,
    failures: u32,
    attempts: AtomicU32,
}

impl FlakyLog {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: SqliteLog::new(herald_db::open_memory().expect("open test db")),
            failures,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Rows currently stored for rita.
    pub async fn stored(&self) -> usize {
        self.inner
            .backlog("rita", None, None, 1000)
            .await
            .expect("backlog")
            .len()
    }
}

impl MessageLog for FlakyLog {
    async fn append(&self, new: &NewMessage) -> herald_db::Result<AppendOutcome> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(busy());
        }
        self.inner.append(new).await
    }

    async fn backlog(
        &self,
        recipient_id: &str,
        bound: Option<Sequence>,
        until: Option<Sequence>,
        limit: u32,
    ) -> herald_db::Result<Vec<Message>> {
        self.inner.backlog(recipient_id, bound, until, limit).await
    }

    async fn latest_sequence(&self, recipient_id: &str) -> herald_db::Result<Option<Sequence>> {
        self.inner.latest_sequence(recipient_id).await
    }

    async fn update_status(
        &self,
        ids: &[MessageId],
        status: MessageStatus,
    ) -> herald_db::Result<usize> {
        self.inner.update_status(ids, status).await
    }

    async fn mark_read_through(
        &self,
        recipient_id: &str,
        up_to_sequence: Sequence,
    ) -> herald_db::Result<usize> {
        self.inner.mark_read_through(recipient_id, up_to_sequence).await
    }

    async fn page(
        &self,
        conversation_id: &ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> herald_db::Result<Vec<Message>> {
        self.inner.page(conversation_id, before, limit).await
    }

    async fn delete(&self, message_id: MessageId) -> herald_db::Result<bool> {
        self.inner.delete(message_id).await
    }
}

/// Presence directory that is always down.
pub struct FailingPresence;

impl PresenceDirectory for FailingPresence {
    async fn get(&self, _user_id: &str) -> herald_presence::Result<Option<PresenceRecord>> {
        Err(PresenceError::Unavailable("directory down".into()))
    }

    async fn set(
        &self,
        _record: PresenceRecord,
        _ttl: Option<Duration>,
    ) -> herald_presence::Result<()> {
        Err(PresenceError::Unavailable("directory down".into()))
    }

    async fn delete(&self, _user_id: &str) -> herald_presence::Result<()> {
        Err(PresenceError::Unavailable("directory down".into()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notified: Mutex<Vec<Sequence>>,
}

impl RecordingNotifier {
    pub async fn count(&self) -> usize {
        self.notified.lock().await.len()
    }
}

impl PushNotifier for RecordingNotifier {
    async fn notify(&self, message: &Message) {
        self.notified.lock().await.push(message.sequence);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PushMode {
    Ack,
    Silent,
}

/// Live push double recording `(connection_id, sequence)` per attempt.
pub struct ScriptedPush {
    mode: PushMode,
    pushed: Mutex<Vec<(ConnectionId, Sequence)>>,
}

impl ScriptedPush {
    pub fn acking() -> Self {
        Self {
            mode: PushMode::Ack,
            pushed: Mutex::new(Vec::new()),
        }
    }

    /// Never acknowledges.
    pub fn silent() -> Self {
        Self {
            mode: PushMode::Silent,
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub async fn pushed(&self) -> Vec<(ConnectionId, Sequence)> {
        self.pushed.lock().await.clone()
    }
}

impl LivePush for ScriptedPush {
    async fn push(&self, target: &PresenceRecord, message: &Message) -> PushOutcome {
        self.pushed
            .lock()
            .await
            .push((target.connection_id, message.sequence));
        match self.mode {
            PushMode::Ack => PushOutcome::Acked,
            PushMode::Silent => std::future::pending().await,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge the whole batch.
    All,
    /// Acknowledge only the first message of each batch.
    First,
    /// Acknowledge nothing new.
    Stall,
    /// Never answer.
    Silent,
    /// Fail with a closed connection on the first batch.
    Close,
}

/// Sync connection double. Records every batch and optionally appends
/// one queued message to `log` after each batch, simulating sends that
/// arrive while the drain is in flight.
pub struct RecordingConnection {
    id: ConnectionId,
    user: String,
    mode: AckMode,
    batches: Mutex<Vec<Vec<Sequence>>>,
    inject: Mutex<VecDeque<NewMessage>>,
    log: Option<Arc<SqliteLog>>,
    last_ack: Mutex<Option<Sequence>>,
}

impl RecordingConnection {
    pub fn new(id: ConnectionId, user: &str, mode: AckMode) -> Self {
        Self {
            id,
            user: user.to_string(),
            mode,
            batches: Mutex::new(Vec::new()),
            inject: Mutex::new(VecDeque::new()),
            log: None,
            last_ack: Mutex::new(None),
        }
    }

    pub fn injecting(mut self, log: Arc<SqliteLog>, messages: Vec<NewMessage>) -> Self {
        self.log = Some(log);
        self.inject = Mutex::new(messages.into());
        self
    }

    pub async fn batches(&self) -> Vec<Vec<Sequence>> {
        self.batches.lock().await.clone()
    }

    pub async fn delivered(&self) -> Vec<Sequence> {
        self.batches.lock().await.iter().flatten().copied().collect()
    }
}

impl SyncConnection for RecordingConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn user_id(&self) -> &str {
        &self.user
    }

    async fn deliver_batch(&self, batch: &[Message]) -> Result<Sequence, ConnectionError> {
        if self.mode == AckMode::Close {
            return Err(ConnectionError::Closed);
        }
        self.batches
            .lock()
            .await
            .push(batch.iter().map(|m| m.sequence).collect());

        if let Some(log) = &self.log {
            if let Some(next) = self.inject.lock().await.pop_front() {
                log.append(&next).await.expect("inject append");
            }
        }

        let mut last_ack = self.last_ack.lock().await;
        let ack = match self.mode {
            AckMode::All => batch.last().map(|m| m.sequence),
            AckMode::First => batch.first().map(|m| m.sequence),
            AckMode::Stall => *last_ack,
            AckMode::Silent => {
                drop(last_ack);
                return std::future::pending().await;
            }
            AckMode::Close => None,
        };
        *last_ack = ack.or(*last_ack);
        Ok(ack.unwrap_or(0))
    }
}
