//! Shared harness for the delivery scenario tests.
//!
//! Wires the real pipeline (SQLite store, in-memory presence, router,
//! gateway, synchronizer, pager) around scripted client doubles that
//! record the order and path of every message they receive.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use herald_cursor::CursorCodec;
use herald_delivery::{
    ConnectionError, DeliveryRouter, GatewayConfig, IngestionGateway, LivePush, LogNotifier,
    PageConfig, Pager, PushOutcome, ReconnectionSynchronizer, RouterConfig, SqliteLog, SyncConfig,
    SyncConnection,
};
use herald_presence::MemoryPresence;
use herald_types::{ConnectionId, Message, NewMessage, PresenceRecord, Sequence};

pub type Gateway = IngestionGateway<SqliteLog, MemoryPresence, LiveClients, LogNotifier>;
pub type Synchronizer = ReconnectionSynchronizer<SqliteLog, MemoryPresence>;

/// How a message reached the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Path {
    Backlog,
    Live,
}

/// Everything one client connection has received, in arrival order.
#[derive(Default)]
pub struct Inbox {
    arrivals: Mutex<Vec<(Path, Sequence, String)>>,
}

impl Inbox {
    async fn record(&self, path: Path, message: &Message) {
        self.arrivals
            .lock()
            .await
            .push((path, message.sequence, message.content.clone()));
    }

    pub async fn sequences(&self) -> Vec<Sequence> {
        self.arrivals.lock().await.iter().map(|a| a.1).collect()
    }

    pub async fn contents(&self) -> Vec<String> {
        self.arrivals.lock().await.iter().map(|a| a.2.clone()).collect()
    }

    pub async fn paths(&self) -> Vec<Path> {
        self.arrivals.lock().await.iter().map(|a| a.0).collect()
    }
}

/// Pauses the first backlog batch until the test releases it.
pub struct Gate {
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

/// Reconnecting client. Acknowledges every batch in full.
pub struct Client {
    id: ConnectionId,
    user: String,
    pub inbox: Arc<Inbox>,
    gate: Mutex<Option<Gate>>,
}

impl Client {
    pub fn new(id: ConnectionId, user: &str) -> Self {
        Self {
            id,
            user: user.to_string(),
            inbox: Arc::new(Inbox::default()),
            gate: Mutex::new(None),
        }
    }

    pub fn gated(id: ConnectionId, user: &str, gate: Gate) -> Self {
        Self {
            gate: Mutex::new(Some(gate)),
            ..Self::new(id, user)
        }
    }
}

impl SyncConnection for Client {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn user_id(&self) -> &str {
        &self.user
    }

    async fn deliver_batch(&self, batch: &[Message]) -> Result<Sequence, ConnectionError> {
        for message in batch {
            self.inbox.record(Path::Backlog, message).await;
        }
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        Ok(batch.last().map(|m| m.sequence).unwrap_or(0))
    }
}

/// Live-push side of every connected [`Client`].
#[derive(Default)]
pub struct LiveClients {
    inboxes: Mutex<HashMap<ConnectionId, Arc<Inbox>>>,
}

impl LiveClients {
    pub async fn register(&self, client: &Client) {
        self.inboxes
            .lock()
            .await
            .insert(client.id, client.inbox.clone());
    }
}

impl LivePush for LiveClients {
    async fn push(&self, target: &PresenceRecord, message: &Message) -> PushOutcome {
        let inbox = self.inboxes.lock().await.get(&target.connection_id).cloned();
        match inbox {
            Some(inbox) => {
                inbox.record(Path::Live, message).await;
                PushOutcome::Acked
            }
            None => PushOutcome::Unreachable,
        }
    }
}

pub struct Harness {
    pub log: Arc<SqliteLog>,
    pub presence: Arc<MemoryPresence>,
    pub live: Arc<LiveClients>,
    pub gateway: Arc<Gateway>,
    pub sync: Arc<Synchronizer>,
    pub pager: Pager<SqliteLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_sync_config(SyncConfig::default())
    }

    pub fn with_sync_config(sync_config: SyncConfig) -> Self {
        let conn = herald_db::open_memory().expect("open test db");
        Self::over(SqliteLog::new(conn), sync_config)
    }

    pub fn over(log: SqliteLog, sync_config: SyncConfig) -> Self {
        let log = Arc::new(log);
        let presence = Arc::new(MemoryPresence::new());
        let live = Arc::new(LiveClients::default());
        let router = DeliveryRouter::new(
            log.clone(),
            presence.clone(),
            live.clone(),
            Arc::new(LogNotifier),
            RouterConfig::default(),
        );
        let gateway = Arc::new(IngestionGateway::new(
            log.clone(),
            Arc::new(router),
            GatewayConfig::default(),
        ));
        let sync = Arc::new(ReconnectionSynchronizer::new(
            log.clone(),
            presence.clone(),
            sync_config,
        ));
        let pager = Pager::new(
            log.clone(),
            CursorCodec::new(b"integration test cursor key"),
            PageConfig::default(),
        );
        Self {
            log,
            presence,
            live,
            gateway,
            sync,
            pager,
        }
    }
}

pub fn send(
    conversation: &str,
    client_message_id: &str,
    sender: &str,
    recipient: &str,
    content: &str,
) -> NewMessage {
    NewMessage {
        conversation_id: conversation.to_string(),
        client_message_id: client_message_id.to_string(),
        sender_id: sender.to_string(),
        recipient_id: recipient.to_string(),
        content: content.to_string(),
    }
}
