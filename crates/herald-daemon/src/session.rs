//! Live client sessions.
//!
//! A session is a socket that called `connect`. Messages go out as
//! `message` notifications on the socket's outbound queue; the client
//! answers with cumulative `ack {up_to_sequence}` calls, which land in a
//! watch channel the waiting push or drain observes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};

use herald_delivery::{ConnectionError, LivePush, PushOutcome, SyncConnection};
use herald_types::{ConnectionId, Message, PresenceRecord, Sequence, UserId};

use crate::rpc::RpcNotification;

/// How long a batch waits for the rest of its acks once the client has
/// acknowledged part of it.
const ACK_SETTLE: Duration = Duration::from_millis(100);

pub struct Session {
    connection_id: ConnectionId,
    user_id: UserId,
    outbound: mpsc::Sender<String>,
    acked: watch::Sender<Sequence>,
}

impl Session {
    pub fn new(connection_id: ConnectionId, user_id: UserId, outbound: mpsc::Sender<String>) -> Self {
        let (acked, _) = watch::channel(0);
        Self {
            connection_id,
            user_id,
            outbound,
            acked,
        }
    }

    /// Record a cumulative acknowledgment. Acks never move backwards.
    pub fn ack(&self, up_to_sequence: Sequence) {
        self.acked.send_if_modified(|current| {
            if up_to_sequence > *current {
                *current = up_to_sequence;
                true
            } else {
                false
            }
        });
    }

    pub fn last_acked(&self) -> Sequence {
        *self.acked.borrow()
    }

    async fn send_message(&self, message: &Message) -> Result<(), ConnectionError> {
        let frame = RpcNotification::new("message", message)
            .and_then(|n| n.to_line())
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    async fn wait_acked(&self, at_least: Sequence) -> Result<Sequence, ConnectionError> {
        let mut rx = self.acked.subscribe();
        let acked = rx
            .wait_for(|acked| *acked >= at_least)
            .await
            .map_err(|_| ConnectionError::Closed)?;
        Ok(*acked)
    }
}

impl SyncConnection for Session {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Resolves on the first ack that reaches into the batch. A partial ack
    /// gets [`ACK_SETTLE`] to grow to the whole batch; whatever is acked by
    /// then is returned, so the synchronizer marks the acknowledged prefix
    /// and resends the rest.
    async fn deliver_batch(&self, batch: &[Message]) -> Result<Sequence, ConnectionError> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Ok(self.last_acked());
        };
        let (first, last) = (first.sequence, last.sequence);
        let mut rx = self.acked.subscribe();
        let before = *rx.borrow_and_update();
        if before >= last {
            return Ok(before);
        }

        for message in batch {
            self.send_message(message).await?;
        }

        let reached = *rx
            .wait_for(|acked| *acked >= first)
            .await
            .map_err(|_| ConnectionError::Closed)?;
        if reached >= last {
            return Ok(reached);
        }

        let settled = match tokio::time::timeout(ACK_SETTLE, rx.wait_for(|acked| *acked >= last)).await {
            Ok(Ok(acked)) => Some(*acked),
            Ok(Err(_)) => return Err(ConnectionError::Closed),
            Err(_) => None,
        };
        Ok(settled.unwrap_or_else(|| *rx.borrow()))
    }
}

/// Sessions held by this daemon, by connection id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .await
            .insert(session.connection_id, session);
    }

    pub async fn remove(&self, connection_id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(&connection_id)
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&connection_id).cloned()
    }
}

impl LivePush for SessionRegistry {
    async fn push(&self, target: &PresenceRecord, message: &Message) -> PushOutcome {
        let Some(session) = self.get(target.connection_id).await else {
            return PushOutcome::Unreachable;
        };
        if let Err(e) = session.send_message(message).await {
            tracing::debug!(connection = target.connection_id, error = %e, "live push failed");
            return PushOutcome::Unreachable;
        }
        match session.wait_acked(message.sequence).await {
            Ok(_) => PushOutcome::Acked,
            Err(_) => PushOutcome::Unreachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_types::{MessageStatus, PresenceState};

    fn message(sequence: Sequence) -> Message {
        Message {
            conversation_id: "c".to_string(),
            sequence,
            message_id: sequence,
            client_message_id: format!("m{sequence}"),
            sender_id: "alice".to_string(),
            recipient_id: "rita".to_string(),
            content: "hi".to_string(),
            status: MessageStatus::Sent,
            created_at: 0,
        }
    }

    fn record(connection_id: ConnectionId) -> PresenceRecord {
        PresenceRecord {
            user_id: "rita".to_string(),
            state: PresenceState::Online,
            server_affinity: "test".to_string(),
            connection_id,
            sync_deadline: None,
        }
    }

    #[test]
    fn test_ack_is_monotonic() {
        let (tx, _rx) = mpsc::channel(4);
        let session = Session::new(1, "rita".to_string(), tx);
        session.ack(5);
        session.ack(3);
        assert_eq!(session.last_acked(), 5);
    }

    #[tokio::test]
    async fn test_deliver_batch_waits_for_cumulative_ack() {
        let (tx, mut rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(1, "rita".to_string(), tx));

        let client = {
            let session = session.clone();
            tokio::spawn(async move {
                let mut frames = Vec::new();
                while frames.len() < 2 {
                    frames.push(rx.recv().await.expect("frame"));
                }
                session.ack(2);
                frames
            })
        };

        let acked = session
            .deliver_batch(&[message(1), message(2)])
            .await
            .expect("acked");
        assert_eq!(acked, 2);

        let frames = client.await.expect("client");
        let first: serde_json::Value = serde_json::from_str(&frames[0]).expect("json");
        assert_eq!(first["method"], "message");
        assert_eq!(first["params"]["sequence"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_batch_returns_partial_ack() {
        let (tx, mut rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(1, "rita".to_string(), tx));

        let client = {
            let session = session.clone();
            tokio::spawn(async move {
                rx.recv().await.expect("frame 1");
                rx.recv().await.expect("frame 2");
                session.ack(1);
                rx
            })
        };

        let acked = session
            .deliver_batch(&[message(1), message(2)])
            .await
            .expect("partial ack");
        assert_eq!(acked, 1);
        assert_eq!(session.last_acked(), 1);
        drop(client.await.expect("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_batch_settles_incremental_acks() {
        let (tx, mut rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(1, "rita".to_string(), tx));

        let client = {
            let session = session.clone();
            tokio::spawn(async move {
                rx.recv().await.expect("frame 1");
                session.ack(1);
                rx.recv().await.expect("frame 2");
                tokio::time::sleep(ACK_SETTLE / 2).await;
                session.ack(2);
                rx
            })
        };

        let acked = session
            .deliver_batch(&[message(1), message(2)])
            .await
            .expect("acked");
        assert_eq!(acked, 2);
        drop(client.await.expect("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_batch_ignores_acks_below_the_batch() {
        let (tx, mut rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(1, "rita".to_string(), tx));

        let client = {
            let session = session.clone();
            tokio::spawn(async move {
                rx.recv().await.expect("frame 3");
                session.ack(2);
                tokio::time::sleep(ACK_SETTLE * 2).await;
                session.ack(3);
                rx
            })
        };

        let acked = session.deliver_batch(&[message(3)]).await.expect("acked");
        assert_eq!(acked, 3);
        drop(client.await.expect("client"));
    }

    #[tokio::test]
    async fn test_deliver_batch_already_acked_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(16);
        let session = Session::new(1, "rita".to_string(), tx);
        session.ack(5);

        let acked = session
            .deliver_batch(&[message(4), message(5)])
            .await
            .expect("acked");
        assert_eq!(acked, 5);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_push_to_unknown_connection_is_unreachable() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.push(&record(9), &message(1)).await,
            PushOutcome::Unreachable
        );
    }

    #[tokio::test]
    async fn test_push_to_closed_socket_is_unreachable() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        registry
            .insert(Arc::new(Session::new(1, "rita".to_string(), tx)))
            .await;
        assert_eq!(
            registry.push(&record(1), &message(1)).await,
            PushOutcome::Unreachable
        );
    }

    #[tokio::test]
    async fn test_push_acked() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        let session = Arc::new(Session::new(1, "rita".to_string(), tx));
        registry.insert(session.clone()).await;

        tokio::spawn(async move {
            let _frame = rx.recv().await;
            session.ack(1);
        });
        assert_eq!(registry.push(&record(1), &message(1)).await, PushOutcome::Acked);
    }
}
