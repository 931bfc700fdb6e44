//! Collaborators at the transport edge.
//!
//! Transport details are out of scope; these traits are the contracts
//! the router and synchronizer need from whatever holds the sockets.

use std::future::Future;

use herald_types::{ConnectionId, Message, PresenceRecord, Sequence};

/// Result of a live push attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The recipient's connection acknowledged the message.
    Acked,
    /// No acknowledgment within the bounded wait.
    TimedOut,
    /// The affiliated connection is gone.
    Unreachable,
}

/// Error reported by a live connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Pushes single messages to the connection named by a presence record.
pub trait LivePush: Send + Sync {
    /// Deliver `message` to the connection in `target` and wait for its
    /// acknowledgment. The caller bounds the wait; implementations may
    /// wait indefinitely and must tolerate being dropped mid-wait.
    fn push(
        &self,
        target: &PresenceRecord,
        message: &Message,
    ) -> impl Future<Output = PushOutcome> + Send;
}

/// The live connection a [`ReconnectionSynchronizer`](crate::ReconnectionSynchronizer) owns.
pub trait SyncConnection: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    fn user_id(&self) -> &str;

    /// Send `batch` in order and resolve with the client's cumulative
    /// acknowledgment ("received up to sequence N").
    fn deliver_batch(
        &self,
        batch: &[Message],
    ) -> impl Future<Output = Result<Sequence, ConnectionError>> + Send;
}

/// Out-of-band notification for recipients that could not be reached live.
pub trait PushNotifier: Send + Sync {
    fn notify(&self, message: &Message) -> impl Future<Output = ()> + Send;
}

/// [`PushNotifier`] that only records the request in the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl PushNotifier for LogNotifier {
    async fn notify(&self, message: &Message) {
        tracing::info!(
            recipient = %message.recipient_id,
            sequence = message.sequence,
            "push notification requested"
        );
    }
}
