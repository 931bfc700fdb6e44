//! # herald-presence
//!
//! Ephemeral per-user connectivity directory.
//!
//! Presence is an externally owned key-value collaborator accessed only
//! through [`PresenceDirectory`] (`get` / `set` / `delete`). Every record
//! may carry a TTL so a crashed sync self-heals: once the TTL lapses the
//! record is gone and the user reads as [`PresenceState::Offline`].
//!
//! ## State machine
//!
//! | From | To | Trigger |
//! |---|---|---|
//! | offline | syncing | connection established (TTL set) |
//! | syncing | online | owning Synchronizer confirmed empty backlog |
//! | any | offline | disconnect, heartbeat loss, TTL expiry |
//!
//! Only the Synchronizer owning a connection writes that user's record;
//! routers only read it.

pub mod memory;

use std::future::Future;
use std::time::Duration;

use herald_types::{PresenceRecord, PresenceState};

pub use memory::MemoryPresence;

/// Default interval between sweeps of expired records.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Error types for presence operations.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// The directory could not be reached.
    #[error("presence directory unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, PresenceError>;

/// Access contract for the presence key-value collaborator.
///
/// Implementors provide the actual storage. This abstraction allows the
/// delivery logic to run against an in-process map in tests and a shared
/// network store in production.
pub trait PresenceDirectory: Send + Sync {
    /// Fetch a user's record. Expired records read as `None`.
    fn get(&self, user_id: &str) -> impl Future<Output = Result<Option<PresenceRecord>>> + Send;

    /// Replace a user's record, optionally expiring it after `ttl`.
    fn set(
        &self,
        record: PresenceRecord,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove a user's record.
    fn delete(&self, user_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Current state of `user_id`; a missing record is `Offline`.
pub async fn state_of<P: PresenceDirectory>(directory: &P, user_id: &str) -> Result<PresenceState> {
    Ok(directory
        .get(user_id)
        .await?
        .map(|record| record.state)
        .unwrap_or(PresenceState::Offline))
}
