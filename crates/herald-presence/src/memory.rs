//! In-process presence directory with TTL expiry.
//!
//! Expiry is checked lazily on every read, so an expired record is never
//! observed even if the sweeper has not run yet. The sweeper only bounds
//! memory.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use herald_types::{PresenceRecord, UserId};

use crate::{PresenceDirectory, Result};

/// Internal storage entry wrapping a record with its expiry.
#[derive(Clone, Debug)]
struct Entry {
    record: PresenceRecord,
    /// `None` means the record lives until deleted or replaced.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Presence directory backed by a process-local map.
#[derive(Debug, Default)]
pub struct MemoryPresence {
    entries: RwLock<HashMap<UserId, Entry>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired records. Returns the number removed.
    pub async fn expire(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("Expired {removed} presence records");
        }
        removed
    }

    /// Number of live (non-expired) records.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Periodically purge expired records until the directory is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(directory) = weak.upgrade() else {
                    break;
                };
                directory.expire().await;
            }
        })
    }
}

impl PresenceDirectory for MemoryPresence {
    async fn get(&self, user_id: &str) -> Result<Option<PresenceRecord>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(user_id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.record.clone()))
    }

    async fn set(&self, record: PresenceRecord, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        tracing::trace!(
            user = %record.user_id,
            state = %record.state,
            connection = record.connection_id,
            "presence set"
        );
        self.entries
            .write()
            .await
            .insert(record.user_id.clone(), Entry { record, expires_at });
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.entries.write().await.remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_of;
    use herald_types::PresenceState;

    fn record(user: &str, state: PresenceState) -> PresenceRecord {
        PresenceRecord {
            user_id: user.to_string(),
            state,
            server_affinity: "node-a".to_string(),
            connection_id: 1,
            sync_deadline: None,
        }
    }

    #[tokio::test]
    async fn test_absent_record_is_offline() {
        let directory = MemoryPresence::new();
        assert_eq!(
            state_of(&directory, "rita").await.expect("state"),
            PresenceState::Offline
        );
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let directory = MemoryPresence::new();
        directory
            .set(record("rita", PresenceState::Online), None)
            .await
            .expect("set");
        assert_eq!(
            state_of(&directory, "rita").await.expect("state"),
            PresenceState::Online
        );

        directory.delete("rita").await.expect("delete");
        assert!(directory.get("rita").await.expect("get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_syncing_ttl_expires_to_offline() {
        let directory = MemoryPresence::new();
        directory
            .set(record("rita", PresenceState::Syncing), Some(Duration::from_secs(1)))
            .await
            .expect("set");
        assert_eq!(
            state_of(&directory, "rita").await.expect("state"),
            PresenceState::Syncing
        );

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            state_of(&directory, "rita").await.expect("state"),
            PresenceState::Offline
        );
        assert_eq!(directory.expire().await, 1);
        assert!(directory.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_without_ttl_clears_previous_ttl() {
        let directory = MemoryPresence::new();
        directory
            .set(record("rita", PresenceState::Syncing), Some(Duration::from_secs(1)))
            .await
            .expect("set syncing");
        directory
            .set(record("rita", PresenceState::Online), None)
            .await
            .expect("set online");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            state_of(&directory, "rita").await.expect("state"),
            PresenceState::Online
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_records() {
        let directory = Arc::new(MemoryPresence::new());
        let handle = directory.spawn_sweeper(Duration::from_secs(1));
        directory
            .set(record("rita", PresenceState::Syncing), Some(Duration::from_millis(500)))
            .await
            .expect("set");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(directory.entries.read().await.len(), 0);

        drop(directory);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
