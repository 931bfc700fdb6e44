//! Presence records for the ephemeral connectivity directory.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ConnectionId, UserId};

/// Connectivity state of a user.
///
/// The absence of a record means [`PresenceState::Offline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Offline,
    /// Connected, backlog replay in progress. Live push is not allowed.
    Syncing,
    /// Backlog drained; the router may push live.
    Online,
}

impl PresenceState {
    /// Only `Online` users may receive a live push.
    pub fn accepts_live_push(self) -> bool {
        matches!(self, PresenceState::Online)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PresenceState::Offline => "offline",
            PresenceState::Syncing => "syncing",
            PresenceState::Online => "online",
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's presence entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub state: PresenceState,
    /// Name of the server holding the user's connection.
    pub server_affinity: String,
    /// The connection whose Synchronizer owns this record.
    pub connection_id: ConnectionId,
    /// Unix epoch milliseconds after which a `Syncing` record is void.
    pub sync_deadline: Option<u64>,
}

impl PresenceRecord {
    /// Whether `connection_id` is the owner allowed to mutate this record.
    pub fn is_owned_by(&self, connection_id: ConnectionId) -> bool {
        self.connection_id == connection_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_online_accepts_live_push() {
        assert!(PresenceState::Online.accepts_live_push());
        assert!(!PresenceState::Syncing.accepts_live_push());
        assert!(!PresenceState::Offline.accepts_live_push());
    }
}
