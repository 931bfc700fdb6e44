//! Reconnection Synchronizer.
//!
//! Drives one reconnecting session through
//! `Connecting -> Syncing -> Draining -> FinalCheck -> Online`.
//!
//! The synchronizer that owns a connection is the only writer of that
//! user's presence record. While the record says `syncing` the router
//! persists everything, so backlog replay and live delivery never race.
//! The syncing record carries a TTL: if the session dies mid-drain the
//! record expires and the user reads as offline again.

use std::sync::Arc;
use std::time::Duration;

use herald_presence::PresenceDirectory;
use herald_types::{
    ConnectionId, MessageStatus, PresenceRecord, PresenceState, Sequence, DEFAULT_SYNCING_TTL_SECS,
};

use crate::push::SyncConnection;
use crate::{now_ms, DeliveryError, MessageLog, Result};

/// Default number of extra drain rounds FinalCheck may run.
pub const DEFAULT_FINAL_CHECK_ROUNDS: u32 = 3;

/// Default backlog batch size.
pub const DEFAULT_DRAIN_BATCH_SIZE: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    Connecting,
    Syncing,
    Draining,
    FinalCheck,
    Online,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Lifetime of the `syncing` record; refreshed after every acked batch.
    pub syncing_ttl: Duration,
    /// Lease on the `online` record, renewed by heartbeats. `None` keeps
    /// the record until explicit disconnect.
    pub online_ttl: Option<Duration>,
    pub batch_size: u32,
    pub final_check_rounds: u32,
    /// Bounded wait for the client's cumulative acknowledgment of a batch.
    pub ack_timeout: Duration,
    /// Written into presence records so routers know which node holds the
    /// connection.
    pub server_affinity: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            syncing_ttl: Duration::from_secs(DEFAULT_SYNCING_TTL_SECS),
            online_ttl: Some(Duration::from_secs(90)),
            batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            final_check_rounds: DEFAULT_FINAL_CHECK_ROUNDS,
            ack_timeout: Duration::from_secs(5),
            server_affinity: "local".to_string(),
        }
    }
}

/// Summary of one synchronizer run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub phases: Vec<SyncPhase>,
    /// Messages acknowledged and marked delivered.
    pub delivered: usize,
    pub last_acked: Option<Sequence>,
    /// FinalCheck rounds that found and drained stragglers.
    pub final_check_rounds: u32,
    /// FinalCheck hit its bound with backlog remaining.
    pub bound_exceeded: bool,
}

impl SyncReport {
    fn enter(&mut self, phase: SyncPhase, user_id: &str) {
        tracing::debug!(user = %user_id, ?phase, "sync phase");
        self.phases.push(phase);
    }

    pub fn phase(&self) -> Option<SyncPhase> {
        self.phases.last().copied()
    }
}

pub struct ReconnectionSynchronizer<S, P> {
    log: Arc<S>,
    presence: Arc<P>,
    config: SyncConfig,
}

impl<S, P> ReconnectionSynchronizer<S, P>
where
    S: MessageLog,
    P: PresenceDirectory,
{
    pub fn new(log: Arc<S>, presence: Arc<P>, config: SyncConfig) -> Self {
        Self {
            log,
            presence,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run a full reconnect for `conn`.
    ///
    /// Returns once the user is `online`. On error the syncing record is
    /// left to expire. Once this run's syncing record has been written, its
    /// disappearance (disconnect or expiry) ends the run with
    /// [`DeliveryError::LeaseLost`] instead of bringing the user back online.
    pub async fn run<C: SyncConnection>(&self, conn: &C) -> Result<SyncReport> {
        let user_id = conn.user_id();
        let mut report = SyncReport::default();
        report.enter(SyncPhase::Connecting, user_id);

        let mut held = match self.write_syncing(conn).await {
            Ok(()) => true,
            Err(e) => {
                // Routers cannot read presence either, so they persist-only.
                tracing::warn!(user = %user_id, error = %e, "could not set syncing presence");
                false
            }
        };
        report.enter(SyncPhase::Syncing, user_id);

        report.enter(SyncPhase::Draining, user_id);
        self.drain_pass(conn, &mut report, Some(&mut held)).await?;

        report.enter(SyncPhase::FinalCheck, user_id);
        let mut remaining = self.has_backlog(user_id).await?;
        while remaining && report.final_check_rounds < self.config.final_check_rounds {
            report.final_check_rounds += 1;
            self.drain_pass(conn, &mut report, Some(&mut held)).await?;
            remaining = self.has_backlog(user_id).await?;
        }
        if remaining {
            report.bound_exceeded = true;
            let err = DeliveryError::SyncIterationBoundExceeded {
                rounds: self.config.final_check_rounds,
            };
            tracing::warn!(user = %user_id, error = %err, "going online with backlog remaining");
        }

        self.write_online(conn, held).await?;
        report.enter(SyncPhase::Online, user_id);

        tracing::info!(
            user = %user_id,
            connection = conn.connection_id(),
            delivered = report.delivered,
            final_check_rounds = report.final_check_rounds,
            "session online"
        );
        Ok(report)
    }

    /// Deliver stragglers to an already-online session.
    pub async fn poll<C: SyncConnection>(&self, conn: &C) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.drain_pass(conn, &mut report, None).await?;
        Ok(report)
    }

    /// Renew the online lease held by `connection_id`.
    pub async fn heartbeat(&self, user_id: &str, connection_id: ConnectionId) -> Result<()> {
        let owned = self.owned_record(user_id, connection_id).await?;
        let ttl = match owned.state {
            PresenceState::Online => self.config.online_ttl,
            _ => Some(self.config.syncing_ttl),
        };
        let record = self.record(user_id, connection_id, owned.state);
        self.presence.set(record, ttl).await?;
        Ok(())
    }

    /// Remove the presence record if `connection_id` still owns it.
    /// Returns whether a record was removed.
    pub async fn disconnect(&self, user_id: &str, connection_id: ConnectionId) -> Result<bool> {
        match self.presence.get(user_id).await? {
            Some(record) if record.is_owned_by(connection_id) => {
                self.presence.delete(user_id).await?;
                tracing::debug!(user = %user_id, connection = connection_id, "presence cleared");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// One drain over the backlog as of now: every `sent` row up to the
    /// latest sequence at pass start, in ascending batches.
    ///
    /// With `lease`, the syncing record is refreshed after every batch and
    /// `lease` tracks whether this run has written it.
    async fn drain_pass<C: SyncConnection>(
        &self,
        conn: &C,
        report: &mut SyncReport,
        mut lease: Option<&mut bool>,
    ) -> Result<()> {
        let user_id = conn.user_id();
        let Some(ceiling) = self.log.latest_sequence(user_id).await? else {
            return Ok(());
        };

        let mut bound: Option<Sequence> = None;
        loop {
            let batch = self
                .log
                .backlog(user_id, bound, Some(ceiling), self.config.batch_size)
                .await?;
            if batch.is_empty() {
                return Ok(());
            }

            let ack = tokio::time::timeout(self.config.ack_timeout, conn.deliver_batch(&batch))
                .await
                .map_err(|_| DeliveryError::AckTimeout(self.config.ack_timeout))??;

            let acked: Vec<_> = batch.iter().filter(|m| m.sequence <= ack).collect();
            let Some(last) = acked.last().map(|m| m.sequence) else {
                return Err(DeliveryError::AckStalled {
                    last_acked: report.last_acked,
                });
            };
            let ids: Vec<_> = acked.iter().map(|m| m.message_id).collect();
            self.log.update_status(&ids, MessageStatus::Delivered).await?;

            tracing::debug!(
                user = %user_id,
                batch = batch.len(),
                acked = ids.len(),
                up_to = last,
                "backlog batch acknowledged"
            );
            report.delivered += ids.len();
            report.last_acked = Some(last);
            bound = Some(last);

            if let Some(held) = lease.as_deref_mut() {
                *held = self.refresh_syncing(conn, *held).await?;
            }
        }
    }

    async fn has_backlog(&self, user_id: &str) -> Result<bool> {
        Ok(!self.log.backlog(user_id, None, None, 1).await?.is_empty())
    }

    fn record(&self, user_id: &str, connection_id: ConnectionId, state: PresenceState) -> PresenceRecord {
        let sync_deadline = match state {
            PresenceState::Syncing => Some(now_ms() + self.config.syncing_ttl.as_millis() as u64),
            _ => None,
        };
        PresenceRecord {
            user_id: user_id.to_string(),
            state,
            server_affinity: self.config.server_affinity.clone(),
            connection_id,
            sync_deadline,
        }
    }

    async fn write_syncing<C: SyncConnection>(&self, conn: &C) -> Result<()> {
        let record = self.record(conn.user_id(), conn.connection_id(), PresenceState::Syncing);
        self.presence
            .set(record, Some(self.config.syncing_ttl))
            .await?;
        Ok(())
    }

    /// Extend the syncing TTL. Fails with `LeaseLost` if another connection
    /// took the record, or if the record this run wrote is gone. Returns
    /// whether the run now holds a syncing record.
    async fn refresh_syncing<C: SyncConnection>(&self, conn: &C, held: bool) -> Result<bool> {
        match self.presence.get(conn.user_id()).await {
            Ok(Some(record)) if !record.is_owned_by(conn.connection_id()) => {
                Err(DeliveryError::LeaseLost(conn.connection_id()))
            }
            Ok(None) if held => {
                tracing::debug!(
                    user = %conn.user_id(),
                    connection = conn.connection_id(),
                    "syncing record gone mid-drain"
                );
                Err(DeliveryError::LeaseLost(conn.connection_id()))
            }
            Ok(_) => match self.write_syncing(conn).await {
                Ok(()) => Ok(true),
                Err(e) => {
                    tracing::warn!(user = %conn.user_id(), error = %e, "syncing lease not refreshed");
                    Ok(held)
                }
            },
            Err(e) => {
                tracing::warn!(user = %conn.user_id(), error = %e, "syncing lease not refreshed");
                Ok(held)
            }
        }
    }

    /// Flip to `online`. A missing record only counts as ours when this run
    /// never managed to write one.
    async fn write_online<C: SyncConnection>(&self, conn: &C, held: bool) -> Result<()> {
        match self.presence.get(conn.user_id()).await? {
            Some(record) if !record.is_owned_by(conn.connection_id()) => {
                return Err(DeliveryError::LeaseLost(conn.connection_id()));
            }
            None if held => return Err(DeliveryError::LeaseLost(conn.connection_id())),
            _ => {}
        }
        let record = self.record(conn.user_id(), conn.connection_id(), PresenceState::Online);
        self.presence.set(record, self.config.online_ttl).await?;
        Ok(())
    }

    async fn owned_record(&self, user_id: &str, connection_id: ConnectionId) -> Result<PresenceRecord> {
        match self.presence.get(user_id).await? {
            Some(record) if record.is_owned_by(connection_id) => Ok(record),
            _ => Err(DeliveryError::LeaseLost(connection_id)),
        }
    }
}
