//! herald-daemon: the message delivery daemon.
//!
//! Single OS process running a Tokio async runtime. Clients talk to the
//! daemon via newline-delimited JSON-RPC over a Unix socket.

mod commands;
mod config;
mod events;
mod rpc;
mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use herald_delivery::{
    DeliveryRouter, IngestionGateway, Pager, ReconnectionSynchronizer, RetryPolicy, SqliteLog,
};
use herald_presence::MemoryPresence;
use herald_types::ConnectionId;

use crate::config::DaemonConfig;
use crate::events::{Event, EventBus, EventNotifier};
use crate::rpc::RpcServer;
use crate::session::SessionRegistry;

pub type Gateway = IngestionGateway<SqliteLog, MemoryPresence, SessionRegistry, EventNotifier>;

/// Daemon-wide shared state.
pub struct DaemonState {
    pub log: Arc<SqliteLog>,
    pub presence: Arc<MemoryPresence>,
    pub sessions: Arc<SessionRegistry>,
    pub gateway: Gateway,
    pub pager: Pager<SqliteLog>,
    pub sync: ReconnectionSynchronizer<SqliteLog, MemoryPresence>,
    pub retry: RetryPolicy,
    pub config: DaemonConfig,
    pub event_bus: EventBus,
    next_connection_id: AtomicU64,
}

impl DaemonState {
    /// Wire the delivery pipeline over an opened store.
    pub fn build(
        config: DaemonConfig,
        conn: rusqlite::Connection,
        event_bus: EventBus,
    ) -> anyhow::Result<Self> {
        let log = Arc::new(SqliteLog::new(conn));
        let presence = Arc::new(MemoryPresence::new());
        let sessions = Arc::new(SessionRegistry::new());
        let notifier = Arc::new(EventNotifier::new(event_bus.clone()));

        let router = DeliveryRouter::new(
            log.clone(),
            presence.clone(),
            sessions.clone(),
            notifier,
            config.router_config(),
        );
        let gateway = IngestionGateway::new(log.clone(), Arc::new(router), config.gateway_config());
        let pager = Pager::new(log.clone(), config.cursor_codec()?, config.page_config());
        let sync = ReconnectionSynchronizer::new(log.clone(), presence.clone(), config.sync_config());

        // Random high bits so ids never match presence left by a previous run.
        let base = u64::from(rand::random::<u32>()) << 32;

        Ok(Self {
            log,
            presence,
            sessions,
            gateway,
            pager,
            sync,
            retry: config.retry_policy(),
            config,
            event_bus,
            next_connection_id: AtomicU64::new(base + 1),
        })
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("herald={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!(node = %config.advanced.node_name, "Herald daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = data_dir.join("herald.db");
    let conn = herald_db::open(&db_path)?;

    // 3. Build the delivery pipeline
    let event_bus = EventBus::new(1000);
    let state = Arc::new(DaemonState::build(config, conn, event_bus)?);

    let sweeper = state.presence.spawn_sweeper(Duration::from_secs(
        herald_presence::DEFAULT_SWEEP_INTERVAL_SECS,
    ));

    // 4. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    state.event_bus.emit(Event::now(
        "DaemonStarted",
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "node_name": state.config.advanced.node_name,
        }),
    ));

    // 5. Run the RPC server until shutdown
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Daemon shutting down gracefully");
    sweeper.abort();

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
