//! Live session command handlers.

use std::sync::Arc;

use serde_json::Value;

use herald_delivery::SyncConnection;
use herald_presence::PresenceDirectory;
use herald_types::{PresenceState, MAX_ID_LEN};

use super::{required_str, required_u64, Result};
use crate::rpc::{ClientContext, RpcError};
use crate::session::Session;
use crate::DaemonState;

/// Attach this socket to `user_id` and run the reconnect drain.
///
/// Backlog arrives as `message` notifications while this call is pending;
/// it returns once the user is online.
pub async fn connect(state: &Arc<DaemonState>, ctx: &Arc<ClientContext>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    if user_id.is_empty() || user_id.len() > MAX_ID_LEN {
        return Err(RpcError::invalid_params("user_id must be 1-128 bytes"));
    }

    let session = Arc::new(Session::new(
        ctx.connection_id,
        user_id.to_string(),
        ctx.outbound.clone(),
    ));
    {
        let mut slot = ctx.session.lock().await;
        if slot.is_some() {
            return Err(RpcError::invalid_request("socket already connected"));
        }
        *slot = Some(session.clone());
    }
    state.sessions.insert(session.clone()).await;

    match state.sync.run(session.as_ref()).await {
        Ok(report) => Ok(serde_json::json!({
            "connection_id": ctx.connection_id,
            "state": PresenceState::Online,
            "delivered": report.delivered,
            "last_acked": report.last_acked,
            "final_check_rounds": report.final_check_rounds,
            "bound_exceeded": report.bound_exceeded,
        })),
        Err(e) => {
            tracing::warn!(user = %user_id, connection = ctx.connection_id, error = %e, "sync failed");
            state.sessions.remove(ctx.connection_id).await;
            *ctx.session.lock().await = None;
            Err(e.into())
        }
    }
}

/// Cumulative acknowledgment: "received up to sequence N".
pub async fn ack(ctx: &Arc<ClientContext>, params: &Value) -> Result {
    let up_to_sequence = required_u64(params, "up_to_sequence")?;
    let session = ctx.session().await?;
    session.ack(up_to_sequence);
    Ok(serde_json::json!({"acked": session.last_acked()}))
}

/// Renew this session's presence lease.
pub async fn heartbeat(state: &Arc<DaemonState>, ctx: &Arc<ClientContext>) -> Result {
    let session = ctx.session().await?;
    state
        .sync
        .heartbeat(session.user_id(), ctx.connection_id)
        .await?;
    Ok(serde_json::json!(true))
}

/// Deliver any `sent` stragglers to an online session.
pub async fn poll(state: &Arc<DaemonState>, ctx: &Arc<ClientContext>) -> Result {
    let session = ctx.session().await?;
    let report = state.sync.poll(session.as_ref()).await?;
    Ok(serde_json::json!({
        "delivered": report.delivered,
        "last_acked": report.last_acked,
    }))
}

pub async fn disconnect(state: &Arc<DaemonState>, ctx: &Arc<ClientContext>) -> Result {
    ctx.session().await?;
    let removed = close(state, ctx).await;
    Ok(serde_json::json!({"removed": removed}))
}

/// Presence of any user, for diagnostics.
pub async fn get_presence(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_str(params, "user_id")?;
    let record = state
        .presence
        .get(user_id)
        .await
        .map_err(|e| RpcError::presence_unavailable(&e.to_string()))?;
    Ok(match record {
        Some(record) => serde_json::json!({
            "state": record.state,
            "connection_id": record.connection_id,
            "server_affinity": record.server_affinity,
            "sync_deadline": record.sync_deadline,
        }),
        None => serde_json::json!({"state": PresenceState::Offline}),
    })
}

/// Detach the socket's session, clearing presence if this socket still
/// owns it. Returns whether a presence record was removed.
pub async fn close(state: &Arc<DaemonState>, ctx: &Arc<ClientContext>) -> bool {
    let Some(session) = ctx.session.lock().await.take() else {
        return false;
    };
    state.sessions.remove(ctx.connection_id).await;

    let user_id = session.user_id();
    match state.sync.disconnect(user_id, ctx.connection_id).await {
        Ok(removed) => removed,
        Err(e) => {
            // The record expires on its own.
            tracing::warn!(user = %user_id, error = %e, "presence not cleared on disconnect");
            false
        }
    }
}
