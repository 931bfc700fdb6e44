//! Message ingress and history command handlers.
//!
//! `send_message` accepts the same append contract as the live transport
//! and converges on the same dedup key.

use std::sync::Arc;

use serde_json::Value;

use herald_delivery::{DeliveryError, MessageLog, RouteOutcome};
use herald_types::NewMessage;

use super::{required_str, required_u64, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Append a message and route it.
pub async fn send_message(state: &Arc<DaemonState>, params: &Value) -> Result {
    let new: NewMessage = serde_json::from_value(params.clone())
        .map_err(|e| RpcError::invalid_params(&e.to_string()))?;

    let ack = state.gateway.send_with_retry(&new, &state.retry).await?;
    let route = match ack.route {
        RouteOutcome::LiveDelivered => "live_delivered",
        RouteOutcome::Persisted(_) => "persisted",
    };

    Ok(serde_json::json!({
        "message_id": ack.receipt.message_id,
        "sequence": ack.receipt.sequence,
        "status": ack.receipt.status,
        "client_message_id": ack.receipt.client_message_id,
        "duplicate": ack.duplicate,
        "route": route,
    }))
}

/// One page of conversation history, newest first.
pub async fn get_page(state: &Arc<DaemonState>, params: &Value) -> Result {
    let conversation_id = required_str(params, "conversation_id")?.to_string();
    let cursor = params.get("cursor").and_then(|v| v.as_str());
    let limit = match params.get("limit").and_then(|v| v.as_u64()) {
        Some(limit) => Some(
            u32::try_from(limit).map_err(|_| RpcError::invalid_params("limit out of range"))?,
        ),
        None => None,
    };

    let page = state.pager.page(&conversation_id, cursor, limit).await?;
    serde_json::to_value(page).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Mark every message up to `up_to_sequence` as read.
pub async fn mark_read(state: &Arc<DaemonState>, params: &Value) -> Result {
    let recipient_id = required_str(params, "recipient_id")?;
    let up_to_sequence = required_u64(params, "up_to_sequence")?;

    let updated = state
        .log
        .mark_read_through(recipient_id, up_to_sequence)
        .await
        .map_err(DeliveryError::from)?;
    Ok(serde_json::json!({"updated": updated}))
}

/// Delete one message. Its sequence is never reassigned.
pub async fn delete_message(state: &Arc<DaemonState>, params: &Value) -> Result {
    let message_id = required_u64(params, "message_id")?;
    let deleted = state
        .log
        .delete(message_id)
        .await
        .map_err(DeliveryError::from)?;
    Ok(serde_json::json!({"deleted": deleted}))
}
