//! Message log queries: idempotent append, backlog scans, status updates
//! and conversation paging.
//!
//! Every read is a bounded range scan from an anchor (`sequence` for a
//! recipient's backlog, `message_id` for a conversation). Nothing here is
//! offset-based, so the cost of a page does not grow with history length.

use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};

use herald_types::{
    ConversationId, Message, MessageId, MessageStatus, NewMessage, ParseEnumError, Sequence,
};

use crate::{DbError, Result};

/// Bits reserved below the millisecond timestamp in a message id.
const MESSAGE_ID_COUNTER_BITS: u32 = 16;

const MESSAGE_COLUMNS: &str = "message_id, conversation_id, recipient_id, sequence, \
     client_message_id, sender_id, content, status, created_at";

/// Outcome of [`append`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new row was stored.
    Inserted(Message),
    /// The idempotency key already existed; this is the original row, unchanged.
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            AppendOutcome::Inserted(m) | AppendOutcome::Duplicate(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            AppendOutcome::Inserted(m) | AppendOutcome::Duplicate(m) => m,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}

/// Scan direction over a recipient's sequence space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// `sequence > bound`, oldest first.
    Ascending,
    /// `sequence < bound`, newest first.
    Descending,
}

/// A bounded range scan over one recipient's messages.
#[derive(Clone, Debug)]
pub struct MessageQuery<'a> {
    pub recipient_id: &'a str,
    /// Exact status match; `None` returns all statuses.
    pub status: Option<MessageStatus>,
    /// Exclusive anchor. `None` starts from the oldest (ascending) or
    /// newest (descending) row.
    pub bound: Option<Sequence>,
    /// Inclusive upper limit on `sequence`, regardless of direction.
    pub until: Option<Sequence>,
    pub limit: u32,
    pub direction: Direction,
}

impl<'a> MessageQuery<'a> {
    /// Undelivered messages for `recipient_id` after `bound`, in delivery order.
    pub fn backlog(recipient_id: &'a str, bound: Option<Sequence>, limit: u32) -> Self {
        Self {
            recipient_id,
            status: Some(MessageStatus::Sent),
            bound,
            until: None,
            limit,
            direction: Direction::Ascending,
        }
    }
}

/// Next time-ordered message id: the current millisecond shifted left,
/// bumped past `last` when the clock has not advanced.
pub fn next_message_id(last: MessageId, now_ms: u64) -> MessageId {
    let from_clock = now_ms << MESSAGE_ID_COUNTER_BITS;
    from_clock.max(last + 1)
}

/// Append a message, idempotent on `(recipient_id, client_message_id)`.
///
/// The insert is conditional on the UNIQUE constraint
/// (`ON CONFLICT DO NOTHING`). When the key already exists the original
/// stored row is returned unchanged, even if `new` carries different
/// content. Sequence and id allocation happen in the same IMMEDIATE
/// transaction, so a duplicate never consumes a sequence number.
pub fn append(conn: &mut Connection, new: &NewMessage, now_ms: u64) -> Result<AppendOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let last_sequence: i64 = tx
        .query_row(
            "SELECT last_sequence FROM recipient_sequences WHERE recipient_id = ?1",
            [new.recipient_id.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    let sequence = last_sequence as u64 + 1;

    let last_id: i64 = tx.query_row(
        "SELECT last_message_id FROM id_clock WHERE id = 1",
        [],
        |row| row.get(0),
    )?;
    let message_id = next_message_id(last_id as u64, now_ms);

    let inserted = tx.execute(
        "INSERT INTO messages (message_id, conversation_id, recipient_id, sequence,
                               client_message_id, sender_id, content, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(recipient_id, client_message_id) DO NOTHING",
        rusqlite::params![
            message_id as i64,
            new.conversation_id,
            new.recipient_id,
            sequence as i64,
            new.client_message_id,
            new.sender_id,
            new.content,
            MessageStatus::Sent.rank(),
            now_ms as i64,
        ],
    )?;

    let outcome = if inserted == 1 {
        tx.execute(
            "INSERT INTO recipient_sequences (recipient_id, last_sequence) VALUES (?1, ?2)
             ON CONFLICT(recipient_id) DO UPDATE SET last_sequence = excluded.last_sequence",
            rusqlite::params![new.recipient_id, sequence as i64],
        )?;
        tx.execute(
            "UPDATE id_clock SET last_message_id = ?1 WHERE id = 1",
            [message_id as i64],
        )?;
        AppendOutcome::Inserted(Message {
            conversation_id: new.conversation_id.clone(),
            sequence,
            message_id,
            client_message_id: new.client_message_id.clone(),
            sender_id: new.sender_id.clone(),
            recipient_id: new.recipient_id.clone(),
            content: new.content.clone(),
            status: MessageStatus::Sent,
            created_at: now_ms,
        })
    } else {
        let original = get_by_client_id(&tx, &new.recipient_id, &new.client_message_id)?
            .ok_or_else(|| DbError::NotFound("conflicting message row".into()))?;
        tracing::debug!(
            recipient = %new.recipient_id,
            client_message_id = %new.client_message_id,
            sequence = original.sequence,
            "duplicate append resolved to original row"
        );
        AppendOutcome::Duplicate(original)
    };

    tx.commit()?;
    Ok(outcome)
}

/// Look up a message by its idempotency key.
pub fn get_by_client_id(
    conn: &Connection,
    recipient_id: &str,
    client_message_id: &str,
) -> Result<Option<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE recipient_id = ?1 AND client_message_id = ?2"
    );
    let row = conn
        .query_row(&sql, [recipient_id, client_message_id], message_from_row)
        .optional()?;
    Ok(row)
}

/// Get a message by its server id.
pub fn get(conn: &Connection, message_id: MessageId) -> Result<Message> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1");
    conn.query_row(&sql, [message_id as i64], message_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("message".into()),
            other => DbError::Sqlite(other),
        })
}

/// Bounded range scan over one recipient's messages.
pub fn query(conn: &Connection, q: &MessageQuery<'_>) -> Result<Vec<Message>> {
    let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE recipient_id = ?");
    let mut params: Vec<Value> = vec![Value::Text(q.recipient_id.to_string())];

    if let Some(status) = q.status {
        sql.push_str(" AND status = ?");
        params.push(Value::Integer(status.rank()));
    }

    let (comparison, order) = match q.direction {
        Direction::Ascending => (">", "ASC"),
        Direction::Descending => ("<", "DESC"),
    };
    if let Some(bound) = q.bound {
        sql.push_str(&format!(" AND sequence {comparison} ?"));
        params.push(Value::Integer(bound as i64));
    }
    if let Some(until) = q.until {
        sql.push_str(" AND sequence <= ?");
        params.push(Value::Integer(until as i64));
    }
    sql.push_str(&format!(" ORDER BY sequence {order} LIMIT ?"));
    params.push(Value::Integer(i64::from(q.limit)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Move the given messages forward to `status`.
///
/// Rows already at or beyond `status` are left untouched. Returns the
/// number of rows that changed.
pub fn update_status(
    conn: &mut Connection,
    ids: &[MessageId],
    status: MessageStatus,
) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut changed = 0;
    {
        let mut stmt = tx.prepare(
            "UPDATE messages SET status = ?1 WHERE message_id = ?2 AND status < ?1",
        )?;
        for id in ids {
            changed += stmt.execute(rusqlite::params![status.rank(), *id as i64])?;
        }
    }
    tx.commit()?;
    Ok(changed)
}

/// Mark every message for `recipient_id` up to and including
/// `up_to_sequence` as read.
pub fn mark_read_through(
    conn: &Connection,
    recipient_id: &str,
    up_to_sequence: Sequence,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE messages SET status = ?1
         WHERE recipient_id = ?2 AND sequence <= ?3 AND status < ?1",
        rusqlite::params![MessageStatus::Read.rank(), recipient_id, up_to_sequence as i64],
    )?;
    Ok(changed)
}

/// One page of a conversation, newest first, strictly older than `before`.
pub fn page(
    conn: &Connection,
    conversation_id: &ConversationId,
    before: Option<MessageId>,
    limit: u32,
) -> Result<Vec<Message>> {
    let rows = match before {
        Some(anchor) => {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND message_id < ?2
                 ORDER BY message_id DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, anchor as i64, i64::from(limit)],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY message_id DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, i64::from(limit)],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

/// Delete a message. Its sequence is not reused.
pub fn delete(conn: &Connection, message_id: MessageId) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM messages WHERE message_id = ?1",
        [message_id as i64],
    )?;
    Ok(removed > 0)
}

/// Highest sequence ever assigned to `recipient_id`, if any.
pub fn latest_sequence(conn: &Connection, recipient_id: &str) -> Result<Option<Sequence>> {
    let last: Option<i64> = conn
        .query_row(
            "SELECT last_sequence FROM recipient_sequences WHERE recipient_id = ?1",
            [recipient_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(last.map(|s| s as u64))
}

/// Number of messages awaiting delivery to `recipient_id`.
pub fn count_backlog(conn: &Connection, recipient_id: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND status = ?2",
        rusqlite::params![recipient_id, MessageStatus::Sent.rank()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let rank: i64 = row.get(7)?;
    let status = MessageStatus::from_rank(rank).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Integer,
            Box::new(ParseEnumError {
                kind: "status rank",
                value: rank.to_string(),
            }),
        )
    })?;
    Ok(Message {
        message_id: row.get::<_, i64>(0)? as u64,
        conversation_id: row.get(1)?,
        recipient_id: row.get(2)?,
        sequence: row.get::<_, i64>(3)? as u64,
        client_message_id: row.get(4)?,
        sender_id: row.get(5)?,
        content: row.get(6)?,
        status,
        created_at: row.get::<_, i64>(8)? as u64,
    })
}
