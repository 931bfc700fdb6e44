//! SQL schema definitions.

/// Complete schema for Herald v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Messages
-- ============================================================

CREATE TABLE IF NOT EXISTS messages (
    message_id INTEGER PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    client_message_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    content TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0 CHECK (status IN (0, 1, 2)),
    created_at INTEGER NOT NULL,
    UNIQUE (recipient_id, client_message_id),
    UNIQUE (recipient_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_messages_backlog ON messages(recipient_id, status, sequence);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, message_id);

-- ============================================================
-- Allocators
-- ============================================================

-- Last sequence handed out per recipient. Survives message deletion so
-- sequences are never reused.
CREATE TABLE IF NOT EXISTS recipient_sequences (
    recipient_id TEXT PRIMARY KEY,
    last_sequence INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS id_clock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_message_id INTEGER NOT NULL
);
"#;
