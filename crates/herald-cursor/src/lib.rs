//! # herald-cursor
//!
//! Opaque, tamper-evident pagination cursors.
//!
//! ## Token layout
//!
//! ```text
//! token = base64url_nopad( CBOR(CursorPayload) || tag )
//! tag   = BLAKE3::keyed_hash(K_cursor, CBOR(CursorPayload))      (32 bytes)
//! K_cursor = BLAKE3::derive_key("Herald v1 pagination-cursor", server_secret)
//! ```
//!
//! The payload binds the anchor message id to a scope (a hash of the
//! conversation id), so a token issued for one conversation cannot be
//! replayed against another. Any flipped bit fails the tag check and is
//! reported as an error rather than silently decoded.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use herald_types::MessageId;

/// BLAKE3 derive-key context for the cursor MAC key.
pub const CURSOR_KEY_CONTEXT: &str = "Herald v1 pagination-cursor";

/// BLAKE3 derive-key context for conversation scope hashes.
pub const CURSOR_SCOPE_CONTEXT: &str = "Herald v1 pagination-scope";

/// Current payload version.
pub const CURSOR_VERSION: u8 = 1;

/// Length of the integrity tag in bytes.
pub const TAG_LEN: usize = 32;

/// Longest token accepted by [`CursorCodec::decode`].
pub const MAX_TOKEN_LEN: usize = 1024;

/// Errors produced while decoding a cursor token.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// The token is not valid base64url or is too short to hold a tag.
    #[error("malformed cursor: {0}")]
    Malformed(String),

    /// The token exceeds [`MAX_TOKEN_LEN`].
    #[error("cursor too long: {len} bytes exceeds maximum of {max}")]
    TooLong { len: usize, max: usize },

    /// The integrity tag does not match the payload.
    #[error("cursor integrity check failed")]
    TagMismatch,

    /// The payload was produced by an unknown codec version.
    #[error("unsupported cursor version: {0}")]
    UnsupportedVersion(u8),

    /// The cursor was issued for a different conversation.
    #[error("cursor does not belong to this conversation")]
    ScopeMismatch,

    /// CBOR encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CursorError>;

/// Decoded cursor contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(rename = "a")]
    pub anchor_message_id: MessageId,
    /// `derive_key(CURSOR_SCOPE_CONTEXT, conversation_id)`, truncated to 16 bytes.
    #[serde(rename = "s")]
    pub scope: [u8; 16],
    /// Room for future fields; unknown keys survive a round trip.
    #[serde(rename = "x", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Scope hash of a conversation id.
pub fn scope_of(conversation_id: &str) -> [u8; 16] {
    let full = blake3::derive_key(CURSOR_SCOPE_CONTEXT, conversation_id.as_bytes());
    let mut scope = [0u8; 16];
    scope.copy_from_slice(&full[..16]);
    scope
}

/// Encodes and verifies cursor tokens under one server secret.
#[derive(Clone)]
pub struct CursorCodec {
    key: [u8; 32],
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec").finish_non_exhaustive()
    }
}

impl CursorCodec {
    /// Create a codec whose MAC key is derived from `secret`.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: blake3::derive_key(CURSOR_KEY_CONTEXT, secret),
        }
    }

    /// Create a codec with a fresh random secret.
    ///
    /// Tokens become invalid when the process restarts; clients then
    /// restart from the newest page.
    pub fn random() -> Self {
        let mut secret = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut secret);
        Self::new(&secret)
    }

    /// Encode a cursor anchored at `anchor_message_id` within `conversation_id`.
    pub fn encode(
        &self,
        conversation_id: &str,
        anchor_message_id: MessageId,
        extra: BTreeMap<String, String>,
    ) -> Result<String> {
        let cursor = Cursor {
            version: CURSOR_VERSION,
            anchor_message_id,
            scope: scope_of(conversation_id),
            extra,
        };
        self.encode_cursor(&cursor)
    }

    /// Encode an already-built cursor.
    pub fn encode_cursor(&self, cursor: &Cursor) -> Result<String> {
        let mut buf = Vec::new();
        ciborium::into_writer(cursor, &mut buf)
            .map_err(|e| CursorError::Serialization(format!("CBOR serialization failed: {e}")))?;
        let tag = blake3::keyed_hash(&self.key, &buf);
        buf.extend_from_slice(tag.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(buf))
    }

    /// Verify and decode a token.
    pub fn decode(&self, token: &str) -> Result<Cursor> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(CursorError::TooLong {
                len: token.len(),
                max: MAX_TOKEN_LEN,
            });
        }
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| CursorError::Malformed(e.to_string()))?;
        if raw.len() <= TAG_LEN {
            return Err(CursorError::Malformed("token shorter than tag".into()));
        }

        let (payload, tag) = raw.split_at(raw.len() - TAG_LEN);
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag);
        // blake3::Hash equality is constant-time.
        if blake3::keyed_hash(&self.key, payload) != blake3::Hash::from(tag_bytes) {
            return Err(CursorError::TagMismatch);
        }

        let cursor: Cursor = ciborium::from_reader(payload).map_err(|e| {
            CursorError::Serialization(format!("CBOR deserialization failed: {e}"))
        })?;
        if cursor.version != CURSOR_VERSION {
            return Err(CursorError::UnsupportedVersion(cursor.version));
        }
        Ok(cursor)
    }

    /// Decode a token and check it was issued for `conversation_id`.
    ///
    /// Returns the anchor message id.
    pub fn decode_for(&self, conversation_id: &str, token: &str) -> Result<MessageId> {
        let cursor = self.decode(token)?;
        if cursor.scope != scope_of(conversation_id) {
            return Err(CursorError::ScopeMismatch);
        }
        Ok(cursor.anchor_message_id)
    }
}
