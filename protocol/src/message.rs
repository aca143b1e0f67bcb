//! The closed message vocabulary carried over the websocket.
//!
//! ARCHITECTURE
//! ============
//! Two enums, one per direction. Clients only ever send [`ClientMessage`]
//! and only ever receive [`ServerMessage`]; the server is the mirror image.
//! Each variant is one wire event with a fixed payload; the `type` tag
//! selects the variant, so dispatch is exhaustive on both sides.
//!
//! Timer flow: a controller sends `timerCommand` (intent), the server
//! answers every member (including the sender) with `timerState`
//! (authority). Clients never trust their own command echo; they reseed
//! from the broadcast like everyone else.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::code::SessionCode;

/// Error returned when an inbound text frame cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// PAYLOAD TYPES
// =============================================================================

/// Authoritative countdown state, as stamped by the server clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub running: bool,
    pub remaining_seconds: u64,
    /// Milliseconds since the Unix epoch on the server clock when this
    /// snapshot was taken. Informational; clients extrapolate from their
    /// own wall clock starting at the moment of receipt.
    pub server_timestamp_ms: i64,
}

/// One unit of transcribed speech, interim or final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionFragment {
    pub text: String,
    /// Language the fragment was spoken in (e.g. `"en-US"`).
    pub source_language: String,
    /// Final fragments end an utterance; interim ones are superseded by the
    /// next fragment for the same utterance.
    pub is_final: bool,
    /// Pre-computed translations keyed by target language. May be partial
    /// or empty; consumers request anything missing themselves.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub translations: BTreeMap<String, String>,
}

impl CaptionFragment {
    /// Look up a carried translation for the given target language.
    #[must_use]
    pub fn translation_for(&self, language: &str) -> Option<&str> {
        self.translations.get(language).map(String::as_str)
    }
}

// =============================================================================
// CLIENT → SERVER
// =============================================================================

/// Every message a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a session room. Idempotency is the sender's responsibility;
    /// the server treats a repeat join as a no-op re-ack.
    JoinSession {
        code: SessionCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<String>,
    },
    /// Leave the current session room.
    LeaveSession { code: SessionCode },
    /// Controller intent: set the timer to this state. The server replies
    /// with an authoritative `timerState` broadcast.
    TimerCommand {
        code: SessionCode,
        running: bool,
        remaining_seconds: u64,
    },
    /// Controller intent: clear the timer for everyone.
    TimerReset { code: SessionCode },
    /// Ask for the current timer state (late joiners).
    RequestTimerState { code: SessionCode },
    /// Controller intent: replace the session objective text.
    SetObjective { code: SessionCode, text: String },
    /// Controller → server: publish a caption fragment to the room.
    Caption {
        code: SessionCode,
        fragment: CaptionFragment,
    },
    /// Per-consumer translation request; answered directly, not broadcast.
    RequestTranslation {
        text: String,
        source_language: String,
        target_language: String,
    },
}

// =============================================================================
// SERVER → CLIENT
// =============================================================================

/// Every message the server may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Join acknowledged; the client is now a member of `code`.
    SessionJoined { code: SessionCode },
    /// Join refused (unknown or expired code). Not retried automatically.
    JoinRejected { code: SessionCode, reason: String },
    /// Authoritative timer broadcast. Replaces any local projection.
    TimerState {
        code: SessionCode,
        snapshot: TimerSnapshot,
    },
    /// Timer cleared for the whole session.
    TimerReset { code: SessionCode },
    /// Current objective text (last write wins).
    ObjectiveChanged { code: SessionCode, text: String },
    /// Caption fragment relayed from the session controller.
    Caption {
        code: SessionCode,
        fragment: CaptionFragment,
    },
    /// Answer to a `requestTranslation` from this client.
    TranslationResult {
        text: String,
        target_language: String,
    },
    /// Translation backend failed for one request. Display inline; the
    /// relay itself stays up.
    TranslationFailed { message: String },
    /// Catch-all protocol error (malformed frame, unknown session, ...).
    Error { message: String },
}

// =============================================================================
// CODEC
// =============================================================================

impl ClientMessage {
    /// Encode as a JSON text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serializing a closed enum of plain data cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for malformed JSON, unknown `type` tags, or
    /// payloads that do not match the variant's shape.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerMessage {
    /// Encode as a JSON text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for malformed JSON, unknown `type` tags, or
    /// payloads that do not match the variant's shape.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
