//! Per-connection canvas session state.

use atelier_common::id::{prefix, prefixed_ulid};

/// State for a single WebSocket connection, owned by its connection task.
#[derive(Debug)]
pub struct CanvasSession {
    /// Unique session identifier (`ses_` prefixed ULID).
    pub session_id: String,
    /// Authenticated user ID.
    pub user_id: String,
    /// Display name resolved at authentication time.
    pub display_name: String,
    /// The canvas this session is currently joined to, if any. The registry
    /// holds the reverse mapping; this is the only other copy.
    pub room: Option<String>,
    /// Whether the user had edit access to `room` at join time.
    pub can_edit: bool,
}

impl CanvasSession {
    pub fn new(user_id: String, display_name: String) -> Self {
        Self {
            session_id: prefixed_ulid(prefix::SESSION),
            user_id,
            display_name,
            room: None,
            can_edit: false,
        }
    }
}
