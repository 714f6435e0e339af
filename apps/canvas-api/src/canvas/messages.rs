//! Canvas wire-format messages, JSON text frames tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::documents::CanvasDocument;

/// A cursor position on the shared canvas, in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// One member of a room as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub session_id: String,
    pub user_id: String,
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A message received from a client over the canvas socket.
///
/// Unknown or malformed frames are dropped, never answered.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "canvas:join")]
    Join { canvas_id: String },
    #[serde(rename = "canvas:leave")]
    Leave,
    #[serde(rename = "canvas:sync")]
    Sync {
        canvas_id: String,
        elements: Value,
        #[serde(default)]
        app_state: Option<Value>,
    },
    #[serde(rename = "canvas:awareness")]
    Awareness {
        canvas_id: String,
        #[serde(default)]
        cursor: Option<CursorPosition>,
        #[serde(default)]
        selected_element_ids: Option<Vec<String>>,
    },
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A message sent to a client over the canvas socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { user_id: String },
    #[serde(rename = "canvas:load")]
    Load {
        canvas_id: String,
        data: CanvasDocument,
        users: Vec<PresenceUser>,
    },
    #[serde(rename = "canvas:users")]
    Users { users: Vec<PresenceUser> },
    #[serde(rename = "canvas:sync")]
    Sync {
        elements: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        app_state: Option<Value>,
        user_id: String,
    },
    #[serde(rename = "canvas:awareness")]
    Awareness {
        user_id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor: Option<CursorPosition>,
        selected_element_ids: Vec<String>,
        color: String,
    },
    #[serde(rename = "canvas:saved")]
    Saved {
        canvas_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}
