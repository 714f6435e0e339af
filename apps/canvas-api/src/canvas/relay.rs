//! Fan-out of canvas events to the connected sessions of a room.
//!
//! Each connection registers an unbounded sender here; its writer task
//! drains the matching receiver. Delivery walks a registry snapshot taken at
//! broadcast time, so a member joining after the snapshot simply misses that
//! one message. A recipient whose channel is already closed (disconnected
//! but not yet reaped by the gateway) is skipped, never an abort.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use super::messages::ServerMessage;
use super::registry::RoomRegistry;

pub type SessionTx = mpsc::UnboundedSender<ServerMessage>;

/// Routes server messages to live sessions by room membership.
pub struct BroadcastRelay {
    registry: Arc<RoomRegistry>,
    sessions: DashMap<String, SessionTx>,
}

impl BroadcastRelay {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            sessions: DashMap::new(),
        }
    }

    /// Register a session's outbound channel. Called once per connection
    /// after authentication.
    pub fn register(&self, session_id: &str, tx: SessionTx) {
        self.sessions.insert(session_id.to_string(), tx);
    }

    /// Drop a session's outbound channel; its writer task ends when the
    /// last sender is gone.
    pub fn unregister(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Send to a single session. Closed channels are skipped.
    pub fn send_to(&self, session_id: &str, message: ServerMessage) {
        if let Some(tx) = self.sessions.get(session_id) {
            if tx.send(message).is_err() {
                tracing::debug!(%session_id, "dropping message for closed session");
            }
        }
    }

    /// Deliver a sender's edit to every other member of its room.
    pub fn broadcast_sync(
        &self,
        canvas_id: &str,
        sender_session_id: &str,
        user_id: &str,
        elements: &Value,
        app_state: &Option<Value>,
    ) {
        for member in self.registry.members(canvas_id) {
            if member.session_id == sender_session_id {
                continue;
            }
            self.send_to(
                &member.session_id,
                ServerMessage::Sync {
                    elements: elements.clone(),
                    app_state: app_state.clone(),
                    user_id: user_id.to_string(),
                },
            );
        }
    }

    /// Deliver a sender's awareness update to every other member of its
    /// room. Name and color are read from the sender's registry record, not
    /// the inbound message, so neither can be spoofed by a client.
    pub fn broadcast_awareness(&self, sender_session_id: &str) {
        let Some((canvas_id, sender)) = self.registry.member(sender_session_id) else {
            return;
        };
        let message = ServerMessage::Awareness {
            user_id: sender.user_id.clone(),
            name: sender.display_name.clone(),
            cursor: sender.cursor,
            selected_element_ids: sender.selected_element_ids.clone(),
            color: sender.color.clone(),
        };
        for member in self.registry.members(&canvas_id) {
            if member.session_id == sender_session_id {
                continue;
            }
            self.send_to(&member.session_id, message.clone());
        }
    }

    /// Send the full current member list to every member of a room,
    /// including whoever just triggered the change.
    pub fn broadcast_presence(&self, canvas_id: &str) {
        let members = self.registry.members(canvas_id);
        let users: Vec<_> = members.iter().map(|m| m.to_presence()).collect();
        for member in &members {
            self.send_to(&member.session_id, ServerMessage::Users {
                users: users.clone(),
            });
        }
    }

    /// Announce a completed save to every member of a room.
    pub fn broadcast_saved(&self, canvas_id: &str, timestamp: DateTime<Utc>) {
        for member in self.registry.members(canvas_id) {
            self.send_to(
                &member.session_id,
                ServerMessage::Saved {
                    canvas_id: canvas_id.to_string(),
                    timestamp,
                },
            );
        }
    }
}
