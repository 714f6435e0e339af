//! Room and presence registry: the single source of truth for who is in
//! which room right now.
//!
//! Both indexes (canvas → members, session → canvas) live behind one type so
//! a join or leave can never update one without the other. Uses `DashMap`
//! for shard-level concurrency: mutations on the same room are mutually
//! exclusive, distinct rooms do not contend.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::messages::{CursorPosition, PresenceUser};

/// Fixed presence palette. A joining member gets the color at the current
/// member count modulo the palette length.
pub const PRESENCE_PALETTE: [&str; 8] = [
    "#e53e3e", "#dd6b20", "#d69e2e", "#38a169", "#319795", "#3182ce", "#805ad5", "#d53f8c",
];

/// One session's presence within a room.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub cursor: Option<CursorPosition>,
    pub selected_element_ids: Vec<String>,
}

impl RoomMember {
    pub fn to_presence(&self) -> PresenceUser {
        PresenceUser {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            name: self.display_name.clone(),
            color: self.color.clone(),
            cursor: self.cursor,
        }
    }
}

/// Live collaboration state for one canvas. Exists only while at least one
/// session is joined.
#[derive(Debug, Default)]
struct Room {
    /// Members in join order.
    members: Vec<RoomMember>,
}

/// Shared registry of all rooms and their members.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
    /// Reverse index: session id → canvas id it is currently joined to.
    sessions: DashMap<String, String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `canvas_id`, leaving any previously joined room first. A session
    /// is a member of at most one room at any instant.
    ///
    /// Returns the new member record and the canvas id of the room that was
    /// left, if the session switched rooms.
    pub fn join(
        &self,
        session_id: &str,
        user_id: &str,
        display_name: &str,
        canvas_id: &str,
    ) -> (RoomMember, Option<String>) {
        let previous = self
            .sessions
            .insert(session_id.to_string(), canvas_id.to_string());
        if let Some(prev) = &previous {
            self.remove_member(prev, session_id);
        }

        let mut room = self.rooms.entry(canvas_id.to_string()).or_default();
        let color = PRESENCE_PALETTE[room.members.len() % PRESENCE_PALETTE.len()];
        let member = RoomMember {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            color: color.to_string(),
            cursor: None,
            selected_element_ids: Vec::new(),
        };
        room.members.push(member.clone());

        (member, previous.filter(|prev| prev != canvas_id))
    }

    /// Remove the session from whatever room it occupies. No-op if the
    /// session is not in any room. Returns the canvas id that was left.
    pub fn leave(&self, session_id: &str) -> Option<String> {
        let (_, canvas_id) = self.sessions.remove(session_id)?;
        self.remove_member(&canvas_id, session_id);
        Some(canvas_id)
    }

    /// Consistent snapshot of a room's members, in join order. Empty if the
    /// room does not exist.
    pub fn members(&self, canvas_id: &str) -> Vec<RoomMember> {
        self.rooms
            .get(canvas_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    /// The calling session's own member record and the canvas it belongs to.
    pub fn member(&self, session_id: &str) -> Option<(String, RoomMember)> {
        let canvas_id = self.sessions.get(session_id)?.value().clone();
        let room = self.rooms.get(&canvas_id)?;
        let member = room
            .members
            .iter()
            .find(|m| m.session_id == session_id)?
            .clone();
        Some((canvas_id, member))
    }

    /// Update the calling session's own cursor and selection. A session can
    /// never mutate another session's member record.
    pub fn update_cursor(
        &self,
        session_id: &str,
        cursor: Option<CursorPosition>,
        selected_element_ids: Option<Vec<String>>,
    ) {
        let Some(canvas_id) = self.sessions.get(session_id).map(|c| c.value().clone()) else {
            return;
        };
        if let Some(mut room) = self.rooms.get_mut(&canvas_id) {
            if let Some(member) = room
                .members
                .iter_mut()
                .find(|m| m.session_id == session_id)
            {
                member.cursor = cursor;
                if let Some(selection) = selected_element_ids {
                    member.selected_element_ids = selection;
                }
            }
        }
    }

    /// Whether any session is currently joined to `canvas_id`.
    pub fn is_occupied(&self, canvas_id: &str) -> bool {
        self.rooms.contains_key(canvas_id)
    }

    fn remove_member(&self, canvas_id: &str, session_id: &str) {
        if let Entry::Occupied(mut room) = self.rooms.entry(canvas_id.to_string()) {
            room.get_mut()
                .members
                .retain(|m| m.session_id != session_id);
            // No empty rooms persist in memory.
            if room.get().members.is_empty() {
                room.remove();
            }
        }
    }
}
