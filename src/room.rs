//! Room membership registry and broadcast formatting
//!
//! Rooms are free-form named sets of connections. The registry keeps the
//! forward map (room -> members) and the inverse map (connection -> room)
//! consistent: a connection belongs to at most one room, joining moves it
//! atomically, and a room entry disappears the moment it empties.

use std::collections::{HashMap, HashSet};

use chrono::Local;

use crate::types::ConnId;

/// Default room every connection lands in on accept.
pub const LOBBY: &str = "lobby";

/// Tracks which connections are in which named room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, HashSet<ConnId>>,
    room_of: HashMap<ConnId, String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a connection into `room`, leaving its current room first.
    ///
    /// Joining the room it is already in is a no-op; empty room names are
    /// ignored.
    pub fn join(&mut self, id: ConnId, room: &str) {
        if room.is_empty() {
            return;
        }
        if self.room_of.get(&id).map_or(false, |current| current == room) {
            return;
        }

        self.leave(id);
        self.rooms.entry(room.to_string()).or_default().insert(id);
        self.room_of.insert(id, room.to_string());
    }

    /// Remove a connection from its current room, erasing the room entry if
    /// it empties.
    pub fn leave(&mut self, id: ConnId) {
        let Some(room) = self.room_of.remove(&id) else {
            return;
        };
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }

    /// Remove a connection completely (same as leaving).
    pub fn remove(&mut self, id: ConnId) {
        self.leave(id);
    }

    /// Current room of a connection, if registered.
    pub fn room_of(&self, id: ConnId) -> Option<&str> {
        self.room_of.get(&id).map(String::as_str)
    }

    /// Snapshot of the members of `room`.
    pub fn members(&self, room: &str) -> Vec<ConnId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of members currently in `room`.
    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashSet::len)
    }

    /// Snapshot of `(room name, member count)` pairs.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.rooms
            .iter()
            .map(|(room, members)| (room.clone(), members.len()))
            .collect()
    }
}

/// Local wall-clock time as `HH:MM:SS`.
pub fn timestamp_hhmmss() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// A user chat line: `[HH:MM:SS] <user>: <text>`.
pub fn chat_line(user: &str, text: &str) -> String {
    format!("[{}] {}: {}", timestamp_hhmmss(), user, text)
}

/// A system notice: `[HH:MM:SS] [system] <text>`.
pub fn system_line(text: &str) -> String {
    format!("[{}] [system] {}", timestamp_hhmmss(), text)
}
