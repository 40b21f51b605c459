//! Logical room (channel) membership for fan-out routing.
//!
//! A room is a named set of actor keys. Delivery resolves each member
//! through the connection registry at send time, so rooms never hold live
//! transport handles and stale members are harmless.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::auth::ActorKind;

/// Room joined by every admin connection at connect time.
pub const ADMIN_ROOM: &str = "admins";

pub type ActorKey = (ActorKind, String);

/// Channel name for a conversation's room.
pub fn conversation_room(conversation_id: &str) -> String {
    format!("conv:{}", conversation_id)
}

#[derive(Default)]
pub struct Rooms {
    /// room name -> member actor keys
    rooms: DashMap<String, HashSet<ActorKey>>,
    /// reverse index: actor key -> joined room names, for disconnect cleanup
    joined: DashMap<ActorKey, HashSet<String>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, room: &str, key: &ActorKey) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(key.clone());
        self.joined
            .entry(key.clone())
            .or_default()
            .insert(room.to_string());
    }

    pub fn unsubscribe(&self, room: &str, key: &ActorKey) {
        self.remove_member(room, key);
        if let Some(mut joined) = self.joined.get_mut(key) {
            joined.remove(room);
        }
        self.joined.remove_if(key, |_, rooms| rooms.is_empty());
    }

    /// Remove an actor from every room it joined. Called on disconnect.
    pub fn unsubscribe_all(&self, key: &ActorKey) {
        let rooms = match self.joined.remove(key) {
            Some((_, rooms)) => rooms,
            None => return,
        };
        for room in rooms {
            self.remove_member(&room, key);
        }
    }

    /// Drop the room entry once its member set empties, so the map does
    /// not accumulate a key for every conversation ever touched.
    fn remove_member(&self, room: &str, key: &ActorKey) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(key);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    pub fn members(&self, room: &str) -> Vec<ActorKey> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &str, key: &ActorKey) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(key))
    }
}
