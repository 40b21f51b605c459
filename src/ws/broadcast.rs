//! Fan-out helpers over the registry and room membership.
//!
//! Delivery is best-effort: a failed send means the connection is already
//! gone and its actor loop is tearing down. Durable state is never affected.

use crate::auth::ActorKind;
use crate::ws::events::ServerEvent;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::rooms::{ActorKey, Rooms};

/// Broadcast an event to every connected actor of both kinds.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &ServerEvent) {
    let msg = event.to_message();
    for sender in registry.all_senders() {
        let _ = sender.send(msg.clone());
    }
}

/// Send an event to one actor's identity channel, if connected.
/// Returns whether the event was handed to a live connection.
pub fn send_to_actor(
    registry: &ConnectionRegistry,
    kind: ActorKind,
    actor_id: &str,
    event: &ServerEvent,
) -> bool {
    match registry.lookup(kind, actor_id) {
        Some(sender) => sender.send(event.to_message()).is_ok(),
        None => false,
    }
}

/// Send an event to every current member of a room, optionally skipping one
/// actor (e.g. the typist for typing indicators).
pub fn send_to_room(
    registry: &ConnectionRegistry,
    rooms: &Rooms,
    room: &str,
    event: &ServerEvent,
    skip: Option<&ActorKey>,
) {
    let msg = event.to_message();
    for member in rooms.members(room) {
        if skip.is_some_and(|k| *k == member) {
            continue;
        }
        if let Some(sender) = registry.lookup(member.0, &member.1) {
            let _ = sender.send(msg.clone());
        }
    }
}
