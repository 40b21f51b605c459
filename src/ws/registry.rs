//! Identity & Connection Registry.
//!
//! Maps a logical actor id to its single active connection sender. Users and
//! admins get independent maps because the two kinds never share identity
//! space. A reconnect overwrites the prior entry (last-connected-wins); the
//! caller is responsible for closing the replaced connection and for all
//! presence / room side effects.

use dashmap::DashMap;

use crate::auth::ActorKind;
use crate::ws::ConnectionSender;

#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<String, ConnectionSender>,
    admins: DashMap<String, ConnectionSender>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: ActorKind) -> &DashMap<String, ConnectionSender> {
        match kind {
            ActorKind::User => &self.users,
            ActorKind::Admin => &self.admins,
        }
    }

    /// Register a connection, returning the sender it replaced, if any.
    pub fn register(
        &self,
        kind: ActorKind,
        actor_id: &str,
        tx: ConnectionSender,
    ) -> Option<ConnectionSender> {
        self.map(kind).insert(actor_id.to_string(), tx)
    }

    /// Remove the entry for an actor, but only if it still holds the given
    /// sender. A disconnect of a connection that was already replaced by a
    /// newer one must not evict the newer entry. Returns whether an entry
    /// was removed.
    pub fn unregister(&self, kind: ActorKind, actor_id: &str, tx: &ConnectionSender) -> bool {
        self.map(kind)
            .remove_if(actor_id, |_, current| current.same_channel(tx))
            .is_some()
    }

    /// Look up the active connection for an actor, if any.
    pub fn lookup(&self, kind: ActorKind, actor_id: &str) -> Option<ConnectionSender> {
        self.map(kind).get(actor_id).map(|entry| entry.clone())
    }

    /// Ids of all currently-connected users.
    pub fn online_user_ids(&self) -> Vec<String> {
        self.users.iter().map(|e| e.key().clone()).collect()
    }

    /// Iterate all connection senders of both kinds.
    pub fn all_senders(&self) -> Vec<ConnectionSender> {
        self.users
            .iter()
            .chain(self.admins.iter())
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sender() -> ConnectionSender {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn register_lookup_unregister() {
        let registry = ConnectionRegistry::new();
        let tx = sender();

        assert!(registry.lookup(ActorKind::User, "u1").is_none());
        assert!(registry.register(ActorKind::User, "u1", tx.clone()).is_none());
        assert!(registry.lookup(ActorKind::User, "u1").is_some());

        assert!(registry.unregister(ActorKind::User, "u1", &tx));
        assert!(registry.lookup(ActorKind::User, "u1").is_none());
        // Repeated unregister is a harmless no-op
        assert!(!registry.unregister(ActorKind::User, "u1", &tx));
    }

    #[test]
    fn reconnect_is_last_connected_wins() {
        let registry = ConnectionRegistry::new();
        let first = sender();
        let second = sender();

        assert!(registry.register(ActorKind::User, "u1", first.clone()).is_none());
        let replaced = registry.register(ActorKind::User, "u1", second.clone());
        assert!(replaced.is_some_and(|old| old.same_channel(&first)));

        // The stale connection's cleanup must not evict the new entry
        assert!(!registry.unregister(ActorKind::User, "u1", &first));
        assert!(registry
            .lookup(ActorKind::User, "u1")
            .is_some_and(|tx| tx.same_channel(&second)));
    }

    #[test]
    fn user_and_admin_identity_spaces_are_independent() {
        let registry = ConnectionRegistry::new();
        registry.register(ActorKind::User, "x", sender());

        assert!(registry.lookup(ActorKind::Admin, "x").is_none());
        assert_eq!(registry.online_user_ids(), vec!["x".to_string()]);
    }
}
