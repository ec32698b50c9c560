use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::common::{Presence, UserId};

/// Last observed presence per peer.
///
/// Writes are serialized behind the lock; reads may run concurrently with
/// each other. Reconciliation is last-writer-wins in arrival order, which
/// stays behind [`PresenceRegistry::register`] so callers do not depend on it.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    presences: RwLock<HashMap<UserId, Presence>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an announcement and reports whether anything changed.
    ///
    /// Re-registering an identical presence is a no-op returning false. A new
    /// display name and/or status overwrites the entry and returns true.
    pub fn register(&self, presence: Presence) -> bool {
        let mut presences = self
            .presences
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let unchanged = presences.get(&presence.user.id).is_some_and(|existing| {
            existing.user.display_name == presence.user.display_name
                && existing.status == presence.status
        });
        if unchanged {
            return false;
        }

        log::debug!(
            "Presence of {} ({}) is now {}",
            presence.user.display_name,
            presence.user.id,
            presence.status
        );
        presences.insert(presence.user.id, presence);
        true
    }

    pub fn get(&self, id: &UserId) -> Option<Presence> {
        self.presences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Copy of every entry at the time of the call.
    pub fn snapshot(&self) -> Vec<Presence> {
        self.presences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// First peer whose display name matches exactly. With colliding names
    /// the pick is arbitrary.
    pub fn find_by_display_name(&self, name: &str) -> Option<Presence> {
        self.presences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|presence| presence.user.display_name == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.presences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::common::{ChatUser, PresenceStatus};

    fn presence(id: UserId, name: &str, status: PresenceStatus) -> Presence {
        Presence::new(ChatUser::new(id, name), status)
    }

    #[test]
    fn first_sighting_is_a_change() {
        let registry = PresenceRegistry::new();
        let id = UserId::new();
        assert!(registry.register(presence(id, "A", PresenceStatus::Online)));
        assert_eq!(registry.get(&id).map(|p| p.status), Some(PresenceStatus::Online));
    }

    #[test]
    fn identical_announcement_is_idempotent() {
        let registry = PresenceRegistry::new();
        let p = presence(UserId::new(), "A", PresenceStatus::Online);
        assert!(registry.register(p.clone()));
        assert!(!registry.register(p.clone()));
        assert!(!registry.register(p));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn status_change_is_detected_once() {
        let registry = PresenceRegistry::new();
        let id = UserId::new();
        assert!(registry.register(presence(id, "A", PresenceStatus::Online)));
        assert!(registry.register(presence(id, "A", PresenceStatus::Away)));
        assert!(!registry.register(presence(id, "A", PresenceStatus::Away)));
    }

    #[test]
    fn rename_overwrites_without_new_entry() {
        let registry = PresenceRegistry::new();
        let id = UserId::new();
        registry.register(presence(id, "A", PresenceStatus::Online));
        assert!(registry.register(presence(id, "B", PresenceStatus::Online)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().user.display_name, "B");
        assert!(registry.find_by_display_name("A").is_none());
        assert_eq!(registry.find_by_display_name("B").unwrap().user.id, id);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let registry = PresenceRegistry::new();
        let id = UserId::new();
        registry.register(presence(id, "A", PresenceStatus::Online));

        let snapshot = registry.snapshot();
        registry.register(presence(id, "A", PresenceStatus::Offline));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, PresenceStatus::Online);
        assert_eq!(registry.get(&id).unwrap().status, PresenceStatus::Offline);
    }

    #[test]
    fn concurrent_announcements_for_distinct_peers() {
        let registry = Arc::new(PresenceRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let p = presence(UserId::new(), &format!("peer-{i}"), PresenceStatus::Online);
                    let first = registry.register(p.clone());
                    let second = registry.register(p);
                    (first, second)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), (true, false));
        }
        assert_eq!(registry.len(), 8);
    }
}
