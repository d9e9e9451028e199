use crate::session::{Outbox, Presence};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use wire::Identity;

/// The registry's view of a live, authenticated connection. Cheap to clone (it's an
/// `Arc`) so the router can fan out to many peers without touching the registry mutex.
pub struct SessionHandle {
    pub identity: Identity,
    pub outbox: Outbox,
    pub epoch: u64,
    display_name: RwLock<String>,
    presence: AtomicU8,
}

impl SessionHandle {
    pub fn new(identity: Identity, display_name: String, outbox: Outbox, epoch: u64) -> SessionHandle {
        SessionHandle {
            identity,
            outbox,
            epoch,
            display_name: RwLock::new(display_name),
            presence: AtomicU8::new(Presence::Nln.to_u8()),
        }
    }

    pub fn presence(&self) -> Presence {
        Presence::from_u8(self.presence.load(Ordering::Relaxed))
    }

    pub fn set_presence(&self, presence: Presence) {
        self.presence.store(presence.to_u8(), Ordering::Relaxed)
    }

    pub fn display_name(&self) -> String {
        self.display_name.read().unwrap().clone()
    }
}

type Map = HashMap<String, Arc<SessionHandle>>;

/// Process-wide map from identity to the single live session for that identity. Writes
/// (admit/remove) are serialized under a mutex and commit a fresh immutable snapshot;
/// reads (lookup/snapshot) never block on that mutex.
pub struct Registry {
    write_lock: Mutex<()>,
    map: ArcSwap<Map>,
    epoch_counter: std::sync::atomic::AtomicU64,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            write_lock: Mutex::new(()),
            map: ArcSwap::from_pointee(HashMap::new()),
            epoch_counter: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn next_epoch(&self) -> u64 {
        self.epoch_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Installs `handle` as the live session for its identity. If another session already
    /// held that identity, it is displaced: the previous handle is returned so the caller
    /// can notify and close it.
    pub fn admit(&self, handle: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let _guard = self.write_lock.lock().unwrap();
        let current = self.map.load();
        let mut next: Map = (**current).clone();
        let displaced = next.insert(handle.identity.key(), handle);
        self.map.store(Arc::new(next));
        displaced
    }

    /// Removes the session for `identity` if `epoch` still matches the one currently
    /// installed (guards against a stale removal racing a newer admit for the same
    /// identity).
    pub fn remove(&self, identity: &Identity, epoch: u64) {
        let _guard = self.write_lock.lock().unwrap();
        let current = self.map.load();
        match current.get(&identity.key()) {
            Some(existing) if existing.epoch == epoch => {
                let mut next: Map = (**current).clone();
                next.remove(&identity.key());
                self.map.store(Arc::new(next));
            }
            _ => {}
        }
    }

    pub fn lookup(&self, identity: &Identity) -> Option<Arc<SessionHandle>> {
        self.map.load().get(&identity.key()).cloned()
    }

    /// A stable, point-in-time copy of every live session, for bulk fan-out.
    pub fn snapshot(&self) -> Arc<Map> {
        self.map.load_full()
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn handle(identity: &str, epoch: u64) -> Arc<SessionHandle> {
        let (tx, _rx) = bounded(4);
        Arc::new(SessionHandle::new(Identity::new(identity), identity.to_string(), Outbox::new(tx), epoch))
    }

    #[test]
    fn admit_displaces_existing_session_for_same_identity() {
        let registry = Registry::new();
        let first = handle("a@x", 1);
        let second = handle("a@x", 2);

        assert!(registry.admit(first).is_none());
        let displaced = registry.admit(second);
        assert!(displaced.is_some());
        assert_eq!(displaced.unwrap().epoch, 1);
        assert_eq!(registry.lookup(&Identity::new("a@x")).unwrap().epoch, 2);
    }

    #[test]
    fn remove_is_epoch_guarded() {
        let registry = Registry::new();
        let first = handle("a@x", 1);
        registry.admit(first);

        // A stale removal naming an old epoch must not evict the current session.
        registry.remove(&Identity::new("a@x"), 0);
        assert!(registry.lookup(&Identity::new("a@x")).is_some());

        registry.remove(&Identity::new("a@x"), 1);
        assert!(registry.lookup(&Identity::new("a@x")).is_none());
    }
}
