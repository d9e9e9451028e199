use crate::registry::Registry;
use crate::session::Presence;
use std::collections::HashSet;
use store::{ListTag, Store};
use wire::Identity;

/// Formats a presence notification line. `state` is the specific presence (e.g. `BSY`);
/// the second token is the coarse online/offline indicator the dialect expects alongside
/// it (`FLN` only when `state` itself is `FLN`, `NLN` otherwise).
pub fn presence_line(state: Presence, identity: &Identity, display_name: &str, capabilities: &str) -> String {
    let online_tag = if state == Presence::Fln { "FLN" } else { "NLN" };
    format!("{} {} {} {} {}", state.wire_name(), online_tag, identity, display_name, capabilities)
}

/// Resolves the peers permitted to observe `subject`'s presence: identities on
/// `subject`'s reverse list, filtered by `subject`'s allow/block lists (block wins;
/// absent the open question's default, an empty allow list is treated as allow-all).
fn interested_peers(store: &dyn Store, subject: &Identity) -> Vec<Identity> {
    let contacts = store.list_contacts(subject);

    let blocked: HashSet<String> = contacts
        .iter()
        .filter(|c| c.list == ListTag::Bl)
        .map(|c| c.peer.key())
        .collect();

    let allowed: HashSet<String> = contacts
        .iter()
        .filter(|c| c.list == ListTag::Al)
        .map(|c| c.peer.key())
        .collect();

    contacts
        .into_iter()
        .filter(|c| c.list == ListTag::Rl)
        .map(|c| c.peer)
        .filter(|peer| !blocked.contains(&peer.key()))
        .filter(|peer| allowed.is_empty() || allowed.contains(&peer.key()))
        .collect()
}

/// Delivers a presence transition by `subject` to every currently-connected, interested
/// peer. Best-effort: a stalled peer connection is simply skipped (its own handshake/idle
/// timeout machinery is responsible for eventually tearing it down).
pub fn fan_out_presence(
    store: &dyn Store,
    registry: &Registry,
    subject: &Identity,
    display_name: &str,
    state: Presence,
    capabilities: &str,
) {
    if state.is_hidden() {
        return;
    }

    let line = presence_line(state, subject, display_name, capabilities);

    for peer in interested_peers(store, subject) {
        if let Some(handle) = registry.lookup(&peer) {
            handle.outbox.enqueue(line.clone());
        }
    }
}

/// Delivers a reverse-list membership change (`ADD`/`REM` on `FL`) to the addressee, if
/// they are currently connected.
pub fn notify_list_change(registry: &Registry, addressee: &Identity, line: String) {
    if let Some(handle) = registry.lookup(addressee) {
        handle.outbox.enqueue(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::memory::MemoryStore;
    use store::User;

    #[test]
    fn empty_allow_list_is_allow_all() {
        let store = MemoryStore::new();
        let a = Identity::new("a@x");
        let b = Identity::new("b@x");
        store.add_contact(&a, &b, "b", ListTag::Rl);

        let peers = interested_peers(&store, &a);
        assert_eq!(peers, vec![b]);
    }

    #[test]
    fn block_list_overrides_reverse_list() {
        let store = MemoryStore::new();
        let a = Identity::new("a@x");
        let b = Identity::new("b@x");
        store.add_contact(&a, &b, "b", ListTag::Rl);
        store.add_contact(&a, &b, "b", ListTag::Bl);

        assert!(interested_peers(&store, &a).is_empty());
    }

    #[test]
    fn non_empty_allow_list_excludes_unlisted_peers() {
        let store = MemoryStore::new();
        let a = Identity::new("a@x");
        let b = Identity::new("b@x");
        let c = Identity::new("c@x");
        store.add_contact(&a, &b, "b", ListTag::Rl);
        store.add_contact(&a, &c, "c", ListTag::Rl);
        store.add_contact(&a, &c, "c", ListTag::Al);

        assert_eq!(interested_peers(&store, &a), vec![c]);
    }

    #[test]
    fn fan_out_is_skipped_while_hidden() {
        let store = MemoryStore::new();
        let registry = Registry::new();
        let user = User::new(Identity::new("a@x"), "pw".to_string(), "A".to_string());
        store.insert_user(user);
        // No assertion beyond "does not panic": HDN must short-circuit before any lookup.
        fan_out_presence(&store, &registry, &Identity::new("a@x"), "A", Presence::Hdn, "0");
    }
}
