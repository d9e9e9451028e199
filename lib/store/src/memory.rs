use crate::{AddOutcome, Contact, ListTag, Store, User};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use wire::{Identity, ServerError, ServerResult};

/// On-disk representation loaded by `MemoryStore::load` and produced by the `seed-users`
/// utility; keyed by the lowercased identity so the file can be hand-edited without
/// worrying about casing.
#[derive(Serialize, Deserialize, Default)]
pub struct SeedFile {
    pub users: Vec<User>,
    pub contacts: Vec<SeedContact>,
}

#[derive(Serialize, Deserialize)]
pub struct SeedContact {
    pub owner: String,
    pub peer: String,
    pub nickname: String,
    pub list: String,
}

struct Inner {
    users: HashMap<String, User>,
    contacts: HashMap<String, Vec<Contact>>,
}

/// A process-local, in-memory reference implementation of [`Store`]. Suitable for the
/// test suite and for local development; a deployment is expected to supply a
/// database-backed implementation instead.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            inner: RwLock::new(Inner {
                users: HashMap::new(),
                contacts: HashMap::new(),
            }),
        }
    }

    /// Loads a seed file written by the `seed-users` utility. Fails closed: a malformed
    /// file should stop the server from starting rather than boot into a silently empty
    /// store.
    pub fn load<P: AsRef<Path>>(path: P) -> ServerResult<MemoryStore> {
        let contents = fs::read_to_string(path).map_err(|err| ServerError::Store(err.to_string()))?;
        let seed: SeedFile = toml::from_str(&contents).map_err(|err| ServerError::Store(err.to_string()))?;

        let store = MemoryStore::new();
        {
            let mut inner = store.inner.write().unwrap();
            for user in seed.users {
                inner.users.insert(user.identity.key(), user);
            }
            for entry in seed.contacts {
                let list = ListTag::parse(&entry.list)
                    .ok_or_else(|| ServerError::Store(format!("invalid list tag {:?} in seed file", entry.list)))?;
                let owner_key = Identity::new(entry.owner).key();
                inner.contacts.entry(owner_key).or_insert_with(Vec::new).push(Contact {
                    peer: Identity::new(entry.peer),
                    nickname: entry.nickname,
                    list,
                });
            }
        }
        Ok(store)
    }

    pub fn insert_user(&self, user: User) {
        let mut inner = self.inner.write().unwrap();
        inner.users.insert(user.identity.key(), user);
    }
}

impl Default for MemoryStore {
    fn default() -> MemoryStore {
        MemoryStore::new()
    }
}

impl Store for MemoryStore {
    fn get_user(&self, identity: &Identity) -> Option<User> {
        self.inner.read().unwrap().users.get(&identity.key()).cloned()
    }

    fn list_contacts(&self, owner: &Identity) -> Vec<Contact> {
        self.inner
            .read()
            .unwrap()
            .contacts
            .get(&owner.key())
            .cloned()
            .unwrap_or_default()
    }

    fn add_contact(&self, owner: &Identity, peer: &Identity, nickname: &str, list: ListTag) -> AddOutcome {
        let mut inner = self.inner.write().unwrap();
        let entries = inner.contacts.entry(owner.key()).or_insert_with(Vec::new);

        if entries.iter().any(|c| c.peer == *peer && c.list == list) {
            return AddOutcome::AlreadyPresent;
        }

        entries.push(Contact {
            peer: peer.clone(),
            nickname: nickname.to_string(),
            list,
        });
        AddOutcome::Added
    }

    fn remove_contact(&self, owner: &Identity, peer: &Identity, list: ListTag) {
        let mut inner = self.inner.write().unwrap();
        if let Some(entries) = inner.contacts.get_mut(&owner.key()) {
            entries.retain(|c| !(c.peer == *peer && c.list == list));
        }
    }

    fn append_message(&self, _from: &Identity, _to: &Identity, _body: &[u8], _ts: u64) {
        // Best-effort only; the reference store does not retain message history.
    }
}
