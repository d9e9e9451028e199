pub mod memory;

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use wire::Identity;

/// List an identity can be filed under in another identity's contact roster.
/// `RL` is server-maintained and never targeted directly by `addContact`/`removeContact`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ListTag {
    Fl,
    Al,
    Bl,
    Rl,
}

impl ListTag {
    pub fn bit(self) -> u8 {
        match self {
            ListTag::Fl => 1,
            ListTag::Al => 2,
            ListTag::Bl => 4,
            ListTag::Rl => 8,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            ListTag::Fl => "FL",
            ListTag::Al => "AL",
            ListTag::Bl => "BL",
            ListTag::Rl => "RL",
        }
    }

    pub fn parse(raw: &str) -> Option<ListTag> {
        match raw {
            "FL" => Some(ListTag::Fl),
            "AL" => Some(ListTag::Al),
            "BL" => Some(ListTag::Bl),
            "RL" => Some(ListTag::Rl),
            _ => None,
        }
    }
}

/// A user account as known to the store. The core treats this as read-mostly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub identity: Identity,
    pub credential: String,
    pub display_name: String,
    pub created: DateTime<Utc>,
}

impl User {
    pub fn new(identity: Identity, credential: String, display_name: String) -> User {
        User {
            identity,
            credential,
            display_name,
            created: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub peer: Identity,
    pub nickname: String,
    pub list: ListTag,
}

#[derive(Debug, Eq, PartialEq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

/// The boundary the notification core depends on for user and contact-roster persistence.
/// `appendMessage` is best-effort; a store may no-op it.
pub trait Store: Send + Sync {
    fn get_user(&self, identity: &Identity) -> Option<User>;

    fn list_contacts(&self, owner: &Identity) -> Vec<Contact>;

    fn add_contact(&self, owner: &Identity, peer: &Identity, nickname: &str, list: ListTag) -> AddOutcome;

    fn remove_contact(&self, owner: &Identity, peer: &Identity, list: ListTag);

    fn append_message(&self, from: &Identity, to: &Identity, body: &[u8], ts: u64);
}
