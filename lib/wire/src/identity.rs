use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// An account identifier, e.g. `alice@example.com`. Comparisons and hashing are
/// case-insensitive; the original casing is preserved for display and for echoing back
/// to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    #[inline]
    pub fn new<S: Into<String>>(raw: S) -> Identity {
        Identity(raw.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used as the canonical lookup key in the registry and store.
    #[inline]
    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Identity) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl From<&str> for Identity {
    fn from(raw: &str) -> Identity {
        Identity::new(raw)
    }
}

impl From<String> for Identity {
    fn from(raw: String) -> Identity {
        Identity::new(raw)
    }
}
