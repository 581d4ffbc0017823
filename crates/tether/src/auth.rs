//! Public key allow-list
//!
//! Built once at startup and shared read-only between connection handlers.

use crate::ServerError;
use ssh_key::authorized_keys::Entry;
use ssh_key::PublicKey;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Keys allowed to log in, compared by their wire encoding
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
    keys: HashSet<Vec<u8>>,
}

impl AuthorizedKeys {
    /// Build the allow-list from `authorized_keys` style lines.
    ///
    /// Blank lines and comments are ignored. Entries that fail to parse are
    /// logged and skipped, they never abort startup.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = HashSet::new();

        for entry in entries {
            let line = entry.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match Entry::from_str(line).and_then(|entry| entry.public_key().to_bytes()) {
                Ok(encoded) => {
                    keys.insert(encoded);
                    info!("Key added");
                }
                Err(e) => warn!("Invalid ssh key, skipping entry ({})", e),
            }
        }

        Self { keys }
    }

    /// Read an `authorized_keys` file
    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            ServerError::AuthorizedKeysRead {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self::from_entries(content.lines()))
    }

    /// Merge another allow-list into this one
    pub fn extend(&mut self, other: AuthorizedKeys) {
        self.keys.extend(other.keys);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Exact match on the serialized key; comments and options play no part
    pub fn is_authorized(&self, key: &PublicKey) -> bool {
        match key.to_bytes() {
            Ok(encoded) => self.keys.contains(&encoded),
            Err(e) => {
                warn!("Could not encode offered key ({})", e);
                false
            }
        }
    }
}
