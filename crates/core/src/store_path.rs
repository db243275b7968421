//! Nix store path parsing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The standard Nix store directory.
const STORE_DIR: &str = "/nix/store";

/// A full Nix store path (`/nix/store/<hash>-<name>`).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorePath {
    hash: String,
    name: String,
}

impl StorePath {
    /// Parse a full store path string.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let rest = path
            .strip_prefix(STORE_DIR)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| {
                crate::Error::InvalidStorePath(format!("must start with {STORE_DIR}/"))
            })?;
        Self::from_basename(rest)
    }

    /// Parse the `<hash>-<name>` basename form used in narinfo references.
    pub fn from_basename(basename: &str) -> crate::Result<Self> {
        if !basename.is_ascii() {
            return Err(crate::Error::InvalidStorePath(
                "store path contains non-ASCII characters".to_string(),
            ));
        }
        if basename.len() < 34 || basename.as_bytes()[32] != b'-' {
            return Err(crate::Error::InvalidStorePath(format!(
                "expected <32-char hash>-<name>, got: {basename}"
            )));
        }

        let hash = &basename[..32];
        // Nix base32 alphabet: 0-9, a-d, f-n, p-s, v-z
        for c in hash.chars() {
            if !matches!(c, '0'..='9' | 'a'..='d' | 'f'..='n' | 'p'..='s' | 'v'..='z') {
                return Err(crate::Error::InvalidStorePath(format!(
                    "invalid character in store path hash: {c}"
                )));
            }
        }

        let name = &basename[33..];
        if name.is_empty() {
            return Err(crate::Error::InvalidStorePath(
                "name cannot be empty".to_string(),
            ));
        }
        for c in name.chars() {
            if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '+') {
                return Err(crate::Error::InvalidStorePath(format!(
                    "invalid character in name: {c}"
                )));
            }
        }

        Ok(Self {
            hash: hash.to_string(),
            name: name.to_string(),
        })
    }

    /// The 32-character base32 hash portion.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The name portion.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The basename (`hash-name`) without the store directory.
    pub fn basename(&self) -> String {
        format!("{}-{}", self.hash, self.name)
    }
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath({self})")
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{STORE_DIR}/{}-{}", self.hash, self.name)
    }
}
