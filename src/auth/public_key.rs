use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{debug, info};
use russh::keys::{PublicKey, PublicKeyBase64};

use crate::error_handling::types::AuthError;

use super::auth_chain::PublicKeyAuth;
use super::types::AuthContext;

/// Accepts keys listed in an OpenSSH `authorized_keys` file.
///
/// Keys are compared on their base64 wire encoding. The set is loaded once;
/// the same keys are accepted for every user.
pub struct AuthorizedKeysAuth {
    keys: HashSet<String>,
}

impl AuthorizedKeysAuth {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(AuthError::KeyFileError)?;
        let auth = Self::parse(&content)?;
        info!(
            "Loaded {} authorized key(s) from {}",
            auth.keys.len(),
            path.display()
        );
        Ok(auth)
    }

    pub fn parse(content: &str) -> Result<Self, AuthError> {
        let mut keys = HashSet::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let blob = key_blob(line).ok_or_else(|| {
                AuthError::InvalidKey(format!("line {}: no key found", lineno + 1))
            })?;
            let key = russh::keys::parse_public_key_base64(blob)
                .map_err(|e| AuthError::InvalidKey(format!("line {}: {}", lineno + 1, e)))?;
            keys.insert(key.public_key_base64());
        }
        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Finds the base64 field of an `authorized_keys` line: the token following
/// the key type, after any leading options.
fn key_blob(line: &str) -> Option<&str> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens
        .windows(2)
        .find(|pair| is_key_type(pair[0]))
        .map(|pair| pair[1])
}

fn is_key_type(token: &str) -> bool {
    token.starts_with("ssh-") || token.starts_with("ecdsa-sha2-") || token.starts_with("sk-")
}

impl PublicKeyAuth for AuthorizedKeysAuth {
    fn authenticate(&self, context: &AuthContext, key: &PublicKey) -> bool {
        let found = self.keys.contains(&key.public_key_base64());
        debug!(
            "[{}] authorized_keys lookup for {}: {}",
            context.session_id,
            context.user,
            if found { "match" } else { "no match" }
        );
        found
    }
}
