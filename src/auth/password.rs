use std::collections::HashMap;
use std::fs;
use std::path::Path;

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use log::{debug, info};

use crate::error_handling::types::AuthError;

use super::auth_chain::PasswordAuth;
use super::types::AuthContext;

/// Accepts passwords matching argon2 hashes from a `user:<PHC string>` file.
pub struct PasswordFileAuth {
    hashes: HashMap<String, String>,
}

impl PasswordFileAuth {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(AuthError::PasswordFileError)?;
        let auth = Self::parse(&content)?;
        info!(
            "Loaded {} password entr{} from {}",
            auth.hashes.len(),
            if auth.hashes.len() == 1 { "y" } else { "ies" },
            path.display()
        );
        Ok(auth)
    }

    pub fn parse(content: &str) -> Result<Self, AuthError> {
        let mut hashes = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, hash) = line.split_once(':').ok_or_else(|| {
                AuthError::InvalidPasswordEntry(format!("line {}: expected user:hash", lineno + 1))
            })?;
            if user.is_empty() {
                return Err(AuthError::InvalidPasswordEntry(format!(
                    "line {}: empty user name",
                    lineno + 1
                )));
            }
            PasswordHash::new(hash).map_err(|e| {
                AuthError::InvalidPasswordEntry(format!("line {}: {}", lineno + 1, e))
            })?;
            hashes.insert(user.to_string(), hash.to_string());
        }
        Ok(Self { hashes })
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl PasswordAuth for PasswordFileAuth {
    fn authenticate(&self, context: &AuthContext, password: &str) -> bool {
        let Some(hash) = self.hashes.get(&context.user) else {
            debug!(
                "[{}] no password entry for {}",
                context.session_id, context.user
            );
            return false;
        };
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}
