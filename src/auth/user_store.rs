use std::fs;
use std::path::{Path, PathBuf};

use log::{error, warn};

use crate::error_handling::types::SessionError;

use super::types::Identity;

/// Resolves a user name to the OS identity its shell runs as.
pub trait UserStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Identity, SessionError>;
}

/// Reads identities from a passwd(5) formatted file on every lookup.
pub struct PasswdUserStore {
    path: PathBuf,
}

impl PasswdUserStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for PasswdUserStore {
    fn default() -> Self {
        Self::new("/etc/passwd")
    }
}

impl UserStore for PasswdUserStore {
    fn get(&self, name: &str) -> Result<Identity, SessionError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            error!("Failed to read {}: {}", self.path.display(), e);
            SessionError::UserNotFound(name.to_string())
        })?;
        content
            .lines()
            .find_map(|line| parse_entry(line, name))
            .ok_or_else(|| SessionError::UserNotFound(name.to_string()))
    }
}

/// Parses `name:passwd:uid:gid:gecos:home:shell` when it belongs to `name`.
fn parse_entry(line: &str, name: &str) -> Option<Identity> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.first() != Some(&name) {
        return None;
    }
    if fields.len() < 7 {
        warn!("Ignoring short passwd entry for {}", name);
        return None;
    }
    let (Ok(uid), Ok(gid)) = (fields[2].parse::<u32>(), fields[3].parse::<u32>()) else {
        warn!("Ignoring passwd entry for {} with malformed uid/gid", name);
        return None;
    };
    Some(Identity {
        name: name.to_string(),
        uid,
        gid,
        home: PathBuf::from(fields[5]),
        shell: fields[6].to_string(),
    })
}
