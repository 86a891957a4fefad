use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data_capture::RecordingOptions;

/// Credential backends loaded at startup.
///
/// Every file listed adds one validator to the authentication chain, in the
/// order given.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// OpenSSH `authorized_keys` files.
    pub authorized_keys_files: Vec<PathBuf>,
    /// Files of `user:<argon2 PHC hash>` lines.
    pub password_files: Vec<PathBuf>,
}

impl AuthConfig {
    pub fn is_empty(&self) -> bool {
        self.authorized_keys_files.is_empty() && self.password_files.is_empty()
    }
}

/// Where and how sessions are recorded.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordingConfig {
    /// Directory receiving one recording file per session.
    pub output_dir: PathBuf,
    /// Longest pause kept in a recording, in seconds.
    pub idle_time_limit_secs: Option<f64>,
    /// Write bare event lines without the asciicast header.
    pub raw: bool,
    /// Record what the client types as well as what the shell prints.
    pub record_input: bool,
    /// Time left to the output relay after the shell exits, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            idle_time_limit_secs: None,
            raw: false,
            record_input: true,
            drain_timeout_ms: 250,
        }
    }
}

impl RecordingConfig {
    /// Recorder settings. Call after validation: an idle limit that is not a
    /// positive finite number is treated as unset.
    pub fn to_options(&self) -> RecordingOptions {
        RecordingOptions {
            idle_time_limit: self
                .idle_time_limit_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|limit| !limit.is_zero()),
            raw: self.raw,
            record_input: self.record_input,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
