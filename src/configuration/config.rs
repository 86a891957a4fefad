use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Command-line arguments.
///
/// The configuration file carries everything; the flags override the few
/// settings that commonly change between deployments.
///
/// # Examples
///
/// ```text
/// sshcast /etc/sshcast.toml --listen-address 0.0.0.0:2222 --output-dir /var/lib/sshcast
/// ```
#[derive(Parser, Debug, Clone)]
#[command(name = "sshcast")]
#[command(version)]
#[command(about = "An SSH server recording every interactive session as an asciicast")]
pub struct Args {
    /// Path to the TOML configuration file
    pub config_file: PathBuf,

    /// Address to accept SSH connections on
    ///
    /// # Command Line
    /// Use `--listen-address <ADDRESS>` or `SSHCAST_LISTEN_ADDRESS`
    #[arg(long, env = "SSHCAST_LISTEN_ADDRESS")]
    pub listen_address: Option<String>,

    /// Directory recordings are written to
    ///
    /// # Command Line
    /// Use `--output-dir <PATH>` or `SSHCAST_OUTPUT_DIR`
    #[arg(long, env = "SSHCAST_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); `RUST_LOG` applies otherwise
    #[arg(long)]
    pub log_level: Option<LevelFilter>,
}

/// Application configuration structure that defines all runtime parameters.
///
/// This structure is read from a TOML file with `serde`, then selectively
/// overridden from the command line ([`Args`]).
///
/// # Examples
///
/// ```toml
/// listen_address = "0.0.0.0:2222"
/// host_key_file = "/etc/ssh/ssh_host_ed25519_key"
///
/// [auth]
/// authorized_keys_files = ["/root/.ssh/authorized_keys"]
///
/// [recording]
/// output_dir = "/var/lib/sshcast"
/// idle_time_limit_secs = 2.0
/// ```
///
/// # Fields Overview
///
/// - `listen_address`: socket address the SSH server binds to
/// - `host_key_file`: OpenSSH private key identifying the server
/// - `passwd_file`: passwd(5) file users are resolved against
/// - `max_sessions`: limit on shells running at once
/// - `auth`: credential backends
/// - `recording`: recording location and format
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default)]
    pub host_key_file: Option<PathBuf>,

    #[serde(default = "default_passwd_file")]
    pub passwd_file: PathBuf,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub recording: RecordingConfig,
}

fn default_listen_address() -> String {
    String::from("0.0.0.0:2222")
}

fn default_passwd_file() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_max_sessions() -> usize {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            host_key_file: None,
            passwd_file: default_passwd_file(),
            max_sessions: default_max_sessions(),
            auth: AuthConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

impl Config {
    /// Reads and parses a configuration file.
    ///
    /// # Errors
    /// - `ConfigError::FileDoesNotExist` when `path` is not a file
    /// - `ConfigError::IoError` when it cannot be read
    /// - `ConfigError::TomlError` when it is not a valid configuration
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileDoesNotExist(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        debug!("Read configuration from {}", path.display());
        Self::parse_toml(&content)
    }

    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Lets command-line values take precedence over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(listen_address) = &args.listen_address {
            self.listen_address = listen_address.clone();
        }
        if let Some(output_dir) = &args.output_dir {
            self.recording.output_dir = output_dir.clone();
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_address
            .parse()
            .map_err(|_| ConfigError::BadAddress(self.listen_address.clone()))
    }

    /// Checks the settings that cannot be verified while parsing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        let host_key_file = self
            .host_key_file
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField(String::from("host_key_file")))?;
        if !host_key_file.is_file() {
            return Err(ConfigError::FileDoesNotExist(
                host_key_file.display().to_string(),
            ));
        }

        if self.max_sessions == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "max_sessions must be at least 1",
            )));
        }

        if let Some(secs) = self.recording.idle_time_limit_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(ConfigError::NotInRange(format!(
                    "idle_time_limit_secs must be positive, got {}",
                    secs
                )));
            }
        }

        if self.auth.is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "auth: no authorized_keys_files or password_files",
            )));
        }
        Ok(())
    }
}
