use std::fmt;

use crate::session_management::SessionState;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingField(String),
    BadAddress(String),
    FileDoesNotExist(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::MissingField(e) => write!(f, "Missing configuration: {}", e),
            ConfigError::BadAddress(e) => write!(f, "Address formatting error: {}", e),
            ConfigError::FileDoesNotExist(e) => write!(f, "File error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Errors raised while loading authentication backends. Rejected credentials
/// are not errors; validators simply answer `false`.
#[derive(Debug)]
pub enum AuthError {
    KeyFileError(std::io::Error),
    InvalidKey(String),
    PasswordFileError(std::io::Error),
    InvalidPasswordEntry(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::KeyFileError(e) => write!(f, "Authorized keys file error: {}", e),
            AuthError::InvalidKey(e) => write!(f, "Invalid public key: {}", e),
            AuthError::PasswordFileError(e) => write!(f, "Password file error: {}", e),
            AuthError::InvalidPasswordEntry(e) => write!(f, "Invalid password entry: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

/// Error observed on an [`InterceptPipe`](crate::data_capture::InterceptPipe)
/// operation once one of its ends has been closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeError {
    /// Generic read/write on a closed pipe.
    ClosedPipe,
    /// The closing side supplied its own reason.
    Closed(String),
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeError::ClosedPipe => write!(f, "read/write on closed pipe"),
            PipeError::Closed(reason) => write!(f, "pipe closed: {}", reason),
        }
    }
}

impl std::error::Error for PipeError {}

#[derive(Debug)]
pub enum StorageError {
    WriteFailed(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum CaptureError {
    SinkWriteFailed(std::io::Error),
    EncodeFailed(serde_json::Error),
    HeaderAlreadyWritten,
    HeaderAfterEvents,
    SinkClosed,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::SinkWriteFailed(e) => write!(f, "Recording sink write failed: {}", e),
            CaptureError::EncodeFailed(e) => write!(f, "Recording encode failed: {}", e),
            CaptureError::HeaderAlreadyWritten => write!(f, "Recording header already written"),
            CaptureError::HeaderAfterEvents => {
                write!(f, "Recording header must precede every event")
            }
            CaptureError::SinkClosed => write!(f, "Recording sink already closed"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::SinkWriteFailed(err)
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::EncodeFailed(err)
    }
}

#[derive(Debug)]
pub enum SessionError {
    AuthFailed,
    UserNotFound(String),
    NoPtyRequested,
    PtyStartFailed(String),
    SessionLimitReached(usize),
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },
    StorageError(StorageError),
    CaptureError(CaptureError),
    ProcessError(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AuthFailed => write!(f, "Authentication failed"),
            SessionError::UserNotFound(name) => write!(f, "User {} not found", name),
            SessionError::NoPtyRequested => write!(f, "No pty requested"),
            SessionError::PtyStartFailed(e) => write!(f, "Pty start failed: {}", e),
            SessionError::SessionLimitReached(max) => {
                write!(f, "Too many active sessions (limit {})", max)
            }
            SessionError::InvalidState { expected, actual } => write!(
                f,
                "Invalid session state: expected {:?}, found {:?}",
                expected, actual
            ),
            SessionError::StorageError(e) => write!(f, "Storage error: {}", e),
            SessionError::CaptureError(e) => write!(f, "Capture error: {}", e),
            SessionError::ProcessError(e) => write!(f, "Process error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::StorageError(err)
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        SessionError::CaptureError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    HostKeyError(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::HostKeyError(e) => write!(f, "Host key error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Error type of the per-connection SSH handler.
#[derive(Debug)]
pub enum ServerError {
    Ssh(russh::Error),
    Session(SessionError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Ssh(e) => write!(f, "SSH protocol error: {}", e),
            ServerError::Session(e) => write!(f, "Session error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<russh::Error> for ServerError {
    fn from(err: russh::Error) -> Self {
        ServerError::Ssh(err)
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        ServerError::Session(err)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    AuthError(AuthError),
    StorageError(StorageError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::AuthError(e) => write!(f, "Authentication backend error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

impl From<AuthError> for ControllerError {
    fn from(err: AuthError) -> Self {
        ControllerError::AuthError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}
