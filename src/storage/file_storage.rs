use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::SessionContext;

/// Mode of newly created recording files.
const RECORDING_FILE_MODE: u32 = 0o660;

/// Writes each recording to its own file under a base directory.
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| {
            error!(
                "Failed to create recordings dir {}: {}",
                base_path.display(),
                e
            );
            StorageError::WriteFailed(e)
        })?;
        info!("FileStorage initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn path_for(&self, context: &SessionContext) -> PathBuf {
        self.base_path.join(context.file_name())
    }
}

impl Storage for FileStorage {
    fn open(&self, context: &SessionContext) -> Result<Box<dyn Write + Send>, StorageError> {
        let path = self.path_for(context);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(RECORDING_FILE_MODE)
            .open(&path)
            .map_err(|e| {
                error!(
                    "[{}] Failed to create recording file {}: {}",
                    context.session_id,
                    path.display(),
                    e
                );
                StorageError::WriteFailed(e)
            })?;
        info!(
            "[{}] Recording to {}",
            context.session_id,
            path.display()
        );
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn context() -> SessionContext {
        SessionContext {
            session_id: Uuid::new_v4(),
            user: "alice".into(),
            remote_addr: "127.0.0.1:40022".parse().unwrap(),
            start_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_open_creates_named_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("recordings")).unwrap();
        let ctx = context();

        let mut sink = storage.open(&ctx).unwrap();
        sink.write_all(b"{\"version\":2}\n").unwrap();
        sink.flush().unwrap();
        drop(sink);

        let path = dir
            .path()
            .join("recordings")
            .join("1700000000_alice_127.0.0.1_40022.jsonl");
        assert_eq!(fs::read(&path).unwrap(), b"{\"version\":2}\n");

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o007, 0, "recording must not be world accessible");
    }

    #[test]
    fn test_open_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let ctx = context();

        let first = storage.open(&ctx).unwrap();
        drop(first);
        match storage.open(&ctx) {
            Err(StorageError::WriteFailed(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists)
            }
            _ => panic!("existing recording must not be reopened"),
        }
    }

    #[test]
    fn test_new_fails_when_base_is_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            FileStorage::new(&file),
            Err(StorageError::WriteFailed(_))
        ));
    }
}
