//! Cursor store - the persisted sync watermark, one per device identity.
//!
//! [`FileCursorStore`] keeps a plain decimal epoch at
//! `<home>/.punchsync/cursors/last-sync-<identity>.txt`.
//! Writes use the same atomic `.tmp` + rename pattern as the config file.

use std::path::{Path, PathBuf};

use punchsync_core::{config, DeviceIdentity};

use crate::error::{io_err, SyncError};

/// Persistence for the last durably-accepted `raw_timestamp` of a device.
///
/// The poll loop only reaches the cursor through this trait.
pub trait CursorStore: Send {
    /// `None` when no cursor was ever saved for `identity`.
    fn load(&self, identity: &DeviceIdentity) -> Result<Option<i64>, SyncError>;

    /// Durably overwrite the cursor for `identity`.
    fn save(&self, identity: &DeviceIdentity, epoch: i64) -> Result<(), SyncError>;
}

/// `<home>/.punchsync/cursors/`
pub fn cursor_dir_at(home: &Path) -> PathBuf {
    config::root_at(home).join("cursors")
}

/// `<home>/.punchsync/cursors/last-sync-<identity>.txt`
///
/// Characters outside `[A-Za-z0-9._-]` in the identity become `_`.
pub fn cursor_path_at(home: &Path, identity: &DeviceIdentity) -> PathBuf {
    let safe: String = identity
        .0
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cursor_dir_at(home).join(format!("last-sync-{safe}.txt"))
}

/// File-backed [`CursorStore`] rooted at a home directory.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    home: PathBuf,
}

impl FileCursorStore {
    pub fn at(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
        }
    }

    pub fn path_for(&self, identity: &DeviceIdentity) -> PathBuf {
        cursor_path_at(&self.home, identity)
    }

    /// Delete the cursor for `identity`. Returns `false` if none existed.
    pub fn clear(&self, identity: &DeviceIdentity) -> Result<bool, SyncError> {
        let path = self.path_for(identity);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, identity: &DeviceIdentity) -> Result<Option<i64>, SyncError> {
        let path = self.path_for(identity);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<i64>()
            .map(Some)
            .map_err(|_| SyncError::CorruptCursor {
                path,
                contents: trimmed.to_string(),
            })
    }

    fn save(&self, identity: &DeviceIdentity, epoch: i64) -> Result<(), SyncError> {
        let path = self.path_for(identity);
        let Some(dir) = path.parent() else {
            return Err(io_err(path, std::io::Error::other("invalid cursor path")));
        };

        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let tmp = path.with_extension("txt.tmp");
        std::fs::write(&tmp, epoch.to_string()).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        tracing::debug!(device = %identity, cursor = epoch, path = %path.display(), "cursor saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(s: &str) -> DeviceIdentity {
        DeviceIdentity::from(s)
    }

    #[test]
    fn absent_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at(tmp.path());
        assert_eq!(store.load(&id("database")).unwrap(), None);
    }

    #[test]
    fn roundtrip_save_load_across_instances() {
        let tmp = TempDir::new().unwrap();
        FileCursorStore::at(tmp.path())
            .save(&id("database"), 1_741_000_000)
            .unwrap();

        let reopened = FileCursorStore::at(tmp.path());
        assert_eq!(reopened.load(&id("database")).unwrap(), Some(1_741_000_000));
        assert_eq!(reopened.load(&id("terminal")).unwrap(), None, "cursors are per identity");
    }

    #[test]
    fn save_overwrites_and_cleans_tmp() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at(tmp.path());
        store.save(&id("gate"), 100).unwrap();
        store.save(&id("gate"), 50).unwrap();

        assert_eq!(store.load(&id("gate")).unwrap(), Some(50));
        let path = store.path_for(&id("gate"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "50");
        assert!(
            !path.with_extension("txt.tmp").exists(),
            "tmp file should be removed after atomic rename"
        );
    }

    #[test]
    fn empty_file_reads_as_absent() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at(tmp.path());
        let path = store.path_for(&id("gate"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(store.load(&id("gate")).unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at(tmp.path());
        let path = store.path_for(&id("gate"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "yesterday").unwrap();

        let err = store.load(&id("gate")).unwrap_err();
        assert!(matches!(err, SyncError::CorruptCursor { .. }), "got: {err}");
    }

    #[test]
    fn clear_removes_cursor() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::at(tmp.path());
        assert!(!store.clear(&id("gate")).unwrap());
        store.save(&id("gate"), 7).unwrap();
        assert!(store.clear(&id("gate")).unwrap());
        assert_eq!(store.load(&id("gate")).unwrap(), None);
    }

    #[test]
    fn identity_is_sanitized_in_file_name() {
        let tmp = TempDir::new().unwrap();
        let path = cursor_path_at(tmp.path(), &id("front door/1"));
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("last-sync-front_door_1.txt")
        );
        assert!(path.starts_with(tmp.path().join(".punchsync").join("cursors")));
    }
}
