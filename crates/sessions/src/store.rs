use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Per-session metadata file, next to the protocol client's own device store.
pub const RECORD_FILE: &str = "session.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Stopped,
}

/// Placeholder for API credentials bound to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

/// Contents of `<root>/<id>/session.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub credentials: Credentials,
}

impl SessionRecord {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: SessionStatus::Stopped,
            created_at: now_ms(),
            credentials: Credentials::default(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Directory-per-session layout under a single root.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(RECORD_FILE)
    }

    /// Create the session directory if needed and return it.
    pub fn prepare(&self, id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir).map_err(|e| SessionError::persistence(&dir, e))?;
        Ok(dir)
    }

    /// Read a record. A missing file is `Ok(None)`, not an error.
    pub fn read(&self, id: &str) -> Result<Option<SessionRecord>> {
        let path = self.record_path(id);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::persistence(&path, e)),
        };
        serde_yaml::from_str(&data)
            .map(Some)
            .map_err(|e| SessionError::persistence(&path, e))
    }

    pub fn write(&self, record: &SessionRecord) -> Result<()> {
        let dir = self.prepare(&record.id)?;
        let path = dir.join(RECORD_FILE);
        let data = serde_yaml::to_string(record).map_err(|e| SessionError::persistence(&path, e))?;
        fs::write(&path, data).map_err(|e| SessionError::persistence(&path, e))
    }

    /// Update only the status, creating the record if it is missing.
    pub fn set_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        let mut record = self.read(id)?.unwrap_or_else(|| SessionRecord::new(id));
        if record.status == status {
            return Ok(());
        }
        record.status = status;
        self.write(&record)
    }

    /// Names of all sub-directories of the root, sorted. A missing root is empty.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::persistence(&self.root, e)),
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Delete the session directory, device credentials included.
    pub fn purge(&self, id: &str) -> Result<()> {
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::persistence(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let record = SessionRecord::new("abc");
        store.write(&record).unwrap();

        assert!(dir.path().join("abc").join(RECORD_FILE).exists());
        assert_eq!(store.read("abc").unwrap(), Some(record));
    }

    #[test]
    fn missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.prepare("empty").unwrap();
        assert!(store.read("empty").unwrap().is_none());
        assert!(store.read("never-created").unwrap().is_none());
    }

    #[test]
    fn garbage_record_is_a_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session_dir = store.prepare("bad").unwrap();
        fs::write(session_dir.join(RECORD_FILE), "id: [unclosed").unwrap();

        let err = store.read("bad").unwrap_err();
        assert_eq!(err.code(), "persistence_failure");
    }

    #[test]
    fn legacy_record_without_timestamps_parses() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session_dir = store.prepare("old").unwrap();
        fs::write(
            session_dir.join(RECORD_FILE),
            "id: old\nstatus: running\ncredentials:\n  token: \"123\"\n  client: \"123\"\n",
        )
        .unwrap();

        let record = store.read("old").unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Running);
        assert_eq!(record.created_at, 0);
        assert_eq!(record.credentials.token.as_deref(), Some("123"));
    }

    #[test]
    fn set_status_preserves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let record = SessionRecord::new("abc");
        store.write(&record).unwrap();

        store.set_status("abc", SessionStatus::Running).unwrap();
        let updated = store.read("abc").unwrap().unwrap();
        assert_eq!(updated.status, SessionStatus::Running);
        assert_eq!(updated.created_at, record.created_at);
    }

    #[test]
    fn list_ids_skips_files_and_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        assert!(store.list_ids().unwrap().is_empty());

        store.prepare("b").unwrap();
        store.prepare("a").unwrap();
        fs::write(store.root().join("stray.txt"), "x").unwrap();
        assert_eq!(store.list_ids().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn purge_removes_everything_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.write(&SessionRecord::new("abc")).unwrap();
        fs::write(store.session_dir("abc").join("store.db"), "device").unwrap();

        store.purge("abc").unwrap();
        assert!(!store.session_dir("abc").exists());
        store.purge("abc").unwrap();
    }
}
