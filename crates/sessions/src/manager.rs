//! Registry of live sessions keyed by id.
//!
//! The manager owns the only `id → Session` map. Reads take a shared lock,
//! mutations an exclusive one, and no lock is held while a session talks to
//! its protocol client.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use {
    futures::future::join_all,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
    zaapi_channels::ClientFactory,
};

use crate::{
    dispatch::{LogSink, MessageSink},
    error::{Result, SessionError},
    id::validate_session_id,
    session::{Session, SessionSnapshot},
    store::{SessionRecord, SessionStatus, SessionStore},
};

/// Default lifetime of a rendered QR code.
pub const DEFAULT_QR_TTL: Duration = Duration::from_secs(45);

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    factory: Arc<dyn ClientFactory>,
    sink: Arc<dyn MessageSink>,
    store: SessionStore,
    qr_ttl: Duration,
}

impl SessionManager {
    pub fn new(root: impl Into<PathBuf>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            sink: Arc::new(LogSink),
            store: SessionStore::new(root),
            qr_ttl: DEFAULT_QR_TTL,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_qr_ttl(mut self, ttl: Duration) -> Self {
        self.qr_ttl = ttl;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Build a session with its own storage directory and protocol client.
    ///
    /// The session is not registered and not started. A record is written
    /// only when none exists, so restored sessions keep their history.
    pub async fn create(&self, id: &str) -> Result<Arc<Session>> {
        validate_session_id(id)?;
        if self.sessions.read().await.contains_key(id) {
            return Err(SessionError::AlreadyExists(id.to_string()));
        }

        let dir = self.store.prepare(id)?;
        if self.store.read(id)?.is_none() {
            self.store.write(&SessionRecord::new(id))?;
        }

        let client = self
            .factory
            .build(id, &dir)
            .await
            .map_err(|e| SessionError::ClientSetup {
                id: id.to_string(),
                reason: format!("{e:#}"),
            })?;
        debug!(session = %id, dir = %dir.display(), "session created");

        Ok(Session::new(
            id,
            client,
            Arc::clone(&self.sink),
            self.store.clone(),
            self.qr_ttl,
        ))
    }

    /// Insert or replace. A replaced session is returned to the caller, who
    /// is responsible for stopping it.
    pub async fn add(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let previous = self
            .sessions
            .write()
            .await
            .insert(session.id().to_string(), session);
        if let Some(previous) = &previous {
            warn!(session = %previous.id(), "replaced a registered session");
        }
        previous
    }

    /// Insert only if the id is free.
    pub async fn register(&self, session: Arc<Session>) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let id = session.id().to_string();
        if sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id));
        }
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drop the session from the registry. It is not stopped.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(id)
    }

    /// Remove, stop, and optionally delete the session's storage directory.
    pub async fn stop_and_remove(&self, id: &str, purge: bool) -> Result<()> {
        let session = self
            .remove(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.stop().await?;
        if purge {
            self.store.purge(id)?;
            info!(session = %id, "session removed and purged");
        } else {
            info!(session = %id, "session removed");
        }
        Ok(())
    }

    /// Registered sessions, sorted by id.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    pub async fn list(&self) -> Vec<SessionSnapshot> {
        self.sessions()
            .await
            .iter()
            .map(|session| session.snapshot())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Re-register every session found on disk.
    ///
    /// Directories without a readable record, or with an invalid name, are
    /// skipped with a warning. Restored sessions are registered but not started.
    pub async fn restore_all(&self) -> Result<Vec<Arc<Session>>> {
        let mut restored = Vec::new();
        for id in self.store.list_ids()? {
            if let Err(e) = validate_session_id(&id) {
                warn!(dir = %id, error = %e, "skipping directory with invalid session id");
                continue;
            }
            match self.store.read(&id) {
                Ok(Some(_)) => {},
                Ok(None) => {
                    warn!(session = %id, "no session record, skipping");
                    continue;
                },
                Err(e) => {
                    warn!(session = %id, error = %e, "unreadable session record, skipping");
                    continue;
                },
            }
            if self.get(&id).await.is_some() {
                debug!(session = %id, "already registered, skipping restore");
                continue;
            }

            let session = match self.create(&id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(session = %id, error = %e, "failed to restore session");
                    continue;
                },
            };
            if let Ok(session) = self.register(session).await {
                restored.push(session);
            }
        }
        info!(count = restored.len(), "restored sessions from disk");
        Ok(restored)
    }

    /// Start the given restored sessions that were running when last seen
    /// and hold device credentials. Failures are logged; the rest proceed.
    pub async fn autostart_restored(&self, sessions: &[Arc<Session>]) -> usize {
        let mut started = 0;
        for session in sessions {
            let id = session.id();
            let was_running = matches!(
                self.store.read(id),
                Ok(Some(record)) if record.status == SessionStatus::Running
            );
            if !was_running || !session.has_credentials() {
                continue;
            }
            match session.start().await {
                Ok(()) => started += 1,
                Err(e) => warn!(session = %id, error = %e, "autostart failed"),
            }
        }
        started
    }

    /// Stop every session concurrently. The registry keeps its entries and
    /// the on-disk status is left as it was so a restart resumes them.
    pub async fn shutdown(&self) {
        let sessions = self.sessions().await;
        info!(count = sessions.len(), "stopping all sessions");
        let results = join_all(sessions.iter().map(|session| async move {
            let running = !session.is_stopped();
            let result = session.stop().await;
            if running {
                // Keep the running mark for the next restore.
                if let Err(e) = self.store.set_status(session.id(), SessionStatus::Running) {
                    warn!(session = %session.id(), error = %e, "failed to keep session status");
                }
            }
            (session.id().to_string(), result)
        }))
        .await;
        for (id, result) in results {
            if let Err(e) = result {
                warn!(session = %id, error = %e, "stop failed during shutdown");
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("root", &self.store.root())
            .field("qr_ttl", &self.qr_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::state::SessionPhase,
        rstest::rstest,
        zaapi_channels::memory::MemoryClientFactory,
    };

    struct Fixture {
        dir: tempfile::TempDir,
        factory: Arc<MemoryClientFactory>,
        manager: Arc<SessionManager>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MemoryClientFactory::new());
        let manager = Arc::new(SessionManager::new(dir.path(), factory.clone()));
        Fixture {
            dir,
            factory,
            manager,
        }
    }

    #[tokio::test]
    async fn create_prepares_storage_without_registering() {
        let f = fixture();
        let session = f.manager.create("abc").await.unwrap();

        assert_eq!(session.id(), "abc");
        assert!(session.is_stopped());
        assert!(f.dir.path().join("abc").is_dir());
        assert_eq!(
            f.manager.store().read("abc").unwrap().unwrap().status,
            SessionStatus::Stopped
        );
        assert!(f.manager.get("abc").await.is_none());
    }

    #[rstest]
    #[case("")]
    #[case("../etc")]
    #[case("a/b")]
    #[tokio::test]
    async fn create_rejects_bad_ids(#[case] id: &str) {
        let f = fixture();
        let err = f.manager.create(id).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidId { .. }));
    }

    #[tokio::test]
    async fn add_then_get_returns_same_session() {
        let f = fixture();
        let session = f.manager.create("abc").await.unwrap();
        assert!(f.manager.add(Arc::clone(&session)).await.is_none());

        let found = f.manager.get("abc").await.unwrap();
        assert!(Arc::ptr_eq(&found, &session));
        assert!(f.manager.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn add_replaces_and_returns_previous() {
        let f = fixture();
        let first = f.manager.create("abc").await.unwrap();
        let second = f.manager.create("abc").await.unwrap();
        f.manager.add(Arc::clone(&first)).await;

        let previous = f.manager.add(Arc::clone(&second)).await.unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert!(Arc::ptr_eq(&f.manager.get("abc").await.unwrap(), &second));
    }

    #[tokio::test]
    async fn register_refuses_duplicates() {
        let f = fixture();
        let first = f.manager.create("abc").await.unwrap();
        let second = f.manager.create("abc").await.unwrap();
        f.manager.register(first).await.unwrap();

        let err = f.manager.register(second).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
        assert!(matches!(
            f.manager.create("abc").await.unwrap_err(),
            SessionError::AlreadyExists(_)
        ));
    }

    #[tokio::test]
    async fn remove_does_not_stop() {
        let f = fixture();
        f.factory.mark_paired("abc");
        let session = f.manager.create("abc").await.unwrap();
        f.manager.add(Arc::clone(&session)).await;
        session.start().await.unwrap();

        let removed = f.manager.remove("abc").await.unwrap();
        assert!(!removed.is_stopped());
        assert!(f.manager.get("abc").await.is_none());
        assert!(f.manager.remove("abc").await.is_none());
    }

    #[tokio::test]
    async fn stop_and_remove_with_purge() {
        let f = fixture();
        f.factory.mark_paired("abc");
        let session = f.manager.create("abc").await.unwrap();
        f.manager.add(Arc::clone(&session)).await;
        session.start().await.unwrap();

        f.manager.stop_and_remove("abc", true).await.unwrap();
        assert!(session.is_stopped());
        assert!(!f.dir.path().join("abc").exists());
        assert!(matches!(
            f.manager.stop_and_remove("abc", false).await.unwrap_err(),
            SessionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let f = fixture();
        for id in ["c", "a", "b"] {
            f.manager.add(f.manager.create(id).await.unwrap()).await;
        }
        let ids: Vec<_> = f.manager.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_and_reads_keep_the_map_consistent() {
        let f = fixture();
        let mut sessions = Vec::new();
        for i in 0..32 {
            sessions.push(f.manager.create(&format!("s{i}")).await.unwrap());
        }

        let tasks: Vec<_> = sessions
            .into_iter()
            .map(|session| {
                let manager = Arc::clone(&f.manager);
                tokio::spawn(async move {
                    let id = session.id().to_string();
                    manager.add(session).await;
                    assert!(manager.get(&id).await.is_some());
                    manager.list().await.len()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(f.manager.len().await, 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_add_remove_get_per_id() {
        let f = fixture();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let session = f.manager.create(&format!("s{i}")).await.unwrap();
            let manager = Arc::clone(&f.manager);
            tasks.push(tokio::spawn(async move {
                let id = session.id().to_string();
                for _ in 0..20 {
                    assert!(manager.add(Arc::clone(&session)).await.is_none());
                    let found = manager.get(&id).await.unwrap();
                    assert!(Arc::ptr_eq(&found, &session));

                    let removed = manager.remove(&id).await.unwrap();
                    assert!(Arc::ptr_eq(&removed, &session));
                    assert!(manager.get(&id).await.is_none());
                    assert!(manager.remove(&id).await.is_none());
                }
                if i % 2 == 0 {
                    manager.add(session).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(f.manager.len().await, 16);
        for i in 0..32 {
            let present = f.manager.get(&format!("s{i}")).await.is_some();
            assert_eq!(present, i % 2 == 0, "s{i}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_on_one_id_form_a_single_chain() {
        let f = fixture();
        let mut candidates = Vec::new();
        for _ in 0..16 {
            candidates.push(f.manager.create("shared").await.unwrap());
        }

        let tasks: Vec<_> = candidates
            .iter()
            .cloned()
            .map(|session| {
                let manager = Arc::clone(&f.manager);
                tokio::spawn(async move { manager.add(session).await })
            })
            .collect();
        let mut replaced = Vec::new();
        for task in tasks {
            if let Some(previous) = task.await.unwrap() {
                replaced.push(previous);
            }
        }

        // Every add but the first displaced exactly one earlier entry, and the
        // survivor is the one session nobody displaced.
        assert_eq!(replaced.len(), 15);
        let last = f.manager.get("shared").await.unwrap();
        assert!(!replaced.iter().any(|s| Arc::ptr_eq(s, &last)));
        for candidate in &candidates {
            let displaced = replaced.iter().filter(|s| Arc::ptr_eq(s, candidate)).count();
            let survived = Arc::ptr_eq(candidate, &last);
            assert_eq!(displaced + usize::from(survived), 1);
        }
    }

    #[tokio::test]
    async fn restore_skips_missing_and_broken_records() {
        let f = fixture();
        let store = SessionStore::new(f.dir.path());
        store.write(&SessionRecord::new("good")).unwrap();
        std::fs::create_dir_all(f.dir.path().join("empty")).unwrap();
        std::fs::create_dir_all(f.dir.path().join("broken")).unwrap();
        std::fs::write(
            f.dir.path().join("broken").join(crate::store::RECORD_FILE),
            "status: [unterminated",
        )
        .unwrap();
        std::fs::write(f.dir.path().join("stray.txt"), "x").unwrap();

        let restored = f.manager.restore_all().await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id(), "good");
        let session = f.manager.get("good").await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Stopped);
    }

    #[tokio::test]
    async fn restore_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(
            dir.path().join("does-not-exist"),
            Arc::new(MemoryClientFactory::new()),
        );
        assert!(manager.restore_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn autostart_only_resumes_paired_running_sessions() {
        let f = fixture();
        let store = SessionStore::new(f.dir.path());
        for (id, status) in [
            ("paired", SessionStatus::Running),
            ("unpaired", SessionStatus::Running),
            ("idle", SessionStatus::Stopped),
        ] {
            let mut record = SessionRecord::new(id);
            record.status = status;
            store.write(&record).unwrap();
        }
        f.factory.mark_paired("paired");
        f.factory.mark_paired("idle");

        let restored = f.manager.restore_all().await.unwrap();
        assert_eq!(f.manager.autostart_restored(&restored).await, 1);

        assert!(!f.manager.get("paired").await.unwrap().is_stopped());
        assert!(f.manager.get("unpaired").await.unwrap().is_stopped());
        assert!(f.manager.get("idle").await.unwrap().is_stopped());
    }

    #[tokio::test]
    async fn shutdown_stops_everything_and_keeps_running_mark() {
        let f = fixture();
        f.factory.mark_paired("a");
        for id in ["a", "b"] {
            f.manager.add(f.manager.create(id).await.unwrap()).await;
        }
        f.manager.get("a").await.unwrap().start().await.unwrap();

        f.manager.shutdown().await;

        for session in f.manager.sessions().await {
            assert!(session.is_stopped());
        }
        assert_eq!(f.factory.client("a").unwrap().disconnect_count(), 1);
        let store = f.manager.store();
        assert_eq!(store.read("a").unwrap().unwrap().status, SessionStatus::Running);
        assert_eq!(store.read("b").unwrap().unwrap().status, SessionStatus::Stopped);
    }
}
