//! Durable registry of sessions.
//!
//! A session is the persistent identity a tab is opened for: a project, a
//! working directory and a title. The catalog keeps the full collection in
//! memory and rewrites it as a whole under [`SESSIONS_KEY`] on every change.

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use settings::constants::session::FALLBACK_TITLE;
use settings::constants::store::SESSIONS_KEY;
use store::BlobStore;
use util::ResultExt;

/// Unique, never reused identifier of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of the project a session belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A persistent session record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub title: String,
    pub working_directory: PathBuf,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Field changes accepted by [`SessionCatalog::update`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub title: Option<String>,
}

/// Title derived from the last segment of `working_directory`.
pub fn default_title(working_directory: &Path) -> String {
    working_directory
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

/// Persisted timestamps carry millisecond precision.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Default)]
struct CatalogState {
    sessions: Vec<Session>,
    /// Stored records that did not decode. They are written back untouched.
    unreadable: Vec<Value>,
    loaded: bool,
}

#[derive(Serialize)]
#[serde(untagged)]
enum StoredRecord<'a> {
    Session(&'a Session),
    Unreadable(&'a Value),
}

/// The authoritative collection of sessions.
///
/// Reads are synchronous against the in-memory collection. Mutations load
/// the persisted collection first if nothing has been loaded yet, so a
/// mutation can never overwrite sessions it has not seen. While the stored
/// collection cannot be read, mutations stay in memory and the load is
/// retried on the next one.
pub struct SessionCatalog {
    store: Arc<dyn BlobStore>,
    state: RwLock<CatalogState>,
    /// Serializes load-modify-persist sequences.
    write_lock: tokio::sync::Mutex<()>,
}

impl SessionCatalog {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            state: RwLock::new(CatalogState::default()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Read the persisted collection. Only the first call touches the store.
    pub async fn load(&self) -> Vec<Session> {
        let _guard = self.write_lock.lock().await;
        self.ensure_loaded().await;
        self.all()
    }

    /// Returns whether the stored collection has been read. Must be called
    /// with `write_lock` held.
    async fn ensure_loaded(&self) -> bool {
        if self.state.read().loaded {
            return true;
        }

        let records = match self.store.get(SESSIONS_KEY).await {
            Ok(Some(Value::Array(records))) => records,
            Ok(None) => {
                tracing::debug!("No persisted sessions, starting empty");
                Vec::new()
            }
            Ok(Some(_)) => {
                tracing::warn!("Stored sessions are not a list, leaving them untouched");
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to load sessions: {}", e);
                return false;
            }
        };

        let mut sessions = Vec::with_capacity(records.len());
        let mut unreadable = Vec::new();
        for record in records {
            match serde_json::from_value::<Session>(record.clone()) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!("Keeping unreadable session record as is: {}", e);
                    unreadable.push(record);
                }
            }
        }
        tracing::info!(
            "Loaded {} session(s), {} unreadable",
            sessions.len(),
            unreadable.len()
        );

        let mut state = self.state.write();
        // Sessions created while the store was unreadable come after the stored ones.
        for session in std::mem::take(&mut state.sessions) {
            if !sessions.iter().any(|s| s.id == session.id) {
                sessions.push(session);
            }
        }
        state.sessions = sessions;
        state.unreadable = unreadable;
        state.loaded = true;
        true
    }

    /// Write the whole collection back. Skipped while the stored collection
    /// is unreadable. Must be called with `write_lock` held.
    async fn persist(&self, loaded: bool) {
        if !loaded {
            tracing::warn!("Session store unreadable, keeping changes in memory only");
            return;
        }

        let (sessions, unreadable) = {
            let state = self.state.read();
            (state.sessions.clone(), state.unreadable.clone())
        };
        let records: Vec<StoredRecord<'_>> = sessions
            .iter()
            .map(StoredRecord::Session)
            .chain(unreadable.iter().map(StoredRecord::Unreadable))
            .collect();
        store::save(self.store.as_ref(), SESSIONS_KEY, &records)
            .await
            .log_err_with("Failed to persist sessions");
    }

    /// Create and persist a new session.
    ///
    /// An omitted or blank `title` defaults to the last segment of
    /// `working_directory`. Any other title is kept as given.
    pub async fn create(
        &self,
        project_id: ProjectId,
        working_directory: impl Into<PathBuf>,
        title: Option<&str>,
    ) -> Session {
        let _guard = self.write_lock.lock().await;
        let loaded = self.ensure_loaded().await;

        let working_directory = working_directory.into();
        let title = match title {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => default_title(&working_directory),
        };
        let now = now();
        let session = Session {
            id: SessionId::new(),
            project_id,
            title,
            working_directory,
            created_at: now,
            updated_at: now,
        };

        self.state.write().sessions.push(session.clone());
        tracing::debug!("Created session {} ({})", session.id, session.title);
        self.persist(loaded).await;
        session
    }

    /// Merge `update` into the session and bump `updated_at`. Unknown ids
    /// are ignored.
    pub async fn update(&self, id: SessionId, update: SessionUpdate) {
        let _guard = self.write_lock.lock().await;
        let loaded = self.ensure_loaded().await;

        {
            let mut state = self.state.write();
            let Some(session) = state.sessions.iter_mut().find(|s| s.id == id) else {
                tracing::debug!("Ignoring update for unknown session {}", id);
                return;
            };
            if let Some(title) = update.title {
                session.title = title;
            }
            session.updated_at = session.updated_at.max(now());
        }

        self.persist(loaded).await;
    }

    /// Record activity on a session without changing any field.
    pub async fn touch(&self, id: SessionId) {
        self.update(id, SessionUpdate::default()).await;
    }

    /// Remove a session. Deleting an unknown id is a no-op apart from the
    /// persist.
    pub async fn delete(&self, id: SessionId) {
        let _guard = self.write_lock.lock().await;
        let loaded = self.ensure_loaded().await;

        let removed = {
            let mut state = self.state.write();
            let before = state.sessions.len();
            state.sessions.retain(|s| s.id != id);
            before != state.sessions.len()
        };
        if removed {
            tracing::debug!("Deleted session {}", id);
        }

        self.persist(loaded).await;
    }

    /// Sessions belonging to `project_id`, in creation order.
    pub fn by_project(&self, project_id: &ProjectId) -> Vec<Session> {
        self.state
            .read()
            .sessions
            .iter()
            .filter(|s| &s.project_id == project_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.state
            .read()
            .sessions
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Session> {
        self.state.read().sessions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use store::{MemoryStore, MockBlobStore, StoreError};
    use test_case::test_case;

    fn catalog() -> (Arc<MemoryStore>, SessionCatalog) {
        let store = Arc::new(MemoryStore::new());
        let catalog = SessionCatalog::new(store.clone());
        (store, catalog)
    }

    fn persisted_ids(store: &MemoryStore) -> Vec<SessionId> {
        let sessions: Vec<Session> =
            serde_json::from_value(store.snapshot(SESSIONS_KEY).unwrap_or_default())
                .unwrap_or_default();
        sessions.into_iter().map(|s| s.id).collect()
    }

    #[test_case("/home/me/proj", None, "proj" ; "derived from directory")]
    #[test_case("/home/me/proj/", None, "proj" ; "trailing slash")]
    #[test_case("/home/me/proj", Some(""), "proj" ; "empty title")]
    #[test_case("/home/me/proj", Some("   "), "proj" ; "blank title")]
    #[test_case("/home/me/proj", Some("API work"), "API work" ; "explicit title")]
    #[test_case("/home/me/proj", Some(" API "), " API " ; "padded title kept as given")]
    #[test_case("/", None, "New Session" ; "root directory")]
    #[tokio::test]
    async fn test_create_title(dir: &str, title: Option<&str>, expected: &str) {
        let (_, catalog) = catalog();
        let session = catalog.create("p1".into(), dir, title).await;
        assert_eq!(session.title, expected);
    }

    #[tokio::test]
    async fn test_load_absent_is_empty() {
        let (_, catalog) = catalog();
        assert!(catalog.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupt_entry_is_empty() {
        let store = Arc::new(MemoryStore::with_entries([(
            SESSIONS_KEY.to_string(),
            serde_json::json!({"not": "a list"}),
        )]));
        let catalog = SessionCatalog::new(store);
        assert!(catalog.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_record_survives_create() {
        let valid = Session {
            id: SessionId::new(),
            project_id: "p1".into(),
            title: "valid".to_string(),
            working_directory: PathBuf::from("/valid"),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };
        let broken = serde_json::json!({
            "id": SessionId::new(),
            "projectId": "p1",
            "title": "missing fields",
        });
        let store = Arc::new(MemoryStore::with_entries([(
            SESSIONS_KEY.to_string(),
            serde_json::json!([&valid, &broken]),
        )]));
        let catalog = SessionCatalog::new(store.clone());

        assert_eq!(catalog.load().await, vec![valid.clone()]);
        let created = catalog.create("p1".into(), "/new", None).await;

        let persisted = store.snapshot(SESSIONS_KEY).unwrap();
        let records = persisted.as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], serde_json::to_value(&valid).unwrap());
        assert_eq!(records[1], serde_json::to_value(&created).unwrap());
        assert_eq!(records[2], broken);
    }

    #[tokio::test]
    async fn test_unreadable_collection_is_never_overwritten() {
        let stored = serde_json::json!({"not": "a list"});
        let store = Arc::new(MemoryStore::with_entries([(
            SESSIONS_KEY.to_string(),
            stored.clone(),
        )]));
        let catalog = SessionCatalog::new(store.clone());

        let session = catalog.create("p1".into(), "/a", None).await;
        catalog.touch(session.id).await;

        assert_eq!(store.snapshot(SESSIONS_KEY), Some(stored));
        assert_eq!(catalog.get(session.id).map(|s| s.id), Some(session.id));
    }

    #[tokio::test]
    async fn test_failed_load_is_retried_before_persisting() {
        let existing = Session {
            id: SessionId::new(),
            project_id: "p1".into(),
            title: "existing".to_string(),
            working_directory: PathBuf::from("/existing"),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };
        let stored = serde_json::to_value(vec![existing.clone()]).unwrap();
        let written = Arc::new(parking_lot::Mutex::new(None));

        let mut store = MockBlobStore::new();
        let mut calls = 0;
        store.expect_get().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(StoreError::Unavailable("busy".to_string()))
            } else {
                Ok(Some(stored.clone()))
            }
        });
        let sink = written.clone();
        store.expect_set().times(1).returning(move |_, value| {
            *sink.lock() = Some(value);
            Ok(())
        });
        let catalog = SessionCatalog::new(Arc::new(store));

        assert!(catalog.load().await.is_empty());
        let created = catalog.create("p1".into(), "/new", None).await;

        assert_eq!(catalog.all(), vec![existing.clone(), created.clone()]);
        let persisted: Vec<Session> =
            serde_json::from_value(written.lock().take().unwrap()).unwrap();
        assert_eq!(persisted, vec![existing, created]);
    }

    #[tokio::test]
    async fn test_created_session_matches_reloaded_copy() {
        let (store, catalog) = catalog();
        let session = catalog.create("p1".into(), "/a", None).await;
        catalog.touch(session.id).await;
        let touched = catalog.get(session.id).unwrap();

        let reloaded = SessionCatalog::new(store).load().await;
        assert_eq!(reloaded, vec![touched]);
    }

    #[tokio::test]
    async fn test_load_reads_store_once() {
        let mut store = MockBlobStore::new();
        store
            .expect_get()
            .times(1)
            .returning(|_| Ok(Some(serde_json::json!([]))));
        let catalog = SessionCatalog::new(Arc::new(store));
        catalog.load().await;
        catalog.load().await;
    }

    #[tokio::test]
    async fn test_create_persists_full_collection() {
        let (store, catalog) = catalog();
        let a = catalog.create("p1".into(), "/a", None).await;
        let b = catalog.create("p2".into(), "/b", None).await;

        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, a.updated_at);
        assert_eq!(persisted_ids(&store), vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_create_before_load_keeps_persisted_sessions() {
        let (store, first) = catalog();
        let existing = first.create("p1".into(), "/a", None).await;

        let second = SessionCatalog::new(store.clone());
        let added = second.create("p1".into(), "/b", None).await;
        assert_eq!(persisted_ids(&store), vec![existing.id, added.id]);
    }

    #[tokio::test]
    async fn test_update_merges_title_and_bumps_updated_at() {
        let (_, catalog) = catalog();
        let session = catalog.create("p1".into(), "/a", None).await;

        catalog
            .update(
                session.id,
                SessionUpdate {
                    title: Some("renamed".to_string()),
                },
            )
            .await;

        let updated = catalog.get(session.id).unwrap();
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.created_at, session.created_at);
        assert!(updated.updated_at >= session.updated_at);
    }

    #[tokio::test]
    async fn test_touch_keeps_fields() {
        let (_, catalog) = catalog();
        let session = catalog.create("p1".into(), "/a", Some("keep")).await;
        catalog.touch(session.id).await;

        let touched = catalog.get(session.id).unwrap();
        assert_eq!(touched.title, "keep");
        assert!(touched.updated_at >= session.updated_at);
    }

    #[tokio::test]
    async fn test_updated_at_never_moves_backwards() {
        let future = Utc::now() + chrono::Duration::days(1);
        // Persisted timestamps carry millisecond precision.
        let future = DateTime::from_timestamp_millis(future.timestamp_millis()).unwrap();
        let session = Session {
            id: SessionId::new(),
            project_id: "p1".into(),
            title: "t".to_string(),
            working_directory: PathBuf::from("/a"),
            created_at: future,
            updated_at: future,
        };
        let store = Arc::new(MemoryStore::with_entries([(
            SESSIONS_KEY.to_string(),
            serde_json::to_value(vec![session.clone()]).unwrap(),
        )]));
        let catalog = SessionCatalog::new(store);
        catalog.load().await;

        catalog.touch(session.id).await;
        assert_eq!(catalog.get(session.id).unwrap().updated_at, future);
    }

    #[tokio::test]
    async fn test_update_unknown_is_noop() {
        let (_, catalog) = catalog();
        let session = catalog.create("p1".into(), "/a", None).await;
        catalog
            .update(
                SessionId::new(),
                SessionUpdate {
                    title: Some("x".to_string()),
                },
            )
            .await;
        assert_eq!(catalog.all(), vec![session]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, catalog) = catalog();
        let a = catalog.create("p1".into(), "/a", None).await;
        let b = catalog.create("p1".into(), "/b", None).await;

        catalog.delete(a.id).await;
        catalog.delete(a.id).await;

        assert_eq!(catalog.all(), vec![b.clone()]);
        assert_eq!(persisted_ids(&store), vec![b.id]);
    }

    #[tokio::test]
    async fn test_by_project_filters_in_order() {
        let (_, catalog) = catalog();
        let a = catalog.create("p1".into(), "/a", None).await;
        catalog.create("p2".into(), "/b", None).await;
        let c = catalog.create("p1".into(), "/c", None).await;

        let ids: Vec<_> = catalog
            .by_project(&"p1".into())
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert!(catalog.by_project(&"p3".into()).is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory() {
        let mut store = MockBlobStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_set()
            .returning(|_, _| Err(StoreError::Unavailable("read-only".to_string())));
        let catalog = SessionCatalog::new(Arc::new(store));

        let session = catalog.create("p1".into(), "/a", None).await;
        assert_eq!(catalog.get(session.id), Some(session));
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let session = Session {
            id: SessionId::new(),
            project_id: "p1".into(),
            title: "proj".to_string(),
            working_directory: PathBuf::from("/proj"),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_500).unwrap(),
        };
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["projectId"], "p1");
        assert_eq!(value["workingDirectory"], "/proj");
        assert_eq!(value["createdAt"], 1_700_000_000_000i64);
        assert_eq!(value["updatedAt"], 1_700_000_000_500i64);

        let back: Session = serde_json::from_value(value).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_session_id_parses() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
