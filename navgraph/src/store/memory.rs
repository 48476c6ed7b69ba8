use super::{GraphStorage, PurgeCounts, UpsertOutcome};
use crate::errors::{RecordKind, StorageError};
use crate::fingerprint::{ElementHash, ScreenHash};
use crate::models::{EdgeKey, ElementRecord, ExplorationSession, NavigationEdge, ScreenState};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, ExplorationSession>,
    screens: HashMap<ScreenHash, ScreenState>,
    elements: HashMap<ElementHash, ElementRecord>,
    edges: BTreeMap<EdgeKey, NavigationEdge>,
}

/// In-process graph storage. All tables live behind one lock so readers
/// always see a consistent graph.
#[derive(Default)]
pub struct MemoryGraphStorage {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryGraphStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable(
                "in-memory graph storage marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn missing_screen(hash: &ScreenHash) -> StorageError {
    StorageError::MissingParent {
        kind: RecordKind::Screen,
        hash: hash.to_string(),
    }
}

#[async_trait::async_trait]
impl GraphStorage for MemoryGraphStorage {
    async fn insert_session(&self, session: &ExplorationSession) -> Result<(), StorageError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(StorageError::Backend(format!(
                "session {} already exists",
                session.id
            )));
        }
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &ExplorationSession) -> Result<(), StorageError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StorageError::MissingParent {
                kind: RecordKind::Session,
                hash: session.id.clone(),
            }),
        }
    }

    async fn get_session(&self, id: &str) -> Result<Option<ExplorationSession>, StorageError> {
        self.check()?;
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn sessions_for_app(
        &self,
        app_id: &str,
    ) -> Result<Vec<ExplorationSession>, StorageError> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut sessions: Vec<_> = tables
            .sessions
            .values()
            .filter(|s| s.app_id == app_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn upsert_screen(&self, screen: &ScreenState) -> Result<UpsertOutcome, StorageError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        match tables.screens.get_mut(&screen.hash) {
            Some(existing) => {
                existing.visit_count += 1;
                existing.last_seen = existing.last_seen.max(screen.last_seen);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                tables.screens.insert(screen.hash.clone(), screen.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn get_screen(&self, hash: &ScreenHash) -> Result<Option<ScreenState>, StorageError> {
        self.check()?;
        Ok(self.tables.read().await.screens.get(hash).cloned())
    }

    async fn screens_for_app(&self, app_id: &str) -> Result<Vec<ScreenState>, StorageError> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut screens: Vec<_> = tables
            .screens
            .values()
            .filter(|s| s.app_id == app_id)
            .cloned()
            .collect();
        screens.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.hash.cmp(&b.hash)));
        Ok(screens)
    }

    async fn upsert_element(
        &self,
        element: &ElementRecord,
    ) -> Result<UpsertOutcome, StorageError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if !tables.screens.contains_key(&element.screen_hash) {
            return Err(missing_screen(&element.screen_hash));
        }
        match tables.elements.get_mut(&element.hash) {
            Some(existing) => {
                existing.seen_count += 1;
                existing.last_seen = existing.last_seen.max(element.last_seen);
                if existing.expansion.is_none() {
                    existing.expansion = element.expansion;
                }
                Ok(UpsertOutcome::Updated)
            }
            None => {
                tables.elements.insert(element.hash.clone(), element.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn get_element(
        &self,
        hash: &ElementHash,
    ) -> Result<Option<ElementRecord>, StorageError> {
        self.check()?;
        Ok(self.tables.read().await.elements.get(hash).cloned())
    }

    async fn touch_element(
        &self,
        hash: &ElementHash,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        Ok(match tables.elements.get_mut(hash) {
            Some(existing) => {
                existing.seen_count += 1;
                existing.last_seen = existing.last_seen.max(now);
                true
            }
            None => false,
        })
    }

    async fn upsert_edge(&self, edge: &NavigationEdge) -> Result<UpsertOutcome, StorageError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        for endpoint in [&edge.from, &edge.to] {
            if !tables.screens.contains_key(endpoint) {
                return Err(missing_screen(endpoint));
            }
        }
        match tables.edges.get_mut(&edge.key()) {
            Some(existing) => {
                existing.traversal_count += 1;
                existing.last_observed = existing.last_observed.max(edge.last_observed);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                tables.edges.insert(edge.key(), edge.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn get_edge(&self, key: &EdgeKey) -> Result<Option<NavigationEdge>, StorageError> {
        self.check()?;
        Ok(self.tables.read().await.edges.get(key).cloned())
    }

    async fn edges_from(&self, from: &ScreenHash) -> Result<Vec<NavigationEdge>, StorageError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .edges
            .values()
            .filter(|e| &e.from == from)
            .cloned()
            .collect())
    }

    async fn edges_to(&self, to: &ScreenHash) -> Result<Vec<NavigationEdge>, StorageError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .edges
            .values()
            .filter(|e| &e.to == to)
            .cloned()
            .collect())
    }

    async fn edges_for_app(&self, app_id: &str) -> Result<Vec<NavigationEdge>, StorageError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .edges
            .values()
            .filter(|e| e.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn delete_application_data(&self, app_id: &str) -> Result<PurgeCounts, StorageError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let mut counts = PurgeCounts::default();

        let before = tables.edges.len();
        tables.edges.retain(|_, e| e.app_id != app_id);
        counts.edges = (before - tables.edges.len()) as u64;

        let before = tables.elements.len();
        tables.elements.retain(|_, e| e.app_id != app_id);
        counts.elements = (before - tables.elements.len()) as u64;

        let before = tables.screens.len();
        tables.screens.retain(|_, s| s.app_id != app_id);
        counts.screens = (before - tables.screens.len()) as u64;

        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.app_id != app_id);
        counts.sessions = (before - tables.sessions.len()) as u64;

        Ok(counts)
    }
}
