//! Durable navigation graph: sessions, screens, elements and edges.
//!
//! [`GraphStorage`] is the persistence seam; [`NavigationGraphStore`] sits on
//! top of it and turns rejected writes into logged outcomes so that a single
//! orphaned row never ends an exploration.

use crate::errors::{RecordKind, StorageError};
use crate::fingerprint::{ElementHash, ScreenHash};
use crate::models::{
    EdgeKey, ElementRecord, ExplorationSession, NavigationEdge, ScreenState, SessionSummary,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

mod memory;
mod sqlite;

pub use memory::MemoryGraphStorage;
pub use sqlite::SqliteGraphStorage;

/// Result of an insert-or-update at the backend level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Result of a write through [`NavigationGraphStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    /// A referenced parent row is missing; nothing was written
    Rejected,
}

impl From<UpsertOutcome> for WriteOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Inserted => WriteOutcome::Inserted,
            UpsertOutcome::Updated => WriteOutcome::Updated,
        }
    }
}

/// Rows removed by [`GraphStorage::delete_application_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCounts {
    pub sessions: u64,
    pub screens: u64,
    pub elements: u64,
    pub edges: u64,
}

/// Operations the graph needs from a persistence backend.
///
/// Upserts never overwrite identity or first-seen data. A conflicting screen
/// write bumps `visit_count`, a conflicting element write bumps `seen_count`
/// and a conflicting edge write bumps `traversal_count`, each also moving
/// the last-seen timestamp forward. Writes whose parent row is missing fail
/// with [`StorageError::MissingParent`].
#[async_trait::async_trait]
pub trait GraphStorage: Send + Sync {
    async fn insert_session(&self, session: &ExplorationSession) -> Result<(), StorageError>;
    async fn update_session(&self, session: &ExplorationSession) -> Result<(), StorageError>;
    async fn get_session(&self, id: &str) -> Result<Option<ExplorationSession>, StorageError>;
    async fn sessions_for_app(&self, app_id: &str)
        -> Result<Vec<ExplorationSession>, StorageError>;

    async fn upsert_screen(&self, screen: &ScreenState) -> Result<UpsertOutcome, StorageError>;
    async fn get_screen(&self, hash: &ScreenHash) -> Result<Option<ScreenState>, StorageError>;
    async fn screens_for_app(&self, app_id: &str) -> Result<Vec<ScreenState>, StorageError>;

    async fn upsert_element(&self, element: &ElementRecord)
        -> Result<UpsertOutcome, StorageError>;
    async fn get_element(&self, hash: &ElementHash)
        -> Result<Option<ElementRecord>, StorageError>;
    /// Bump `seen_count`/`last_seen`; false if the element is unknown.
    async fn touch_element(&self, hash: &ElementHash, now: DateTime<Utc>)
        -> Result<bool, StorageError>;

    async fn upsert_edge(&self, edge: &NavigationEdge) -> Result<UpsertOutcome, StorageError>;
    async fn get_edge(&self, key: &EdgeKey) -> Result<Option<NavigationEdge>, StorageError>;
    async fn edges_from(&self, from: &ScreenHash) -> Result<Vec<NavigationEdge>, StorageError>;
    async fn edges_to(&self, to: &ScreenHash) -> Result<Vec<NavigationEdge>, StorageError>;
    async fn edges_for_app(&self, app_id: &str) -> Result<Vec<NavigationEdge>, StorageError>;

    /// Remove everything owned by `app_id`.
    async fn delete_application_data(&self, app_id: &str) -> Result<PurgeCounts, StorageError>;
}

/// Write counters, mostly for tests and reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    pub screens_inserted: u64,
    pub elements_inserted: u64,
    pub edges_inserted: u64,
    pub updates: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct WriteCounters {
    screens_inserted: AtomicU64,
    elements_inserted: AtomicU64,
    edges_inserted: AtomicU64,
    updates: AtomicU64,
    rejected: AtomicU64,
}

/// Append-only graph writer and reader.
///
/// The exploration engine is the only writer; pathfinding and reporting
/// read concurrently through the same handle.
pub struct NavigationGraphStore {
    backend: Arc<dyn GraphStorage>,
    counters: WriteCounters,
}

impl NavigationGraphStore {
    pub fn new(backend: Arc<dyn GraphStorage>) -> Self {
        Self {
            backend,
            counters: WriteCounters::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryGraphStorage::new()))
    }

    pub fn open_sqlite(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(SqliteGraphStorage::open(path)?)))
    }

    pub fn backend(&self) -> &Arc<dyn GraphStorage> {
        &self.backend
    }

    pub fn write_stats(&self) -> WriteStats {
        WriteStats {
            screens_inserted: self.counters.screens_inserted.load(Ordering::Relaxed),
            elements_inserted: self.counters.elements_inserted.load(Ordering::Relaxed),
            edges_inserted: self.counters.edges_inserted.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub async fn insert_session(&self, session: &ExplorationSession) -> Result<(), StorageError> {
        self.backend.insert_session(session).await
    }

    pub async fn update_session(&self, session: &ExplorationSession) -> Result<(), StorageError> {
        self.backend.update_session(session).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<ExplorationSession>, StorageError> {
        self.backend.get_session(id).await
    }

    pub async fn sessions_for_app(
        &self,
        app_id: &str,
    ) -> Result<Vec<ExplorationSession>, StorageError> {
        self.backend.sessions_for_app(app_id).await
    }

    pub async fn session_summary(&self, id: &str) -> Result<Option<SessionSummary>, StorageError> {
        Ok(self.backend.get_session(id).await?.map(|s| s.summary()))
    }

    pub async fn upsert_screen(&self, screen: &ScreenState) -> Result<WriteOutcome, StorageError> {
        let outcome = self.backend.upsert_screen(screen).await?;
        match outcome {
            UpsertOutcome::Inserted => {
                self.counters.screens_inserted.fetch_add(1, Ordering::Relaxed);
                debug!(screen_hash = %screen.hash, label = %screen.surface_label, "New screen");
            }
            UpsertOutcome::Updated => {
                self.counters.updates.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(outcome.into())
    }

    pub async fn get_screen(&self, hash: &ScreenHash) -> Result<Option<ScreenState>, StorageError> {
        self.backend.get_screen(hash).await
    }

    pub async fn screens_for_app(&self, app_id: &str) -> Result<Vec<ScreenState>, StorageError> {
        self.backend.screens_for_app(app_id).await
    }

    pub async fn upsert_element(
        &self,
        element: &ElementRecord,
    ) -> Result<WriteOutcome, StorageError> {
        let result = self.backend.upsert_element(element).await;
        self.settle_write(result, RecordKind::Element, element.hash.as_str(), || {
            self.counters.elements_inserted.fetch_add(1, Ordering::Relaxed);
        })
    }

    pub async fn get_element(
        &self,
        hash: &ElementHash,
    ) -> Result<Option<ElementRecord>, StorageError> {
        self.backend.get_element(hash).await
    }

    pub async fn touch_element(
        &self,
        hash: &ElementHash,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.backend.touch_element(hash, now).await
    }

    /// Insert the edge, or increment its traversal count if it exists.
    pub async fn upsert_edge(&self, edge: &NavigationEdge) -> Result<WriteOutcome, StorageError> {
        let result = self.backend.upsert_edge(edge).await;
        self.settle_write(result, RecordKind::Edge, edge.trigger.as_str(), || {
            self.counters.edges_inserted.fetch_add(1, Ordering::Relaxed);
        })
    }

    pub async fn get_edge(&self, key: &EdgeKey) -> Result<Option<NavigationEdge>, StorageError> {
        self.backend.get_edge(key).await
    }

    pub async fn edges_from(&self, from: &ScreenHash) -> Result<Vec<NavigationEdge>, StorageError> {
        self.backend.edges_from(from).await
    }

    pub async fn edges_to(&self, to: &ScreenHash) -> Result<Vec<NavigationEdge>, StorageError> {
        self.backend.edges_to(to).await
    }

    pub async fn edges_for_app(&self, app_id: &str) -> Result<Vec<NavigationEdge>, StorageError> {
        self.backend.edges_for_app(app_id).await
    }

    pub async fn delete_application_data(&self, app_id: &str) -> Result<PurgeCounts, StorageError> {
        let counts = self.backend.delete_application_data(app_id).await?;
        warn!(
            app_id,
            sessions = counts.sessions,
            screens = counts.screens,
            elements = counts.elements,
            edges = counts.edges,
            "Deleted application graph data"
        );
        Ok(counts)
    }

    fn settle_write(
        &self,
        result: Result<UpsertOutcome, StorageError>,
        kind: RecordKind,
        hash: &str,
        on_insert: impl FnOnce(),
    ) -> Result<WriteOutcome, StorageError> {
        match result {
            Ok(UpsertOutcome::Inserted) => {
                on_insert();
                Ok(WriteOutcome::Inserted)
            }
            Ok(UpsertOutcome::Updated) => {
                self.counters.updates.fetch_add(1, Ordering::Relaxed);
                Ok(WriteOutcome::Updated)
            }
            Err(StorageError::MissingParent {
                kind: parent,
                hash: parent_hash,
            }) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    %kind,
                    hash,
                    %parent,
                    parent_hash = %parent_hash,
                    "Rejected write referencing a missing parent"
                );
                Ok(WriteOutcome::Rejected)
            }
            Err(e) => Err(e),
        }
    }
}
