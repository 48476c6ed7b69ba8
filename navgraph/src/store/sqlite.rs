use super::{GraphStorage, PurgeCounts, UpsertOutcome};
use crate::element::{Bounds, Capabilities};
use crate::errors::{RecordKind, StorageError};
use crate::expandable::{ExpansionClassification, ExpansionKind};
use crate::fingerprint::{ElementHash, ScreenHash};
use crate::models::{
    EdgeKey, ElementRecord, ExplorationSession, NavigationEdge, Provenance, ScreenState,
    SessionStatus,
};
use crate::pathfinding::ScreenType;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{error, info};

const CURRENT_SCHEMA_VERSION: i32 = 2;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct WorkerHandle {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to graph DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join graph DB thread: {join_err:?}");
            }
        }
    }
}

/// SQLite-backed graph storage.
///
/// The connection lives on a dedicated thread; async callers ship closures
/// to it and await the reply, so no blocking I/O runs on the runtime.
#[derive(Clone)]
pub struct SqliteGraphStorage {
    inner: Arc<WorkerHandle>,
    path: Arc<PathBuf>,
}

impl SqliteGraphStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), StorageError>>();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("navgraph-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(StorageError::Unavailable(format!(
                            "failed to open SQLite database: {err}"
                        ))));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result = run_migrations(&mut conn);
                if ready_tx.send(init_result).is_err() {
                    error!("Graph DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Graph database thread shutting down");
            })
            .map_err(|e| {
                StorageError::Unavailable(format!("failed to spawn database worker thread: {e}"))
            })?;

        ready_rx.recv().map_err(|_| {
            StorageError::Unavailable("database worker exited before signaling readiness".into())
        })??;

        info!(path = %db_path.display(), "Graph database initialized");

        Ok(Self {
            inner: Arc::new(WorkerHandle {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Graph DB caller dropped before receiving result");
            }
        }));

        self.inner.sender.send(command).map_err(|err| {
            StorageError::Unavailable(format!("failed to send command to DB thread: {err}"))
        })?;

        reply_rx
            .await
            .map_err(|_| StorageError::Unavailable("database thread terminated unexpectedly".into()))?
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StorageError> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::Unavailable(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        version = next_version;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), StorageError> {
    match version {
        1 => {
            tx.execute_batch(include_str!("schemas/schema_v1.sql"))?;
            Ok(())
        }
        2 => {
            tx.execute_batch(include_str!("schemas/schema_v2.sql"))?;
            Ok(())
        }
        other => Err(StorageError::Backend(format!(
            "no migration defined for version {other}"
        ))),
    }
}

fn fmt_ts(value: &DateTime<Utc>) -> String {
    // Fixed precision keeps textual ordering equal to time ordering
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str, field: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Backend(format!("invalid {field} '{value}': {e}")))
}

fn to_i64(value: u64) -> Result<i64, StorageError> {
    i64::try_from(value)
        .map_err(|_| StorageError::Backend(format!("value {value} exceeds SQLite INTEGER range")))
}

fn to_u64(value: i64, field: &str) -> Result<u64, StorageError> {
    u64::try_from(value)
        .map_err(|_| StorageError::Backend(format!("{field} contains negative value {value}")))
}

fn parse_provenance(value: &str) -> Result<Provenance, StorageError> {
    Provenance::parse(value)
        .ok_or_else(|| StorageError::Backend(format!("unknown provenance {value}")))
}

fn row_to_session(row: &Row) -> Result<ExplorationSession, StorageError> {
    let status: String = row.get("status")?;
    Ok(ExplorationSession {
        id: row.get("id")?,
        app_id: row.get("app_id")?,
        started_at: parse_ts(&row.get::<_, String>("started_at")?, "started_at")?,
        ended_at: row
            .get::<_, Option<String>>("ended_at")?
            .map(|s| parse_ts(&s, "ended_at"))
            .transpose()?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| StorageError::Backend(format!("unknown session status {status}")))?,
        screens_explored: to_u64(row.get("screens_explored")?, "screens_explored")?,
        elements_discovered: to_u64(row.get("elements_discovered")?, "elements_discovered")?,
        edges_discovered: to_u64(row.get("edges_discovered")?, "edges_discovered")?,
        completeness: row.get("completeness")?,
        failure_reason: row.get("failure_reason")?,
        checkpoint: row
            .get::<_, Option<String>>("checkpoint")?
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
    })
}

fn checkpoint_json(session: &ExplorationSession) -> Result<Option<String>, StorageError> {
    Ok(session
        .checkpoint
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?)
}

fn row_to_screen(row: &Row) -> Result<ScreenState, StorageError> {
    let screen_type: String = row.get("screen_type")?;
    Ok(ScreenState {
        hash: ScreenHash::new(row.get::<_, String>("hash")?),
        app_id: row.get("app_id")?,
        surface_label: row.get("surface_label")?,
        screen_type: ScreenType::parse(&screen_type).unwrap_or(ScreenType::Unknown),
        element_count: to_u64(row.get("element_count")?, "element_count")? as usize,
        provenance: parse_provenance(&row.get::<_, String>("provenance")?)?,
        first_seen: parse_ts(&row.get::<_, String>("first_seen")?, "first_seen")?,
        last_seen: parse_ts(&row.get::<_, String>("last_seen")?, "last_seen")?,
        visit_count: to_u64(row.get("visit_count")?, "visit_count")?,
    })
}

fn row_to_element(row: &Row) -> Result<ElementRecord, StorageError> {
    let expansion = match row.get::<_, Option<String>>("expansion_kind")? {
        Some(kind) => Some(ExpansionClassification {
            is_expandable: row.get::<_, Option<bool>>("expandable")?.unwrap_or(false),
            kind: ExpansionKind::parse(&kind).unwrap_or(ExpansionKind::Unknown),
            confidence: row
                .get::<_, Option<f64>>("expansion_confidence")?
                .unwrap_or(0.0) as f32,
        }),
        None => None,
    };
    Ok(ElementRecord {
        hash: ElementHash::new(row.get::<_, String>("hash")?),
        screen_hash: ScreenHash::new(row.get::<_, String>("screen_hash")?),
        app_id: row.get("app_id")?,
        role: row.get("role")?,
        resource_id: row.get("resource_id")?,
        text: row.get("text")?,
        description: row.get("description")?,
        bounds: Bounds::new(
            row.get("bounds_left")?,
            row.get("bounds_top")?,
            row.get("bounds_right")?,
            row.get("bounds_bottom")?,
        ),
        capabilities: Capabilities {
            activatable: row.get("activatable")?,
            editable: row.get("editable")?,
            scrollable: row.get("scrollable")?,
            checkable: row.get("checkable")?,
        },
        provenance: parse_provenance(&row.get::<_, String>("provenance")?)?,
        expansion,
        first_seen: parse_ts(&row.get::<_, String>("first_seen")?, "first_seen")?,
        last_seen: parse_ts(&row.get::<_, String>("last_seen")?, "last_seen")?,
        seen_count: to_u64(row.get("seen_count")?, "seen_count")?,
    })
}

fn row_to_edge(row: &Row) -> Result<NavigationEdge, StorageError> {
    Ok(NavigationEdge {
        from: ScreenHash::new(row.get::<_, String>("from_hash")?),
        to: ScreenHash::new(row.get::<_, String>("to_hash")?),
        trigger: ElementHash::new(row.get::<_, String>("trigger_hash")?),
        app_id: row.get("app_id")?,
        session_id: row.get("session_id")?,
        traversal_count: to_u64(row.get("traversal_count")?, "traversal_count")?,
        first_observed: parse_ts(&row.get::<_, String>("first_observed")?, "first_observed")?,
        last_observed: parse_ts(&row.get::<_, String>("last_observed")?, "last_observed")?,
    })
}

fn screen_exists(conn: &Connection, hash: &str) -> Result<bool, StorageError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM screens WHERE hash = ?1)",
        params![hash],
        |row| row.get(0),
    )?)
}

fn query_edges(
    conn: &Connection,
    filter: &str,
    value: &str,
) -> Result<Vec<NavigationEdge>, StorageError> {
    let sql = format!(
        "SELECT from_hash, to_hash, trigger_hash, app_id, session_id, traversal_count,
                first_observed, last_observed
         FROM edges WHERE {filter} = ?1
         ORDER BY from_hash, to_hash, trigger_hash"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![value])?;
    let mut edges = Vec::new();
    while let Some(row) = rows.next()? {
        edges.push(row_to_edge(row)?);
    }
    Ok(edges)
}

const SESSION_COLUMNS: &str = "id, app_id, started_at, ended_at, status, screens_explored,
     elements_discovered, edges_discovered, completeness, failure_reason, checkpoint";

const SCREEN_COLUMNS: &str = "hash, app_id, surface_label, screen_type, element_count,
     provenance, first_seen, last_seen, visit_count";

const ELEMENT_COLUMNS: &str = "hash, screen_hash, app_id, role, resource_id, text, description,
     bounds_left, bounds_top, bounds_right, bounds_bottom, activatable, editable, scrollable,
     checkable, provenance, expandable, expansion_kind, expansion_confidence, first_seen,
     last_seen, seen_count";

#[async_trait::async_trait]
impl GraphStorage for SqliteGraphStorage {
    async fn insert_session(&self, session: &ExplorationSession) -> Result<(), StorageError> {
        let record = session.clone();
        let checkpoint = checkpoint_json(session)?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, app_id, started_at, ended_at, status, screens_explored,
                    elements_discovered, edges_discovered, completeness, failure_reason, checkpoint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.app_id,
                    fmt_ts(&record.started_at),
                    record.ended_at.as_ref().map(fmt_ts),
                    record.status.as_str(),
                    to_i64(record.screens_explored)?,
                    to_i64(record.elements_discovered)?,
                    to_i64(record.edges_discovered)?,
                    record.completeness,
                    record.failure_reason,
                    checkpoint,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_session(&self, session: &ExplorationSession) -> Result<(), StorageError> {
        let record = session.clone();
        let checkpoint = checkpoint_json(session)?;
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions
                 SET ended_at = ?1,
                     status = ?2,
                     screens_explored = ?3,
                     elements_discovered = ?4,
                     edges_discovered = ?5,
                     completeness = ?6,
                     failure_reason = ?7,
                     checkpoint = ?8
                 WHERE id = ?9",
                params![
                    record.ended_at.as_ref().map(fmt_ts),
                    record.status.as_str(),
                    to_i64(record.screens_explored)?,
                    to_i64(record.elements_discovered)?,
                    to_i64(record.edges_discovered)?,
                    record.completeness,
                    record.failure_reason,
                    checkpoint,
                    record.id,
                ],
            )?;
            if changed == 0 {
                return Err(StorageError::MissingParent {
                    kind: RecordKind::Session,
                    hash: record.id,
                });
            }
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: &str) -> Result<Option<ExplorationSession>, StorageError> {
        let id = id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn sessions_for_app(
        &self,
        app_id: &str,
    ) -> Result<Vec<ExplorationSession>, StorageError> {
        let app_id = app_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE app_id = ?1 ORDER BY started_at, id"
            ))?;
            let mut rows = stmt.query(params![app_id])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    async fn upsert_screen(&self, screen: &ScreenState) -> Result<UpsertOutcome, StorageError> {
        let record = screen.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO screens (hash, app_id, surface_label, screen_type,
                    element_count, provenance, first_seen, last_seen, visit_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.hash.as_str(),
                    record.app_id,
                    record.surface_label,
                    record.screen_type.as_str(),
                    to_i64(record.element_count as u64)?,
                    record.provenance.as_str(),
                    fmt_ts(&record.first_seen),
                    fmt_ts(&record.last_seen),
                    to_i64(record.visit_count)?,
                ],
            )?;
            let outcome = if inserted == 1 {
                UpsertOutcome::Inserted
            } else {
                tx.execute(
                    "UPDATE screens
                     SET visit_count = visit_count + 1,
                         last_seen = MAX(last_seen, ?2)
                     WHERE hash = ?1",
                    params![record.hash.as_str(), fmt_ts(&record.last_seen)],
                )?;
                UpsertOutcome::Updated
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn get_screen(&self, hash: &ScreenHash) -> Result<Option<ScreenState>, StorageError> {
        let hash = hash.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCREEN_COLUMNS} FROM screens WHERE hash = ?1"
            ))?;
            let mut rows = stmt.query(params![hash])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_screen(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn screens_for_app(&self, app_id: &str) -> Result<Vec<ScreenState>, StorageError> {
        let app_id = app_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCREEN_COLUMNS} FROM screens WHERE app_id = ?1 ORDER BY first_seen, hash"
            ))?;
            let mut rows = stmt.query(params![app_id])?;
            let mut screens = Vec::new();
            while let Some(row) = rows.next()? {
                screens.push(row_to_screen(row)?);
            }
            Ok(screens)
        })
        .await
    }

    async fn upsert_element(
        &self,
        element: &ElementRecord,
    ) -> Result<UpsertOutcome, StorageError> {
        let record = element.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            if !screen_exists(&tx, record.screen_hash.as_str())? {
                return Err(StorageError::MissingParent {
                    kind: RecordKind::Screen,
                    hash: record.screen_hash.to_string(),
                });
            }
            let expansion = record.expansion;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO elements (hash, screen_hash, app_id, role, resource_id,
                    text, description, bounds_left, bounds_top, bounds_right, bounds_bottom,
                    activatable, editable, scrollable, checkable, provenance, expandable,
                    expansion_kind, expansion_confidence, first_seen, last_seen, seen_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22)",
                params![
                    record.hash.as_str(),
                    record.screen_hash.as_str(),
                    record.app_id,
                    record.role,
                    record.resource_id,
                    record.text,
                    record.description,
                    record.bounds.left,
                    record.bounds.top,
                    record.bounds.right,
                    record.bounds.bottom,
                    record.capabilities.activatable,
                    record.capabilities.editable,
                    record.capabilities.scrollable,
                    record.capabilities.checkable,
                    record.provenance.as_str(),
                    expansion.map(|e| e.is_expandable),
                    expansion.map(|e| e.kind.as_str()),
                    expansion.map(|e| e.confidence as f64),
                    fmt_ts(&record.first_seen),
                    fmt_ts(&record.last_seen),
                    to_i64(record.seen_count)?,
                ],
            )?;
            let outcome = if inserted == 1 {
                UpsertOutcome::Inserted
            } else {
                tx.execute(
                    "UPDATE elements
                     SET seen_count = seen_count + 1,
                         last_seen = MAX(last_seen, ?2),
                         expandable = COALESCE(expandable, ?3),
                         expansion_kind = COALESCE(expansion_kind, ?4),
                         expansion_confidence = COALESCE(expansion_confidence, ?5)
                     WHERE hash = ?1",
                    params![
                        record.hash.as_str(),
                        fmt_ts(&record.last_seen),
                        expansion.map(|e| e.is_expandable),
                        expansion.map(|e| e.kind.as_str()),
                        expansion.map(|e| e.confidence as f64),
                    ],
                )?;
                UpsertOutcome::Updated
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn get_element(
        &self,
        hash: &ElementHash,
    ) -> Result<Option<ElementRecord>, StorageError> {
        let hash = hash.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ELEMENT_COLUMNS} FROM elements WHERE hash = ?1"
            ))?;
            let mut rows = stmt.query(params![hash])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_element(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn touch_element(
        &self,
        hash: &ElementHash,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let hash = hash.to_string();
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE elements
                 SET seen_count = seen_count + 1,
                     last_seen = MAX(last_seen, ?2)
                 WHERE hash = ?1",
                params![hash, fmt_ts(&now)],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn upsert_edge(&self, edge: &NavigationEdge) -> Result<UpsertOutcome, StorageError> {
        let record = edge.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for endpoint in [&record.from, &record.to] {
                if !screen_exists(&tx, endpoint.as_str())? {
                    return Err(StorageError::MissingParent {
                        kind: RecordKind::Screen,
                        hash: endpoint.to_string(),
                    });
                }
            }
            let existed: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM edges
                    WHERE from_hash = ?1 AND to_hash = ?2 AND trigger_hash = ?3)",
                params![
                    record.from.as_str(),
                    record.to.as_str(),
                    record.trigger.as_str()
                ],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO edges (from_hash, to_hash, trigger_hash, app_id, session_id,
                    traversal_count, first_observed, last_observed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(from_hash, to_hash, trigger_hash) DO UPDATE SET
                    traversal_count = traversal_count + 1,
                    last_observed = MAX(last_observed, excluded.last_observed)",
                params![
                    record.from.as_str(),
                    record.to.as_str(),
                    record.trigger.as_str(),
                    record.app_id,
                    record.session_id,
                    to_i64(record.traversal_count)?,
                    fmt_ts(&record.first_observed),
                    fmt_ts(&record.last_observed),
                ],
            )?;
            tx.commit()?;
            Ok(if existed {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            })
        })
        .await
    }

    async fn get_edge(&self, key: &EdgeKey) -> Result<Option<NavigationEdge>, StorageError> {
        let key = key.clone();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT from_hash, to_hash, trigger_hash, app_id, session_id, traversal_count,
                        first_observed, last_observed
                 FROM edges WHERE from_hash = ?1 AND to_hash = ?2 AND trigger_hash = ?3",
            )?;
            let edge = stmt
                .query_row(
                    params![key.from.as_str(), key.to.as_str(), key.trigger.as_str()],
                    |row| Ok(row_to_edge(row)),
                )
                .optional()?;
            edge.transpose()
        })
        .await
    }

    async fn edges_from(&self, from: &ScreenHash) -> Result<Vec<NavigationEdge>, StorageError> {
        let from = from.to_string();
        self.execute(move |conn| query_edges(conn, "from_hash", &from))
            .await
    }

    async fn edges_to(&self, to: &ScreenHash) -> Result<Vec<NavigationEdge>, StorageError> {
        let to = to.to_string();
        self.execute(move |conn| query_edges(conn, "to_hash", &to)).await
    }

    async fn edges_for_app(&self, app_id: &str) -> Result<Vec<NavigationEdge>, StorageError> {
        let app_id = app_id.to_string();
        self.execute(move |conn| query_edges(conn, "app_id", &app_id))
            .await
    }

    async fn delete_application_data(&self, app_id: &str) -> Result<PurgeCounts, StorageError> {
        let app_id = app_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let count = |table: &str| -> Result<u64, StorageError> {
                let n: i64 = tx.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE app_id = ?1"),
                    params![app_id],
                    |row| row.get(0),
                )?;
                to_u64(n, table)
            };
            let counts = PurgeCounts {
                sessions: count("sessions")?,
                screens: count("screens")?,
                elements: count("elements")?,
                edges: count("edges")?,
            };
            // Elements and edges hanging off the screens go with them
            tx.execute("DELETE FROM screens WHERE app_id = ?1", params![app_id])?;
            tx.execute("DELETE FROM elements WHERE app_id = ?1", params![app_id])?;
            tx.execute("DELETE FROM edges WHERE app_id = ?1", params![app_id])?;
            tx.execute("DELETE FROM sessions WHERE app_id = ?1", params![app_id])?;
            tx.commit()?;
            Ok(counts)
        })
        .await
    }
}
