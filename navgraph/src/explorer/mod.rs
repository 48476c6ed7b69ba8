//! Depth-first exploration of a live application UI.
//!
//! The engine walks the target application one screen at a time: it
//! activates every actionable element it has not tried yet, records the
//! screens and transitions it observes, descends into new screens and
//! navigates back when a screen is exhausted. All UI actions happen on the
//! caller's task, one at a time; each is followed by an explicit settle
//! wait with a timeout.

use crate::dedup::{CacheStats, CacheStatsSource, ElementDeduplicationCache, Residency};
use crate::element::UIElement;
use crate::errors::{AutomationError, ExplorerError, StorageError};
use crate::expandable::{ExpandableControlClassifier, ExpansionKind};
use crate::fingerprint::{ElementHash, ScreenHash, StateFingerprinter};
use crate::launcher::LauncherDetector;
use crate::models::{
    ElementRecord, ExplorationSession, NavigationEdge, Provenance, ScreenState, SessionCheckpoint,
    SessionStatus, SessionSummary,
};
use crate::platforms::{AccessibilityEngine, ScrollDirection};
use crate::store::{NavigationGraphStore, WriteOutcome};
use crate::tree::{reading_order, UiTree};
use crate::windows::{WindowClassifier, WindowSnapshot};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

mod config;
mod observer;
mod settle;
mod tracker;

pub use config::ExplorationConfig;
pub use observer::{ObservedScreen, PassiveObserver};
pub use settle::{SettleOutcome, SettleWaiter};
pub use tracker::{ClickTracker, Frame};

/// Where the exploration state machine currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExplorerState {
    #[default]
    Idle,
    ExploringScreen,
    ClassifyingElement,
    HandlingExpansion,
    Clicking,
    WaitingForSettle,
    Recursing,
    Backtracking,
    Complete,
    Failed,
    Paused,
}

/// Live snapshot of an exploration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationProgress {
    pub state: ExplorerState,
    pub session_id: Option<String>,
    pub app_id: Option<String>,
    pub depth: usize,
    pub screens_discovered: usize,
    pub screens_exhausted: usize,
    pub elements_discovered: u64,
    pub edges_discovered: u64,
}

/// Implemented by components that report exploration progress to observers.
pub trait ExplorationProgressSource: Send + Sync {
    fn progress(&self) -> ExplorationProgress;
}

/// Registry guaranteeing one active exploration per application.
#[derive(Debug, Clone, Default)]
pub struct ExplorationLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl ExplorationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, app_id: &str) -> Result<ExplorationGuard, ExplorerError> {
        let mut active = lock(&self.active);
        if !active.insert(app_id.to_string()) {
            return Err(ExplorerError::AlreadyExploring(app_id.to_string()));
        }
        Ok(ExplorationGuard {
            locks: self.clone(),
            app_id: app_id.to_string(),
        })
    }

    pub fn is_exploring(&self, app_id: &str) -> bool {
        lock(&self.active).contains(app_id)
    }
}

/// Releases the application's exploration slot on drop.
#[derive(Debug)]
pub struct ExplorationGuard {
    locks: ExplorationLocks,
    app_id: String,
}

impl Drop for ExplorationGuard {
    fn drop(&mut self) {
        lock(&self.locks.active).remove(&self.app_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A fingerprinted view of the current main window.
#[derive(Debug, Clone)]
struct Observation {
    app_id: String,
    surface_label: String,
    /// Visible elements in reading order
    elements: Vec<UIElement>,
    /// Element hashes, parallel to `elements`
    hashes: Vec<ElementHash>,
    hash: ScreenHash,
}

impl Observation {
    fn hash_set(&self) -> HashSet<&ElementHash> {
        self.hashes.iter().collect()
    }
}

enum UiAction<'a> {
    Activate(&'a UIElement),
    Scroll(&'a UIElement),
    Back,
    Launch(&'a str),
}

/// Why the walk stopped.
#[derive(Debug)]
enum Halt {
    Finished,
    Limit(&'static str),
    Cancelled,
    Failed(String),
}

enum Flow {
    Continue,
    Halt(Halt),
}

struct Run {
    session: ExplorationSession,
    cancel: CancellationToken,
    windows: WindowClassifier,
    frames: Vec<Frame>,
    tracker: ClickTracker,
    /// Screens reached during this session
    visited: HashSet<ScreenHash>,
    /// Screens whose candidates were all tried
    exhausted: HashSet<ScreenHash>,
    /// Variant hash -> canonical screen hash
    variants: HashMap<ScreenHash, ScreenHash>,
    /// Screen hashes whose elements were already checked this session
    registered: HashSet<ScreenHash>,
    started: Instant,
}

impl Run {
    fn app_id(&self) -> &str {
        &self.session.app_id
    }

    fn canonical(&self, hash: &ScreenHash) -> ScreenHash {
        self.variants.get(hash).cloned().unwrap_or_else(|| hash.clone())
    }

    fn restore(&mut self, saved: &SessionCheckpoint) {
        self.tracker = ClickTracker::restore(&saved.clicked);
        self.visited = saved.visited.iter().cloned().collect();
        self.exhausted = saved.exhausted.iter().cloned().collect();
        self.variants = saved
            .variants
            .iter()
            .map(|(variant, canonical)| (variant.clone(), canonical.clone()))
            .collect();
        self.registered = saved.registered.iter().cloned().collect();
        self.frames = saved.frames.iter().map(Frame::restore).collect();
    }

    fn checkpoint(&self) -> SessionCheckpoint {
        SessionCheckpoint {
            clicked: self.tracker.snapshot(),
            visited: self.visited.iter().cloned().collect(),
            exhausted: self.exhausted.iter().cloned().collect(),
            variants: self
                .variants
                .iter()
                .map(|(variant, canonical)| (variant.clone(), canonical.clone()))
                .collect(),
            registered: self.registered.iter().cloned().collect(),
            frames: self.frames.iter().map(Frame::checkpoint).collect(),
        }
    }

    fn completeness(&self) -> f64 {
        if self.visited.is_empty() {
            0.0
        } else {
            self.exhausted.len() as f64 / self.visited.len() as f64
        }
    }
}

/// Drives one application's UI and records what it finds.
pub struct ExplorationEngine {
    engine: Arc<dyn AccessibilityEngine>,
    store: Arc<NavigationGraphStore>,
    launchers: Arc<LauncherDetector>,
    dedup: Arc<ElementDeduplicationCache>,
    locks: ExplorationLocks,
    config: ExplorationConfig,
    fingerprinter: StateFingerprinter,
    classifier: ExpandableControlClassifier,
    settle: SettleWaiter,
    progress: Mutex<ExplorationProgress>,
}

impl ExplorationEngine {
    pub fn new(
        engine: Arc<dyn AccessibilityEngine>,
        store: Arc<NavigationGraphStore>,
        launchers: Arc<LauncherDetector>,
        config: ExplorationConfig,
    ) -> Result<Self, ExplorerError> {
        config.validate()?;
        let dedup = Arc::new(ElementDeduplicationCache::new(store.clone(), config.cache));
        Ok(Self {
            engine,
            store,
            launchers,
            dedup,
            locks: ExplorationLocks::new(),
            fingerprinter: StateFingerprinter::new(config.fingerprint),
            classifier: ExpandableControlClassifier::new(),
            settle: SettleWaiter::new(config.per_element_timeout(), config.settle_quiet()),
            config,
            progress: Mutex::new(ExplorationProgress::default()),
        })
    }

    /// Share a lock registry with other engines driving the same device.
    pub fn with_locks(mut self, locks: ExplorationLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &ExplorationLocks {
        &self.locks
    }

    pub fn dedup(&self) -> &Arc<ElementDeduplicationCache> {
        &self.dedup
    }

    pub fn config(&self) -> &ExplorationConfig {
        &self.config
    }

    pub fn fingerprinter(&self) -> StateFingerprinter {
        self.fingerprinter
    }

    /// Explore `app_id` from its launch screen in a new session.
    ///
    /// Returns the finalized session summary. Only fatal storage failures
    /// (and lock or config problems) surface as errors; everything else
    /// ends up in the session status.
    #[instrument(skip(self, cancel))]
    pub async fn explore(
        &self,
        app_id: &str,
        cancel: CancellationToken,
    ) -> Result<SessionSummary, ExplorerError> {
        let _guard = self.locks.try_acquire(app_id)?;
        let session = ExplorationSession::start(app_id, Utc::now());
        self.store.insert_session(&session).await?;
        info!(session_id = %session.id, app_id, "Exploration session started");
        self.run(session, None, cancel).await
    }

    /// Continue a session that was paused by cancellation.
    ///
    /// The walk picks up from the saved checkpoint: the app is relaunched,
    /// the saved trigger path is replayed down to the screen that was being
    /// explored, and elements already tried are not activated again.
    #[instrument(skip(self, cancel))]
    pub async fn resume(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<SessionSummary, ExplorerError> {
        let mut session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| ExplorerError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Paused {
            return Err(ExplorerError::NotResumable(session_id.to_string()));
        }

        let _guard = self.locks.try_acquire(&session.app_id)?;
        session.status = SessionStatus::Running;
        session.ended_at = None;
        session.completeness = None;
        session.failure_reason = None;
        let checkpoint = session.checkpoint.take();
        self.store.update_session(&session).await?;
        info!(
            session_id,
            app_id = %session.app_id,
            frames = checkpoint.as_ref().map_or(0, |c| c.frames.len()),
            "Exploration session resumed"
        );
        self.run(session, checkpoint, cancel).await
    }

    async fn run(
        &self,
        session: ExplorationSession,
        checkpoint: Option<SessionCheckpoint>,
        cancel: CancellationToken,
    ) -> Result<SessionSummary, ExplorerError> {
        let windows = WindowClassifier::new(
            self.engine.clone(),
            self.launchers.clone(),
            session.app_id.clone(),
        );
        let mut run = Run {
            session,
            cancel,
            windows,
            frames: Vec::new(),
            tracker: ClickTracker::default(),
            visited: HashSet::new(),
            exhausted: HashSet::new(),
            variants: HashMap::new(),
            registered: HashSet::new(),
            started: Instant::now(),
        };
        if let Some(saved) = &checkpoint {
            run.restore(saved);
        }
        {
            let mut progress = lock(&self.progress);
            *progress = ExplorationProgress {
                session_id: Some(run.session.id.clone()),
                app_id: Some(run.session.app_id.clone()),
                ..Default::default()
            };
        }

        let halt = match self.drive(&mut run).await {
            Ok(halt) => halt,
            Err(e) => {
                error!(session_id = %run.session.id, error = %e, "Exploration aborted");
                self.set_state(ExplorerState::Failed);
                return Err(e);
            }
        };
        self.finalize(run, halt).await
    }

    async fn drive(&self, run: &mut Run) -> Result<Halt, ExplorerError> {
        let app_id = run.app_id().to_string();
        self.set_state(ExplorerState::ExploringScreen);

        match self.perform(UiAction::Launch(&app_id), &run.cancel).await {
            Ok(SettleOutcome::Cancelled) => return Ok(Halt::Cancelled),
            Ok(_) => {}
            Err(e) => return Ok(Halt::Failed(format!("failed to launch {app_id}: {e}"))),
        }

        let root = match self.observe().await {
            Ok(obs) if obs.app_id == app_id => obs,
            Ok(obs) => {
                return Ok(Halt::Failed(format!(
                    "{} is in the foreground after launching {app_id}",
                    obs.app_id
                )))
            }
            Err(e) => return Ok(Halt::Failed(format!("cannot read launch screen: {e}"))),
        };
        if let Some(top) = run.frames.len().checked_sub(1) {
            // Resumed: walk back down to where the session was paused
            if let Flow::Halt(halt) = self.ensure_on(run, top).await? {
                return Ok(halt);
            }
            run.frames[top].resume();
        } else {
            self.record_screen(run, &root, &root.hash).await?;
            run.visited.insert(root.hash.clone());
            run.frames
                .push(Frame::new(root.hash.clone(), root.hashes.clone(), 0, None));
        }

        loop {
            self.publish(run);

            if run.cancel.is_cancelled() {
                return Ok(Halt::Cancelled);
            }
            if run.started.elapsed() >= self.config.session_timeout() {
                warn!(session_id = %run.session.id, "Session timeout reached");
                return Ok(Halt::Limit("session timeout"));
            }
            let Some(top) = run.frames.len().checked_sub(1) else {
                return Ok(Halt::Finished);
            };

            if run.frames[top].time_on_screen() >= self.config.per_screen_timeout() {
                warn!(screen_hash = %run.frames[top].screen, "Per-screen timeout; leaving screen");
                run.frames.pop();
                if let Flow::Halt(halt) = self.backtrack(run).await? {
                    return Ok(halt);
                }
                continue;
            }

            self.set_state(ExplorerState::ExploringScreen);
            let obs = match self.observe().await {
                Ok(obs) if obs.app_id == app_id && run.frames[top].accepts(&obs.hash) => obs,
                Ok(obs) => {
                    warn!(
                        expected = %run.frames[top].screen,
                        actual = %obs.hash,
                        foreground = %obs.app_id,
                        "Not on the expected screen"
                    );
                    if let Flow::Halt(halt) = self.ensure_on(run, top).await? {
                        return Ok(halt);
                    }
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read the current screen");
                    if let Flow::Halt(halt) = self.ensure_on(run, top).await? {
                        return Ok(halt);
                    }
                    continue;
                }
            };

            let canonical = run.frames[top].screen.clone();
            let candidate = obs
                .elements
                .iter()
                .zip(&obs.hashes)
                .find(|(e, h)| e.is_actionable() && !run.tracker.is_clicked(&canonical, h))
                .map(|(e, h)| (e.clone(), h.clone()));

            if let Some((element, hash)) = candidate {
                if let Flow::Halt(halt) = self.explore_element(run, top, &obs, &element, &hash).await? {
                    return Ok(halt);
                }
                continue;
            }

            let frame = &run.frames[top];
            if !frame.scroll_exhausted && frame.scrolls < self.config.max_scrolls_per_screen {
                let list = obs
                    .elements
                    .iter()
                    .find(|e| e.attributes.scrollable && e.attributes.enabled)
                    .cloned();
                if let Some(list) = list {
                    self.scroll_screen(run, top, &list).await?;
                    continue;
                }
            }

            info!(
                screen_hash = %canonical,
                clicked = run.tracker.clicked_on(&canonical),
                depth = run.frames[top].depth,
                "Screen exhausted"
            );
            run.exhausted.insert(canonical);
            run.frames.pop();
            if let Flow::Halt(halt) = self.backtrack(run).await? {
                return Ok(halt);
            }
        }
    }

    /// Try one element on the top screen and deal with whatever happens.
    async fn explore_element(
        &self,
        run: &mut Run,
        top: usize,
        before: &Observation,
        element: &UIElement,
        hash: &ElementHash,
    ) -> Result<Flow, ExplorerError> {
        let app_id = run.app_id().to_string();
        let canonical = run.frames[top].screen.clone();
        run.tracker.mark(&canonical, hash);

        self.set_state(ExplorerState::ClassifyingElement);
        let classification = self.classifier.classify(element);
        let expandable = classification.is_expandable
            && classification.kind != ExpansionKind::Navigation
            && classification.confidence >= self.config.expansion_confidence_threshold;
        debug!(
            element_hash = %hash,
            element = %element.display_name(),
            kind = classification.kind.as_str(),
            confidence = classification.confidence,
            expandable,
            "Trying element"
        );

        let windows_before = self.snapshot_windows(run).await;
        let outcome = if expandable {
            self.set_state(ExplorerState::HandlingExpansion);
            self.activate_expandable(element, &run.cancel).await
        } else {
            self.set_state(ExplorerState::Clicking);
            self.perform(UiAction::Activate(element), &run.cancel).await
        };

        match outcome {
            Ok(SettleOutcome::Changed) => {}
            Ok(SettleOutcome::Unchanged) => {
                debug!(element_hash = %hash, "Activation changed nothing; element exhausted");
                return Ok(Flow::Continue);
            }
            Ok(SettleOutcome::Cancelled) => {
                // Retried on resume
                run.tracker.unmark(&canonical, hash);
                return Ok(Flow::Halt(Halt::Cancelled));
            }
            Err(e) => {
                info!(element_hash = %hash, error = %e, "Activation failed; element exhausted");
                return Ok(Flow::Continue);
            }
        }

        let windows_after = self.snapshot_windows(run).await;
        if let Some(after) = &windows_after {
            if after.has_left(&app_id) {
                warn!(
                    element_hash = %hash,
                    foreground = after.foreground_app().unwrap_or("none"),
                    "Activation left the target application"
                );
                return self.ensure_on(run, top).await;
            }

            if let Some(before_windows) = &windows_before {
                let surfaces: Vec<u32> = after
                    .new_transient_surfaces(before_windows)
                    .iter()
                    .map(|w| w.window.window_id)
                    .collect();
                if !surfaces.is_empty() {
                    self.handle_overlay(run, top, &surfaces).await?;
                    return self.ensure_on(run, top).await;
                }
            }
        }

        let after = match self.observe().await {
            Ok(obs) => obs,
            Err(e) => {
                warn!(error = %e, "Failed to read screen after activation");
                return self.ensure_on(run, top).await;
            }
        };
        if after.app_id != app_id {
            warn!(foreground = %after.app_id, "Activation left the target application");
            return self.ensure_on(run, top).await;
        }
        if run.frames[top].accepts(&after.hash) {
            debug!(element_hash = %hash, "Screen unchanged after activation");
            return Ok(Flow::Continue);
        }

        if grew_in_place(before, &after) {
            let new_elements = self.absorb_variant(run, top, &after);
            info!(
                screen_hash = %canonical,
                new_elements = new_elements.len(),
                "Screen changed in place"
            );
            self.register_elements(run, &canonical, &after, Some(&new_elements), Residency::Screen)
                .await?;
            return Ok(Flow::Continue);
        }

        self.record_transition(run, top, hash, &after).await
    }

    /// Register the contents of freshly opened menus or dialogs, then dismiss them.
    async fn handle_overlay(
        &self,
        run: &mut Run,
        top: usize,
        surfaces: &[u32],
    ) -> Result<(), ExplorerError> {
        let owner = run.frames[top].screen.clone();
        for window_id in surfaces {
            match self.engine.window_tree(*window_id).await {
                Ok(tree) => {
                    let registered = self.register_surface(run, &owner, &tree).await?;
                    info!(
                        window_id,
                        surface = %tree.surface_label,
                        registered,
                        "Registered overlay elements"
                    );
                }
                Err(e) => warn!(window_id, error = %e, "Failed to read overlay"),
            }
        }

        if let Err(e) = self.perform(UiAction::Back, &run.cancel).await {
            warn!(error = %e, "Failed to dismiss overlay");
        }
        Ok(())
    }

    async fn scroll_screen(
        &self,
        run: &mut Run,
        top: usize,
        list: &UIElement,
    ) -> Result<(), ExplorerError> {
        let app_id = run.app_id().to_string();
        run.frames[top].scrolls += 1;

        match self.perform(UiAction::Scroll(list), &run.cancel).await {
            Ok(SettleOutcome::Changed) => {}
            Ok(SettleOutcome::Cancelled) => return Ok(()),
            Ok(SettleOutcome::Unchanged) => {
                debug!("Scroll revealed nothing");
                run.frames[top].scroll_exhausted = true;
                return Ok(());
            }
            Err(e) => {
                debug!(error = %e, "Scroll failed");
                run.frames[top].scroll_exhausted = true;
                return Ok(());
            }
        }

        let after = match self.observe().await {
            Ok(obs) if obs.app_id == app_id => obs,
            _ => return Ok(()),
        };
        let canonical = run.frames[top].screen.clone();
        let new_elements = self.absorb_variant(run, top, &after);
        let pending = after
            .elements
            .iter()
            .zip(&after.hashes)
            .any(|(e, h)| e.is_actionable() && !run.tracker.is_clicked(&canonical, h));

        if new_elements.is_empty() && !pending {
            debug!(scrolls = run.frames[top].scrolls, "Scrolling exhausted");
            run.frames[top].scroll_exhausted = true;
            return Ok(());
        }

        debug!(new_elements = new_elements.len(), "Scroll revealed content");
        self.register_elements(run, &canonical, &after, Some(&new_elements), Residency::Screen)
            .await
    }

    /// Record a transition from the top screen to `after` and descend if new.
    async fn record_transition(
        &self,
        run: &mut Run,
        top: usize,
        trigger: &ElementHash,
        after: &Observation,
    ) -> Result<Flow, ExplorerError> {
        let from = run.frames[top].screen.clone();
        let to = run.canonical(&after.hash);
        let is_new = !run.visited.contains(&to);

        if is_new && run.visited.len() >= self.config.max_screens {
            info!(max_screens = self.config.max_screens, "Screen limit reached");
            return Ok(Flow::Halt(Halt::Limit("screen limit")));
        }

        // Referential order: screen, its elements, then the edge
        self.record_screen(run, after, &to).await?;

        let edge = NavigationEdge::new(
            from.clone(),
            to.clone(),
            trigger.clone(),
            run.app_id(),
            run.session.id.clone(),
            Utc::now(),
        );
        match self.tolerate(self.store.upsert_edge(&edge).await)? {
            Some(WriteOutcome::Inserted) => {
                run.session.edges_discovered += 1;
                info!(from = %from, to = %to, trigger = %trigger, "New edge");
            }
            Some(WriteOutcome::Updated) => {
                debug!(from = %from, to = %to, trigger = %trigger, "Edge traversed again");
            }
            Some(WriteOutcome::Rejected) | None => {}
        }

        if !is_new {
            debug!(screen_hash = %to, "Screen already visited; not descending");
            return self.ensure_on(run, top).await;
        }

        run.visited.insert(to.clone());
        let depth = run.frames[top].depth + 1;
        if depth > self.config.max_depth {
            info!(screen_hash = %to, depth, "Depth limit reached; not descending");
            return self.ensure_on(run, top).await;
        }

        self.set_state(ExplorerState::Recursing);
        debug!(screen_hash = %to, depth, "Descending");
        run.frames[top].suspend();
        run.frames
            .push(Frame::new(to, after.hashes.clone(), depth, Some(trigger.clone())));
        Ok(Flow::Continue)
    }

    async fn backtrack(&self, run: &mut Run) -> Result<Flow, ExplorerError> {
        self.set_state(ExplorerState::Backtracking);
        match run.frames.len().checked_sub(1) {
            Some(parent) => {
                run.frames[parent].resume();
                self.ensure_on(run, parent).await
            }
            None => Ok(Flow::Continue),
        }
    }

    async fn ensure_on(&self, run: &mut Run, idx: usize) -> Result<Flow, ExplorerError> {
        if self.return_to(run, idx).await {
            Ok(Flow::Continue)
        } else if run.cancel.is_cancelled() {
            Ok(Flow::Halt(Halt::Cancelled))
        } else {
            Ok(Flow::Halt(Halt::Failed(format!(
                "could not navigate back to screen {}",
                run.frames[idx].screen
            ))))
        }
    }

    /// Bring the UI back to `frames[idx]`: repeated back navigation first,
    /// then relaunch and replay the triggers along the frame stack.
    async fn return_to(&self, run: &mut Run, idx: usize) -> bool {
        let app_id = run.app_id().to_string();

        for attempt in 0..=self.config.max_back_attempts {
            if attempt > 0 {
                if let Err(e) = self.perform(UiAction::Back, &run.cancel).await {
                    warn!(attempt, error = %e, "Back navigation failed");
                    break;
                }
            }

            let obs = match self.observe().await {
                Ok(obs) => obs,
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to read screen during recovery");
                    continue;
                }
            };
            if obs.app_id != app_id {
                continue;
            }
            if run.frames[idx].accepts(&obs.hash) {
                if attempt > 1 {
                    info!(attempt, "Recovered expected screen");
                }
                return true;
            }
            // Overshot to an ancestor: walk forward from there instead
            if let Some(ancestor) = run.frames[..idx].iter().rposition(|f| f.accepts(&obs.hash)) {
                warn!(ancestor, target = idx, "Backtracked past the expected screen; replaying");
                return self.replay(run, ancestor, idx).await;
            }
            if attempt > 0 {
                warn!(
                    attempt,
                    expected = %run.frames[idx].screen,
                    actual = %obs.hash,
                    "Backtrack mismatch"
                );
            }
        }

        warn!(app_id = %app_id, "Back navigation did not restore the screen; relaunching");
        match self.perform(UiAction::Launch(&app_id), &run.cancel).await {
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Relaunch failed");
                return false;
            }
        }
        match self.observe().await {
            Ok(obs) if obs.app_id == app_id && run.frames[0].accepts(&obs.hash) => {
                self.replay(run, 0, idx).await
            }
            Ok(obs) => {
                warn!(actual = %obs.hash, "Relaunch did not land on the start screen");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to read screen after relaunch");
                false
            }
        }
    }

    /// Re-activate the recorded triggers from `frames[from]` down to `frames[to]`.
    async fn replay(&self, run: &mut Run, from: usize, to: usize) -> bool {
        for i in from + 1..=to {
            let Some(trigger) = run.frames[i].via.clone() else {
                return false;
            };
            // Never act on a stale view: re-read before every step
            let obs = match self.observe().await {
                Ok(obs) => obs,
                Err(_) => return false,
            };
            let Some(element) = obs
                .elements
                .iter()
                .zip(&obs.hashes)
                .find(|(_, h)| **h == trigger)
                .map(|(e, _)| e.clone())
            else {
                warn!(trigger = %trigger, "Replay trigger not visible");
                return false;
            };
            if let Err(e) = self.perform(UiAction::Activate(&element), &run.cancel).await {
                warn!(trigger = %trigger, error = %e, "Replay activation failed");
                return false;
            }
            match self.observe().await {
                Ok(obs) if run.frames[i].accepts(&obs.hash) => {}
                _ => {
                    warn!(step = i, "Replay diverged from the recorded path");
                    return false;
                }
            }
        }
        true
    }

    async fn finalize(&self, mut run: Run, halt: Halt) -> Result<SessionSummary, ExplorerError> {
        if matches!(halt, Halt::Cancelled) {
            self.recover_after_cancel(&run).await;
        }

        let completeness = run.completeness();
        let threshold = self.config.completeness_threshold;
        let (status, reason) = match halt {
            Halt::Cancelled => (SessionStatus::Paused, None),
            Halt::Failed(reason) => (SessionStatus::Failed, Some(reason)),
            Halt::Finished | Halt::Limit(_) if completeness >= threshold => {
                (SessionStatus::Completed, None)
            }
            Halt::Finished => (
                SessionStatus::Failed,
                Some(format!(
                    "completeness {completeness:.2} below threshold {threshold:.2}"
                )),
            ),
            Halt::Limit(limit) => (
                SessionStatus::Failed,
                Some(format!(
                    "completeness {completeness:.2} below threshold {threshold:.2} ({limit})"
                )),
            ),
        };

        let checkpoint = (status == SessionStatus::Paused).then(|| run.checkpoint());
        let session = &mut run.session;
        session.status = status;
        session.ended_at = Some(Utc::now());
        session.completeness = Some(completeness);
        session.failure_reason = reason;
        session.screens_explored = session.screens_explored.max(run.visited.len() as u64);
        session.checkpoint = checkpoint;
        self.store.update_session(session).await?;

        let summary = session.summary();
        self.publish(&run);
        self.set_state(match status {
            SessionStatus::Completed => ExplorerState::Complete,
            SessionStatus::Paused => ExplorerState::Paused,
            _ => ExplorerState::Failed,
        });
        info!(
            session_id = %summary.session_id,
            status = status.as_str(),
            screens = summary.screens_explored,
            elements = summary.elements_discovered,
            edges = summary.edges_discovered,
            completeness,
            duration_ms = summary.duration_ms,
            reason = summary.failure_reason.as_deref().unwrap_or(""),
            "Exploration session finalized"
        );
        Ok(summary)
    }

    /// One bounded attempt to leave the UI on the last known-good screen.
    async fn recover_after_cancel(&self, run: &Run) {
        let Some(top) = run.frames.last() else {
            return;
        };
        match self.observe().await {
            Ok(obs) if top.accepts(&obs.hash) => {}
            _ => {
                info!("Cancelled away from a known screen; navigating back once");
                // The session token is already cancelled; bound this by the settle timeout
                if let Err(e) = self.perform(UiAction::Back, &CancellationToken::new()).await {
                    warn!(error = %e, "Recovery after cancellation failed");
                }
            }
        }
    }

    async fn observe(&self) -> Result<Observation, AutomationError> {
        let tree = self.engine.current_tree().await?;
        let mut elements = tree.flatten();
        reading_order(&mut elements);
        let hashes: Vec<ElementHash> = elements
            .iter()
            .map(|e| self.fingerprinter.element_hash(e))
            .collect();
        let mut sorted = hashes.clone();
        let hash = self
            .fingerprinter
            .screen_hash_from_element_hashes(&tree.surface_label, &mut sorted);
        Ok(Observation {
            app_id: tree.app_id,
            surface_label: tree.surface_label,
            elements,
            hashes,
            hash,
        })
    }

    async fn snapshot_windows(&self, run: &Run) -> Option<WindowSnapshot> {
        match run.windows.list_active_windows().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Window enumeration failed");
                None
            }
        }
    }

    async fn perform(
        &self,
        action: UiAction<'_>,
        cancel: &CancellationToken,
    ) -> Result<SettleOutcome, AutomationError> {
        let mut events = self.engine.subscribe();
        match action {
            UiAction::Activate(element) => self.engine.activate(element).await?,
            UiAction::Scroll(element) => {
                self.engine.scroll(element, ScrollDirection::Forward).await?
            }
            UiAction::Back => self.engine.navigate_back().await?,
            UiAction::Launch(app_id) => self.engine.launch_application(app_id).await?,
        }
        self.set_state(ExplorerState::WaitingForSettle);
        Ok(self.settle.wait(&mut events, cancel).await)
    }

    /// Activate an expandable control and wait the fixed expansion delay.
    async fn activate_expandable(
        &self,
        element: &UIElement,
        cancel: &CancellationToken,
    ) -> Result<SettleOutcome, AutomationError> {
        let mut events = self.engine.subscribe();
        self.engine.activate(element).await?;
        tokio::select! {
            _ = cancel.cancelled() => return Ok(SettleOutcome::Cancelled),
            _ = tokio::time::sleep(self.config.expansion_settle()) => {}
        }
        Ok(match events.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => SettleOutcome::Changed,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => SettleOutcome::Unchanged,
        })
    }

    /// Upsert the screen row and, once per session, register or touch its
    /// elements.
    async fn record_screen(
        &self,
        run: &mut Run,
        obs: &Observation,
        canonical: &ScreenHash,
    ) -> Result<(), ExplorerError> {
        let state = ScreenState::new(
            canonical.clone(),
            run.app_id(),
            obs.surface_label.clone(),
            obs.elements.len(),
            Provenance::Exploration,
            Utc::now(),
        );
        self.tolerate(self.store.upsert_screen(&state).await)?;

        if run.registered.insert(obs.hash.clone()) {
            self.register_elements(run, canonical, obs, None, Residency::Screen)
                .await?;
        }
        Ok(())
    }

    async fn register_elements(
        &self,
        run: &mut Run,
        owner: &ScreenHash,
        obs: &Observation,
        only: Option<&[ElementHash]>,
        residency: Residency,
    ) -> Result<(), ExplorerError> {
        let filter: Option<HashSet<&ElementHash>> = only.map(|hashes| hashes.iter().collect());
        let now = Utc::now();
        for (element, hash) in obs.elements.iter().zip(&obs.hashes) {
            if filter.as_ref().is_some_and(|f| !f.contains(hash)) {
                continue;
            }
            let record = ElementRecord::from_element(
                hash.clone(),
                owner.clone(),
                element,
                Provenance::Exploration,
                now,
            )
            .with_expansion(self.classifier.classify(element));
            let registered = self.dedup.register_or_touch(record, residency).await;
            if let Some(true) = self.tolerate(registered)? {
                run.session.elements_discovered += 1;
            }
        }
        Ok(())
    }

    async fn register_surface(
        &self,
        run: &mut Run,
        owner: &ScreenHash,
        tree: &UiTree,
    ) -> Result<usize, ExplorerError> {
        let mut registered = 0;
        let now = Utc::now();
        for element in tree.flatten() {
            let hash = self.fingerprinter.element_hash(&element);
            let record =
                ElementRecord::from_element(hash, owner.clone(), &element, Provenance::Exploration, now)
                    .with_expansion(self.classifier.classify(&element));
            if let Some(true) = self.tolerate(
                self.dedup
                    .register_or_touch(record, Residency::Transient)
                    .await,
            )? {
                run.session.elements_discovered += 1;
                registered += 1;
            }
        }
        Ok(registered)
    }

    fn absorb_variant(&self, run: &mut Run, top: usize, obs: &Observation) -> Vec<ElementHash> {
        let canonical = run.frames[top].screen.clone();
        if obs.hash != canonical {
            run.variants.insert(obs.hash.clone(), canonical);
        }
        run.frames[top].absorb(&obs.hash, &obs.hashes)
    }

    /// Fatal storage errors abort the session; anything else is logged.
    fn tolerate<T>(&self, result: Result<T, StorageError>) -> Result<Option<T>, ExplorerError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Storage write failed; continuing");
                Ok(None)
            }
        }
    }

    fn set_state(&self, state: ExplorerState) {
        lock(&self.progress).state = state;
    }

    fn publish(&self, run: &Run) {
        let mut progress = lock(&self.progress);
        progress.depth = run.frames.last().map_or(0, |f| f.depth);
        progress.screens_discovered = run.visited.len();
        progress.screens_exhausted = run.exhausted.len();
        progress.elements_discovered = run.session.elements_discovered;
        progress.edges_discovered = run.session.edges_discovered;
    }
}

/// Same surface whose visible elements only grew or only shrank.
fn grew_in_place(before: &Observation, after: &Observation) -> bool {
    if before.app_id != after.app_id || before.surface_label != after.surface_label {
        return false;
    }
    let before_set = before.hash_set();
    let after_set = after.hash_set();
    before_set != after_set && (before_set.is_subset(&after_set) || after_set.is_subset(&before_set))
}

impl ExplorationProgressSource for ExplorationEngine {
    fn progress(&self) -> ExplorationProgress {
        lock(&self.progress).clone()
    }
}

impl CacheStatsSource for ExplorationEngine {
    fn cache_stats(&self) -> CacheStats {
        self.dedup.cache_stats()
    }
}
