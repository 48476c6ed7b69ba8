//! Persisted records of the navigation graph.

use crate::element::{Bounds, Capabilities, UIElement};
use crate::expandable::ExpansionClassification;
use crate::fingerprint::{ElementHash, ScreenHash};
use crate::pathfinding::ScreenType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    /// Found by the explorer driving the UI
    Exploration,
    /// Observed while the user operated the application
    Incidental,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Exploration => "EXPLORATION",
            Provenance::Incidental => "INCIDENTAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EXPLORATION" => Some(Provenance::Exploration),
            "INCIDENTAL" => Some(Provenance::Incidental),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenState {
    pub hash: ScreenHash,
    pub app_id: String,
    pub surface_label: String,
    pub screen_type: ScreenType,
    pub element_count: usize,
    pub provenance: Provenance,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub visit_count: u64,
}

impl ScreenState {
    pub fn new(
        hash: ScreenHash,
        app_id: impl Into<String>,
        surface_label: impl Into<String>,
        element_count: usize,
        provenance: Provenance,
        now: DateTime<Utc>,
    ) -> Self {
        let surface_label = surface_label.into();
        Self {
            hash,
            app_id: app_id.into(),
            screen_type: ScreenType::infer(&surface_label),
            surface_label,
            element_count,
            provenance,
            first_seen: now,
            last_seen: now,
            visit_count: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecord {
    pub hash: ElementHash,
    pub screen_hash: ScreenHash,
    pub app_id: String,
    pub role: String,
    pub resource_id: Option<String>,
    pub text: Option<String>,
    pub description: Option<String>,
    pub bounds: Bounds,
    pub capabilities: Capabilities,
    pub provenance: Provenance,
    pub expansion: Option<ExpansionClassification>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub seen_count: u64,
}

impl ElementRecord {
    pub fn from_element(
        hash: ElementHash,
        screen_hash: ScreenHash,
        element: &UIElement,
        provenance: Provenance,
        now: DateTime<Utc>,
    ) -> Self {
        let attrs = &element.attributes;
        Self {
            hash,
            screen_hash,
            app_id: element.app_id.clone(),
            role: attrs.role.clone(),
            resource_id: attrs.resource_id.clone(),
            text: attrs.text.clone(),
            description: attrs.description.clone(),
            bounds: attrs.bounds,
            capabilities: element.capabilities(),
            provenance,
            expansion: None,
            first_seen: now,
            last_seen: now,
            seen_count: 1,
        }
    }

    pub fn with_expansion(mut self, expansion: ExpansionClassification) -> Self {
        self.expansion = Some(expansion);
        self
    }

    /// Short human label used in exported paths.
    pub fn label_hint(&self) -> String {
        self.text
            .as_ref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.description.as_ref().filter(|d| !d.trim().is_empty()))
            .or(self.resource_id.as_ref())
            .cloned()
            .unwrap_or_else(|| self.role.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEdge {
    pub from: ScreenHash,
    pub to: ScreenHash,
    pub trigger: ElementHash,
    pub app_id: String,
    pub session_id: String,
    pub traversal_count: u64,
    pub first_observed: DateTime<Utc>,
    pub last_observed: DateTime<Utc>,
}

impl NavigationEdge {
    pub fn new(
        from: ScreenHash,
        to: ScreenHash,
        trigger: ElementHash,
        app_id: impl Into<String>,
        session_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            from,
            to,
            trigger,
            app_id: app_id.into(),
            session_id: session_id.into(),
            traversal_count: 1,
            first_observed: now,
            last_observed: now,
        }
    }

    /// Composite identity of the edge.
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from: self.from.clone(),
            to: self.to.clone(),
            trigger: self.trigger.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: ScreenHash,
    pub to: ScreenHash,
    pub trigger: ElementHash,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "RUNNING",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Paused => "PAUSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(SessionStatus::Running),
            "COMPLETED" => Some(SessionStatus::Completed),
            "FAILED" => Some(SessionStatus::Failed),
            "PAUSED" => Some(SessionStatus::Paused),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationSession {
    pub id: String,
    pub app_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub screens_explored: u64,
    pub elements_discovered: u64,
    pub edges_discovered: u64,
    /// Estimated fraction of the reachable graph covered, set on finalize
    pub completeness: Option<f64>,
    pub failure_reason: Option<String>,
    /// Walk state saved when the session was paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<SessionCheckpoint>,
}

impl ExplorationSession {
    pub fn start(app_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app_id: app_id.into(),
            started_at: now,
            ended_at: None,
            status: SessionStatus::Running,
            screens_explored: 0,
            elements_discovered: 0,
            edges_discovered: 0,
            completeness: None,
            failure_reason: None,
            checkpoint: None,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let duration_ms = self
            .ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        SessionSummary {
            session_id: self.id.clone(),
            application_id: self.app_id.clone(),
            screens_explored: self.screens_explored,
            elements_discovered: self.elements_discovered,
            edges_discovered: self.edges_discovered,
            duration_ms,
            status: self.status,
            completeness: self.completeness,
            failure_reason: self.failure_reason.clone(),
        }
    }
}

/// Where a paused exploration stood, so that resuming continues the walk
/// instead of starting over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCheckpoint {
    /// Elements already activated, per canonical screen
    pub clicked: BTreeMap<ScreenHash, BTreeSet<ElementHash>>,
    pub visited: BTreeSet<ScreenHash>,
    pub exhausted: BTreeSet<ScreenHash>,
    /// Variant hash -> canonical screen hash
    pub variants: BTreeMap<ScreenHash, ScreenHash>,
    /// Screen hashes whose elements were already registered
    pub registered: BTreeSet<ScreenHash>,
    /// Depth-first stack, root first
    pub frames: Vec<FrameCheckpoint>,
}

/// One saved level of the depth-first stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameCheckpoint {
    pub screen: ScreenHash,
    pub variants: BTreeSet<ScreenHash>,
    pub known_elements: BTreeSet<ElementHash>,
    pub depth: usize,
    pub via: Option<ElementHash>,
    pub scrolls: usize,
    pub scroll_exhausted: bool,
    pub time_on_screen_ms: u64,
}

/// Exported summary of one exploration session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub application_id: String,
    pub screens_explored: u64,
    pub elements_discovered: u64,
    pub edges_discovered: u64,
    pub duration_ms: u64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completeness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// One step of an exported path: on `screen_hash`, activate `element_hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathStep {
    pub screen_hash: ScreenHash,
    pub element_hash: ElementHash,
    pub element_label_hint: String,
}
