//! Autonomous UI exploration and navigation graphs
//!
//! This crate walks a running application through an accessibility engine,
//! fingerprints every screen it reaches, and records the transitions between
//! screens as a weighted directed graph. The graph can then answer "how do I
//! get from here to there" questions, either for a concrete screen or for a
//! free-text intent such as "settings".

pub mod dedup;
pub mod element;
pub mod errors;
pub mod expandable;
pub mod explorer;
pub mod fingerprint;
pub mod launcher;
pub mod models;
pub mod pathfinding;
pub mod platforms;
pub mod store;
#[cfg(test)]
mod tests;
pub mod tree;
pub mod utils;
pub mod windows;

pub use dedup::{CacheConfig, CacheStats, CacheStatsSource, ElementDeduplicationCache};
pub use element::{Bounds, UIElement, UIElementAttributes};
pub use errors::{AutomationError, ExplorerError, StorageError};
pub use expandable::{ExpandableControlClassifier, ExpansionClassification, ExpansionKind};
pub use explorer::{
    ExplorationConfig, ExplorationEngine, ExplorationLocks, ExplorationProgress,
    ExplorationProgressSource, ExplorerState, PassiveObserver,
};
pub use fingerprint::{ElementHash, FingerprintPolicy, ScreenHash, StateFingerprinter};
pub use launcher::LauncherDetector;
pub use models::{
    ElementRecord, ExplorationSession, FrameCheckpoint, NavigationEdge, PathStep, Provenance,
    ScreenState, SessionCheckpoint, SessionStatus, SessionSummary,
};
pub use pathfinding::{IntentMatcher, PathfindingService, ScreenType, Target};
pub use platforms::AccessibilityEngine;
pub use store::{GraphStorage, NavigationGraphStore};
pub use tree::{UINode, UiTree};
pub use windows::{WindowClass, WindowClassifier, WindowSnapshot};
