use crate::element::{Bounds, UIElement};
use crate::errors::AutomationError;
use crate::tree::UiTree;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod scripted;

/// Platform-reported kind of a window/surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    Application,
    Dialog,
    Popup,
    InputMethod,
    System,
    AccessibilityOverlay,
    Unknown,
}

/// A window as reported by the platform, before classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformWindow {
    pub window_id: u32,
    pub app_id: String,
    pub kind: SurfaceKind,
    #[serde(default)]
    pub title: Option<String>,
    /// Z-order; higher is closer to the user
    pub layer: i32,
    pub focused: bool,
    #[serde(default)]
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UiEventKind {
    ContentChanged,
    WindowStateChanged,
    WindowsChanged,
}

/// Change notification pushed by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiEvent {
    pub kind: UiEventKind,
    pub window_id: u32,
    pub app_id: String,
}

/// The common trait that all accessibility backends must implement.
///
/// This is the whole surface the explorer needs from a device: reading the
/// element tree, acting on elements and observing change notifications.
/// Every action is a side effect on shared UI state; callers serialize them.
#[async_trait::async_trait]
pub trait AccessibilityEngine: Send + Sync {
    /// Element tree of the foreground application's main window
    async fn current_tree(&self) -> Result<UiTree, AutomationError>;

    /// Element tree of a specific window, e.g. a freshly opened menu
    async fn window_tree(&self, window_id: u32) -> Result<UiTree, AutomationError>;

    /// All windows currently on screen
    async fn list_windows(&self) -> Result<Vec<PlatformWindow>, AutomationError>;

    /// Activate (click) an element from the most recent tree
    async fn activate(&self, element: &UIElement) -> Result<(), AutomationError>;

    async fn scroll(
        &self,
        element: &UIElement,
        direction: ScrollDirection,
    ) -> Result<(), AutomationError>;

    /// Global "back" navigation
    async fn navigate_back(&self) -> Result<(), AutomationError>;

    /// Launch (or relaunch from scratch) an application
    async fn launch_application(&self, app_id: &str) -> Result<(), AutomationError>;

    /// Applications that can handle the home/launcher intent.
    ///
    /// May fail with [`AutomationError::PermissionDenied`] when package
    /// visibility is restricted.
    async fn home_handlers(&self) -> Result<Vec<String>, AutomationError>;

    /// Subscribe to content and window change notifications
    fn subscribe(&self) -> broadcast::Receiver<UiEvent>;
}
