//! Classification of the surfaces currently on screen.

use crate::errors::AutomationError;
use crate::launcher::LauncherDetector;
use crate::platforms::{AccessibilityEngine, PlatformWindow, SurfaceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowClass {
    /// A full window of the target application
    MainApp,
    /// Menu, popup, or a surface drawn by some other application
    Overlay,
    /// Status bar, input method, accessibility overlays
    System,
    /// The home-screen launcher
    Launcher,
    Dialog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedWindow {
    pub window: PlatformWindow,
    pub class: WindowClass,
}

impl ClassifiedWindow {
    /// Whether this surface sits on top of the main window temporarily.
    pub fn is_transient(&self) -> bool {
        matches!(self.class, WindowClass::Overlay | WindowClass::Dialog)
    }
}

/// The set of active surfaces at one instant, topmost first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WindowSnapshot {
    pub windows: Vec<ClassifiedWindow>,
}

impl WindowSnapshot {
    pub fn new(mut windows: Vec<ClassifiedWindow>) -> Self {
        windows.sort_by(|a, b| b.window.layer.cmp(&a.window.layer));
        Self { windows }
    }

    /// The window receiving input: the focused one, else the topmost
    /// non-system window.
    pub fn foreground(&self) -> Option<&ClassifiedWindow> {
        self.windows
            .iter()
            .find(|w| w.window.focused && w.class != WindowClass::System)
            .or_else(|| self.windows.iter().find(|w| w.class != WindowClass::System))
    }

    pub fn foreground_app(&self) -> Option<&str> {
        self.foreground().map(|w| w.window.app_id.as_str())
    }

    /// True when the user-facing window no longer belongs to `target_app`.
    pub fn has_left(&self, target_app: &str) -> bool {
        match self.foreground() {
            Some(w) => w.class == WindowClass::Launcher || w.window.app_id != target_app,
            None => true,
        }
    }

    pub fn main_window(&self) -> Option<&ClassifiedWindow> {
        self.windows.iter().find(|w| w.class == WindowClass::MainApp)
    }

    /// Overlay or dialog surfaces present here but not in `before`.
    pub fn new_transient_surfaces(&self, before: &WindowSnapshot) -> Vec<&ClassifiedWindow> {
        let known: HashSet<u32> = before.windows.iter().map(|w| w.window.window_id).collect();
        self.windows
            .iter()
            .filter(|w| w.is_transient() && !known.contains(&w.window.window_id))
            .collect()
    }

    pub fn window_ids(&self) -> Vec<u32> {
        self.windows.iter().map(|w| w.window.window_id).collect()
    }
}

/// Labels platform windows relative to one target application.
pub struct WindowClassifier {
    engine: Arc<dyn AccessibilityEngine>,
    launchers: Arc<LauncherDetector>,
    target_app: String,
}

impl WindowClassifier {
    pub fn new(
        engine: Arc<dyn AccessibilityEngine>,
        launchers: Arc<LauncherDetector>,
        target_app: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            launchers,
            target_app: target_app.into(),
        }
    }

    pub fn target_app(&self) -> &str {
        &self.target_app
    }

    pub async fn classify(&self, window: &PlatformWindow) -> WindowClass {
        if self.launchers.is_launcher(&window.app_id).await {
            return WindowClass::Launcher;
        }

        match window.kind {
            SurfaceKind::System | SurfaceKind::InputMethod | SurfaceKind::AccessibilityOverlay => {
                WindowClass::System
            }
            SurfaceKind::Dialog => WindowClass::Dialog,
            SurfaceKind::Popup => WindowClass::Overlay,
            SurfaceKind::Application | SurfaceKind::Unknown => {
                if window.app_id == self.target_app {
                    WindowClass::MainApp
                } else {
                    WindowClass::Overlay
                }
            }
        }
    }

    /// Enumerate and classify every active surface.
    #[instrument(level = "debug", skip(self), fields(target_app = %self.target_app))]
    pub async fn list_active_windows(&self) -> Result<WindowSnapshot, AutomationError> {
        let platform_windows = self.engine.list_windows().await?;
        let mut classified = Vec::with_capacity(platform_windows.len());
        for window in platform_windows {
            let class = self.classify(&window).await;
            classified.push(ClassifiedWindow { window, class });
        }
        let snapshot = WindowSnapshot::new(classified);
        debug!(windows = snapshot.windows.len(), "Window snapshot taken");
        Ok(snapshot)
    }
}
