//! An accessibility engine that plays back a declarative application model.
//!
//! The model describes screens, their element trees and what activating an
//! element does (navigate, open a menu, expand in place, leave the app...).
//! The engine keeps a back stack like a real device and emits change events
//! for every action that alters what is on screen, so the explorer runs
//! against it exactly as it would against a live device.

use super::{AccessibilityEngine, PlatformWindow, ScrollDirection, SurfaceKind, UiEvent, UiEventKind};
use crate::element::{Bounds, UIElement, UIElementAttributes};
use crate::errors::AutomationError;
use crate::tree::{UINode, UiTree};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

pub const MAIN_WINDOW_ID: u32 = 1;
pub const OVERLAY_WINDOW_ID: u32 = 2;
pub const EXTERNAL_WINDOW_ID: u32 = 3;
pub const LAUNCHER_WINDOW_ID: u32 = 4;
pub const STATUS_BAR_WINDOW_ID: u32 = 10;

const SYSTEM_UI_APP_ID: &str = "com.android.systemui";
const SCREEN_WIDTH: i32 = 1080;
const SCREEN_HEIGHT: i32 = 2400;
const ROW_HEIGHT: i32 = 120;

fn default_launcher() -> String {
    "com.android.launcher3".to_string()
}

fn default_home_handlers() -> Option<Vec<String>> {
    Some(vec![default_launcher()])
}

fn default_role() -> String {
    "Button".to_string()
}

fn default_true() -> bool {
    true
}

/// Whole-application description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppModel {
    pub app_id: String,
    pub start_screen: String,
    pub screens: Vec<ScreenModel>,
    #[serde(default = "default_launcher")]
    pub launcher_app_id: String,
    /// `null` simulates a permission failure when querying home handlers
    #[serde(default = "default_home_handlers")]
    pub home_handlers: Option<Vec<String>>,
}

impl AppModel {
    pub fn new(app_id: impl Into<String>, start_screen: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            start_screen: start_screen.into(),
            screens: Vec::new(),
            launcher_app_id: default_launcher(),
            home_handlers: default_home_handlers(),
        }
    }

    pub fn screen(mut self, screen: ScreenModel) -> Self {
        self.screens.push(screen);
        self
    }

    pub fn without_home_handler_permission(mut self) -> Self {
        self.home_handlers = None;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenModel {
    pub id: String,
    pub surface_label: String,
    #[serde(default)]
    pub elements: Vec<ElementModel>,
    /// Content of a scrollable list, one entry per scroll position
    #[serde(default)]
    pub scroll_pages: Vec<Vec<ElementModel>>,
}

impl ScreenModel {
    pub fn new(id: impl Into<String>, surface_label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            surface_label: surface_label.into(),
            elements: Vec::new(),
            scroll_pages: Vec::new(),
        }
    }

    pub fn element(mut self, element: ElementModel) -> Self {
        self.elements.push(element);
        self
    }

    pub fn scroll_page(mut self, page: Vec<ElementModel>) -> Self {
        self.scroll_pages.push(page);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementModel {
    pub id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub children: Vec<ElementModel>,
    #[serde(default)]
    pub action: Option<ElementAction>,
}

impl ElementModel {
    pub fn button(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: default_role(),
            resource_id: None,
            text: Some(text.into()),
            description: None,
            clickable: true,
            editable: false,
            children: Vec::new(),
            action: None,
        }
    }

    pub fn label(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            clickable: false,
            role: "TextView".to_string(),
            ..Self::button(id, text)
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn navigates_to(mut self, screen: impl Into<String>) -> Self {
        self.action = Some(ElementAction::Navigate {
            screen: screen.into(),
        });
        self
    }

    pub fn opens_overlay(mut self, elements: Vec<ElementModel>) -> Self {
        self.action = Some(ElementAction::OpenOverlay {
            label: None,
            dialog: false,
            elements,
        });
        self
    }

    pub fn opens_dialog(mut self, elements: Vec<ElementModel>) -> Self {
        self.action = Some(ElementAction::OpenOverlay {
            label: None,
            dialog: true,
            elements,
        });
        self
    }

    pub fn expands(mut self, elements: Vec<ElementModel>) -> Self {
        self.action = Some(ElementAction::ExpandInPlace { elements });
        self
    }

    pub fn leaves_app(mut self, app_id: impl Into<String>, back_returns: bool) -> Self {
        self.action = Some(ElementAction::LeaveApp {
            app_id: app_id.into(),
            back_returns,
        });
        self
    }

    pub fn goes_back(mut self) -> Self {
        self.action = Some(ElementAction::Back);
        self
    }

    fn is_clickable(&self) -> bool {
        self.clickable || self.action.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementAction {
    Navigate {
        screen: String,
    },
    Back,
    OpenOverlay {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        dialog: bool,
        elements: Vec<ElementModel>,
    },
    ExpandInPlace {
        elements: Vec<ElementModel>,
    },
    LeaveApp {
        app_id: String,
        #[serde(default = "default_true")]
        back_returns: bool,
    },
    Noop,
}

#[derive(Debug, Clone)]
struct ScreenInstance {
    screen_id: String,
    expanded: Vec<String>,
    page: usize,
}

impl ScreenInstance {
    fn new(screen_id: &str) -> Self {
        Self {
            screen_id: screen_id.to_string(),
            expanded: Vec::new(),
            page: 0,
        }
    }
}

#[derive(Debug, Clone)]
enum Foreground {
    App,
    External { app_id: String, back_returns: bool },
    Launcher,
}

#[derive(Debug, Clone)]
struct OverlayState {
    label: String,
    dialog: bool,
    elements: Vec<ElementModel>,
}

#[derive(Debug)]
struct EngineState {
    stack: Vec<ScreenInstance>,
    overlay: Option<OverlayState>,
    foreground: Foreground,
    action_log: Vec<String>,
}

/// Plays back an [`AppModel`].
pub struct ScriptedEngine {
    model: AppModel,
    screens: HashMap<String, ScreenModel>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<UiEvent>,
}

impl ScriptedEngine {
    pub fn new(model: AppModel) -> Arc<Self> {
        let screens = model
            .screens
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(EngineState {
                stack: vec![ScreenInstance::new(&model.start_screen)],
                overlay: None,
                foreground: Foreground::App,
                action_log: Vec::new(),
            }),
            model,
            screens,
            events,
        })
    }

    pub fn model(&self) -> &AppModel {
        &self.model
    }

    /// Id of the screen model on top of the back stack, if the app is in front.
    pub fn current_screen_id(&self) -> Option<String> {
        let state = self.lock().ok()?;
        match state.foreground {
            Foreground::App => state.stack.last().map(|s| s.screen_id.clone()),
            _ => None,
        }
    }

    pub fn overlay_open(&self) -> bool {
        self.lock().map(|s| s.overlay.is_some()).unwrap_or(false)
    }

    /// Every action performed so far, e.g. `activate home/settings` or `back`.
    pub fn action_log(&self) -> Vec<String> {
        self.lock().map(|s| s.action_log.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineState>, AutomationError> {
        self.state
            .lock()
            .map_err(|e| AutomationError::Internal(format!("scripted engine state poisoned: {e}")))
    }

    fn emit(&self, kind: UiEventKind, window_id: u32, app_id: &str) {
        // No subscribers is fine
        let _ = self.events.send(UiEvent {
            kind,
            window_id,
            app_id: app_id.to_string(),
        });
    }

    fn screen(&self, id: &str) -> Result<&ScreenModel, AutomationError> {
        self.screens
            .get(id)
            .ok_or_else(|| AutomationError::Internal(format!("model has no screen '{id}'")))
    }

    fn main_tree(&self, state: &EngineState) -> Result<UiTree, AutomationError> {
        let instance = state
            .stack
            .last()
            .ok_or_else(|| AutomationError::Internal("empty back stack".to_string()))?;
        let screen = self.screen(&instance.screen_id)?;
        let prefix = screen.id.as_str();
        let mut layout = Layout::default();

        let mut children = Vec::new();
        for element in &screen.elements {
            children.push(build_node(prefix, element, &mut layout));
            if instance.expanded.contains(&element.id) {
                if let Some(ElementAction::ExpandInPlace { elements }) = &element.action {
                    children.extend(elements.iter().map(|e| build_node(prefix, e, &mut layout)));
                }
            }
        }

        if let Some(page) = screen.scroll_pages.get(instance.page) {
            let rows = page.iter().map(|e| build_node(prefix, e, &mut layout)).collect();
            let list = UINode::new(
                format!("{prefix}/list"),
                UIElementAttributes {
                    role: "RecyclerView".to_string(),
                    resource_id: Some(format!("{}:id/list", self.model.app_id)),
                    bounds: Bounds::new(0, layout.next_top, SCREEN_WIDTH, SCREEN_HEIGHT),
                    scrollable: true,
                    ..Default::default()
                },
            )
            .with_children(rows);
            children.push(list);
        }

        Ok(UiTree {
            window_id: MAIN_WINDOW_ID,
            app_id: self.model.app_id.clone(),
            surface_label: screen.surface_label.clone(),
            root: root_node(prefix).with_children(children),
        })
    }

    fn overlay_tree(&self, overlay: &OverlayState) -> UiTree {
        let mut layout = Layout::default();
        let children = overlay
            .elements
            .iter()
            .map(|e| build_node("overlay", e, &mut layout))
            .collect();
        UiTree {
            window_id: OVERLAY_WINDOW_ID,
            app_id: self.model.app_id.clone(),
            surface_label: overlay.label.clone(),
            root: root_node("overlay").with_children(children),
        }
    }

    fn external_tree(&self, app_id: &str, window_id: u32, label: &str) -> UiTree {
        UiTree {
            window_id,
            app_id: app_id.to_string(),
            surface_label: label.to_string(),
            root: root_node(app_id).with_children(vec![UINode::new(
                format!("{app_id}/content"),
                UIElementAttributes {
                    role: "TextView".to_string(),
                    text: Some(label.to_string()),
                    bounds: Bounds::new(0, 100, SCREEN_WIDTH, 220),
                    ..Default::default()
                },
            )]),
        }
    }

    /// Find a visible main-window element model by handle.
    fn find_main_element<'a>(
        &'a self,
        state: &EngineState,
        handle: &str,
    ) -> Result<&'a ElementModel, AutomationError> {
        let instance = state
            .stack
            .last()
            .ok_or_else(|| AutomationError::Internal("empty back stack".to_string()))?;
        let screen = self.screen(&instance.screen_id)?;
        let wanted = handle
            .strip_prefix(&format!("{}/", screen.id))
            .ok_or_else(|| AutomationError::ElementDetached(handle.to_string()))?;

        let mut candidates: Vec<&ElementModel> = Vec::new();
        for element in &screen.elements {
            candidates.push(element);
            if instance.expanded.contains(&element.id) {
                if let Some(ElementAction::ExpandInPlace { elements }) = &element.action {
                    candidates.extend(elements.iter());
                }
            }
        }
        if let Some(page) = screen.scroll_pages.get(instance.page) {
            candidates.extend(page.iter());
        }

        // Walk nested children without recursion
        while let Some(candidate) = candidates.pop() {
            if candidate.id == wanted {
                return Ok(candidate);
            }
            candidates.extend(candidate.children.iter());
        }
        Err(AutomationError::ElementNotFound(handle.to_string()))
    }

    fn apply_action(&self, state: &mut EngineState, element: &ElementModel) {
        let app_id = self.model.app_id.clone();
        match &element.action {
            Some(ElementAction::Navigate { screen }) => {
                state.stack.push(ScreenInstance::new(screen));
                self.emit(UiEventKind::WindowStateChanged, MAIN_WINDOW_ID, &app_id);
            }
            Some(ElementAction::Back) => self.back(state),
            Some(ElementAction::OpenOverlay {
                label,
                dialog,
                elements,
            }) => {
                state.overlay = Some(OverlayState {
                    label: label
                        .clone()
                        .unwrap_or_else(|| if *dialog { "AlertDialog" } else { "PopupMenu" }.to_string()),
                    dialog: *dialog,
                    elements: elements.clone(),
                });
                self.emit(UiEventKind::WindowsChanged, OVERLAY_WINDOW_ID, &app_id);
            }
            Some(ElementAction::ExpandInPlace { .. }) => {
                if let Some(instance) = state.stack.last_mut() {
                    if let Some(pos) = instance.expanded.iter().position(|id| id == &element.id) {
                        instance.expanded.remove(pos);
                    } else {
                        instance.expanded.push(element.id.clone());
                    }
                }
                self.emit(UiEventKind::ContentChanged, MAIN_WINDOW_ID, &app_id);
            }
            Some(ElementAction::LeaveApp {
                app_id: other,
                back_returns,
            }) => {
                state.foreground = if *other == self.model.launcher_app_id {
                    Foreground::Launcher
                } else {
                    Foreground::External {
                        app_id: other.clone(),
                        back_returns: *back_returns,
                    }
                };
                self.emit(UiEventKind::WindowStateChanged, EXTERNAL_WINDOW_ID, other);
            }
            Some(ElementAction::Noop) | None => {}
        }
    }

    fn back(&self, state: &mut EngineState) {
        let app_id = self.model.app_id.clone();
        if state.overlay.take().is_some() {
            self.emit(UiEventKind::WindowsChanged, MAIN_WINDOW_ID, &app_id);
            return;
        }
        match state.foreground.clone() {
            Foreground::External { back_returns, .. } => {
                if back_returns {
                    state.foreground = Foreground::App;
                    self.emit(UiEventKind::WindowStateChanged, MAIN_WINDOW_ID, &app_id);
                }
            }
            Foreground::Launcher => {}
            Foreground::App => {
                if state.stack.len() > 1 {
                    state.stack.pop();
                    self.emit(UiEventKind::WindowStateChanged, MAIN_WINDOW_ID, &app_id);
                } else {
                    state.foreground = Foreground::Launcher;
                    let launcher = self.model.launcher_app_id.clone();
                    self.emit(UiEventKind::WindowStateChanged, LAUNCHER_WINDOW_ID, &launcher);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl AccessibilityEngine for ScriptedEngine {
    async fn current_tree(&self) -> Result<UiTree, AutomationError> {
        let state = self.lock()?;
        match &state.foreground {
            Foreground::App => self.main_tree(&state),
            Foreground::External { app_id, .. } => {
                Ok(self.external_tree(app_id, EXTERNAL_WINDOW_ID, "ExternalActivity"))
            }
            Foreground::Launcher => Ok(self.external_tree(
                &self.model.launcher_app_id,
                LAUNCHER_WINDOW_ID,
                "Launcher",
            )),
        }
    }

    async fn window_tree(&self, window_id: u32) -> Result<UiTree, AutomationError> {
        let state = self.lock()?;
        match (window_id, &state.foreground, &state.overlay) {
            (MAIN_WINDOW_ID, Foreground::App, _) => self.main_tree(&state),
            (OVERLAY_WINDOW_ID, Foreground::App, Some(overlay)) => Ok(self.overlay_tree(overlay)),
            (EXTERNAL_WINDOW_ID, Foreground::External { app_id, .. }, _) => {
                Ok(self.external_tree(app_id, EXTERNAL_WINDOW_ID, "ExternalActivity"))
            }
            (LAUNCHER_WINDOW_ID, Foreground::Launcher, _) => Ok(self.external_tree(
                &self.model.launcher_app_id,
                LAUNCHER_WINDOW_ID,
                "Launcher",
            )),
            _ => Err(AutomationError::ElementNotFound(format!(
                "window {window_id} is not on screen"
            ))),
        }
    }

    async fn list_windows(&self) -> Result<Vec<PlatformWindow>, AutomationError> {
        let state = self.lock()?;
        let full = Bounds::new(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT);
        let mut windows = vec![PlatformWindow {
            window_id: STATUS_BAR_WINDOW_ID,
            app_id: SYSTEM_UI_APP_ID.to_string(),
            kind: SurfaceKind::System,
            title: Some("Status bar".to_string()),
            layer: 100,
            focused: false,
            bounds: Bounds::new(0, 0, SCREEN_WIDTH, 80),
        }];

        match &state.foreground {
            Foreground::App => {
                windows.push(PlatformWindow {
                    window_id: MAIN_WINDOW_ID,
                    app_id: self.model.app_id.clone(),
                    kind: SurfaceKind::Application,
                    title: None,
                    layer: 1,
                    focused: state.overlay.is_none(),
                    bounds: full,
                });
                if let Some(overlay) = &state.overlay {
                    windows.push(PlatformWindow {
                        window_id: OVERLAY_WINDOW_ID,
                        app_id: self.model.app_id.clone(),
                        kind: if overlay.dialog {
                            SurfaceKind::Dialog
                        } else {
                            SurfaceKind::Popup
                        },
                        title: Some(overlay.label.clone()),
                        layer: 2,
                        focused: true,
                        bounds: Bounds::new(540, 100, SCREEN_WIDTH, 900),
                    });
                }
            }
            Foreground::External { app_id, .. } => windows.push(PlatformWindow {
                window_id: EXTERNAL_WINDOW_ID,
                app_id: app_id.clone(),
                kind: SurfaceKind::Application,
                title: None,
                layer: 1,
                focused: true,
                bounds: full,
            }),
            Foreground::Launcher => windows.push(PlatformWindow {
                window_id: LAUNCHER_WINDOW_ID,
                app_id: self.model.launcher_app_id.clone(),
                kind: SurfaceKind::Application,
                title: None,
                layer: 1,
                focused: true,
                bounds: full,
            }),
        }

        Ok(windows)
    }

    async fn activate(&self, element: &UIElement) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        state.action_log.push(format!("activate {}", element.handle));
        debug!(handle = %element.handle, "scripted activate");

        if !matches!(state.foreground, Foreground::App) {
            return Err(AutomationError::ElementDetached(element.handle.clone()));
        }

        if let Some(overlay) = state.overlay.clone() {
            let wanted = element.handle.strip_prefix("overlay/");
            state.overlay = None;
            self.emit(UiEventKind::WindowsChanged, MAIN_WINDOW_ID, &self.model.app_id);
            if let Some(item) = wanted.and_then(|id| overlay.elements.iter().find(|e| e.id == id)) {
                self.apply_action(&mut state, item);
            }
            return Ok(());
        }

        let target = self.find_main_element(&state, &element.handle)?.clone();
        self.apply_action(&mut state, &target);
        Ok(())
    }

    async fn scroll(
        &self,
        element: &UIElement,
        direction: ScrollDirection,
    ) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        state
            .action_log
            .push(format!("scroll {} {:?}", element.handle, direction));
        if !element.attributes.scrollable {
            return Err(AutomationError::ScrollFailed(format!(
                "{} is not scrollable",
                element.handle
            )));
        }
        let screen_id = state
            .stack
            .last()
            .map(|s| s.screen_id.clone())
            .ok_or_else(|| AutomationError::Internal("empty back stack".to_string()))?;
        let pages = self.screen(&screen_id)?.scroll_pages.len();
        let moved = match state.stack.last_mut() {
            Some(instance) => match direction {
                ScrollDirection::Forward if instance.page + 1 < pages => {
                    instance.page += 1;
                    true
                }
                ScrollDirection::Backward if instance.page > 0 => {
                    instance.page -= 1;
                    true
                }
                _ => false,
            },
            None => false,
        };
        if moved {
            self.emit(UiEventKind::ContentChanged, MAIN_WINDOW_ID, &self.model.app_id);
        }
        Ok(())
    }

    async fn navigate_back(&self) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        state.action_log.push("back".to_string());
        self.back(&mut state);
        Ok(())
    }

    async fn launch_application(&self, app_id: &str) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        state.action_log.push(format!("launch {app_id}"));
        if app_id != self.model.app_id {
            return Err(AutomationError::InvalidArgument(format!(
                "unknown application {app_id}"
            )));
        }
        state.stack = vec![ScreenInstance::new(&self.model.start_screen)];
        state.overlay = None;
        state.foreground = Foreground::App;
        self.emit(UiEventKind::WindowStateChanged, MAIN_WINDOW_ID, app_id);
        Ok(())
    }

    async fn home_handlers(&self) -> Result<Vec<String>, AutomationError> {
        self.model.home_handlers.clone().ok_or_else(|| {
            AutomationError::PermissionDenied("QUERY_ALL_PACKAGES not granted".to_string())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
struct Layout {
    next_top: i32,
}

impl Layout {
    fn next(&mut self) -> Bounds {
        if self.next_top == 0 {
            self.next_top = 100;
        }
        let top = self.next_top;
        self.next_top += ROW_HEIGHT;
        Bounds::new(0, top, SCREEN_WIDTH, top + ROW_HEIGHT - 10)
    }
}

fn root_node(prefix: &str) -> UINode {
    UINode::new(
        format!("{prefix}/root"),
        UIElementAttributes {
            role: "FrameLayout".to_string(),
            bounds: Bounds::new(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT),
            ..Default::default()
        },
    )
}

fn build_node(prefix: &str, element: &ElementModel, layout: &mut Layout) -> UINode {
    // Element models are shallow; nesting depth is bounded by the model file.
    let node = UINode::new(
        format!("{prefix}/{}", element.id),
        UIElementAttributes {
            role: element.role.clone(),
            resource_id: element.resource_id.clone(),
            text: element.text.clone(),
            description: element.description.clone(),
            bounds: layout.next(),
            clickable: element.is_clickable(),
            editable: element.editable,
            ..Default::default()
        },
    );
    let children = element
        .children
        .iter()
        .map(|child| build_node(prefix, child, layout))
        .collect();
    node.with_children(children)
}
