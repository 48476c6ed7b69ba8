use serde::{Deserialize, Serialize};
use std::fmt;

/// Screen-space rectangle of an element, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn center(&self) -> (i32, i32) {
        (
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }
}

/// Helper functions for clean serialization
fn is_empty_string(opt: &Option<String>) -> bool {
    match opt {
        Some(s) => s.is_empty(),
        None => true,
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_true() -> bool {
    true
}

/// Attributes the accessibility layer reports for a single element.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct UIElementAttributes {
    /// Widget type name, e.g. `android.widget.Button` or `Spinner`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    /// Developer-assigned stable identifier, if any
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub text: Option<String>,
    /// Accessible description (content description / accessibility label)
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub description: Option<String>,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default, skip_serializing_if = "is_false")]
    pub clickable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub scrollable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub checkable: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
}

impl Default for UIElementAttributes {
    fn default() -> Self {
        Self {
            role: String::new(),
            resource_id: None,
            text: None,
            description: None,
            bounds: Bounds::default(),
            clickable: false,
            editable: false,
            scrollable: false,
            checkable: false,
            enabled: true,
            visible: true,
        }
    }
}

impl fmt::Debug for UIElementAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug_struct = f.debug_struct("UIElementAttributes");

        if !self.role.is_empty() {
            debug_struct.field("role", &self.role);
        }
        if let Some(ref id) = self.resource_id {
            if !id.is_empty() {
                debug_struct.field("resource_id", id);
            }
        }
        if let Some(ref text) = self.text {
            if !text.is_empty() {
                debug_struct.field("text", text);
            }
        }
        if let Some(ref description) = self.description {
            if !description.is_empty() {
                debug_struct.field("description", description);
            }
        }
        debug_struct.field("bounds", &self.bounds);
        if self.clickable {
            debug_struct.field("clickable", &true);
        }
        if self.editable {
            debug_struct.field("editable", &true);
        }
        if self.scrollable {
            debug_struct.field("scrollable", &true);
        }
        if self.checkable {
            debug_struct.field("checkable", &true);
        }

        debug_struct.finish()
    }
}

/// Capability flags persisted alongside an element record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub activatable: bool,
    pub editable: bool,
    pub scrollable: bool,
    pub checkable: bool,
}

/// A flattened element from the live tree.
///
/// `handle` is the opaque per-snapshot reference the engine understands when
/// asked to act on the element. The remaining fields are content, and are
/// what fingerprints are computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    pub handle: String,
    pub window_id: u32,
    pub app_id: String,
    pub attributes: UIElementAttributes,
    /// Depth below the window root
    pub depth: usize,
    /// Roles of the ancestors, nearest first
    pub ancestor_roles: Vec<String>,
    /// Number of earlier siblings with identical type, identifier, text
    /// and description. Inserting unrelated siblings leaves it unchanged.
    pub twin_index: usize,
}

impl UIElement {
    pub fn role(&self) -> &str {
        &self.attributes.role
    }

    pub fn bounds(&self) -> Bounds {
        self.attributes.bounds
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            activatable: self.attributes.clickable,
            editable: self.attributes.editable,
            scrollable: self.attributes.scrollable,
            checkable: self.attributes.checkable,
        }
    }

    /// Whether the explorer should consider activating this element.
    pub fn is_actionable(&self) -> bool {
        let attrs = &self.attributes;
        attrs.enabled && attrs.visible && (attrs.clickable || attrs.editable)
    }

    /// Get a display name for this element
    pub fn display_name(&self) -> String {
        self.attributes
            .text
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                self.attributes
                    .description
                    .clone()
                    .filter(|d| !d.trim().is_empty())
            })
            .or_else(|| self.attributes.resource_id.clone())
            .unwrap_or_else(|| self.attributes.role.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_text_then_description() {
        let mut element = UIElement {
            handle: "n1".to_string(),
            window_id: 1,
            app_id: "com.example".to_string(),
            attributes: UIElementAttributes {
                role: "Button".to_string(),
                resource_id: Some("com.example:id/save".to_string()),
                description: Some("Save note".to_string()),
                ..Default::default()
            },
            depth: 2,
            ancestor_roles: vec![],
            twin_index: 0,
        };
        assert_eq!(element.display_name(), "Save note");

        element.attributes.text = Some("Save".to_string());
        assert_eq!(element.display_name(), "Save");

        element.attributes.text = None;
        element.attributes.description = None;
        assert_eq!(element.display_name(), "com.example:id/save");
    }

    #[test]
    fn attributes_skip_empty_fields_when_serialized() {
        let attrs = UIElementAttributes {
            role: "TextView".to_string(),
            text: Some(String::new()),
            ..Default::default()
        };
        let json = serde_json::to_value(&attrs).unwrap();
        assert!(json.get("text").is_none());
        assert!(json.get("clickable").is_none());
        assert_eq!(json["role"], "TextView");
    }
}
