//! Predicts whether activating a control reveals hidden content.
//!
//! Rules are tried in tiers; the first tier that matches decides, and its
//! confidence is fixed. Tiers never stack.

use crate::element::UIElement;
use crate::utils::normalize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpansionKind {
    /// A new surface (menu, popup, dialog) opens above the current one
    Overlay,
    /// The current surface grows, e.g. an expandable list group
    InPlace,
    /// Navigation to another screen or drawer
    Navigation,
    Unknown,
}

impl ExpansionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionKind::Overlay => "OVERLAY",
            ExpansionKind::InPlace => "IN_PLACE",
            ExpansionKind::Navigation => "NAVIGATION",
            ExpansionKind::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OVERLAY" => Some(ExpansionKind::Overlay),
            "IN_PLACE" => Some(ExpansionKind::InPlace),
            "NAVIGATION" => Some(ExpansionKind::Navigation),
            "UNKNOWN" => Some(ExpansionKind::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionClassification {
    pub is_expandable: bool,
    pub kind: ExpansionKind,
    pub confidence: f32,
}

impl ExpansionClassification {
    pub const NOT_EXPANDABLE: ExpansionClassification = ExpansionClassification {
        is_expandable: false,
        kind: ExpansionKind::Unknown,
        confidence: 0.0,
    };

    fn expandable(kind: ExpansionKind, confidence: f32) -> Self {
        Self {
            is_expandable: true,
            kind,
            confidence,
        }
    }
}

pub const TYPE_MATCH_CONFIDENCE: f32 = 0.95;
pub const RESOURCE_ID_CONFIDENCE: f32 = 0.85;
pub const DESCRIPTION_CONFIDENCE: f32 = 0.75;
pub const GLYPH_CONFIDENCE: f32 = 0.65;

const SELECTOR_TYPES: &[&str] = &[
    "Spinner",
    "AppCompatSpinner",
    "MaterialSpinner",
    "AutoCompleteTextView",
    "MaterialAutoCompleteTextView",
    "PopupMenu",
    "ListPopupWindow",
    "DropDownListView",
    "ActionMenuView",
    "OverflowMenuButton",
    "ComboBox",
    "MenuButton",
];

const EXPANDABLE_LIST_TYPES: &[&str] = &[
    "ExpandableListView",
    "ExpandableLayout",
    "ExpandableTextView",
    "ExpandableCardView",
    "Expander",
    "DisclosureGroup",
];

const DRAWER_TYPES: &[&str] = &[
    "DrawerLayout",
    "NavigationView",
    "SlidingPaneLayout",
    "NavigationDrawer",
];

// Checked in this order. "drawer" comes first so `nav_drawer_menu` is navigation.
const RESOURCE_ID_RULES: &[(&str, ExpansionKind)] = &[
    ("drawer", ExpansionKind::Navigation),
    ("overflow", ExpansionKind::Overlay),
    ("dropdown", ExpansionKind::Overlay),
    ("menu", ExpansionKind::Overlay),
    ("expand", ExpansionKind::InPlace),
    ("collapse", ExpansionKind::InPlace),
];

const DESCRIPTION_RULES: &[(&str, ExpansionKind)] = &[
    ("navigation drawer", ExpansionKind::Navigation),
    ("open navigation", ExpansionKind::Navigation),
    ("navigation menu", ExpansionKind::Navigation),
    ("open drawer", ExpansionKind::Navigation),
    ("more options", ExpansionKind::Overlay),
    ("overflow", ExpansionKind::Overlay),
    ("open menu", ExpansionKind::Overlay),
    ("show menu", ExpansionKind::Overlay),
    ("dropdown", ExpansionKind::Overlay),
    ("drop down", ExpansionKind::Overlay),
    ("show more", ExpansionKind::InPlace),
    ("see more", ExpansionKind::InPlace),
    ("read more", ExpansionKind::InPlace),
    ("expand", ExpansionKind::InPlace),
    ("collapse", ExpansionKind::InPlace),
];

const GLYPH_RULES: &[(&str, ExpansionKind)] = &[
    ("⋮", ExpansionKind::Overlay),
    ("︙", ExpansionKind::Overlay),
    ("⋯", ExpansionKind::Overlay),
    ("…", ExpansionKind::Overlay),
    ("...", ExpansionKind::Overlay),
    ("▾", ExpansionKind::Overlay),
    ("▼", ExpansionKind::Overlay),
    ("☰", ExpansionKind::Navigation),
    ("≡", ExpansionKind::Navigation),
    ("⌄", ExpansionKind::InPlace),
    ("˅", ExpansionKind::InPlace),
];

/// Ordered, first-match-wins expansion heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandableControlClassifier;

impl ExpandableControlClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, element: &UIElement) -> ExpansionClassification {
        let attrs = &element.attributes;

        if let Some(kind) = classify_type(&attrs.role) {
            return ExpansionClassification::expandable(kind, TYPE_MATCH_CONFIDENCE);
        }

        if let Some(id) = attrs.resource_id.as_deref() {
            // Only the entry name after `:id/` carries meaning
            let entry = id.rsplit('/').next().unwrap_or(id).to_lowercase();
            if let Some(kind) = first_substring_match(&entry, RESOURCE_ID_RULES) {
                return ExpansionClassification::expandable(kind, RESOURCE_ID_CONFIDENCE);
            }
        }

        if let Some(description) = attrs.description.as_deref() {
            let description = normalize(description);
            if let Some(kind) = first_substring_match(&description, DESCRIPTION_RULES) {
                return ExpansionClassification::expandable(kind, DESCRIPTION_CONFIDENCE);
            }
        }

        if let Some(text) = attrs.text.as_deref() {
            let glyph = text.trim();
            if let Some((_, kind)) = GLYPH_RULES.iter().find(|(g, _)| *g == glyph) {
                return ExpansionClassification::expandable(*kind, GLYPH_CONFIDENCE);
            }
        }

        ExpansionClassification::NOT_EXPANDABLE
    }
}

fn classify_type(role: &str) -> Option<ExpansionKind> {
    let simple = role.rsplit('.').next().unwrap_or(role);
    if SELECTOR_TYPES.contains(&simple) {
        Some(ExpansionKind::Overlay)
    } else if EXPANDABLE_LIST_TYPES.contains(&simple) {
        Some(ExpansionKind::InPlace)
    } else if DRAWER_TYPES.contains(&simple) {
        Some(ExpansionKind::Navigation)
    } else {
        None
    }
}

fn first_substring_match(haystack: &str, rules: &[(&str, ExpansionKind)]) -> Option<ExpansionKind> {
    rules
        .iter()
        .find(|(needle, _)| haystack.contains(needle))
        .map(|(_, kind)| *kind)
}
