//! Tests for the expandable-control heuristics

use crate::element::{UIElement, UIElementAttributes};
use crate::expandable::{ExpandableControlClassifier, ExpansionClassification, ExpansionKind};

fn element(attributes: UIElementAttributes) -> UIElement {
    UIElement {
        handle: "screen/x".to_string(),
        window_id: 1,
        app_id: "com.example".to_string(),
        attributes,
        depth: 1,
        ancestor_roles: vec!["FrameLayout".to_string()],
        twin_index: 0,
    }
}

fn classify(attributes: UIElementAttributes) -> ExpansionClassification {
    ExpandableControlClassifier::new().classify(&element(attributes))
}

#[test]
fn selector_type_wins_regardless_of_text() {
    let result = classify(UIElementAttributes {
        role: "android.widget.Spinner".to_string(),
        text: Some("☰".to_string()),
        description: Some("open navigation drawer".to_string()),
        resource_id: Some("com.example:id/expand_all".to_string()),
        ..Default::default()
    });
    assert_eq!(
        result,
        ExpansionClassification {
            is_expandable: true,
            kind: ExpansionKind::Overlay,
            confidence: 0.95,
        }
    );
}

#[test]
fn hamburger_glyph_alone_is_low_confidence_navigation() {
    let result = classify(UIElementAttributes {
        role: "ImageButton".to_string(),
        text: Some(" ☰ ".to_string()),
        ..Default::default()
    });
    assert_eq!(
        result,
        ExpansionClassification {
            is_expandable: true,
            kind: ExpansionKind::Navigation,
            confidence: 0.65,
        }
    );
}

#[test]
fn resource_id_rules_apply_in_order() {
    let drawer = classify(UIElementAttributes {
        role: "ImageButton".to_string(),
        resource_id: Some("com.example:id/nav_drawer_menu".to_string()),
        ..Default::default()
    });
    assert_eq!(drawer.kind, ExpansionKind::Navigation);
    assert_eq!(drawer.confidence, 0.85);

    let overflow = classify(UIElementAttributes {
        role: "ImageButton".to_string(),
        resource_id: Some("com.example:id/overflow_button".to_string()),
        ..Default::default()
    });
    assert_eq!(overflow.kind, ExpansionKind::Overlay);

    let section = classify(UIElementAttributes {
        role: "LinearLayout".to_string(),
        resource_id: Some("com.example:id/expand_details".to_string()),
        ..Default::default()
    });
    assert_eq!(section.kind, ExpansionKind::InPlace);
}

#[test]
fn description_beats_glyph() {
    let result = classify(UIElementAttributes {
        role: "ImageButton".to_string(),
        text: Some("⋮".to_string()),
        description: Some("More options".to_string()),
        ..Default::default()
    });
    assert_eq!(result.kind, ExpansionKind::Overlay);
    assert_eq!(result.confidence, 0.75);
}

#[test]
fn package_prefix_in_resource_id_is_ignored() {
    // "menu" appears only in the package name
    let result = classify(UIElementAttributes {
        role: "Button".to_string(),
        resource_id: Some("com.menuplanner:id/save".to_string()),
        text: Some("Save".to_string()),
        ..Default::default()
    });
    assert_eq!(result, ExpansionClassification::NOT_EXPANDABLE);
}

#[test]
fn plain_button_is_not_expandable() {
    let result = classify(UIElementAttributes {
        role: "Button".to_string(),
        text: Some("Settings".to_string()),
        clickable: true,
        ..Default::default()
    });
    assert!(!result.is_expandable);
    assert_eq!(result.kind, ExpansionKind::Unknown);
    assert_eq!(result.confidence, 0.0);
}
