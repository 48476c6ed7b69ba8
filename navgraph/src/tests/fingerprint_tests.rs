//! Tests for element and screen fingerprints

use crate::element::{Bounds, UIElementAttributes};
use crate::fingerprint::{FingerprintPolicy, StateFingerprinter};
use crate::tree::{UINode, UiTree};

fn row(id: &str, text: &str, top: i32) -> UINode {
    UINode::new(
        id,
        UIElementAttributes {
            role: "TextView".to_string(),
            text: Some(text.to_string()),
            bounds: Bounds::new(0, top, 1080, top + 100),
            clickable: true,
            ..Default::default()
        },
    )
}

fn list_screen(rows: Vec<UINode>) -> UiTree {
    UiTree {
        window_id: 1,
        app_id: "com.example.mail".to_string(),
        surface_label: "InboxActivity".to_string(),
        root: UINode::new(
            "root",
            UIElementAttributes {
                role: "FrameLayout".to_string(),
                ..Default::default()
            },
        )
        .with_children(vec![UINode::new(
            "list",
            UIElementAttributes {
                role: "RecyclerView".to_string(),
                scrollable: true,
                ..Default::default()
            },
        )
        .with_children(rows)]),
    }
}

#[test]
fn screen_hash_is_stable_across_fingerprinters_and_handles() {
    let first = list_screen(vec![row("a1", "Alice", 100), row("a2", "Bob", 200)]);
    // Same content, different engine handles and geometry
    let second = list_screen(vec![row("zz", "Alice", 300), row("yy", "Bob", 420)]);

    for policy in [
        FingerprintPolicy::ContextFree,
        FingerprintPolicy::AncestorContext { depth: 2 },
    ] {
        let a = StateFingerprinter::new(policy).tree_hash(&first);
        let b = StateFingerprinter::new(policy).tree_hash(&second);
        assert_eq!(a, b, "policy {policy:?}");
        assert_eq!(a.as_str().len(), 32);
    }
}

#[test]
fn text_is_normalized_before_hashing() {
    let plain = list_screen(vec![row("a", "Inbox", 100)]);
    let noisy = list_screen(vec![row("a", "  INBOX\u{200B} ", 100)]);
    let fingerprinter = StateFingerprinter::default();
    assert_eq!(fingerprinter.tree_hash(&plain), fingerprinter.tree_hash(&noisy));
}

#[test]
fn surface_label_distinguishes_identical_content() {
    let inbox = list_screen(vec![row("a", "Alice", 100)]);
    let mut archive = inbox.clone();
    archive.surface_label = "ArchiveActivity".to_string();
    let fingerprinter = StateFingerprinter::default();
    assert_ne!(fingerprinter.tree_hash(&inbox), fingerprinter.tree_hash(&archive));
}

#[test]
fn context_free_collapses_repeated_rows() {
    let tree = list_screen(vec![row("a", "Reply", 100), row("b", "Reply", 200)]);
    let elements = tree.flatten();
    let rows: Vec<_> = elements.iter().filter(|e| e.role() == "TextView").collect();
    assert_eq!(rows.len(), 2);

    let context_free = StateFingerprinter::new(FingerprintPolicy::ContextFree);
    assert_eq!(
        context_free.element_hash(rows[0]),
        context_free.element_hash(rows[1])
    );

    let contextual = StateFingerprinter::new(FingerprintPolicy::AncestorContext { depth: 2 });
    assert_ne!(
        contextual.element_hash(rows[0]),
        contextual.element_hash(rows[1])
    );
}

#[test]
fn ancestor_context_sees_the_enclosing_container() {
    let in_list = list_screen(vec![row("a", "Compose", 100)]);
    let mut in_toolbar = in_list.clone();
    in_toolbar.root.children[0].attributes.role = "Toolbar".to_string();

    let pick = |tree: &UiTree| {
        tree.flatten()
            .into_iter()
            .find(|e| e.role() == "TextView")
            .expect("row")
    };

    let contextual = StateFingerprinter::default();
    assert_ne!(
        contextual.element_hash(&pick(&in_list)),
        contextual.element_hash(&pick(&in_toolbar))
    );

    let context_free = StateFingerprinter::new(FingerprintPolicy::ContextFree);
    assert_eq!(
        context_free.element_hash(&pick(&in_list)),
        context_free.element_hash(&pick(&in_toolbar))
    );
}

#[test]
fn element_order_does_not_change_screen_hash() {
    let tree = list_screen(vec![row("a", "Alice", 100), row("b", "Bob", 200)]);
    let fingerprinter = StateFingerprinter::new(FingerprintPolicy::ContextFree);
    let mut elements = tree.flatten();
    let forward = fingerprinter.screen_hash(&tree.surface_label, &elements);
    elements.reverse();
    let backward = fingerprinter.screen_hash(&tree.surface_label, &elements);
    assert_eq!(forward, backward);
}
