//! Tests for the navigation graph store on the in-memory backend

use crate::errors::StorageError;
use crate::fingerprint::{ElementHash, ScreenHash};
use crate::models::{
    ElementRecord, ExplorationSession, NavigationEdge, Provenance, ScreenState, SessionStatus,
};
use crate::store::{MemoryGraphStorage, NavigationGraphStore, WriteOutcome};
use crate::element::{UIElement, UIElementAttributes};
use crate::pathfinding::ScreenType;
use chrono::Utc;
use std::sync::Arc;

const APP: &str = "com.example.music";
const OTHER_APP: &str = "com.example.maps";

fn screen(hash: &str, app: &str, label: &str) -> ScreenState {
    ScreenState::new(
        ScreenHash::from(hash),
        app,
        label,
        2,
        Provenance::Exploration,
        Utc::now(),
    )
}

fn element(hash: &str, screen: &str, app: &str) -> ElementRecord {
    let ui = UIElement {
        handle: hash.to_string(),
        window_id: 1,
        app_id: app.to_string(),
        attributes: UIElementAttributes {
            role: "Button".to_string(),
            text: Some(format!("Open {hash}")),
            clickable: true,
            ..Default::default()
        },
        depth: 1,
        ancestor_roles: vec!["FrameLayout".to_string()],
        twin_index: 0,
    };
    ElementRecord::from_element(
        ElementHash::from(hash),
        ScreenHash::from(screen),
        &ui,
        Provenance::Exploration,
        Utc::now(),
    )
}

fn edge(from: &str, to: &str, trigger: &str, app: &str) -> NavigationEdge {
    NavigationEdge::new(
        ScreenHash::from(from),
        ScreenHash::from(to),
        ElementHash::from(trigger),
        app,
        "session-1",
        Utc::now(),
    )
}

#[tokio::test]
async fn reobserved_edges_only_increment() {
    let store = NavigationGraphStore::in_memory();
    store.upsert_screen(&screen("library", APP, "LibraryActivity")).await.unwrap();
    store.upsert_screen(&screen("player", APP, "PlayerActivity")).await.unwrap();
    store.upsert_element(&element("play", "library", APP)).await.unwrap();

    let e = edge("library", "player", "play", APP);
    assert_eq!(store.upsert_edge(&e).await.unwrap(), WriteOutcome::Inserted);
    for expected in 2..=4 {
        // A fresh row with count 1 never resets the stored count
        assert_eq!(store.upsert_edge(&e).await.unwrap(), WriteOutcome::Updated);
        let stored = store.get_edge(&e.key()).await.unwrap().unwrap();
        assert_eq!(stored.traversal_count, expected);
    }
    assert_eq!(store.write_stats().edges_inserted, 1);
}

#[tokio::test]
async fn writes_referencing_missing_parents_are_rejected() {
    let store = NavigationGraphStore::in_memory();
    store.upsert_screen(&screen("library", APP, "LibraryActivity")).await.unwrap();

    let orphan_element = element("ghost", "nowhere", APP);
    assert_eq!(
        store.upsert_element(&orphan_element).await.unwrap(),
        WriteOutcome::Rejected
    );
    assert!(store.get_element(&orphan_element.hash).await.unwrap().is_none());

    let dangling = edge("library", "nowhere", "ghost", APP);
    assert_eq!(store.upsert_edge(&dangling).await.unwrap(), WriteOutcome::Rejected);
    assert!(store.get_edge(&dangling.key()).await.unwrap().is_none());
    assert_eq!(store.write_stats().rejected, 2);
}

#[tokio::test]
async fn screen_upsert_counts_visits_and_infers_type() {
    let store = NavigationGraphStore::in_memory();
    let first = screen("prefs", APP, "com.example.music.SettingsActivity");
    assert_eq!(first.screen_type, ScreenType::Settings);

    assert_eq!(store.upsert_screen(&first).await.unwrap(), WriteOutcome::Inserted);
    assert_eq!(store.upsert_screen(&first).await.unwrap(), WriteOutcome::Updated);
    let stored = store.get_screen(&first.hash).await.unwrap().unwrap();
    assert_eq!(stored.visit_count, 2);
    assert_eq!(stored.first_seen, first.first_seen);
}

#[tokio::test]
async fn edges_are_queryable_in_both_directions() {
    let store = NavigationGraphStore::in_memory();
    for (hash, label) in [("a", "HomeActivity"), ("b", "SearchActivity"), ("c", "PlayerActivity")] {
        store.upsert_screen(&screen(hash, APP, label)).await.unwrap();
    }
    store.upsert_edge(&edge("a", "b", "t1", APP)).await.unwrap();
    store.upsert_edge(&edge("a", "c", "t2", APP)).await.unwrap();
    store.upsert_edge(&edge("b", "c", "t3", APP)).await.unwrap();

    assert_eq!(store.edges_from(&ScreenHash::from("a")).await.unwrap().len(), 2);
    assert_eq!(store.edges_to(&ScreenHash::from("c")).await.unwrap().len(), 2);
    assert!(store.edges_to(&ScreenHash::from("a")).await.unwrap().is_empty());
    assert_eq!(store.edges_for_app(APP).await.unwrap().len(), 3);
}

#[tokio::test]
async fn purge_cascades_and_spares_other_apps() {
    let store = NavigationGraphStore::in_memory();
    store.insert_session(&ExplorationSession::start(APP, Utc::now())).await.unwrap();
    store.upsert_screen(&screen("a", APP, "HomeActivity")).await.unwrap();
    store.upsert_screen(&screen("b", APP, "PlayerActivity")).await.unwrap();
    store.upsert_element(&element("go", "a", APP)).await.unwrap();
    store.upsert_edge(&edge("a", "b", "go", APP)).await.unwrap();

    store.upsert_screen(&screen("m", OTHER_APP, "MapActivity")).await.unwrap();
    store.upsert_element(&element("zoom", "m", OTHER_APP)).await.unwrap();

    let counts = store.delete_application_data(APP).await.unwrap();
    assert_eq!(counts.sessions, 1);
    assert_eq!(counts.screens, 2);
    assert_eq!(counts.elements, 1);
    assert_eq!(counts.edges, 1);

    assert!(store.screens_for_app(APP).await.unwrap().is_empty());
    assert!(store.edges_for_app(APP).await.unwrap().is_empty());
    assert!(store.sessions_for_app(APP).await.unwrap().is_empty());
    assert_eq!(store.screens_for_app(OTHER_APP).await.unwrap().len(), 1);
    assert!(store
        .get_element(&ElementHash::from("zoom"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn session_rows_round_trip_through_updates() {
    let store = NavigationGraphStore::in_memory();
    let mut session = ExplorationSession::start(APP, Utc::now());
    store.insert_session(&session).await.unwrap();

    session.status = SessionStatus::Completed;
    session.screens_explored = 4;
    session.completeness = Some(1.0);
    session.ended_at = Some(Utc::now());
    store.update_session(&session).await.unwrap();

    let summary = store.session_summary(&session.id).await.unwrap().unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.screens_explored, 4);
    assert_eq!(summary.application_id, APP);
    assert!(store.session_summary("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn unavailable_backend_is_fatal() {
    let backend = Arc::new(MemoryGraphStorage::new());
    let store = NavigationGraphStore::new(backend.clone());
    backend.set_unavailable(true);

    let err = store
        .upsert_screen(&screen("a", APP, "HomeActivity"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(err.is_fatal());

    backend.set_unavailable(false);
    assert!(store.upsert_screen(&screen("a", APP, "HomeActivity")).await.is_ok());
}
