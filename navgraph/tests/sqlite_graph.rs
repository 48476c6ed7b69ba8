use chrono::Utc;
use navgraph::platforms::scripted::{AppModel, ElementModel, ScreenModel, ScriptedEngine};
use navgraph::store::{SqliteGraphStorage, WriteOutcome};
use navgraph::{
    AccessibilityEngine, ElementHash, ElementRecord, ExplorationConfig, ExplorationEngine,
    ExplorationSession, FrameCheckpoint, LauncherDetector, NavigationEdge, NavigationGraphStore,
    Provenance, ScreenHash, ScreenState, ScreenType, SessionCheckpoint, SessionStatus, UIElement,
    UIElementAttributes,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const APP: &str = "com.example.weather";

fn screen(hash: &str, label: &str) -> ScreenState {
    ScreenState::new(ScreenHash::from(hash), APP, label, 4, Provenance::Exploration, Utc::now())
}

fn trigger(hash: &str, on: &str) -> ElementRecord {
    let element = UIElement {
        handle: hash.to_string(),
        window_id: 1,
        app_id: APP.to_string(),
        attributes: UIElementAttributes {
            role: "Button".to_string(),
            text: Some(hash.to_string()),
            resource_id: Some(format!("{APP}:id/{hash}")),
            clickable: true,
            ..Default::default()
        },
        depth: 2,
        ancestor_roles: vec!["LinearLayout".to_string(), "FrameLayout".to_string()],
        twin_index: 1,
    };
    ElementRecord::from_element(
        ElementHash::from(hash),
        ScreenHash::from(on),
        &element,
        Provenance::Exploration,
        Utc::now(),
    )
}

#[tokio::test]
async fn graph_survives_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.db");

    {
        let store = NavigationGraphStore::open_sqlite(&path).unwrap();
        store
            .upsert_screen(&screen("today", "com.example.weather.TodayActivity"))
            .await
            .unwrap();
        store
            .upsert_screen(&screen("prefs", "com.example.weather.SettingsActivity"))
            .await
            .unwrap();
        store.upsert_element(&trigger("gear", "today")).await.unwrap();
        let edge = NavigationEdge::new(
            ScreenHash::from("today"),
            ScreenHash::from("prefs"),
            ElementHash::from("gear"),
            APP,
            "s1",
            Utc::now(),
        );
        assert_eq!(store.upsert_edge(&edge).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.upsert_edge(&edge).await.unwrap(), WriteOutcome::Updated);
    }

    let store = NavigationGraphStore::open_sqlite(&path).unwrap();
    let prefs = store
        .get_screen(&ScreenHash::from("prefs"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prefs.screen_type, ScreenType::Settings);

    let gear = store
        .get_element(&ElementHash::from("gear"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gear.resource_id.as_deref(), Some("com.example.weather:id/gear"));
    assert!(gear.capabilities.activatable);

    let edges = store.edges_from(&ScreenHash::from("today")).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].traversal_count, 2);
}

#[tokio::test]
async fn foreign_keys_reject_orphans_and_cascade_purges() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(SqliteGraphStorage::open(dir.path().join("graph.db")).unwrap());
    let store = NavigationGraphStore::new(backend.clone());

    assert_eq!(
        store.upsert_element(&trigger("ghost", "missing")).await.unwrap(),
        WriteOutcome::Rejected
    );

    let session = ExplorationSession::start(APP, Utc::now());
    store.insert_session(&session).await.unwrap();
    store
        .upsert_screen(&screen("today", "TodayActivity"))
        .await
        .unwrap();
    store
        .upsert_screen(&screen("week", "ForecastActivity"))
        .await
        .unwrap();
    store.upsert_element(&trigger("week_tab", "today")).await.unwrap();
    store
        .upsert_edge(&NavigationEdge::new(
            ScreenHash::from("today"),
            ScreenHash::from("week"),
            ElementHash::from("week_tab"),
            APP,
            session.id.clone(),
            Utc::now(),
        ))
        .await
        .unwrap();

    let counts = store.delete_application_data(APP).await.unwrap();
    assert_eq!(counts.sessions, 1);
    assert_eq!(counts.screens, 2);
    assert_eq!(counts.elements, 1);
    assert_eq!(counts.edges, 1);
    assert!(store.get_session(&session.id).await.unwrap().is_none());
    assert!(store
        .get_element(&ElementHash::from("week_tab"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn paused_walk_state_survives_reopening() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.db");

    let mut checkpoint = SessionCheckpoint::default();
    checkpoint
        .clicked
        .entry(ScreenHash::from("today"))
        .or_default()
        .insert(ElementHash::from("gear"));
    checkpoint.visited.insert(ScreenHash::from("today"));
    checkpoint.frames.push(FrameCheckpoint {
        screen: ScreenHash::from("today"),
        variants: [ScreenHash::from("today")].into_iter().collect(),
        known_elements: [ElementHash::from("gear")].into_iter().collect(),
        depth: 0,
        via: None,
        scrolls: 1,
        scroll_exhausted: false,
        time_on_screen_ms: 4_000,
    });

    let mut session = ExplorationSession::start(APP, Utc::now());
    {
        let store = NavigationGraphStore::open_sqlite(&path).unwrap();
        store.insert_session(&session).await.unwrap();
        assert!(store
            .get_session(&session.id)
            .await
            .unwrap()
            .unwrap()
            .checkpoint
            .is_none());

        session.status = SessionStatus::Paused;
        session.ended_at = Some(Utc::now());
        session.checkpoint = Some(checkpoint.clone());
        store.update_session(&session).await.unwrap();
    }

    let store = NavigationGraphStore::open_sqlite(&path).unwrap();
    let mut reopened = store.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(reopened.status, SessionStatus::Paused);
    assert_eq!(reopened.checkpoint.as_ref(), Some(&checkpoint));

    reopened.status = SessionStatus::Completed;
    reopened.checkpoint = None;
    store.update_session(&reopened).await.unwrap();
    let cleared = store.get_session(&session.id).await.unwrap().unwrap();
    assert!(cleared.checkpoint.is_none());
}

fn weather_app() -> AppModel {
    AppModel::new(APP, "today")
        .screen(
            ScreenModel::new("today", "com.example.weather.TodayActivity")
                .element(ElementModel::label("temp", "21°"))
                .element(ElementModel::button("week_tab", "This week").navigates_to("week")),
        )
        .screen(
            ScreenModel::new("week", "com.example.weather.ForecastActivity")
                .element(ElementModel::label("mon", "Monday")),
        )
}

#[tokio::test]
async fn exploration_persists_to_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(NavigationGraphStore::open_sqlite(dir.path().join("graph.db")).unwrap());
    let engine: Arc<dyn AccessibilityEngine> = ScriptedEngine::new(weather_app());
    let launchers = Arc::new(LauncherDetector::new(engine.clone()));
    let config = ExplorationConfig {
        per_element_timeout_ms: 200,
        settle_quiet_ms: 20,
        expansion_settle_ms: 20,
        ..Default::default()
    };
    let explorer = ExplorationEngine::new(engine, store.clone(), launchers, config).unwrap();

    let summary = explorer
        .explore(APP, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.screens_explored, 2);
    assert_eq!(summary.edges_discovered, 1);

    let sessions = store.sessions_for_app(APP).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Completed);
    assert!(sessions[0].ended_at.is_some());
    assert_eq!(store.screens_for_app(APP).await.unwrap().len(), 2);
    assert!(store
        .edges_for_app(APP)
        .await
        .unwrap()
        .iter()
        .all(|e| e.session_id == summary.session_id));
}
