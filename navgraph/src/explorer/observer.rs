use crate::dedup::{ElementDeduplicationCache, Residency};
use crate::errors::ExplorerError;
use crate::expandable::ExpandableControlClassifier;
use crate::fingerprint::{FingerprintPolicy, ScreenHash, StateFingerprinter};
use crate::launcher::LauncherDetector;
use crate::models::{ElementRecord, Provenance, ScreenState};
use crate::platforms::AccessibilityEngine;
use crate::store::{NavigationGraphStore, WriteOutcome};
use crate::tree::reading_order;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of recording one screen the user was looking at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedScreen {
    pub hash: ScreenHash,
    pub app_id: String,
    pub new_screen: bool,
    pub new_elements: usize,
}

/// Records screens and elements while a person drives the UI.
///
/// Never acts on the UI. Everything it writes is tagged
/// [`Provenance::Incidental`].
pub struct PassiveObserver {
    engine: Arc<dyn AccessibilityEngine>,
    store: Arc<NavigationGraphStore>,
    dedup: Arc<ElementDeduplicationCache>,
    launchers: Arc<LauncherDetector>,
    fingerprinter: StateFingerprinter,
    classifier: ExpandableControlClassifier,
}

impl PassiveObserver {
    pub fn new(
        engine: Arc<dyn AccessibilityEngine>,
        store: Arc<NavigationGraphStore>,
        dedup: Arc<ElementDeduplicationCache>,
        launchers: Arc<LauncherDetector>,
        policy: FingerprintPolicy,
    ) -> Self {
        Self {
            engine,
            store,
            dedup,
            launchers,
            fingerprinter: StateFingerprinter::new(policy),
            classifier: ExpandableControlClassifier::new(),
        }
    }

    /// Fingerprint and record the current foreground screen.
    ///
    /// Returns `None` for home-screen launchers, which are never recorded.
    pub async fn observe_current(&self) -> Result<Option<ObservedScreen>, ExplorerError> {
        let tree = self.engine.current_tree().await?;
        if self.launchers.is_launcher(&tree.app_id).await {
            debug!(app_id = %tree.app_id, "Skipping launcher screen");
            return Ok(None);
        }

        let mut elements = tree.flatten();
        reading_order(&mut elements);
        let hashes: Vec<_> = elements
            .iter()
            .map(|e| self.fingerprinter.element_hash(e))
            .collect();
        let mut sorted = hashes.clone();
        let hash = self
            .fingerprinter
            .screen_hash_from_element_hashes(&tree.surface_label, &mut sorted);

        let now = Utc::now();
        let screen = ScreenState::new(
            hash.clone(),
            tree.app_id.clone(),
            tree.surface_label.clone(),
            elements.len(),
            Provenance::Incidental,
            now,
        );
        let new_screen = self.store.upsert_screen(&screen).await? == WriteOutcome::Inserted;

        let mut new_elements = 0;
        for (element, element_hash) in elements.iter().zip(hashes) {
            let record = ElementRecord::from_element(
                element_hash,
                hash.clone(),
                element,
                Provenance::Incidental,
                now,
            )
            .with_expansion(self.classifier.classify(element));
            if self.dedup.register_or_touch(record, Residency::Screen).await? {
                new_elements += 1;
            }
        }

        if new_screen || new_elements > 0 {
            info!(
                screen_hash = %hash,
                app_id = %tree.app_id,
                new_screen,
                new_elements,
                "Observed screen"
            );
        }
        Ok(Some(ObservedScreen {
            hash,
            app_id: tree.app_id,
            new_screen,
            new_elements,
        }))
    }

    /// Observe on every window change until cancelled. Returns the number of
    /// screens recorded.
    pub async fn run(&self, cancel: CancellationToken) -> Result<usize, ExplorerError> {
        let mut events = self.engine.subscribe();
        let mut observed = 0;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
            match self.observe_current().await {
                Ok(Some(_)) => observed += 1,
                Ok(None) => {}
                Err(ExplorerError::Storage(e)) if e.is_fatal() => {
                    return Err(ExplorerError::Storage(e))
                }
                Err(e) => warn!(error = %e, "Passive observation failed"),
            }
        }
        info!(observed, "Passive observer stopped");
        Ok(observed)
    }
}
