//! Resolution of the device's home-screen launcher(s).

use crate::platforms::AccessibilityEngine;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Launchers shipped by the major device families. Used when the platform
/// refuses to say which applications handle the home intent.
pub static FALLBACK_LAUNCHERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // AOSP and Google
        "com.android.launcher",
        "com.android.launcher2",
        "com.android.launcher3",
        "com.google.android.apps.nexuslauncher",
        "com.google.android.launcher",
        // Samsung
        "com.sec.android.app.launcher",
        "com.sec.android.app.twlauncher",
        // Xiaomi / Redmi / POCO
        "com.miui.home",
        "com.mi.android.globallauncher",
        // Huawei / Honor
        "com.huawei.android.launcher",
        "com.hihonor.android.launcher",
        // OnePlus, Oppo, Realme
        "net.oneplus.launcher",
        "com.oppo.launcher",
        "com.android.launcher.oppo",
        // Vivo
        "com.bbk.launcher2",
        // Motorola, Lenovo
        "com.motorola.launcher3",
        "com.lenovo.launcher",
        // Sony, LG, HTC, Asus, Nokia
        "com.sonymobile.home",
        "com.lge.launcher2",
        "com.lge.launcher3",
        "com.htc.launcher",
        "com.asus.launcher",
        "com.hmdglobal.launcher3",
        // Popular third-party launchers
        "com.teslacoilsw.launcher",
        "com.microsoft.launcher",
        "ch.deletescape.lawnchair.plah",
        "app.lawnchair",
        "com.actionlauncher.playstore",
        "bitpit.launcher",
        "com.niagara.launcher",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone)]
struct LauncherSet {
    apps: HashSet<String>,
    degraded: bool,
}

/// Answers "is this application the home-screen launcher?".
///
/// The launcher set is resolved once from the platform and cached until
/// [`clear_cache`](Self::clear_cache). Construct one per process and share
/// it; tests build fresh instances.
pub struct LauncherDetector {
    engine: Arc<dyn AccessibilityEngine>,
    cache: RwLock<Option<LauncherSet>>,
}

impl LauncherDetector {
    pub fn new(engine: Arc<dyn AccessibilityEngine>) -> Self {
        Self {
            engine,
            cache: RwLock::new(None),
        }
    }

    /// Resolve and cache the launcher set. Never fails: when the platform
    /// query is denied the well-known fallback list is used instead.
    pub async fn init(&self) {
        if self.cache.read().await.is_some() {
            return;
        }

        let mut cache = self.cache.write().await;
        if cache.is_some() {
            return;
        }

        let resolved = match self.engine.home_handlers().await {
            Ok(handlers) if !handlers.is_empty() => {
                info!(count = handlers.len(), "Resolved home-screen launchers");
                LauncherSet {
                    apps: handlers.into_iter().collect(),
                    degraded: false,
                }
            }
            Ok(_) => {
                warn!("Platform reported no home-screen handlers; using fallback launcher list");
                Self::fallback()
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Launcher resolution failed; running in degraded mode with fallback launcher list"
                );
                Self::fallback()
            }
        };
        *cache = Some(resolved);
    }

    pub async fn is_launcher(&self, app_id: &str) -> bool {
        self.init().await;
        let cache = self.cache.read().await;
        let result = cache
            .as_ref()
            .map(|set| set.apps.contains(app_id))
            .unwrap_or_else(|| FALLBACK_LAUNCHERS.contains(app_id));
        debug!(app_id, result, "is_launcher");
        result
    }

    /// Whether the cached set came from the fallback list.
    pub async fn is_degraded(&self) -> bool {
        self.cache
            .read()
            .await
            .as_ref()
            .map(|set| set.degraded)
            .unwrap_or(false)
    }

    /// Drop the cached set; the next query resolves again.
    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
    }

    fn fallback() -> LauncherSet {
        LauncherSet {
            apps: FALLBACK_LAUNCHERS.iter().map(|s| s.to_string()).collect(),
            degraded: true,
        }
    }
}
