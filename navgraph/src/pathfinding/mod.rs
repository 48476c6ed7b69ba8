//! Shortest-path queries over the navigation graph.

use crate::errors::StorageError;
use crate::fingerprint::ScreenHash;
use crate::models::{EdgeKey, NavigationEdge, PathStep};
use crate::store::NavigationGraphStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

mod intent;

pub use intent::{IntentMatcher, ScreenType};

/// Extra cost factor applied per recorded failure of an edge.
const FAILURE_PENALTY: f64 = 1.0;

/// Where a path should lead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// A concrete screen
    Screen(ScreenHash),
    /// Any screen whose type the keyword resolves to, e.g. "settings"
    Keyword(String),
}

impl Target {
    fn cache_key(&self) -> String {
        match self {
            Target::Screen(hash) => format!("screen:{hash}"),
            Target::Keyword(keyword) => format!("keyword:{}", crate::utils::normalize(keyword)),
        }
    }
}

/// Success/failure history of one cached path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathReliability {
    pub successes: u64,
    pub failures: u64,
}

impl PathReliability {
    pub fn is_reliable(&self) -> bool {
        self.failures <= self.successes
    }
}

#[derive(Debug, Clone)]
struct CachedPath {
    steps: Vec<PathStep>,
    edges: Vec<EdgeKey>,
    reliability: PathReliability,
}

#[derive(Default)]
struct PathCache {
    paths: HashMap<(ScreenHash, String), CachedPath>,
    edge_failures: HashMap<EdgeKey, u64>,
}

#[derive(Debug, Clone, PartialEq)]
struct HeapEntry {
    cost: f64,
    hops: usize,
    screen: ScreenHash,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost, then hops, then hash for a deterministic order
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.screen.cmp(&self.screen))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Weighted shortest-path search with an intent matcher and a path cache.
///
/// Edge weight is `1 / traversal_count`, so well-trodden transitions are
/// preferred. Failures reported through [`record_outcome`](Self::record_outcome)
/// raise the cost of the edges involved for later searches; the stored
/// graph itself is never modified.
pub struct PathfindingService {
    store: Arc<NavigationGraphStore>,
    intents: IntentMatcher,
    cache: Mutex<PathCache>,
}

impl PathfindingService {
    pub fn new(store: Arc<NavigationGraphStore>) -> Self {
        Self {
            store,
            intents: IntentMatcher::new(),
            cache: Mutex::new(PathCache::default()),
        }
    }

    pub fn intents(&self) -> &IntentMatcher {
        &self.intents
    }

    /// Find the cheapest step sequence from `from` to `target`.
    ///
    /// Returns `Ok(Some(vec![]))` when `from` already satisfies the target
    /// and `Ok(None)` when nothing reachable does.
    #[instrument(skip(self), fields(from = %from))]
    pub async fn find_path(
        &self,
        from: &ScreenHash,
        target: &Target,
    ) -> Result<Option<Vec<PathStep>>, StorageError> {
        let cache_key = (from.clone(), target.cache_key());

        let (penalties, stale) = {
            let cache = self.lock_cache();
            if let Some(cached) = cache.paths.get(&cache_key) {
                if cached.reliability.is_reliable() {
                    debug!(steps = cached.steps.len(), "Path cache hit");
                    return Ok(Some(cached.steps.clone()));
                }
            }
            let stale = cache.paths.contains_key(&cache_key);
            (cache.edge_failures.clone(), stale)
        };
        if stale {
            info!("Cached path proved unreliable, recomputing with penalties");
        }

        let destinations = match self.destinations(from, target).await? {
            Some(d) => d,
            None => return Ok(None),
        };

        let edges = match self.dijkstra(from, &destinations, &penalties).await? {
            Some(edges) => edges,
            None => {
                debug!("No path found");
                self.lock_cache().paths.remove(&cache_key);
                return Ok(None);
            }
        };

        let mut steps = Vec::with_capacity(edges.len());
        for edge in &edges {
            let label = self
                .store
                .get_element(&edge.trigger)
                .await?
                .map(|e| e.label_hint())
                .unwrap_or_else(|| edge.trigger.to_string());
            steps.push(PathStep {
                screen_hash: edge.from.clone(),
                element_hash: edge.trigger.clone(),
                element_label_hint: label,
            });
        }

        info!(steps = steps.len(), "Path found");
        self.lock_cache().paths.insert(
            cache_key,
            CachedPath {
                steps: steps.clone(),
                edges: edges.iter().map(NavigationEdge::key).collect(),
                reliability: PathReliability::default(),
            },
        );
        Ok(Some(steps))
    }

    /// Report whether replaying the cached path for `(from, target)` worked.
    pub fn record_outcome(&self, from: &ScreenHash, target: &Target, succeeded: bool) {
        let mut cache = self.lock_cache();
        let key = (from.clone(), target.cache_key());
        let Some(cached) = cache.paths.get_mut(&key) else {
            warn!(from = %from, "Outcome reported for a path that is not cached");
            return;
        };

        if succeeded {
            cached.reliability.successes += 1;
            return;
        }

        cached.reliability.failures += 1;
        let edges = cached.edges.clone();
        for edge in edges {
            *cache.edge_failures.entry(edge).or_insert(0) += 1;
        }
    }

    pub fn reliability(&self, from: &ScreenHash, target: &Target) -> Option<PathReliability> {
        self.lock_cache()
            .paths
            .get(&(from.clone(), target.cache_key()))
            .map(|c| c.reliability)
    }

    pub fn clear_cache(&self) {
        let mut cache = self.lock_cache();
        cache.paths.clear();
        cache.edge_failures.clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, PathCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn destinations(
        &self,
        from: &ScreenHash,
        target: &Target,
    ) -> Result<Option<HashSet<ScreenHash>>, StorageError> {
        match target {
            Target::Screen(hash) => Ok(Some(HashSet::from([hash.clone()]))),
            Target::Keyword(keyword) => {
                let Some(screen_type) = self.intents.resolve(keyword) else {
                    debug!(keyword, "Keyword matches no screen type");
                    return Ok(None);
                };
                let Some(origin) = self.store.get_screen(from).await? else {
                    return Ok(None);
                };
                let matching: HashSet<ScreenHash> = self
                    .store
                    .screens_for_app(&origin.app_id)
                    .await?
                    .into_iter()
                    .filter(|s| s.screen_type == screen_type)
                    .map(|s| s.hash)
                    .collect();
                debug!(?screen_type, candidates = matching.len(), "Resolved keyword target");
                Ok((!matching.is_empty()).then_some(matching))
            }
        }
    }

    async fn dijkstra(
        &self,
        from: &ScreenHash,
        destinations: &HashSet<ScreenHash>,
        penalties: &HashMap<EdgeKey, u64>,
    ) -> Result<Option<Vec<NavigationEdge>>, StorageError> {
        let mut dist: HashMap<ScreenHash, f64> = HashMap::from([(from.clone(), 0.0)]);
        let mut prev: HashMap<ScreenHash, NavigationEdge> = HashMap::new();
        let mut visited: HashSet<ScreenHash> = HashSet::new();
        let mut heap = BinaryHeap::from([HeapEntry {
            cost: 0.0,
            hops: 0,
            screen: from.clone(),
        }]);

        while let Some(HeapEntry { cost, hops, screen }) = heap.pop() {
            if !visited.insert(screen.clone()) {
                continue;
            }

            if destinations.contains(&screen) {
                return Ok(Some(unwind(from, &screen, &mut prev)));
            }

            for edge in self.store.edges_from(&screen).await? {
                if visited.contains(&edge.to) {
                    continue;
                }
                let failures = penalties.get(&edge.key()).copied().unwrap_or(0);
                let next = cost + edge_weight(&edge, failures);
                let better = dist.get(&edge.to).map_or(true, |&known| next < known);
                if better {
                    dist.insert(edge.to.clone(), next);
                    heap.push(HeapEntry {
                        cost: next,
                        hops: hops + 1,
                        screen: edge.to.clone(),
                    });
                    prev.insert(edge.to.clone(), edge);
                }
            }
        }

        Ok(None)
    }
}

/// `1 / traversal_count`, scaled up by recorded failures.
pub fn edge_weight(edge: &NavigationEdge, failures: u64) -> f64 {
    let base = 1.0 / edge.traversal_count.max(1) as f64;
    base * (1.0 + FAILURE_PENALTY * failures as f64)
}

fn unwind(
    from: &ScreenHash,
    to: &ScreenHash,
    prev: &mut HashMap<ScreenHash, NavigationEdge>,
) -> Vec<NavigationEdge> {
    let mut edges = Vec::new();
    let mut current = to.clone();
    while &current != from {
        let Some(edge) = prev.remove(&current) else {
            break;
        };
        current = edge.from.clone();
        edges.push(edge);
    }
    edges.reverse();
    edges
}
