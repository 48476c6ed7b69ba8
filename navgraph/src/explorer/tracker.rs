use crate::fingerprint::{ElementHash, ScreenHash};
use crate::models::FrameCheckpoint;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Remembers which elements were already activated on each screen.
#[derive(Debug, Default)]
pub struct ClickTracker {
    clicked: HashMap<ScreenHash, HashSet<ElementHash>>,
}

impl ClickTracker {
    /// Mark `element` as handled on `screen`. Returns false if it already was.
    pub fn mark(&mut self, screen: &ScreenHash, element: &ElementHash) -> bool {
        self.clicked
            .entry(screen.clone())
            .or_default()
            .insert(element.clone())
    }

    /// Forget an activation whose outcome was never observed.
    pub fn unmark(&mut self, screen: &ScreenHash, element: &ElementHash) {
        if let Some(set) = self.clicked.get_mut(screen) {
            set.remove(element);
        }
    }

    pub fn is_clicked(&self, screen: &ScreenHash, element: &ElementHash) -> bool {
        self.clicked
            .get(screen)
            .is_some_and(|set| set.contains(element))
    }

    pub fn clicked_on(&self, screen: &ScreenHash) -> usize {
        self.clicked.get(screen).map_or(0, HashSet::len)
    }

    pub fn snapshot(&self) -> BTreeMap<ScreenHash, BTreeSet<ElementHash>> {
        self.clicked
            .iter()
            .map(|(screen, set)| (screen.clone(), set.iter().cloned().collect()))
            .collect()
    }

    pub fn restore(snapshot: &BTreeMap<ScreenHash, BTreeSet<ElementHash>>) -> Self {
        Self {
            clicked: snapshot
                .iter()
                .map(|(screen, set)| (screen.clone(), set.iter().cloned().collect()))
                .collect(),
        }
    }
}

/// One level of the depth-first walk.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Hash the screen had when first entered
    pub screen: ScreenHash,
    /// Other hashes this screen may show after in-place growth or scrolling
    pub variants: HashSet<ScreenHash>,
    /// Every element hash seen on any variant
    pub known_elements: HashSet<ElementHash>,
    pub depth: usize,
    /// Element on the parent frame that leads here
    pub via: Option<ElementHash>,
    pub scrolls: usize,
    pub scroll_exhausted: bool,
    /// Time spent on this screen before its current stint, excluding children
    spent: Duration,
    resumed_at: Instant,
    suspended: bool,
}

impl Frame {
    pub fn new(
        screen: ScreenHash,
        elements: impl IntoIterator<Item = ElementHash>,
        depth: usize,
        via: Option<ElementHash>,
    ) -> Self {
        Self {
            screen,
            variants: HashSet::new(),
            known_elements: elements.into_iter().collect(),
            depth,
            via,
            scrolls: 0,
            scroll_exhausted: false,
            spent: Duration::ZERO,
            resumed_at: Instant::now(),
            suspended: false,
        }
    }

    /// Stop the clock while a child screen is explored.
    pub fn suspend(&mut self) {
        if !self.suspended {
            self.spent += self.resumed_at.elapsed();
            self.suspended = true;
        }
    }

    pub fn resume(&mut self) {
        self.resumed_at = Instant::now();
        self.suspended = false;
    }

    /// Time spent on this screen itself, not counting descendants.
    pub fn time_on_screen(&self) -> Duration {
        if self.suspended {
            self.spent
        } else {
            self.spent + self.resumed_at.elapsed()
        }
    }

    pub fn checkpoint(&self) -> FrameCheckpoint {
        FrameCheckpoint {
            screen: self.screen.clone(),
            variants: self.variants.iter().cloned().collect(),
            known_elements: self.known_elements.iter().cloned().collect(),
            depth: self.depth,
            via: self.via.clone(),
            scrolls: self.scrolls,
            scroll_exhausted: self.scroll_exhausted,
            time_on_screen_ms: u64::try_from(self.time_on_screen().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Rebuild a saved frame, suspended, with its clock at the saved time
    /// on screen.
    pub fn restore(saved: &FrameCheckpoint) -> Self {
        Self {
            screen: saved.screen.clone(),
            variants: saved.variants.iter().cloned().collect(),
            known_elements: saved.known_elements.iter().cloned().collect(),
            depth: saved.depth,
            via: saved.via.clone(),
            scrolls: saved.scrolls,
            scroll_exhausted: saved.scroll_exhausted,
            spent: Duration::from_millis(saved.time_on_screen_ms),
            resumed_at: Instant::now(),
            suspended: true,
        }
    }

    pub fn accepts(&self, hash: &ScreenHash) -> bool {
        &self.screen == hash || self.variants.contains(hash)
    }

    /// Record `hash` as another face of this screen. Returns the element
    /// hashes that were not known before.
    pub fn absorb<'a>(
        &mut self,
        hash: &ScreenHash,
        elements: impl IntoIterator<Item = &'a ElementHash>,
    ) -> Vec<ElementHash> {
        if hash != &self.screen {
            self.variants.insert(hash.clone());
        }
        elements
            .into_iter()
            .filter(|e| self.known_elements.insert((*e).clone()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_marks_once_per_screen() {
        let mut tracker = ClickTracker::default();
        let home = ScreenHash::from("home");
        let other = ScreenHash::from("other");
        let button = ElementHash::from("button");

        assert!(tracker.mark(&home, &button));
        assert!(!tracker.mark(&home, &button));
        assert!(tracker.is_clicked(&home, &button));
        assert!(!tracker.is_clicked(&other, &button));
        assert_eq!(tracker.clicked_on(&home), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_absorbs_variants() {
        let a = ElementHash::from("a");
        let b = ElementHash::from("b");
        let mut frame = Frame::new(ScreenHash::from("s0"), [a.clone()], 0, None);

        let grown = ScreenHash::from("s1");
        assert!(!frame.accepts(&grown));
        let new = frame.absorb(&grown, [&a, &b]);
        assert_eq!(new, vec![b]);
        assert!(frame.accepts(&grown));
        assert!(frame.accepts(&ScreenHash::from("s0")));
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_round_trip_keeps_the_clock() {
        let mut frame = Frame::new(ScreenHash::from("s0"), [ElementHash::from("a")], 2, None);
        frame.absorb(&ScreenHash::from("s1"), [&ElementHash::from("b")]);
        frame.scrolls = 1;
        tokio::time::advance(Duration::from_secs(4)).await;
        frame.suspend();
        tokio::time::advance(Duration::from_secs(60)).await;

        let saved = frame.checkpoint();
        assert_eq!(saved.time_on_screen_ms, 4000);

        let mut restored = Frame::restore(&saved);
        assert!(restored.accepts(&ScreenHash::from("s1")));
        assert_eq!(restored.known_elements.len(), 2);
        assert_eq!(restored.depth, 2);
        assert_eq!(restored.scrolls, 1);
        tokio::time::advance(Duration::from_secs(10)).await;
        restored.resume();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(restored.time_on_screen(), Duration::from_secs(5));
    }

    #[test]
    fn tracker_snapshot_restores_marks() {
        let mut tracker = ClickTracker::default();
        let home = ScreenHash::from("home");
        tracker.mark(&home, &ElementHash::from("a"));
        tracker.mark(&home, &ElementHash::from("b"));
        tracker.unmark(&home, &ElementHash::from("b"));

        let restored = ClickTracker::restore(&tracker.snapshot());
        assert!(restored.is_clicked(&home, &ElementHash::from("a")));
        assert!(!restored.is_clicked(&home, &ElementHash::from("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn time_on_screen_excludes_children() {
        let mut frame = Frame::new(ScreenHash::from("s0"), Vec::new(), 0, None);
        tokio::time::advance(Duration::from_secs(2)).await;
        frame.suspend();
        tokio::time::advance(Duration::from_secs(30)).await;
        frame.resume();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(frame.time_on_screen(), Duration::from_secs(3));
    }
}
