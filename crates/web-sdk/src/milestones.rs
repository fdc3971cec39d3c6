//! Scroll-depth milestones: turns a continuous scroll position into
//! discrete threshold crossings, each reported at most once per page view.

use std::collections::BTreeSet;

/// Tracks which configured thresholds have fired for the current page view.
#[derive(Debug, Clone)]
pub struct MilestoneTracker {
    thresholds: Vec<u8>,
    fired: BTreeSet<u8>,
}

impl MilestoneTracker {
    /// `thresholds` are sorted and deduplicated.
    pub fn new(mut thresholds: Vec<u8>) -> Self {
        thresholds.sort_unstable();
        thresholds.dedup();
        Self {
            thresholds,
            fired: BTreeSet::new(),
        }
    }

    /// Record a scroll position and return the thresholds crossed for the
    /// first time, in ascending order. Scrolling back up never un-fires.
    pub fn observe(&mut self, percent: u8) -> Vec<u8> {
        let mut crossed = Vec::new();
        for &threshold in self.thresholds.iter().take_while(|t| **t <= percent) {
            if self.fired.insert(threshold) {
                crossed.push(threshold);
            }
        }
        crossed
    }

    pub fn fired(&self) -> impl Iterator<Item = u8> + '_ {
        self.fired.iter().copied()
    }

    /// Start a new page view.
    pub fn reset(&mut self) {
        self.fired.clear();
    }
}

/// Scroll depth as the share of the document seen so far:
/// `round((scroll_y + viewport_height) / document_height * 100)`, clamped to 0..=100.
pub fn scroll_percent(scroll_y: f64, viewport_height: f64, document_height: f64) -> u8 {
    if document_height <= 0.0 || !document_height.is_finite() {
        return 100;
    }
    let pct = ((scroll_y.max(0.0) + viewport_height.max(0.0)) / document_height * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_threshold_fires_once_in_order() {
        let mut tracker = MilestoneTracker::new(vec![25, 50, 75, 90]);
        let mut emitted = Vec::new();
        for pct in [10, 26, 51, 89, 95] {
            emitted.extend(tracker.observe(pct));
        }
        // 89 crosses 75 on its way past; 90 needs the final update.
        assert_eq!(emitted, vec![25, 50, 75, 90]);
        assert!(tracker.observe(100).is_empty());
    }

    #[test]
    fn test_single_jump_fires_ascending() {
        let mut tracker = MilestoneTracker::new(vec![90, 25, 75, 50]);
        assert_eq!(tracker.observe(80), vec![25, 50, 75]);
    }

    #[test]
    fn test_scrolling_up_does_not_refire() {
        let mut tracker = MilestoneTracker::new(vec![25, 50]);
        assert_eq!(tracker.observe(60), vec![25, 50]);
        assert!(tracker.observe(10).is_empty());
        assert!(tracker.observe(60).is_empty());
        assert_eq!(tracker.fired().collect::<Vec<_>>(), vec![25, 50]);

        tracker.reset();
        assert_eq!(tracker.observe(30), vec![25]);
    }

    #[test]
    fn test_scroll_percent() {
        assert_eq!(scroll_percent(0.0, 800.0, 3200.0), 25);
        assert_eq!(scroll_percent(2400.0, 800.0, 3200.0), 100);
        assert_eq!(scroll_percent(5000.0, 800.0, 3200.0), 100);
        assert_eq!(scroll_percent(0.0, 800.0, 0.0), 100);
    }
}
