use std::collections::BTreeMap;

use crate::types::PageNumber;

/// Tracks intersection ratios reported by the host's scroll observer and
/// picks the most visible page for continuous mode. A change is reported once
/// per crossing; ties keep the current page so scrolling frames do not flap.
#[derive(Debug, Default, Clone)]
pub struct VisibilityTracker {
    ratios: BTreeMap<PageNumber, f32>,
    current: Option<PageNumber>,
}

impl VisibilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<PageNumber> {
        self.current
    }

    pub fn observe(&mut self, page: PageNumber, ratio: f32) -> Option<PageNumber> {
        self.record(page, ratio);
        self.settle()
    }

    pub fn observe_batch<I>(&mut self, entries: I) -> Option<PageNumber>
    where
        I: IntoIterator<Item = (PageNumber, f32)>,
    {
        for (page, ratio) in entries {
            self.record(page, ratio);
        }
        self.settle()
    }

    pub fn reset(&mut self) {
        self.ratios.clear();
        self.current = None;
    }

    fn record(&mut self, page: PageNumber, ratio: f32) {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if ratio > 0.0 {
            self.ratios.insert(page, ratio);
        } else {
            self.ratios.remove(&page);
        }
    }

    fn settle(&mut self) -> Option<PageNumber> {
        let mut best: Option<(PageNumber, f32)> = None;
        for (&page, &ratio) in &self.ratios {
            match best {
                Some((_, best_ratio)) if ratio <= best_ratio => {}
                _ => best = Some((page, ratio)),
            }
        }
        let (page, ratio) = best?;

        if let Some(current) = self.current {
            if current == page {
                return None;
            }
            let current_ratio = self.ratios.get(&current).copied().unwrap_or(0.0);
            if current_ratio >= ratio {
                return None;
            }
        }
        self.current = Some(page);
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_each_crossing_once() {
        let mut tracker = VisibilityTracker::new();
        let mut changes = Vec::new();

        // Scroll from page 13 to page 15 in small frames.
        let frames: Vec<Vec<(PageNumber, f32)>> = vec![
            vec![(13, 1.0)],
            vec![(13, 0.8), (14, 0.2)],
            vec![(13, 0.6), (14, 0.4)],
            vec![(13, 0.4), (14, 0.6)],
            vec![(13, 0.1), (14, 0.9)],
            vec![(13, 0.0), (14, 0.7), (15, 0.3)],
            vec![(14, 0.45), (15, 0.55)],
            vec![(14, 0.3), (15, 0.7)],
            vec![(14, 0.1), (15, 0.9)],
        ];
        for frame in frames {
            if let Some(page) = tracker.observe_batch(frame) {
                changes.push(page);
            }
        }

        assert_eq!(changes, vec![13, 14, 15]);
        assert_eq!(changes.iter().filter(|&&page| page == 15).count(), 1);
    }

    #[test]
    fn ties_keep_the_current_page() {
        let mut tracker = VisibilityTracker::new();
        assert_eq!(tracker.observe(3, 0.5), Some(3));
        assert_eq!(tracker.observe(4, 0.5), None);
        assert_eq!(tracker.current(), Some(3));
    }

    #[test]
    fn pages_leaving_the_viewport_are_forgotten() {
        let mut tracker = VisibilityTracker::new();
        tracker.observe_batch([(1, 0.9), (2, 0.1)]);
        assert_eq!(tracker.observe_batch([(1, 0.0), (2, 0.4)]), Some(2));
        tracker.reset();
        assert_eq!(tracker.current(), None);
    }
}
