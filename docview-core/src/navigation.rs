use tracing::debug;

use crate::types::{NavigationReason, NavigationTarget, PageNumber, ViewMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    None,
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved {
        from: PageNumber,
        to: PageNumber,
        reason: NavigationReason,
    },
    Unchanged,
    /// Held back by the transition lock; applied on `finish_transition`.
    Queued(NavigationTarget),
}

impl Transition {
    pub fn destination(&self) -> Option<PageNumber> {
        match self {
            Transition::Moved { to, .. } => Some(*to),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewModeChange {
    pub previous: ViewMode,
    pub current: ViewMode,
    pub page: PageNumber,
    pub realigned_from: Option<PageNumber>,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct Navigator {
    page_count: usize,
    current: PageNumber,
    view_mode: ViewMode,
    pending: Option<NavigationTarget>,
    last_reason: Option<NavigationReason>,
    locked: bool,
    direction: Direction,
    generation: u64,
    continuous_window: usize,
}

impl Navigator {
    pub fn new(page_count: usize, view_mode: ViewMode) -> Self {
        let mut navigator = Self {
            page_count,
            current: 1,
            view_mode,
            pending: None,
            last_reason: None,
            locked: false,
            direction: Direction::None,
            generation: 0,
            continuous_window: 2,
        };
        navigator.current = navigator.align(1);
        navigator
    }

    pub fn with_continuous_window(mut self, window: usize) -> Self {
        self.continuous_window = window;
        self
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn current_page(&self) -> PageNumber {
        self.current
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pending(&self) -> Option<NavigationTarget> {
        self.pending
    }

    pub fn last_reason(&self) -> Option<NavigationReason> {
        self.last_reason
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn last_page(&self) -> PageNumber {
        self.page_count.max(1)
    }

    fn clamp(&self, page: PageNumber) -> PageNumber {
        page.clamp(1, self.last_page())
    }

    fn align(&self, page: PageNumber) -> PageNumber {
        let page = self.clamp(page);
        if self.view_mode.is_paired() && page % 2 == 0 {
            page - 1
        } else {
            page
        }
    }

    pub fn go_to(&mut self, target: NavigationTarget) -> Transition {
        if self.locked {
            debug!(page = target.page, "navigation queued behind transition lock");
            self.pending = Some(target);
            return Transition::Queued(target);
        }
        self.move_to(target)
    }

    fn move_to(&mut self, target: NavigationTarget) -> Transition {
        let next = self.align(target.page);
        if next == self.current {
            return Transition::Unchanged;
        }
        let from = self.current;
        self.direction = if next > from {
            Direction::Forward
        } else {
            Direction::Backward
        };
        self.current = next;
        self.last_reason = Some(target.reason);
        Transition::Moved {
            from,
            to: next,
            reason: target.reason,
        }
    }

    pub fn next(&mut self, reason: NavigationReason) -> Transition {
        let target = self.current.saturating_add(self.view_mode.step());
        if target > self.last_page() {
            return Transition::Unchanged;
        }
        self.go_to(NavigationTarget::new(target, reason))
    }

    pub fn prev(&mut self, reason: NavigationReason) -> Transition {
        if self.current == 1 {
            return Transition::Unchanged;
        }
        let target = self.current.saturating_sub(self.view_mode.step()).max(1);
        self.go_to(NavigationTarget::new(target, reason))
    }

    pub fn first(&mut self, reason: NavigationReason) -> Transition {
        self.go_to(NavigationTarget::new(1, reason))
    }

    pub fn last(&mut self, reason: NavigationReason) -> Transition {
        self.go_to(NavigationTarget::new(self.last_page(), reason))
    }

    pub fn begin_transition(&mut self) {
        self.locked = true;
    }

    /// Releases the lock and applies the newest queued request, if any.
    pub fn finish_transition(&mut self) -> Transition {
        self.locked = false;
        match self.pending.take() {
            Some(target) => self.move_to(target),
            None => Transition::Unchanged,
        }
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) -> ViewModeChange {
        let previous = self.view_mode;
        self.view_mode = mode;
        self.generation += 1;
        self.pending = None;
        self.locked = false;
        self.direction = Direction::None;

        let before = self.current;
        self.current = self.align(before);
        ViewModeChange {
            previous,
            current: mode,
            page: self.current,
            realigned_from: (before != self.current).then_some(before),
            generation: self.generation,
        }
    }

    /// Continuous mode reports the most visible page from the scroll
    /// observer; no alignment or lock applies.
    pub fn sync_visible_page(&mut self, page: PageNumber) -> Transition {
        let page = self.clamp(page);
        if page == self.current {
            return Transition::Unchanged;
        }
        let from = self.current;
        self.direction = if page > from {
            Direction::Forward
        } else {
            Direction::Backward
        };
        self.current = page;
        self.last_reason = Some(NavigationReason::User);
        Transition::Moved {
            from,
            to: page,
            reason: NavigationReason::User,
        }
    }

    pub fn visible_pages(&self) -> Vec<PageNumber> {
        if self.page_count == 0 {
            return Vec::new();
        }
        match self.view_mode {
            ViewMode::Single | ViewMode::Presentation => vec![self.current],
            ViewMode::Dual | ViewMode::TwoPage => {
                let mut pages = vec![self.current];
                if self.current < self.page_count {
                    pages.push(self.current + 1);
                }
                pages
            }
            ViewMode::Continuous => {
                let start = self.current.saturating_sub(self.continuous_window).max(1);
                let end = (self.current + self.continuous_window).min(self.page_count);
                (start..=end).collect()
            }
        }
    }

    pub fn reset(&mut self, page_count: usize) {
        self.page_count = page_count;
        self.current = self.align(1);
        self.pending = None;
        self.locked = false;
        self.direction = Direction::None;
        self.last_reason = None;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(page: PageNumber) -> NavigationTarget {
        NavigationTarget::new(page, NavigationReason::User)
    }

    #[test]
    fn go_to_clamps_out_of_range_targets() {
        let mut nav = Navigator::new(20, ViewMode::Single);
        assert_eq!(nav.go_to(target(99)).destination(), Some(20));
        assert_eq!(nav.go_to(target(0)).destination(), Some(1));
        assert_eq!(nav.go_to(target(1)), Transition::Unchanged);
    }

    #[test]
    fn paired_modes_step_by_two_on_odd_pages() {
        let mut nav = Navigator::new(10, ViewMode::TwoPage);
        assert_eq!(nav.current_page(), 1);
        nav.next(NavigationReason::Keyboard);
        assert_eq!(nav.current_page(), 3);
        nav.go_to(target(8));
        assert_eq!(nav.current_page(), 7);
        nav.prev(NavigationReason::Keyboard);
        assert_eq!(nav.current_page(), 5);
        nav.last(NavigationReason::Keyboard);
        assert_eq!(nav.current_page(), 9);
        assert_eq!(nav.next(NavigationReason::Keyboard), Transition::Unchanged);
        assert_eq!(nav.visible_pages(), vec![9, 10]);
    }

    #[test]
    fn entering_two_page_mode_from_even_page_moves_back() {
        let mut nav = Navigator::new(20, ViewMode::Single);
        nav.go_to(target(4));
        let change = nav.set_view_mode(ViewMode::TwoPage);
        assert_eq!(nav.current_page(), 3);
        assert_eq!(change.realigned_from, Some(4));
        assert_eq!(nav.visible_pages(), vec![3, 4]);
    }

    #[test]
    fn view_mode_change_bumps_generation_and_drops_pending() {
        let mut nav = Navigator::new(20, ViewMode::Single);
        nav.begin_transition();
        nav.go_to(target(9));
        let before = nav.generation();
        nav.set_view_mode(ViewMode::Continuous);
        assert!(nav.generation() > before);
        assert!(nav.pending().is_none());
        assert!(!nav.is_locked());
    }

    #[test]
    fn lock_queues_latest_request() {
        let mut nav = Navigator::new(20, ViewMode::Single);
        nav.begin_transition();
        assert!(matches!(nav.go_to(target(5)), Transition::Queued(_)));
        assert!(matches!(nav.next(NavigationReason::Keyboard), Transition::Queued(_)));
        nav.go_to(target(12));
        assert_eq!(nav.current_page(), 1);
        let applied = nav.finish_transition();
        assert_eq!(applied.destination(), Some(12));
        assert_eq!(nav.direction(), Direction::Forward);
    }

    #[test]
    fn continuous_mode_exposes_a_window() {
        let mut nav = Navigator::new(20, ViewMode::Continuous).with_continuous_window(1);
        nav.sync_visible_page(15);
        assert_eq!(nav.visible_pages(), vec![14, 15, 16]);
        assert_eq!(nav.sync_visible_page(15), Transition::Unchanged);
    }

    #[test]
    fn single_step_in_single_mode() {
        let mut nav = Navigator::new(3, ViewMode::Single);
        nav.next(NavigationReason::User);
        nav.next(NavigationReason::User);
        assert_eq!(nav.current_page(), 3);
        assert_eq!(nav.next(NavigationReason::User), Transition::Unchanged);
        nav.prev(NavigationReason::User);
        assert_eq!(nav.current_page(), 2);
    }
}
