use crate::search::SearchMatch;
use crate::types::PageNumber;

/// Ordered search results plus the selected match. Stepping wraps at both
/// ends.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    query: String,
    matches: Vec<SearchMatch>,
    current: Option<usize>,
}

impl SearchResults {
    pub fn new(query: impl Into<String>, matches: Vec<SearchMatch>) -> Self {
        let current = if matches.is_empty() { None } else { Some(0) };
        Self {
            query: query.into(),
            matches,
            current,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&SearchMatch> {
        self.current.and_then(|index| self.matches.get(index))
    }

    pub fn next(&mut self) -> Option<&SearchMatch> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        let index = match self.current {
            Some(index) => (index + 1) % len,
            None => 0,
        };
        self.current = Some(index);
        self.matches.get(index)
    }

    pub fn prev(&mut self) -> Option<&SearchMatch> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        let index = match self.current {
            Some(0) | None => len - 1,
            Some(index) => index - 1,
        };
        self.current = Some(index);
        self.matches.get(index)
    }

    /// Selects a match by position; out-of-range indexes leave the
    /// selection unchanged.
    pub fn select(&mut self, index: usize) -> Option<&SearchMatch> {
        if index >= self.matches.len() {
            return None;
        }
        self.current = Some(index);
        self.matches.get(index)
    }

    pub fn matches_on_page(&self, page: PageNumber) -> impl Iterator<Item = &SearchMatch> {
        self.matches.iter().filter(move |m| m.page == page)
    }

    pub fn set_matches(&mut self, matches: Vec<SearchMatch>) {
        self.current = match self.current {
            Some(index) if index < matches.len() => Some(index),
            _ if matches.is_empty() => None,
            _ => Some(0),
        };
        self.matches = matches;
    }

    pub fn clear(&mut self) {
        self.query.clear();
        self.matches.clear();
        self.current = None;
    }
}
