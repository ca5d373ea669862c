use std::collections::HashSet;

use crate::models::Task;

/// Bulk-selection state, tracked independently of pagination. "Select all"
/// takes only the currently-loaded page; cross-page select-all is not
/// supported, matching the 50-item bulk ceiling.
#[derive(Debug, Default)]
pub struct SelectionSet {
    ids: HashSet<i64>,
}

impl SelectionSet {
    pub fn new() -> Self {
        SelectionSet::default()
    }

    pub fn select(&mut self, id: i64) {
        self.ids.insert(id);
    }

    pub fn deselect(&mut self, id: i64) {
        self.ids.remove(&id);
    }

    /// Returns whether the id is selected after the toggle.
    pub fn toggle(&mut self, id: i64) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.ids.insert(id);
            true
        }
    }

    pub fn select_page(&mut self, tasks: &[Task]) {
        self.ids.extend(tasks.iter().map(|t| t.id));
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
