//! Completion markers
//!
//! A marker is registered when its request is admitted, attached to an
//! execution unit when the request is programmed and retired when that
//! unit completes. Waiters only ask whether a marker is still pending.

use heapless::Vec;

use crate::pool::MAX_UPDATES;
use crate::update::Marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    marker: Marker,
    unit: Option<usize>,
}

/// Outstanding markers
#[derive(Debug, Clone, Default)]
pub struct MarkerTable {
    entries: Vec<Entry, MAX_UPDATES>,
}

impl MarkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a marker
    ///
    /// Returns false if the table is full; the marker then behaves as
    /// already complete.
    pub fn register(&mut self, marker: Marker) -> bool {
        self.entries
            .push(Entry { marker, unit: None })
            .is_ok()
    }

    /// Bind a pending marker to the unit driving its request
    pub fn attach(&mut self, marker: Marker, unit: usize) {
        if let Some(e) = self
            .entries
            .iter_mut()
            .find(|e| e.marker == marker && e.unit.is_none())
        {
            e.unit = Some(unit);
        }
    }

    /// Unbind a marker whose request went back to waiting
    pub fn detach(&mut self, marker: Marker, unit: usize) {
        if let Some(e) = self
            .entries
            .iter_mut()
            .find(|e| e.marker == marker && e.unit == Some(unit))
        {
            e.unit = None;
        }
    }

    /// Retire every marker bound to `unit`, returning how many
    pub fn complete_unit(&mut self, unit: usize) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.unit != Some(unit));
        before - self.entries.len()
    }

    /// Drop one unbound registration of `marker`
    pub fn release(&mut self, marker: Marker) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.marker == marker && e.unit.is_none())
        {
            self.entries.swap_remove(pos);
        }
    }

    /// True while any request carrying `marker` has not completed
    pub fn is_pending(&self, marker: Marker) -> bool {
        self.entries.iter().any(|e| e.marker == marker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(v: u32) -> Marker {
        Marker::new(v).unwrap()
    }

    #[test]
    fn test_marker_completes_with_its_unit() {
        let mut table = MarkerTable::new();
        assert!(table.register(m(5)));
        table.attach(m(5), 3);
        assert_eq!(table.complete_unit(2), 0);
        assert!(table.is_pending(m(5)));
        assert_eq!(table.complete_unit(3), 1);
        assert!(!table.is_pending(m(5)));
    }

    #[test]
    fn test_detached_marker_survives_unit_completion() {
        let mut table = MarkerTable::new();
        table.register(m(5));
        table.attach(m(5), 3);
        table.detach(m(5), 3);
        table.complete_unit(3);
        assert!(table.is_pending(m(5)));
        table.attach(m(5), 7);
        table.complete_unit(7);
        assert!(!table.is_pending(m(5)));
    }

    #[test]
    fn test_unknown_marker_not_pending() {
        let table = MarkerTable::new();
        assert!(!table.is_pending(m(42)));
    }

    #[test]
    fn test_full_table_refuses() {
        let mut table = MarkerTable::new();
        for v in 1..=MAX_UPDATES as u32 {
            assert!(table.register(m(v)));
        }
        assert!(!table.register(m(999)));
        assert!(!table.is_pending(m(999)));
    }

    #[test]
    fn test_release_drops_registration() {
        let mut table = MarkerTable::new();
        table.register(m(1));
        table.release(m(1));
        assert!(table.is_empty());
    }
}
