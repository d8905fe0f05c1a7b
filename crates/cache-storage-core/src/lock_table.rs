//! Per-session cache reference counts.
//!
//! A (session, cache) entry exists exactly while its count is nonzero, which
//! is exactly while the owning broker holds an advisory lock on that cache.
//! Per-session maps are created on first reference and kept afterwards, even
//! once empty.

use crate::types::{CacheIdentifier, LockCount, SessionId};
use std::collections::HashMap;

/// Outcome of dropping one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dereference {
    /// Last reference dropped; the lock must be released.
    Released,
    /// Other references remain.
    Retained(LockCount),
    /// No reference was held.
    NotHeld,
}

#[derive(Debug, Default)]
pub struct LockTable {
    sessions: HashMap<SessionId, HashMap<CacheIdentifier, LockCount>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one reference. Returns true on the 0→1 transition.
    pub fn reference(&mut self, session: SessionId, cache: CacheIdentifier) -> bool {
        let count = self
            .sessions
            .entry(session)
            .or_default()
            .entry(cache)
            .or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn dereference(&mut self, session: SessionId, cache: CacheIdentifier) -> Dereference {
        let Some(references) = self.sessions.get_mut(&session) else {
            return Dereference::NotHeld;
        };
        let Some(count) = references.get_mut(&cache) else {
            return Dereference::NotHeld;
        };

        *count = count.saturating_sub(1);
        if *count > 0 {
            return Dereference::Retained(*count);
        }
        references.remove(&cache);
        Dereference::Released
    }

    /// Reference count of `cache` in `session`; zero when absent.
    pub fn count(&self, session: SessionId, cache: CacheIdentifier) -> LockCount {
        self.sessions
            .get(&session)
            .and_then(|references| references.get(&cache))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_locked(&self, session: SessionId, cache: CacheIdentifier) -> bool {
        self.count(session, cache) > 0
    }

    /// Number of (session, cache) pairs currently locked.
    pub fn held(&self) -> usize {
        self.sessions.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.held() == 0
    }

    /// Number of per-session maps, including ones that became empty.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionId, CacheIdentifier, LockCount)> + '_ {
        self.sessions.iter().flat_map(|(session, references)| {
            references
                .iter()
                .map(move |(cache, count)| (*session, *cache, *count))
        })
    }

    /// Empties the table, returning every held entry.
    pub fn drain(&mut self) -> Vec<(SessionId, CacheIdentifier, LockCount)> {
        let held = self.iter().collect();
        self.sessions.clear();
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: SessionId = SessionId::new(1);
    const S2: SessionId = SessionId::new(2);

    #[test]
    fn test_first_reference_reports_transition() {
        let mut table = LockTable::new();
        assert!(table.reference(S1, 7));
        assert!(!table.reference(S1, 7));
        assert_eq!(table.count(S1, 7), 2);
    }

    #[test]
    fn test_last_dereference_removes_entry() {
        let mut table = LockTable::new();
        table.reference(S1, 7);
        table.reference(S1, 7);

        assert_eq!(table.dereference(S1, 7), Dereference::Retained(1));
        assert_eq!(table.dereference(S1, 7), Dereference::Released);
        assert_eq!(table.count(S1, 7), 0);
        assert!(table.is_empty());
        // Empty session map stays behind.
        assert_eq!(table.session_count(), 1);
    }

    #[test]
    fn test_dereference_unknown_is_noop() {
        let mut table = LockTable::new();
        assert_eq!(table.dereference(S1, 7), Dereference::NotHeld);
        assert_eq!(table.session_count(), 0);

        table.reference(S1, 8);
        assert_eq!(table.dereference(S1, 7), Dereference::NotHeld);
        assert_eq!(table.count(S1, 8), 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut table = LockTable::new();
        assert!(table.reference(S1, 7));
        assert!(table.reference(S2, 7));

        assert_eq!(table.dereference(S1, 7), Dereference::Released);
        assert!(table.is_locked(S2, 7));
        assert!(!table.is_locked(S1, 7));
    }

    #[test]
    fn test_drain_returns_all_pairs() {
        let mut table = LockTable::new();
        table.reference(S1, 1);
        table.reference(S1, 1);
        table.reference(S1, 2);
        table.reference(S2, 1);

        let mut held = table.drain();
        held.sort();
        assert_eq!(held, vec![(S1, 1, 2), (S1, 2, 1), (S2, 1, 1)]);
        assert_eq!(table.held(), 0);
        assert_eq!(table.session_count(), 0);
    }
}
