use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::authz::rules::RuleTable;

/// Hot-swappable handle to the current rule table.
///
/// Single writer (the watcher task), many concurrent readers. `snapshot`
/// is a lock-free atomic load; a request that has taken a snapshot keeps
/// that exact table even if a reload lands mid-request.
#[derive(Debug)]
pub struct RuleStore {
    table: ArcSwap<RuleTable>,
}

impl RuleStore {
    pub fn empty() -> Self {
        Self::new(RuleTable::default())
    }

    pub fn new(table: RuleTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleTable> {
        self.table.load_full()
    }

    /// Atomically replace the table. Readers never observe a partially
    /// built table; in-flight snapshots are unaffected.
    pub fn install(&self, table: RuleTable) {
        self.table.store(Arc::new(table));
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::rules::RuleEntry;
    use std::collections::BTreeMap;

    fn table_with(id: &str) -> RuleTable {
        let mut entries = BTreeMap::new();
        entries.insert(id.to_string(), RuleEntry::default());
        RuleTable::new(entries)
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = RuleStore::new(table_with("alice"));

        let before = store.snapshot();
        store.install(table_with("bob"));

        // The earlier snapshot still sees the table it was taken against.
        assert!(before.lookup("alice").is_some());
        assert!(before.lookup("bob").is_none());

        let after = store.snapshot();
        assert!(after.lookup("bob").is_some());
        assert!(after.lookup("alice").is_none());
    }

    #[test]
    fn test_starts_empty() {
        let store = RuleStore::empty();
        assert!(store.snapshot().is_empty());
    }
}
