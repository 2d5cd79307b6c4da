use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::LogEntry;

/// In-memory ordered key index shared by the store implementations.
///
/// Entries are ordered by a monotonically increasing sequence number; a put on
/// an existing key drops the old slot and takes a fresh one at the end.
#[derive(Debug, Default)]
pub(crate) struct LogIndex {
    entries: BTreeMap<u64, LogEntry>,
    positions: HashMap<String, u64>,
    next_seq: u64,
}

impl LogIndex {
    pub(crate) fn put(&mut self, key: &str, value: Value) {
        if let Some(old) = self.positions.remove(key) {
            self.entries.remove(&old);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.positions.insert(key.to_string(), seq);
        self.entries.insert(
            seq,
            LogEntry {
                key: key.to_string(),
                value,
            },
        );
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.positions
            .get(key)
            .and_then(|seq| self.entries.get(seq))
            .map(|entry| &entry.value)
    }

    pub(crate) fn delete(&mut self, key: &str) -> bool {
        match self.positions.remove(key) {
            Some(seq) => self.entries.remove(&seq).is_some(),
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    pub(crate) fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
