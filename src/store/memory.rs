use std::sync::Mutex;

use serde_json::Value;

use super::index::LogIndex;
use super::{LogEntry, LogStore};
use crate::error::StoreError;

/// Process-local log, lost on exit. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLog {
    index: Mutex<LogIndex>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_index<T>(&self, f: impl FnOnce(&mut LogIndex) -> T) -> Result<T, StoreError> {
        let mut index = self.index.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut index))
    }
}

impl LogStore for MemoryLog {
    fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.with_index(|index| index.put(key, value))
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.with_index(|index| index.get(key).cloned())
    }

    fn get_all(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.with_index(|index| index.snapshot())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_index(|index| {
            index.delete(key);
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.with_index(|index| index.clear())
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.with_index(|index| index.len())
    }
}
