//! Persistent key-value log of JSON records
//!
//! The tracker only needs a narrow interface: keyed put with
//! overwrite-on-conflict, full ordered scan, delete and clear. Storage order is
//! insertion order; replacing a key moves it to the end, the way an
//! insert-or-replace into an autoincrement table does.

mod export;
mod index;
pub(crate) mod jsonl;
mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

pub use export::{export_log, load_export, LogExport};
pub use jsonl::JsonlLog;
pub use memory::MemoryLog;

/// One stored record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub value: Value,
}

/// Keyed JSON log shared between the writer task and readers
pub trait LogStore: Send + Sync {
    /// Prepare backing storage. Safe to call repeatedly.
    fn initialize(&self) -> Result<(), StoreError>;

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// All records in storage order
    fn get_all(&self) -> Result<Vec<LogEntry>, StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every record. Irreversible.
    fn clear(&self) -> Result<(), StoreError>;

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.get_all()?.len())
    }
}
