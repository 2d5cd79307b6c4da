use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::index::LogIndex;
use super::{LogEntry, LogStore};
use crate::error::StoreError;

/// Journal line. The file is an append-only sequence of these.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum JournalOp {
    Put { key: String, value: Value },
    Delete { key: String },
}

struct JsonlState {
    file: File,
    index: LogIndex,
}

/// File-backed log stored as a JSON-lines operation journal.
///
/// The journal is replayed into an in-memory index on open, so reads never
/// touch the disk. `clear` truncates the file.
pub struct JsonlLog {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlLog {
    /// Open (creating if needed) the journal at `path` and replay it
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let (index, torn_tail) = if path.exists() {
            replay(&path)?
        } else {
            (LogIndex::default(), false)
        };

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if torn_tail {
            // Terminate the partial line so the next append starts clean
            file.write_all(b"\n")?;
        }
        log::debug!("Opened log journal {} ({} records)", path.display(), index.len());

        Ok(Self {
            path,
            state: Mutex::new(JsonlState { file, index }),
        })
    }

    fn append(state: &mut JsonlState, op: &JournalOp) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(op)?;
        line.push(b'\n');
        state.file.write_all(&line)?;
        state.file.flush()?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, JsonlState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Rebuild the index from the journal. Also reports whether the file ends
/// without a trailing newline.
fn replay(path: &Path) -> Result<(LogIndex, bool), StoreError> {
    let contents = fs::read_to_string(path)?;
    let torn_tail = !contents.is_empty() && !contents.ends_with('\n');
    let mut index = LogIndex::default();

    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalOp>(line) {
            Ok(JournalOp::Put { key, value }) => index.put(&key, value),
            Ok(JournalOp::Delete { key }) => {
                index.delete(&key);
            }
            Err(e) => {
                // Usually a torn final write
                log::warn!(
                    "Skipping unreadable journal line {} in {}: {}",
                    line_no + 1,
                    path.display(),
                    e
                );
            }
        }
    }

    Ok((index, torn_tail))
}

impl LogStore for JsonlLog {
    fn initialize(&self) -> Result<(), StoreError> {
        let state = self.lock()?;
        state.file.sync_data()?;
        Ok(())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let op = JournalOp::Put {
            key: key.to_string(),
            value,
        };
        Self::append(&mut state, &op)?;
        if let JournalOp::Put { key, value } = op {
            state.index.put(&key, value);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock()?.index.get(key).cloned())
    }

    fn get_all(&self) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.lock()?.index.snapshot())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.index.delete(key) {
            Self::append(
                &mut state,
                &JournalOp::Delete {
                    key: key.to_string(),
                },
            )?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.file.set_len(0)?;
        state.file.sync_data()?;
        state.index.clear();
        log::info!("Cleared log journal {}", self.path.display());
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.index.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    pub(crate) fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "activity_tracker_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    #[test]
    fn test_reopen_replays_puts_and_deletes() {
        let path = temp_path("replay.jsonl");
        {
            let log = JsonlLog::open(&path).unwrap();
            log.initialize().unwrap();
            log.put("a", json!({"n": 1})).unwrap();
            log.put("b", json!({"n": 2})).unwrap();
            log.put("a", json!({"n": 3})).unwrap();
            log.delete("b").unwrap();
            log.put("c", json!({"n": 4})).unwrap();
        }

        let reopened = JsonlLog::open(&path).unwrap();
        let entries = reopened.get_all().unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(entries[0].value, json!({"n": 3}));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_clear_survives_reopen() {
        let path = temp_path("clear.jsonl");
        {
            let log = JsonlLog::open(&path).unwrap();
            log.put("a", json!(1)).unwrap();
            log.clear().unwrap();
            log.put("b", json!(2)).unwrap();
        }

        let reopened = JsonlLog::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        assert_eq!(reopened.get("b").unwrap(), Some(json!(2)));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let path = temp_path("torn.jsonl");
        fs::write(
            &path,
            "{\"op\":\"put\",\"key\":\"a\",\"value\":1}\n{\"op\":\"put\",\"key\":\"b\",\"va",
        )
        .unwrap();

        {
            let log = JsonlLog::open(&path).unwrap();
            assert_eq!(log.len().unwrap(), 1);
            assert_eq!(log.get("a").unwrap(), Some(json!(1)));
            log.put("c", json!(3)).unwrap();
        }

        let reopened = JsonlLog::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(reopened.get("c").unwrap(), Some(json!(3)));

        let _ = fs::remove_file(&path);
    }
}
