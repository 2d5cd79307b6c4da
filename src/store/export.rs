use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use super::{LogEntry, LogStore};
use crate::error::StoreError;

/// Whole-log dump for moving a session between machines
#[derive(Debug, Serialize, Deserialize)]
pub struct LogExport {
    pub exported_at: String,
    pub entries: Vec<LogEntry>,
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

/// Write every record of `store` to `path` as JSON (gzip when the path ends in `.gz`).
/// Returns the number of records written.
pub fn export_log(store: &dyn LogStore, path: &Path) -> Result<usize, StoreError> {
    let export = LogExport {
        exported_at: chrono::Utc::now().to_rfc3339(),
        entries: store.get_all()?,
    };

    let file = File::create(path)?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, &export)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &export)?;
        writer.flush()?;
    }

    Ok(export.entries.len())
}

/// Read an export produced by [`export_log`]
pub fn load_export(path: &Path) -> Result<LogExport, StoreError> {
    let file = File::open(path)?;
    let export = if is_gzip(path) {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
    } else {
        serde_json::from_reader(BufReader::new(file))?
    };
    Ok(export)
}
