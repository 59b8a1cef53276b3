//! Run artifacts for offline review.
//!
//! The failure log is a JSON array of records, rewritten in full on each
//! append (read-modify-write, not a true append log). The flagged-proxy
//! report lists proxies that failed at least one probe so an operator can
//! prune them from the candidate list.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::proxy::ProbeResult;

/// One failed task, recorded when a task reaches the failed state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub credential_secret: String,
    pub proxy: String,
    pub service: String,
    pub timestamp: String,
}

impl FailureRecord {
    pub fn new(credential_secret: &str, proxy: &str, service: &str) -> Self {
        Self {
            credential_secret: credential_secret.to_string(),
            proxy: proxy.to_string(),
            service: service.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Failure log file. Appends are serialized through a mutex; write errors
/// are logged and swallowed so a broken log never fails a task unit.
pub struct FailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf(), lock: Mutex::new(()) }
    }

    /// Append one record: read the existing array, push, rewrite the file.
    pub fn append(&self, record: FailureRecord) {
        let _guard = self.lock.lock();

        let mut records = self.read_records();
        records.push(record);

        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("Failed to create failure log directory: {}", e);
                return;
            }
        }

        match serde_json::to_string_pretty(&records) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&self.path, content) {
                    error!("Failed to write failure log: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to serialize failure log: {}", e);
            }
        }
    }

    /// All records currently in the log (empty on missing or unparsable file).
    pub fn read_all(&self) -> Vec<FailureRecord> {
        let _guard = self.lock.lock();
        self.read_records()
    }

    fn read_records(&self) -> Vec<FailureRecord> {
        if !self.path.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Failed to parse failure log, starting fresh: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to read failure log: {}", e);
                Vec::new()
            }
        }
    }
}

/// A proxy that failed at least one probe, with its fail tags.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedProxy {
    pub proxy: String,
    pub fail: Vec<String>,
}

/// Write the flagged-proxy report for probe results carrying fail tags.
/// Flagged proxies are reported, not excluded from assignment.
pub fn write_flagged_proxies(path: &Path, results: &[ProbeResult]) -> std::io::Result<()> {
    let flagged: Vec<FlaggedProxy> = results
        .iter()
        .filter(|r| !r.fail.is_empty())
        .map(|r| FlaggedProxy { proxy: r.proxy.clone(), fail: r.fail.clone() })
        .collect();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(&flagged)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, content)
}
