//! Append-only log file backing store.
//!
//! Every atomic write becomes one JSON line, synced before the write is
//! acknowledged. The file is replayed into an in-memory index on open, which
//! then serves prefix scans.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{apply_operations, scan_prefix, BackingStore, WriteOperation};
use crate::error::BackingError;

#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
    ops: Vec<WriteOperation>,
}

#[derive(Debug)]
struct LogState {
    file: File,
    /// Length of the log that holds complete records
    len: u64,
    records: usize,
    index: BTreeMap<Vec<u8>, Vec<u8>>,
}

#[derive(Debug)]
struct LogInner {
    path: PathBuf,
    state: Mutex<LogState>,
}

// == Log File Backing Store ==
#[derive(Debug, Clone)]
pub struct LogFileBackingStore {
    inner: Arc<LogInner>,
}

impl LogFileBackingStore {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// A torn trailing record, left by a crash mid-append, is cut off with a
    /// warning. An undecodable record anywhere else fails the open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackingError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let contents = fs::read_to_string(&path)?;

        let mut index = BTreeMap::new();
        let mut records = 0;
        let mut valid_len = 0usize;

        for (line_no, segment) in contents.split_inclusive('\n').enumerate() {
            let line = segment.trim_end_matches('\n');
            let is_last = valid_len + segment.len() == contents.len();

            if line.trim().is_empty() {
                valid_len += segment.len();
                continue;
            }

            match serde_json::from_str::<LogRecord>(line) {
                Ok(record) if segment.ends_with('\n') => {
                    apply_operations(&mut index, record.ops);
                    records += 1;
                    valid_len += segment.len();
                }
                Err(err) if !is_last => {
                    return Err(BackingError::Corrupt(format!(
                        "{} line {}: {}",
                        path.display(),
                        line_no + 1,
                        err
                    )));
                }
                // Only the final segment can lack its newline
                _ => {
                    warn!(
                        "Discarding torn record at end of {} (line {})",
                        path.display(),
                        line_no + 1
                    );
                    break;
                }
            }
        }

        if valid_len < contents.len() {
            file.set_len(valid_len as u64)?;
        }

        info!(
            "Opened log {} with {} records, {} keys",
            path.display(),
            records,
            index.len()
        );

        Ok(Self {
            inner: Arc::new(LogInner {
                path,
                state: Mutex::new(LogState {
                    file,
                    len: valid_len as u64,
                    records,
                    index,
                }),
            }),
        })
    }

    /// Rewrites the log as a single snapshot record.
    ///
    /// Writes to a sibling temp file and renames it over the log, so a crash
    /// leaves either the old or the new file in place.
    pub fn compact(&self) -> Result<(), BackingError> {
        let mut state = self.inner.lock();
        let tmp_path = self.inner.path.with_extension("compact");

        let mut buf = Vec::new();
        if !state.index.is_empty() {
            let record = LogRecord {
                ops: state
                    .index
                    .iter()
                    .map(|(key, value)| WriteOperation::Put {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            };
            buf = serde_json::to_vec(&record)?;
            buf.push(b'\n');
        }

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.inner.path)?;

        let before = state.records;
        state.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.inner.path)?;
        state.len = buf.len() as u64;
        state.records = usize::from(!buf.is_empty());

        info!(
            "Compacted {}: {} records -> {}",
            self.inner.path.display(),
            before,
            state.records
        );
        Ok(())
    }

    /// Number of records currently in the log.
    pub fn record_count(&self) -> usize {
        self.inner.lock().records
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl LogInner {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, ops: Vec<WriteOperation>) -> Result<(), BackingError> {
        let record = LogRecord { ops };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut state = self.lock();
        let mut result = state.file.write_all(&line);
        if result.is_ok() {
            result = state.file.sync_data();
        }
        if let Err(err) = result {
            // Cut off whatever part of the record made it to disk
            let len = state.len;
            if let Err(trunc_err) = state.file.set_len(len) {
                warn!("Failed to truncate {} after error: {}", self.path.display(), trunc_err);
            }
            return Err(err.into());
        }

        state.len += line.len() as u64;
        state.records += 1;
        apply_operations(&mut state.index, record.ops);
        debug!("Appended {} bytes to {}", line.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl BackingStore for LogFileBackingStore {
    async fn get_prefixed(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackingError> {
        Ok(scan_prefix(&self.inner.lock().index, prefix))
    }

    async fn write(&self, operations: Vec<WriteOperation>) -> Result<(), BackingError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.append(operations))
            .await
            .map_err(|err| BackingError::Unavailable(err.to_string()))?
    }

    fn write_blocking(&self, operations: Vec<WriteOperation>) -> Result<(), BackingError> {
        self.inner.append(operations)
    }

    fn name(&self) -> &str {
        "log_file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, value: &str) -> WriteOperation {
        WriteOperation::Put {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.log");
        {
            let store = LogFileBackingStore::open(&path).unwrap();
            store.write(vec![put("_a\0k1", "v1"), put("_a\0k2", "v2")]).await.unwrap();
            store
                .write(vec![WriteOperation::Delete {
                    key: b"_a\0k1".to_vec(),
                }])
                .await
                .unwrap();
        }

        let store = LogFileBackingStore::open(&path).unwrap();
        assert_eq!(store.record_count(), 2);
        let rows = store.get_prefixed(b"_a\0").await.unwrap();
        assert_eq!(rows, vec![(b"_a\0k2".to_vec(), b"v2".to_vec())]);
    }

    #[tokio::test]
    async fn test_torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.log");
        {
            let store = LogFileBackingStore::open(&path).unwrap();
            store.write_blocking(vec![put("k", "v")]).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(br#"{"ops":[{"op":"put","key":[1"#).unwrap();
        }

        let store = LogFileBackingStore::open(&path).unwrap();
        assert_eq!(store.record_count(), 1);
        // Appends after recovery land on a clean line
        store.write_blocking(vec![put("k2", "v2")]).unwrap();
        drop(store);

        let store = LogFileBackingStore::open(&path).unwrap();
        assert_eq!(store.record_count(), 2);
        assert_eq!(store.get_prefixed(b"k").await.unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_middle_record_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.log");
        fs::write(&path, "not json\n{\"ops\":[]}\n").unwrap();

        let result = LogFileBackingStore::open(&path);
        assert!(matches!(result, Err(BackingError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_compact_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.log");
        let store = LogFileBackingStore::open(&path).unwrap();
        for i in 0..5 {
            store.write(vec![put("k", &i.to_string())]).await.unwrap();
        }
        assert_eq!(store.record_count(), 5);

        store.compact().unwrap();
        assert_eq!(store.record_count(), 1);
        store.write(vec![put("j", "x")]).await.unwrap();
        drop(store);

        let store = LogFileBackingStore::open(&path).unwrap();
        assert_eq!(store.record_count(), 2);
        let rows = store.get_prefixed(b"").await.unwrap();
        assert_eq!(
            rows,
            vec![
                (b"j".to_vec(), b"x".to_vec()),
                (b"k".to_vec(), b"4".to_vec())
            ]
        );
    }
}
