use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{LearningError, Result};

/// Append-only JSON lines log backing one store
///
/// Appends are flushed and synced before returning, so callers update their
/// in-memory indexes only after the record is durable.
#[derive(Debug)]
pub struct Journal<T> {
    store: &'static str,
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Journal<T> {
    pub fn open(store: &'static str, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LearningError::unavailable(store, e))?;
        }
        Ok(Self { store, path, _record: PhantomData })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &T) -> Result<()> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Append several records under one sync
    pub fn append_all(&self, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.write_records(records).map_err(|e| e.into_unavailable(self.store))
    }

    fn write_records(&self, records: &[T]) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Read every durable record in order
    ///
    /// A malformed final line is a torn write: it is dropped and the file is
    /// truncated to the last good record. A malformed line anywhere else is
    /// corruption and surfaces as `Unavailable`.
    pub fn replay(&self) -> Result<Vec<T>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LearningError::unavailable(self.store, e)),
        };

        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let mut records = Vec::with_capacity(lines.len());
        let mut valid_len = 0usize;

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                valid_len += line.len();
                continue;
            }
            match serde_json::from_str::<T>(trimmed) {
                Ok(record) => {
                    records.push(record);
                    valid_len += line.len();
                }
                Err(e) if idx + 1 == lines.len() => {
                    warn!("Dropping torn record at end of {}: {}", self.path.display(), e);
                    self.truncate(valid_len)?;
                }
                Err(e) => {
                    return Err(LearningError::unavailable(
                        self.store,
                        format!("corrupt record at {}:{}: {}", self.path.display(), idx + 1, e),
                    ));
                }
            }
        }

        if valid_len > 0 && !content[..valid_len].ends_with('\n') {
            // Last record parsed but its newline never made it to disk
            self.write_raw_newline()?;
        }

        debug!("Replayed {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    /// Replace the log with exactly `records`
    pub fn compact(&self, records: &[T]) -> Result<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let result = (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
            fs::rename(&tmp, &self.path)?;
            Ok(())
        })();
        result.map_err(|e| e.into_unavailable(self.store))?;
        debug!("Compacted {} to {} records", self.path.display(), records.len());
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LearningError::unavailable(self.store, e)),
        }
    }

    fn truncate(&self, len: usize) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| LearningError::unavailable(self.store, e))?;
        file.set_len(len as u64).map_err(|e| LearningError::unavailable(self.store, e))?;
        file.sync_data().map_err(|e| LearningError::unavailable(self.store, e))
    }

    fn write_raw_newline(&self) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| LearningError::unavailable(self.store, e))?;
        file.write_all(b"\n").map_err(|e| LearningError::unavailable(self.store, e))?;
        file.sync_data().map_err(|e| LearningError::unavailable(self.store, e))
    }
}
