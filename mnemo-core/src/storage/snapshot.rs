use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{LearningError, Result};

/// Write `value` as pretty JSON through a temp file and rename
pub fn write_json_atomic<T: Serialize>(store: &'static str, path: &Path, value: &T) -> Result<()> {
    let result = (|| -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    result.map_err(|e| e.into_unavailable(store))
}

/// Read a JSON artifact; `None` when it does not exist yet
pub fn read_json<T: DeserializeOwned>(store: &'static str, path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LearningError::unavailable(store, format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LearningError::unavailable(store, e)),
    }
}

pub fn remove_if_exists(store: &'static str, path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LearningError::unavailable(store, e)),
    }
}
