//! Portable snapshot of everything the core has learned

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::LearningCore;
use crate::error::{LearningError, Result};
use crate::validation::AuditFilter;

const EXPORT: &str = "export";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub name: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub created_at: DateTime<Utc>,
    pub files: Vec<ExportedFile>,
    /// Stores left out because they are unavailable
    pub skipped: Vec<String>,
}

impl LearningCore {
    /// Write one JSON file per store plus `manifest.json` into `target`
    pub fn export_snapshot(&self, target: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(target).map_err(|e| LearningError::unavailable(EXPORT, e))?;

        let sections: [(&str, &'static str, Result<Value>); 6] = [
            ("memories.json", "memory", self.memory().map(|s| json!(s.all()))),
            ("preferences.json", "preferences", self.preferences().map(|s| json!(s.snapshot()))),
            (
                "knowledge.json",
                "knowledge",
                self.knowledge().map(|g| json!({ "items": g.items(), "edges": g.all_edges() })),
            ),
            (
                "feedback.json",
                "feedback",
                self.feedback().map(|l| {
                    json!({ "events": l.events(), "patterns": l.patterns(1), "rules": l.rules() })
                }),
            ),
            (
                "behavior.json",
                "adaptation",
                self.adaptation().map(|e| {
                    json!({
                        "current": e.current(),
                        "shadow": e.shadow(),
                        "scheduled": e.scheduled(),
                        "history": e.history(),
                        "rules": e.rules(),
                    })
                }),
            ),
            (
                "audit.json",
                "validation",
                self.validation().map(|g| {
                    json!({ "requests": g.requests(), "audit": g.audit_trail(&AuditFilter::default()) })
                }),
            ),
        ];

        let mut files = Vec::new();
        let mut skipped = Vec::new();
        for (name, store, section) in sections {
            match section {
                Ok(value) => files.push(write_file(target, name, &value)?),
                Err(e) => {
                    warn!("Export skips {}: {}", store, e);
                    skipped.push(store.to_string());
                }
            }
        }

        let manifest = ExportManifest { created_at: Utc::now(), files, skipped };
        write_file(target, "manifest.json", &json!(manifest))?;
        info!("Exported {} files to {}", manifest.files.len(), target.display());
        Ok(manifest)
    }
}

fn write_file(target: &Path, name: &str, value: &Value) -> Result<ExportedFile> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| LearningError::unavailable(EXPORT, e))?;
    fs::write(target.join(name), &bytes).map_err(|e| LearningError::unavailable(EXPORT, e))?;
    Ok(ExportedFile {
        name: name.to_string(),
        bytes: bytes.len() as u64,
        sha256: format!("{:x}", Sha256::digest(&bytes)),
    })
}
