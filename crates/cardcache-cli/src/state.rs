//! Record of the installed proxy version.
//!
//! The registration lives only as long as one `cardcache` run. This file
//! remembers which version finished installing so later runs can restore it
//! instead of installing again.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State file name in cache directory
const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRecord {
    pub version: String,
    pub origin: String,
    pub installed_at: DateTime<Utc>,
}

impl InstallRecord {
    pub fn new(version: &str, origin: &str) -> Self {
        Self {
            version: version.to_string(),
            origin: origin.to_string(),
            installed_at: Utc::now(),
        }
    }

    /// Whether this record still describes the configured version and origin
    pub fn matches(&self, version: &str, origin: &str) -> bool {
        self.version == version && self.origin == origin
    }
}

pub struct InstallState {
    cache_dir: PathBuf,
    pub record: Option<InstallRecord>,
}

impl InstallState {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            record: None,
        }
    }

    /// Load the record from disk. Returns whether one was found.
    pub fn load(&mut self) -> Result<bool> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(false);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read state file")?;
        let record: InstallRecord =
            serde_json::from_str(&contents).context("Failed to parse state file")?;
        self.record = Some(record);
        Ok(true)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(ref record) = self.record {
            let path = self.state_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(record)?;
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.record = None;
        let path = self.state_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn update(&mut self, record: InstallRecord) {
        self.record = Some(record);
    }

    fn state_path(&self) -> PathBuf {
        self.cache_dir.join(STATE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let mut state = InstallState::new(dir.path().to_path_buf());
        assert!(!state.load().unwrap());

        state.update(InstallRecord::new("bj-trainer-v1", "http://localhost:8000/"));
        state.save().unwrap();

        let mut reloaded = InstallState::new(dir.path().to_path_buf());
        assert!(reloaded.load().unwrap());
        let record = reloaded.record.clone().unwrap();
        assert!(record.matches("bj-trainer-v1", "http://localhost:8000/"));
        assert!(!record.matches("bj-trainer-v2", "http://localhost:8000/"));

        reloaded.clear().unwrap();
        assert!(!InstallState::new(dir.path().to_path_buf()).load().unwrap());
    }
}
