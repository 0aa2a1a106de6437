//! Persistent record of the app actions seen on the action screen.
//!
//! Stored as `{"appActions": {"<app>": ["<action>", ...]}}`, sorted and
//! deduplicated, so operators know which actions `confirm` can target.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownActions {
    pub app_actions: BTreeMap<String, BTreeSet<String>>,
}

impl KnownActions {
    pub fn contains(&self, app: &str, action: &str) -> bool {
        self.app_actions
            .get(app)
            .is_some_and(|actions| actions.contains(action))
    }
}

/// The JSON file behind [`KnownActions`].
#[derive(Debug, Clone)]
pub struct KnownActionsStore {
    path: PathBuf,
}

impl KnownActionsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store. A missing or empty file is an empty store.
    pub fn load(&self) -> Result<KnownActions> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(KnownActions::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read known actions: {:?}", self.path))
            }
        };
        if json.trim().is_empty() {
            return Ok(KnownActions::default());
        }
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid known actions file: {:?}", self.path))
    }

    /// Add `action` under `app`. Returns whether it was new.
    pub fn record(&self, app: &str, action: &str) -> Result<bool> {
        let mut known = self.load()?;
        if known.contains(app, action) {
            return Ok(false);
        }

        info!("Saving itsme action: {}: {}", app, action);
        known
            .app_actions
            .entry(app.to_string())
            .or_default()
            .insert(action.to_string());
        self.save(&known)?;
        Ok(true)
    }

    /// Write through a sibling temp file so readers never see half a file.
    fn save(&self, known: &KnownActions) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let json =
            serde_json::to_string_pretty(known).context("Failed to serialize known actions")?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {:?}", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> KnownActionsStore {
        KnownActionsStore::new(dir.path().join("nested").join("known.json"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store_in(&dir).load().unwrap(), KnownActions::default());
    }

    #[test]
    fn test_empty_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known.json");
        std::fs::write(&path, "").unwrap();

        let known = KnownActionsStore::new(&path).load().unwrap();
        assert!(known.app_actions.is_empty());
    }

    #[test]
    fn test_record_deduplicates_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.record("My Bank", "Log in").unwrap());
        assert!(store.record("My Bank", "Approve payment").unwrap());
        assert!(!store.record("My Bank", "Log in").unwrap());
        assert!(store.record("Tax Office", "Log in").unwrap());

        let known = store.load().unwrap();
        let bank: Vec<_> = known.app_actions["My Bank"].iter().cloned().collect();
        assert_eq!(bank, ["Approve payment", "Log in"]);
        assert!(known.contains("Tax Office", "Log in"));
    }

    #[test]
    fn test_file_format_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record("My Bank", "Log in").unwrap();

        let json = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["appActions"]["My Bank"][0], "Log in");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = KnownActionsStore::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("Invalid known actions file"));
    }
}
