use std::collections::BTreeMap;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::{Result, ToolError};
use crate::identity::{PackageId, ToolCommandName};

pub const INDEX_FILE_NAME: &str = ".index.toml";

/// The store index (`.index.toml`): which versions of which packages are
/// installed, and the commands each one exposes.
///
/// The directories of the store stay the source of truth; the index only
/// avoids reading every package when looking up a command.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct StoreIndex {
    #[serde(default)]
    pub packages: BTreeMap<String, BTreeMap<String, IndexedVersion>>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexedVersion {
    pub commands: Vec<String>,
}

impl StoreIndex {
    /// Loads the index. `Ok(None)` when the file does not exist or cannot be
    /// parsed; callers rebuild it from the store in that case.
    pub fn load<P: AsRef<Path>>(path: P) -> Option<StoreIndex> {
        let content = std::fs::read_to_string(path).ok()?;
        toml::from_str(&content).ok()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ToolError::Package(format!("Could not serialize the store index: {e}")))
    }

    pub fn insert(&mut self, package_id: &PackageId, version: &str, commands: &[ToolCommandName]) {
        self.packages.entry(package_id.to_string()).or_default().insert(
            version.to_string(),
            IndexedVersion {
                commands: commands.iter().map(|c| c.to_string()).collect(),
            },
        );
    }

    pub fn remove(&mut self, package_id: &PackageId, version: &str) {
        if let Some(versions) = self.packages.get_mut(package_id.as_str()) {
            versions.remove(version);
            if versions.is_empty() {
                self.packages.remove(package_id.as_str());
            }
        }
    }

    /// Every installed (package id, version) that exposes `command`.
    pub fn find_command(&self, command: &str) -> Vec<(PackageId, String)> {
        let mut found = Vec::new();
        for (package_id, versions) in &self.packages {
            for (version, indexed) in versions {
                if indexed.commands.iter().any(|c| c == command) {
                    found.push((PackageId::new(package_id), version.clone()));
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_insert_remove_and_find() {
        let mut index = StoreIndex::default();
        let id = PackageId::new("Tool.A");
        index.insert(&id, "1.0.0", &[ToolCommandName::new("a")]);
        index.insert(&id, "2.0.0", &[ToolCommandName::new("a")]);
        index.insert(&PackageId::new("tool.b"), "1.0.0", &[ToolCommandName::new("b")]);

        assert_eq!(index.find_command("a").len(), 2);
        assert_eq!(index.find_command("b"), vec![(PackageId::new("tool.b"), "1.0.0".to_string())]);
        assert!(index.find_command("c").is_empty());

        index.remove(&id, "1.0.0");
        index.remove(&id, "2.0.0");
        assert!(!index.packages.contains_key("tool.a"));
    }

    #[test]
    fn test_toml_round_trip_and_unreadable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE_NAME);
        let mut index = StoreIndex::default();
        index.insert(&PackageId::new("tool.a"), "1.0.4", &[ToolCommandName::new("a")]);
        std::fs::write(&path, index.to_toml().unwrap()).unwrap();
        assert_eq!(StoreIndex::load(&path), Some(index));

        std::fs::write(&path, "packages = 3").unwrap();
        assert_eq!(StoreIndex::load(&path), None);
        assert_eq!(StoreIndex::load(dir.path().join("missing")), None);
    }
}
