use std::collections::HashMap;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::error::{Result, ToolError};
use crate::identity::{
    normalized_version, parse_version, PackageId, RestoredCommand, RestoredCommandIdentifier, Runner,
    ToolCommandName,
};
use crate::util::write_atomically;

/// Format version of the on-disk layout, part of the cache path.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Maps restored local tool commands to their executables so local commands
/// resolve without re-reading package contents.
///
/// One JSON file per package id under `<cache dir>/<format version>/`.
/// The cache is derived data: losing it only means running a restore again.
#[derive(Debug, Clone)]
pub struct LocalToolsResolverCache {
    dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRow {
    version: String,
    target_framework: String,
    runtime_identifier: String,
    command_name: ToolCommandName,
    runner: Runner,
    path_to_executable: PathBuf,
}

impl CacheRow {
    fn matches(&self, id: &RestoredCommandIdentifier) -> bool {
        parse_version(&self.version).is_ok_and(|v| v == id.version)
            && self.target_framework == id.target_framework
            && self.runtime_identifier == id.runtime_identifier
            && self.command_name == id.command_name
    }
}

impl LocalToolsResolverCache {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        LocalToolsResolverCache {
            dir: cache_dir.as_ref().join(CACHE_FORMAT_VERSION.to_string()),
        }
    }

    fn file_of(&self, package_id: &PackageId) -> PathBuf {
        self.dir.join(package_id.as_str())
    }

    fn read_rows(&self, package_id: &PackageId) -> Vec<CacheRow> {
        let path = self.file_of(package_id);
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        match serde_json::from_str(&text) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("ignoring unreadable resolver cache '{}': {e}", path.display());
                Vec::new()
            }
        }
    }

    /// Stores every entry. Existing rows with the same identifier are replaced.
    ///
    /// Each package's file is rewritten atomically, so a reader sees either
    /// the old or the new rows.
    ///
    /// # Errors
    ///
    /// Returns an error if a cache file cannot be serialized or written.
    /// Packages saved before the failure keep their new rows.
    pub fn save(&self, entries: &HashMap<RestoredCommandIdentifier, RestoredCommand>) -> Result<()> {
        let mut by_package: HashMap<&PackageId, Vec<(&RestoredCommandIdentifier, &RestoredCommand)>> =
            HashMap::new();
        for (id, command) in entries {
            by_package.entry(&id.package_id).or_default().push((id, command));
        }

        for (package_id, new_entries) in by_package {
            let mut rows = self.read_rows(package_id);
            for (id, command) in new_entries {
                rows.retain(|row| !row.matches(id));
                rows.push(CacheRow {
                    version: normalized_version(&id.version),
                    target_framework: id.target_framework.clone(),
                    runtime_identifier: id.runtime_identifier.clone(),
                    command_name: id.command_name.clone(),
                    runner: command.runner,
                    path_to_executable: command.executable.clone(),
                });
            }
            let json = serde_json::to_vec_pretty(&rows)
                .map_err(|e| ToolError::Package(format!("Could not serialize the resolver cache: {e}")))?;
            write_atomically(&self.file_of(package_id), &json)?;
            debug!("saved {} resolver cache row(s) for {package_id}", rows.len());
        }
        Ok(())
    }

    /// Exact lookup.
    pub fn load(&self, id: &RestoredCommandIdentifier) -> Option<RestoredCommand> {
        self.read_rows(&id.package_id)
            .into_iter()
            .find(|row| row.matches(id))
            .map(|row| RestoredCommand::new(row.command_name, row.runner, row.path_to_executable))
    }

    /// Exact lookup, then the same identifier with the `any` runtime identifier.
    pub fn try_load(&self, id: &RestoredCommandIdentifier) -> Option<RestoredCommand> {
        self.load(id).or_else(|| self.load(&id.with_any_rid()))
    }
}
