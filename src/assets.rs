//! The restore marker (`tool.assets.json`) written into every restored
//! package directory, and the lookup that produces it from the package's
//! tool descriptor.

use std::path::{Path, PathBuf};
use semver::Version;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use crate::configuration::{load_tool_configuration, TOOL_SETTINGS_FILE_NAME};
use crate::error::{Result, ToolError};
use crate::identity::{normalized_version, PackageId, RestoredCommand, Runner, ToolCommandName, ANY_RID};
use crate::util::write_atomically;

pub const ASSETS_FILE_NAME: &str = "tool.assets.json";

/// What a restore produced for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAssets {
    pub package_id: PackageId,
    pub version: String,
    pub target_framework: String,
    pub runtime_identifier: String,
    pub commands: Vec<AssetCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCommand {
    pub name: ToolCommandName,
    pub runner: Runner,
    /// Relative to the package directory, `/` separated.
    pub entry_point: String,
}

impl ToolAssets {
    pub fn path(package_dir: &Path) -> PathBuf {
        package_dir.join(ASSETS_FILE_NAME)
    }

    pub fn exists(package_dir: &Path) -> bool {
        Self::path(package_dir).is_file()
    }

    pub fn load(package_dir: &Path) -> Result<ToolAssets> {
        let path = Self::path(package_dir);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ToolError::Package(format!(
                "Failed to retrieve tool configuration from '{}': {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ToolError::Package(format!("The restore marker '{}' is corrupt: {e}", path.display()))
        })
    }

    pub fn save(&self, package_dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| ToolError::Package(format!("Could not serialize the restore marker: {e}")))?;
        write_atomically(&Self::path(package_dir), &json)
    }

    pub fn version(&self) -> Result<Version> {
        crate::identity::parse_version(&self.version).map_err(|e| {
            ToolError::Package(format!("Invalid version '{}' in restore marker: {e}", self.version))
        })
    }

    pub fn command_names(&self) -> Vec<ToolCommandName> {
        self.commands.iter().map(|c| c.name.clone()).collect()
    }

    /// Commands with their entry points resolved against `package_dir`.
    pub fn restored_commands(&self, package_dir: &Path) -> Vec<RestoredCommand> {
        self.commands
            .iter()
            .map(|c| RestoredCommand::new(c.name.clone(), c.runner, package_dir.join(&c.entry_point)))
            .collect()
    }
}

/// Finds the tool descriptor inside a restored package, validates it and
/// checks that the entry point it names was restored.
///
/// Descriptors live in `tools/<tfm>/<rid>/`. The requested framework and the
/// `any` runtime identifier are preferred when several are present.
pub fn read_tool_assets(
    package_dir: &Path,
    package_id: &PackageId,
    version: &Version,
    preferred_framework: Option<&str>,
) -> Result<ToolAssets> {
    let tools_dir = package_dir.join("tools");
    // (framework key, runtime key, descriptor path); keys are lowercased for matching only
    let mut candidates: Vec<(String, String, PathBuf)> = WalkDir::new(&tools_dir)
        .min_depth(3)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == TOOL_SETTINGS_FILE_NAME)
        .filter_map(|entry| {
            let rid_dir = entry.path().parent()?;
            let tfm_dir = rid_dir.parent()?;
            Some((
                tfm_dir.file_name()?.to_string_lossy().to_lowercase(),
                rid_dir.file_name()?.to_string_lossy().to_lowercase(),
                entry.path().to_path_buf(),
            ))
        })
        .collect();

    if candidates.is_empty() {
        return Err(ToolError::Package(format!(
            "Package '{package_id}' is missing the tool settings file {TOOL_SETTINGS_FILE_NAME}."
        )));
    }
    let preferred = preferred_framework.map(|f| f.to_lowercase());
    candidates.sort_by_key(|(tfm, rid, _)| {
        let tfm_rank = if Some(tfm) == preferred.as_ref() { 0 } else { 1 };
        let rid_rank = if rid == ANY_RID { 0 } else { 1 };
        (tfm_rank, rid_rank)
    });
    let (tfm, rid, settings_path) = candidates.swap_remove(0);
    // the entry point keeps the directory names as they are on disk
    let descriptor_dir = settings_path
        .parent()
        .and_then(|dir| dir.strip_prefix(package_dir).ok())
        .map(|dir| dir.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|| format!("tools/{tfm}/{rid}"));

    let configuration = load_tool_configuration(&settings_path).map_err(|e| match e {
        ToolError::Configuration(message) => {
            ToolError::Configuration(format!("package '{package_id}': {message}"))
        }
        other => other,
    })?;

    let entry_point = format!("{descriptor_dir}/{}", configuration.entry_point.replace('\\', "/"));
    if !package_dir.join(&entry_point).is_file() {
        return Err(ToolError::Package(format!(
            "Package '{package_id}' is missing entry point file {}.",
            configuration.entry_point
        )));
    }

    Ok(ToolAssets {
        package_id: package_id.clone(),
        version: normalized_version(version),
        target_framework: tfm,
        runtime_identifier: rid,
        commands: vec![AssetCommand {
            name: configuration.command_name,
            runner: configuration.runner,
            entry_point,
        }],
    })
}
