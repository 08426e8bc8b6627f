//! Local tool manifests (`dotnet-tools.json`).
//!
//! A manifest pins the tools a directory tree uses:
//!
//! ```json
//! {
//!   "version": 1,
//!   "isRoot": true,
//!   "tools": {
//!     "local.tool.console.a": { "version": "1.0.4", "commands": ["a"] }
//!   }
//! }
//! ```
//!
//! Manifests are looked up in `<dir>/.config/` and then `<dir>/` for every
//! directory from the start directory up to the file system root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::Regex;
use semver::Version;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use crate::error::{Result, ToolError};
use crate::identity::{normalized_version, parse_version, PackageId, ToolCommandName};
use crate::util::write_atomically;

pub const MANIFEST_FILE_NAME: &str = "dotnet-tools.json";
pub const MANIFEST_DIR_NAME: &str = ".config";
const SUPPORTED_VERSION: u32 = 1;

/// One tool declared by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolManifestPackage {
    pub package_id: PackageId,
    pub version: Version,
    pub commands: Vec<ToolCommandName>,
    pub target_framework: Option<String>,
    /// The manifest that declared it.
    pub manifest: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SerializableManifest {
    #[serde(default = "default_manifest_version")]
    version: u32,
    #[serde(default, rename = "isRoot")]
    is_root: bool,
    tools: Option<BTreeMap<String, SerializablePackage>>,
}

#[derive(Debug, Deserialize)]
struct SerializablePackage {
    version: Option<String>,
    commands: Option<Vec<String>>,
    #[serde(rename = "targetFramework")]
    target_framework: Option<String>,
}

fn default_manifest_version() -> u32 {
    SUPPORTED_VERSION
}

struct ParsedManifest {
    is_root: bool,
    packages: Vec<ToolManifestPackage>,
}

fn parse_manifest(path: &Path) -> Result<ParsedManifest> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ToolError::Manifest(format!("\tCannot read '{}': {e}", path.display()))
    })?;
    let manifest: SerializableManifest = serde_json::from_str(&text).map_err(|e| {
        ToolError::Manifest(format!("\tJson parsing error in file {}: {e}", path.display()))
    })?;

    let mut errors = Vec::new();
    if manifest.version == 0 {
        errors.push(format!("Manifest version 0 is not supported in {}.", path.display()));
    }
    if manifest.version > SUPPORTED_VERSION {
        errors.push(format!(
            "Manifest version is {}. This manifest may not be supported in this version, the supported version is {SUPPORTED_VERSION}. ({})",
            manifest.version,
            path.display()
        ));
    }
    let Some(tools) = manifest.tools else {
        errors.push(format!("Missing 'tools' in {}.", path.display()));
        return Err(manifest_error(&errors));
    };

    let mut packages = Vec::new();
    for (id, tool) in tools {
        let mut package_errors = Vec::new();
        let version = match tool.version.as_deref() {
            None => {
                package_errors.push("Missing 'version' field.".to_string());
                None
            }
            Some(text) => match parse_version(text) {
                Ok(version) => Some(version),
                Err(_) => {
                    package_errors.push(format!("Version {text} is invalid."));
                    None
                }
            },
        };
        if let Some(framework) = tool.target_framework.as_deref() {
            if !is_supported_framework(framework) {
                package_errors.push(format!("TargetFramework {framework} is unsupported."));
            }
        }
        let commands = tool.commands.unwrap_or_default();
        if commands.is_empty() {
            package_errors.push("Missing 'commands' entry.".to_string());
        }

        match version {
            Some(version) if package_errors.is_empty() => packages.push(ToolManifestPackage {
                package_id: PackageId::new(&id),
                version,
                commands: commands.iter().map(|c| ToolCommandName::new(c)).collect(),
                target_framework: tool.target_framework,
                manifest: path.to_path_buf(),
            }),
            _ => errors.push(format!("In package {id}:\n\t\t{}", package_errors.join("\n\t\t"))),
        }
    }

    if !errors.is_empty() {
        return Err(manifest_error(&errors));
    }
    Ok(ParsedManifest { is_root: manifest.is_root, packages })
}

fn manifest_error(errors: &[String]) -> ToolError {
    ToolError::Manifest(
        errors.iter().map(|e| format!("\t{e}")).collect::<Vec<_>>().join("\n"),
    )
}

static TARGET_FRAMEWORK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(net|netcoreapp|netstandard)\d+(\.\d+)*(-[a-z0-9.]+)?$")
        .expect("target framework pattern is valid")
});

fn is_supported_framework(framework: &str) -> bool {
    TARGET_FRAMEWORK.is_match(framework)
}

/// Finds and reads the manifests that apply to a directory.
#[derive(Debug, Clone)]
pub struct ToolManifestFinder {
    start_dir: PathBuf,
}

impl ToolManifestFinder {
    pub fn new<P: AsRef<Path>>(start_dir: P) -> Self {
        ToolManifestFinder { start_dir: start_dir.as_ref().to_path_buf() }
    }

    /// Candidate manifest paths, nearest first.
    pub fn possible_manifests(&self) -> Vec<PathBuf> {
        self.start_dir
            .ancestors()
            .flat_map(|dir| {
                [
                    dir.join(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME),
                    dir.join(MANIFEST_FILE_NAME),
                ]
            })
            .collect()
    }

    fn candidates(&self, explicit: Option<&Path>) -> Vec<PathBuf> {
        match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => self.possible_manifests(),
        }
    }

    /// Every package the applicable manifests declare.
    ///
    /// The nearest manifest wins when several declare the same package id, and
    /// the walk stops after the first manifest marked `isRoot`.
    pub fn find(&self, explicit: Option<&Path>) -> Result<Vec<ToolManifestPackage>> {
        let candidates = self.candidates(explicit);
        let mut found_any = false;
        let mut result: Vec<ToolManifestPackage> = Vec::new();
        for path in &candidates {
            if !path.is_file() {
                continue;
            }
            found_any = true;
            let parsed = parse_manifest(path)?;
            for package in parsed.packages {
                if !result.iter().any(|p| p.package_id == package.package_id) {
                    result.push(package);
                }
            }
            if parsed.is_root {
                debug!("stopping manifest walk at root manifest {}", path.display());
                break;
            }
        }
        if !found_any {
            return Err(ToolError::ManifestNotFound { searched: candidates });
        }
        Ok(result)
    }

    /// The nearest manifest file.
    pub fn find_first(&self) -> Result<PathBuf> {
        let candidates = self.possible_manifests();
        match candidates.iter().position(|path| path.is_file()) {
            Some(index) => Ok(candidates[index].clone()),
            None => Err(ToolError::ManifestNotFound { searched: candidates }),
        }
    }

    /// The nearest manifest declaring `package_id`.
    pub fn find_containing(&self, package_id: &PackageId) -> Result<PathBuf> {
        let candidates = self.possible_manifests();
        let mut found_any = false;
        for path in &candidates {
            if !path.is_file() {
                continue;
            }
            found_any = true;
            let parsed = parse_manifest(path)?;
            if parsed.packages.iter().any(|p| &p.package_id == package_id) {
                return Ok(path.clone());
            }
            if parsed.is_root {
                break;
            }
        }
        if !found_any {
            return Err(ToolError::ManifestNotFound { searched: candidates });
        }
        Err(ToolError::PackageNotInManifest(package_id.clone()))
    }

    /// The package exposing `command`, if any manifest applies and declares it.
    pub fn find_command(&self, command: &str) -> Result<Option<ToolManifestPackage>> {
        let packages = match self.find(None) {
            Ok(packages) => packages,
            Err(ToolError::ManifestNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(packages
            .into_iter()
            .find(|p| p.commands.iter().any(|c| c.as_str() == command)))
    }
}

/// Edits manifest files in place. Unknown fields are kept.
pub struct ToolManifestEditor;

impl ToolManifestEditor {
    /// Declares a package. Fails if the manifest already declares it.
    pub fn add(
        manifest: &Path,
        package_id: &PackageId,
        version: &Version,
        commands: &[ToolCommandName],
    ) -> Result<()> {
        let mut document = read_document(manifest)?;
        let tools = tools_mut(&mut document, manifest)?;
        if find_key(tools, package_id).is_some() {
            return Err(ToolError::Manifest(format!(
                "\tCannot add package. Manifest file {} already contains package {package_id}.",
                manifest.display()
            )));
        }
        tools.insert(
            package_id.to_string(),
            json!({
                "version": normalized_version(version),
                "commands": commands.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            }),
        );
        write_document(manifest, &document)
    }

    /// Removes a package declaration. Fails if the manifest does not declare it.
    pub fn remove(manifest: &Path, package_id: &PackageId) -> Result<()> {
        let mut document = read_document(manifest)?;
        let tools = tools_mut(&mut document, manifest)?;
        let Some(key) = find_key(tools, package_id) else {
            return Err(ToolError::Manifest(format!(
                "\tCannot remove package {package_id} from manifest file {}, the package is not in the manifest.",
                manifest.display()
            )));
        };
        tools.remove(&key);
        write_document(manifest, &document)
    }

    /// Writes an empty root manifest under `<dir>/.config/`.
    pub fn create_new(dir: &Path, force: bool) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME);
        if path.exists() && !force {
            return Err(ToolError::Manifest(format!(
                "\tThe manifest file {} already exists. Use --force to overwrite it.",
                path.display()
            )));
        }
        write_document(&path, &json!({ "version": SUPPORTED_VERSION, "isRoot": true, "tools": {} }))?;
        Ok(path)
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ToolError::Manifest(format!("\tCannot read '{}': {e}", path.display()))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        ToolError::Manifest(format!("\tJson parsing error in file {}: {e}", path.display()))
    })
}

fn write_document(path: &Path, document: &Value) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(document)
        .map_err(|e| ToolError::Manifest(format!("\tCannot serialize manifest: {e}")))?;
    json.push(b'\n');
    write_atomically(path, &json)
}

fn tools_mut<'a>(document: &'a mut Value, path: &Path) -> Result<&'a mut Map<String, Value>> {
    let root = document.as_object_mut().ok_or_else(|| {
        ToolError::Manifest(format!("\tThe manifest {} is not a JSON object.", path.display()))
    })?;
    root.entry("tools")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| ToolError::Manifest(format!("\t'tools' in {} is not an object.", path.display())))
}

fn find_key(tools: &Map<String, Value>, package_id: &PackageId) -> Option<String> {
    tools.keys().find(|key| &PackageId::new(key) == package_id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_manifest(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join(MANIFEST_FILE_NAME);
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reads_packages() {
        let dir = tempdir().unwrap();
        write_manifest(
            &dir.path().join(MANIFEST_DIR_NAME),
            r#"{"version":1,"isRoot":true,"tools":{"Local.Tool.Console.A":{"version":"1.0.4","commands":["a"],"targetFramework":"net8.0","extra":1}}}"#,
        );

        let packages = ToolManifestFinder::new(dir.path()).find(None).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].package_id.as_str(), "local.tool.console.a");
        assert_eq!(packages[0].version, Version::new(1, 0, 4));
        assert_eq!(packages[0].commands, vec![ToolCommandName::new("a")]);
        assert_eq!(packages[0].target_framework.as_deref(), Some("net8.0"));
    }

    #[test]
    fn test_nearest_manifest_wins_and_root_stops_walk() {
        let root = tempdir().unwrap();
        let outer = root.path().join("outer");
        let inner = outer.join("inner");
        write_manifest(
            root.path(),
            r#"{"version":1,"tools":{"beyond.root":{"version":"1.0.0","commands":["beyond"]}}}"#,
        );
        write_manifest(
            &outer,
            r#"{"version":1,"isRoot":true,"tools":{"tool.a":{"version":"1.0.0","commands":["a"]},"tool.b":{"version":"1.0.0","commands":["b"]}}}"#,
        );
        write_manifest(
            &inner.join(MANIFEST_DIR_NAME),
            r#"{"version":1,"tools":{"tool.a":{"version":"2.0.0","commands":["a"]}}}"#,
        );

        let finder = ToolManifestFinder::new(&inner);
        let packages = finder.find(None).unwrap();
        let a = packages.iter().find(|p| p.package_id.as_str() == "tool.a").unwrap();
        assert_eq!(a.version, Version::new(2, 0, 0));
        assert!(packages.iter().any(|p| p.package_id.as_str() == "tool.b"));
        assert!(!packages.iter().any(|p| p.package_id.as_str() == "beyond.root"));

        assert_eq!(finder.find_first().unwrap(), inner.join(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME));
        assert_eq!(finder.find_containing(&PackageId::new("tool.b")).unwrap(), outer.join(MANIFEST_FILE_NAME));
        assert!(matches!(
            finder.find_containing(&PackageId::new("beyond.root")),
            Err(ToolError::PackageNotInManifest(_))
        ));
        assert_eq!(finder.find_command("b").unwrap().unwrap().package_id.as_str(), "tool.b");
        assert!(finder.find_command("beyond").unwrap().is_none());
    }

    #[test]
    fn test_no_manifest_lists_searched_paths() {
        let dir = tempdir().unwrap();
        let finder = ToolManifestFinder::new(dir.path());
        match finder.find(None) {
            Err(ToolError::ManifestNotFound { searched }) => {
                assert!(searched.contains(&dir.path().join(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME)));
            }
            // a manifest above the temp directory would be found instead
            Ok(_) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
        let explicit = dir.path().join("nowhere.json");
        assert!(matches!(
            finder.find(Some(&explicit)),
            Err(ToolError::ManifestNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_manifest_aggregates_errors() {
        let dir = tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"{"version":2,"isRoot":true,"tools":{"no.version":{"commands":["x"]},"bad.version":{"version":"x.y","commands":["y"]},"no.commands":{"version":"1.0.0"}}}"#,
        );

        let err = ToolManifestFinder::new(dir.path()).find(Some(&path)).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Invalid manifest file:"));
        assert!(message.contains("supported version is 1"));
        assert!(message.contains("In package no.version"));
        assert!(message.contains("Version x.y is invalid"));
        assert!(message.contains("Missing 'commands' entry"));
    }

    #[test]
    fn test_target_framework_must_be_supported() {
        for framework in ["net8.0", "NET6.0", "netcoreapp3.1", "netstandard2.0", "net9.0-windows"] {
            assert!(is_supported_framework(framework), "{framework}");
        }
        for framework in ["", "net", "java8", "net8.0 ", "net8.0/../x"] {
            assert!(!is_supported_framework(framework), "{framework:?}");
        }

        let dir = tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"{"version":1,"isRoot":true,"tools":{"a.tool":{"version":"1.0.0","commands":["a"],"targetFramework":"java8"}}}"#,
        );
        let err = ToolManifestFinder::new(dir.path()).find(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("TargetFramework java8 is unsupported."));
    }

    #[test]
    fn test_editor_add_remove_and_create() {
        let dir = tempdir().unwrap();
        let path = ToolManifestEditor::create_new(dir.path(), false).unwrap();
        assert!(ToolManifestEditor::create_new(dir.path(), false).is_err());
        ToolManifestEditor::create_new(dir.path(), true).unwrap();

        let id = PackageId::new("Tool.A");
        ToolManifestEditor::add(&path, &id, &Version::new(1, 0, 4), &[ToolCommandName::new("a")]).unwrap();
        assert!(ToolManifestEditor::add(&path, &id, &Version::new(1, 0, 4), &[]).is_err());

        let packages = ToolManifestFinder::new(dir.path()).find(None).unwrap();
        assert_eq!(packages[0].package_id, id);
        assert_eq!(packages[0].manifest, path);

        ToolManifestEditor::remove(&path, &id).unwrap();
        assert!(ToolManifestEditor::remove(&path, &id).is_err());
        assert!(ToolManifestFinder::new(dir.path()).find(None).unwrap().is_empty());
    }

    #[test]
    fn test_editor_keeps_unknown_fields() {
        let dir = tempdir().unwrap();
        let path = write_manifest(dir.path(), r#"{"version":1,"isRoot":true,"comment":"keep","tools":{}}"#);
        ToolManifestEditor::add(&path, &PackageId::new("tool.a"), &Version::new(1, 0, 0), &[ToolCommandName::new("a")])
            .unwrap();
        let document: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["comment"], "keep");
        assert_eq!(document["tools"]["tool.a"]["commands"][0], "a");
    }
}
