use std::path::{Path, PathBuf};
use semver::Version;
use crate::identity::{PackageId, ToolCommandName};

pub type Result<T, E = ToolError> = std::result::Result<T, E>;

/// Errors raised by the tool lifecycle. Every variant renders as one
/// user-readable line.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("A tool with the package id '{package_id}' could not be found.")]
    NotInstalled { package_id: PackageId },

    #[error(
        "There are multiple versions of tool '{package_id}' installed ({}) and it cannot be determined which one to use.",
        join_versions(.versions)
    )]
    AmbiguousVersion { package_id: PackageId, versions: Vec<Version> },

    #[error("Invalid tool configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    Package(String),

    #[error("Tool '{package_id}' (version '{version}') is already installed.")]
    PackageConflict { package_id: PackageId, version: String },

    #[error("Failed to restore package '{package_id}':\n{output}")]
    RestoreFailed { package_id: PackageId, output: String },

    #[error("{0}")]
    ShellShim(String),

    #[error("Command '{0}' conflicts with an existing command from another tool.")]
    ShimConflict(ToolCommandName),

    #[error("Invalid manifest file:\n{0}")]
    Manifest(String),

    #[error("Cannot find a manifest file. Searched:\n{}", join_paths(.searched))]
    ManifestNotFound { searched: Vec<PathBuf> },

    #[error("Cannot find a manifest file containing package id '{0}'.")]
    PackageNotInManifest(PackageId),

    #[error("Run \"toolchest tool restore\" to make the \"{0}\" command available.")]
    NeedRestore(ToolCommandName),

    #[error("Could not execute because the specified command or file '{0}' was not found.")]
    CommandNotFound(String),

    #[error("{0}")]
    CommandNameCollision(String),

    #[error("Transaction journal error: {0}")]
    Journal(String),

    #[error("{0}")]
    Usage(String),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("{context} '{}': {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        ToolError::Io { context, path: path.to_path_buf(), source }
    }
}

/// Attaches the path an I/O operation was working on.
pub trait IoContext<T> {
    fn at(self, context: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, context: &'static str, path: &Path) -> Result<T> {
        self.map_err(|e| ToolError::io(context, path, e))
    }
}

fn join_versions(versions: &[Version]) -> String {
    versions.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| format!("\t{}", p.display())).collect::<Vec<_>>().join("\n")
}
