use std::path::{Path, PathBuf};
use crate::error::{IoContext, Result};

/// Prefix the driver puts in front of a tool command when it dispatches
/// `toolchest <name>` to a tool.
pub const COMMAND_PREFIX: &str = "dotnet-";

/// Returns the runtime identifier of the host (e.g. `linux-x64`, `osx-arm64`)
/// based on the host system's architecture and operating system.
pub fn current_runtime_identifier() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "x86" => "x86",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    };
    let os = match std::env::consts::OS {
        "windows" => "win",
        "macos" => "osx",
        other => other,
    };
    format!("{os}-{arch}")
}

/// Strips [`COMMAND_PREFIX`] from a requested command name, if present.
pub fn strip_command_prefix(command_name: &str) -> &str {
    command_name.strip_prefix(COMMAND_PREFIX).unwrap_or(command_name)
}

/// A fresh, collision-free file name for staging and journal entries.
pub fn random_file_name() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Returns the staging directory used for same-filesystem moves next to `owner`.
pub fn stage_dir_of(owner: &Path) -> PathBuf {
    owner.join(".stage")
}

/// Removes `path` whether it is a file, a symlink or a directory. Missing paths are fine.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(crate::error::ToolError::io("Could not inspect", path, e)),
    };
    if metadata.is_dir() {
        std::fs::remove_dir_all(path).at("Could not remove directory", path)
    } else {
        std::fs::remove_file(path).at("Could not remove file", path)
    }
}

/// Whether a directory exists and has no entries.
pub fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Lists the names of the sub directories of `dir`, sorted. A missing directory
/// yields an empty list.
pub fn sorted_sub_directories(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).at("Could not read directory", dir)? {
        let entry = entry.at("Could not read directory", dir)?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(all(test, unix))]
pub(crate) fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Marks a file as executable for everyone on Unix. No-op elsewhere.
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path)
            .at("Could not read permissions of", path)?
            .permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(path, permissions).at("Could not set permissions of", path)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Writes `contents` to `path` through a sibling temporary file and a rename,
/// so readers never observe a half written file.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).at("Could not create directory", parent)?;
    }
    let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", random_file_name()));
    std::fs::write(&temp, contents).at("Could not write", &temp)?;
    std::fs::rename(&temp, path).at("Could not replace", path)
}
