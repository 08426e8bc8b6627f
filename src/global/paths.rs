use std::ffi::OsString;
use std::path::{Path, PathBuf};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;
use crate::error::{Result, ToolError};
use crate::store::ToolPackageStore;

/// Overrides every default location with a single root directory.
pub const HOME_ENV: &str = "TOOLCHEST_HOME";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_TARGET_FRAMEWORK: &str = "net8.0";
const DEFAULT_HOST: &str = "dotnet";
const STORE_DIR_NAME: &str = ".store";

/// Where things live and which external programs to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Global shim directory; the global store lives in its `.store`.
    pub tools_dir: PathBuf,
    /// Shared packages folder for local (manifest) tools.
    pub packages_dir: PathBuf,
    pub resolver_cache_dir: PathBuf,
    pub restore_command: String,
    pub dotnet_host: String,
    pub target_framework: String,
    /// The `config.toml` that was looked for.
    pub config_file: PathBuf,
}

/// Optional keys of `config.toml`. Relative paths are resolved against the
/// directory holding the file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    tools_dir: Option<PathBuf>,
    packages_dir: Option<PathBuf>,
    resolver_cache_dir: Option<PathBuf>,
    restore_command: Option<String>,
    dotnet_host: Option<String>,
    target_framework: Option<String>,
}

impl Settings {
    /// Resolves settings from `TOOLCHEST_HOME` or the platform directories,
    /// then applies `config.toml` when it exists.
    pub fn load() -> Result<Settings> {
        Settings::resolve(std::env::var_os(HOME_ENV))
    }

    pub fn resolve(home: Option<OsString>) -> Result<Settings> {
        let settings = match home.filter(|h| !h.is_empty()) {
            Some(home) => Settings::from_home(PathBuf::from(home)),
            None => Settings::from_project_dirs()?,
        };
        settings.with_config_file()
    }

    /// Every location under one root directory.
    pub fn from_home<P: AsRef<Path>>(home: P) -> Settings {
        let home = home.as_ref();
        Settings {
            tools_dir: home.join("tools"),
            packages_dir: home.join("packages"),
            resolver_cache_dir: home.join("cache"),
            restore_command: DEFAULT_HOST.to_string(),
            dotnet_host: DEFAULT_HOST.to_string(),
            target_framework: DEFAULT_TARGET_FRAMEWORK.to_string(),
            config_file: home.join(CONFIG_FILE_NAME),
        }
    }

    fn from_project_dirs() -> Result<Settings> {
        let dirs = ProjectDirs::from("org", "toolchest", "toolchest")
            .ok_or_else(|| ToolError::Settings("Could not get project directories".to_string()))?;
        let data_dir = dirs.data_dir();
        Ok(Settings {
            tools_dir: data_dir.join("tools"),
            packages_dir: data_dir.join("packages"),
            resolver_cache_dir: dirs.cache_dir().join("resolver"),
            restore_command: DEFAULT_HOST.to_string(),
            dotnet_host: DEFAULT_HOST.to_string(),
            target_framework: DEFAULT_TARGET_FRAMEWORK.to_string(),
            config_file: dirs.config_dir().join(CONFIG_FILE_NAME),
        })
    }

    fn with_config_file(mut self) -> Result<Settings> {
        let path = self.config_file.clone();
        if !path.is_file() {
            return Ok(self);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ToolError::Settings(format!("cannot read '{}': {e}", path.display())))?;
        let config: ConfigFile = toml::from_str(&text)
            .map_err(|e| ToolError::Settings(format!("'{}': {e}", path.display())))?;
        let base = path.parent().unwrap_or(Path::new("."));
        let absolute = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };

        if let Some(dir) = config.tools_dir {
            self.tools_dir = absolute(dir);
        }
        if let Some(dir) = config.packages_dir {
            self.packages_dir = absolute(dir);
        }
        if let Some(dir) = config.resolver_cache_dir {
            self.resolver_cache_dir = absolute(dir);
        }
        if let Some(command) = config.restore_command {
            self.restore_command = command;
        }
        if let Some(host) = config.dotnet_host {
            self.dotnet_host = host;
        }
        if let Some(framework) = config.target_framework {
            self.target_framework = framework;
        }
        debug!("applied settings from {}", path.display());
        Ok(self)
    }

    pub fn global_store_dir(&self) -> PathBuf {
        self.tools_dir.join(STORE_DIR_NAME)
    }

    pub fn global_store(&self) -> ToolPackageStore {
        ToolPackageStore::new(self.global_store_dir())
    }
}

/// Store used for an explicit `--tool-path`.
pub fn tool_path_store_dir(tool_path: &Path) -> PathBuf {
    tool_path.join(STORE_DIR_NAME)
}
