use std::path::{Path, PathBuf};
use tracing::debug;
use crate::error::{IoContext, Result, ToolError};
use crate::identity::{Runner, ToolCommandName};
use crate::journal::{JournalEntry, Transaction};
use crate::util::stage_dir_of;

/// Creates and removes the launchers that put tool commands on `PATH`.
///
/// Every mutation goes through a [`Transaction`] so a failed install or
/// uninstall leaves the shim directory as it was.
pub trait ShimRepository {
    fn create_shim(
        &self,
        tx: &mut Transaction,
        target: &Path,
        command: &ToolCommandName,
        runner: Runner,
    ) -> Result<()>;

    fn remove_shim(&self, tx: &mut Transaction, command: &ToolCommandName) -> Result<()>;

    fn shim_exists(&self, command: &ToolCommandName) -> bool;
}

/// Shims as small launcher files in one directory.
///
/// On Unix a `dotnet` command gets a `#!/bin/sh` script that starts the host
/// with the entry point, an `executable` command gets a symlink. On Windows
/// every shim is a `.cmd` script.
#[derive(Debug, Clone)]
pub struct ShellShimRepository {
    shims_dir: PathBuf,
    dotnet_host: String,
}

impl ShellShimRepository {
    pub fn new<P: AsRef<Path>>(shims_dir: P, dotnet_host: &str) -> Self {
        ShellShimRepository {
            shims_dir: shims_dir.as_ref().to_path_buf(),
            dotnet_host: dotnet_host.to_string(),
        }
    }

    pub fn shims_dir(&self) -> &Path {
        &self.shims_dir
    }

    /// Every file that makes up the shim of `command`.
    pub fn shim_paths(&self, command: &ToolCommandName) -> Vec<PathBuf> {
        #[cfg(windows)]
        {
            vec![self.shims_dir.join(format!("{command}.cmd"))]
        }
        #[cfg(not(windows))]
        {
            vec![self.shims_dir.join(command.as_str())]
        }
    }

    fn script(&self, target: &Path, runner: Runner) -> String {
        #[cfg(windows)]
        {
            match runner {
                Runner::Dotnet => format!(
                    "@echo off\r\n\"{}\" \"{}\" %*\r\n",
                    self.dotnet_host,
                    target.display()
                ),
                Runner::Executable => format!("@echo off\r\n\"{}\" %*\r\n", target.display()),
            }
        }
        #[cfg(not(windows))]
        {
            match runner {
                Runner::Dotnet => format!(
                    "#!/bin/sh\nexec \"{}\" \"{}\" \"$@\"\n",
                    self.dotnet_host,
                    target.display()
                ),
                Runner::Executable => format!("#!/bin/sh\nexec \"{}\" \"$@\"\n", target.display()),
            }
        }
    }

    fn write_shim(&self, shim: &Path, target: &Path, runner: Runner) -> Result<()> {
        #[cfg(unix)]
        {
            if runner == Runner::Executable {
                std::os::unix::fs::symlink(target, shim).at("Could not create shim", shim)?;
                return Ok(());
            }
        }
        std::fs::write(shim, self.script(target, runner)).at("Could not create shim", shim)?;
        crate::util::set_executable(shim)
    }
}

impl ShimRepository for ShellShimRepository {
    fn create_shim(
        &self,
        tx: &mut Transaction,
        target: &Path,
        command: &ToolCommandName,
        runner: Runner,
    ) -> Result<()> {
        if target.as_os_str().is_empty() {
            return Err(ToolError::ShellShim("Cannot create a shim without a target.".to_string()));
        }
        if command.as_str().trim().is_empty() {
            return Err(ToolError::ShellShim("Cannot create a shim without a command name.".to_string()));
        }
        if self.shim_exists(command) {
            return Err(ToolError::ShimConflict(command.clone()));
        }
        std::fs::create_dir_all(&self.shims_dir).at("Could not create shim directory", &self.shims_dir)?;

        for shim in self.shim_paths(command) {
            tx.record(JournalEntry::Created { path: shim.clone() })?;
            self.write_shim(&shim, target, runner).map_err(|e| {
                ToolError::ShellShim(format!("Failed to create shell shim for command '{command}': {e}"))
            })?;
            debug!("created shim {} -> {}", shim.display(), target.display());
        }
        Ok(())
    }

    fn remove_shim(&self, tx: &mut Transaction, command: &ToolCommandName) -> Result<()> {
        let stage = stage_dir_of(&self.shims_dir);
        for shim in self.shim_paths(command) {
            if std::fs::symlink_metadata(&shim).is_err() {
                continue;
            }
            tx.move_aside(&shim, &stage).map_err(|e| {
                ToolError::ShellShim(format!("Failed to remove shell shim for command '{command}': {e}"))
            })?;
            debug!("removed shim {}", shim.display());
        }
        Ok(())
    }

    fn shim_exists(&self, command: &ToolCommandName) -> bool {
        self.shim_paths(command)
            .iter()
            .any(|shim| std::fs::symlink_metadata(shim).is_ok())
    }
}

/// Tells the user how to put a shim directory on `PATH`.
#[derive(Debug, Clone)]
pub struct EnvironmentPath {
    shims_dir: PathBuf,
}

impl EnvironmentPath {
    pub fn new<P: AsRef<Path>>(shims_dir: P) -> Self {
        EnvironmentPath { shims_dir: shims_dir.as_ref().to_path_buf() }
    }

    pub fn is_on_path(&self) -> bool {
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        let wanted = canonical(&self.shims_dir);
        std::env::split_paths(&path).any(|entry| canonical(&entry) == wanted)
    }

    /// The shell line that adds the shim directory to `PATH`.
    pub fn instructions(&self) -> String {
        let dir = self.shims_dir.display();
        if cfg!(windows) {
            if is_power_shell() {
                format!("$env:PATH += \";{dir}\"")
            } else {
                format!("setx PATH \"%PATH%;{dir}\"")
            }
        } else {
            format!("export PATH=\"$PATH:{dir}\"")
        }
    }

    pub fn print_add_path_instructions_if_necessary(&self) {
        if self.is_on_path() {
            return;
        }
        println!(
            "Tools directory '{}' is not currently on the PATH environment variable.",
            self.shims_dir.display()
        );
        println!("You can add it to the current session by running:");
        println!();
        println!("  {}", self.instructions());
        println!();
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_power_shell() -> bool {
    std::env::var("PSModulePath").is_ok() || std::env::var("Pwsh").is_ok()
}
