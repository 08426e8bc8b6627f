//! Turning a typed command name into something that can be executed.
//!
//! Resolvers are tried in a fixed order and the first one that recognizes the
//! command wins: local tools from the manifest, global tools by directory
//! convention, commands registered in the store index, then `PATH`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;
use crate::error::{Result, ToolError};
use crate::global::cache::LocalToolsResolverCache;
use crate::global::paths::Settings;
use crate::identity::{RestoredCommand, RestoredCommandIdentifier, Runner, ToolCommandName};
use crate::manifest::ToolManifestFinder;
use crate::store::ToolPackageStore;
use crate::util::{current_runtime_identifier, sorted_sub_directories, strip_command_prefix};

/// A program and its arguments, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    /// Managed commands run through the host with the entry point as first
    /// argument; executables run directly.
    pub fn for_restored(command: &RestoredCommand, dotnet_host: &str, arguments: &[String]) -> Self {
        let mut args = Vec::new();
        let program = match command.runner {
            Runner::Dotnet => {
                args.push(command.executable.clone().into_os_string());
                PathBuf::from(dotnet_host)
            }
            Runner::Executable => command.executable.clone(),
        };
        args.extend(arguments.iter().map(OsString::from));
        CommandSpec { program, args }
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResolverArguments {
    pub command_name: String,
    pub command_arguments: Vec<String>,
}

impl CommandResolverArguments {
    pub fn new(command_name: &str, command_arguments: &[String]) -> Self {
        CommandResolverArguments {
            command_name: command_name.to_string(),
            command_arguments: command_arguments.to_vec(),
        }
    }
}

pub trait CommandResolver {
    /// `Ok(None)` means "not mine, ask the next resolver".
    fn resolve(&self, args: &CommandResolverArguments) -> Result<Option<CommandSpec>>;
}

/// Tries resolvers in order; the first `Some` wins.
pub struct CompositeCommandResolver {
    resolvers: Vec<Box<dyn CommandResolver>>,
}

impl CompositeCommandResolver {
    pub fn new(resolvers: Vec<Box<dyn CommandResolver>>) -> Self {
        CompositeCommandResolver { resolvers }
    }

    /// Like [`CommandResolver::resolve`], but a command nobody knows is
    /// [`ToolError::CommandNotFound`].
    pub fn resolve_or_fail(&self, args: &CommandResolverArguments) -> Result<CommandSpec> {
        self.resolve(args)?
            .ok_or_else(|| ToolError::CommandNotFound(args.command_name.clone()))
    }
}

impl CommandResolver for CompositeCommandResolver {
    fn resolve(&self, args: &CommandResolverArguments) -> Result<Option<CommandSpec>> {
        for resolver in &self.resolvers {
            if let Some(spec) = resolver.resolve(args)? {
                return Ok(Some(spec));
            }
        }
        Ok(None)
    }
}

/// Commands declared by the applicable manifests and restored into the
/// resolver cache.
pub struct LocalToolsCommandResolver {
    finder: ToolManifestFinder,
    cache: LocalToolsResolverCache,
    dotnet_host: String,
    default_framework: String,
}

impl LocalToolsCommandResolver {
    pub fn new(
        finder: ToolManifestFinder,
        cache: LocalToolsResolverCache,
        dotnet_host: &str,
        default_framework: &str,
    ) -> Self {
        LocalToolsCommandResolver {
            finder,
            cache,
            dotnet_host: dotnet_host.to_string(),
            default_framework: default_framework.to_string(),
        }
    }

    /// The restored command for `command_name`, `None` if no manifest declares it.
    pub fn resolve_restored(&self, command_name: &str) -> Result<Option<RestoredCommand>> {
        let name = strip_command_prefix(command_name);
        if name.is_empty() {
            return Ok(None);
        }
        let Some(package) = self.finder.find_command(name)? else {
            return Ok(None);
        };
        let Some(declared) = package.commands.iter().find(|c| c.as_str() == name) else {
            return Ok(None);
        };
        let identifier = RestoredCommandIdentifier::new(
            package.package_id.clone(),
            package.version.clone(),
            package.target_framework.as_deref().unwrap_or(&self.default_framework),
            &current_runtime_identifier(),
            declared.clone(),
        );
        let Some(restored) = self.cache.try_load(&identifier) else {
            debug!("resolver cache miss for {identifier}");
            return Err(ToolError::NeedRestore(declared.clone()));
        };
        if !restored.executable.is_file() {
            debug!("cached executable {} is gone", restored.executable.display());
            return Err(ToolError::NeedRestore(declared.clone()));
        }
        Ok(Some(restored))
    }
}

impl CommandResolver for LocalToolsCommandResolver {
    fn resolve(&self, args: &CommandResolverArguments) -> Result<Option<CommandSpec>> {
        Ok(self
            .resolve_restored(&args.command_name)?
            .map(|restored| CommandSpec::for_restored(&restored, &self.dotnet_host, &args.command_arguments)))
    }
}

/// Global tools found by convention:
/// `<base>/<command>/<version>/tools/<tfm>/<rid>/<command>.dll`.
pub struct GlobalToolsCommandResolver {
    base: PathBuf,
    dotnet_host: String,
}

impl GlobalToolsCommandResolver {
    pub fn new<P: AsRef<Path>>(base: P, dotnet_host: &str) -> Self {
        GlobalToolsCommandResolver {
            base: base.as_ref().to_path_buf(),
            dotnet_host: dotnet_host.to_string(),
        }
    }
}

impl CommandResolver for GlobalToolsCommandResolver {
    fn resolve(&self, args: &CommandResolverArguments) -> Result<Option<CommandSpec>> {
        let name = strip_command_prefix(&args.command_name);
        if name.is_empty() || name.starts_with('.') {
            return Ok(None);
        }
        let command_dir = self.base.join(name);
        let Some(version) = sorted_sub_directories(&command_dir)?.into_iter().next() else {
            return Ok(None);
        };
        let dll_name = format!("{name}.dll");
        let entry_point = WalkDir::new(command_dir.join(version).join("tools"))
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .find(|entry| entry.file_type().is_file() && entry.file_name().to_string_lossy() == dll_name)
            .map(|entry| entry.into_path());
        Ok(entry_point.map(|path| {
            let command = RestoredCommand::new(ToolCommandName::new(name), Runner::Dotnet, path);
            CommandSpec::for_restored(&command, &self.dotnet_host, &args.command_arguments)
        }))
    }
}

/// Commands of installed packages, looked up through the store index.
pub struct InstalledCommandsResolver {
    store: ToolPackageStore,
    dotnet_host: String,
}

impl InstalledCommandsResolver {
    pub fn new(store: ToolPackageStore, dotnet_host: &str) -> Self {
        InstalledCommandsResolver { store, dotnet_host: dotnet_host.to_string() }
    }
}

impl CommandResolver for InstalledCommandsResolver {
    fn resolve(&self, args: &CommandResolverArguments) -> Result<Option<CommandSpec>> {
        let name = strip_command_prefix(&args.command_name);
        if name.is_empty() {
            return Ok(None);
        }
        let Some((package, command)) = self.store.find_command(name)? else {
            return Ok(None);
        };
        if !command.executable.is_file() {
            warn!(
                "{} {} declares '{name}' but {} is missing",
                package.id(),
                package.version(),
                command.executable.display()
            );
            return Ok(None);
        }
        Ok(Some(CommandSpec::for_restored(&command, &self.dotnet_host, &args.command_arguments)))
    }
}

/// Plain executables on `PATH`.
pub struct PathCommandResolver;

impl CommandResolver for PathCommandResolver {
    fn resolve(&self, args: &CommandResolverArguments) -> Result<Option<CommandSpec>> {
        match which::which(&args.command_name) {
            Ok(path) => Ok(Some(CommandSpec {
                program: path,
                args: args.command_arguments.iter().map(OsString::from).collect(),
            })),
            Err(e) => {
                debug!("'{}' is not on PATH: {e}", args.command_name);
                Ok(None)
            }
        }
    }
}

/// Local tools, global tools, installed commands, then `PATH`.
pub fn default_chain(settings: &Settings, cwd: &Path) -> CompositeCommandResolver {
    CompositeCommandResolver::new(vec![
        Box::new(local_tools_resolver(settings, cwd)),
        Box::new(GlobalToolsCommandResolver::new(settings.global_store_dir(), &settings.dotnet_host)),
        Box::new(InstalledCommandsResolver::new(settings.global_store(), &settings.dotnet_host)),
        Box::new(PathCommandResolver),
    ])
}

pub fn local_tools_resolver(settings: &Settings, cwd: &Path) -> LocalToolsCommandResolver {
    LocalToolsCommandResolver::new(
        ToolManifestFinder::new(cwd),
        LocalToolsResolverCache::new(&settings.resolver_cache_dir),
        &settings.dotnet_host,
        &settings.target_framework,
    )
}
