use std::path::{Path, PathBuf};
use std::process::ExitCode;
use anyhow::{Context, Result};
use colored::Colorize;
use tracing::{debug, warn};
use toolchest::error::ToolError;
use toolchest::global::cache::LocalToolsResolverCache;
use toolchest::global::paths::Settings;
use toolchest::identity::{PackageId, VersionRange};
use toolchest::installer::{
    install_local_tool, install_tool, packages_journal_dir, restore_local_tools, uninstall_local_tool,
    uninstall_tool, LocalToolContext, ToolLocation,
};
use toolchest::journal::recover;
use toolchest::manifest::{ToolManifestEditor, ToolManifestFinder};
use toolchest::resolver::{default_chain, local_tools_resolver, CommandResolver, CommandResolverArguments, CommandSpec};
use toolchest::restorer::{LocalFeedRestorer, ProcessRestorer, ProjectRestorer, RestoreRequest};
use toolchest::shims::{EnvironmentPath, ShellShimRepository};
use toolchest::util::COMMAND_PREFIX;
use crate::cli::{ScopeArgs, ToolCommand, ToolchestCommand, CLI};

/// Which set of tools a command works on.
#[derive(Debug, Clone, PartialEq)]
enum Scope {
    Global,
    ToolPath(PathBuf),
    Local(Option<PathBuf>),
}

pub fn execute(cli: CLI) -> Result<ExitCode> {
    let settings = Settings::load()?;
    debug!("settings: {settings:?}");
    match cli.command {
        ToolchestCommand::Tool { command } => execute_tool(&settings, command),
        ToolchestCommand::NewManifest { force } => {
            execute_new_manifest(force)?;
            Ok(ExitCode::SUCCESS)
        }
        ToolchestCommand::External(args) => execute_external(&settings, args),
    }
}

fn execute_tool(settings: &Settings, command: ToolCommand) -> Result<ExitCode> {
    match command {
        ToolCommand::Install { package_id, scope, version, source, framework, verbosity } => {
            let scope = resolve_scope(&scope, Scope::Local(None))?;
            let version = version
                .as_deref()
                .map(VersionRange::parse)
                .transpose()
                .map_err(|e| ToolError::Usage(format!("Invalid version range: {e}")))?;
            execute_install(
                settings,
                scope,
                &PackageId::new(&package_id),
                version,
                source,
                framework,
                verbosity,
            )?;
        }
        ToolCommand::Uninstall { package_id, scope } => {
            let scope = resolve_uninstall_scope(&scope)?;
            execute_uninstall(settings, scope, &PackageId::new(&package_id))?;
        }
        ToolCommand::List { scope } => {
            let scope = resolve_scope(&scope, Scope::Local(None))?;
            execute_list(settings, scope)?;
        }
        ToolCommand::Restore { tool_manifest, source, verbosity } => {
            return execute_restore(settings, tool_manifest.as_deref(), source, verbosity);
        }
        ToolCommand::Run { command_name, args } => {
            let cwd = std::env::current_dir()?;
            let spec = local_tools_resolver(settings, &cwd)
                .resolve(&CommandResolverArguments::new(&command_name, &args))?
                .ok_or(ToolError::CommandNotFound(command_name))?;
            return run(&spec);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// At most one of `--global`, `--tool-path` and `--local`/`--tool-manifest`.
fn resolve_scope(args: &ScopeArgs, default: Scope) -> Result<Scope, ToolError> {
    let local = args.local || args.tool_manifest.is_some();
    match (args.global, &args.tool_path, local) {
        (true, Some(_), _) => Err(ToolError::Usage(
            "Cannot have the global option (--global) and the tool path option (--tool-path) at the same time."
                .to_string(),
        )),
        (true, None, true) | (false, Some(_), true) => Err(ToolError::Usage(
            "The local option (--local) cannot be combined with the global option (--global) or the tool path option (--tool-path)."
                .to_string(),
        )),
        (true, None, false) => Ok(Scope::Global),
        (false, Some(path), false) => Ok(Scope::ToolPath(path.clone())),
        (false, None, true) => Ok(Scope::Local(args.tool_manifest.clone())),
        (false, None, false) => Ok(default),
    }
}

fn resolve_uninstall_scope(args: &ScopeArgs) -> Result<Scope, ToolError> {
    let scope = resolve_scope(args, Scope::Local(None))?;
    let explicit = args.global || args.tool_path.is_some() || args.local || args.tool_manifest.is_some();
    if !explicit {
        return Err(ToolError::Usage(
            "Please specify either the global option (--global) or the tool path option (--tool-path).".to_string(),
        ));
    }
    Ok(scope)
}

/// Finishes or undoes whatever an interrupted process left in `journal_dir`.
fn recover_journal(journal_dir: &Path) -> Result<()> {
    let recovery = recover(journal_dir)?;
    if recovery.rolled_back + recovery.completed + recovery.discarded > 0 {
        warn!("recovered interrupted transactions in {}: {recovery:?}", journal_dir.display());
    }
    Ok(())
}

/// A directory feed when `source` names one, the restore command otherwise.
fn restorer_for(settings: &Settings, source: Option<&str>) -> Box<dyn ProjectRestorer> {
    match source {
        Some(source) if Path::new(source).is_dir() => {
            debug!("restoring from local feed {source}");
            Box::new(LocalFeedRestorer::new(source))
        }
        _ => Box::new(ProcessRestorer::new(&settings.restore_command)),
    }
}

fn execute_install(
    settings: &Settings,
    scope: Scope,
    package_id: &PackageId,
    version: Option<VersionRange>,
    source: Option<String>,
    framework: Option<String>,
    verbosity: Option<String>,
) -> Result<()> {
    let restorer = restorer_for(settings, source.as_deref());
    let location = match &scope {
        Scope::Global => ToolLocation::global(settings),
        Scope::ToolPath(path) => ToolLocation::tool_path(path),
        Scope::Local(manifest) => {
            recover_journal(&packages_journal_dir(&settings.packages_dir))?;
            let cwd = std::env::current_dir()?;
            let cache = LocalToolsResolverCache::new(&settings.resolver_cache_dir);
            let context = LocalToolContext {
                restorer: restorer.as_ref(),
                cache: &cache,
                packages_dir: &settings.packages_dir,
                default_framework: &settings.target_framework,
                source,
                verbosity,
            };
            let installed =
                install_local_tool(&context, &cwd, manifest.as_deref(), package_id, version, framework.as_deref())?;
            let commands: Vec<String> = installed.commands.iter().map(|c| c.to_string()).collect();
            println!(
                "{}",
                format!(
                    "You can invoke the tool from this directory using the following commands: {}",
                    commands.iter().map(|c| format!("'toolchest tool run {c}'")).collect::<Vec<_>>().join(", ")
                )
                .green()
            );
            println!(
                "Tool '{}' (version '{}') was successfully installed. Entry is added to the manifest file {}.",
                installed.package_id,
                installed.version,
                installed.manifest.display()
            );
            return Ok(());
        }
    };

    recover_journal(&location.store.journal_dir())?;
    let shims = ShellShimRepository::new(&location.shims_dir, &settings.dotnet_host);
    let target_framework = framework.as_deref().unwrap_or(&settings.target_framework);
    let request = RestoreRequest::new(package_id.clone(), target_framework)
        .with_version(version)
        .with_source(source)
        .with_verbosity(verbosity);
    let installed = install_tool(&location.store, &shims, restorer.as_ref(), &request)?;

    if scope == Scope::Global {
        EnvironmentPath::new(&location.shims_dir).print_add_path_instructions_if_necessary();
    }
    let commands: Vec<String> = installed.commands.iter().map(|c| c.name.to_string()).collect();
    println!(
        "You can invoke the tool using the following command(s): {}",
        commands.join(", ")
    );
    println!(
        "{}",
        format!(
            "Tool '{}' (version '{}') was successfully installed.",
            installed.package.id(),
            installed.package.version()
        )
        .green()
    );
    Ok(())
}

fn execute_uninstall(settings: &Settings, scope: Scope, package_id: &PackageId) -> Result<()> {
    let location = match &scope {
        Scope::Global => ToolLocation::global(settings),
        Scope::ToolPath(path) => ToolLocation::tool_path(path),
        Scope::Local(manifest) => {
            let cwd = std::env::current_dir()?;
            let manifest = uninstall_local_tool(&cwd, manifest.as_deref(), package_id)?;
            println!(
                "Tool '{package_id}' was successfully uninstalled and removed from manifest file {}.",
                manifest.display()
            );
            return Ok(());
        }
    };

    recover_journal(&location.store.journal_dir())?;
    let shims = ShellShimRepository::new(&location.shims_dir, &settings.dotnet_host);
    let package = uninstall_tool(&location.store, &shims, package_id)?;
    println!(
        "Tool '{}' (version '{}') was successfully uninstalled.",
        package.id(),
        package.version()
    );
    Ok(())
}

fn execute_list(settings: &Settings, scope: Scope) -> Result<()> {
    let location = match &scope {
        Scope::Global => ToolLocation::global(settings),
        Scope::ToolPath(path) => ToolLocation::tool_path(path),
        Scope::Local(manifest) => return list_local_tools(manifest.as_deref()),
    };
    recover_journal(&location.store.journal_dir())?;

    println!("{:<40} {:<16} {}", "Package Id", "Version", "Commands");
    println!("{}", "-".repeat(80));
    for package in location.store.enumerate_packages()? {
        let commands = match package.commands() {
            Ok(commands) => commands.iter().map(|c| c.name.to_string()).collect::<Vec<_>>().join(", "),
            Err(e) => {
                warn!("{e}");
                "?".yellow().to_string()
            }
        };
        println!("{:<40} {:<16} {}", package.id().as_str(), package.version().to_string(), commands);
    }
    Ok(())
}

fn list_local_tools(manifest: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let packages = ToolManifestFinder::new(&cwd).find(manifest)?;
    println!("{:<40} {:<16} {:<24} {}", "Package Id", "Version", "Commands", "Manifest");
    println!("{}", "-".repeat(100));
    for package in packages {
        let commands: Vec<String> = package.commands.iter().map(|c| c.to_string()).collect();
        println!(
            "{:<40} {:<16} {:<24} {}",
            package.package_id.as_str(),
            package.version.to_string(),
            commands.join(", "),
            package.manifest.display()
        );
    }
    Ok(())
}

fn execute_restore(
    settings: &Settings,
    tool_manifest: Option<&Path>,
    source: Option<String>,
    verbosity: Option<String>,
) -> Result<ExitCode> {
    recover_journal(&packages_journal_dir(&settings.packages_dir))?;
    let cwd = std::env::current_dir()?;
    let packages = ToolManifestFinder::new(&cwd).find(tool_manifest)?;
    if packages.is_empty() {
        println!("No tools were found in the manifest files.");
        return Ok(ExitCode::SUCCESS);
    }

    let restorer = restorer_for(settings, source.as_deref());
    let cache = LocalToolsResolverCache::new(&settings.resolver_cache_dir);
    let context = LocalToolContext {
        restorer: restorer.as_ref(),
        cache: &cache,
        packages_dir: &settings.packages_dir,
        default_framework: &settings.target_framework,
        source,
        verbosity,
    };
    let summary = restore_local_tools(&context, &packages)?;
    for (package_id, version, commands) in &summary.restored {
        let commands: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
        println!(
            "Tool '{package_id}' (version '{version}') was restored. Available commands: {}",
            commands.join(", ")
        );
    }
    for (package_id, message) in &summary.failed {
        eprintln!("{}", format!("Tool '{package_id}' failed to restore: {message}").red());
    }
    if summary.is_success() {
        println!("{}", "Restore was successful.".green());
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{}", "Restore partially failed.".red());
        Ok(ExitCode::FAILURE)
    }
}

fn execute_new_manifest(force: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let manifest = ToolManifestEditor::create_new(&cwd, force)?;
    println!("The tool manifest file {} was created.", manifest.display());
    Ok(())
}

fn execute_external(settings: &Settings, args: Vec<String>) -> Result<ExitCode> {
    let Some((name, rest)) = args.split_first() else {
        return Err(ToolError::Usage("No command was given.".to_string()).into());
    };
    let cwd = std::env::current_dir()?;
    let spec = default_chain(settings, &cwd)
        .resolve_or_fail(&CommandResolverArguments::new(&format!("{COMMAND_PREFIX}{name}"), rest))?;
    run(&spec)
}

/// Runs `spec` with inherited standard streams and passes its exit code on.
fn run(spec: &CommandSpec) -> Result<ExitCode> {
    debug!("running {spec:?}");
    let status = spec
        .to_command()
        .status()
        .with_context(|| format!("Failed to start '{}'", spec.program.display()))?;
    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
