use std::path::PathBuf;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Print debug output, including full error details
    #[clap(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: ToolchestCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum ToolchestCommand {
    /// Install, uninstall, list, restore and run tools
    Tool {
        #[command(subcommand)]
        command: ToolCommand,
    },
    /// Creates a root `dotnet-tools.json` manifest in `.config/` of the current directory
    NewManifest {
        /// Overwrite an existing manifest
        #[clap(long)]
        force: bool,
    },
    /// Runs `dotnet-<name>` from local, global or installed tools, or from `PATH`
    #[command(external_subcommand)]
    External(Vec<String>),
}

/// Where a tool is installed. At most one of them may be given.
#[derive(Debug, Args, Clone, PartialEq, Default)]
pub struct ScopeArgs {
    /// The user wide tool directory
    #[clap(short, long)]
    pub global: bool,
    /// A directory holding both the shims and the store
    #[clap(long, value_name = "DIR")]
    pub tool_path: Option<PathBuf>,
    /// The nearest tool manifest
    #[clap(long)]
    pub local: bool,
    /// Use this manifest instead of searching for one (implies --local)
    #[clap(long, value_name = "FILE")]
    pub tool_manifest: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum ToolCommand {
    /// Installs a tool package globally, into a tool path or into a manifest
    Install {
        /// Package id
        package_id: String,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Version or version range to install. Defaults to the highest stable version
        #[clap(long)]
        version: Option<String>,
        /// Package source: a feed URL, or a directory of `.nupkg` files
        #[clap(long)]
        source: Option<String>,
        /// Target framework to pick the tool's assets for
        #[clap(long)]
        framework: Option<String>,
        /// Verbosity passed to the restore command
        #[clap(long)]
        verbosity: Option<String>,
    },
    /// Uninstalls a tool package. The scope has to be given explicitly
    Uninstall {
        /// Package id
        package_id: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Lists installed tools. Defaults to the tools of the nearest manifests
    List {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Restores every tool declared by the manifests
    Restore {
        /// Use this manifest instead of searching for one
        #[clap(long, value_name = "FILE")]
        tool_manifest: Option<PathBuf>,
        /// Package source: a feed URL, or a directory of `.nupkg` files
        #[clap(long)]
        source: Option<String>,
        /// Verbosity passed to the restore command
        #[clap(long)]
        verbosity: Option<String>,
    },
    /// Runs a local tool command
    Run {
        command_name: String,
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}
