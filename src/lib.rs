//! # Toolchest Core Library
//!
//! This crate contains the core logic of the `toolchest` tool: a manager for .NET tool packages that installs,
//! restores, resolves and uninstalls command-line tools either globally (per user), into an explicit tool path,
//! or locally per project through a `dotnet-tools.json` manifest.
//!
//! Every install and uninstall runs inside a journaled [`journal::Transaction`], so a failure at any step leaves
//! the store, the shims and the manifests as they were.
//!
//! This library is built for the `toolchest` CLI, but you can also reuse it as a backend in other tools.
//!
//! ## Modules Overview
//! - [`identity`] – Package ids, command names, versions and restored command identities
//! - [`error`] – The error type shared by every module
//! - [`configuration`] – Parsing and validating the `DotnetToolSettings.xml` tool descriptor
//! - [`journal`] – File system transactions with rollback and crash recovery
//! - [`assets`] – Locating a tool's descriptor and entry point inside a restored package
//! - [`index`] – Command index of a package store
//! - [`store`] – The versioned package store (`<root>/<id>/<version>/`)
//! - [`restorer`] – Restoring packages through an external command or from a local feed
//! - [`installer`] – Global, tool-path and local install, uninstall and restore
//! - [`shims`] – Creating the launchers that put tool commands on `PATH`
//! - [`manifest`] – Finding, reading and editing tool manifests
//! - [`resolver`] – Turning a command name into something runnable
//! - [`global`] – Settings, default locations and the local tools resolver cache
//! - [`util`] – Shared file system helpers

pub mod identity;
pub mod error;
pub mod configuration;
pub mod journal;
pub mod assets;
pub mod index;
pub mod store;
pub mod restorer;
pub mod installer;
pub mod shims;
pub mod manifest;
pub mod resolver;
pub mod global;
pub mod util;

pub use error::{Result, ToolError};
pub use identity::*;
pub use installer::*;
pub use manifest::{ToolManifestEditor, ToolManifestFinder, ToolManifestPackage};
pub use resolver::*;
pub use restorer::*;
pub use shims::*;
pub use store::{ToolPackage, ToolPackageStore};
pub use global::cache::*;
pub use global::paths::*;
