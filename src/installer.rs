use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use semver::Version;
use tracing::{debug, info, warn};
use crate::assets::{read_tool_assets, ToolAssets};
use crate::error::{Result, ToolError};
use crate::global::cache::LocalToolsResolverCache;
use crate::global::paths::{tool_path_store_dir, Settings};
use crate::identity::{
    normalized_version, parse_version, PackageId, RestoredCommand, RestoredCommandIdentifier, ToolCommandName,
    VersionRange, ANY_RID,
};
use crate::journal::{JournalEntry, Transaction};
use crate::manifest::{ToolManifestEditor, ToolManifestFinder, ToolManifestPackage};
use crate::restorer::{ProjectRestorer, RestoreRequest};
use crate::shims::ShimRepository;
use crate::store::{ToolPackage, ToolPackageStore};
use crate::util::{random_file_name, sorted_sub_directories, stage_dir_of};

/// Journal of the transactions that restore into a local tools packages folder.
pub fn packages_journal_dir(packages_dir: &Path) -> PathBuf {
    packages_dir.join(".journal")
}

/// A shim directory and the store whose packages it exposes.
#[derive(Debug, Clone)]
pub struct ToolLocation {
    pub shims_dir: PathBuf,
    pub store: ToolPackageStore,
}

impl ToolLocation {
    pub fn global(settings: &Settings) -> Self {
        ToolLocation {
            shims_dir: settings.tools_dir.clone(),
            store: settings.global_store(),
        }
    }

    pub fn tool_path(tool_path: &Path) -> Self {
        ToolLocation {
            shims_dir: tool_path.to_path_buf(),
            store: ToolPackageStore::new(tool_path_store_dir(tool_path)),
        }
    }
}

/// Restores packages into a store.
pub struct ToolPackageInstaller<'a> {
    store: &'a ToolPackageStore,
    restorer: &'a dyn ProjectRestorer,
}

impl<'a> ToolPackageInstaller<'a> {
    pub fn new(store: &'a ToolPackageStore, restorer: &'a dyn ProjectRestorer) -> Self {
        ToolPackageInstaller { store, restorer }
    }

    /// Restores the requested package into a staging directory, validates it
    /// and moves it into the store, all as part of `tx`.
    pub fn install_package(&self, tx: &mut Transaction, request: &RestoreRequest) -> Result<(ToolPackage, ToolAssets)> {
        let package_id = &request.package_id;
        let stage = self.store.stage_dir().join(random_file_name());
        tx.create_temporary_dir(&stage)?;

        self.restorer.restore(request, &stage)?;
        let (version, staged_dir) = single_staged_version(&stage, package_id)?;

        if self.store.package_dir(package_id, &version).exists() {
            return Err(ToolError::PackageConflict {
                package_id: package_id.clone(),
                version: normalized_version(&version),
            });
        }
        let assets = read_tool_assets(&staged_dir, package_id, &version, Some(&request.target_framework))?;
        assets.save(&staged_dir)?;
        let package = self.store.register(tx, &staged_dir, &assets)?;
        Ok((package, assets))
    }
}

/// The one `<id>/<version>` directory a restore left in `stage`.
fn single_staged_version(stage: &Path, package_id: &PackageId) -> Result<(Version, PathBuf)> {
    let package_root = stage.join(package_id.as_str());
    let versions = sorted_sub_directories(&package_root)?;
    let [version] = versions.as_slice() else {
        return Err(ToolError::Package(format!(
            "Failed to find staged tool package '{package_id}'."
        )));
    };
    let parsed = parse_version(version).map_err(|e| {
        ToolError::Package(format!("Restored package '{package_id}' has an invalid version '{version}': {e}"))
    })?;
    Ok((parsed, package_root.join(version)))
}

/// What a global or tool-path install produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTool {
    pub package: ToolPackage,
    pub commands: Vec<RestoredCommand>,
}

/// Installs a package into `store` and creates a shim for each of its
/// commands. Nothing is left behind if any step fails.
///
/// # Arguments
///
/// * `store` - The package store to install into.
/// * `shims` - Where the command shims are created.
/// * `restorer` - Fetches the package into a staging directory.
/// * `request` - Package id, version range and target framework to restore.
///
/// # Errors
///
/// Returns an error if:
/// - The package cannot be restored or its tool settings are invalid.
/// - The same version is already installed ([`ToolError::PackageConflict`]).
/// - A shim for one of its commands already exists ([`ToolError::ShimConflict`]).
pub fn install_tool(
    store: &ToolPackageStore,
    shims: &dyn ShimRepository,
    restorer: &dyn ProjectRestorer,
    request: &RestoreRequest,
) -> Result<InstalledTool> {
    let mut tx = Transaction::begin(&store.journal_dir())?;
    let (package, assets) = ToolPackageInstaller::new(store, restorer).install_package(&mut tx, request)?;
    let commands = assets.restored_commands(package.directory());
    for command in &commands {
        shims.create_shim(&mut tx, &command.executable, &command.name, command.runner)?;
    }
    tx.commit()?;
    info!("installed {} {}", package.id(), package.version());
    Ok(InstalledTool { package, commands })
}

/// Removes the single installed version of `package_id` and its shims.
///
/// # Errors
///
/// Returns [`ToolError::NotInstalled`] or [`ToolError::AmbiguousVersion`]
/// when there is not exactly one installed version. A package whose
/// commands cannot be read, or a shim or store entry that cannot be
/// removed, fails with "Failed to uninstall tool package" and leaves the
/// package and all of its shims in place.
pub fn uninstall_tool(
    store: &ToolPackageStore,
    shims: &dyn ShimRepository,
    package_id: &PackageId,
) -> Result<ToolPackage> {
    let package = store.single_installed_package(package_id)?;
    // without its commands the shims cannot be found, so nothing is touched
    let commands = package.commands().map_err(|e| {
        ToolError::Package(format!("Failed to uninstall tool package '{package_id}': {e}"))
    })?;
    let failed = |e: ToolError| match e {
        ToolError::Io { .. } | ToolError::ShellShim(_) => ToolError::Package(format!(
            "Failed to uninstall tool package '{package_id}': {e}"
        )),
        other => other,
    };

    let mut tx = Transaction::begin(&store.journal_dir())?;
    for command in &commands {
        shims.remove_shim(&mut tx, &command.name).map_err(failed)?;
    }
    store.unregister(&mut tx, &package).map_err(failed)?;
    tx.commit()?;
    info!("uninstalled {} {}", package.id(), package.version());
    Ok(package)
}

/// Restores a package into the shared packages folder
/// (`<packages>/<id>/<version>`), reusing an existing restore of the same
/// exact version.
pub fn restore_to_packages_folder(
    restorer: &dyn ProjectRestorer,
    request: &RestoreRequest,
    packages_dir: &Path,
) -> Result<(PathBuf, ToolAssets)> {
    let package_id = &request.package_id;
    let exact = request.version.as_ref().and_then(|range| parse_version(range.raw()).ok());
    if let Some(version) = &exact {
        let existing = packages_dir.join(package_id.as_str()).join(normalized_version(version));
        if ToolAssets::exists(&existing) {
            debug!("{package_id} {version} is already restored");
            let assets = ToolAssets::load(&existing)?;
            return Ok((existing, assets));
        }
    }

    let mut tx = Transaction::begin(&packages_journal_dir(packages_dir))?;
    let stage = stage_dir_of(packages_dir).join(random_file_name());
    tx.create_temporary_dir(&stage)?;
    restorer.restore(request, &stage)?;
    let (version, staged_dir) = single_staged_version(&stage, package_id)?;

    let target = packages_dir.join(package_id.as_str()).join(normalized_version(&version));
    if ToolAssets::exists(&target) {
        let assets = ToolAssets::load(&target)?;
        tx.commit()?;
        return Ok((target, assets));
    }
    // an earlier restore that never wrote its marker
    if target.exists() {
        tx.move_aside(&target, &stage_dir_of(packages_dir))?;
    }
    let assets = read_tool_assets(&staged_dir, package_id, &version, Some(&request.target_framework))?;
    assets.save(&staged_dir)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ToolError::io("Could not create directory", parent, e))?;
    }
    tx.record(JournalEntry::Created { path: target.clone() })?;
    std::fs::rename(&staged_dir, &target).map_err(|e| ToolError::io("Could not move", &staged_dir, e))?;
    tx.commit()?;
    Ok((target, assets))
}

fn cache_entries(
    assets: &ToolAssets,
    package_dir: &Path,
    version: &Version,
    target_framework: &str,
) -> Vec<(RestoredCommandIdentifier, RestoredCommand)> {
    assets
        .restored_commands(package_dir)
        .into_iter()
        .map(|command| {
            let identifier = RestoredCommandIdentifier::new(
                assets.package_id.clone(),
                version.clone(),
                target_framework,
                ANY_RID,
                command.name.clone(),
            );
            (identifier, command)
        })
        .collect()
}

/// Shared inputs of the local (manifest) tool operations.
pub struct LocalToolContext<'a> {
    pub restorer: &'a dyn ProjectRestorer,
    pub cache: &'a LocalToolsResolverCache,
    pub packages_dir: &'a Path,
    pub default_framework: &'a str,
    pub source: Option<String>,
    pub verbosity: Option<String>,
}

/// Outcome of installing one local tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInstall {
    pub package_id: PackageId,
    pub version: Version,
    pub commands: Vec<ToolCommandName>,
    pub manifest: PathBuf,
}

/// Restores a package, records its commands in the resolver cache and adds it
/// to the nearest manifest (or `explicit_manifest`).
///
/// # Arguments
///
/// * `context` - Restorer, resolver cache and packages folder to use.
/// * `cwd` - Where the manifest lookup starts.
/// * `explicit_manifest` - A manifest to edit instead of the nearest one.
/// * `package_id` - The package to add.
/// * `version` - The version range; the highest restorable version when `None`.
/// * `framework` - Overrides the default target framework.
///
/// # Errors
///
/// Returns an error if no manifest is found, if the manifest already declares
/// the package, or if the restore fails. The manifest is only edited after
/// the package was restored and cached.
pub fn install_local_tool(
    context: &LocalToolContext<'_>,
    cwd: &Path,
    explicit_manifest: Option<&Path>,
    package_id: &PackageId,
    version: Option<VersionRange>,
    framework: Option<&str>,
) -> Result<LocalInstall> {
    let finder = ToolManifestFinder::new(cwd);
    let manifest = match explicit_manifest {
        Some(path) => path.to_path_buf(),
        None => finder.find_first()?,
    };
    if finder
        .find(Some(&manifest))?
        .iter()
        .any(|p| &p.package_id == package_id)
    {
        return Err(ToolError::Manifest(format!(
            "\tCannot add package. Manifest file {} already contains package {package_id}.",
            manifest.display()
        )));
    }

    let target_framework = framework.unwrap_or(context.default_framework);
    let request = RestoreRequest::new(package_id.clone(), target_framework)
        .with_version(version)
        .with_source(context.source.clone())
        .with_verbosity(context.verbosity.clone());
    let (package_dir, assets) = restore_to_packages_folder(context.restorer, &request, context.packages_dir)?;
    let version = assets.version()?;

    let entries: HashMap<_, _> = cache_entries(&assets, &package_dir, &version, target_framework)
        .into_iter()
        .collect();
    context.cache.save(&entries)?;
    ToolManifestEditor::add(&manifest, package_id, &version, &assets.command_names())?;
    Ok(LocalInstall {
        package_id: package_id.clone(),
        version,
        commands: assets.command_names(),
        manifest,
    })
}

/// Removes a package from the nearest manifest declaring it (or
/// `explicit_manifest`). Returns the edited manifest.
pub fn uninstall_local_tool(cwd: &Path, explicit_manifest: Option<&Path>, package_id: &PackageId) -> Result<PathBuf> {
    let manifest = match explicit_manifest {
        Some(path) => path.to_path_buf(),
        None => ToolManifestFinder::new(cwd).find_containing(package_id)?,
    };
    ToolManifestEditor::remove(&manifest, package_id)?;
    Ok(manifest)
}

/// Per package outcome of [`restore_local_tools`].
#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub restored: Vec<(PackageId, Version, Vec<ToolCommandName>)>,
    pub failed: Vec<(PackageId, String)>,
}

impl RestoreSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Restores every package the manifests declare and records their commands
/// in the resolver cache. Packages that fail are reported, the others are
/// still restored.
///
/// # Errors
///
/// Returns [`ToolError::CommandNameCollision`] before anything is restored
/// when two packages declare the same command. Per-package failures end up
/// in [`RestoreSummary::failed`] instead.
pub fn restore_local_tools(
    context: &LocalToolContext<'_>,
    packages: &[ToolManifestPackage],
) -> Result<RestoreSummary> {
    check_command_collisions(packages)?;

    let mut summary = RestoreSummary::default();
    let mut entries = HashMap::new();
    for package in packages {
        let target_framework = package.target_framework.as_deref().unwrap_or(context.default_framework);
        let request = RestoreRequest::new(package.package_id.clone(), target_framework)
            .with_version(Some(VersionRange::exact(&package.version)))
            .with_source(context.source.clone())
            .with_verbosity(context.verbosity.clone());

        let restored = restore_to_packages_folder(context.restorer, &request, context.packages_dir)
            .and_then(|(package_dir, assets)| {
                check_declared_commands(package, &assets)?;
                Ok(cache_entries(&assets, &package_dir, &package.version, target_framework))
            });
        match restored {
            Ok(package_entries) => {
                entries.extend(package_entries);
                summary.restored.push((
                    package.package_id.clone(),
                    package.version.clone(),
                    package.commands.clone(),
                ));
            }
            Err(e) => {
                warn!("restore of {} failed: {e}", package.package_id);
                summary.failed.push((package.package_id.clone(), e.to_string()));
            }
        }
    }
    context.cache.save(&entries)?;
    Ok(summary)
}

fn check_command_collisions(packages: &[ToolManifestPackage]) -> Result<()> {
    let mut owners: BTreeMap<&str, Vec<&PackageId>> = BTreeMap::new();
    for package in packages {
        for command in &package.commands {
            owners.entry(command.as_str()).or_default().push(&package.package_id);
        }
    }
    let collisions: Vec<String> = owners
        .iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(command, ids)| {
            let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
            format!("Command '{command}' is declared by more than one package: {}.", ids.join(", "))
        })
        .collect();
    if collisions.is_empty() {
        Ok(())
    } else {
        Err(ToolError::CommandNameCollision(collisions.join("\n")))
    }
}

fn check_declared_commands(package: &ToolManifestPackage, assets: &ToolAssets) -> Result<()> {
    let mut declared: Vec<&str> = package.commands.iter().map(|c| c.as_str()).collect();
    let mut actual: Vec<String> = assets.command_names().iter().map(|c| c.to_string()).collect();
    declared.sort_unstable();
    actual.sort_unstable();
    if declared == actual {
        return Ok(());
    }
    Err(ToolError::Manifest(format!(
        "\tThe command(s) '{}' declared for package {} in {} do not match the package's command(s) '{}'.",
        declared.join(", "),
        package.package_id,
        package.manifest.display(),
        actual.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::TOOL_SETTINGS_FILE_NAME;
    use crate::identity::Runner;
    use crate::shims::ShellShimRepository;
    use std::cell::Cell;
    use tempfile::tempdir;

    /// Writes packages straight into the output directory.
    struct FakeRestorer {
        versions: Vec<&'static str>,
        commands: Vec<&'static str>,
        calls: Cell<usize>,
    }

    impl FakeRestorer {
        fn new(version: &'static str, commands: &[&'static str]) -> Self {
            FakeRestorer { versions: vec![version], commands: commands.to_vec(), calls: Cell::new(0) }
        }
    }

    impl ProjectRestorer for FakeRestorer {
        fn restore(&self, request: &RestoreRequest, output_dir: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            for version in &self.versions {
                let dir = output_dir.join(request.package_id.as_str()).join(version).join("tools/net8.0/any");
                std::fs::create_dir_all(&dir).unwrap();
                let commands: String = self
                    .commands
                    .iter()
                    .map(|c| format!(r#"<Command Name="{c}" EntryPoint="{c}.dll" Runner="dotnet" />"#))
                    .collect();
                std::fs::write(
                    dir.join(TOOL_SETTINGS_FILE_NAME),
                    format!("<DotNetCliTool Version=\"1\"><Commands>{commands}</Commands></DotNetCliTool>"),
                )
                .unwrap();
                for c in &self.commands {
                    std::fs::write(dir.join(format!("{c}.dll")), "").unwrap();
                }
            }
            Ok(())
        }
    }

    /// Fails on the given call, delegating to a real repository otherwise.
    struct FailingShims {
        inner: ShellShimRepository,
        fail_on: usize,
        calls: Cell<usize>,
    }

    impl ShimRepository for FailingShims {
        fn create_shim(&self, tx: &mut Transaction, target: &Path, command: &ToolCommandName, runner: Runner) -> Result<()> {
            self.inner.create_shim(tx, target, command, runner)
        }

        fn remove_shim(&self, tx: &mut Transaction, command: &ToolCommandName) -> Result<()> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            if call == self.fail_on {
                return Err(ToolError::ShellShim(format!("simulated failure removing '{command}'")));
            }
            self.inner.remove_shim(tx, command)
        }

        fn shim_exists(&self, command: &ToolCommandName) -> bool {
            self.inner.shim_exists(command)
        }
    }

    fn store_and_shims(root: &Path) -> (ToolPackageStore, ShellShimRepository) {
        let location = ToolLocation::tool_path(root);
        (location.store, ShellShimRepository::new(&location.shims_dir, "dotnet"))
    }

    fn request(id: &str) -> RestoreRequest {
        RestoreRequest::new(PackageId::new(id), "net8.0")
    }

    #[test]
    fn test_install_registers_package_and_creates_shims() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        let restorer = FakeRestorer::new("1.0.4", &["a"]);

        let installed = install_tool(&store, &shims, &restorer, &request("Tool.A")).unwrap();

        assert_eq!(installed.package.version(), &Version::new(1, 0, 4));
        assert_eq!(installed.commands.len(), 1);
        assert!(installed.commands[0].executable.is_file());
        assert!(shims.shim_exists(&ToolCommandName::new("a")));
        assert_eq!(store.get_installed_packages(&PackageId::new("tool.a")).unwrap().len(), 1);
        assert_eq!(sorted_sub_directories(&store.stage_dir()).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_install_twice_is_a_conflict_and_leaves_first_install() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        let restorer = FakeRestorer::new("1.0.4", &["a"]);
        install_tool(&store, &shims, &restorer, &request("tool.a")).unwrap();

        let err = install_tool(&store, &shims, &restorer, &request("tool.a")).unwrap_err();
        assert!(matches!(err, ToolError::PackageConflict { .. }));
        assert!(shims.shim_exists(&ToolCommandName::new("a")));
        assert_eq!(store.enumerate_packages().unwrap().len(), 1);
    }

    #[test]
    fn test_shim_conflict_rolls_back_store() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(&shims.shim_paths(&ToolCommandName::new("a"))[0], "taken").unwrap();

        let err = install_tool(&store, &shims, &FakeRestorer::new("1.0.4", &["a"]), &request("tool.a")).unwrap_err();
        assert!(matches!(err, ToolError::ShimConflict(_)));
        assert!(store.enumerate_packages().unwrap().is_empty());
        assert!(!store.package_root_dir(&PackageId::new("tool.a")).exists());
    }

    #[test]
    fn test_invalid_descriptor_creates_nothing() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        let restorer = FakeRestorer::new("1.0.0", &["one", "two"]);

        let err = install_tool(&store, &shims, &restorer, &request("tool.a")).unwrap_err();
        assert!(matches!(err, ToolError::Configuration(_)));
        assert!(!shims.shim_exists(&ToolCommandName::new("one")));
        assert!(store.enumerate_packages().unwrap().is_empty());
    }

    #[test]
    fn test_multiple_staged_versions_are_rejected() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        let restorer = FakeRestorer { versions: vec!["1.0.0", "2.0.0"], commands: vec!["a"], calls: Cell::new(0) };
        let err = install_tool(&store, &shims, &restorer, &request("tool.a")).unwrap_err();
        assert!(err.to_string().contains("Failed to find staged tool package"));
    }

    #[test]
    fn test_uninstall_removes_shims_and_package() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        install_tool(&store, &shims, &FakeRestorer::new("1.0.4", &["a"]), &request("tool.a")).unwrap();

        let removed = uninstall_tool(&store, &shims, &PackageId::new("tool.a")).unwrap();
        assert_eq!(removed.version(), &Version::new(1, 0, 4));
        assert!(!shims.shim_exists(&ToolCommandName::new("a")));
        assert!(store.enumerate_packages().unwrap().is_empty());
        assert!(matches!(
            uninstall_tool(&store, &shims, &PackageId::new("tool.a")),
            Err(ToolError::NotInstalled { .. })
        ));
    }

    #[test]
    fn test_uninstall_failure_on_any_shim_restores_everything() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        let installed =
            install_tool(&store, &shims, &FakeRestorer::new("1.0.4", &["a"]), &request("tool.a")).unwrap();
        // a marker with three commands exercises failing on each of them
        let mut assets = ToolAssets::load(installed.package.directory()).unwrap();
        let mut extra = assets.commands[0].clone();
        for name in ["b", "c"] {
            extra.name = ToolCommandName::new(name);
            assets.commands.push(extra.clone());
            let mut tx = Transaction::begin(&store.journal_dir()).unwrap();
            shims.create_shim(&mut tx, &installed.commands[0].executable, &extra.name, Runner::Dotnet).unwrap();
            tx.commit().unwrap();
        }
        assets.save(installed.package.directory()).unwrap();

        for fail_on in 0..3 {
            let failing = FailingShims { inner: shims.clone(), fail_on, calls: Cell::new(0) };
            let err = uninstall_tool(&store, &failing, &PackageId::new("tool.a")).unwrap_err();
            assert!(err.to_string().contains("Failed to uninstall tool package 'tool.a'"));
            for name in ["a", "b", "c"] {
                assert!(shims.shim_exists(&ToolCommandName::new(name)), "shim {name} after failure {fail_on}");
            }
            assert_eq!(store.enumerate_packages().unwrap(), vec![installed.package.clone()]);
        }
    }

    #[test]
    fn test_uninstall_with_two_versions_is_ambiguous() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        install_tool(&store, &shims, &FakeRestorer::new("1.0.0", &["a"]), &request("tool.a")).unwrap();
        let other = tempdir().unwrap();
        let (_, other_shims) = store_and_shims(other.path());
        install_tool(&store, &other_shims, &FakeRestorer::new("2.0.0", &["a"]), &request("tool.a")).unwrap();

        assert!(matches!(
            uninstall_tool(&store, &shims, &PackageId::new("tool.a")),
            Err(ToolError::AmbiguousVersion { .. })
        ));
        assert!(shims.shim_exists(&ToolCommandName::new("a")));
        assert_eq!(store.enumerate_packages().unwrap().len(), 2);
    }

    #[test]
    fn test_uninstall_with_unreadable_marker_changes_nothing() {
        let dir = tempdir().unwrap();
        let (store, shims) = store_and_shims(dir.path());
        let installed =
            install_tool(&store, &shims, &FakeRestorer::new("1.0.0", &["a"]), &request("tool.a")).unwrap();
        std::fs::write(ToolAssets::path(installed.package.directory()), "{ corrupt").unwrap();

        let err = uninstall_tool(&store, &shims, &PackageId::new("tool.a")).unwrap_err();
        assert!(matches!(err, ToolError::Package(_)));
        assert!(err.to_string().contains("Failed to uninstall tool package 'tool.a'"));
        assert!(shims.shim_exists(&ToolCommandName::new("a")));
        assert_eq!(store.enumerate_packages().unwrap(), vec![installed.package.clone()]);
        assert!(installed.package.directory().is_dir());

        std::fs::remove_file(ToolAssets::path(installed.package.directory())).unwrap();
        assert!(uninstall_tool(&store, &shims, &PackageId::new("tool.a")).is_err());
        assert!(shims.shim_exists(&ToolCommandName::new("a")));
    }

    fn local_context<'a>(
        restorer: &'a dyn ProjectRestorer,
        cache: &'a LocalToolsResolverCache,
        packages_dir: &'a Path,
    ) -> LocalToolContext<'a> {
        LocalToolContext {
            restorer,
            cache,
            packages_dir,
            default_framework: "net8.0",
            source: None,
            verbosity: None,
        }
    }

    #[test]
    fn test_install_local_tool_edits_manifest_and_cache() {
        let dir = tempdir().unwrap();
        let manifest = ToolManifestEditor::create_new(dir.path(), false).unwrap();
        let cache = LocalToolsResolverCache::new(dir.path().join("cache"));
        let packages = dir.path().join("packages");
        let restorer = FakeRestorer::new("1.0.4", &["a"]);
        let context = local_context(&restorer, &cache, &packages);
        let id = PackageId::new("local.tool.console.a");

        let installed = install_local_tool(&context, dir.path(), None, &id, None, None).unwrap();
        assert_eq!(installed.manifest, manifest);
        assert_eq!(installed.version, Version::new(1, 0, 4));

        let declared = ToolManifestFinder::new(dir.path()).find(None).unwrap();
        assert_eq!(declared[0].package_id, id);
        let identifier = RestoredCommandIdentifier::new(
            id.clone(),
            Version::new(1, 0, 4),
            "net8.0",
            "linux-x64",
            ToolCommandName::new("a"),
        );
        let cached = cache.try_load(&identifier).unwrap();
        assert_eq!(cached.executable, packages.join("local.tool.console.a/1.0.4/tools/net8.0/any/a.dll"));

        assert!(install_local_tool(&context, dir.path(), None, &id, None, None).is_err());
        assert_eq!(restorer.calls.get(), 1);

        uninstall_local_tool(dir.path(), None, &id).unwrap();
        assert!(ToolManifestFinder::new(dir.path()).find(None).unwrap().is_empty());
        assert!(matches!(
            uninstall_local_tool(dir.path(), None, &id),
            Err(ToolError::PackageNotInManifest(_))
        ));
    }

    #[test]
    fn test_restore_reuses_restored_packages_and_reports_failures() {
        let dir = tempdir().unwrap();
        let cache = LocalToolsResolverCache::new(dir.path().join("cache"));
        let packages = dir.path().join("packages");
        let restorer = FakeRestorer::new("1.0.4", &["a"]);
        let context = local_context(&restorer, &cache, &packages);
        let package = |id: &str, command: &str| ToolManifestPackage {
            package_id: PackageId::new(id),
            version: Version::new(1, 0, 4),
            commands: vec![ToolCommandName::new(command)],
            target_framework: None,
            manifest: dir.path().join("dotnet-tools.json"),
        };

        let summary = restore_local_tools(&context, &[package("tool.a", "a")]).unwrap();
        assert!(summary.is_success());
        let summary = restore_local_tools(&context, &[package("tool.a", "a"), package("tool.b", "b")]).unwrap();
        assert_eq!(restorer.calls.get(), 2);
        assert_eq!(summary.restored.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, PackageId::new("tool.b"));
    }

    #[test]
    fn test_restore_refuses_command_collisions() {
        let dir = tempdir().unwrap();
        let cache = LocalToolsResolverCache::new(dir.path().join("cache"));
        let packages = dir.path().join("packages");
        let restorer = FakeRestorer::new("1.0.4", &["a"]);
        let context = local_context(&restorer, &cache, &packages);
        let package = |id: &str| ToolManifestPackage {
            package_id: PackageId::new(id),
            version: Version::new(1, 0, 4),
            commands: vec![ToolCommandName::new("a")],
            target_framework: None,
            manifest: dir.path().join("dotnet-tools.json"),
        };

        let err = restore_local_tools(&context, &[package("tool.a"), package("tool.b")]).unwrap_err();
        assert!(matches!(err, ToolError::CommandNameCollision(ref m) if m.contains("tool.a, tool.b")));
        assert_eq!(restorer.calls.get(), 0);
    }
}
