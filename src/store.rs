use std::path::{Path, PathBuf};
use semver::Version;
use tracing::{debug, warn};
use crate::assets::ToolAssets;
use crate::error::{Result, ToolError};
use crate::identity::{normalized_version, parse_version, PackageId, RestoredCommand};
use crate::index::{StoreIndex, INDEX_FILE_NAME};
use crate::journal::{JournalEntry, Transaction};
use crate::util::{is_empty_dir, sorted_sub_directories, stage_dir_of};

const JOURNAL_DIR: &str = ".journal";

/// On-disk store of installed tool packages, laid out as
/// `<root>/<package id>/<normalized version>/`.
///
/// Several versions of one package may coexist on disk; operations that need
/// a single one go through [`ToolPackageStore::single_installed_package`].
#[derive(Debug, Clone)]
pub struct ToolPackageStore {
    root: PathBuf,
}

/// One installed (package id, version) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPackage {
    id: PackageId,
    version: Version,
    directory: PathBuf,
}

impl ToolPackage {
    pub fn new(id: PackageId, version: Version, directory: PathBuf) -> Self {
        ToolPackage { id, version, directory }
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Commands exposed by the package, read from its restore marker.
    pub fn commands(&self) -> Result<Vec<RestoredCommand>> {
        let assets = ToolAssets::load(&self.directory)?;
        Ok(assets.restored_commands(&self.directory))
    }
}

impl ToolPackageStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        ToolPackageStore { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.root.join(JOURNAL_DIR)
    }

    pub fn stage_dir(&self) -> PathBuf {
        stage_dir_of(&self.root)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    pub fn package_root_dir(&self, package_id: &PackageId) -> PathBuf {
        self.root.join(package_id.as_str())
    }

    pub fn package_dir(&self, package_id: &PackageId, version: &Version) -> PathBuf {
        self.package_root_dir(package_id).join(normalized_version(version))
    }

    /// Every installed package of every id.
    pub fn enumerate_packages(&self) -> Result<Vec<ToolPackage>> {
        let mut packages = Vec::new();
        for name in sorted_sub_directories(&self.root)? {
            // staging, journal and anything not named like a package id
            if name.starts_with('.') || PackageId::new(&name).as_str() != name {
                continue;
            }
            packages.extend(self.enumerate_package_versions(&PackageId::new(&name))?);
        }
        Ok(packages)
    }

    /// Installed versions of one package, lowest first.
    pub fn enumerate_package_versions(&self, package_id: &PackageId) -> Result<Vec<ToolPackage>> {
        let package_root = self.package_root_dir(package_id);
        let mut packages = Vec::new();
        for name in sorted_sub_directories(&package_root)? {
            match parse_version(&name) {
                Ok(version) => packages.push(ToolPackage::new(
                    package_id.clone(),
                    version,
                    package_root.join(&name),
                )),
                Err(e) => debug!("skipping '{}' in {}: {e}", name, package_root.display()),
            }
        }
        packages.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(packages)
    }

    pub fn get_installed_packages(&self, package_id: &PackageId) -> Result<Vec<ToolPackage>> {
        self.enumerate_package_versions(package_id)
    }

    pub fn get_package(&self, package_id: &PackageId, version: &Version) -> Option<ToolPackage> {
        let directory = self.package_dir(package_id, version);
        directory
            .is_dir()
            .then(|| ToolPackage::new(package_id.clone(), version.clone(), directory))
    }

    /// The only installed version of `package_id`. Zero versions is
    /// [`ToolError::NotInstalled`], several is [`ToolError::AmbiguousVersion`].
    pub fn single_installed_package(&self, package_id: &PackageId) -> Result<ToolPackage> {
        let mut packages = self.get_installed_packages(package_id)?;
        match packages.len() {
            0 => Err(ToolError::NotInstalled { package_id: package_id.clone() }),
            1 => Ok(packages.remove(0)),
            _ => Err(ToolError::AmbiguousVersion {
                package_id: package_id.clone(),
                versions: packages.into_iter().map(|p| p.version).collect(),
            }),
        }
    }

    /// Loads the store index, rebuilding it from the directories when it is
    /// missing or unreadable.
    pub fn load_index(&self) -> Result<StoreIndex> {
        match StoreIndex::load(self.index_path()) {
            Some(index) => Ok(index),
            None => self.rebuild_index(),
        }
    }

    pub fn rebuild_index(&self) -> Result<StoreIndex> {
        let mut index = StoreIndex::default();
        for package in self.enumerate_packages()? {
            match ToolAssets::load(package.directory()) {
                Ok(assets) => index.insert(
                    package.id(),
                    &normalized_version(package.version()),
                    &assets.command_names(),
                ),
                Err(e) => warn!("ignoring {} {}: {e}", package.id(), package.version()),
            }
        }
        debug!("rebuilt store index for {}", self.root.display());
        Ok(index)
    }

    /// Finds the installed package exposing `command_name`.
    pub fn find_command(&self, command_name: &str) -> Result<Option<(ToolPackage, RestoredCommand)>> {
        let index = self.load_index()?;
        let candidates = index.find_command(command_name);
        if candidates.len() > 1 {
            warn!("command '{command_name}' is exposed by {} installed packages", candidates.len());
        }
        for (package_id, version) in candidates {
            let Ok(version) = parse_version(&version) else {
                continue;
            };
            let Some(package) = self.get_package(&package_id, &version) else {
                debug!("index entry {package_id} {version} has no directory");
                continue;
            };
            if let Some(command) = package
                .commands()?
                .into_iter()
                .find(|c| c.name.as_str() == command_name)
            {
                return Ok(Some((package, command)));
            }
        }
        Ok(None)
    }

    /// Moves a restored package from `staged_dir` into the store and records it
    /// in the index, as part of `tx`.
    ///
    /// # Arguments
    ///
    /// * `tx` - Journals the new package directory and the index rewrite.
    /// * `staged_dir` - A restored `<id>/<version>` directory inside the store's staging area.
    /// * `assets` - The package's validated tool assets.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::PackageConflict`] if the version is already in the
    /// store, or an error if the directory cannot be moved or the index cannot
    /// be written. Rolling back `tx` undoes both.
    pub fn register(&self, tx: &mut Transaction, staged_dir: &Path, assets: &ToolAssets) -> Result<ToolPackage> {
        let version = assets.version()?;
        let package_dir = self.package_dir(&assets.package_id, &version);
        if package_dir.exists() {
            return Err(ToolError::PackageConflict {
                package_id: assets.package_id.clone(),
                version: normalized_version(&version),
            });
        }
        let package_root = self.package_root_dir(&assets.package_id);
        if !package_root.exists() {
            tx.create_dir(&package_root)?;
        }
        tx.record(JournalEntry::Created { path: package_dir.clone() })?;
        std::fs::rename(staged_dir, &package_dir).map_err(|e| {
            ToolError::Package(format!(
                "Failed to install tool package '{}': {e}",
                assets.package_id
            ))
        })?;

        let mut index = self.load_index()?;
        index.insert(&assets.package_id, &normalized_version(&version), &assets.command_names());
        tx.write_file(&self.index_path(), index.to_toml()?.as_bytes(), &self.stage_dir())?;

        debug!("registered {} {} in {}", assets.package_id, version, self.root.display());
        Ok(ToolPackage::new(assets.package_id.clone(), version, package_dir))
    }

    /// Removes an installed package from the store, as part of `tx`.
    pub fn unregister(&self, tx: &mut Transaction, package: &ToolPackage) -> Result<()> {
        let wrap = |e: ToolError| {
            ToolError::Package(format!(
                "Failed to uninstall tool package '{}': {e}",
                package.id()
            ))
        };
        let stage = self.stage_dir();
        if package.directory().exists() {
            tx.move_aside(package.directory(), &stage).map_err(wrap)?;
        }
        let package_root = self.package_root_dir(package.id());
        if is_empty_dir(&package_root) {
            tx.move_aside(&package_root, &stage).map_err(wrap)?;
        }

        let mut index = self.load_index()?;
        index.remove(package.id(), &normalized_version(package.version()));
        tx.write_file(&self.index_path(), index.to_toml()?.as_bytes(), &stage)
            .map_err(wrap)?;
        debug!("unregistered {} {}", package.id(), package.version());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCommand;
    use crate::identity::{Runner, ToolCommandName};
    use tempfile::tempdir;

    fn simulate_install(store: &ToolPackageStore, id: &str, version: &str, commands: &[&str]) {
        let package_id = PackageId::new(id);
        let version = parse_version(version).unwrap();
        let dir = store.package_dir(&package_id, &version);
        std::fs::create_dir_all(&dir).unwrap();
        ToolAssets {
            package_id,
            version: normalized_version(&version),
            target_framework: "net8.0".to_string(),
            runtime_identifier: "any".to_string(),
            commands: commands
                .iter()
                .map(|c| AssetCommand {
                    name: ToolCommandName::new(c),
                    runner: Runner::Dotnet,
                    entry_point: format!("tools/net8.0/any/{c}.dll"),
                })
                .collect(),
        }
        .save(&dir)
        .unwrap();
    }

    #[test]
    fn test_enumerates_versions_and_skips_noise() {
        let dir = tempdir().unwrap();
        let store = ToolPackageStore::new(dir.path());
        simulate_install(&store, "tool.a", "1.0.4", &["a"]);
        simulate_install(&store, "tool.b", "2.0.0", &["b"]);
        std::fs::create_dir_all(store.stage_dir().join("random")).unwrap();
        std::fs::create_dir_all(store.package_root_dir(&PackageId::new("tool.a")).join("not-a-version")).unwrap();
        std::fs::create_dir_all(dir.path().join("Upper.Case")).unwrap();

        let all = store.enumerate_packages().unwrap();
        assert_eq!(all.len(), 2);
        let a = store.get_installed_packages(&PackageId::new("TOOL.A")).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].version(), &Version::new(1, 0, 4));
        assert_eq!(a[0].commands().unwrap()[0].name.as_str(), "a");
    }

    #[test]
    fn test_single_installed_package_not_found_and_ambiguous() {
        let dir = tempdir().unwrap();
        let store = ToolPackageStore::new(dir.path());
        let id = PackageId::new("tool.a");

        assert!(matches!(
            store.single_installed_package(&id),
            Err(ToolError::NotInstalled { .. })
        ));

        simulate_install(&store, "tool.a", "1.0.0", &["a"]);
        assert_eq!(store.single_installed_package(&id).unwrap().version(), &Version::new(1, 0, 0));

        simulate_install(&store, "tool.a", "2.0.0", &["a"]);
        match store.single_installed_package(&id) {
            Err(ToolError::AmbiguousVersion { versions, .. }) => {
                assert_eq!(versions, vec![Version::new(1, 0, 0), Version::new(2, 0, 0)]);
            }
            other => panic!("expected ambiguous version, got {other:?}"),
        }
    }

    #[test]
    fn test_find_command_rebuilds_missing_index() {
        let dir = tempdir().unwrap();
        let store = ToolPackageStore::new(dir.path());
        simulate_install(&store, "tool.a", "1.0.4", &["a"]);

        let (package, command) = store.find_command("a").unwrap().unwrap();
        assert_eq!(package.id().as_str(), "tool.a");
        assert_eq!(command.executable, package.directory().join("tools/net8.0/any/a.dll"));
        assert!(store.find_command("zzz").unwrap().is_none());
    }

    #[test]
    fn test_register_and_unregister_roll_back_together() {
        let dir = tempdir().unwrap();
        let store = ToolPackageStore::new(dir.path().join(".store"));
        let staged = dir.path().join("staged");
        std::fs::create_dir_all(&staged).unwrap();
        let assets = ToolAssets {
            package_id: PackageId::new("tool.a"),
            version: "1.0.0".to_string(),
            target_framework: "net8.0".to_string(),
            runtime_identifier: "any".to_string(),
            commands: vec![],
        };
        assets.save(&staged).unwrap();

        {
            let mut tx = Transaction::begin(&store.journal_dir()).unwrap();
            store.register(&mut tx, &staged, &assets).unwrap();
            assert_eq!(store.enumerate_packages().unwrap().len(), 1);
        }
        assert!(store.enumerate_packages().unwrap().is_empty());
        assert!(!store.package_root_dir(&PackageId::new("tool.a")).exists());

        std::fs::create_dir_all(&staged).unwrap();
        assets.save(&staged).unwrap();
        let mut tx = Transaction::begin(&store.journal_dir()).unwrap();
        let package = store.register(&mut tx, &staged, &assets).unwrap();
        tx.commit().unwrap();

        {
            let mut tx = Transaction::begin(&store.journal_dir()).unwrap();
            store.unregister(&mut tx, &package).unwrap();
            assert!(store.enumerate_packages().unwrap().is_empty());
        }
        assert_eq!(store.enumerate_packages().unwrap(), vec![package.clone()]);

        let mut tx = Transaction::begin(&store.journal_dir()).unwrap();
        store.unregister(&mut tx, &package).unwrap();
        tx.commit().unwrap();
        assert!(store.enumerate_packages().unwrap().is_empty());
        assert!(store.load_index().unwrap().packages.is_empty());
    }
}
