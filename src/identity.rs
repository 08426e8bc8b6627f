use std::fmt;
use std::path::PathBuf;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// Runtime identifier that matches every platform.
pub const ANY_RID: &str = "any";

/// Identifies a tool package. Package ids are case-insensitive, so the id is
/// stored lower-cased and compared on that form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: &str) -> Self {
        PackageId(id.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PackageId {
    fn from(value: String) -> Self {
        PackageId::new(&value)
    }
}

impl From<PackageId> for String {
    fn from(value: PackageId) -> Self {
        value.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The name a user types to invoke a tool. Unlike [`PackageId`] it keeps its case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCommandName(String);

impl ToolCommandName {
    pub fn new(name: &str) -> Self {
        ToolCommandName(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolCommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host a command needs in order to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runner {
    /// Managed entry point started through the `dotnet` host.
    Dotnet,
    /// Native executable started directly.
    Executable,
}

impl Runner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runner::Dotnet => "dotnet",
            Runner::Executable => "executable",
        }
    }
}

impl fmt::Display for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a package version.
///
/// NuGet allows short versions such as `1.0` or `2`; missing minor and patch
/// components are filled with zeros before handing the text to `semver`.
pub fn parse_version(text: &str) -> Result<Version, semver::Error> {
    let text = text.trim();
    let (core, rest) = match text.find(['-', '+']) {
        Some(index) => text.split_at(index),
        None => (text, ""),
    };
    let parts = core.split('.').count();
    let padded = match parts {
        1 => format!("{core}.0.0{rest}"),
        2 => format!("{core}.0{rest}"),
        _ => text.to_string(),
    };
    Version::parse(&padded)
}

/// Normalized form of a version, used for directory names and cache rows.
pub fn normalized_version(version: &Version) -> String {
    version.to_string().to_lowercase()
}

/// A version constraint as requested by the user.
///
/// The raw text is kept so it can be forwarded untouched to an external
/// restore process; `req` is used for local matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    req: VersionReq,
}

impl VersionRange {
    /// A bare version (`1.0.4`) pins that exact version, anything else is read
    /// as a semver requirement (`^1.0`, `>=2.0, <3.0`, `*`).
    pub fn parse(text: &str) -> Result<Self, semver::Error> {
        let raw = text.trim().to_string();
        let req = match parse_version(&raw) {
            Ok(version) => VersionReq::parse(&format!("={version}"))?,
            Err(_) => VersionReq::parse(&raw)?,
        };
        Ok(VersionRange { raw, req })
    }

    pub fn exact(version: &Version) -> Self {
        VersionRange {
            raw: version.to_string(),
            req: VersionReq {
                comparators: vec![semver::Comparator {
                    op: semver::Op::Exact,
                    major: version.major,
                    minor: Some(version.minor),
                    patch: Some(version.patch),
                    pre: version.pre.clone(),
                }],
            },
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.req.matches(version)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Composite key of the local tools resolver cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestoredCommandIdentifier {
    pub package_id: PackageId,
    pub version: Version,
    pub target_framework: String,
    pub runtime_identifier: String,
    pub command_name: ToolCommandName,
}

impl RestoredCommandIdentifier {
    pub fn new(
        package_id: PackageId,
        version: Version,
        target_framework: &str,
        runtime_identifier: &str,
        command_name: ToolCommandName,
    ) -> Self {
        RestoredCommandIdentifier {
            package_id,
            version,
            target_framework: target_framework.to_lowercase(),
            runtime_identifier: runtime_identifier.to_lowercase(),
            command_name,
        }
    }

    /// Same identifier with the runtime identifier replaced by [`ANY_RID`].
    pub fn with_any_rid(&self) -> Self {
        RestoredCommandIdentifier {
            runtime_identifier: ANY_RID.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for RestoredCommandIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({}/{}) command '{}'",
            self.package_id,
            normalized_version(&self.version),
            self.target_framework,
            self.runtime_identifier,
            self.command_name
        )
    }
}

/// A command resolved to something that can be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredCommand {
    pub name: ToolCommandName,
    pub runner: Runner,
    pub executable: PathBuf,
}

impl RestoredCommand {
    pub fn new(name: ToolCommandName, runner: Runner, executable: PathBuf) -> Self {
        RestoredCommand { name, runner, executable }
    }
}
