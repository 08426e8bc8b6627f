//! Materializing tool packages on disk.
//!
//! A restorer is handed a package request and an output directory and must
//! leave the package extracted under `<output>/<package id>/<version>/`. What
//! happens in between (feeds, credentials, the restore protocol) is the
//! restorer's business.

use std::path::{Path, PathBuf};
use std::process::Command;
use colored::Colorize;
use regex::Regex;
use semver::Version;
use tempfile::TempDir;
use tracing::{debug, info};
use crate::error::{IoContext, Result, ToolError};
use crate::identity::{normalized_version, parse_version, PackageId, VersionRange, ANY_RID};
use crate::util::random_file_name;

const DEFAULT_VERBOSITY: &str = "quiet";

/// What to restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub package_id: PackageId,
    /// `None` restores the latest release.
    pub version: Option<VersionRange>,
    pub target_framework: String,
    pub source: Option<String>,
    pub verbosity: Option<String>,
}

impl RestoreRequest {
    pub fn new(package_id: PackageId, target_framework: &str) -> Self {
        RestoreRequest {
            package_id,
            version: None,
            target_framework: target_framework.to_string(),
            source: None,
            verbosity: None,
        }
    }

    pub fn with_version(mut self, version: Option<VersionRange>) -> Self {
        self.version = version;
        self
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Option<String>) -> Self {
        self.verbosity = verbosity;
        self
    }
}

pub trait ProjectRestorer {
    /// Restores the requested package into `output_dir/<id>/<version>/`.
    fn restore(&self, request: &RestoreRequest, output_dir: &Path) -> Result<()>;
}

/// Delegates to an external `restore` command, driven through a throwaway
/// project file that references the package.
#[derive(Debug, Clone)]
pub struct ProcessRestorer {
    restore_command: String,
}

impl ProcessRestorer {
    pub fn new(restore_command: &str) -> Self {
        ProcessRestorer { restore_command: restore_command.to_string() }
    }

    /// Writes the project into a temporary directory that is removed when
    /// the returned guard drops.
    fn write_project(&self, request: &RestoreRequest, output_dir: &Path) -> Result<(TempDir, PathBuf)> {
        let project_dir = tempfile::Builder::new()
            .prefix("toolchest-restore-")
            .tempdir()
            .at("Could not create temporary directory", &std::env::temp_dir())?;
        let project = project_dir.path().join(format!("{}.csproj", random_file_name()));
        std::fs::write(&project, temp_project(request, output_dir)).at("Could not write", &project)?;
        Ok((project_dir, project))
    }
}

impl ProjectRestorer for ProcessRestorer {
    fn restore(&self, request: &RestoreRequest, output_dir: &Path) -> Result<()> {
        let (_project_dir, project) = self.write_project(request, output_dir)?;
        let mut command = Command::new(&self.restore_command);
        command
            .arg("restore")
            .arg(&project)
            .arg("--packages")
            .arg(output_dir)
            .arg("--runtime")
            .arg(ANY_RID);
        if let Some(source) = &request.source {
            command.arg("--source").arg(source);
        }
        command.arg(format!(
            "-verbosity:{}",
            request.verbosity.as_deref().unwrap_or(DEFAULT_VERBOSITY)
        ));
        debug!("running {command:?}");

        let output = command.output().map_err(|e| ToolError::RestoreFailed {
            package_id: request.package_id.clone(),
            output: format!("could not start '{}': {e}", self.restore_command),
        })?;

        let mut captured = String::from_utf8_lossy(&output.stdout).to_string();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        for line in captured.lines() {
            report_line(line);
        }
        if !output.status.success() {
            return Err(ToolError::RestoreFailed {
                package_id: request.package_id.clone(),
                output: captured.trim_end().to_string(),
            });
        }
        Ok(())
    }
}

fn report_line(line: &str) {
    let trimmed = line.trim_start();
    if trimmed.starts_with("error ") || trimmed.contains(": error ") {
        eprintln!("{}", line.red());
    } else if trimmed.starts_with("warning ") || trimmed.contains(": warning ") {
        eprintln!("{}", line.yellow());
    } else if !trimmed.is_empty() {
        debug!("restore: {line}");
    }
}

fn temp_project(request: &RestoreRequest, output_dir: &Path) -> String {
    let version = request.version.as_ref().map(|v| v.raw()).unwrap_or("*");
    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>{}</TargetFramework>
    <RestorePackagesPath>{}</RestorePackagesPath>
    <RestoreProjectStyle>DotnetToolReference</RestoreProjectStyle>
    <DisableImplicitFrameworkReferences>true</DisableImplicitFrameworkReferences>
    <RestoreFallbackFolders>clear</RestoreFallbackFolders>
    <DisableImplicitNuGetFallbackFolder>true</DisableImplicitNuGetFallbackFolder>
  </PropertyGroup>
  <ItemGroup>
    <PackageReference Include="{}" Version="{}" />
  </ItemGroup>
</Project>
"#,
        escape_xml(&request.target_framework),
        escape_xml(&output_dir.display().to_string()),
        escape_xml(request.package_id.as_str()),
        escape_xml(version),
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Restores from a plain directory of `<id>.<version>.nupkg` archives.
#[derive(Debug, Clone)]
pub struct LocalFeedRestorer {
    feed: PathBuf,
}

impl LocalFeedRestorer {
    pub fn new<P: AsRef<Path>>(feed: P) -> Self {
        LocalFeedRestorer { feed: feed.as_ref().to_path_buf() }
    }

    /// Every version of `package_id` present in the feed, highest first.
    pub fn available_versions(&self, package_id: &PackageId) -> Result<Vec<(Version, PathBuf)>> {
        let pattern = format!(r"(?i)^{}\.(\d+(?:\.\d+)*(?:-[0-9A-Za-z.-]+)?)\.nupkg$", regex::escape(package_id.as_str()));
        let re = Regex::new(&pattern)
            .map_err(|e| ToolError::Package(format!("Invalid package id '{package_id}': {e}")))?;
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.feed).at("Could not read feed", &self.feed)? {
            let path = entry.at("Could not read feed", &self.feed)?.path();
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let Some(captures) = re.captures(&file_name) else {
                continue;
            };
            match parse_version(&captures[1]) {
                Ok(version) => found.push((version, path)),
                Err(e) => debug!("skipping {file_name}: {e}"),
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found)
    }
}

impl ProjectRestorer for LocalFeedRestorer {
    fn restore(&self, request: &RestoreRequest, output_dir: &Path) -> Result<()> {
        let candidates = self.available_versions(&request.package_id)?;
        let chosen = candidates.into_iter().find(|(version, _)| match &request.version {
            Some(range) => range.matches(version),
            None => version.pre.is_empty(),
        });
        let Some((version, archive_path)) = chosen else {
            return Err(ToolError::RestoreFailed {
                package_id: request.package_id.clone(),
                output: format!(
                    "no version matching '{}' was found in '{}'",
                    request.version.as_ref().map(|v| v.raw()).unwrap_or("*"),
                    self.feed.display()
                ),
            });
        };

        let destination = output_dir
            .join(request.package_id.as_str())
            .join(normalized_version(&version));
        std::fs::create_dir_all(&destination).at("Could not create directory", &destination)?;
        let file = std::fs::File::open(&archive_path).at("Could not open package", &archive_path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            ToolError::Package(format!("Failed to open package '{}': {e}", archive_path.display()))
        })?;
        archive.extract(&destination).map_err(|e| {
            ToolError::Package(format!("Failed to extract package '{}': {e}", archive_path.display()))
        })?;
        info!("restored {} {} from {}", request.package_id, version, self.feed.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_nupkg(feed: &Path, id: &str, version: &str) {
        let file = std::fs::File::create(feed.join(format!("{id}.{version}.nupkg"))).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("tools/net8.0/any/a.dll", options).unwrap();
        zip.write_all(version.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_local_feed_picks_highest_matching_version() {
        let feed = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_nupkg(feed.path(), "Tool.A", "1.0.0");
        write_nupkg(feed.path(), "Tool.A", "1.2.0");
        write_nupkg(feed.path(), "Tool.A", "2.0.0-preview.1");
        write_nupkg(feed.path(), "tool.ab", "9.0.0");
        let restorer = LocalFeedRestorer::new(feed.path());

        let request = RestoreRequest::new(PackageId::new("tool.a"), "net8.0");
        restorer.restore(&request, out.path()).unwrap();
        let dll = out.path().join("tool.a/1.2.0/tools/net8.0/any/a.dll");
        assert_eq!(std::fs::read_to_string(dll).unwrap(), "1.2.0");

        let request = request.with_version(Some(VersionRange::parse("1.0.0").unwrap()));
        restorer.restore(&request, out.path()).unwrap();
        assert!(out.path().join("tool.a/1.0.0").is_dir());
    }

    #[test]
    fn test_local_feed_without_match_is_a_restore_failure() {
        let feed = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_nupkg(feed.path(), "tool.a", "1.0.0");
        let request = RestoreRequest::new(PackageId::new("tool.a"), "net8.0")
            .with_version(Some(VersionRange::parse(">=2.0").unwrap()));

        let err = LocalFeedRestorer::new(feed.path()).restore(&request, out.path()).unwrap_err();
        assert!(matches!(err, ToolError::RestoreFailed { .. }));
        assert!(err.to_string().contains(">=2.0"));
    }

    #[test]
    fn test_temp_project_references_package() {
        let request = RestoreRequest::new(PackageId::new("tool.a"), "net8.0")
            .with_version(Some(VersionRange::parse("1.0.4").unwrap()));
        let project = temp_project(&request, Path::new("/tmp/out"));
        assert!(project.contains(r#"<PackageReference Include="tool.a" Version="1.0.4" />"#));
        assert!(project.contains("<RestorePackagesPath>/tmp/out</RestorePackagesPath>"));
        assert!(project.contains("<RestoreProjectStyle>DotnetToolReference</RestoreProjectStyle>"));
    }

    #[cfg(unix)]
    fn fake_restore_command(dir: &Path, body: &str) -> String {
        let script = dir.join("fake-restore");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        crate::util::set_executable(&script).unwrap();
        script.display().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_process_restorer_passes_arguments() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        // $1=restore $2=<project> $3=--packages $4=<out>
        let command = fake_restore_command(
            dir.path(),
            r#"mkdir -p "$4/tool.a/1.0.0" && cp "$2" "$4/project.csproj" && echo "$@" > "$4/args""#,
        );
        let request = RestoreRequest::new(PackageId::new("tool.a"), "net8.0")
            .with_source(Some("https://feed.example/index.json".to_string()));

        ProcessRestorer::new(&command).restore(&request, &out).unwrap();

        assert!(out.join("tool.a/1.0.0").is_dir());
        let args = std::fs::read_to_string(out.join("args")).unwrap();
        assert!(args.starts_with("restore "));
        assert!(args.contains("--runtime any"));
        assert!(args.contains("--source https://feed.example/index.json"));
        assert!(args.trim_end().ends_with("-verbosity:quiet"));
        let project = std::fs::read_to_string(out.join("project.csproj")).unwrap();
        assert!(project.contains(r#"Include="tool.a" Version="*""#));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_restorer_failure_carries_output() {
        let dir = tempdir().unwrap();
        let command = fake_restore_command(
            dir.path(),
            "echo 'error NU1101: Unable to find package tool.a'\nexit 1",
        );
        let request = RestoreRequest::new(PackageId::new("tool.a"), "net8.0");

        let err = ProcessRestorer::new(&command).restore(&request, dir.path()).unwrap_err();
        match err {
            ToolError::RestoreFailed { output, .. } => assert!(output.contains("NU1101")),
            other => panic!("expected restore failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_restore_command_is_a_restore_failure() {
        let dir = tempdir().unwrap();
        let request = RestoreRequest::new(PackageId::new("tool.a"), "net8.0");
        let err = ProcessRestorer::new("toolchest-no-such-restore-command")
            .restore(&request, dir.path())
            .unwrap_err();
        assert!(matches!(err, ToolError::RestoreFailed { .. }));
    }
}
