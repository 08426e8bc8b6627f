#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

pub const PACKAGE_ID: &str = "local.tool.console.a";
pub const VERSION: &str = "1.0.4";

/// Descriptor declaring a single managed command.
pub fn tool_settings(command: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<DotNetCliTool Version="1">
  <Commands>
    <Command Name="{command}" EntryPoint="{command}.dll" Runner="dotnet" />
  </Commands>
</DotNetCliTool>"#
    )
}

/// Writes `<feed>/<id>.<version>.nupkg` holding the descriptor and an entry
/// point whose content is `entry_point`.
pub fn write_nupkg(feed: &Path, id: &str, version: &str, command: &str, entry_point: &str) {
    let file = std::fs::File::create(feed.join(format!("{id}.{version}.nupkg"))).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("tools/net8.0/any/DotnetToolSettings.xml", options).unwrap();
    zip.write_all(tool_settings(command).as_bytes()).unwrap();
    zip.start_file(format!("tools/net8.0/any/{command}.dll"), options).unwrap();
    zip.write_all(entry_point.as_bytes()).unwrap();
    zip.finish().unwrap();
}

/// A feed holding `local.tool.console.a` 1.0.4 with command `a`.
pub fn setup_feed() -> TempDir {
    let feed = TempDir::new().unwrap();
    write_nupkg(feed.path(), PACKAGE_ID, VERSION, "a", "echo hello from a \"$@\"\nexit 3\n");
    feed
}
