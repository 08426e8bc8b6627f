//! Reading and validating the tool descriptor (`DotnetToolSettings.xml`) that
//! every tool package ships next to its entry point.
//!
//! ```xml
//! <DotNetCliTool Version="1">
//!   <Commands>
//!     <Command Name="a" EntryPoint="a.dll" Runner="dotnet" />
//!   </Commands>
//! </DotNetCliTool>
//! ```

use std::path::Path;
use crate::error::{Result, ToolError};
use crate::identity::{Runner, ToolCommandName};

pub const TOOL_SETTINGS_FILE_NAME: &str = "DotnetToolSettings.xml";

/// Highest descriptor format version this build understands.
const SUPPORTED_FORMAT_VERSION: u32 = 1;

/// The single command a tool package declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfiguration {
    pub command_name: ToolCommandName,
    /// Entry point, relative to the descriptor's directory.
    pub entry_point: String,
    pub runner: Runner,
}

/// Loads and validates a descriptor file.
pub fn load_tool_configuration(path: &Path) -> Result<ToolConfiguration> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ToolError::Configuration(format!("cannot read '{}': {e}", path.display()))
    })?;
    parse_tool_configuration(&text)
}

/// Parses descriptor text. Exactly one `<Command>` with `Runner="dotnet"` is accepted.
pub fn parse_tool_configuration(text: &str) -> Result<ToolConfiguration> {
    let document = roxmltree::Document::parse(text)
        .map_err(|e| ToolError::Configuration(format!("the settings file is not valid XML: {e}")))?;
    let root = document.root_element();
    if !root.has_tag_name("DotNetCliTool") {
        return Err(ToolError::Configuration(format!(
            "unexpected root element '{}', expected 'DotNetCliTool'",
            root.tag_name().name()
        )));
    }
    if let Some(version) = root.attribute("Version") {
        let version: u32 = version.trim().parse().map_err(|_| {
            ToolError::Configuration(format!("format version '{version}' is not a number"))
        })?;
        if version > SUPPORTED_FORMAT_VERSION {
            return Err(ToolError::Configuration(format!(
                "format version {version} is higher than the supported version {SUPPORTED_FORMAT_VERSION}; update toolchest"
            )));
        }
    }

    let commands: Vec<_> = root
        .children()
        .filter(|node| node.has_tag_name("Commands"))
        .flat_map(|node| node.children().filter(|child| child.has_tag_name("Command")))
        .collect();
    let command = match commands.as_slice() {
        [command] => *command,
        [] => {
            return Err(ToolError::Configuration(
                "the settings file does not declare a command".to_string(),
            ))
        }
        _ => {
            return Err(ToolError::Configuration(format!(
                "more than one command is defined ({}), only a single command is supported",
                commands.len()
            )))
        }
    };

    let name = command.attribute("Name").unwrap_or_default().trim();
    if name.is_empty() {
        return Err(ToolError::Configuration("the command is missing a name".to_string()));
    }
    let entry_point = command.attribute("EntryPoint").unwrap_or_default().trim();
    if entry_point.is_empty() {
        return Err(ToolError::Configuration(format!(
            "command '{name}' is missing an entry point"
        )));
    }
    let runner = command.attribute("Runner").unwrap_or_default();
    if runner != "dotnet" {
        return Err(ToolError::Configuration(format!(
            "command '{name}' uses unsupported runner '{runner}'; only 'dotnet' is supported"
        )));
    }
    validate_command_name(name)?;

    Ok(ToolConfiguration {
        command_name: ToolCommandName::new(name),
        entry_point: entry_point.to_string(),
        runner: Runner::Dotnet,
    })
}

const INVALID_FILE_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Names that may not appear anywhere in a command name.
const RESERVED_ANYWHERE: &[&str] = &[
    "dev-certs", "msbuild", "vstest", "app-insights", "appinsights", "asp", "asp-net", "aspnet",
    "az", "azure", "code", "browserlink", "browser-link", "core", "csc", "csi", "devcerts", "dn",
    "dnu", "dnvm", "dnx", "dot", "dotnet", "dot-net", "dx", "editor-config", "editorconfig", "ef",
    "entity-framework", "entityframework", "etw", "fsc", "fsi", "intellisense", "intellitest",
    "nuget", "libman", "lib-man", "live-test", "livetest", "live-unit-test",
    "live-unit-testing", "lut", "microsoft", "msft", "notch", "razor", "rzc", "runtime-store",
    "test-impat", "testimpact", "vbc", "visual", "vso", "vsts",
];

/// Names that may not start a command (`<word>` or `<word>-...`).
const RESERVED_PREFIX: &[&str] = &[
    "analysis", "analyze", "background", "bg", "clean-up", "cleanup", "code-coverage",
    "codecoverage", "code-gen", "codegen", "copy", "cover", "debug", "delete", "dmp", "dump", "do",
    "doctor", "fix", "fix-all", "fixall", "fmt", "format", "framework", "http", "https", "info",
    "init", "inspect", "interactive", "move", "package", "packman", "pack-man", "patch", "pretty",
    "project", "property", "reference", "repl", "runtime", "scaffold", "sdk", "spit", "shutdown",
    "sln", "solution", "start", "stop", "target", "template", "undo", "version", "web",
];

/// Built-in driver commands a tool may not shadow.
const RESERVED_WHOLE: &[&str] = &[
    "add", "build", "clean", "install", "list", "migrate", "new", "pack", "publish", "remove",
    "restore", "run", "test", "uninstall", "update", "watch",
];

/// Validates a command name against file system rules and reserved words.
pub fn validate_command_name(name: &str) -> Result<()> {
    if name.starts_with('.') {
        return Err(ToolError::Configuration(format!(
            "the command name '{name}' starts with a leading dot ('.')"
        )));
    }
    if let Some(c) = name.chars().find(|c| INVALID_FILE_NAME_CHARS.contains(c) || c.is_control()) {
        return Err(ToolError::Configuration(format!(
            "the command name '{name}' contains the invalid character {c:?}"
        )));
    }

    let lower = name.to_lowercase();
    let starts_with_word =
        |word: &str| lower == word || lower.starts_with(&format!("{word}-"));
    let mut errors = Vec::new();
    for word in RESERVED_ANYWHERE {
        if lower.contains(word) {
            errors.push(format!("command name '{name}' contains reserved string '{word}'."));
        }
    }
    for word in RESERVED_PREFIX {
        if starts_with_word(word) {
            errors.push(format!("command name '{name}' starts with reserved word '{word}'."));
        }
    }
    for word in RESERVED_WHOLE {
        if lower == *word {
            errors.push(format!("command name '{name}' matches reserved string '{word}'."));
        }
    }
    // a single letter or digit may not lead a hyphenated name
    let first_word = lower.split('-').next().unwrap_or_default();
    if lower.contains('-') && first_word.len() == 1 && first_word.chars().all(|c| c.is_ascii_alphanumeric()) {
        errors.push(format!("command name '{name}' starts with reserved word '{first_word}'."));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::Configuration(errors.join(" ")))
    }
}
