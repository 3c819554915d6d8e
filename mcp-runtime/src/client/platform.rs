//! Operating system descriptor used in the provenance `user-agent`.

use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;

/// Detects the host OS, e.g. `macOS - 14.5`, `Ubuntu - 22.04.4` or `Windows`.
///
/// Spawns a subprocess or reads a file, so callers memoize the result.
pub fn detect() -> String {
    let (name, version) = match std::env::consts::OS {
        "windows" => ("Windows".to_string(), windows_version()),
        "macos" => ("macOS".to_string(), command_output("sw_vers", &["-productVersion"])),
        "linux" => linux_release(),
        other => (other.to_string(), None),
    };
    describe(&name, version.as_deref())
}

fn describe(name: &str, version: Option<&str>) -> String {
    match version.map(str::trim).filter(|version| !version.is_empty()) {
        Some(version) => format!("{name} - {version}"),
        None => name.to_string(),
    }
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn windows_version() -> Option<String> {
    command_output("cmd", &["/C", "ver"]).and_then(|output| parse_windows_version(&output))
}

fn windows_version_regex() -> Option<&'static Regex> {
    static VERSION: OnceLock<Option<Regex>> = OnceLock::new();
    VERSION
        .get_or_init(|| Regex::new(r"\[Version ([.\d]+)").ok())
        .as_ref()
}

/// Version from output like `Microsoft Windows [Version 10.0.19044.2604]`.
fn parse_windows_version(output: &str) -> Option<String> {
    let captures = windows_version_regex()?.captures(output)?;
    captures.get(1).map(|version| version.as_str().to_string())
}

fn linux_release() -> (String, Option<String>) {
    std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|content| parse_os_release(&content))
        .unwrap_or_else(|| ("Linux".to_string(), None))
}

/// First two words of `PRETTY_NAME`, as distribution name and version.
fn parse_os_release(content: &str) -> Option<(String, Option<String>)> {
    let pretty = content
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))?
        .trim_matches('"');
    let mut words = pretty.split_whitespace();
    let name = words.next()?.to_string();
    Some((name, words.next().map(str::to_string)))
}
