//! Browser executable discovery and installed-version resolution.

use std::path::PathBuf;

use tokio::process::Command;

use crate::error::{Error, Result};

/// Conventional executable names, searched in order. The first name that
/// resolves wins.
#[cfg(target_os = "linux")]
const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
    "google-chrome-stable",
];

#[cfg(target_os = "macos")]
const BROWSER_CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "google-chrome",
    "chromium",
];

#[cfg(target_os = "windows")]
const BROWSER_CANDIDATES: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    "chrome",
    "chromium",
];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const BROWSER_CANDIDATES: &[&str] = &["chromium", "chrome"];

/// Locate a Chrome or Chromium executable.
///
/// Absolute candidates are checked directly; bare names are resolved against
/// the search path.
pub fn find_browser() -> Option<PathBuf> {
    BROWSER_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Resolve the major version of the installed browser by invoking it with
/// `--version` and parsing the reported version string.
pub async fn installed_major_version() -> Result<u32> {
    let binary = find_browser().ok_or(Error::ChromeNotFound)?;

    let output = Command::new(&binary)
        .arg("--version")
        .output()
        .await
        .map_err(|e| {
            Error::VersionResolve(format!("running '{} --version': {e}", binary.display()))
        })?;

    if !output.status.success() {
        return Err(Error::VersionResolve(format!(
            "'{} --version' exited with {}",
            binary.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_major_version(&stdout).ok_or_else(|| {
        Error::VersionResolve(format!("unparseable version output '{}'", stdout.trim()))
    })
}

/// Parse the major version out of a `--version` line: the second
/// whitespace-delimited token, leading dot-delimited component.
fn parse_major_version(output: &str) -> Option<u32> {
    output.split_whitespace().nth(1)?.split('.').next()?.parse().ok()
}
