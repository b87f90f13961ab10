//! Error types shared across the crate.

use std::path::PathBuf;
use std::time::Duration;

/// Convenience alias used by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while patching the driver or orchestrating the browser.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No supported browser executable was found on the search path and no
    /// override was configured.
    #[error("chrome executable not found, please install or provide a path")]
    ChromeNotFound,

    /// The installed browser's version query could not be run or parsed.
    #[error("failed to resolve chrome version: {0}")]
    VersionResolve(String),

    /// The host operating system has no chromedriver release channel.
    #[error("OS not supported: {0}")]
    UnsupportedPlatform(String),

    /// Transport-level failure talking to the release service.
    #[error("release service request failed")]
    Network(#[source] reqwest::Error),

    /// The release service answered with a non-success status.
    #[error("release service returned {status} for {url}")]
    Service {
        status: reqwest::StatusCode,
        url: String,
    },

    /// A release-service call exceeded the configured request timeout.
    #[error("release service request timed out after {0:?}")]
    Timeout(Duration),

    /// Downloading the driver archive failed.
    #[error("failed to download driver archive for version '{version}'")]
    Download {
        version: String,
        #[source]
        source: Box<Error>,
    },

    /// The driver archive could not be opened or did not contain the
    /// expected entry.
    #[error("failed to extract chromedriver from '{archive}': {reason}")]
    Extract { archive: PathBuf, reason: String },

    /// The driver binary contained no occurrence of the automation
    /// signature. Either it was patched already or the release layout
    /// changed; passing it through unmodified would defeat the point.
    #[error("no automation signature found in driver binary")]
    SignatureNotFound,

    /// Writing the patched binary to its install path failed.
    #[error("failed to install patched driver to '{path}'")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An OS-level failure starting one of the two subprocesses.
    #[error("failed to start {process}")]
    ProcessStart {
        process: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The driver RPC endpoint never became reachable, or rejected the
    /// capability negotiation.
    #[error("failed to connect to chromedriver at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// I/O failure outside the install step, including invalid
    /// caller-supplied addresses.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error surfaced by the underlying WebDriver session.
    #[error(transparent)]
    WebDriver(#[from] thirtyfour::error::WebDriverError),
}
