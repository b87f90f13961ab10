//! Launch configuration for the undetected chromedriver.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::UndetectedChrome`] launch.
///
/// All fields have usable defaults; construct with `Config::default()` and
/// chain the setters for anything that needs overriding.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional install destination for the patched driver binary. When
    /// unset, a deterministic per-version path under the platform data
    /// directory is used.
    pub driver_executable: Option<PathBuf>,

    /// Optional path to the browser executable. When unset, a fixed list of
    /// conventional executable names is searched.
    pub browser_executable: Option<PathBuf>,

    /// Directory to use as the browser profile. When unset, a fresh
    /// uniquely-named temporary directory is created per launch.
    pub user_data_dir: Option<PathBuf>,

    /// Port the chromedriver will listen on. Zero picks a free ephemeral
    /// port.
    pub port: u16,

    /// Address (`host:port`) the browser debugger will listen on. When
    /// unset, a free ephemeral port on 127.0.0.1 is probed.
    pub debugger_address: Option<String>,

    /// Additional arguments passed to the browser, ahead of the assembled
    /// ones. Duplicated flags are resolved by the browser's own parser
    /// (later wins).
    pub browser_args: Vec<String>,

    /// Additional arguments passed to the chromedriver. Use [`Config::port`]
    /// for the port rather than a `--port` arg here.
    pub driver_args: Vec<String>,

    /// Locale tag passed to the browser, e.g. `en-US`. When unset the OS
    /// locale is detected, falling back to `en-US`.
    pub language: Option<String>,

    /// Suppress the default-browser check and first-run dialogs.
    pub suppress_welcome: bool,

    /// Keep the HTTP connection to the driver alive between commands.
    pub keep_alive: bool,

    /// Browser log verbosity, passed through as `--log-level=N`.
    pub log_level: i32,

    /// Run the browser headless. When disabled, a maximized 1920x1080
    /// window is requested instead.
    pub headless: bool,

    /// Major chromedriver version to download and patch, e.g. 107. Zero
    /// resolves the latest release for the installed browser.
    pub version: u32,

    /// Emit debug-level traces and inherit the subprocess stdio.
    pub debug: bool,

    /// Run the browser sandboxed. Disabling adds `--no-sandbox --test-type`.
    pub sandbox: bool,

    /// Timeout applied to each release-service request.
    pub request_timeout: Duration,

    // Accepted but not consulted yet.
    pub enable_cdp_events: bool,
    pub service_args: Vec<String>,
    pub service_log_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver_executable: None,
            browser_executable: None,
            user_data_dir: None,
            port: 0,
            debugger_address: None,
            browser_args: Vec::new(),
            driver_args: Vec::new(),
            language: None,
            suppress_welcome: false,
            keep_alive: false,
            log_level: 0,
            headless: false,
            version: 0,
            debug: false,
            sandbox: true,
            request_timeout: Duration::from_secs(15),
            enable_cdp_events: false,
            service_args: Vec::new(),
            service_log_path: None,
        }
    }
}

impl Config {
    /// Set the install destination for the patched driver binary.
    pub fn driver_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.driver_executable = Some(path.into());
        self
    }

    /// Set the browser executable path.
    pub fn browser_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.browser_executable = Some(path.into());
        self
    }

    /// Set the browser profile directory.
    pub fn user_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_data_dir = Some(path.into());
        self
    }

    /// Set the chromedriver RPC port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the browser remote-debugging address.
    pub fn debugger_address(mut self, addr: impl Into<String>) -> Self {
        self.debugger_address = Some(addr.into());
        self
    }

    /// Append extra browser arguments.
    pub fn browser_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.browser_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append extra chromedriver arguments.
    pub fn driver_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.driver_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override the locale tag.
    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.language = Some(lang.into());
        self
    }

    /// Suppress first-run UI.
    pub fn suppress_welcome(mut self, suppress: bool) -> Self {
        self.suppress_welcome = suppress;
        self
    }

    /// Toggle headless mode.
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Pin the major driver version to download and patch.
    pub fn version(mut self, major: u32) -> Self {
        self.version = major;
        self
    }

    /// Enable debug logging.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Toggle the browser sandbox.
    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Override the release-service request timeout (useful on slow CI).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
