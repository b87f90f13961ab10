//! Process orchestration: starts the browser and the patched driver as
//! cooperating subprocesses and exposes the control session.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use thirtyfour::PageLoadStrategy;
use tokio::process::{Child, Command};
use tracing::{debug, error};

use crate::browser;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::patcher::Patcher;
use crate::stealth;

/// Bounded readiness probing of the subprocess endpoints: attempt `n`
/// sleeps `n * READY_BACKOFF` before the next try.
const READY_ATTEMPTS: u32 = 10;
const READY_BACKOFF: Duration = Duration::from_millis(250);

/// The browser profile directory in use for one launch.
enum UserData {
    Provided(PathBuf),
    Ephemeral(TempDir),
}

impl UserData {
    fn path(&self) -> &Path {
        match self {
            Self::Provided(path) => path,
            Self::Ephemeral(dir) => dir.path(),
        }
    }
}

/// A live browser-automation session backed by a patched chromedriver.
///
/// Owns the underlying [`WebDriver`] session together with both subprocess
/// handles. Navigation goes through [`UndetectedChrome::get`], which scrubs
/// residual automation markers from the page before delegating; everything
/// else is available on [`UndetectedChrome::session`].
///
/// Call [`UndetectedChrome::close`] for ordered teardown. Dropping the
/// handle without closing still kills both subprocesses and removes an
/// ephemeral profile directory, but skips the WebDriver quit handshake.
pub struct UndetectedChrome {
    session: WebDriver,
    dev_tools: ChromeDevTools,
    chrome: Child,
    driver: Child,
    user_data: UserData,
    driver_path: PathBuf,
    debugger_address: String,
    driver_port: u16,
}

impl UndetectedChrome {
    /// Patch the driver for the configured (or installed) browser version,
    /// start browser and driver, and connect the control session.
    pub async fn launch(config: Config) -> Result<Self> {
        if config.debug {
            init_debug_tracing();
        }

        let major = if config.version > 0 {
            config.version
        } else {
            browser::installed_major_version().await?
        };

        let patcher = Patcher::new(
            major,
            config.driver_executable.clone(),
            config.request_timeout,
        )
        .await?;
        debug!(major, version = patcher.version(), "patching driver");
        let driver_path = patcher.patch().await?;

        // Configuration assembly; the only I/O here is port probing.
        let (debug_host, debug_port) =
            resolve_debugger_address(config.debugger_address.as_deref())?;
        let debugger_address = format!("{debug_host}:{debug_port}");

        let user_data = match &config.user_data_dir {
            Some(path) => UserData::Provided(path.clone()),
            None => UserData::Ephemeral(
                tempfile::Builder::new()
                    .prefix("undetected-chromedriver-userdata-")
                    .tempdir()?,
            ),
        };

        let locale = config
            .language
            .clone()
            .or_else(sys_locale::get_locale)
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| "en-US".to_string());

        let chrome_args =
            assemble_browser_args(&config, &debug_host, debug_port, user_data.path(), &locale);

        // Startup pipeline.
        let chrome_path = match &config.browser_executable {
            Some(path) => path.clone(),
            None => browser::find_browser().ok_or(Error::ChromeNotFound)?,
        };

        debug!(cmd = %chrome_path.display(), args = ?chrome_args, "starting chrome");
        let chrome = spawn_process("chrome", &chrome_path, &chrome_args, config.debug)?;

        let driver_port = resolve_driver_port(config.port)?;
        let mut driver_args = config.driver_args.clone();
        driver_args.push(format!("--port={driver_port}"));

        debug!(cmd = %driver_path.display(), args = ?driver_args, "starting chromedriver");
        let driver = spawn_process("chromedriver", &driver_path, &driver_args, config.debug)?;

        // Both processes initialize concurrently; probe each endpoint until
        // it accepts connections before negotiating the session.
        let probe = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(Error::Network)?;

        let server_url = format!("http://127.0.0.1:{driver_port}");
        wait_for_endpoint(
            &probe,
            &format!("http://{debugger_address}/json/version"),
            "chrome debugger",
        )
        .await?;
        wait_for_endpoint(&probe, &format!("{server_url}/status"), "chromedriver").await?;

        let session = connect(&server_url, &chrome_path, &chrome_args, &debugger_address).await?;
        let dev_tools = ChromeDevTools::new(session.handle.clone());

        Ok(Self {
            session,
            dev_tools,
            chrome,
            driver,
            user_data,
            driver_path,
            debugger_address,
            driver_port,
        })
    }

    /// Navigate to `url`, scrubbing automation markers from the page first.
    ///
    /// The scrub is best-effort: probe or cleanup failures are logged and
    /// navigation proceeds regardless.
    pub async fn get(&self, url: &str) -> Result<()> {
        if self.has_automation_markers().await {
            debug!("removing automation markers");
            self.remove_automation_markers().await;
        }

        self.session.goto(url).await?;

        Ok(())
    }

    /// Run a script in the page context and return its JSON result.
    pub async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        let ret = self.session.execute(script, args).await?;
        Ok(ret.json().clone())
    }

    /// Execute a Chrome DevTools protocol command on the session.
    pub async fn execute_cdp(&self, cmd: &str, params: Value) -> Result<Value> {
        Ok(self.dev_tools.execute_cdp_with_params(cmd, params).await?)
    }

    /// The underlying WebDriver session, for element lookup and anything
    /// else beyond navigation.
    pub fn session(&self) -> &WebDriver {
        &self.session
    }

    /// Path of the patched driver binary this session runs on.
    pub fn driver_path(&self) -> &Path {
        &self.driver_path
    }

    /// The browser's remote-debugging address, as `host:port`.
    pub fn debugger_address(&self) -> &str {
        &self.debugger_address
    }

    /// The driver RPC port in use.
    pub fn driver_port(&self) -> u16 {
        self.driver_port
    }

    /// The profile directory the browser is running with.
    pub fn user_data_dir(&self) -> &Path {
        self.user_data.path()
    }

    /// Ordered teardown: quit the WebDriver session, kill both
    /// subprocesses, and remove the profile directory if this session
    /// created it.
    pub async fn close(mut self) -> Result<()> {
        // Quit is best-effort; the processes are killed regardless.
        if let Err(e) = self.session.clone().quit().await {
            debug!("webdriver quit failed: {e}");
        }

        if let Err(e) = self.driver.kill().await {
            debug!("killing chromedriver failed: {e}");
        }
        if let Err(e) = self.chrome.kill().await {
            debug!("killing chrome failed: {e}");
        }

        if let UserData::Ephemeral(dir) = self.user_data {
            dir.close()?;
        }

        Ok(())
    }

    async fn has_automation_markers(&self) -> bool {
        match self
            .session
            .execute(stealth::PROBE_MARKERS_SCRIPT, Vec::new())
            .await
        {
            Ok(ret) => stealth::markers_present(ret.json()),
            Err(e) => {
                error!("automation marker probe failed: {e}");
                false
            }
        }
    }

    async fn remove_automation_markers(&self) {
        let params = json!({ "source": stealth::REMOVE_MARKERS_SCRIPT });
        if let Err(e) = self
            .dev_tools
            .execute_cdp_with_params("Page.addScriptToEvaluateOnNewDocument", params)
            .await
        {
            error!("automation marker removal failed: {e}");
        }
    }
}

/// Assemble the browser command line in a fixed order: caller extras first,
/// then debugging endpoint, profile, locale, UI suppression, sandboxing,
/// windowing and log level. Later duplicates win in the browser's own flag
/// parser.
fn assemble_browser_args(
    config: &Config,
    debug_host: &str,
    debug_port: u16,
    user_data_dir: &Path,
    locale: &str,
) -> Vec<String> {
    let mut args = config.browser_args.clone();

    args.push(format!("--remote-debugging-host={debug_host}"));
    args.push(format!("--remote-debugging-port={debug_port}"));
    args.push(format!("--user-data-dir={}", user_data_dir.display()));
    args.push(format!("--lang={locale}"));

    if config.suppress_welcome {
        args.push("--no-default-browser-check".to_string());
        args.push("--no-first-run".to_string());
    }

    if !config.sandbox {
        args.push("--no-sandbox".to_string());
        args.push("--test-type".to_string());
    }

    if config.headless {
        args.push("--headless=new".to_string());
    } else {
        args.push("--window-size=1920,1080".to_string());
        args.push("--start-maximized".to_string());
    }

    args.push(format!("--log-level={}", config.log_level));

    args
}

/// Resolve the remote-debugging host and port. An explicit address is
/// parsed (`host:port`, or a bare port on 127.0.0.1); otherwise a free
/// ephemeral port is probed.
fn resolve_debugger_address(explicit: Option<&str>) -> Result<(String, u16)> {
    let invalid = |addr: &str| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid debugger address '{addr}'"),
        ))
    };

    match explicit {
        Some(addr) => match addr.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| invalid(addr))?;
                Ok((host.to_string(), port))
            }
            None => {
                let port = addr.parse().map_err(|_| invalid(addr))?;
                Ok(("127.0.0.1".to_string(), port))
            }
        },
        None => Ok(("127.0.0.1".to_string(), ephemeral_port()?)),
    }
}

/// An explicit port is used as-is; zero probes a free ephemeral port.
fn resolve_driver_port(explicit: u16) -> Result<u16> {
    if explicit > 0 {
        Ok(explicit)
    } else {
        ephemeral_port()
    }
}

/// Bind-then-release probing. The window between release and the dependent
/// process binding again is accepted as best-effort.
fn ephemeral_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);

    Ok(port)
}

fn spawn_process(name: &'static str, path: &Path, args: &[String], debug: bool) -> Result<Child> {
    let mut command = Command::new(path);
    command.args(args).kill_on_drop(true);

    if !debug {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }

    command.spawn().map_err(|source| Error::ProcessStart {
        process: name,
        source,
    })
}

/// Poll an HTTP endpoint with bounded retries and linear backoff until it
/// accepts connections.
async fn wait_for_endpoint(
    client: &reqwest::Client,
    url: &str,
    what: &'static str,
) -> Result<()> {
    for attempt in 1..=READY_ATTEMPTS {
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(attempt, "{what} ready");
                return Ok(());
            }
            Ok(_) | Err(_) => {}
        }

        tokio::time::sleep(READY_BACKOFF * attempt).await;
    }

    Err(Error::Connect {
        addr: url.to_string(),
        reason: format!("{what} not ready after {READY_ATTEMPTS} attempts"),
    })
}

/// Open the WebDriver session, declaring the browser binary, its full
/// argument list and the debugger address.
async fn connect(
    server_url: &str,
    chrome_path: &Path,
    chrome_args: &[String],
    debugger_address: &str,
) -> Result<WebDriver> {
    let mut caps = DesiredCapabilities::chrome();
    caps.set_page_load_strategy(PageLoadStrategy::Normal)?;
    caps.set_binary(&chrome_path.to_string_lossy())?;
    for arg in chrome_args {
        caps.add_arg(arg)?;
    }
    caps.add_experimental_option("debuggerAddress", debugger_address)?;

    debug!(addr = server_url, "connecting to driver");
    WebDriver::new(server_url, caps)
        .await
        .map_err(|e| Error::Connect {
            addr: server_url.to_string(),
            reason: e.to_string(),
        })
}

fn init_debug_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("undetected_chromedriver=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_args_follow_fixed_order() {
        let config = Config::default().suppress_welcome(true).sandbox(false);
        let args = assemble_browser_args(
            &config,
            "127.0.0.1",
            9222,
            Path::new("/tmp/profile"),
            "en-US",
        );

        assert_eq!(
            args,
            vec![
                "--remote-debugging-host=127.0.0.1",
                "--remote-debugging-port=9222",
                "--user-data-dir=/tmp/profile",
                "--lang=en-US",
                "--no-default-browser-check",
                "--no-first-run",
                "--no-sandbox",
                "--test-type",
                "--window-size=1920,1080",
                "--start-maximized",
                "--log-level=0",
            ]
        );
    }

    #[test]
    fn caller_args_come_first() {
        let config = Config::default().browser_args(["--mute-audio"]);
        let args =
            assemble_browser_args(&config, "127.0.0.1", 9222, Path::new("/tmp/p"), "en-US");
        assert_eq!(args[0], "--mute-audio");
    }

    #[test]
    fn headless_replaces_window_geometry() {
        let config = Config::default().headless(true);
        let args =
            assemble_browser_args(&config, "127.0.0.1", 9222, Path::new("/tmp/p"), "en-US");

        assert!(args.contains(&"--headless=new".to_string()));
        assert!(!args.contains(&"--window-size=1920,1080".to_string()));
        assert!(!args.contains(&"--start-maximized".to_string()));
    }

    #[test]
    fn sandboxed_by_default() {
        let config = Config::default();
        let args =
            assemble_browser_args(&config, "127.0.0.1", 9222, Path::new("/tmp/p"), "en-US");
        assert!(!args.contains(&"--no-sandbox".to_string()));
    }

    #[test]
    fn explicit_debugger_address_is_not_probed() {
        let (host, port) = resolve_debugger_address(Some("10.0.0.5:9333")).unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 9333);
    }

    #[test]
    fn bare_port_defaults_to_loopback() {
        let (host, port) = resolve_debugger_address(Some("9222")).unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 9222);
    }

    #[test]
    fn malformed_debugger_address_is_rejected() {
        assert!(resolve_debugger_address(Some("not-a-port")).is_err());
        assert!(resolve_debugger_address(Some("host:nope")).is_err());
    }

    #[test]
    fn explicit_driver_port_is_used_verbatim() {
        assert_eq!(resolve_driver_port(9515).unwrap(), 9515);
    }

    #[test]
    fn zero_driver_port_probes_a_free_one() {
        let port = resolve_driver_port(0).unwrap();
        assert_ne!(port, 0);
    }

    #[test]
    fn probed_address_is_loopback() {
        let (host, port) = resolve_debugger_address(None).unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_ne!(port, 0);
    }

    #[tokio::test]
    #[ignore] // Requires an installed browser and network access
    async fn launches_and_navigates() {
        let chrome = UndetectedChrome::launch(Config::default().headless(true))
            .await
            .unwrap();

        chrome.get("https://example.com").await.unwrap();
        let title = chrome.session().title().await.unwrap();
        assert!(!title.is_empty());

        chrome.close().await.unwrap();
    }
}
