//! Downloads chromedriver releases and rewrites the embedded automation
//! signature so remote sites cannot match on it.
//!
//! The driver injects JavaScript containing `cdc_`-prefixed symbols into
//! every page it controls. Patching replaces each of those symbols in the
//! executable with a randomly generated look-alike so the injected names no
//! longer match the well-known pattern, while keeping the binary layout
//! byte-for-byte compatible.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::Client;
use tracing::debug;

use crate::error::{Error, Result};

const RELEASE_BASE_URL: &str = "https://chromedriver.storage.googleapis.com";

/// Subdirectory of the platform data directory holding patched binaries.
const DATA_SUBDIR: &str = "undetected_chromedriver";

/// Literal prefix of the driver's internal automation symbols.
const SIGNATURE_PREFIX: &[u8] = b"cdc_";

/// Prefix plus a 22-byte opaque suffix.
const SIGNATURE_LEN: usize = 26;

const TOKEN_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Used when the OS random source is unavailable. A constant replacement is
/// weaker than a random one but still a different byte pattern than the
/// shipped signature.
const FALLBACK_TOKEN: &[u8; SIGNATURE_LEN] = b"xxv_plxklvnobnowmrmiIMvqlb";

/// Release platform tag, derived once from the running operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux64,
    Mac64,
    Win32,
}

impl Platform {
    /// Detect the tag for the current OS. Anything without a chromedriver
    /// release channel is fatal.
    pub fn detect() -> Result<Self> {
        match std::env::consts::OS {
            "linux" => Ok(Self::Linux64),
            "macos" => Ok(Self::Mac64),
            "windows" => Ok(Self::Win32),
            other => Err(Error::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Linux64 => "linux64",
            Self::Mac64 => "mac64",
            Self::Win32 => "win32",
        }
    }

    fn archive_name(self) -> String {
        format!("chromedriver_{}.zip", self.tag())
    }

    fn binary_name(self, version: &str) -> String {
        match self {
            Self::Win32 => format!("undetected_chromedriver_{version}.exe"),
            _ => format!("undetected_chromedriver_{version}"),
        }
    }
}

/// Resolves a chromedriver release and produces a patched executable.
///
/// Construction resolves the release; [`Patcher::patch`] performs the
/// download / extract / rewrite / install pipeline.
#[derive(Debug)]
pub struct Patcher {
    client: Client,
    base_url: String,
    platform: Platform,
    version: String,
    major_version: u32,
    binary_path: PathBuf,
    cache_path: PathBuf,
    timeout: Duration,
}

impl Patcher {
    /// Create a patcher for the given major version (0 means latest).
    ///
    /// `install_path` optionally overrides the deterministic per-version
    /// install destination under the platform data directory.
    pub async fn new(
        major_version: u32,
        install_path: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let platform = Platform::detect()?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Network)?;

        let version = fetch_release(&client, RELEASE_BASE_URL, major_version, timeout).await?;

        let binary_path = match install_path {
            Some(path) => path,
            None => {
                let data_dir = dirs::data_dir()
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "platform data directory unavailable",
                        )
                    })?
                    .join(DATA_SUBDIR);
                fs::create_dir_all(&data_dir)?;
                data_dir.join(platform.binary_name(&version))
            }
        };

        let cache_path = std::env::temp_dir().join(format!("chromedriver_{version}.zip"));

        Ok(Self {
            client,
            base_url: RELEASE_BASE_URL.to_string(),
            platform,
            version,
            major_version,
            binary_path,
            cache_path,
            timeout,
        })
    }

    /// The resolved release version, e.g. `108.0.5359.71`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The major version that was requested at construction (0 = latest).
    pub fn major_version(&self) -> u32 {
        self.major_version
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Where the patched binary is (or will be) installed.
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Download, extract, patch and install the driver for the resolved
    /// release. Returns the installed binary path.
    pub async fn patch(&self) -> Result<PathBuf> {
        let archive = self.download_archive().await?;
        let driver = self.extract(&archive)?;

        debug!(version = %self.version, "patching driver binary");
        let patched = patch_driver(&driver).ok_or(Error::SignatureNotFound)?;

        self.install(&patched)?;

        Ok(self.binary_path.clone())
    }

    /// Return the cached archive if present, otherwise download it. Cached
    /// files are trusted as-is; there is no integrity check.
    async fn download_archive(&self) -> Result<PathBuf> {
        if self.cache_path.exists() {
            debug!(path = %self.cache_path.display(), "reusing cached driver archive");
            return Ok(self.cache_path.clone());
        }

        let url = format!(
            "{}/{}/{}",
            self.base_url,
            self.version,
            self.platform.archive_name()
        );
        let body = request(&self.client, &url, self.timeout)
            .await
            .map_err(|e| Error::Download {
                version: self.version.clone(),
                source: Box::new(e),
            })?;

        fs::write(&self.cache_path, &body)?;

        Ok(self.cache_path.clone())
    }

    /// Read the `chromedriver` entry out of the release archive.
    fn extract(&self, archive: &Path) -> Result<Vec<u8>> {
        let extract_err = |reason: String| Error::Extract {
            archive: archive.to_path_buf(),
            reason,
        };

        let file = fs::File::open(archive).map_err(|e| extract_err(e.to_string()))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| extract_err(e.to_string()))?;
        let mut entry = zip
            .by_name("chromedriver")
            .map_err(|e| extract_err(format!("no 'chromedriver' entry: {e}")))?;

        let mut driver = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut driver)
            .map_err(|e| extract_err(e.to_string()))?;

        Ok(driver)
    }

    /// Replace any previous install, then write the patched bytes with
    /// executable permissions.
    fn install(&self, driver: &[u8]) -> Result<()> {
        let install_err = |source: std::io::Error| Error::Install {
            path: self.binary_path.clone(),
            source,
        };

        if self.binary_path.exists() {
            fs::remove_file(&self.binary_path).map_err(install_err)?;
        }

        fs::write(&self.binary_path, driver).map_err(install_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.binary_path, fs::Permissions::from_mode(0o755))
                .map_err(install_err)?;
        }

        Ok(())
    }
}

/// Resolve the exact release version for a major version (0 = latest).
async fn fetch_release(
    client: &Client,
    base_url: &str,
    major_version: u32,
    timeout: Duration,
) -> Result<String> {
    let mut url = format!("{base_url}/LATEST_RELEASE");
    if major_version > 0 {
        url.push_str(&format!("_{major_version}"));
    }

    let body = request(client, &url, timeout).await?;

    Ok(String::from_utf8_lossy(&body).trim().to_string())
}

/// Single GET with the configured timeout. Non-success statuses and
/// timeouts are mapped to their own variants; nothing is retried.
async fn request(client: &Client, url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let map_transport = |e: reqwest::Error| {
        if e.is_timeout() {
            Error::Timeout(timeout)
        } else {
            Error::Network(e)
        }
    };

    let response = client.get(url).send().await.map_err(map_transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Service {
            status,
            url: url.to_string(),
        });
    }

    let body = response.bytes().await.map_err(map_transport)?;

    Ok(body.to_vec())
}

/// Replace every occurrence of the automation signature with one freshly
/// generated token, shared across all occurrences. Returns `None` when the
/// binary contains no signature; callers must treat that as a failure
/// rather than fall back to the unpatched bytes.
fn patch_driver(driver: &[u8]) -> Option<Vec<u8>> {
    let positions = signature_positions(driver);
    if positions.is_empty() {
        return None;
    }

    let token = random_token();
    let mut patched = driver.to_vec();
    for pos in positions {
        patched[pos..pos + SIGNATURE_LEN].copy_from_slice(&token);
    }

    Some(patched)
}

/// Offsets of every non-overlapping signature occurrence. A prefix too close
/// to the end of the buffer to carry the full 22-byte suffix is not a match.
fn signature_positions(driver: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();

    let mut i = 0;
    while i + SIGNATURE_LEN <= driver.len() {
        if driver[i..].starts_with(SIGNATURE_PREFIX) {
            positions.push(i);
            i += SIGNATURE_LEN;
        } else {
            i += 1;
        }
    }

    positions
}

/// Generate a replacement token matching the driver's symbol naming
/// convention: 26 bytes, first two identical, `_` at index 3, the two bytes
/// at indices 20 and 21 uppercase, everything else lowercase.
fn random_token() -> [u8; SIGNATURE_LEN] {
    let mut token = [0u8; SIGNATURE_LEN];

    if OsRng.try_fill_bytes(&mut token).is_err() {
        return *FALLBACK_TOKEN;
    }

    for byte in token.iter_mut() {
        *byte = TOKEN_LETTERS[*byte as usize % TOKEN_LETTERS.len()];
    }

    token[1] = token[0];
    token[3] = b'_';
    token[20] = token[20].to_ascii_uppercase();
    token[21] = token[21].to_ascii_uppercase();

    token
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_token_format(token: &[u8]) {
        assert_eq!(token.len(), SIGNATURE_LEN);
        assert_eq!(token[0], token[1]);
        assert_eq!(token[3], b'_');
        assert!(token[20].is_ascii_uppercase());
        assert!(token[21].is_ascii_uppercase());
        for (i, byte) in token.iter().enumerate() {
            if matches!(i, 3 | 20 | 21) {
                continue;
            }
            assert!(
                byte.is_ascii_lowercase(),
                "byte {i} ({}) should be lowercase",
                *byte as char
            );
        }
    }

    fn binary_with_signatures(count: usize) -> Vec<u8> {
        let mut binary = b"\x7fELF header bytes ".to_vec();
        for i in 0..count {
            binary.extend_from_slice(b"cdc_adoQpoasnfa76pfcZLmcfl");
            binary.extend_from_slice(format!(" filler {i} ").as_bytes());
        }
        binary.extend_from_slice(b"trailing section");
        binary
    }

    #[test]
    fn platform_tag_matches_host_os() {
        #[cfg(target_os = "linux")]
        assert_eq!(Platform::detect().unwrap().tag(), "linux64");
        #[cfg(target_os = "macos")]
        assert_eq!(Platform::detect().unwrap().tag(), "mac64");
        #[cfg(target_os = "windows")]
        assert_eq!(Platform::detect().unwrap().tag(), "win32");
    }

    #[test]
    fn archive_and_binary_names_derive_from_version() {
        assert_eq!(Platform::Linux64.archive_name(), "chromedriver_linux64.zip");
        assert_eq!(
            Platform::Linux64.binary_name("105.0.5195.52"),
            "undetected_chromedriver_105.0.5195.52"
        );
        assert_eq!(
            Platform::Win32.binary_name("105.0.5195.52"),
            "undetected_chromedriver_105.0.5195.52.exe"
        );
    }

    #[test]
    fn token_matches_naming_convention() {
        for _ in 0..100 {
            assert_token_format(&random_token());
        }
    }

    #[test]
    fn fallback_token_matches_naming_convention() {
        assert_token_format(FALLBACK_TOKEN);
    }

    #[test]
    fn patch_removes_every_signature() {
        let binary = binary_with_signatures(3);
        let patched = patch_driver(&binary).expect("signatures present");

        assert!(signature_positions(&patched).is_empty());
        assert!(!patched
            .windows(SIGNATURE_PREFIX.len())
            .any(|w| w == SIGNATURE_PREFIX));
    }

    #[test]
    fn patch_preserves_length() {
        let binary = binary_with_signatures(5);
        let patched = patch_driver(&binary).expect("signatures present");
        assert_eq!(patched.len(), binary.len());
    }

    #[test]
    fn patch_uses_one_token_for_all_occurrences() {
        let binary = binary_with_signatures(4);
        let positions = signature_positions(&binary);
        let patched = patch_driver(&binary).expect("signatures present");

        let first = &patched[positions[0]..positions[0] + SIGNATURE_LEN];
        assert_token_format(first);
        for pos in &positions[1..] {
            assert_eq!(&patched[*pos..*pos + SIGNATURE_LEN], first);
        }
    }

    #[test]
    fn patch_rejects_unsigned_binary() {
        assert!(patch_driver(b"no signature in here at all, promise").is_none());
        assert!(patch_driver(&[]).is_none());
    }

    #[test]
    fn signature_at_buffer_end_is_found() {
        let mut binary = b"prefix ".to_vec();
        binary.extend_from_slice(b"cdc_adoQpoasnfa76pfcZLmcfl");
        assert_eq!(signature_positions(&binary), vec![7]);
    }

    #[test]
    fn truncated_signature_is_ignored() {
        // Prefix present but fewer than 22 suffix bytes remain.
        let binary = b"some bytes then cdc_short".to_vec();
        assert!(signature_positions(&binary).is_empty());
    }

    fn offline_patcher(version: &str, cache_path: PathBuf, binary_path: PathBuf) -> Patcher {
        Patcher {
            client: Client::new(),
            // Discard port; any request against it fails fast.
            base_url: "http://127.0.0.1:9".to_string(),
            platform: Platform::Linux64,
            version: version.to_string(),
            major_version: 0,
            binary_path,
            cache_path,
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn cached_archive_skips_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("chromedriver_1.2.3.4.zip");
        fs::write(&cache, b"previously downloaded").unwrap();

        let patcher = offline_patcher("1.2.3.4", cache.clone(), dir.path().join("out"));

        // The base URL is unreachable, so success proves no request was made.
        let archive = patcher.download_archive().await.unwrap();
        assert_eq!(archive, cache);
    }

    #[tokio::test]
    async fn missing_archive_surfaces_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("chromedriver_1.2.3.4.zip");

        let patcher = offline_patcher("1.2.3.4", cache, dir.path().join("out"));

        match patcher.download_archive().await {
            Err(Error::Download { version, .. }) => assert_eq!(version, "1.2.3.4"),
            other => panic!("expected download error, got {other:?}"),
        }
    }

    #[test]
    fn install_overwrites_previous_binary() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("undetected_chromedriver_1.2.3.4");
        fs::write(&target, b"stale").unwrap();

        let patcher = offline_patcher(
            "1.2.3.4",
            dir.path().join("chromedriver_1.2.3.4.zip"),
            target.clone(),
        );
        patcher.install(b"fresh driver bytes").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"fresh driver bytes");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&target).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111, "binary should be executable");
        }
    }

    #[tokio::test]
    #[ignore] // Requires network access to the release service
    async fn resolves_latest_release() {
        let client = Client::new();
        let version = fetch_release(&client, RELEASE_BASE_URL, 0, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(version.split('.').count() >= 3, "got '{version}'");
    }

    #[tokio::test]
    #[ignore] // Requires network access; downloads and installs a driver
    async fn patches_pinned_release_end_to_end() {
        let patcher = Patcher::new(105, None, Duration::from_secs(30)).await.unwrap();
        assert!(patcher.version().starts_with("105."));

        let path = patcher.patch().await.unwrap();
        let installed = fs::read(&path).unwrap();
        assert!(signature_positions(&installed).is_empty());
    }
}
