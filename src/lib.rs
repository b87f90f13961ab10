//! Undetected chromedriver: launch Chrome with a signature-patched driver.
//!
//! chromedriver embeds `cdc_`-prefixed symbols into the JavaScript it
//! injects, and remote sites match on them to flag automation. This crate
//! removes both the static and the runtime halves of that fingerprint:
//!
//! - downloads the chromedriver release matching the installed browser and
//!   rewrites every embedded signature with a randomized look-alike token
//! - starts browser and driver as cooperating subprocesses, wiring up the
//!   remote-debugging endpoint, profile directory and locale
//! - scrubs residual automation markers from the page context before every
//!   navigation
//!
//! ```no_run
//! use undetected_chromedriver::{Config, UndetectedChrome};
//!
//! # async fn run() -> undetected_chromedriver::Result<()> {
//! let chrome = UndetectedChrome::launch(Config::default()).await?;
//! chrome.get("https://example.com").await?;
//! let title = chrome.session().title().await?;
//! chrome.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod browser;
mod config;
mod error;
pub mod patcher;
mod session;
mod stealth;

pub use config::Config;
pub use error::{Error, Result};
pub use patcher::{Patcher, Platform};
pub use session::UndetectedChrome;
