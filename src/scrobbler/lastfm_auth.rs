// Last.fm authentication helpers
// Request token bookkeeping and the browser side of the authorization flow

use anyhow::{Context, Result};
use std::process::Command;

/// Failed session exchanges allowed against one request token
pub const MAX_EXCHANGE_ATTEMPTS: u8 = 5;

/// A request token waiting for the user to authorize it in the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
    failed_attempts: u8,
}

impl AuthToken {
    pub fn new(value: String) -> Self {
        Self {
            value,
            failed_attempts: 0,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn failed_attempts(&self) -> u8 {
        self.failed_attempts
    }

    /// Count a failed exchange; returns true when the token is used up
    pub fn record_failure(&mut self) -> bool {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.failed_attempts >= MAX_EXCHANGE_ATTEMPTS
    }
}

/// Something that can show a URL to the user
pub trait Browser: Send + Sync + 'static {
    fn open(&self, url: &str) -> Result<()>;
}

/// Opens URLs in the user's default browser
///
/// The launcher is started and left running; some launchers only exit once
/// the browser window closes.
pub struct SystemBrowser {
    program: String,
    args: Vec<String>,
}

impl SystemBrowser {
    /// Use a specific launcher; the URL is passed as its last argument
    pub fn with_launcher(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

impl Default for SystemBrowser {
    fn default() -> Self {
        #[cfg(target_os = "macos")]
        return Self::with_launcher("open", &[]);

        #[cfg(target_os = "windows")]
        return Self::with_launcher("cmd", &["/C", "start", ""]);

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        return Self::with_launcher("xdg-open", &[]);
    }
}

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .spawn()
            .with_context(|| format!("Failed to launch the browser with {}", self.program))?;

        log::debug!("Started browser launcher {} (pid {})", self.program, child.id());
        Ok(())
    }
}
