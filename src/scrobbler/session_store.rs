// Persistent storage for the Last.fm session

use super::traits::Session;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Storage namespace for persisted credentials
pub const SESSION_NAMESPACE: &str = "presence_scrobbler";

/// Where the signed-in session lives between runs
pub trait SessionStore: Send + Sync + 'static {
    /// Stored session, if any; unreadable entries count as absent
    fn get(&self) -> Option<Session>;

    fn set(&self, session: &Session) -> Result<()>;

    fn remove(&self) -> Result<()>;
}

/// Session stored as JSON in the user's config directory
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store under the default namespace in the config directory
    pub fn default_location() -> Result<Self> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(Self::new(
            config_dir.join(SESSION_NAMESPACE).join("lastfm_session.json"),
        ))
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Option<Session> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Last.fm session not found at {:?}", self.path);
                return None;
            }
            Err(e) => {
                log::error!("Error reading Last.fm session from {:?}: {}", self.path, e);
                return None;
            }
        };

        match serde_json::from_str::<Session>(&content) {
            Ok(session) => {
                log::debug!("Got Last.fm session for {} from {:?}", session.name, self.path);
                Some(session)
            }
            Err(e) => {
                log::error!("Error decoding Last.fm session from {:?}: {}", self.path, e);
                None
            }
        }
    }

    fn set(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create session directory")?;
        }

        let content = serde_json::to_string(session).context("Failed to serialize session")?;
        fs::write(&self.path, content).context("Failed to write session file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .context("Failed to restrict session file permissions")?;
        }

        log::info!("Stored Last.fm session to {:?}", self.path);
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}
