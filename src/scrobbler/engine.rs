// Scrobble engine
// Owns the Last.fm session lifecycle and turns player states into
// now playing updates and scrobbles

use super::lastfm_auth::{AuthToken, Browser, MAX_EXCHANGE_ATTEMPTS};
use super::session_store::SessionStore;
use super::traits::{ApiError, ScrobbleData, Session, TrackingApi};
use crate::player::{Active, PlayerState};
use crate::text_cleanup::TextCleaner;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SCROBBLE_TIME_THRESHOLD: f64 = 240.0; // 4 minutes in seconds

/// Check if a playing track has been listened to long enough to scrobble:
/// past the threshold percentage of the track OR past 4 minutes
pub fn is_scrobble_eligible(active: &Active, threshold_percent: u8) -> bool {
    let threshold = active.track.duration * f64::from(threshold_percent) / 100.0;
    active.position > threshold || active.position > SCROBBLE_TIME_THRESHOLD
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Scrobble after playing this percentage of the track
    pub scrobble_threshold: u8,
    /// How long to give the user to approve in the browser before exchanging
    pub auth_grace_period: Duration,
}

/// Where the engine is in the session lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    NoSession,
    AwaitingUserAuth { failed_attempts: u8 },
    SignedIn { name: String },
}

#[derive(Debug, Default)]
struct AuthState {
    session: Option<Session>,
    token: Option<AuthToken>,
    last_scrobbled: Option<ScrobbleData>,
}

/// Scrobbling consumer of player states
///
/// The only writer of the session, the request token and the session store.
/// Locks are never held across network calls, so event handlers may run
/// concurrently; the last write wins.
pub struct ScrobbleEngine<A, S, B> {
    api: A,
    store: Arc<S>,
    browser: B,
    cleaner: TextCleaner,
    settings: EngineSettings,
    enabled: AtomicBool,
    state: Mutex<AuthState>,
}

impl<A, S, B> ScrobbleEngine<A, S, B>
where
    A: TrackingApi,
    S: SessionStore,
    B: Browser,
{
    /// Create the engine, loading any stored session.
    ///
    /// Scrobbling starts enabled only if requested and a session was found.
    pub fn new(
        api: A,
        store: Arc<S>,
        browser: B,
        cleaner: TextCleaner,
        settings: EngineSettings,
        enabled: bool,
    ) -> Self {
        let session = store.get();
        match &session {
            Some(s) => log::info!("Got Last.fm session for {} from storage", s.name),
            None => log::info!("No stored Last.fm session, login required to scrobble"),
        }

        Self {
            api,
            store,
            browser,
            cleaner,
            settings,
            enabled: AtomicBool::new(enabled && session.is_some()),
            state: Mutex::new(AuthState {
                session,
                ..AuthState::default()
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub async fn status(&self) -> SessionStatus {
        let auth = self.state.lock().await;
        match (&auth.session, &auth.token) {
            (Some(session), _) => SessionStatus::SignedIn {
                name: session.name.clone(),
            },
            (None, Some(token)) => SessionStatus::AwaitingUserAuth {
                failed_attempts: token.failed_attempts(),
            },
            (None, None) => SessionStatus::NoSession,
        }
    }

    /// React to a player state transition
    pub async fn handle_state(&self, state: PlayerState) {
        let pending_exchange = {
            let auth = self.state.lock().await;
            auth.session.is_none() && auth.token.is_some()
        };

        if pending_exchange {
            log::debug!("Attempting to authorize Last.fm session");
            self.exchange_token().await;
            return;
        }

        if !self.is_enabled() {
            log::debug!("Scrobbler is disabled, skipping update");
            return;
        }

        match state {
            PlayerState::Playing(active) => self.on_playing(&active).await,
            PlayerState::Paused(_) | PlayerState::Stopped => {}
        }
    }

    async fn on_playing(&self, active: &Active) {
        let Some(session_key) = self.session_key().await else {
            log::debug!("No Last.fm session, not scrobbling");
            return;
        };

        // Dedup works on what the player reported; cleanup only shapes the request
        let reported = ScrobbleData::from_active(active);
        let data = self.cleaner.clean_scrobble(reported.clone());

        // Every playing event re-announces, duplicates included
        match self.api.now_playing(&data, &session_key).await {
            Ok(()) => log::debug!("Sent Last.fm Now Playing for {} - {}", data.artist, data.track),
            Err(ApiError::Unauthorized) => {
                self.invalidate_session(&session_key).await;
                return;
            }
            Err(e) => log::error!("Error updating Last.fm Now Playing: {}", e),
        }

        let already_scrobbled = self.state.lock().await.last_scrobbled.as_ref() == Some(&reported);
        if already_scrobbled {
            log::debug!(
                "Not scrobbling {} - {} as it was already scrobbled",
                data.artist,
                data.track
            );
            return;
        }

        if !is_scrobble_eligible(active, self.settings.scrobble_threshold) {
            return;
        }

        let started_at = Utc::now().timestamp_millis() as f64 / 1000.0 - active.position;
        let timestamp = started_at as i64;

        log::info!(
            "Scrobbling: {} - {} (played {:.0}s / {:.0}s)",
            data.artist,
            data.track,
            active.position,
            active.track.duration
        );

        match self.api.scrobble(&data, timestamp, &session_key).await {
            Ok(()) => {
                log::info!("Last.fm: Scrobbled {} - {}", data.artist, data.track);
                self.state.lock().await.last_scrobbled = Some(reported);
            }
            Err(ApiError::Unauthorized) => self.invalidate_session(&session_key).await,
            Err(e) => log::error!("Error sending Last.fm scrobble: {}", e),
        }
    }

    async fn session_key(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .session
            .as_ref()
            .map(|s| s.key.clone())
    }

    /// Start the browser authorization flow.
    ///
    /// Fetches a fresh request token (replacing any pending one), opens the
    /// authorization page, waits the grace period and tries one exchange.
    /// Returns whether a session is now available; failed exchanges are
    /// retried on later playback events.
    pub async fn login(&self) -> Result<bool> {
        if let SessionStatus::SignedIn { name } = self.status().await {
            log::info!("Already signed in to Last.fm as {}", name);
            return Ok(true);
        }

        if let Some(session) = self.load_stored_session().await {
            log::info!("Using stored Last.fm session for {}", session.name);
            let mut auth = self.state.lock().await;
            auth.session = Some(session);
            auth.token = None;
            drop(auth);
            self.set_enabled(true);
            return Ok(true);
        }

        // Always request user auth with a token of our own
        self.state.lock().await.token = None;
        let token = self
            .api
            .get_token()
            .await
            .context("Failed to fetch Last.fm request token")?;
        self.state.lock().await.token = Some(AuthToken::new(token.clone()));

        log::debug!("Reauthorizing Last.fm.");
        let url = self.api.authorization_url(&token);
        log::info!("Authorize Last.fm access in your browser: {}", url);
        if let Err(e) = self.browser.open(&url) {
            log::warn!("Could not open the browser ({:#}); open the URL above manually", e);
        }

        tokio::time::sleep(self.settings.auth_grace_period).await;

        Ok(self.exchange_token().await)
    }

    /// Try to exchange the pending request token for a session.
    ///
    /// Returns true if a session was obtained. Each failure counts against
    /// the token; once it is used up the token is dropped and a new login
    /// is needed.
    pub async fn exchange_token(&self) -> bool {
        let token = match &self.state.lock().await.token {
            Some(token) => token.value().to_string(),
            None => return false,
        };

        match self.api.get_session(&token).await {
            Ok(session) => {
                {
                    let mut auth = self.state.lock().await;
                    auth.session = Some(session.clone());
                    auth.token = None;
                }
                log::info!("Signed in to Last.fm as {}", session.name);
                self.set_enabled(true);
                self.persist_session(session).await;
                true
            }
            Err(ApiError::Unauthorized) => {
                log::warn!("Last.fm refused the request token, clearing session");
                self.clear_session().await;
                false
            }
            Err(e) => {
                let mut auth = self.state.lock().await;
                match auth.token.as_mut() {
                    Some(current) if current.value() == token => {
                        if current.record_failure() {
                            log::warn!(
                                "Failed to fetch Last.fm session {} times, discarding request token: {}",
                                MAX_EXCHANGE_ATTEMPTS,
                                e
                            );
                            auth.token = None;
                        } else {
                            log::warn!(
                                "Failed to fetch Last.fm session, retrying later ({}/{}): {}",
                                current.failed_attempts(),
                                MAX_EXCHANGE_ATTEMPTS,
                                e
                            );
                        }
                    }
                    _ => log::debug!("Request token was replaced during exchange: {}", e),
                }
                false
            }
        }
    }

    /// Sign out: forget session and token, then remove the stored copy
    pub async fn logout(&self) {
        log::debug!("Clearing session and removing Last.fm session from storage.");
        self.clear_session().await;
    }

    /// Forced logout after the service rejected `session_key`
    async fn invalidate_session(&self, session_key: &str) {
        let still_current = self
            .state
            .lock()
            .await
            .session
            .as_ref()
            .is_some_and(|s| s.key == session_key);

        if still_current {
            log::warn!("Last.fm session is no longer valid, signing out");
            self.clear_session().await;
        }
    }

    async fn clear_session(&self) {
        {
            let mut auth = self.state.lock().await;
            auth.session = None;
            auth.token = None;
        }

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.remove()).await {
            Ok(Ok(())) => log::debug!("Removed stored Last.fm session"),
            Ok(Err(e)) => log::error!("Error removing stored Last.fm session: {:#}", e),
            Err(e) => log::error!("Session removal task failed: {}", e),
        }
    }

    async fn persist_session(&self, session: Session) {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.set(&session)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Error storing Last.fm session: {:#}", e),
            Err(e) => log::error!("Session storage task failed: {}", e),
        }
    }

    async fn load_stored_session(&self) -> Option<Session> {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.get()).await {
            Ok(session) => session,
            Err(e) => {
                log::error!("Session loading task failed: {}", e);
                None
            }
        }
    }
}
