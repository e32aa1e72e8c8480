// Notification-fed player
// Turns JSON-lines player notifications into published PlayerState values

use super::state::{Active, PlayerState, Track};
use super::{Player, Subscription};
use crate::artwork::{ArtworkResolver, Catalog};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, watch};

/// Transitions a slow subscriber may fall behind by before it misses some
const CHANGE_BUFFER: usize = 64;

/// Player state reported by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifiedState {
    Stopped,
    Playing,
    Paused,
}

/// One player notification, as read from the feed
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub state: NotifiedState,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub position: Option<f64>,
    /// Store URL of the current track; only notifications carry it
    #[serde(default)]
    pub store_url: Option<String>,
    /// Wait this long before applying the notification
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl Notification {
    /// Build the player state this notification describes
    pub fn into_state(self) -> Result<PlayerState> {
        // A stopped notification is trusted as-is, no track details needed
        if self.state == NotifiedState::Stopped {
            return Ok(PlayerState::Stopped);
        }

        let title = self.title.context("notification is missing the track title")?;
        let duration = self
            .duration
            .context("notification is missing the track duration")?;

        let track = Track::new(title, self.artist, self.album, duration);
        let active = Active::new(track, self.position.unwrap_or(0.0));

        let state = match self.state {
            NotifiedState::Playing => PlayerState::Playing(active),
            NotifiedState::Paused => PlayerState::Paused(active),
            NotifiedState::Stopped => PlayerState::Stopped,
        };

        // The store URL only arrives with notifications
        Ok(state.with_remote_ref(self.store_url))
    }
}

/// Player driven by external notifications
///
/// Owns the single writer of the state channels. Identical consecutive states
/// are collapsed so subscribers only see real transitions; every other
/// transition reaches every subscriber.
pub struct FeedPlayer<C> {
    state: watch::Sender<PlayerState>,
    changes: broadcast::Sender<PlayerState>,
    artwork: ArtworkResolver<C>,
}

impl<C: Catalog> FeedPlayer<C> {
    pub fn new(artwork: ArtworkResolver<C>) -> Self {
        let (state, _) = watch::channel(PlayerState::Stopped);
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            state,
            changes,
            artwork,
        }
    }

    /// Publish a new state; returns false if it equals the current one
    pub fn publish(&self, next: PlayerState) -> bool {
        // Broadcast under the state lock so subscribe() sees a consistent pair
        self.state.send_if_modified(|current| {
            if current.same_as(&next) {
                return false;
            }
            *current = next.clone();
            // No subscribers is fine
            let _ = self.changes.send(next.clone());
            true
        })
    }

    /// Apply a notification, degrading to stopped if it cannot be understood
    pub fn apply(&self, notification: Notification) {
        match notification.into_state() {
            Ok(state) => {
                log::info!("Sending a new player state: {:?}", state);
                if !self.publish(state) {
                    log::debug!("Player state unchanged, not republishing");
                }
            }
            Err(e) => {
                log::error!("Failed to read player state from notification: {:#}", e);
                self.publish(PlayerState::Stopped);
            }
        }
    }

    /// Read notifications line by line until the feed ends
    ///
    /// Returns the number of notification lines processed.
    pub async fn run_feed<R>(&self, reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut applied = 0;

        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read player notification")?
        {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match serde_json::from_str::<Notification>(line) {
                Ok(notification) => {
                    if let Some(delay) = notification.delay_ms {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    self.apply(notification);
                }
                Err(e) => {
                    log::error!("Malformed player notification {:?}: {}", line, e);
                    self.publish(PlayerState::Stopped);
                }
            }
            applied += 1;
        }

        log::info!("Player feed ended after {} notifications", applied);
        Ok(applied)
    }
}

impl<C: Catalog> Player for FeedPlayer<C> {
    fn subscribe(&self) -> Subscription {
        let current = self.state.borrow();
        Subscription {
            current: current.clone(),
            changes: self.changes.subscribe(),
        }
    }

    fn current_state(&self) -> PlayerState {
        self.state.borrow().clone()
    }

    async fn resolve_artwork(&self, track: &Track) -> Option<String> {
        log::info!("Requested to fetch artwork for track: {:?}", track);
        self.artwork.resolve(track).await
    }
}
