// Rich presence module
// Builds presence payloads from player state and pushes them over a
// persistent connection to the presence service

pub mod discord;

use crate::player::{Active, Player, PlayerState};
use anyhow::Result;
use backoff::ExponentialBackoff;
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Presence payload shown by the display service
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub details: String,
    pub state: String,
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
    pub small_text: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Presence {
    /// Fixed payload for when nothing is playing
    pub fn stopped(asset_name: &str) -> Self {
        Self {
            details: "Stopped".to_string(),
            state: "Nothing is currently playing".to_string(),
            large_image: asset_name.to_string(),
            large_text: "There's nothing here!".to_string(),
            small_image: "stop".to_string(),
            small_text: "Currently stopped".to_string(),
            start: None,
            end: None,
        }
    }

    /// Payload for a playing or paused track.
    ///
    /// Only a playing track carries timestamps, so the service can render
    /// a live countdown.
    pub fn active(active: &Active, paused: bool, large_image: String, now: DateTime<Utc>) -> Self {
        let track = &active.track;
        let (start, end) = match playback_window(active, now) {
            Some((start, end)) if !paused => (Some(start), Some(end)),
            _ => (None, None),
        };

        Self {
            details: track.title.clone(),
            state: format!(
                "{} \u{2014} {}",
                track.artist.as_deref().unwrap_or("Unknown"),
                track.album.as_deref().unwrap_or("Unknown")
            ),
            large_image,
            large_text: track.title.clone(),
            small_image: if paused { "pause" } else { "play" }.to_string(),
            small_text: if paused { "Paused" } else { "Playing" }.to_string(),
            start,
            end,
        }
    }
}

fn seconds(value: f64) -> Option<TimeDelta> {
    TimeDelta::try_milliseconds((value * 1000.0).round() as i64)
}

/// When the current track started and when it will end, as seen from `now`.
///
/// None if the track is too long to place on the calendar.
pub fn playback_window(active: &Active, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let duration = active.track.duration.max(0.0);
    let position = active.clamped_position();

    log::debug!(
        "Claimed track duration: {}, claimed active position: {}",
        active.track.duration,
        active.position
    );

    let start = now.checked_sub_signed(seconds(position)?)?;
    let end = now.checked_add_signed(seconds(duration - position)?)?;
    Some((start, end))
}

/// Persistent connection to the presence display service
pub trait PresenceConnection: Send + Sync + 'static {
    /// Establish the connection; succeeds immediately if already connected
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    fn set_presence(&self, presence: &Presence) -> impl Future<Output = Result<()>> + Send;

    fn clear_presence(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Mirrors player state to the presence service
pub struct PresencePublisher<P, C> {
    player: Arc<P>,
    connection: C,
    asset_name: String,
    enabled: AtomicBool,
}

impl<P, C> PresencePublisher<P, C>
where
    P: Player,
    C: PresenceConnection,
{
    pub fn new(player: Arc<P>, connection: C, asset_name: String, enabled: bool) -> Self {
        Self {
            player,
            connection,
            asset_name,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Connect to the presence service, retrying with backoff until it is
    /// reachable, then publish the current state
    pub async fn connect(&self) {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let result = backoff::future::retry(policy, || async move {
            self.connection.connect().await.map_err(|e| {
                log::debug!("Presence service not reachable yet: {:#}", e);
                backoff::Error::transient(e)
            })
        })
        .await;

        match result {
            Ok(()) => self.on_connect().await,
            Err(e) => log::error!("Giving up connecting to the presence service: {:#}", e),
        }
    }

    /// The connection became ready; state changes may have been missed
    /// before this, so push the current state again
    pub async fn on_connect(&self) {
        log::info!("Connected to the presence service.");
        self.on_state_change(self.player.current_state()).await;
    }

    pub async fn on_state_change(&self, state: PlayerState) {
        if !self.is_enabled() {
            return;
        }

        let presence = self.build_presence(&state).await;
        log::info!("Sending presence: {:?}", presence);

        if let Err(e) = self.connection.set_presence(&presence).await {
            log::warn!("Failed to send presence: {:#}", e);
        }
    }

    /// Turn publishing on or off; takes effect on the remote side at once
    pub async fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);

        if enabled {
            self.on_state_change(self.player.current_state()).await;
        } else if let Err(e) = self.connection.clear_presence().await {
            log::warn!("Failed to clear presence: {:#}", e);
        }
    }

    pub async fn build_presence(&self, state: &PlayerState) -> Presence {
        let (active, paused) = match state {
            PlayerState::Stopped => return Presence::stopped(&self.asset_name),
            PlayerState::Playing(active) => (active, false),
            PlayerState::Paused(active) => (active, true),
        };

        log::info!("Player is active, populating rich presence state accordingly");

        // Artwork is awaited before sending; the resolver never errors
        let large_image = self
            .player
            .resolve_artwork(&active.track)
            .await
            .unwrap_or_else(|| self.asset_name.clone());

        Presence::active(active, paused, large_image, Utc::now())
    }
}
