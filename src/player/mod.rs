// Player module
// The local media player as seen by the presence and scrobbling consumers

pub mod feed;
pub mod state;

use std::future::Future;
use tokio::sync::broadcast;

pub use feed::FeedPlayer;
pub use state::{Active, PlayerState, Track};

/// State at the moment of subscribing, followed by every later transition
pub struct Subscription {
    pub current: PlayerState,
    pub changes: broadcast::Receiver<PlayerState>,
}

/// A source of player state
///
/// Every state transition is published to subscribers. A fresh subscription
/// observes the current state immediately.
pub trait Player: Send + Sync + 'static {
    /// Subscribe to state transitions
    fn subscribe(&self) -> Subscription;

    /// The most recently published state
    fn current_state(&self) -> PlayerState {
        self.subscribe().current
    }

    /// Fetches a URL to the artwork of a track, if one can be found
    fn resolve_artwork(&self, track: &Track) -> impl Future<Output = Option<String>> + Send;
}
