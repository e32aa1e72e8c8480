// Common types for the scrobbling service

use crate::player::Active;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Payload of now playing and scrobble submissions
///
/// Two values are equal iff every field matches; this is what decides
/// whether a track has already been scrobbled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrobbleData {
    pub artist: String,
    pub track: String,
    pub album: Option<String>,
    pub duration: Option<i64>, // Duration in seconds
}

impl ScrobbleData {
    pub fn from_active(active: &Active) -> Self {
        let track = &active.track;
        let duration = track.rounded_duration();
        Self {
            artist: track
                .artist
                .clone()
                .unwrap_or_else(|| "Unknown Artist".to_string()),
            track: track.title.clone(),
            album: track.album.clone(),
            duration: (duration > 0).then_some(duration),
        }
    }
}

/// Signed-in Last.fm session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub key: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Failure of a tracking API call
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The session key (or token) is no longer valid
    #[error("Last.fm rejected the session as unauthorized")]
    Unauthorized,

    #[error("Last.fm error {code}: {message}")]
    Service { code: u32, message: String },

    #[error("Last.fm responded with HTTP status {0}")]
    Status(u16),

    #[error("Last.fm request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected Last.fm response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Remote listen-tracking API
pub trait TrackingApi: Send + Sync + 'static {
    /// Fetch a one-time request token (`auth.getToken`)
    fn get_token(&self) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Exchange an authorized request token for a session (`auth.getSession`)
    fn get_session(&self, token: &str) -> impl Future<Output = Result<Session, ApiError>> + Send;

    /// Update "now playing" status (`track.updateNowPlaying`)
    fn now_playing(
        &self,
        data: &ScrobbleData,
        session_key: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Submit a scrobble (`track.scrobble`); `timestamp` is when playback started
    fn scrobble(
        &self,
        data: &ScrobbleData,
        timestamp: i64,
        session_key: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Browser URL where the user authorizes a request token
    fn authorization_url(&self, token: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Track;

    fn active(artist: Option<&str>, album: Option<&str>, duration: f64) -> Active {
        Active::new(
            Track::new("Song", artist.map(str::to_string), album.map(str::to_string), duration),
            10.0,
        )
    }

    #[test]
    fn derives_payload_from_active_track() {
        let data = ScrobbleData::from_active(&active(Some("Band"), Some("LP"), 199.6));
        assert_eq!(
            data,
            ScrobbleData {
                artist: "Band".to_string(),
                track: "Song".to_string(),
                album: Some("LP".to_string()),
                duration: Some(200),
            }
        );
    }

    #[test]
    fn missing_artist_and_unknown_duration() {
        let data = ScrobbleData::from_active(&active(None, None, 0.0));
        assert_eq!(data.artist, "Unknown Artist");
        assert_eq!(data.album, None);
        assert_eq!(data.duration, None);
    }

    #[test]
    fn equality_covers_every_field() {
        let base = ScrobbleData::from_active(&active(Some("Band"), Some("LP"), 200.0));
        assert_eq!(base, ScrobbleData::from_active(&active(Some("Band"), Some("LP"), 200.0)));
        assert_ne!(base, ScrobbleData::from_active(&active(Some("Band"), Some("EP"), 200.0)));
        assert_ne!(base, ScrobbleData::from_active(&active(Some("Band"), Some("LP"), 201.0)));
    }

    #[test]
    fn session_debug_hides_key() {
        let session = Session {
            name: "listener".to_string(),
            key: "d580d57f32848f5dcf574d1ce18d78b2".to_string(),
        };
        let printed = format!("{:?}", session);
        assert!(printed.contains("listener"));
        assert!(!printed.contains("d580d57f"));
    }
}
