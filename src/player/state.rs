// Player state model
// Immutable snapshots of what the local media player is doing

/// A track as reported by the media player
#[derive(Debug, Clone)]
pub struct Track {
    /// The title of the track.
    pub title: String,

    /// The name of the album the track is contained within.
    pub album: Option<String>,

    /// The name of the artist of the track.
    pub artist: Option<String>,

    /// The duration of the track in seconds.
    pub duration: f64,

    /// Store reference of the track, only known from player notifications.
    pub remote_ref: Option<String>,
}

impl Track {
    pub fn new(title: impl Into<String>, artist: Option<String>, album: Option<String>, duration: f64) -> Self {
        Self {
            title: title.into(),
            album,
            artist,
            duration,
            remote_ref: None,
        }
    }

    /// Attach a remote catalog reference delivered out-of-band
    pub fn with_remote_ref(mut self, remote_ref: Option<String>) -> Self {
        self.remote_ref = remote_ref;
        self
    }

    /// Duration rounded to whole seconds
    pub fn rounded_duration(&self) -> i64 {
        self.duration.round() as i64
    }
}

// Tracks are the same track when artist, title, album and rounded duration match.
// The remote reference is not part of a track's identity.
impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.artist == other.artist
            && self.title == other.title
            && self.album == other.album
            && self.rounded_duration() == other.rounded_duration()
    }
}

/// A track together with the playback position, in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct Active {
    pub track: Track,
    pub position: f64,
}

impl Active {
    pub fn new(track: Track, position: f64) -> Self {
        Self { track, position }
    }

    /// Position clamped into `0..=duration`.
    ///
    /// Players may report a position slightly past the end of the track.
    pub fn clamped_position(&self) -> f64 {
        self.position.clamp(0.0, self.track.duration.max(0.0))
    }
}

/// What the player is currently doing
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlayerState {
    /// The player is not playing anything.
    #[default]
    Stopped,

    /// The player is actively playing a track.
    Playing(Active),

    /// The player was playing a track, but has been paused by the user.
    Paused(Active),
}

impl PlayerState {
    fn remote_ref(&self) -> Option<&str> {
        match self {
            Self::Stopped => None,
            Self::Playing(active) | Self::Paused(active) => active.track.remote_ref.as_deref(),
        }
    }

    /// Equal and carrying the same store reference, i.e. nothing new to report
    pub fn same_as(&self, other: &Self) -> bool {
        self == other && self.remote_ref() == other.remote_ref()
    }

    /// Same state with the remote reference of the active track replaced
    pub fn with_remote_ref(self, remote_ref: Option<String>) -> Self {
        match self {
            Self::Stopped => Self::Stopped,
            Self::Playing(active) => Self::Playing(Active {
                track: active.track.with_remote_ref(remote_ref),
                position: active.position,
            }),
            Self::Paused(active) => Self::Paused(Active {
                track: active.track.with_remote_ref(remote_ref),
                position: active.position,
            }),
        }
    }
}
