// Scrobbler module
// Last.fm client, its authentication lifecycle and the engine that decides
// what gets reported

pub mod engine;
pub mod lastfm;
pub mod lastfm_auth;
pub mod session_store;
pub mod traits;

pub use engine::{EngineSettings, ScrobbleEngine, SessionStatus};
pub use traits::{ScrobbleData, Session};
