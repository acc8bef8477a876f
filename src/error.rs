//! Error types shared by the expander, resolver and playback sessions

use thiserror::Error;

/// Everything a play request or a playback session can fail with.
///
/// None of these are fatal to the process. The worst outcome of any of
/// them is an empty queue and an idle session.
#[derive(Debug, Error)]
pub enum Error {
    /// The link does not match any provider pattern we know about
    #[error("Unsupported link: {0}")]
    InvalidLocator(String),

    /// Catalog or playlist listing failed; aborts the current enqueue only
    #[error("Provider request failed: {0}")]
    Provider(String),

    /// A single track could not be turned into a stream
    #[error("Could not resolve track: {0}")]
    Resolution(String),

    /// The audio sink rejected or aborted a stream
    #[error("Playback failed: {0}")]
    Playback(String),

    /// No voice connection could be made or none exists
    #[error("Not connected to a voice channel: {0}")]
    NotConnected(String),

    /// The session task has shut down
    #[error("Playback session is closed")]
    SessionClosed,
}

impl Error {
    /// Whether the error should be shown to the person who issued the command
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::InvalidLocator(_) | Error::Provider(_) | Error::NotConnected(_)
        )
    }
}

/// Result type used at the library boundary
pub type Result<T> = std::result::Result<T, Error>;
