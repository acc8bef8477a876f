//! Voice-side collaborators: connections and the audio sink they expose.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Identifies one guild (one voice connection, one playback session)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuildId(pub String);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GuildId {
    fn from(s: &str) -> Self {
        GuildId(s.to_string())
    }
}

/// A voice or text channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef(pub String);

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<&str> for ChannelRef {
    fn from(s: &str) -> Self {
        ChannelRef(s.to_string())
    }
}

type CompletionFn = Box<dyn FnOnce(crate::error::Result<()>) + Send>;

/// One-shot callback a sink fires when the stream it was given ends.
///
/// Natural end, `stop()` and playback errors all fire it exactly once.
/// Firing never runs session logic inline; it only posts a message.
pub struct CompletionHandle {
    callback: CompletionFn,
}

impl CompletionHandle {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(crate::error::Result<()>) + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    pub fn complete(self, outcome: crate::error::Result<()>) {
        (self.callback)(outcome)
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle").finish_non_exhaustive()
    }
}

/// Where resolved streams are played
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Start `stream_url`, replacing whatever was playing.
    ///
    /// On `Ok` the sink owns `on_complete` and must fire it once the stream
    /// ends. On `Err` the handle is dropped unfired.
    async fn play(&self, stream_url: &str, on_complete: CompletionHandle) -> Result<()>;

    /// Stop the current stream; its completion handle fires
    async fn stop(&self) -> Result<()>;

    fn is_playing(&self) -> bool;

    /// Tear the connection down. Pending completions may be dropped.
    async fn disconnect(&self) -> Result<()>;
}

/// Opens voice connections
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, guild: &GuildId, channel: &ChannelRef) -> Result<Box<dyn AudioSink>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_completion_handle_fires_once_with_outcome() {
        let (tx, rx) = mpsc::channel();
        let handle = CompletionHandle::new(move |outcome| {
            tx.send(outcome.is_ok()).unwrap();
        });
        handle.complete(Ok(()));
        assert!(rx.recv().unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ChannelRef::from("music").to_string(), "#music");
        assert_eq!(GuildId::from("42").to_string(), "42");
    }
}
