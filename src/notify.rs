use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::gateway::ChannelRef;
use crate::track::PlayableItem;

/// Something worth telling the channel that asked for playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NowPlaying {
        title: String,
        link: String,
        thumbnail: Option<String>,
        duration: String,
    },
    /// A queued track could not be resolved and was dropped
    TrackFailed { locator: String, reason: String },
    QueueEmpty,
    /// Too many unresolvable tracks in a row; playback halted
    GaveUp { failures: u32, remaining: usize },
    Queued {
        added: usize,
        skipped: usize,
        queue_len: usize,
    },
    Info(String),
    Error(String),
}

impl Notice {
    pub fn now_playing(item: &PlayableItem) -> Self {
        Notice::NowPlaying {
            title: item.title.clone(),
            link: item.display_link.clone(),
            thumbnail: item.thumbnail_url.clone(),
            duration: item.format_duration(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NowPlaying {
                title,
                link,
                thumbnail,
                duration,
            } => {
                write!(f, "Now playing: {} [{}] <{}>", title, duration, link)?;
                if let Some(thumb) = thumbnail {
                    write!(f, " (art: {})", thumb)?;
                }
                Ok(())
            }
            Notice::TrackFailed { locator, reason } => {
                write!(f, "Skipping {}: {}", locator, reason)
            }
            Notice::QueueEmpty => write!(f, "Queue is empty."),
            Notice::GaveUp {
                failures,
                remaining,
            } => write!(
                f,
                "Stopped after {} tracks in a row failed to load; {} left in the queue.",
                failures, remaining
            ),
            Notice::Queued {
                added,
                skipped,
                queue_len,
            } => {
                write!(f, "Queued {} track{}", added, if *added == 1 { "" } else { "s" })?;
                if *skipped > 0 {
                    write!(f, " ({} unavailable)", skipped)?;
                }
                write!(f, ", {} in queue.", queue_len)
            }
            Notice::Info(msg) => f.write_str(msg),
            Notice::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// The chat surface notices are posted to
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &ChannelRef, notice: &Notice) -> Result<()>;
}

/// Prints notices to stdout
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, channel: &ChannelRef, notice: &Notice) -> Result<()> {
        println!("[{}] {}", channel, notice);
        Ok(())
    }
}

/// Fire-and-forget front for a `Notifier`.
///
/// Notices are handed to a single dispatcher task, so callers never wait on
/// the chat surface and notices arrive in the order they were sent.
#[derive(Clone)]
pub struct NoticeSender {
    tx: mpsc::UnboundedSender<(ChannelRef, Notice)>,
}

impl NoticeSender {
    /// Spawn the dispatcher task. Must be called inside a Tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(ChannelRef, Notice)>();
        tokio::spawn(async move {
            while let Some((channel, notice)) = rx.recv().await {
                if let Err(e) = notifier.send(&channel, &notice).await {
                    warn!(%channel, error = %e, "failed to deliver notice");
                }
            }
        });
        Self { tx }
    }

    pub fn send(&self, channel: &ChannelRef, notice: Notice) {
        if self.tx.send((channel.clone(), notice)).is_err() {
            warn!(%channel, "notice dispatcher has shut down");
        }
    }

    /// Send to `channel` if one is tracked; otherwise drop the notice
    pub fn send_opt(&self, channel: Option<&ChannelRef>, notice: Notice) {
        match channel {
            Some(channel) => self.send(channel, notice),
            None => debug!(?notice, "no text channel tracked, dropping notice"),
        }
    }
}
