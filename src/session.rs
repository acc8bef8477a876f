//! Per-guild playback session and its advance loop.
//!
//! Each session is one Tokio task that owns the voice connection, the
//! explicit playback state and a generation counter. Everything that
//! changes that state arrives as a [`Command`] on the task's channel:
//! user requests, finished resolutions and sink completions alike. The
//! loop is the only writer, so there is no window between checking the
//! state and acting on it.
//!
//! ```text
//!   Idle --kick--> Advancing --resolved--> Playing --completion--> Advancing
//!    ^                 |  ^                                           |
//!    |                 |  '--resolution failed (skip and retry)--'    |
//!    '---queue empty---'                                              v
//! ```
//!
//! Resolutions and completions carry the generation they were started
//! under; anything from an older generation (after `stop`, or after the
//! loop has already moved on) is dropped on arrival.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::error::{Error, Result};
use crate::expander::Expansion;
use crate::gateway::{AudioSink, ChannelRef, CompletionHandle, GuildId, VoiceGateway};
use crate::notify::{Notice, NoticeSender};
use crate::queue::{PlaybackQueue, ShuffleOutcome};
use crate::resolver::TrackResolver;
use crate::track::{PlayableItem, TrackRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing playing, nothing in flight
    Idle,
    /// A pop + resolve cycle is in flight
    Advancing,
    /// The sink owns a stream
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped,
    NothingPlaying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { cleared: usize },
    NotConnected,
}

/// Point-in-time view of a session
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub now_playing: Option<PlayableItem>,
    pub voice_channel: Option<ChannelRef>,
}

/// Advance-loop tuning, taken from `[playback]`
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub stop_clears_queue: bool,
    pub max_consecutive_failures: Option<u32>,
    pub skip_backoff: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for SessionSettings {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            stop_clears_queue: config.stop_clears_queue,
            max_consecutive_failures: config.max_consecutive_failures.filter(|max| *max > 0),
            skip_backoff: Duration::from_millis(config.skip_backoff_ms),
        }
    }
}

/// Shared collaborators every session is built from
#[derive(Clone)]
pub struct SessionDeps {
    pub resolver: Arc<TrackResolver>,
    pub gateway: Arc<dyn VoiceGateway>,
    pub notices: NoticeSender,
    pub settings: SessionSettings,
}

enum Command {
    Connect {
        channel: ChannelRef,
        reply: oneshot::Sender<Result<bool>>,
    },
    Kick {
        text_channel: Option<ChannelRef>,
        announce: Option<Notice>,
    },
    Skip {
        reply: oneshot::Sender<SkipOutcome>,
    },
    Stop {
        reply: oneshot::Sender<StopOutcome>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Resolved {
        generation: u64,
        reference: TrackRef,
        result: Result<PlayableItem>,
    },
    TrackEnded {
        generation: u64,
        outcome: Result<()>,
    },
    Retry {
        generation: u64,
    },
}

/// Cloneable front for a running session.
///
/// Queue edits go straight to the session's queue under its guard; state
/// changes are requests to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    guild: GuildId,
    tx: mpsc::UnboundedSender<Command>,
    queue: Arc<PlaybackQueue>,
}

impl SessionHandle {
    pub fn guild(&self) -> &GuildId {
        &self.guild
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    fn post(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::SessionClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.post(build(reply))?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Join `channel`, or keep the existing connection.
    /// Returns `true` when an existing connection was reused.
    pub async fn connect(&self, channel: ChannelRef) -> Result<bool> {
        self.request(|reply| Command::Connect { channel, reply }).await?
    }

    /// Append an expansion and start playback if the session is idle.
    ///
    /// The "queued" notice goes out from the session task, ahead of any
    /// notice the kick produces. Returns the queue length after the append.
    pub fn enqueue(&self, expansion: Expansion, text_channel: ChannelRef) -> Result<usize> {
        let added = expansion.tracks.len();
        let queue_len = self.queue.enqueue(expansion.tracks);
        self.post(Command::Kick {
            text_channel: Some(text_channel),
            announce: Some(Notice::Queued {
                added,
                skipped: expansion.skipped,
                queue_len,
            }),
        })?;
        Ok(queue_len)
    }

    /// Start playing whatever is already queued
    pub fn resume(&self, text_channel: ChannelRef) -> Result<()> {
        self.post(Command::Kick {
            text_channel: Some(text_channel),
            announce: None,
        })
    }

    pub async fn skip(&self) -> Result<SkipOutcome> {
        self.request(|reply| Command::Skip { reply }).await
    }

    pub async fn stop(&self) -> Result<StopOutcome> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub fn shuffle(&self) -> ShuffleOutcome {
        self.queue.shuffle()
    }

    pub fn clear(&self) -> usize {
        self.queue.clear()
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn now_playing(&self) -> Result<Option<PlayableItem>> {
        Ok(self.status().await?.now_playing)
    }
}

pub struct PlaybackSession {
    guild: GuildId,
    queue: Arc<PlaybackQueue>,
    deps: SessionDeps,
    // Weak so the task ends once every handle and in-flight event is gone
    tx: mpsc::WeakUnboundedSender<Command>,
    state: SessionState,
    generation: u64,
    sink: Option<Box<dyn AudioSink>>,
    voice_channel: Option<ChannelRef>,
    text_channel: Option<ChannelRef>,
    now_playing: Option<PlayableItem>,
    consecutive_failures: u32,
}

impl PlaybackSession {
    /// Start the session task for `guild` and return its handle
    pub fn spawn(guild: GuildId, deps: SessionDeps) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(PlaybackQueue::new());

        let session = PlaybackSession {
            guild: guild.clone(),
            queue: Arc::clone(&queue),
            deps,
            tx: tx.downgrade(),
            state: SessionState::Idle,
            generation: 0,
            sink: None,
            voice_channel: None,
            text_channel: None,
            now_playing: None,
            consecutive_failures: 0,
        };
        tokio::spawn(session.run(rx));

        SessionHandle { guild, tx, queue }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(guild = %self.guild, "playback session started");
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!(guild = %self.guild, "playback session ended");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { channel, reply } => {
                let result = self.connect(channel).await;
                let _ = reply.send(result);
            }
            Command::Kick {
                text_channel,
                announce,
            } => {
                if let Some(notice) = announce {
                    self.deps.notices.send_opt(text_channel.as_ref(), notice);
                }
                self.kick(text_channel)
            }
            Command::Skip { reply } => {
                let outcome = self.skip().await;
                let _ = reply.send(outcome);
            }
            Command::Stop { reply } => {
                let outcome = self.stop().await;
                let _ = reply.send(outcome);
            }
            Command::Status { reply } => {
                let _ = reply.send(SessionStatus {
                    state: self.state,
                    now_playing: self.now_playing.clone(),
                    voice_channel: self.voice_channel.clone(),
                });
            }
            Command::Resolved {
                generation,
                reference,
                result,
            } => {
                if generation != self.generation || self.state != SessionState::Advancing {
                    debug!(%reference, "discarding stale resolution");
                    return;
                }
                match result {
                    Ok(item) => self.start(item).await,
                    Err(e) => self.resolution_failed(reference, e),
                }
            }
            Command::TrackEnded {
                generation,
                outcome,
            } => {
                if generation != self.generation || self.state != SessionState::Playing {
                    debug!(generation, "ignoring completion from an old track");
                    return;
                }
                if let Err(e) = outcome {
                    warn!(guild = %self.guild, error = %e, "playback ended with error");
                }
                self.advance();
            }
            Command::Retry { generation } => {
                if generation == self.generation && self.state == SessionState::Advancing {
                    self.advance();
                }
            }
        }
    }

    async fn connect(&mut self, channel: ChannelRef) -> Result<bool> {
        if self.sink.is_some() {
            return Ok(true);
        }

        let sink = self
            .deps
            .gateway
            .connect(&self.guild, &channel)
            .await
            .map_err(|e| Error::NotConnected(format!("{:#}", e)))?;
        info!(guild = %self.guild, %channel, "connected to voice");
        self.sink = Some(sink);
        self.voice_channel = Some(channel);
        Ok(false)
    }

    fn kick(&mut self, text_channel: Option<ChannelRef>) {
        if self.state != SessionState::Idle {
            if self.text_channel.is_none() {
                self.text_channel = text_channel;
            }
            return;
        }
        // A new chain announces to whoever started it
        if text_channel.is_some() {
            self.text_channel = text_channel;
        }
        if self.sink.is_none() {
            debug!(guild = %self.guild, "kick ignored, not connected");
            return;
        }
        self.advance();
    }

    /// A sender for follow-up events, or `None` once every handle is gone
    fn follow_up(&mut self) -> Option<mpsc::UnboundedSender<Command>> {
        let tx = self.tx.upgrade();
        if tx.is_none() {
            debug!(guild = %self.guild, "all handles dropped, going idle");
            self.state = SessionState::Idle;
        }
        tx
    }

    /// Pop the next reference and start resolving it off the loop
    fn advance(&mut self) {
        self.generation += 1;
        self.now_playing = None;
        let Some(tx) = self.follow_up() else {
            return;
        };

        let Some(reference) = self.queue.pop_front() else {
            debug!(guild = %self.guild, "queue drained");
            self.state = SessionState::Idle;
            self.consecutive_failures = 0;
            self.deps
                .notices
                .send_opt(self.text_channel.as_ref(), Notice::QueueEmpty);
            return;
        };

        self.state = SessionState::Advancing;
        let generation = self.generation;
        let resolver = Arc::clone(&self.deps.resolver);
        tokio::spawn(async move {
            let result = resolver.resolve(&reference).await;
            let _ = tx.send(Command::Resolved {
                generation,
                reference,
                result,
            });
        });
    }

    fn resolution_failed(&mut self, reference: TrackRef, error: Error) {
        warn!(guild = %self.guild, %reference, error = %error, "skipping unresolvable track");
        self.consecutive_failures += 1;
        self.deps.notices.send_opt(
            self.text_channel.as_ref(),
            Notice::TrackFailed {
                locator: reference.locator().to_string(),
                reason: error.to_string(),
            },
        );

        if let Some(max) = self.deps.settings.max_consecutive_failures {
            if self.consecutive_failures >= max {
                warn!(guild = %self.guild, failures = max, "giving up on the queue");
                self.deps.notices.send_opt(
                    self.text_channel.as_ref(),
                    Notice::GaveUp {
                        failures: self.consecutive_failures,
                        remaining: self.queue.len(),
                    },
                );
                self.consecutive_failures = 0;
                self.generation += 1;
                self.state = SessionState::Idle;
                return;
            }
        }

        let backoff = self.deps.settings.skip_backoff;
        if backoff.is_zero() {
            self.advance();
            return;
        }

        let generation = self.generation;
        let Some(tx) = self.follow_up() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = tx.send(Command::Retry { generation });
        });
    }

    async fn start(&mut self, item: PlayableItem) {
        let Some(tx) = self.follow_up() else {
            return;
        };
        let Some(sink) = self.sink.as_ref() else {
            debug!(title = %item.title, "resolved after disconnect, dropping");
            self.state = SessionState::Idle;
            return;
        };

        let generation = self.generation;
        let on_complete = CompletionHandle::new(move |outcome| {
            let _ = tx.send(Command::TrackEnded {
                generation,
                outcome,
            });
        });

        match sink.play(&item.stream_url, on_complete).await {
            Ok(()) => {
                info!(guild = %self.guild, title = %item.title, "now playing");
                self.state = SessionState::Playing;
                self.consecutive_failures = 0;
                self.deps
                    .notices
                    .send_opt(self.text_channel.as_ref(), Notice::now_playing(&item));
                self.now_playing = Some(item);
            }
            Err(e) => {
                // Same as a track that ended immediately
                warn!(guild = %self.guild, title = %item.title, error = %e, "sink rejected stream");
                self.advance();
            }
        }
    }

    async fn skip(&mut self) -> SkipOutcome {
        if self.state != SessionState::Playing {
            return SkipOutcome::NothingPlaying;
        }
        let Some(sink) = self.sink.as_ref() else {
            return SkipOutcome::NothingPlaying;
        };

        // The sink fires the track's completion, which drives the advance
        if let Err(e) = sink.stop().await {
            warn!(guild = %self.guild, error = %e, "sink stop failed, advancing directly");
            self.advance();
        }
        SkipOutcome::Skipped
    }

    async fn stop(&mut self) -> StopOutcome {
        let Some(sink) = self.sink.take() else {
            return StopOutcome::NotConnected;
        };

        // Anything still in flight belongs to the old generation
        self.generation += 1;
        self.state = SessionState::Idle;
        self.now_playing = None;
        self.consecutive_failures = 0;

        if sink.is_playing() {
            if let Err(e) = sink.stop().await {
                warn!(guild = %self.guild, error = %e, "failed to stop sink");
            }
        }
        if let Err(e) = sink.disconnect().await {
            warn!(guild = %self.guild, error = %e, "failed to disconnect");
        }
        info!(guild = %self.guild, "disconnected from voice");
        self.voice_channel = None;

        let cleared = if self.deps.settings.stop_clears_queue {
            self.queue.clear()
        } else {
            0
        };
        StopOutcome::Stopped { cleared }
    }
}
