//! User-facing playback commands, routed to one session per guild.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::expander::CatalogExpander;
use crate::gateway::{ChannelRef, GuildId};
use crate::notify::Notice;
use crate::queue::ShuffleOutcome;
use crate::session::{PlaybackSession, SessionDeps, SessionHandle, SkipOutcome, StopOutcome};

/// Who issued a command and where
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub guild: GuildId,
    /// The requester's current voice channel, if any
    pub voice_channel: Option<ChannelRef>,
    /// Where replies and playback notices go
    pub text_channel: ChannelRef,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<GuildId, SessionHandle>>,
    deps: SessionDeps,
    expander: CatalogExpander,
    queue_preview: usize,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, expander: CatalogExpander, queue_preview: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            deps,
            expander,
            queue_preview,
        }
    }

    /// The guild's session, started on first use
    pub fn session(&self, guild: &GuildId) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(guild.clone())
            .or_insert_with(|| PlaybackSession::spawn(guild.clone(), self.deps.clone()))
            .clone()
    }

    /// Forget a guild's session; its task ends once the last handle drops
    fn evict(&self, guild: &GuildId) {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(guild);
        if removed.is_some() {
            debug!(%guild, "evicted idle session");
        }
    }

    fn reply(&self, ctx: &RequestContext, notice: Notice) {
        self.deps.notices.send(&ctx.text_channel, notice);
    }

    /// Tell the requester what went wrong, then hand the error back
    fn report(&self, ctx: &RequestContext, error: Error) -> Error {
        if error.is_user_facing() {
            self.reply(ctx, Notice::Error(error.to_string()));
        } else {
            warn!(guild = %ctx.guild, error = %error, "command failed");
            self.reply(ctx, Notice::Error("Something went wrong, try again.".to_string()));
        }
        error
    }

    async fn join(&self, ctx: &RequestContext, session: &SessionHandle) -> Result<()> {
        let channel = ctx.voice_channel.clone().ok_or_else(|| {
            Error::NotConnected("join a voice channel first".to_string())
        })?;
        session.connect(channel).await?;
        Ok(())
    }

    /// `play <link>` queues the link; a bare `play` resumes the queue
    pub async fn play(&self, ctx: &RequestContext, link: Option<&str>) -> Result<()> {
        match link.map(str::trim).filter(|l| !l.is_empty()) {
            Some(link) => self.play_link(ctx, link).await,
            None => self.resume(ctx).await,
        }
    }

    async fn play_link(&self, ctx: &RequestContext, link: &str) -> Result<()> {
        if ctx.voice_channel.is_none() {
            return Err(self.report(
                ctx,
                Error::NotConnected("join a voice channel first".to_string()),
            ));
        }

        let expansion = self
            .expander
            .expand(link)
            .await
            .map_err(|e| self.report(ctx, e))?;
        if expansion.tracks.is_empty() {
            self.reply(ctx, Notice::Info("Nothing playable found at that link.".to_string()));
            return Ok(());
        }

        let session = self.session(&ctx.guild);
        self.join(ctx, &session).await.map_err(|e| self.report(ctx, e))?;

        let (added, skipped) = (expansion.tracks.len(), expansion.skipped);
        let queue_len = session
            .enqueue(expansion, ctx.text_channel.clone())
            .map_err(|e| self.report(ctx, e))?;
        info!(guild = %ctx.guild, added, skipped, queue_len, "queued");
        Ok(())
    }

    async fn resume(&self, ctx: &RequestContext) -> Result<()> {
        let session = self.session(&ctx.guild);
        if session.queue().is_empty() {
            self.reply(ctx, Notice::QueueEmpty);
            return Ok(());
        }
        self.join(ctx, &session).await.map_err(|e| self.report(ctx, e))?;
        session.resume(ctx.text_channel.clone()).map_err(|e| self.report(ctx, e))
    }

    pub async fn skip(&self, ctx: &RequestContext) -> Result<()> {
        let outcome = self
            .session(&ctx.guild)
            .skip()
            .await
            .map_err(|e| self.report(ctx, e))?;
        let text = match outcome {
            SkipOutcome::Skipped => "Skipped.",
            SkipOutcome::NothingPlaying => "Nothing is playing.",
        };
        self.reply(ctx, Notice::Info(text.to_string()));
        Ok(())
    }

    pub async fn stop(&self, ctx: &RequestContext) -> Result<()> {
        let session = self.session(&ctx.guild);
        let outcome = session.stop().await.map_err(|e| self.report(ctx, e))?;
        // Nothing left to resume, let the session task end
        if session.queue().is_empty() {
            self.evict(&ctx.guild);
        }
        let text = match outcome {
            StopOutcome::Stopped { cleared: 0 } => "Stopped.".to_string(),
            StopOutcome::Stopped { cleared } => {
                format!("Stopped and cleared {} queued track(s).", cleared)
            }
            StopOutcome::NotConnected => "Not connected.".to_string(),
        };
        self.reply(ctx, Notice::Info(text));
        Ok(())
    }

    pub fn shuffle(&self, ctx: &RequestContext) {
        let text = match self.session(&ctx.guild).shuffle() {
            ShuffleOutcome::Shuffled(n) => format!("Shuffled {} tracks.", n),
            ShuffleOutcome::NothingToShuffle => "Nothing to shuffle.".to_string(),
        };
        self.reply(ctx, Notice::Info(text));
    }

    pub fn clear(&self, ctx: &RequestContext) {
        let removed = self.session(&ctx.guild).clear();
        self.reply(ctx, Notice::Info(format!("Cleared {} track(s).", removed)));
    }

    /// Now playing plus the next few queued references
    pub async fn queue(&self, ctx: &RequestContext) -> Result<()> {
        let session = self.session(&ctx.guild);
        let now_playing = session
            .now_playing()
            .await
            .map_err(|e| self.report(ctx, e))?;
        let upcoming = session.queue().snapshot(self.queue_preview);
        let total = session.queue().len();

        if now_playing.is_none() && upcoming.is_empty() {
            self.reply(ctx, Notice::QueueEmpty);
            return Ok(());
        }

        let mut text = String::new();
        if let Some(item) = now_playing {
            let _ = writeln!(text, "Now: {} [{}]", item.title, item.format_duration());
        }
        for (i, track) in upcoming.iter().enumerate() {
            let _ = writeln!(text, "{}. {}", i + 1, track);
        }
        if total > upcoming.len() {
            let _ = writeln!(text, "...and {} more", total - upcoming.len());
        }
        self.reply(ctx, Notice::Info(text.trim_end().to_string()));
        Ok(())
    }
}
