use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MpdConfig;
use crate::error::Error;
use crate::gateway::{AudioSink, ChannelRef, CompletionHandle, GuildId, VoiceGateway};

/// Consecutive failed status polls before a stream is declared dead
const MAX_STATUS_ERRORS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
}

/// Read the player state out of `mpc status` output.
///
/// Format while a song is loaded:
/// ```text
/// Artist - Title
/// [playing] #1/1   0:45/3:20 (22%)
/// volume: 80%   repeat: off   random: off   single: off   consume: off
/// ```
/// When stopped only the `volume:` line is printed.
pub fn parse_status(output: &str) -> PlayerState {
    for line in output.lines() {
        let line = line.trim_start();
        if line.starts_with("[playing]") {
            return PlayerState::Playing;
        }
        if line.starts_with("[paused]") {
            return PlayerState::Paused;
        }
    }
    PlayerState::Stopped
}

/// Runs `mpc` against one server
#[derive(Debug, Clone)]
struct Mpc {
    host: String,
    port: u16,
}

impl Mpc {
    /// Build mpc command with host/port args
    fn cmd(&self) -> Command {
        let mut cmd = Command::new("mpc");
        cmd.arg("-h").arg(&self.host);
        cmd.arg("-p").arg(self.port.to_string());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.cmd().args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("mpc {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Plays streams through a single MPD server.
///
/// MPD has one playlist and one output, so only one guild can hold it at a
/// time; a second guild is refused until the first sink is dropped. The
/// voice channel is only logged.
pub struct MpdGateway {
    mpc: Mpc,
    poll_interval: Duration,
    owner: Arc<Mutex<Option<GuildId>>>,
}

/// Marks MPD as taken by one guild until dropped
struct GuildLease {
    owner: Arc<Mutex<Option<GuildId>>>,
}

impl Drop for GuildLease {
    fn drop(&mut self) {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl MpdGateway {
    pub fn new(config: &MpdConfig) -> Self {
        Self {
            mpc: Mpc {
                host: config.host.clone(),
                port: config.port,
            },
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(50)),
            owner: Arc::new(Mutex::new(None)),
        }
    }

    fn claim(&self, guild: &GuildId) -> Result<GuildLease> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = owner.as_ref() {
            return Err(anyhow!("MPD is already in use by guild {}", current));
        }
        *owner = Some(guild.clone());
        Ok(GuildLease {
            owner: Arc::clone(&self.owner),
        })
    }
}

#[async_trait]
impl VoiceGateway for MpdGateway {
    async fn connect(&self, guild: &GuildId, channel: &ChannelRef) -> Result<Box<dyn AudioSink>> {
        let lease = self.claim(guild)?;
        let status = self.mpc.run(&["status"]).await.map_err(|e| {
            anyhow!(
                "could not connect to MPD at {}:{}: {}",
                self.mpc.host,
                self.mpc.port,
                e
            )
        })?;
        info!(%guild, %channel, host = %self.mpc.host, port = self.mpc.port, "connected to MPD");
        if let Some(first) = status.lines().next() {
            debug!("  {}", first);
        }

        Ok(Box::new(MpdSink {
            mpc: self.mpc.clone(),
            poll_interval: self.poll_interval,
            track: Arc::new(TrackSlot::default()),
            watcher: Mutex::new(None),
            _lease: lease,
        }))
    }
}

/// The completion handle of the stream MPD is playing
#[derive(Default)]
struct TrackSlot {
    handle: Mutex<Option<CompletionHandle>>,
    playing: AtomicBool,
}

impl TrackSlot {
    fn install(&self, handle: CompletionHandle) -> Option<CompletionHandle> {
        self.playing.store(true, Ordering::SeqCst);
        self.lock().replace(handle)
    }

    /// Fire the handle if nobody has yet
    fn finish(&self, outcome: crate::error::Result<()>) {
        self.playing.store(false, Ordering::SeqCst);
        let handle = self.lock().take();
        if let Some(handle) = handle {
            handle.complete(outcome);
        }
    }

    fn discard(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CompletionHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MpdSink {
    mpc: Mpc,
    poll_interval: Duration,
    track: Arc<TrackSlot>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    _lease: GuildLease,
}

impl MpdSink {
    fn abort_watcher(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
    }

    /// Poll status until MPD leaves the song, then fire the completion
    fn spawn_watcher(&self) {
        let mpc = self.mpc.clone();
        let track = Arc::clone(&self.track);
        let interval = self.poll_interval;

        let watcher = tokio::spawn(async move {
            let mut errors = 0;
            loop {
                tokio::time::sleep(interval).await;
                match mpc.run(&["status"]).await {
                    Ok(status) => {
                        errors = 0;
                        if parse_status(&status) == PlayerState::Stopped {
                            debug!("MPD finished the stream");
                            track.finish(Ok(()));
                            return;
                        }
                    }
                    Err(e) => {
                        errors += 1;
                        warn!(error = %e, attempt = errors, "MPD status poll failed");
                        if errors >= MAX_STATUS_ERRORS {
                            track.finish(Err(Error::Playback(format!("lost MPD: {:#}", e))));
                            return;
                        }
                    }
                }
            }
        });

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(watcher);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

#[async_trait]
impl AudioSink for MpdSink {
    async fn play(&self, stream_url: &str, on_complete: CompletionHandle) -> Result<()> {
        // Whatever was playing is being replaced
        self.abort_watcher();
        self.track.finish(Ok(()));

        let shown: String = stream_url.chars().take(100).collect();
        debug!("Executing: mpc add \"{}\"", shown);
        self.mpc.run(&["clear"]).await?;
        self.mpc.run(&["add", stream_url]).await?;
        let output = self.mpc.run(&["play"]).await?;
        if !output.contains("[playing]") {
            debug!("play command sent but status unclear");
        }

        if let Some(stale) = self.track.install(on_complete) {
            stale.complete(Ok(()));
        }
        self.spawn_watcher();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.mpc.run(&["stop"]).await?;
        self.abort_watcher();
        self.track.finish(Ok(()));
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.track.playing.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.abort_watcher();
        self.track.discard();
        self.mpc.run(&["stop"]).await?;
        self.mpc.run(&["clear"]).await?;
        Ok(())
    }
}

impl Drop for MpdSink {
    fn drop(&mut self) {
        self.abort_watcher();
    }
}
