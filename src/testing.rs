//! In-memory collaborators for unit tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::gateway::{AudioSink, ChannelRef, CompletionHandle, GuildId, VoiceGateway};
use crate::notify::{Notice, Notifier};
use crate::service::{CatalogEntry, CatalogPage, CatalogProvider, Extraction, MediaExtractor};
use crate::track::PlayableItem;

fn fake_item(title: &str, link: &str) -> PlayableItem {
    PlayableItem {
        stream_url: format!("https://stream/{}", link),
        title: title.to_string(),
        display_link: link.to_string(),
        thumbnail_url: None,
        duration_seconds: 180,
    }
}

/// Answers every lookup from memory; unknown links extract to themselves
#[derive(Default)]
pub struct FakeMedia {
    playlists: HashMap<String, Vec<String>>,
    collections: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl FakeMedia {
    pub fn with_playlist(mut self, url: &str, entries: &[&str]) -> Self {
        self.playlists
            .insert(url.to_string(), entries.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn with_collection(mut self, url: &str, titles: &[&str]) -> Self {
        self.collections
            .insert(url.to_string(), titles.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn failing(mut self, locator: &str) -> Self {
        self.failing.insert(locator.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MediaExtractor for FakeMedia {
    async fn extract(&self, locator: &str) -> Result<Extraction> {
        self.pause().await;
        if self.failing.contains(locator) {
            return Err(anyhow!("video unavailable"));
        }
        if let Some(titles) = self.collections.get(locator) {
            let items = titles.iter().map(|t| fake_item(t, locator)).collect();
            return Ok(Extraction::Many(items));
        }
        Ok(Extraction::Single(fake_item(locator, locator)))
    }

    async fn search(&self, query: &str) -> Result<Extraction> {
        self.pause().await;
        if self.failing.contains(query) {
            return Err(anyhow!("no match for {}", query));
        }
        let link = format!("https://search/{}", query.replace(' ', "+"));
        Ok(Extraction::Single(fake_item(query, &link)))
    }

    async fn list_entries(&self, playlist_url: &str) -> Result<Vec<String>> {
        self.playlists
            .get(playlist_url)
            .cloned()
            .ok_or_else(|| anyhow!("playlist not found: {}", playlist_url))
    }
}

/// Catalog backed by maps; records every page request
#[derive(Default)]
pub struct FakeCatalog {
    tracks: HashMap<String, CatalogEntry>,
    playlists: HashMap<String, Vec<CatalogEntry>>,
    requests: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl FakeCatalog {
    pub fn with_track(mut self, id: &str, entry: CatalogEntry) -> Self {
        self.tracks.insert(id.to_string(), entry);
        self
    }

    pub fn with_playlist(mut self, id: &str, entries: Vec<CatalogEntry>) -> Self {
        self.playlists.insert(id.to_string(), entries);
        self
    }

    pub fn page_requests(&self) -> Arc<Mutex<Vec<(usize, usize)>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl CatalogProvider for FakeCatalog {
    async fn get_track(&self, track_id: &str) -> Result<CatalogEntry> {
        self.tracks
            .get(track_id)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found: track {}", track_id))
    }

    async fn get_playlist_page(
        &self,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<CatalogPage> {
        self.requests.lock().unwrap().push((offset, limit));
        let entries = self
            .playlists
            .get(playlist_id)
            .ok_or_else(|| anyhow!("404 Not Found: playlist {}", playlist_id))?;

        let start = offset.min(entries.len());
        let end = (offset + limit).min(entries.len());
        Ok(CatalogPage {
            items: entries[start..end].to_vec(),
            has_next: end < entries.len(),
        })
    }
}

/// Forwards every notice to a channel the test reads from
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<(ChannelRef, Notice)>,
    fail_on: Option<String>,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(ChannelRef, Notice)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, fail_on: None }, rx)
    }

    /// Fail delivery of `Notice::Info(text)`
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel: &ChannelRef, notice: &Notice) -> Result<()> {
        if let (Some(fail_on), Notice::Info(text)) = (&self.fail_on, notice) {
            if fail_on == text {
                return Err(anyhow!("channel unavailable"));
            }
        }
        self.tx
            .send((channel.clone(), notice.clone()))
            .map_err(|_| anyhow!("test receiver dropped"))
    }
}

pub async fn next_notice(
    rx: &mut mpsc::UnboundedReceiver<(ChannelRef, Notice)>,
) -> (ChannelRef, Notice) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a notice")
        .expect("notice channel closed")
}

/// Assert nothing else arrives within a short grace period
pub async fn no_more_notices(rx: &mut mpsc::UnboundedReceiver<(ChannelRef, Notice)>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Ok(extra) = rx.try_recv() {
        panic!("unexpected notice {:?}", extra);
    }
}

#[derive(Default)]
struct GatewayState {
    auto_complete: bool,
    refuse: bool,
    rejected: HashSet<String>,
    plays: Vec<String>,
    connects: usize,
    disconnects: usize,
    current: Option<CompletionHandle>,
}

/// Voice gateway whose sinks record what they were asked to play.
///
/// In auto-complete mode every stream ends as soon as it starts; in manual
/// mode the test ends it with `finish_current`.
#[derive(Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl FakeGateway {
    pub fn auto_complete() -> Self {
        let gateway = Self::default();
        gateway.state.lock().unwrap().auto_complete = true;
        gateway
    }

    pub fn manual() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        let gateway = Self::default();
        gateway.state.lock().unwrap().refuse = true;
        gateway
    }

    /// Make `play` fail for this stream URL
    pub fn rejecting(self, stream_url: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert(stream_url.to_string());
        self
    }

    pub fn plays(&self) -> Vec<String> {
        self.state.lock().unwrap().plays.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    /// End the current stream as if it ran out
    pub fn finish_current(&self) {
        let handle = self.state.lock().unwrap().current.take();
        if let Some(handle) = handle {
            handle.complete(Ok(()));
        }
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(&self, _guild: &GuildId, channel: &ChannelRef) -> Result<Box<dyn AudioSink>> {
        let mut state = self.state.lock().unwrap();
        if state.refuse {
            return Err(anyhow!("cannot join {}", channel));
        }
        state.connects += 1;
        Ok(Box::new(FakeSink {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSink {
    state: Arc<Mutex<GatewayState>>,
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(&self, stream_url: &str, on_complete: CompletionHandle) -> Result<()> {
        let (previous, finish_now) = {
            let mut state = self.state.lock().unwrap();
            if state.rejected.contains(stream_url) {
                return Err(anyhow!("unsupported stream {}", stream_url));
            }
            state.plays.push(stream_url.to_string());
            if state.auto_complete {
                (state.current.take(), Some(on_complete))
            } else {
                (state.current.replace(on_complete), None)
            }
        };
        if let Some(previous) = previous {
            previous.complete(Ok(()));
        }
        if let Some(handle) = finish_now {
            handle.complete(Ok(()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let handle = self.state.lock().unwrap().current.take();
        if let Some(handle) = handle {
            handle.complete(Ok(()));
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.state.lock().unwrap().current.is_some()
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.current = None;
        Ok(())
    }
}
