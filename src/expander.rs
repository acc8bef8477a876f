//! Turns a user-supplied link into queueable track references.
//!
//! Expansion happens once, at enqueue time. Catalog (Spotify) links become
//! `CatalogSearch` references that are searched on the media provider when
//! they reach the head of the queue; media (YouTube) links become
//! `DirectMedia` references. Nothing is resolved here.

use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::service::{CatalogProvider, MediaExtractor};
use crate::track::TrackRef;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A classified link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    CatalogPlaylist(String),
    CatalogTrack(String),
    MediaPlaylist(String),
    MediaItem(String),
}

impl Locator {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || Error::InvalidLocator(input.to_string());

        if let Some(rest) = input.strip_prefix("spotify:") {
            return match rest.split_once(':') {
                Some(("track", id)) if is_catalog_id(id) => Ok(Locator::CatalogTrack(id.to_string())),
                Some(("playlist", id)) if is_catalog_id(id) => {
                    Ok(Locator::CatalogPlaylist(id.to_string()))
                }
                _ => Err(invalid()),
            };
        }

        let url = Url::parse(input).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }
        let host = url.host_str().ok_or_else(invalid)?.to_ascii_lowercase();
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        match host.as_str() {
            "open.spotify.com" | "play.spotify.com" => {
                // Localised links look like /intl-de/track/<id>
                let segments: &[&str] = match segments.first() {
                    Some(first) if first.starts_with("intl-") => &segments[1..],
                    _ => &segments[..],
                };
                match segments {
                    ["track", id, ..] if is_catalog_id(id) => Ok(Locator::CatalogTrack(id.to_string())),
                    ["playlist", id, ..] if is_catalog_id(id) => {
                        Ok(Locator::CatalogPlaylist(id.to_string()))
                    }
                    _ => Err(invalid()),
                }
            }
            "youtube.com" | "www.youtube.com" | "m.youtube.com" | "music.youtube.com" => {
                let query = |key: &str| {
                    url.query_pairs()
                        .find(|(k, v)| &**k == key && !v.is_empty())
                        .map(|(_, v)| v.into_owned())
                };
                match segments.as_slice() {
                    ["playlist"] if query("list").is_some() => {
                        Ok(Locator::MediaPlaylist(input.to_string()))
                    }
                    ["watch"] if query("v").is_some() => Ok(Locator::MediaItem(input.to_string())),
                    ["shorts", _] | ["live", _] => Ok(Locator::MediaItem(input.to_string())),
                    _ => Err(invalid()),
                }
            }
            "youtu.be" => match segments.as_slice() {
                [_id] => Ok(Locator::MediaItem(input.to_string())),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

fn is_catalog_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Result of expanding one link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub tracks: Vec<TrackRef>,
    /// Catalog rows dropped for missing title or artist
    pub skipped: usize,
}

pub struct CatalogExpander {
    catalog: Option<Arc<dyn CatalogProvider>>,
    media: Arc<dyn MediaExtractor>,
    page_size: usize,
}

impl CatalogExpander {
    /// `catalog` may be absent when no catalog credentials are configured;
    /// catalog links then fail with a provider error.
    pub fn new(
        catalog: Option<Arc<dyn CatalogProvider>>,
        media: Arc<dyn MediaExtractor>,
        page_size: usize,
    ) -> Self {
        Self {
            catalog,
            media,
            page_size: page_size.clamp(1, DEFAULT_PAGE_SIZE),
        }
    }

    pub async fn expand(&self, input: &str) -> Result<Expansion> {
        let locator = Locator::parse(input)?;
        debug!(?locator, "expanding link");

        match locator {
            Locator::CatalogTrack(id) => {
                let entry = self
                    .catalog()?
                    .get_track(&id)
                    .await
                    .map_err(|e| Error::Provider(format!("{:#}", e)))?;
                let query = entry
                    .search_query()
                    .ok_or_else(|| Error::Provider(format!("track {} has no title or artist", id)))?;
                Ok(Expansion {
                    tracks: vec![TrackRef::search(query)],
                    skipped: 0,
                })
            }
            Locator::CatalogPlaylist(id) => self.expand_catalog_playlist(&id).await,
            Locator::MediaPlaylist(url) => {
                let entries = self
                    .media
                    .list_entries(&url)
                    .await
                    .map_err(|e| Error::Provider(format!("{:#}", e)))?;
                info!(count = entries.len(), "expanded media playlist");
                Ok(Expansion {
                    tracks: entries.into_iter().map(TrackRef::direct).collect(),
                    skipped: 0,
                })
            }
            Locator::MediaItem(url) => Ok(Expansion {
                tracks: vec![TrackRef::direct(url)],
                skipped: 0,
            }),
        }
    }

    fn catalog(&self) -> Result<&Arc<dyn CatalogProvider>> {
        self.catalog
            .as_ref()
            .ok_or_else(|| Error::Provider("Spotify links need catalog credentials".to_string()))
    }

    async fn expand_catalog_playlist(&self, playlist_id: &str) -> Result<Expansion> {
        let catalog = self.catalog()?;
        let mut expansion = Expansion::default();
        let mut offset = 0;

        loop {
            let page = catalog
                .get_playlist_page(playlist_id, offset, self.page_size)
                .await
                .map_err(|e| Error::Provider(format!("{:#}", e)))?;

            let fetched = page.items.len();
            for entry in page.items {
                match entry.search_query() {
                    Some(query) => expansion.tracks.push(TrackRef::search(query)),
                    None => expansion.skipped += 1,
                }
            }

            // An empty page that still claims more would loop forever
            if !page.has_next || fetched == 0 {
                break;
            }
            offset += fetched;
        }

        if expansion.skipped > 0 {
            warn!(
                playlist_id,
                skipped = expansion.skipped,
                "skipped catalog rows without track or artist"
            );
        }
        info!(playlist_id, count = expansion.tracks.len(), "expanded catalog playlist");
        Ok(expansion)
    }
}
