pub mod spotify;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;

use crate::track::PlayableItem;

/// What the media provider returned for one locator
#[derive(Debug, Clone)]
pub enum Extraction {
    Single(PlayableItem),
    /// The locator expanded to several items (e.g. a mix link)
    Many(Vec<PlayableItem>),
}

impl Extraction {
    /// The item to play: the single result, or the first of a collection
    pub fn into_first(self) -> Option<PlayableItem> {
        match self {
            Extraction::Single(item) => Some(item),
            Extraction::Many(items) => items.into_iter().next(),
        }
    }
}

/// One row of a catalog playlist listing.
///
/// Both fields are optional because the catalog returns rows for removed
/// or local-only tracks with the metadata stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogEntry {
    pub title: Option<String>,
    pub artists: Vec<String>,
}

impl CatalogEntry {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            artists: vec![artist.into()],
        }
    }

    /// "title primary-artist", or `None` when either part is missing
    pub fn search_query(&self) -> Option<String> {
        let title = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let artist = self
            .artists
            .first()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())?;
        Some(format!("{} {}", title, artist))
    }
}

/// One page of a catalog playlist
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub items: Vec<CatalogEntry>,
    pub has_next: bool,
}

/// Media extraction (stream URLs and metadata for playable pages)
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Extract a page URL
    async fn extract(&self, locator: &str) -> Result<Extraction>;

    /// Best-match search; the first item is the top hit
    async fn search(&self, query: &str) -> Result<Extraction>;

    /// Canonical page URLs for every entry in a playlist, in order
    async fn list_entries(&self, playlist_url: &str) -> Result<Vec<String>>;
}

/// Track/playlist metadata catalog
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn get_track(&self, track_id: &str) -> Result<CatalogEntry>;

    async fn get_playlist_page(
        &self,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<CatalogPage>;
}

pub use spotify::SpotifyClient;
pub use youtube::YtDlpClient;
