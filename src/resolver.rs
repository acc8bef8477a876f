use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::service::MediaExtractor;
use crate::track::{PlayableItem, SourceKind, TrackRef};

/// Turns a queued reference into a stream, just before it plays.
///
/// Every failure (extractor error, empty result, timeout) comes back as
/// `Error::Resolution`.
pub struct TrackResolver {
    media: Arc<dyn MediaExtractor>,
    timeout: Duration,
}

impl TrackResolver {
    pub fn new(media: Arc<dyn MediaExtractor>, timeout: Duration) -> Self {
        Self { media, timeout }
    }

    pub async fn resolve(&self, reference: &TrackRef) -> Result<PlayableItem> {
        let locator = reference.locator();
        debug!(%reference, "resolving");

        let lookup = async {
            match reference.kind() {
                SourceKind::DirectMedia => self.media.extract(locator).await,
                SourceKind::CatalogSearch => self.media.search(locator).await,
            }
        };

        let extraction = tokio::time::timeout(self.timeout, lookup)
            .await
            .map_err(|_| {
                Error::Resolution(format!(
                    "timed out after {}s",
                    self.timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| Error::Resolution(format!("{:#}", e)))?;

        extraction
            .into_first()
            .ok_or_else(|| Error::Resolution("no results".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMedia;

    fn resolver(media: FakeMedia) -> TrackResolver {
        TrackResolver::new(Arc::new(media), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_direct_media_is_extracted() {
        let item = resolver(FakeMedia::default())
            .resolve(&TrackRef::direct("https://youtu.be/a"))
            .await
            .unwrap();
        assert_eq!(item.title, "https://youtu.be/a");
        assert_eq!(item.display_link, "https://youtu.be/a");
    }

    #[tokio::test]
    async fn test_catalog_search_uses_top_hit() {
        let item = resolver(FakeMedia::default())
            .resolve(&TrackRef::search("Song Band"))
            .await
            .unwrap();
        assert_eq!(item.title, "Song Band");
        assert!(item.display_link.starts_with("https://search/"));
    }

    #[tokio::test]
    async fn test_collection_takes_first_entry() {
        let media = FakeMedia::default().with_collection("https://youtu.be/mix", &["first", "second"]);
        let item = resolver(media)
            .resolve(&TrackRef::direct("https://youtu.be/mix"))
            .await
            .unwrap();
        assert_eq!(item.title, "first");
    }

    #[tokio::test]
    async fn test_failures_fold_into_resolution_error() {
        let media = FakeMedia::default()
            .failing("https://youtu.be/blocked")
            .with_collection("https://youtu.be/empty", &[]);
        let resolver = resolver(media);

        let err = resolver
            .resolve(&TrackRef::direct("https://youtu.be/blocked"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));

        let err = resolver
            .resolve(&TrackRef::direct("https://youtu.be/empty"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(ref msg) if msg == "no results"));
    }

    #[tokio::test]
    async fn test_slow_extraction_times_out() {
        let media = FakeMedia::default().with_delay(Duration::from_secs(10));
        let resolver = TrackResolver::new(Arc::new(media), Duration::from_millis(50));

        let err = resolver
            .resolve(&TrackRef::direct("https://youtu.be/slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(ref msg) if msg.starts_with("timed out")));
    }
}
