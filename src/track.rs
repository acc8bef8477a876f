use std::fmt;

/// Where a queued reference has to be looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A media page URL handed to the extractor as-is
    DirectMedia,
    /// Free text ("title artist") searched on the media provider
    CatalogSearch,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::DirectMedia => write!(f, "link"),
            SourceKind::CatalogSearch => write!(f, "search"),
        }
    }
}

/// An unresolved pointer to something playable.
///
/// References are created at enqueue time and consumed exactly once by a
/// playback session. They never carry stream URLs: those expire, so
/// resolution waits until the track is about to play.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackRef {
    locator: String,
    kind: SourceKind,
}

impl TrackRef {
    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            locator: url.into(),
            kind: SourceKind::DirectMedia,
        }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self {
            locator: query.into(),
            kind: SourceKind::CatalogSearch,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.locator, self.kind)
    }
}

/// A resolved, ready-to-stream track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayableItem {
    pub stream_url: String,
    pub title: String,
    /// Page a listener can open to see the track
    pub display_link: String,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: u32,
}

impl PlayableItem {
    /// "M:SS", or "H:MM:SS" for long mixes; "live" when the length is unknown
    pub fn format_duration(&self) -> String {
        format_duration(self.duration_seconds)
    }
}

pub fn format_duration(seconds: u32) -> String {
    if seconds == 0 {
        return "live".to_string();
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_tag_source() {
        let direct = TrackRef::direct("https://www.youtube.com/watch?v=abc");
        assert_eq!(direct.kind(), SourceKind::DirectMedia);
        assert_eq!(direct.locator(), "https://www.youtube.com/watch?v=abc");

        let search = TrackRef::search("Song Artist");
        assert_eq!(search.kind(), SourceKind::CatalogSearch);
        assert_eq!(search.to_string(), "Song Artist (search)");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "live");
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(185), "3:05");
        assert_eq!(format_duration(3725), "1:02:05");
    }
}
