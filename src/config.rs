use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";
const CLIENT_ID_ENV: &str = "CADENCE_SPOTIFY_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "CADENCE_SPOTIFY_CLIENT_SECRET";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mpd: MpdConfig,
    pub playback: PlaybackConfig,
    pub catalog: CatalogConfig,
    pub media: MediaConfig,
}

/// MPD connection settings (the audio sink)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MpdConfig {
    /// MPD host address
    pub host: String,
    /// MPD port
    pub port: u16,
    /// How often a playing stream is checked for completion
    pub poll_interval_ms: u64,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6600,
            poll_interval_ms: 500,
        }
    }
}

/// Queue and advance-loop behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Drop the remaining queue on `stop` instead of keeping it for a bare `play`
    pub stop_clears_queue: bool,
    /// Give up after this many unresolvable tracks in a row (unset = never)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
    /// Pause between a failed resolution and the next attempt
    pub skip_backoff_ms: u64,
    /// Upper bound on a single yt-dlp resolution
    pub resolve_timeout_secs: u64,
    /// Entries shown by the `queue` command
    pub queue_preview: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            stop_clears_queue: false,
            max_consecutive_failures: None,
            skip_backoff_ms: 0,
            resolve_timeout_secs: 30,
            queue_preview: 10,
        }
    }
}

impl PlaybackConfig {
    /// Resolution timeout, never shorter than one second
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs.max(1))
    }
}

/// Spotify Web API settings (catalog provider)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Market used for track relinking
    pub market: String,
    /// Playlist page size (the API caps this at 100)
    pub page_size: usize,
    pub api_base: String,
    pub auth_base: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            market: "US".to_string(),
            page_size: 100,
            api_base: "https://api.spotify.com/v1".to_string(),
            auth_base: "https://accounts.spotify.com".to_string(),
        }
    }
}

impl CatalogConfig {
    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// yt-dlp settings (media provider)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Explicit yt-dlp binary; looked up on PATH when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ytdlp_path: Option<String>,
    /// yt-dlp format selector
    pub audio_format: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            audio_format: "bestaudio".to_string(),
        }
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("cadence");

        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from `path`, writing defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path).context("Failed to read config file")?;

            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Credentials from the environment win over the file
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup(CLIENT_ID_ENV).filter(|v| !v.is_empty()) {
            self.catalog.client_id = id;
        }
        if let Some(secret) = lookup(CLIENT_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.catalog.client_secret = secret;
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.mpd.host, "localhost");
        assert_eq!(config.mpd.port, 6600);
        assert!(!config.playback.stop_clears_queue);
        assert!(config.playback.max_consecutive_failures.is_none());
        assert_eq!(config.playback.skip_backoff_ms, 0);
        assert_eq!(config.catalog.page_size, 100);
        assert_eq!(config.media.audio_format, "bestaudio");
        assert!(!config.catalog.has_credentials());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[playback]
stop_clears_queue = true
max_consecutive_failures = 5
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        assert!(config.playback.stop_clears_queue);
        assert_eq!(config.playback.max_consecutive_failures, Some(5));
        // Defaults
        assert_eq!(config.playback.resolve_timeout_secs, 30);
        assert_eq!(config.mpd.port, 6600);
        assert_eq!(config.catalog.market, "US");
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[mpd]
host = "speaker"
port = 6601
poll_interval_ms = 250

[playback]
stop_clears_queue = true
skip_backoff_ms = 1500
resolve_timeout_secs = 10
queue_preview = 3

[catalog]
client_id = "id"
client_secret = "secret"
market = "SE"
page_size = 50

[media]
ytdlp_path = "/opt/bin/yt-dlp"
audio_format = "worstaudio"
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.mpd.host, "speaker");
        assert_eq!(config.mpd.poll_interval_ms, 250);
        assert_eq!(config.playback.skip_backoff_ms, 1500);
        assert_eq!(config.playback.queue_preview, 3);
        assert!(config.catalog.has_credentials());
        assert_eq!(config.catalog.page_size, 50);
        assert_eq!(config.media.ytdlp_path.as_deref(), Some("/opt/bin/yt-dlp"));
        assert_eq!(config.media.audio_format, "worstaudio");
    }

    #[test]
    fn test_resolve_timeout_has_a_floor() {
        let mut playback = PlaybackConfig::default();
        assert_eq!(playback.resolve_timeout(), Duration::from_secs(30));

        playback.resolve_timeout_secs = 0;
        assert_eq!(playback.resolve_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid [[ toml";
        let result: Result<Config, _> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides_credentials() {
        let mut config = Config::default();
        config.catalog.client_id = "from-file".to_string();

        config.apply_env_overrides(|key| match key {
            CLIENT_SECRET_ENV => Some("from-env".to_string()),
            CLIENT_ID_ENV => Some(String::new()),
            _ => None,
        });

        // Empty env values do not clobber the file
        assert_eq!(config.catalog.client_id, "from-file");
        assert_eq!(config.catalog.client_secret, "from-env");
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.mpd.port, 6600);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("[playback]"));
    }

    #[test]
    fn test_load_from_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[mpd]\nport = 7000\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.mpd.port, 7000);
        assert_eq!(config.mpd.host, "localhost");
    }
}
