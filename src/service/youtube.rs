use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{Extraction, MediaExtractor};
use crate::track::PlayableItem;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// YouTube media provider backed by the yt-dlp CLI.
///
/// All calls go through `tokio::process`, so a slow extraction only ever
/// suspends the task awaiting it.
pub struct YtDlpClient {
    ytdlp_path: PathBuf,
    audio_format: String,
}

impl YtDlpClient {
    /// Create a new client
    ///
    /// Errors if yt-dlp is not on PATH (or at `ytdlp_path`) or does not run.
    pub async fn new(ytdlp_path: Option<&str>, audio_format: &str) -> Result<Self> {
        let path = match ytdlp_path {
            Some(p) => PathBuf::from(p),
            None => which::which("yt-dlp").unwrap_or_else(|_| PathBuf::from("yt-dlp")),
        };

        let check = Command::new(&path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match check {
            Ok(status) if status.success() => Ok(Self {
                ytdlp_path: path,
                audio_format: audio_format.to_string(),
            }),
            Ok(_) => Err(anyhow!(
                "yt-dlp found but returned error. Please ensure yt-dlp is properly installed."
            )),
            Err(_) => Err(anyhow!(
                "yt-dlp not found at '{}'. Playback requires yt-dlp to be installed.\n\
                 Install via: nix-shell -p yt-dlp, brew install yt-dlp, or pip install yt-dlp",
                path.display()
            )),
        }
    }

    /// Execute yt-dlp and return one parsed JSON value per output line
    async fn run_ytdlp_json(&self, args: &[&str]) -> Result<Vec<Value>> {
        debug!(?args, "running yt-dlp");
        let output = Command::new(&self.ytdlp_path)
            .args(args)
            .args(["--no-warnings"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("yt-dlp failed: {}", stderr.trim()));
        }

        let stdout = String::from_utf8(output.stdout)?;
        Ok(parse_json_lines(&stdout))
    }

    async fn extract_items(&self, target: &str) -> Result<Extraction> {
        let results = self
            .run_ytdlp_json(&["-f", &self.audio_format, "--playlist-items", "1", "-j", target])
            .await?;
        to_extraction(&results)
    }
}

fn parse_json_lines(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn to_extraction(results: &[Value]) -> Result<Extraction> {
    let mut items: Vec<PlayableItem> = results.iter().filter_map(parse_playable).collect();
    match items.len() {
        0 => Err(anyhow!("yt-dlp returned no playable results")),
        1 => Ok(Extraction::Single(items.remove(0))),
        _ => Ok(Extraction::Many(items)),
    }
}

/// Parse one `yt-dlp -j` object into a playable item
fn parse_playable(json: &Value) -> Option<PlayableItem> {
    let stream_url = extract_stream_url(json)?;
    let title = json
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();

    let display_link = json
        .get("webpage_url")
        .or_else(|| json.get("original_url"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            json.get("id")
                .and_then(|v| v.as_str())
                .map(|id| format!("{}{}", WATCH_URL, id))
        })
        .unwrap_or_else(|| stream_url.clone());

    let duration = json
        .get("duration")
        .and_then(|v| v.as_f64())
        .map(|d| d as u32)
        .unwrap_or(0);

    Some(PlayableItem {
        stream_url,
        title,
        display_link,
        thumbnail_url: extract_thumbnail(json),
        duration_seconds: duration,
    })
}

/// Direct URL of the selected audio format
fn extract_stream_url(json: &Value) -> Option<String> {
    json.get("url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            json.get("requested_formats")
                .and_then(|f| f.as_array())
                .and_then(|formats| {
                    formats.iter().find(|f| {
                        f.get("acodec").and_then(|c| c.as_str()).unwrap_or("none") != "none"
                    })
                })
                .and_then(|f| f.get("url"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
}

/// Extract best thumbnail URL from JSON
fn extract_thumbnail(json: &Value) -> Option<String> {
    json.get("thumbnail")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            json.get("thumbnails")
                .and_then(|t| t.as_array())
                .and_then(|arr| arr.last())
                .and_then(|t| t.get("url"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
}

/// Canonical watch URL for a flat-playlist entry
fn entry_page_url(json: &Value) -> Option<String> {
    if let Some(id) = json.get("id").and_then(|v| v.as_str()) {
        return Some(format!("{}{}", WATCH_URL, id));
    }
    json.get("url")
        .or_else(|| json.get("webpage_url"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[async_trait]
impl MediaExtractor for YtDlpClient {
    async fn extract(&self, locator: &str) -> Result<Extraction> {
        self.extract_items(locator).await
    }

    async fn search(&self, query: &str) -> Result<Extraction> {
        let target = format!("ytsearch1:{}", query);
        self.extract_items(&target).await
    }

    async fn list_entries(&self, playlist_url: &str) -> Result<Vec<String>> {
        let results = self
            .run_ytdlp_json(&["--flat-playlist", "-j", playlist_url])
            .await?;
        Ok(results.iter().filter_map(entry_page_url).collect())
    }
}
