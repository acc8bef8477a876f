use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CatalogEntry, CatalogPage, CatalogProvider};
use crate::config::CatalogConfig;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        self.expires_at - Duration::seconds(30) < Utc::now()
    }
}

// API Response models
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TrackData {
    name: Option<String>,
    #[serde(default)]
    artists: Vec<ArtistResponse>,
}

#[derive(Debug, Deserialize)]
struct ArtistResponse {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTracksResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<TrackData>,
}

impl From<TrackData> for CatalogEntry {
    fn from(track: TrackData) -> Self {
        CatalogEntry {
            title: track.name,
            artists: track.artists.into_iter().filter_map(|a| a.name).collect(),
        }
    }
}

/// Spotify Web API client using the client-credentials flow.
///
/// The token is cached until shortly before expiry. A 401 drops the cached
/// token and the request is retried once.
pub struct SpotifyClient {
    config: CatalogConfig,
    http_client: HttpClient,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        if !config.has_credentials() {
            return Err(anyhow!(
                "Spotify client id/secret not configured; set [catalog] in config.toml \
                 or CADENCE_SPOTIFY_CLIENT_ID / CADENCE_SPOTIFY_CLIENT_SECRET"
            ));
        }

        Ok(Self {
            config,
            http_client: HttpClient::new(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(ref token) = *cached {
            if !token.is_expired() {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        debug!("requesting Spotify access token");
        let credentials = general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.config.client_id, self.config.client_secret
        ));

        let response = self
            .http_client
            .post(format!("{}/api/token", self.config.auth_base))
            .header(header::AUTHORIZATION, format!("Basic {}", credentials))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("Network error requesting Spotify token")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to get Spotify token. Status: {} - {}",
                status,
                body
            ));
        }

        let token: TokenResponse = response.json().await?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in.unwrap_or(3600)),
        })
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send an authorized GET, refreshing the token once on 401
    async fn get_json<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&HttpClient) -> RequestBuilder,
    {
        for attempt in 0..2 {
            let token = self.access_token().await?;
            let response: Response = build(&self.http_client)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .send()
                .await
                .context("Network error talking to Spotify")?;

            match response.status() {
                status if status.is_success() => return Ok(response.json().await?),
                StatusCode::UNAUTHORIZED if attempt == 0 => {
                    warn!("Spotify returned 401, refreshing token");
                    self.invalidate_token().await;
                    continue;
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(anyhow!("Spotify request failed with status: {} - {}", status, body));
                }
            }
        }

        Err(anyhow!("Spotify rejected the refreshed token"))
    }
}

#[async_trait]
impl CatalogProvider for SpotifyClient {
    async fn get_track(&self, track_id: &str) -> Result<CatalogEntry> {
        let url = format!("{}/tracks/{}", self.config.api_base, track_id);
        let track: TrackData = self
            .get_json(|http| http.get(&url).query(&[("market", self.config.market.as_str())]))
            .await?;
        Ok(track.into())
    }

    async fn get_playlist_page(
        &self,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<CatalogPage> {
        let url = format!("{}/playlists/{}/tracks", self.config.api_base, playlist_id);
        let offset = offset.to_string();
        let limit = limit.to_string();
        let page: PlaylistTracksResponse = self
            .get_json(|http| {
                http.get(&url).query(&[
                    ("offset", offset.as_str()),
                    ("limit", limit.as_str()),
                    ("market", self.config.market.as_str()),
                    ("fields", "items(track(name,artists(name))),next"),
                ])
            })
            .await?;

        Ok(CatalogPage {
            // Rows whose track was removed come back as `"track": null`
            items: page
                .items
                .into_iter()
                .map(|item| item.track.map(CatalogEntry::from).unwrap_or_default())
                .collect(),
            has_next: page.next.is_some(),
        })
    }
}
