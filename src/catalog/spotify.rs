use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CatalogEpisode, EpisodeDetail, FeedChannel, Source};

use super::{parse_release_date, CatalogSource, TokenCache};

const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SPOTIFY_MAX_LIMIT: u32 = 50;
const DEFAULT_MARKET: &str = "US";

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Image {
    url: String,
    width: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExternalUrls {
    spotify: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Episode {
    id: String,
    name: String,
    description: String,
    html_description: String,
    duration_ms: u64,
    explicit: bool,
    release_date: String,
    images: Vec<Image>,
    external_urls: ExternalUrls,
    audio_preview_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Copyright {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Show {
    id: String,
    name: String,
    description: String,
    publisher: String,
    images: Vec<Image>,
    external_urls: ExternalUrls,
    total_episodes: usize,
    languages: Vec<String>,
    copyrights: Vec<Copyright>,
}

#[derive(Debug, Deserialize)]
struct EpisodeDetailResponse {
    #[serde(flatten)]
    episode: Episode,
    show: Option<Show>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EpisodePage {
    items: Vec<Option<Episode>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    episodes: Option<EpisodePage>,
}

/// Spotify Web API client using the client-credentials flow.
pub struct SpotifyClient {
    client: Client,
    credentials: SpotifyCredentials,
    tokens: Arc<TokenCache>,
    api_url: String,
    token_url: String,
}

impl SpotifyClient {
    pub fn new(credentials: SpotifyCredentials, tokens: Arc<TokenCache>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            tokens,
            api_url: SPOTIFY_API_URL.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
        })
    }

    async fn access_token(&self) -> Result<String> {
        self.tokens
            .get_or_refresh(|| self.request_token())
            .await
    }

    async fn request_token(&self) -> Result<(String, i64)> {
        if self.credentials.client_id.is_empty() || self.credentials.client_secret.is_empty() {
            return Err(AppError::SpotifyAuth(
                "client id and secret are required".to_string(),
            ));
        }

        tracing::debug!("Requesting Spotify access token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::SpotifyAuth(format!("HTTP {}: {}", status, error_text)));
        }

        let token: TokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(AppError::SpotifyAuth(
                "token response missing access_token".to_string(),
            ));
        }
        Ok((token.access_token, token.expires_in))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let token = self.access_token().await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::CatalogApi(format!(
                "Spotify request failed: HTTP {}: {}",
                status, error_text
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl CatalogSource for SpotifyClient {
    fn source(&self) -> Source {
        Source::Spotify
    }

    async fn search(&self, keyword: &str, country: &str, limit: u32) -> Result<Vec<CatalogEpisode>> {
        let market = market_or_default(country);
        let limit = limit.min(SPOTIFY_MAX_LIMIT).to_string();
        let url = Url::parse_with_params(
            &format!("{}/search", self.api_url),
            &[
                ("q", keyword),
                ("type", "episode"),
                ("market", market),
                ("limit", limit.as_str()),
                ("offset", "0"),
            ],
        )
        .map_err(|e| AppError::CatalogApi(e.to_string()))?;

        let response: SearchResponse = self.get(url).await?;
        let page = response.episodes.ok_or_else(|| {
            AppError::CatalogApi("Spotify search response missing episodes".to_string())
        })?;

        let items: Vec<CatalogEpisode> = page
            .items
            .into_iter()
            .flatten()
            .map(|episode| episode_from_spotify(episode, None))
            .collect();

        tracing::debug!("Spotify returned {} episodes for {:?}", items.len(), keyword);
        Ok(items)
    }

    async fn episode_detail(
        &self,
        _podcast_id: &str,
        episode_id: &str,
        country: &str,
    ) -> Result<EpisodeDetail> {
        let url = Url::parse_with_params(
            &format!("{}/episodes/{}", self.api_url, urlencoding::encode(episode_id)),
            &[("market", market_or_default(country))],
        )
        .map_err(|e| AppError::CatalogApi(e.to_string()))?;

        let response: EpisodeDetailResponse = self.get(url).await?;
        detail_from_response(response)
    }
}

fn market_or_default(country: &str) -> &str {
    if country.trim().is_empty() {
        DEFAULT_MARKET
    } else {
        country
    }
}

/// Widest image wins.
fn best_image(images: &[Image]) -> String {
    images
        .iter()
        .max_by_key(|img| img.width.unwrap_or_default())
        .map(|img| img.url.clone())
        .unwrap_or_default()
}

fn episode_from_spotify(episode: Episode, show: Option<&Show>) -> CatalogEpisode {
    let image_url = best_image(&episode.images);
    let (channel_id, channel_title, channel_image_url, feed_link, author) = match show {
        Some(show) => (
            show.id.clone(),
            show.name.clone(),
            best_image(&show.images),
            show.external_urls.spotify.clone(),
            show.publisher.clone(),
        ),
        // search hits carry no show
        None => (String::new(), String::new(), image_url.clone(), String::new(), String::new()),
    };

    CatalogEpisode {
        external_id: episode.id,
        channel_id,
        title: episode.name,
        link: episode.external_urls.spotify,
        pub_date: parse_release_date(&episode.release_date),
        author,
        image_url,
        audio_url: episode.audio_preview_url.unwrap_or_default(),
        audio_type: "audio/mpeg".to_string(),
        duration_ms: episode.duration_ms,
        description: if episode.html_description.is_empty() {
            episode.description
        } else {
            episode.html_description
        },
        channel_title,
        channel_image_url,
        feed_link,
        explicit: if episode.explicit { "yes" } else { "no" }.to_string(),
        ..CatalogEpisode::default()
    }
}

fn detail_from_response(response: EpisodeDetailResponse) -> Result<EpisodeDetail> {
    let show = response.show.ok_or_else(|| {
        AppError::CatalogApi("Spotify episode response missing show".to_string())
    })?;
    if response.episode.id.is_empty() {
        return Err(AppError::CatalogApi(
            "Spotify episode response missing id".to_string(),
        ));
    }

    let channel = FeedChannel {
        id: show.id.clone(),
        title: show.name.clone(),
        description: show.description.clone(),
        image_url: best_image(&show.images),
        link: show.external_urls.spotify.clone(),
        feed_link: show.external_urls.spotify.clone(),
        author: show.publisher.clone(),
        owner_name: show.publisher.clone(),
        owner_email: String::new(),
        language: show.languages.first().cloned().unwrap_or_default(),
        copyright: show
            .copyrights
            .first()
            .map(|c| c.text.clone())
            .unwrap_or_default(),
        episode_count: show.total_episodes,
    };
    let episode = episode_from_spotify(response.episode, Some(&show));

    Ok(EpisodeDetail { channel, episode })
}
