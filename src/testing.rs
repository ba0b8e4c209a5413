//! In-crate fakes for the catalog and notifier seams, plus small fixtures.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::catalog::{parse_release_date, CatalogSource};
use crate::error::{AppError, Result};
use crate::models::{CatalogEpisode, EpisodeDetail, FeedChannel, Source, User};
use crate::notify::{ChatSender, EmailMessage, LinkButton, Mailer};

pub fn candidate(title: &str, channel_id: &str, date: Option<&str>) -> CatalogEpisode {
    let feed_link = format!("https://feeds.example.com/{}.xml", channel_id);
    CatalogEpisode {
        external_id: format!("{}-{}", channel_id, title),
        channel_id: channel_id.to_string(),
        title: title.to_string(),
        link: format!("https://podcasts.example.com/{}/{}", channel_id, title),
        pub_date: date.and_then(parse_release_date),
        author: "Example Author".to_string(),
        audio_url: format!("https://cdn.example.com/{}/{}.mp3", channel_id, title),
        audio_type: "mp3".to_string(),
        duration_ms: 1_800_000,
        channel_title: format!("Channel {}", channel_id),
        feed_link,
        ..CatalogEpisode::default()
    }
}

pub fn user(id: &str, email: Option<&str>) -> User {
    User {
        id: id.to_string(),
        nickname: None,
        email: email.map(str::to_string),
        telegram_id: None,
        reg_date: Utc::now(),
    }
}

/// Catalog returning canned hits per keyword.
pub struct FakeCatalog {
    source: Source,
    results: Mutex<HashMap<String, Vec<CatalogEpisode>>>,
    fallback: Mutex<Vec<CatalogEpisode>>,
    failing: Mutex<HashSet<String>>,
    limits: Mutex<Vec<u32>>,
}

impl FakeCatalog {
    /// Every keyword gets `items`.
    pub fn new(source: Source, items: Vec<CatalogEpisode>) -> Self {
        Self {
            source,
            results: Mutex::new(HashMap::new()),
            fallback: Mutex::new(items),
            failing: Mutex::new(HashSet::new()),
            limits: Mutex::new(Vec::new()),
        }
    }

    pub fn set_results(&self, keyword: &str, items: Vec<CatalogEpisode>) {
        self.results.lock().unwrap().insert(keyword.to_string(), items);
    }

    pub fn fail_keyword(&self, keyword: &str) {
        self.failing.lock().unwrap().insert(keyword.to_string());
    }

    pub fn requested_limits(&self) -> Vec<u32> {
        self.limits.lock().unwrap().clone()
    }

    fn items_for(&self, keyword: &str) -> Vec<CatalogEpisode> {
        self.results
            .lock()
            .unwrap()
            .get(keyword)
            .cloned()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    fn source(&self) -> Source {
        self.source
    }

    async fn search(&self, keyword: &str, _country: &str, limit: u32) -> Result<Vec<CatalogEpisode>> {
        self.limits.lock().unwrap().push(limit);
        if self.failing.lock().unwrap().contains(keyword) {
            return Err(AppError::CatalogApi(format!("search failed for {}", keyword)));
        }
        Ok(self.items_for(keyword))
    }

    async fn episode_detail(
        &self,
        podcast_id: &str,
        episode_id: &str,
        _country: &str,
    ) -> Result<EpisodeDetail> {
        let all = self.fallback.lock().unwrap().clone();
        let episode = all
            .into_iter()
            .chain(self.results.lock().unwrap().values().flatten().cloned())
            .find(|e| e.channel_id == podcast_id && e.external_id == episode_id)
            .ok_or_else(|| AppError::not_found("episode", episode_id))?;

        let channel = FeedChannel {
            id: episode.channel_id.clone(),
            title: episode.channel_title.clone(),
            feed_link: episode.feed_link.clone(),
            ..FeedChannel::default()
        };
        Ok(EpisodeDetail { channel, episode })
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        if self.fail {
            return Err(AppError::EmailApi("mailbox unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(String, String, Vec<LinkButton>)>>,
    fail: bool,
}

impl RecordingChat {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// (chat id, text, buttons) per message.
    pub fn sent(&self) -> Vec<(String, String, Vec<LinkButton>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSender for RecordingChat {
    async fn send_message(&self, chat_id: &str, text: &str, buttons: &[LinkButton]) -> Result<()> {
        if self.fail {
            return Err(AppError::TelegramApi("chat not found".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string(), buttons.to_vec()));
        Ok(())
    }
}
