use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

/// A search hit as returned by a catalog provider, before identity derivation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogEpisode {
    pub external_id: String,
    pub channel_id: String,
    pub title: String,
    pub link: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub author: String,
    pub image_url: String,
    pub audio_url: String,
    pub audio_type: String,
    pub duration_ms: u64,
    pub description: String,
    pub channel_title: String,
    pub channel_image_url: String,
    pub feed_link: String,
    pub explicit: String,
    pub episode: String,
    pub season: String,
    pub episode_type: String,
    /// Size of the filtered candidate set this episode belongs to.
    pub count: usize,
}

/// Stored episode, keyed by the id derived from its feed link and title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub feed_id: String,
    pub channel_id: String,
    pub feed_link: String,
    pub channel_title: String,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub author: String,
    pub input_date: DateTime<Utc>,
    pub image_url: String,
    pub enclosure_url: String,
    pub enclosure_type: String,
    pub enclosure_length: String,
    pub duration: String,
    pub episode: String,
    pub season: String,
    pub explicit: String,
    pub episode_type: String,
    pub description: String,
    pub source: Source,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedChannel {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub link: String,
    pub feed_link: String,
    pub author: String,
    pub owner_name: String,
    pub owner_email: String,
    pub language: String,
    pub copyright: String,
    pub episode_count: usize,
}

#[derive(Debug, Clone)]
pub struct EpisodeDetail {
    pub channel: FeedChannel,
    pub episode: CatalogEpisode,
}
