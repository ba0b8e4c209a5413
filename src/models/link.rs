use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Fingerprint;

/// Records that a feed item showed up in the results of a fingerprint's query.
/// The autoincrement `id` is the sequence subscription watermarks refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordLink {
    pub id: i64,
    pub keyword: String,
    pub feed_channel_id: String,
    pub feed_item_id: String,
    pub country: String,
    pub source: String,
    pub exclude_feed_id: String,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewKeywordLink {
    pub fingerprint: Fingerprint,
    pub feed_channel_id: String,
    pub feed_item_id: String,
    pub create_time: DateTime<Utc>,
}
