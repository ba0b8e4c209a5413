use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Catalog a subscription is searched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Itunes,
    Spotify,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Itunes => "itunes",
            Source::Spotify => "spotify",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Older rows carry an empty source, which always meant iTunes.
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "itunes" => Ok(Source::Itunes),
            "spotify" => Ok(Source::Spotify),
            other => Err(AppError::Config(format!("unknown catalog source: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Disabled,
    Active,
}

impl SubscriptionStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            SubscriptionStatus::Disabled => 0,
            SubscriptionStatus::Active => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value == 1 {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Disabled
        }
    }
}

/// The query a subscription stands for. Subscriptions of different users with
/// the same fingerprint share the stored catalog links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub keyword: String,
    pub source: Source,
    pub country: String,
    pub exclude_feed_ids: String,
}

impl Fingerprint {
    pub fn new(
        keyword: impl Into<String>,
        source: Source,
        country: impl Into<String>,
        exclude_feed_ids: impl Into<String>,
    ) -> Self {
        Self {
            keyword: keyword.into(),
            source,
            country: country.into(),
            exclude_feed_ids: exclude_feed_ids.into(),
        }
    }

    /// Channel ids whose episodes are dropped from search results.
    pub fn excluded_channels(&self) -> Vec<&str> {
        self.exclude_feed_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keyword={:?} source={} country={:?} exclude={:?}",
            self.keyword, self.source, self.country, self.exclude_feed_ids
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub keyword: String,
    pub country: String,
    pub source: Source,
    pub exclude_feed_id: String,
    pub order_by_date: i64,
    pub kind: String,
    pub status: SubscriptionStatus,
    /// Highest keyword link id already accounted for in a notification; 0 when unset.
    pub latest_id: i64,
    pub total_count: i64,
    pub create_time: DateTime<Utc>,
    pub update_time: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(
            self.keyword.clone(),
            self.source,
            self.country.clone(),
            self.exclude_feed_id.clone(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: String,
    pub keyword: String,
    pub country: String,
    pub source: Source,
    pub exclude_feed_id: String,
    pub order_by_date: i64,
}

impl NewSubscription {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(
            self.keyword.clone(),
            self.source,
            self.country.clone(),
            self.exclude_feed_id.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created { id: String, seeded: bool },
    AlreadySubscribed,
}
