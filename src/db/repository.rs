use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, ErrorCode, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    FeedItem, Fingerprint, KeywordLink, NewKeywordLink, NewSubscription, Source, Subscription,
    SubscriptionStatus, User,
};

use super::schema::SCHEMA;

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, keyword, country, source, exclude_feed_id, \
     order_by_date, type, status, latest_id, total_count, create_time, update_time";

const FEED_ITEM_COLUMNS: &str = "fi.id, fi.feed_id, fi.channel_id, fi.feed_link, fi.channel_title, \
     fi.guid, fi.title, fi.link, fi.pub_date, fi.author, fi.input_date, fi.image_url, \
     fi.enclosure_url, fi.enclosure_type, fi.enclosure_length, fi.duration, fi.episode, \
     fi.season, fi.explicit, fi.episode_type, fi.description, fi.source";

const LINK_COLUMNS: &str =
    "id, keyword, feed_channel_id, feed_item_id, country, source, exclude_feed_id, create_time";

/// SQLite-backed store shared by every unit of work in a refresh pass.
///
/// Cloning is cheap; all clones talk to the same connection thread.
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // User operations

    pub async fn upsert_user(&self, user: User) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO users (id, nickname, email, telegram_id, reg_date)
                       VALUES (?1, ?2, ?3, ?4, ?5)
                       ON CONFLICT(id) DO UPDATE SET
                           nickname = excluded.nickname,
                           email = excluded.email,
                           telegram_id = excluded.telegram_id"#,
                    params![
                        user.id,
                        user.nickname,
                        user.email,
                        user.telegram_id,
                        user.reg_date.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        let key = id.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, nickname, email, telegram_id, reg_date FROM users WHERE id = ?1",
                        params![key],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        user.ok_or_else(|| AppError::not_found("User", id))
    }

    // Subscription operations

    pub async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let subscriptions = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM user_subscriptions WHERE status = 1 ORDER BY create_time",
                    SUBSCRIPTION_COLUMNS
                ))?;
                let subscriptions = stmt
                    .query_map([], subscription_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subscriptions)
            })
            .await?;
        Ok(subscriptions)
    }

    /// The active subscription `user_id` holds for `fingerprint`.
    pub async fn find_subscription(
        &self,
        user_id: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Subscription> {
        let user = user_id.to_string();
        let fp = fingerprint.clone();
        let subscription = self
            .conn
            .call(move |conn| {
                let subscription = conn
                    .query_row(
                        &format!(
                            r#"SELECT {} FROM user_subscriptions
                               WHERE user_id = ?1 AND keyword = ?2 AND source = ?3
                                 AND country = ?4 AND exclude_feed_id = ?5 AND status = 1
                               ORDER BY create_time DESC
                               LIMIT 1"#,
                            SUBSCRIPTION_COLUMNS
                        ),
                        params![user, fp.keyword, fp.source.as_str(), fp.country, fp.exclude_feed_ids],
                        subscription_from_row,
                    )
                    .optional()?;
                Ok(subscription)
            })
            .await?;
        subscription
            .ok_or_else(|| AppError::not_found("Subscription", format!("{}/{}", user_id, fingerprint)))
    }

    pub async fn find_active_subscription(
        &self,
        user_id: &str,
        keyword: &str,
        source: Source,
    ) -> Result<Option<Subscription>> {
        let user = user_id.to_string();
        let keyword = keyword.to_string();
        let subscription = self
            .conn
            .call(move |conn| {
                let subscription = conn
                    .query_row(
                        &format!(
                            r#"SELECT {} FROM user_subscriptions
                               WHERE user_id = ?1 AND keyword = ?2 AND source = ?3 AND status = 1"#,
                            SUBSCRIPTION_COLUMNS
                        ),
                        params![user, keyword, source.as_str()],
                        subscription_from_row,
                    )
                    .optional()?;
                Ok(subscription)
            })
            .await?;
        Ok(subscription)
    }

    /// Inserts an active subscription with an unset watermark and returns its id.
    ///
    /// Fails with `AlreadyExists` when the user already holds an active
    /// subscription for the same keyword and source.
    pub async fn insert_subscription(&self, subscription: NewSubscription) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let row_id = id.clone();
        let conflict_id = format!("{}/{}", subscription.user_id, subscription.keyword);
        let inserted = self
            .conn
            .call(move |conn| {
                let result = conn.execute(
                    r#"INSERT INTO user_subscriptions
                           (id, user_id, keyword, country, source, exclude_feed_id,
                            order_by_date, type, status, latest_id, total_count, create_time)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'searchKeyword', 1, 0, 0, ?8)"#,
                    params![
                        row_id,
                        subscription.user_id,
                        subscription.keyword,
                        subscription.country,
                        subscription.source.as_str(),
                        subscription.exclude_feed_id,
                        subscription.order_by_date,
                        Utc::now().to_rfc3339(),
                    ],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation =>
                    {
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        if !inserted {
            return Err(AppError::AlreadyExists {
                entity: "Subscription",
                id: conflict_id,
            });
        }
        Ok(id)
    }

    /// Soft-disables the active subscription. Returns whether one was found.
    pub async fn disable_subscription(
        &self,
        user_id: &str,
        keyword: &str,
        source: Source,
    ) -> Result<bool> {
        let user = user_id.to_string();
        let keyword = keyword.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE user_subscriptions SET status = ?1, update_time = ?2
                       WHERE user_id = ?3 AND keyword = ?4 AND source = ?5 AND status = 1"#,
                    params![
                        SubscriptionStatus::Disabled.as_i64(),
                        Utc::now().to_rfc3339(),
                        user,
                        keyword,
                        source.as_str(),
                    ],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    /// Active subscriptions of a user, most recently notified first, with the total.
    pub async fn list_user_subscriptions(
        &self,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<Subscription>, i64)> {
        let user = user_id.to_string();
        let page = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {} FROM user_subscriptions
                       WHERE user_id = ?1 AND status = 1
                       ORDER BY latest_id DESC, create_time DESC
                       LIMIT ?2 OFFSET ?3"#,
                    SUBSCRIPTION_COLUMNS
                ))?;
                let subscriptions = stmt
                    .query_map(params![user, limit, offset], subscription_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM user_subscriptions WHERE user_id = ?1 AND status = 1",
                    params![user],
                    |row| row.get(0),
                )?;
                Ok((subscriptions, total))
            })
            .await?;
        Ok(page)
    }

    /// Moves the watermark forward. A value below the stored one is ignored, so
    /// the watermark never goes backward. Returns whether the row changed.
    pub async fn advance_watermark(
        &self,
        subscription_id: &str,
        latest_id: i64,
        update_time: DateTime<Utc>,
        total_count: i64,
    ) -> Result<bool> {
        let id = subscription_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE user_subscriptions
                       SET latest_id = ?1, update_time = ?2, total_count = ?3
                       WHERE id = ?4 AND latest_id <= ?1"#,
                    params![latest_id, update_time.to_rfc3339(), total_count, id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    // Keyword link operations

    /// Bulk insert that skips rows already present under the natural key.
    /// Returns the number of rows actually inserted.
    pub async fn insert_keyword_links(&self, links: Vec<NewKeywordLink>) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR IGNORE INTO keyword_subscriptions
                               (keyword, feed_channel_id, feed_item_id, country, source,
                                exclude_feed_id, create_time)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    )?;
                    for link in &links {
                        let fp = &link.fingerprint;
                        inserted += stmt.execute(params![
                            fp.keyword,
                            link.feed_channel_id,
                            link.feed_item_id,
                            fp.country,
                            fp.source.as_str(),
                            fp.exclude_feed_ids,
                            link.create_time.to_rfc3339(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    /// Number of links for `fingerprint` with an id above `after_id`.
    pub async fn count_links(&self, fingerprint: &Fingerprint, after_id: i64) -> Result<i64> {
        let fp = fingerprint.clone();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    r#"SELECT COUNT(*) FROM keyword_subscriptions
                       WHERE keyword = ?1 AND source = ?2 AND country = ?3
                         AND exclude_feed_id = ?4 AND id > ?5"#,
                    params![fp.keyword, fp.source.as_str(), fp.country, fp.exclude_feed_ids, after_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// The most recently inserted link for `fingerprint`.
    pub async fn latest_link(&self, fingerprint: &Fingerprint) -> Result<Option<KeywordLink>> {
        let fp = fingerprint.clone();
        let link = self
            .conn
            .call(move |conn| {
                let link = conn
                    .query_row(
                        &format!(
                            r#"SELECT {} FROM keyword_subscriptions
                               WHERE keyword = ?1 AND source = ?2 AND country = ?3
                                 AND exclude_feed_id = ?4
                               ORDER BY id DESC
                               LIMIT 1"#,
                            LINK_COLUMNS
                        ),
                        params![fp.keyword, fp.source.as_str(), fp.country, fp.exclude_feed_ids],
                        link_from_row,
                    )
                    .optional()?;
                Ok(link)
            })
            .await?;
        Ok(link)
    }

    /// Feed items linked to the user's active subscription for `fingerprint`
    /// through links with an id above `after_id`, newest publication first.
    pub async fn items_beyond(
        &self,
        user_id: &str,
        fingerprint: &Fingerprint,
        after_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<FeedItem>> {
        let user = user_id.to_string();
        let fp = fingerprint.clone();
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {}
                       FROM feed_items fi
                       INNER JOIN keyword_subscriptions ks ON fi.id = ks.feed_item_id
                       INNER JOIN user_subscriptions us ON (
                           us.keyword = ks.keyword AND us.country = ks.country
                           AND us.exclude_feed_id = ks.exclude_feed_id AND us.source = ks.source)
                       WHERE us.user_id = ?1 AND us.keyword = ?2 AND us.source = ?3
                         AND us.country = ?4 AND us.exclude_feed_id = ?5
                         AND ks.id > ?6 AND us.status = 1
                       ORDER BY fi.pub_date DESC NULLS LAST, ks.id DESC
                       LIMIT ?7 OFFSET ?8"#,
                    FEED_ITEM_COLUMNS
                ))?;
                let items = stmt
                    .query_map(
                        params![
                            user,
                            fp.keyword,
                            fp.source.as_str(),
                            fp.country,
                            fp.exclude_feed_ids,
                            after_id,
                            limit,
                            offset,
                        ],
                        feed_item_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    // Feed item operations

    /// Bulk insert; rows whose id already exists get their descriptive fields
    /// overwritten. `input_date` keeps the first sighting.
    pub async fn upsert_feed_items(&self, items: Vec<FeedItem>) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut written = 0;
                {
                    let mut stmt = tx.prepare(&format!(
                        r#"INSERT INTO feed_items ({})
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                                   ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)
                           ON CONFLICT(id) DO UPDATE SET
                               feed_id = excluded.feed_id,
                               channel_id = excluded.channel_id,
                               feed_link = excluded.feed_link,
                               channel_title = excluded.channel_title,
                               guid = excluded.guid,
                               title = excluded.title,
                               link = excluded.link,
                               pub_date = excluded.pub_date,
                               author = excluded.author,
                               image_url = excluded.image_url,
                               enclosure_url = excluded.enclosure_url,
                               enclosure_type = excluded.enclosure_type,
                               enclosure_length = excluded.enclosure_length,
                               duration = excluded.duration,
                               episode = excluded.episode,
                               season = excluded.season,
                               explicit = excluded.explicit,
                               episode_type = excluded.episode_type,
                               description = excluded.description,
                               source = excluded.source"#,
                        FEED_ITEM_COLUMNS.replace("fi.", "")
                    ))?;
                    for item in &items {
                        written += stmt.execute(params_from_iter(feed_item_params(item)))?;
                    }
                }
                tx.commit()?;
                Ok(written)
            })
            .await?;
        Ok(written)
    }

    /// Single-row upsert: read by id, then insert or update. Returns true when
    /// the row was created. The check and the write are not atomic; a lost race
    /// is overwritten with equivalent data on the next sighting.
    pub async fn upsert_feed_item(&self, item: FeedItem) -> Result<bool> {
        let created = self
            .conn
            .call(move |conn| {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM feed_items WHERE id = ?1",
                        params![item.id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();

                if exists {
                    conn.execute(
                        r#"UPDATE feed_items SET
                               feed_id = ?2, channel_id = ?3, feed_link = ?4, channel_title = ?5,
                               guid = ?6, title = ?7, link = ?8, pub_date = ?9, author = ?10,
                               image_url = ?12, enclosure_url = ?13, enclosure_type = ?14,
                               enclosure_length = ?15, duration = ?16, episode = ?17, season = ?18,
                               explicit = ?19, episode_type = ?20, description = ?21, source = ?22
                           WHERE id = ?1"#,
                        params_from_iter(feed_item_params(&item)),
                    )?;
                } else {
                    conn.execute(
                        &format!(
                            r#"INSERT INTO feed_items ({})
                               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                                       ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"#,
                            FEED_ITEM_COLUMNS.replace("fi.", "")
                        ),
                        params_from_iter(feed_item_params(&item)),
                    )?;
                }
                Ok(!exists)
            })
            .await?;
        Ok(created)
    }

    #[cfg(test)]
    pub async fn get_feed_item(&self, id: &str) -> Result<Option<FeedItem>> {
        let key = id.to_string();
        let item = self
            .conn
            .call(move |conn| {
                let item = conn
                    .query_row(
                        &format!("SELECT {} FROM feed_items fi WHERE fi.id = ?1", FEED_ITEM_COLUMNS),
                        params![key],
                        feed_item_from_row,
                    )
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    #[cfg(test)]
    pub async fn execute_batch(&self, sql: &'static str) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn count_rows(&self, table: &'static str) -> Result<i64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn feed_item_params(item: &FeedItem) -> Vec<Box<dyn rusqlite::ToSql>> {
    vec![
        Box::new(item.id.clone()),
        Box::new(item.feed_id.clone()),
        Box::new(item.channel_id.clone()),
        Box::new(item.feed_link.clone()),
        Box::new(item.channel_title.clone()),
        Box::new(item.guid.clone()),
        Box::new(item.title.clone()),
        Box::new(item.link.clone()),
        Box::new(item.pub_date.map(|dt| dt.to_rfc3339())),
        Box::new(item.author.clone()),
        Box::new(item.input_date.to_rfc3339()),
        Box::new(item.image_url.clone()),
        Box::new(item.enclosure_url.clone()),
        Box::new(item.enclosure_type.clone()),
        Box::new(item.enclosure_length.clone()),
        Box::new(item.duration.clone()),
        Box::new(item.episode.clone()),
        Box::new(item.season.clone()),
        Box::new(item.explicit.clone()),
        Box::new(item.episode_type.clone()),
        Box::new(item.description.clone()),
        Box::new(item.source.as_str()),
    ]
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn required_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

fn optional_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn source_column(row: &Row, idx: usize) -> rusqlite::Result<Source> {
    let raw: String = row.get(idx)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        tracing::warn!("Unknown source {:?} in store, reading as itunes", raw);
        Source::Itunes
    }))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        nickname: row.get(1)?,
        email: row.get(2)?,
        telegram_id: row.get(3)?,
        reg_date: required_datetime(row, 4)?,
    })
}

fn subscription_from_row(row: &Row) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        keyword: row.get(2)?,
        country: row.get(3)?,
        source: source_column(row, 4)?,
        exclude_feed_id: row.get(5)?,
        order_by_date: row.get(6)?,
        kind: row.get(7)?,
        status: SubscriptionStatus::from_i64(row.get(8)?),
        latest_id: row.get(9)?,
        total_count: row.get(10)?,
        create_time: required_datetime(row, 11)?,
        update_time: optional_datetime(row, 12)?,
    })
}

fn link_from_row(row: &Row) -> rusqlite::Result<KeywordLink> {
    Ok(KeywordLink {
        id: row.get(0)?,
        keyword: row.get(1)?,
        feed_channel_id: row.get(2)?,
        feed_item_id: row.get(3)?,
        country: row.get(4)?,
        source: row.get(5)?,
        exclude_feed_id: row.get(6)?,
        create_time: required_datetime(row, 7)?,
    })
}

fn feed_item_from_row(row: &Row) -> rusqlite::Result<FeedItem> {
    Ok(FeedItem {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        channel_id: row.get(2)?,
        feed_link: row.get(3)?,
        channel_title: row.get(4)?,
        guid: row.get(5)?,
        title: row.get(6)?,
        link: row.get(7)?,
        pub_date: optional_datetime(row, 8)?,
        author: row.get(9)?,
        input_date: required_datetime(row, 10)?,
        image_url: row.get(11)?,
        enclosure_url: row.get(12)?,
        enclosure_type: row.get(13)?,
        enclosure_length: row.get(14)?,
        duration: row.get(15)?,
        episode: row.get(16)?,
        season: row.get(17)?,
        explicit: row.get(18)?,
        episode_type: row.get(19)?,
        description: row.get(20)?,
        source: source_column(row, 21)?,
    })
}
