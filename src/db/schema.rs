pub const SCHEMA: &str = r#"
-- users table (owned by the account service, read here)
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    nickname TEXT,
    email TEXT,
    telegram_id TEXT,
    reg_date TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%S+00:00', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_users_telegram_id ON users(telegram_id);

-- user_subscriptions table
CREATE TABLE IF NOT EXISTS user_subscriptions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    keyword TEXT NOT NULL,
    country TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT 'itunes',
    exclude_feed_id TEXT NOT NULL DEFAULT '',
    order_by_date INTEGER NOT NULL DEFAULT 0,
    type TEXT NOT NULL DEFAULT 'searchKeyword',
    status INTEGER NOT NULL DEFAULT 1,
    latest_id INTEGER NOT NULL DEFAULT 0,
    total_count INTEGER NOT NULL DEFAULT 0,
    create_time TEXT NOT NULL,
    update_time TEXT
);

-- one active subscription per (user, keyword, source)
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_subscriptions_active
    ON user_subscriptions(user_id, keyword, source) WHERE status = 1;
CREATE INDEX IF NOT EXISTS idx_user_subscriptions_status ON user_subscriptions(status);
CREATE INDEX IF NOT EXISTS idx_user_subscriptions_fingerprint
    ON user_subscriptions(keyword, source, country, exclude_feed_id);

-- feed_items table
CREATE TABLE IF NOT EXISTS feed_items (
    id TEXT PRIMARY KEY,
    feed_id TEXT NOT NULL DEFAULT '',
    channel_id TEXT NOT NULL,
    feed_link TEXT NOT NULL DEFAULT '',
    channel_title TEXT NOT NULL DEFAULT '',
    guid TEXT NOT NULL DEFAULT '',
    title TEXT NOT NULL DEFAULT '',
    link TEXT NOT NULL DEFAULT '',
    pub_date TEXT,
    author TEXT NOT NULL DEFAULT '',
    input_date TEXT NOT NULL,
    image_url TEXT NOT NULL DEFAULT '',
    enclosure_url TEXT NOT NULL DEFAULT '',
    enclosure_type TEXT NOT NULL DEFAULT '',
    enclosure_length TEXT NOT NULL DEFAULT '',
    duration TEXT NOT NULL DEFAULT '',
    episode TEXT NOT NULL DEFAULT '',
    season TEXT NOT NULL DEFAULT '',
    explicit TEXT NOT NULL DEFAULT '',
    episode_type TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT 'itunes'
);

CREATE INDEX IF NOT EXISTS idx_feed_items_pub_date ON feed_items(pub_date DESC);
CREATE INDEX IF NOT EXISTS idx_feed_items_channel_id ON feed_items(channel_id);

-- keyword_subscriptions table: which items a fingerprint's search has returned
CREATE TABLE IF NOT EXISTS keyword_subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword TEXT NOT NULL,
    feed_channel_id TEXT NOT NULL,
    feed_item_id TEXT NOT NULL,
    country TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT 'itunes',
    exclude_feed_id TEXT NOT NULL DEFAULT '',
    create_time TEXT NOT NULL,
    UNIQUE(keyword, feed_item_id, source, country, exclude_feed_id)
);

CREATE INDEX IF NOT EXISTS idx_keyword_subscriptions_fingerprint
    ON keyword_subscriptions(keyword, source, country, exclude_feed_id, id);
"#;
