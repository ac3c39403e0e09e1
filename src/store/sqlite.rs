// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};

use crate::error::StoreError;
use crate::matching::EpisodeKey;
use crate::model::{
    Episode, EpisodeAssets, EpisodeId, Feed, FeedId, PlayInfo, PreviousListen, User, UserId,
};
use crate::reconcile::{DurationUpdate, LinkUpdate};

use super::{HomeFeedQuery, Store};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feeds (
        id TEXT PRIMARY KEY NOT NULL,
        url TEXT NOT NULL UNIQUE,
        cover_art_url TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        user_id TEXT NOT NULL REFERENCES users(id),
        feed_id TEXT NOT NULL REFERENCES feeds(id),
        PRIMARY KEY (user_id, feed_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS episodes (
        id TEXT PRIMARY KEY NOT NULL,
        feed_id TEXT NOT NULL REFERENCES feeds(id),
        title TEXT NOT NULL,
        description TEXT,
        download_link TEXT,
        published_at INTEGER NOT NULL,
        duration_secs INTEGER,
        search_text TEXT NOT NULL DEFAULT ''
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_episodes_feed_title ON episodes(feed_id, title)",
    "CREATE INDEX IF NOT EXISTS idx_episodes_published ON episodes(published_at DESC, id DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS previous_listens (
        user_id TEXT NOT NULL REFERENCES users(id),
        episode_id TEXT NOT NULL REFERENCES episodes(id),
        seconds INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, episode_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_previous_listens_recent \
     ON previous_listens(user_id, updated_at DESC)",
];

macro_rules! episode_columns {
    () => {
        "e.id, e.feed_id, e.title, e.description, e.download_link, e.published_at, \
         e.duration_secs, f.cover_art_url"
    };
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and ensure the schema exists
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database, gone once the store is dropped
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and ensure the schema exists
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id, email FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.into_user(),
            None => Err(StoreError::UnknownUser {
                email: email.to_string(),
            }),
        }
    }

    async fn create_user(&self, email: &str) -> Result<User, StoreError> {
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
        };

        let result =
            sqlx::query("INSERT INTO users (id, email) VALUES (?, ?) ON CONFLICT(email) DO NOTHING")
                .bind(user.id.to_string())
                .bind(&user.email)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserAlreadyExists { email: user.email });
        }
        Ok(user)
    }

    async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedRow> =
            sqlx::query_as("SELECT id, url, cover_art_url FROM feeds WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;

        row.map(FeedRow::into_feed).transpose()
    }

    async fn create_feed(
        &self,
        url: &str,
        cover_art_url: Option<&str>,
    ) -> Result<Feed, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_feed_row(&mut conn, url, cover_art_url).await
    }

    async fn create_feed_with_episodes(
        &self,
        url: &str,
        cover_art_url: Option<&str>,
        episodes: &[EpisodeAssets],
    ) -> Result<(Feed, Vec<EpisodeId>), StoreError> {
        let mut tx = self.pool.begin().await?;
        let feed = insert_feed_row(&mut tx, url, cover_art_url).await?;
        let ids = insert_episode_rows(&mut tx, feed.id, episodes).await?;
        tx.commit().await?;
        Ok((feed, ids))
    }

    async fn update_feed_cover_art(
        &self,
        feed_id: FeedId,
        cover_art_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE feeds SET cover_art_url = ? WHERE id = ?")
            .bind(cover_art_url)
            .bind(feed_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        user_id: UserId,
        feed_id: FeedId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO subscriptions (user_id, feed_id) VALUES (?, ?) \
             ON CONFLICT(user_id, feed_id) DO NOTHING",
        )
        .bind(user_id.to_string())
        .bind(feed_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SubscriptionAlreadyExists { user_id, feed_id });
        }
        Ok(())
    }

    async fn is_subscribed(&self, user_id: UserId, feed_id: FeedId) -> Result<bool, StoreError> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = ? AND feed_id = ?)",
        )
        .bind(user_id.to_string())
        .bind(feed_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    async fn list_subscribed_feeds(&self, user_id: UserId) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            "SELECT f.id, f.url, f.cover_art_url FROM feeds f \
             JOIN subscriptions s ON s.feed_id = f.id \
             WHERE s.user_id = ? ORDER BY f.url",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FeedRow::into_feed).collect()
    }

    async fn list_all_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedRow> =
            sqlx::query_as("SELECT id, url, cover_art_url FROM feeds ORDER BY url")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(FeedRow::into_feed).collect()
    }

    async fn get_latest_episode_by_feed(&self, feed_id: FeedId) -> Result<Episode, StoreError> {
        let row: Option<EpisodeRow> = sqlx::query_as(concat!(
            "SELECT ",
            episode_columns!(),
            " FROM episodes e JOIN feeds f ON f.id = e.feed_id \
             WHERE e.feed_id = ? ORDER BY e.published_at DESC, e.id DESC LIMIT 1"
        ))
        .bind(feed_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_episode(),
            None => Err(StoreError::EpisodeNotFound(format!(
                "no episodes in feed {feed_id}"
            ))),
        }
    }

    async fn list_episodes_by_feed(&self, feed_id: FeedId) -> Result<Vec<Episode>, StoreError> {
        let rows: Vec<EpisodeRow> = sqlx::query_as(concat!(
            "SELECT ",
            episode_columns!(),
            " FROM episodes e JOIN feeds f ON f.id = e.feed_id \
             WHERE e.feed_id = ? ORDER BY e.published_at DESC, e.id DESC"
        ))
        .bind(feed_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EpisodeRow::into_episode).collect()
    }

    async fn insert_episodes(
        &self,
        feed_id: FeedId,
        episodes: &[EpisodeAssets],
    ) -> Result<Vec<EpisodeId>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let ids = insert_episode_rows(&mut tx, feed_id, episodes).await?;
        tx.commit().await?;
        Ok(ids)
    }

    async fn update_episode_links(
        &self,
        feed_id: FeedId,
        updates: &[LinkUpdate],
    ) -> Result<u64, StoreError> {
        let mut changed = 0;
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let EpisodeKey::Title(title) = &update.key;
            let affected = sqlx::query(
                "UPDATE episodes SET download_link = ? \
                 WHERE feed_id = ? AND title = ? AND download_link IS NOT ?",
            )
            .bind(&update.value)
            .bind(feed_id.to_string())
            .bind(title)
            .bind(&update.value)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if affected > 1 {
                tracing::warn!(
                    %feed_id,
                    %title,
                    rows = affected,
                    "link update applied to several episodes sharing a title"
                );
            }
            changed += affected;
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn update_episode_durations(
        &self,
        feed_id: FeedId,
        updates: &[DurationUpdate],
    ) -> Result<u64, StoreError> {
        let mut changed = 0;
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let EpisodeKey::Title(title) = &update.key;
            let duration = i64::from(update.value);
            let affected = sqlx::query(
                "UPDATE episodes SET duration_secs = ? \
                 WHERE feed_id = ? AND title = ? AND duration_secs IS NOT ?",
            )
            .bind(duration)
            .bind(feed_id.to_string())
            .bind(title)
            .bind(duration)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if affected > 1 {
                tracing::warn!(
                    %feed_id,
                    %title,
                    rows = affected,
                    "duration update applied to several episodes sharing a title"
                );
            }
            changed += affected;
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn query_home_feed(&self, query: &HomeFeedQuery) -> Result<Vec<PlayInfo>, StoreError> {
        // search_text is folded on insert; SQLite's lower() only knows ASCII.
        let search = query.search.as_ref().map(|s| s.to_lowercase());
        let feed_id = query.feed_id.map(|id| id.to_string());
        let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);

        let rows: Vec<PlayInfoRow> = sqlx::query_as(concat!(
            "SELECT ",
            episode_columns!(),
            ", pl.seconds AS listen_seconds, pl.updated_at AS listen_updated_at \
             FROM episodes e \
             JOIN subscriptions s ON s.feed_id = e.feed_id \
             JOIN feeds f ON f.id = e.feed_id \
             LEFT JOIN previous_listens pl ON pl.episode_id = e.id AND pl.user_id = s.user_id \
             WHERE s.user_id = ? \
             AND (? IS NULL OR e.feed_id = ?) \
             AND (? IS NULL OR instr(e.search_text, ?) > 0) \
             AND (? OR pl.seconds IS NULL OR e.duration_secs IS NULL \
                  OR e.duration_secs - pl.seconds >= ?) \
             ORDER BY e.published_at DESC, e.id DESC \
             LIMIT ? OFFSET ?"
        ))
        .bind(query.user_id.to_string())
        .bind(&feed_id)
        .bind(&feed_id)
        .bind(&search)
        .bind(&search)
        .bind(query.include_finished)
        .bind(i64::from(crate::model::FINISHED_THRESHOLD_SECS))
        .bind(i64::from(query.page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PlayInfoRow::into_play_info).collect()
    }

    async fn get_episode(
        &self,
        episode_id: EpisodeId,
        user_id: UserId,
    ) -> Result<Episode, StoreError> {
        let row: Option<EpisodeRow> = sqlx::query_as(concat!(
            "SELECT ",
            episode_columns!(),
            " FROM episodes e \
             JOIN feeds f ON f.id = e.feed_id \
             JOIN subscriptions s ON s.feed_id = e.feed_id AND s.user_id = ? \
             WHERE e.id = ?"
        ))
        .bind(user_id.to_string())
        .bind(episode_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_episode(),
            None => Err(StoreError::EpisodeNotFound(episode_id.to_string())),
        }
    }

    async fn upsert_play_position(
        &self,
        user_id: UserId,
        episode_id: EpisodeId,
        seconds: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO previous_listens (user_id, episode_id, seconds, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id, episode_id) \
             DO UPDATE SET seconds = excluded.seconds, updated_at = excluded.updated_at",
        )
        .bind(user_id.to_string())
        .bind(episode_id.to_string())
        .bind(i64::from(seconds))
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_play_position(
        &self,
        user_id: UserId,
        episode_id: EpisodeId,
    ) -> Result<Option<PreviousListen>, StoreError> {
        let row: Option<ListenRow> = sqlx::query_as(
            "SELECT seconds, updated_at FROM previous_listens WHERE user_id = ? AND episode_id = ?",
        )
        .bind(user_id.to_string())
        .bind(episode_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| previous_listen(row.seconds, row.updated_at))
            .transpose()
    }

    async fn get_latest_play_position(
        &self,
        user_id: UserId,
    ) -> Result<Option<PlayInfo>, StoreError> {
        let row: Option<PlayInfoRow> = sqlx::query_as(concat!(
            "SELECT ",
            episode_columns!(),
            ", pl.seconds AS listen_seconds, pl.updated_at AS listen_updated_at \
             FROM previous_listens pl \
             JOIN episodes e ON e.id = pl.episode_id \
             JOIN feeds f ON f.id = e.feed_id \
             WHERE pl.user_id = ? \
             ORDER BY pl.updated_at DESC LIMIT 1"
        ))
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PlayInfoRow::into_play_info).transpose()
    }
}

async fn insert_feed_row(
    conn: &mut SqliteConnection,
    url: &str,
    cover_art_url: Option<&str>,
) -> Result<Feed, StoreError> {
    let feed = Feed {
        id: FeedId::new(),
        url: url.to_string(),
        cover_art_url: cover_art_url.map(String::from),
    };

    let result = sqlx::query(
        "INSERT INTO feeds (id, url, cover_art_url) VALUES (?, ?, ?) \
         ON CONFLICT(url) DO NOTHING",
    )
    .bind(feed.id.to_string())
    .bind(&feed.url)
    .bind(&feed.cover_art_url)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::FeedAlreadyExists { url: feed.url });
    }
    Ok(feed)
}

async fn insert_episode_rows(
    conn: &mut SqliteConnection,
    feed_id: FeedId,
    episodes: &[EpisodeAssets],
) -> Result<Vec<EpisodeId>, StoreError> {
    let mut ids = Vec::with_capacity(episodes.len());

    for assets in episodes {
        let id = EpisodeId::new();
        sqlx::query(
            "INSERT INTO episodes \
             (id, feed_id, title, description, download_link, published_at, duration_secs, \
              search_text) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(feed_id.to_string())
        .bind(&assets.title)
        .bind(&assets.description)
        .bind(&assets.download_link)
        .bind(assets.published_at.timestamp_millis())
        .bind(assets.duration_secs.map(i64::from))
        .bind(search_text(assets))
        .execute(&mut *conn)
        .await?;
        ids.push(id);
    }

    Ok(ids)
}

/// Title and description folded with full Unicode lowercasing
fn search_text(assets: &EpisodeAssets) -> String {
    let description = assets.description.as_deref().unwrap_or_default();
    format!("{}\n{}", assets.title, description).to_lowercase()
}

//
// Row types
//

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
}

impl UserRow {
    fn into_user(self) -> Result<User, StoreError> {
        Ok(User {
            id: parse_id("users.id", &self.id)?,
            email: self.email,
        })
    }
}

#[derive(FromRow)]
struct FeedRow {
    id: String,
    url: String,
    cover_art_url: Option<String>,
}

impl FeedRow {
    fn into_feed(self) -> Result<Feed, StoreError> {
        Ok(Feed {
            id: parse_id("feeds.id", &self.id)?,
            url: self.url,
            cover_art_url: self.cover_art_url,
        })
    }
}

#[derive(FromRow)]
struct EpisodeRow {
    id: String,
    feed_id: String,
    title: String,
    description: Option<String>,
    download_link: Option<String>,
    published_at: i64,
    duration_secs: Option<i64>,
    cover_art_url: Option<String>,
}

impl EpisodeRow {
    fn into_episode(self) -> Result<Episode, StoreError> {
        Ok(Episode {
            id: parse_id("episodes.id", &self.id)?,
            feed_id: parse_id("episodes.feed_id", &self.feed_id)?,
            assets: EpisodeAssets {
                title: self.title,
                description: self.description,
                download_link: self.download_link,
                published_at: from_millis("episodes.published_at", self.published_at)?,
                duration_secs: self
                    .duration_secs
                    .map(|d| to_seconds("episodes.duration_secs", d))
                    .transpose()?,
            },
            cover_art_url: self.cover_art_url,
        })
    }
}

#[derive(FromRow)]
struct PlayInfoRow {
    #[sqlx(flatten)]
    episode: EpisodeRow,
    listen_seconds: Option<i64>,
    listen_updated_at: Option<i64>,
}

impl PlayInfoRow {
    fn into_play_info(self) -> Result<PlayInfo, StoreError> {
        let previous_listen = match (self.listen_seconds, self.listen_updated_at) {
            (Some(seconds), Some(updated_at)) => Some(previous_listen(seconds, updated_at)?),
            _ => None,
        };

        Ok(PlayInfo {
            episode: self.episode.into_episode()?,
            previous_listen,
        })
    }
}

#[derive(FromRow)]
struct ListenRow {
    seconds: i64,
    updated_at: i64,
}

fn previous_listen(seconds: i64, updated_at: i64) -> Result<PreviousListen, StoreError> {
    Ok(PreviousListen {
        seconds_listened: to_seconds("previous_listens.seconds", seconds)?,
        updated_at: from_millis("previous_listens.updated_at", updated_at)?,
    })
}

fn parse_id<T: FromStr>(column: &'static str, value: &str) -> Result<T, StoreError> {
    value.parse().map_err(|_| StoreError::CorruptRow {
        column,
        value: value.to_string(),
    })
}

fn from_millis(column: &'static str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::CorruptRow {
        column,
        value: millis.to_string(),
    })
}

fn to_seconds(column: &'static str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::CorruptRow {
        column,
        value: value.to_string(),
    })
}
