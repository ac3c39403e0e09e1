// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    Episode, EpisodeAssets, EpisodeId, Feed, FeedId, PlayInfo, PreviousListen, User, UserId,
};
use crate::reconcile::{DurationUpdate, LinkUpdate};

pub use sqlite::SqliteStore;

/// One page of a user's aggregated feed
///
/// Filters are applied before the page is sliced, so excluding finished
/// episodes moves page boundaries rather than shrinking pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeFeedQuery {
    pub user_id: UserId,
    /// 1-based
    pub page: u32,
    pub page_size: u32,
    /// Case-insensitive substring matched against title and description
    pub search: Option<String>,
    /// Restrict to one of the user's feeds
    pub feed_id: Option<FeedId>,
    pub include_finished: bool,
}

impl HomeFeedQuery {
    /// Number of entries skipped before this page
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// Storage operations the service is built on
///
/// Implementations must be safe to call concurrently for different feeds.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Fails with `UserAlreadyExists` if the email is taken
    async fn create_user(&self, email: &str) -> Result<User, StoreError>;

    async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError>;

    async fn create_feed(&self, url: &str, cover_art_url: Option<&str>)
    -> Result<Feed, StoreError>;

    /// Create a feed and its first episodes atomically
    ///
    /// Nothing is stored unless every row is written.
    async fn create_feed_with_episodes(
        &self,
        url: &str,
        cover_art_url: Option<&str>,
        episodes: &[EpisodeAssets],
    ) -> Result<(Feed, Vec<EpisodeId>), StoreError>;

    async fn update_feed_cover_art(
        &self,
        feed_id: FeedId,
        cover_art_url: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Fails with `SubscriptionAlreadyExists` instead of overwriting
    async fn create_subscription(&self, user_id: UserId, feed_id: FeedId)
    -> Result<(), StoreError>;

    async fn is_subscribed(&self, user_id: UserId, feed_id: FeedId) -> Result<bool, StoreError>;

    async fn list_subscribed_feeds(&self, user_id: UserId) -> Result<Vec<Feed>, StoreError>;

    async fn list_all_feeds(&self) -> Result<Vec<Feed>, StoreError>;

    /// Most recently published episode; `EpisodeNotFound` for an empty feed
    async fn get_latest_episode_by_feed(&self, feed_id: FeedId) -> Result<Episode, StoreError>;

    /// Every stored episode of a feed, newest first
    async fn list_episodes_by_feed(&self, feed_id: FeedId) -> Result<Vec<Episode>, StoreError>;

    /// Insert each entry as a new episode with a freshly generated id
    async fn insert_episodes(
        &self,
        feed_id: FeedId,
        episodes: &[EpisodeAssets],
    ) -> Result<Vec<EpisodeId>, StoreError>;

    /// Returns the number of episodes whose link changed
    async fn update_episode_links(
        &self,
        feed_id: FeedId,
        updates: &[LinkUpdate],
    ) -> Result<u64, StoreError>;

    /// Returns the number of episodes whose duration changed
    async fn update_episode_durations(
        &self,
        feed_id: FeedId,
        updates: &[DurationUpdate],
    ) -> Result<u64, StoreError>;

    /// Newest first, ties broken by episode id
    async fn query_home_feed(&self, query: &HomeFeedQuery) -> Result<Vec<PlayInfo>, StoreError>;

    /// Only resolves episodes of feeds the user is subscribed to
    async fn get_episode(
        &self,
        episode_id: EpisodeId,
        user_id: UserId,
    ) -> Result<Episode, StoreError>;

    /// Last writer wins
    async fn upsert_play_position(
        &self,
        user_id: UserId,
        episode_id: EpisodeId,
        seconds: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_play_position(
        &self,
        user_id: UserId,
        episode_id: EpisodeId,
    ) -> Result<Option<PreviousListen>, StoreError>;

    /// The most recently updated play position across all episodes
    async fn get_latest_play_position(
        &self,
        user_id: UserId,
    ) -> Result<Option<PlayInfo>, StoreError>;
}
