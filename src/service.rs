// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::error::{ServiceError, StoreError};
use crate::feed::{FeedFetcher, normalize_feed_url};
use crate::home_feed::{HomeFeed, HomeFeedRequest, assemble_home_feed};
use crate::matching::{EpisodeMatcher, TitleMatcher};
use crate::model::{Episode, EpisodeId, Feed, PlayInfo, Subscription, User, UserId};
use crate::progress::{NoopReporter, RefreshEvent, SharedRefreshReporter};
use crate::reconcile::reconcile;
use crate::store::Store;

/// Options for refreshing feeds
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Maximum number of feeds fetched at once
    pub max_concurrent: usize,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self { max_concurrent: 3 }
    }
}

/// Outcome of refreshing a single feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedRefresh {
    pub inserted: usize,
    pub links_updated: u64,
    pub durations_updated: u64,
    pub cover_art_changed: bool,
    /// Identity keys matching more than one episode in this refresh
    pub ambiguous_keys: usize,
}

/// Result of a refresh over several feeds
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    /// Number of feeds refreshed successfully
    pub refreshed: usize,
    /// Number of new episodes across all feeds
    pub inserted: usize,
    /// Details of failed feeds (url, error message)
    pub failed: Vec<(String, String)>,
}

/// Result of a first-time or repeated subscription
#[derive(Debug, Clone, Serialize)]
pub struct Subscribed {
    pub subscription: Subscription,
    pub feed: Feed,
    /// Episodes imported; zero when the feed was already known
    pub imported: usize,
}

/// Subscription, refresh and playback operations over a store and a fetcher
pub struct PodcastService<S, F> {
    store: S,
    fetcher: F,
    matcher: Arc<dyn EpisodeMatcher>,
    options: RefreshOptions,
    reporter: SharedRefreshReporter,
}

impl<S: Store, F: FeedFetcher> PodcastService<S, F> {
    pub fn new(store: S, fetcher: F) -> Self {
        Self {
            store,
            fetcher,
            matcher: Arc::new(TitleMatcher),
            options: RefreshOptions::default(),
            reporter: NoopReporter::shared(),
        }
    }

    pub fn with_options(mut self, options: RefreshOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reporter(mut self, reporter: SharedRefreshReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn EpisodeMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    //
    // Users
    //

    pub async fn find_user_by_email(&self, email: &str) -> Result<User, ServiceError> {
        Ok(self.store.get_user_by_email(email).await?)
    }

    pub async fn create_user(&self, email: &str) -> Result<User, ServiceError> {
        Ok(self.store.create_user(email).await?)
    }

    //
    // Subscriptions
    //

    /// Subscribe a user to a feed URL
    ///
    /// A URL new to the system is fetched and imported in full before the
    /// subscription is created. A known URL joins the existing feed without
    /// fetching. Fetch failures propagate.
    pub async fn subscribe(&self, user_id: UserId, url: &str) -> Result<Subscribed, ServiceError> {
        let url = normalize_feed_url(url)?;

        let (feed, imported) = match self.store.get_feed_by_url(&url).await? {
            Some(feed) => (feed, 0),
            None => self.import_new_feed(&url).await?,
        };

        self.store.create_subscription(user_id, feed.id).await?;
        tracing::info!(user_id = %user_id, feed_id = %feed.id, %url, imported, "subscribed");

        Ok(Subscribed {
            subscription: Subscription {
                user_id,
                feed_id: feed.id,
            },
            feed,
            imported,
        })
    }

    async fn import_new_feed(&self, url: &str) -> Result<(Feed, usize), ServiceError> {
        self.reporter.report(RefreshEvent::FetchingFeed {
            url: url.to_string(),
        });
        let imported = self.fetcher.import_feed(url).await?;

        let created = self
            .store
            .create_feed_with_episodes(url, imported.cover_art_url.as_deref(), &imported.episodes)
            .await;
        let (feed, ids) = match created {
            Ok(created) => created,
            // Another subscriber imported the same URL meanwhile
            Err(StoreError::FeedAlreadyExists { .. }) => {
                let existing = self.store.get_feed_by_url(url).await?;
                return match existing {
                    Some(feed) => Ok((feed, 0)),
                    None => Err(StoreError::FeedAlreadyExists {
                        url: url.to_string(),
                    }
                    .into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            feed_id = %feed.id,
            title = %imported.title,
            episodes = ids.len(),
            "imported feed"
        );

        Ok((feed, ids.len()))
    }

    //
    // Refresh
    //

    /// Fetch a feed and apply the delta against its stored episodes
    ///
    /// Must not run concurrently for the same feed.
    pub async fn refresh_one(&self, feed: &Feed) -> Result<FeedRefresh, ServiceError> {
        self.reporter.report(RefreshEvent::FetchingFeed {
            url: feed.url.clone(),
        });
        let imported = self.fetcher.import_feed(&feed.url).await?;

        let mut outcome = FeedRefresh::default();

        if imported.cover_art_url.is_some() && imported.cover_art_url != feed.cover_art_url {
            self.store
                .update_feed_cover_art(feed.id, imported.cover_art_url.as_deref())
                .await?;
            outcome.cover_art_changed = true;
        }

        let stored = self.store.list_episodes_by_feed(feed.id).await?;
        let plan = reconcile(feed.id, &stored, imported.episodes, self.matcher.as_ref());
        outcome.ambiguous_keys = plan.ambiguous_keys.len();

        if !plan.to_insert.is_empty() {
            outcome.inserted = self
                .store
                .insert_episodes(feed.id, &plan.to_insert)
                .await?
                .len();
        }
        if !plan.link_updates.is_empty() {
            outcome.links_updated = self
                .store
                .update_episode_links(feed.id, &plan.link_updates)
                .await?;
        }
        if !plan.duration_updates.is_empty() {
            outcome.durations_updated = self
                .store
                .update_episode_durations(feed.id, &plan.duration_updates)
                .await?;
        }

        self.reporter.report(RefreshEvent::FeedRefreshed {
            url: feed.url.clone(),
            inserted: outcome.inserted,
            links_updated: outcome.links_updated,
            durations_updated: outcome.durations_updated,
        });

        Ok(outcome)
    }

    /// Refresh every known feed, regardless of subscriptions
    pub async fn refresh_all(&self) -> Result<RefreshSummary, ServiceError> {
        let feeds = self.store.list_all_feeds().await?;
        Ok(self.refresh_feeds(feeds).await)
    }

    /// Refresh the feeds a user is subscribed to
    pub async fn refresh_for_user(&self, user_id: UserId) -> Result<RefreshSummary, ServiceError> {
        let feeds = self.store.list_subscribed_feeds(user_id).await?;
        Ok(self.refresh_feeds(feeds).await)
    }

    /// Refresh feeds concurrently; a failing feed is reported and skipped
    async fn refresh_feeds(&self, feeds: Vec<Feed>) -> RefreshSummary {
        self.reporter.report(RefreshEvent::RefreshStarting {
            total_feeds: feeds.len(),
        });

        let results: Vec<_> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.refresh_one(&feed).await;
                (feed, result)
            })
            .buffer_unordered(self.options.max_concurrent.max(1))
            .collect()
            .await;

        let mut summary = RefreshSummary::default();
        for (feed, result) in results {
            match result {
                Ok(outcome) => {
                    summary.refreshed += 1;
                    summary.inserted += outcome.inserted;
                }
                Err(e) => {
                    tracing::warn!(
                        feed_id = %feed.id,
                        url = %feed.url,
                        error = %e,
                        "feed refresh failed"
                    );
                    self.reporter.report(RefreshEvent::FeedFailed {
                        url: feed.url.clone(),
                        error: e.to_string(),
                    });
                    summary.failed.push((feed.url, e.to_string()));
                }
            }
        }

        self.reporter.report(RefreshEvent::RefreshCompleted {
            refreshed: summary.refreshed,
            inserted: summary.inserted,
            failed: summary.failed.len(),
        });

        summary
    }

    //
    // Reading and playback
    //

    pub async fn home_feed(
        &self,
        user_id: UserId,
        request: &HomeFeedRequest,
    ) -> Result<HomeFeed, ServiceError> {
        assemble_home_feed(&self.store, user_id, request).await
    }

    /// An episode of one of the user's feeds
    pub async fn get_episode(
        &self,
        user_id: UserId,
        episode_id: EpisodeId,
    ) -> Result<Episode, ServiceError> {
        Ok(self.store.get_episode(episode_id, user_id).await?)
    }

    /// An episode together with the user's saved position in it
    pub async fn play_info(
        &self,
        user_id: UserId,
        episode_id: EpisodeId,
    ) -> Result<PlayInfo, ServiceError> {
        let episode = self.store.get_episode(episode_id, user_id).await?;
        let previous_listen = self.store.get_play_position(user_id, episode_id).await?;
        Ok(PlayInfo {
            episode,
            previous_listen,
        })
    }

    /// Save the user's position in an episode they can access; last write wins
    pub async fn update_play_position(
        &self,
        user_id: UserId,
        episode_id: EpisodeId,
        seconds: u32,
    ) -> Result<(), ServiceError> {
        self.store.get_episode(episode_id, user_id).await?;
        self.store
            .upsert_play_position(user_id, episode_id, seconds, Utc::now())
            .await?;
        tracing::debug!(
            user_id = %user_id,
            episode_id = %episode_id,
            seconds,
            "play position saved"
        );
        Ok(())
    }

    /// The episode the user most recently listened to, if any
    pub async fn latest_play_info(
        &self,
        user_id: UserId,
    ) -> Result<Option<PlayInfo>, ServiceError> {
        Ok(self.store.get_latest_play_position(user_id).await?)
    }
}
