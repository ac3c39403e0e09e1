// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Serialize;

use crate::error::{ServiceError, StoreError};
use crate::model::{FeedId, PlayInfo, UserId};
use crate::store::{HomeFeedQuery, Store};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Parameters of a home feed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeFeedRequest {
    /// 1-based; 0 is rejected
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
    pub include_finished: bool,
    pub feed_id: Option<FeedId>,
}

impl Default for HomeFeedRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            search: None,
            include_finished: false,
            feed_id: None,
        }
    }
}

impl HomeFeedRequest {
    /// First page with default settings
    pub fn first_page() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn include_finished(mut self, include: bool) -> Self {
        self.include_finished = include;
        self
    }

    pub fn feed(mut self, feed_id: FeedId) -> Self {
        self.feed_id = Some(feed_id);
        self
    }
}

/// One page of the home feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HomeFeed {
    pub page: u32,
    pub entries: Vec<PlayInfo>,
    /// Set when this page was full, so another page may follow
    pub next_page: Option<u32>,
}

/// Assemble one page of a user's home feed
///
/// Finished episodes are excluded before the page is sliced, so every page
/// but the last holds exactly `page_size` entries.
pub async fn assemble_home_feed<S: Store + ?Sized>(
    store: &S,
    user_id: UserId,
    request: &HomeFeedRequest,
) -> Result<HomeFeed, ServiceError> {
    if request.page == 0 {
        return Err(ServiceError::InvalidPage { page: request.page });
    }
    if request.page_size == 0 {
        return Err(ServiceError::InvalidPageSize {
            page_size: request.page_size,
        });
    }

    if let Some(feed_id) = request.feed_id
        && !store.is_subscribed(user_id, feed_id).await?
    {
        return Err(StoreError::SubscriptionNotFound { user_id, feed_id }.into());
    }

    let query = HomeFeedQuery {
        user_id,
        page: request.page,
        page_size: request.page_size,
        search: normalize_search(request.search.as_deref()),
        feed_id: request.feed_id,
        include_finished: request.include_finished,
    };

    let entries = store.query_home_feed(&query).await?;
    tracing::debug!(
        user_id = %user_id,
        page = request.page,
        entries = entries.len(),
        "assembled home feed"
    );

    let page_is_full = u32::try_from(entries.len()).is_ok_and(|n| n >= request.page_size);
    Ok(HomeFeed {
        page: request.page,
        next_page: page_is_full.then(|| request.page.saturating_add(1)),
        entries,
    })
}

/// Trimmed, lowercased search term; blank terms disable the filter
fn normalize_search(term: Option<&str>) -> Option<String> {
    let term = term?.trim();
    if term.is_empty() {
        None
    } else {
        Some(term.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EpisodeAssets, Feed, User};
    use crate::store::SqliteStore;
    use chrono::{DateTime, TimeZone, Utc};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, d, 0, 0, 0).unwrap()
    }

    fn make_assets(title: &str, published: u32) -> EpisodeAssets {
        EpisodeAssets {
            title: title.to_string(),
            description: None,
            download_link: Some(format!("https://example.com/{title}.mp3")),
            published_at: day(published),
            duration_secs: None,
        }
    }

    async fn setup() -> (SqliteStore, User, Feed) {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.create_user("alice@example.com").await.unwrap();
        let feed = store
            .create_feed("https://example.com/a.xml", None)
            .await
            .unwrap();
        store.create_subscription(user.id, feed.id).await.unwrap();
        (store, user, feed)
    }

    fn titles(feed: &HomeFeed) -> Vec<&str> {
        feed.entries
            .iter()
            .map(|p| p.episode.assets.title.as_str())
            .collect()
    }

    #[test]
    fn default_request_is_first_page_of_ten() {
        let request = HomeFeedRequest::default();
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, 10);
        assert!(!request.include_finished);
        assert!(request.search.is_none());
    }

    #[test]
    fn blank_search_disables_filter() {
        assert_eq!(normalize_search(None), None);
        assert_eq!(normalize_search(Some("   ")), None);
        assert_eq!(normalize_search(Some(" Apple ")), Some("apple".to_string()));
        assert_eq!(normalize_search(Some("ÄPFEL")), Some("äpfel".to_string()));
    }

    #[tokio::test]
    async fn page_zero_is_rejected() {
        let (store, user, _) = setup().await;

        let result =
            assemble_home_feed(&store, user.id, &HomeFeedRequest::first_page().page(0)).await;

        assert!(matches!(result, Err(ServiceError::InvalidPage { page: 0 })));
    }

    #[tokio::test]
    async fn page_size_zero_is_rejected() {
        let (store, user, _) = setup().await;

        let result =
            assemble_home_feed(&store, user.id, &HomeFeedRequest::first_page().page_size(0)).await;

        assert!(matches!(
            result,
            Err(ServiceError::InvalidPageSize { page_size: 0 })
        ));
    }

    #[tokio::test]
    async fn pages_are_non_increasing_across_boundaries() {
        let (store, user, feed) = setup().await;
        let episodes: Vec<_> = (1..=7).map(|d| make_assets(&format!("Ep{d}"), d)).collect();
        store.insert_episodes(feed.id, &episodes).await.unwrap();

        let mut all = Vec::new();
        let mut request = HomeFeedRequest::first_page().page_size(3);
        loop {
            let page = assemble_home_feed(&store, user.id, &request).await.unwrap();
            all.extend(page.entries.iter().map(|p| p.episode.assets.published_at));
            match page.next_page {
                Some(next) => request = request.page(next),
                None => break,
            }
        }

        assert_eq!(all.len(), 7);
        assert!(all.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn full_last_page_points_at_an_empty_page() {
        let (store, user, feed) = setup().await;
        store
            .insert_episodes(feed.id, &[make_assets("Ep1", 1), make_assets("Ep2", 2)])
            .await
            .unwrap();

        let first = assemble_home_feed(&store, user.id, &HomeFeedRequest::first_page().page_size(2))
            .await
            .unwrap();
        let second = assemble_home_feed(
            &store,
            user.id,
            &HomeFeedRequest::first_page().page_size(2).page(2),
        )
        .await
        .unwrap();

        assert_eq!(first.next_page, Some(2));
        assert!(second.entries.is_empty());
        assert_eq!(second.next_page, None);
    }

    #[tokio::test]
    async fn search_is_case_insensitive_over_descriptions() {
        let (store, user, feed) = setup().await;
        let mut first = make_assets("Fruit", 1);
        first.description = Some("about bananas and apples".to_string());
        let mut second = make_assets("More fruit", 2);
        second.description = Some("about oranges".to_string());
        store
            .insert_episodes(feed.id, &[first, second])
            .await
            .unwrap();

        let request = HomeFeedRequest::first_page().search("APPLE");
        let page = assemble_home_feed(&store, user.id, &request).await.unwrap();

        assert_eq!(titles(&page), vec!["Fruit"]);
    }

    #[tokio::test]
    async fn search_folds_non_ascii_letters() {
        let (store, user, feed) = setup().await;
        let mut special = make_assets("Émission spéciale", 1);
        special.description = Some("ÜBER ÄPFEL".to_string());
        store
            .insert_episodes(feed.id, &[special, make_assets("Plain", 2)])
            .await
            .unwrap();

        for term in ["émission", "ÉMISSION", "äpfel", "Über"] {
            let request = HomeFeedRequest::first_page().search(term);
            let page = assemble_home_feed(&store, user.id, &request).await.unwrap();
            assert_eq!(titles(&page), vec!["Émission spéciale"], "term {term:?}");
        }
    }

    #[tokio::test]
    async fn finished_filter_respects_threshold() {
        let (store, user, feed) = setup().await;
        let mut finished = make_assets("Finished", 2);
        finished.duration_secs = Some(7200);
        let mut in_progress = make_assets("In progress", 1);
        in_progress.duration_secs = Some(7200);
        let ids = store
            .insert_episodes(feed.id, &[finished, in_progress])
            .await
            .unwrap();
        store
            .upsert_play_position(user.id, ids[0], 7185, Utc::now())
            .await
            .unwrap();
        store
            .upsert_play_position(user.id, ids[1], 7100, Utc::now())
            .await
            .unwrap();

        let hidden = assemble_home_feed(&store, user.id, &HomeFeedRequest::default())
            .await
            .unwrap();
        let shown = assemble_home_feed(
            &store,
            user.id,
            &HomeFeedRequest::first_page().include_finished(true),
        )
        .await
        .unwrap();

        assert_eq!(titles(&hidden), vec!["In progress"]);
        assert_eq!(titles(&shown), vec!["Finished", "In progress"]);
        assert!(shown.entries[0].is_finished());
    }

    #[tokio::test]
    async fn feed_filter_requires_subscription() {
        let (store, user, feed) = setup().await;
        let foreign = store
            .create_feed("https://example.com/b.xml", None)
            .await
            .unwrap();
        store
            .insert_episodes(feed.id, &[make_assets("Mine", 1)])
            .await
            .unwrap();

        let own = assemble_home_feed(&store, user.id, &HomeFeedRequest::first_page().feed(feed.id))
            .await
            .unwrap();
        let denied = assemble_home_feed(
            &store,
            user.id,
            &HomeFeedRequest::first_page().feed(foreign.id),
        )
        .await;

        assert_eq!(titles(&own), vec!["Mine"]);
        assert!(matches!(
            denied,
            Err(ServiceError::Store(StoreError::SubscriptionNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn user_without_subscriptions_gets_an_empty_feed() {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store.create_user("bob@example.com").await.unwrap();

        let page = assemble_home_feed(&store, user.id, &HomeFeedRequest::default())
            .await
            .unwrap();

        assert!(page.entries.is_empty());
        assert_eq!(page.next_page, None);
    }
}
