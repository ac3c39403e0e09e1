// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod error;
pub mod feed;
pub mod home_feed;
pub mod http;
pub mod matching;
pub mod model;
pub mod progress;
pub mod reconcile;
pub mod service;
pub mod store;

// Re-export main types for convenience
pub use error::{ErrorKind, FeedError, ServiceError, StoreError};
pub use feed::{FeedFetcher, HttpFeedFetcher, ImportedFeed, normalize_feed_url, parse_feed};
pub use home_feed::{HomeFeed, HomeFeedRequest, assemble_home_feed};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use matching::{EpisodeKey, EpisodeMatcher, TitleMatcher};
pub use model::{
    Episode, EpisodeAssets, EpisodeId, Feed, FeedId, PlayInfo, PreviousListen, Subscription, User,
    UserId,
};
pub use progress::{
    NoopReporter, RefreshEvent, RefreshReporter, SharedRefreshReporter, TracingReporter,
};
pub use reconcile::{ReconcilePlan, reconcile};
pub use service::{FeedRefresh, PodcastService, RefreshOptions, RefreshSummary, Subscribed};
pub use store::{HomeFeedQuery, SqliteStore, Store};
