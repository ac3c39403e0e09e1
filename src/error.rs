// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::model::{FeedId, UserId};

/// Errors that can occur when fetching or parsing RSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Feed URL must use http or https: {url}")]
    UnsupportedScheme { url: String },

    #[error("Episode '{title}' has no audio enclosure")]
    MissingEnclosure { title: String },

    #[error("Episode '{title}' has no usable publication date")]
    MissingPublishedDate { title: String },
}

/// Errors raised by the persistent store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unknown user: {email}")]
    UnknownUser { email: String },

    #[error("User already exists: {email}")]
    UserAlreadyExists { email: String },

    #[error("User {user_id} is already subscribed to feed {feed_id}")]
    SubscriptionAlreadyExists { user_id: UserId, feed_id: FeedId },

    #[error("User {user_id} is not subscribed to feed {feed_id}")]
    SubscriptionNotFound { user_id: UserId, feed_id: FeedId },

    #[error("Episode not found: {0}")]
    EpisodeNotFound(String),

    #[error("Feed not found: {0}")]
    FeedNotFound(FeedId),

    #[error("Feed already exists: {url}")]
    FeedAlreadyExists { url: String },

    #[error("Corrupt value in column {column}: {value}")]
    CorruptRow { column: &'static str, value: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Top-level errors for service operations
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Page numbers start at 1, got {page}")]
    InvalidPage { page: u32 },

    #[error("Page size must be positive, got {page_size}")]
    InvalidPageSize { page_size: u32 },
}

/// Outward classification of an error, independent of where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The addressed user, episode, feed or subscription does not exist
    NotFound,
    /// The write would duplicate an existing record
    Conflict,
    /// The request itself is malformed
    BadRequest,
    /// The feed host failed; retrying later may help
    Upstream,
    Internal,
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedError::FetchFailed { .. } => ErrorKind::Upstream,
            // Timeout and rate limiting: the URL is fine, retry later
            FeedError::HttpStatus { status: 408 | 429, .. } => ErrorKind::Upstream,
            FeedError::HttpStatus { status, .. } if (400..500).contains(status) => {
                ErrorKind::BadRequest
            }
            FeedError::HttpStatus { .. } => ErrorKind::Upstream,
            FeedError::ParseFailed(_) => ErrorKind::Upstream,
            FeedError::InvalidUrl(_) | FeedError::UnsupportedScheme { .. } => {
                ErrorKind::BadRequest
            }
            FeedError::MissingEnclosure { .. } | FeedError::MissingPublishedDate { .. } => {
                ErrorKind::Upstream
            }
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UnknownUser { .. }
            | StoreError::SubscriptionNotFound { .. }
            | StoreError::EpisodeNotFound(_)
            | StoreError::FeedNotFound(_) => ErrorKind::NotFound,
            StoreError::UserAlreadyExists { .. }
            | StoreError::FeedAlreadyExists { .. }
            | StoreError::SubscriptionAlreadyExists { .. } => ErrorKind::Conflict,
            StoreError::CorruptRow { .. } | StoreError::Database(_) => ErrorKind::Internal,
        }
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Feed(e) => e.kind(),
            ServiceError::Store(e) => e.kind(),
            ServiceError::InvalidPage { .. } | ServiceError::InvalidPageSize { .. } => {
                ErrorKind::BadRequest
            }
        }
    }
}
