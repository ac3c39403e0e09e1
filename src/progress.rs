// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

/// Events emitted while refreshing feeds
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    /// A refresh pass over `total_feeds` feeds is starting
    RefreshStarting { total_feeds: usize },

    /// Feed is being fetched from URL
    FetchingFeed { url: String },

    /// Feed was fetched and its reconcile plan applied
    FeedRefreshed {
        url: String,
        inserted: usize,
        links_updated: u64,
        durations_updated: u64,
    },

    /// Fetching or applying a feed failed; other feeds are unaffected
    FeedFailed { url: String, error: String },

    /// Refresh pass completed
    RefreshCompleted {
        refreshed: usize,
        inserted: usize,
        failed: usize,
    },
}

/// Trait for reporting progress events during a refresh.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait RefreshReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: RefreshEvent);
}

/// A shared reference to a refresh reporter
pub type SharedRefreshReporter = Arc<dyn RefreshReporter>;

/// A no-op reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl RefreshReporter for NoopReporter {
    fn report(&self, _event: RefreshEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedRefreshReporter {
        Arc::new(Self)
    }
}

/// Reporter that forwards every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl RefreshReporter for TracingReporter {
    fn report(&self, event: RefreshEvent) {
        match event {
            RefreshEvent::RefreshStarting { total_feeds } => {
                tracing::info!(total_feeds, "refresh starting");
            }
            RefreshEvent::FetchingFeed { url } => {
                tracing::debug!(%url, "fetching feed");
            }
            RefreshEvent::FeedRefreshed {
                url,
                inserted,
                links_updated,
                durations_updated,
            } => {
                tracing::info!(%url, inserted, links_updated, durations_updated, "feed refreshed");
            }
            RefreshEvent::FeedFailed { url, error } => {
                tracing::debug!(%url, %error, "feed refresh failed");
            }
            RefreshEvent::RefreshCompleted {
                refreshed,
                inserted,
                failed,
            } => {
                tracing::info!(refreshed, inserted, failed, "refresh completed");
            }
        }
    }
}

impl TracingReporter {
    pub fn shared() -> SharedRefreshReporter {
        Arc::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_events() -> Vec<RefreshEvent> {
        vec![
            RefreshEvent::RefreshStarting { total_feeds: 2 },
            RefreshEvent::FetchingFeed {
                url: "https://example.com/feed.xml".to_string(),
            },
            RefreshEvent::FeedRefreshed {
                url: "https://example.com/feed.xml".to_string(),
                inserted: 1,
                links_updated: 3,
                durations_updated: 0,
            },
            RefreshEvent::FeedFailed {
                url: "https://example.com/broken.xml".to_string(),
                error: "HTTP error 503".to_string(),
            },
            RefreshEvent::RefreshCompleted {
                refreshed: 1,
                inserted: 1,
                failed: 1,
            },
        ]
    }

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter;
        for event in all_events() {
            reporter.report(event);
        }
    }

    #[test]
    fn tracing_reporter_handles_all_events() {
        let reporter = TracingReporter::shared();
        for event in all_events() {
            reporter.report(event);
        }
    }
}
