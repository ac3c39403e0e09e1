// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::model::{Episode, EpisodeAssets};

/// Key under which updates are re-attached to stored episodes of one feed
///
/// Feeds do not reliably carry a persistent episode GUID, so titles are the
/// only key for now.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EpisodeKey {
    Title(String),
}

/// Strategy that derives the identity key of an episode
pub trait EpisodeMatcher: Send + Sync {
    /// Identity key of the given assets
    fn key(&self, assets: &EpisodeAssets) -> EpisodeKey;

    /// Whether a stored episode and a fetched entry of the same feed are the same episode
    fn matches(&self, stored: &Episode, fresh: &EpisodeAssets) -> bool {
        self.key(&stored.assets) == self.key(fresh)
    }
}

/// Exact, case-sensitive title equality
#[derive(Debug, Default, Clone, Copy)]
pub struct TitleMatcher;

impl EpisodeMatcher for TitleMatcher {
    fn key(&self, assets: &EpisodeAssets) -> EpisodeKey {
        EpisodeKey::Title(assets.title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EpisodeId, FeedId};
    use chrono::{Duration, TimeZone, Utc};

    fn assets(title: &str) -> EpisodeAssets {
        EpisodeAssets {
            title: title.to_string(),
            description: None,
            download_link: Some("https://example.com/a.mp3".to_string()),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            duration_secs: None,
        }
    }

    fn stored(title: &str) -> Episode {
        Episode {
            id: EpisodeId::new(),
            feed_id: FeedId::new(),
            assets: assets(title),
            cover_art_url: None,
        }
    }

    #[test]
    fn same_title_matches() {
        assert!(TitleMatcher.matches(&stored("Ep1"), &assets("Ep1")));
    }

    #[test]
    fn different_title_does_not_match() {
        assert!(!TitleMatcher.matches(&stored("Ep1"), &assets("Ep2")));
        assert!(!TitleMatcher.matches(&stored("Ep1"), &assets("ep1")));
    }

    #[test]
    fn corrected_publish_date_still_matches() {
        let mut fresh = assets("Ep1");
        fresh.published_at += Duration::hours(3);
        fresh.download_link = Some("https://cdn.example.com/a.mp3".to_string());

        assert!(TitleMatcher.matches(&stored("Ep1"), &fresh));
    }

    #[test]
    fn key_is_the_title() {
        assert_eq!(
            TitleMatcher.key(&assets("Ep1")),
            EpisodeKey::Title("Ep1".to_string())
        );
    }
}
