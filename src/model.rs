// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remaining seconds under which a listened episode counts as finished
pub const FINISHED_THRESHOLD_SECS: u32 = 20;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

opaque_id!(
    /// Identifies a user
    UserId
);
opaque_id!(
    /// Identifies a feed, shared by every subscriber of its URL
    FeedId
);
opaque_id!(
    /// Identifies an episode; assigned at insertion, stable across refreshes
    EpisodeId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub id: FeedId,
    pub url: String,
    pub cover_art_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub feed_id: FeedId,
}

/// Descriptive fields of an episode as sourced from its feed
///
/// `title` and `published_at` are fixed once stored. Only `download_link`
/// and `duration_secs` are rewritten by later refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeAssets {
    pub title: String,
    pub description: Option<String>,
    pub download_link: Option<String>,
    pub published_at: DateTime<Utc>,
    pub duration_secs: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub feed_id: FeedId,
    pub assets: EpisodeAssets,
    /// Copied from the owning feed for display
    pub cover_art_url: Option<String>,
}

/// A user's saved playback position for one episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreviousListen {
    pub seconds_listened: u32,
    pub updated_at: DateTime<Utc>,
}

impl PreviousListen {
    /// Media fragment used to resume playback, e.g. `#t=90`
    pub fn play_time_fragment(&self) -> String {
        format!("#t={}", self.seconds_listened)
    }
}

/// An episode paired with the requesting user's playback position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayInfo {
    pub episode: Episode,
    pub previous_listen: Option<PreviousListen>,
}

impl PlayInfo {
    /// Whether the user listened to within `FINISHED_THRESHOLD_SECS` of the end.
    ///
    /// Episodes of unknown duration are never finished.
    pub fn is_finished(&self) -> bool {
        match (self.episode.assets.duration_secs, self.previous_listen) {
            (Some(duration), Some(listen)) => {
                duration.saturating_sub(listen.seconds_listened) < FINISHED_THRESHOLD_SECS
            }
            _ => false,
        }
    }

    /// Download link with the resume fragment appended, if any
    pub fn resume_link(&self) -> Option<String> {
        let link = self.episode.assets.download_link.as_ref()?;
        Some(match self.previous_listen {
            Some(listen) => format!("{}{}", link, listen.play_time_fragment()),
            None => link.clone(),
        })
    }
}
