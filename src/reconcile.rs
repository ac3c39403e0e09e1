// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use crate::matching::{EpisodeKey, EpisodeMatcher};
use crate::model::{Episode, EpisodeAssets, FeedId};

/// A "set this field on every stored episode matching `key`" instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeUpdate<T> {
    pub key: EpisodeKey,
    pub value: T,
}

pub type LinkUpdate = EpisodeUpdate<String>;
pub type DurationUpdate = EpisodeUpdate<u32>;

/// Delta between a feed's stored episodes and a fresh fetch of it
///
/// Apply in order: inserts first, then link updates, then duration updates,
/// so that freshly inserted rows are reachable by the update passes.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub feed_id: FeedId,
    /// Entries published strictly after the latest stored episode whose key
    /// is not stored yet
    pub to_insert: Vec<EpisodeAssets>,
    pub link_updates: Vec<LinkUpdate>,
    pub duration_updates: Vec<DurationUpdate>,
    /// Fetched keys shared by several fetched entries or several stored
    /// episodes; updates under these keys land on every matching episode
    pub ambiguous_keys: Vec<EpisodeKey>,
}

impl ReconcilePlan {
    /// A plan that changes nothing
    pub fn empty(feed_id: FeedId) -> Self {
        Self {
            feed_id,
            to_insert: Vec::new(),
            link_updates: Vec::new(),
            duration_updates: Vec::new(),
            ambiguous_keys: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty()
            && self.link_updates.is_empty()
            && self.duration_updates.is_empty()
    }
}

/// Compute the delta for one feed
///
/// `stored` is every episode currently stored for the feed. An entry is
/// inserted only when it is newer than the newest stored episode and the
/// matcher finds no stored episode with the same key; a known episode whose
/// date moved forward is left to the update passes. An empty `fresh` list
/// yields an empty plan: a fetch that produced nothing never removes
/// anything.
///
/// Update records are produced for every fresh entry, including the ones
/// queued for insertion. Those updates are redundant but harmless.
pub fn reconcile(
    feed_id: FeedId,
    stored: &[Episode],
    fresh: Vec<EpisodeAssets>,
    matcher: &dyn EpisodeMatcher,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::empty(feed_id);

    let stored_latest = stored.iter().map(|e| e.assets.published_at).max();
    let mut stored_counts: BTreeMap<EpisodeKey, usize> = BTreeMap::new();
    for episode in stored {
        *stored_counts.entry(matcher.key(&episode.assets)).or_default() += 1;
    }

    let mut fresh_counts: BTreeMap<EpisodeKey, usize> = BTreeMap::new();
    for assets in fresh {
        let key = matcher.key(&assets);
        *fresh_counts.entry(key.clone()).or_default() += 1;

        let is_new = stored_latest.is_none_or(|latest| assets.published_at > latest);
        let is_stored = stored_counts.contains_key(&key);
        if is_new && is_stored {
            tracing::debug!(
                feed_id = %feed_id,
                key = ?key,
                "entry republished with a later date; updating the stored episode"
            );
        }

        if let Some(link) = &assets.download_link {
            plan.link_updates.push(EpisodeUpdate {
                key: key.clone(),
                value: link.clone(),
            });
        }

        if let Some(duration) = assets.duration_secs {
            plan.duration_updates.push(EpisodeUpdate {
                key,
                value: duration,
            });
        }

        if is_new && !is_stored {
            plan.to_insert.push(assets);
        }
    }

    plan.ambiguous_keys = fresh_counts
        .into_iter()
        .filter(|(key, count)| *count > 1 || stored_counts.get(key).is_some_and(|n| *n > 1))
        .map(|(key, _)| key)
        .collect();

    if !plan.ambiguous_keys.is_empty() {
        tracing::warn!(
            feed_id = %feed_id,
            keys = ?plan.ambiguous_keys,
            "several episodes share an identity key; updates apply to all of them"
        );
    }

    plan
}
