// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod fetch;
mod parse;

pub use fetch::{FeedFetcher, HttpFeedFetcher, fetch_feed, fetch_feed_bytes, normalize_feed_url};
pub use parse::{ImportedFeed, parse_duration, parse_feed};
