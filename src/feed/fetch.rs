// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::FeedError;
use crate::http::HttpClient;

use super::parse::{ImportedFeed, parse_feed};

/// Source of parsed feeds for the import and refresh paths
///
/// A fetch either yields data or fails; retries and timeouts are the
/// implementation's business.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn import_feed(&self, url: &str) -> Result<ImportedFeed, FeedError>;
}

/// Feed fetcher that downloads feeds over HTTP
#[derive(Clone)]
pub struct HttpFeedFetcher<C> {
    client: C,
}

impl<C: HttpClient> HttpFeedFetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: HttpClient> FeedFetcher for HttpFeedFetcher<C> {
    async fn import_feed(&self, url: &str) -> Result<ImportedFeed, FeedError> {
        fetch_feed(&self.client, url).await
    }
}

/// Fetch raw feed bytes from a URL (without parsing)
pub async fn fetch_feed_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FeedError> {
    let response = client
        .get(url)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !(200..300).contains(&response.status) {
        return Err(FeedError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    Ok(response.body)
}

/// Fetch and parse a podcast feed from a URL
pub async fn fetch_feed<C: HttpClient>(client: &C, url: &str) -> Result<ImportedFeed, FeedError> {
    let url = normalize_feed_url(url)?;
    let bytes = fetch_feed_bytes(client, &url).await?;
    let feed = parse_feed(&bytes)?;
    tracing::debug!(%url, episodes = feed.episodes.len(), "fetched feed");
    Ok(feed)
}

/// Canonical form of a feed URL, used as the feed's identity
pub fn normalize_feed_url(raw: &str) -> Result<String, FeedError> {
    let raw = raw.trim();
    let url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FeedError::UnsupportedScheme {
            url: raw.to_string(),
        });
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;

    struct MockHttpClient {
        body: &'static str,
        status: u16,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            Ok(HttpResponse {
                status: self.status,
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast</description>
    <image>
      <url>https://example.com/cover.png</url>
      <title>Test Podcast</title>
      <link>https://example.com</link>
    </image>
    <item>
      <title>Episode 1</title>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/ep1.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn normalize_feed_url_canonicalizes() {
        assert_eq!(
            normalize_feed_url("  HTTPS://Example.com/feed.xml ").unwrap(),
            "https://example.com/feed.xml"
        );
        assert_eq!(
            normalize_feed_url("https://example.com").unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn normalize_feed_url_rejects_other_schemes() {
        assert!(matches!(
            normalize_feed_url("ftp://example.com/feed.xml"),
            Err(FeedError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            normalize_feed_url("feed.xml"),
            Err(FeedError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn http_fetcher_parses_feed() {
        let fetcher = HttpFeedFetcher::new(MockHttpClient {
            body: FEED,
            status: 200,
        });

        let feed = fetcher
            .import_feed("https://example.com/feed.xml")
            .await
            .unwrap();

        assert_eq!(feed.episodes.len(), 1);
        assert_eq!(
            feed.cover_art_url.as_deref(),
            Some("https://example.com/cover.png")
        );
    }

    #[tokio::test]
    async fn http_fetcher_fails_on_http_error() {
        let fetcher = HttpFeedFetcher::new(MockHttpClient {
            body: "Not Found",
            status: 404,
        });

        let result = fetcher.import_feed("https://example.com/feed.xml").await;

        match result.unwrap_err() {
            FeedError::HttpStatus { status, .. } => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got {other}"),
        }
    }
}
