// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::FeedError;
use crate::model::EpisodeAssets;

/// A freshly parsed feed, ready to be imported or reconciled
#[derive(Debug, Clone)]
pub struct ImportedFeed {
    pub title: String,
    pub cover_art_url: Option<String>,
    /// Entries that carried an audio link and a publication date
    pub episodes: Vec<EpisodeAssets>,
}

/// Parse RSS feed XML bytes into an ImportedFeed
///
/// Entries without an audio enclosure or a usable publication date are
/// skipped, never fatal to the whole feed.
pub fn parse_feed(xml_bytes: &[u8]) -> Result<ImportedFeed, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let episodes = channel
        .items()
        .iter()
        .filter_map(|item| match parse_episode(item) {
            Ok(assets) => Some(assets),
            Err(e) => {
                tracing::warn!(feed = channel.title(), "skipping feed entry: {e}");
                None
            }
        })
        .collect();

    let cover_art_url = channel
        .image()
        .map(|img| img.url().trim().to_string())
        .or_else(|| {
            channel
                .itunes_ext()
                .and_then(|ext| ext.image())
                .map(|url| url.trim().to_string())
        })
        .filter(|url| !url.is_empty());

    Ok(ImportedFeed {
        title: decode_text(channel.title()),
        cover_art_url,
        episodes,
    })
}

fn parse_episode(item: &rss::Item) -> Result<EpisodeAssets, FeedError> {
    let title = item
        .title()
        .map(decode_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled Episode".to_string());

    let download_link = item
        .enclosure()
        .filter(|enclosure| is_audio_mime_type(enclosure.mime_type()))
        .map(|enclosure| enclosure.url().trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| FeedError::MissingEnclosure {
            title: title.clone(),
        })?;

    let published_at = item
        .pub_date()
        .and_then(parse_date)
        .ok_or_else(|| FeedError::MissingPublishedDate {
            title: title.clone(),
        })?;

    let itunes = item.itunes_ext();

    let description = item
        .description()
        .or_else(|| itunes.and_then(|ext| ext.summary()))
        .map(String::from)
        .filter(|d| !d.trim().is_empty());

    let duration_secs = itunes.and_then(|ext| ext.duration()).and_then(|raw| {
        let parsed = parse_duration(raw);
        if parsed.is_none() && !raw.trim().is_empty() {
            tracing::warn!(
                episode = %title,
                duration = raw,
                "unparseable duration, treating as unknown"
            );
        }
        parsed
    });

    Ok(EpisodeAssets {
        title,
        description,
        download_link: Some(download_link),
        published_at,
        duration_secs,
    })
}

/// Enclosures without a MIME type are assumed to be audio
fn is_audio_mime_type(mime_type: &str) -> bool {
    let mime_type = mime_type.trim();
    mime_type.is_empty() || mime_type.to_ascii_lowercase().starts_with("audio/")
}

/// Titles are the identity key of an episode, so entity-encoded and plain
/// renditions of the same title must compare equal.
fn decode_text(raw: &str) -> String {
    html_escape::decode_html_entities(raw).trim().to_string()
}

fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();
    DateTime::parse_from_rfc2822(date_str)
        .ok()
        .or_else(|| parse_relaxed_date(date_str))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(date_str).ok())
}

/// Parse an `itunes:duration` value: `SS`, `MM:SS` or `HH:MM:SS`
pub fn parse_duration(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parts = raw
        .split(':')
        .map(|part| part.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [secs] => Some(*secs),
        [mins, secs] if *secs < 60 => mins.checked_mul(60)?.checked_add(*secs),
        [hours, mins, secs] if *mins < 60 && *secs < 60 => hours
            .checked_mul(3600)?
            .checked_add(mins * 60)?
            .checked_add(*secs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast for unit testing</description>
    <link>https://example.com</link>
    <itunes:image href="https://example.com/cover.jpg"/>
    <item>
      <title>Episode 1 &amp; friends</title>
      <description>About bananas and apples</description>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/ep1.mp3" length="1234567" type="audio/mpeg"/>
      <itunes:duration>1:02:03</itunes:duration>
    </item>
    <item>
      <title>Episode 2</title>
      <pubDate>2024-01-08T12:00:00+00:00</pubDate>
      <enclosure url="https://example.com/ep2.m4a" type=""/>
      <itunes:duration>about an hour</itunes:duration>
    </item>
    <item>
      <title>Video Only</title>
      <pubDate>Mon, 15 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/ep3.mp4" type="video/mp4"/>
    </item>
    <item>
      <title>Undated</title>
      <enclosure url="https://example.com/ep4.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parse_feed_extracts_cover_art() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes()).unwrap();

        assert_eq!(feed.title, "Test Podcast");
        assert_eq!(
            feed.cover_art_url,
            Some("https://example.com/cover.jpg".to_string())
        );
    }

    #[test]
    fn parse_feed_extracts_episode_assets() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes()).unwrap();
        let ep1 = &feed.episodes[0];

        assert_eq!(ep1.title, "Episode 1 & friends");
        assert_eq!(ep1.description.as_deref(), Some("About bananas and apples"));
        assert_eq!(
            ep1.download_link.as_deref(),
            Some("https://example.com/ep1.mp3")
        );
        assert_eq!(
            ep1.published_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(ep1.duration_secs, Some(3723));
    }

    #[test]
    fn parse_feed_treats_bad_duration_as_unknown() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes()).unwrap();
        let ep2 = &feed.episodes[1];

        assert_eq!(ep2.title, "Episode 2");
        assert!(ep2.description.is_none());
        assert!(ep2.duration_secs.is_none());
        assert_eq!(
            ep2.published_at,
            Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn parse_feed_skips_non_audio_and_undated_entries() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes()).unwrap();
        let titles: Vec<_> = feed.episodes.iter().map(|e| e.title.as_str()).collect();

        assert_eq!(titles, vec!["Episode 1 & friends", "Episode 2"]);
    }

    #[test]
    fn parse_feed_skips_items_without_enclosure() {
        let feed_no_enclosure = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <description>Test</description>
    <item>
      <title>No Audio</title>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

        let feed = parse_feed(feed_no_enclosure.as_bytes()).unwrap();
        assert!(feed.episodes.is_empty());
        assert!(feed.cover_art_url.is_none());
    }

    #[test]
    fn parse_feed_rejects_garbage() {
        assert!(matches!(
            parse_feed(b"definitely not xml"),
            Err(FeedError::ParseFailed(_))
        ));
    }

    #[test]
    fn parse_duration_accepts_itunes_formats() {
        assert_eq!(parse_duration("3600"), Some(3600));
        assert_eq!(parse_duration("45:30"), Some(2730));
        assert_eq!(parse_duration("01:00:01"), Some(3601));
        assert_eq!(parse_duration(" 90 "), Some(90));
    }

    #[test]
    fn parse_duration_rejects_malformed_values() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("1:75"), None);
        assert_eq!(parse_duration("1:2:3:4"), None);
        assert_eq!(parse_duration("12.5"), None);
        assert_eq!(parse_duration("-5"), None);
    }
}
