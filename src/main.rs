// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use podcasticot::{
    EpisodeId, ErrorKind, FeedId, HomeFeed, HomeFeedRequest, HttpFeedFetcher, NoopReporter,
    PlayInfo, PodcastService, RefreshEvent, RefreshOptions, RefreshReporter, RefreshSummary,
    ReqwestClient, ServiceError, SharedRefreshReporter, SqliteStore, StoreError, TracingReporter,
    User,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static CHECK: Emoji<'_, '_> = Emoji("✓ ", "v ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

type Service = PodcastService<SqliteStore, HttpFeedFetcher<ReqwestClient>>;

/// Aggregate podcast feeds into a personal, resumable home feed
#[derive(Parser, Debug)]
#[command(name = "podcasticot")]
#[command(about = "Aggregate podcast feeds into a personal, resumable home feed")]
#[command(version)]
struct Args {
    /// SQLite database file
    #[arg(
        long,
        global = true,
        env = "PODCASTICOT_DATABASE",
        default_value = "./db/poddb.db"
    )]
    database: PathBuf,

    /// Maximum number of feeds refreshed concurrently
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "PODCASTICOT_CONCURRENCY",
        default_value = "3"
    )]
    concurrency: usize,

    /// Feed fetch timeout in seconds
    #[arg(
        long,
        global = true,
        env = "PODCASTICOT_FETCH_TIMEOUT",
        default_value = "30"
    )]
    timeout: u64,

    /// Log refresh and import activity
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed, importing it on first sight
    Subscribe {
        email: String,
        url: String,
    },

    /// Show a page of the home feed
    Feed {
        email: String,

        #[arg(short, long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "10")]
        page_size: u32,

        /// Case-insensitive match against title and description
        #[arg(short, long)]
        search: Option<String>,

        /// Also list episodes listened to the end
        #[arg(long)]
        include_finished: bool,

        /// Restrict to one subscribed feed
        #[arg(long)]
        feed_id: Option<FeedId>,

        #[arg(long)]
        json: bool,
    },

    /// Show an episode with the resume link
    Play {
        email: String,
        episode_id: EpisodeId,

        #[arg(long)]
        json: bool,
    },

    /// Save the playback position in an episode
    Listen {
        email: String,
        episode_id: EpisodeId,
        seconds: u32,
    },

    /// Show the most recently listened episode
    Latest {
        email: String,

        #[arg(long)]
        json: bool,
    },

    /// Refresh all feeds, or those of one user
    Refresh {
        /// Only refresh this user's subscriptions
        #[arg(short, long)]
        user: Option<String>,

        /// Keep running, refreshing every N minutes
        #[arg(long)]
        every: Option<u64>,
    },
}

/// Spinner that follows a refresh pass
struct SpinnerReporter {
    bar: ProgressBar,
}

impl SpinnerReporter {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }
}

impl RefreshReporter for SpinnerReporter {
    fn report(&self, event: RefreshEvent) {
        match event {
            RefreshEvent::RefreshStarting { total_feeds } => {
                self.bar.set_message(format!(
                    "{HEADPHONES}Refreshing {} feeds",
                    total_feeds.to_string().cyan()
                ));
            }

            RefreshEvent::FetchingFeed { url } => {
                self.bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            RefreshEvent::FeedRefreshed { url, inserted, .. } => {
                if inserted > 0 {
                    self.bar.println(format!(
                        "  {SUCCESS}{} {} new",
                        url.green(),
                        inserted.to_string().yellow()
                    ));
                }
            }

            RefreshEvent::FeedFailed { url, error } => {
                self.bar
                    .println(format!("  {FAILURE}{} - {}", url.red(), error.dimmed()));
            }

            RefreshEvent::RefreshCompleted { .. } => {
                self.bar.finish_and_clear();
            }
        }
    }
}

fn init_tracing(verbose: bool, log_json: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Look a user up by email, creating them on first use
async fn find_or_create_user(service: &Service, email: &str) -> Result<User> {
    match service.find_user_by_email(email).await {
        Ok(user) => Ok(user),
        Err(e) if e.kind() == ErrorKind::NotFound => match service.create_user(email).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, email, "created user");
                Ok(user)
            }
            // Created concurrently by another process
            Err(ServiceError::Store(StoreError::UserAlreadyExists { .. })) => service
                .find_user_by_email(email)
                .await
                .context("Failed to look up user"),
            Err(e) => Err(e).context("Failed to create user"),
        },
        Err(e) => Err(e).context("Failed to look up user"),
    }
}

fn format_duration(total_secs: u32) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

fn print_play_info(info: &PlayInfo) {
    let assets = &info.episode.assets;
    let title = if info.is_finished() {
        format!("{CHECK}{}", assets.title).dimmed()
    } else {
        assets.title.bold()
    };

    let mut details = vec![assets.published_at.format("%Y-%m-%d").to_string()];
    match (assets.duration_secs, info.previous_listen) {
        (Some(duration), Some(listen)) => details.push(format!(
            "{} / {}",
            format_duration(listen.seconds_listened),
            format_duration(duration)
        )),
        (Some(duration), None) => details.push(format_duration(duration)),
        (None, Some(listen)) => {
            details.push(format!("at {}", format_duration(listen.seconds_listened)))
        }
        (None, None) => {}
    }

    println!("{title}");
    println!(
        "  {}  {}",
        details.join("  ").cyan(),
        info.episode.id.to_string().dimmed()
    );
    if let Some(link) = info.resume_link() {
        println!("  {}", link.dimmed());
    }
}

fn print_home_feed(feed: &HomeFeed) {
    if feed.entries.is_empty() {
        println!("{}", "No episodes.".dimmed());
        return;
    }

    for entry in &feed.entries {
        print_play_info(entry);
    }

    if let Some(next) = feed.next_page {
        println!("\n{}", format!("More on page {next}").dimmed());
    }
}

fn print_summary(summary: &RefreshSummary) {
    println!(
        "\n{PARTY}{} {} feeds refreshed, {} new episodes, {} failed",
        "Refresh complete:".bold().green(),
        summary.refreshed.to_string().green().bold(),
        summary.inserted.to_string().yellow(),
        if summary.failed.is_empty() {
            "0".green()
        } else {
            summary.failed.len().to_string().red().bold()
        }
    );

    if !summary.failed.is_empty() {
        println!("\n{}", "Failed feeds:".red().bold());
        for (url, error) in &summary.failed {
            println!("  {}{} - {}", CROSS, url.yellow(), error.dimmed());
        }
    }
}

fn reporter(args: &Args) -> SharedRefreshReporter {
    if args.quiet {
        NoopReporter::shared()
    } else if args.log_json {
        TracingReporter::shared()
    } else {
        Arc::new(SpinnerReporter::new())
    }
}

async fn refresh_once(service: &Service, user: Option<&User>) -> Result<RefreshSummary> {
    let summary = match user {
        Some(user) => service.refresh_for_user(user.id).await,
        None => service.refresh_all().await,
    };
    summary.context("Failed to refresh feeds")
}

async fn open_service(args: &Args) -> Result<Service> {
    if let Some(parent) = args.database.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory {}", parent.display())
        })?;
    }

    let store = SqliteStore::open(&args.database)
        .await
        .with_context(|| format!("Failed to open database {}", args.database.display()))?;
    let client = ReqwestClient::with_timeout(Duration::from_secs(args.timeout))
        .context("Failed to create HTTP client")?;

    Ok(PodcastService::new(store, HttpFeedFetcher::new(client))
        .with_options(RefreshOptions {
            max_concurrent: args.concurrency,
        })
        .with_reporter(reporter(args)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_json);

    let service = open_service(&args).await?;

    match &args.command {
        Command::Subscribe { email, url } => {
            let user = find_or_create_user(&service, email).await?;
            let subscribed = service
                .subscribe(user.id, url)
                .await
                .with_context(|| format!("Failed to subscribe to {url}"))?;

            if !args.quiet {
                println!(
                    "{SUCCESS}Subscribed {} to {} ({} episodes imported)",
                    user.email.bold(),
                    subscribed.feed.url.cyan(),
                    subscribed.imported.to_string().yellow()
                );
            }
        }

        Command::Feed {
            email,
            page,
            page_size,
            search,
            include_finished,
            feed_id,
            json,
        } => {
            let user = find_or_create_user(&service, email).await?;
            let request = HomeFeedRequest {
                page: *page,
                page_size: *page_size,
                search: search.clone(),
                include_finished: *include_finished,
                feed_id: *feed_id,
            };
            let feed = service
                .home_feed(user.id, &request)
                .await
                .context("Failed to load home feed")?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&feed)?);
            } else {
                println!(
                    "\n{}{} {}\n",
                    MICROPHONE,
                    "podcasticot".bold().magenta(),
                    format!("- page {}", feed.page).dimmed()
                );
                print_home_feed(&feed);
            }
        }

        Command::Play {
            email,
            episode_id,
            json,
        } => {
            let user = find_or_create_user(&service, email).await?;
            let info = service
                .play_info(user.id, *episode_id)
                .await
                .context("Failed to load episode")?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_play_info(&info);
            }
        }

        Command::Listen {
            email,
            episode_id,
            seconds,
        } => {
            let user = find_or_create_user(&service, email).await?;
            service
                .update_play_position(user.id, *episode_id, *seconds)
                .await
                .context("Failed to save play position")?;

            if !args.quiet {
                println!(
                    "{SUCCESS}Saved position {}",
                    format_duration(*seconds).cyan()
                );
            }
        }

        Command::Latest { email, json } => {
            let user = find_or_create_user(&service, email).await?;
            let latest = service
                .latest_play_info(user.id)
                .await
                .context("Failed to load latest listen")?;

            match (latest, *json) {
                (latest, true) => println!("{}", serde_json::to_string_pretty(&latest)?),
                (Some(info), false) => print_play_info(&info),
                (None, false) => println!("{}", "Nothing listened yet.".dimmed()),
            }
        }

        Command::Refresh { user, every } => {
            let user = match user {
                Some(email) => Some(find_or_create_user(&service, email).await?),
                None => None,
            };

            let Some(minutes) = every else {
                let summary = refresh_once(&service, user.as_ref()).await?;
                if !args.quiet {
                    print_summary(&summary);
                }
                if summary.refreshed == 0 && !summary.failed.is_empty() {
                    std::process::exit(1);
                }
                return Ok(());
            };

            let mut interval = tokio::time::interval(Duration::from_secs((*minutes).max(1) * 60));
            loop {
                interval.tick().await;
                match refresh_once(&service, user.as_ref()).await {
                    Ok(summary) if !args.quiet => print_summary(&summary),
                    Ok(_) => {}
                    // A failed pass is retried on the next tick
                    Err(e) => tracing::error!(error = %format!("{e:#}"), "refresh pass failed"),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_shows_hours_only_when_needed() {
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(61), "1:01");
        assert_eq!(format_duration(3723), "1:02:03");
    }

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::try_parse_from(["podcasticot", "feed", "alice@example.com"]).unwrap();

        assert_eq!(args.concurrency, 3);
        assert_eq!(args.timeout, 30);
        match args.command {
            Command::Feed {
                page, page_size, ..
            } => {
                assert_eq!(page, 1);
                assert_eq!(page_size, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn args_reject_malformed_episode_id() {
        let result =
            Args::try_parse_from(["podcasticot", "play", "alice@example.com", "not-a-uuid"]);
        assert!(result.is_err());
    }
}
