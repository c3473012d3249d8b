#![forbid(unsafe_code)]

//! Command-line front end: inspect a channel's most popular videos, export
//! their comments in bulk, or analyse the comments of a single video.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::{path::PathBuf, process, sync::LazyLock, thread, time::Duration};
use tracing::warn;
use tubeharvest_tools::{
    api::{ApiKey, UreqTransport, YouTubeApi},
    bulk::{
        BulkEvent, BulkExportController, BulkObserver, BulkOptions, CancellationToken,
        ExportFormat, ItemOutcome,
    },
    catalog::{CatalogQuery, Discovery, VideoCatalogBuilder},
    comments::{CollectorOptions, CommentCollector, CommentSource},
    config::{DEFAULT_CONFIG_PATH, HarvestSettings, load_settings_from},
    export::{
        ArtifactSink, Clock, CsvOptions, DateZone, DirectorySink, SystemClock, csv_artifact,
        json_artifact, strip_markup,
    },
    logging::init_tracing,
    ranking::{CommentFilter, CommentOrder, VideoMetric},
};

const RULE: &str = "===================================";
const PREVIEW_CHARS: usize = 120;

static CHANNEL_ID_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"youtube\.com/channel/(UC[A-Za-z0-9_-]+)").expect("valid channel regex")
});
static HANDLE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtube\.com/@([A-Za-z0-9._-]+)").expect("valid handle regex"));
static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[?&]v=|youtu\.be/|/shorts/|/embed/|/live/)([A-Za-z0-9_-]{11})")
        .expect("valid video regex")
});

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Rank a YouTube channel's videos and export their comments."
)]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the config file")]
    config: PathBuf,
    #[arg(
        long = "api-key",
        value_name = "KEY",
        help = "YouTube Data API key (overrides YOUTUBE_API_KEY and the config file)"
    )]
    api_key: Option<String>,
    #[arg(
        short = 'o',
        long = "output",
        value_name = "DIR",
        global = true,
        help = "Directory receiving exported files"
    )]
    output: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a ranked video catalog for a channel, optionally exporting comments.
    Channel(ChannelArgs),
    /// Show and filter the comments of one video.
    Video(VideoArgs),
}

#[derive(Args, Debug)]
struct ChannelArgs {
    #[arg(value_name = "CHANNEL", help = "Channel id, @handle or channel URL")]
    identifier: String,
    #[arg(long, default_value_t = VideoMetric::Views, help = "Metric used to pick the top videos (views, likes, comments, date)")]
    metric: VideoMetric,
    #[arg(long, value_name = "METRIC", help = "Re-sort the listing without refetching")]
    sort: Option<VideoMetric>,
    #[arg(long = "max-videos", value_name = "N")]
    max_videos: Option<usize>,
    #[arg(long, default_value_t = Discovery::Search, help = "How to enumerate uploads (search or uploads)")]
    discovery: Discovery,
    #[arg(long = "export-comments", help = "Export the comments of every listed video")]
    export_comments: bool,
    #[arg(long, default_value_t = ExportFormat::Csv)]
    format: ExportFormat,
    #[arg(long = "max-comments", value_name = "N")]
    max_comments: Option<usize>,
    #[arg(long, default_value_t = 20, help = "Number of videos to print")]
    show: usize,
}

#[derive(Args, Debug)]
struct VideoArgs {
    #[arg(value_name = "VIDEO", help = "Video id or watch/share URL")]
    identifier: String,
    #[arg(long, help = "Keep comments whose text or author contains this")]
    search: Option<String>,
    #[arg(long = "min-likes", default_value_t = 0)]
    min_likes: u64,
    #[arg(long, default_value_t = CommentOrder::Recent, help = "recent, oldest or likes")]
    sort: CommentOrder,
    #[arg(long = "max-comments", value_name = "N")]
    max_comments: Option<usize>,
    #[arg(long, help = "Write the filtered comments as csv, json or both")]
    format: Option<ExportFormat>,
    #[arg(long, default_value_t = 10, help = "Number of comments to print")]
    show: usize,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = load_settings_from(&cli.config)
        .with_context(|| format!("Loading settings from {}", cli.config.display()))?;
    if let Some(key) = cli.api_key.clone() {
        settings.api_key = Some(key);
    }
    if let Some(output) = cli.output.clone() {
        settings.output_dir = output;
    }

    let key = ApiKey::from_option(settings.api_key.as_deref())
        .context("Set YOUTUBE_API_KEY, add it to the config file, or pass --api-key")?;
    let api = YouTubeApi::new(
        UreqTransport::new(settings.api_base_url.clone(), settings.http_timeout),
        key,
    );

    match cli.command {
        Command::Channel(args) => run_channel(&api, &settings, args),
        Command::Video(args) => run_video(&api, &settings, args),
    }
}

fn run_channel(
    api: &YouTubeApi<UreqTransport>,
    settings: &HarvestSettings,
    args: ChannelArgs,
) -> Result<()> {
    let query = CatalogQuery {
        channel_identifier: normalize_channel_identifier(&args.identifier),
        ranking_metric: args.metric,
        max_items: args.max_videos.unwrap_or(settings.max_videos),
        discovery: args.discovery,
    };

    println!("{RULE}");
    println!("YouTube Channel Catalog");
    println!("{RULE}");
    println!("Channel: {}", query.channel_identifier);
    println!("Ranking: top {} by {}", query.max_items, query.ranking_metric);
    println!("Discovery: {}", query.discovery);
    println!();

    let catalog = VideoCatalogBuilder::new(api)
        .with_page_delay(settings.page_delay)
        .build(&query)
        .with_context(|| format!("Building catalog for {}", args.identifier))?;

    let channel = &catalog.channel;
    println!("{} ({})", channel.title, channel.id);
    println!(
        "Subscribers: {} | Videos: {} | Views: {}",
        format_count(channel.subscriber_count),
        format_count(channel.video_count),
        format_count(channel.view_count)
    );
    if let Some(error) = &catalog.interrupted {
        println!("Warning: discovery stopped early ({error}); listing what was fetched.");
    }
    if catalog.limit_reached {
        println!("Stopped after {} videos (cap reached).", query.max_items);
    }
    println!();

    let display_metric = args.sort.unwrap_or(catalog.metric);
    let ranked = catalog.into_ranked();
    println!("Videos by {display_metric}:");
    for (position, video) in ranked.ranked(display_metric).into_iter().take(args.show).enumerate() {
        println!(
            "{:>3}. {} [{}] {} views | {} likes | {} comments | {}",
            position + 1,
            video.title,
            video.id,
            format_count(video.view_count),
            format_count(video.like_count),
            format_count(video.comment_count),
            format_date(video.published_at)
        );
    }
    if ranked.len() > args.show {
        println!("  ... and {} more", ranked.len() - args.show);
    }

    if !args.export_comments {
        return Ok(());
    }

    let collector = CommentCollector::new(
        api,
        CollectorOptions {
            max_comments: args.max_comments.unwrap_or(settings.max_comments),
            page_delay: settings.page_delay,
            ..CollectorOptions::default()
        },
    );
    let mut sink = DirectorySink::new(settings.output_dir.clone());
    let options = BulkOptions {
        format: args.format,
        item_delay: settings.item_delay,
        csv: csv_options(settings),
    };
    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone());

    println!();
    println!("Exporting comments to {}", settings.output_dir.display());
    println!("Press Ctrl+C to stop after the current video.");

    let mut reporter = ProgressReporter::default();
    let summary = BulkExportController::new(&collector, &mut sink, options).run(
        ranked.videos(),
        &cancel,
        &mut reporter,
    )?;

    println!();
    println!("{RULE}");
    println!("Export {}", summary.state);
    println!("{RULE}");
    println!("Exported: {}", summary.exported);
    println!("Failed: {}", summary.failed);
    println!("Skipped (no comments): {}", summary.skipped);
    println!("Comments written: {}", format_count(Some(summary.total_comments as u64)));
    for failure in &summary.failures {
        println!("  - {} ({}): {}", failure.title, failure.video_id, failure.error);
    }
    Ok(())
}

fn run_video(
    api: &YouTubeApi<UreqTransport>,
    settings: &HarvestSettings,
    args: VideoArgs,
) -> Result<()> {
    let video_id = normalize_video_identifier(&args.identifier);
    let details = VideoCatalogBuilder::new(api)
        .lookup_video(&video_id)
        .with_context(|| format!("Looking up video {}", args.identifier))?;

    println!("{RULE}");
    println!("{}", details.title);
    println!("{RULE}");
    println!("Channel: {}", details.channel_title);
    println!("Published: {}", format_date(details.published_at));
    println!(
        "Views: {} | Likes: {} | Comments: {}",
        format_count(details.view_count),
        format_count(details.like_count),
        format_count(details.comment_count)
    );
    println!();

    let max_comments = args.max_comments.unwrap_or(settings.max_comments);
    let collector = CommentCollector::new(
        api,
        CollectorOptions {
            max_comments,
            page_delay: settings.page_delay,
            ..CollectorOptions::default()
        },
    );
    let set = collector.collect(&details.id);
    if let Some(error) = &set.failure {
        println!("Warning: comment collection stopped early: {error}");
    }
    if set.limit_reached {
        println!("Comment cap of {max_comments} reached; later comments were not fetched.");
    }

    let filter = CommentFilter {
        search: args.search.clone(),
        min_likes: args.min_likes,
        order: args.sort,
    };
    let comments = filter.apply(&set.comments);
    println!(
        "Showing {} of {} matching comments ({} fetched, sorted by {}):",
        comments.len().min(args.show),
        comments.len(),
        set.len(),
        filter.order
    );
    for comment in comments.iter().take(args.show) {
        println!(
            "- {} ({} likes, {}): {}",
            comment.author_name,
            format_count(Some(comment.like_count)),
            format_date(comment.published_at),
            preview(&strip_markup(&comment.text_display))
        );
    }

    let Some(format) = args.format else {
        return Ok(());
    };
    let mut sink = DirectorySink::new(settings.output_dir.clone());
    let at = SystemClock.now();
    let mut artifacts = Vec::new();
    if matches!(format, ExportFormat::Csv | ExportFormat::Both) {
        artifacts.push(csv_artifact(&details.title, &comments, &csv_options(settings), at));
    }
    if matches!(format, ExportFormat::Json | ExportFormat::Both) {
        artifacts.push(json_artifact(&details.title, &details, &comments, at)?);
    }
    println!();
    for artifact in &artifacts {
        let path = sink.save(artifact)?;
        println!("Saved {} ({})", path.display(), artifact.content_type());
    }
    Ok(())
}

fn csv_options(settings: &HarvestSettings) -> CsvOptions {
    CsvOptions {
        date_format: settings.csv_date_format.clone(),
        zone: DateZone::Local,
    }
}

/// Flips `cancel` on the first Ctrl+C; a second one exits immediately.
fn install_interrupt_handler(cancel: CancellationToken) {
    let spawned = thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(%err, "cannot listen for Ctrl+C");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                eprintln!("\nStopping after the current video (Ctrl+C again to abort)...");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    process::exit(130);
                }
            });
        });
    if let Err(err) = spawned {
        warn!(%err, "cannot spawn Ctrl+C listener");
    }
}

/// Count-style bar over the eligible videos; failures are printed above it.
#[derive(Default)]
struct ProgressReporter {
    bar: Option<ProgressBar>,
}

impl BulkObserver for ProgressReporter {
    fn on_event(&mut self, event: &BulkEvent) {
        match event {
            BulkEvent::Started { total, skipped } => {
                if *skipped > 0 {
                    println!("Skipping {skipped} videos without comments.");
                }
                let bar = ProgressBar::new(*total as u64);
                if let Ok(style) = ProgressStyle::with_template(
                    "{spinner:.green} {pos}/{len} [{bar:.cyan/blue}] {percent:>3}%  elapsed: {elapsed_precise}  {msg}",
                ) {
                    bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
                }
                bar.enable_steady_tick(Duration::from_millis(100));
                self.bar = Some(bar);
            }
            BulkEvent::Progress {
                video_id, outcome, ..
            } => {
                let Some(bar) = &self.bar else { return };
                bar.inc(1);
                match outcome {
                    ItemOutcome::Exported {
                        comments,
                        limit_reached,
                        ..
                    } => {
                        let capped = if *limit_reached { " (capped)" } else { "" };
                        bar.set_message(format!("{video_id}: {comments} comments{capped}"));
                    }
                    ItemOutcome::Failed { collected, error } => bar.println(format!(
                        "Warning: failed to export {video_id} after {collected} comments: {error}"
                    )),
                }
            }
            BulkEvent::Finished(_) => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
            }
        }
    }
}

/// Accepts a bare id, an `@handle` or a channel / handle URL.
fn normalize_channel_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(captures) = CHANNEL_ID_URL.captures(trimmed) {
        return captures[1].to_string();
    }
    if let Some(captures) = HANDLE_URL.captures(trimmed) {
        return format!("@{}", &captures[1]);
    }
    trimmed.to_string()
}

/// Accepts a bare id or a watch, share, shorts, embed or live URL.
fn normalize_video_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    VIDEO_URL
        .captures(trimmed)
        .map(|captures| captures[1].to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

fn format_count(value: Option<u64>) -> String {
    let Some(value) = value else {
        return "n/a".to_string();
    };
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}

fn format_date(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown date".to_string())
}

fn preview(text: &str) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= PREVIEW_CHARS {
        return single_line;
    }
    let clipped: String = single_line.chars().take(PREVIEW_CHARS).collect();
    format!("{clipped}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn channel_flags_parse() {
        let cli = Cli::try_parse_from([
            "tubeharvest",
            "channel",
            "@creator",
            "--metric",
            "likes",
            "--discovery",
            "uploads",
            "--export-comments",
            "--format",
            "both",
            "-o",
            "/tmp/out",
        ])
        .unwrap();
        assert_eq!(cli.output, Some(PathBuf::from("/tmp/out")));
        let Command::Channel(args) = cli.command else {
            panic!("expected channel command");
        };
        assert_eq!(args.metric, VideoMetric::Likes);
        assert_eq!(args.discovery, Discovery::UploadsPlaylist);
        assert_eq!(args.format, ExportFormat::Both);
        assert!(args.export_comments);
    }

    #[test]
    fn channel_identifiers_are_normalized() {
        assert_eq!(
            normalize_channel_identifier("https://www.youtube.com/channel/UCabc_12-x/videos"),
            "UCabc_12-x"
        );
        assert_eq!(
            normalize_channel_identifier("https://youtube.com/@Some.Creator/featured"),
            "@Some.Creator"
        );
        assert_eq!(normalize_channel_identifier("  @creator "), "@creator");
        assert_eq!(normalize_channel_identifier("UC123"), "UC123");
    }

    #[test]
    fn video_identifiers_are_normalized() {
        assert_eq!(
            normalize_video_identifier("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42"),
            "dQw4w9WgXcQ"
        );
        assert_eq!(normalize_video_identifier("https://youtu.be/dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(
            normalize_video_identifier("https://youtube.com/shorts/abcdefghijk"),
            "abcdefghijk"
        );
        assert_eq!(normalize_video_identifier("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
    }

    #[test]
    fn counts_use_thousands_separators() {
        assert_eq!(format_count(Some(0)), "0");
        assert_eq!(format_count(Some(999)), "999");
        assert_eq!(format_count(Some(1000)), "1,000");
        assert_eq!(format_count(Some(1234567)), "1,234,567");
        assert_eq!(format_count(None), "n/a");
    }

    #[test]
    fn previews_are_single_line_and_clipped() {
        assert_eq!(preview("a\n b  c"), "a b c");
        let long = "x".repeat(PREVIEW_CHARS + 10);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 1);
    }
}
