//! CSV / JSON serializers and the artifact hand-off.
//!
//! Serializers are pure: identical input and an identical clock reading give
//! byte-identical output. Writing the bytes somewhere is the job of an
//! [`ArtifactSink`].

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HarvestError, HarvestResult};
use crate::models::CommentRecord;

pub const CSV_HEADER: &str = "Author,Comment,Likes,Published Date";
/// en-US short date (`1/31/2024`).
pub const DEFAULT_DATE_FORMAT: &str = "%-m/%-d/%Y";
const SLUG_CHARS: usize = 30;

static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Time zone used when rendering CSV dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateZone {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub date_format: String,
    pub zone: DateZone,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            zone: DateZone::Local,
        }
    }
}

/// Source of "now" for export timestamps.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn is_valid_date_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Removes `<...>` tag sequences; entities are left untouched.
pub fn strip_markup(text: &str) -> String {
    MARKUP.replace_all(text, "").into_owned()
}

/// Wraps `value` in double quotes, doubling embedded quotes.
pub fn quote_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

pub fn format_short_date(timestamp: Option<DateTime<Utc>>, options: &CsvOptions) -> String {
    let Some(timestamp) = timestamp else {
        return String::new();
    };
    let format = if is_valid_date_format(&options.date_format) {
        options.date_format.as_str()
    } else {
        DEFAULT_DATE_FORMAT
    };
    match options.zone {
        DateZone::Local => timestamp.with_timezone(&Local).format(format).to_string(),
        DateZone::Utc => timestamp.format(format).to_string(),
    }
}

pub fn comment_csv_row(comment: &CommentRecord, options: &CsvOptions) -> String {
    let date = format_short_date(comment.published_at, options);
    // A custom date format may introduce commas; only then is it quoted.
    let date = if date.contains([',', '"', '\n']) {
        quote_field(&date)
    } else {
        date
    };
    format!(
        "{},{},{},{}",
        quote_field(&comment.author_name),
        quote_field(&strip_markup(&comment.text_display)),
        comment.like_count,
        date
    )
}

/// Header plus one row per comment, `\n`-separated, no trailing newline.
pub fn comments_csv(comments: &[CommentRecord], options: &CsvOptions) -> String {
    let mut lines = Vec::with_capacity(comments.len() + 1);
    lines.push(CSV_HEADER.to_string());
    lines.extend(comments.iter().map(|comment| comment_csv_row(comment, options)));
    lines.join("\n")
}

/// The `{video, comments, exportedAt}` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument<V> {
    pub video: V,
    pub comments: Vec<CommentRecord>,
    pub exported_at: String,
}

pub fn export_json<V: Serialize>(
    video: &V,
    comments: &[CommentRecord],
    exported_at: DateTime<Utc>,
) -> serde_json::Result<String> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Borrowed<'a, D> {
        video: &'a D,
        comments: &'a [CommentRecord],
        exported_at: String,
    }

    serde_json::to_string_pretty(&Borrowed {
        video,
        comments,
        exported_at: exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    CommentsCsv,
    DataJson,
}

impl ArtifactKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::CommentsCsv => "comments",
            Self::DataJson => "data",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::CommentsCsv => "csv",
            Self::DataJson => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::CommentsCsv => "text/csv;charset=utf-8",
            Self::DataJson => "application/json",
        }
    }
}

/// A serialized payload plus its suggested filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub kind: ArtifactKind,
    pub body: Vec<u8>,
}

impl Artifact {
    pub fn content_type(&self) -> &'static str {
        self.kind.content_type()
    }
}

/// First 30 characters of `title`, reduced to filename-safe characters.
pub fn title_slug(title: &str) -> String {
    let slug: String = title
        .trim()
        .chars()
        .take(SLUG_CHARS)
        .map(|ch| match ch {
            ch if ch.is_alphanumeric() || ch == '-' || ch == '_' => ch,
            ch if ch.is_whitespace() => '-',
            _ => '_',
        })
        .collect();
    let slug = slug.trim_matches(|ch| ch == '-' || ch == '_');
    if slug.is_empty() {
        "video".to_string()
    } else {
        slug.to_string()
    }
}

/// `<slug>-<kind>-<unix millis>.<ext>`
pub fn artifact_filename(title: &str, kind: ArtifactKind, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}.{}",
        title_slug(title),
        kind.label(),
        at.timestamp_millis(),
        kind.extension()
    )
}

pub fn csv_artifact(
    title: &str,
    comments: &[CommentRecord],
    options: &CsvOptions,
    at: DateTime<Utc>,
) -> Artifact {
    Artifact {
        filename: artifact_filename(title, ArtifactKind::CommentsCsv, at),
        kind: ArtifactKind::CommentsCsv,
        body: comments_csv(comments, options).into_bytes(),
    }
}

pub fn json_artifact<V: Serialize>(
    title: &str,
    video: &V,
    comments: &[CommentRecord],
    at: DateTime<Utc>,
) -> HarvestResult<Artifact> {
    let filename = artifact_filename(title, ArtifactKind::DataJson, at);
    let body = export_json(video, comments, at).map_err(|err| HarvestError::Sink {
        filename: filename.clone(),
        message: err.to_string(),
    })?;
    Ok(Artifact {
        filename,
        kind: ArtifactKind::DataJson,
        body: body.into_bytes(),
    })
}

/// External "save/download" collaborator.
pub trait ArtifactSink {
    /// Persists `artifact` and reports where it went.
    fn save(&mut self, artifact: &Artifact) -> HarvestResult<PathBuf>;
}

/// Writes artifacts into a directory, never overwriting an existing file.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn write_new(&self, artifact: &Artifact) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let (stem, ext) = artifact
            .filename
            .rsplit_once('.')
            .unwrap_or((artifact.filename.as_str(), ""));

        let mut attempt = 1usize;
        loop {
            let name = if attempt == 1 {
                artifact.filename.clone()
            } else if ext.is_empty() {
                format!("{stem}-{attempt}")
            } else {
                format!("{stem}-{attempt}.{ext}")
            };
            let path = self.root.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_or_discard(file, &path, &artifact.body)?;
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err),
            }
        }
    }
}

/// Writes `body` to the freshly created `path`, removing it again if the
/// write fails so no truncated artifact is left behind.
fn write_or_discard(mut file: impl Write, path: &Path, body: &[u8]) -> io::Result<()> {
    if let Err(err) = file.write_all(body).and_then(|()| file.flush()) {
        drop(file);
        if let Err(cleanup) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %cleanup, "could not remove partial artifact");
        }
        return Err(err);
    }
    Ok(())
}

impl ArtifactSink for DirectorySink {
    fn save(&mut self, artifact: &Artifact) -> HarvestResult<PathBuf> {
        let path = self.write_new(artifact).map_err(|err| HarvestError::Sink {
            filename: artifact.filename.clone(),
            message: err.to_string(),
        })?;
        info!(path = %path.display(), bytes = artifact.body.len(), "artifact written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VideoSummary, parse_timestamp};
    use anyhow::Result;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn utc_options() -> CsvOptions {
        CsvOptions {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            zone: DateZone::Utc,
        }
    }

    fn sample_comment() -> CommentRecord {
        CommentRecord {
            id: "c1".into(),
            author_name: "A \"B\"".into(),
            author_profile_image_url: None,
            text_display: "<b>hi</b>".into(),
            like_count: 5,
            published_at: parse_timestamp(Some("2024-01-01T00:00:00Z")),
        }
    }

    fn sample_video() -> VideoSummary {
        VideoSummary {
            id: "v1".into(),
            title: "A video".into(),
            thumbnail_url: Some("https://img/v1.jpg".into()),
            published_at: parse_timestamp(Some("2023-12-24T08:30:00Z")),
            view_count: Some(1200),
            like_count: Some(40),
            comment_count: Some(7),
        }
    }

    #[test]
    fn csv_row_quotes_and_strips_markup() {
        let row = comment_csv_row(&sample_comment(), &utc_options());
        assert_eq!(row, "\"A \"\"B\"\"\",\"hi\",5,1/1/2024");
    }

    #[test]
    fn csv_document_has_header_and_no_trailing_newline() {
        let csv = comments_csv(&[sample_comment(), sample_comment()], &utc_options());
        let lines: Vec<&str> = csv.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(!csv.ends_with('\n'));
    }

    #[test]
    fn csv_output_parses_as_rfc4180() -> Result<()> {
        let mut tricky = sample_comment();
        tricky.text_display = "line one<br>still, one \"quoted\"".into();
        let csv = comments_csv(&[tricky], &utc_options());
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers()?.clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), ["Author", "Comment", "Likes", "Published Date"]);
        let record = reader.records().next().expect("one row")?;
        assert_eq!(&record[0], "A \"B\"");
        assert_eq!(&record[1], "line onestill, one \"quoted\"");
        assert_eq!(&record[2], "5");
        Ok(())
    }

    #[test]
    fn missing_dates_render_empty() {
        let mut comment = sample_comment();
        comment.published_at = None;
        assert!(comment_csv_row(&comment, &utc_options()).ends_with(",5,"));
    }

    #[test]
    fn custom_date_format_with_comma_is_quoted() {
        let options = CsvOptions {
            date_format: "%b %-d, %Y".into(),
            zone: DateZone::Utc,
        };
        let row = comment_csv_row(&sample_comment(), &options);
        assert!(row.ends_with(",5,\"Jan 1, 2024\""));
    }

    #[test]
    fn invalid_date_format_falls_back() {
        assert!(!is_valid_date_format("%Q"));
        let options = CsvOptions {
            date_format: "%Q".into(),
            zone: DateZone::Utc,
        };
        assert_eq!(format_short_date(sample_comment().published_at, &options), "1/1/2024");
    }

    #[test]
    fn json_export_round_trips_with_timestamp() -> Result<()> {
        let started = Utc::now();
        let video = sample_video();
        let body = export_json(&video, &[], Utc::now())?;

        let parsed: ExportDocument<VideoSummary> = serde_json::from_str(&body)?;
        assert_eq!(parsed.video, video);
        assert!(parsed.comments.is_empty());
        let exported_at = DateTime::parse_from_rfc3339(&parsed.exported_at)?;
        assert!(exported_at.timestamp_millis() >= started.timestamp_millis());
        Ok(())
    }

    #[test]
    fn json_export_is_deterministic_for_fixed_clock() -> Result<()> {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let first = export_json(&sample_video(), &[sample_comment()], at)?;
        let second = export_json(&sample_video(), &[sample_comment()], at)?;
        assert_eq!(first, second);
        assert!(first.contains("\"exportedAt\": \"2024-05-01T12:00:00.000Z\""));
        assert!(first.contains("\"authorName\": \"A \\\"B\\\"\""));
        Ok(())
    }

    #[test]
    fn slug_keeps_first_thirty_characters() {
        assert_eq!(title_slug("Hello World: Part 2?"), "Hello-World_-Part-2");
        assert_eq!(title_slug("///"), "video");
        let long = "x".repeat(50);
        assert_eq!(title_slug(&long).chars().count(), 30);
    }

    #[test]
    fn artifact_filename_has_kind_and_timestamp() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            artifact_filename("My Video", ArtifactKind::CommentsCsv, at),
            "My-Video-comments-1700000000123.csv"
        );
        assert_eq!(
            artifact_filename("My Video", ArtifactKind::DataJson, at),
            "My-Video-data-1700000000123.json"
        );
    }

    #[test]
    fn directory_sink_never_overwrites() -> Result<()> {
        let dir = tempdir()?;
        let mut sink = DirectorySink::new(dir.path().join("out"));
        let at = Utc.timestamp_millis_opt(1).unwrap();
        let artifact = csv_artifact("Same", &[sample_comment()], &utc_options(), at);

        let first = sink.save(&artifact)?;
        let second = sink.save(&artifact)?;
        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap().to_string_lossy(),
            "Same-comments-1-2.csv"
        );
        assert_eq!(fs::read(&first)?, artifact.body);
        Ok(())
    }

    #[test]
    fn failed_write_leaves_no_partial_file() -> Result<()> {
        struct DiskFull;
        impl Write for DiskFull {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("no space left on device"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let dir = tempdir()?;
        let path = dir.path().join("Clip-comments-1.csv");
        fs::write(&path, b"Author")?;

        let err = write_or_discard(DiskFull, &path, b"Author,Comment").unwrap_err();
        assert_eq!(err.to_string(), "no space left on device");
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
