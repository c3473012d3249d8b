//! Records produced by the fetch pipeline.
//!
//! Everything here is immutable once fetched: ranking and filtering build new
//! sequences instead of reordering these in place. Field names serialize in
//! camelCase so JSON exports read like the API payloads they came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One row of a channel catalog: identity plus the statistics used for ranking.
///
/// The API hides statistics for some videos, so every count is optional and
/// compares as zero when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u64>,
}

impl VideoSummary {
    pub fn views(&self) -> u64 {
        self.view_count.unwrap_or(0)
    }

    pub fn likes(&self) -> u64 {
        self.like_count.unwrap_or(0)
    }

    pub fn comments(&self) -> u64 {
        self.comment_count.unwrap_or(0)
    }

    /// Videos without a known comment count are never sent to bulk export.
    pub fn is_exportable(&self) -> bool {
        self.comments() > 0
    }
}

/// Top-level comment of a thread. Replies are not collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_profile_image_url: Option<String>,
    /// May contain inline HTML such as `<b>` or `<a href=...>`.
    #[serde(default)]
    pub text_display: String,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Channel header resolved before discovery starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    /// Playlist holding every public upload; required for playlist traversal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads_playlist_id: Option<String>,
}

/// Single-video analysis view: the summary fields plus descriptive text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl VideoDetails {
    pub fn summary(&self) -> VideoSummary {
        VideoSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            published_at: self.published_at,
            view_count: self.view_count,
            like_count: self.like_count,
            comment_count: self.comment_count,
        }
    }
}

/// Parses the RFC 3339 timestamps the API returns. Anything unparseable is
/// treated as unknown.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|value| DateTime::parse_from_rfc3339(value.trim()).ok())
        .map(|value| value.with_timezone(&Utc))
}

/// Statistics arrive as decimal strings (`"viewCount": "1234"`); some mocks
/// and older payloads use plain numbers. Both decode, garbage becomes `None`.
pub(crate) fn api_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCount {
        Number(u64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<RawCount>::deserialize(deserializer)? {
        Some(RawCount::Number(value)) => Some(value),
        Some(RawCount::Text(text)) => text.trim().parse().ok(),
        Some(RawCount::Other(_)) | None => None,
    })
}
