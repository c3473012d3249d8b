//! Channel resolution and video catalog discovery.
//!
//! Discovery pages yield video ids; every page is immediately followed by one
//! `videos` call for exactly those ids so the catalog carries statistics. The
//! accumulated set is ranked by the requested metric and only then truncated,
//! so the catalog holds the top-N of what was fetched rather than the first N
//! that arrived.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::api::{Transport, YouTubeApi};
use crate::error::{HarvestError, HarvestResult};
use crate::models::{ChannelSummary, VideoDetails, VideoSummary, api_count, parse_timestamp};
use crate::pager::{Interrupted, Pacer, Page, PageLimits, PageSource, ThreadPacer, drain_pages};
use crate::ranking::{RankedCatalog, VideoMetric, rank_videos};

pub const DEFAULT_MAX_VIDEOS: usize = 500;
pub const DEFAULT_CATALOG_PAGE_DELAY: Duration = Duration::from_millis(200);
/// `maxResults` for search and playlistItems.
const DISCOVERY_PAGE_SIZE: &str = "50";

const CHANNELS_ENDPOINT: &str = "channels";
const SEARCH_ENDPOINT: &str = "search";
const PLAYLIST_ITEMS_ENDPOINT: &str = "playlistItems";
const VIDEOS_ENDPOINT: &str = "videos";

/// How video ids are enumerated for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discovery {
    /// `search` ordered by date. Costs more quota and may miss old uploads.
    #[default]
    Search,
    /// Walks the channel's uploads playlist.
    UploadsPlaylist,
}

impl FromStr for Discovery {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(Self::Search),
            "uploads" | "playlist" | "uploads-playlist" => Ok(Self::UploadsPlaylist),
            other => Err(format!(
                "unknown discovery strategy `{other}` (expected search or uploads)"
            )),
        }
    }
}

impl fmt::Display for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Search => "search",
            Self::UploadsPlaylist => "uploads",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    /// A channel id (`UC...`) or a handle, with or without the leading `@`.
    pub channel_identifier: String,
    pub ranking_metric: VideoMetric,
    pub max_items: usize,
    pub discovery: Discovery,
}

impl CatalogQuery {
    pub fn new(channel_identifier: impl Into<String>) -> Self {
        Self {
            channel_identifier: channel_identifier.into(),
            ranking_metric: VideoMetric::default(),
            max_items: DEFAULT_MAX_VIDEOS,
            discovery: Discovery::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoCatalog {
    pub channel: ChannelSummary,
    /// Ranked by `metric`, at most `max_items` long.
    pub videos: Vec<VideoSummary>,
    pub metric: VideoMetric,
    pub pages: usize,
    /// Discovery stopped because `max_items` summaries had been gathered.
    pub limit_reached: bool,
    /// A later discovery page failed; `videos` holds what came before it.
    pub interrupted: Option<HarvestError>,
}

impl VideoCatalog {
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_some()
    }

    /// Hands the videos to a memoized view for display-time re-sorting.
    pub fn into_ranked(self) -> RankedCatalog {
        RankedCatalog::new(self.videos)
    }
}

pub struct VideoCatalogBuilder<'a, T> {
    api: &'a YouTubeApi<T>,
    pacer: &'a dyn Pacer,
    page_delay: Duration,
}

impl<'a, T: Transport> VideoCatalogBuilder<'a, T> {
    pub fn new(api: &'a YouTubeApi<T>) -> Self {
        Self {
            api,
            pacer: &ThreadPacer,
            page_delay: DEFAULT_CATALOG_PAGE_DELAY,
        }
    }

    pub fn with_pacer(mut self, pacer: &'a dyn Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Looks the identifier up as a handle first, then as a channel id.
    pub fn resolve_channel(&self, identifier: &str) -> HarvestResult<ChannelSummary> {
        let trimmed = identifier.trim();
        let bare = trimmed.strip_prefix('@').unwrap_or(trimmed);
        if bare.is_empty() {
            return Err(HarvestError::ChannelNotFound(identifier.to_string()));
        }

        // A handle lookup the API rejects still gets the id lookup; its error
        // is reported only when the id lookup finds nothing.
        let mut handle_error = None;
        for lookup in ["forHandle", "id"] {
            let response: ChannelListResponse = match self.api.get_as(
                CHANNELS_ENDPOINT,
                &[("part", "snippet,statistics,contentDetails"), (lookup, bare)],
            ) {
                Ok(response) => response,
                Err(err) if lookup == "forHandle" && err.is_transport() => {
                    warn!(handle = bare, error = %err, "handle lookup failed, trying channel id");
                    handle_error = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(item) = response.items.into_iter().next() {
                let channel = item.into_summary();
                info!(channel_id = %channel.id, title = %channel.title, lookup, "channel resolved");
                return Ok(channel);
            }
        }
        Err(handle_error.unwrap_or_else(|| HarvestError::ChannelNotFound(trimmed.to_string())))
    }

    pub fn build(&self, query: &CatalogQuery) -> HarvestResult<VideoCatalog> {
        let max_items = query.max_items.max(1);
        let channel = self.resolve_channel(&query.channel_identifier)?;

        let playlist = match query.discovery {
            Discovery::Search => None,
            Discovery::UploadsPlaylist => match channel.uploads_playlist_id.as_deref() {
                Some(uploads) => Some(uploads),
                None => {
                    warn!(channel_id = %channel.id, "channel exposes no uploads playlist, using search");
                    None
                }
            },
        };
        let limits = PageLimits::items(max_items).with_page_delay(self.page_delay);
        let drained = {
            let mut source = DiscoveryPages {
                api: self.api,
                channel_id: &channel.id,
                playlist,
                seen: HashSet::new(),
            };
            drain_pages(&mut source, &limits, self.pacer)
        };

        let (run, interrupted) = match drained {
            Ok(run) => (run, None),
            Err(Interrupted { partial, error }) => {
                warn!(
                    channel_id = %channel.id,
                    collected = partial.items.len(),
                    %error,
                    "video discovery interrupted"
                );
                (partial, Some(error))
            }
        };

        let limit_reached = run.items.len() >= max_items;
        let mut videos = rank_videos(&run.items, query.ranking_metric);
        videos.truncate(max_items);
        info!(
            channel_id = %channel.id,
            discovered = run.items.len(),
            kept = videos.len(),
            pages = run.pages,
            metric = %query.ranking_metric,
            "video catalog built"
        );

        Ok(VideoCatalog {
            videos,
            metric: query.ranking_metric,
            pages: run.pages,
            limit_reached,
            interrupted,
            channel,
        })
    }

    pub fn lookup_video(&self, video_id: &str) -> HarvestResult<VideoDetails> {
        let video_id = video_id.trim();
        if video_id.is_empty() {
            return Err(HarvestError::VideoNotFound(String::new()));
        }
        let response: VideoListResponse = self
            .api
            .get_as(VIDEOS_ENDPOINT, &[("part", "snippet,statistics"), ("id", video_id)])?;
        response
            .items
            .into_iter()
            .next()
            .map(VideoItem::into_details)
            .ok_or_else(|| HarvestError::VideoNotFound(video_id.to_string()))
    }
}

struct DiscoveryPages<'a, T> {
    api: &'a YouTubeApi<T>,
    channel_id: &'a str,
    /// `None` walks search results instead.
    playlist: Option<&'a str>,
    seen: HashSet<String>,
}

impl<T: Transport> DiscoveryPages<'_, T> {
    fn search_ids(&self, cursor: Option<&str>) -> HarvestResult<(Vec<String>, Option<String>)> {
        let mut params = vec![
            ("part", "snippet"),
            ("channelId", self.channel_id),
            ("maxResults", DISCOVERY_PAGE_SIZE),
            ("order", "date"),
            ("type", "video"),
        ];
        if let Some(token) = cursor {
            params.push(("pageToken", token));
        }
        let response: SearchListResponse = self.api.get_as(SEARCH_ENDPOINT, &params)?;
        let ids = response
            .items
            .into_iter()
            .filter_map(|item| item.id.video_id)
            .collect();
        Ok((ids, response.next_page_token))
    }

    fn playlist_ids(
        &self,
        playlist: &str,
        cursor: Option<&str>,
    ) -> HarvestResult<(Vec<String>, Option<String>)> {
        let mut params = vec![
            ("part", "contentDetails"),
            ("playlistId", playlist),
            ("maxResults", DISCOVERY_PAGE_SIZE),
        ];
        if let Some(token) = cursor {
            params.push(("pageToken", token));
        }
        let response: PlaylistItemListResponse =
            self.api.get_as(PLAYLIST_ITEMS_ENDPOINT, &params)?;
        let ids = response
            .items
            .into_iter()
            .filter_map(|item| item.content_details.video_id)
            .collect();
        Ok((ids, response.next_page_token))
    }

    /// One `videos` call for `ids`; results come back in `ids` order and ids
    /// the API no longer knows are dropped.
    fn details(&self, ids: &[String]) -> HarvestResult<Vec<VideoSummary>> {
        let joined = ids.join(",");
        let response: VideoListResponse = self.api.get_as(
            VIDEOS_ENDPOINT,
            &[("part", "statistics,snippet"), ("id", joined.as_str())],
        )?;
        let mut by_id: HashMap<String, VideoItem> = response
            .items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .map(VideoItem::into_summary)
            .collect())
    }
}

impl<T: Transport> PageSource for DiscoveryPages<'_, T> {
    type Item = VideoSummary;

    fn next_page(&mut self, cursor: Option<&str>) -> HarvestResult<Page<VideoSummary>> {
        let (ids, next) = match self.playlist {
            Some(playlist) => self.playlist_ids(playlist, cursor)?,
            None => self.search_ids(cursor)?,
        };
        let fresh: Vec<String> = ids
            .into_iter()
            .filter(|id| self.seen.insert(id.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(Page::new(Vec::new(), next));
        }
        Ok(Page::new(self.details(&fresh)?, next))
    }
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

impl Thumbnails {
    fn list_size(self) -> Option<String> {
        self.medium.or(self.high).or(self.default).map(|thumb| thumb.url)
    }

    fn large(self) -> Option<String> {
        self.high.or(self.medium).or(self.default).map(|thumb| thumb.url)
    }
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    id: String,
    #[serde(default)]
    snippet: ChannelSnippet,
    #[serde(default)]
    statistics: ChannelStatistics,
    #[serde(default)]
    content_details: ChannelContentDetails,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    #[serde(default, deserialize_with = "api_count")]
    subscriber_count: Option<u64>,
    #[serde(default, deserialize_with = "api_count")]
    video_count: Option<u64>,
    #[serde(default, deserialize_with = "api_count")]
    view_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    #[serde(default)]
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Default, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

impl ChannelItem {
    fn into_summary(self) -> ChannelSummary {
        ChannelSummary {
            id: self.id,
            title: self.snippet.title,
            description: self.snippet.description,
            thumbnail_url: self.snippet.thumbnails.list_size(),
            subscriber_count: self.statistics.subscriber_count,
            video_count: self.statistics.video_count,
            view_count: self.statistics.view_count,
            uploads_playlist_id: self.content_details.related_playlists.uploads,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: SearchResultId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemListResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    #[serde(default)]
    content_details: PlaylistItemDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: VideoSnippet,
    #[serde(default)]
    statistics: VideoStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    channel_title: String,
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    #[serde(default, deserialize_with = "api_count")]
    view_count: Option<u64>,
    #[serde(default, deserialize_with = "api_count")]
    like_count: Option<u64>,
    #[serde(default, deserialize_with = "api_count")]
    comment_count: Option<u64>,
}

impl VideoItem {
    fn into_summary(self) -> VideoSummary {
        VideoSummary {
            id: self.id,
            title: self.snippet.title,
            thumbnail_url: self.snippet.thumbnails.list_size(),
            published_at: parse_timestamp(self.snippet.published_at.as_deref()),
            view_count: self.statistics.view_count,
            like_count: self.statistics.like_count,
            comment_count: self.statistics.comment_count,
        }
    }

    fn into_details(self) -> VideoDetails {
        VideoDetails {
            id: self.id,
            title: self.snippet.title,
            description: self.snippet.description,
            channel_title: self.snippet.channel_title,
            published_at: parse_timestamp(self.snippet.published_at.as_deref()),
            view_count: self.statistics.view_count,
            like_count: self.statistics.like_count,
            comment_count: self.statistics.comment_count,
            thumbnail_url: self.snippet.thumbnails.large(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::{Value, json};

    pub(crate) fn channel_body(id: &str, uploads: Option<&str>) -> Value {
        let mut item = json!({
            "id": id,
            "snippet": {
                "title": format!("Channel {id}"),
                "description": "about",
                "thumbnails": {
                    "default": {"url": "https://img/ch-default.jpg"},
                    "medium": {"url": "https://img/ch-medium.jpg"}
                }
            },
            "statistics": {"subscriberCount": "1500", "videoCount": "12", "viewCount": "99000"}
        });
        if let Some(uploads) = uploads {
            item["contentDetails"] = json!({"relatedPlaylists": {"uploads": uploads}});
        }
        json!({ "items": [item] })
    }

    /// `v<n>` has `(n * 37) % 11` views and `n` comments.
    pub(crate) fn video_item(id: &str) -> Value {
        let n: u64 = id.trim_start_matches('v').parse().unwrap_or(0);
        json!({
            "id": id,
            "snippet": {
                "title": format!("Video {n}"),
                "description": format!("description {n}"),
                "channelTitle": "Channel",
                "publishedAt": format!("2024-01-{:02}T00:00:00Z", n % 28 + 1),
                "thumbnails": {
                    "medium": {"url": format!("https://img/{id}-m.jpg")},
                    "high": {"url": format!("https://img/{id}-h.jpg")}
                }
            },
            "statistics": {
                "viewCount": ((n * 37) % 11).to_string(),
                "likeCount": (n * 2).to_string(),
                "commentCount": n.to_string()
            }
        })
    }

    pub(crate) fn videos_body(ids: &str) -> Value {
        let items: Vec<Value> = ids
            .split(',')
            .filter(|id| !id.is_empty())
            .map(video_item)
            .collect();
        json!({ "items": items })
    }

    pub(crate) fn search_body(ids: &[&str], next: Option<&str>) -> Value {
        let items: Vec<Value> = ids
            .iter()
            .map(|id| json!({"id": {"kind": "youtube#video", "videoId": id}}))
            .collect();
        paged(items, next)
    }

    pub(crate) fn playlist_body(ids: &[&str], next: Option<&str>) -> Value {
        let items: Vec<Value> = ids
            .iter()
            .map(|id| json!({"contentDetails": {"videoId": id}}))
            .collect();
        paged(items, next)
    }

    fn paged(items: Vec<Value>, next: Option<&str>) -> Value {
        let mut page = json!({ "items": items });
        if let Some(token) = next {
            page["nextPageToken"] = json!(token);
        }
        page
    }
}
