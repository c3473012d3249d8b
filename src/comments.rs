//! Collects the top-level comments of one video.
//!
//! Pagination goes through [`drain_pages`]; the comment cap is enforced at the
//! page boundary, so a capped set holds every comment of the page in which the
//! cap was crossed. A failing page degrades the result to *partial* instead of
//! discarding what was already fetched.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{Transport, YouTubeApi};
use crate::error::{HarvestError, HarvestResult};
use crate::models::{CommentRecord, parse_timestamp};
use crate::pager::{Interrupted, Pacer, Page, PageLimits, PageSource, ThreadPacer, drain_pages};

pub const DEFAULT_MAX_COMMENTS: usize = 5000;
/// Largest `maxResults` the commentThreads endpoint accepts.
pub const COMMENT_PAGE_SIZE: usize = 100;
pub const DEFAULT_COMMENT_PAGE_DELAY: Duration = Duration::from_millis(200);

const COMMENT_THREADS_ENDPOINT: &str = "commentThreads";

/// Server-side ordering requested from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadOrder {
    /// Let the API choose (relevance for most videos).
    #[default]
    Default,
    Relevance,
    Time,
}

impl ThreadOrder {
    fn as_param(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Relevance => Some("relevance"),
            Self::Time => Some("time"),
        }
    }
}

impl FromStr for ThreadOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "relevance" => Ok(Self::Relevance),
            "time" => Ok(Self::Time),
            other => Err(format!(
                "unknown thread order `{other}` (expected default, relevance or time)"
            )),
        }
    }
}

impl fmt::Display for ThreadOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param().unwrap_or("default"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorOptions {
    pub max_comments: usize,
    pub page_size: usize,
    pub page_delay: Duration,
    pub order: ThreadOrder,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            max_comments: DEFAULT_MAX_COMMENTS,
            page_size: COMMENT_PAGE_SIZE,
            page_delay: DEFAULT_COMMENT_PAGE_DELAY,
            order: ThreadOrder::Default,
        }
    }
}

/// Comments gathered for one video.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentSet {
    pub video_id: String,
    pub comments: Vec<CommentRecord>,
    pub pages: usize,
    /// `comments.len()` reached the configured cap.
    pub limit_reached: bool,
    /// Set when a page failed; `comments` then holds the earlier pages only.
    pub failure: Option<HarvestError>,
}

impl CommentSet {
    pub fn is_partial(&self) -> bool {
        self.failure.is_some()
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }
}

/// Seam used by bulk export so tests can script per-video outcomes.
pub trait CommentSource {
    fn collect(&self, video_id: &str) -> CommentSet;
}

pub struct CommentCollector<'a, T> {
    api: &'a YouTubeApi<T>,
    options: CollectorOptions,
    pacer: &'a dyn Pacer,
}

impl<'a, T: Transport> CommentCollector<'a, T> {
    pub fn new(api: &'a YouTubeApi<T>, options: CollectorOptions) -> Self {
        Self {
            api,
            options,
            pacer: &ThreadPacer,
        }
    }

    pub fn with_pacer(mut self, pacer: &'a dyn Pacer) -> Self {
        self.pacer = pacer;
        self
    }
}

impl<T: Transport> CommentSource for CommentCollector<'_, T> {
    fn collect(&self, video_id: &str) -> CommentSet {
        let max_comments = self.options.max_comments.max(1);
        let mut pages = CommentThreadPages {
            api: self.api,
            video_id,
            page_size: self.options.page_size.clamp(1, COMMENT_PAGE_SIZE).to_string(),
            order: self.options.order,
        };
        let limits = PageLimits::items(max_comments).with_page_delay(self.options.page_delay);

        match drain_pages(&mut pages, &limits, self.pacer) {
            Ok(run) => {
                debug!(
                    video_id,
                    comments = run.items.len(),
                    pages = run.pages,
                    limit_reached = run.limit_reached,
                    "comment collection finished"
                );
                CommentSet {
                    video_id: video_id.to_string(),
                    comments: run.items,
                    pages: run.pages,
                    limit_reached: run.limit_reached,
                    failure: None,
                }
            }
            Err(Interrupted { partial, error }) => {
                warn!(
                    video_id,
                    collected = partial.items.len(),
                    %error,
                    "comment collection interrupted"
                );
                CommentSet {
                    video_id: video_id.to_string(),
                    limit_reached: partial.items.len() >= max_comments,
                    comments: partial.items,
                    pages: partial.pages,
                    failure: Some(error),
                }
            }
        }
    }
}

struct CommentThreadPages<'a, T> {
    api: &'a YouTubeApi<T>,
    video_id: &'a str,
    page_size: String,
    order: ThreadOrder,
}

impl<T: Transport> PageSource for CommentThreadPages<'_, T> {
    type Item = CommentRecord;

    fn next_page(&mut self, cursor: Option<&str>) -> HarvestResult<Page<CommentRecord>> {
        let mut params = vec![
            ("part", "snippet"),
            ("videoId", self.video_id),
            ("maxResults", self.page_size.as_str()),
        ];
        if let Some(order) = self.order.as_param() {
            params.push(("order", order));
        }
        if let Some(token) = cursor {
            params.push(("pageToken", token));
        }

        let response: ThreadListResponse = self.api.get_as(COMMENT_THREADS_ENDPOINT, &params)?;
        let items = response
            .items
            .into_iter()
            .map(CommentThread::into_record)
            .collect();
        Ok(Page::new(items, response.next_page_token))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadListResponse {
    #[serde(default)]
    items: Vec<CommentThread>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentThread {
    id: String,
    snippet: ThreadSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadSnippet {
    top_level_comment: TopLevelComment,
}

#[derive(Debug, Deserialize)]
struct TopLevelComment {
    id: Option<String>,
    snippet: CommentSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    #[serde(default)]
    author_display_name: String,
    author_profile_image_url: Option<String>,
    #[serde(default)]
    text_display: String,
    #[serde(default)]
    like_count: u64,
    published_at: Option<String>,
}

impl CommentThread {
    fn into_record(self) -> CommentRecord {
        let TopLevelComment { id, snippet } = self.snippet.top_level_comment;
        CommentRecord {
            id: id.unwrap_or(self.id),
            author_name: snippet.author_display_name,
            author_profile_image_url: snippet.author_profile_image_url,
            text_display: snippet.text_display,
            like_count: snippet.like_count,
            published_at: parse_timestamp(snippet.published_at.as_deref()),
        }
    }
}
