//! Ordering and filtering of fetched videos and comments.
//!
//! Every ranking is a stable sort over a copy of the input: items with equal
//! keys keep their incoming order, and the input is never reordered in place.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::export::strip_markup;
use crate::models::{CommentRecord, VideoSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoMetric {
    #[default]
    Views,
    Likes,
    Comments,
    /// Most recent first.
    Date,
}

impl VideoMetric {
    pub const ALL: [VideoMetric; 4] = [Self::Views, Self::Likes, Self::Comments, Self::Date];

    pub fn name(self) -> &'static str {
        match self {
            Self::Views => "views",
            Self::Likes => "likes",
            Self::Comments => "comments",
            Self::Date => "date",
        }
    }

    fn compare(self, a: &VideoSummary, b: &VideoSummary) -> Ordering {
        match self {
            Self::Views => b.views().cmp(&a.views()),
            Self::Likes => b.likes().cmp(&a.likes()),
            Self::Comments => b.comments().cmp(&a.comments()),
            Self::Date => by_time(a.published_at, b.published_at, true),
        }
    }
}

impl FromStr for VideoMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "views" | "popular" => Ok(Self::Views),
            "likes" => Ok(Self::Likes),
            "comments" => Ok(Self::Comments),
            "date" | "recent" => Ok(Self::Date),
            other => Err(format!(
                "unknown video metric `{other}` (expected views, likes, comments or date)"
            )),
        }
    }
}

impl fmt::Display for VideoMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommentOrder {
    #[default]
    Recent,
    Oldest,
    Likes,
}

impl CommentOrder {
    pub const ALL: [CommentOrder; 3] = [Self::Recent, Self::Oldest, Self::Likes];

    pub fn name(self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Oldest => "oldest",
            Self::Likes => "likes",
        }
    }

    fn compare(self, a: &CommentRecord, b: &CommentRecord) -> Ordering {
        match self {
            Self::Recent => by_time(a.published_at, b.published_at, true),
            Self::Oldest => by_time(a.published_at, b.published_at, false),
            Self::Likes => b.like_count.cmp(&a.like_count),
        }
    }
}

impl FromStr for CommentOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recent" | "newest" => Ok(Self::Recent),
            "oldest" => Ok(Self::Oldest),
            "likes" | "top" => Ok(Self::Likes),
            other => Err(format!(
                "unknown comment order `{other}` (expected recent, oldest or likes)"
            )),
        }
    }
}

impl fmt::Display for CommentOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown timestamps always sort after known ones.
fn by_time(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>, newest_first: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if newest_first => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Positions of `videos` in ranked order.
pub fn rank_video_indices(videos: &[VideoSummary], metric: VideoMetric) -> Vec<usize> {
    let mut order: Vec<usize> = (0..videos.len()).collect();
    order.sort_by(|&a, &b| metric.compare(&videos[a], &videos[b]));
    order
}

pub fn rank_videos(videos: &[VideoSummary], metric: VideoMetric) -> Vec<VideoSummary> {
    let mut ranked = videos.to_vec();
    ranked.sort_by(|a, b| metric.compare(a, b));
    ranked
}

pub fn rank_comments(comments: &[CommentRecord], order: CommentOrder) -> Vec<CommentRecord> {
    let mut ranked = comments.to_vec();
    ranked.sort_by(|a, b| order.compare(a, b));
    ranked
}

/// A catalog plus a memoized display ordering.
///
/// The ordering is recomputed only when the metric changes or the catalog is
/// replaced. The fetch-time top-N selection is never revisited here, so a
/// display metric that differs from the fetch metric only reorders what was
/// retained.
#[derive(Debug, Default)]
pub struct RankedCatalog {
    videos: Vec<VideoSummary>,
    cached: RwLock<Option<(VideoMetric, Arc<[usize]>)>>,
    recomputations: AtomicUsize,
}

impl RankedCatalog {
    pub fn new(videos: Vec<VideoSummary>) -> Self {
        Self {
            videos,
            cached: RwLock::new(None),
            recomputations: AtomicUsize::new(0),
        }
    }

    pub fn videos(&self) -> &[VideoSummary] {
        &self.videos
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    /// Swaps in a new catalog and drops the cached ordering.
    pub fn replace(&mut self, videos: Vec<VideoSummary>) {
        self.videos = videos;
        *self.cached.get_mut() = None;
    }

    pub fn order(&self, metric: VideoMetric) -> Arc<[usize]> {
        if let Some((cached_metric, order)) = self.cached.read().as_ref()
            && *cached_metric == metric
        {
            return Arc::clone(order);
        }

        let order: Arc<[usize]> = rank_video_indices(&self.videos, metric).into();
        self.recomputations.fetch_add(1, AtomicOrdering::Relaxed);
        *self.cached.write() = Some((metric, Arc::clone(&order)));
        order
    }

    pub fn ranked(&self, metric: VideoMetric) -> Vec<&VideoSummary> {
        self.order(metric)
            .iter()
            .map(|&index| &self.videos[index])
            .collect()
    }

    /// How many times an ordering has actually been computed.
    pub fn recomputations(&self) -> usize {
        self.recomputations.load(AtomicOrdering::Relaxed)
    }
}

/// Search / minimum-likes / ordering applied to a comment set before display
/// or export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentFilter {
    /// Case-insensitive substring matched against author and markup-free text.
    pub search: Option<String>,
    pub min_likes: u64,
    pub order: CommentOrder,
}

impl CommentFilter {
    pub fn matches(&self, comment: &CommentRecord) -> bool {
        if comment.like_count < self.min_likes {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                comment.author_name.to_lowercase().contains(&needle)
                    || strip_markup(&comment.text_display)
                        .to_lowercase()
                        .contains(&needle)
            }
            _ => true,
        }
    }

    pub fn apply(&self, comments: &[CommentRecord]) -> Vec<CommentRecord> {
        let kept: Vec<CommentRecord> = comments
            .iter()
            .filter(|comment| self.matches(comment))
            .cloned()
            .collect();
        rank_comments(&kept, self.order)
    }
}
