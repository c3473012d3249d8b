//! Sequential bulk export over a ranked catalog.
//!
//! The controller walks the eligible videos one at a time: collect comments,
//! serialize, hand the artifact to the sink, report progress, pause. A failing
//! video is recorded and skipped; only a cancellation request stops the loop
//! early, and it is honoured between videos, never mid-request.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::comments::{CommentSet, CommentSource};
use crate::error::{HarvestError, HarvestResult};
use crate::export::{ArtifactSink, Clock, CsvOptions, SystemClock, csv_artifact, json_artifact};
use crate::models::VideoSummary;
use crate::pager::{Pacer, ThreadPacer};

pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(1000);

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    Both,
}

impl ExportFormat {
    fn writes_csv(self) -> bool {
        matches!(self, Self::Csv | Self::Both)
    }

    fn writes_json(self) -> bool {
        matches!(self, Self::Json | Self::Both)
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "both" | "all" => Ok(Self::Both),
            other => Err(format!(
                "unknown export format `{other}` (expected csv, json or both)"
            )),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Both => "both",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOptions {
    pub format: ExportFormat,
    /// Pause between videos, skipped after the last one.
    pub item_delay: Duration,
    pub csv: CsvOptions,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            item_delay: DEFAULT_ITEM_DELAY,
            csv: CsvOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobProgress {
    pub completed: usize,
    pub total: usize,
}

/// Working state of one run; lives only inside [`BulkExportController::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct BulkExportJob {
    pub target_videos: Vec<VideoSummary>,
    pub progress: JobProgress,
    pub cancelled: bool,
}

impl BulkExportJob {
    fn new(target_videos: Vec<VideoSummary>) -> Self {
        let total = target_videos.len();
        Self {
            target_videos,
            progress: JobProgress {
                completed: 0,
                total,
            },
            cancelled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Exported {
        comments: usize,
        limit_reached: bool,
        files: Vec<PathBuf>,
    },
    /// Collection stopped early or the sink refused the artifact.
    Failed {
        collected: usize,
        error: HarvestError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFailure {
    pub video_id: String,
    pub title: String,
    pub error: HarvestError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkSummary {
    pub state: ExportState,
    pub exported: usize,
    pub failed: usize,
    /// Catalog entries without a known, non-zero comment count.
    pub skipped: usize,
    pub visited: usize,
    /// Comments across successful exports only.
    pub total_comments: usize,
    pub failures: Vec<VideoFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulkEvent {
    Started {
        total: usize,
        skipped: usize,
    },
    Progress {
        current: usize,
        total: usize,
        video_id: String,
        outcome: ItemOutcome,
    },
    /// Emitted exactly once per run.
    Finished(BulkSummary),
}

pub trait BulkObserver {
    fn on_event(&mut self, event: &BulkEvent);
}

impl<F: FnMut(&BulkEvent)> BulkObserver for F {
    fn on_event(&mut self, event: &BulkEvent) {
        self(event)
    }
}

pub struct BulkExportController<'a> {
    collector: &'a dyn CommentSource,
    sink: &'a mut dyn ArtifactSink,
    pacer: &'a dyn Pacer,
    clock: &'a dyn Clock,
    options: BulkOptions,
    state: ExportState,
}

impl<'a> BulkExportController<'a> {
    pub fn new(
        collector: &'a dyn CommentSource,
        sink: &'a mut dyn ArtifactSink,
        options: BulkOptions,
    ) -> Self {
        Self {
            collector,
            sink,
            pacer: &ThreadPacer,
            clock: &SystemClock,
            options,
            state: ExportState::Idle,
        }
    }

    pub fn with_pacer(mut self, pacer: &'a dyn Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    /// Exports every eligible video of `videos`, in the given order.
    ///
    /// A controller runs once; calling this again (or while running) is an
    /// [`HarvestError::InvalidState`].
    pub fn run(
        &mut self,
        videos: &[VideoSummary],
        cancel: &CancellationToken,
        observer: &mut dyn BulkObserver,
    ) -> HarvestResult<BulkSummary> {
        if self.state != ExportState::Idle {
            return Err(HarvestError::InvalidState(format!(
                "bulk export already {}",
                self.state
            )));
        }
        self.state = ExportState::Running;

        let (eligible, ineligible): (Vec<&VideoSummary>, Vec<&VideoSummary>) =
            videos.iter().partition(|video| video.is_exportable());
        let mut job = BulkExportJob::new(eligible.into_iter().cloned().collect());
        let mut summary = BulkSummary {
            state: ExportState::Running,
            exported: 0,
            failed: 0,
            skipped: ineligible.len(),
            visited: 0,
            total_comments: 0,
            failures: Vec::new(),
        };
        let total = job.progress.total;

        info!(total, skipped = summary.skipped, format = %self.options.format, "bulk export started");
        observer.on_event(&BulkEvent::Started {
            total,
            skipped: summary.skipped,
        });

        for (index, video) in job.target_videos.iter().enumerate() {
            if cancel.is_cancelled() {
                job.cancelled = true;
                break;
            }

            let outcome = self.export_video(video);
            summary.visited += 1;
            match &outcome {
                ItemOutcome::Exported { comments, .. } => {
                    summary.exported += 1;
                    summary.total_comments += comments;
                }
                ItemOutcome::Failed { error, .. } => {
                    summary.failed += 1;
                    summary.failures.push(VideoFailure {
                        video_id: video.id.clone(),
                        title: video.title.clone(),
                        error: error.clone(),
                    });
                }
            }
            job.progress.completed += 1;

            observer.on_event(&BulkEvent::Progress {
                current: job.progress.completed,
                total,
                video_id: video.id.clone(),
                outcome,
            });

            if index + 1 < total {
                self.pacer.pause(self.options.item_delay);
            }
        }

        if cancel.is_cancelled() {
            job.cancelled = true;
        }
        self.state = if job.cancelled {
            ExportState::Cancelled
        } else {
            ExportState::Completed
        };
        summary.state = self.state;

        info!(
            state = %summary.state,
            exported = summary.exported,
            failed = summary.failed,
            comments = summary.total_comments,
            "bulk export finished"
        );
        observer.on_event(&BulkEvent::Finished(summary.clone()));
        Ok(summary)
    }

    fn export_video(&mut self, video: &VideoSummary) -> ItemOutcome {
        let set = self.collector.collect(&video.id);
        if let Some(error) = &set.failure {
            warn!(video_id = %video.id, collected = set.comments.len(), %error, "skipping partial comment set");
            return ItemOutcome::Failed {
                collected: set.comments.len(),
                error: error.clone(),
            };
        }

        match self.write_artifacts(video, &set) {
            Ok(files) => ItemOutcome::Exported {
                comments: set.comments.len(),
                limit_reached: set.limit_reached,
                files,
            },
            Err(error) => {
                warn!(video_id = %video.id, %error, "artifact hand-off failed");
                ItemOutcome::Failed {
                    collected: set.comments.len(),
                    error,
                }
            }
        }
    }

    fn write_artifacts(
        &mut self,
        video: &VideoSummary,
        set: &CommentSet,
    ) -> HarvestResult<Vec<PathBuf>> {
        let at = self.clock.now();
        let mut files = Vec::new();
        if self.options.format.writes_csv() {
            let artifact = csv_artifact(&video.title, &set.comments, &self.options.csv, at);
            files.push(self.sink.save(&artifact)?);
        }
        if self.options.format.writes_json() {
            let artifact = json_artifact(&video.title, video, &set.comments, at)?;
            files.push(self.sink.save(&artifact)?);
        }
        Ok(files)
    }
}
