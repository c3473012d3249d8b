//! Cursor-driven page walking shared by comment collection and catalog
//! discovery.
//!
//! A [`PageSource`] is the explicit `next(cursor) -> (items, next_cursor)`
//! step; [`drain_pages`] is the loop around it. Caps are checked only after a
//! page completes, so the last page is always kept whole and callers decide
//! whether to trim the overshoot.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{HarvestError, HarvestResult};

/// One page of results plus the continuation cursor. `None` (or an empty
/// token) ends pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

pub trait PageSource {
    type Item;

    fn next_page(&mut self, cursor: Option<&str>) -> HarvestResult<Page<Self::Item>>;
}

/// Stopping rules for a page walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLimits {
    pub max_items: Option<usize>,
    pub max_pages: Option<usize>,
    /// Pause inserted between consecutive page requests.
    pub page_delay: Duration,
}

impl PageLimits {
    pub fn items(max_items: usize) -> Self {
        Self {
            max_items: Some(max_items),
            ..Self::default()
        }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = Some(pages);
        self
    }
}

/// Injected pacing so rate-limit delays can be observed (or skipped) in tests.
pub trait Pacer {
    fn pause(&self, delay: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Items gathered by a page walk.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRun<T> {
    pub items: Vec<T>,
    pub pages: usize,
    /// A cap, not cursor exhaustion, ended the walk.
    pub limit_reached: bool,
}

impl<T> PageRun<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            pages: 0,
            limit_reached: false,
        }
    }
}

/// A page call failed. `partial` keeps every page that completed before it.
#[derive(Debug, Clone, PartialEq)]
pub struct Interrupted<T> {
    pub partial: PageRun<T>,
    pub error: HarvestError,
}

/// Follows cursors from the first page until they run out or `limits` says
/// stop. A cursor that was already followed also ends the walk, since the
/// upstream would only serve the same pages again. Failures are not retried.
pub fn drain_pages<S>(
    source: &mut S,
    limits: &PageLimits,
    pacer: &dyn Pacer,
) -> Result<PageRun<S::Item>, Interrupted<S::Item>>
where
    S: PageSource + ?Sized,
{
    let mut run = PageRun::empty();
    let mut cursor: Option<String> = None;
    let mut followed: HashSet<String> = HashSet::new();

    loop {
        if run.pages > 0 {
            pacer.pause(limits.page_delay);
        }

        let page = match source.next_page(cursor.as_deref()) {
            Ok(page) => page,
            Err(error) => return Err(Interrupted { partial: run, error }),
        };
        run.pages += 1;
        let received = page.items.len();
        run.items.extend(page.items);
        debug!(
            page = run.pages,
            received,
            total = run.items.len(),
            "page fetched"
        );

        if limits.max_items.is_some_and(|max| run.items.len() >= max) {
            run.limit_reached = true;
            break;
        }

        match page.next_cursor {
            Some(next) if !next.is_empty() => {
                if limits.max_pages.is_some_and(|max| run.pages >= max) {
                    run.limit_reached = true;
                    break;
                }
                if !followed.insert(next.clone()) {
                    warn!(cursor = %next, pages = run.pages, "page cursor repeated, stopping");
                    break;
                }
                cursor = Some(next);
            }
            _ => break,
        }
    }

    Ok(run)
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingPacer;
    use super::*;

    /// Serves `pages` pages of `page_size` numbered items; optionally fails on
    /// a given (1-based) page.
    struct NumberedPages {
        pages: usize,
        page_size: usize,
        fail_on: Option<usize>,
        cursors_seen: Vec<Option<String>>,
    }

    impl NumberedPages {
        fn new(pages: usize, page_size: usize) -> Self {
            Self {
                pages,
                page_size,
                fail_on: None,
                cursors_seen: Vec::new(),
            }
        }
    }

    impl PageSource for NumberedPages {
        type Item = usize;

        fn next_page(&mut self, cursor: Option<&str>) -> HarvestResult<Page<usize>> {
            self.cursors_seen.push(cursor.map(str::to_owned));
            let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            if self.fail_on == Some(index + 1) {
                return Err(HarvestError::transport("numbers", "boom"));
            }
            let start = index * self.page_size;
            let items = (start..start + self.page_size).collect();
            let next = (index + 1 < self.pages).then(|| (index + 1).to_string());
            Ok(Page::new(items, next))
        }
    }

    #[test]
    fn drains_until_cursor_exhausted() {
        let mut source = NumberedPages::new(3, 2);
        let run = drain_pages(&mut source, &PageLimits::default(), &ThreadPacer).unwrap();
        assert_eq!(run.items, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(run.pages, 3);
        assert!(!run.limit_reached);
        assert_eq!(
            source.cursors_seen,
            vec![None, Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[test]
    fn item_cap_keeps_the_overshooting_page() {
        let mut source = NumberedPages::new(10, 4);
        let run = drain_pages(&mut source, &PageLimits::items(6), &ThreadPacer).unwrap();
        assert_eq!(run.items.len(), 8);
        assert_eq!(run.pages, 2);
        assert!(run.limit_reached);
    }

    #[test]
    fn page_cap_stops_with_cursor_remaining() {
        let mut source = NumberedPages::new(10, 3);
        let limits = PageLimits::default().with_max_pages(2);
        let run = drain_pages(&mut source, &limits, &ThreadPacer).unwrap();
        assert_eq!(run.items.len(), 6);
        assert!(run.limit_reached);
    }

    #[test]
    fn page_cap_equal_to_available_pages_is_not_a_limit() {
        let mut source = NumberedPages::new(2, 3);
        let limits = PageLimits::default().with_max_pages(2);
        let run = drain_pages(&mut source, &limits, &ThreadPacer).unwrap();
        assert_eq!(run.pages, 2);
        assert!(!run.limit_reached);
    }

    #[test]
    fn failure_returns_completed_pages() {
        let mut source = NumberedPages::new(5, 2);
        source.fail_on = Some(3);
        let err = drain_pages(&mut source, &PageLimits::default(), &ThreadPacer).unwrap_err();
        assert_eq!(err.partial.items, vec![0, 1, 2, 3]);
        assert_eq!(err.partial.pages, 2);
        assert!(err.error.is_transport());
    }

    #[test]
    fn delay_applies_between_pages_only() {
        let mut source = NumberedPages::new(3, 1);
        let pacer = RecordingPacer::default();
        let limits = PageLimits::default().with_page_delay(Duration::from_millis(25));
        drain_pages(&mut source, &limits, &pacer).unwrap();
        assert_eq!(pacer.pauses(), vec![Duration::from_millis(25); 2]);
    }

    #[test]
    fn repeated_cursor_ends_the_walk() {
        struct Stuck {
            calls: usize,
        }
        impl PageSource for Stuck {
            type Item = usize;
            fn next_page(&mut self, _cursor: Option<&str>) -> HarvestResult<Page<usize>> {
                self.calls += 1;
                assert!(self.calls <= 10, "walk did not stop on a repeated cursor");
                Ok(Page::new(vec![self.calls], Some("same".to_string())))
            }
        }
        let mut source = Stuck { calls: 0 };
        let run = drain_pages(&mut source, &PageLimits::items(100), &ThreadPacer).unwrap();
        assert_eq!(run.pages, 2);
        assert_eq!(run.items, vec![1, 2]);
        assert!(!run.limit_reached);
    }

    #[test]
    fn empty_cursor_token_ends_the_walk() {
        struct Blank;
        impl PageSource for Blank {
            type Item = u8;
            fn next_page(&mut self, _cursor: Option<&str>) -> HarvestResult<Page<u8>> {
                Ok(Page::new(vec![1], Some(String::new())))
            }
        }
        let run = drain_pages(&mut Blank, &PageLimits::default(), &ThreadPacer).unwrap();
        assert_eq!(run.items, vec![1]);
        assert_eq!(run.pages, 1);
    }
}
