//! Strict-barrier batch downloader.
//!
//! Pages carrying a content locator are collected depth-first into a work
//! queue. Up to `width` of them are fetched concurrently; the whole batch is
//! awaited before the next one starts. A failed fetch leaves that page without
//! a body and never aborts its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use spacebook_discovery::RetryFetcher;
use spacebook_shared::{IndexNode, Result, pages_in_order};

/// Default number of concurrent fetches per batch.
pub const DEFAULT_WIDTH: usize = 25;

/// Field of a fetched page that holds its document body.
const DOCUMENT_FIELD: &str = "document";

// ---------------------------------------------------------------------------
// PageSource
// ---------------------------------------------------------------------------

/// Fetches the body behind a content locator.
pub trait PageSource: Send + Sync + 'static {
    /// `Ok(None)` means the page exists but carries no document.
    fn fetch_body(&self, locator: &str) -> impl Future<Output = Result<Option<Value>>> + Send;
}

impl PageSource for RetryFetcher {
    async fn fetch_body(&self, locator: &str) -> Result<Option<Value>> {
        let mut page: Value = self.fetch_json(locator).await?;
        Ok(page.get_mut(DOCUMENT_FIELD).map(Value::take))
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for a download run.
pub trait DownloadProgress: Send + Sync {
    /// Called before batch `number` (1-based) of `size` pages starts.
    fn batch_started(&self, number: usize, size: usize);
    /// Called once per page after its fetch settled, successfully or not.
    fn page_done(&self, title: &str, done: usize, total: usize);
}

/// No-op progress reporter.
pub struct SilentProgress;

impl DownloadProgress for SilentProgress {
    fn batch_started(&self, _number: usize, _size: usize) {}
    fn page_done(&self, _title: &str, _done: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// DownloadReport
// ---------------------------------------------------------------------------

/// Summary of a completed download run.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    /// Pages with a content locator.
    pub pages: usize,
    /// Pages whose fetch succeeded (with or without a document).
    pub fetched: usize,
    /// Failed pages (title, error message).
    pub failed: Vec<(String, String)>,
    /// Number of sequential batches issued.
    pub batches: usize,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// BatchDownloader
// ---------------------------------------------------------------------------

struct WorkItem {
    slot: usize,
    title: String,
    locator: String,
}

/// Fills page bodies into an index tree, `width` pages at a time.
pub struct BatchDownloader<S> {
    source: Arc<S>,
    width: usize,
}

impl<S: PageSource> BatchDownloader<S> {
    pub fn new(source: S) -> Self {
        Self::with_width(source, DEFAULT_WIDTH)
    }

    /// A width of zero is treated as one.
    pub fn with_width(source: S, width: usize) -> Self {
        Self {
            source: Arc::new(source),
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Download every page body in `index`, filling them in place.
    #[instrument(skip_all, fields(width = self.width))]
    pub async fn download(
        &self,
        index: &mut [IndexNode],
        progress: &dyn DownloadProgress,
    ) -> DownloadReport {
        let start = Instant::now();

        let mut queue: Vec<WorkItem> = pages_in_order(index)
            .into_iter()
            .filter_map(|page| page.locator.clone().map(|locator| (page.title.clone(), locator)))
            .enumerate()
            .map(|(slot, (title, locator))| WorkItem {
                slot,
                title,
                locator,
            })
            .collect();

        let total = queue.len();
        let mut bodies: Vec<Option<Value>> = vec![None; total];
        let mut failed: Vec<(String, String)> = Vec::new();
        let mut fetched = 0;
        let mut done = 0;
        let mut batches = 0;

        info!(pages = total, "starting download");

        while !queue.is_empty() {
            let batch: Vec<WorkItem> = {
                let drain_count = queue.len().min(self.width);
                queue.drain(..drain_count).collect()
            };
            batches += 1;
            progress.batch_started(batches, batch.len());
            debug!(batch = batches, size = batch.len(), "batch started");

            let mut handles = Vec::with_capacity(batch.len());
            for item in batch {
                let source = Arc::clone(&self.source);
                let locator = item.locator;
                handles.push((
                    item.slot,
                    item.title,
                    tokio::spawn(async move { source.fetch_body(&locator).await }),
                ));
            }

            // Barrier: every handle settles before the next batch is drained.
            for (slot, title, handle) in handles {
                match handle.await {
                    Ok(Ok(body)) => {
                        bodies[slot] = body;
                        fetched += 1;
                    }
                    Ok(Err(e)) => {
                        warn!(page = %title, error = %e, "page fetch failed, leaving it empty");
                        failed.push((title.clone(), e.to_string()));
                    }
                    Err(e) => {
                        warn!(page = %title, error = %e, "page fetch task failed");
                        failed.push((title.clone(), e.to_string()));
                    }
                }
                done += 1;
                progress.page_done(&title, done, total);
            }
        }

        fill_bodies(index, &mut bodies.into_iter());

        let report = DownloadReport {
            pages: total,
            fetched,
            failed,
            batches,
            duration: start.elapsed(),
        };

        info!(
            pages = report.pages,
            fetched = report.fetched,
            failed = report.failed.len(),
            batches = report.batches,
            duration_ms = report.duration.as_millis() as u64,
            "download completed"
        );

        report
    }
}

/// Assign bodies to pages with a locator, in the same depth-first order the
/// work queue was built in.
fn fill_bodies(nodes: &mut [IndexNode], bodies: &mut impl Iterator<Item = Option<Value>>) {
    for node in nodes {
        match node {
            IndexNode::Section(section) => fill_bodies(&mut section.children, bodies),
            IndexNode::Page(page) if page.locator.is_some() => {
                page.body = bodies.next().flatten();
            }
            IndexNode::Page(_) => {}
        }
    }
}
