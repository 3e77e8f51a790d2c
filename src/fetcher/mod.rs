use std::fs::create_dir_all;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Error};
use chrono::NaiveDate;
use console::style;
use rayon::ThreadPoolBuilder;

use crate::fetcher::io::Config;
use crate::fetcher::progress::ProgressTracker;
use crate::fetcher::sender::{FetchOutcome, RequestSender};

pub(crate) mod io;
pub(crate) mod progress;
pub(crate) mod sender;
pub(crate) mod tui;

/// Where a single sequence number ended up after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    /// Already recorded as downloaded; no request was made.
    Skipped,
    /// Fetched and written to disk.
    Downloaded,
    /// The server reported the image does not exist.
    Missing,
    /// Transport error; queued for retry.
    Failed,
}

/// Counters for one pool run.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RoundStats {
    pub(crate) downloaded: usize,
    pub(crate) skipped: usize,
    pub(crate) missing: usize,
    pub(crate) failed: usize,
}

/// Settings the connector needs, lifted out of the global config so the
/// connector can be constructed directly in tests.
pub(crate) struct ConnectorOptions {
    pub(crate) image_dir: PathBuf,
    pub(crate) date: NaiveDate,
    pub(crate) range_start: u32,
    pub(crate) range_end: u32,
    pub(crate) batch_workers: usize,
    pub(crate) retry_workers: usize,
    pub(crate) max_retries: usize,
}

impl ConnectorOptions {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            image_dir: config.image_dir(),
            date: config.date(),
            range_start: config.range_start(),
            range_end: config.range_end(),
            batch_workers: config.batch_workers(),
            retry_workers: config.retry_workers(),
            max_retries: config.max_retries(),
        }
    }
}

/// Drives batch and retry downloads over the numbered image sequence.
pub(crate) struct SequenceConnector {
    /// The sender used for all image requests.
    sender: RequestSender,
    /// Shared download record, also handed to every worker.
    tracker: Arc<ProgressTracker>,
    options: ConnectorOptions,
}

impl SequenceConnector {
    pub(crate) fn new(
        sender: RequestSender,
        tracker: Arc<ProgressTracker>,
        options: ConnectorOptions,
    ) -> Self {
        Self {
            sender,
            tracker,
            options,
        }
    }

    /// Formats the image name for a sequence number.
    fn image_name(&self, seq: u32) -> String {
        format!("{}-IMG_{seq:04}.jpeg", self.options.date)
    }

    /// One download attempt.
    ///
    /// Every attempt that reaches the network ends with a full progress
    /// flush, whatever the outcome. The early skip does not flush; it
    /// changes nothing.
    fn fetch_one(&self, seq: u32) -> Result<ItemOutcome, Error> {
        let name = self.image_name(seq);
        if self.tracker.is_complete(&name) {
            debug!("Skipping {name}, already downloaded");
            return Ok(ItemOutcome::Skipped);
        }

        let outcome = match self.sender.fetch(&name) {
            FetchOutcome::Downloaded(body) => {
                let path = self.options.image_dir.join(&name);
                std::fs::write(&path, &body)
                    .with_context(|| format!("could not write {}", path.display()))?;
                let size_mb = body.len() as f64 / (1024.0 * 1024.0);
                info!("Downloaded {name} ({size_mb:.2} MB)");
                self.tracker.record_success(&name, size_mb);
                ItemOutcome::Downloaded
            }
            FetchOutcome::Missing(status) => {
                warn!("{name} does not exist ({status})");
                ItemOutcome::Missing
            }
            FetchOutcome::Failed(err) => {
                warn!("Request failed for {name}: {err}");
                self.tracker.record_failure(seq, &name);
                ItemOutcome::Failed
            }
        };

        self.tracker.save().context("could not flush the progress file")?;
        Ok(outcome)
    }

    /// Downloads every image in the configured range.
    pub(crate) fn run_batch(&self) -> Result<RoundStats, Error> {
        self.tracker
            .reload()
            .context("could not read the progress file")?;
        create_dir_all(&self.options.image_dir).with_context(|| {
            format!(
                "could not create image directory {}",
                self.options.image_dir.display()
            )
        })?;

        let seqs: Vec<u32> = (self.options.range_start..self.options.range_end).collect();
        info!(
            "Downloading images {} through {} with {} workers...",
            self.options.range_start,
            self.options.range_end - 1,
            self.options.batch_workers
        );
        let stats = self.run_pool(&seqs, self.options.batch_workers)?;

        let failed = self.tracker.failed_len();
        if failed > 0 {
            self.tracker
                .save()
                .context("could not flush the progress file")?;
            warn!(
                "{failed} images hit request errors; recorded in {}",
                self.tracker.path().display()
            );
        }
        self.summarize();
        Ok(stats)
    }

    /// Re-attempts previously failed downloads for up to the configured
    /// number of rounds.
    ///
    /// Control always returns to the caller; leftover failures are
    /// reported, not fatal.
    pub(crate) fn retry_failed(&self) -> Result<(), Error> {
        self.tracker
            .reload()
            .context("could not read the progress file")?;
        create_dir_all(&self.options.image_dir).with_context(|| {
            format!(
                "could not create image directory {}",
                self.options.image_dir.display()
            )
        })?;

        for round in 1..=self.options.max_retries {
            let entries = self.tracker.take_failed();
            if entries.is_empty() {
                info!("Every previously failed image has been downloaded.");
                return Ok(());
            }

            info!(
                "Retry round {round} of {}: {} images...",
                self.options.max_retries,
                entries.len()
            );
            let seqs: Vec<u32> = entries.iter().map(|entry| entry.seq).collect();
            self.run_pool(&seqs, self.options.retry_workers)?;

            self.tracker
                .save()
                .context("could not flush the progress file")?;
            self.summarize();
        }

        let remaining = self.tracker.failed_len();
        if remaining > 0 {
            warn!(
                "{remaining} images are still failing after {} rounds; they may be gone upstream.",
                self.options.max_retries
            );
        } else {
            info!("Every failed image was recovered on retry.");
        }
        Ok(())
    }

    /// Runs one bounded pool over the given sequence numbers, collecting
    /// outcomes as tasks finish.
    ///
    /// Individual fetch outcomes never abort the round. Infrastructure
    /// errors (disk, progress file) fail it, but only after every task
    /// has finished.
    fn run_pool(&self, seqs: &[u32], workers: usize) -> Result<RoundStats, Error> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("could not build the download thread pool")?;
        let bar = tui::download_bar(seqs.len() as u64);
        let (tx, rx) = flume::unbounded();

        let mut stats = RoundStats::default();
        let mut first_error: Option<Error> = None;
        pool.in_place_scope(|scope| {
            for &seq in seqs {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let _ = tx.send(self.fetch_one(seq));
                });
            }

            for _ in 0..seqs.len() {
                let Ok(result) = rx.recv() else { break };
                match result {
                    Ok(ItemOutcome::Skipped) => stats.skipped += 1,
                    Ok(ItemOutcome::Downloaded) => stats.downloaded += 1,
                    Ok(ItemOutcome::Missing) => stats.missing += 1,
                    Ok(ItemOutcome::Failed) => stats.failed += 1,
                    Err(err) => {
                        error!("Download task failed: {err:#}");
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
                bar.inc(1);
                bar.set_message(format!("{} ok, {} failed", stats.downloaded, stats.failed));
            }
        });
        bar.finish_and_clear();

        if let Some(err) = first_error {
            return Err(err);
        }
        trace!(
            "Round finished: {} downloaded, {} skipped, {} missing, {} failed",
            stats.downloaded, stats.skipped, stats.missing, stats.failed
        );
        Ok(stats)
    }

    /// Prints everything downloaded so far, one line per file, with the
    /// running total.
    fn summarize(&self) {
        let succeeded = self.tracker.succeeded_snapshot();
        if succeeded.is_empty() {
            warn!("No images have been downloaded yet.");
            return;
        }

        info!("Downloaded files:");
        for (name, size_mb) in &succeeded {
            info!("  - {} ({size_mb:.2} MB)", style(name).color256(39));
        }
        let total_mb: f64 = succeeded.values().sum();
        info!("{} files downloaded, {total_mb:.2} MB in total", succeeded.len());
    }
}
