//! Terminal progress reporting for sync batches

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::sync::batch::SharedBatch;

const REFRESH_INTERVAL: Duration = Duration::from_millis(200);

fn create_batch_bar(message: String) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .expect("hardcoded template is valid")
            .progress_chars("#>-"),
    );
    pb.set_message(message);
    pb
}

/// Live progress bar fed from a batch's task counters.
///
/// A background refresher keeps the bar current while the scheduler runs;
/// [`BatchProgress::finish`] stops it and draws the final state.
pub struct BatchProgress {
    bar: ProgressBar,
    batch: SharedBatch,
    refresher: Option<JoinHandle<()>>,
}

impl BatchProgress {
    /// Start rendering progress for `batch`.
    pub fn start(batch: SharedBatch, message: impl Into<String>) -> Self {
        let bar = create_batch_bar(message.into());
        let refresher = tokio::spawn({
            let bar = bar.clone();
            let batch = Arc::clone(&batch);
            async move {
                let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
                loop {
                    ticker.tick().await;
                    let (finished, total) = batch.progress();
                    bar.set_length(total as u64);
                    bar.set_position(finished as u64);
                    if batch.is_cancelled() {
                        bar.set_message("cancelling");
                    }
                }
            }
        });
        Self {
            bar,
            batch,
            refresher: Some(refresher),
        }
    }

    /// Stop refreshing and draw the final counts.
    pub fn finish(mut self, message: impl Into<String>) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
        let (finished, total) = self.batch.progress();
        self.bar.set_length(total as u64);
        self.bar.set_position(finished as u64);
        self.bar.finish_with_message(message.into());
    }
}

impl Drop for BatchProgress {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
    }
}
