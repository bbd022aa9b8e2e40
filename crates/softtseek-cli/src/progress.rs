//! Download progress: a progress bar on a terminal, NDJSON lines otherwise.

use indicatif::{ProgressBar, ProgressStyle};
use overlay_client::{TransferProgress, TransferState};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::output::{format_duration, format_size, print_ndjson};

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

pub struct DownloadProgress {
    bar: Option<ProgressBar>,
    filename: String,
    started: Instant,
    last: Option<TransferProgress>,
}

impl DownloadProgress {
    pub fn new(interactive: bool, filename: &str) -> Self {
        let bar = interactive.then(|| {
            let bar = ProgressBar::new(0);
            let style = ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .map(|s| s.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar.set_message(format!("Resolving: {filename}"));
            bar
        });

        Self {
            bar,
            filename: filename.to_string(),
            started: Instant::now(),
            last: None,
        }
    }

    pub fn update(&mut self, p: TransferProgress) {
        match &self.bar {
            Some(bar) => {
                if p.total_bytes > 0 {
                    bar.set_length(p.total_bytes);
                }
                bar.set_position(p.bytes_downloaded);
                if self.last.map(|l| l.status) != Some(p.status) {
                    bar.set_message(format!("{}: {}", status_label(p.status), self.filename));
                }
            }
            None => {
                if let Err(e) = print_ndjson(&[p]) {
                    tracing::debug!("Could not write progress: {}", e);
                }
            }
        }
        self.last = Some(p);
    }

    /// Consume snapshots until the sender side is dropped.
    pub fn spawn(mut self, mut rx: mpsc::UnboundedReceiver<TransferProgress>) -> JoinHandle<Self> {
        tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                self.update(p);
            }
            self
        })
    }

    pub fn finish(&self) {
        let Some(bar) = &self.bar else { return };
        let size = self.last.map(|p| p.bytes_downloaded).unwrap_or(0);
        bar.finish_with_message(format!(
            "Downloaded {} ({}) in {}",
            self.filename,
            format_size(size),
            format_duration(self.started.elapsed())
        ));
    }

    /// Leave the bar where it stopped.
    pub fn abandon(&self) {
        if let Some(bar) = &self.bar {
            bar.abandon();
        }
    }
}

fn status_label(status: TransferState) -> &'static str {
    match status {
        TransferState::Resolving => "Resolving",
        TransferState::Connecting => "Connecting",
        TransferState::Transferring => "Transferring",
        TransferState::Verifying => "Verifying",
        TransferState::Complete => "Complete",
        TransferState::Failed => "Failed",
        TransferState::Cancelled => "Cancelled",
    }
}
