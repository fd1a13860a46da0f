//! Progress bars for request and response bodies

use console::style;
use courier_core::Progress;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::OutputFormat;

/// One bar per transfer direction
pub struct TransferProgress {
    multi: MultiProgress,
    upload: Option<ProgressBar>,
    download: Option<ProgressBar>,
}

impl TransferProgress {
    pub fn new(format: OutputFormat) -> Self {
        let multi = MultiProgress::new();
        // JSON output must stay machine-readable
        if matches!(format, OutputFormat::Json) {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self {
            multi,
            upload: None,
            download: None,
        }
    }

    /// Bar fed by upload ticks
    pub fn upload_callback(&mut self) -> impl Fn(Progress) + Send + Sync + 'static {
        let bar = self.add_bar("↑ upload");
        self.upload = Some(bar.clone());
        move |progress| update(&bar, progress)
    }

    /// Bar fed by download ticks
    pub fn download_callback(&mut self) -> impl Fn(Progress) + Send + Sync + 'static {
        let bar = self.add_bar("↓ download");
        self.download = Some(bar.clone());
        move |progress| update(&bar, progress)
    }

    fn add_bar(&self, label: &'static str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg:12} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        pb.set_message(label);
        pb
    }

    /// Settle every bar once the request has completed
    pub fn finish(&self, success: bool) {
        for pb in self.upload.iter().chain(self.download.iter()) {
            if success {
                pb.finish_and_clear();
            } else {
                pb.abandon_with_message(format!("{}", style("✗").red().bold()));
            }
        }
    }
}

fn update(bar: &ProgressBar, progress: Progress) {
    if let Some(total) = progress.expected_total {
        bar.set_length(total);
    } else if progress.total_bytes > bar.length().unwrap_or(0) {
        bar.set_length(progress.total_bytes);
    }
    bar.set_position(progress.total_bytes);
}
