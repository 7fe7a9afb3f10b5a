//! Terminal output helpers.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use iconpack_core::{ApplyReport, ClassifiedPack, DownloadProgress, PackStatus};

/// A download progress bar that switches to a spinner when the size is
/// unknown.
#[derive(Clone)]
pub struct DownloadBar {
    bar: ProgressBar,
}

impl DownloadBar {
    pub fn start(label: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan.bold} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {elapsed_precise}",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    pub fn update(&self, progress: DownloadProgress) {
        if let Some(total) = progress.bytes_total {
            self.bar.set_length(total);
        }
        self.bar.set_position(progress.bytes_done);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn short_id(id: &str) -> &str {
    id.get(..7).unwrap_or(id)
}

pub fn pack_line(entry: &ClassifiedPack) -> String {
    let pack = &entry.pack;
    let detail = match &entry.status {
        PackStatus::UpdateAvailable {
            installed,
            available,
        } => format!("{} -> {}", short_id(installed), short_id(available)),
        _ => short_id(&pack.content_id).to_string(),
    };
    format!(
        "{:<24} {:<18} {:<10} {}",
        pack.name,
        entry.status.to_string(),
        detail,
        pack.source
    )
}

pub fn print_apply_report(report: &ApplyReport) {
    for id in &report.applied {
        println!("applied  {id}");
    }
    for failure in &report.failures {
        println!("failed   {}: {}", failure.target, failure.error);
    }
    println!(
        "{} applied, {} without a matching icon, {} failed",
        report.applied.len(),
        report.skipped.len(),
        report.failures.len()
    );
    if !report.applied.is_empty() {
        println!("Restart the affected apps (or log out and back in) to see the new icons.");
    }
}
