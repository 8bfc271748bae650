//! Progress event channel and the renderer task that owns all output.
//!
//! Workers never print. They emit events here and a single consumer
//! renders them, so status lines cannot tear across threads and dropped
//! intermediate updates cost nothing but display fidelity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One worker-side observation about a transfer.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        index: u64,
        filename: String,
        total: u64,
    },
    Advanced {
        index: u64,
        bytes_done: u64,
        total: u64,
    },
    Finished {
        index: u64,
        filename: String,
        disposition: Disposition,
    },
}

/// How an entry ended, for display.
#[derive(Debug, Clone)]
pub enum Disposition {
    Completed,
    Skipped,
    Failed(String),
}

/// Sending half of the progress channel. Cheap to clone; sends are
/// fire-and-forget and silently dropped once the renderer has gone away.
#[derive(Clone)]
pub struct ProgressTx(mpsc::UnboundedSender<ProgressEvent>);

impl ProgressTx {
    pub fn send(&self, event: ProgressEvent) {
        let _ = self.0.send(event);
    }
}

pub fn channel() -> (ProgressTx, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressTx(tx), rx)
}

/// Spawn the renderer; it exits when every sender has been dropped.
pub fn spawn_renderer(
    total_entries: u64,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
) -> JoinHandle<()> {
    tokio::spawn(render(total_entries, rx))
}

struct FileBar {
    pb: ProgressBar,
    filename: String,
    started: Instant,
    /// Bytes already on disk when the first chunk arrived, so resumed
    /// transfers report the rate of this run, not of the whole file.
    start_bytes: Option<u64>,
}

async fn render(total_entries: u64, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    let multi = MultiProgress::new();
    let overall = multi.add(ProgressBar::new(total_entries));
    overall.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    overall.enable_steady_tick(Duration::from_millis(100));

    let mut active: HashMap<u64, FileBar> = HashMap::new();
    let mut completed = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Started {
                index,
                filename,
                total,
            } => {
                let pb = multi.insert_before(&overall, ProgressBar::new(total));
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("  {spinner:.blue} [{bar:30.white/dim}] {bytes}/{total_bytes} {wide_msg}")
                        .unwrap()
                        .progress_chars("=>-"),
                );
                pb.set_message(filename.clone());
                active.insert(
                    index,
                    FileBar {
                        pb,
                        filename,
                        started: Instant::now(),
                        start_bytes: None,
                    },
                );
            }
            ProgressEvent::Advanced {
                index,
                bytes_done,
                total,
            } => {
                if let Some(bar) = active.get_mut(&index) {
                    let baseline = *bar.start_bytes.get_or_insert(bytes_done);
                    let elapsed = bar.started.elapsed().as_secs_f64().max(1e-6);
                    let rate = bytes_done.saturating_sub(baseline) as f64 / elapsed;
                    bar.pb.set_position(bytes_done);
                    bar.pb.set_message(format!(
                        "{} {}% {}",
                        bar.filename,
                        display_percent(bytes_done, total),
                        human_rate(rate)
                    ));
                }
            }
            ProgressEvent::Finished {
                index,
                filename,
                disposition,
            } => {
                if let Some(bar) = active.remove(&index) {
                    bar.pb.finish_and_clear();
                }
                match &disposition {
                    Disposition::Completed => {
                        completed += 1;
                        overall.println(format!("done  {filename}"));
                    }
                    Disposition::Skipped => {
                        skipped += 1;
                        overall.println(format!("skip  {filename} (already complete)"));
                    }
                    Disposition::Failed(reason) => {
                        failed += 1;
                        overall.println(format!("FAIL  {filename} - {reason}"));
                    }
                }
                overall.inc(1);
                overall.set_message(format!("OK:{completed} Skip:{skipped} Fail:{failed}"));
            }
        }
    }

    overall.finish_and_clear();
}

/// Escalate a byte rate through B/s, KB/s, MB/s, GB/s at 1024 steps.
pub fn human_rate(rate: f64) -> String {
    let mut rate = rate.max(0.0);
    for unit in ["B/s", "KB/s", "MB/s"] {
        if rate < 1024.0 {
            return format!("{rate:.1} {unit}");
        }
        rate /= 1024.0;
    }
    format!("{rate:.1} GB/s")
}

/// Percentage for display, one decimal. Completion is decided by exact
/// byte comparison elsewhere, never by this value.
pub fn display_percent(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (bytes as f64 / total as f64 * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_rate_units() {
        assert_eq!(human_rate(0.0), "0.0 B/s");
        assert_eq!(human_rate(512.0), "512.0 B/s");
        assert_eq!(human_rate(1023.9), "1023.9 B/s");
        assert_eq!(human_rate(1024.0), "1.0 KB/s");
        assert_eq!(human_rate(1536.0), "1.5 KB/s");
        assert_eq!(human_rate(1024.0 * 1024.0), "1.0 MB/s");
        assert_eq!(human_rate(3.0 * 1024.0 * 1024.0 * 1024.0), "3.0 GB/s");
    }

    #[test]
    fn test_display_percent_rounds_one_decimal() {
        assert_eq!(display_percent(1, 3), 33.3);
        assert_eq!(display_percent(2, 3), 66.7);
        assert_eq!(display_percent(10, 10), 100.0);
        assert_eq!(display_percent(0, 10), 0.0);
        assert_eq!(display_percent(0, 0), 0.0);
    }

    #[test]
    fn test_sends_after_renderer_drop_are_ignored() {
        let (tx, rx) = channel();
        drop(rx);
        // must not panic
        tx.send(ProgressEvent::Finished {
            index: 1,
            filename: "x".into(),
            disposition: Disposition::Skipped,
        });
    }
}
