//! 进度上报与 CLI 进度条管理。

use std::time::Instant;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::net::transport::{format_duration, format_size};

/// 单个文件传输的进度快照；速度和 ETA 由快照现算。
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    /// 目标文件当前的总字节数（含续传前已有的部分）。
    pub received: u64,
    pub total: Option<u64>,
    pub started: Instant,
    pub file_index: usize,
    pub file_count: usize,
}

impl TransferProgress {
    pub fn percent(&self) -> Option<f64> {
        self.total
            .filter(|total| *total > 0)
            .map(|total| self.received as f64 / total as f64 * 100.0)
    }

    /// 平均速度（字节/秒）；刚开始时为 0。
    pub fn speed(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 && self.received > 0 {
            self.received as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn eta_seconds(&self) -> Option<f64> {
        let speed = self.speed();
        if speed <= 0.0 {
            return None;
        }
        self.total
            .map(|total| total.saturating_sub(self.received) as f64 / speed)
    }

    /// `42.17% (1.2 GB / 12.1 GB) - 3.4 MB/s - ETA  5m 12s` 样式的状态行。
    pub fn status_line(&self) -> String {
        let (Some(percent), Some(total)) = (self.percent(), self.total) else {
            return format!("{} downloaded", format_size(self.received as f64).trim_start());
        };
        let base = format!(
            "{:.2}% ({} / {})",
            percent,
            format_size(self.received as f64).trim_start(),
            format_size(total as f64).trim_start()
        );
        match (self.speed(), self.eta_seconds()) {
            (speed, Some(eta)) if speed > 0.0 => format!(
                "{base} - {}/s - ETA {}",
                format_size(speed).trim_start(),
                format_duration(eta)
            ),
            _ => base,
        }
    }
}

pub struct ProgressReporter {
    cb: Option<Box<dyn FnMut(TransferProgress) + Send>>,
    bar: Option<ProgressBar>,
    file_index: usize,
    file_count: usize,
}

/// 有 UI 回调时走回调，否则在 stderr 上画进度条。
pub fn make_reporter(
    progress: Option<Box<dyn FnMut(TransferProgress) + Send>>,
) -> ProgressReporter {
    let bar = if progress.is_none() {
        let style =
            ProgressStyle::with_template("{prefix} [{elapsed_precise}] {wide_bar} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-");
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(style);
        Some(bar)
    } else {
        None
    };
    ProgressReporter {
        cb: progress,
        bar,
        file_index: 0,
        file_count: 0,
    }
}

impl ProgressReporter {
    pub(crate) fn begin_file(&mut self, index: usize, count: usize, file_name: &str) {
        self.file_index = index;
        self.file_count = count;
        if let Some(bar) = &self.bar {
            bar.reset();
            bar.set_length(0);
            bar.set_prefix(format!("[{}/{}] {}", index + 1, count, file_name));
        }
    }

    pub(crate) fn transfer(&mut self, received: u64, total: Option<u64>, started: Instant) {
        let progress = TransferProgress {
            received,
            total,
            started,
            file_index: self.file_index,
            file_count: self.file_count,
        };
        if let Some(cb) = self.cb.as_mut() {
            cb(progress);
            return;
        }
        if let Some(bar) = &self.bar {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(received);
            bar.set_message(progress.status_line());
        }
    }

    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn percent_needs_a_total() {
        let now = Instant::now();
        let without_total = TransferProgress {
            received: 10,
            total: None,
            started: now,
            file_index: 0,
            file_count: 1,
        };
        assert_eq!(without_total.percent(), None);

        let with_total = TransferProgress {
            total: Some(200),
            ..without_total
        };
        assert_eq!(with_total.percent(), Some(5.0));
    }

    #[test]
    fn status_line_with_speed_and_eta() {
        let started = Instant::now() - Duration::from_secs(4);
        let progress = TransferProgress {
            received: 4096,
            total: Some(8192),
            started,
            file_index: 0,
            file_count: 1,
        };
        let line = progress.status_line();
        assert!(line.starts_with("50.00% (4.0 KB / 8.0 KB)"), "{line}");
        assert!(line.contains("/s - ETA"), "{line}");
    }

    #[test]
    fn status_line_without_total_reports_bytes_only() {
        let progress = TransferProgress {
            received: 1536,
            total: None,
            started: Instant::now(),
            file_index: 0,
            file_count: 1,
        };
        assert_eq!(progress.status_line(), "1.5 KB downloaded");
    }
}
