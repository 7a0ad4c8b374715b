use std::time::{Duration, Instant};
use crate::core::TransferProgress;

/// 命令行进度显示用的速度统计
pub struct TransferMeter {
    started_at: Instant,
    total: u64,
    loaded: u64,
}

impl TransferMeter {
    pub fn new(total: u64) -> Self {
        Self {
            started_at: Instant::now(),
            total,
            loaded: 0,
        }
    }

    pub fn update(&mut self, progress: TransferProgress) {
        self.loaded = progress.loaded;
        self.total = progress.total;
    }

    /// 平均速度（字节/秒）
    pub fn average_speed(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.loaded as f64 / elapsed
        } else {
            0.0
        }
    }

    /// 按平均速度估算剩余时间
    pub fn eta(&self) -> Option<Duration> {
        let speed = self.average_speed();
        if speed <= 0.0 {
            return None;
        }

        let remaining = self.total.saturating_sub(self.loaded);
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    /// 形如 `42% 1.00 GB / 2.38 GB 12.50 MB/s ETA 1m 52s`
    pub fn render(&self) -> String {
        let progress = TransferProgress {
            loaded: self.loaded,
            total: self.total,
        };

        let mut line = format!(
            "{:>3}% {} / {} {}",
            progress.percent(),
            format_bytes(self.loaded),
            format_bytes(self.total),
            format_speed(self.average_speed()),
        );
        if let Some(eta) = self.eta() {
            line.push_str(" ETA ");
            line.push_str(&format_duration(eta));
        }
        line
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化速度
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second as u64))
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
