//! 设备播放统计
//!
//! 由设备时钟线程更新，所有操作都是 lock-free 的

use std::sync::atomic::{AtomicU64, Ordering};

/// 设备统计收集器
pub struct DeviceStats {
    period_count: AtomicU64,
    underrun_count: AtomicU64,
    frames_played: AtomicU64,

    // 时钟周期间隔（纳秒）
    interval_min_ns: AtomicU64,
    interval_max_ns: AtomicU64,
    interval_total_ns: AtomicU64,
    interval_count: AtomicU64,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self {
            period_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
            frames_played: AtomicU64::new(0),
            interval_min_ns: AtomicU64::new(u64::MAX),
            interval_max_ns: AtomicU64::new(0),
            interval_total_ns: AtomicU64::new(0),
            interval_count: AtomicU64::new(0),
        }
    }

    /// 每个时钟周期调用一次
    ///
    /// `frames`: 本周期实际取走的帧数
    /// `interval_ns`: 与上一周期的间隔，首个周期传 None
    #[inline]
    pub fn on_period(&self, frames: u64, interval_ns: Option<u64>) {
        self.period_count.fetch_add(1, Ordering::Relaxed);
        self.frames_played.fetch_add(frames, Ordering::Relaxed);

        if let Some(interval) = interval_ns {
            self.interval_min_ns.fetch_min(interval, Ordering::Relaxed);
            self.interval_max_ns.fetch_max(interval, Ordering::Relaxed);
            self.interval_total_ns.fetch_add(interval, Ordering::Relaxed);
            self.interval_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 记录 underrun
    #[inline]
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn period_count(&self) -> u64 {
        self.period_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    /// 生成报告
    pub fn report(&self, period_frames: usize, sample_rate: u32) -> DeviceReport {
        let expected_interval_ns = if sample_rate > 0 {
            period_frames as u64 * 1_000_000_000 / sample_rate as u64
        } else {
            0
        };

        let count = self.interval_count.load(Ordering::Relaxed);
        let interval_stats = if count == 0 {
            IntervalStats {
                min_ns: 0,
                max_ns: 0,
                avg_ns: 0,
            }
        } else {
            IntervalStats {
                min_ns: self.interval_min_ns.load(Ordering::Relaxed),
                max_ns: self.interval_max_ns.load(Ordering::Relaxed),
                avg_ns: self.interval_total_ns.load(Ordering::Relaxed) / count,
            }
        };

        DeviceReport {
            period_count: self.period_count(),
            expected_interval_ns,
            interval_stats,
            underrun_count: self.underrun_count(),
            frames_played: self.frames_played(),
        }
    }
}

impl Default for DeviceStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 设备统计报告
#[derive(Debug)]
pub struct DeviceReport {
    pub period_count: u64,
    pub expected_interval_ns: u64,
    pub interval_stats: IntervalStats,
    pub underrun_count: u64,
    pub frames_played: u64,
}

#[derive(Debug)]
pub struct IntervalStats {
    pub min_ns: u64,
    pub max_ns: u64,
    pub avg_ns: u64,
}

impl std::fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Audio Device")?;
        writeln!(f, "============")?;
        writeln!(f, "Periods: {}", self.period_count)?;
        writeln!(
            f,
            "Period interval: expected {:.2} ms, min {:.2} ms, max {:.2} ms, avg {:.2} ms",
            self.expected_interval_ns as f64 / 1_000_000.0,
            self.interval_stats.min_ns as f64 / 1_000_000.0,
            self.interval_stats.max_ns as f64 / 1_000_000.0,
            self.interval_stats.avg_ns as f64 / 1_000_000.0
        )?;
        writeln!(f, "Underruns: {}", self.underrun_count)?;
        writeln!(f, "Frames played: {}", self.frames_played)?;
        Ok(())
    }
}
