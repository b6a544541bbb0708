//! 帧时序遥测
//!
//! 只追加的帧样本日志：
//! - `log_frame` 在互斥锁下追加，可多生产者并发调用
//! - `build_summary` / `export_log` 在同一把锁下读取，不会读到半写入的状态
//!
//! 每个呈现帧追加一次，频率远低于音频采样率，互斥锁足够

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// 默认掉帧倍数：帧间隔超过名义周期的 2 倍记为掉帧
pub const DEFAULT_DROP_MULTIPLIER: f64 = 2.0;

/// CSV 表头
pub const CSV_HEADER: &str = "timestamp_us,visual_on,effective_hz,jitter_ms";

/// 单帧遥测样本
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    /// 单调时钟时间戳（微秒，起点任意但固定）
    pub timestamp_us: u64,
    /// 本帧画面状态
    pub visual_on: bool,
    /// 由帧间隔换算的瞬时频率（Hz）
    pub effective_hz: f64,
    /// 与上一帧的间隔（毫秒）
    pub jitter_ms: f64,
}

impl FrameSample {
    /// 由帧间隔构造样本
    ///
    /// 间隔非正时瞬时频率为 0
    pub fn from_delta(timestamp_us: u64, visual_on: bool, delta_ms: f64) -> Self {
        let effective_hz = if delta_ms > 0.0 { 1000.0 / delta_ms } else { 0.0 };
        Self {
            timestamp_us,
            visual_on,
            effective_hz,
            jitter_ms: delta_ms,
        }
    }
}

/// 掉帧判定
///
/// 单帧间隔超过 `nominal_period_ms × multiplier` 记一次掉帧。
/// 按样本判定，一个长间隔无论跨过多少个名义周期都只计一次
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropPolicy {
    pub nominal_period_ms: f64,
    pub multiplier: f64,
}

impl DropPolicy {
    /// 由刷新率提示构造，刷新率无效时不统计掉帧
    pub fn from_refresh_hint(refresh_hz: f64, multiplier: f64) -> Self {
        let nominal_period_ms = if refresh_hz.is_finite() && refresh_hz > 0.0 {
            1000.0 / refresh_hz
        } else {
            0.0
        };
        Self {
            nominal_period_ms,
            multiplier,
        }
    }

    /// 不统计掉帧
    pub fn disabled() -> Self {
        Self {
            nominal_period_ms: 0.0,
            multiplier: DEFAULT_DROP_MULTIPLIER,
        }
    }

    /// 掉帧阈值（毫秒），未启用时返回 None
    pub fn threshold_ms(&self) -> Option<f64> {
        let threshold = self.nominal_period_ms * self.multiplier;
        if threshold.is_finite() && threshold > 0.0 {
            Some(threshold)
        } else {
            None
        }
    }

    #[inline]
    pub fn is_dropped(&self, sample: &FrameSample) -> bool {
        self.threshold_ms()
            .map(|threshold| sample.jitter_ms > threshold)
            .unwrap_or(false)
    }
}

impl Default for DropPolicy {
    fn default() -> Self {
        Self::from_refresh_hint(120.0, DEFAULT_DROP_MULTIPLIER)
    }
}

/// 会话汇总
///
/// 空日志时所有字段为 0
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionSummary {
    pub frames: usize,
    pub effective_hz: f64,
    pub jitter_p50: f64,
    pub jitter_p95: f64,
    pub jitter_p99: f64,
    pub dropped_frames: u64,
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Session Summary")?;
        writeln!(f, "===============")?;
        writeln!(f, "Frames: {}", self.frames)?;
        writeln!(f, "Effective rate: {:.2} Hz", self.effective_hz)?;
        writeln!(f, "Frame interval:")?;
        writeln!(f, "  P50: {:.3} ms", self.jitter_p50)?;
        writeln!(f, "  P95: {:.3} ms", self.jitter_p95)?;
        writeln!(f, "  P99: {:.3} ms", self.jitter_p99)?;
        writeln!(f, "Dropped frames: {}", self.dropped_frames)?;
        Ok(())
    }
}

/// 遥测错误
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to write telemetry to {path}: {source}")]
    Export {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// 最近秩百分位：升序排序后取下标 floor(pct × (n - 1))，不做插值
///
/// `sorted` 必须已升序；空切片返回 0
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (pct * (sorted.len() - 1) as f64).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// 遥测聚合器
pub struct TelemetryAggregator {
    frames: Mutex<Vec<FrameSample>>,
    drop_policy: DropPolicy,
}

impl TelemetryAggregator {
    pub fn new(drop_policy: DropPolicy) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            drop_policy,
        }
    }

    /// 日志只追加，持锁方 panic 后数据仍然完整，直接取回
    fn lock(&self) -> MutexGuard<'_, Vec<FrameSample>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// 追加一帧
    pub fn log_frame(&self, sample: FrameSample) {
        self.lock().push(sample);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 当前日志的副本
    pub fn snapshot(&self) -> Vec<FrameSample> {
        self.lock().clone()
    }

    /// 生成汇总
    pub fn build_summary(&self) -> SessionSummary {
        let frames = self.lock();
        if frames.is_empty() {
            return SessionSummary::default();
        }

        let count = frames.len();
        let hz_sum: f64 = frames.iter().map(|frame| frame.effective_hz).sum();
        let dropped_frames = frames
            .iter()
            .filter(|frame| self.drop_policy.is_dropped(frame))
            .count() as u64;

        let mut jitter: Vec<f64> = frames.iter().map(|frame| frame.jitter_ms).collect();
        drop(frames);
        jitter.sort_by(|a, b| a.total_cmp(b));

        SessionSummary {
            frames: count,
            effective_hz: hz_sum / count as f64,
            jitter_p50: percentile(&jitter, 0.50),
            jitter_p95: percentile(&jitter, 0.95),
            jitter_p99: percentile(&jitter, 0.99),
            dropped_frames,
        }
    }

    /// 以 CSV 写出完整日志
    ///
    /// 写出期间持锁，按追加顺序逐行输出，不过滤、不重采样
    pub fn export_log<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let frames = self.lock();
        writeln!(writer, "{}", CSV_HEADER)?;
        for frame in frames.iter() {
            writeln!(
                writer,
                "{},{},{},{}",
                frame.timestamp_us,
                u8::from(frame.visual_on),
                frame.effective_hz,
                frame.jitter_ms
            )?;
        }
        writer.flush()
    }

    /// 写出到文件
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), TelemetryError> {
        let path = path.as_ref();
        let export_error = |source| TelemetryError::Export {
            path: path.display().to_string(),
            source,
        };

        let file = File::create(path).map_err(export_error)?;
        let mut writer = BufWriter::new(file);
        self.export_log(&mut writer).map_err(export_error)?;

        log::info!("Telemetry exported: {} ({} frames)", path.display(), self.len());
        Ok(())
    }
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new(DropPolicy::default())
    }
}
