//! 软件时钟播放设备
//!
//! 不依赖任何平台音频 API 的 [`AudioSink`] 实现：
//! - 播放缓冲区是 lock-free ring buffer
//! - 设备时钟线程按采样率节拍，每个周期取走 `period_frames` 帧
//! - 取不满一个周期即记为 underrun
//!
//! 行为上等价于一块只暴露“可写空间”、没有排空通知的硬件缓冲区

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::ring_buffer::RingBuffer;
use super::sink::{AudioSink, SinkError, SinkFormat};
use super::stats::{DeviceReport, DeviceStats};
use super::timing::sleep_until;

/// 设备配置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    /// 缓冲区时长（毫秒），实际容量会向上取整到 2 的幂
    pub buffer_ms: u32,
    /// 设备时钟每个周期消费的帧数
    pub period_frames: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            // 100ms 缓冲
            buffer_ms: 100,
            // 10ms @ 48kHz
            period_frames: 480,
        }
    }
}

/// 软件时钟播放设备
pub struct ClockedSink {
    format: SinkFormat,
    config: DeviceConfig,
    ring: Arc<RingBuffer>,
    // 渲染线程的写入暂存区，commit 时整体写入 ring
    scratch: Vec<f32>,
    stats: Arc<DeviceStats>,
    clock_running: Arc<AtomicBool>,
    clock_thread: Option<JoinHandle<()>>,
}

impl ClockedSink {
    /// 打开设备
    pub fn open(format: SinkFormat, config: DeviceConfig) -> Result<Self, SinkError> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(SinkError::UnsupportedFormat(format));
        }
        if config.period_frames == 0 || config.buffer_ms == 0 {
            return Err(SinkError::Open(format!(
                "invalid device configuration: {:?}",
                config
            )));
        }

        let channels = format.samples_per_frame();
        let buffer_frames = (format.sample_rate as u64 * config.buffer_ms as u64 / 1000) as usize;
        let mut ring = RingBuffer::with_min_capacity(buffer_frames.max(config.period_frames) * channels);
        ring.lock_memory();

        log::info!(
            "Software device opened: {}Hz {}ch, {} frames buffer, {} frames/period",
            format.sample_rate,
            format.channels,
            ring.capacity() / channels,
            config.period_frames
        );

        Ok(Self {
            format,
            config,
            scratch: vec![0.0; ring.capacity()],
            ring: Arc::new(ring),
            stats: Arc::new(DeviceStats::new()),
            clock_running: Arc::new(AtomicBool::new(false)),
            clock_thread: None,
        })
    }

    /// 统计收集器
    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }

    /// 当前统计报告
    pub fn report(&self) -> DeviceReport {
        self.stats
            .report(self.config.period_frames, self.format.sample_rate)
    }

    /// 设备时钟线程主函数
    fn clock_thread_main(
        ring: Arc<RingBuffer>,
        stats: Arc<DeviceStats>,
        running: Arc<AtomicBool>,
        period_frames: usize,
        channels: usize,
        sample_rate: u32,
    ) {
        let period = Duration::from_secs_f64(period_frames as f64 / sample_rate as f64);
        let mut period_buffer = vec![0.0f32; period_frames * channels];
        let mut next = Instant::now() + period;
        let mut last: Option<Instant> = None;

        log::debug!("Device clock started, period {:?}", period);

        while running.load(Ordering::Acquire) {
            sleep_until(next);

            let now = Instant::now();
            let read = ring.read(&mut period_buffer);
            if read < period_buffer.len() {
                stats.record_underrun();
            }

            let interval_ns = last.map(|l| now.duration_since(l).as_nanos() as u64);
            stats.on_period((read / channels) as u64, interval_ns);
            last = Some(now);

            next += period;
            // 落后超过一个周期时重新对齐，不追补
            if now > next + period {
                next = now + period;
            }
        }

        log::debug!("Device clock stopped");
    }
}

impl AudioSink for ClockedSink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn buffer_frames(&self) -> usize {
        self.ring.capacity() / self.format.samples_per_frame()
    }

    fn free_frames(&mut self) -> Result<usize, SinkError> {
        Ok(self.ring.free_space() / self.format.samples_per_frame())
    }

    fn buffer(&mut self, frames: usize) -> Result<&mut [f32], SinkError> {
        let free = self.free_frames()?;
        if frames > free {
            return Err(SinkError::Overflow {
                requested: frames,
                free,
            });
        }
        let samples = frames * self.format.samples_per_frame();
        Ok(&mut self.scratch[..samples])
    }

    fn commit(&mut self, frames: usize) -> Result<(), SinkError> {
        let channels = self.format.samples_per_frame();
        let samples = frames * channels;
        if samples > self.scratch.len() {
            return Err(SinkError::Overflow {
                requested: frames,
                free: self.ring.free_space() / channels,
            });
        }

        let written = self.ring.write(&self.scratch[..samples]);
        if written < samples {
            return Err(SinkError::Overflow {
                requested: frames,
                free: written / channels,
            });
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), SinkError> {
        if self.clock_thread.is_some() {
            return Ok(());
        }

        self.clock_running.store(true, Ordering::Release);

        let ring = Arc::clone(&self.ring);
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.clock_running);
        let period_frames = self.config.period_frames;
        let channels = self.format.samples_per_frame();
        let sample_rate = self.format.sample_rate;

        let handle = thread::Builder::new()
            .name("device-clock".to_string())
            .spawn(move || {
                Self::clock_thread_main(ring, stats, running, period_frames, channels, sample_rate);
            })
            .map_err(|e| {
                self.clock_running.store(false, Ordering::Release);
                SinkError::Stream(format!("failed to spawn device clock: {}", e))
            })?;

        self.clock_thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.clock_running.store(false, Ordering::Release);
        if let Some(handle) = self.clock_thread.take() {
            handle
                .join()
                .map_err(|_| SinkError::Stream("device clock thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for ClockedSink {
    fn drop(&mut self) {
        let _ = self.stop();
        log::debug!("Software device closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> DeviceConfig {
        DeviceConfig {
            buffer_ms: 10,
            period_frames: 48,
        }
    }

    #[test]
    fn test_device_config_default() {
        let config = DeviceConfig::default();
        assert_eq!(config.buffer_ms, 100);
        assert_eq!(config.period_frames, 480);
    }

    #[test]
    fn test_open_rejects_bad_format() {
        let format = SinkFormat {
            sample_rate: 48000,
            channels: 0,
        };
        assert!(matches!(
            ClockedSink::open(format, small_config()),
            Err(SinkError::UnsupportedFormat(_))
        ));

        let config = DeviceConfig {
            buffer_ms: 10,
            period_frames: 0,
        };
        assert!(matches!(
            ClockedSink::open(SinkFormat::stereo(48000), config),
            Err(SinkError::Open(_))
        ));
    }

    #[test]
    fn test_write_and_commit() {
        let mut sink = ClockedSink::open(SinkFormat::stereo(48000), small_config()).unwrap();
        // 480 帧 → 960 样本 → 1024
        assert_eq!(sink.buffer_frames(), 512);
        assert_eq!(sink.free_frames().unwrap(), 512);

        let buffer = sink.buffer(100).unwrap();
        assert_eq!(buffer.len(), 200);
        buffer.fill(0.25);
        sink.commit(100).unwrap();
        assert_eq!(sink.free_frames().unwrap(), 412);

        assert!(matches!(
            sink.buffer(413),
            Err(SinkError::Overflow {
                requested: 413,
                free: 412
            })
        ));
        assert!(sink.commit(413).is_err());
    }

    #[test]
    fn test_clock_drains_and_counts_underruns() {
        let mut sink = ClockedSink::open(SinkFormat::stereo(48000), small_config()).unwrap();
        let frames = sink.free_frames().unwrap();
        sink.buffer(frames).unwrap().fill(0.5);
        sink.commit(frames).unwrap();

        sink.start().unwrap();
        // 重复 start 无副作用
        sink.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        sink.stop().unwrap();

        let report = sink.report();
        assert!(report.period_count > 0);
        assert!(report.frames_played > 0);
        assert!(sink.free_frames().unwrap() > 0, "clock should drain the buffer");

        // 512 帧只够约 10 个周期，之后空读即 underrun
        sink.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        sink.stop().unwrap();
        assert!(sink.stats().underrun_count() > 0);
    }
}
