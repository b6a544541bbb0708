//! 软件垂直同步表面
//!
//! 按固定刷新网格释放帧槽：第 k 个槽在 `epoch + k × period` 到来。
//! 每次等待都指向“当前时间之后、且晚于上一次释放”的第一个槽，
//! 错过的槽直接跳过，与真实交换链的行为一致

use std::time::{Duration, Instant};

use super::surface::{PresentSurface, SurfaceConfig, SurfaceError};
use crate::audio::timing::sleep_until;

/// 软件垂直同步表面
pub struct VsyncSurface {
    epoch: Instant,
    period_ns: u64,
    last_slot: Option<u64>,
    presented: u64,
    skipped_slots: u64,
}

impl VsyncSurface {
    pub fn open(config: &SurfaceConfig) -> Result<Self, SurfaceError> {
        let refresh_hz = config.refresh_hz;
        if !refresh_hz.is_finite() || refresh_hz <= 0.0 {
            return Err(SurfaceError::InvalidRefreshRate(refresh_hz));
        }

        let period_ns = (1_000_000_000.0 / refresh_hz).round() as u64;
        if period_ns == 0 {
            return Err(SurfaceError::InvalidRefreshRate(refresh_hz));
        }

        log::info!(
            "Vsync surface opened: {:.2}Hz ({:.3}ms/frame), flicker target {}Hz",
            refresh_hz,
            period_ns as f64 / 1_000_000.0,
            config.modulation_hz
        );

        Ok(Self {
            epoch: Instant::now(),
            period_ns,
            last_slot: None,
            presented: 0,
            skipped_slots: 0,
        })
    }

    /// 帧周期
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns)
    }

    /// 已呈现帧数
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// 因超时被跳过的槽数
    pub fn skipped_slots(&self) -> u64 {
        self.skipped_slots
    }

    /// `now` 之后的下一个可用槽
    fn slot_after(&self, now: Instant) -> u64 {
        let elapsed_ns = now.saturating_duration_since(self.epoch).as_nanos() as u64;
        let next = elapsed_ns / self.period_ns + 1;
        match self.last_slot {
            Some(last) => next.max(last + 1),
            None => next,
        }
    }

    fn slot_time(&self, slot: u64) -> Instant {
        self.epoch + Duration::from_nanos(self.period_ns.saturating_mul(slot))
    }
}

impl PresentSurface for VsyncSurface {
    fn wait_for_next_frame(&mut self) -> Result<(), SurfaceError> {
        let slot = self.slot_after(Instant::now());
        if let Some(last) = self.last_slot {
            self.skipped_slots += slot - last - 1;
        }

        sleep_until(self.slot_time(slot));
        self.last_slot = Some(slot);
        Ok(())
    }

    fn present(&mut self, _visual_on: bool) -> Result<(), SurfaceError> {
        self.presented += 1;
        Ok(())
    }
}

impl Drop for VsyncSurface {
    fn drop(&mut self) {
        log::debug!(
            "Vsync surface closed: {} frames presented, {} slots skipped",
            self.presented,
            self.skipped_slots
        );
    }
}
