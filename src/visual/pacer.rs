//! 帧节拍器
//!
//! 在控制线程上运行：
//! 1. 记录基准时间
//! 2. 调用帧回调（由调用方处理消息等），返回 false 即退出
//! 3. 阻塞等待表面的下一个帧槽（唯一的阻塞点，无超时）
//! 4. 计算帧间隔，翻转画面状态
//! 5. 记录遥测样本
//! 6. 呈现
//!
//! 停止请求在每次迭代开始时检查一次，最坏情况下要等当前帧槽到来

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::surface::{PresentSurface, SurfaceConfig, SurfaceError};
use crate::audio::timing::{elapsed_ms, monotonic_us};
use crate::control::LoopControl;
use crate::telemetry::{FrameSample, TelemetryAggregator};

/// 帧节拍器错误
#[derive(Debug, Error)]
pub enum PacerError {
    #[error("presentation surface error: {0}")]
    Surface(#[from] SurfaceError),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// 循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// 帧回调返回 false
    CallbackFinished,
    /// 其他线程请求停止
    StopRequested,
}

/// 跨线程停止句柄
#[derive(Clone)]
pub struct PacerHandle {
    control: Arc<LoopControl>,
}

impl PacerHandle {
    /// 请求帧循环停止，返回循环是否正在运行
    pub fn request_stop(&self) -> bool {
        self.control.request_stop()
    }
}

/// 帧节拍器
pub struct FramePacer<P: PresentSurface> {
    surface: Option<P>,
    telemetry: Arc<TelemetryAggregator>,
    control: Arc<LoopControl>,
    visual_on: bool,
    frames_presented: u64,
}

impl<P: PresentSurface> FramePacer<P> {
    pub fn new(telemetry: Arc<TelemetryAggregator>) -> Self {
        Self {
            surface: None,
            telemetry,
            control: Arc::new(LoopControl::new()),
            visual_on: false,
            frames_presented: 0,
        }
    }

    /// 打开呈现表面
    pub fn initialize<F>(&mut self, config: &SurfaceConfig, open: F) -> Result<(), PacerError>
    where
        F: FnOnce(&SurfaceConfig) -> Result<P, SurfaceError>,
    {
        if self.surface.is_some() {
            return Err(PacerError::InvalidState("pacer is already initialized"));
        }

        self.surface = Some(open(config)?);
        log::info!("Frame pacer initialized at {:.2}Hz", config.refresh_hz);
        Ok(())
    }

    /// 停止句柄
    pub fn handle(&self) -> PacerHandle {
        PacerHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn is_initialized(&self) -> bool {
        self.surface.is_some()
    }

    /// 运行帧循环直到回调返回 false 或收到停止请求
    ///
    /// 表面等待或呈现失败会终止循环并返回错误，不重试
    pub fn run_loop<F>(&mut self, mut frame_callback: F) -> Result<LoopExit, PacerError>
    where
        F: FnMut() -> bool,
    {
        let Self {
            surface,
            telemetry,
            control,
            visual_on,
            frames_presented,
        } = self;

        let surface = surface
            .as_mut()
            .ok_or(PacerError::InvalidState("pacer is not initialized"))?;

        if !control.try_start() {
            return Err(PacerError::InvalidState("frame loop is already running"));
        }

        log::info!("Frame loop started");

        let mut previous = Instant::now();
        let result = loop {
            if !frame_callback() {
                break Ok(LoopExit::CallbackFinished);
            }
            if !control.should_run() {
                break Ok(LoopExit::StopRequested);
            }

            if let Err(e) = surface.wait_for_next_frame() {
                break Err(e);
            }

            let now = Instant::now();
            let delta_ms = elapsed_ms(previous, now);
            previous = now;

            *visual_on = !*visual_on;
            telemetry.log_frame(FrameSample::from_delta(monotonic_us(now), *visual_on, delta_ms));

            if let Err(e) = surface.present(*visual_on) {
                break Err(e);
            }
            *frames_presented += 1;
        };

        control.mark_stopped();

        match result {
            Ok(exit) => {
                log::info!(
                    "Frame loop finished ({:?}), {} frames presented",
                    exit,
                    frames_presented
                );
                Ok(exit)
            }
            Err(e) => {
                log::error!("Frame loop aborted: {}", e);
                Err(e.into())
            }
        }
    }

    /// 释放呈现表面
    ///
    /// 无论帧循环如何退出都可调用，可重复调用
    pub fn shutdown(&mut self) {
        self.control.request_stop();
        if self.surface.take().is_some() {
            log::info!("Frame pacer shut down");
        }
    }
}

impl<P: PresentSurface> Drop for FramePacer<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::DropPolicy;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// 测试用表面：等待立即返回
    struct FakeSurface {
        waits: u64,
        presented: Vec<bool>,
        fail_present_at: Option<usize>,
        dropped: Arc<AtomicBool>,
    }

    impl FakeSurface {
        fn new(dropped: Arc<AtomicBool>) -> Self {
            Self {
                waits: 0,
                presented: Vec::new(),
                fail_present_at: None,
                dropped,
            }
        }
    }

    impl PresentSurface for FakeSurface {
        fn wait_for_next_frame(&mut self) -> Result<(), SurfaceError> {
            self.waits += 1;
            Ok(())
        }

        fn present(&mut self, visual_on: bool) -> Result<(), SurfaceError> {
            if self.fail_present_at == Some(self.presented.len()) {
                return Err(SurfaceError::Present("device lost".to_string()));
            }
            self.presented.push(visual_on);
            Ok(())
        }
    }

    impl Drop for FakeSurface {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn telemetry() -> Arc<TelemetryAggregator> {
        Arc::new(TelemetryAggregator::new(DropPolicy::disabled()))
    }

    fn pacer_with(surface: FakeSurface) -> FramePacer<FakeSurface> {
        let mut pacer = FramePacer::new(telemetry());
        pacer
            .initialize(&SurfaceConfig::default(), |_| Ok(surface))
            .unwrap();
        pacer
    }

    #[test]
    fn test_toggles_once_per_frame() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut pacer = pacer_with(FakeSurface::new(Arc::clone(&dropped)));

        let mut calls = 0;
        let exit = pacer
            .run_loop(|| {
                calls += 1;
                calls <= 4
            })
            .unwrap();

        assert_eq!(exit, LoopExit::CallbackFinished);
        assert_eq!(pacer.frames_presented(), 4);

        let frames = pacer.telemetry().snapshot();
        assert_eq!(frames.len(), 4);
        let states: Vec<bool> = frames.iter().map(|frame| frame.visual_on).collect();
        assert_eq!(states, vec![true, false, true, false]);
        assert!(frames.windows(2).all(|pair| pair[0].timestamp_us <= pair[1].timestamp_us));
        for frame in &frames {
            assert!(frame.jitter_ms >= 0.0);
            if frame.jitter_ms > 0.0 {
                assert!((frame.effective_hz - 1000.0 / frame.jitter_ms).abs() < 1e-6);
            } else {
                assert_eq!(frame.effective_hz, 0.0);
            }
        }

        pacer.shutdown();
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_callback_false_skips_wait() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut pacer = pacer_with(FakeSurface::new(dropped));

        let exit = pacer.run_loop(|| false).unwrap();
        assert_eq!(exit, LoopExit::CallbackFinished);
        assert!(pacer.telemetry().is_empty());
        assert_eq!(pacer.surface.as_ref().map(|s| s.waits), Some(0));
    }

    #[test]
    fn test_stop_request_observed_once_per_iteration() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut pacer = pacer_with(FakeSurface::new(dropped));
        let handle = pacer.handle();

        let mut calls = 0;
        let exit = pacer
            .run_loop(|| {
                calls += 1;
                if calls == 3 {
                    assert!(handle.request_stop());
                }
                true
            })
            .unwrap();

        assert_eq!(exit, LoopExit::StopRequested);
        assert_eq!(pacer.frames_presented(), 2);

        // 循环退出后可以再次运行
        let exit = pacer.run_loop(|| false).unwrap();
        assert_eq!(exit, LoopExit::CallbackFinished);
    }

    #[test]
    fn test_present_failure_ends_loop() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut surface = FakeSurface::new(Arc::clone(&dropped));
        surface.fail_present_at = Some(2);
        let mut pacer = pacer_with(surface);

        let result = pacer.run_loop(|| true);
        assert!(matches!(
            result,
            Err(PacerError::Surface(SurfaceError::Present(_)))
        ));
        // 失败帧的样本在呈现之前已记录
        assert_eq!(pacer.telemetry().len(), 3);
        assert_eq!(pacer.frames_presented(), 2);

        pacer.shutdown();
        assert!(dropped.load(Ordering::SeqCst));
        pacer.shutdown();
    }

    #[test]
    fn test_requires_initialize() {
        let mut pacer: FramePacer<FakeSurface> = FramePacer::new(telemetry());
        assert!(matches!(
            pacer.run_loop(|| true),
            Err(PacerError::InvalidState(_))
        ));

        let result = pacer.initialize(&SurfaceConfig::default(), |_| {
            Err(SurfaceError::Open("no display".to_string()))
        });
        assert!(matches!(result, Err(PacerError::Surface(SurfaceError::Open(_)))));
        assert!(!pacer.is_initialized());
    }

    #[test]
    fn test_drop_releases_surface() {
        let dropped = Arc::new(AtomicBool::new(false));
        let pacer = pacer_with(FakeSurface::new(Arc::clone(&dropped)));
        drop(pacer);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
