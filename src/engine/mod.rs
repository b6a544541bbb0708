//! 会话引擎
//!
//! 整合音频渲染泵、帧节拍器和遥测：
//! - 启动顺序：音频 → 呈现表面；表面失败时先关闭已启动的音频再返回错误
//! - 音频线程与帧循环互不依赖，唯一共享的是遥测聚合器
//! - 会话结束时生成一次汇总并导出日志

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::audio::{AudioRenderPump, AudioSink, PumpError, SinkError, SinkFormat};
use crate::stimulus::StimulusConfig;
use crate::telemetry::{
    DropPolicy, SessionSummary, TelemetryAggregator, TelemetryError, DEFAULT_DROP_MULTIPLIER,
};
use crate::visual::{
    FramePacer, LoopExit, PacerError, PacerHandle, PresentSurface, SurfaceConfig, SurfaceError,
};

/// 会话配置
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionConfig {
    pub stimulus: StimulusConfig,
    /// 掉帧阈值倍数（相对名义帧周期）
    pub drop_multiplier: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stimulus: StimulusConfig::default(),
            drop_multiplier: DEFAULT_DROP_MULTIPLIER,
        }
    }
}

impl SessionConfig {
    pub fn surface_config(&self) -> SurfaceConfig {
        SurfaceConfig {
            refresh_hz: self.stimulus.refresh_rate_hint,
            modulation_hz: self.stimulus.modulation_hz,
        }
    }

    pub fn drop_policy(&self) -> DropPolicy {
        DropPolicy::from_refresh_hint(self.stimulus.refresh_rate_hint, self.drop_multiplier)
    }
}

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio engine error: {0}")]
    Audio(#[from] PumpError),
    #[error("presentation error: {0}")]
    Visual(#[from] PacerError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// 完整运行一次会话的结果
#[derive(Debug)]
pub struct SessionOutcome {
    pub summary: SessionSummary,
    /// 帧循环的退出方式。循环出错时日志照常汇总和导出，错误留在这里
    pub exit: Result<LoopExit, EngineError>,
}

/// 刺激会话
pub struct Session<S: AudioSink, P: PresentSurface> {
    config: SessionConfig,
    telemetry: Arc<TelemetryAggregator>,
    pump: AudioRenderPump<S>,
    pacer: FramePacer<P>,
}

impl<S: AudioSink, P: PresentSurface> Session<S, P> {
    /// 启动会话
    ///
    /// 音频先初始化并开始渲染，再打开呈现表面。
    /// 任何一步失败，已获取的资源都会在返回前释放
    pub fn bootstrap<FS, FP>(
        config: SessionConfig,
        open_sink: FS,
        open_surface: FP,
    ) -> Result<Self, EngineError>
    where
        FS: FnOnce(SinkFormat) -> Result<S, SinkError>,
        FP: FnOnce(&SurfaceConfig) -> Result<P, SurfaceError>,
    {
        let telemetry = Arc::new(TelemetryAggregator::new(config.drop_policy()));

        let mut pump = AudioRenderPump::new();
        pump.initialize(&config.stimulus, open_sink)?;
        pump.start()?;

        let mut pacer = FramePacer::new(Arc::clone(&telemetry));
        if let Err(e) = pacer.initialize(&config.surface_config(), open_surface) {
            log::error!("Presentation initialization failed, shutting down audio: {}", e);
            if let Err(shutdown_error) = pump.shutdown() {
                log::warn!("Audio shutdown after failed bootstrap: {}", shutdown_error);
            }
            return Err(e.into());
        }

        log::info!("Session started");

        Ok(Self {
            config,
            telemetry,
            pump,
            pacer,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }

    pub fn pump(&self) -> &AudioRenderPump<S> {
        &self.pump
    }

    /// 跨线程停止帧循环
    pub fn handle(&self) -> PacerHandle {
        self.pacer.handle()
    }

    /// 运行帧循环（阻塞当前线程）
    pub fn run<F>(&mut self, frame_callback: F) -> Result<LoopExit, EngineError>
    where
        F: FnMut() -> bool,
    {
        Ok(self.pacer.run_loop(frame_callback)?)
    }

    /// 运行帧循环，无论循环如何退出都汇总、导出并释放资源
    ///
    /// 只有导出或释放失败会作为外层错误返回
    pub fn run_to_end<F>(
        mut self,
        frame_callback: F,
        export_path: Option<&Path>,
    ) -> Result<SessionOutcome, EngineError>
    where
        F: FnMut() -> bool,
    {
        let exit = self.run(frame_callback);
        if let Err(e) = &exit {
            log::error!("Frame loop failed, keeping collected telemetry: {}", e);
        }

        let summary = self.finish(export_path)?;
        Ok(SessionOutcome { summary, exit })
    }

    /// 结束会话：生成汇总、导出日志、释放所有资源
    ///
    /// 导出失败时资源仍会释放，然后返回导出错误
    pub fn finish(mut self, export_path: Option<&Path>) -> Result<SessionSummary, EngineError> {
        let summary = self.telemetry.build_summary();
        let export_result = match export_path {
            Some(path) => self.telemetry.export_csv(path),
            None => Ok(()),
        };

        let shutdown_result = self.shutdown();
        export_result?;
        shutdown_result?;

        Ok(summary)
    }

    /// 释放呈现表面和音频设备
    ///
    /// 可重复调用
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        self.pacer.shutdown();
        self.pump.shutdown()?;
        Ok(())
    }
}

impl<S: AudioSink, P: PresentSurface> Drop for Session<S, P> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ClockedSink, DeviceConfig, DeviceStats, PumpState};
    use crate::visual::VsyncSurface;

    /// 第 `fail_at` 次呈现（从 0 计）失败的表面
    struct FailingSurface {
        vsync: VsyncSurface,
        presents: usize,
        fail_at: usize,
    }

    impl PresentSurface for FailingSurface {
        fn wait_for_next_frame(&mut self) -> Result<(), SurfaceError> {
            self.vsync.wait_for_next_frame()
        }

        fn present(&mut self, visual_on: bool) -> Result<(), SurfaceError> {
            if self.presents == self.fail_at {
                return Err(SurfaceError::Present("device lost".to_string()));
            }
            self.presents += 1;
            self.vsync.present(visual_on)
        }
    }

    fn temp_csv(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("isoflicker-{}-{}.csv", name, std::process::id()))
    }

    fn fast_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.stimulus.refresh_rate_hint = 500.0;
        config
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.drop_multiplier, 2.0);
        assert_eq!(config.surface_config().refresh_hz, 120.0);
        assert_eq!(config.surface_config().modulation_hz, 40.0);
        assert!(config.drop_policy().threshold_ms().is_some());
    }

    #[test]
    fn test_full_session() {
        let mut stats: Option<Arc<DeviceStats>> = None;
        let mut session = Session::bootstrap(
            fast_config(),
            |format| {
                let sink = ClockedSink::open(format, DeviceConfig::default())?;
                stats = Some(sink.stats());
                Ok(sink)
            },
            VsyncSurface::open,
        )
        .unwrap();
        assert_eq!(session.pump().state(), PumpState::Running);

        let mut frames = 0;
        let exit = session
            .run(|| {
                frames += 1;
                frames <= 10
            })
            .unwrap();
        assert_eq!(exit, LoopExit::CallbackFinished);

        let path = temp_csv("session");
        let summary = session.finish(Some(&path)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(summary.frames, 10);
        assert!(summary.effective_hz > 0.0);
        assert!(summary.jitter_p50 <= summary.jitter_p95);
        assert!(summary.jitter_p95 <= summary.jitter_p99);
        assert_eq!(text.lines().count(), 11);

        let stats = stats.unwrap();
        assert!(stats.frames_played() > 0);
        assert_eq!(Arc::strong_count(&stats), 1, "device must be released");
    }

    #[test]
    fn test_surface_failure_unwinds_audio() {
        let mut stats: Option<Arc<DeviceStats>> = None;
        let result: Result<Session<ClockedSink, VsyncSurface>, _> = Session::bootstrap(
            fast_config(),
            |format| {
                let sink = ClockedSink::open(format, DeviceConfig::default())?;
                stats = Some(sink.stats());
                Ok(sink)
            },
            |_| Err(SurfaceError::Open("no display".to_string())),
        );

        assert!(matches!(result, Err(EngineError::Visual(_))));
        let stats = stats.unwrap();
        assert_eq!(Arc::strong_count(&stats), 1, "audio device must be released");
    }

    #[test]
    fn test_audio_failure_skips_surface() {
        let mut surface_opened = false;
        let result: Result<Session<ClockedSink, VsyncSurface>, _> = Session::bootstrap(
            fast_config(),
            |_| Err(SinkError::Open("no device".to_string())),
            |config| {
                surface_opened = true;
                VsyncSurface::open(config)
            },
        );

        assert!(matches!(
            result,
            Err(EngineError::Audio(PumpError::Sink(SinkError::Open(_))))
        ));
        assert!(!surface_opened);
    }

    #[test]
    fn test_stop_handle_ends_run() {
        let mut session: Session<ClockedSink, VsyncSurface> = Session::bootstrap(
            fast_config(),
            |format| ClockedSink::open(format, DeviceConfig::default()),
            VsyncSurface::open,
        )
        .unwrap();

        let handle = session.handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            handle.request_stop()
        });

        let exit = session.run(|| true).unwrap();
        assert!(stopper.join().unwrap());
        assert_eq!(exit, LoopExit::StopRequested);
        assert!(!session.telemetry().is_empty());

        let summary = session.finish(None).unwrap();
        assert!(summary.frames > 0);
    }

    #[test]
    fn test_run_to_end_exports_after_present_failure() {
        let session = Session::bootstrap(
            fast_config(),
            |format| ClockedSink::open(format, DeviceConfig::default()),
            |config| {
                Ok(FailingSurface {
                    vsync: VsyncSurface::open(config)?,
                    presents: 0,
                    fail_at: 3,
                })
            },
        )
        .unwrap();

        let path = temp_csv("present-failure");
        let outcome = session.run_to_end(|| true, Some(&path)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(
            outcome.exit,
            Err(EngineError::Visual(PacerError::Surface(SurfaceError::Present(_))))
        ));
        // 失败帧在呈现前已记录
        assert_eq!(outcome.summary.frames, 4);
        assert_eq!(text.lines().count(), 5);
        assert!(text.starts_with(crate::telemetry::CSV_HEADER));
    }

    #[test]
    fn test_run_to_end_normal_exit() {
        let session: Session<ClockedSink, VsyncSurface> = Session::bootstrap(
            fast_config(),
            |format| ClockedSink::open(format, DeviceConfig::default()),
            VsyncSurface::open,
        )
        .unwrap();

        let mut frames = 0;
        let outcome = session
            .run_to_end(
                || {
                    frames += 1;
                    frames <= 3
                },
                None,
            )
            .unwrap();

        assert_eq!(outcome.exit.unwrap(), LoopExit::CallbackFinished);
        assert_eq!(outcome.summary.frames, 3);
    }
}
