//! 音频渲染泵
//!
//! 专用线程持续填充播放缓冲区：
//! 1. 查询可写帧数
//! 2. 无空间时短暂睡眠后重试（设备不提供排空通知，只能轮询）
//! 3. 有空间时逐帧推进振荡器，单声道复制到立体声
//! 4. 提交并继续
//!
//! 设备调用任何一步失败都会终止渲染循环，不重试

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use super::oscillator::Tone;
use super::sink::{AudioSink, SinkError, SinkFormat};
use crate::control::{LoopControl, LoopState};
use crate::stimulus::{ConfigError, StimulusConfig};

/// 缓冲区已满时的退避时间
const BACKOFF: Duration = Duration::from_micros(500);

/// 渲染泵生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    ShutDown,
}

/// 渲染泵错误
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("invalid stimulus configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("audio device error: {0}")]
    Sink(#[from] SinkError),
    #[error("failed to spawn render thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("render thread panicked")]
    ThreadPanicked,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// 渲染线程退出时交还的资源
struct RenderExit<S> {
    sink: S,
    tone: Tone,
    error: Option<SinkError>,
}

/// 执行一次填充
///
/// 返回写入的帧数；没有可写空间时返回 0 且不触碰缓冲区
pub fn render_once<S: AudioSink>(sink: &mut S, tone: &mut Tone) -> Result<usize, SinkError> {
    let free = sink.free_frames()?;
    if free == 0 {
        return Ok(0);
    }

    let channels = sink.format().samples_per_frame();
    let buffer = sink.buffer(free)?;
    let frames = tone.fill_interleaved(buffer, channels);
    sink.commit(frames)?;
    Ok(frames)
}

/// 音频渲染泵
///
/// 设备句柄和振荡器状态在运行期间移交给渲染线程，停止时收回
pub struct AudioRenderPump<S: AudioSink> {
    sink: Option<S>,
    tone: Option<Tone>,
    control: Arc<LoopControl>,
    render_thread: Option<JoinHandle<RenderExit<S>>>,
    shut_down: bool,
}

impl<S: AudioSink> AudioRenderPump<S> {
    pub fn new() -> Self {
        Self {
            sink: None,
            tone: None,
            control: Arc::new(LoopControl::new()),
            render_thread: None,
            shut_down: false,
        }
    }

    /// 打开设备并准备振荡器
    ///
    /// `open` 负责设备获取；协商出的格式与配置不符时，
    /// 已打开的设备会被立即释放，渲染泵保持未初始化
    pub fn initialize<F>(&mut self, config: &StimulusConfig, open: F) -> Result<(), PumpError>
    where
        F: FnOnce(SinkFormat) -> Result<S, SinkError>,
    {
        if self.shut_down {
            return Err(PumpError::InvalidState("pump is shut down"));
        }
        if self.sink.is_some() || self.render_thread.is_some() {
            return Err(PumpError::InvalidState("pump is already initialized"));
        }

        config.validate()?;

        let requested = SinkFormat::stereo(config.sample_rate);
        let sink = open(requested)?;

        let actual = sink.format();
        if actual.sample_rate != requested.sample_rate || actual.channels == 0 {
            // sink 在这里 drop，设备随之释放
            return Err(SinkError::UnsupportedFormat(actual).into());
        }

        log::info!(
            "Audio render pump initialized: carrier {}Hz, modulation {}Hz, depth {:.2}, {}Hz {}ch",
            config.carrier_hz,
            config.modulation_hz,
            config.modulation_depth,
            actual.sample_rate,
            actual.channels
        );

        self.tone = Some(Tone::new(config));
        self.sink = Some(sink);
        Ok(())
    }

    /// 启动渲染线程
    ///
    /// 已在运行时为空操作
    pub fn start(&mut self) -> Result<(), PumpError> {
        if self.shut_down {
            return Err(PumpError::InvalidState("pump is shut down"));
        }

        if self.render_thread.is_some() {
            if self.control.should_run() {
                return Ok(());
            }
            // 渲染循环已因设备错误退出，先收回资源并报告错误
            self.join_render_thread()?;
        }

        let (mut sink, tone) = match (self.sink.take(), self.tone.take()) {
            (Some(sink), Some(tone)) => (sink, tone),
            (sink, tone) => {
                self.sink = sink;
                self.tone = tone;
                return Err(PumpError::InvalidState("pump is not initialized"));
            }
        };

        if !self.control.try_start() {
            self.sink = Some(sink);
            self.tone = Some(tone);
            return Ok(());
        }

        if let Err(e) = sink.start() {
            self.control.mark_stopped();
            self.sink = Some(sink);
            self.tone = Some(tone);
            return Err(e.into());
        }

        let control = Arc::clone(&self.control);
        let handle = thread::Builder::new()
            .name("audio-render".to_string())
            .spawn(move || Self::render_thread_main(sink, tone, control))
            .map_err(|e| {
                // 闭包随 spawn 失败一起 drop，设备已释放
                self.control.mark_stopped();
                PumpError::Spawn(e)
            })?;

        self.render_thread = Some(handle);
        log::info!("Audio render pump started");
        Ok(())
    }

    /// 渲染线程主函数
    fn render_thread_main(mut sink: S, mut tone: Tone, control: Arc<LoopControl>) -> RenderExit<S> {
        set_render_thread_priority();

        let mut error = None;
        let mut frames_rendered: u64 = 0;

        while control.should_run() {
            match render_once(&mut sink, &mut tone) {
                Ok(0) => thread::sleep(BACKOFF),
                Ok(frames) => frames_rendered += frames as u64,
                Err(e) => {
                    log::error!("Render loop aborted: {}", e);
                    error = Some(e);
                    break;
                }
            }
        }

        control.mark_stopped();
        log::info!("Render thread finished, {} frames rendered", frames_rendered);

        RenderExit { sink, tone, error }
    }

    /// 等待渲染线程退出并收回设备
    fn join_render_thread(&mut self) -> Result<(), PumpError> {
        let Some(handle) = self.render_thread.take() else {
            return Ok(());
        };

        let exit = handle.join().map_err(|_| {
            self.control.mark_stopped();
            PumpError::ThreadPanicked
        })?;

        let RenderExit {
            mut sink,
            tone,
            error,
        } = exit;
        let stop_result = sink.stop();
        self.sink = Some(sink);
        self.tone = Some(tone);

        if let Some(e) = error {
            return Err(e.into());
        }
        stop_result?;
        Ok(())
    }

    /// 停止渲染
    ///
    /// 返回前渲染线程已退出，设备已停止。
    /// 未运行时为空操作；渲染循环曾因设备错误退出时返回该错误
    pub fn stop(&mut self) -> Result<(), PumpError> {
        self.control.request_stop();
        if self.render_thread.is_none() {
            return Ok(());
        }

        self.join_render_thread()?;
        log::info!("Audio render pump stopped");
        Ok(())
    }

    /// 停止并释放设备
    ///
    /// 可重复调用
    pub fn shutdown(&mut self) -> Result<(), PumpError> {
        if self.shut_down {
            return Ok(());
        }

        let result = self.stop();
        self.sink = None;
        self.tone = None;
        self.shut_down = true;

        log::info!("Audio render pump shut down");
        result
    }

    /// 当前状态
    pub fn state(&self) -> PumpState {
        if self.shut_down {
            return PumpState::ShutDown;
        }
        if self.render_thread.is_some() {
            return if self.control.should_run() {
                PumpState::Running
            } else {
                PumpState::Stopped
            };
        }
        if self.sink.is_none() {
            return PumpState::Uninitialized;
        }
        match self.control.state() {
            LoopState::Idle => PumpState::Initialized,
            _ => PumpState::Stopped,
        }
    }

    /// 设备句柄（渲染线程运行期间为 None）
    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }
}

impl<S: AudioSink> Default for AudioRenderPump<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AudioSink> Drop for AudioRenderPump<S> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// 提升渲染线程优先级（尽力而为）
fn set_render_thread_priority() {
    #[cfg(target_os = "macos")]
    {
        // QOS_CLASS_USER_INTERACTIVE = 0x21
        const QOS_CLASS_USER_INTERACTIVE: u32 = 0x21;

        extern "C" {
            fn pthread_set_qos_class_self_np(qos_class: u32, relative_priority: i32) -> i32;
        }

        let result = unsafe { pthread_set_qos_class_self_np(QOS_CLASS_USER_INTERACTIVE, 0) };
        if result == 0 {
            log::debug!("Render thread QoS class set to USER_INTERACTIVE");
        } else {
            log::debug!("Failed to set QoS class (errno: {})", result);
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        // Linux 上 who=0 作用于调用线程
        let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -10) };
        if result == 0 {
            log::debug!("Render thread nice value set to -10");
        } else {
            log::debug!(
                "Failed to raise render thread priority: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}
