//! 音频输出设备抽象
//!
//! 渲染泵只通过 [`AudioSink`] 访问播放缓冲区。
//! 设备句柄独占所有权，`Drop` 即释放

use thiserror::Error;

/// 输出格式（交织 f32）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SinkFormat {
    /// 立体声输出
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }

    /// 每帧的样本数（= 声道数）
    #[inline]
    pub fn samples_per_frame(&self) -> usize {
        self.channels as usize
    }
}

/// 音频设备错误
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open audio device: {0}")]
    Open(String),
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(SinkFormat),
    #[error("requested {requested} frames but only {free} are free")]
    Overflow { requested: usize, free: usize },
    #[error("device stream failed: {0}")]
    Stream(String),
}

/// 播放缓冲区
///
/// 写入流程：`free_frames` → `buffer` → 填充 → `commit`
pub trait AudioSink: Send + 'static {
    /// 输出格式
    fn format(&self) -> SinkFormat;

    /// 缓冲区总容量（帧）
    fn buffer_frames(&self) -> usize;

    /// 当前可写帧数（总容量减去排队待播放的帧）
    fn free_frames(&mut self) -> Result<usize, SinkError>;

    /// 获取可写入 `frames` 帧的交织缓冲区
    fn buffer(&mut self, frames: usize) -> Result<&mut [f32], SinkError>;

    /// 提交已写入的帧
    fn commit(&mut self, frames: usize) -> Result<(), SinkError>;

    /// 启动设备播放
    fn start(&mut self) -> Result<(), SinkError>;

    /// 停止设备播放
    fn stop(&mut self) -> Result<(), SinkError>;
}
