//! 呈现表面抽象
//!
//! 帧节拍器只通过 [`PresentSurface`] 等待帧槽和呈现画面。
//! 表面句柄独占所有权，`Drop` 即释放

use thiserror::Error;

/// 表面配置
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceConfig {
    /// 刷新率（Hz）
    pub refresh_hz: f64,
    /// 目标闪烁频率（Hz），仅用于日志
    pub modulation_hz: f64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 120.0,
            modulation_hz: 40.0,
        }
    }
}

/// 呈现表面错误
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("failed to open presentation surface: {0}")]
    Open(String),
    #[error("invalid refresh rate: {0}")]
    InvalidRefreshRate(f64),
    #[error("present failed: {0}")]
    Present(String),
    #[error("terminal error: {0}")]
    Io(#[from] std::io::Error),
}

/// 呈现表面
pub trait PresentSurface {
    /// 阻塞直到表面可以接收下一帧（无超时）
    fn wait_for_next_frame(&mut self) -> Result<(), SurfaceError>;

    /// 呈现一帧
    fn present(&mut self, visual_on: bool) -> Result<(), SurfaceError>;
}
