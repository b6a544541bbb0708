//! 终端呈现表面
//!
//! 用整屏背景色表现画面状态（亮 = 白，暗 = 黑），帧节拍沿用软件垂直同步。
//! 打开时进入备用屏幕并隐藏光标，关闭时恢复

use std::io::{self, Stdout, Write};

use crossterm::{
    cursor::{Hide, Show},
    execute, queue,
    style::{Color, ResetColor, SetBackgroundColor},
    terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};

use super::surface::{PresentSurface, SurfaceConfig, SurfaceError};
use super::vsync::VsyncSurface;

/// 终端呈现表面
pub struct TerminalSurface {
    vsync: VsyncSurface,
    stdout: Stdout,
}

impl TerminalSurface {
    pub fn open(config: &SurfaceConfig) -> Result<Self, SurfaceError> {
        let vsync = VsyncSurface::open(config)?;

        let mut stdout = io::stdout();
        enter_screen(&mut stdout)?;

        log::info!("Terminal surface opened");
        Ok(Self { vsync, stdout })
    }
}

/// 进入备用屏幕并隐藏光标
///
/// 隐藏光标失败时先退出备用屏幕再返回错误，终端不会停在半初始化状态
fn enter_screen<W: Write>(out: &mut W) -> io::Result<()> {
    execute!(out, EnterAlternateScreen)?;
    if let Err(e) = execute!(out, Hide) {
        let _ = execute!(out, LeaveAlternateScreen);
        return Err(e);
    }
    Ok(())
}

/// 恢复颜色、光标和主屏幕
fn leave_screen<W: Write>(out: &mut W) -> io::Result<()> {
    execute!(out, ResetColor, Show, LeaveAlternateScreen)
}

impl PresentSurface for TerminalSurface {
    fn wait_for_next_frame(&mut self) -> Result<(), SurfaceError> {
        self.vsync.wait_for_next_frame()
    }

    fn present(&mut self, visual_on: bool) -> Result<(), SurfaceError> {
        let color = if visual_on { Color::White } else { Color::Black };
        queue!(self.stdout, SetBackgroundColor(color), Clear(ClearType::All))
            .and_then(|_| self.stdout.flush())
            .map_err(|e| SurfaceError::Present(e.to_string()))?;
        self.vsync.present(visual_on)
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        let _ = leave_screen(&mut self.stdout);
        log::info!("Terminal surface closed, {} frames presented", self.vsync.presented());
    }
}
