//! 视觉呈现模块
//!
//! 包含：
//! - Surface: 呈现表面抽象
//! - Vsync: 软件垂直同步表面
//! - Terminal: 终端整屏闪烁表面
//! - Pacer: 帧节拍器

pub mod pacer;
pub mod surface;
pub mod terminal;
pub mod vsync;

pub use pacer::{FramePacer, LoopExit, PacerError, PacerHandle};
pub use surface::{PresentSurface, SurfaceConfig, SurfaceError};
pub use terminal::TerminalSurface;
pub use vsync::VsyncSurface;
