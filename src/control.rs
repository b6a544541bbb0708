//! 循环控制状态
//!
//! 渲染循环和帧节拍循环共用的协作式取消标志：
//! 每次循环迭代检查一次，不做抢占式终止

use std::sync::atomic::{AtomicU8, Ordering};

/// 循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::StopRequested,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// 原子循环状态
///
/// 状态转换：
/// - Idle / Stopped → Running（`try_start`）
/// - Running → StopRequested（`request_stop`）
/// - 任意 → Stopped（`mark_stopped`，循环退出时调用）
#[derive(Debug)]
pub struct LoopControl {
    state: AtomicU8,
}

impl LoopControl {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LoopState::Idle as u8),
        }
    }

    #[inline]
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 尝试进入 Running
    ///
    /// 已在 Running 或 StopRequested 时返回 false
    pub fn try_start(&self) -> bool {
        for from in [LoopState::Idle, LoopState::Stopped] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    LoopState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// 请求停止
    ///
    /// 仅在 Running 时生效，返回是否发生了转换
    pub fn request_stop(&self) -> bool {
        self.state
            .compare_exchange(
                LoopState::Running as u8,
                LoopState::StopRequested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// 循环体每次迭代调用
    #[inline]
    pub fn should_run(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// 循环已退出
    pub fn mark_stopped(&self) {
        self.state.store(LoopState::Stopped as u8, Ordering::Release);
    }
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}
