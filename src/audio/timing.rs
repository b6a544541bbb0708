//! 单调时钟与精确等待
//!
//! 时间戳统一以进程内固定的单调起点（epoch）计量，
//! 导出遥测时以微秒整数表示

use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

/// 单调时钟起点（全局缓存，只初始化一次）
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// 睡眠结束后留给自旋的余量
const SPIN_MARGIN: Duration = Duration::from_micros(500);

/// 获取单调时钟起点
#[inline]
pub fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// 将时刻转换为相对 epoch 的微秒数
///
/// 早于 epoch 的时刻返回 0
#[inline]
pub fn monotonic_us(at: Instant) -> u64 {
    at.saturating_duration_since(epoch()).as_micros() as u64
}

/// 获取当前时间（微秒，相对 epoch）
#[inline]
pub fn now_us() -> u64 {
    monotonic_us(Instant::now())
}

/// 两个时刻之间的毫秒数
///
/// `to` 早于 `from` 时返回 0
#[inline]
pub fn elapsed_ms(from: Instant, to: Instant) -> f64 {
    to.saturating_duration_since(from).as_secs_f64() * 1000.0
}

/// 等待到指定时刻
///
/// 等待策略：
/// - 剩余时间较长：睡眠到截止时间前 SPIN_MARGIN
/// - 剩余时间较短：yield + 自旋，避免睡眠粒度带来的抖动
pub fn sleep_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }

        let remaining = deadline - now;
        if remaining > SPIN_MARGIN * 2 {
            thread::sleep(remaining - SPIN_MARGIN);
        } else if remaining > Duration::from_micros(50) {
            thread::yield_now();
        } else {
            for _ in 0..64 {
                std::hint::spin_loop();
            }
        }
    }
}
