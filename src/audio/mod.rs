//! 音频核心模块
//!
//! 包含：
//! - Oscillator: AM 载波合成
//! - Ring Buffer: Lock-free 数据传递
//! - Sink: 播放设备抽象
//! - Device: 软件时钟播放设备
//! - Pump: 渲染线程
//! - Timing: 单调时钟和精确睡眠
//! - Stats: 设备统计

pub mod device;
pub mod oscillator;
pub mod pump;
pub mod ring_buffer;
pub mod sink;
pub mod stats;
pub mod timing;

pub use device::{ClockedSink, DeviceConfig};
pub use oscillator::{Oscillator, OscillatorState, Tone};
pub use pump::{render_once, AudioRenderPump, PumpError, PumpState};
pub use ring_buffer::RingBuffer;
pub use sink::{AudioSink, SinkError, SinkFormat};
pub use stats::{DeviceReport, DeviceStats};
