//! 调幅振荡器
//!
//! 正弦载波 × 正弦包络，相位连续：
//! - 载波步进：2π · carrier_hz / sample_rate
//! - 调制步进：2π · modulation_hz / sample_rate
//! - 包络：0.5 + 0.5 · depth · sin(mod_phase)
//!
//! 纯计算，无锁、无分配，可在音频线程内任意调用

use std::f64::consts::TAU;

use crate::stimulus::StimulusConfig;

/// 振荡器相位
///
/// 两个相位都保持在 [0, 2π) 内。只属于音频线程
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OscillatorState {
    pub carrier_phase: f64,
    pub mod_phase: f64,
}

/// 单次减 2π 回绕
///
/// 前提：步进小于 2π（配置校验保证频率低于 Nyquist）
#[inline]
fn wrap_phase(phase: f64) -> f64 {
    if phase >= TAU {
        phase - TAU
    } else {
        phase
    }
}

/// 调幅振荡器（只保存由配置推导出的常量）
#[derive(Clone, Copy, Debug)]
pub struct Oscillator {
    carrier_step: f64,
    mod_step: f64,
    depth: f64,
}

impl Oscillator {
    pub fn new(config: &StimulusConfig) -> Self {
        let sample_rate = config.sample_rate as f64;
        Self {
            carrier_step: TAU * config.carrier_hz / sample_rate,
            mod_step: TAU * config.modulation_hz / sample_rate,
            depth: config.modulation_depth,
        }
    }

    /// 计算当前样本并返回前进一个采样周期后的状态
    ///
    /// 输出范围 [-1, 1]
    #[inline]
    pub fn tick(&self, state: OscillatorState) -> (f32, OscillatorState) {
        let envelope = 0.5 + 0.5 * self.depth * state.mod_phase.sin();
        let value = (state.carrier_phase.sin() * envelope) as f32;

        let next = OscillatorState {
            carrier_phase: wrap_phase(state.carrier_phase + self.carrier_step),
            mod_phase: wrap_phase(state.mod_phase + self.mod_step),
        };

        (value, next)
    }
}

/// 带状态的音源：振荡器 + 当前相位
///
/// 由渲染线程独占
pub struct Tone {
    oscillator: Oscillator,
    state: OscillatorState,
}

impl Tone {
    pub fn new(config: &StimulusConfig) -> Self {
        Self {
            oscillator: Oscillator::new(config),
            state: OscillatorState::default(),
        }
    }

    /// 当前相位
    pub fn state(&self) -> OscillatorState {
        self.state
    }

    /// 生成下一个样本
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let (value, next) = self.oscillator.tick(self.state);
        self.state = next;
        value
    }

    /// 填充交织缓冲区（单声道复制到每个声道）
    ///
    /// 返回写入的帧数
    pub fn fill_interleaved(&mut self, output: &mut [f32], channels: usize) -> usize {
        if channels == 0 {
            return 0;
        }

        let mut frames = 0;
        for frame in output.chunks_exact_mut(channels) {
            let value = self.next_sample();
            frame.fill(value);
            frames += 1;
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn in_range(state: &OscillatorState) -> bool {
        (0.0..TAU).contains(&state.carrier_phase) && (0.0..TAU).contains(&state.mod_phase)
    }

    #[test]
    fn test_phase_stays_wrapped() {
        let mut rng = rand::thread_rng();

        for _ in 0..32 {
            let sample_rate = [22050u32, 44100, 48000, 96000][rng.gen_range(0..4)];
            let nyquist = sample_rate as f64 / 2.0;
            let config = StimulusConfig {
                carrier_hz: rng.gen_range(1.0..nyquist - 1.0),
                modulation_hz: rng.gen_range(0.1..100.0),
                modulation_depth: rng.gen_range(0.0..=1.0),
                sample_rate,
                refresh_rate_hint: 60.0,
            };
            assert!(config.validate().is_ok());

            let oscillator = Oscillator::new(&config);
            let mut state = OscillatorState::default();
            for _ in 0..20_000 {
                let (value, next) = oscillator.tick(state);
                assert!((-1.0..=1.0).contains(&value), "sample out of range: {}", value);
                assert!(in_range(&next), "phase escaped [0, 2π): {:?}", next);
                state = next;
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let config = StimulusConfig::default();
        let a = Oscillator::new(&config);
        let b = Oscillator::new(&config);

        let state = OscillatorState {
            carrier_phase: 1.234,
            mod_phase: 5.678,
        };
        let (value_a, next_a) = a.tick(state);
        let (value_b, next_b) = b.tick(state);
        assert_eq!(value_a.to_bits(), value_b.to_bits());
        assert_eq!(next_a, next_b);
    }

    #[test]
    fn test_single_subtraction_wrap() {
        let config = StimulusConfig::default();
        let oscillator = Oscillator::new(&config);
        let step = TAU * config.carrier_hz / config.sample_rate as f64;

        // 刚好跨过 2π 的位置
        let state = OscillatorState {
            carrier_phase: TAU - step / 2.0,
            mod_phase: 0.0,
        };
        let (_, next) = oscillator.tick(state);
        assert!((next.carrier_phase - step / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_envelope_bounds() {
        let config = StimulusConfig::default();
        let oscillator = Oscillator::new(&config);

        // 载波峰值、包络峰值：sin(π/2) · (0.5 + 0.5) = 1
        let peak = OscillatorState {
            carrier_phase: std::f64::consts::FRAC_PI_2,
            mod_phase: std::f64::consts::FRAC_PI_2,
        };
        let (value, _) = oscillator.tick(peak);
        assert!((value - 1.0).abs() < 1e-6);

        // 包络谷底：0.5 - 0.5 = 0
        let trough = OscillatorState {
            carrier_phase: std::f64::consts::FRAC_PI_2,
            mod_phase: 3.0 * std::f64::consts::FRAC_PI_2,
        };
        let (value, _) = oscillator.tick(trough);
        assert!(value.abs() < 1e-6);
    }

    #[test]
    fn test_zero_depth_is_half_amplitude_carrier() {
        let config = StimulusConfig {
            modulation_depth: 0.0,
            ..StimulusConfig::default()
        };
        let oscillator = Oscillator::new(&config);
        let state = OscillatorState {
            carrier_phase: std::f64::consts::FRAC_PI_2,
            mod_phase: 1.0,
        };
        let (value, _) = oscillator.tick(state);
        assert!((value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_fill_interleaved_duplicates_channels() {
        let config = StimulusConfig::default();
        let mut tone = Tone::new(&config);
        let mut reference = Tone::new(&config);

        let mut buffer = [0.0f32; 64];
        assert_eq!(tone.fill_interleaved(&mut buffer, 2), 32);

        for frame in buffer.chunks_exact(2) {
            let expected = reference.next_sample();
            assert_eq!(frame[0], expected);
            assert_eq!(frame[1], expected);
        }
        assert_eq!(tone.state(), reference.state());
    }
}
