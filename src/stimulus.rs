//! 刺激参数
//!
//! 每个会话开始时确定一次，之后只读

use thiserror::Error;

/// 刺激配置
///
/// 载波与调制频率同时决定音频包络和画面闪烁的目标频率
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StimulusConfig {
    /// 载波频率（Hz）
    pub carrier_hz: f64,
    /// 调制（包络）频率（Hz），通常远低于载波
    pub modulation_hz: f64,
    /// 调制深度 [0, 1]
    pub modulation_depth: f64,
    /// 采样率（Hz）
    pub sample_rate: u32,
    /// 显示刷新率提示（Hz），仅作参考
    pub refresh_rate_hint: f64,
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            carrier_hz: 1000.0,
            modulation_hz: 40.0,
            modulation_depth: 1.0,
            sample_rate: 48000,
            refresh_rate_hint: 120.0,
        }
    }
}

/// 配置错误
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a positive finite frequency, got {value}")]
    InvalidFrequency { name: &'static str, value: f64 },
    #[error("modulation depth must be within [0, 1], got {0}")]
    InvalidDepth(f64),
    #[error("sample rate must be positive")]
    ZeroSampleRate,
    #[error("{name} of {value} Hz is at or above Nyquist for {sample_rate} Hz")]
    AboveNyquist {
        name: &'static str,
        value: f64,
        sample_rate: u32,
    },
}

impl StimulusConfig {
    /// 校验配置
    ///
    /// 振荡器每个样本只做一次 2π 回绕，频率必须低于 Nyquist，
    /// 超出范围的配置在这里直接拒绝，不做任何修正
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }

        let nyquist = self.sample_rate as f64 / 2.0;
        for (name, value) in [
            ("carrier frequency", self.carrier_hz),
            ("modulation frequency", self.modulation_hz),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidFrequency { name, value });
            }
            if value >= nyquist {
                return Err(ConfigError::AboveNyquist {
                    name,
                    value,
                    sample_rate: self.sample_rate,
                });
            }
        }

        if !(0.0..=1.0).contains(&self.modulation_depth) {
            return Err(ConfigError::InvalidDepth(self.modulation_depth));
        }

        Ok(())
    }

    /// 名义帧周期（毫秒），刷新率提示无效时返回 None
    pub fn nominal_frame_period_ms(&self) -> Option<f64> {
        if self.refresh_rate_hint.is_finite() && self.refresh_rate_hint > 0.0 {
            Some(1000.0 / self.refresh_rate_hint)
        } else {
            None
        }
    }
}
