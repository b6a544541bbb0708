//! Isoflicker - 同步声光刺激器
//!
//! 设计目标：
//! - 音频与画面由同一调制频率驱动，互不阻塞
//! - 渲染线程 lock-free 写入播放缓冲区
//! - 每帧记录时序遥测，结束时输出汇总和 CSV

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};

use isoflicker::audio::{ClockedSink, DeviceConfig, DeviceStats};
use isoflicker::engine::{Session, SessionConfig};
use isoflicker::stimulus::StimulusConfig;
use isoflicker::telemetry::DEFAULT_DROP_MULTIPLIER;
use isoflicker::visual::{
    PresentSurface, SurfaceConfig, SurfaceError, TerminalSurface, VsyncSurface,
};

/// 呈现表面类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SurfaceKind {
    /// Software vsync only (no visible output)
    Vsync,
    /// Full-screen terminal flicker
    Terminal,
}

/// Isoflicker - Synchronized audio-visual flicker stimulus
#[derive(Parser)]
#[command(name = "isoflicker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Audio carrier frequency in Hz
    #[arg(long, default_value = "1000")]
    carrier_hz: f64,

    /// Modulation (flicker) frequency in Hz
    #[arg(long, default_value = "40")]
    modulation_hz: f64,

    /// Modulation depth (0.0 - 1.0)
    #[arg(long, default_value = "1.0")]
    depth: f64,

    /// Audio sample rate in Hz
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Display refresh rate in Hz
    #[arg(long, default_value = "120")]
    refresh_hz: f64,

    /// Audio buffer size in milliseconds
    #[arg(short, long, default_value = "100")]
    buffer_ms: u32,

    /// Session length in seconds (runs until Ctrl+C if omitted)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Telemetry CSV output path
    #[arg(short, long, default_value = "telemetry.csv")]
    output: PathBuf,

    /// Frame interval, in nominal periods, above which a frame counts as dropped
    #[arg(long, default_value_t = DEFAULT_DROP_MULTIPLIER)]
    drop_multiplier: f64,

    /// Presentation surface
    #[arg(short, long, value_enum, default_value = "vsync")]
    surface: SurfaceKind,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            stimulus: StimulusConfig {
                carrier_hz: self.carrier_hz,
                modulation_hz: self.modulation_hz,
                modulation_depth: self.depth,
                sample_rate: self.sample_rate,
                refresh_rate_hint: self.refresh_hz,
            },
            drop_multiplier: self.drop_multiplier,
        }
    }

    fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            buffer_ms: self.buffer_ms,
            // 10ms 周期
            period_frames: (self.sample_rate as usize / 100).max(1),
        }
    }

    fn session_length(&self) -> anyhow::Result<Option<Duration>> {
        match self.duration {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => anyhow::bail!("invalid duration: {}", secs),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    // Ctrl+C 只置位标志，由帧回调观察
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })?;
    }

    match cli.surface {
        SurfaceKind::Vsync => run_session(&cli, &interrupted, VsyncSurface::open),
        SurfaceKind::Terminal => run_session(&cli, &interrupted, TerminalSurface::open),
    }
}

/// 运行一次刺激会话
fn run_session<P, F>(cli: &Cli, interrupted: &AtomicBool, open_surface: F) -> anyhow::Result<()>
where
    P: PresentSurface,
    F: FnOnce(&SurfaceConfig) -> Result<P, SurfaceError>,
{
    let config = cli.session_config();
    let device_config = cli.device_config();
    let length = cli.session_length()?;

    let mut device_stats: Option<Arc<DeviceStats>> = None;
    let mut session = Session::bootstrap(
        config,
        |format| {
            let sink = ClockedSink::open(format, device_config)?;
            device_stats = Some(sink.stats());
            Ok(sink)
        },
        open_surface,
    )?;

    if cli.surface == SurfaceKind::Vsync {
        match length {
            Some(length) => println!(
                "Running {}Hz stimulus for {:.1}s (Ctrl+C to stop)",
                config.stimulus.modulation_hz,
                length.as_secs_f64()
            ),
            None => println!(
                "Running {}Hz stimulus (Ctrl+C to stop)",
                config.stimulus.modulation_hz
            ),
        }
    }

    let started = Instant::now();
    let frame_callback = || {
        if interrupted.load(Ordering::SeqCst) {
            return false;
        }
        match length {
            Some(length) => started.elapsed() < length,
            None => true,
        }
    };

    // 帧循环出错时也先输出汇总和 CSV，再返回错误
    let outcome = session.run_to_end(frame_callback, Some(&cli.output))?;

    println!();
    println!("{}", outcome.summary);
    if let Some(stats) = device_stats {
        println!(
            "{}",
            stats.report(device_config.period_frames, config.stimulus.sample_rate)
        );
    }
    println!("Telemetry written to {}", cli.output.display());

    let exit = outcome.exit?;
    log::info!("Session ended: {:?}", exit);

    Ok(())
}
