use std::time::Duration;

use clap::Parser;
use hx711_lib::{CalibrationState, GainMode, SaturationGuard, Timing};

#[derive(serde::Deserialize, Debug, Clone)]
pub struct ServiceConfig {
    /// Data out pin, BCM numbering (23)
    pub data_pin: u8,

    /// Clock pin, BCM numbering (24)
    pub clock_pin: u8,

    /// Channel & gain, one of a128, a64, b32 (or 128, 64, 32). Defaults to a128.
    pub gain: Option<String>,

    /// This should be set to the averaged sensor value when the scale is under no pressure.
    #[serde(default)]
    pub offset: i32,

    /// Counts per unit, the `--calibrate` run prints it.
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Raw reads averaged into one reading.
    #[serde(default = "default_samples")]
    pub samples: usize,

    /// Sets the read interval for the scale. Hence, how often a
    /// reading will be written to output file.
    pub backoff: u64,

    /// Consecutive failed reads before the process gives up.
    pub retry: u32,

    /// Spin after every clock edge, in microseconds. Only needed on long wiring.
    #[serde(default)]
    pub settle_us: u64,

    /// Maximum wait for the chip to signal ready, waits forever if unset.
    pub ready_timeout_ms: Option<u64>,

    /// Re-read saturated (all ones) conversions instead of reporting them.
    #[serde(default)]
    pub saturation_retry: bool,

    /// Retry limit for saturated conversions, unlimited if unset.
    pub saturation_limit: Option<u32>,

    /// This is the output file which the scale will stream readings to, stdout will be used if
    /// this setting is unset.
    pub output_file: Option<String>,
}

fn default_scale() -> f64 {
    1.0
}

fn default_samples() -> usize {
    10
}

impl ServiceConfig {
    pub fn gain_mode(&self) -> hx711_lib::Result<GainMode> {
        match &self.gain {
            Some(gain) => gain.parse(),
            None => Ok(GainMode::default()),
        }
    }

    pub fn timing(&self) -> Timing {
        Timing {
            settle: Duration::from_micros(self.settle_us),
            ready_timeout: self.ready_timeout_ms.map(Duration::from_millis),
            ..Timing::default()
        }
    }

    pub fn saturation_guard(&self) -> SaturationGuard {
        match self.saturation_retry {
            true => SaturationGuard::Retry {
                limit: self.saturation_limit,
            },
            false => SaturationGuard::Off,
        }
    }

    pub fn calibration(&self) -> CalibrationState {
        CalibrationState {
            offset: self.offset,
            scale: self.scale,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Determines if the process should run calibrate or read -mode
    #[arg(short, long, default_value_t = false)]
    pub calibrate: bool,

    /// Weight placed on the scale during calibration, in the unit readings should be reported in
    #[arg(short, long, default_value_t = 1000.0)]
    pub known_weight: f64,

    /// Target configuration file, tries to read `~/.config/hx711-scale/settings.toml` by default
    #[arg(short, long)]
    pub settings_path: Option<String>,

    /// Toggles verbose output
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}
