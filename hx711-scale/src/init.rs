use std::{env, io, path::Path, path::PathBuf};

use config::Config;
use hx711_lib::gpio::{open_lines, GpioLine};
use hx711_lib::scale::{Config as ScaleConfig, Scale};
use log::debug;

use crate::cli_config::{Args, ServiceConfig};

/// Resolves the settings file from args, falling back to `~/.config/hx711-scale/settings.toml`.
pub fn settings_path(args: &Args) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = match args.settings_path.clone() {
        Some(file_path) => PathBuf::from(file_path),
        None => {
            let home = env::var("HOME").map_err(|_| {
                io::Error::new(io::ErrorKind::NotFound, "Failed to read home dir env (HOME)")
            })?;
            PathBuf::from(format!("{home}/.config/hx711-scale/settings.toml"))
        }
    };

    Ok(path.canonicalize()?)
}

pub fn load_settings(path: &Path) -> Result<ServiceConfig, config::ConfigError> {
    debug!("Trying to read settings from {}", path.display());

    Config::builder()
        .add_source(config::File::from(path))
        .build()?
        .try_deserialize::<ServiceConfig>()
}

/// Reads settings, then acquires the data & clock gpio and builds the scale.
pub fn bootstrap(args: &Args) -> Result<(ServiceConfig, Scale<GpioLine>), Box<dyn std::error::Error>> {
    let settings = load_settings(&settings_path(args)?)?;
    let (data, clock) = open_lines(settings.data_pin, settings.clock_pin)?;
    let scale = Scale::new(ScaleConfig {
        data,
        clock,
        gain: settings.gain_mode()?,
        timing: settings.timing(),
        saturation: settings.saturation_guard(),
        calibration: settings.calibration(),
    })?;

    Ok((settings, scale))
}
