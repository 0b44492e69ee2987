//! The hx711-scale binary reads a load cell through the HX711 module on a Raspberry Pi.
//!
//! ## Calibrate
//! Tares the empty scale, then asks for a known weight and derives the scale factor from it.
//! Both values are printed in settings format.
//!
//! ```bash
//! hx711-scale --calibrate --known-weight 1000
//! ```
//!
//! ## Run
//! Start a long lived process, readings are pushed as json lines to stdout or file (based on
//! given settings).
//!
//! ```bash
//! hx711-scale # Reads settings from `~/.config/hx711-scale/settings.toml` by default.
//!
//! hx711-scale --help
//! ```
//!
//! ## Example config
//! ```toml
//! # ~/.config/hx711-scale/settings.toml
//! data_pin = 23
//! clock_pin = 24
//! gain = "a128"
//! offset = 521703
//! scale = 23.65
//! samples = 10
//! backoff = 3
//! retry = 3
//! ready_timeout_ms = 1000
//!```

use clap::Parser;
use log::info;
use simple_logger::SimpleLogger;
use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

mod cli_config;
mod init;

use crate::cli_config::Args;
use crate::init::bootstrap;
use hx711_lib::output_writer::{stream_readings, StreamOptions};
use hx711_lib::LoadCell;

static MODULE: &str = "HX711";
const CALIBRATION_PAUSE: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    SimpleLogger::new()
        .with_level(match args.verbose {
            true => log::LevelFilter::Debug,
            false => log::LevelFilter::Warn,
        })
        .init()?;

    let (settings, mut scale) = bootstrap(&args)?;
    info!("Starting hx711-scale, performing {MODULE} reset");
    scale.reset()?;
    info!("{MODULE} reset complete, gain={}", scale.gain());

    if args.calibrate {
        println!("Calibrating, remove any weight from the scale");
        thread::sleep(CALIBRATION_PAUSE);
        scale.tare(settings.samples)?;

        println!("Place {} on the scale", args.known_weight);
        thread::sleep(CALIBRATION_PAUSE);
        let factor = scale.calibrate(args.known_weight, settings.samples)?;

        println!("offset={}\nscale={}", scale.offset(), factor);

        return Ok(());
    }

    let mut writer: Box<dyn Write> = match &settings.output_file {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    };
    let opts = StreamOptions {
        samples: settings.samples,
        max_retries: settings.retry,
        backoff: Duration::from_secs(settings.backoff),
        limit: None,
    };

    stream_readings(&mut scale, &opts, writer.as_mut())?;

    Ok(())
}
