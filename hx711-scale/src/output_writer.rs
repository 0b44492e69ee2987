//! This module is responsible to read data indefinitely (at a set rate) from any scale that implements
//! [LoadCell]. Every reading is relayed as one json line to the given writer [Write], which typically
//! will be a file or stdout.

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::error::Error;
use std::io::Write;
use std::thread;
use std::time::Duration;

use crate::error::Error as ScaleError;
use crate::scale::LoadCell;

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Reading {
    /// Time the reading was completed
    pub datetime: DateTime<Utc>,

    /// Averaged counts minus offset
    pub value: i64,

    /// `value` divided by scale
    pub units: f64,
}

impl Reading {
    /// Takes one averaged reading, both `value` and `units` come from the same samples.
    pub fn take(scale: &mut impl LoadCell, times: usize) -> Result<Self, ScaleError> {
        if scale.calibration().scale == 0.0 {
            return Err(ScaleError::DivisionByZero);
        }

        let value = scale.get_value(times)?;

        Ok(Self {
            datetime: Utc::now(),
            value,
            units: value as f64 / scale.calibration().scale,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    /// Raw reads averaged per reading.
    pub samples: usize,

    /// Consecutive recoverable failures (timeouts, saturation) tolerated before giving up.
    pub max_retries: u32,

    /// Pause after every attempt.
    pub backoff: Duration,

    /// Stop after this many readings, `None` runs forever.
    pub limit: Option<usize>,
}

/// Writes `reading` as a single json line.
pub fn write_reading(reading: &Reading, writer: &mut dyn Write) -> Result<(), Box<dyn Error>> {
    let data = format!("{}\n", serde_json::to_string(reading)?.trim());

    writer.write_all(data.as_bytes())?;
    writer.flush()?;

    Ok(())
}

/// Streams readings to `writer` until the limit is reached, a fatal scale error occurs or
/// too many recoverable errors happen in a row. Returns the number of readings written.
pub fn stream_readings(
    scale: &mut impl LoadCell,
    opts: &StreamOptions,
    writer: &mut dyn Write,
) -> Result<usize, Box<dyn Error>> {
    let mut retries = 0;
    let mut written = 0;

    while opts.limit.map_or(true, |limit| written < limit) {
        match Reading::take(scale, opts.samples) {
            Ok(reading) => {
                debug!("value={} units={:.2}", reading.value, reading.units);
                write_reading(&reading, writer)?;
                written += 1;
                retries = 0;
            }
            Err(e) if e.is_recoverable() => {
                retries += 1;
                warn!("Failed to read scale ({retries}/{}): {e}", opts.max_retries);

                if retries >= opts.max_retries {
                    error!("Reached maximum read retries");

                    return Err(e.into());
                }
            }
            Err(e) => {
                error!("Scale read failed: {e}");

                return Err(e.into());
            }
        }

        thread::sleep(opts.backoff);
    }

    Ok(written)
}
