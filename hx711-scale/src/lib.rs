//! These are the components used by [hx711-scale](../hx711_scale/index.html) to read a load cell
//! through the HX711 24 bit ADC. See the readme for wiring & the binary for settings.
//!
//! Two layers, leaf first:
//! - [hx711] clocks raw conversions out of the chip over two GPIO lines.
//! - [scale] averages, tares & scales those conversions.
//!
//! ```
//! use hx711_lib::scale::{LoadCell, Scale};
//! use hx711_lib::{sim::SimulatedChip, GainMode};
//!
//! let chip = SimulatedChip::constant(84_000);
//! let (data, clock) = chip.lines();
//! let mut scale = Scale::with_lines(data, clock, GainMode::ChannelAGain128).unwrap();
//!
//! scale.tare(4).unwrap();
//! scale.set_scale(42.0).unwrap();
//! assert_eq!(scale.get_value(4).unwrap(), 0);
//! assert_eq!(scale.get_units(4).unwrap(), 0.0);
//! ```
pub mod error;
pub mod gpio;
pub mod hx711;
pub mod output_writer;
pub mod scale;
pub mod shared;
pub mod sim;

pub use error::{Error, LineError, Result};
pub use hx711::{GainMode, Timing};
pub use scale::{CalibrationState, LoadCell, SaturationGuard, Scale};
pub use shared::SharedScale;
