//! This module includes everything needed to clock a sample out of the HX711: the ready wait,
//! the 24 data pulses, the trailing pulses that pick gain & channel for the next conversion
//! and the twos-complement decode.
//!
//! Nothing here knows about tare or scale, see [scale](crate::scale) for that.

use log::{trace, warn};
use std::{
    fmt::Display,
    hint,
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

use crate::error::{Error, LineError, Result};
use crate::gpio::{DigitalLine, Direction};

/// Number of data pulses in every read cycle.
pub const DATA_BITS: u8 = 24;

/// Largest value the ADC can report.
pub const MAX_VALUE: i32 = (1 << 23) - 1;

/// Smallest value the ADC can report.
pub const MIN_VALUE: i32 = -(1 << 23);

/// All-ones output word, reported when the input is disconnected or overranged.
pub const SATURATED: u32 = 0x00FF_FFFF;

/// Clock high for longer than 60us powers the chip down, 120us leaves some margin.
const RESET_HOLD: Duration = Duration::from_micros(120);

/// Channel & gain for the conversion following the current read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainMode {
    /// Power-on mode of the chip.
    #[default]
    ChannelAGain128,
    ChannelAGain64,
    ChannelBGain32,
}

impl GainMode {
    /// Pulses appended after the 24 data pulses.
    pub fn extra_pulses(self) -> u8 {
        match self {
            GainMode::ChannelAGain128 => 1,
            GainMode::ChannelBGain32 => 2,
            GainMode::ChannelAGain64 => 3,
        }
    }

    /// Total clock pulses of one read cycle in this mode.
    pub fn pulses(self) -> u8 {
        DATA_BITS + self.extra_pulses()
    }

    pub fn from_pulses(pulses: usize) -> Option<Self> {
        match pulses {
            25 => Some(GainMode::ChannelAGain128),
            26 => Some(GainMode::ChannelBGain32),
            27 => Some(GainMode::ChannelAGain64),
            _ => None,
        }
    }

    pub fn gain(self) -> u8 {
        match self {
            GainMode::ChannelAGain128 => 128,
            GainMode::ChannelAGain64 => 64,
            GainMode::ChannelBGain32 => 32,
        }
    }
}

impl TryFrom<u8> for GainMode {
    type Error = Error;

    fn try_from(gain: u8) -> Result<Self> {
        match gain {
            128 => Ok(GainMode::ChannelAGain128),
            64 => Ok(GainMode::ChannelAGain64),
            32 => Ok(GainMode::ChannelBGain32),
            other => Err(Error::invalid(format!(
                "gain {other} not supported, expected 128, 64 or 32"
            ))),
        }
    }
}

impl FromStr for GainMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a128" => Ok(GainMode::ChannelAGain128),
            "a64" => Ok(GainMode::ChannelAGain64),
            "b32" => Ok(GainMode::ChannelBGain32),
            other => other
                .parse::<u8>()
                .map_err(|_| Error::invalid(format!("unknown gain mode '{s}'")))
                .and_then(GainMode::try_from),
        }
    }
}

impl Display for GainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GainMode::ChannelAGain128 => write!(f, "A/128"),
            GainMode::ChannelAGain64 => write!(f, "A/64"),
            GainMode::ChannelBGain32 => write!(f, "B/32"),
        }
    }
}

/// Timing knobs for the bit-banged protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    /// Spin after every clock edge. Zero is fine on short wiring, long cable runs may need ~1us.
    pub settle: Duration,

    /// Give up waiting for the chip after this long. `None` waits forever.
    pub ready_timeout: Option<Duration>,

    /// Sleep between ready polls, zero busy-polls.
    pub poll_interval: Duration,
}

/// Sign extends a 24 bit twos-complement word, bits above 23 are ignored.
pub fn decode(word: u32) -> i32 {
    let word = word & SATURATED;

    if word & 0x0080_0000 != 0 {
        (word | 0xFF00_0000) as i32
    } else {
        word as i32
    }
}

/// The 24 bit word the chip shifts out for `value`.
pub fn encode(value: i32) -> u32 {
    value as u32 & SATURATED
}

pub fn is_saturated(value: i32) -> bool {
    encode(value) == SATURATED
}

/// Owns the data (dout) and clock (pd_sck) lines of one chip.
pub struct Hx711<L: DigitalLine> {
    data: L,
    clock: L,
    timing: Timing,
    released: bool,
}

impl<L: DigitalLine> Hx711<L> {
    /// Configures data as input & clock as output, then drives clock low so the chip
    /// is not held in power-down.
    pub fn new(mut data: L, mut clock: L, timing: Timing) -> Result<Self> {
        let init = data
            .configure(Direction::Input)
            .map_err(|source| Error::PinInit {
                line: "data",
                source,
            })
            .and_then(|_| {
                clock
                    .configure(Direction::Output)
                    .and_then(|_| clock.write(false))
                    .map_err(|source| Error::PinInit {
                        line: "clock",
                        source,
                    })
            });

        if let Err(e) = init {
            release_line("data", &mut data);
            release_line("clock", &mut clock);

            return Err(e);
        }

        Ok(Self {
            data,
            clock,
            timing,
            released: false,
        })
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// A single poll, true when a conversion can be clocked out right away.
    pub fn is_ready(&mut self) -> Result<bool> {
        Ok(!self.data.read().map_err(Error::Gpio)?)
    }

    /// Reads one conversion & programs `gain` for the next one. Blocks until the chip signals
    /// ready, or until [Timing::ready_timeout] passes.
    pub fn read_raw(&mut self, gain: GainMode) -> Result<i32> {
        self.wait_ready()?;

        let word = match self.clock_out(gain) {
            Ok(word) => word,
            Err(e) => {
                // Best effort, the cycle is lost either way.
                if let Err(low) = self.clock.write(false) {
                    warn!("Failed to return clock low after aborted cycle: {low}");
                }
                return Err(Error::Gpio(e));
            }
        };
        let value = decode(word);
        trace!("raw_value={value} word={word:#08x} next_gain={gain}");

        Ok(value)
    }

    /// Holds clock high past the power-down threshold, the chip comes back in channel A / 128.
    pub fn reset(&mut self) -> Result<()> {
        self.clock.write(true).map_err(Error::Gpio)?;
        thread::sleep(RESET_HOLD);
        self.clock.write(false).map_err(Error::Gpio)
    }

    /// Releases both lines. Failures are logged, never returned.
    pub fn close(mut self) {
        self.release();
    }

    fn wait_ready(&mut self) -> Result<()> {
        let deadline = self
            .timing
            .ready_timeout
            .map(|timeout| (Instant::now() + timeout, timeout));

        while self.data.read().map_err(Error::Gpio)? {
            if let Some((deadline, timeout)) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout(timeout));
                }
            }

            if self.timing.poll_interval.is_zero() {
                hint::spin_loop();
            } else {
                thread::sleep(self.timing.poll_interval);
            }
        }

        Ok(())
    }

    fn clock_out(&mut self, gain: GainMode) -> std::result::Result<u32, LineError> {
        let mut word = 0_u32;

        for _ in 0..DATA_BITS {
            self.clock.write(true)?;
            self.settle();
            word <<= 1;
            word |= self.data.read()? as u32;
            self.clock.write(false)?;
            self.settle();
        }

        // Sets gain for the following conversion...
        for _ in 0..gain.extra_pulses() {
            self.clock.write(true)?;
            self.settle();
            self.clock.write(false)?;
            self.settle();
        }

        Ok(word)
    }

    fn settle(&self) {
        spin_for(self.timing.settle);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        release_line("data", &mut self.data);
        release_line("clock", &mut self.clock);
    }
}

impl<L: DigitalLine> Drop for Hx711<L> {
    fn drop(&mut self) {
        self.release();
    }
}

fn release_line<L: DigitalLine>(name: &str, line: &mut L) {
    if let Err(e) = line.release() {
        warn!("Failed to release {name} line: {e}");
    }
}

fn spin_for(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    let start = Instant::now();
    while start.elapsed() < duration {
        hint::spin_loop();
    }
}
