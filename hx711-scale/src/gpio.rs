//! The digital I/O capability the driver is built on, plus the Raspberry Pi backend.
//!
//! The driver never acquires pins on its own, it is handed two [DigitalLine]s. On a Pi
//! those come from [open_lines], tests use [sim](crate::sim).

use log::debug;
use rppal::gpio::{Gpio, IoPin, Level, Mode};

use crate::error::{Error, LineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// One GPIO pin. Every operation may fail, the caller decides what a failure means.
pub trait DigitalLine {
    fn configure(&mut self, direction: Direction) -> Result<(), LineError>;

    /// Returns true when the line is at logic-high.
    fn read(&mut self) -> Result<bool, LineError>;

    fn write(&mut self, high: bool) -> Result<(), LineError>;

    /// Gives the pin back. Any further use of the line is an error.
    fn release(&mut self) -> Result<(), LineError>;
}

/// A BCM pin driven through rppal's memory mapped GPIO.
pub struct GpioLine {
    bcm: u8,
    pin: Option<IoPin>,
}

impl GpioLine {
    pub fn acquire(gpio: &Gpio, bcm: u8) -> Result<Self, LineError> {
        let pin = gpio.get(bcm)?.into_io(Mode::Input);

        Ok(Self {
            bcm,
            pin: Some(pin),
        })
    }

    pub fn bcm(&self) -> u8 {
        self.bcm
    }

    fn pin(&mut self) -> Result<&mut IoPin, LineError> {
        self.pin.as_mut().ok_or(LineError::Released)
    }
}

impl DigitalLine for GpioLine {
    fn configure(&mut self, direction: Direction) -> Result<(), LineError> {
        let mode = match direction {
            Direction::Input => Mode::Input,
            Direction::Output => Mode::Output,
        };
        self.pin()?.set_mode(mode);

        Ok(())
    }

    fn read(&mut self) -> Result<bool, LineError> {
        Ok(matches!(self.pin()?.read(), Level::High))
    }

    fn write(&mut self, high: bool) -> Result<(), LineError> {
        self.pin()?.write(match high {
            true => Level::High,
            false => Level::Low,
        });

        Ok(())
    }

    fn release(&mut self) -> Result<(), LineError> {
        // rppal restores the pin's previous mode when the handle is dropped.
        match self.pin.take() {
            Some(pin) => {
                drop(pin);
                debug!("Released gpio {}", self.bcm);
                Ok(())
            }
            None => Err(LineError::Released),
        }
    }
}

/// Acquires the data (dout) and clock (pd_sck) pins by BCM number.
pub fn open_lines(data: u8, clock: u8) -> Result<(GpioLine, GpioLine), Error> {
    let gpio = Gpio::new().map_err(|e| Error::PinInit {
        line: "gpio",
        source: e.into(),
    })?;
    let data = GpioLine::acquire(&gpio, data).map_err(|source| Error::PinInit {
        line: "data",
        source,
    })?;
    let clock = GpioLine::acquire(&gpio, clock).map_err(|source| Error::PinInit {
        line: "clock",
        source,
    })?;

    Ok((data, clock))
}
