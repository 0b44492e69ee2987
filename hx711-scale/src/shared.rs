//! A cloneable, thread safe handle on one [Scale].
//!
//! Every operation holds the lock for its whole duration, averaging included, so the clock
//! pulses of two callers can never interleave on the wire.

use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;

use crate::error::Result;
use crate::gpio::DigitalLine;
use crate::hx711::GainMode;
use crate::scale::{CalibrationState, LoadCell, Scale};

pub struct SharedScale<L: DigitalLine> {
    inner: Arc<Mutex<Scale<L>>>,
}

impl<L: DigitalLine> Clone for SharedScale<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: DigitalLine> SharedScale<L> {
    pub fn new(scale: Scale<L>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(scale)),
        }
    }

    pub fn gain(&self) -> GainMode {
        self.lock().gain()
    }

    pub fn is_faulted(&self) -> bool {
        self.lock().is_faulted()
    }

    pub fn calibrate(&self, known_weight: f64, times: usize) -> Result<f64> {
        self.lock().calibrate(known_weight, times)
    }

    pub fn reset(&self) -> Result<()> {
        self.lock().reset()
    }

    /// Gets the scale back once this is the last handle.
    pub fn try_unwrap(self) -> std::result::Result<Scale<L>, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => Ok(inner.into_inner().unwrap_or_else(|poisoned| {
                let mut scale = poisoned.into_inner();
                scale.fault();
                scale
            })),
            Err(inner) => Err(Self { inner }),
        }
    }

    /// A caller panicked mid operation, the chip may be out of sync so the scale is faulted.
    fn lock(&self) -> MutexGuard<'_, Scale<L>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Scale lock poisoned, marking scale as faulted");
                let mut guard = poisoned.into_inner();
                guard.fault();
                guard
            }
        }
    }
}

impl<L: DigitalLine> LoadCell for SharedScale<L> {
    fn read(&mut self) -> Result<i32> {
        self.lock().read()
    }

    fn set_gain(&mut self, mode: GainMode) -> Result<()> {
        self.lock().set_gain(mode)
    }

    fn read_average(&mut self, times: usize) -> Result<i32> {
        self.lock().read_average(times)
    }

    fn get_value(&mut self, times: usize) -> Result<i64> {
        self.lock().get_value(times)
    }

    fn get_units(&mut self, times: usize) -> Result<f64> {
        self.lock().get_units(times)
    }

    fn tare(&mut self, times: usize) -> Result<()> {
        self.lock().tare(times)
    }

    fn set_scale(&mut self, scale: f64) -> Result<()> {
        self.lock().set_scale(scale)
    }

    fn set_offset(&mut self, offset: i32) -> Result<()> {
        self.lock().set_offset(offset)
    }

    fn calibration(&self) -> CalibrationState {
        self.lock().calibration()
    }
}
