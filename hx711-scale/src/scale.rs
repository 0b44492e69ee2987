//! Turns raw HX711 conversions into application values: averaged counts, tared counts and
//! physical units.
//!
//! A [Scale] is `Ready` after construction and stays there until a GPIO failure, after which
//! it is faulted for good and every call returns [Error::DeviceFaulted]. Rebuild the scale
//! (re-acquiring the lines) to recover.

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gpio::DigitalLine;
use crate::hx711::{is_saturated, GainMode, Hx711, Timing};

/// Everything a tared & calibrated reading depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    /// Subtracted from averaged raw counts, usually the empty scale reading.
    pub offset: i32,

    /// Counts per physical unit.
    pub scale: f64,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            offset: 0,
            scale: 1.0,
        }
    }
}

/// What to do with an all-ones (saturated) conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaturationGuard {
    /// Saturated output is returned like any other value.
    #[default]
    Off,

    /// Saturated output is read again, at most `limit` times when set.
    Retry { limit: Option<u32> },
}

pub struct Config<L> {
    pub data: L,
    pub clock: L,
    pub gain: GainMode,
    pub timing: Timing,
    pub saturation: SaturationGuard,
    pub calibration: CalibrationState,
}

impl<L> Config<L> {
    pub fn new(data: L, clock: L, gain: GainMode) -> Self {
        Self {
            data,
            clock,
            gain,
            timing: Timing::default(),
            saturation: SaturationGuard::default(),
            calibration: CalibrationState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Faulted,
}

/// The measurement surface of a load cell.
pub trait LoadCell {
    /// One raw conversion, sign extended.
    fn read(&mut self) -> Result<i32>;

    /// Switches gain/channel. The mode is committed with one sacrificed read, hence it
    /// applies from the next conversion on.
    fn set_gain(&mut self, mode: GainMode) -> Result<()>;

    /// Truncated mean of `times` raw reads.
    fn read_average(&mut self, times: usize) -> Result<i32>;

    /// Averaged counts minus offset.
    fn get_value(&mut self, times: usize) -> Result<i64>;

    /// Averaged counts minus offset, divided by scale.
    fn get_units(&mut self, times: usize) -> Result<f64>;

    /// Stores the current average as offset, so the present load reads as zero.
    fn tare(&mut self, times: usize) -> Result<()>;

    fn set_scale(&mut self, scale: f64) -> Result<()>;

    fn set_offset(&mut self, offset: i32) -> Result<()>;

    fn calibration(&self) -> CalibrationState;
}

pub struct Scale<L: DigitalLine> {
    protocol: Hx711<L>,
    gain: GainMode,
    calibration: CalibrationState,
    saturation: SaturationGuard,
    state: State,
}

impl<L: DigitalLine> Scale<L> {
    /// Takes over both lines. A non default gain is committed right away, so the first
    /// reading already uses it. A GPIO failure during that commit aborts construction with
    /// [Error::PinInit] for the clock line.
    pub fn new(c: Config<L>) -> Result<Self> {
        if !c.calibration.scale.is_finite() {
            return Err(Error::invalid("scale must be finite"));
        }

        let protocol = Hx711::new(c.data, c.clock, c.timing)?;
        let mut scale = Self {
            protocol,
            gain: GainMode::default(),
            calibration: c.calibration,
            saturation: c.saturation,
            state: State::Ready,
        };

        if c.gain != GainMode::default() {
            scale.protocol.read_raw(c.gain).map_err(|e| match e {
                Error::Gpio(source) => Error::PinInit {
                    line: "clock",
                    source,
                },
                other => other,
            })?;
            scale.gain = c.gain;
            debug!("Gain set to {}", c.gain);
        }

        Ok(scale)
    }

    pub fn with_lines(data: L, clock: L, gain: GainMode) -> Result<Self> {
        Self::new(Config::new(data, clock, gain))
    }

    pub fn gain(&self) -> GainMode {
        self.gain
    }

    pub fn offset(&self) -> i32 {
        self.calibration.offset
    }

    pub fn scale(&self) -> f64 {
        self.calibration.scale
    }

    pub fn is_faulted(&self) -> bool {
        self.state == State::Faulted
    }

    /// Single poll of the data line.
    pub fn is_ready(&mut self) -> Result<bool> {
        self.ensure_ready()?;
        let ready = self.protocol.is_ready();
        self.guard(ready)
    }

    /// Sets scale from a known weight placed on an already tared scale, returns the new scale.
    pub fn calibrate(&mut self, known_weight: f64, times: usize) -> Result<f64> {
        self.ensure_ready()?;
        if !known_weight.is_finite() || known_weight == 0.0 {
            return Err(Error::invalid("known weight must be finite and non-zero"));
        }

        let value = self.get_value(times)?;
        if value == 0 {
            return Err(Error::invalid(
                "net reading is zero, is the weight on the scale?",
            ));
        }

        let factor = value as f64 / known_weight;
        if !factor.is_finite() {
            return Err(Error::invalid(format!(
                "known weight {known_weight} gives a non-finite scale"
            )));
        }

        self.calibration.scale = factor;
        info!(
            "Calibrated, offset={} scale={}",
            self.calibration.offset, self.calibration.scale
        );

        Ok(self.calibration.scale)
    }

    /// Power cycles the chip, then commits the configured gain again if it isn't the
    /// power-on default.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_ready()?;
        let configured = self.gain;

        let reset = self.protocol.reset();
        self.guard(reset)?;
        self.gain = GainMode::default();
        debug!("Chip reset, gain back to {}", self.gain);

        if configured != GainMode::default() {
            self.set_gain(configured)?;
        }

        Ok(())
    }

    /// Releases the lines, failures are only logged.
    pub fn close(self) {
        self.protocol.close();
    }

    pub(crate) fn fault(&mut self) {
        self.state = State::Faulted;
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            State::Ready => Ok(()),
            State::Faulted => Err(Error::DeviceFaulted(None)),
        }
    }

    /// GPIO failures fault the scale, anything else passes through untouched.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Err(Error::Gpio(e)) => {
                warn!("GPIO failure, scale is now faulted: {e}");
                self.fault();
                Err(Error::DeviceFaulted(Some(e)))
            }
            other => other,
        }
    }

    fn sample(&mut self) -> Result<i32> {
        let limit = match self.saturation {
            SaturationGuard::Off => {
                let read = self.protocol.read_raw(self.gain);
                return self.guard(read);
            }
            SaturationGuard::Retry { limit } => limit,
        };

        let mut retries = 0;
        loop {
            let read = self.protocol.read_raw(self.gain);
            let value = self.guard(read)?;

            if !is_saturated(value) {
                return Ok(value);
            }
            if limit.is_some_and(|limit| retries >= limit) {
                return Err(Error::Saturated { retries });
            }

            retries += 1;
            debug!("Saturated output, retry={retries}");
        }
    }
}

/// Default implementation for a HX711 backed scale.
impl<L: DigitalLine> LoadCell for Scale<L> {
    fn read(&mut self) -> Result<i32> {
        self.ensure_ready()?;
        self.sample()
    }

    fn set_gain(&mut self, mode: GainMode) -> Result<()> {
        self.ensure_ready()?;

        let commit = self.protocol.read_raw(mode);
        self.guard(commit)?;
        self.gain = mode;
        debug!("Gain set to {mode}");

        Ok(())
    }

    fn read_average(&mut self, times: usize) -> Result<i32> {
        self.ensure_ready()?;
        if times == 0 {
            return Err(Error::invalid("times must be at least 1"));
        }

        let mut sum = 0_i64;
        for _ in 0..times {
            sum += i64::from(self.sample()?);
        }

        // The mean of i32 samples always fits back into an i32.
        Ok((sum / times as i64) as i32)
    }

    fn get_value(&mut self, times: usize) -> Result<i64> {
        let average = self.read_average(times)?;

        Ok(i64::from(average) - i64::from(self.calibration.offset))
    }

    fn get_units(&mut self, times: usize) -> Result<f64> {
        self.ensure_ready()?;
        if self.calibration.scale == 0.0 {
            return Err(Error::DivisionByZero);
        }

        Ok(self.get_value(times)? as f64 / self.calibration.scale)
    }

    fn tare(&mut self, times: usize) -> Result<()> {
        let offset = self.read_average(times)?;
        self.calibration.offset = offset;
        debug!("Tared, offset={offset}");

        Ok(())
    }

    fn set_scale(&mut self, scale: f64) -> Result<()> {
        self.ensure_ready()?;
        if !scale.is_finite() {
            return Err(Error::invalid("scale must be finite"));
        }
        self.calibration.scale = scale;

        Ok(())
    }

    fn set_offset(&mut self, offset: i32) -> Result<()> {
        self.ensure_ready()?;
        self.calibration.offset = offset;

        Ok(())
    }

    fn calibration(&self) -> CalibrationState {
        self.calibration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimLine, SimulatedChip};

    fn scale_for(chip: &SimulatedChip) -> Scale<SimLine> {
        let (data, clock) = chip.lines();
        Scale::with_lines(data, clock, GainMode::default()).unwrap()
    }

    #[test]
    fn defaults() {
        let chip = SimulatedChip::constant(0);
        let scale = scale_for(&chip);

        assert_eq!(scale.gain(), GainMode::ChannelAGain128);
        assert_eq!(scale.calibration(), CalibrationState::default());
        assert!(!scale.is_faulted());
        assert!(chip.cycle_pulses().is_empty());
    }

    #[test]
    fn average_truncates() {
        let chip = SimulatedChip::with_samples([1, 2, 2, -7, -8]);
        let mut scale = scale_for(&chip);

        assert_eq!(scale.read_average(3).unwrap(), 1);
        assert_eq!(scale.read_average(2).unwrap(), -7);
    }

    #[test]
    fn average_of_extremes_does_not_overflow() {
        let chip = SimulatedChip::constant(crate::hx711::MAX_VALUE);
        let mut scale = scale_for(&chip);

        assert_eq!(scale.read_average(300).unwrap(), crate::hx711::MAX_VALUE);
    }

    #[test]
    fn zero_times_is_rejected_before_any_read() {
        let chip = SimulatedChip::constant(3);
        let mut scale = scale_for(&chip);

        for result in [
            scale.read_average(0).map(|_| ()),
            scale.get_value(0).map(|_| ()),
            scale.get_units(0).map(|_| ()),
            scale.tare(0),
        ] {
            assert!(matches!(result, Err(Error::InvalidArgument(_))));
        }
        assert!(chip.cycle_pulses().is_empty());
        assert_eq!(scale.offset(), 0);
    }

    #[test]
    fn non_finite_scale_is_rejected() {
        let chip = SimulatedChip::constant(3);
        let mut scale = scale_for(&chip);
        scale.set_scale(2.5).unwrap();

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                scale.set_scale(bad),
                Err(Error::InvalidArgument(_))
            ));
        }
        assert_eq!(scale.scale(), 2.5);
    }

    #[test]
    fn non_finite_scale_in_config() {
        let chip = SimulatedChip::constant(3);
        let (data, clock) = chip.lines();
        let mut config = Config::new(data, clock, GainMode::default());
        config.calibration.scale = f64::NAN;

        assert!(matches!(
            Scale::new(config),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_scale_is_division_by_zero() {
        let chip = SimulatedChip::constant(3);
        let mut scale = scale_for(&chip);
        scale.set_scale(0.0).unwrap();

        assert!(matches!(scale.get_units(1), Err(Error::DivisionByZero)));
        assert!(chip.cycle_pulses().is_empty());
    }

    #[test]
    fn calibrate_from_known_weight() {
        let chip = SimulatedChip::with_samples([1000, 1000, 3000, 3000]);
        let mut scale = scale_for(&chip);

        scale.tare(2).unwrap();
        assert_eq!(scale.calibrate(500.0, 2).unwrap(), 4.0);
        assert_eq!(scale.get_units(1).unwrap(), 500.0);
    }

    #[test]
    fn calibrate_rejects_bad_input() {
        let chip = SimulatedChip::constant(1000);
        let mut scale = scale_for(&chip);

        assert!(matches!(
            scale.calibrate(0.0, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(chip.cycle_pulses().is_empty());

        scale.tare(1).unwrap();
        assert!(matches!(
            scale.calibrate(100.0, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(scale.scale(), 1.0);
    }

    #[test]
    fn calibrate_rejects_non_finite_factor() {
        let chip = SimulatedChip::with_samples([0, 1000]);
        let mut scale = scale_for(&chip);
        scale.tare(1).unwrap();

        assert!(matches!(
            scale.calibrate(1e-310, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(scale.scale(), 1.0);
        assert_eq!(scale.get_units(1).unwrap(), 1000.0);
    }

    #[test]
    fn gpio_failure_during_construction_is_pin_init() {
        let chip = SimulatedChip::constant(7);
        chip.fail_data_reads_after(2);
        let (data, clock) = chip.lines();

        assert!(matches!(
            Scale::with_lines(data, clock, GainMode::ChannelAGain64),
            Err(Error::PinInit { line: "clock", .. })
        ));
        assert!(!chip.clock_is_high());
        assert_eq!(chip.releases(crate::sim::Role::Clock), 1);
    }

    #[test]
    fn non_default_gain_is_committed_on_construction() {
        let chip = SimulatedChip::with_samples([11, 22]);
        let (data, clock) = chip.lines();
        let mut scale = Scale::with_lines(data, clock, GainMode::ChannelBGain32).unwrap();

        assert_eq!(chip.cycle_pulses(), vec![26]);
        assert_eq!(scale.read().unwrap(), 22);
        assert_eq!(chip.cycle_pulses(), vec![26, 26]);
    }

    #[test]
    fn saturation_is_returned_when_guard_is_off() {
        let chip = SimulatedChip::with_samples([-1, 5]);
        let mut scale = scale_for(&chip);

        assert_eq!(scale.read().unwrap(), -1);
    }

    #[test]
    fn bounded_saturation_guard() {
        let chip = SimulatedChip::constant(-1);
        let (data, clock) = chip.lines();
        let mut config = Config::new(data, clock, GainMode::default());
        config.saturation = SaturationGuard::Retry { limit: Some(3) };
        let mut scale = Scale::new(config).unwrap();

        assert!(matches!(
            scale.read(),
            Err(Error::Saturated { retries: 3 })
        ));
        assert_eq!(chip.cycle_pulses().len(), 4);
        assert!(!scale.is_faulted());
    }
}
