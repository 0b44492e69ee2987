//! A software HX711 behind a pair of [DigitalLine]s.
//!
//! The simulated chip shifts queued conversion words out MSB-first, latches the next gain from
//! the number of pulses in each cycle and keeps enough bookkeeping (pulses per cycle, which
//! thread raised each edge, line releases) to check a driver against. Faults can be injected
//! on either line.
//!
//! ```
//! use hx711_lib::scale::{LoadCell, Scale};
//! use hx711_lib::{sim::SimulatedChip, GainMode};
//!
//! let chip = SimulatedChip::constant(-1500);
//! let (data, clock) = chip.lines();
//! let mut scale = Scale::with_lines(data, clock, GainMode::default()).unwrap();
//!
//! assert_eq!(scale.read().unwrap(), -1500);
//! assert_eq!(chip.cycle_pulses(), vec![25]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::LineError;
use crate::gpio::{DigitalLine, Direction};
use crate::hx711::{encode, GainMode, DATA_BITS};

const MAX_PULSES: usize = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Data,
    Clock,
}

#[derive(Default)]
struct ChipState {
    queue: VecDeque<u32>,
    last: u32,
    word: u32,
    bit: bool,

    clock_high: bool,
    high_since: Option<Instant>,
    stray_high: bool,
    in_cycle: bool,
    ready_seen: bool,
    pulses: usize,
    latched: GainMode,

    busy_polls: usize,
    busy_left: usize,
    never_ready: bool,
    power_down_after: Option<Duration>,

    cycles: Vec<usize>,
    rises: Vec<ThreadId>,
    resets: usize,

    directions: HashMap<Role, Direction>,
    releases: HashMap<Role, usize>,
    fail_configure: Option<Role>,
    data_reads_left: Option<usize>,
    clock_writes_left: Option<usize>,
    io_fault: bool,
    release_fault: bool,
}

impl ChipState {
    fn rising_edge(&mut self) {
        self.clock_high = true;
        self.high_since = Some(Instant::now());

        if self.in_cycle && self.pulses >= MAX_PULSES {
            self.finish_cycle();
        }

        if !self.in_cycle {
            if !self.ready_seen {
                // Not part of a read cycle, only matters if it turns into a power-down.
                self.stray_high = true;
                return;
            }
            self.in_cycle = true;
            self.pulses = 0;
            self.word = self.queue.pop_front().unwrap_or(self.last);
            self.last = self.word;
        }

        self.pulses += 1;
        self.rises.push(thread::current().id());

        if self.pulses <= DATA_BITS as usize {
            self.bit = (self.word >> (DATA_BITS as usize - self.pulses)) & 1 == 1;
        } else {
            self.bit = true;
        }
    }

    fn falling_edge(&mut self) {
        self.clock_high = false;

        let powered_down = match (self.power_down_after, self.high_since.take()) {
            (Some(after), Some(since)) => since.elapsed() >= after,
            _ => false,
        };

        if self.stray_high {
            self.stray_high = false;
            if powered_down {
                self.power_down();
            }
            return;
        }

        if powered_down {
            self.pulses -= 1;
            self.rises.pop();

            if self.pulses > DATA_BITS as usize {
                self.finish_cycle();
            } else {
                self.in_cycle = false;
                self.pulses = 0;
            }
            self.power_down();
        }
    }

    fn finish_cycle(&mut self) {
        self.cycles.push(self.pulses);
        if let Some(gain) = GainMode::from_pulses(self.pulses) {
            self.latched = gain;
        }

        self.in_cycle = false;
        self.pulses = 0;
        self.ready_seen = false;
        self.busy_left = self.busy_polls;
    }

    fn power_down(&mut self) {
        self.latched = GainMode::default();
        self.resets += 1;
        self.ready_seen = false;
        self.busy_left = self.busy_polls;
    }

    fn read_data(&mut self) -> bool {
        if self.in_cycle {
            if self.clock_high || self.pulses <= DATA_BITS as usize {
                return self.bit;
            }
            self.finish_cycle();
        }

        if self.never_ready {
            return true;
        }
        if self.busy_left > 0 {
            self.busy_left -= 1;
            return true;
        }

        self.ready_seen = true;
        false
    }
}

/// Shared handle on one simulated chip, clones observe the same state.
#[derive(Clone, Default)]
pub struct SimulatedChip {
    state: Arc<Mutex<ChipState>>,
}

impl SimulatedChip {
    /// A chip that converts to zero forever.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chip that reports `value` for every conversion.
    pub fn constant(value: i32) -> Self {
        let chip = Self::new();
        chip.state().last = encode(value);
        chip
    }

    /// Reports `values` in order, then keeps repeating the last one.
    pub fn with_samples(values: impl IntoIterator<Item = i32>) -> Self {
        let chip = Self::new();
        for value in values {
            chip.push(value);
        }
        chip
    }

    pub fn push(&self, value: i32) {
        self.push_word(encode(value));
    }

    /// Queues a raw output word, only the low 24 bits are shifted out.
    pub fn push_word(&self, word: u32) {
        self.state().queue.push_back(word & 0x00FF_FFFF);
    }

    /// The data (input) and clock (output) lines wired to this chip.
    pub fn lines(&self) -> (SimLine, SimLine) {
        (self.line(Role::Data), self.line(Role::Clock))
    }

    pub fn line(&self, role: Role) -> SimLine {
        SimLine {
            role,
            state: self.state.clone(),
            released: false,
        }
    }

    /// Number of polls answered with "busy" before each conversion is ready.
    pub fn set_busy_polls(&self, polls: usize) {
        let mut state = self.state();
        state.busy_polls = polls;
        state.busy_left = polls;
    }

    pub fn set_never_ready(&self, never: bool) {
        self.state().never_ready = never;
    }

    /// Clock held high for at least `after` powers the chip down. `None` disables power-down.
    pub fn set_power_down_after(&self, after: Option<Duration>) {
        self.state().power_down_after = after;
    }

    pub fn fail_configure(&self, role: Role) {
        self.state().fail_configure = Some(role);
    }

    /// Data reads fail once `reads` more reads succeeded.
    pub fn fail_data_reads_after(&self, reads: usize) {
        self.state().data_reads_left = Some(reads);
    }

    /// Clock writes fail once `writes` more writes succeeded.
    pub fn fail_clock_writes_after(&self, writes: usize) {
        self.state().clock_writes_left = Some(writes);
    }

    /// Every read & write on both lines fails from now on.
    pub fn inject_io_fault(&self) {
        self.state().io_fault = true;
    }

    pub fn fail_release(&self) {
        self.state().release_fault = true;
    }

    /// Clock pulses per read cycle, including a cycle still in progress.
    pub fn cycle_pulses(&self) -> Vec<usize> {
        let state = self.state();
        let mut cycles = state.cycles.clone();
        if state.in_cycle && state.pulses > 0 {
            cycles.push(state.pulses);
        }
        cycles
    }

    /// Forgets recorded cycles & edges, chip state is untouched. Long running users should
    /// call this periodically, the history grows with every pulse.
    pub fn clear_history(&self) {
        let mut state = self.state();
        state.cycles.clear();
        state.rises.clear();
    }

    /// Thread that raised each counted clock pulse, in order.
    pub fn rising_edges(&self) -> Vec<ThreadId> {
        self.state().rises.clone()
    }

    /// Gain the chip will use for its next conversion.
    pub fn latched_gain(&self) -> GainMode {
        let state = self.state();
        match state.in_cycle {
            true => GainMode::from_pulses(state.pulses).unwrap_or(state.latched),
            false => state.latched,
        }
    }

    pub fn resets(&self) -> usize {
        self.state().resets
    }

    pub fn clock_is_high(&self) -> bool {
        self.state().clock_high
    }

    pub fn direction(&self, role: Role) -> Option<Direction> {
        self.state().directions.get(&role).copied()
    }

    pub fn releases(&self, role: Role) -> usize {
        self.state().releases.get(&role).copied().unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, ChipState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One pin of a [SimulatedChip].
pub struct SimLine {
    role: Role,
    state: Arc<Mutex<ChipState>>,
    released: bool,
}

impl SimLine {
    fn state(&self) -> Result<MutexGuard<'_, ChipState>, LineError> {
        if self.released {
            return Err(LineError::Released);
        }

        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.io_fault {
            true => Err(LineError::other("injected io fault")),
            false => Ok(state),
        }
    }
}

impl DigitalLine for SimLine {
    fn configure(&mut self, direction: Direction) -> Result<(), LineError> {
        let mut state = self.state()?;
        if state.fail_configure == Some(self.role) {
            return Err(LineError::other(format!("cannot configure {:?}", self.role)));
        }
        state.directions.insert(self.role, direction);

        Ok(())
    }

    fn read(&mut self) -> Result<bool, LineError> {
        let mut state = self.state()?;

        match self.role {
            Role::Data => {
                if let Some(left) = state.data_reads_left {
                    if left == 0 {
                        return Err(LineError::other("injected data read fault"));
                    }
                    state.data_reads_left = Some(left - 1);
                }
                Ok(state.read_data())
            }
            Role::Clock => Ok(state.clock_high),
        }
    }

    fn write(&mut self, high: bool) -> Result<(), LineError> {
        let mut state = self.state()?;

        if self.role == Role::Clock {
            if let Some(left) = state.clock_writes_left {
                if left == 0 {
                    return Err(LineError::other("injected clock write fault"));
                }
                state.clock_writes_left = Some(left - 1);
            }
        }

        match (self.role, high, state.clock_high) {
            (Role::Data, _, _) => Err(LineError::other("data line is an input")),
            (Role::Clock, true, false) => {
                state.rising_edge();
                Ok(())
            }
            (Role::Clock, false, true) => {
                state.falling_edge();
                Ok(())
            }
            (Role::Clock, _, _) => Ok(()),
        }
    }

    fn release(&mut self) -> Result<(), LineError> {
        if self.released {
            return Err(LineError::Released);
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.release_fault {
            return Err(LineError::other("injected release fault"));
        }
        self.released = true;
        *state.releases.entry(self.role).or_default() += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse(clock: &mut SimLine) {
        clock.write(true).unwrap();
        clock.write(false).unwrap();
    }

    #[test]
    fn shifts_out_msb_first() {
        let chip = SimulatedChip::with_samples([0x00A5_0F01]);
        let (mut data, mut clock) = chip.lines();

        assert!(!data.read().unwrap());
        let mut word = 0_u32;
        for _ in 0..24 {
            clock.write(true).unwrap();
            word = (word << 1) | data.read().unwrap() as u32;
            clock.write(false).unwrap();
        }
        pulse(&mut clock);

        assert_eq!(word, 0x00A5_0F01);
        assert_eq!(chip.cycle_pulses(), vec![25]);
    }

    #[test]
    fn latches_gain_from_pulse_count() {
        let chip = SimulatedChip::new();
        let (mut data, mut clock) = chip.lines();

        assert!(!data.read().unwrap());
        for _ in 0..26 {
            pulse(&mut clock);
        }
        assert_eq!(chip.latched_gain(), GainMode::ChannelBGain32);

        // Next poll closes the cycle.
        assert!(!data.read().unwrap());
        assert_eq!(chip.cycle_pulses(), vec![26]);
        assert_eq!(chip.latched_gain(), GainMode::ChannelBGain32);
    }

    #[test]
    fn clear_history_keeps_cycle_in_progress() {
        let chip = SimulatedChip::new();
        let (mut data, mut clock) = chip.lines();

        assert!(!data.read().unwrap());
        for _ in 0..25 {
            pulse(&mut clock);
        }
        assert!(!data.read().unwrap());
        pulse(&mut clock);

        chip.clear_history();
        assert_eq!(chip.cycle_pulses(), vec![1]);
        assert!(chip.rising_edges().is_empty());
        assert_eq!(chip.latched_gain(), GainMode::ChannelAGain128);
    }

    #[test]
    fn pulses_without_ready_poll_are_ignored() {
        let chip = SimulatedChip::new();
        let (_data, mut clock) = chip.lines();

        pulse(&mut clock);
        assert!(chip.cycle_pulses().is_empty());
        assert!(chip.rising_edges().is_empty());
        assert_eq!(chip.resets(), 0);
    }

    #[test]
    fn busy_before_ready() {
        let chip = SimulatedChip::new();
        chip.set_busy_polls(2);
        let (mut data, _clock) = chip.lines();

        assert!(data.read().unwrap());
        assert!(data.read().unwrap());
        assert!(!data.read().unwrap());
    }

    #[test]
    fn released_line_is_unusable() {
        let chip = SimulatedChip::new();
        let (mut data, _clock) = chip.lines();

        data.release().unwrap();
        assert!(matches!(data.read(), Err(LineError::Released)));
        assert!(matches!(data.release(), Err(LineError::Released)));
        assert_eq!(chip.releases(Role::Data), 1);
    }

    #[test]
    fn data_line_rejects_writes() {
        let chip = SimulatedChip::new();
        let (mut data, _clock) = chip.lines();

        assert!(data.write(true).is_err());
    }
}
