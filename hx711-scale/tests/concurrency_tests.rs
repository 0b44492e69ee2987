//! Serialization of concurrent callers sharing one scale

use std::sync::{Arc, Barrier};
use std::thread;

use hx711_lib::sim::{SimLine, SimulatedChip};
use hx711_lib::{Error, GainMode, LoadCell, Scale, SharedScale};

const THREADS: usize = 4;
const READS_PER_THREAD: usize = 25;

fn make_shared(chip: &SimulatedChip) -> SharedScale<SimLine> {
    let (data, clock) = chip.lines();
    SharedScale::new(Scale::with_lines(data, clock, GainMode::default()).unwrap())
}

#[test]
fn test_overlapping_reads_never_interleave() {
    let chip = SimulatedChip::constant(-777);
    let shared = make_shared(&chip);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles = (0..THREADS)
        .map(|_| {
            let mut scale = shared.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..READS_PER_THREAD {
                    assert_eq!(scale.read().unwrap(), -777);
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }

    let pulses = chip.cycle_pulses();
    assert_eq!(pulses, vec![25; THREADS * READS_PER_THREAD]);

    // Every cycle's pulses come from a single thread.
    let edges = chip.rising_edges();
    assert_eq!(edges.len(), 25 * THREADS * READS_PER_THREAD);
    for cycle in edges.chunks(25) {
        assert!(cycle.iter().all(|id| *id == cycle[0]));
    }
}

#[test]
fn test_averages_hold_the_lock_for_every_sample() {
    let chip = SimulatedChip::constant(64);
    let shared = make_shared(&chip);

    let handles = (0..THREADS)
        .map(|i| {
            let mut scale = shared.clone();
            thread::spawn(move || {
                if i % 2 == 0 {
                    scale.read_average(8).unwrap()
                } else {
                    scale.tare(8).unwrap();
                    scale.get_value(8).unwrap() as i32
                }
            })
        })
        .collect::<Vec<_>>();
    let results = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect::<Vec<_>>();

    let edges = chip.rising_edges();
    let mut run = 0;
    for pair in edges.windows(2) {
        run += 1;
        if pair[0] != pair[1] {
            // Threads only hand over on a full operation boundary.
            assert_eq!(run % (25 * 8), 0);
            run = 0;
        }
    }
    assert_eq!(results[0], 64);
    assert_eq!(shared.calibration().offset, 64);
}

#[test]
fn test_gain_change_visible_to_all_handles() {
    let chip = SimulatedChip::constant(1);
    let mut a = make_shared(&chip);
    let mut b = a.clone();

    a.set_gain(GainMode::ChannelBGain32).unwrap();
    b.read().unwrap();

    assert_eq!(b.gain(), GainMode::ChannelBGain32);
    assert_eq!(chip.cycle_pulses(), vec![26, 26]);
}

#[test]
fn test_fault_is_shared() {
    let chip = SimulatedChip::constant(1);
    let mut a = make_shared(&chip);
    let mut b = a.clone();
    chip.inject_io_fault();

    assert!(matches!(a.read(), Err(Error::DeviceFaulted(Some(_)))));
    assert!(b.is_faulted());
    assert!(matches!(b.read(), Err(Error::DeviceFaulted(None))));
}

#[test]
fn test_try_unwrap_last_handle() {
    let chip = SimulatedChip::constant(1);
    let shared = make_shared(&chip);
    let other = shared.clone();

    let shared = shared.try_unwrap().err().unwrap();
    drop(other);
    let scale = shared.try_unwrap().ok().unwrap();
    assert!(!scale.is_faulted());
}
