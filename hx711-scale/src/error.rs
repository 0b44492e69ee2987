//! Errors raised while talking to the HX711 and while turning its output into measurements.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [DigitalLine](crate::gpio::DigitalLine) backend.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("gpio: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("line has already been released")]
    Released,

    #[error("{0}")]
    Other(String),
}

impl LineError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// A line could not be acquired or configured, the driver was never constructed.
    #[error("failed to initialise {line} line")]
    PinInit {
        line: &'static str,
        #[source]
        source: LineError,
    },

    /// GPIO failure in the middle of a protocol cycle.
    #[error("gpio failure during read cycle")]
    Gpio(#[source] LineError),

    /// The scale saw a GPIO failure and refuses further work until it is rebuilt.
    /// Only the call that tripped the fault carries the cause.
    #[error("device faulted, reconstruct the scale to recover")]
    DeviceFaulted(#[source] Option<LineError>),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("division by zero, scale is 0")]
    DivisionByZero,

    #[error("chip did not signal ready within {0:?}")]
    Timeout(Duration),

    #[error("output still saturated after {retries} retries")]
    Saturated { retries: u32 },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Errors that leave the chip in a known state, a later call may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Saturated { .. })
    }
}
