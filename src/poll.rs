//! How the driver waits on controller status flags.
//!
//! Every wait in the driver is a status check returning
//! [`nb::Result`]: `WouldBlock` until the flag is in the wanted state. The
//! [`Poll`] strategy owned by the driver decides how long to keep asking.

use embedded_hal::delay::DelayNs;

use crate::Error;

/// Strategy for repeating a non-blocking status check.
pub trait Poll {
    /// Calls `check` until it stops returning `WouldBlock`.
    fn wait<T>(&mut self, check: impl FnMut() -> nb::Result<T, Error>) -> Result<T, Error>;
}

/// Spin until the flag changes. A dead bus hangs the caller.
///
/// This is the production default: the PSRAM answers within a bounded number
/// of bus cycles or not at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct Forever;

impl Poll for Forever {
    fn wait<T>(&mut self, mut check: impl FnMut() -> nb::Result<T, Error>) -> Result<T, Error> {
        nb::block!(check())
    }
}

/// Gives up with [`Error::Timeout`] after a fixed number of checks.
#[derive(Clone, Copy, Debug)]
pub struct Bounded {
    /// Checks made before giving up, per wait.
    pub polls: u32,
}

impl Bounded {
    /// A strategy making at most `polls` checks per wait.
    pub const fn new(polls: u32) -> Self {
        Self { polls }
    }
}

impl Poll for Bounded {
    fn wait<T>(&mut self, mut check: impl FnMut() -> nb::Result<T, Error>) -> Result<T, Error> {
        for _ in 0..self.polls {
            match check() {
                Ok(value) => return Ok(value),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => core::hint::spin_loop(),
            }
        }
        Err(Error::Timeout)
    }
}

/// Sleeps `interval_ns` between checks and gives up once `budget_ns` has
/// been spent.
pub struct Delayed<D> {
    delay: D,
    interval_ns: u32,
    budget_ns: u32,
}

impl<D: DelayNs> Delayed<D> {
    /// Creates the strategy around a board delay provider.
    pub fn new(delay: D, interval_ns: u32, budget_ns: u32) -> Self {
        Self {
            delay,
            interval_ns: interval_ns.max(1),
            budget_ns,
        }
    }

    /// Returns the delay provider.
    pub fn release(self) -> D {
        self.delay
    }
}

impl<D: DelayNs> Poll for Delayed<D> {
    fn wait<T>(&mut self, mut check: impl FnMut() -> nb::Result<T, Error>) -> Result<T, Error> {
        let mut spent = 0u32;
        loop {
            match check() {
                Ok(value) => return Ok(value),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if spent >= self.budget_ns {
                return Err(Error::Timeout);
            }
            self.delay.delay_ns(self.interval_ns);
            spent = spent.saturating_add(self.interval_ns);
        }
    }
}
