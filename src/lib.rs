//! Driver for ESP-PSRAM64H / LY68L6400 QSPI pseudo SRAM behind a
//! memory-mapped QUADSPI controller.
//!
//! Once [`Psram::init`] has run the device is readable by plain CPU loads in
//! the mapped bank. [`Psram::read`] and [`Psram::write`] temporarily take the
//! bus for indirect quad commands and always hand it back mapped. While the
//! bus is taken, an MPU window keeps speculative CPU loads out of the bank.
//!
//! Layers, bottom up:
//!
//! * [`regs`] and [`config`]: register map and static parameters.
//! * [`hw`]: the register and MPU access a board provides
//!   (`stm32` with the `stm32f7` feature).
//! * [`mpu`]: the protection window.
//! * [`controller`] and [`bus`]: transaction primitives and mode switching
//!   on the [`Qspi`] handle.
//! * [`psram`]: the device driver.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, unsafe_code)]

#[macro_use]
mod fmt;

pub mod bus;
pub mod config;
pub mod controller;
mod error;
pub mod hw;
pub mod mpu;
pub mod poll;
pub mod psram;
pub mod regs;

#[cfg(feature = "stm32f7")]
pub mod stm32;

#[cfg(test)]
mod mock;

pub use crate::bus::BusMode;
pub use crate::config::Config;
pub use crate::controller::Qspi;
pub use crate::error::Error;
pub use crate::psram::Psram;
