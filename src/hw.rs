//! Hardware capabilities the driver is written against.
//!
//! A board provides one [`QspiBus`] and one [`ProtectionUnit`]. The
//! `stm32f7` feature ships both for the STM32F7 QUADSPI block and the
//! Cortex-M7 MPU.

use crate::regs::Reg;

/// QUADSPI signals routed during bring-up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Signal {
    /// Bank 1 chip select.
    Ncs,
    /// Bus clock.
    Clk,
    /// Data line 0 (MOSI in SPI mode).
    Io0,
    /// Data line 1 (MISO in SPI mode).
    Io1,
    /// Data line 2.
    Io2,
    /// Data line 3.
    Io3,
}

impl Signal {
    /// Every signal the quad bus needs.
    pub const ALL: [Signal; 6] = [
        Signal::Ncs,
        Signal::Clk,
        Signal::Io0,
        Signal::Io1,
        Signal::Io2,
        Signal::Io3,
    ];
}

/// Register-level access to one QUADSPI controller.
///
/// Accesses are volatile and in program order. Data register accesses come
/// in three widths because the FIFO pops or pushes as many bytes as the
/// access is wide.
pub trait QspiBus {
    /// Enables the peripheral clock, then pulses the peripheral reset.
    fn reset(&mut self);

    /// Routes `signal` to its pin as alternate function, no pull, very high
    /// speed.
    fn route(&mut self, signal: Signal);

    /// Reads a 32-bit register. Reading [`Reg::Dr`] pops four bytes.
    fn read(&mut self, reg: Reg) -> u32;

    /// Writes a 32-bit register.
    fn write(&mut self, reg: Reg, value: u32);

    /// Pops one byte from the data FIFO.
    fn read_data_u8(&mut self) -> u8;

    /// Pushes one byte into the data FIFO.
    fn write_data_u8(&mut self, value: u8);

    /// Pushes two bytes into the data FIFO, low byte first on the wire.
    fn write_data_u16(&mut self, value: u16);

    /// Read-modify-write helper.
    fn modify(&mut self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
}

/// Region programming on an ARMv7-M style MPU.
///
/// Region writes only happen between [`enter`](ProtectionUnit::enter) and
/// [`exit`](ProtectionUnit::exit), which bracket an update so neither an
/// interrupt nor a speculative fetch sees half of it.
pub trait ProtectionUnit {
    /// Masks interrupts and disables the MPU. Returns the state `exit`
    /// restores.
    fn enter(&mut self) -> u32;

    /// Programs one region's base address and attribute/size word.
    fn set_region(&mut self, number: u8, base: u32, rasr: u32);

    /// Re-enables the MPU with the default map as background, issues the
    /// barriers and restores the interrupt mask saved by `enter`.
    fn exit(&mut self, saved: u32);
}
