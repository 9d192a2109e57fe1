//! Static bus and device parameters.

use crate::regs::AddressSize;
use crate::Error;

/// Physical address of the memory-mapped QUADSPI bank.
pub const MAPPED_BASE: u32 = 0x9000_0000;

/// Static bus and device parameters.
///
/// These are board constants. Build one with [`Config::new`] and override
/// individual fields; the driver validates it once when constructed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Kernel clock divisor, `1..=256`. 3 gives 72 MHz from a 216 MHz AHB.
    pub prescaler: u16,
    /// Sample data half a cycle late.
    pub sample_shift: bool,
    /// Enable the controller timeout counter.
    ///
    /// Off by default (F7 errata). The counter is still enabled when
    /// `release_cs_when_idle` is set, since that is how the hardware drops nCS.
    pub timeout_counter: bool,
    /// Raise nCS as soon as the memory-mapped bus goes idle.
    pub release_cs_when_idle: bool,
    /// Minimum nCS high time between transactions, `1..=8` cycles.
    ///
    /// The PSRAM only refreshes while deselected.
    pub cs_high_cycles: u8,
    /// Device size as log2 of the number of bits.
    pub size_bits_log2: u8,
}

impl Config {
    /// 64 Mbit parts (ESP-PSRAM64H, LY68L6400).
    pub const ESP_PSRAM64: Config = Config::new(26);

    /// Defaults for a device of `2^size_bits_log2` bits.
    pub const fn new(size_bits_log2: u8) -> Self {
        Self {
            prescaler: 3,
            sample_shift: true,
            timeout_counter: false,
            release_cs_when_idle: true,
            cs_high_cycles: 2,
            size_bits_log2,
        }
    }

    /// Device capacity in bytes, or 0 when `size_bits_log2` names a size
    /// that is not a whole number of bytes or does not fit in `u32`.
    pub const fn capacity(&self) -> u32 {
        match self.size_bits_log2.checked_sub(3) {
            Some(bytes_log2) if bytes_log2 < 32 => 1 << bytes_log2,
            _ => 0,
        }
    }

    /// Address width used by memory-mapped reads, which must reach the
    /// highest byte of the device.
    pub const fn mapped_address_size(&self) -> AddressSize {
        AddressSize::for_address(self.capacity().saturating_sub(1))
    }

    /// Value of the DCR flash size field.
    pub(crate) const fn fsize(&self) -> u32 {
        self.size_bits_log2.saturating_sub(4) as u32
    }

    /// Checks the values against what the controller fields and the three
    /// MPU regions can express: 2 MiB up to the full 256 MiB bank.
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=256).contains(&self.prescaler) {
            return Err(Error::InvalidConfiguration);
        }
        if !(1..=8).contains(&self.cs_high_cycles) {
            return Err(Error::InvalidConfiguration);
        }
        if !(24..=31).contains(&self.size_bits_log2) {
            return Err(Error::InvalidConfiguration);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::ESP_PSRAM64
    }
}
