//! Protection of the memory-mapped QUADSPI bank.
//!
//! A CPU speculative load into the bank while the controller is running an
//! indirect command corrupts the command. The bank is therefore covered by
//! three no-access MPU regions at all times. When the bus is memory-mapped
//! the regions get holes at their bottom so that exactly the device capacity
//! becomes reachable.
//!
//! The MPU expresses exceptions only as whole sub-regions (one eighth of a
//! region), so the hole is carved with three nested regions of decreasing
//! granularity: 256 MiB in 32 MiB steps, 32 MiB in 4 MiB steps and 16 MiB in
//! 2 MiB steps. An address is reachable only if it falls into the hole of
//! every region that covers it.

use crate::config::MAPPED_BASE;
use crate::hw::ProtectionUnit;

const RASR_ENABLE: u32 = 1 << 0;
const RASR_SIZE_POS: u32 = 1;
const RASR_SRD_POS: u32 = 8;
const RASR_AP_POS: u32 = 24;
const RASR_XN: u32 = 1 << 28;

const AP_NO_ACCESS: u32 = 0b000;

/// Region size classes used for the bank.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegionSize {
    /// 16 MiB, 2 MiB sub-regions.
    Size16M,
    /// 32 MiB, 4 MiB sub-regions.
    Size32M,
    /// 256 MiB, 32 MiB sub-regions.
    Size256M,
}

impl RegionSize {
    /// Size in bytes.
    pub const fn bytes(self) -> u32 {
        match self {
            RegionSize::Size16M => 16 << 20,
            RegionSize::Size32M => 32 << 20,
            RegionSize::Size256M => 256 << 20,
        }
    }

    /// Sub-region size in bytes.
    pub const fn subregion_bytes(self) -> u32 {
        self.bytes() / 8
    }

    /// RASR size field, `log2(bytes) - 1`.
    const fn field(self) -> u32 {
        self.bytes().trailing_zeros() - 1
    }
}

/// One no-access region over the bank.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    /// MPU region number.
    pub number: u8,
    /// Base address.
    pub base: u32,
    /// Size class.
    pub size: RegionSize,
    /// Sub-region disable mask; a set bit punches a hole.
    pub holes: u8,
}

impl Region {
    /// Region with no holes.
    pub const fn deny(number: u8, size: RegionSize) -> Self {
        Self {
            number,
            base: MAPPED_BASE,
            size,
            holes: 0,
        }
    }

    /// Region with the lowest sub-regions disabled, enough to cover
    /// `capacity` bytes of it.
    pub const fn deny_above(number: u8, size: RegionSize, capacity: u32) -> Self {
        let span = if capacity < size.bytes() {
            capacity
        } else {
            size.bytes()
        };
        let step = size.subregion_bytes();
        let count = (span + step - 1) / step;
        Self {
            number,
            base: MAPPED_BASE,
            size,
            holes: ((1u16 << count) - 1) as u8,
        }
    }

    /// RASR value: no access, execute-never, not cacheable, enabled.
    pub const fn rasr(&self) -> u32 {
        RASR_XN
            | AP_NO_ACCESS << RASR_AP_POS
            | (self.holes as u32) << RASR_SRD_POS
            | self.size.field() << RASR_SIZE_POS
            | RASR_ENABLE
    }

    /// Whether `address` falls in an enabled sub-region.
    pub const fn blocks(&self, address: u32) -> bool {
        if address < self.base || address - self.base >= self.size.bytes() {
            return false;
        }
        let sub = (address - self.base) / self.size.subregion_bytes();
        self.holes & (1 << sub) == 0
    }
}

/// MPU region numbers reserved for the bank, lowest priority first.
pub const REGIONS: [u8; 3] = [1, 2, 3];

/// The three regions guarding the bank, always programmed together.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Window {
    /// Outer, middle and inner region.
    pub regions: [Region; 3],
}

impl Window {
    /// Entire bank inaccessible.
    pub const fn denied() -> Self {
        Self {
            regions: [
                Region::deny(REGIONS[0], RegionSize::Size256M),
                Region::deny(REGIONS[1], RegionSize::Size32M),
                Region::deny(REGIONS[2], RegionSize::Size16M),
            ],
        }
    }

    /// Bank inaccessible except for `[MAPPED_BASE, MAPPED_BASE + capacity)`.
    ///
    /// `capacity` is a power of two from 2 MiB to 256 MiB.
    pub const fn mapped(capacity: u32) -> Self {
        Self {
            regions: [
                Region::deny_above(REGIONS[0], RegionSize::Size256M, capacity),
                Region::deny_above(REGIONS[1], RegionSize::Size32M, capacity),
                Region::deny_above(REGIONS[2], RegionSize::Size16M, capacity),
            ],
        }
    }

    /// Whether the CPU may touch `address`.
    pub fn allows(&self, address: u32) -> bool {
        !self.regions.iter().any(|r| r.blocks(address))
    }

    /// Whether no address of the bank is reachable.
    pub fn is_denied(&self) -> bool {
        self.regions.iter().all(|r| r.holes == 0)
    }
}

/// Programs all three regions inside one protection-unit critical section.
pub fn apply<M: ProtectionUnit>(mpu: &mut M, window: &Window) {
    let saved = mpu.enter();
    for region in &window.regions {
        mpu.set_region(region.number, region.base, region.rasr());
    }
    mpu.exit(saved);
}

/// Closes the bank. Must run before any indirect command.
pub fn deny_all<M: ProtectionUnit>(mpu: &mut M) {
    apply(mpu, &Window::denied());
}

/// Opens the first `capacity` bytes of the bank. The controller must already
/// be memory-mapped.
pub fn allow_mapped<M: ProtectionUnit>(mpu: &mut M, capacity: u32) {
    apply(mpu, &Window::mapped(capacity));
}
