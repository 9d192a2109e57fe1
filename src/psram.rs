//! ESP-PSRAM64 device driver on top of the QSPI handle.

use core::ops::Range;

use embedded_storage::{ReadStorage, Storage};

use crate::bus::BusMode;
use crate::config::{Config, MAPPED_BASE};
use crate::controller::{Qspi, ID_LEN};
use crate::hw::{ProtectionUnit, QspiBus};
use crate::poll::{Forever, Poll};
use crate::regs::Lines;
use crate::Error;

/// Manufacturer ID of ESP/AP Memory PSRAM parts.
const MANUFACTURER_ID: u8 = 0x0D;

/// Device identification and known good flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Identification {
    /// 48 Bit EID of the device
    pub eid: u64,

    /// True only after all tests are passed
    pub known_good_device: bool,
}

#[allow(unused)]
enum Kgd {
    Good = 0b0101_1101,
    Bad = 0b0101_0101,
}

impl Identification {
    /// Build an Identification from Read ID bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < ID_LEN {
            return Err(Error::InvalidDevice);
        }

        if buf[0] != MANUFACTURER_ID {
            return Err(Error::InvalidDevice);
        }

        let known_good = buf[1] == Kgd::Good as u8;

        let mut bytes = [0; 8];
        bytes[2..].copy_from_slice(&buf[2..ID_LEN]);

        Ok(Self {
            eid: u64::from_be_bytes(bytes),
            known_good_device: known_good,
        })
    }
}

/// Device instruction set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    /// Slow read at 33MHz
    Read = 0x03,
    /// Faster Read speed
    FastRead = 0x0B,
    /// Quad read, 24-bit address, 6 wait cycles
    FastReadQuad = 0xEB,
    /// Quad read with a 32-bit address, for devices above 16 MiB
    FastReadQuad4b = 0xEC,
    /// Slow write at 33MHz
    Write = 0x02,
    /// Quad write
    QuadWrite = 0x38,
    /// Enter QPI mode
    EnterQuadMode = 0x35,
    /// Exit QPI mode, sent on four lines
    ExitQuadMode = 0xF5,
    /// Enable the device to be reset
    ResetEnable = 0x66,
    /// Reset the device
    Reset = 0x99,
    /// Toggle the wrap boundary between 1 KiB and 32 bytes
    SetBurstLength = 0xC0,
    /// Read manufacturer ID, known good die flag and 48-bit device ID.
    ReadId = 0x9F,
}

/// Wrap boundary of burst accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BurstLength {
    /// 32B wrap.
    ThirtyTwoByte,
    /// 1KB wrap, the power-on default.
    OneKByte,
}

/// Driver for ESP QSPI Psuedo SRAM chips behind a memory-mapped controller.
///
/// Outside of its own calls the device stays memory-mapped: every operation
/// takes the bus, runs its indirect commands and hands it back to the CPU.
///
/// # Type Parameters
///
/// * **`B`**: register access to the QUADSPI controller.
/// * **`M`**: the MPU guarding the mapped bank.
/// * **`P`**: how status flags are waited on.
#[derive(Debug)]
pub struct Psram<B, M, P = Forever> {
    qspi: Qspi<B, M, P>,
    burst_length: BurstLength,
}

impl<B: QspiBus, M: ProtectionUnit> Psram<B, M, Forever> {
    /// Creates a new PSRAM driver. Nothing is touched until
    /// [`init`](Psram::init).
    pub fn new(bus: B, mpu: M, config: Config) -> Result<Self, Error> {
        Ok(Self::from_qspi(Qspi::new(bus, mpu, config)?))
    }
}

impl<B: QspiBus, M: ProtectionUnit, P: Poll> Psram<B, M, P> {
    /// Creates the driver with a custom wait strategy.
    pub fn with_poll(bus: B, mpu: M, config: Config, poll: P) -> Result<Self, Error> {
        Ok(Self::from_qspi(Qspi::with_poll(bus, mpu, config, poll)?))
    }

    /// Wraps an existing controller handle.
    pub fn from_qspi(qspi: Qspi<B, M, P>) -> Self {
        Self {
            qspi,
            burst_length: BurstLength::OneKByte,
        }
    }

    /// Brings up the controller, switches the device to QPI mode and maps
    /// it. Safe to call again; the end state is the same.
    pub fn init(&mut self) -> Result<(), Error> {
        self.qspi.initialize();
        // Diagnostic only. Answers with all ones once the device is in QPI.
        self.qspi.read_id()?;
        self.qspi.command(Opcode::EnterQuadMode as u8, Lines::Single)?;
        self.qspi.release()?;
        info!("psram: {} bytes mapped at {:x}", self.capacity(), MAPPED_BASE);
        Ok(())
    }

    /// Reads `dest.len()` bytes starting at `address`.
    pub fn read(&mut self, address: u32, dest: &mut [u8]) -> Result<(), Error> {
        if dest.is_empty() {
            return self.ensure_initialized();
        }
        self.bracket(|qspi| qspi.read_cmd_addr_data(Opcode::FastReadQuad as u8, address, dest))
    }

    /// Writes `src` starting at `address`.
    pub fn write(&mut self, address: u32, src: &[u8]) -> Result<(), Error> {
        if src.is_empty() {
            return self.ensure_initialized();
        }
        self.bracket(|qspi| qspi.write_cmd_addr_data(Opcode::QuadWrite as u8, address, src))
    }

    /// Reads the manufacturer/device identification.
    ///
    /// The ID is only readable in SPI mode, so the device leaves QPI mode for
    /// the duration.
    pub fn identify(&mut self) -> Result<Identification, Error> {
        let id = self.bracket(|qspi| {
            qspi.command(Opcode::ExitQuadMode as u8, Lines::Quad)?;
            let id = qspi.read_id()?;
            qspi.command(Opcode::EnterQuadMode as u8, Lines::Single)?;
            Ok(id)
        })?;
        Identification::from_bytes(&id)
    }

    /// Resets the device. It comes back in QPI mode with a 1 KiB wrap.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.bracket(|qspi| {
            qspi.command(Opcode::ResetEnable as u8, Lines::Quad)?;
            qspi.command(Opcode::Reset as u8, Lines::Quad)?;
            qspi.command(Opcode::EnterQuadMode as u8, Lines::Single)
        })?;
        self.burst_length = BurstLength::OneKByte;
        Ok(())
    }

    /// Sets the wrap boundary. The device only offers a toggle, so the
    /// command is sent only when the boundary changes.
    pub fn set_burst_length(&mut self, burst: BurstLength) -> Result<(), Error> {
        self.ensure_initialized()?;
        if burst != self.burst_length {
            self.bracket(|qspi| qspi.command(Opcode::SetBurstLength as u8, Lines::Quad))?;
        }
        self.burst_length = burst;
        Ok(())
    }

    /// Current wrap boundary.
    pub fn burst_length(&self) -> BurstLength {
        self.burst_length
    }

    /// CPU addresses backing the device, while it is memory-mapped.
    pub fn window(&self) -> Option<Range<u32>> {
        match self.qspi.mode() {
            BusMode::MemoryMapped => Some(MAPPED_BASE..MAPPED_BASE + self.capacity()),
            _ => None,
        }
    }

    /// Current bus mode.
    pub fn mode(&self) -> BusMode {
        self.qspi.mode()
    }

    /// Device capacity in bytes.
    pub fn capacity(&self) -> u32 {
        self.qspi.config().capacity()
    }

    /// Gives back the hardware parts.
    pub fn free(self) -> (B, M, P) {
        self.qspi.free()
    }

    fn ensure_initialized(&self) -> Result<(), Error> {
        match self.qspi.mode() {
            BusMode::Uninitialized => Err(Error::InvalidMode),
            _ => Ok(()),
        }
    }

    /// Runs `f` with the bus taken. On error the bus stays in indirect mode
    /// with the window closed; the next call aborts whatever is left over.
    fn bracket<T>(
        &mut self,
        f: impl FnOnce(&mut Qspi<B, M, P>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.qspi.acquire()?;
        let value = f(&mut self.qspi)?;
        self.qspi.release()?;
        Ok(value)
    }

    fn check_bounds(&self, offset: u32, len: usize) -> Result<(), Error> {
        if offset as u64 + len as u64 > self.capacity() as u64 {
            return Err(Error::OutOfBounds);
        }
        Ok(())
    }
}

impl<B: QspiBus, M: ProtectionUnit, P: Poll> ReadStorage for Psram<B, M, P> {
    type Error = Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_bounds(offset, bytes.len())?;
        Psram::read(self, offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.qspi.config().capacity() as usize
    }
}

impl<B: QspiBus, M: ProtectionUnit, P: Poll> Storage for Psram<B, M, P> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check_bounds(offset, bytes.len())?;
        Psram::write(self, offset, bytes)
    }
}
