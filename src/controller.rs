//! QUADSPI controller handle: bring-up and register-level transactions.
//!
//! Every primitive follows the same shape: clear the transfer-complete flag,
//! program DLR and CCR (plus ABR/AR), move the data through DR and wait for
//! the controller to report completion. Waits go through the handle's
//! [`Poll`] strategy.

use crate::bus::BusMode;
use crate::config::Config;
use crate::hw::{ProtectionUnit, QspiBus};
use crate::poll::{Forever, Poll};
use crate::psram::Opcode;
use crate::regs::{
    cr, dcr, fcr, sr, AddressSize, Ccr, FunctionMode, Lines, Reg, QUAD_READ_DUMMY_CYCLES,
};
use crate::Error;

/// Bytes returned by the read-ID command.
pub const ID_LEN: usize = 8;

/// FIFO threshold: FTF is raised once this many bytes can be moved.
const FIFO_THRESHOLD_BYTES: u32 = 4;

fn status_set<B: QspiBus>(bus: &mut B, flag: u32) -> nb::Result<(), Error> {
    if bus.read(Reg::Sr) & flag != 0 {
        Ok(())
    } else {
        Err(nb::Error::WouldBlock)
    }
}

fn fifo_not_empty<B: QspiBus>(bus: &mut B) -> nb::Result<(), Error> {
    if (bus.read(Reg::Sr) >> sr::FLEVEL_POS) & sr::FLEVEL_MASK != 0 {
        Ok(())
    } else {
        Err(nb::Error::WouldBlock)
    }
}

/// Owner of one QUADSPI controller, its MPU window and the bus mode.
///
/// # Type Parameters
///
/// * **`B`**: register access to the controller.
/// * **`M`**: the MPU guarding the memory-mapped bank.
/// * **`P`**: how status flags are waited on, [`Forever`] unless a bounded
///   strategy is supplied.
#[derive(Debug)]
pub struct Qspi<B, M, P = Forever> {
    pub(crate) bus: B,
    pub(crate) mpu: M,
    pub(crate) poll: P,
    pub(crate) config: Config,
    pub(crate) mode: BusMode,
}

impl<B: QspiBus, M: ProtectionUnit> Qspi<B, M, Forever> {
    /// Creates the handle. No register is touched until
    /// [`initialize`](Qspi::initialize).
    pub fn new(bus: B, mpu: M, config: Config) -> Result<Self, Error> {
        Self::with_poll(bus, mpu, config, Forever)
    }
}

impl<B: QspiBus, M: ProtectionUnit, P: Poll> Qspi<B, M, P> {
    /// Creates the handle with a custom wait strategy.
    pub fn with_poll(bus: B, mpu: M, config: Config, poll: P) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            bus,
            mpu,
            poll,
            config,
            mode: BusMode::Uninitialized,
        })
    }

    /// The configuration the handle was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gives back the hardware parts.
    pub fn free(self) -> (B, M, P) {
        (self.bus, self.mpu, self.poll)
    }

    /// Resets the peripheral and programs clocking, sampling, chip-select
    /// timing and the device size.
    pub fn configure(&mut self) {
        let config = self.config;
        self.bus.reset();

        // Flash 1, single-flash mode: FSEL and DFM stay clear.
        let mut control = (config.prescaler as u32 - 1) << cr::PRESCALER_POS
            | (FIFO_THRESHOLD_BYTES - 1) << cr::FTHRES_POS
            | cr::EN;
        if config.sample_shift {
            control |= cr::SSHIFT;
        }
        // The timeout counter is what drops nCS when the mapped bus idles.
        if config.timeout_counter || config.release_cs_when_idle {
            control |= cr::TCEN;
        }
        self.bus.write(Reg::Cr, control);

        // Clock idles low (mode 0).
        self.bus.write(
            Reg::Dcr,
            config.fsize() << dcr::FSIZE_POS | (config.cs_high_cycles as u32 - 1) << dcr::CSHT_POS,
        );

        self.bus.write(Reg::Lptr, 0);
    }

    fn ensure_indirect(&self) -> Result<(), Error> {
        if self.mode == BusMode::IndirectAccess {
            Ok(())
        } else {
            Err(Error::InvalidMode)
        }
    }

    fn wait_transfer_complete(&mut self) -> Result<(), Error> {
        let bus = &mut self.bus;
        self.poll.wait(|| status_set(bus, sr::TCF))?;
        self.bus.write(Reg::Fcr, fcr::CTCF);
        Ok(())
    }

    fn wait_fifo_threshold(&mut self) -> Result<(), Error> {
        let bus = &mut self.bus;
        self.poll.wait(|| status_set(bus, sr::FTF))
    }

    fn wait_fifo_not_empty(&mut self) -> Result<(), Error> {
        let bus = &mut self.bus;
        self.poll.wait(|| fifo_not_empty(bus))
    }

    /// Reads the 8 identification bytes (manufacturer, known-good-die flag,
    /// 48-bit EID).
    ///
    /// Only answers while the device is in SPI mode. An all-zero or all-one
    /// response means nothing answered and is not logged.
    pub fn read_id(&mut self) -> Result<[u8; ID_LEN], Error> {
        self.ensure_indirect()?;

        self.bus.write(Reg::Fcr, fcr::CTCF);
        self.bus.write(Reg::Dlr, ID_LEN as u32 - 1);
        let ccr = Ccr::command(Opcode::ReadId as u8, Lines::Single)
            .address(Lines::Single, AddressSize::TwentyFourBit)
            .data(Lines::Single)
            .mode(FunctionMode::IndirectRead);
        self.bus.write(Reg::Ccr, ccr.bits());
        self.bus.write(Reg::Ar, 0);

        self.wait_transfer_complete()?;

        let lo = self.bus.read(Reg::Dr);
        let hi = self.bus.read(Reg::Dr);
        let mut id = [0; ID_LEN];
        id[..4].copy_from_slice(&lo.to_le_bytes());
        id[4..].copy_from_slice(&hi.to_le_bytes());

        if (lo == 0 && hi == 0) || (lo == u32::MAX && hi == u32::MAX) {
            debug!("psram: no identification response");
        } else {
            info!("psram eid: {:x} {:x}", lo, hi);
        }
        Ok(id)
    }

    /// Sends an instruction with no address and no data.
    pub fn command(&mut self, opcode: u8, lines: Lines) -> Result<(), Error> {
        self.ensure_indirect()?;
        trace!("qspi: command {:x}", opcode);

        self.bus.write(Reg::Fcr, fcr::CTCF);
        self.bus.write(Reg::Ccr, Ccr::command(opcode, lines).bits());
        self.wait_transfer_complete()
    }

    /// Single-line instruction followed by single-line data.
    ///
    /// An empty payload sends the bare instruction. The only payload length
    /// supported is 2 bytes, pushed as one half-word; anything else is
    /// [`Error::InvalidLength`].
    pub fn write_cmd_data(&mut self, opcode: u8, data: &[u8]) -> Result<(), Error> {
        let half_word = match *data {
            [] => return self.command(opcode, Lines::Single),
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            _ => return Err(Error::InvalidLength),
        };
        self.ensure_indirect()?;

        self.bus.write(Reg::Fcr, fcr::CTCF);
        self.bus.write(Reg::Dlr, 1);
        let ccr = Ccr::command(opcode, Lines::Single).data(Lines::Single);
        self.bus.write(Reg::Ccr, ccr.bits());
        self.bus.write_data_u16(half_word);

        self.wait_transfer_complete()
    }

    /// Quad instruction, quad address and quad data.
    ///
    /// The address phase is 3 bytes below 16 MiB and 4 bytes from there on.
    /// With an empty payload only instruction and address go out.
    pub fn write_cmd_addr_data(
        &mut self,
        opcode: u8,
        address: u32,
        data: &[u8],
    ) -> Result<(), Error> {
        self.ensure_indirect()?;
        let ccr = Ccr::command(opcode, Lines::Quad)
            .address(Lines::Quad, AddressSize::for_address(address));

        self.bus.write(Reg::Fcr, fcr::CTCF);
        if data.is_empty() {
            self.bus.write(Reg::Ccr, ccr.bits());
            self.bus.write(Reg::Ar, address);
        } else {
            self.bus.write(Reg::Dlr, (data.len() - 1) as u32);
            self.bus.write(Reg::Ccr, ccr.data(Lines::Quad).bits());
            self.bus.write(Reg::Ar, address);

            for &byte in data {
                self.wait_fifo_threshold()?;
                self.bus.write_data_u8(byte);
            }
        }

        self.wait_transfer_complete()
    }

    /// Single-line instruction, then `len` (1 to 4) single-line data bytes
    /// returned as the data register word.
    pub fn read_cmd(&mut self, opcode: u8, len: usize) -> Result<u32, Error> {
        if !(1..=4).contains(&len) {
            return Err(Error::InvalidLength);
        }
        self.ensure_indirect()?;

        self.bus.write(Reg::Fcr, fcr::CTCF);
        self.bus.write(Reg::Dlr, len as u32 - 1);
        let ccr = Ccr::command(opcode, Lines::Single)
            .data(Lines::Single)
            .mode(FunctionMode::IndirectRead);
        self.bus.write(Reg::Ccr, ccr.bits());

        self.wait_transfer_complete()?;
        Ok(self.bus.read(Reg::Dr))
    }

    /// Quad instruction, quad address, 6 dummy cycles, then `dest.len()`
    /// bytes of quad data.
    ///
    /// A word-aligned `dest` is filled 4 bytes per data register access and
    /// whatever is left one byte at a time.
    pub fn read_cmd_addr_data(
        &mut self,
        opcode: u8,
        address: u32,
        dest: &mut [u8],
    ) -> Result<(), Error> {
        if dest.is_empty() {
            return Ok(());
        }
        self.ensure_indirect()?;

        self.bus.write(Reg::Fcr, fcr::CTCF);
        self.bus.write(Reg::Dlr, (dest.len() - 1) as u32);
        let ccr = Ccr::command(opcode, Lines::Quad)
            .address(Lines::Quad, AddressSize::for_address(address))
            .data(Lines::Quad)
            .dummy(QUAD_READ_DUMMY_CYCLES)
            .mode(FunctionMode::IndirectRead);
        self.bus.write(Reg::Ccr, ccr.bits());
        // Alternate byte 0 keeps the device out of continuous read mode.
        self.bus.write(Reg::Abr, 0);
        self.bus.write(Reg::Ar, address);

        let split = if dest.as_ptr() as usize & 3 == 0 {
            dest.len() & !3
        } else {
            0
        };
        let (words, tail) = dest.split_at_mut(split);

        for word in words.chunks_exact_mut(4) {
            self.wait_fifo_threshold()?;
            word.copy_from_slice(&self.bus.read(Reg::Dr).to_le_bytes());
        }
        for byte in tail {
            self.wait_fifo_not_empty()?;
            *byte = self.bus.read_data_u8();
        }

        self.bus.write(Reg::Fcr, fcr::CTCF);
        Ok(())
    }
}
