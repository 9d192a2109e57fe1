//! Switching the bus between explicit commands and memory-mapped reads.
//!
//! The MPU window and the controller's functional mode always move
//! together: the window is closed before any indirect command and only
//! reopened once the controller is programmed for memory-mapped reads.

use crate::controller::Qspi;
use crate::hw::{ProtectionUnit, QspiBus, Signal};
use crate::mpu;
use crate::poll::Poll;
use crate::psram::Opcode;
use crate::regs::{cr, sr, AddressSize, Ccr, FunctionMode, Lines, Reg, QUAD_READ_DUMMY_CYCLES};
use crate::Error;

/// What the controller is currently set up for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusMode {
    /// Nothing programmed yet.
    Uninitialized,
    /// Window closed, software drives transactions.
    IndirectAccess,
    /// Window open, CPU loads in the bank read the device.
    MemoryMapped,
}

impl<B: QspiBus, M: ProtectionUnit, P: Poll> Qspi<B, M, P> {
    /// Current bus mode.
    pub fn mode(&self) -> BusMode {
        self.mode
    }

    /// Brings the controller up and leaves the bus in
    /// [`BusMode::IndirectAccess`] with the window closed.
    ///
    /// The window is closed before the peripheral is reset so that no
    /// speculative load reaches the bank while it is reconfigured. Calling
    /// this again repeats the whole sequence.
    pub fn initialize(&mut self) {
        mpu::deny_all(&mut self.mpu);
        for signal in Signal::ALL {
            self.bus.route(signal);
        }
        self.configure();
        self.mode = BusMode::IndirectAccess;
        debug!(
            "qspi: initialized, prescaler {}, {} bytes",
            self.config.prescaler,
            self.config.capacity()
        );
    }

    /// Takes the bus for an indirect command.
    ///
    /// Closes the window, then aborts whatever transfer the controller is
    /// still busy with and waits for the abort to finish.
    pub fn acquire(&mut self) -> Result<(), Error> {
        if self.mode == BusMode::Uninitialized {
            return Err(Error::InvalidMode);
        }
        mpu::deny_all(&mut self.mpu);
        self.mode = BusMode::IndirectAccess;

        if self.bus.read(Reg::Sr) & sr::BUSY != 0 {
            warn!("qspi: aborting transfer in progress");
            self.bus.modify(Reg::Cr, |v| v | cr::ABORT);
            let bus = &mut self.bus;
            self.poll.wait(|| {
                if bus.read(Reg::Cr) & cr::ABORT != 0 {
                    Err(nb::Error::WouldBlock)
                } else {
                    Ok(())
                }
            })?;
        }
        Ok(())
    }

    /// Hands the bus back to the CPU: continuous quad reads through the
    /// mapped bank, then the window is reopened.
    pub fn release(&mut self) -> Result<(), Error> {
        if self.mode == BusMode::Uninitialized {
            return Err(Error::InvalidMode);
        }
        self.bus.write(Reg::Abr, 0);
        self.bus.write(Reg::Ccr, self.mapped_ccr().bits());
        self.mode = BusMode::MemoryMapped;
        mpu::allow_mapped(&mut self.mpu, self.config.capacity());
        Ok(())
    }

    fn mapped_ccr(&self) -> Ccr {
        let address_size = self.config.mapped_address_size();
        let opcode = match address_size {
            AddressSize::TwentyFourBit => Opcode::FastReadQuad,
            AddressSize::ThirtyTwoBit => Opcode::FastReadQuad4b,
        };
        Ccr::command(opcode as u8, Lines::Quad)
            .address(Lines::Quad, address_size)
            .data(Lines::Quad)
            .dummy(QUAD_READ_DUMMY_CYCLES)
            .mode(FunctionMode::MemoryMapped)
    }
}
