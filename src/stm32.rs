//! STM32F7 QUADSPI and Cortex-M7 MPU backends.

#![allow(unsafe_code)]

use core::ptr;

use cortex_m::peripheral::MPU;
use cortex_m::{asm, interrupt, register::primask};

use crate::hw::{ProtectionUnit, QspiBus, Signal};
use crate::regs::Reg;

const QUADSPI_BASE: usize = 0xA000_1000;

const RCC_BASE: usize = 0x4002_3800;
const RCC_AHB3RSTR: *mut u32 = (RCC_BASE + 0x18) as *mut u32;
const RCC_AHB3ENR: *mut u32 = (RCC_BASE + 0x38) as *mut u32;
const RCC_AHB3_QSPI: u32 = 1 << 1;

const MPU_CTRL_ENABLE: u32 = 1 << 0;
const MPU_CTRL_PRIVDEFENA: u32 = 1 << 2;

/// The QUADSPI block at its fixed address.
///
/// Pin routing is board specific and delegated to `route`, which must put
/// the given signal's pin in its QUADSPI alternate function with no pull
/// and very high speed.
pub struct Quadspi<F> {
    route: F,
}

impl<F: FnMut(Signal)> Quadspi<F> {
    /// Takes the peripheral.
    ///
    /// # Safety
    ///
    /// Nothing else may access the QUADSPI registers or the RCC AHB3 reset
    /// and enable registers while this value exists.
    pub unsafe fn new(route: F) -> Self {
        Self { route }
    }

    fn reg(reg: Reg) -> *mut u32 {
        (QUADSPI_BASE + reg.offset()) as *mut u32
    }
}

impl<F: FnMut(Signal)> QspiBus for Quadspi<F> {
    fn reset(&mut self) {
        unsafe {
            let enabled = ptr::read_volatile(RCC_AHB3ENR);
            ptr::write_volatile(RCC_AHB3ENR, enabled | RCC_AHB3_QSPI);
            // Read back so the clock is running before the reset pulse.
            let _ = ptr::read_volatile(RCC_AHB3ENR);

            let reset = ptr::read_volatile(RCC_AHB3RSTR);
            ptr::write_volatile(RCC_AHB3RSTR, reset | RCC_AHB3_QSPI);
            ptr::write_volatile(RCC_AHB3RSTR, reset & !RCC_AHB3_QSPI);
        }
    }

    fn route(&mut self, signal: Signal) {
        (self.route)(signal)
    }

    fn read(&mut self, reg: Reg) -> u32 {
        unsafe { ptr::read_volatile(Self::reg(reg)) }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        unsafe { ptr::write_volatile(Self::reg(reg), value) }
    }

    fn read_data_u8(&mut self) -> u8 {
        unsafe { ptr::read_volatile(Self::reg(Reg::Dr) as *const u8) }
    }

    fn write_data_u8(&mut self, value: u8) {
        unsafe { ptr::write_volatile(Self::reg(Reg::Dr) as *mut u8, value) }
    }

    fn write_data_u16(&mut self, value: u16) {
        unsafe { ptr::write_volatile(Self::reg(Reg::Dr) as *mut u16, value) }
    }
}

/// The ARMv7-M MPU, owned.
pub struct CortexMpu {
    mpu: MPU,
}

impl CortexMpu {
    /// Wraps the MPU peripheral.
    pub fn new(mpu: MPU) -> Self {
        Self { mpu }
    }

    /// Gives the peripheral back.
    pub fn free(self) -> MPU {
        self.mpu
    }
}

impl ProtectionUnit for CortexMpu {
    fn enter(&mut self) -> u32 {
        let active = primask::read().is_active();
        interrupt::disable();
        asm::dmb();
        unsafe { self.mpu.ctrl.write(0) };
        active as u32
    }

    fn set_region(&mut self, number: u8, base: u32, rasr: u32) {
        unsafe {
            self.mpu.rnr.write(number as u32);
            self.mpu.rbar.write(base);
            self.mpu.rasr.write(rasr);
        }
    }

    fn exit(&mut self, saved: u32) {
        unsafe { self.mpu.ctrl.write(MPU_CTRL_PRIVDEFENA | MPU_CTRL_ENABLE) };
        asm::dsb();
        asm::isb();
        if saved != 0 {
            unsafe { interrupt::enable() };
        }
    }
}
