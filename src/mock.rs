//! Simulated QUADSPI controller, PSRAM device and MPU for host tests.
//!
//! The bus and MPU halves share one [`Sim`] so tests can inspect controller
//! registers, the device array and the protection window after the driver is
//! done with them. Every indirect transaction that reaches the device is
//! recorded in [`Sim::trace`].

use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use crate::config::{Config, MAPPED_BASE};
use crate::hw::{ProtectionUnit, QspiBus, Signal};
use crate::mpu::{Region, RegionSize, Window, REGIONS};
use crate::regs::{cr, fcr, sr, Ccr, FunctionMode, Lines, Reg};

/// Bytes each direction of the controller FIFO holds.
pub const FIFO_DEPTH: usize = 32;

/// Bytes the wire moves between the FIFO and the device per status poll.
const WIRE_BYTES_PER_POLL: usize = 4;

/// Shared simulation state.
pub type Handle = Rc<RefCell<Sim>>;

/// Forces 4-byte alignment on a test buffer.
#[repr(align(4))]
pub struct Aligned<T>(pub T);

/// Builds a simulation sized for `config` and the two backends driving it.
pub fn parts(config: Config) -> (Handle, MockBus, MockMpu) {
    let sim = Rc::new(RefCell::new(Sim::new(config.capacity() as usize)));
    (sim.clone(), MockBus(sim.clone()), MockMpu(sim))
}

/// One transaction as the device saw it.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    /// Communication configuration the transaction ran with.
    pub ccr: Ccr,
    /// Address phase value, if any.
    pub address: Option<u32>,
    /// Data phase length in bytes.
    pub len: usize,
    /// Bytes written by the host.
    pub payload: Vec<u8>,
    /// Whether any part of the bank was CPU-accessible while it ran.
    pub window_open: bool,
}

/// ESP-PSRAM64H style device behind the controller.
#[derive(Debug)]
pub struct Device {
    /// Read-ID response: manufacturer, known-good-die, EID.
    pub id: [u8; 8],
    /// QPI mode: instructions and data on four lines.
    pub quad: bool,
    /// Wrap boundary toggled by `0xC0`; starts at 1 KiB.
    pub wrap_32: bool,
    /// Backing array.
    pub memory: Vec<u8>,
    reset_enabled: bool,
}

impl Device {
    fn new(capacity: usize) -> Self {
        Self {
            id: [0x0D, 0x5D, 0x52, 0x8A, 0x41, 0x07, 0x3C, 0x19],
            quad: false,
            wrap_32: false,
            memory: vec![0; capacity],
            reset_enabled: false,
        }
    }

    fn lines(&self) -> Lines {
        if self.quad {
            Lines::Quad
        } else {
            Lines::Single
        }
    }

    fn offset(&self, address: u32, i: usize) -> usize {
        (address as usize + i) % self.memory.len()
    }

    fn execute(&mut self, ccr: &Ccr, address: Option<u32>, len: usize, payload: &[u8]) -> Vec<u8> {
        // Instructions clocked on the wrong number of lines are garbage to
        // the device, except that the read-ID response is then all ones.
        if ccr.instruction_lines != self.lines() {
            self.reset_enabled = false;
            return match ccr.mode {
                FunctionMode::IndirectRead => vec![0xFF; len],
                _ => Vec::new(),
            };
        }
        let enable_reset = ccr.instruction == 0x66;
        let mut rx = Vec::new();
        match (ccr.instruction, ccr.mode) {
            (0x35, FunctionMode::IndirectWrite) if !self.quad => self.quad = true,
            (0xF5, FunctionMode::IndirectWrite) if self.quad => self.quad = false,
            (0x99, FunctionMode::IndirectWrite) if self.reset_enabled => {
                self.quad = false;
                self.wrap_32 = false;
            }
            (0xC0, FunctionMode::IndirectWrite) => self.wrap_32 = !self.wrap_32,
            (0x9F, FunctionMode::IndirectRead) => {
                rx.extend(self.id.iter().copied().cycle().take(len));
            }
            (0xEB | 0x03, FunctionMode::IndirectRead) => {
                let address = address.unwrap_or(0);
                rx.extend((0..len).map(|i| self.memory[self.offset(address, i)]));
            }
            (0x38 | 0x02, FunctionMode::IndirectWrite) => {
                let address = address.unwrap_or(0);
                for (i, &byte) in payload.iter().enumerate() {
                    let at = self.offset(address, i);
                    self.memory[at] = byte;
                }
            }
            (_, FunctionMode::IndirectRead) => rx.resize(len, 0),
            _ => {}
        }
        self.reset_enabled = enable_reset;
        rx
    }
}

#[derive(Debug)]
struct Pending {
    ccr: Ccr,
    address: Option<u32>,
    payload: Vec<u8>,
}

/// Controller, device and MPU state.
#[derive(Debug)]
pub struct Sim {
    /// Peripheral resets performed.
    pub resets: usize,
    /// Signals routed, in order.
    pub routed: Vec<Signal>,
    /// Control register.
    pub cr: u32,
    /// Device configuration register.
    pub dcr: u32,
    /// Low-power timeout register.
    pub lptr: u32,
    /// Data length register.
    pub dlr: u32,
    /// Communication configuration register.
    pub ccr: u32,
    /// Alternate bytes register.
    pub abr: u32,
    /// Transfer-complete flag never rises.
    pub dead: bool,
    /// BUSY reads back set until an abort completes.
    pub stuck_busy: bool,
    /// CR reads an abort takes to complete.
    pub abort_latency: u32,
    /// Aborts requested.
    pub aborts: usize,
    /// The PSRAM.
    pub device: Device,
    /// Transactions that reached the device.
    pub trace: Vec<Transaction>,
    /// Completed MPU updates.
    pub mpu_updates: usize,
    /// Value of `resets` when the first MPU update completed.
    pub resets_before_first_mpu_update: usize,
    /// Protocol violations seen: indirect traffic with the bank reachable,
    /// region writes outside an update, a mismatched exit token, or an
    /// update that opens the bank while the controller is not memory-mapped.
    pub violations: usize,
    /// Data register pushes into a full FIFO plus pops from an empty one.
    pub fifo_errors: usize,
    /// Status register reads.
    pub status_reads: usize,
    tcf: bool,
    abort_remaining: u32,
    pending: Option<Pending>,
    tx: Vec<u8>,
    rx: Vec<u8>,
    incoming: Vec<u8>,
    dr_word_reads: usize,
    regions: [Option<(u32, u32)>; 8],
    updating: Option<u32>,
    tokens: u32,
}

impl Sim {
    fn new(capacity: usize) -> Self {
        Self {
            resets: 0,
            routed: Vec::new(),
            cr: 0,
            dcr: 0,
            lptr: 0,
            dlr: 0,
            ccr: 0,
            abr: 0,
            dead: false,
            stuck_busy: false,
            abort_latency: 0,
            aborts: 0,
            device: Device::new(capacity),
            trace: Vec::new(),
            mpu_updates: 0,
            resets_before_first_mpu_update: 0,
            violations: 0,
            fifo_errors: 0,
            status_reads: 0,
            tcf: false,
            abort_remaining: 0,
            pending: None,
            tx: Vec::new(),
            rx: Vec::new(),
            incoming: Vec::new(),
            dr_word_reads: 0,
            regions: [None; 8],
            updating: None,
            tokens: 0,
        }
    }

    /// Word-wide data register reads since the last call.
    pub fn take_dr_word_reads(&mut self) -> usize {
        core::mem::take(&mut self.dr_word_reads)
    }

    /// The bank window as currently programmed into regions 1 to 3, or
    /// `None` if they do not describe one.
    pub fn window(&self) -> Option<Window> {
        let mut regions = [Region::deny(0, RegionSize::Size16M); 3];
        for (slot, &number) in regions.iter_mut().zip(REGIONS.iter()) {
            let (base, rasr) = self.regions[number as usize]?;
            let size = match (rasr >> 1) & 0x1f {
                0x17 => RegionSize::Size16M,
                0x18 => RegionSize::Size32M,
                0x1B => RegionSize::Size256M,
                _ => return None,
            };
            // Enabled, no access, execute-never.
            if rasr & 1 == 0 || (rasr >> 24) & 0x7 != 0 || rasr & (1 << 28) == 0 {
                return None;
            }
            *slot = Region {
                number,
                base,
                size,
                holes: (rasr >> 8) as u8,
            };
        }
        Some(Window { regions })
    }

    fn window_open(&self) -> bool {
        self.window().map_or(false, |w| !w.is_denied())
    }

    fn mapped(&self) -> bool {
        Ccr::decode(self.ccr).map_or(false, |c| c.mode == FunctionMode::MemoryMapped)
    }

    /// A CPU load from `address`: `None` if the MPU faults it or the
    /// controller is not memory-mapped.
    pub fn load(&self, address: u32) -> Option<u8> {
        let window = self.window()?;
        if !window.allows(address) || !self.mapped() {
            return None;
        }
        let offset = address.checked_sub(MAPPED_BASE)? as usize;
        self.device.memory.get(offset).copied()
    }

    fn busy(&self) -> bool {
        self.stuck_busy || self.pending.is_some() || !self.incoming.is_empty()
    }

    /// Whether the pending transaction is a write whose data phase has
    /// started, so the host may push bytes.
    fn sending(&self) -> bool {
        self.pending.as_ref().map_or(false, |p| {
            p.ccr.mode == FunctionMode::IndirectWrite
                && p.ccr.data_lines != Lines::None
                && (p.ccr.address_lines == Lines::None || p.address.is_some())
        })
    }

    /// Moves data between the FIFO and the device. Runs once per status
    /// poll, so data only flows while the host waits on a flag.
    fn clock(&mut self) {
        if self.sending() {
            let n = self.tx.len().min(WIRE_BYTES_PER_POLL);
            let bytes: Vec<u8> = self.tx.drain(..n).collect();
            if let Some(pending) = self.pending.as_mut() {
                pending.payload.extend(bytes);
            }
            self.advance();
        }
        if !self.incoming.is_empty() {
            let room = FIFO_DEPTH - self.rx.len();
            let n = self.incoming.len().min(WIRE_BYTES_PER_POLL).min(room);
            let bytes: Vec<u8> = self.incoming.drain(..n).collect();
            self.rx.extend(bytes);
            if self.incoming.is_empty() {
                self.tcf = true;
            }
        }
    }

    fn status(&mut self) -> u32 {
        self.status_reads += 1;
        self.clock();

        let mut status = 0;
        if self.tcf && !self.dead {
            status |= sr::TCF;
        }
        if self.busy() {
            status |= sr::BUSY;
        }
        let level = if self.sending() {
            if FIFO_DEPTH - self.tx.len() >= WIRE_BYTES_PER_POLL {
                status |= sr::FTF;
            }
            self.tx.len()
        } else {
            if self.rx.len() >= WIRE_BYTES_PER_POLL
                || (self.incoming.is_empty() && !self.rx.is_empty())
            {
                status |= sr::FTF;
            }
            self.rx.len()
        };
        status | (level as u32) << sr::FLEVEL_POS
    }

    fn write_ccr(&mut self, value: u32) {
        self.ccr = value;
        self.pending = None;
        let ccr = match Ccr::decode(value) {
            Some(ccr) if ccr.mode != FunctionMode::MemoryMapped => ccr,
            _ => return,
        };
        self.pending = Some(Pending {
            ccr,
            address: None,
            payload: Vec::new(),
        });
        if ccr.address_lines == Lines::None {
            self.advance();
        }
    }

    fn write_ar(&mut self, value: u32) {
        if let Some(pending) = self.pending.as_mut() {
            if pending.ccr.address_lines != Lines::None {
                pending.address = Some(value);
                self.advance();
            }
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.tx.len() < FIFO_DEPTH {
                self.tx.push(byte);
            } else {
                self.fifo_errors += 1;
            }
        }
    }

    fn advance(&mut self) {
        let ready = match &self.pending {
            Some(p) if p.ccr.address_lines != Lines::None && p.address.is_none() => false,
            Some(p) if p.ccr.data_lines == Lines::None => true,
            Some(p) if p.ccr.mode == FunctionMode::IndirectRead => true,
            Some(p) => p.payload.len() > self.dlr as usize,
            None => false,
        };
        if !ready {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        let len = match (pending.ccr.data_lines, pending.ccr.mode) {
            (Lines::None, _) => 0,
            (_, FunctionMode::IndirectRead) => self.dlr as usize + 1,
            _ => pending.payload.len(),
        };
        let window_open = self.window_open();
        if window_open {
            self.violations += 1;
        }
        let rx = self
            .device
            .execute(&pending.ccr, pending.address, len, &pending.payload);
        self.incoming = rx;
        self.trace.push(Transaction {
            ccr: pending.ccr,
            address: pending.address,
            len,
            payload: pending.payload,
            window_open,
        });
        self.tcf = self.incoming.is_empty();
    }

    fn read_cr(&mut self) -> u32 {
        if self.cr & cr::ABORT != 0 {
            if self.abort_remaining == 0 {
                self.cr &= !cr::ABORT;
                self.stuck_busy = false;
            } else {
                self.abort_remaining -= 1;
            }
        }
        self.cr
    }

    fn write_cr(&mut self, value: u32) {
        if value & cr::ABORT != 0 && self.cr & cr::ABORT == 0 {
            self.aborts += 1;
            self.abort_remaining = self.abort_latency;
            self.pending = None;
            self.tx.clear();
            self.rx.clear();
            self.incoming.clear();
        }
        self.cr = value;
    }

    /// Pops up to `n` bytes. Reading past the FIFO level is an underflow
    /// unless the transfer has finished and this is its short last word.
    fn pop(&mut self, n: usize) -> Vec<u8> {
        if n > self.rx.len() && (self.rx.is_empty() || !self.incoming.is_empty()) {
            self.fifo_errors += 1;
        }
        let n = n.min(self.rx.len());
        self.rx.drain(..n).collect()
    }
}

/// Register-level half of the simulation.
#[derive(Debug)]
pub struct MockBus(Handle);

impl QspiBus for MockBus {
    fn reset(&mut self) {
        let mut sim = self.0.borrow_mut();
        sim.resets += 1;
        sim.cr = 0;
        sim.dcr = 0;
        sim.lptr = 0;
        sim.dlr = 0;
        sim.ccr = 0;
        sim.abr = 0;
        sim.tcf = false;
        sim.pending = None;
        sim.tx.clear();
        sim.rx.clear();
        sim.incoming.clear();
    }

    fn route(&mut self, signal: Signal) {
        self.0.borrow_mut().routed.push(signal);
    }

    fn read(&mut self, reg: Reg) -> u32 {
        let mut sim = self.0.borrow_mut();
        match reg {
            Reg::Cr => sim.read_cr(),
            Reg::Dcr => sim.dcr,
            Reg::Sr => sim.status(),
            Reg::Fcr => 0,
            Reg::Dlr => sim.dlr,
            Reg::Ccr => sim.ccr,
            Reg::Ar => sim.pending.as_ref().and_then(|p| p.address).unwrap_or(0),
            Reg::Abr => sim.abr,
            Reg::Dr => {
                sim.dr_word_reads += 1;
                let bytes = sim.pop(4);
                let mut word = [0; 4];
                word[..bytes.len()].copy_from_slice(&bytes);
                u32::from_le_bytes(word)
            }
            Reg::Lptr => sim.lptr,
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        let mut sim = self.0.borrow_mut();
        match reg {
            Reg::Cr => sim.write_cr(value),
            Reg::Dcr => sim.dcr = value,
            Reg::Sr => {}
            Reg::Fcr => {
                if value & fcr::CTCF != 0 {
                    sim.tcf = false;
                }
            }
            Reg::Dlr => sim.dlr = value,
            Reg::Ccr => sim.write_ccr(value),
            Reg::Ar => sim.write_ar(value),
            Reg::Abr => sim.abr = value,
            Reg::Dr => sim.push(&value.to_le_bytes()),
            Reg::Lptr => sim.lptr = value,
        }
    }

    fn read_data_u8(&mut self) -> u8 {
        self.0.borrow_mut().pop(1).first().copied().unwrap_or(0)
    }

    fn write_data_u8(&mut self, value: u8) {
        self.0.borrow_mut().push(&[value]);
    }

    fn write_data_u16(&mut self, value: u16) {
        self.0.borrow_mut().push(&value.to_le_bytes());
    }
}

/// MPU half of the simulation.
#[derive(Debug)]
pub struct MockMpu(Handle);

impl ProtectionUnit for MockMpu {
    fn enter(&mut self) -> u32 {
        let mut sim = self.0.borrow_mut();
        if sim.updating.is_some() {
            sim.violations += 1;
        }
        sim.tokens += 1;
        let token = 0xA5A5_0000 | sim.tokens;
        sim.updating = Some(token);
        token
    }

    fn set_region(&mut self, number: u8, base: u32, rasr: u32) {
        let mut sim = self.0.borrow_mut();
        if sim.updating.is_none() {
            sim.violations += 1;
        }
        sim.regions[number as usize & 7] = Some((base, rasr));
    }

    fn exit(&mut self, saved: u32) {
        let mut sim = self.0.borrow_mut();
        if sim.updating.take() != Some(saved) {
            sim.violations += 1;
        }
        if sim.mpu_updates == 0 {
            sim.resets_before_first_mpu_update = sim.resets;
        }
        sim.mpu_updates += 1;
        if sim.window_open() && !sim.mapped() {
            sim.violations += 1;
        }
    }
}
