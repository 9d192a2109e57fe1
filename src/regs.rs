//! QUADSPI register map and the communication configuration word.
//!
//! Offsets and bit positions follow the STM32F7 QUADSPI block. Only the
//! fields this driver programs are described.

/// Addresses at or above this value need a 32-bit address phase.
pub const ADDRESS_32BIT_THRESHOLD: u32 = 0x0100_0000;

/// Dummy cycles the PSRAM needs between address and data on quad reads.
pub const QUAD_READ_DUMMY_CYCLES: u8 = 6;

/// QUADSPI registers touched by the driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// Control register.
    Cr,
    /// Device configuration register.
    Dcr,
    /// Status register.
    Sr,
    /// Flag clear register.
    Fcr,
    /// Data length register.
    Dlr,
    /// Communication configuration register.
    Ccr,
    /// Address register.
    Ar,
    /// Alternate bytes register.
    Abr,
    /// Data register.
    Dr,
    /// Low-power timeout register.
    Lptr,
}

impl Reg {
    /// Byte offset from the peripheral base.
    pub const fn offset(self) -> usize {
        match self {
            Reg::Cr => 0x00,
            Reg::Dcr => 0x04,
            Reg::Sr => 0x08,
            Reg::Fcr => 0x0C,
            Reg::Dlr => 0x10,
            Reg::Ccr => 0x14,
            Reg::Ar => 0x18,
            Reg::Abr => 0x1C,
            Reg::Dr => 0x20,
            Reg::Lptr => 0x30,
        }
    }
}

/// Control register fields.
pub mod cr {
    /// Peripheral enable.
    pub const EN: u32 = 1 << 0;
    /// Abort request, cleared by hardware once the abort completes.
    pub const ABORT: u32 = 1 << 1;
    /// Timeout counter enable. Together with LPTR it releases nCS in
    /// memory-mapped mode.
    pub const TCEN: u32 = 1 << 3;
    /// Sample shift by half a clock cycle.
    pub const SSHIFT: u32 = 1 << 4;
    /// Dual-flash mode.
    pub const DFM: u32 = 1 << 6;
    /// Flash memory selection (set selects flash 2).
    pub const FSEL: u32 = 1 << 7;
    /// FIFO threshold level, value is `bytes - 1`.
    pub const FTHRES_POS: u32 = 8;
    /// Clock prescaler, value is `divisor - 1`.
    pub const PRESCALER_POS: u32 = 24;
}

/// Device configuration register fields.
pub mod dcr {
    /// Clock idles high when set (mode 3).
    pub const CKMODE: u32 = 1 << 0;
    /// Chip-select high time, value is `cycles - 1`.
    pub const CSHT_POS: u32 = 8;
    /// Flash size, value is `log2(bytes) - 1`.
    pub const FSIZE_POS: u32 = 16;
}

/// Status register fields.
pub mod sr {
    /// Transfer error.
    pub const TEF: u32 = 1 << 0;
    /// Transfer complete.
    pub const TCF: u32 = 1 << 1;
    /// FIFO threshold reached.
    pub const FTF: u32 = 1 << 2;
    /// Busy.
    pub const BUSY: u32 = 1 << 5;
    /// FIFO level position.
    pub const FLEVEL_POS: u32 = 8;
    /// FIFO level mask (after shifting).
    pub const FLEVEL_MASK: u32 = 0x3f;
}

/// Flag clear register fields.
pub mod fcr {
    /// Clear transfer complete flag.
    pub const CTCF: u32 = 1 << 1;
}

mod ccr {
    pub const INSTRUCTION_POS: u32 = 0;
    pub const IMODE_POS: u32 = 8;
    pub const ADMODE_POS: u32 = 10;
    pub const ADSIZE_POS: u32 = 12;
    pub const DCYC_POS: u32 = 18;
    pub const DCYC_MASK: u32 = 0x1f;
    pub const DMODE_POS: u32 = 24;
    pub const FMODE_POS: u32 = 26;
}

/// Number of signal lines used by a transaction phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lines {
    /// Phase skipped.
    None,
    /// IO0 only (SPI).
    Single,
    /// IO0..IO3 (QPI).
    Quad,
}

impl Lines {
    const fn bits(self) -> u32 {
        match self {
            Lines::None => 0,
            Lines::Single => 1,
            Lines::Quad => 3,
        }
    }

    const fn from_bits(bits: u32) -> Option<Self> {
        match bits & 0x3 {
            0 => Some(Lines::None),
            1 => Some(Lines::Single),
            3 => Some(Lines::Quad),
            _ => None,
        }
    }
}

/// Width of the address phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressSize {
    /// 3 address bytes.
    TwentyFourBit,
    /// 4 address bytes.
    ThirtyTwoBit,
}

impl AddressSize {
    /// Picks the narrowest size able to carry `address`.
    pub const fn for_address(address: u32) -> Self {
        if address >= ADDRESS_32BIT_THRESHOLD {
            AddressSize::ThirtyTwoBit
        } else {
            AddressSize::TwentyFourBit
        }
    }

    const fn bits(self) -> u32 {
        match self {
            AddressSize::TwentyFourBit => 2,
            AddressSize::ThirtyTwoBit => 3,
        }
    }
}

/// Functional mode of the controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FunctionMode {
    /// Software pushes data through DR.
    IndirectWrite,
    /// Software drains data from DR.
    IndirectRead,
    /// CPU loads in the mapped window become bus reads.
    MemoryMapped,
}

impl FunctionMode {
    const fn bits(self) -> u32 {
        match self {
            FunctionMode::IndirectWrite => 0,
            FunctionMode::IndirectRead => 1,
            FunctionMode::MemoryMapped => 3,
        }
    }
}

/// One transaction's communication configuration (the CCR value).
///
/// Built fresh for every transaction and written once; the driver never keeps
/// one around. DDR, alternate bytes and send-instruction-once are always off.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ccr {
    /// Opcode sent in the instruction phase.
    pub instruction: u8,
    /// Lines for the instruction phase.
    pub instruction_lines: Lines,
    /// Lines for the address phase.
    pub address_lines: Lines,
    /// Address width, ignored when there is no address phase.
    pub address_size: AddressSize,
    /// Lines for the data phase.
    pub data_lines: Lines,
    /// Dummy cycles between address and data.
    pub dummy_cycles: u8,
    /// Functional mode.
    pub mode: FunctionMode,
}

impl Ccr {
    /// Instruction-only indirect write.
    pub const fn command(instruction: u8, lines: Lines) -> Self {
        Self {
            instruction,
            instruction_lines: lines,
            address_lines: Lines::None,
            address_size: AddressSize::TwentyFourBit,
            data_lines: Lines::None,
            dummy_cycles: 0,
            mode: FunctionMode::IndirectWrite,
        }
    }

    /// Adds an address phase.
    pub const fn address(mut self, lines: Lines, size: AddressSize) -> Self {
        self.address_lines = lines;
        self.address_size = size;
        self
    }

    /// Adds a data phase.
    pub const fn data(mut self, lines: Lines) -> Self {
        self.data_lines = lines;
        self
    }

    /// Sets the dummy cycle count.
    pub const fn dummy(mut self, cycles: u8) -> Self {
        self.dummy_cycles = cycles;
        self
    }

    /// Sets the functional mode.
    pub const fn mode(mut self, mode: FunctionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Register value.
    pub const fn bits(&self) -> u32 {
        let address_size = if matches!(self.address_lines, Lines::None) {
            0
        } else {
            self.address_size.bits()
        };
        (self.instruction as u32) << ccr::INSTRUCTION_POS
            | self.instruction_lines.bits() << ccr::IMODE_POS
            | self.address_lines.bits() << ccr::ADMODE_POS
            | address_size << ccr::ADSIZE_POS
            | ((self.dummy_cycles as u32) & ccr::DCYC_MASK) << ccr::DCYC_POS
            | self.data_lines.bits() << ccr::DMODE_POS
            | self.mode.bits() << ccr::FMODE_POS
    }

    /// Decodes a register value written by [`Ccr::bits`].
    ///
    /// Returns `None` for dual-line phases, 8/16-bit addresses and the
    /// automatic-polling mode, none of which this driver produces.
    pub const fn decode(bits: u32) -> Option<Self> {
        let instruction_lines = match Lines::from_bits(bits >> ccr::IMODE_POS) {
            Some(lines) => lines,
            None => return None,
        };
        let address_lines = match Lines::from_bits(bits >> ccr::ADMODE_POS) {
            Some(lines) => lines,
            None => return None,
        };
        let data_lines = match Lines::from_bits(bits >> ccr::DMODE_POS) {
            Some(lines) => lines,
            None => return None,
        };
        let address_size = match (bits >> ccr::ADSIZE_POS) & 0x3 {
            2 => AddressSize::TwentyFourBit,
            3 => AddressSize::ThirtyTwoBit,
            _ if matches!(address_lines, Lines::None) => AddressSize::TwentyFourBit,
            _ => return None,
        };
        let mode = match (bits >> ccr::FMODE_POS) & 0x3 {
            0 => FunctionMode::IndirectWrite,
            1 => FunctionMode::IndirectRead,
            3 => FunctionMode::MemoryMapped,
            _ => return None,
        };
        Some(Self {
            instruction: (bits >> ccr::INSTRUCTION_POS) as u8,
            instruction_lines,
            address_lines,
            address_size,
            data_lines,
            dummy_cycles: ((bits >> ccr::DCYC_POS) & ccr::DCYC_MASK) as u8,
            mode,
        })
    }
}
