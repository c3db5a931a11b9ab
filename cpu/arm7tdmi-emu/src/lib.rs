//! ARM7TDMI CPU core (ARMv4T), the GBA main CPU
//!
//! Also runs in ARMv3 configuration for the SNES ST018 coprocessor, which disables the Thumb
//! state and the halfword/signed transfer encodings.
//!
//! The 3-stage pipeline is modeled as fetch-ahead: R15 reads as the fetch address plus two
//! instruction widths during execution, and any write to R15 flushes the pipeline (the next
//! fetch is non-sequential).

pub mod bus;
mod instructions;
mod thumb;

use crate::bus::{BusInterface, MemoryCycle};
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum CpuState {
    #[default]
    Arm = 0,
    Thumb = 1,
}

impl CpuState {
    fn from_bit(bit: bool) -> Self {
        if bit { Self::Thumb } else { Self::Arm }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum CpuMode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    #[default]
    Supervisor = 0x13,
    Abort = 0x17,
    Undefined = 0x1B,
    System = 0x1F,
}

impl CpuMode {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x1F {
            0x10 => Self::User,
            0x11 => Self::Fiq,
            0x12 => Self::Irq,
            0x13 => Self::Supervisor,
            0x17 => Self::Abort,
            0x1B => Self::Undefined,
            _ => Self::System,
        }
    }

    /// Index into the banked R13/R14/SPSR arrays.
    fn bank_index(self) -> usize {
        match self {
            Self::User | Self::System => 0,
            Self::Fiq => 1,
            Self::Irq => 2,
            Self::Supervisor => 3,
            Self::Abort => 4,
            Self::Undefined => 5,
        }
    }

    fn has_spsr(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusRegister(pub u32);

macro_rules! impl_status_accessor {
    ($name:ident, $bit:ident) => {
        #[must_use]
        pub fn $name(self) -> bool {
            self.0 & Self::$bit != 0
        }
    };
}

macro_rules! impl_status_setter {
    ($name:ident, $bit:ident) => {
        #[must_use]
        pub fn $name(mut self, value: bool) -> Self {
            if value {
                self.0 |= Self::$bit;
            } else {
                self.0 &= !Self::$bit;
            }
            self
        }
    };
}

impl StatusRegister {
    const SIGN_BIT: u32 = 1 << 31;
    const ZERO_BIT: u32 = 1 << 30;
    const CARRY_BIT: u32 = 1 << 29;
    const OVERFLOW_BIT: u32 = 1 << 28;
    const DISABLE_IRQ_BIT: u32 = 1 << 7;
    const DISABLE_FIQ_BIT: u32 = 1 << 6;
    const STATE_BIT: u32 = 1 << 5;
    const MODE_MASK: u32 = (1 << 5) - 1;

    impl_status_accessor!(sign, SIGN_BIT);
    impl_status_accessor!(zero, ZERO_BIT);
    impl_status_accessor!(carry, CARRY_BIT);
    impl_status_accessor!(overflow, OVERFLOW_BIT);
    impl_status_accessor!(irq_disabled, DISABLE_IRQ_BIT);
    impl_status_accessor!(fiq_disabled, DISABLE_FIQ_BIT);

    #[must_use]
    pub fn state(self) -> CpuState {
        CpuState::from_bit(self.0 & Self::STATE_BIT != 0)
    }

    #[must_use]
    pub fn mode(self) -> CpuMode {
        CpuMode::from_bits(self.0 & Self::MODE_MASK)
    }

    impl_status_setter!(with_sign, SIGN_BIT);
    impl_status_setter!(with_zero, ZERO_BIT);
    impl_status_setter!(with_carry, CARRY_BIT);
    impl_status_setter!(with_overflow, OVERFLOW_BIT);
    impl_status_setter!(with_irq_disabled, DISABLE_IRQ_BIT);

    #[must_use]
    fn with_state(mut self, state: CpuState) -> Self {
        match state {
            CpuState::Arm => self.0 &= !Self::STATE_BIT,
            CpuState::Thumb => self.0 |= Self::STATE_BIT,
        }
        self
    }

    #[must_use]
    fn with_mode(mut self, mode: CpuMode) -> Self {
        self.0 = (self.0 & !Self::MODE_MASK) | mode as u32;
        self
    }
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self(Self::DISABLE_IRQ_BIT | Self::DISABLE_FIQ_BIT | CpuMode::Supervisor as u32)
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct Registers {
    /// Active register file; R15 is the program counter (next fetch address)
    r: [u32; 16],
    /// R8-R12 banks: [0] = usr/sys and all non-FIQ modes, [1] = FIQ
    r8_12_banks: [[u32; 5]; 2],
    /// R13/R14 banked per CpuMode::bank_index
    r13_banks: [u32; 6],
    r14_banks: [u32; 6],
    cpsr: StatusRegister,
    spsr_banks: [StatusRegister; 6],
}

impl Registers {
    /// Write the active R8-R14 back into the bank arrays for the current mode.
    fn spill(&mut self) {
        let mode = self.cpsr.mode();
        let fiq = usize::from(mode == CpuMode::Fiq);
        for i in 0..5 {
            self.r8_12_banks[fiq][i] = self.r[8 + i];
        }
        let bank = mode.bank_index();
        self.r13_banks[bank] = self.r[13];
        self.r14_banks[bank] = self.r[14];
    }

    /// Load the banked R8-R14 for the current mode into the active register file.
    fn fill(&mut self) {
        let mode = self.cpsr.mode();
        let fiq = usize::from(mode == CpuMode::Fiq);
        for i in 0..5 {
            self.r[8 + i] = self.r8_12_banks[fiq][i];
        }
        let bank = mode.bank_index();
        self.r[13] = self.r13_banks[bank];
        self.r[14] = self.r14_banks[bank];
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ArmVersion {
    /// ARMv4T: Thumb, BX, halfword/signed transfers, long multiplies.
    V4T,
    /// ARMv3: no Thumb state, no halfword transfer encodings. Used by the ST018.
    V3,
}

const RESET_VECTOR: u32 = 0x00000000;
const UNDEFINED_VECTOR: u32 = 0x00000004;
const SWI_VECTOR: u32 = 0x00000008;
const IRQ_VECTOR: u32 = 0x00000018;
const FIQ_VECTOR: u32 = 0x0000001C;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Arm7Tdmi {
    registers: Registers,
    version: ArmVersion,
    /// Set by any R15 write during execution; the next fetch is then non-sequential.
    pipeline_flushed: bool,
    /// Cycle counter for the current instruction (1 per memory access or internal cycle).
    cycles: u32,
}

impl Arm7Tdmi {
    #[must_use]
    pub fn new() -> Self {
        Self::with_version(ArmVersion::V4T)
    }

    #[must_use]
    pub fn with_version(version: ArmVersion) -> Self {
        let mut registers = Registers::default();
        registers.cpsr = StatusRegister::default();
        registers.r[15] = RESET_VECTOR;
        Self { registers, version, pipeline_flushed: true, cycles: 0 }
    }

    pub fn reset(&mut self) {
        let version = self.version;
        *self = Self::with_version(version);
    }

    #[must_use]
    pub fn version(&self) -> ArmVersion {
        self.version
    }

    /// Execute one instruction (or dispatch one interrupt) and return the number of bus/internal
    /// cycles consumed. The bus sees every access and can account exact wait states itself.
    pub fn execute_instruction<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        self.cycles = 0;

        if bus.irq() && !self.registers.cpsr.irq_disabled() {
            self.handle_exception(CpuMode::Irq, IRQ_VECTOR, true);
            return self.cycles + 3;
        }

        let fetch_cycle = if self.pipeline_flushed { MemoryCycle::N } else { MemoryCycle::S };
        self.pipeline_flushed = false;

        match self.registers.cpsr.state() {
            CpuState::Arm => {
                let pc = self.registers.r[15] & !3;
                let opcode = bus.fetch_opcode_word(pc, fetch_cycle);
                self.cycles += 1;
                // R15 reads as fetch address + 8 during execution
                self.registers.r[15] = pc.wrapping_add(8);

                instructions::execute_arm(self, bus, opcode);

                if !self.pipeline_flushed {
                    self.registers.r[15] = pc.wrapping_add(4);
                }
            }
            CpuState::Thumb => {
                let pc = self.registers.r[15] & !1;
                let opcode = bus.fetch_opcode_halfword(pc, fetch_cycle);
                self.cycles += 1;
                self.registers.r[15] = pc.wrapping_add(4);

                thumb::execute_thumb(self, bus, opcode);

                if !self.pipeline_flushed {
                    self.registers.r[15] = pc.wrapping_add(2);
                }
            }
        }

        self.cycles
    }

    #[must_use]
    pub fn pc(&self) -> u32 {
        self.registers.r[15]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.registers.r[15] = pc;
        self.pipeline_flushed = true;
    }

    #[must_use]
    pub fn cpsr(&self) -> StatusRegister {
        self.registers.cpsr
    }

    // Register access with pipeline-ahead R15 -----------------------------------------------

    pub(crate) fn read_register(&self, register: u32) -> u32 {
        self.registers.r[(register & 0xF) as usize]
    }

    pub(crate) fn write_register(&mut self, register: u32, value: u32) {
        let register = (register & 0xF) as usize;
        if register == 15 {
            let mask = match self.registers.cpsr.state() {
                CpuState::Arm => !3,
                CpuState::Thumb => !1,
            };
            self.registers.r[15] = value & mask;
            self.pipeline_flushed = true;
        } else {
            self.registers.r[register] = value;
        }
    }

    /// Read a user-bank register regardless of current mode (LDM/STM with S bit).
    pub(crate) fn read_user_register(&self, register: u32) -> u32 {
        let register = (register & 0xF) as usize;
        let mode = self.registers.cpsr.mode();
        match register {
            8..=12 if mode == CpuMode::Fiq => self.registers.r8_12_banks[0][register - 8],
            13 => {
                if mode.bank_index() == 0 {
                    self.registers.r[13]
                } else {
                    self.registers.r13_banks[0]
                }
            }
            14 => {
                if mode.bank_index() == 0 {
                    self.registers.r[14]
                } else {
                    self.registers.r14_banks[0]
                }
            }
            _ => self.registers.r[register],
        }
    }

    pub(crate) fn write_user_register(&mut self, register: u32, value: u32) {
        let register = (register & 0xF) as usize;
        let mode = self.registers.cpsr.mode();
        match register {
            8..=12 if mode == CpuMode::Fiq => self.registers.r8_12_banks[0][register - 8] = value,
            13 if mode.bank_index() != 0 => self.registers.r13_banks[0] = value,
            14 if mode.bank_index() != 0 => self.registers.r14_banks[0] = value,
            _ => self.registers.r[register] = value,
        }
    }

    // CPSR / SPSR ---------------------------------------------------------------------------

    pub(crate) fn cpsr_mut(&mut self) -> &mut StatusRegister {
        &mut self.registers.cpsr
    }

    pub(crate) fn spsr(&self) -> StatusRegister {
        let mode = self.registers.cpsr.mode();
        if mode.has_spsr() {
            self.registers.spsr_banks[mode.bank_index()]
        } else {
            self.registers.cpsr
        }
    }

    pub(crate) fn set_spsr(&mut self, value: StatusRegister) {
        let mode = self.registers.cpsr.mode();
        if mode.has_spsr() {
            self.registers.spsr_banks[mode.bank_index()] = value;
        }
    }

    /// Replace CPSR, rebanking R8-R14 if the mode changed. Inactive banked registers are
    /// untouched by mode transitions.
    pub(crate) fn set_cpsr(&mut self, value: StatusRegister) {
        let old_mode = self.registers.cpsr.mode();
        let new_mode = value.mode();

        if old_mode != new_mode {
            self.registers.spill();
            self.registers.cpsr = value;
            self.registers.fill();
        } else {
            self.registers.cpsr = value;
        }
    }

    /// Restore CPSR from SPSR (data processing with S and Rd=15, or LDM with R15 in an S-bit
    /// list).
    pub(crate) fn restore_cpsr(&mut self) {
        let spsr = self.spsr();
        self.set_cpsr(spsr);
    }

    pub(crate) fn handle_exception(&mut self, mode: CpuMode, vector: u32, from_irq: bool) {
        let old_cpsr = self.registers.cpsr;

        // IRQ is taken at the instruction boundary, where R15 holds the next fetch address;
        // the convention is LR = next + 4 so handlers return with SUBS PC, LR, #4. SWI and
        // undefined trap mid-execution, where R15 reads fetch + 8 (ARM) / + 4 (Thumb), and
        // LR must hold the following instruction.
        let return_address = match (old_cpsr.state(), from_irq) {
            (_, true) => self.registers.r[15].wrapping_add(4),
            (CpuState::Arm, false) => self.registers.r[15].wrapping_sub(4),
            (CpuState::Thumb, false) => self.registers.r[15].wrapping_sub(2),
        };

        let new_cpsr = old_cpsr
            .with_state(CpuState::Arm)
            .with_mode(mode)
            .with_irq_disabled(true);
        self.set_cpsr(new_cpsr);
        self.registers.spsr_banks[mode.bank_index()] = old_cpsr;

        self.registers.r[14] = return_address;
        self.registers.r[15] = vector;
        self.pipeline_flushed = true;
    }

    pub(crate) fn raise_swi(&mut self) {
        self.handle_exception(CpuMode::Supervisor, SWI_VECTOR, false);
    }

    pub(crate) fn raise_undefined(&mut self) {
        log::debug!("undefined instruction at {:08X}", self.registers.r[15].wrapping_sub(8));
        self.handle_exception(CpuMode::Undefined, UNDEFINED_VECTOR, false);
    }

    pub(crate) fn internal_cycles<B: BusInterface>(&mut self, bus: &mut B, count: u32) {
        self.cycles += count;
        bus.internal_cycles(count);
    }

    pub(crate) fn count_access(&mut self) {
        self.cycles += 1;
    }

    pub(crate) fn thumb_enabled(&self) -> bool {
        self.version == ArmVersion::V4T
    }

    pub(crate) fn set_state(&mut self, state: CpuState) {
        let cpsr = self.registers.cpsr.with_state(state);
        self.registers.cpsr = cpsr;
    }
}

impl Default for Arm7Tdmi {
    fn default() -> Self {
        Self::new()
    }
}

// Unused FIQ plumbing kept minimal: the GBA never asserts FIQ, and the ST018 has no FIQ source
#[allow(dead_code)]
const _: u32 = FIQ_VECTOR;
