//! MOS 6502 family CPU core
//!
//! Covers the NMOS 6502 as found in the NES's Ricoh 2A03/2A07 (no decimal mode in the NES
//! itself, but decimal mode is implemented and gated by a variant flag) and the CMOS 65C02
//! variant used by the Atari Lynx's Mikey.
//!
//! Execution is instruction-stepped: [`Mos6502::step`] executes one instruction and returns the
//! number of CPU clock cycles it consumed, including page-cross and taken-branch penalties.
//! Interrupts are polled at instruction boundaries; the NMI input is edge-triggered through a
//! latch the way the real chip's NMI detection works.

pub mod bus;
mod instructions;

use crate::bus::BusInterface;
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum StatusReadContext {
    HardwareInterruptHandler,
    Brk,
    PushStack,
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusFlags {
    pub negative: bool,
    pub overflow: bool,
    pub decimal: bool,
    pub interrupt_disable: bool,
    pub zero: bool,
    pub carry: bool,
}

impl StatusFlags {
    #[must_use]
    pub fn new() -> Self {
        // I defaults to 1 at power-on, everything else to 0
        Self {
            negative: false,
            overflow: false,
            decimal: false,
            interrupt_disable: true,
            zero: false,
            carry: false,
        }
    }

    #[must_use]
    pub fn to_byte(self, read_ctx: StatusReadContext) -> u8 {
        // B flag reads as set during BRK and PHP/PHA pushes, clear inside NMI/IRQ handlers
        let b_flag = match read_ctx {
            StatusReadContext::Brk | StatusReadContext::PushStack => 0x10,
            StatusReadContext::HardwareInterruptHandler => 0x00,
        };

        // Bit 5 is unused and always reads as 1
        (u8::from(self.negative) << 7)
            | (u8::from(self.overflow) << 6)
            | 0x20
            | b_flag
            | (u8::from(self.decimal) << 3)
            | (u8::from(self.interrupt_disable) << 2)
            | (u8::from(self.zero) << 1)
            | u8::from(self.carry)
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            negative: byte.bit(7),
            overflow: byte.bit(6),
            decimal: byte.bit(3),
            interrupt_disable: byte.bit(2),
            zero: byte.bit(1),
            carry: byte.bit(0),
        }
    }

    pub(crate) fn set_nz(&mut self, value: u8) {
        self.negative = value.bit(7);
        self.zero = value == 0;
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuRegisters {
    pub accumulator: u8,
    pub x: u8,
    pub y: u8,
    pub status: StatusFlags,
    pub pc: u16,
    pub sp: u8,
}

impl CpuRegisters {
    fn new(reset_vector: u16) -> Self {
        Self { accumulator: 0, x: 0, y: 0, status: StatusFlags::new(), pc: reset_vector, sp: 0xFD }
    }
}

/// Which chip in the family is being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Mos6502Variant {
    /// NMOS 6502 with the Ricoh decimal-mode lockout (NES 2A03/2A07): the D flag exists but
    /// ADC/SBC ignore it. Undocumented opcodes are implemented.
    Nes,
    /// NMOS 6502 with working decimal mode.
    Nmos,
    /// CMOS 65C02/65SC02: fixed JMP (indirect) page-cross bug, the extra CMOS opcodes, and all
    /// unassigned opcodes act as NOPs.
    Cmos,
}

impl Mos6502Variant {
    #[must_use]
    pub fn is_cmos(self) -> bool {
        matches!(self, Self::Cmos)
    }

    fn decimal_mode_enabled(self) -> bool {
        !matches!(self, Self::Nes)
    }
}

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Mos6502 {
    registers: CpuRegisters,
    variant: Mos6502Variant,
    frozen: bool,
    nmi_line: bool,
    nmi_pending: bool,
    irq_line: bool,
}

impl Mos6502 {
    /// Create a new CPU with the PC pointing to the RESET vector, read from $FFFC.
    pub fn new<B: BusInterface>(bus: &mut B, variant: Mos6502Variant) -> Self {
        let reset_vector = read_u16(bus, RESET_VECTOR);

        Self {
            registers: CpuRegisters::new(reset_vector),
            variant,
            frozen: false,
            nmi_line: false,
            nmi_pending: false,
            irq_line: false,
        }
    }

    /// Reset the CPU: reload PC from the RESET vector, subtract 3 from SP, set the I flag, and
    /// unfreeze if a KIL opcode froze the core.
    pub fn reset<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.pc = read_u16(bus, RESET_VECTOR);
        self.registers.sp = self.registers.sp.wrapping_sub(3);
        self.registers.status.interrupt_disable = true;
        self.frozen = false;
        self.nmi_pending = false;
    }

    /// Execute one instruction (or service one pending interrupt) and return the number of CPU
    /// cycles consumed.
    pub fn step<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        if self.frozen {
            // KIL halted the CPU; only RESET recovers it
            return 1;
        }

        if self.nmi_pending {
            self.nmi_pending = false;
            return self.service_interrupt(bus, NMI_VECTOR);
        }

        if self.irq_line && !self.registers.status.interrupt_disable {
            return self.service_interrupt(bus, IRQ_VECTOR);
        }

        let opcode = bus.read(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);

        instructions::execute(self, bus, opcode)
    }

    fn service_interrupt<B: BusInterface>(&mut self, bus: &mut B, vector: u16) -> u32 {
        instructions::push_u16(self, bus, self.registers.pc);
        instructions::push(
            self,
            bus,
            self.registers.status.to_byte(StatusReadContext::HardwareInterruptHandler),
        );
        self.registers.status.interrupt_disable = true;
        if self.variant.is_cmos() {
            self.registers.status.decimal = false;
        }
        self.registers.pc = read_u16(bus, vector);
        7
    }

    /// Drive the NMI input. The falling→rising edge latches a pending NMI which is serviced at
    /// the next instruction boundary.
    pub fn set_nmi_line(&mut self, level: bool) {
        if level && !self.nmi_line {
            self.nmi_pending = true;
        }
        self.nmi_line = level;
    }

    /// Drive the (level-sensitive) IRQ input. The caller is responsible for OR-combining its
    /// interrupt sources.
    pub fn set_irq_line(&mut self, level: bool) {
        self.irq_line = level;
    }

    #[inline]
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.registers.pc
    }

    #[must_use]
    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    pub fn set_registers(&mut self, registers: CpuRegisters) {
        self.registers = registers;
    }

    /// Whether the CPU has frozen from a KIL instruction.
    #[inline]
    #[must_use]
    pub fn frozen(&self) -> bool {
        self.frozen
    }
}

pub(crate) fn read_u16<B: BusInterface>(bus: &mut B, address: u16) -> u16 {
    let lsb = bus.read(address);
    let msb = bus.read(address.wrapping_add(1));
    u16::from_le_bytes([lsb, msb])
}
