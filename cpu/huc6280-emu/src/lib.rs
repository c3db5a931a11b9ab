//! Hudson HuC6280 CPU core, the PC Engine CPU
//!
//! A 65C02 derivative with an 8-page MPR banking unit (logical 16-bit addresses map through
//! MPR registers to a 21-bit physical space), block transfer instructions, the `T` flag
//! memory-operand mode, bit manipulation opcodes, and the ST0/ST1/ST2 VDC write shortcuts.
//!
//! Instruction-stepped; [`HuC6280::step`] returns CPU clock cycles at the currently selected
//! speed (the backend scales low-speed cycles by 4).

mod instructions;

use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

pub trait BusInterface {
    /// Read from a 21-bit physical address.
    fn read(&mut self, address: u32) -> u8;

    /// Write to a 21-bit physical address.
    fn write(&mut self, address: u32, value: u8);

    /// ST0/ST1/ST2: direct writes to VDC ports 0/2/3.
    fn st_port(&mut self, port: u8, value: u8);

    /// IRQ1 line (VDC).
    fn irq1(&self) -> bool;

    /// IRQ2 line (CD-ROM / external).
    fn irq2(&self) -> bool;

    /// Timer interrupt line.
    fn timer_irq(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusFlags {
    pub negative: bool,
    pub overflow: bool,
    /// T flag: the next ALU op targets memory at X instead of the accumulator.
    pub memory_operand: bool,
    pub decimal: bool,
    pub interrupt_disable: bool,
    pub zero: bool,
    pub carry: bool,
}

impl StatusFlags {
    fn new() -> Self {
        Self {
            negative: false,
            overflow: false,
            memory_operand: false,
            decimal: false,
            interrupt_disable: true,
            zero: false,
            carry: false,
        }
    }

    #[must_use]
    pub fn to_byte(self, break_flag: bool) -> u8 {
        (u8::from(self.negative) << 7)
            | (u8::from(self.overflow) << 6)
            | (u8::from(self.memory_operand) << 5)
            | (u8::from(break_flag) << 4)
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
            memory_operand: byte.bit(5),
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

#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub p: StatusFlags,
    /// MPR0-7: physical 8KB page per logical 8KB window.
    pub mpr: [u8; 8],
}

const RESET_VECTOR: u16 = 0xFFFE;
const NMI_VECTOR: u16 = 0xFFFC;
const TIMER_VECTOR: u16 = 0xFFFA;
const IRQ1_VECTOR: u16 = 0xFFF8;
const IRQ2_VECTOR: u16 = 0xFFF6;

#[derive(Debug, Clone, Encode, Decode)]
pub struct HuC6280 {
    registers: Registers,
    /// CSL/CSH: low speed divides the clock by 4.
    high_speed: bool,
    mpr_latch: u8,
}

impl HuC6280 {
    pub fn new<B: BusInterface>(bus: &mut B) -> Self {
        let mut cpu = Self {
            registers: Registers {
                a: 0,
                x: 0,
                y: 0,
                sp: 0xFD,
                pc: 0,
                p: StatusFlags::new(),
                // MPR7 resets to page 0 (the first HuCard bank at the top window)
                mpr: [0xFF, 0xF8, 0, 0, 0, 0, 0, 0],
            },
            high_speed: false,
            mpr_latch: 0,
        };
        cpu.registers.mpr[7] = 0x00;
        cpu.registers.pc = cpu.read_u16_logical(bus, RESET_VECTOR);
        cpu
    }

    pub fn reset<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.p.interrupt_disable = true;
        self.registers.p.decimal = false;
        self.registers.p.memory_operand = false;
        self.registers.mpr[7] = 0x00;
        self.high_speed = false;
        self.registers.pc = self.read_u16_logical(bus, RESET_VECTOR);
    }

    /// Translate a 16-bit logical address through the MPRs to 21 bits.
    #[must_use]
    pub fn physical_address(&self, address: u16) -> u32 {
        let mpr = self.registers.mpr[(address >> 13) as usize];
        (u32::from(mpr) << 13) | u32::from(address & 0x1FFF)
    }

    pub(crate) fn read_logical<B: BusInterface>(&mut self, bus: &mut B, address: u16) -> u8 {
        let physical = self.physical_address(address);
        bus.read(physical)
    }

    pub(crate) fn write_logical<B: BusInterface>(&mut self, bus: &mut B, address: u16, value: u8) {
        let physical = self.physical_address(address);
        bus.write(physical, value);
    }

    pub(crate) fn read_u16_logical<B: BusInterface>(&mut self, bus: &mut B, address: u16) -> u16 {
        let lsb = self.read_logical(bus, address);
        let msb = self.read_logical(bus, address.wrapping_add(1));
        u16::from_le_bytes([lsb, msb])
    }

    /// Execute one instruction (or service one interrupt) and return cycles consumed.
    pub fn step<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        // Interrupt priority: timer, IRQ1, IRQ2
        if !self.registers.p.interrupt_disable {
            if bus.timer_irq() {
                return self.service_interrupt(bus, TIMER_VECTOR);
            }
            if bus.irq1() {
                return self.service_interrupt(bus, IRQ1_VECTOR);
            }
            if bus.irq2() {
                return self.service_interrupt(bus, IRQ2_VECTOR);
            }
        }

        let opcode = self.fetch(bus);
        instructions::execute(self, bus, opcode)
    }

    fn service_interrupt<B: BusInterface>(&mut self, bus: &mut B, vector: u16) -> u32 {
        let pc = self.registers.pc;
        self.push(bus, (pc >> 8) as u8);
        self.push(bus, pc as u8);
        let p = self.registers.p.to_byte(false);
        self.push(bus, p);
        self.registers.p.interrupt_disable = true;
        self.registers.p.decimal = false;
        self.registers.p.memory_operand = false;
        self.registers.pc = self.read_u16_logical(bus, vector);
        8
    }

    pub(crate) fn fetch<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let value = self.read_logical(bus, self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        value
    }

    pub(crate) fn fetch_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = self.fetch(bus);
        let msb = self.fetch(bus);
        u16::from_le_bytes([lsb, msb])
    }

    pub(crate) fn push<B: BusInterface>(&mut self, bus: &mut B, value: u8) {
        // The stack lives in the zero-page region at logical $2100-$21FF
        self.write_logical(bus, 0x2100 | u16::from(self.registers.sp), value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    pub(crate) fn pull<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        self.read_logical(bus, 0x2100 | u16::from(self.registers.sp))
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    #[must_use]
    pub fn is_high_speed(&self) -> bool {
        self.high_speed
    }

    pub(crate) fn set_speed(&mut self, high: bool) {
        self.high_speed = high;
    }

    pub(crate) fn set_mpr_latch(&mut self, value: u8) {
        self.mpr_latch = value;
    }

    pub(crate) fn mpr_latch(&self) -> u8 {
        self.mpr_latch
    }
}
