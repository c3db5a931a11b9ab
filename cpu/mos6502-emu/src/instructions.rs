//! Instruction decode and execution
//!
//! One 256-entry decode (plus the CMOS overlay) mapping each opcode to an operation and an
//! addressing mode. Cycle counts follow the documented timings, with the +1 penalties for
//! page-crossing indexed reads and taken branches applied where the hardware applies them.

use crate::bus::BusInterface;
use crate::{Mos6502, StatusReadContext, read_u16};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    IndirectX,
    IndirectY,
    // 65C02 (zp) addressing
    ZeroPageIndirect,
}

struct Operand {
    address: u16,
    page_crossed: bool,
}

fn resolve<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, mode: Mode) -> Operand {
    let registers = &mut cpu.registers;
    match mode {
        Mode::Immediate => {
            let address = registers.pc;
            registers.pc = registers.pc.wrapping_add(1);
            Operand { address, page_crossed: false }
        }
        Mode::ZeroPage => {
            let address = bus.read(registers.pc).into();
            registers.pc = registers.pc.wrapping_add(1);
            Operand { address, page_crossed: false }
        }
        Mode::ZeroPageX => {
            let base = bus.read(registers.pc);
            registers.pc = registers.pc.wrapping_add(1);
            Operand { address: base.wrapping_add(registers.x).into(), page_crossed: false }
        }
        Mode::ZeroPageY => {
            let base = bus.read(registers.pc);
            registers.pc = registers.pc.wrapping_add(1);
            Operand { address: base.wrapping_add(registers.y).into(), page_crossed: false }
        }
        Mode::Absolute => {
            let address = read_u16(bus, registers.pc);
            registers.pc = registers.pc.wrapping_add(2);
            Operand { address, page_crossed: false }
        }
        Mode::AbsoluteX => {
            let base = read_u16(bus, registers.pc);
            registers.pc = registers.pc.wrapping_add(2);
            let address = base.wrapping_add(registers.x.into());
            Operand { address, page_crossed: address & 0xFF00 != base & 0xFF00 }
        }
        Mode::AbsoluteY => {
            let base = read_u16(bus, registers.pc);
            registers.pc = registers.pc.wrapping_add(2);
            let address = base.wrapping_add(registers.y.into());
            Operand { address, page_crossed: address & 0xFF00 != base & 0xFF00 }
        }
        Mode::IndirectX => {
            let pointer = bus.read(registers.pc).wrapping_add(registers.x);
            registers.pc = registers.pc.wrapping_add(1);
            let lsb = bus.read(pointer.into());
            let msb = bus.read(pointer.wrapping_add(1).into());
            Operand { address: u16::from_le_bytes([lsb, msb]), page_crossed: false }
        }
        Mode::IndirectY => {
            let pointer = bus.read(registers.pc);
            registers.pc = registers.pc.wrapping_add(1);
            let lsb = bus.read(pointer.into());
            let msb = bus.read(pointer.wrapping_add(1).into());
            let base = u16::from_le_bytes([lsb, msb]);
            let address = base.wrapping_add(registers.y.into());
            Operand { address, page_crossed: address & 0xFF00 != base & 0xFF00 }
        }
        Mode::ZeroPageIndirect => {
            let pointer = bus.read(registers.pc);
            registers.pc = registers.pc.wrapping_add(1);
            let lsb = bus.read(pointer.into());
            let msb = bus.read(pointer.wrapping_add(1).into());
            Operand { address: u16::from_le_bytes([lsb, msb]), page_crossed: false }
        }
    }
}

fn read_cycles(mode: Mode) -> u32 {
    match mode {
        Mode::Immediate => 2,
        Mode::ZeroPage => 3,
        Mode::ZeroPageX | Mode::ZeroPageY | Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY => 4,
        Mode::IndirectY | Mode::ZeroPageIndirect => 5,
        Mode::IndirectX => 6,
    }
}

fn store_cycles(mode: Mode) -> u32 {
    match mode {
        Mode::ZeroPage => 3,
        Mode::ZeroPageX | Mode::ZeroPageY | Mode::Absolute => 4,
        Mode::AbsoluteX | Mode::AbsoluteY | Mode::ZeroPageIndirect => 5,
        Mode::IndirectX | Mode::IndirectY => 6,
        Mode::Immediate => 2,
    }
}

fn rmw_cycles(mode: Mode) -> u32 {
    match mode {
        Mode::ZeroPage => 5,
        Mode::ZeroPageX | Mode::ZeroPageY | Mode::Absolute => 6,
        Mode::AbsoluteX | Mode::AbsoluteY => 7,
        Mode::IndirectX | Mode::IndirectY => 8,
        Mode::Immediate | Mode::ZeroPageIndirect => 2,
    }
}

pub(crate) fn push<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, value: u8) {
    bus.write(0x0100 | u16::from(cpu.registers.sp), value);
    cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
}

pub(crate) fn push_u16<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, value: u16) {
    let [lsb, msb] = value.to_le_bytes();
    push(cpu, bus, msb);
    push(cpu, bus, lsb);
}

fn pull<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B) -> u8 {
    cpu.registers.sp = cpu.registers.sp.wrapping_add(1);
    bus.read(0x0100 | u16::from(cpu.registers.sp))
}

fn pull_u16<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B) -> u16 {
    let lsb = pull(cpu, bus);
    let msb = pull(cpu, bus);
    u16::from_le_bytes([lsb, msb])
}

// ALU helpers -------------------------------------------------------------------------------

fn add_with_carry(cpu: &mut Mos6502, value: u8) {
    let status = &mut cpu.registers.status;
    let a = cpu.registers.accumulator;

    if status.decimal && cpu.variant.decimal_mode_enabled() {
        // NMOS BCD addition: N/V/Z are computed from the binary intermediate
        let binary = u16::from(a) + u16::from(value) + u16::from(status.carry);
        let mut lo = (a & 0x0F) + (value & 0x0F) + u8::from(status.carry);
        let mut hi = u16::from(a >> 4) + u16::from(value >> 4);
        if lo > 9 {
            lo = (lo + 6) & 0x0F;
            hi += 1;
        }
        status.zero = binary as u8 == 0;
        status.negative = (hi as u8) & 0x08 != 0;
        status.overflow = ((u16::from(a) ^ (hi << 4)) & !(u16::from(a) ^ u16::from(value))) & 0x80 != 0;
        if hi > 9 {
            hi += 6;
        }
        status.carry = hi > 15;
        cpu.registers.accumulator = ((hi as u8) << 4) | lo;
    } else {
        let sum = u16::from(a) + u16::from(value) + u16::from(status.carry);
        let result = sum as u8;
        status.carry = sum > 0xFF;
        status.overflow = (a ^ result) & (value ^ result) & 0x80 != 0;
        status.set_nz(result);
        cpu.registers.accumulator = result;
    }
}

fn subtract_with_carry(cpu: &mut Mos6502, value: u8) {
    if cpu.registers.status.decimal && cpu.variant.decimal_mode_enabled() {
        let status = &mut cpu.registers.status;
        let a = cpu.registers.accumulator;
        let borrow = u8::from(!status.carry);

        let binary = u16::from(a).wrapping_sub(u16::from(value)).wrapping_sub(borrow.into());
        let mut lo = (a & 0x0F).wrapping_sub(value & 0x0F).wrapping_sub(borrow) as i16;
        let mut hi = i16::from(a >> 4) - i16::from(value >> 4);
        if lo < 0 {
            lo += 10;
            hi -= 1;
        }
        if hi < 0 {
            hi += 10;
        }

        let result = binary as u8;
        status.carry = binary < 0x100;
        status.overflow = (a ^ result) & (!value ^ result) & 0x80 != 0;
        status.set_nz(result);
        cpu.registers.accumulator = (((hi as u8) & 0x0F) << 4) | ((lo as u8) & 0x0F);
    } else {
        // SBC is ADC of the one's complement
        add_with_carry(cpu, !value);
    }
}

fn compare(cpu: &mut Mos6502, register: u8, value: u8) {
    let status = &mut cpu.registers.status;
    status.carry = register >= value;
    status.set_nz(register.wrapping_sub(value));
}

fn asl(cpu: &mut Mos6502, value: u8) -> u8 {
    cpu.registers.status.carry = value & 0x80 != 0;
    let result = value << 1;
    cpu.registers.status.set_nz(result);
    result
}

fn lsr(cpu: &mut Mos6502, value: u8) -> u8 {
    cpu.registers.status.carry = value & 0x01 != 0;
    let result = value >> 1;
    cpu.registers.status.set_nz(result);
    result
}

fn rol(cpu: &mut Mos6502, value: u8) -> u8 {
    let carry_in = u8::from(cpu.registers.status.carry);
    cpu.registers.status.carry = value & 0x80 != 0;
    let result = (value << 1) | carry_in;
    cpu.registers.status.set_nz(result);
    result
}

fn ror(cpu: &mut Mos6502, value: u8) -> u8 {
    let carry_in = u8::from(cpu.registers.status.carry) << 7;
    cpu.registers.status.carry = value & 0x01 != 0;
    let result = (value >> 1) | carry_in;
    cpu.registers.status.set_nz(result);
    result
}

// Execution templates -----------------------------------------------------------------------

fn read_op<B: BusInterface>(
    cpu: &mut Mos6502,
    bus: &mut B,
    mode: Mode,
    op: impl FnOnce(&mut Mos6502, u8),
) -> u32 {
    let operand = resolve(cpu, bus, mode);
    let value = bus.read(operand.address);
    op(cpu, value);
    read_cycles(mode) + u32::from(operand.page_crossed)
}

fn store_op<B: BusInterface>(
    cpu: &mut Mos6502,
    bus: &mut B,
    mode: Mode,
    value: impl FnOnce(&Mos6502) -> u8,
) -> u32 {
    let operand = resolve(cpu, bus, mode);
    let value = value(cpu);
    bus.write(operand.address, value);
    store_cycles(mode)
}

fn modify_op<B: BusInterface>(
    cpu: &mut Mos6502,
    bus: &mut B,
    mode: Mode,
    op: impl FnOnce(&mut Mos6502, u8) -> u8,
) -> u32 {
    let operand = resolve(cpu, bus, mode);
    let value = bus.read(operand.address);
    // RMW instructions write the unmodified value back before the modified one; mappers that
    // decode writes (MMC1 especially) depend on seeing both
    bus.write(operand.address, value);
    let result = op(cpu, value);
    bus.write(operand.address, result);
    rmw_cycles(mode)
}

fn branch<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, condition: bool) -> u32 {
    let offset = bus.read(cpu.registers.pc) as i8;
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);

    if !condition {
        return 2;
    }

    let target = cpu.registers.pc.wrapping_add(offset as u16);
    let page_crossed = target & 0xFF00 != cpu.registers.pc & 0xFF00;
    cpu.registers.pc = target;
    3 + u32::from(page_crossed)
}

fn bit_test(cpu: &mut Mos6502, value: u8) {
    let status = &mut cpu.registers.status;
    status.negative = value & 0x80 != 0;
    status.overflow = value & 0x40 != 0;
    status.zero = cpu.registers.accumulator & value == 0;
}

pub(crate) fn execute<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> u32 {
    use Mode::*;

    match opcode {
        // ORA
        0x09 => read_op(cpu, bus, Immediate, ora),
        0x05 => read_op(cpu, bus, ZeroPage, ora),
        0x15 => read_op(cpu, bus, ZeroPageX, ora),
        0x0D => read_op(cpu, bus, Absolute, ora),
        0x1D => read_op(cpu, bus, AbsoluteX, ora),
        0x19 => read_op(cpu, bus, AbsoluteY, ora),
        0x01 => read_op(cpu, bus, IndirectX, ora),
        0x11 => read_op(cpu, bus, IndirectY, ora),

        // AND
        0x29 => read_op(cpu, bus, Immediate, and),
        0x25 => read_op(cpu, bus, ZeroPage, and),
        0x35 => read_op(cpu, bus, ZeroPageX, and),
        0x2D => read_op(cpu, bus, Absolute, and),
        0x3D => read_op(cpu, bus, AbsoluteX, and),
        0x39 => read_op(cpu, bus, AbsoluteY, and),
        0x21 => read_op(cpu, bus, IndirectX, and),
        0x31 => read_op(cpu, bus, IndirectY, and),

        // EOR
        0x49 => read_op(cpu, bus, Immediate, eor),
        0x45 => read_op(cpu, bus, ZeroPage, eor),
        0x55 => read_op(cpu, bus, ZeroPageX, eor),
        0x4D => read_op(cpu, bus, Absolute, eor),
        0x5D => read_op(cpu, bus, AbsoluteX, eor),
        0x59 => read_op(cpu, bus, AbsoluteY, eor),
        0x41 => read_op(cpu, bus, IndirectX, eor),
        0x51 => read_op(cpu, bus, IndirectY, eor),

        // ADC
        0x69 => read_op(cpu, bus, Immediate, add_with_carry),
        0x65 => read_op(cpu, bus, ZeroPage, add_with_carry),
        0x75 => read_op(cpu, bus, ZeroPageX, add_with_carry),
        0x6D => read_op(cpu, bus, Absolute, add_with_carry),
        0x7D => read_op(cpu, bus, AbsoluteX, add_with_carry),
        0x79 => read_op(cpu, bus, AbsoluteY, add_with_carry),
        0x61 => read_op(cpu, bus, IndirectX, add_with_carry),
        0x71 => read_op(cpu, bus, IndirectY, add_with_carry),

        // SBC
        0xE9 => read_op(cpu, bus, Immediate, subtract_with_carry),
        0xE5 => read_op(cpu, bus, ZeroPage, subtract_with_carry),
        0xF5 => read_op(cpu, bus, ZeroPageX, subtract_with_carry),
        0xED => read_op(cpu, bus, Absolute, subtract_with_carry),
        0xFD => read_op(cpu, bus, AbsoluteX, subtract_with_carry),
        0xF9 => read_op(cpu, bus, AbsoluteY, subtract_with_carry),
        0xE1 => read_op(cpu, bus, IndirectX, subtract_with_carry),
        0xF1 => read_op(cpu, bus, IndirectY, subtract_with_carry),

        // CMP / CPX / CPY
        0xC9 => read_op(cpu, bus, Immediate, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) }),
        0xC5 => read_op(cpu, bus, ZeroPage, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) }),
        0xD5 => read_op(cpu, bus, ZeroPageX, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) }),
        0xCD => read_op(cpu, bus, Absolute, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) }),
        0xDD => read_op(cpu, bus, AbsoluteX, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) }),
        0xD9 => read_op(cpu, bus, AbsoluteY, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) }),
        0xC1 => read_op(cpu, bus, IndirectX, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) }),
        0xD1 => read_op(cpu, bus, IndirectY, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) }),
        0xE0 => read_op(cpu, bus, Immediate, |cpu, v| { let x = cpu.registers.x; compare(cpu, x, v) }),
        0xE4 => read_op(cpu, bus, ZeroPage, |cpu, v| { let x = cpu.registers.x; compare(cpu, x, v) }),
        0xEC => read_op(cpu, bus, Absolute, |cpu, v| { let x = cpu.registers.x; compare(cpu, x, v) }),
        0xC0 => read_op(cpu, bus, Immediate, |cpu, v| { let y = cpu.registers.y; compare(cpu, y, v) }),
        0xC4 => read_op(cpu, bus, ZeroPage, |cpu, v| { let y = cpu.registers.y; compare(cpu, y, v) }),
        0xCC => read_op(cpu, bus, Absolute, |cpu, v| { let y = cpu.registers.y; compare(cpu, y, v) }),

        // BIT
        0x24 => read_op(cpu, bus, ZeroPage, bit_test),
        0x2C => read_op(cpu, bus, Absolute, bit_test),

        // Loads
        0xA9 => read_op(cpu, bus, Immediate, lda),
        0xA5 => read_op(cpu, bus, ZeroPage, lda),
        0xB5 => read_op(cpu, bus, ZeroPageX, lda),
        0xAD => read_op(cpu, bus, Absolute, lda),
        0xBD => read_op(cpu, bus, AbsoluteX, lda),
        0xB9 => read_op(cpu, bus, AbsoluteY, lda),
        0xA1 => read_op(cpu, bus, IndirectX, lda),
        0xB1 => read_op(cpu, bus, IndirectY, lda),
        0xA2 => read_op(cpu, bus, Immediate, ldx),
        0xA6 => read_op(cpu, bus, ZeroPage, ldx),
        0xB6 => read_op(cpu, bus, ZeroPageY, ldx),
        0xAE => read_op(cpu, bus, Absolute, ldx),
        0xBE => read_op(cpu, bus, AbsoluteY, ldx),
        0xA0 => read_op(cpu, bus, Immediate, ldy),
        0xA4 => read_op(cpu, bus, ZeroPage, ldy),
        0xB4 => read_op(cpu, bus, ZeroPageX, ldy),
        0xAC => read_op(cpu, bus, Absolute, ldy),
        0xBC => read_op(cpu, bus, AbsoluteX, ldy),

        // Stores
        0x85 => store_op(cpu, bus, ZeroPage, |cpu| cpu.registers.accumulator),
        0x95 => store_op(cpu, bus, ZeroPageX, |cpu| cpu.registers.accumulator),
        0x8D => store_op(cpu, bus, Absolute, |cpu| cpu.registers.accumulator),
        0x9D => store_op(cpu, bus, AbsoluteX, |cpu| cpu.registers.accumulator),
        0x99 => store_op(cpu, bus, AbsoluteY, |cpu| cpu.registers.accumulator),
        0x81 => store_op(cpu, bus, IndirectX, |cpu| cpu.registers.accumulator),
        0x91 => store_op(cpu, bus, IndirectY, |cpu| cpu.registers.accumulator),
        0x86 => store_op(cpu, bus, ZeroPage, |cpu| cpu.registers.x),
        0x96 => store_op(cpu, bus, ZeroPageY, |cpu| cpu.registers.x),
        0x8E => store_op(cpu, bus, Absolute, |cpu| cpu.registers.x),
        0x84 => store_op(cpu, bus, ZeroPage, |cpu| cpu.registers.y),
        0x94 => store_op(cpu, bus, ZeroPageX, |cpu| cpu.registers.y),
        0x8C => store_op(cpu, bus, Absolute, |cpu| cpu.registers.y),

        // Shifts / rotates
        0x0A => accumulator_op(cpu, asl),
        0x06 => modify_op(cpu, bus, ZeroPage, asl),
        0x16 => modify_op(cpu, bus, ZeroPageX, asl),
        0x0E => modify_op(cpu, bus, Absolute, asl),
        0x1E => modify_op(cpu, bus, AbsoluteX, asl),
        0x4A => accumulator_op(cpu, lsr),
        0x46 => modify_op(cpu, bus, ZeroPage, lsr),
        0x56 => modify_op(cpu, bus, ZeroPageX, lsr),
        0x4E => modify_op(cpu, bus, Absolute, lsr),
        0x5E => modify_op(cpu, bus, AbsoluteX, lsr),
        0x2A => accumulator_op(cpu, rol),
        0x26 => modify_op(cpu, bus, ZeroPage, rol),
        0x36 => modify_op(cpu, bus, ZeroPageX, rol),
        0x2E => modify_op(cpu, bus, Absolute, rol),
        0x3E => modify_op(cpu, bus, AbsoluteX, rol),
        0x6A => accumulator_op(cpu, ror),
        0x66 => modify_op(cpu, bus, ZeroPage, ror),
        0x76 => modify_op(cpu, bus, ZeroPageX, ror),
        0x6E => modify_op(cpu, bus, Absolute, ror),
        0x7E => modify_op(cpu, bus, AbsoluteX, ror),

        // INC / DEC
        0xE6 => modify_op(cpu, bus, ZeroPage, inc),
        0xF6 => modify_op(cpu, bus, ZeroPageX, inc),
        0xEE => modify_op(cpu, bus, Absolute, inc),
        0xFE => modify_op(cpu, bus, AbsoluteX, inc),
        0xC6 => modify_op(cpu, bus, ZeroPage, dec),
        0xD6 => modify_op(cpu, bus, ZeroPageX, dec),
        0xCE => modify_op(cpu, bus, Absolute, dec),
        0xDE => modify_op(cpu, bus, AbsoluteX, dec),

        // Register transfers / increments
        0xAA => {
            let value = cpu.registers.accumulator;
            cpu.registers.x = value;
            cpu.registers.status.set_nz(value);
            2
        }
        0x8A => {
            let value = cpu.registers.x;
            cpu.registers.accumulator = value;
            cpu.registers.status.set_nz(value);
            2
        }
        0xA8 => {
            let value = cpu.registers.accumulator;
            cpu.registers.y = value;
            cpu.registers.status.set_nz(value);
            2
        }
        0x98 => {
            let value = cpu.registers.y;
            cpu.registers.accumulator = value;
            cpu.registers.status.set_nz(value);
            2
        }
        0xBA => {
            let value = cpu.registers.sp;
            cpu.registers.x = value;
            cpu.registers.status.set_nz(value);
            2
        }
        0x9A => {
            cpu.registers.sp = cpu.registers.x;
            2
        }
        0xE8 => {
            let value = cpu.registers.x.wrapping_add(1);
            cpu.registers.x = value;
            cpu.registers.status.set_nz(value);
            2
        }
        0xC8 => {
            let value = cpu.registers.y.wrapping_add(1);
            cpu.registers.y = value;
            cpu.registers.status.set_nz(value);
            2
        }
        0xCA => {
            let value = cpu.registers.x.wrapping_sub(1);
            cpu.registers.x = value;
            cpu.registers.status.set_nz(value);
            2
        }
        0x88 => {
            let value = cpu.registers.y.wrapping_sub(1);
            cpu.registers.y = value;
            cpu.registers.status.set_nz(value);
            2
        }

        // Flag operations
        0x18 => {
            cpu.registers.status.carry = false;
            2
        }
        0x38 => {
            cpu.registers.status.carry = true;
            2
        }
        0x58 => {
            cpu.registers.status.interrupt_disable = false;
            2
        }
        0x78 => {
            cpu.registers.status.interrupt_disable = true;
            2
        }
        0xB8 => {
            cpu.registers.status.overflow = false;
            2
        }
        0xD8 => {
            cpu.registers.status.decimal = false;
            2
        }
        0xF8 => {
            cpu.registers.status.decimal = true;
            2
        }

        // Stack
        0x48 => {
            let value = cpu.registers.accumulator;
            push(cpu, bus, value);
            3
        }
        0x68 => {
            let value = pull(cpu, bus);
            cpu.registers.accumulator = value;
            cpu.registers.status.set_nz(value);
            4
        }
        0x08 => {
            let value = cpu.registers.status.to_byte(StatusReadContext::PushStack);
            push(cpu, bus, value);
            3
        }
        0x28 => {
            let value = pull(cpu, bus);
            cpu.registers.status = crate::StatusFlags::from_byte(value);
            4
        }

        // Jumps / subroutines
        0x4C => {
            cpu.registers.pc = read_u16(bus, cpu.registers.pc);
            3
        }
        0x6C => {
            let pointer = read_u16(bus, cpu.registers.pc);
            cpu.registers.pc = if cpu.variant.is_cmos() {
                read_u16(bus, pointer)
            } else {
                // NMOS bug: the pointer high byte does not carry across a page boundary
                let lsb = bus.read(pointer);
                let msb = bus.read((pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF));
                u16::from_le_bytes([lsb, msb])
            };
            if cpu.variant.is_cmos() { 6 } else { 5 }
        }
        0x20 => {
            let target = read_u16(bus, cpu.registers.pc);
            // JSR pushes the address of its own last byte
            push_u16(cpu, bus, cpu.registers.pc.wrapping_add(1));
            cpu.registers.pc = target;
            6
        }
        0x60 => {
            cpu.registers.pc = pull_u16(cpu, bus).wrapping_add(1);
            6
        }
        0x40 => {
            let status = pull(cpu, bus);
            cpu.registers.status = crate::StatusFlags::from_byte(status);
            cpu.registers.pc = pull_u16(cpu, bus);
            6
        }
        0x00 => {
            // BRK pushes PC+2 (one byte past the padding byte)
            push_u16(cpu, bus, cpu.registers.pc.wrapping_add(1));
            push(cpu, bus, cpu.registers.status.to_byte(StatusReadContext::Brk));
            cpu.registers.status.interrupt_disable = true;
            if cpu.variant.is_cmos() {
                cpu.registers.status.decimal = false;
            }
            cpu.registers.pc = read_u16(bus, crate::IRQ_VECTOR);
            7
        }

        // Branches
        0x10 => branch(cpu, bus, !cpu.registers.status.negative),
        0x30 => branch(cpu, bus, cpu.registers.status.negative),
        0x50 => branch(cpu, bus, !cpu.registers.status.overflow),
        0x70 => branch(cpu, bus, cpu.registers.status.overflow),
        0x90 => branch(cpu, bus, !cpu.registers.status.carry),
        0xB0 => branch(cpu, bus, cpu.registers.status.carry),
        0xD0 => branch(cpu, bus, !cpu.registers.status.zero),
        0xF0 => branch(cpu, bus, cpu.registers.status.zero),

        0xEA => 2,

        _ if cpu.variant.is_cmos() => execute_cmos(cpu, bus, opcode),
        _ => execute_undocumented(cpu, bus, opcode),
    }
}

fn accumulator_op(cpu: &mut Mos6502, op: impl FnOnce(&mut Mos6502, u8) -> u8) -> u32 {
    let value = cpu.registers.accumulator;
    cpu.registers.accumulator = op(cpu, value);
    2
}

fn ora(cpu: &mut Mos6502, value: u8) {
    cpu.registers.accumulator |= value;
    cpu.registers.status.set_nz(cpu.registers.accumulator);
}

fn and(cpu: &mut Mos6502, value: u8) {
    cpu.registers.accumulator &= value;
    cpu.registers.status.set_nz(cpu.registers.accumulator);
}

fn eor(cpu: &mut Mos6502, value: u8) {
    cpu.registers.accumulator ^= value;
    cpu.registers.status.set_nz(cpu.registers.accumulator);
}

fn lda(cpu: &mut Mos6502, value: u8) {
    cpu.registers.accumulator = value;
    cpu.registers.status.set_nz(value);
}

fn ldx(cpu: &mut Mos6502, value: u8) {
    cpu.registers.x = value;
    cpu.registers.status.set_nz(value);
}

fn ldy(cpu: &mut Mos6502, value: u8) {
    cpu.registers.y = value;
    cpu.registers.status.set_nz(value);
}

fn inc(cpu: &mut Mos6502, value: u8) -> u8 {
    let result = value.wrapping_add(1);
    cpu.registers.status.set_nz(result);
    result
}

fn dec(cpu: &mut Mos6502, value: u8) -> u8 {
    let result = value.wrapping_sub(1);
    cpu.registers.status.set_nz(result);
    result
}

// Undocumented NMOS opcodes -----------------------------------------------------------------

fn execute_undocumented<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> u32 {
    use Mode::*;

    match opcode {
        // LAX: LDA + LDX
        0xA7 => read_op(cpu, bus, ZeroPage, lax),
        0xB7 => read_op(cpu, bus, ZeroPageY, lax),
        0xAF => read_op(cpu, bus, Absolute, lax),
        0xBF => read_op(cpu, bus, AbsoluteY, lax),
        0xA3 => read_op(cpu, bus, IndirectX, lax),
        0xB3 => read_op(cpu, bus, IndirectY, lax),
        // LAX immediate is unstable on hardware; the common observed behavior is plain LDA+TAX
        0xAB => read_op(cpu, bus, Immediate, lax),

        // SAX: store A & X
        0x87 => store_op(cpu, bus, ZeroPage, |cpu| cpu.registers.accumulator & cpu.registers.x),
        0x97 => store_op(cpu, bus, ZeroPageY, |cpu| cpu.registers.accumulator & cpu.registers.x),
        0x8F => store_op(cpu, bus, Absolute, |cpu| cpu.registers.accumulator & cpu.registers.x),
        0x83 => store_op(cpu, bus, IndirectX, |cpu| cpu.registers.accumulator & cpu.registers.x),

        // SLO: ASL then ORA
        0x07 => modify_op(cpu, bus, ZeroPage, slo),
        0x17 => modify_op(cpu, bus, ZeroPageX, slo),
        0x0F => modify_op(cpu, bus, Absolute, slo),
        0x1F => modify_op(cpu, bus, AbsoluteX, slo),
        0x1B => modify_op(cpu, bus, AbsoluteY, slo),
        0x03 => modify_op(cpu, bus, IndirectX, slo),
        0x13 => modify_op(cpu, bus, IndirectY, slo),

        // RLA: ROL then AND
        0x27 => modify_op(cpu, bus, ZeroPage, rla),
        0x37 => modify_op(cpu, bus, ZeroPageX, rla),
        0x2F => modify_op(cpu, bus, Absolute, rla),
        0x3F => modify_op(cpu, bus, AbsoluteX, rla),
        0x3B => modify_op(cpu, bus, AbsoluteY, rla),
        0x23 => modify_op(cpu, bus, IndirectX, rla),
        0x33 => modify_op(cpu, bus, IndirectY, rla),

        // SRE: LSR then EOR
        0x47 => modify_op(cpu, bus, ZeroPage, sre),
        0x57 => modify_op(cpu, bus, ZeroPageX, sre),
        0x4F => modify_op(cpu, bus, Absolute, sre),
        0x5F => modify_op(cpu, bus, AbsoluteX, sre),
        0x5B => modify_op(cpu, bus, AbsoluteY, sre),
        0x43 => modify_op(cpu, bus, IndirectX, sre),
        0x53 => modify_op(cpu, bus, IndirectY, sre),

        // RRA: ROR then ADC
        0x67 => modify_op(cpu, bus, ZeroPage, rra),
        0x77 => modify_op(cpu, bus, ZeroPageX, rra),
        0x6F => modify_op(cpu, bus, Absolute, rra),
        0x7F => modify_op(cpu, bus, AbsoluteX, rra),
        0x7B => modify_op(cpu, bus, AbsoluteY, rra),
        0x63 => modify_op(cpu, bus, IndirectX, rra),
        0x73 => modify_op(cpu, bus, IndirectY, rra),

        // DCP: DEC then CMP
        0xC7 => modify_op(cpu, bus, ZeroPage, dcp),
        0xD7 => modify_op(cpu, bus, ZeroPageX, dcp),
        0xCF => modify_op(cpu, bus, Absolute, dcp),
        0xDF => modify_op(cpu, bus, AbsoluteX, dcp),
        0xDB => modify_op(cpu, bus, AbsoluteY, dcp),
        0xC3 => modify_op(cpu, bus, IndirectX, dcp),
        0xD3 => modify_op(cpu, bus, IndirectY, dcp),

        // ISC: INC then SBC
        0xE7 => modify_op(cpu, bus, ZeroPage, isc),
        0xF7 => modify_op(cpu, bus, ZeroPageX, isc),
        0xEF => modify_op(cpu, bus, Absolute, isc),
        0xFF => modify_op(cpu, bus, AbsoluteX, isc),
        0xFB => modify_op(cpu, bus, AbsoluteY, isc),
        0xE3 => modify_op(cpu, bus, IndirectX, isc),
        0xF3 => modify_op(cpu, bus, IndirectY, isc),

        // ANC: AND immediate, carry = bit 7
        0x0B | 0x2B => read_op(cpu, bus, Immediate, |cpu, v| {
            and(cpu, v);
            cpu.registers.status.carry = cpu.registers.accumulator & 0x80 != 0;
        }),

        // ALR: AND immediate then LSR A
        0x4B => read_op(cpu, bus, Immediate, |cpu, v| {
            and(cpu, v);
            let a = cpu.registers.accumulator;
            cpu.registers.accumulator = lsr(cpu, a);
        }),

        // ARR: AND immediate then ROR A with the ADC-like flag behavior
        0x6B => read_op(cpu, bus, Immediate, |cpu, v| {
            let and_result = cpu.registers.accumulator & v;
            let result = (and_result >> 1) | (u8::from(cpu.registers.status.carry) << 7);
            cpu.registers.accumulator = result;
            let status = &mut cpu.registers.status;
            status.set_nz(result);
            status.carry = result & 0x40 != 0;
            status.overflow = ((result >> 6) ^ (result >> 5)) & 0x01 != 0;
        }),

        // SBX (AXS): X = (A & X) - immediate
        0xCB => read_op(cpu, bus, Immediate, |cpu, v| {
            let and_result = cpu.registers.accumulator & cpu.registers.x;
            cpu.registers.status.carry = and_result >= v;
            cpu.registers.x = and_result.wrapping_sub(v);
            cpu.registers.status.set_nz(cpu.registers.x);
        }),

        // XAA: unstable; the commonly observed constant is $EE
        0x8B => read_op(cpu, bus, Immediate, |cpu, v| {
            let result = (cpu.registers.accumulator | 0xEE) & cpu.registers.x & v;
            cpu.registers.accumulator = result;
            cpu.registers.status.set_nz(result);
        }),

        // SBC mirror
        0xEB => read_op(cpu, bus, Immediate, subtract_with_carry),

        // SHY / SHX / AHX / TAS / LAS: the "store register AND high-byte+1" group
        0x9C => high_byte_and_store(cpu, bus, Mode::AbsoluteX, |cpu| cpu.registers.y),
        0x9E => high_byte_and_store(cpu, bus, Mode::AbsoluteY, |cpu| cpu.registers.x),
        0x9F => high_byte_and_store(cpu, bus, Mode::AbsoluteY, |cpu| {
            cpu.registers.accumulator & cpu.registers.x
        }),
        0x93 => high_byte_and_store(cpu, bus, Mode::IndirectY, |cpu| {
            cpu.registers.accumulator & cpu.registers.x
        }),
        0x9B => {
            cpu.registers.sp = cpu.registers.accumulator & cpu.registers.x;
            high_byte_and_store(cpu, bus, Mode::AbsoluteY, |cpu| cpu.registers.sp)
        }
        0xBB => read_op(cpu, bus, AbsoluteY, |cpu, v| {
            let result = v & cpu.registers.sp;
            cpu.registers.accumulator = result;
            cpu.registers.x = result;
            cpu.registers.sp = result;
            cpu.registers.status.set_nz(result);
        }),

        // Multi-byte NOPs
        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => {
            cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
            2
        }
        0x04 | 0x44 | 0x64 => {
            let operand = resolve(cpu, bus, ZeroPage);
            bus.read(operand.address);
            3
        }
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => {
            let operand = resolve(cpu, bus, ZeroPageX);
            bus.read(operand.address);
            4
        }
        0x0C => {
            let operand = resolve(cpu, bus, Absolute);
            bus.read(operand.address);
            4
        }
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => {
            let operand = resolve(cpu, bus, AbsoluteX);
            bus.read(operand.address);
            4 + u32::from(operand.page_crossed)
        }
        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => 2,

        // KIL: the CPU wedges until reset
        0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2 => {
            cpu.frozen = true;
            cpu.registers.pc = cpu.registers.pc.wrapping_sub(1);
            1
        }

        _ => unreachable!("all 256 opcodes are covered"),
    }
}

fn lax(cpu: &mut Mos6502, value: u8) {
    cpu.registers.accumulator = value;
    cpu.registers.x = value;
    cpu.registers.status.set_nz(value);
}

fn slo(cpu: &mut Mos6502, value: u8) -> u8 {
    let result = asl(cpu, value);
    ora(cpu, result);
    result
}

fn rla(cpu: &mut Mos6502, value: u8) -> u8 {
    let result = rol(cpu, value);
    and(cpu, result);
    result
}

fn sre(cpu: &mut Mos6502, value: u8) -> u8 {
    let result = lsr(cpu, value);
    eor(cpu, result);
    result
}

fn rra(cpu: &mut Mos6502, value: u8) -> u8 {
    let result = ror(cpu, value);
    add_with_carry(cpu, result);
    result
}

fn dcp(cpu: &mut Mos6502, value: u8) -> u8 {
    let result = value.wrapping_sub(1);
    compare(cpu, cpu.registers.accumulator, result);
    result
}

fn isc(cpu: &mut Mos6502, value: u8) -> u8 {
    let result = value.wrapping_add(1);
    subtract_with_carry(cpu, result);
    result
}

fn high_byte_and_store<B: BusInterface>(
    cpu: &mut Mos6502,
    bus: &mut B,
    mode: Mode,
    register: impl FnOnce(&Mos6502) -> u8,
) -> u32 {
    let operand = resolve(cpu, bus, mode);
    // These unstable stores AND the register with (address high byte + 1)
    let value = register(cpu) & ((operand.address >> 8) as u8).wrapping_add(1);
    bus.write(operand.address, value);
    match mode {
        Mode::AbsoluteX | Mode::AbsoluteY => 5,
        _ => 6,
    }
}

// 65C02 extensions --------------------------------------------------------------------------

fn execute_cmos<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> u32 {
    use Mode::*;

    match opcode {
        // (zp) addressing for the ALU group
        0x12 => read_op(cpu, bus, ZeroPageIndirect, ora),
        0x32 => read_op(cpu, bus, ZeroPageIndirect, and),
        0x52 => read_op(cpu, bus, ZeroPageIndirect, eor),
        0x72 => read_op(cpu, bus, ZeroPageIndirect, add_with_carry),
        0xF2 => read_op(cpu, bus, ZeroPageIndirect, subtract_with_carry),
        0xB2 => read_op(cpu, bus, ZeroPageIndirect, lda),
        0xD2 => {
            read_op(cpu, bus, ZeroPageIndirect, |cpu, v| { let a = cpu.registers.accumulator; compare(cpu, a, v) })
        }
        0x92 => store_op(cpu, bus, ZeroPageIndirect, |cpu| cpu.registers.accumulator),

        // BRA
        0x80 => branch(cpu, bus, true),

        // Stack ops for X/Y
        0xDA => {
            let value = cpu.registers.x;
            push(cpu, bus, value);
            3
        }
        0x5A => {
            let value = cpu.registers.y;
            push(cpu, bus, value);
            3
        }
        0xFA => {
            let value = pull(cpu, bus);
            cpu.registers.x = value;
            cpu.registers.status.set_nz(value);
            4
        }
        0x7A => {
            let value = pull(cpu, bus);
            cpu.registers.y = value;
            cpu.registers.status.set_nz(value);
            4
        }

        // STZ
        0x64 => store_op(cpu, bus, ZeroPage, |_| 0),
        0x74 => store_op(cpu, bus, ZeroPageX, |_| 0),
        0x9C => store_op(cpu, bus, Absolute, |_| 0),
        0x9E => store_op(cpu, bus, AbsoluteX, |_| 0),

        // INC A / DEC A
        0x1A => accumulator_op(cpu, inc),
        0x3A => accumulator_op(cpu, dec),

        // TSB / TRB: test and set/reset bits, Z from A & M
        0x04 => modify_op(cpu, bus, ZeroPage, tsb),
        0x0C => modify_op(cpu, bus, Absolute, tsb),
        0x14 => modify_op(cpu, bus, ZeroPage, trb),
        0x1C => modify_op(cpu, bus, Absolute, trb),

        // BIT with the extra addressing modes; immediate only affects Z
        0x89 => read_op(cpu, bus, Immediate, |cpu, v| {
            cpu.registers.status.zero = cpu.registers.accumulator & v == 0;
        }),
        0x34 => read_op(cpu, bus, ZeroPageX, bit_test),
        0x3C => read_op(cpu, bus, AbsoluteX, bit_test),

        // JMP (abs,X)
        0x7C => {
            let base = read_u16(bus, cpu.registers.pc);
            let pointer = base.wrapping_add(cpu.registers.x.into());
            cpu.registers.pc = read_u16(bus, pointer);
            6
        }

        // Everything else is a defined NOP on CMOS
        _ => 1,
    }
}

fn tsb(cpu: &mut Mos6502, value: u8) -> u8 {
    cpu.registers.status.zero = cpu.registers.accumulator & value == 0;
    value | cpu.registers.accumulator
}

fn trb(cpu: &mut Mos6502, value: u8) -> u8 {
    cpu.registers.status.zero = cpu.registers.accumulator & value == 0;
    value & !cpu.registers.accumulator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mos6502Variant, StatusFlags};

    struct TestBus {
        memory: Vec<u8>,
    }

    impl TestBus {
        fn new(program: &[u8]) -> Self {
            let mut memory = vec![0; 0x10000];
            memory[0x8000..0x8000 + program.len()].copy_from_slice(program);
            // Reset vector -> $8000
            memory[0xFFFC] = 0x00;
            memory[0xFFFD] = 0x80;
            Self { memory }
        }
    }

    impl BusInterface for TestBus {
        fn read(&mut self, address: u16) -> u8 {
            self.memory[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.memory[address as usize] = value;
        }
    }

    fn run_one(program: &[u8]) -> (Mos6502, TestBus, u32) {
        let mut bus = TestBus::new(program);
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);
        let cycles = cpu.step(&mut bus);
        (cpu, bus, cycles)
    }

    #[test]
    fn lda_immediate_sets_flags() {
        let (cpu, _, cycles) = run_one(&[0xA9, 0x00]);
        assert_eq!(cpu.registers.accumulator, 0);
        assert!(cpu.registers.status.zero);
        assert!(!cpu.registers.status.negative);
        assert_eq!(cycles, 2);

        let (cpu, _, _) = run_one(&[0xA9, 0x80]);
        assert!(cpu.registers.status.negative);
    }

    #[test]
    fn adc_sets_carry_and_overflow() {
        // LDA #$7F ; ADC #$01
        let mut bus = TestBus::new(&[0xA9, 0x7F, 0x69, 0x01]);
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(cpu.registers.accumulator, 0x80);
        assert!(cpu.registers.status.overflow);
        assert!(!cpu.registers.status.carry);
        assert!(cpu.registers.status.negative);
    }

    #[test]
    fn absolute_x_read_page_cross_costs_extra_cycle() {
        // LDX #$01 ; LDA $80FF,X
        let mut bus = TestBus::new(&[0xA2, 0x01, 0xBD, 0xFF, 0x80]);
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);
        cpu.step(&mut bus);
        let cycles = cpu.step(&mut bus);
        assert_eq!(cycles, 5);
    }

    #[test]
    fn taken_branch_costs_extra_cycle() {
        // SEC ; BCS +2
        let mut bus = TestBus::new(&[0x38, 0xB0, 0x02]);
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);
        cpu.step(&mut bus);
        let cycles = cpu.step(&mut bus);
        assert_eq!(cycles, 3);
        assert_eq!(cpu.pc(), 0x8005);
    }

    #[test]
    fn jmp_indirect_page_bug_on_nmos_only() {
        let mut bus = TestBus::new(&[0x6C, 0xFF, 0x02]);
        bus.memory[0x02FF] = 0x34;
        bus.memory[0x0300] = 0x12;
        bus.memory[0x0200] = 0x56;
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);
        cpu.step(&mut bus);
        // High byte fetched from $0200, not $0300
        assert_eq!(cpu.pc(), 0x5634);

        let mut bus = TestBus::new(&[0x6C, 0xFF, 0x02]);
        bus.memory[0x02FF] = 0x34;
        bus.memory[0x0300] = 0x12;
        bus.memory[0x0200] = 0x56;
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Cmos);
        cpu.step(&mut bus);
        assert_eq!(cpu.pc(), 0x1234);
    }

    #[test]
    fn nmi_is_edge_triggered() {
        let mut bus = TestBus::new(&[0xEA, 0xEA, 0xEA]);
        bus.memory[0xFFFA] = 0x00;
        bus.memory[0xFFFB] = 0x90;
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);

        cpu.set_nmi_line(true);
        let cycles = cpu.step(&mut bus);
        assert_eq!(cycles, 7);
        assert_eq!(cpu.pc(), 0x9000);

        // Line still high: no second NMI
        cpu.step(&mut bus);
        assert_ne!(cpu.pc(), 0x9000 + 7);
        assert!(!cpu.nmi_pending);
    }

    #[test]
    fn irq_respects_interrupt_disable() {
        let mut bus = TestBus::new(&[0x58, 0xEA]);
        bus.memory[0xFFFE] = 0x00;
        bus.memory[0xFFFF] = 0xA0;
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);
        cpu.set_irq_line(true);

        // I flag is set at power-on; IRQ is blocked until CLI executes
        cpu.step(&mut bus);
        let cycles = cpu.step(&mut bus);
        assert_eq!(cycles, 7);
        assert_eq!(cpu.pc(), 0xA000);
        assert!(cpu.registers.status.interrupt_disable);
    }

    #[test]
    fn kil_freezes_cpu() {
        let (mut cpu, mut bus, _) = run_one(&[0x02]);
        assert!(cpu.frozen());
        let pc = cpu.pc();
        cpu.step(&mut bus);
        assert_eq!(cpu.pc(), pc);
    }

    #[test]
    fn rmw_writes_unmodified_value_first() {
        struct RecordingBus {
            inner: TestBus,
            writes: Vec<(u16, u8)>,
        }

        impl BusInterface for RecordingBus {
            fn read(&mut self, address: u16) -> u8 {
                self.inner.read(address)
            }

            fn write(&mut self, address: u16, value: u8) {
                self.writes.push((address, value));
                self.inner.write(address, value);
            }
        }

        // INC $10 with $10 = 5
        let mut inner = TestBus::new(&[0xE6, 0x10]);
        inner.memory[0x10] = 5;
        let mut bus = RecordingBus { inner, writes: vec![] };
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);
        cpu.step(&mut bus);

        assert_eq!(bus.writes, vec![(0x10, 5), (0x10, 6)]);
    }

    #[test]
    fn cmos_stz_and_tsb() {
        let mut bus = TestBus::new(&[0xA9, 0x0F, 0x04, 0x10, 0x9C, 0x20, 0x00]);
        bus.memory[0x10] = 0xF0;
        bus.memory[0x20] = 0xFF;
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Cmos);
        cpu.step(&mut bus); // LDA #$0F
        cpu.step(&mut bus); // TSB $10
        assert_eq!(bus.memory[0x10], 0xFF);
        assert!(cpu.registers.status.zero); // $0F & $F0 == 0
        cpu.step(&mut bus); // STZ $0020
        assert_eq!(bus.memory[0x20], 0x00);
    }

    #[test]
    fn status_byte_round_trips() {
        let flags = StatusFlags {
            negative: true,
            overflow: false,
            decimal: true,
            interrupt_disable: false,
            zero: true,
            carry: true,
        };
        let byte = flags.to_byte(StatusReadContext::PushStack);
        let restored = StatusFlags::from_byte(byte);
        assert_eq!(byte & 0x30, 0x30);
        assert!(restored.negative && restored.decimal && restored.zero && restored.carry);
        assert!(!restored.overflow && !restored.interrupt_disable);
    }
}
