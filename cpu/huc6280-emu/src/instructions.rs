//! HuC6280 instruction decode and execution
//!
//! The 65C02 base set plus the Hudson extensions: swaps, MPR transfers, ST0/ST1/ST2, block
//! transfers, TST, RMB/SMB, BBR/BBS, SET/T-flag operand redirection, and CSL/CSH.
//!
//! The zero page and stack live in the logical $2000-$21FF window (MPR1).

use crate::{BusInterface, HuC6280, StatusFlags};
use retrocore_common::num::GetBit;

const ZERO_PAGE_BASE: u16 = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
}

fn resolve<B: BusInterface>(cpu: &mut HuC6280, bus: &mut B, mode: Mode) -> u16 {
    match mode {
        Mode::Immediate => {
            let address = cpu.registers.pc;
            cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
            address
        }
        Mode::ZeroPage => {
            let offset = cpu.fetch(bus);
            ZERO_PAGE_BASE | u16::from(offset)
        }
        Mode::ZeroPageX => {
            let offset = cpu.fetch(bus).wrapping_add(cpu.registers.x);
            ZERO_PAGE_BASE | u16::from(offset)
        }
        Mode::ZeroPageY => {
            let offset = cpu.fetch(bus).wrapping_add(cpu.registers.y);
            ZERO_PAGE_BASE | u16::from(offset)
        }
        Mode::Absolute => cpu.fetch_u16(bus),
        Mode::AbsoluteX => cpu.fetch_u16(bus).wrapping_add(cpu.registers.x.into()),
        Mode::AbsoluteY => cpu.fetch_u16(bus).wrapping_add(cpu.registers.y.into()),
        Mode::Indirect => {
            let pointer = cpu.fetch(bus);
            read_zp_pointer(cpu, bus, pointer)
        }
        Mode::IndirectX => {
            let pointer = cpu.fetch(bus).wrapping_add(cpu.registers.x);
            read_zp_pointer(cpu, bus, pointer)
        }
        Mode::IndirectY => {
            let pointer = cpu.fetch(bus);
            read_zp_pointer(cpu, bus, pointer).wrapping_add(cpu.registers.y.into())
        }
    }
}

fn read_zp_pointer<B: BusInterface>(cpu: &mut HuC6280, bus: &mut B, pointer: u8) -> u16 {
    let lsb = cpu.read_logical(bus, ZERO_PAGE_BASE | u16::from(pointer));
    let msb = cpu.read_logical(bus, ZERO_PAGE_BASE | u16::from(pointer.wrapping_add(1)));
    u16::from_le_bytes([lsb, msb])
}

fn read_cycles(mode: Mode) -> u32 {
    match mode {
        Mode::Immediate => 2,
        Mode::ZeroPage | Mode::ZeroPageX | Mode::ZeroPageY => 4,
        Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY => 5,
        Mode::Indirect | Mode::IndirectX | Mode::IndirectY => 7,
    }
}

fn rmw_cycles(mode: Mode) -> u32 {
    match mode {
        Mode::ZeroPage | Mode::ZeroPageX => 6,
        _ => 7,
    }
}

// ALU with T-flag redirection ---------------------------------------------------------------

/// ORA/AND/EOR/ADC honor the T flag: the operation reads and writes zero page at X instead of
/// the accumulator, at a 3-cycle surcharge.
fn logic_op<B: BusInterface>(
    cpu: &mut HuC6280,
    bus: &mut B,
    mode: Mode,
    t_flag: bool,
    op: impl FnOnce(&mut HuC6280, u8, u8) -> u8,
) -> u32 {
    let address = resolve(cpu, bus, mode);
    let operand = cpu.read_logical(bus, address);

    if t_flag {
        let target = ZERO_PAGE_BASE | u16::from(cpu.registers.x);
        let lhs = cpu.read_logical(bus, target);
        let result = op(cpu, lhs, operand);
        cpu.write_logical(bus, target, result);
        read_cycles(mode) + 3
    } else {
        let lhs = cpu.registers.a;
        cpu.registers.a = op(cpu, lhs, operand);
        read_cycles(mode)
    }
}

fn ora(cpu: &mut HuC6280, lhs: u8, rhs: u8) -> u8 {
    let result = lhs | rhs;
    cpu.registers.p.set_nz(result);
    result
}

fn and(cpu: &mut HuC6280, lhs: u8, rhs: u8) -> u8 {
    let result = lhs & rhs;
    cpu.registers.p.set_nz(result);
    result
}

fn eor(cpu: &mut HuC6280, lhs: u8, rhs: u8) -> u8 {
    let result = lhs ^ rhs;
    cpu.registers.p.set_nz(result);
    result
}

fn adc(cpu: &mut HuC6280, lhs: u8, rhs: u8) -> u8 {
    if cpu.registers.p.decimal {
        let mut lo = (lhs & 0x0F) + (rhs & 0x0F) + u8::from(cpu.registers.p.carry);
        let mut hi = (lhs >> 4) + (rhs >> 4);
        if lo > 9 {
            lo += 6;
            hi += 1;
        }
        let carry = hi > 9;
        if carry {
            hi += 6;
        }
        let result = (hi << 4) | (lo & 0x0F);
        cpu.registers.p.carry = carry;
        cpu.registers.p.set_nz(result);
        result
    } else {
        let sum = u16::from(lhs) + u16::from(rhs) + u16::from(cpu.registers.p.carry);
        let result = sum as u8;
        cpu.registers.p.carry = sum > 0xFF;
        cpu.registers.p.overflow = (lhs ^ result) & (rhs ^ result) & 0x80 != 0;
        cpu.registers.p.set_nz(result);
        result
    }
}

fn sbc(cpu: &mut HuC6280, lhs: u8, rhs: u8) -> u8 {
    if cpu.registers.p.decimal {
        let borrow = u8::from(!cpu.registers.p.carry);
        let mut lo = (lhs & 0x0F) as i16 - (rhs & 0x0F) as i16 - i16::from(borrow);
        let mut hi = (lhs >> 4) as i16 - (rhs >> 4) as i16;
        if lo < 0 {
            lo += 10;
            hi -= 1;
        }
        let carry = hi >= 0;
        if hi < 0 {
            hi += 10;
        }
        let result = (((hi as u8) & 0x0F) << 4) | ((lo as u8) & 0x0F);
        cpu.registers.p.carry = carry;
        cpu.registers.p.set_nz(result);
        result
    } else {
        adc(cpu, lhs, !rhs)
    }
}

fn compare(cpu: &mut HuC6280, register: u8, value: u8) {
    cpu.registers.p.carry = register >= value;
    cpu.registers.p.set_nz(register.wrapping_sub(value));
}

fn asl(cpu: &mut HuC6280, value: u8) -> u8 {
    cpu.registers.p.carry = value.bit(7);
    let result = value << 1;
    cpu.registers.p.set_nz(result);
    result
}

fn lsr(cpu: &mut HuC6280, value: u8) -> u8 {
    cpu.registers.p.carry = value.bit(0);
    let result = value >> 1;
    cpu.registers.p.set_nz(result);
    result
}

fn rol(cpu: &mut HuC6280, value: u8) -> u8 {
    let carry_in = u8::from(cpu.registers.p.carry);
    cpu.registers.p.carry = value.bit(7);
    let result = (value << 1) | carry_in;
    cpu.registers.p.set_nz(result);
    result
}

fn ror(cpu: &mut HuC6280, value: u8) -> u8 {
    let carry_in = u8::from(cpu.registers.p.carry) << 7;
    cpu.registers.p.carry = value.bit(0);
    let result = (value >> 1) | carry_in;
    cpu.registers.p.set_nz(result);
    result
}

fn inc(cpu: &mut HuC6280, value: u8) -> u8 {
    let result = value.wrapping_add(1);
    cpu.registers.p.set_nz(result);
    result
}

fn dec(cpu: &mut HuC6280, value: u8) -> u8 {
    let result = value.wrapping_sub(1);
    cpu.registers.p.set_nz(result);
    result
}

fn read_op<B: BusInterface>(
    cpu: &mut HuC6280,
    bus: &mut B,
    mode: Mode,
    op: impl FnOnce(&mut HuC6280, u8),
) -> u32 {
    let address = resolve(cpu, bus, mode);
    let value = cpu.read_logical(bus, address);
    op(cpu, value);
    read_cycles(mode)
}

fn store_op<B: BusInterface>(
    cpu: &mut HuC6280,
    bus: &mut B,
    mode: Mode,
    value: impl FnOnce(&HuC6280) -> u8,
) -> u32 {
    let address = resolve(cpu, bus, mode);
    let value = value(cpu);
    cpu.write_logical(bus, address, value);
    read_cycles(mode)
}

fn modify_op<B: BusInterface>(
    cpu: &mut HuC6280,
    bus: &mut B,
    mode: Mode,
    op: impl FnOnce(&mut HuC6280, u8) -> u8,
) -> u32 {
    let address = resolve(cpu, bus, mode);
    let value = cpu.read_logical(bus, address);
    let result = op(cpu, value);
    cpu.write_logical(bus, address, result);
    rmw_cycles(mode)
}

fn branch<B: BusInterface>(cpu: &mut HuC6280, bus: &mut B, condition: bool) -> u32 {
    let offset = cpu.fetch(bus) as i8;
    if condition {
        cpu.registers.pc = cpu.registers.pc.wrapping_add(offset as u16);
        4
    } else {
        2
    }
}

fn bit_test(cpu: &mut HuC6280, value: u8) {
    cpu.registers.p.negative = value.bit(7);
    cpu.registers.p.overflow = value.bit(6);
    cpu.registers.p.zero = cpu.registers.a & value == 0;
}

/// Block transfers: alternating source/destination stepping per variant, 6 cycles per byte
/// plus 17 cycles of setup. X/Y/A are saved on the stack by the instruction.
fn block_transfer<B: BusInterface>(cpu: &mut HuC6280, bus: &mut B, opcode: u8) -> u32 {
    let source = cpu.fetch_u16(bus);
    let dest = cpu.fetch_u16(bus);
    let length = cpu.fetch_u16(bus);
    let length = if length == 0 { 0x10000_u32 } else { u32::from(length) };

    let mut src = source;
    let mut dst = dest;
    let mut alternate = false;

    for _ in 0..length {
        let value = cpu.read_logical(bus, src);
        cpu.write_logical(bus, dst, value);

        match opcode {
            // TII: both increment
            0x73 => {
                src = src.wrapping_add(1);
                dst = dst.wrapping_add(1);
            }
            // TDD: both decrement
            0xC3 => {
                src = src.wrapping_sub(1);
                dst = dst.wrapping_sub(1);
            }
            // TIN: source increments, destination fixed
            0xD3 => {
                src = src.wrapping_add(1);
            }
            // TIA: source increments, destination alternates +1/-1
            0xE3 => {
                src = src.wrapping_add(1);
                dst = if alternate { dst.wrapping_sub(1) } else { dst.wrapping_add(1) };
                alternate = !alternate;
            }
            // TAI: source alternates, destination increments
            0xF3 => {
                src = if alternate { src.wrapping_sub(1) } else { src.wrapping_add(1) };
                alternate = !alternate;
                dst = dst.wrapping_add(1);
            }
            _ => unreachable!("not a block transfer opcode"),
        }
    }

    17 + 6 * length
}

fn tst<B: BusInterface>(cpu: &mut HuC6280, bus: &mut B, mode: Mode) -> u32 {
    let mask = cpu.fetch(bus);
    let address = resolve(cpu, bus, mode);
    let value = cpu.read_logical(bus, address);
    cpu.registers.p.negative = value.bit(7);
    cpu.registers.p.overflow = value.bit(6);
    cpu.registers.p.zero = value & mask == 0;
    read_cycles(mode) + 3
}

pub(crate) fn execute<B: BusInterface>(cpu: &mut HuC6280, bus: &mut B, opcode: u8) -> u32 {
    use Mode::*;

    // The T flag affects exactly one following instruction
    let t_flag = cpu.registers.p.memory_operand;
    cpu.registers.p.memory_operand = false;

    match opcode {
        // ORA
        0x09 => logic_op(cpu, bus, Immediate, t_flag, ora),
        0x05 => logic_op(cpu, bus, ZeroPage, t_flag, ora),
        0x15 => logic_op(cpu, bus, ZeroPageX, t_flag, ora),
        0x0D => logic_op(cpu, bus, Absolute, t_flag, ora),
        0x1D => logic_op(cpu, bus, AbsoluteX, t_flag, ora),
        0x19 => logic_op(cpu, bus, AbsoluteY, t_flag, ora),
        0x01 => logic_op(cpu, bus, IndirectX, t_flag, ora),
        0x11 => logic_op(cpu, bus, IndirectY, t_flag, ora),
        0x12 => logic_op(cpu, bus, Indirect, t_flag, ora),

        // AND
        0x29 => logic_op(cpu, bus, Immediate, t_flag, and),
        0x25 => logic_op(cpu, bus, ZeroPage, t_flag, and),
        0x35 => logic_op(cpu, bus, ZeroPageX, t_flag, and),
        0x2D => logic_op(cpu, bus, Absolute, t_flag, and),
        0x3D => logic_op(cpu, bus, AbsoluteX, t_flag, and),
        0x39 => logic_op(cpu, bus, AbsoluteY, t_flag, and),
        0x21 => logic_op(cpu, bus, IndirectX, t_flag, and),
        0x31 => logic_op(cpu, bus, IndirectY, t_flag, and),
        0x32 => logic_op(cpu, bus, Indirect, t_flag, and),

        // EOR
        0x49 => logic_op(cpu, bus, Immediate, t_flag, eor),
        0x45 => logic_op(cpu, bus, ZeroPage, t_flag, eor),
        0x55 => logic_op(cpu, bus, ZeroPageX, t_flag, eor),
        0x4D => logic_op(cpu, bus, Absolute, t_flag, eor),
        0x5D => logic_op(cpu, bus, AbsoluteX, t_flag, eor),
        0x59 => logic_op(cpu, bus, AbsoluteY, t_flag, eor),
        0x41 => logic_op(cpu, bus, IndirectX, t_flag, eor),
        0x51 => logic_op(cpu, bus, IndirectY, t_flag, eor),
        0x52 => logic_op(cpu, bus, Indirect, t_flag, eor),

        // ADC
        0x69 => logic_op(cpu, bus, Immediate, t_flag, adc),
        0x65 => logic_op(cpu, bus, ZeroPage, t_flag, adc),
        0x75 => logic_op(cpu, bus, ZeroPageX, t_flag, adc),
        0x6D => logic_op(cpu, bus, Absolute, t_flag, adc),
        0x7D => logic_op(cpu, bus, AbsoluteX, t_flag, adc),
        0x79 => logic_op(cpu, bus, AbsoluteY, t_flag, adc),
        0x61 => logic_op(cpu, bus, IndirectX, t_flag, adc),
        0x71 => logic_op(cpu, bus, IndirectY, t_flag, adc),
        0x72 => logic_op(cpu, bus, Indirect, t_flag, adc),

        // SBC (not affected by T)
        0xE9 => logic_op(cpu, bus, Immediate, false, sbc),
        0xE5 => logic_op(cpu, bus, ZeroPage, false, sbc),
        0xF5 => logic_op(cpu, bus, ZeroPageX, false, sbc),
        0xED => logic_op(cpu, bus, Absolute, false, sbc),
        0xFD => logic_op(cpu, bus, AbsoluteX, false, sbc),
        0xF9 => logic_op(cpu, bus, AbsoluteY, false, sbc),
        0xE1 => logic_op(cpu, bus, IndirectX, false, sbc),
        0xF1 => logic_op(cpu, bus, IndirectY, false, sbc),
        0xF2 => logic_op(cpu, bus, Indirect, false, sbc),

        // CMP / CPX / CPY
        0xC9 => read_op(cpu, bus, Immediate, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xC5 => read_op(cpu, bus, ZeroPage, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xD5 => read_op(cpu, bus, ZeroPageX, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xCD => read_op(cpu, bus, Absolute, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xDD => read_op(cpu, bus, AbsoluteX, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xD9 => read_op(cpu, bus, AbsoluteY, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xC1 => read_op(cpu, bus, IndirectX, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xD1 => read_op(cpu, bus, IndirectY, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xD2 => read_op(cpu, bus, Indirect, |cpu, v| { let a = cpu.registers.a; compare(cpu, a, v) }),
        0xE0 => read_op(cpu, bus, Immediate, |cpu, v| { let x = cpu.registers.x; compare(cpu, x, v) }),
        0xE4 => read_op(cpu, bus, ZeroPage, |cpu, v| { let x = cpu.registers.x; compare(cpu, x, v) }),
        0xEC => read_op(cpu, bus, Absolute, |cpu, v| { let x = cpu.registers.x; compare(cpu, x, v) }),
        0xC0 => read_op(cpu, bus, Immediate, |cpu, v| { let y = cpu.registers.y; compare(cpu, y, v) }),
        0xC4 => read_op(cpu, bus, ZeroPage, |cpu, v| { let y = cpu.registers.y; compare(cpu, y, v) }),
        0xCC => read_op(cpu, bus, Absolute, |cpu, v| { let y = cpu.registers.y; compare(cpu, y, v) }),

        // BIT
        0x89 => read_op(cpu, bus, Immediate, |cpu, v| {
            cpu.registers.p.zero = cpu.registers.a & v == 0;
        }),
        0x24 => read_op(cpu, bus, ZeroPage, bit_test),
        0x34 => read_op(cpu, bus, ZeroPageX, bit_test),
        0x2C => read_op(cpu, bus, Absolute, bit_test),
        0x3C => read_op(cpu, bus, AbsoluteX, bit_test),

        // Loads
        0xA9 => read_op(cpu, bus, Immediate, lda),
        0xA5 => read_op(cpu, bus, ZeroPage, lda),
        0xB5 => read_op(cpu, bus, ZeroPageX, lda),
        0xAD => read_op(cpu, bus, Absolute, lda),
        0xBD => read_op(cpu, bus, AbsoluteX, lda),
        0xB9 => read_op(cpu, bus, AbsoluteY, lda),
        0xA1 => read_op(cpu, bus, IndirectX, lda),
        0xB1 => read_op(cpu, bus, IndirectY, lda),
        0xB2 => read_op(cpu, bus, Indirect, lda),
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
        0x85 => store_op(cpu, bus, ZeroPage, |cpu| cpu.registers.a),
        0x95 => store_op(cpu, bus, ZeroPageX, |cpu| cpu.registers.a),
        0x8D => store_op(cpu, bus, Absolute, |cpu| cpu.registers.a),
        0x9D => store_op(cpu, bus, AbsoluteX, |cpu| cpu.registers.a),
        0x99 => store_op(cpu, bus, AbsoluteY, |cpu| cpu.registers.a),
        0x81 => store_op(cpu, bus, IndirectX, |cpu| cpu.registers.a),
        0x91 => store_op(cpu, bus, IndirectY, |cpu| cpu.registers.a),
        0x92 => store_op(cpu, bus, Indirect, |cpu| cpu.registers.a),
        0x86 => store_op(cpu, bus, ZeroPage, |cpu| cpu.registers.x),
        0x96 => store_op(cpu, bus, ZeroPageY, |cpu| cpu.registers.x),
        0x8E => store_op(cpu, bus, Absolute, |cpu| cpu.registers.x),
        0x84 => store_op(cpu, bus, ZeroPage, |cpu| cpu.registers.y),
        0x94 => store_op(cpu, bus, ZeroPageX, |cpu| cpu.registers.y),
        0x8C => store_op(cpu, bus, Absolute, |cpu| cpu.registers.y),
        0x64 => store_op(cpu, bus, ZeroPage, |_| 0),
        0x74 => store_op(cpu, bus, ZeroPageX, |_| 0),
        0x9C => store_op(cpu, bus, Absolute, |_| 0),
        0x9E => store_op(cpu, bus, AbsoluteX, |_| 0),

        // Shifts / rotates / INC / DEC
        0x0A => { let a = cpu.registers.a; cpu.registers.a = asl(cpu, a); 2 }
        0x06 => modify_op(cpu, bus, ZeroPage, asl),
        0x16 => modify_op(cpu, bus, ZeroPageX, asl),
        0x0E => modify_op(cpu, bus, Absolute, asl),
        0x1E => modify_op(cpu, bus, AbsoluteX, asl),
        0x4A => { let a = cpu.registers.a; cpu.registers.a = lsr(cpu, a); 2 }
        0x46 => modify_op(cpu, bus, ZeroPage, lsr),
        0x56 => modify_op(cpu, bus, ZeroPageX, lsr),
        0x4E => modify_op(cpu, bus, Absolute, lsr),
        0x5E => modify_op(cpu, bus, AbsoluteX, lsr),
        0x2A => { let a = cpu.registers.a; cpu.registers.a = rol(cpu, a); 2 }
        0x26 => modify_op(cpu, bus, ZeroPage, rol),
        0x36 => modify_op(cpu, bus, ZeroPageX, rol),
        0x2E => modify_op(cpu, bus, Absolute, rol),
        0x3E => modify_op(cpu, bus, AbsoluteX, rol),
        0x6A => { let a = cpu.registers.a; cpu.registers.a = ror(cpu, a); 2 }
        0x66 => modify_op(cpu, bus, ZeroPage, ror),
        0x76 => modify_op(cpu, bus, ZeroPageX, ror),
        0x6E => modify_op(cpu, bus, Absolute, ror),
        0x7E => modify_op(cpu, bus, AbsoluteX, ror),
        0x1A => { let a = cpu.registers.a; cpu.registers.a = inc(cpu, a); 2 }
        0xE6 => modify_op(cpu, bus, ZeroPage, inc),
        0xF6 => modify_op(cpu, bus, ZeroPageX, inc),
        0xEE => modify_op(cpu, bus, Absolute, inc),
        0xFE => modify_op(cpu, bus, AbsoluteX, inc),
        0x3A => { let a = cpu.registers.a; cpu.registers.a = dec(cpu, a); 2 }
        0xC6 => modify_op(cpu, bus, ZeroPage, dec),
        0xD6 => modify_op(cpu, bus, ZeroPageX, dec),
        0xCE => modify_op(cpu, bus, Absolute, dec),
        0xDE => modify_op(cpu, bus, AbsoluteX, dec),

        // TSB / TRB
        0x04 => modify_op(cpu, bus, ZeroPage, tsb),
        0x0C => modify_op(cpu, bus, Absolute, tsb),
        0x14 => modify_op(cpu, bus, ZeroPage, trb),
        0x1C => modify_op(cpu, bus, Absolute, trb),

        // Register transfers / steps
        0xAA => { let v = cpu.registers.a; cpu.registers.x = v; cpu.registers.p.set_nz(v); 2 }
        0x8A => { let v = cpu.registers.x; cpu.registers.a = v; cpu.registers.p.set_nz(v); 2 }
        0xA8 => { let v = cpu.registers.a; cpu.registers.y = v; cpu.registers.p.set_nz(v); 2 }
        0x98 => { let v = cpu.registers.y; cpu.registers.a = v; cpu.registers.p.set_nz(v); 2 }
        0xBA => { let v = cpu.registers.sp; cpu.registers.x = v; cpu.registers.p.set_nz(v); 2 }
        0x9A => { cpu.registers.sp = cpu.registers.x; 2 }
        0xE8 => { let v = cpu.registers.x.wrapping_add(1); cpu.registers.x = v; cpu.registers.p.set_nz(v); 2 }
        0xC8 => { let v = cpu.registers.y.wrapping_add(1); cpu.registers.y = v; cpu.registers.p.set_nz(v); 2 }
        0xCA => { let v = cpu.registers.x.wrapping_sub(1); cpu.registers.x = v; cpu.registers.p.set_nz(v); 2 }
        0x88 => { let v = cpu.registers.y.wrapping_sub(1); cpu.registers.y = v; cpu.registers.p.set_nz(v); 2 }

        // Hudson register swaps and clears
        0x02 => { std::mem::swap(&mut cpu.registers.x, &mut cpu.registers.y); 3 }
        0x22 => { std::mem::swap(&mut cpu.registers.a, &mut cpu.registers.x); 3 }
        0x42 => { std::mem::swap(&mut cpu.registers.a, &mut cpu.registers.y); 3 }
        0x62 => { cpu.registers.a = 0; 2 }
        0x82 => { cpu.registers.x = 0; 2 }
        0xC2 => { cpu.registers.y = 0; 2 }

        // ST0/ST1/ST2: immediate writes to VDC ports
        0x03 => { let value = cpu.fetch(bus); bus.st_port(0, value); 5 }
        0x13 => { let value = cpu.fetch(bus); bus.st_port(2, value); 5 }
        0x23 => { let value = cpu.fetch(bus); bus.st_port(3, value); 5 }

        // TMA / TAM: MPR transfers; the mask selects which MPRs participate
        0x43 => {
            let mask = cpu.fetch(bus);
            for i in 0..8 {
                if mask.bit(i) {
                    cpu.set_mpr_latch(cpu.registers.mpr[i as usize]);
                }
            }
            cpu.registers.a = cpu.mpr_latch();
            4
        }
        0x53 => {
            let mask = cpu.fetch(bus);
            for i in 0..8 {
                if mask.bit(i) {
                    cpu.registers.mpr[i as usize] = cpu.registers.a;
                }
            }
            5
        }

        // Speed control
        0x54 => { cpu.set_speed(false); 3 }
        0xD4 => { cpu.set_speed(true); 3 }

        // SET
        0xF4 => { cpu.registers.p.memory_operand = true; 2 }

        // Block transfers
        0x73 | 0xC3 | 0xD3 | 0xE3 | 0xF3 => block_transfer(cpu, bus, opcode),

        // TST
        0x83 => tst(cpu, bus, ZeroPage),
        0xA3 => tst(cpu, bus, ZeroPageX),
        0x93 => tst(cpu, bus, Absolute),
        0xB3 => tst(cpu, bus, AbsoluteX),

        // RMB / SMB
        0x07 | 0x17 | 0x27 | 0x37 | 0x47 | 0x57 | 0x67 | 0x77 => {
            let bit = opcode >> 4;
            modify_op(cpu, bus, ZeroPage, move |_, v| v & !(1 << bit))
        }
        0x87 | 0x97 | 0xA7 | 0xB7 | 0xC7 | 0xD7 | 0xE7 | 0xF7 => {
            let bit = (opcode >> 4) - 8;
            modify_op(cpu, bus, ZeroPage, move |_, v| v | (1 << bit))
        }

        // BBR / BBS
        0x0F | 0x1F | 0x2F | 0x3F | 0x4F | 0x5F | 0x6F | 0x7F => {
            let bit = opcode >> 4;
            let address = resolve(cpu, bus, ZeroPage);
            let value = cpu.read_logical(bus, address);
            4 + branch(cpu, bus, !value.bit(bit))
        }
        0x8F | 0x9F | 0xAF | 0xBF | 0xCF | 0xDF | 0xEF | 0xFF => {
            let bit = (opcode >> 4) - 8;
            let address = resolve(cpu, bus, ZeroPage);
            let value = cpu.read_logical(bus, address);
            4 + branch(cpu, bus, value.bit(bit))
        }

        // Flag operations
        0x18 => { cpu.registers.p.carry = false; 2 }
        0x38 => { cpu.registers.p.carry = true; 2 }
        0x58 => { cpu.registers.p.interrupt_disable = false; 2 }
        0x78 => { cpu.registers.p.interrupt_disable = true; 2 }
        0xB8 => { cpu.registers.p.overflow = false; 2 }
        0xD8 => { cpu.registers.p.decimal = false; 2 }
        0xF8 => { cpu.registers.p.decimal = true; 2 }

        // Stack
        0x48 => { let v = cpu.registers.a; cpu.push(bus, v); 3 }
        0xDA => { let v = cpu.registers.x; cpu.push(bus, v); 3 }
        0x5A => { let v = cpu.registers.y; cpu.push(bus, v); 3 }
        0x68 => { let v = cpu.pull(bus); cpu.registers.a = v; cpu.registers.p.set_nz(v); 4 }
        0xFA => { let v = cpu.pull(bus); cpu.registers.x = v; cpu.registers.p.set_nz(v); 4 }
        0x7A => { let v = cpu.pull(bus); cpu.registers.y = v; cpu.registers.p.set_nz(v); 4 }
        0x08 => { let v = cpu.registers.p.to_byte(true); cpu.push(bus, v); 3 }
        0x28 => {
            let v = cpu.pull(bus);
            cpu.registers.p = StatusFlags::from_byte(v);
            4
        }

        // Jumps / subroutines
        0x4C => { cpu.registers.pc = cpu.fetch_u16(bus); 4 }
        0x6C => {
            let pointer = cpu.fetch_u16(bus);
            let lsb = cpu.read_logical(bus, pointer);
            let msb = cpu.read_logical(bus, pointer.wrapping_add(1));
            cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
            7
        }
        0x7C => {
            let base = cpu.fetch_u16(bus);
            let pointer = base.wrapping_add(cpu.registers.x.into());
            let lsb = cpu.read_logical(bus, pointer);
            let msb = cpu.read_logical(bus, pointer.wrapping_add(1));
            cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
            7
        }
        0x20 => {
            let target = cpu.fetch_u16(bus);
            let return_address = cpu.registers.pc.wrapping_sub(1);
            cpu.push(bus, (return_address >> 8) as u8);
            cpu.push(bus, return_address as u8);
            cpu.registers.pc = target;
            7
        }
        0x44 => {
            // BSR: relative subroutine call
            let offset = cpu.fetch(bus) as i8;
            let return_address = cpu.registers.pc.wrapping_sub(1);
            cpu.push(bus, (return_address >> 8) as u8);
            cpu.push(bus, return_address as u8);
            cpu.registers.pc = cpu.registers.pc.wrapping_add(offset as u16);
            8
        }
        0x60 => {
            let lsb = cpu.pull(bus);
            let msb = cpu.pull(bus);
            cpu.registers.pc = u16::from_le_bytes([lsb, msb]).wrapping_add(1);
            7
        }
        0x40 => {
            let p = cpu.pull(bus);
            cpu.registers.p = StatusFlags::from_byte(p);
            let lsb = cpu.pull(bus);
            let msb = cpu.pull(bus);
            cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
            7
        }
        0x00 => {
            // BRK
            let pc = cpu.registers.pc.wrapping_add(1);
            cpu.push(bus, (pc >> 8) as u8);
            cpu.push(bus, pc as u8);
            let p = cpu.registers.p.to_byte(true);
            cpu.push(bus, p);
            cpu.registers.p.interrupt_disable = true;
            cpu.registers.p.decimal = false;
            cpu.registers.pc = cpu.read_u16_logical(bus, crate::IRQ2_VECTOR);
            8
        }

        // Branches
        0x10 => branch(cpu, bus, !cpu.registers.p.negative),
        0x30 => branch(cpu, bus, cpu.registers.p.negative),
        0x50 => branch(cpu, bus, !cpu.registers.p.overflow),
        0x70 => branch(cpu, bus, cpu.registers.p.overflow),
        0x90 => branch(cpu, bus, !cpu.registers.p.carry),
        0xB0 => branch(cpu, bus, cpu.registers.p.carry),
        0xD0 => branch(cpu, bus, !cpu.registers.p.zero),
        0xF0 => branch(cpu, bus, cpu.registers.p.zero),
        0x80 => branch(cpu, bus, true),

        // NOP and the few remaining unused encodings, which behave as NOPs
        0xEA | 0x33 | 0x63 | 0xE2 | 0x5C | 0xDC | 0xFC | 0x0B | 0x1B | 0x2B | 0x3B | 0x4B
        | 0x5B | 0x6B | 0x7B | 0x8B | 0x9B | 0xAB | 0xBB | 0xCB | 0xDB | 0xEB | 0xFB => 2,
    }
}

fn lda(cpu: &mut HuC6280, value: u8) {
    cpu.registers.a = value;
    cpu.registers.p.set_nz(value);
}

fn ldx(cpu: &mut HuC6280, value: u8) {
    cpu.registers.x = value;
    cpu.registers.p.set_nz(value);
}

fn ldy(cpu: &mut HuC6280, value: u8) {
    cpu.registers.y = value;
    cpu.registers.p.set_nz(value);
}

fn tsb(cpu: &mut HuC6280, value: u8) -> u8 {
    cpu.registers.p.zero = cpu.registers.a & value == 0;
    value | cpu.registers.a
}

fn trb(cpu: &mut HuC6280, value: u8) -> u8 {
    cpu.registers.p.zero = cpu.registers.a & value == 0;
    value & !cpu.registers.a
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        memory: Vec<u8>,
        st_writes: Vec<(u8, u8)>,
    }

    impl TestBus {
        fn new(program: &[u8]) -> Self {
            // 21-bit physical space; the reset vector region lives in MPR7 page 0
            let mut memory = vec![0; 0x20_0000];
            memory[..program.len()].copy_from_slice(program);
            // Logical $FFFE maps through MPR7 (page 0) -> physical $1FFE
            memory[0x1FFE] = 0x00;
            memory[0x1FFF] = 0xE0;
            Self { memory, st_writes: vec![] }
        }
    }

    impl BusInterface for TestBus {
        fn read(&mut self, address: u32) -> u8 {
            self.memory[address as usize]
        }

        fn write(&mut self, address: u32, value: u8) {
            self.memory[address as usize] = value;
        }

        fn st_port(&mut self, port: u8, value: u8) {
            self.st_writes.push((port, value));
        }

        fn irq1(&self) -> bool {
            false
        }

        fn irq2(&self) -> bool {
            false
        }

        fn timer_irq(&self) -> bool {
            false
        }
    }

    fn boot(program: &[u8]) -> (HuC6280, TestBus) {
        // Program is placed at physical 0; reset vector $E000 maps through MPR7=0 to
        // physical 0 only if we point MPR7 at page 0 and start at logical $E000
        let mut bus = TestBus::new(program);
        let mut cpu = HuC6280::new(&mut bus);
        assert_eq!(cpu.registers().pc, 0xE000);
        // Logical $E000 with MPR7 = 0 -> physical $0000, where the program lives
        cpu.registers_mut().mpr[7] = 0;
        (cpu, bus)
    }

    #[test]
    fn mpr_translation() {
        let (mut cpu, _) = boot(&[0xEA]);
        cpu.registers_mut().mpr[2] = 0x85;
        // Logical $4123 is window 2
        assert_eq!(cpu.physical_address(0x4123), (0x85 << 13) | 0x0123);
    }

    #[test]
    fn tam_sets_selected_mprs() {
        // LDA #$42 ; TAM #%00001100
        let (mut cpu, mut bus) = boot(&[0xA9, 0x42, 0x53, 0x0C]);
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(cpu.registers().mpr[2], 0x42);
        assert_eq!(cpu.registers().mpr[3], 0x42);
        assert_ne!(cpu.registers().mpr[1], 0x42);
    }

    #[test]
    fn st0_writes_vdc_port() {
        let (mut cpu, mut bus) = boot(&[0x03, 0x05]);
        cpu.step(&mut bus);
        assert_eq!(bus.st_writes, vec![(0, 5)]);
    }

    #[test]
    fn tii_block_transfer() {
        // TII $3000, $3010, $0003 (logical; MPR1 = $F8 maps $2000-$3FFF... use MPR1 default)
        // Use zero-page region instead: MPR1 defaults to $F8 -> physical $1F0000
        let (mut cpu, mut bus) = boot(&[0x73, 0x00, 0x20, 0x10, 0x20, 0x03, 0x00]);
        let zp_base = (0xF8 << 13) as usize;
        bus.memory[zp_base..zp_base + 3].copy_from_slice(&[1, 2, 3]);
        let cycles = cpu.step(&mut bus);
        assert_eq!(&bus.memory[zp_base + 0x10..zp_base + 0x13], &[1, 2, 3]);
        assert_eq!(cycles, 17 + 6 * 3);
    }

    #[test]
    fn set_t_flag_redirects_ora_to_zero_page() {
        // LDX #$10 ; SET ; ORA #$0F  (with T set: zp[$10] |= $0F)
        let (mut cpu, mut bus) = boot(&[0xA2, 0x10, 0xF4, 0x09, 0x0F]);
        let zp_base = (0xF8 << 13) as usize;
        bus.memory[zp_base + 0x10] = 0xF0;
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert!(cpu.registers().p.memory_operand);
        cpu.step(&mut bus);
        assert_eq!(bus.memory[zp_base + 0x10], 0xFF);
        assert!(!cpu.registers().p.memory_operand);
        // A unchanged
        assert_eq!(cpu.registers().a, 0);
    }

    #[test]
    fn bbr_branches_when_bit_clear() {
        // BBR2 $20, +2
        let (mut cpu, mut bus) = boot(&[0x2F, 0x20, 0x02, 0xEA, 0xEA]);
        let zp_base = (0xF8 << 13) as usize;
        bus.memory[zp_base + 0x20] = 0x00;
        cpu.step(&mut bus);
        assert_eq!(cpu.registers().pc, 0xE005);
    }
}
