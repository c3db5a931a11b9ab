//! Opcode dispatch and addressing mode resolution

mod alu;
mod flow;
mod load;

use crate::BusInterface;
use crate::core::Wdc65816;

/// Data addressing modes. Immediate is handled separately because its width depends on which
/// flag (M or X) governs the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressingMode {
    Direct,
    DirectX,
    DirectY,
    DirectIndirect,
    DirectIndirectX,
    DirectIndirectY,
    DirectIndirectLong,
    DirectIndirectLongY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    AbsoluteLong,
    AbsoluteLongX,
    StackRelative,
    StackRelativeIndirectY,
    Immediate,
}

/// Resolve a data addressing mode to a 24-bit effective address, charging the documented extra
/// cycles (direct page misalignment, indexing, page-cross penalties).
pub(crate) fn effective_address<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    mode: AddressingMode,
    for_write: bool,
) -> u32 {
    match mode {
        AddressingMode::Direct => direct_address(cpu, bus, 0),
        AddressingMode::DirectX => {
            let x = cpu.registers.x;
            let address = direct_address(cpu, bus, x);
            cpu.idle(bus);
            address
        }
        AddressingMode::DirectY => {
            let y = cpu.registers.y;
            let address = direct_address(cpu, bus, y);
            cpu.idle(bus);
            address
        }
        AddressingMode::DirectIndirect => {
            let pointer = direct_address(cpu, bus, 0);
            let address = cpu.read16(bus, pointer);
            bank_address(cpu.registers.db, address)
        }
        AddressingMode::DirectIndirectX => {
            let x = cpu.registers.x;
            let pointer = direct_address(cpu, bus, x);
            cpu.idle(bus);
            let address = cpu.read16(bus, pointer);
            bank_address(cpu.registers.db, address)
        }
        AddressingMode::DirectIndirectY => {
            let pointer = direct_address(cpu, bus, 0);
            let base = cpu.read16(bus, pointer);
            let base24 = bank_address(cpu.registers.db, base);
            let address = base24.wrapping_add(cpu.registers.y.into()) & 0xFFFFFF;
            if for_write || !cpu.registers.p.index_8bit || crossed_page(base24, address) {
                cpu.idle(bus);
            }
            address
        }
        AddressingMode::DirectIndirectLong => {
            let pointer = direct_address(cpu, bus, 0);
            read_long_pointer(cpu, bus, pointer)
        }
        AddressingMode::DirectIndirectLongY => {
            let pointer = direct_address(cpu, bus, 0);
            let base = read_long_pointer(cpu, bus, pointer);
            base.wrapping_add(cpu.registers.y.into()) & 0xFFFFFF
        }
        AddressingMode::Absolute => {
            let address = cpu.fetch_u16(bus);
            bank_address(cpu.registers.db, address)
        }
        AddressingMode::AbsoluteX => absolute_indexed(cpu, bus, for_write, Index::X),
        AddressingMode::AbsoluteY => absolute_indexed(cpu, bus, for_write, Index::Y),
        AddressingMode::AbsoluteLong => {
            let address = cpu.fetch_u16(bus);
            let bank = cpu.fetch(bus);
            (u32::from(bank) << 16) | u32::from(address)
        }
        AddressingMode::AbsoluteLongX => {
            let address = cpu.fetch_u16(bus);
            let bank = cpu.fetch(bus);
            ((u32::from(bank) << 16) | u32::from(address)).wrapping_add(cpu.registers.x.into())
                & 0xFFFFFF
        }
        AddressingMode::StackRelative => {
            let offset = cpu.fetch(bus);
            cpu.idle(bus);
            u32::from(cpu.registers.s.wrapping_add(offset.into()))
        }
        AddressingMode::StackRelativeIndirectY => {
            let offset = cpu.fetch(bus);
            cpu.idle(bus);
            let pointer = u32::from(cpu.registers.s.wrapping_add(offset.into()));
            let base = cpu.read16(bus, pointer);
            cpu.idle(bus);
            bank_address(cpu.registers.db, base).wrapping_add(cpu.registers.y.into()) & 0xFFFFFF
        }
        AddressingMode::Immediate => panic!("immediate operands are fetched, not addressed"),
    }
}

#[derive(Clone, Copy)]
enum Index {
    X,
    Y,
}

fn absolute_indexed<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    for_write: bool,
    index: Index,
) -> u32 {
    let base = cpu.fetch_u16(bus);
    let base24 = bank_address(cpu.registers.db, base);
    let index = match index {
        Index::X => cpu.registers.x,
        Index::Y => cpu.registers.y,
    };
    let address = base24.wrapping_add(index.into()) & 0xFFFFFF;
    if for_write || !cpu.registers.p.index_8bit || crossed_page(base24, address) {
        cpu.idle(bus);
    }
    address
}

/// Direct page address: always bank 0, 16-bit wrap. A non-page-aligned D register costs one
/// extra cycle.
fn direct_address<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, index: u16) -> u32 {
    let offset = cpu.fetch(bus);
    if cpu.registers.d & 0x00FF != 0 {
        cpu.idle(bus);
    }
    cpu.registers.d.wrapping_add(offset.into()).wrapping_add(index).into()
}

fn read_long_pointer<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, pointer: u32) -> u32 {
    let lsb = cpu.read8(bus, pointer);
    let mid = cpu.read8(bus, pointer.wrapping_add(1));
    let msb = cpu.read8(bus, pointer.wrapping_add(2));
    u32::from_le_bytes([lsb, mid, msb, 0])
}

fn bank_address(bank: u8, address: u16) -> u32 {
    (u32::from(bank) << 16) | u32::from(address)
}

fn crossed_page(a: u32, b: u32) -> bool {
    a & 0xFFFF00 != b & 0xFFFF00
}

/// Fetch an M-width or immediate operand for a read instruction.
pub(crate) fn read_operand_m<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    mode: AddressingMode,
) -> u16 {
    if mode == AddressingMode::Immediate {
        if cpu.registers.p.memory_8bit {
            cpu.fetch(bus).into()
        } else {
            cpu.fetch_u16(bus)
        }
    } else {
        let address = effective_address(cpu, bus, mode, false);
        cpu.read_m(bus, address)
    }
}

/// Fetch an X-width operand (LDX/LDY/CPX/CPY).
pub(crate) fn read_operand_x<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    mode: AddressingMode,
) -> u16 {
    if mode == AddressingMode::Immediate {
        if cpu.registers.p.index_8bit {
            cpu.fetch(bus).into()
        } else {
            cpu.fetch_u16(bus)
        }
    } else {
        let address = effective_address(cpu, bus, mode, false);
        cpu.read_x(bus, address)
    }
}

/// Read-modify-write template over M-width memory.
pub(crate) fn modify_m<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    mode: AddressingMode,
    op: impl FnOnce(&mut Wdc65816, u16) -> u16,
) {
    let address = effective_address(cpu, bus, mode, true);
    let value = cpu.read_m(bus, address);
    cpu.idle(bus);
    let result = op(cpu, value);
    cpu.write_m(bus, address, result);
}

pub(crate) fn execute<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, opcode: u8) {
    use AddressingMode::*;

    match opcode {
        // ORA / AND / EOR / ADC / CMP / SBC / LDA / STA share the standard column layout
        0x01 => alu::ora(cpu, bus, DirectIndirectX),
        0x03 => alu::ora(cpu, bus, StackRelative),
        0x05 => alu::ora(cpu, bus, Direct),
        0x07 => alu::ora(cpu, bus, DirectIndirectLong),
        0x09 => alu::ora(cpu, bus, Immediate),
        0x0D => alu::ora(cpu, bus, Absolute),
        0x0F => alu::ora(cpu, bus, AbsoluteLong),
        0x11 => alu::ora(cpu, bus, DirectIndirectY),
        0x12 => alu::ora(cpu, bus, DirectIndirect),
        0x13 => alu::ora(cpu, bus, StackRelativeIndirectY),
        0x15 => alu::ora(cpu, bus, DirectX),
        0x17 => alu::ora(cpu, bus, DirectIndirectLongY),
        0x19 => alu::ora(cpu, bus, AbsoluteY),
        0x1D => alu::ora(cpu, bus, AbsoluteX),
        0x1F => alu::ora(cpu, bus, AbsoluteLongX),

        0x21 => alu::and(cpu, bus, DirectIndirectX),
        0x23 => alu::and(cpu, bus, StackRelative),
        0x25 => alu::and(cpu, bus, Direct),
        0x27 => alu::and(cpu, bus, DirectIndirectLong),
        0x29 => alu::and(cpu, bus, Immediate),
        0x2D => alu::and(cpu, bus, Absolute),
        0x2F => alu::and(cpu, bus, AbsoluteLong),
        0x31 => alu::and(cpu, bus, DirectIndirectY),
        0x32 => alu::and(cpu, bus, DirectIndirect),
        0x33 => alu::and(cpu, bus, StackRelativeIndirectY),
        0x35 => alu::and(cpu, bus, DirectX),
        0x37 => alu::and(cpu, bus, DirectIndirectLongY),
        0x39 => alu::and(cpu, bus, AbsoluteY),
        0x3D => alu::and(cpu, bus, AbsoluteX),
        0x3F => alu::and(cpu, bus, AbsoluteLongX),

        0x41 => alu::eor(cpu, bus, DirectIndirectX),
        0x43 => alu::eor(cpu, bus, StackRelative),
        0x45 => alu::eor(cpu, bus, Direct),
        0x47 => alu::eor(cpu, bus, DirectIndirectLong),
        0x49 => alu::eor(cpu, bus, Immediate),
        0x4D => alu::eor(cpu, bus, Absolute),
        0x4F => alu::eor(cpu, bus, AbsoluteLong),
        0x51 => alu::eor(cpu, bus, DirectIndirectY),
        0x52 => alu::eor(cpu, bus, DirectIndirect),
        0x53 => alu::eor(cpu, bus, StackRelativeIndirectY),
        0x55 => alu::eor(cpu, bus, DirectX),
        0x57 => alu::eor(cpu, bus, DirectIndirectLongY),
        0x59 => alu::eor(cpu, bus, AbsoluteY),
        0x5D => alu::eor(cpu, bus, AbsoluteX),
        0x5F => alu::eor(cpu, bus, AbsoluteLongX),

        0x61 => alu::adc(cpu, bus, DirectIndirectX),
        0x63 => alu::adc(cpu, bus, StackRelative),
        0x65 => alu::adc(cpu, bus, Direct),
        0x67 => alu::adc(cpu, bus, DirectIndirectLong),
        0x69 => alu::adc(cpu, bus, Immediate),
        0x6D => alu::adc(cpu, bus, Absolute),
        0x6F => alu::adc(cpu, bus, AbsoluteLong),
        0x71 => alu::adc(cpu, bus, DirectIndirectY),
        0x72 => alu::adc(cpu, bus, DirectIndirect),
        0x73 => alu::adc(cpu, bus, StackRelativeIndirectY),
        0x75 => alu::adc(cpu, bus, DirectX),
        0x77 => alu::adc(cpu, bus, DirectIndirectLongY),
        0x79 => alu::adc(cpu, bus, AbsoluteY),
        0x7D => alu::adc(cpu, bus, AbsoluteX),
        0x7F => alu::adc(cpu, bus, AbsoluteLongX),

        0x81 => load::sta(cpu, bus, DirectIndirectX),
        0x83 => load::sta(cpu, bus, StackRelative),
        0x85 => load::sta(cpu, bus, Direct),
        0x87 => load::sta(cpu, bus, DirectIndirectLong),
        0x8D => load::sta(cpu, bus, Absolute),
        0x8F => load::sta(cpu, bus, AbsoluteLong),
        0x91 => load::sta(cpu, bus, DirectIndirectY),
        0x92 => load::sta(cpu, bus, DirectIndirect),
        0x93 => load::sta(cpu, bus, StackRelativeIndirectY),
        0x95 => load::sta(cpu, bus, DirectX),
        0x97 => load::sta(cpu, bus, DirectIndirectLongY),
        0x99 => load::sta(cpu, bus, AbsoluteY),
        0x9D => load::sta(cpu, bus, AbsoluteX),
        0x9F => load::sta(cpu, bus, AbsoluteLongX),

        0xA1 => load::lda(cpu, bus, DirectIndirectX),
        0xA3 => load::lda(cpu, bus, StackRelative),
        0xA5 => load::lda(cpu, bus, Direct),
        0xA7 => load::lda(cpu, bus, DirectIndirectLong),
        0xA9 => load::lda(cpu, bus, Immediate),
        0xAD => load::lda(cpu, bus, Absolute),
        0xAF => load::lda(cpu, bus, AbsoluteLong),
        0xB1 => load::lda(cpu, bus, DirectIndirectY),
        0xB2 => load::lda(cpu, bus, DirectIndirect),
        0xB3 => load::lda(cpu, bus, StackRelativeIndirectY),
        0xB5 => load::lda(cpu, bus, DirectX),
        0xB7 => load::lda(cpu, bus, DirectIndirectLongY),
        0xB9 => load::lda(cpu, bus, AbsoluteY),
        0xBD => load::lda(cpu, bus, AbsoluteX),
        0xBF => load::lda(cpu, bus, AbsoluteLongX),

        0xC1 => alu::cmp(cpu, bus, DirectIndirectX),
        0xC3 => alu::cmp(cpu, bus, StackRelative),
        0xC5 => alu::cmp(cpu, bus, Direct),
        0xC7 => alu::cmp(cpu, bus, DirectIndirectLong),
        0xC9 => alu::cmp(cpu, bus, Immediate),
        0xCD => alu::cmp(cpu, bus, Absolute),
        0xCF => alu::cmp(cpu, bus, AbsoluteLong),
        0xD1 => alu::cmp(cpu, bus, DirectIndirectY),
        0xD2 => alu::cmp(cpu, bus, DirectIndirect),
        0xD3 => alu::cmp(cpu, bus, StackRelativeIndirectY),
        0xD5 => alu::cmp(cpu, bus, DirectX),
        0xD7 => alu::cmp(cpu, bus, DirectIndirectLongY),
        0xD9 => alu::cmp(cpu, bus, AbsoluteY),
        0xDD => alu::cmp(cpu, bus, AbsoluteX),
        0xDF => alu::cmp(cpu, bus, AbsoluteLongX),

        0xE1 => alu::sbc(cpu, bus, DirectIndirectX),
        0xE3 => alu::sbc(cpu, bus, StackRelative),
        0xE5 => alu::sbc(cpu, bus, Direct),
        0xE7 => alu::sbc(cpu, bus, DirectIndirectLong),
        0xE9 => alu::sbc(cpu, bus, Immediate),
        0xED => alu::sbc(cpu, bus, Absolute),
        0xEF => alu::sbc(cpu, bus, AbsoluteLong),
        0xF1 => alu::sbc(cpu, bus, DirectIndirectY),
        0xF2 => alu::sbc(cpu, bus, DirectIndirect),
        0xF3 => alu::sbc(cpu, bus, StackRelativeIndirectY),
        0xF5 => alu::sbc(cpu, bus, DirectX),
        0xF7 => alu::sbc(cpu, bus, DirectIndirectLongY),
        0xF9 => alu::sbc(cpu, bus, AbsoluteY),
        0xFD => alu::sbc(cpu, bus, AbsoluteX),
        0xFF => alu::sbc(cpu, bus, AbsoluteLongX),

        // Shifts and rotates
        0x06 => modify_m(cpu, bus, Direct, alu::asl),
        0x0A => alu::asl_accumulator(cpu, bus),
        0x0E => modify_m(cpu, bus, Absolute, alu::asl),
        0x16 => modify_m(cpu, bus, DirectX, alu::asl),
        0x1E => modify_m(cpu, bus, AbsoluteX, alu::asl),
        0x26 => modify_m(cpu, bus, Direct, alu::rol),
        0x2A => alu::rol_accumulator(cpu, bus),
        0x2E => modify_m(cpu, bus, Absolute, alu::rol),
        0x36 => modify_m(cpu, bus, DirectX, alu::rol),
        0x3E => modify_m(cpu, bus, AbsoluteX, alu::rol),
        0x46 => modify_m(cpu, bus, Direct, alu::lsr),
        0x4A => alu::lsr_accumulator(cpu, bus),
        0x4E => modify_m(cpu, bus, Absolute, alu::lsr),
        0x56 => modify_m(cpu, bus, DirectX, alu::lsr),
        0x5E => modify_m(cpu, bus, AbsoluteX, alu::lsr),
        0x66 => modify_m(cpu, bus, Direct, alu::ror),
        0x6A => alu::ror_accumulator(cpu, bus),
        0x6E => modify_m(cpu, bus, Absolute, alu::ror),
        0x76 => modify_m(cpu, bus, DirectX, alu::ror),
        0x7E => modify_m(cpu, bus, AbsoluteX, alu::ror),

        // INC / DEC
        0x1A => alu::ina(cpu, bus),
        0x3A => alu::dea(cpu, bus),
        0xE6 => modify_m(cpu, bus, Direct, alu::inc),
        0xEE => modify_m(cpu, bus, Absolute, alu::inc),
        0xF6 => modify_m(cpu, bus, DirectX, alu::inc),
        0xFE => modify_m(cpu, bus, AbsoluteX, alu::inc),
        0xC6 => modify_m(cpu, bus, Direct, alu::dec),
        0xCE => modify_m(cpu, bus, Absolute, alu::dec),
        0xD6 => modify_m(cpu, bus, DirectX, alu::dec),
        0xDE => modify_m(cpu, bus, AbsoluteX, alu::dec),
        0xE8 => load::inx(cpu, bus),
        0xC8 => load::iny(cpu, bus),
        0xCA => load::dex(cpu, bus),
        0x88 => load::dey(cpu, bus),

        // BIT / TSB / TRB
        0x24 => alu::bit(cpu, bus, Direct),
        0x2C => alu::bit(cpu, bus, Absolute),
        0x34 => alu::bit(cpu, bus, DirectX),
        0x3C => alu::bit(cpu, bus, AbsoluteX),
        0x89 => alu::bit(cpu, bus, Immediate),
        0x04 => modify_m(cpu, bus, Direct, alu::tsb),
        0x0C => modify_m(cpu, bus, Absolute, alu::tsb),
        0x14 => modify_m(cpu, bus, Direct, alu::trb),
        0x1C => modify_m(cpu, bus, Absolute, alu::trb),

        // Index loads/stores and compares
        0xA2 => load::ldx(cpu, bus, Immediate),
        0xA6 => load::ldx(cpu, bus, Direct),
        0xAE => load::ldx(cpu, bus, Absolute),
        0xB6 => load::ldx(cpu, bus, DirectY),
        0xBE => load::ldx(cpu, bus, AbsoluteY),
        0xA0 => load::ldy(cpu, bus, Immediate),
        0xA4 => load::ldy(cpu, bus, Direct),
        0xAC => load::ldy(cpu, bus, Absolute),
        0xB4 => load::ldy(cpu, bus, DirectX),
        0xBC => load::ldy(cpu, bus, AbsoluteX),
        0x86 => load::stx(cpu, bus, Direct),
        0x8E => load::stx(cpu, bus, Absolute),
        0x96 => load::stx(cpu, bus, DirectY),
        0x84 => load::sty(cpu, bus, Direct),
        0x8C => load::sty(cpu, bus, Absolute),
        0x94 => load::sty(cpu, bus, DirectX),
        0xE0 => alu::cpx(cpu, bus, Immediate),
        0xE4 => alu::cpx(cpu, bus, Direct),
        0xEC => alu::cpx(cpu, bus, Absolute),
        0xC0 => alu::cpy(cpu, bus, Immediate),
        0xC4 => alu::cpy(cpu, bus, Direct),
        0xCC => alu::cpy(cpu, bus, Absolute),

        // STZ
        0x64 => load::stz(cpu, bus, Direct),
        0x74 => load::stz(cpu, bus, DirectX),
        0x9C => load::stz(cpu, bus, Absolute),
        0x9E => load::stz(cpu, bus, AbsoluteX),

        // Branches
        0x10 => flow::branch(cpu, bus, |p| !p.negative),
        0x30 => flow::branch(cpu, bus, |p| p.negative),
        0x50 => flow::branch(cpu, bus, |p| !p.overflow),
        0x70 => flow::branch(cpu, bus, |p| p.overflow),
        0x80 => flow::branch(cpu, bus, |_| true),
        0x90 => flow::branch(cpu, bus, |p| !p.carry),
        0xB0 => flow::branch(cpu, bus, |p| p.carry),
        0xD0 => flow::branch(cpu, bus, |p| !p.zero),
        0xF0 => flow::branch(cpu, bus, |p| p.zero),
        0x82 => flow::brl(cpu, bus),

        // Jumps and returns
        0x4C => flow::jmp_absolute(cpu, bus),
        0x5C => flow::jml_absolute_long(cpu, bus),
        0x6C => flow::jmp_indirect(cpu, bus),
        0x7C => flow::jmp_indirect_x(cpu, bus),
        0xDC => flow::jml_indirect(cpu, bus),
        0x20 => flow::jsr(cpu, bus),
        0x22 => flow::jsl(cpu, bus),
        0xFC => flow::jsr_indirect_x(cpu, bus),
        0x60 => flow::rts(cpu, bus),
        0x6B => flow::rtl(cpu, bus),
        0x40 => flow::rti(cpu, bus),

        // Software interrupts
        0x00 => flow::brk(cpu, bus),
        0x02 => flow::cop(cpu, bus),

        // Stack pushes/pulls
        0x48 => load::pha(cpu, bus),
        0x68 => load::pla(cpu, bus),
        0xDA => load::phx(cpu, bus),
        0xFA => load::plx(cpu, bus),
        0x5A => load::phy(cpu, bus),
        0x7A => load::ply(cpu, bus),
        0x08 => flow::php(cpu, bus),
        0x28 => flow::plp(cpu, bus),
        0x8B => load::phb(cpu, bus),
        0xAB => load::plb(cpu, bus),
        0x0B => load::phd(cpu, bus),
        0x2B => load::pld(cpu, bus),
        0x4B => load::phk(cpu, bus),
        0x62 => load::per(cpu, bus),
        0xD4 => load::pei(cpu, bus),
        0xF4 => load::pea(cpu, bus),

        // Transfers
        0xAA => load::transfer_to_index(cpu, bus, |r| r.a, |r, v| r.x = v),
        0xA8 => load::transfer_to_index(cpu, bus, |r| r.a, |r, v| r.y = v),
        0xBA => load::transfer_to_index(cpu, bus, |r| r.s, |r, v| r.x = v),
        0x8A => load::txa(cpu, bus),
        0x98 => load::tya(cpu, bus),
        0x9B => load::transfer_to_index(cpu, bus, |r| r.x, |r, v| r.y = v),
        0xBB => load::transfer_to_index(cpu, bus, |r| r.y, |r, v| r.x = v),
        0x9A => load::txs(cpu, bus),
        0x1B => load::tcs(cpu, bus),
        0x3B => load::tsc(cpu, bus),
        0x5B => load::tcd(cpu, bus),
        0x7B => load::tdc(cpu, bus),
        0xEB => load::xba(cpu, bus),

        // Block moves
        0x44 => load::block_move(cpu, bus, load::BlockMoveDirection::Decrement),
        0x54 => load::block_move(cpu, bus, load::BlockMoveDirection::Increment),

        // Flag operations
        0x18 => flow::set_flag(cpu, bus, |p| p.carry = false),
        0x38 => flow::set_flag(cpu, bus, |p| p.carry = true),
        0x58 => flow::set_flag(cpu, bus, |p| p.irq_disable = false),
        0x78 => flow::set_flag(cpu, bus, |p| p.irq_disable = true),
        0xB8 => flow::set_flag(cpu, bus, |p| p.overflow = false),
        0xD8 => flow::set_flag(cpu, bus, |p| p.decimal = false),
        0xF8 => flow::set_flag(cpu, bus, |p| p.decimal = true),
        0xC2 => flow::rep(cpu, bus),
        0xE2 => flow::sep(cpu, bus),
        0xFB => flow::xce(cpu, bus),

        // NOP / WDM / STP / WAI
        0xEA => cpu.idle(bus),
        0x42 => {
            // WDM: 2-byte NOP reserved for future expansion
            cpu.fetch(bus);
        }
        0xDB => {
            cpu.set_stopped();
            cpu.idle(bus);
        }
        0xCB => {
            cpu.set_waiting();
            cpu.idle(bus);
        }
    }
}
