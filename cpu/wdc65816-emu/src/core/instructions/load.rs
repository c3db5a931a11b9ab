//! Loads, stores, transfers, stack operations, and block moves

use crate::BusInterface;
use crate::core::Wdc65816;
use crate::core::instructions::{
    AddressingMode, effective_address, read_operand_m, read_operand_x,
};

pub(crate) fn lda<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, mode: AddressingMode) {
    let value = read_operand_m(cpu, bus, mode);
    if cpu.registers.p.memory_8bit {
        cpu.registers.a = (cpu.registers.a & 0xFF00) | (value & 0x00FF);
    } else {
        cpu.registers.a = value;
    }
    let m8 = cpu.registers.p.memory_8bit;
    cpu.set_nz(value, m8);
}

pub(crate) fn ldx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, mode: AddressingMode) {
    let value = read_operand_x(cpu, bus, mode);
    cpu.registers.x = value;
    let x8 = cpu.registers.p.index_8bit;
    cpu.set_nz(value, x8);
}

pub(crate) fn ldy<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, mode: AddressingMode) {
    let value = read_operand_x(cpu, bus, mode);
    cpu.registers.y = value;
    let x8 = cpu.registers.p.index_8bit;
    cpu.set_nz(value, x8);
}

pub(crate) fn sta<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, mode: AddressingMode) {
    let address = effective_address(cpu, bus, mode, true);
    let value = cpu.registers.a;
    cpu.write_m(bus, address, value);
}

pub(crate) fn stx<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, mode: AddressingMode) {
    let address = effective_address(cpu, bus, mode, true);
    let value = cpu.registers.x;
    if cpu.registers.p.index_8bit {
        cpu.write8(bus, address, value as u8);
    } else {
        cpu.write16(bus, address, value);
    }
}

pub(crate) fn sty<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, mode: AddressingMode) {
    let address = effective_address(cpu, bus, mode, true);
    let value = cpu.registers.y;
    if cpu.registers.p.index_8bit {
        cpu.write8(bus, address, value as u8);
    } else {
        cpu.write16(bus, address, value);
    }
}

pub(crate) fn stz<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, mode: AddressingMode) {
    let address = effective_address(cpu, bus, mode, true);
    cpu.write_m(bus, address, 0);
}

// Index increments --------------------------------------------------------------------------

macro_rules! impl_index_step {
    ($name:ident, $field:ident, $op:ident) => {
        pub(crate) fn $name<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
            cpu.idle(bus);
            let mask = if cpu.registers.p.index_8bit { 0x00FF } else { 0xFFFF };
            let result = cpu.registers.$field.$op(1) & mask;
            cpu.registers.$field = result;
            let x8 = cpu.registers.p.index_8bit;
            cpu.set_nz(result, x8);
        }
    };
}

impl_index_step!(inx, x, wrapping_add);
impl_index_step!(iny, y, wrapping_add);
impl_index_step!(dex, x, wrapping_sub);
impl_index_step!(dey, y, wrapping_sub);

// Transfers ---------------------------------------------------------------------------------

/// Transfers whose destination is an index register truncate to the X width.
pub(crate) fn transfer_to_index<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    source: impl FnOnce(&crate::core::Registers) -> u16,
    dest: impl FnOnce(&mut crate::core::Registers, u16),
) {
    cpu.idle(bus);
    let value = source(&cpu.registers);
    let value = if cpu.registers.p.index_8bit { value & 0x00FF } else { value };
    dest(&mut cpu.registers, value);
    let x8 = cpu.registers.p.index_8bit;
    cpu.set_nz(value, x8);
}

pub(crate) fn txa<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    transfer_to_accumulator(cpu, bus, |r| r.x);
}

pub(crate) fn tya<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    transfer_to_accumulator(cpu, bus, |r| r.y);
}

fn transfer_to_accumulator<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    source: impl FnOnce(&crate::core::Registers) -> u16,
) {
    cpu.idle(bus);
    let value = source(&cpu.registers);
    if cpu.registers.p.memory_8bit {
        cpu.registers.a = (cpu.registers.a & 0xFF00) | (value & 0x00FF);
    } else {
        cpu.registers.a = value;
    }
    let m8 = cpu.registers.p.memory_8bit;
    cpu.set_nz(value, m8);
}

pub(crate) fn txs<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    cpu.registers.s = cpu.registers.x;
    cpu.constrain_stack();
}

/// TCS: 16-bit transfer regardless of M; no flags.
pub(crate) fn tcs<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    cpu.registers.s = cpu.registers.a;
    cpu.constrain_stack();
}

pub(crate) fn tsc<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    let value = cpu.registers.s;
    cpu.registers.a = value;
    cpu.set_nz(value, false);
}

pub(crate) fn tcd<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    let value = cpu.registers.a;
    cpu.registers.d = value;
    cpu.set_nz(value, false);
}

pub(crate) fn tdc<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    let value = cpu.registers.d;
    cpu.registers.a = value;
    cpu.set_nz(value, false);
}

/// XBA swaps accumulator bytes; N/Z from the new low byte.
pub(crate) fn xba<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    cpu.idle(bus);
    cpu.registers.a = cpu.registers.a.rotate_right(8);
    let low: u16 = cpu.registers.a & 0x00FF;
    cpu.set_nz(low, true);
}

// Stack -------------------------------------------------------------------------------------

pub(crate) fn pha<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    let value = cpu.registers.a;
    if cpu.registers.p.memory_8bit {
        cpu.push(bus, value as u8);
    } else {
        cpu.push_u16(bus, value);
    }
}

pub(crate) fn pla<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    cpu.idle(bus);
    if cpu.registers.p.memory_8bit {
        let value = cpu.pull(bus);
        cpu.registers.a = (cpu.registers.a & 0xFF00) | u16::from(value);
        cpu.set_nz(value.into(), true);
    } else {
        let value = cpu.pull_u16(bus);
        cpu.registers.a = value;
        cpu.set_nz(value, false);
    }
}

macro_rules! impl_push_index {
    ($name:ident, $field:ident) => {
        pub(crate) fn $name<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
            cpu.idle(bus);
            let value = cpu.registers.$field;
            if cpu.registers.p.index_8bit {
                cpu.push(bus, value as u8);
            } else {
                cpu.push_u16(bus, value);
            }
        }
    };
}

macro_rules! impl_pull_index {
    ($name:ident, $field:ident) => {
        pub(crate) fn $name<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
            cpu.idle(bus);
            cpu.idle(bus);
            let value = if cpu.registers.p.index_8bit {
                cpu.pull(bus).into()
            } else {
                cpu.pull_u16(bus)
            };
            cpu.registers.$field = value;
            let x8 = cpu.registers.p.index_8bit;
            cpu.set_nz(value, x8);
        }
    };
}

impl_push_index!(phx, x);
impl_push_index!(phy, y);
impl_pull_index!(plx, x);
impl_pull_index!(ply, y);

pub(crate) fn phb<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    let value = cpu.registers.db;
    cpu.push(bus, value);
}

pub(crate) fn plb<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    cpu.idle(bus);
    let value = cpu.pull(bus);
    cpu.registers.db = value;
    cpu.set_nz(value.into(), true);
}

pub(crate) fn phd<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    let value = cpu.registers.d;
    cpu.push_u16(bus, value);
}

pub(crate) fn pld<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    cpu.idle(bus);
    let value = cpu.pull_u16(bus);
    cpu.registers.d = value;
    cpu.set_nz(value, false);
}

pub(crate) fn phk<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    cpu.idle(bus);
    let value = cpu.registers.pb;
    cpu.push(bus, value);
}

/// PEA pushes an immediate 16-bit value.
pub(crate) fn pea<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let value = cpu.fetch_u16(bus);
    cpu.push_u16(bus, value);
}

/// PEI pushes the 16-bit word at a direct page address.
pub(crate) fn pei<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let address = effective_address(cpu, bus, AddressingMode::Direct, false);
    let value = cpu.read16(bus, address);
    cpu.push_u16(bus, value);
}

/// PER pushes PC plus a 16-bit displacement.
pub(crate) fn per<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B) {
    let displacement = cpu.fetch_u16(bus);
    cpu.idle(bus);
    let value = cpu.registers.pc.wrapping_add(displacement);
    cpu.push_u16(bus, value);
}

// Block moves -------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub(crate) enum BlockMoveDirection {
    /// MVN
    Increment,
    /// MVP
    Decrement,
}

/// MVN/MVP copy (C+1) bytes between banks, 7 cycles per byte. The whole move executes here;
/// interrupt latency in the middle of a block move is not modeled.
pub(crate) fn block_move<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    direction: BlockMoveDirection,
) {
    let dest_bank = cpu.fetch(bus);
    let source_bank = cpu.fetch(bus);
    cpu.registers.db = dest_bank;

    loop {
        let source = (u32::from(source_bank) << 16) | u32::from(cpu.registers.x);
        let dest = (u32::from(dest_bank) << 16) | u32::from(cpu.registers.y);
        let value = cpu.read8(bus, source);
        cpu.write8(bus, dest, value);
        cpu.idle(bus);
        cpu.idle(bus);

        let index_mask = if cpu.registers.p.index_8bit { 0x00FF } else { 0xFFFF };
        match direction {
            BlockMoveDirection::Increment => {
                cpu.registers.x = cpu.registers.x.wrapping_add(1) & index_mask;
                cpu.registers.y = cpu.registers.y.wrapping_add(1) & index_mask;
            }
            BlockMoveDirection::Decrement => {
                cpu.registers.x = cpu.registers.x.wrapping_sub(1) & index_mask;
                cpu.registers.y = cpu.registers.y.wrapping_sub(1) & index_mask;
            }
        }

        let count = cpu.registers.a.wrapping_sub(1);
        cpu.registers.a = count;
        if count == 0xFFFF {
            break;
        }
    }
}
