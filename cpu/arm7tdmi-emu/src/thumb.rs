//! Thumb-state instruction decode and execution

use crate::bus::{BusInterface, MemoryCycle};
use crate::instructions::condition_passed;
use crate::{Arm7Tdmi, CpuState};
use retrocore_common::num::GetBit;

pub(crate) fn execute_thumb<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u16) {
    let opcode = u32::from(opcode);

    match opcode >> 13 {
        0b000 => {
            if (opcode >> 11) & 0x3 == 0x3 {
                add_subtract(cpu, opcode);
            } else {
                shift_immediate(cpu, opcode);
            }
        }
        0b001 => immediate_op(cpu, opcode),
        0b010 => match (opcode >> 10) & 0x7 {
            0b000 => alu_op(cpu, bus, opcode),
            0b001 => hi_register_op(cpu, opcode),
            0b010 | 0b011 => load_pc_relative(cpu, bus, opcode),
            _ => load_store_register_offset(cpu, bus, opcode),
        },
        0b011 => load_store_immediate_offset(cpu, bus, opcode),
        0b100 => {
            if opcode.bit(12) {
                load_store_sp_relative(cpu, bus, opcode);
            } else {
                load_store_halfword(cpu, bus, opcode);
            }
        }
        0b101 => {
            if opcode.bit(12) {
                misc_stack(cpu, bus, opcode);
            } else {
                address_generate(cpu, opcode);
            }
        }
        0b110 => {
            if opcode.bit(12) {
                conditional_branch(cpu, opcode);
            } else {
                block_transfer(cpu, bus, opcode);
            }
        }
        0b111 => {
            if opcode.bit(12) {
                long_branch_link(cpu, opcode);
            } else if opcode.bit(11) {
                // Unused encoding (BLX on later architectures)
                cpu.raise_undefined();
            } else {
                unconditional_branch(cpu, opcode);
            }
        }
        _ => unreachable!("3-bit field"),
    }
}

fn set_nz(cpu: &mut Arm7Tdmi, result: u32) {
    let new_cpsr = cpu.cpsr().with_sign(result.bit(31)).with_zero(result == 0);
    *cpu.cpsr_mut() = new_cpsr;
}

fn add_with_flags(cpu: &mut Arm7Tdmi, op1: u32, op2: u32, carry_in: u32) -> u32 {
    let sum = u64::from(op1) + u64::from(op2) + u64::from(carry_in);
    let result = sum as u32;
    let new_cpsr = cpu
        .cpsr()
        .with_sign(result.bit(31))
        .with_zero(result == 0)
        .with_carry(sum > u64::from(u32::MAX))
        .with_overflow((op1 ^ result) & (op2 ^ result) & (1 << 31) != 0);
    *cpu.cpsr_mut() = new_cpsr;
    result
}

fn sub_with_flags(cpu: &mut Arm7Tdmi, op1: u32, op2: u32, carry_in: u32) -> u32 {
    // carry_in = 1 for plain SUB/CMP, CPSR carry for SBC
    let op2_inverted = !op2;
    add_with_flags(cpu, op1, op2_inverted, carry_in)
}

// Format 1: shift by immediate
fn shift_immediate(cpu: &mut Arm7Tdmi, opcode: u32) {
    let op = (opcode >> 11) & 0x3;
    let amount = (opcode >> 6) & 0x1F;
    let rs = (opcode >> 3) & 0x7;
    let rd = opcode & 0x7;

    let value = cpu.read_register(rs);
    let carry_in = cpu.cpsr().carry();
    let (result, carry) = crate::instructions::thumb_shift(value, op, amount, carry_in);

    cpu.write_register(rd, result);
    let new_cpsr =
        cpu.cpsr().with_sign(result.bit(31)).with_zero(result == 0).with_carry(carry);
    *cpu.cpsr_mut() = new_cpsr;
}

// Format 2: add/subtract register or 3-bit immediate
fn add_subtract(cpu: &mut Arm7Tdmi, opcode: u32) {
    let immediate = opcode.bit(10);
    let subtract = opcode.bit(9);
    let operand = (opcode >> 6) & 0x7;
    let rs = (opcode >> 3) & 0x7;
    let rd = opcode & 0x7;

    let op1 = cpu.read_register(rs);
    let op2 = if immediate { operand } else { cpu.read_register(operand) };

    let result = if subtract {
        sub_with_flags(cpu, op1, op2, 1)
    } else {
        add_with_flags(cpu, op1, op2, 0)
    };
    cpu.write_register(rd, result);
}

// Format 3: MOV/CMP/ADD/SUB with 8-bit immediate
fn immediate_op(cpu: &mut Arm7Tdmi, opcode: u32) {
    let op = (opcode >> 11) & 0x3;
    let rd = (opcode >> 8) & 0x7;
    let imm = opcode & 0xFF;

    match op {
        0 => {
            cpu.write_register(rd, imm);
            set_nz(cpu, imm);
        }
        1 => {
            let op1 = cpu.read_register(rd);
            sub_with_flags(cpu, op1, imm, 1);
        }
        2 => {
            let op1 = cpu.read_register(rd);
            let result = add_with_flags(cpu, op1, imm, 0);
            cpu.write_register(rd, result);
        }
        3 => {
            let op1 = cpu.read_register(rd);
            let result = sub_with_flags(cpu, op1, imm, 1);
            cpu.write_register(rd, result);
        }
        _ => unreachable!("2-bit field"),
    }
}

// Format 4: register ALU operations
fn alu_op<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u32) {
    let op = (opcode >> 6) & 0xF;
    let rs = (opcode >> 3) & 0x7;
    let rd = opcode & 0x7;

    let op1 = cpu.read_register(rd);
    let op2 = cpu.read_register(rs);
    let carry = cpu.cpsr().carry();

    match op {
        0x0 => {
            let result = op1 & op2;
            cpu.write_register(rd, result);
            set_nz(cpu, result);
        }
        0x1 => {
            let result = op1 ^ op2;
            cpu.write_register(rd, result);
            set_nz(cpu, result);
        }
        0x2 | 0x3 | 0x4 | 0x7 => {
            // Register-amount shifts: LSL, LSR, ASR, ROR; one internal cycle
            cpu.internal_cycles(bus, 1);
            let shift_type = match op {
                0x2 => 0,
                0x3 => 1,
                0x4 => 2,
                _ => 3,
            };
            let (result, carry_out) =
                crate::instructions::thumb_shift_register(op1, shift_type, op2 & 0xFF, carry);
            cpu.write_register(rd, result);
            let new_cpsr = cpu
                .cpsr()
                .with_sign(result.bit(31))
                .with_zero(result == 0)
                .with_carry(carry_out);
            *cpu.cpsr_mut() = new_cpsr;
        }
        0x5 => {
            let result = add_with_flags(cpu, op1, op2, u32::from(carry));
            cpu.write_register(rd, result);
        }
        0x6 => {
            let result = sub_with_flags(cpu, op1, op2, u32::from(carry));
            cpu.write_register(rd, result);
        }
        0x8 => {
            set_nz(cpu, op1 & op2);
        }
        0x9 => {
            let result = sub_with_flags(cpu, 0, op2, 1);
            cpu.write_register(rd, result);
        }
        0xA => {
            sub_with_flags(cpu, op1, op2, 1);
        }
        0xB => {
            add_with_flags(cpu, op1, op2, 0);
        }
        0xC => {
            let result = op1 | op2;
            cpu.write_register(rd, result);
            set_nz(cpu, result);
        }
        0xD => {
            let cycles = crate::instructions::multiply_cycles(op1);
            cpu.internal_cycles(bus, cycles);
            let result = op1.wrapping_mul(op2);
            cpu.write_register(rd, result);
            set_nz(cpu, result);
        }
        0xE => {
            let result = op1 & !op2;
            cpu.write_register(rd, result);
            set_nz(cpu, result);
        }
        0xF => {
            let result = !op2;
            cpu.write_register(rd, result);
            set_nz(cpu, result);
        }
        _ => unreachable!("4-bit field"),
    }
}

// Format 5: hi register operations / branch exchange
fn hi_register_op(cpu: &mut Arm7Tdmi, opcode: u32) {
    let op = (opcode >> 8) & 0x3;
    let rs = ((opcode >> 3) & 0x7) | ((opcode & 0x40) >> 3);
    let rd = (opcode & 0x7) | ((opcode & 0x80) >> 4);

    match op {
        0 => {
            let result = cpu.read_register(rd).wrapping_add(cpu.read_register(rs));
            cpu.write_register(rd, result);
        }
        1 => {
            let op1 = cpu.read_register(rd);
            let op2 = cpu.read_register(rs);
            sub_with_flags(cpu, op1, op2, 1);
        }
        2 => {
            let value = cpu.read_register(rs);
            cpu.write_register(rd, value);
        }
        3 => {
            let target = cpu.read_register(rs);
            if target.bit(0) {
                cpu.write_register(15, target & !1);
            } else {
                cpu.set_state(CpuState::Arm);
                cpu.write_register(15, target & !3);
            }
        }
        _ => unreachable!("2-bit field"),
    }
}

// Format 6: PC-relative load
fn load_pc_relative<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u32) {
    let rd = (opcode >> 8) & 0x7;
    let offset = (opcode & 0xFF) << 2;

    let base = (cpu.read_register(15) & !3).wrapping_add(offset);
    cpu.count_access();
    let value = bus.read_word(base, MemoryCycle::N);
    cpu.internal_cycles(bus, 1);
    cpu.write_register(rd, value);
}

// Formats 7/8: register offset loads/stores
fn load_store_register_offset<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u32) {
    let ro = (opcode >> 6) & 0x7;
    let rb = (opcode >> 3) & 0x7;
    let rd = opcode & 0x7;
    let address = cpu.read_register(rb).wrapping_add(cpu.read_register(ro));

    cpu.count_access();
    if opcode.bit(9) {
        // Format 8: halfword and sign-extended transfers
        match (opcode >> 10) & 0x3 {
            0b00 => {
                let value = cpu.read_register(rd);
                bus.write_halfword(address & !1, value as u16, MemoryCycle::N);
            }
            0b01 => {
                let value = bus.read_byte(address, MemoryCycle::N) as i8 as u32;
                cpu.internal_cycles(bus, 1);
                cpu.write_register(rd, value);
            }
            0b10 => {
                let half = bus.read_halfword(address & !1, MemoryCycle::N);
                let value = u32::from(half).rotate_right(8 * (address & 1));
                cpu.internal_cycles(bus, 1);
                cpu.write_register(rd, value);
            }
            0b11 => {
                let value = if address & 1 != 0 {
                    bus.read_byte(address, MemoryCycle::N) as i8 as u32
                } else {
                    bus.read_halfword(address, MemoryCycle::N) as i16 as u32
                };
                cpu.internal_cycles(bus, 1);
                cpu.write_register(rd, value);
            }
            _ => unreachable!("2-bit field"),
        }
    } else {
        let load = opcode.bit(11);
        let byte = opcode.bit(10);
        match (load, byte) {
            (false, false) => {
                let value = cpu.read_register(rd);
                bus.write_word(address & !3, value, MemoryCycle::N);
            }
            (false, true) => {
                let value = cpu.read_register(rd);
                bus.write_byte(address, value as u8, MemoryCycle::N);
            }
            (true, false) => {
                let value =
                    bus.read_word(address & !3, MemoryCycle::N).rotate_right(8 * (address & 3));
                cpu.internal_cycles(bus, 1);
                cpu.write_register(rd, value);
            }
            (true, true) => {
                let value = bus.read_byte(address, MemoryCycle::N).into();
                cpu.internal_cycles(bus, 1);
                cpu.write_register(rd, value);
            }
        }
    }
}

// Format 9: immediate offset loads/stores
fn load_store_immediate_offset<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u32) {
    let byte = opcode.bit(12);
    let load = opcode.bit(11);
    let offset = (opcode >> 6) & 0x1F;
    let rb = (opcode >> 3) & 0x7;
    let rd = opcode & 0x7;

    let offset = if byte { offset } else { offset << 2 };
    let address = cpu.read_register(rb).wrapping_add(offset);

    cpu.count_access();
    match (load, byte) {
        (false, false) => {
            let value = cpu.read_register(rd);
            bus.write_word(address & !3, value, MemoryCycle::N);
        }
        (false, true) => {
            let value = cpu.read_register(rd);
            bus.write_byte(address, value as u8, MemoryCycle::N);
        }
        (true, false) => {
            let value = bus.read_word(address & !3, MemoryCycle::N).rotate_right(8 * (address & 3));
            cpu.internal_cycles(bus, 1);
            cpu.write_register(rd, value);
        }
        (true, true) => {
            let value = bus.read_byte(address, MemoryCycle::N).into();
            cpu.internal_cycles(bus, 1);
            cpu.write_register(rd, value);
        }
    }
}

// Format 10: halfword immediate offset
fn load_store_halfword<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u32) {
    let load = opcode.bit(11);
    let offset = ((opcode >> 6) & 0x1F) << 1;
    let rb = (opcode >> 3) & 0x7;
    let rd = opcode & 0x7;
    let address = cpu.read_register(rb).wrapping_add(offset);

    cpu.count_access();
    if load {
        let half = bus.read_halfword(address & !1, MemoryCycle::N);
        let value = u32::from(half).rotate_right(8 * (address & 1));
        cpu.internal_cycles(bus, 1);
        cpu.write_register(rd, value);
    } else {
        let value = cpu.read_register(rd);
        bus.write_halfword(address & !1, value as u16, MemoryCycle::N);
    }
}

// Format 11: SP-relative loads/stores
fn load_store_sp_relative<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u32) {
    let load = opcode.bit(11);
    let rd = (opcode >> 8) & 0x7;
    let offset = (opcode & 0xFF) << 2;
    let address = cpu.read_register(13).wrapping_add(offset);

    cpu.count_access();
    if load {
        let value = bus.read_word(address & !3, MemoryCycle::N).rotate_right(8 * (address & 3));
        cpu.internal_cycles(bus, 1);
        cpu.write_register(rd, value);
    } else {
        let value = cpu.read_register(rd);
        bus.write_word(address & !3, value, MemoryCycle::N);
    }
}

// Format 12: load address
fn address_generate(cpu: &mut Arm7Tdmi, opcode: u32) {
    let sp = opcode.bit(11);
    let rd = (opcode >> 8) & 0x7;
    let offset = (opcode & 0xFF) << 2;

    let base = if sp { cpu.read_register(13) } else { cpu.read_register(15) & !3 };
    cpu.write_register(rd, base.wrapping_add(offset));
}

// Formats 13/14: SP adjust and push/pop
fn misc_stack<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u32) {
    if (opcode >> 8) & 0xF == 0 {
        // ADD SP, #imm / SUB SP, #imm
        let offset = (opcode & 0x7F) << 2;
        let sp = cpu.read_register(13);
        let sp = if opcode.bit(7) { sp.wrapping_sub(offset) } else { sp.wrapping_add(offset) };
        cpu.write_register(13, sp);
        return;
    }

    // PUSH/POP
    let load = opcode.bit(11);
    let pc_lr = opcode.bit(8);
    let register_list = opcode & 0xFF;

    let mut cycle = MemoryCycle::N;
    if load {
        let mut address = cpu.read_register(13);
        for register in 0..8 {
            if register_list.bit(register) {
                cpu.count_access();
                let value = bus.read_word(address, cycle);
                cpu.write_register(register.into(), value);
                address = address.wrapping_add(4);
                cycle = MemoryCycle::S;
            }
        }
        if pc_lr {
            cpu.count_access();
            let value = bus.read_word(address, cycle);
            cpu.write_register(15, value & !1);
            address = address.wrapping_add(4);
        }
        cpu.write_register(13, address);
        cpu.internal_cycles(bus, 1);
    } else {
        let count = register_list.count_ones() + u32::from(pc_lr);
        let base = cpu.read_register(13).wrapping_sub(4 * count);
        let mut address = base;
        for register in 0..8 {
            if register_list.bit(register) {
                let value = cpu.read_register(register.into());
                cpu.count_access();
                bus.write_word(address, value, cycle);
                address = address.wrapping_add(4);
                cycle = MemoryCycle::S;
            }
        }
        if pc_lr {
            let value = cpu.read_register(14);
            cpu.count_access();
            bus.write_word(address, value, cycle);
        }
        cpu.write_register(13, base);
    }
}

// Format 15: multiple loads/stores
fn block_transfer<B: BusInterface>(cpu: &mut Arm7Tdmi, bus: &mut B, opcode: u32) {
    let load = opcode.bit(11);
    let rb = (opcode >> 8) & 0x7;
    let register_list = opcode & 0xFF;

    let mut address = cpu.read_register(rb);
    let mut cycle = MemoryCycle::N;
    let mut first = true;

    if register_list == 0 {
        // Empty list: transfers R15 and steps the base by 0x40
        if load {
            cpu.count_access();
            let value = bus.read_word(address, cycle);
            cpu.write_register(15, value & !1);
        } else {
            let value = cpu.read_register(15).wrapping_add(2);
            cpu.count_access();
            bus.write_word(address, value, cycle);
        }
        cpu.write_register(rb, address.wrapping_add(0x40));
        return;
    }

    let final_address = address.wrapping_add(4 * register_list.count_ones());
    for register in 0..8 {
        if !register_list.bit(register) {
            continue;
        }

        if load {
            cpu.count_access();
            let value = bus.read_word(address, cycle);
            cpu.write_register(register.into(), value);
        } else {
            // Base writeback is visible to subsequent stores
            if first {
                cpu.write_register(rb, final_address);
            }
            let value = cpu.read_register(register.into());
            cpu.count_access();
            bus.write_word(address, value, cycle);
        }
        address = address.wrapping_add(4);
        cycle = MemoryCycle::S;
        first = false;
    }

    if load {
        cpu.internal_cycles(bus, 1);
        // Writeback unless the base register was loaded
        if !register_list.bit(rb as u8) {
            cpu.write_register(rb, final_address);
        }
    }
}

// Format 16: conditional branch
fn conditional_branch(cpu: &mut Arm7Tdmi, opcode: u32) {
    let condition = (opcode >> 8) & 0xF;
    if condition == 0xF {
        cpu.raise_swi();
        return;
    }

    if condition_passed(cpu.cpsr(), condition) {
        let offset = ((opcode & 0xFF) as i8 as i32) << 1;
        let target = cpu.read_register(15).wrapping_add(offset as u32);
        cpu.write_register(15, target);
    }
}

// Format 18: unconditional branch
fn unconditional_branch(cpu: &mut Arm7Tdmi, opcode: u32) {
    let offset = (((opcode & 0x7FF) << 21) as i32) >> 20;
    let target = cpu.read_register(15).wrapping_add(offset as u32);
    cpu.write_register(15, target);
}

// Format 19: BL in two halves
fn long_branch_link(cpu: &mut Arm7Tdmi, opcode: u32) {
    if !opcode.bit(11) {
        // First half: LR = PC + (offset << 12)
        let offset = (((opcode & 0x7FF) << 21) as i32) >> 9;
        let lr = cpu.read_register(15).wrapping_add(offset as u32);
        cpu.write_register(14, lr);
    } else {
        // Second half: branch and set LR to the return address with bit 0 set
        let offset = (opcode & 0x7FF) << 1;
        let target = cpu.read_register(14).wrapping_add(offset);
        let return_address = cpu.read_register(15).wrapping_sub(2) | 1;
        cpu.write_register(14, return_address);
        cpu.write_register(15, target & !1);
    }
}
