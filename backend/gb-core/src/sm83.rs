//! Sharp SM83, the Game Boy CPU
//!
//! A Z80-lite: no IX/IY, no shadow registers, no I/O ports, different rotate flags, and a few
//! opcodes of its own (LDH, LD (nn),SP, ADD SP,e8, STOP). Instruction-stepped;
//! [`Sm83::execute_instruction`] returns T-cycles at the current speed.

use crate::HardwareMode;
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

pub(crate) trait BusInterface {
    fn read(&mut self, address: u16) -> u8;

    fn write(&mut self, address: u16, value: u8);

    /// IF register contents (low 5 bits).
    fn interrupt_flags(&self) -> u8;

    /// IE register contents (low 5 bits).
    fn interrupt_enable(&self) -> u8;

    /// Acknowledge (clear) one interrupt flag bit.
    fn acknowledge_interrupt(&mut self, mask: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InterruptType {
    VBlank,
    LcdStatus,
    Timer,
    Serial,
    Joypad,
}

impl InterruptType {
    // In descending priority order
    pub(crate) const ALL: [Self; 5] =
        [Self::VBlank, Self::LcdStatus, Self::Timer, Self::Serial, Self::Joypad];

    fn interrupt_vector(self) -> u16 {
        match self {
            Self::VBlank => 0x0040,
            Self::LcdStatus => 0x0048,
            Self::Timer => 0x0050,
            Self::Serial => 0x0058,
            Self::Joypad => 0x0060,
        }
    }

    pub(crate) fn register_mask(self) -> u8 {
        match self {
            Self::VBlank => 1 << 0,
            Self::LcdStatus => 1 << 1,
            Self::Timer => 1 << 2,
            Self::Serial => 1 << 3,
            Self::Joypad => 1 << 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub(crate) struct Flags {
    pub(crate) zero: bool,
    pub(crate) subtract: bool,
    pub(crate) half_carry: bool,
    pub(crate) carry: bool,
}

impl From<Flags> for u8 {
    fn from(value: Flags) -> Self {
        (u8::from(value.zero) << 7)
            | (u8::from(value.subtract) << 6)
            | (u8::from(value.half_carry) << 5)
            | (u8::from(value.carry) << 4)
    }
}

impl From<u8> for Flags {
    fn from(value: u8) -> Self {
        Self {
            zero: value.bit(7),
            subtract: value.bit(6),
            half_carry: value.bit(5),
            carry: value.bit(4),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Registers {
    pub(crate) a: u8,
    pub(crate) f: Flags,
    pub(crate) b: u8,
    pub(crate) c: u8,
    pub(crate) d: u8,
    pub(crate) e: u8,
    pub(crate) h: u8,
    pub(crate) l: u8,
    pub(crate) sp: u16,
    pub(crate) pc: u16,
    pub(crate) ime: bool,
}

impl Registers {
    /// Post-boot-ROM register values; DMG sets A=$01 and CGB A=$11.
    fn new(hardware_mode: HardwareMode) -> Self {
        match hardware_mode {
            HardwareMode::Dmg => Self {
                a: 0x01,
                f: Flags { zero: true, subtract: false, half_carry: true, carry: true },
                b: 0x00,
                c: 0x13,
                d: 0x00,
                e: 0xD8,
                h: 0x01,
                l: 0x4D,
                sp: 0xFFFE,
                pc: 0x0100,
                ime: false,
            },
            HardwareMode::Cgb => Self {
                a: 0x11,
                f: Flags { zero: true, subtract: false, half_carry: false, carry: false },
                b: 0x00,
                c: 0x00,
                d: 0xFF,
                e: 0x56,
                h: 0x00,
                l: 0x0D,
                sp: 0xFFFE,
                pc: 0x0100,
                ime: false,
            },
        }
    }

    pub(crate) fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    pub(crate) fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    pub(crate) fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    fn set_bc(&mut self, value: u16) {
        [self.b, self.c] = value.to_be_bytes();
    }

    fn set_de(&mut self, value: u16) {
        [self.d, self.e] = value.to_be_bytes();
    }

    pub(crate) fn set_hl(&mut self, value: u16) {
        [self.h, self.l] = value.to_be_bytes();
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Sm83 {
    pub(crate) registers: Registers,
    halted: bool,
    halt_bug: bool,
    ei_pending: bool,
}

impl Sm83 {
    pub(crate) fn new(hardware_mode: HardwareMode) -> Self {
        Self {
            registers: Registers::new(hardware_mode),
            halted: false,
            halt_bug: false,
            ei_pending: false,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn halted(&self) -> bool {
        self.halted
    }

    /// Execute one instruction (or service one interrupt) and return T-cycles consumed.
    pub(crate) fn execute_instruction<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        let pending = bus.interrupt_flags() & bus.interrupt_enable() & 0x1F;

        // HALT wakes on any pending interrupt regardless of IME
        if self.halted {
            if pending == 0 {
                return 4;
            }
            self.halted = false;
        }

        let ei_was_pending = std::mem::take(&mut self.ei_pending);

        if self.registers.ime && pending != 0 {
            return self.service_interrupt(bus, pending);
        }

        if ei_was_pending {
            self.registers.ime = true;
        }

        let opcode = self.fetch(bus);
        if std::mem::take(&mut self.halt_bug) {
            // HALT bug: the byte after HALT is fetched twice
            self.registers.pc = self.registers.pc.wrapping_sub(1);
        }

        self.execute(bus, opcode)
    }

    fn service_interrupt<B: BusInterface>(&mut self, bus: &mut B, pending: u8) -> u32 {
        let interrupt = InterruptType::ALL
            .into_iter()
            .find(|it| pending & it.register_mask() != 0)
            .expect("pending mask checked non-zero");

        self.registers.ime = false;
        bus.acknowledge_interrupt(interrupt.register_mask());
        let pc = self.registers.pc;
        self.push_u16(bus, pc);
        self.registers.pc = interrupt.interrupt_vector();
        20
    }

    fn fetch<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        value
    }

    fn fetch_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = self.fetch(bus);
        let msb = self.fetch(bus);
        u16::from_le_bytes([lsb, msb])
    }

    fn push_u16<B: BusInterface>(&mut self, bus: &mut B, value: u16) {
        let [lsb, msb] = value.to_le_bytes();
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        bus.write(self.registers.sp, msb);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        bus.write(self.registers.sp, lsb);
    }

    fn pop_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = bus.read(self.registers.sp);
        self.registers.sp = self.registers.sp.wrapping_add(1);
        let msb = bus.read(self.registers.sp);
        self.registers.sp = self.registers.sp.wrapping_add(1);
        u16::from_le_bytes([lsb, msb])
    }

    // Operand helpers by octal field --------------------------------------------------------

    fn read_r<B: BusInterface>(&mut self, bus: &mut B, index: u8) -> u8 {
        match index {
            0 => self.registers.b,
            1 => self.registers.c,
            2 => self.registers.d,
            3 => self.registers.e,
            4 => self.registers.h,
            5 => self.registers.l,
            6 => bus.read(self.registers.hl()),
            7 => self.registers.a,
            _ => unreachable!("3-bit field"),
        }
    }

    fn write_r<B: BusInterface>(&mut self, bus: &mut B, index: u8, value: u8) {
        match index {
            0 => self.registers.b = value,
            1 => self.registers.c = value,
            2 => self.registers.d = value,
            3 => self.registers.e = value,
            4 => self.registers.h = value,
            5 => self.registers.l = value,
            6 => bus.write(self.registers.hl(), value),
            7 => self.registers.a = value,
            _ => unreachable!("3-bit field"),
        }
    }

    fn read_rp(&self, index: u8) -> u16 {
        match index {
            0 => self.registers.bc(),
            1 => self.registers.de(),
            2 => self.registers.hl(),
            3 => self.registers.sp,
            _ => unreachable!("2-bit field"),
        }
    }

    fn write_rp(&mut self, index: u8, value: u16) {
        match index {
            0 => self.registers.set_bc(value),
            1 => self.registers.set_de(value),
            2 => self.registers.set_hl(value),
            3 => self.registers.sp = value,
            _ => unreachable!("2-bit field"),
        }
    }

    fn condition(&self, cc: u8) -> bool {
        match cc {
            0 => !self.registers.f.zero,
            1 => self.registers.f.zero,
            2 => !self.registers.f.carry,
            3 => self.registers.f.carry,
            _ => unreachable!("2-bit field"),
        }
    }

    // ALU -----------------------------------------------------------------------------------

    fn alu_op(&mut self, op: u8, value: u8) {
        let a = self.registers.a;
        let carry = self.registers.f.carry;
        match op {
            0 => self.registers.a = self.add8(a, value, false),
            1 => self.registers.a = self.add8(a, value, carry),
            2 => self.registers.a = self.sub8(a, value, false),
            3 => self.registers.a = self.sub8(a, value, carry),
            4 => {
                let result = a & value;
                self.registers.a = result;
                self.registers.f =
                    Flags { zero: result == 0, subtract: false, half_carry: true, carry: false };
            }
            5 => {
                let result = a ^ value;
                self.registers.a = result;
                self.registers.f =
                    Flags { zero: result == 0, subtract: false, half_carry: false, carry: false };
            }
            6 => {
                let result = a | value;
                self.registers.a = result;
                self.registers.f =
                    Flags { zero: result == 0, subtract: false, half_carry: false, carry: false };
            }
            7 => {
                self.sub8(a, value, false);
            }
            _ => unreachable!("3-bit field"),
        }
    }

    fn add8(&mut self, lhs: u8, rhs: u8, carry_in: bool) -> u8 {
        let carry = u16::from(carry_in);
        let sum = u16::from(lhs) + u16::from(rhs) + carry;
        let result = sum as u8;
        self.registers.f = Flags {
            zero: result == 0,
            subtract: false,
            half_carry: (lhs & 0x0F) + (rhs & 0x0F) + carry as u8 > 0x0F,
            carry: sum > 0xFF,
        };
        result
    }

    fn sub8(&mut self, lhs: u8, rhs: u8, carry_in: bool) -> u8 {
        let borrow = u16::from(carry_in);
        let result = u16::from(lhs).wrapping_sub(u16::from(rhs)).wrapping_sub(borrow) as u8;
        self.registers.f = Flags {
            zero: result == 0,
            subtract: true,
            half_carry: (lhs & 0x0F) < (rhs & 0x0F) + borrow as u8,
            carry: u16::from(lhs) < u16::from(rhs) + borrow,
        };
        result
    }

    fn add_sp_offset<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let offset = self.fetch(bus) as i8 as u16;
        let sp = self.registers.sp;
        self.registers.f = Flags {
            zero: false,
            subtract: false,
            half_carry: (sp & 0x0F) + (offset & 0x0F) > 0x0F,
            carry: (sp & 0xFF) + (offset & 0xFF) > 0xFF,
        };
        sp.wrapping_add(offset)
    }

    // Decode --------------------------------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn execute<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) -> u32 {
        let x = opcode >> 6;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        match x {
            0 => self.execute_x0(bus, opcode, y, z),
            1 => {
                if opcode == 0x76 {
                    // HALT with IME clear and a pending interrupt triggers the halt bug
                    let pending = bus.interrupt_flags() & bus.interrupt_enable() & 0x1F;
                    if !self.registers.ime && pending != 0 {
                        self.halt_bug = true;
                    } else {
                        self.halted = true;
                    }
                    4
                } else {
                    let value = self.read_r(bus, z);
                    self.write_r(bus, y, value);
                    if y == 6 || z == 6 { 8 } else { 4 }
                }
            }
            2 => {
                let value = self.read_r(bus, z);
                self.alu_op(y, value);
                if z == 6 { 8 } else { 4 }
            }
            3 => self.execute_x3(bus, opcode, y, z),
            _ => unreachable!("2-bit field"),
        }
    }

    fn execute_x0<B: BusInterface>(&mut self, bus: &mut B, opcode: u8, y: u8, z: u8) -> u32 {
        match z {
            0 => match y {
                0 => 4, // NOP
                1 => {
                    // LD (nn), SP
                    let address = self.fetch_u16(bus);
                    let [lsb, msb] = self.registers.sp.to_le_bytes();
                    bus.write(address, lsb);
                    bus.write(address.wrapping_add(1), msb);
                    20
                }
                2 => {
                    // STOP: treated as a speed-switch point by the bus; behaves as a 2-byte NOP
                    self.fetch(bus);
                    4
                }
                3 => {
                    let offset = self.fetch(bus) as i8;
                    self.registers.pc = self.registers.pc.wrapping_add(offset as u16);
                    12
                }
                4..=7 => {
                    let offset = self.fetch(bus) as i8;
                    if self.condition(y - 4) {
                        self.registers.pc = self.registers.pc.wrapping_add(offset as u16);
                        12
                    } else {
                        8
                    }
                }
                _ => unreachable!("3-bit field"),
            },
            1 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    let value = self.fetch_u16(bus);
                    self.write_rp(p, value);
                    12
                } else {
                    // ADD HL, rp
                    let hl = self.registers.hl();
                    let rhs = self.read_rp(p);
                    let sum = u32::from(hl) + u32::from(rhs);
                    self.registers.f.subtract = false;
                    self.registers.f.half_carry = (hl & 0x0FFF) + (rhs & 0x0FFF) > 0x0FFF;
                    self.registers.f.carry = sum > 0xFFFF;
                    self.registers.set_hl(sum as u16);
                    8
                }
            }
            2 => {
                let address = match y >> 1 {
                    0 => self.registers.bc(),
                    1 => self.registers.de(),
                    2 => {
                        let hl = self.registers.hl();
                        self.registers.set_hl(hl.wrapping_add(1));
                        hl
                    }
                    3 => {
                        let hl = self.registers.hl();
                        self.registers.set_hl(hl.wrapping_sub(1));
                        hl
                    }
                    _ => unreachable!("2-bit field"),
                };
                if y & 1 == 0 {
                    bus.write(address, self.registers.a);
                } else {
                    self.registers.a = bus.read(address);
                }
                8
            }
            3 => {
                let p = y >> 1;
                let value = self.read_rp(p);
                let value =
                    if y & 1 == 0 { value.wrapping_add(1) } else { value.wrapping_sub(1) };
                self.write_rp(p, value);
                8
            }
            4 => {
                // INC r
                let value = self.read_r(bus, y);
                let result = value.wrapping_add(1);
                self.registers.f.zero = result == 0;
                self.registers.f.subtract = false;
                self.registers.f.half_carry = value & 0x0F == 0x0F;
                self.write_r(bus, y, result);
                if y == 6 { 12 } else { 4 }
            }
            5 => {
                // DEC r
                let value = self.read_r(bus, y);
                let result = value.wrapping_sub(1);
                self.registers.f.zero = result == 0;
                self.registers.f.subtract = true;
                self.registers.f.half_carry = value & 0x0F == 0x00;
                self.write_r(bus, y, result);
                if y == 6 { 12 } else { 4 }
            }
            6 => {
                let value = self.fetch(bus);
                self.write_r(bus, y, value);
                if y == 6 { 12 } else { 8 }
            }
            7 => {
                match y {
                    0 => {
                        // RLCA: zero flag always cleared, unlike Z80's preserved Z
                        let a = self.registers.a.rotate_left(1);
                        self.registers.a = a;
                        self.registers.f = Flags {
                            zero: false,
                            subtract: false,
                            half_carry: false,
                            carry: a.bit(0),
                        };
                    }
                    1 => {
                        let carry = self.registers.a.bit(0);
                        self.registers.a = self.registers.a.rotate_right(1);
                        self.registers.f =
                            Flags { zero: false, subtract: false, half_carry: false, carry };
                    }
                    2 => {
                        let carry = self.registers.a.bit(7);
                        self.registers.a =
                            (self.registers.a << 1) | u8::from(self.registers.f.carry);
                        self.registers.f =
                            Flags { zero: false, subtract: false, half_carry: false, carry };
                    }
                    3 => {
                        let carry = self.registers.a.bit(0);
                        self.registers.a =
                            (self.registers.a >> 1) | (u8::from(self.registers.f.carry) << 7);
                        self.registers.f =
                            Flags { zero: false, subtract: false, half_carry: false, carry };
                    }
                    4 => self.daa(),
                    5 => {
                        self.registers.a = !self.registers.a;
                        self.registers.f.subtract = true;
                        self.registers.f.half_carry = true;
                    }
                    6 => {
                        self.registers.f.subtract = false;
                        self.registers.f.half_carry = false;
                        self.registers.f.carry = true;
                    }
                    7 => {
                        self.registers.f.subtract = false;
                        self.registers.f.half_carry = false;
                        self.registers.f.carry = !self.registers.f.carry;
                    }
                    _ => unreachable!("3-bit field"),
                }
                4
            }
            _ => unreachable!("3-bit field"),
        }
    }

    fn execute_x3<B: BusInterface>(&mut self, bus: &mut B, opcode: u8, y: u8, z: u8) -> u32 {
        match z {
            0 => match y {
                0..=3 => {
                    if self.condition(y) {
                        self.registers.pc = self.pop_u16(bus);
                        20
                    } else {
                        8
                    }
                }
                4 => {
                    // LDH (n), A
                    let offset = self.fetch(bus);
                    bus.write(0xFF00 | u16::from(offset), self.registers.a);
                    12
                }
                5 => {
                    // ADD SP, e8
                    let result = self.add_sp_offset(bus);
                    self.registers.sp = result;
                    16
                }
                6 => {
                    let offset = self.fetch(bus);
                    self.registers.a = bus.read(0xFF00 | u16::from(offset));
                    12
                }
                7 => {
                    // LD HL, SP+e8
                    let result = self.add_sp_offset(bus);
                    self.registers.set_hl(result);
                    12
                }
                _ => unreachable!("3-bit field"),
            },
            1 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    // POP rp2
                    let value = self.pop_u16(bus);
                    match p {
                        0 => self.registers.set_bc(value),
                        1 => self.registers.set_de(value),
                        2 => self.registers.set_hl(value),
                        3 => {
                            let [a, f] = value.to_be_bytes();
                            self.registers.a = a;
                            self.registers.f = f.into();
                        }
                        _ => unreachable!("2-bit field"),
                    }
                    12
                } else {
                    match p {
                        0 => {
                            self.registers.pc = self.pop_u16(bus);
                            16
                        }
                        1 => {
                            // RETI
                            self.registers.pc = self.pop_u16(bus);
                            self.registers.ime = true;
                            16
                        }
                        2 => {
                            self.registers.pc = self.registers.hl();
                            4
                        }
                        3 => {
                            self.registers.sp = self.registers.hl();
                            8
                        }
                        _ => unreachable!("2-bit field"),
                    }
                }
            }
            2 => match y {
                0..=3 => {
                    let target = self.fetch_u16(bus);
                    if self.condition(y) {
                        self.registers.pc = target;
                        16
                    } else {
                        12
                    }
                }
                4 => {
                    bus.write(0xFF00 | u16::from(self.registers.c), self.registers.a);
                    8
                }
                5 => {
                    let address = self.fetch_u16(bus);
                    bus.write(address, self.registers.a);
                    16
                }
                6 => {
                    self.registers.a = bus.read(0xFF00 | u16::from(self.registers.c));
                    8
                }
                7 => {
                    let address = self.fetch_u16(bus);
                    self.registers.a = bus.read(address);
                    16
                }
                _ => unreachable!("3-bit field"),
            },
            3 => match y {
                0 => {
                    self.registers.pc = self.fetch_u16(bus);
                    16
                }
                1 => self.execute_cb(bus),
                6 => {
                    self.registers.ime = false;
                    4
                }
                7 => {
                    // EI enables interrupts after the following instruction
                    self.ei_pending = true;
                    4
                }
                _ => {
                    log::debug!("invalid opcode {opcode:02X} executed");
                    4
                }
            },
            4 => match y {
                0..=3 => {
                    let target = self.fetch_u16(bus);
                    if self.condition(y) {
                        let pc = self.registers.pc;
                        self.push_u16(bus, pc);
                        self.registers.pc = target;
                        24
                    } else {
                        12
                    }
                }
                _ => {
                    log::debug!("invalid opcode {opcode:02X} executed");
                    4
                }
            },
            5 => {
                let p = y >> 1;
                if y & 1 == 0 {
                    let value = match p {
                        0 => self.registers.bc(),
                        1 => self.registers.de(),
                        2 => self.registers.hl(),
                        3 => u16::from_be_bytes([self.registers.a, self.registers.f.into()]),
                        _ => unreachable!("2-bit field"),
                    };
                    self.push_u16(bus, value);
                    16
                } else if p == 0 {
                    let target = self.fetch_u16(bus);
                    let pc = self.registers.pc;
                    self.push_u16(bus, pc);
                    self.registers.pc = target;
                    24
                } else {
                    log::debug!("invalid opcode {opcode:02X} executed");
                    4
                }
            }
            6 => {
                let value = self.fetch(bus);
                self.alu_op(y, value);
                8
            }
            7 => {
                // RST
                let pc = self.registers.pc;
                self.push_u16(bus, pc);
                self.registers.pc = u16::from(y) * 8;
                16
            }
            _ => unreachable!("3-bit field"),
        }
    }

    fn execute_cb<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        let opcode = self.fetch(bus);
        let x = opcode >> 6;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        match x {
            0 => {
                let value = self.read_r(bus, z);
                let carry_in = self.registers.f.carry;
                let (result, carry) = match y {
                    0 => (value.rotate_left(1), value.bit(7)),
                    1 => (value.rotate_right(1), value.bit(0)),
                    2 => ((value << 1) | u8::from(carry_in), value.bit(7)),
                    3 => ((value >> 1) | (u8::from(carry_in) << 7), value.bit(0)),
                    4 => (value << 1, value.bit(7)),
                    5 => (((value as i8) >> 1) as u8, value.bit(0)),
                    6 => (value.rotate_left(4), false), // SWAP
                    7 => (value >> 1, value.bit(0)),
                    _ => unreachable!("3-bit field"),
                };
                self.registers.f =
                    Flags { zero: result == 0, subtract: false, half_carry: false, carry };
                self.write_r(bus, z, result);
                if z == 6 { 16 } else { 8 }
            }
            1 => {
                let value = self.read_r(bus, z);
                self.registers.f.zero = !value.bit(y);
                self.registers.f.subtract = false;
                self.registers.f.half_carry = true;
                if z == 6 { 12 } else { 8 }
            }
            2 | 3 => {
                let value = self.read_r(bus, z);
                let result = if x == 2 { value & !(1 << y) } else { value | (1 << y) };
                self.write_r(bus, z, result);
                if z == 6 { 16 } else { 8 }
            }
            _ => unreachable!("2-bit field"),
        }
    }

    fn daa(&mut self) {
        let a = self.registers.a;
        let f = self.registers.f;

        let mut result = a;
        let mut carry = f.carry;
        if f.subtract {
            if f.carry {
                result = result.wrapping_sub(0x60);
            }
            if f.half_carry {
                result = result.wrapping_sub(0x06);
            }
        } else {
            if f.carry || a > 0x99 {
                result = result.wrapping_add(0x60);
                carry = true;
            }
            if f.half_carry || a & 0x0F > 0x09 {
                result = result.wrapping_add(0x06);
            }
        }

        self.registers.a = result;
        self.registers.f.zero = result == 0;
        self.registers.f.half_carry = false;
        self.registers.f.carry = carry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        memory: Vec<u8>,
        interrupt_flags: u8,
        interrupt_enable: u8,
    }

    impl TestBus {
        fn new(program: &[u8]) -> Self {
            let mut memory = vec![0; 0x10000];
            memory[0x0100..0x0100 + program.len()].copy_from_slice(program);
            Self { memory, interrupt_flags: 0, interrupt_enable: 0 }
        }
    }

    impl BusInterface for TestBus {
        fn read(&mut self, address: u16) -> u8 {
            self.memory[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.memory[address as usize] = value;
        }

        fn interrupt_flags(&self) -> u8 {
            self.interrupt_flags
        }

        fn interrupt_enable(&self) -> u8 {
            self.interrupt_enable
        }

        fn acknowledge_interrupt(&mut self, mask: u8) {
            self.interrupt_flags &= !mask;
        }
    }

    #[test]
    fn basic_arithmetic() {
        // LD A, $3C ; ADD A, $2A
        let mut bus = TestBus::new(&[0x3E, 0x3C, 0xC6, 0x2A]);
        let mut cpu = Sm83::new(HardwareMode::Dmg);
        cpu.execute_instruction(&mut bus);
        cpu.execute_instruction(&mut bus);
        assert_eq!(cpu.registers.a, 0x66);
        assert!(!cpu.registers.f.carry);
        assert!(cpu.registers.f.half_carry);
    }

    #[test]
    fn interrupt_dispatch_clears_flag_and_ime() {
        // EI ; NOP ; NOP
        let mut bus = TestBus::new(&[0xFB, 0x00, 0x00]);
        let mut cpu = Sm83::new(HardwareMode::Dmg);
        cpu.execute_instruction(&mut bus); // EI (takes effect after next instruction)
        cpu.execute_instruction(&mut bus); // NOP
        bus.interrupt_flags = 0x01;
        bus.interrupt_enable = 0x01;
        cpu.execute_instruction(&mut bus);
        assert_eq!(cpu.registers.pc, 0x0040);
        assert!(!cpu.registers.ime);
        assert_eq!(bus.interrupt_flags, 0);
    }

    #[test]
    fn halt_bug_reads_next_byte_twice() {
        // DI ; HALT ; INC A (with a pending interrupt -> halt bug: INC A runs twice)
        let mut bus = TestBus::new(&[0xF3, 0x76, 0x3C, 0x00]);
        bus.interrupt_flags = 0x01;
        bus.interrupt_enable = 0x01;
        let mut cpu = Sm83::new(HardwareMode::Dmg);
        cpu.registers.a = 0;
        cpu.execute_instruction(&mut bus); // DI
        cpu.execute_instruction(&mut bus); // HALT -> bug state, no halt
        cpu.execute_instruction(&mut bus); // INC A (PC not advanced past it)
        cpu.execute_instruction(&mut bus); // INC A again
        assert_eq!(cpu.registers.a, 2);
        assert_eq!(cpu.registers.pc, 0x0103);
    }

    #[test]
    fn halt_without_pending_interrupt_waits() {
        let mut bus = TestBus::new(&[0x76, 0x3C]);
        let mut cpu = Sm83::new(HardwareMode::Dmg);
        cpu.execute_instruction(&mut bus);
        assert!(cpu.halted());
        cpu.execute_instruction(&mut bus);
        assert!(cpu.halted());

        // Pending interrupt wakes the CPU even with IME clear, without dispatching
        bus.interrupt_flags = 0x04;
        bus.interrupt_enable = 0x04;
        cpu.execute_instruction(&mut bus);
        assert!(!cpu.halted());
        assert_eq!(cpu.registers.a, 0x01 + 1); // DMG boot A=1, then INC A
    }

    #[test]
    fn ldh_addresses_high_ram() {
        // LD A, $77 ; LDH ($80), A
        let mut bus = TestBus::new(&[0x3E, 0x77, 0xE0, 0x80]);
        let mut cpu = Sm83::new(HardwareMode::Dmg);
        cpu.execute_instruction(&mut bus);
        cpu.execute_instruction(&mut bus);
        assert_eq!(bus.memory[0xFF80], 0x77);
    }

    #[test]
    fn daa_adjusts_bcd_addition() {
        // LD A, $45 ; ADD A, $38 ; DAA
        let mut bus = TestBus::new(&[0x3E, 0x45, 0xC6, 0x38, 0x27]);
        let mut cpu = Sm83::new(HardwareMode::Dmg);
        for _ in 0..3 {
            cpu.execute_instruction(&mut bus);
        }
        assert_eq!(cpu.registers.a, 0x83);
        assert!(!cpu.registers.f.carry);
    }
}
