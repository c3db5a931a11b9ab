mod instructions;

use crate::BusInterface;
use bincode::{Decode, Encode};
use retrocore_common::num::{GetBit, U16Ext};

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusFlags {
    pub negative: bool,
    pub overflow: bool,
    /// M flag: 8-bit accumulator/memory when set.
    pub memory_8bit: bool,
    /// X flag: 8-bit index registers when set.
    pub index_8bit: bool,
    pub decimal: bool,
    pub irq_disable: bool,
    pub zero: bool,
    pub carry: bool,
}

impl StatusFlags {
    fn new() -> Self {
        Self {
            negative: false,
            overflow: false,
            memory_8bit: true,
            index_8bit: true,
            decimal: false,
            irq_disable: true,
            zero: false,
            carry: false,
        }
    }

    #[must_use]
    pub fn to_byte(self) -> u8 {
        (u8::from(self.negative) << 7)
            | (u8::from(self.overflow) << 6)
            | (u8::from(self.memory_8bit) << 5)
            | (u8::from(self.index_8bit) << 4)
            | (u8::from(self.decimal) << 3)
            | (u8::from(self.irq_disable) << 2)
            | (u8::from(self.zero) << 1)
            | u8::from(self.carry)
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            negative: byte.bit(7),
            overflow: byte.bit(6),
            memory_8bit: byte.bit(5),
            index_8bit: byte.bit(4),
            decimal: byte.bit(3),
            irq_disable: byte.bit(2),
            zero: byte.bit(1),
            carry: byte.bit(0),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    pub a: u16,
    pub x: u16,
    pub y: u16,
    pub s: u16,
    pub d: u16,
    pub db: u8,
    pub pb: u8,
    pub pc: u16,
    pub p: StatusFlags,
    pub emulation_mode: bool,
}

impl Registers {
    fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            s: 0x01FF,
            d: 0,
            db: 0,
            pb: 0,
            pc: 0,
            p: StatusFlags::new(),
            emulation_mode: true,
        }
    }
}

// Native-mode vectors
const NATIVE_COP_VECTOR: u16 = 0xFFE4;
const NATIVE_BRK_VECTOR: u16 = 0xFFE6;
const NATIVE_NMI_VECTOR: u16 = 0xFFEA;
const NATIVE_IRQ_VECTOR: u16 = 0xFFEE;

// Emulation-mode vectors
const EMU_COP_VECTOR: u16 = 0xFFF4;
const EMU_NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const EMU_IRQ_VECTOR: u16 = 0xFFFE;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Wdc65816 {
    registers: Registers,
    stopped: bool,
    waiting: bool,
    last_nmi: bool,
    nmi_pending: bool,
    cycles: u32,
}

impl Wdc65816 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registers: Registers::new(),
            stopped: false,
            waiting: false,
            last_nmi: false,
            nmi_pending: false,
            cycles: 0,
        }
    }

    /// Reset the CPU into emulation mode and load PC from the reset vector.
    pub fn reset<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.emulation_mode = true;
        self.registers.p.memory_8bit = true;
        self.registers.p.index_8bit = true;
        self.registers.p.decimal = false;
        self.registers.p.irq_disable = true;
        self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
        self.registers.d = 0;
        self.registers.db = 0;
        self.registers.pb = 0;
        self.registers.x &= 0x00FF;
        self.registers.y &= 0x00FF;
        self.stopped = false;
        self.waiting = false;
        self.nmi_pending = false;

        let lsb = bus.read(RESET_VECTOR.into());
        let msb = bus.read(u32::from(RESET_VECTOR) + 1);
        self.registers.pc = u16::from_le_bytes([lsb, msb]);
    }

    /// Execute one instruction (or service one interrupt) and return the number of bus cycles
    /// consumed.
    pub fn step<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        self.cycles = 0;

        let nmi = bus.nmi();
        if nmi && !self.last_nmi {
            self.nmi_pending = true;
        }
        self.last_nmi = nmi;

        if self.stopped {
            self.idle(bus);
            return self.cycles;
        }

        if self.waiting {
            if self.nmi_pending || bus.irq() {
                self.waiting = false;
            } else {
                self.idle(bus);
                return self.cycles;
            }
        }

        if self.nmi_pending {
            self.nmi_pending = false;
            let vector = if self.registers.emulation_mode { EMU_NMI_VECTOR } else { NATIVE_NMI_VECTOR };
            self.service_interrupt(bus, vector);
            return self.cycles;
        }

        if bus.irq() && !self.registers.p.irq_disable {
            let vector = if self.registers.emulation_mode { EMU_IRQ_VECTOR } else { NATIVE_IRQ_VECTOR };
            self.service_interrupt(bus, vector);
            return self.cycles;
        }

        let opcode = self.fetch(bus);
        instructions::execute(self, bus, opcode);

        self.cycles
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    #[must_use]
    pub fn is_mid_block_move(&self) -> bool {
        false
    }

    #[must_use]
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    #[must_use]
    pub fn waiting(&self) -> bool {
        self.waiting
    }

    // Bus access helpers; every access or internal operation charges one cycle --------------

    pub(crate) fn read8<B: BusInterface>(&mut self, bus: &mut B, address: u32) -> u8 {
        self.cycles += 1;
        bus.read(address & 0xFFFFFF)
    }

    pub(crate) fn write8<B: BusInterface>(&mut self, bus: &mut B, address: u32, value: u8) {
        self.cycles += 1;
        bus.write(address & 0xFFFFFF, value);
    }

    pub(crate) fn idle<B: BusInterface>(&mut self, bus: &mut B) {
        self.cycles += 1;
        bus.idle();
    }

    pub(crate) fn fetch<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let address = (u32::from(self.registers.pb) << 16) | u32::from(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        self.read8(bus, address)
    }

    pub(crate) fn fetch_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = self.fetch(bus);
        let msb = self.fetch(bus);
        u16::from_le_bytes([lsb, msb])
    }

    pub(crate) fn read16<B: BusInterface>(&mut self, bus: &mut B, address: u32) -> u16 {
        let lsb = self.read8(bus, address);
        let msb = self.read8(bus, address.wrapping_add(1));
        u16::from_le_bytes([lsb, msb])
    }

    pub(crate) fn write16<B: BusInterface>(&mut self, bus: &mut B, address: u32, value: u16) {
        self.write8(bus, address, value.lsb());
        self.write8(bus, address.wrapping_add(1), value.msb());
    }

    /// Read 8 or 16 bits per the M flag.
    pub(crate) fn read_m<B: BusInterface>(&mut self, bus: &mut B, address: u32) -> u16 {
        if self.registers.p.memory_8bit {
            self.read8(bus, address).into()
        } else {
            self.read16(bus, address)
        }
    }

    pub(crate) fn write_m<B: BusInterface>(&mut self, bus: &mut B, address: u32, value: u16) {
        if self.registers.p.memory_8bit {
            self.write8(bus, address, value as u8);
        } else {
            self.write16(bus, address, value);
        }
    }

    /// Read 8 or 16 bits per the X flag.
    pub(crate) fn read_x<B: BusInterface>(&mut self, bus: &mut B, address: u32) -> u16 {
        if self.registers.p.index_8bit {
            self.read8(bus, address).into()
        } else {
            self.read16(bus, address)
        }
    }

    // Stack ---------------------------------------------------------------------------------

    pub(crate) fn push<B: BusInterface>(&mut self, bus: &mut B, value: u8) {
        let address = self.registers.s;
        self.write8(bus, address.into(), value);
        self.registers.s = self.registers.s.wrapping_sub(1);
        self.constrain_stack();
    }

    pub(crate) fn push_u16<B: BusInterface>(&mut self, bus: &mut B, value: u16) {
        self.push(bus, value.msb());
        self.push(bus, value.lsb());
    }

    pub(crate) fn pull<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        self.registers.s = self.registers.s.wrapping_add(1);
        self.constrain_stack();
        let address = self.registers.s;
        self.read8(bus, address.into())
    }

    pub(crate) fn pull_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = self.pull(bus);
        let msb = self.pull(bus);
        u16::from_le_bytes([lsb, msb])
    }

    /// In emulation mode the stack pointer is confined to page 1.
    pub(crate) fn constrain_stack(&mut self) {
        if self.registers.emulation_mode {
            self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
        }
    }

    /// Apply the M/X width invariants after any write to P.
    pub(crate) fn enforce_width_flags(&mut self) {
        if self.registers.emulation_mode {
            self.registers.p.memory_8bit = true;
            self.registers.p.index_8bit = true;
        }
        if self.registers.p.index_8bit {
            self.registers.x &= 0x00FF;
            self.registers.y &= 0x00FF;
        }
    }

    pub(crate) fn set_nz(&mut self, value: u16, is_8bit: bool) {
        if is_8bit {
            self.registers.p.negative = (value as u8).bit(7);
            self.registers.p.zero = value as u8 == 0;
        } else {
            self.registers.p.negative = value.bit(15);
            self.registers.p.zero = value == 0;
        }
    }

    fn service_interrupt<B: BusInterface>(&mut self, bus: &mut B, vector: u16) {
        self.idle(bus);
        self.idle(bus);

        if !self.registers.emulation_mode {
            let pb = self.registers.pb;
            self.push(bus, pb);
        }
        let pc = self.registers.pc;
        self.push_u16(bus, pc);
        let p = self.registers.p.to_byte();
        // In emulation mode the pushed B flag is clear for hardware interrupts
        let p = if self.registers.emulation_mode { p & !0x10 } else { p };
        self.push(bus, p);

        self.registers.p.irq_disable = true;
        self.registers.p.decimal = false;
        self.registers.pb = 0;

        let lsb = self.read8(bus, vector.into());
        let msb = self.read8(bus, u32::from(vector) + 1);
        self.registers.pc = u16::from_le_bytes([lsb, msb]);
    }

    pub(crate) fn set_stopped(&mut self) {
        self.stopped = true;
    }

    pub(crate) fn set_waiting(&mut self) {
        self.waiting = true;
    }
}

impl Default for Wdc65816 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        memory: Vec<u8>,
    }

    impl TestBus {
        fn new(program: &[u8]) -> Self {
            let mut memory = vec![0; 0x1000000];
            memory[0x8000..0x8000 + program.len()].copy_from_slice(program);
            memory[0xFFFC] = 0x00;
            memory[0xFFFD] = 0x80;
            Self { memory }
        }
    }

    impl BusInterface for TestBus {
        fn read(&mut self, address: u32) -> u8 {
            self.memory[address as usize]
        }

        fn write(&mut self, address: u32, value: u8) {
            self.memory[address as usize] = value;
        }

        fn idle(&mut self) {}

        fn irq(&mut self) -> bool {
            false
        }

        fn nmi(&mut self) -> bool {
            false
        }
    }

    fn boot(program: &[u8]) -> (Wdc65816, TestBus) {
        let mut bus = TestBus::new(program);
        let mut cpu = Wdc65816::new();
        cpu.reset(&mut bus);
        (cpu, bus)
    }

    #[test]
    fn xce_enters_native_mode_and_back() {
        // CLC ; XCE ; REP #$30 ; SEC ; XCE
        let (mut cpu, mut bus) = boot(&[0x18, 0xFB, 0xC2, 0x30, 0x38, 0xFB]);

        cpu.step(&mut bus); // CLC
        cpu.step(&mut bus); // XCE -> native
        assert!(!cpu.registers.emulation_mode);
        assert!(cpu.registers.p.carry); // old emulation flag

        cpu.step(&mut bus); // REP #$30 -> 16-bit A and X/Y
        assert!(!cpu.registers.p.memory_8bit);
        assert!(!cpu.registers.p.index_8bit);

        cpu.registers.s = 0x1FF3;
        cpu.registers.x = 0x1234;

        cpu.step(&mut bus); // SEC
        cpu.step(&mut bus); // XCE -> emulation
        assert!(cpu.registers.emulation_mode);
        // Entering emulation mode forces SP into page 1 and truncates index registers
        assert_eq!(cpu.registers.s & 0xFF00, 0x0100);
        assert_eq!(cpu.registers.x, 0x0034);
        assert!(cpu.registers.p.memory_8bit);
        assert!(cpu.registers.p.index_8bit);
    }

    #[test]
    fn sixteen_bit_load_and_add() {
        // CLC ; XCE ; REP #$20 ; LDA #$1234 ; CLC ; ADC #$0FFF
        let (mut cpu, mut bus) =
            boot(&[0x18, 0xFB, 0xC2, 0x20, 0xA9, 0x34, 0x12, 0x18, 0x69, 0xFF, 0x0F]);
        for _ in 0..6 {
            cpu.step(&mut bus);
        }
        assert_eq!(cpu.registers.a, 0x2233);
        assert!(!cpu.registers.p.carry);
    }

    #[test]
    fn eight_bit_accumulator_preserves_high_byte() {
        // CLC ; XCE ; REP #$20 ; LDA #$ABCD ; SEP #$20 ; LDA #$12
        let (mut cpu, mut bus) =
            boot(&[0x18, 0xFB, 0xC2, 0x20, 0xA9, 0xCD, 0xAB, 0xE2, 0x20, 0xA9, 0x12]);
        for _ in 0..6 {
            cpu.step(&mut bus);
        }
        assert_eq!(cpu.registers.a, 0xAB12);
    }

    #[test]
    fn interrupt_vectors_differ_by_mode() {
        let mut bus = TestBus::new(&[0xEA, 0xEA]);
        bus.memory[usize::from(EMU_NMI_VECTOR)] = 0x00;
        bus.memory[usize::from(EMU_NMI_VECTOR) + 1] = 0x90;
        let mut cpu = Wdc65816::new();
        cpu.reset(&mut bus);

        cpu.nmi_pending = true;
        cpu.step(&mut bus);
        assert_eq!(cpu.registers.pc, 0x9000);
        assert!(cpu.registers.p.irq_disable);
    }

    #[test]
    fn wai_resumes_on_irq() {
        struct IrqBus {
            inner: TestBus,
            irq: bool,
        }

        impl BusInterface for IrqBus {
            fn read(&mut self, address: u32) -> u8 {
                self.inner.read(address)
            }
            fn write(&mut self, address: u32, value: u8) {
                self.inner.write(address, value);
            }
            fn idle(&mut self) {}
            fn irq(&mut self) -> bool {
                self.irq
            }
            fn nmi(&mut self) -> bool {
                false
            }
        }

        // SEI ; WAI ; NOP
        let mut bus = IrqBus { inner: TestBus::new(&[0x78, 0xCB, 0xEA]), irq: false };
        let mut cpu = Wdc65816::new();
        cpu.reset(&mut bus.inner);

        cpu.step(&mut bus); // SEI
        cpu.step(&mut bus); // WAI
        assert!(cpu.waiting());

        cpu.step(&mut bus);
        assert!(cpu.waiting()); // still waiting, no IRQ yet

        bus.irq = true;
        let pc_before = cpu.registers.pc;
        cpu.step(&mut bus);
        // IRQ is masked (I=1) so WAI falls through to the next instruction without dispatching
        assert!(!cpu.waiting());
        assert_eq!(cpu.registers.pc, pc_before.wrapping_add(1));
    }
}
