//! GBA memory map: BIOS, EWRAM, IWRAM, I/O, palette/VRAM/OAM, cartridge ROM with WAITCNT
//! wait states and the prefetch buffer, and backup memory

use crate::apu::Apu;
use crate::cartridge::CartridgeState;
use crate::dma::DmaController;
use crate::interrupts::InterruptRegisters;
use crate::ppu::Ppu;
use crate::prefetch::PrefetchBuffer;
use crate::timers::Timers;
use crate::GbaInputs;
use arm7tdmi_emu::bus::{BusInterface, MemoryCycle};
use bincode::{Decode, Encode};
use retrocore_common::boxedarray::BoxedByteArray;
use retrocore_common::frontend::PartialClone;
use retrocore_common::num::GetBit;
use retrocore_proc_macros::{FakeDecode, FakeEncode};
use std::ops::Deref;

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
pub(crate) struct Rom(pub(crate) Box<[u8]>);

impl Deref for Rom {
    type Target = Box<[u8]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// WAITCNT wait-state lookup: first access values by setting
const N_WAIT_TABLE: [u32; 4] = [4, 3, 2, 8];

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Bus {
    #[partial_clone(default)]
    pub(crate) rom: Rom,
    bios: Vec<u8>,
    ewram: BoxedByteArray<0x40000>,
    iwram: BoxedByteArray<0x8000>,
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) dma: DmaController,
    pub(crate) timers: Timers,
    pub(crate) interrupts: InterruptRegisters,
    pub(crate) cartridge: CartridgeState,
    pub(crate) prefetch: PrefetchBuffer,
    pub(crate) inputs: GbaInputs,
    waitcnt: u16,
    pub(crate) elapsed_cycles: u64,
    open_bus: u32,
    /// HALTCNT halt state; cleared by any enabled interrupt flag
    pub(crate) halted: bool,
}

impl Bus {
    pub(crate) fn new(rom: Box<[u8]>, cartridge: CartridgeState, bios: Vec<u8>) -> Self {
        Self {
            rom: Rom(rom),
            bios,
            ewram: BoxedByteArray::new(),
            iwram: BoxedByteArray::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            dma: DmaController::default(),
            timers: Timers::default(),
            interrupts: InterruptRegisters::default(),
            cartridge,
            prefetch: PrefetchBuffer::default(),
            inputs: GbaInputs::default(),
            waitcnt: 0,
            elapsed_cycles: 0,
            open_bus: 0,
            halted: false,
        }
    }

    fn keyinput(&self) -> u16 {
        // Active low
        !(u16::from(self.inputs.a)
            | (u16::from(self.inputs.b) << 1)
            | (u16::from(self.inputs.select) << 2)
            | (u16::from(self.inputs.start) << 3)
            | (u16::from(self.inputs.right) << 4)
            | (u16::from(self.inputs.left) << 5)
            | (u16::from(self.inputs.up) << 6)
            | (u16::from(self.inputs.down) << 7)
            | (u16::from(self.inputs.r) << 8)
            | (u16::from(self.inputs.l) << 9))
            & 0x03FF
    }

    fn rom_waits(&self, sequential: bool) -> u32 {
        // Wait state 0 settings from WAITCNT
        let n = N_WAIT_TABLE[usize::from((self.waitcnt >> 2) & 0x03)];
        let s = if self.waitcnt.bit(4) { 1 } else { 2 };
        if sequential { s } else { n }
    }

    fn charge(&mut self, region: u32, cycle: MemoryCycle, is_opcode: bool) {
        let cycles = match region {
            // EWRAM: 2 wait states
            0x02 => 3,
            // ROM
            0x08..=0x0D => {
                let sequential = cycle == MemoryCycle::S;
                if is_opcode {
                    // Opcode fetches go through the prefetcher
                    1
                } else {
                    1 + self.rom_waits(sequential)
                }
            }
            // SRAM
            0x0E | 0x0F => 1 + N_WAIT_TABLE[usize::from(self.waitcnt & 0x03)],
            _ => 1,
        };
        self.elapsed_cycles += u64::from(cycles);
    }

    fn read_io(&mut self, address: u32) -> u8 {
        match address & 0xFFF {
            0x000..=0x05F => self.ppu.read_register(address),
            0x060..=0x0AF => self.apu.read_register(address),
            0x0B0..=0x0DF => self.dma.read_register(address),
            0x100..=0x10F => self.timers.read_register(address),
            0x130 => self.keyinput() as u8,
            0x131 => (self.keyinput() >> 8) as u8,
            0x200 => self.interrupts.enabled as u8,
            0x201 => (self.interrupts.enabled >> 8) as u8,
            0x202 => self.interrupts.flags as u8,
            0x203 => (self.interrupts.flags >> 8) as u8,
            0x204 => self.waitcnt as u8,
            0x205 => (self.waitcnt >> 8) as u8,
            0x208 => u8::from(self.interrupts.ime),
            _ => 0,
        }
    }

    fn write_io(&mut self, address: u32, value: u8) {
        match address & 0xFFF {
            0x000..=0x05F => self.ppu.write_register(address, value),
            0x060..=0x0AF => self.apu.write_register(address, value),
            0x0B0..=0x0DF => self.dma.write_register(address, value),
            0x100..=0x10F => self.timers.write_register(address, value),
            0x200 => {
                self.interrupts.enabled = (self.interrupts.enabled & 0xFF00) | u16::from(value);
            }
            0x201 => {
                self.interrupts.enabled =
                    (self.interrupts.enabled & 0x00FF) | (u16::from(value) << 8);
            }
            0x202 => self.interrupts.acknowledge(u16::from(value)),
            0x203 => self.interrupts.acknowledge(u16::from(value) << 8),
            0x204 => {
                self.waitcnt = (self.waitcnt & 0xFF00) | u16::from(value);
            }
            0x205 => {
                self.waitcnt = (self.waitcnt & 0x00FF) | (u16::from(value) << 8);
                self.prefetch.enabled = self.waitcnt.bit(14);
            }
            0x208 => self.interrupts.ime = value.bit(0),
            0x301 => {
                // HALTCNT: bit 7 clear = halt
                if !value.bit(7) {
                    self.halted = true;
                }
            }
            _ => {}
        }
    }

    fn byte_at(&mut self, address: u32) -> u8 {
        let region = address >> 24;
        match region {
            0x00 => self.bios.get((address & 0x3FFF) as usize).copied().unwrap_or(0),
            0x02 => self.ewram[(address & 0x3_FFFF) as usize],
            0x03 => self.iwram[(address & 0x7FFF) as usize],
            0x04 => self.read_io(address),
            0x05 => self.ppu.palette_ram[(address & 0x3FF) as usize],
            0x06 => {
                let offset = address & 0x1_FFFF;
                let offset = if offset >= 0x18000 { offset - 0x8000 } else { offset };
                self.ppu.vram[offset as usize]
            }
            0x07 => self.ppu.oam[(address & 0x3FF) as usize],
            0x08..=0x0D => {
                if self.cartridge.is_eeprom_address(address) {
                    if let Some(eeprom) = self.cartridge.eeprom_mut() {
                        return u8::from(eeprom.read_bit());
                    }
                }
                if let Some(value) = self.cartridge.read_gpio(address) {
                    return value;
                }
                let rom_addr = (address & 0x01FF_FFFF) as usize;
                self.rom.get(rom_addr).copied().unwrap_or_else(|| {
                    // Out-of-bounds ROM reads return the address bus pattern
                    (address >> 1) as u8
                })
            }
            0x0E | 0x0F => self.cartridge.read_backup(address),
            _ => (self.open_bus >> (8 * (address & 3))) as u8,
        }
    }

    fn write_byte_at(&mut self, address: u32, value: u8) {
        let region = address >> 24;
        match region {
            0x02 => self.ewram[(address & 0x3_FFFF) as usize] = value,
            0x03 => self.iwram[(address & 0x7FFF) as usize] = value,
            0x04 => self.write_io(address, value),
            0x05 => self.ppu.palette_ram[(address & 0x3FF) as usize] = value,
            0x06 => {
                let offset = address & 0x1_FFFF;
                let offset = if offset >= 0x18000 { offset - 0x8000 } else { offset };
                self.ppu.vram[offset as usize] = value;
            }
            0x07 => self.ppu.oam[(address & 0x3FF) as usize] = value,
            0x08..=0x0D => {
                if self.cartridge.is_eeprom_address(address) {
                    if let Some(eeprom) = self.cartridge.eeprom_mut() {
                        eeprom.write_bit(value & 1 != 0);
                        return;
                    }
                }
                self.cartridge.write_gpio(address, value);
            }
            0x0E | 0x0F => self.cartridge.write_backup(address, value),
            _ => {}
        }
    }
}

impl BusInterface for Bus {
    fn read_byte(&mut self, address: u32, cycle: MemoryCycle) -> u8 {
        self.charge(address >> 24, cycle, false);
        let value = self.byte_at(address);
        self.open_bus = u32::from(value) * 0x0101_0101;
        value
    }

    fn read_halfword(&mut self, address: u32, cycle: MemoryCycle) -> u16 {
        self.charge(address >> 24, cycle, false);
        let value = u16::from_le_bytes([self.byte_at(address), self.byte_at(address + 1)]);
        self.open_bus = u32::from(value) * 0x0001_0001;
        value
    }

    fn read_word(&mut self, address: u32, cycle: MemoryCycle) -> u32 {
        self.charge(address >> 24, cycle, false);
        // 32-bit ROM/EWRAM accesses take two 16-bit bus transfers
        if matches!(address >> 24, 0x02 | 0x08..=0x0D) {
            self.elapsed_cycles += u64::from(self.rom_waits(true)).min(3);
        }
        let value = u32::from_le_bytes([
            self.byte_at(address),
            self.byte_at(address + 1),
            self.byte_at(address + 2),
            self.byte_at(address + 3),
        ]);
        self.open_bus = value;
        value
    }

    fn fetch_opcode_halfword(&mut self, address: u32, cycle: MemoryCycle) -> u16 {
        let region = address >> 24;
        if (0x08..=0x0D).contains(&region) {
            let n = 1 + self.rom_waits(false);
            let s = 1 + self.rom_waits(true);
            let waits = self.prefetch.fetch(address, n - 1, s - 1);
            self.elapsed_cycles += u64::from(1 + waits);
            let value = u16::from_le_bytes([self.byte_at(address), self.byte_at(address + 1)]);
            return value;
        }
        self.read_halfword(address, cycle)
    }

    fn fetch_opcode_word(&mut self, address: u32, cycle: MemoryCycle) -> u32 {
        let region = address >> 24;
        if (0x08..=0x0D).contains(&region) {
            let low = self.fetch_opcode_halfword(address, cycle);
            let high = self.fetch_opcode_halfword(address + 2, MemoryCycle::S);
            return u32::from(low) | (u32::from(high) << 16);
        }
        self.read_word(address, cycle)
    }

    fn write_byte(&mut self, address: u32, value: u8, cycle: MemoryCycle) {
        self.charge(address >> 24, cycle, false);
        self.write_byte_at(address, value);
    }

    fn write_halfword(&mut self, address: u32, value: u16, cycle: MemoryCycle) {
        self.charge(address >> 24, cycle, false);
        let [low, high] = value.to_le_bytes();
        self.write_byte_at(address, low);
        self.write_byte_at(address + 1, high);
    }

    fn write_word(&mut self, address: u32, value: u32, cycle: MemoryCycle) {
        self.charge(address >> 24, cycle, false);
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_byte_at(address + i as u32, byte);
        }
    }

    fn irq(&self) -> bool {
        self.interrupts.irq_line()
    }

    fn internal_cycles(&mut self, cycles: u32) {
        self.elapsed_cycles += u64::from(cycles);
        self.prefetch.run_idle_cycles(cycles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bus() -> Bus {
        let rom = vec![0_u8; 0x1000].into_boxed_slice();
        let cartridge = CartridgeState::new(&rom, None);
        Bus::new(rom, cartridge, vec![0; 0x4000])
    }

    #[test]
    fn ewram_mirrors() {
        let mut bus = test_bus();
        bus.write_byte(0x0200_0000, 0xAA, MemoryCycle::N);
        assert_eq!(bus.read_byte(0x0204_0000, MemoryCycle::N), 0xAA);
    }

    #[test]
    fn keyinput_is_active_low() {
        let mut bus = test_bus();
        assert_eq!(bus.read_byte(0x0400_0130, MemoryCycle::N) & 1, 1);
        bus.inputs.a = true;
        assert_eq!(bus.read_byte(0x0400_0130, MemoryCycle::N) & 1, 0);
    }

    #[test]
    fn interrupt_flags_are_write_one_to_clear() {
        let mut bus = test_bus();
        bus.interrupts.flags = 0x0005;
        bus.write_byte(0x0400_0202, 0x04, MemoryCycle::N);
        assert_eq!(bus.interrupts.flags, 0x0001);
    }

    #[test]
    fn waitcnt_prefetch_enable() {
        let mut bus = test_bus();
        bus.write_byte(0x0400_0205, 0x40, MemoryCycle::N);
        assert!(bus.prefetch.enabled);
    }
}
