//! System memory map: WRAM, cartridge decode (LoROM / HiROM / ExHiROM), internal CPU
//! registers, open-bus MDR, and master-cycle accounting per region

use crate::apu::Apu;
use crate::dma::DmaController;
use crate::input::InputState;
use crate::ppu::Ppu;
use bincode::{Decode, Encode};
use retrocore_common::boxedarray::BoxedByteArray;
use retrocore_common::frontend::PartialClone;
use retrocore_common::num::GetBit;
use retrocore_proc_macros::{FakeDecode, FakeEncode};
use snes_coprocessors::CoprocessorSlot;
use std::ops::Deref;

const WRAM_LEN: usize = 0x20000;

// Master cycles per access by region speed
pub(crate) const FAST_CYCLES: u64 = 6;
pub(crate) const SLOW_CYCLES: u64 = 8;
pub(crate) const XSLOW_CYCLES: u64 = 12;

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
pub(crate) struct Rom(pub(crate) Box<[u8]>);

impl Deref for Rom {
    type Target = Box<[u8]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum CartridgeLayout {
    LoRom,
    HiRom,
    ExHiRom,
}

impl CartridgeLayout {
    /// Score both header locations and pick the better fit.
    pub(crate) fn detect(rom: &[u8]) -> Self {
        fn score(rom: &[u8], header_base: usize) -> i32 {
            let Some(&mode) = rom.get(header_base + 0x15) else { return i32::MIN };
            let Some(&complement_lo) = rom.get(header_base + 0x1C) else { return i32::MIN };
            let Some(&complement_hi) = rom.get(header_base + 0x1D) else { return i32::MIN };
            let Some(&checksum_lo) = rom.get(header_base + 0x1E) else { return i32::MIN };
            let Some(&checksum_hi) = rom.get(header_base + 0x1F) else { return i32::MIN };

            let checksum = u16::from_le_bytes([checksum_lo, checksum_hi]);
            let complement = u16::from_le_bytes([complement_lo, complement_hi]);

            let mut score = 0;
            if checksum != 0 && checksum ^ complement == 0xFFFF {
                score += 4;
            }
            // Map mode byte low nibble: 0/2/3 LoROM-ish, 1/5/A HiROM-ish
            score += match (header_base, mode & 0x0F) {
                (0x7FC0, 0x00 | 0x02 | 0x03) => 2,
                (0xFFC0, 0x01 | 0x05 | 0x0A) => 2,
                _ => 0,
            };
            score
        }

        let lo_score = score(rom, 0x7FC0);
        let hi_score = score(rom, 0xFFC0);

        if hi_score > lo_score {
            let mode = rom.get(0xFFC0 + 0x15).copied().unwrap_or(0);
            if mode & 0x0F == 0x05 && rom.len() > 0x400000 {
                CartridgeLayout::ExHiRom
            } else {
                CartridgeLayout::HiRom
            }
        } else {
            CartridgeLayout::LoRom
        }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Cartridge {
    #[partial_clone(default)]
    pub(crate) rom: Rom,
    pub(crate) sram: Box<[u8]>,
    pub(crate) layout: CartridgeLayout,
    pub(crate) sram_dirty: bool,
    #[partial_clone(partial)]
    pub(crate) coprocessor: CoprocessorSlot,
}

impl Cartridge {
    fn map_rom_address(&self, bank: u8, offset: u16) -> Option<u32> {
        match self.layout {
            CartridgeLayout::LoRom => {
                if offset >= 0x8000 || bank & 0x7F >= 0x40 {
                    let rom_addr =
                        (u32::from(bank & 0x7F) << 15) | u32::from(offset & 0x7FFF);
                    Some(rom_addr)
                } else {
                    None
                }
            }
            CartridgeLayout::HiRom => {
                let bank = bank & 0x7F;
                if bank >= 0x40 {
                    Some((u32::from(bank & 0x3F) << 16) | u32::from(offset))
                } else if offset >= 0x8000 {
                    Some((u32::from(bank & 0x3F) << 16) | u32::from(offset))
                } else {
                    None
                }
            }
            CartridgeLayout::ExHiRom => {
                // The top half of the address space maps the first 4MB, the bottom the rest
                let bank7 = bank & 0x7F;
                let high_half = bank < 0x80;
                let base: u32 = if high_half { 0x400000 } else { 0 };
                if bank7 >= 0x40 || offset >= 0x8000 {
                    Some(base + ((u32::from(bank7 & 0x3F) << 16) | u32::from(offset)))
                } else {
                    None
                }
            }
        }
    }

    fn map_sram_address(&self, bank: u8, offset: u16) -> Option<u32> {
        if self.sram.is_empty() {
            return None;
        }
        match self.layout {
            CartridgeLayout::LoRom => {
                let bank = bank & 0x7F;
                if (0x70..0x7E).contains(&bank) && offset < 0x8000 {
                    Some(((u32::from(bank - 0x70) << 15) | u32::from(offset))
                        % self.sram.len() as u32)
                } else {
                    None
                }
            }
            CartridgeLayout::HiRom | CartridgeLayout::ExHiRom => {
                let bank7 = bank & 0x7F;
                if (0x20..0x40).contains(&bank7) && (0x6000..0x8000).contains(&offset) {
                    Some((((u32::from(bank7 - 0x20) << 13) | u32::from(offset - 0x6000))
                        % self.sram.len() as u32) as u32)
                } else {
                    None
                }
            }
        }
    }

    pub(crate) fn read(&mut self, address: u32) -> Option<u8> {
        let bank = (address >> 16) as u8;
        let offset = address as u16;

        if let Some(value) = self.coprocessor.read(address, &self.rom.0, &self.sram) {
            return Some(value);
        }

        if let Some(sram_addr) = self.map_sram_address(bank, offset) {
            return Some(self.sram[sram_addr as usize]);
        }

        self.map_rom_address(bank, offset)
            .map(|rom_addr| self.rom[(rom_addr as usize) % self.rom.len().max(1)])
    }

    pub(crate) fn write(&mut self, address: u32, value: u8) {
        let bank = (address >> 16) as u8;
        let offset = address as u16;

        if self.coprocessor.write(address, value, &mut self.sram) {
            self.sram_dirty = true;
            return;
        }

        if let Some(sram_addr) = self.map_sram_address(bank, offset) {
            self.sram[sram_addr as usize] = value;
            self.sram_dirty = true;
        }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Bus {
    pub(crate) wram: BoxedByteArray<WRAM_LEN>,
    #[partial_clone(partial)]
    pub(crate) cartridge: Cartridge,
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) dma: DmaController,
    pub(crate) input: InputState,
    /// Memory data register: the open-bus value
    pub(crate) mdr: u8,
    pub(crate) elapsed_master_cycles: u64,
    // $2180-$2183 WRAM port
    wram_port_address: u32,
    // $4200 NMITIMEN
    pub(crate) nmi_enabled: bool,
    pub(crate) htime_irq_enabled: bool,
    pub(crate) vtime_irq_enabled: bool,
    pub(crate) auto_joypad_read: bool,
    // $4207-$420A H/V IRQ compare
    pub(crate) htime: u16,
    pub(crate) vtime: u16,
    pub(crate) nmi_flag: bool,
    pub(crate) irq_flag: bool,
    /// FastROM enable ($420D)
    memsel_fast: bool,
    // $4202-$4206 multiply/divide unit
    mul_a: u8,
    mul_b: u8,
    div_dividend: u16,
    div_divisor: u8,
    mul_div_result: u16,
    div_quotient: u16,
}

impl Bus {
    pub(crate) fn new(cartridge: Cartridge) -> Self {
        Self {
            wram: BoxedByteArray::new(),
            cartridge,
            ppu: Ppu::new(),
            apu: Apu::new(),
            dma: DmaController::new(),
            input: InputState::default(),
            mdr: 0,
            elapsed_master_cycles: 0,
            wram_port_address: 0,
            nmi_enabled: false,
            htime_irq_enabled: false,
            vtime_irq_enabled: false,
            auto_joypad_read: false,
            htime: 0x1FF,
            vtime: 0x1FF,
            nmi_flag: false,
            irq_flag: false,
            memsel_fast: false,
            mul_a: 0xFF,
            mul_b: 0xFF,
            div_dividend: 0xFFFF,
            div_divisor: 0xFF,
            mul_div_result: 0,
            div_quotient: 0,
        }
    }

    fn access_cycles(&self, address: u32) -> u64 {
        let bank = (address >> 16) as u8;
        let offset = address as u16;
        match (bank, offset) {
            // Internal registers / WRAM region speeds
            (0x00..=0x3F | 0x80..=0xBF, 0x0000..=0x1FFF) => SLOW_CYCLES,
            (0x00..=0x3F | 0x80..=0xBF, 0x2000..=0x3FFF) => FAST_CYCLES,
            (0x00..=0x3F | 0x80..=0xBF, 0x4000..=0x41FF) => XSLOW_CYCLES,
            (0x00..=0x3F | 0x80..=0xBF, 0x4200..=0x5FFF) => FAST_CYCLES,
            (0x7E..=0x7F, _) => SLOW_CYCLES,
            // Cartridge: FastROM halves access time in the top banks
            (0x80..=0xFF, _) if self.memsel_fast => FAST_CYCLES,
            _ => SLOW_CYCLES,
        }
    }

    pub(crate) fn read_byte(&mut self, address: u32) -> u8 {
        let address = address & 0xFFFFFF;
        self.elapsed_master_cycles += self.access_cycles(address);

        let bank = (address >> 16) as u8;
        let offset = address as u16;

        let value = match (bank, offset) {
            (0x7E..=0x7F, _) => {
                Some(self.wram[((u32::from(bank - 0x7E) << 16) | u32::from(offset)) as usize])
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x0000..=0x1FFF) => {
                Some(self.wram[usize::from(offset)])
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2100..=0x213F) => self.ppu.read_register(offset, self.mdr),
            (0x00..=0x3F | 0x80..=0xBF, 0x2140..=0x217F) => {
                Some(self.apu.read_port((offset & 0x03) as u8))
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2180) => {
                let value = self.wram[(self.wram_port_address & 0x1FFFF) as usize];
                self.wram_port_address = (self.wram_port_address + 1) & 0x1FFFF;
                Some(value)
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4016) => Some(self.input.read_4016() | (self.mdr & 0xFC)),
            (0x00..=0x3F | 0x80..=0xBF, 0x4017) => Some(self.input.read_4017() | (self.mdr & 0xE0) | 0x1C),
            (0x00..=0x3F | 0x80..=0xBF, 0x4210) => {
                let value = (u8::from(std::mem::take(&mut self.nmi_flag)) << 7) | 0x02 | (self.mdr & 0x70);
                Some(value)
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4211) => {
                let value = (u8::from(std::mem::take(&mut self.irq_flag)) << 7) | (self.mdr & 0x7F);
                Some(value)
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4212) => {
                let mut value = self.mdr & 0x3E;
                if self.ppu.in_vblank() {
                    value |= 0x80;
                }
                if self.ppu.in_hblank() {
                    value |= 0x40;
                }
                if self.input.auto_read_in_progress() {
                    value |= 0x01;
                }
                Some(value)
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4214) => Some(self.div_quotient as u8),
            (0x00..=0x3F | 0x80..=0xBF, 0x4215) => Some((self.div_quotient >> 8) as u8),
            (0x00..=0x3F | 0x80..=0xBF, 0x4216) => Some(self.mul_div_result as u8),
            (0x00..=0x3F | 0x80..=0xBF, 0x4217) => Some((self.mul_div_result >> 8) as u8),
            (0x00..=0x3F | 0x80..=0xBF, 0x4218..=0x421F) => {
                Some(self.input.read_auto_joypad(offset))
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4300..=0x437F) => self.dma.read_register(offset),
            // Satellaview receiver registers sit on the B-bus behind the cartridge slot
            (0x00..=0x3F | 0x80..=0xBF, 0x2188..=0x219F) => self.cartridge.read(address),
            (0x00..=0x3F | 0x80..=0xBF, 0x2000..=0x5FFF) => None,
            _ => self.cartridge.read(address),
        };

        let value = value.unwrap_or(self.mdr);
        self.mdr = value;
        value
    }

    pub(crate) fn write_byte(&mut self, address: u32, value: u8) {
        let address = address & 0xFFFFFF;
        self.elapsed_master_cycles += self.access_cycles(address);
        self.mdr = value;

        let bank = (address >> 16) as u8;
        let offset = address as u16;

        match (bank, offset) {
            (0x7E..=0x7F, _) => {
                self.wram[((u32::from(bank - 0x7E) << 16) | u32::from(offset)) as usize] = value;
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x0000..=0x1FFF) => {
                self.wram[usize::from(offset)] = value;
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2100..=0x213F) => {
                self.ppu.write_register(offset, value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2140..=0x217F) => {
                self.apu.write_port((offset & 0x03) as u8, value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2180) => {
                self.wram[(self.wram_port_address & 0x1FFFF) as usize] = value;
                self.wram_port_address = (self.wram_port_address + 1) & 0x1FFFF;
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2181) => {
                self.wram_port_address = (self.wram_port_address & 0x1FF00) | u32::from(value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2182) => {
                self.wram_port_address =
                    (self.wram_port_address & 0x100FF) | (u32::from(value) << 8);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2183) => {
                self.wram_port_address =
                    (self.wram_port_address & 0x0FFFF) | (u32::from(value & 0x01) << 16);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4016) => self.input.write_strobe(value),
            (0x00..=0x3F | 0x80..=0xBF, 0x4200) => {
                self.nmi_enabled = value.bit(7);
                self.vtime_irq_enabled = value.bit(5);
                self.htime_irq_enabled = value.bit(4);
                self.auto_joypad_read = value.bit(0);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4202) => self.mul_a = value,
            (0x00..=0x3F | 0x80..=0xBF, 0x4203) => {
                self.mul_b = value;
                self.mul_div_result = u16::from(self.mul_a) * u16::from(value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4204) => {
                self.div_dividend = (self.div_dividend & 0xFF00) | u16::from(value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4205) => {
                self.div_dividend = (self.div_dividend & 0x00FF) | (u16::from(value) << 8);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4206) => {
                self.div_divisor = value;
                if value == 0 {
                    self.div_quotient = 0xFFFF;
                    self.mul_div_result = self.div_dividend;
                } else {
                    self.div_quotient = self.div_dividend / u16::from(value);
                    self.mul_div_result = self.div_dividend % u16::from(value);
                }
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4207) => {
                self.htime = (self.htime & 0x100) | u16::from(value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4208) => {
                self.htime = (self.htime & 0x0FF) | (u16::from(value & 0x01) << 8);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x4209) => {
                self.vtime = (self.vtime & 0x100) | u16::from(value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x420A) => {
                self.vtime = (self.vtime & 0x0FF) | (u16::from(value & 0x01) << 8);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x420B) => self.dma.start_gpdma(value),
            (0x00..=0x3F | 0x80..=0xBF, 0x420C) => self.dma.set_hdma_enabled(value),
            (0x00..=0x3F | 0x80..=0xBF, 0x420D) => self.memsel_fast = value.bit(0),
            (0x00..=0x3F | 0x80..=0xBF, 0x4300..=0x437F) => {
                self.dma.write_register(offset, value);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2188..=0x219F) => {
                // Register writes, not SRAM; skip the dirty tracking
                let Cartridge { coprocessor, sram, .. } = &mut self.cartridge;
                coprocessor.write(address, value, sram);
            }
            (0x00..=0x3F | 0x80..=0xBF, 0x2000..=0x5FFF) => {}
            _ => self.cartridge.write(address, value),
        }
    }
}

impl wdc65816_emu::BusInterface for Bus {
    fn read(&mut self, address: u32) -> u8 {
        self.read_byte(address)
    }

    fn write(&mut self, address: u32, value: u8) {
        self.write_byte(address, value);
    }

    fn idle(&mut self) {
        self.elapsed_master_cycles += FAST_CYCLES;
    }

    fn irq(&mut self) -> bool {
        self.irq_flag || self.cartridge.coprocessor.irq()
    }

    fn nmi(&mut self) -> bool {
        self.nmi_flag && self.nmi_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lorom_cartridge(rom_len: usize) -> Cartridge {
        let mut rom = vec![0_u8; rom_len];
        for (i, byte) in rom.iter_mut().enumerate() {
            *byte = (i >> 15) as u8;
        }
        Cartridge {
            rom: Rom(rom.into_boxed_slice()),
            sram: vec![0; 0x8000].into_boxed_slice(),
            layout: CartridgeLayout::LoRom,
            sram_dirty: false,
            coprocessor: CoprocessorSlot::default(),
        }
    }

    #[test]
    fn lorom_maps_banks_to_32kb_chunks() {
        let mut cartridge = lorom_cartridge(0x100000);
        // Bank $00:$8000 -> ROM 0; bank $01:$8000 -> ROM bank 1
        assert_eq!(cartridge.read(0x008000), Some(0));
        assert_eq!(cartridge.read(0x018000), Some(1));
        assert_eq!(cartridge.read(0x808000), Some(0));
    }

    #[test]
    fn lorom_sram_at_bank_70() {
        let mut cartridge = lorom_cartridge(0x100000);
        cartridge.write(0x700123, 0xAB);
        assert_eq!(cartridge.read(0x700123), Some(0xAB));
        assert!(cartridge.sram_dirty);
    }

    #[test]
    fn wram_mirrors_in_low_banks() {
        let cartridge = lorom_cartridge(0x8000);
        let mut bus = Bus::new(cartridge);
        bus.write_byte(0x7E1234, 0x42);
        assert_eq!(bus.read_byte(0x001234), 0x42);
        assert_eq!(bus.read_byte(0x801234), 0x42);
    }

    #[test]
    fn open_bus_returns_mdr() {
        let cartridge = lorom_cartridge(0x8000);
        let mut bus = Bus::new(cartridge);
        bus.write_byte(0x7E0000, 0x5A);
        // Unmapped register region returns the last bus value
        let value = bus.read_byte(0x002000);
        assert_eq!(value, 0x5A);
    }

    #[test]
    fn multiplier_and_divider() {
        let cartridge = lorom_cartridge(0x8000);
        let mut bus = Bus::new(cartridge);
        bus.write_byte(0x004202, 12);
        bus.write_byte(0x004203, 34);
        assert_eq!(bus.read_byte(0x004216), (408_u16 & 0xFF) as u8);
        assert_eq!(bus.read_byte(0x004217), (408_u16 >> 8) as u8);

        bus.write_byte(0x004204, 100);
        bus.write_byte(0x004205, 0);
        bus.write_byte(0x004206, 7);
        assert_eq!(bus.read_byte(0x004214), 14);
        assert_eq!(bus.read_byte(0x004216), 2);
    }
}
