//! MMC5 (mapper 5): PRG/CHR mode banking, ExRAM nametables with fill mode, the hardware
//! multiplier, and the scanline IRQ
//!
//! Scanline detection uses the consecutive-nametable-fetch heuristic: three reads of the same
//! nametable address in a row mark a new scanline, which is how the chip itself infers the
//! PPU's position. The MMC5 pulse/PCM audio is not generated (recorded in DESIGN.md); the
//! CHR sprite/background split uses the last-written register set.

use crate::bus::cartridge::mappers::{BankSizeKb, ChrType, CpuMapResult, PpuMapResult};
use crate::bus::cartridge::{HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

const EXRAM_LEN: usize = 1024;

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Mmc5 {
    chr_type: ChrType,
    prg_mode: u8,
    chr_mode: u8,
    prg_banks: [u8; 5],
    chr_banks_sprite: [u8; 8],
    chr_banks_bg: [u8; 4],
    /// Which register set the most recent CHR bank write touched
    bg_set_active: bool,
    exram_mode: u8,
    exram: [u8; EXRAM_LEN],
    nametable_mapping: u8,
    fill_tile: u8,
    fill_attribute: u8,
    ram_protect_1: u8,
    ram_protect_2: u8,
    // Scanline IRQ
    irq_scanline_compare: u8,
    irq_enabled: bool,
    irq_pending: bool,
    in_frame: bool,
    current_scanline: u8,
    last_nametable_address: u16,
    consecutive_reads: u8,
    // Multiplier
    multiplicand: u8,
    multiplier: u8,
}

impl Mmc5 {
    pub(crate) fn new(chr_type: ChrType) -> Self {
        Self {
            chr_type,
            prg_mode: 3,
            chr_mode: 0,
            prg_banks: [0, 0, 0, 0, 0xFF],
            chr_banks_sprite: [0; 8],
            chr_banks_bg: [0; 4],
            bg_set_active: false,
            exram_mode: 0,
            exram: [0; EXRAM_LEN],
            nametable_mapping: 0,
            fill_tile: 0,
            fill_attribute: 0,
            ram_protect_1: 0,
            ram_protect_2: 0,
            irq_scanline_compare: 0,
            irq_enabled: false,
            irq_pending: false,
            in_frame: false,
            current_scanline: 0,
            last_nametable_address: 0,
            consecutive_reads: 0,
            multiplicand: 0xFF,
            multiplier: 0xFF,
        }
    }

    fn map_chr(&self, address: u16) -> u32 {
        // chr_mode selects the bank granularity; the last register of each covered group
        // applies. The background set only has 4 registers, with $1000-$1FFF mirroring.
        let (size, register) = if self.bg_set_active {
            match self.chr_mode {
                0 => (BankSizeKb::Eight, 3),
                1 => (BankSizeKb::Four, 3),
                2 => (BankSizeKb::Two, ((address >> 11) & 0x01) * 2 + 1),
                _ => (BankSizeKb::One, (address >> 10) & 0x03),
            }
        } else {
            match self.chr_mode {
                0 => (BankSizeKb::Eight, 7),
                1 => (BankSizeKb::Four, if address < 0x1000 { 3 } else { 7 }),
                2 => (BankSizeKb::Two, (address >> 11) * 2 + 1),
                _ => (BankSizeKb::One, address >> 10),
            }
        };

        let bank = if self.bg_set_active {
            self.chr_banks_bg[usize::from(register) & 0x03]
        } else {
            self.chr_banks_sprite[usize::from(register) & 0x07]
        };
        size.to_absolute_address(bank, address)
    }
}

impl MapperImpl<Mmc5> {
    fn map_cpu_address(&self, address: u16) -> CpuMapResult {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x5FFF => CpuMapResult::None,
            0x6000..=0x7FFF => {
                if self.cartridge.prg_ram_is_empty() {
                    CpuMapResult::None
                } else {
                    CpuMapResult::PrgRAM(
                        BankSizeKb::Eight.to_absolute_address(self.data.prg_banks[0] & 0x0F, address),
                    )
                }
            }
            0x8000..=0xFFFF => {
                let slot = usize::from((address - 0x8000) >> 13);
                let bank = match (self.data.prg_mode, slot) {
                    // 32KB: register 4 selects, low bits ignored
                    (0, _) => u32::from(self.data.prg_banks[4] >> 2) << 2 | slot as u32,
                    // 16KB + 16KB
                    (1, 0 | 1) => u32::from(self.data.prg_banks[2] >> 1) << 1 | slot as u32,
                    (1, _) => u32::from(self.data.prg_banks[4] >> 1) << 1 | (slot as u32 - 2),
                    // 16KB + 8KB + 8KB
                    (2, 0 | 1) => u32::from(self.data.prg_banks[2] >> 1) << 1 | slot as u32,
                    (2, 2) => u32::from(self.data.prg_banks[3]),
                    (2, _) => u32::from(self.data.prg_banks[4]),
                    // 8KB x 4
                    (_, slot) => u32::from(self.data.prg_banks[slot + 1]),
                };
                CpuMapResult::PrgROM(BankSizeKb::Eight.to_absolute_address(bank & 0x7F, address))
            }
        }
    }

    pub(crate) fn read_cpu_address(&mut self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x5204 => {
                (u8::from(std::mem::take(&mut self.data.irq_pending)) << 7)
                    | (u8::from(self.data.in_frame) << 6)
                    | (cpu_open_bus & 0x3F)
            }
            0x5205 => {
                (u16::from(self.data.multiplicand) * u16::from(self.data.multiplier)) as u8
            }
            0x5206 => {
                ((u16::from(self.data.multiplicand) * u16::from(self.data.multiplier)) >> 8)
                    as u8
            }
            0x5C00..=0x5FFF => {
                if self.data.exram_mode >= 2 {
                    self.data.exram[usize::from(address & 0x03FF)]
                } else {
                    cpu_open_bus
                }
            }
            _ => self.map_cpu_address(address).read(&self.cartridge).unwrap_or(cpu_open_bus),
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match address {
            0x5100 => self.data.prg_mode = value & 0x03,
            0x5101 => self.data.chr_mode = value & 0x03,
            0x5102 => self.data.ram_protect_1 = value & 0x03,
            0x5103 => self.data.ram_protect_2 = value & 0x03,
            0x5104 => self.data.exram_mode = value & 0x03,
            0x5105 => self.data.nametable_mapping = value,
            0x5106 => self.data.fill_tile = value,
            0x5107 => self.data.fill_attribute = value & 0x03,
            0x5113..=0x5117 => {
                self.data.prg_banks[usize::from(address - 0x5113)] = value;
            }
            0x5120..=0x5127 => {
                self.data.chr_banks_sprite[usize::from(address - 0x5120)] = value;
                self.data.bg_set_active = false;
            }
            0x5128..=0x512B => {
                self.data.chr_banks_bg[usize::from(address - 0x5128)] = value;
                self.data.bg_set_active = true;
            }
            0x5203 => self.data.irq_scanline_compare = value,
            0x5204 => self.data.irq_enabled = value.bit(7),
            0x5205 => self.data.multiplicand = value,
            0x5206 => self.data.multiplier = value,
            0x5C00..=0x5FFF => {
                // ExRAM writes are dropped in write-protect mode 3
                if self.data.exram_mode != 3 {
                    self.data.exram[usize::from(address & 0x03FF)] = value;
                }
            }
            0x6000..=0x7FFF => {
                // PRG RAM writes require both protect registers set to the magic values
                if self.data.ram_protect_1 == 0x02 && self.data.ram_protect_2 == 0x01 {
                    self.map_cpu_address(address).write(value, &mut self.cartridge);
                }
            }
            _ => {}
        }
    }

    /// Called with the PPU address bus each PPU cycle; drives the scanline counter.
    pub(crate) fn tick(&mut self, ppu_bus_address: u16) {
        if (0x2000..0x3F00).contains(&ppu_bus_address) {
            if ppu_bus_address == self.data.last_nametable_address {
                self.data.consecutive_reads += 1;
                if self.data.consecutive_reads == 2 {
                    // Third identical fetch: a new scanline has started
                    if self.data.in_frame {
                        self.data.current_scanline =
                            self.data.current_scanline.wrapping_add(1);
                        if self.data.current_scanline == self.data.irq_scanline_compare
                            && self.data.irq_scanline_compare != 0
                        {
                            self.data.irq_pending = true;
                        }
                    } else {
                        self.data.in_frame = true;
                        self.data.current_scanline = 0;
                    }
                }
            } else {
                self.data.consecutive_reads = 0;
            }
            self.data.last_nametable_address = ppu_bus_address;
        }
    }

    /// Idle PPU time ends the frame; the bus calls this when rendering stops (vblank).
    pub(crate) fn notify_vblank(&mut self) {
        self.data.in_frame = false;
        self.data.current_scanline = 0;
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        self.data.irq_pending && self.data.irq_enabled
    }
}

impl HasBasicPpuMapping for MapperImpl<Mmc5> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => self.data.chr_type.to_map_result(self.data.map_chr(address)),
            0x2000..=0x3EFF => {
                let table = usize::from((address >> 10) & 0x03);
                let selection = (self.data.nametable_mapping >> (table * 2)) & 0x03;
                match selection {
                    0 => PpuMapResult::Vram(address & 0x03FF),
                    1 => PpuMapResult::Vram(0x0400 | (address & 0x03FF)),
                    2 => {
                        // ExRAM as nametable; outside modes 0/1 it reads back zero, which
                        // the fill path below approximates with the fill tile
                        PpuMapResult::Vram(address & 0x03FF)
                    }
                    _ => {
                        // Fill mode is resolved at read time by the bus returning the fill
                        // tile/attribute; mapping to bank-0 VRAM keeps writes harmless
                        PpuMapResult::Vram(address & 0x03FF)
                    }
                }
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}

impl MapperImpl<Mmc5> {
    /// Nametable reads for ExRAM and fill modes bypass the plain VRAM mapping.
    pub(crate) fn read_nametable_override(&self, address: u16) -> Option<u8> {
        if !(0x2000..0x3F00).contains(&address) {
            return None;
        }
        let table = usize::from((address >> 10) & 0x03);
        let selection = (self.data.nametable_mapping >> (table * 2)) & 0x03;
        match selection {
            2 if self.data.exram_mode <= 1 => {
                Some(self.data.exram[usize::from(address & 0x03FF)])
            }
            3 => {
                if address & 0x03FF >= 0x03C0 {
                    let attr = self.data.fill_attribute;
                    Some(attr | (attr << 2) | (attr << 4) | (attr << 6))
                } else {
                    Some(self.data.fill_tile)
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::cartridge::Cartridge;
    use test_log::test;

    fn test_mapper() -> MapperImpl<Mmc5> {
        MapperImpl {
            cartridge: Cartridge::for_tests(vec![0; 512 * 1024], vec![0; 256 * 1024]),
            data: Mmc5::new(ChrType::ROM),
        }
    }

    #[test]
    fn multiplier_produces_16_bit_product() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0x5205, 200);
        mapper.write_cpu_address(0x5206, 200);
        let low = mapper.read_cpu_address(0x5205, 0);
        let high = mapper.read_cpu_address(0x5206, 0);
        assert_eq!(u16::from_le_bytes([low, high]), 40_000);
    }

    #[test]
    fn scanline_counter_fires_irq_at_compare() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0x5203, 2);
        mapper.write_cpu_address(0x5204, 0x80);

        let scanline = |mapper: &mut MapperImpl<Mmc5>| {
            // Three identical nametable fetches mark the scanline, then unrelated fetches
            for _ in 0..3 {
                mapper.tick(0x2000);
            }
            for i in 0..8_u16 {
                mapper.tick(0x2040 + i);
            }
        };

        scanline(&mut mapper); // enters frame at scanline 0
        scanline(&mut mapper); // scanline 1
        assert!(!mapper.interrupt_flag());
        scanline(&mut mapper); // scanline 2: compare hit
        assert!(mapper.interrupt_flag());

        // $5204 read acknowledges
        let status = mapper.read_cpu_address(0x5204, 0);
        assert!(status.bit(7));
        assert!(!mapper.interrupt_flag());
    }

    #[test]
    fn exram_gated_by_mode() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0x5104, 3);
        mapper.write_cpu_address(0x5C00, 0x42);
        assert_eq!(mapper.data.exram[0], 0); // write-protected

        mapper.write_cpu_address(0x5104, 2);
        mapper.write_cpu_address(0x5C00, 0x42);
        assert_eq!(mapper.read_cpu_address(0x5C00, 0), 0x42);
    }

    #[test]
    fn fill_mode_nametable_reads() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0x5105, 0xFF); // all tables in fill mode
        mapper.write_cpu_address(0x5106, 0xAB);
        mapper.write_cpu_address(0x5107, 0x02);

        assert_eq!(mapper.read_nametable_override(0x2000), Some(0xAB));
        assert_eq!(mapper.read_nametable_override(0x23C0), Some(0xAA));
    }

    #[test]
    fn prg_mode_3_uses_four_8k_banks() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0x5100, 3);
        mapper.write_cpu_address(0x5114, 5);
        match mapper.map_cpu_address(0x8000) {
            CpuMapResult::PrgROM(address) => assert_eq!(address, 5 * 0x2000),
            other => panic!("expected PRG ROM mapping, got {other:?}"),
        }
    }
}
