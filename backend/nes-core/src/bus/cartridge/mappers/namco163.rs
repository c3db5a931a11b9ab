//! Namco 163 (mapper 19): CHR banks that can select nametable RAM, internal RAM, and the
//! 15-bit CPU-cycle IRQ counter readable at $5000/$5800
//!
//! The expansion wavetable audio is not generated; games play correctly through the stock
//! APU channels with the N163 voices absent.

use crate::bus::cartridge::mappers::{BankSizeKb, ChrType, CpuMapResult, PpuMapResult};
use crate::bus::cartridge::{HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

const INTERNAL_RAM_LEN: usize = 128;

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Namco163 {
    chr_type: ChrType,
    prg_banks: [u8; 3],
    chr_banks: [u8; 8],
    nametable_banks: [u8; 4],
    /// CHR banks >= $E0 select CIRAM when the range's disable bit is clear
    chr_ram_low_disabled: bool,
    chr_ram_high_disabled: bool,
    irq_counter: u16,
    irq_enabled: bool,
    irq_flag: bool,
    /// Sound RAM doubles as the battery-backed save memory on some boards
    internal_ram: [u8; INTERNAL_RAM_LEN],
    internal_ram_address: u8,
    internal_ram_auto_increment: bool,
    internal_ram_dirty: bool,
    has_battery: bool,
    ram_write_protect: u8,
}

impl Namco163 {
    pub(crate) fn new(chr_type: ChrType, has_battery: bool, sav_bytes: Option<&[u8]>) -> Self {
        let mut internal_ram = [0; INTERNAL_RAM_LEN];
        if let Some(sav_bytes) = sav_bytes {
            if sav_bytes.len() == INTERNAL_RAM_LEN {
                internal_ram.copy_from_slice(sav_bytes);
            }
        }

        Self {
            chr_type,
            prg_banks: [0; 3],
            chr_banks: [0; 8],
            nametable_banks: [0xE0; 4],
            chr_ram_low_disabled: false,
            chr_ram_high_disabled: false,
            irq_counter: 0,
            irq_enabled: false,
            irq_flag: false,
            internal_ram,
            internal_ram_address: 0,
            internal_ram_auto_increment: false,
            internal_ram_dirty: false,
            has_battery,
            ram_write_protect: 0,
        }
    }

    fn chr_map(&self, bank: u8, address: u16, ram_disabled: bool) -> PpuMapResult {
        if bank >= 0xE0 && !ram_disabled {
            // CIRAM page select
            let page = u16::from(bank & 0x01);
            return PpuMapResult::Vram((page << 10) | (address & 0x03FF));
        }
        self.chr_type.to_map_result(BankSizeKb::One.to_absolute_address(bank, address))
    }
}

impl MapperImpl<Namco163> {
    fn map_cpu_address(&self, address: u16) -> CpuMapResult {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x7FFF => CpuMapResult::None,
            0x8000..=0xDFFF => {
                let slot = usize::from((address - 0x8000) >> 13);
                CpuMapResult::PrgROM(BankSizeKb::Eight.to_absolute_address(
                    self.data.prg_banks[slot] & 0x3F,
                    address,
                ))
            }
            0xE000..=0xFFFF => CpuMapResult::PrgROM(
                BankSizeKb::Eight
                    .to_absolute_address_last_bank(self.cartridge.prg_rom_len(), address),
            ),
        }
    }

    pub(crate) fn read_cpu_address(&mut self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x4800..=0x4FFF => {
                let value =
                    self.data.internal_ram[usize::from(self.data.internal_ram_address & 0x7F)];
                if self.data.internal_ram_auto_increment {
                    self.data.internal_ram_address =
                        (self.data.internal_ram_address + 1) & 0x7F;
                }
                value
            }
            0x5000..=0x57FF => (self.data.irq_counter & 0x00FF) as u8,
            0x5800..=0x5FFF => {
                ((self.data.irq_counter >> 8) as u8 & 0x7F)
                    | (u8::from(self.data.irq_enabled) << 7)
            }
            _ => self.map_cpu_address(address).read(&self.cartridge).unwrap_or(cpu_open_bus),
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match address {
            0x4800..=0x4FFF => {
                let index = usize::from(self.data.internal_ram_address & 0x7F);
                self.data.internal_ram[index] = value;
                if self.data.has_battery {
                    self.data.internal_ram_dirty = true;
                }
                if self.data.internal_ram_auto_increment {
                    self.data.internal_ram_address =
                        (self.data.internal_ram_address + 1) & 0x7F;
                }
            }
            0x5000..=0x57FF => {
                self.data.irq_counter =
                    (self.data.irq_counter & 0x7F00) | u16::from(value);
                self.data.irq_flag = false;
            }
            0x5800..=0x5FFF => {
                self.data.irq_counter =
                    (self.data.irq_counter & 0x00FF) | (u16::from(value & 0x7F) << 8);
                self.data.irq_enabled = value.bit(7);
                self.data.irq_flag = false;
            }
            0x8000..=0x9FFF => {
                self.data.chr_banks[usize::from((address - 0x8000) >> 11)] = value;
            }
            0xA000..=0xBFFF => {
                self.data.chr_banks[4 + usize::from((address - 0xA000) >> 11)] = value;
            }
            0xC000..=0xDFFF => {
                self.data.nametable_banks[usize::from((address - 0xC000) >> 11)] = value;
            }
            0xE000..=0xE7FF => {
                self.data.prg_banks[0] = value & 0x3F;
            }
            0xE800..=0xEFFF => {
                self.data.prg_banks[1] = value & 0x3F;
                self.data.chr_ram_low_disabled = value.bit(6);
                self.data.chr_ram_high_disabled = value.bit(7);
            }
            0xF000..=0xF7FF => {
                self.data.prg_banks[2] = value & 0x3F;
            }
            0xF800..=0xFFFF => {
                // Sound RAM address port; bit 7 is auto-increment. Also the write-protect
                // register for the battery boards.
                self.data.internal_ram_address = value & 0x7F;
                self.data.internal_ram_auto_increment = value.bit(7);
                self.data.ram_write_protect = value;
            }
            _ => {}
        }
    }

    /// The 15-bit counter increments every CPU cycle while enabled and raises the IRQ when it
    /// reaches $7FFF.
    pub(crate) fn tick_cpu(&mut self) {
        if self.data.irq_enabled && self.data.irq_counter < 0x7FFF {
            self.data.irq_counter += 1;
            if self.data.irq_counter == 0x7FFF {
                self.data.irq_flag = true;
            }
        }
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        self.data.irq_flag
    }

    pub(crate) fn internal_ram_bytes(&self) -> Option<&[u8]> {
        self.data.has_battery.then_some(self.data.internal_ram.as_slice())
    }

    pub(crate) fn get_and_clear_internal_ram_dirty(&mut self) -> bool {
        std::mem::take(&mut self.data.internal_ram_dirty)
    }
}

impl HasBasicPpuMapping for MapperImpl<Namco163> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x0FFF => {
                let bank = self.data.chr_banks[usize::from(address >> 10)];
                self.data.chr_map(bank, address, self.data.chr_ram_low_disabled)
            }
            0x1000..=0x1FFF => {
                let bank = self.data.chr_banks[usize::from(address >> 10)];
                self.data.chr_map(bank, address, self.data.chr_ram_high_disabled)
            }
            0x2000..=0x3EFF => {
                // Nametables are bank-selected like CHR; banks >= $E0 hit CIRAM
                let bank = self.data.nametable_banks[usize::from((address >> 10) & 0x03)];
                self.data.chr_map(bank, address, false)
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::cartridge::Cartridge;

    fn test_mapper() -> MapperImpl<Namco163> {
        MapperImpl {
            cartridge: Cartridge::for_tests(vec![0; 256 * 1024], vec![0; 256 * 1024]),
            data: Namco163::new(ChrType::ROM, true, None),
        }
    }

    #[test]
    fn irq_fires_at_counter_top() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0x5000, 0xFD);
        mapper.write_cpu_address(0x5800, 0xFF);

        mapper.tick_cpu();
        assert!(!mapper.interrupt_flag());
        mapper.tick_cpu();
        assert!(mapper.interrupt_flag());
    }

    #[test]
    fn internal_ram_auto_increments() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0xF800, 0x80);
        mapper.write_cpu_address(0x4800, 0x11);
        mapper.write_cpu_address(0x4800, 0x22);

        mapper.write_cpu_address(0xF800, 0x00);
        assert_eq!(mapper.read_cpu_address(0x4800, 0), 0x11);
        assert!(mapper.get_and_clear_internal_ram_dirty());
    }

    #[test]
    fn nametable_banks_above_e0_select_ciram() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0xC000, 0xE1);
        match mapper.map_ppu_address(0x2000) {
            PpuMapResult::Vram(address) => assert_eq!(address & 0x0400, 0x0400),
            other => panic!("expected VRAM mapping, got {other:?}"),
        }
    }
}
