//! MMC3 (mapper 4): command/data bank switching and the A12-clocked scanline IRQ counter

use crate::bus::cartridge::mappers::{
    BankSizeKb, ChrType, CpuMapResult, NametableMirroring, PpuMapResult,
};
use crate::bus::cartridge::{HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum PrgMode {
    /// $8000 switchable, $C000 fixed to second-to-last bank
    Mode0,
    /// $8000 fixed to second-to-last bank, $C000 switchable
    Mode1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum ChrMode {
    /// 2KB banks at $0000, 1KB banks at $1000
    Mode0,
    /// 1KB banks at $0000, 2KB banks at $1000
    Mode1,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Mmc3 {
    chr_type: ChrType,
    bank_select: u8,
    prg_mode: PrgMode,
    chr_mode: ChrMode,
    bank_registers: [u8; 8],
    nametable_mirroring: NametableMirroring,
    four_screen_vram: bool,
    ram_enabled: bool,
    ram_write_protect: bool,
    irq_counter: u8,
    irq_reload_value: u8,
    irq_reload_pending: bool,
    irq_enabled: bool,
    irq_flag: bool,
    last_a12: bool,
    a12_low_cycles: u32,
}

impl Mmc3 {
    pub(crate) fn new(
        chr_type: ChrType,
        nametable_mirroring: NametableMirroring,
        four_screen_vram: bool,
    ) -> Self {
        Self {
            chr_type,
            bank_select: 0,
            prg_mode: PrgMode::Mode0,
            chr_mode: ChrMode::Mode0,
            bank_registers: [0; 8],
            nametable_mirroring,
            four_screen_vram,
            ram_enabled: true,
            ram_write_protect: false,
            irq_counter: 0,
            irq_reload_value: 0,
            irq_reload_pending: false,
            irq_enabled: false,
            irq_flag: false,
            last_a12: false,
            a12_low_cycles: 0,
        }
    }

    fn clock_irq_counter(&mut self) {
        if self.irq_counter == 0 || self.irq_reload_pending {
            self.irq_counter = self.irq_reload_value;
            self.irq_reload_pending = false;
        } else {
            self.irq_counter -= 1;
        }

        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_flag = true;
        }
    }

    fn map_chr_address(&self, address: u16) -> u32 {
        let (bank, size) = match (self.chr_mode, address) {
            (ChrMode::Mode0, 0x0000..=0x07FF) => (self.bank_registers[0] & !1, BankSizeKb::Two),
            (ChrMode::Mode0, 0x0800..=0x0FFF) => (self.bank_registers[1] & !1, BankSizeKb::Two),
            (ChrMode::Mode0, 0x1000..=0x13FF) => (self.bank_registers[2], BankSizeKb::One),
            (ChrMode::Mode0, 0x1400..=0x17FF) => (self.bank_registers[3], BankSizeKb::One),
            (ChrMode::Mode0, 0x1800..=0x1BFF) => (self.bank_registers[4], BankSizeKb::One),
            (ChrMode::Mode0, 0x1C00..=0x1FFF) => (self.bank_registers[5], BankSizeKb::One),
            (ChrMode::Mode1, 0x0000..=0x03FF) => (self.bank_registers[2], BankSizeKb::One),
            (ChrMode::Mode1, 0x0400..=0x07FF) => (self.bank_registers[3], BankSizeKb::One),
            (ChrMode::Mode1, 0x0800..=0x0BFF) => (self.bank_registers[4], BankSizeKb::One),
            (ChrMode::Mode1, 0x0C00..=0x0FFF) => (self.bank_registers[5], BankSizeKb::One),
            (ChrMode::Mode1, 0x1000..=0x17FF) => (self.bank_registers[0] & !1, BankSizeKb::Two),
            (ChrMode::Mode1, 0x1800..=0x1FFF) => (self.bank_registers[1] & !1, BankSizeKb::Two),
            _ => unreachable!("only pattern table addresses are CHR"),
        };
        // Two-KB banks are addressed in 1KB units
        match size {
            BankSizeKb::Two => BankSizeKb::One.to_absolute_address(bank, address & 0x07FF)
                | (u32::from(address) & 0x0400),
            _ => size.to_absolute_address(bank, address),
        }
    }
}

impl MapperImpl<Mmc3> {
    fn map_cpu_address(&self, address: u16) -> CpuMapResult {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x5FFF => CpuMapResult::None,
            0x6000..=0x7FFF => {
                if self.data.ram_enabled && !self.cartridge.prg_ram_is_empty() {
                    CpuMapResult::PrgRAM(u32::from(address & 0x1FFF))
                } else {
                    CpuMapResult::None
                }
            }
            0x8000..=0x9FFF => match self.data.prg_mode {
                PrgMode::Mode0 => CpuMapResult::PrgROM(
                    BankSizeKb::Eight.to_absolute_address(self.data.bank_registers[6], address),
                ),
                PrgMode::Mode1 => CpuMapResult::PrgROM(
                    BankSizeKb::Eight
                        .to_absolute_address_from_end(2_u32, self.cartridge.prg_rom_len(), address),
                ),
            },
            0xA000..=0xBFFF => CpuMapResult::PrgROM(
                BankSizeKb::Eight.to_absolute_address(self.data.bank_registers[7], address),
            ),
            0xC000..=0xDFFF => match self.data.prg_mode {
                PrgMode::Mode0 => CpuMapResult::PrgROM(
                    BankSizeKb::Eight
                        .to_absolute_address_from_end(2_u32, self.cartridge.prg_rom_len(), address),
                ),
                PrgMode::Mode1 => CpuMapResult::PrgROM(
                    BankSizeKb::Eight.to_absolute_address(self.data.bank_registers[6], address),
                ),
            },
            0xE000..=0xFFFF => CpuMapResult::PrgROM(
                BankSizeKb::Eight
                    .to_absolute_address_last_bank(self.cartridge.prg_rom_len(), address),
            ),
        }
    }

    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        self.map_cpu_address(address).read(&self.cartridge).unwrap_or(cpu_open_bus)
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match address {
            0x4020..=0x5FFF => {}
            0x6000..=0x7FFF => {
                if self.data.ram_enabled && !self.data.ram_write_protect {
                    self.map_cpu_address(address).write(value, &mut self.cartridge);
                }
            }
            0x8000..=0x9FFF => {
                if !address.bit(0) {
                    self.data.bank_select = value & 0x07;
                    self.data.prg_mode = if value.bit(6) { PrgMode::Mode1 } else { PrgMode::Mode0 };
                    self.data.chr_mode = if value.bit(7) { ChrMode::Mode1 } else { ChrMode::Mode0 };
                } else {
                    self.data.bank_registers[self.data.bank_select as usize] = value;
                }
            }
            0xA000..=0xBFFF => {
                if !address.bit(0) {
                    if !self.data.four_screen_vram {
                        self.data.nametable_mirroring = if value.bit(0) {
                            NametableMirroring::Horizontal
                        } else {
                            NametableMirroring::Vertical
                        };
                    }
                } else {
                    self.data.ram_write_protect = value.bit(6);
                    self.data.ram_enabled = value.bit(7);
                }
            }
            0xC000..=0xDFFF => {
                if !address.bit(0) {
                    self.data.irq_reload_value = value;
                } else {
                    self.data.irq_reload_pending = true;
                }
            }
            0xE000..=0xFFFF => {
                if !address.bit(0) {
                    self.data.irq_enabled = false;
                    self.data.irq_flag = false;
                } else {
                    self.data.irq_enabled = true;
                }
            }
            _ => unreachable!("bus routes only cartridge addresses here"),
        }
    }

    /// Watch PPU address bus A12. The IRQ counter clocks on a rising edge after A12 has been
    /// low for long enough to be a real scanline-boundary transition rather than fetch noise.
    pub(crate) fn tick(&mut self, ppu_bus_address: u16) {
        let a12 = ppu_bus_address.bit(12);
        if a12 {
            if !self.data.last_a12 && self.data.a12_low_cycles >= 10 {
                self.data.clock_irq_counter();
            }
            self.data.a12_low_cycles = 0;
        } else {
            self.data.a12_low_cycles = self.data.a12_low_cycles.saturating_add(1);
        }
        self.data.last_a12 = a12;
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        self.data.irq_flag
    }
}

impl HasBasicPpuMapping for MapperImpl<Mmc3> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => {
                self.data.chr_type.to_map_result(self.data.map_chr_address(address))
            }
            0x2000..=0x3EFF => {
                if self.data.four_screen_vram {
                    // Four-screen boards supply their own nametable RAM; mapped into CHR RAM
                    // past the pattern area
                    PpuMapResult::ChrRAM(0x2000 + u32::from(address & 0x0FFF))
                } else {
                    PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
                }
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::cartridge::Cartridge;

    fn test_mapper() -> MapperImpl<Mmc3> {
        MapperImpl {
            cartridge: Cartridge::for_tests(vec![0; 128 * 1024], vec![0; 8 * 1024]),
            data: Mmc3::new(ChrType::ROM, NametableMirroring::Vertical, false),
        }
    }

    fn rising_edge(mapper: &mut MapperImpl<Mmc3>) {
        // Hold A12 low long enough to count as a filtered edge, then raise it
        for _ in 0..16 {
            mapper.tick(0x0000);
        }
        mapper.tick(0x1000);
    }

    #[test]
    fn irq_counts_down_and_asserts() {
        let mut mapper = test_mapper();
        // Reload value 3, reload, enable
        mapper.write_cpu_address(0xC000, 3);
        mapper.write_cpu_address(0xC001, 0);
        mapper.write_cpu_address(0xE001, 0);

        // First edge reloads to 3; counter reaches 0 on the 4th edge
        for _ in 0..3 {
            rising_edge(&mut mapper);
            assert!(!mapper.interrupt_flag());
        }
        rising_edge(&mut mapper);
        assert!(mapper.interrupt_flag());
    }

    #[test]
    fn irq_disable_acknowledges() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0xC000, 0);
        mapper.write_cpu_address(0xC001, 0);
        mapper.write_cpu_address(0xE001, 0);

        rising_edge(&mut mapper);
        rising_edge(&mut mapper);
        assert!(mapper.interrupt_flag());

        mapper.write_cpu_address(0xE000, 0);
        assert!(!mapper.interrupt_flag());
    }

    #[test]
    fn rapid_a12_toggles_are_filtered() {
        let mut mapper = test_mapper();
        mapper.write_cpu_address(0xC000, 1);
        mapper.write_cpu_address(0xC001, 0);
        mapper.write_cpu_address(0xE001, 0);

        // Consecutive fetch-pattern toggles with short low periods must not clock the counter
        for _ in 0..32 {
            mapper.tick(0x1000);
            mapper.tick(0x0000);
        }
        assert!(!mapper.interrupt_flag());
    }
}
