//! MMC1 (mapper 1): serial shift-register bank switching

use crate::bus::cartridge::mappers::{
    BankSizeKb, ChrType, CpuMapResult, NametableMirroring, PpuMapResult,
};
use crate::bus::cartridge::{HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum PrgBankingMode {
    Switch32Kb,
    Switch16KbFirstBankFixed,
    Switch16KbLastBankFixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum ChrBankingMode {
    Single8KbBank,
    Two4KbBanks,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Mmc1 {
    chr_type: ChrType,
    shift_register: u8,
    shift_register_len: u8,
    written_this_cycle: bool,
    written_last_cycle: bool,
    nametable_mirroring: NametableMirroring,
    prg_banking_mode: PrgBankingMode,
    chr_banking_mode: ChrBankingMode,
    chr_bank_0: u8,
    chr_bank_1: u8,
    prg_bank: u8,
    ram_enabled: bool,
}

impl Mmc1 {
    pub(crate) fn new(chr_type: ChrType) -> Self {
        Self {
            chr_type,
            shift_register: 0,
            shift_register_len: 0,
            written_this_cycle: false,
            written_last_cycle: false,
            nametable_mirroring: NametableMirroring::SingleScreenBank0,
            prg_banking_mode: PrgBankingMode::Switch16KbLastBankFixed,
            chr_banking_mode: ChrBankingMode::Single8KbBank,
            chr_bank_0: 0,
            chr_bank_1: 0,
            prg_bank: 0,
            ram_enabled: true,
        }
    }

    fn map_ppu_chr_address(&self, address: u16) -> u32 {
        match self.chr_banking_mode {
            ChrBankingMode::Single8KbBank => {
                BankSizeKb::Eight.to_absolute_address(self.chr_bank_0 >> 1, address)
            }
            ChrBankingMode::Two4KbBanks => match address {
                0x0000..=0x0FFF => BankSizeKb::Four.to_absolute_address(self.chr_bank_0, address),
                0x1000..=0x1FFF => BankSizeKb::Four.to_absolute_address(self.chr_bank_1, address),
                _ => unreachable!("only pattern table addresses are CHR"),
            },
        }
    }
}

impl MapperImpl<Mmc1> {
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
            0x8000..=0xFFFF => match self.data.prg_banking_mode {
                PrgBankingMode::Switch32Kb => CpuMapResult::PrgROM(
                    BankSizeKb::ThirtyTwo.to_absolute_address(self.data.prg_bank >> 1, address),
                ),
                PrgBankingMode::Switch16KbFirstBankFixed => match address {
                    0x8000..=0xBFFF => CpuMapResult::PrgROM(u32::from(address & 0x3FFF)),
                    0xC000..=0xFFFF => CpuMapResult::PrgROM(
                        BankSizeKb::Sixteen.to_absolute_address(self.data.prg_bank, address),
                    ),
                    _ => unreachable!("nested match arm"),
                },
                PrgBankingMode::Switch16KbLastBankFixed => match address {
                    0x8000..=0xBFFF => CpuMapResult::PrgROM(
                        BankSizeKb::Sixteen.to_absolute_address(self.data.prg_bank, address),
                    ),
                    0xC000..=0xFFFF => CpuMapResult::PrgROM(
                        BankSizeKb::Sixteen
                            .to_absolute_address_last_bank(self.cartridge.prg_rom_len(), address),
                    ),
                    _ => unreachable!("nested match arm"),
                },
            },
        }
    }

    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        self.map_cpu_address(address).read(&self.cartridge).unwrap_or(cpu_open_bus)
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match address {
            0x4020..=0x5FFF => {}
            0x6000..=0x7FFF => {
                self.map_cpu_address(address).write(value, &mut self.cartridge);
            }
            0x8000..=0xFFFF => {
                // Consecutive-cycle writes are ignored (an RMW instruction's double write
                // only clocks the shift register once)
                if self.data.written_last_cycle {
                    return;
                }
                self.data.written_this_cycle = true;

                if value.bit(7) {
                    self.data.shift_register = 0;
                    self.data.shift_register_len = 0;
                    self.data.prg_banking_mode = PrgBankingMode::Switch16KbLastBankFixed;
                    return;
                }

                self.data.shift_register =
                    (self.data.shift_register >> 1) | (u8::from(value.bit(0)) << 4);
                self.data.shift_register_len += 1;

                if self.data.shift_register_len == 5 {
                    let shift_register = self.data.shift_register;
                    self.data.shift_register = 0;
                    self.data.shift_register_len = 0;

                    match address {
                        0x8000..=0x9FFF => {
                            self.data.nametable_mirroring = match shift_register & 0x03 {
                                0x00 => NametableMirroring::SingleScreenBank0,
                                0x01 => NametableMirroring::SingleScreenBank1,
                                0x02 => NametableMirroring::Vertical,
                                0x03 => NametableMirroring::Horizontal,
                                _ => unreachable!("value & 0x03 is always <= 0x03"),
                            };
                            self.data.prg_banking_mode = match (shift_register >> 2) & 0x03 {
                                0x00 | 0x01 => PrgBankingMode::Switch32Kb,
                                0x02 => PrgBankingMode::Switch16KbFirstBankFixed,
                                0x03 => PrgBankingMode::Switch16KbLastBankFixed,
                                _ => unreachable!("value & 0x03 is always <= 0x03"),
                            };
                            self.data.chr_banking_mode = if shift_register.bit(4) {
                                ChrBankingMode::Two4KbBanks
                            } else {
                                ChrBankingMode::Single8KbBank
                            };
                        }
                        0xA000..=0xBFFF => {
                            self.data.chr_bank_0 = shift_register;
                        }
                        0xC000..=0xDFFF => {
                            self.data.chr_bank_1 = shift_register;
                        }
                        0xE000..=0xFFFF => {
                            self.data.prg_bank = shift_register & 0x0F;
                            self.data.ram_enabled = !shift_register.bit(4);
                        }
                        _ => unreachable!("outer match arm is 0x8000..=0xFFFF"),
                    }
                }
            }
            _ => unreachable!("bus routes only cartridge addresses here"),
        }
    }

    pub(crate) fn tick_cpu(&mut self) {
        self.data.written_last_cycle = self.data.written_this_cycle;
        self.data.written_this_cycle = false;
    }
}

impl HasBasicPpuMapping for MapperImpl<Mmc1> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => {
                self.data.chr_type.to_map_result(self.data.map_ppu_chr_address(address))
            }
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}
