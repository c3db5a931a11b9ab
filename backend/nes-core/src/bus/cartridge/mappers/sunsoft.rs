//! Sunsoft FME-7 / 5A / 5B (mapper 69): command-port banking with a CPU-cycle IRQ counter

use crate::bus::cartridge::mappers::{
    BankSizeKb, ChrType, CpuMapResult, NametableMirroring, PpuMapResult,
};
use crate::bus::cartridge::{HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Sunsoft {
    chr_type: ChrType,
    command: u8,
    chr_banks: [u8; 8],
    prg_banks: [u8; 4],
    prg_bank_0_is_ram: bool,
    ram_enabled: bool,
    nametable_mirroring: NametableMirroring,
    irq_enabled: bool,
    irq_counter_enabled: bool,
    irq_counter: u16,
    irq_flag: bool,
}

impl Sunsoft {
    pub(crate) fn new(chr_type: ChrType) -> Self {
        Self {
            chr_type,
            command: 0,
            chr_banks: [0; 8],
            prg_banks: [0; 4],
            prg_bank_0_is_ram: false,
            ram_enabled: false,
            nametable_mirroring: NametableMirroring::Vertical,
            irq_enabled: false,
            irq_counter_enabled: false,
            irq_counter: 0,
            irq_flag: false,
        }
    }
}

impl MapperImpl<Sunsoft> {
    fn map_cpu_address(&self, address: u16) -> CpuMapResult {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x5FFF => CpuMapResult::None,
            0x6000..=0x7FFF => {
                if self.data.prg_bank_0_is_ram {
                    if self.data.ram_enabled && !self.cartridge.prg_ram_is_empty() {
                        CpuMapResult::PrgRAM(
                            BankSizeKb::Eight.to_absolute_address(self.data.prg_banks[0], address),
                        )
                    } else {
                        CpuMapResult::None
                    }
                } else {
                    CpuMapResult::PrgROM(
                        BankSizeKb::Eight.to_absolute_address(self.data.prg_banks[0], address),
                    )
                }
            }
            0x8000..=0xDFFF => {
                let slot = usize::from((address - 0x8000) >> 13) + 1;
                CpuMapResult::PrgROM(
                    BankSizeKb::Eight.to_absolute_address(self.data.prg_banks[slot], address),
                )
            }
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
            0x6000..=0x7FFF => {
                self.map_cpu_address(address).write(value, &mut self.cartridge);
            }
            0x8000..=0x9FFF => {
                self.data.command = value & 0x0F;
            }
            0xA000..=0xBFFF => match self.data.command {
                0x0..=0x7 => {
                    self.data.chr_banks[self.data.command as usize] = value;
                }
                0x8 => {
                    self.data.prg_banks[0] = value & 0x3F;
                    self.data.prg_bank_0_is_ram = value.bit(6);
                    self.data.ram_enabled = value.bit(7);
                }
                0x9..=0xB => {
                    self.data.prg_banks[(self.data.command - 0x8) as usize] = value & 0x3F;
                }
                0xC => {
                    self.data.nametable_mirroring = match value & 0x03 {
                        0x00 => NametableMirroring::Vertical,
                        0x01 => NametableMirroring::Horizontal,
                        0x02 => NametableMirroring::SingleScreenBank0,
                        0x03 => NametableMirroring::SingleScreenBank1,
                        _ => unreachable!("value & 0x03 is always <= 0x03"),
                    };
                }
                0xD => {
                    self.data.irq_enabled = value.bit(0);
                    self.data.irq_counter_enabled = value.bit(7);
                    self.data.irq_flag = false;
                }
                0xE => {
                    self.data.irq_counter = (self.data.irq_counter & 0xFF00) | u16::from(value);
                }
                0xF => {
                    self.data.irq_counter =
                        (self.data.irq_counter & 0x00FF) | (u16::from(value) << 8);
                }
                _ => unreachable!("command is masked to 4 bits"),
            },
            _ => {}
        }
    }

    pub(crate) fn tick_cpu(&mut self) {
        if self.data.irq_counter_enabled {
            self.data.irq_counter = self.data.irq_counter.wrapping_sub(1);
            if self.data.irq_counter == 0xFFFF && self.data.irq_enabled {
                self.data.irq_flag = true;
            }
        }
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        self.data.irq_flag
    }
}

impl HasBasicPpuMapping for MapperImpl<Sunsoft> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => {
                let bank = self.data.chr_banks[(address >> 10) as usize];
                self.data
                    .chr_type
                    .to_map_result(BankSizeKb::One.to_absolute_address(bank, address))
            }
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}
