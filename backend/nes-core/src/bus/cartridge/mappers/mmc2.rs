//! MMC2 / MMC4 (mappers 9 and 10): CHR bank switching latched by pattern fetches

use crate::bus::cartridge::mappers::{
    BankSizeKb, ChrType, CpuMapResult, NametableMirroring, PpuMapResult,
};
use crate::bus::cartridge::{HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum Variant {
    Mmc2,
    Mmc4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum ChrLatch {
    Fd,
    Fe,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Mmc2 {
    variant: Variant,
    chr_type: ChrType,
    prg_bank: u8,
    chr_banks: [[u8; 2]; 2],
    latches: [ChrLatch; 2],
    nametable_mirroring: NametableMirroring,
}

impl Mmc2 {
    pub(crate) fn new_mmc2(chr_type: ChrType) -> Self {
        Self::new(Variant::Mmc2, chr_type)
    }

    pub(crate) fn new_mmc4(chr_type: ChrType) -> Self {
        Self::new(Variant::Mmc4, chr_type)
    }

    fn new(variant: Variant, chr_type: ChrType) -> Self {
        Self {
            variant,
            chr_type,
            prg_bank: 0,
            chr_banks: [[0; 2]; 2],
            latches: [ChrLatch::Fd; 2],
            nametable_mirroring: NametableMirroring::Vertical,
        }
    }
}

impl MapperImpl<Mmc2> {
    fn map_cpu_address(&self, address: u16) -> CpuMapResult {
        match (self.data.variant, address) {
            (_, 0x0000..=0x401F) => unreachable!("bus routes only cartridge addresses here"),
            (_, 0x4020..=0x5FFF) => CpuMapResult::None,
            (Variant::Mmc2, 0x6000..=0x7FFF) => CpuMapResult::None,
            (Variant::Mmc4, 0x6000..=0x7FFF) => {
                CpuMapResult::PrgRAM(u32::from(address & 0x1FFF))
            }
            (Variant::Mmc2, 0x8000..=0x9FFF) => CpuMapResult::PrgROM(
                BankSizeKb::Eight.to_absolute_address(self.data.prg_bank, address),
            ),
            (Variant::Mmc2, 0xA000..=0xFFFF) => CpuMapResult::PrgROM(
                BankSizeKb::Eight
                    .to_absolute_address_from_end(3 - u32::from((address - 0xA000) >> 13), self.cartridge.prg_rom_len(), address),
            ),
            (Variant::Mmc4, 0x8000..=0xBFFF) => CpuMapResult::PrgROM(
                BankSizeKb::Sixteen.to_absolute_address(self.data.prg_bank, address),
            ),
            (Variant::Mmc4, 0xC000..=0xFFFF) => CpuMapResult::PrgROM(
                BankSizeKb::Sixteen
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
            0xA000..=0xAFFF => {
                self.data.prg_bank = value & 0x0F;
            }
            0xB000..=0xBFFF => {
                self.data.chr_banks[0][0] = value & 0x1F;
            }
            0xC000..=0xCFFF => {
                self.data.chr_banks[0][1] = value & 0x1F;
            }
            0xD000..=0xDFFF => {
                self.data.chr_banks[1][0] = value & 0x1F;
            }
            0xE000..=0xEFFF => {
                self.data.chr_banks[1][1] = value & 0x1F;
            }
            0xF000..=0xFFFF => {
                self.data.nametable_mirroring = if value & 1 != 0 {
                    NametableMirroring::Horizontal
                } else {
                    NametableMirroring::Vertical
                };
            }
            _ => {}
        }
    }

    /// Pattern fetches of tiles $FD/$FE flip the CHR latch *after* the fetch completes.
    pub(crate) fn process_ppu_fetch(&mut self, address: u16) {
        match (self.data.variant, address) {
            (Variant::Mmc2, 0x0FD8) => self.data.latches[0] = ChrLatch::Fd,
            (Variant::Mmc2, 0x0FE8) => self.data.latches[0] = ChrLatch::Fe,
            (Variant::Mmc4, 0x0FD8..=0x0FDF) => self.data.latches[0] = ChrLatch::Fd,
            (Variant::Mmc4, 0x0FE8..=0x0FEF) => self.data.latches[0] = ChrLatch::Fe,
            (_, 0x1FD8..=0x1FDF) => self.data.latches[1] = ChrLatch::Fd,
            (_, 0x1FE8..=0x1FEF) => self.data.latches[1] = ChrLatch::Fe,
            _ => {}
        }
    }
}

impl HasBasicPpuMapping for MapperImpl<Mmc2> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => {
                let table = usize::from(address >= 0x1000);
                let latch = match self.data.latches[table] {
                    ChrLatch::Fd => 0,
                    ChrLatch::Fe => 1,
                };
                let bank = self.data.chr_banks[table][latch];
                self.data.chr_type.to_map_result(BankSizeKb::Four.to_absolute_address(bank, address))
            }
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}
