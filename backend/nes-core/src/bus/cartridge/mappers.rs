//! Mapper building blocks and the simple discrete-logic boards

pub(crate) mod bandai;
pub(crate) mod jaleco;
pub(crate) mod mmc1;
pub(crate) mod mmc2;
pub(crate) mod mmc3;
pub(crate) mod mmc5;
pub(crate) mod namco163;
pub(crate) mod sunsoft;
pub(crate) mod vrc;

use crate::bus::cartridge::{Cartridge, HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum ChrType {
    ROM,
    RAM,
}

impl ChrType {
    pub(crate) fn to_map_result(self, address: u32) -> PpuMapResult {
        match self {
            Self::ROM => PpuMapResult::ChrROM(address),
            Self::RAM => PpuMapResult::ChrRAM(address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum NametableMirroring {
    Horizontal,
    Vertical,
    SingleScreenBank0,
    SingleScreenBank1,
}

impl NametableMirroring {
    pub(crate) fn map_to_vram(self, address: u16) -> u16 {
        debug_assert!((0x2000..=0x3EFF).contains(&address));

        let relative_addr = address & 0x0FFF;
        match self {
            Self::Horizontal => ((relative_addr & 0x0800) >> 1) | (relative_addr & 0x03FF),
            Self::Vertical => relative_addr & 0x07FF,
            Self::SingleScreenBank0 => relative_addr & 0x03FF,
            Self::SingleScreenBank1 => 0x0400 | (relative_addr & 0x03FF),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CpuMapResult {
    PrgROM(u32),
    PrgRAM(u32),
    None,
}

impl CpuMapResult {
    pub(crate) fn read(self, cartridge: &Cartridge) -> Option<u8> {
        match self {
            Self::PrgROM(address) => Some(cartridge.get_prg_rom(address)),
            Self::PrgRAM(address) => Some(cartridge.get_prg_ram(address)),
            Self::None => None,
        }
    }

    pub(crate) fn write(self, value: u8, cartridge: &mut Cartridge) {
        if let Self::PrgRAM(address) = self {
            cartridge.set_prg_ram(address, value);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PpuMapResult {
    ChrROM(u32),
    ChrRAM(u32),
    Vram(u16),
}

impl PpuMapResult {
    pub(crate) fn read(self, cartridge: &Cartridge, vram: &[u8; 2048]) -> u8 {
        match self {
            Self::ChrROM(address) => cartridge.get_chr_rom(address),
            Self::ChrRAM(address) => cartridge.get_chr_ram(address),
            Self::Vram(address) => vram[address as usize],
        }
    }

    pub(crate) fn write(self, value: u8, cartridge: &mut Cartridge, vram: &mut [u8; 2048]) {
        match self {
            Self::ChrROM(_) => {}
            Self::ChrRAM(address) => cartridge.set_chr_ram(address, value),
            Self::Vram(address) => vram[address as usize] = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum BankSizeKb {
    One,
    Two,
    Four,
    Eight,
    Sixteen,
    ThirtyTwo,
}

impl BankSizeKb {
    fn shift(self) -> u32 {
        match self {
            Self::One => 10,
            Self::Two => 11,
            Self::Four => 12,
            Self::Eight => 13,
            Self::Sixteen => 14,
            Self::ThirtyTwo => 15,
        }
    }

    fn address_mask(self) -> u16 {
        (1 << self.shift()) - 1
    }

    pub(crate) fn to_absolute_address<N: Into<u32>>(self, bank_number: N, address: u16) -> u32 {
        (bank_number.into() << self.shift()) | u32::from(address & self.address_mask())
    }

    pub(crate) fn to_absolute_address_from_end<N: Into<u32>>(
        self,
        inverse_bank_number: N,
        memory_len: u32,
        address: u16,
    ) -> u32 {
        (((memory_len >> self.shift()) - inverse_bank_number.into()) << self.shift())
            | u32::from(address & self.address_mask())
    }

    pub(crate) fn to_absolute_address_last_bank(self, memory_len: u32, address: u16) -> u32 {
        self.to_absolute_address_from_end(1_u32, memory_len, address)
    }
}

// NROM (mapper 0) ---------------------------------------------------------------------------

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Nrom {
    chr_type: ChrType,
    nametable_mirroring: NametableMirroring,
}

impl Nrom {
    pub(crate) fn new(chr_type: ChrType, nametable_mirroring: NametableMirroring) -> Self {
        Self { chr_type, nametable_mirroring }
    }
}

impl MapperImpl<Nrom> {
    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x5FFF => cpu_open_bus,
            0x6000..=0x7FFF => self.cartridge.get_prg_ram(u32::from(address & 0x1FFF)),
            0x8000..=0xFFFF => {
                self.cartridge.get_prg_rom(u32::from(address & 0x7FFF))
            }
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        if let 0x6000..=0x7FFF = address {
            self.cartridge.set_prg_ram(u32::from(address & 0x1FFF), value);
        }
    }
}

impl HasBasicPpuMapping for MapperImpl<Nrom> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => self.data.chr_type.to_map_result(address.into()),
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}

// UxROM (mappers 2 and 71) ------------------------------------------------------------------

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Uxrom {
    prg_bank: u8,
    chr_type: ChrType,
    nametable_mirroring: NametableMirroring,
}

impl Uxrom {
    pub(crate) fn new(chr_type: ChrType, nametable_mirroring: NametableMirroring) -> Self {
        Self { prg_bank: 0, chr_type, nametable_mirroring }
    }
}

impl MapperImpl<Uxrom> {
    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x7FFF => cpu_open_bus,
            0x8000..=0xBFFF => self
                .cartridge
                .get_prg_rom(BankSizeKb::Sixteen.to_absolute_address(self.data.prg_bank, address)),
            0xC000..=0xFFFF => self.cartridge.get_prg_rom(
                BankSizeKb::Sixteen
                    .to_absolute_address_last_bank(self.cartridge.prg_rom_len(), address),
            ),
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            self.data.prg_bank = value;
        }
    }
}

impl HasBasicPpuMapping for MapperImpl<Uxrom> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => self.data.chr_type.to_map_result(address.into()),
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}

// CNROM (mapper 3) --------------------------------------------------------------------------

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Cnrom {
    chr_bank: u8,
    chr_type: ChrType,
    nametable_mirroring: NametableMirroring,
}

impl Cnrom {
    pub(crate) fn new(chr_type: ChrType, nametable_mirroring: NametableMirroring) -> Self {
        Self { chr_bank: 0, chr_type, nametable_mirroring }
    }
}

impl MapperImpl<Cnrom> {
    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x7FFF => cpu_open_bus,
            0x8000..=0xFFFF => {
                self.cartridge.get_prg_rom(u32::from(address & 0x7FFF))
            }
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            // Bus conflict: the written value is ANDed with the ROM byte at that address
            let rom_value = self.cartridge.get_prg_rom(u32::from(address & 0x7FFF));
            self.data.chr_bank = value & rom_value;
        }
    }
}

impl HasBasicPpuMapping for MapperImpl<Cnrom> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => self
                .data
                .chr_type
                .to_map_result(BankSizeKb::Eight.to_absolute_address(self.data.chr_bank, address)),
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}

// AxROM (mapper 7) --------------------------------------------------------------------------

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Axrom {
    prg_bank: u8,
    chr_type: ChrType,
    nametable_mirroring: NametableMirroring,
}

impl Axrom {
    pub(crate) fn new(chr_type: ChrType) -> Self {
        Self { prg_bank: 0, chr_type, nametable_mirroring: NametableMirroring::SingleScreenBank0 }
    }
}

impl MapperImpl<Axrom> {
    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x7FFF => cpu_open_bus,
            0x8000..=0xFFFF => self
                .cartridge
                .get_prg_rom(BankSizeKb::ThirtyTwo.to_absolute_address(self.data.prg_bank, address)),
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            self.data.prg_bank = value & 0x07;
            self.data.nametable_mirroring = if value.bit(4) {
                NametableMirroring::SingleScreenBank1
            } else {
                NametableMirroring::SingleScreenBank0
            };
        }
    }
}

impl HasBasicPpuMapping for MapperImpl<Axrom> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => self.data.chr_type.to_map_result(address.into()),
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}

// GxROM / Color Dreams (mappers 66 and 11) --------------------------------------------------

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Gxrom {
    prg_bank: u8,
    chr_bank: u8,
    /// Mapper 11 swaps the bank fields relative to mapper 66
    color_dreams: bool,
    nametable_mirroring: NametableMirroring,
}

impl Gxrom {
    pub(crate) fn new(mapper_number: u16, nametable_mirroring: NametableMirroring) -> Self {
        Self { prg_bank: 0, chr_bank: 0, color_dreams: mapper_number == 11, nametable_mirroring }
    }
}

impl MapperImpl<Gxrom> {
    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x7FFF => cpu_open_bus,
            0x8000..=0xFFFF => self
                .cartridge
                .get_prg_rom(BankSizeKb::ThirtyTwo.to_absolute_address(self.data.prg_bank, address)),
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            if self.data.color_dreams {
                self.data.prg_bank = value & 0x03;
                self.data.chr_bank = value >> 4;
            } else {
                self.data.chr_bank = value & 0x03;
                self.data.prg_bank = (value >> 4) & 0x03;
            }
        }
    }
}

impl HasBasicPpuMapping for MapperImpl<Gxrom> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => PpuMapResult::ChrROM(
                BankSizeKb::Eight.to_absolute_address(self.data.chr_bank, address),
            ),
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}
