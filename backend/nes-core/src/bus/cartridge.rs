//! Cartridge memories, iNES / NES 2.0 header parsing, and the mapper dispatch enum

pub(crate) mod mappers;

use crate::bus::cartridge::mappers::bandai::BandaiFcg;
use crate::bus::cartridge::mappers::jaleco::Jaleco;
use crate::bus::cartridge::mappers::mmc1::Mmc1;
use crate::bus::cartridge::mappers::mmc2::Mmc2;
use crate::bus::cartridge::mappers::mmc3::Mmc3;
use crate::bus::cartridge::mappers::mmc5::Mmc5;
use crate::bus::cartridge::mappers::namco163::Namco163;
use crate::bus::cartridge::mappers::sunsoft::Sunsoft;
use crate::bus::cartridge::mappers::vrc::{Vrc4, Vrc6};
use crate::bus::cartridge::mappers::{Axrom, ChrType, Cnrom, Gxrom, NametableMirroring, Nrom, PpuMapResult, Uxrom};
use bincode::{Decode, Encode};
use retrocore_common::frontend::{PartialClone, TimingMode};
use retrocore_common::num::GetBit;
use retrocore_proc_macros::MatchEachVariantMacro;
use std::mem;
use thiserror::Error;

#[derive(Debug, Clone, PartialClone)]
pub(crate) struct Cartridge {
    pub(crate) timing_mode: TimingMode,
    #[partial_clone(default)]
    prg_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    has_ram_battery: bool,
    prg_ram_dirty_bit: bool,
    #[partial_clone(default)]
    chr_rom: Vec<u8>,
    chr_ram: Vec<u8>,
}

// Encode/Decode are implemented by hand so that ROM bytes stay out of save states
impl Encode for Cartridge {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> Result<(), bincode::error::EncodeError> {
        self.timing_mode.encode(encoder)?;
        self.prg_ram.encode(encoder)?;
        self.has_ram_battery.encode(encoder)?;
        self.prg_ram_dirty_bit.encode(encoder)?;
        self.chr_ram.encode(encoder)?;
        Ok(())
    }
}

impl<Context> Decode<Context> for Cartridge {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        Ok(Self {
            timing_mode: Decode::decode(decoder)?,
            prg_rom: vec![],
            prg_ram: Decode::decode(decoder)?,
            has_ram_battery: Decode::decode(decoder)?,
            prg_ram_dirty_bit: Decode::decode(decoder)?,
            chr_rom: vec![],
            chr_ram: Decode::decode(decoder)?,
        })
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for Cartridge {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        <Self as Decode<Context>>::decode(decoder)
    }
}

impl Cartridge {
    pub(crate) fn get_prg_rom(&self, address: u32) -> u8 {
        self.prg_rom[(address as usize) & (self.prg_rom.len() - 1)]
    }

    pub(crate) fn prg_rom_len(&self) -> u32 {
        self.prg_rom.len() as u32
    }

    pub(crate) fn prg_ram_is_empty(&self) -> bool {
        self.prg_ram.is_empty()
    }

    pub(crate) fn get_prg_ram(&self, address: u32) -> u8 {
        if self.prg_ram.is_empty() {
            0xFF
        } else {
            self.prg_ram[(address as usize) & (self.prg_ram.len() - 1)]
        }
    }

    pub(crate) fn set_prg_ram(&mut self, address: u32, value: u8) {
        if !self.prg_ram.is_empty() {
            let len = self.prg_ram.len();
            self.prg_ram[(address as usize) & (len - 1)] = value;
            if self.has_ram_battery {
                self.prg_ram_dirty_bit = true;
            }
        }
    }

    pub(crate) fn get_chr_rom(&self, address: u32) -> u8 {
        self.chr_rom[(address as usize) & (self.chr_rom.len() - 1)]
    }

    pub(crate) fn get_chr_ram(&self, address: u32) -> u8 {
        self.chr_ram[(address as usize) & (self.chr_ram.len() - 1)]
    }

    pub(crate) fn set_chr_ram(&mut self, address: u32, value: u8) {
        let len = self.chr_ram.len();
        self.chr_ram[(address as usize) & (len - 1)] = value;
    }

    fn move_rom_from(&mut self, other: &mut Self) {
        self.prg_rom = mem::take(&mut other.prg_rom);
        self.chr_rom = mem::take(&mut other.chr_rom);
    }

    pub(crate) fn from_parts(
        timing_mode: TimingMode,
        prg_rom: Vec<u8>,
        prg_ram: Vec<u8>,
        chr_ram: Vec<u8>,
    ) -> Self {
        Self {
            timing_mode,
            prg_rom,
            prg_ram,
            has_ram_battery: false,
            prg_ram_dirty_bit: false,
            chr_rom: vec![],
            chr_ram,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(prg_rom: Vec<u8>, chr_rom: Vec<u8>) -> Self {
        Self {
            timing_mode: TimingMode::Ntsc,
            prg_rom,
            prg_ram: vec![0; 8 * 1024],
            has_ram_battery: false,
            prg_ram_dirty_bit: false,
            chr_rom,
            chr_ram: vec![0; 8 * 1024],
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct MapperImpl<MapperData> {
    pub(crate) cartridge: Cartridge,
    pub(crate) data: MapperData,
}

impl<MapperData: Clone> PartialClone for MapperImpl<MapperData> {
    fn partial_clone(&self) -> Self {
        Self { cartridge: self.cartridge.partial_clone(), data: self.data.clone() }
    }
}

pub(crate) trait HasBasicPpuMapping {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult;
}

impl<MapperData> MapperImpl<MapperData>
where
    MapperImpl<MapperData>: HasBasicPpuMapping,
{
    fn read_ppu_address(&self, address: u16, vram: &[u8; 2048]) -> u8 {
        self.map_ppu_address(address).read(&self.cartridge, vram)
    }

    fn write_ppu_address(&mut self, address: u16, value: u8, vram: &mut [u8; 2048]) {
        self.map_ppu_address(address).write(value, &mut self.cartridge, vram);
    }
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, Encode, Decode, PartialClone, MatchEachVariantMacro)]
pub(crate) enum Mapper {
    Axrom(#[partial_clone(partial)] MapperImpl<Axrom>),
    BandaiFcg(#[partial_clone(partial)] MapperImpl<BandaiFcg>),
    Cnrom(#[partial_clone(partial)] MapperImpl<Cnrom>),
    Gxrom(#[partial_clone(partial)] MapperImpl<Gxrom>),
    Jaleco(#[partial_clone(partial)] MapperImpl<Jaleco>),
    Mmc1(#[partial_clone(partial)] MapperImpl<Mmc1>),
    Mmc2(#[partial_clone(partial)] MapperImpl<Mmc2>),
    Mmc3(#[partial_clone(partial)] MapperImpl<Mmc3>),
    Mmc5(#[partial_clone(partial)] MapperImpl<Mmc5>),
    Namco163(#[partial_clone(partial)] MapperImpl<Namco163>),
    Nrom(#[partial_clone(partial)] MapperImpl<Nrom>),
    Nsf(#[partial_clone(partial)] MapperImpl<crate::nsf::NsfRom>),
    Sunsoft(#[partial_clone(partial)] MapperImpl<Sunsoft>),
    Uxrom(#[partial_clone(partial)] MapperImpl<Uxrom>),
    Vrc4(#[partial_clone(partial)] MapperImpl<Vrc4>),
    Vrc6(#[partial_clone(partial)] MapperImpl<Vrc6>),
}

impl Mapper {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Axrom(..) => "AxROM",
            Self::BandaiFcg(..) => "Bandai FCG",
            Self::Cnrom(..) => "CNROM",
            Self::Gxrom(..) => "GxROM / Color Dreams",
            Self::Jaleco(..) => "Jaleco SS88006",
            Self::Mmc1(..) => "MMC1",
            Self::Mmc2(..) => "MMC2 / MMC4",
            Self::Mmc3(..) => "MMC3",
            Self::Mmc5(..) => "MMC5",
            Self::Namco163(..) => "Namco 163",
            Self::Nrom(..) => "NROM",
            Self::Nsf(..) => "NSF player",
            Self::Sunsoft(..) => "Sunsoft FME-7",
            Self::Uxrom(..) => "UxROM",
            Self::Vrc4(..) => "VRC2 / VRC4",
            Self::Vrc6(..) => "VRC6",
        }
    }

    pub(crate) fn read_cpu_address(&mut self, address: u16, cpu_open_bus: u8) -> u8 {
        match_each_variant!(self, mapper => mapper.read_cpu_address(address, cpu_open_bus))
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match_each_variant!(self, mapper => mapper.write_cpu_address(address, value));
    }

    pub(crate) fn read_ppu_address(&mut self, address: u16, vram: &[u8; 2048]) -> u8 {
        let value = match_each_variant!(&*self, mapper => mapper.read_ppu_address(address, vram));
        if let Self::Mmc2(mmc2) = self {
            mmc2.process_ppu_fetch(address);
        }
        value
    }

    pub(crate) fn write_ppu_address(&mut self, address: u16, value: u8, vram: &mut [u8; 2048]) {
        match_each_variant!(self, mapper => mapper.write_ppu_address(address, value, vram));
    }

    /// Called after every PPU cycle with the current PPU address bus value.
    pub(crate) fn tick(&mut self, ppu_bus_address: u16) {
        match self {
            Self::Mmc3(mmc3) => mmc3.tick(ppu_bus_address),
            Self::Mmc5(mmc5) => mmc5.tick(ppu_bus_address),
            _ => {}
        }
    }

    /// MMC5's scanline counter leaves the in-frame state when rendering stops.
    pub(crate) fn notify_vblank(&mut self) {
        if let Self::Mmc5(mmc5) = self {
            mmc5.notify_vblank();
        }
    }

    /// Nametable reads that bypass the plain VRAM mapping (MMC5 ExRAM / fill modes).
    pub(crate) fn read_nametable_override(&self, address: u16) -> Option<u8> {
        match self {
            Self::Mmc5(mmc5) => mmc5.read_nametable_override(address),
            _ => None,
        }
    }

    /// Called after every CPU cycle; drives mapper IRQ counters and expansion audio.
    pub(crate) fn tick_cpu(&mut self) {
        match self {
            Self::BandaiFcg(bandai) => bandai.tick_cpu(),
            Self::Jaleco(jaleco) => jaleco.tick_cpu(),
            Self::Mmc1(mmc1) => mmc1.tick_cpu(),
            Self::Namco163(namco163) => namco163.tick_cpu(),
            Self::Sunsoft(sunsoft) => sunsoft.tick_cpu(),
            Self::Vrc4(vrc4) => vrc4.tick_cpu(),
            Self::Vrc6(vrc6) => vrc6.tick_cpu(),
            _ => {}
        }
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        match self {
            Self::BandaiFcg(bandai) => bandai.interrupt_flag(),
            Self::Jaleco(jaleco) => jaleco.interrupt_flag(),
            Self::Mmc3(mmc3) => mmc3.interrupt_flag(),
            Self::Mmc5(mmc5) => mmc5.interrupt_flag(),
            Self::Namco163(namco163) => namco163.interrupt_flag(),
            Self::Sunsoft(sunsoft) => sunsoft.interrupt_flag(),
            Self::Vrc4(vrc4) => vrc4.interrupt_flag(),
            Self::Vrc6(vrc6) => vrc6.interrupt_flag(),
            _ => false,
        }
    }

    pub(crate) fn get_and_clear_ram_dirty_bit(&mut self) -> bool {
        match self {
            Self::BandaiFcg(bandai) => {
                if bandai.get_and_clear_eeprom_dirty() {
                    return true;
                }
            }
            Self::Namco163(namco163) => {
                if namco163.get_and_clear_internal_ram_dirty() {
                    return true;
                }
            }
            _ => {}
        }

        match_each_variant!(self, mapper => {
            let dirty_bit = mapper.cartridge.prg_ram_dirty_bit;
            mapper.cartridge.prg_ram_dirty_bit = false;
            dirty_bit
        })
    }

    pub(crate) fn get_prg_ram(&self) -> &[u8] {
        match self {
            Self::BandaiFcg(bandai) => {
                if let Some(eeprom) = bandai.eeprom_bytes() {
                    return eeprom;
                }
            }
            Self::Namco163(namco163) => {
                if let Some(internal_ram) = namco163.internal_ram_bytes() {
                    return internal_ram;
                }
            }
            _ => {}
        }

        match_each_variant!(self, mapper => &mapper.cartridge.prg_ram)
    }

    pub(crate) fn timing_mode(&self) -> TimingMode {
        match_each_variant!(self, mapper => mapper.cartridge.timing_mode)
    }

    pub(crate) fn sample_audio(&self, mixed_apu_sample: f64) -> f64 {
        match self {
            Self::Vrc6(vrc6) => vrc6.sample_audio(mixed_apu_sample),
            _ => mixed_apu_sample,
        }
    }

    pub(crate) fn move_rom_from(&mut self, other: &mut Self) {
        let other_cartridge = match_each_variant!(other, mapper => &mut mapper.cartridge);
        match_each_variant!(self, mapper => mapper.cartridge.move_rom_from(other_cartridge));
    }
}

#[derive(Debug, Error)]
pub enum CartridgeFileError {
    #[error("invalid or unsupported file format")]
    Format,
    #[error("unsupported mapper: {mapper_number}")]
    UnsupportedMapper { mapper_number: u16 },
    #[error(
        "invalid PRG/CHR ROM size in header: file is {file_size} bytes, PRG ROM {prg_rom_size} bytes, CHR ROM {chr_rom_size} bytes"
    )]
    InvalidRomSize { file_size: u32, prg_rom_size: u32, chr_rom_size: u32 },
    #[error("unsupported timing mode byte: {byte}")]
    UnsupportedTimingMode { byte: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    INes,
    Nes2Point0,
}

#[derive(Debug, Clone)]
pub struct INesHeader {
    pub mapper_number: u16,
    pub sub_mapper_number: u8,
    pub timing_mode: TimingMode,
    pub prg_rom_size: u32,
    pub prg_ram_size: u32,
    pub chr_rom_size: u32,
    pub chr_ram_size: u32,
    pub has_trainer: bool,
    pub has_battery: bool,
    pub has_four_screen_vram: bool,
    pub nametable_vertical_mirroring: bool,
}

impl INesHeader {
    /// Parse a 16-byte iNES / NES 2.0 header.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic bytes are missing or the declared sizes exceed the file.
    pub fn parse(file_bytes: &[u8]) -> Result<Self, CartridgeFileError> {
        if file_bytes.len() < 16 || file_bytes[..4] != [b'N', b'E', b'S', 0x1A] {
            return Err(CartridgeFileError::Format);
        }
        let header = &file_bytes[..16];

        let format =
            if header[7] & 0x0C == 0x08 { FileFormat::Nes2Point0 } else { FileFormat::INes };
        let has_trainer = header[6].bit(2);
        let mapper_number = u16::from((header[7] & 0xF0) | ((header[6] & 0xF0) >> 4));

        let chr_rom_size = {
            let mut chr_rom_size_8kb = u32::from(header[5]);
            if format == FileFormat::Nes2Point0 {
                chr_rom_size_8kb |= u32::from(header[9] & 0xF0) << 4;
            }
            8 * 1024 * chr_rom_size_8kb
        };

        let prg_rom_size = {
            let mut prg_rom_size_16kb = u32::from(header[4]);
            if format == FileFormat::Nes2Point0 {
                prg_rom_size_16kb |= u32::from(header[9] & 0x0F) << 8;
            }
            16 * 1024 * prg_rom_size_16kb
        };

        if 16 + (prg_rom_size + chr_rom_size) as usize > file_bytes.len() {
            return Err(CartridgeFileError::InvalidRomSize {
                file_size: file_bytes.len() as u32,
                prg_rom_size,
                chr_rom_size,
            });
        }

        let timing_mode = match format {
            FileFormat::Nes2Point0 => match header[12] & 0x03 {
                0x00 | 0x02 => TimingMode::Ntsc,
                0x01 => TimingMode::Pal,
                byte => return Err(CartridgeFileError::UnsupportedTimingMode { byte }),
            },
            FileFormat::INes => {
                if header[9].bit(0) {
                    TimingMode::Pal
                } else {
                    TimingMode::Ntsc
                }
            }
        };

        let sub_mapper_number = match format {
            FileFormat::Nes2Point0 => header[8] >> 4,
            FileFormat::INes => 0,
        };

        let prg_ram_size = match format {
            FileFormat::Nes2Point0 => {
                let volatile_shift = header[10] & 0x0F;
                let non_volatile_shift = header[10] >> 4;
                let volatile = if volatile_shift > 0 { 64_u32 << volatile_shift } else { 0 };
                let non_volatile =
                    if non_volatile_shift > 0 { 64_u32 << non_volatile_shift } else { 0 };
                let total = volatile + non_volatile;
                if total == 0 { 8 * 1024 } else { total }
            }
            FileFormat::INes => 8 * 1024,
        };

        let chr_ram_size = if chr_rom_size == 0 {
            match format {
                FileFormat::Nes2Point0 => {
                    let shift = header[11] & 0x0F;
                    if shift > 0 { 64 << shift } else { 8 * 1024 }
                }
                FileFormat::INes => 8 * 1024,
            }
        } else {
            0
        };

        Ok(Self {
            mapper_number,
            sub_mapper_number,
            timing_mode,
            prg_rom_size,
            prg_ram_size,
            chr_rom_size,
            chr_ram_size,
            has_trainer,
            has_battery: header[6].bit(1),
            has_four_screen_vram: header[6].bit(3),
            nametable_vertical_mirroring: header[6].bit(0),
        })
    }
}

/// Build a mapper from an iNES file.
///
/// # Errors
///
/// Returns an error for unparseable headers and unsupported mapper numbers.
pub(crate) fn from_ines_file(
    file_bytes: &[u8],
    sav_bytes: Option<Vec<u8>>,
    forced_timing_mode: Option<TimingMode>,
) -> Result<Mapper, CartridgeFileError> {
    let header = INesHeader::parse(file_bytes)?;

    let prg_rom_start = if header.has_trainer { 16 + 512 } else { 16 };
    let prg_rom_end = prg_rom_start + header.prg_rom_size as usize;
    let chr_rom_end = prg_rom_end + header.chr_rom_size as usize;

    let prg_rom = Vec::from(&file_bytes[prg_rom_start..prg_rom_end]);
    let chr_rom = Vec::from(&file_bytes[prg_rom_end..chr_rom_end]);

    let prg_ram = match &sav_bytes {
        Some(sav_bytes) if sav_bytes.len() == header.prg_ram_size as usize => sav_bytes.clone(),
        _ => vec![0xFF; header.prg_ram_size as usize],
    };

    let timing_mode = forced_timing_mode.unwrap_or(header.timing_mode);

    let chr_type = if header.chr_rom_size == 0 { ChrType::RAM } else { ChrType::ROM };
    let nametable_mirroring = if header.nametable_vertical_mirroring {
        NametableMirroring::Vertical
    } else {
        NametableMirroring::Horizontal
    };

    // Four-screen boards get extra CHR RAM to stand in for the extra nametable memory
    let chr_ram_size =
        header.chr_ram_size + if header.has_four_screen_vram { 4 * 1024 } else { 0 };

    let cartridge = Cartridge {
        timing_mode,
        prg_rom,
        prg_ram,
        has_ram_battery: header.has_battery,
        prg_ram_dirty_bit: false,
        chr_rom,
        chr_ram: vec![0; chr_ram_size.max(if header.has_four_screen_vram { 0x3000 } else { 0 }) as usize],
    };

    let mapper = match header.mapper_number {
        0 => Mapper::Nrom(MapperImpl {
            cartridge,
            data: Nrom::new(chr_type, nametable_mirroring),
        }),
        1 => Mapper::Mmc1(MapperImpl { cartridge, data: Mmc1::new(chr_type) }),
        2 | 71 => Mapper::Uxrom(MapperImpl {
            cartridge,
            data: Uxrom::new(chr_type, nametable_mirroring),
        }),
        3 => Mapper::Cnrom(MapperImpl {
            cartridge,
            data: Cnrom::new(chr_type, nametable_mirroring),
        }),
        4 => Mapper::Mmc3(MapperImpl {
            cartridge,
            data: Mmc3::new(chr_type, nametable_mirroring, header.has_four_screen_vram),
        }),
        5 => Mapper::Mmc5(MapperImpl { cartridge, data: Mmc5::new(chr_type) }),
        7 => Mapper::Axrom(MapperImpl { cartridge, data: Axrom::new(chr_type) }),
        9 => Mapper::Mmc2(MapperImpl { cartridge, data: Mmc2::new_mmc2(chr_type) }),
        10 => Mapper::Mmc2(MapperImpl { cartridge, data: Mmc2::new_mmc4(chr_type) }),
        11 | 66 => Mapper::Gxrom(MapperImpl {
            cartridge,
            data: Gxrom::new(header.mapper_number, nametable_mirroring),
        }),
        16 | 153 | 159 => Mapper::BandaiFcg(MapperImpl {
            cartridge,
            data: BandaiFcg::new(header.mapper_number, chr_type, sav_bytes.as_deref()),
        }),
        18 => Mapper::Jaleco(MapperImpl { cartridge, data: Jaleco::new(chr_type) }),
        19 => Mapper::Namco163(MapperImpl {
            cartridge,
            data: Namco163::new(chr_type, header.has_battery, sav_bytes.as_deref()),
        }),
        21 | 22 | 23 | 25 => Mapper::Vrc4(MapperImpl {
            cartridge,
            data: Vrc4::new(header.mapper_number, chr_type),
        }),
        24 | 26 => Mapper::Vrc6(MapperImpl {
            cartridge,
            data: Vrc6::new(header.mapper_number, chr_type),
        }),
        69 => Mapper::Sunsoft(MapperImpl { cartridge, data: Sunsoft::new(chr_type) }),
        _ => {
            return Err(CartridgeFileError::UnsupportedMapper {
                mapper_number: header.mapper_number,
            });
        }
    };

    log::info!("Mapper number: {} ({})", header.mapper_number, mapper.name());
    log::info!("PRG ROM size: {} bytes", header.prg_rom_size);
    log::info!("CHR ROM size: {} bytes", header.chr_rom_size);
    log::info!("Battery-backed PRG RAM: {}", header.has_battery);
    log::info!("Timing mode: {timing_mode:?}");

    Ok(mapper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ines_file(mapper: u16, prg_banks: u8, chr_banks: u8) -> Vec<u8> {
        let mut file = vec![0_u8; 16];
        file[0..4].copy_from_slice(&[b'N', b'E', b'S', 0x1A]);
        file[4] = prg_banks;
        file[5] = chr_banks;
        file[6] = ((mapper & 0x0F) << 4) as u8;
        file[7] = (mapper & 0xF0) as u8;
        file.resize(16 + 16 * 1024 * prg_banks as usize + 8 * 1024 * chr_banks as usize, 0);
        file
    }

    #[test]
    fn parses_ines_header() {
        let file = ines_file(4, 8, 8);
        let header = INesHeader::parse(&file).unwrap();
        assert_eq!(header.mapper_number, 4);
        assert_eq!(header.prg_rom_size, 128 * 1024);
        assert_eq!(header.chr_rom_size, 64 * 1024);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(INesHeader::parse(b"NOPE"), Err(CartridgeFileError::Format)));
    }

    #[test]
    fn rejects_unsupported_mapper() {
        let file = ines_file(250, 1, 1);
        assert!(matches!(
            from_ines_file(&file, None, None),
            Err(CartridgeFileError::UnsupportedMapper { mapper_number: 250 })
        ));
    }

    #[test]
    fn bank_switching_outside_window_preserves_other_entries() {
        // UxROM: switching the $8000 bank must not affect the fixed $C000 bank
        let mut file = ines_file(2, 4, 0);
        // Mark each 16KB bank with its index
        for bank in 0..4 {
            file[16 + bank * 16 * 1024] = bank as u8 + 1;
        }
        let mut mapper = from_ines_file(&file, None, None).unwrap();

        let fixed_before = mapper.read_cpu_address(0xC000, 0);
        mapper.write_cpu_address(0x8000, 2);
        assert_eq!(mapper.read_cpu_address(0x8000, 0), 3);
        assert_eq!(mapper.read_cpu_address(0xC000, 0), fixed_before);
    }
}
