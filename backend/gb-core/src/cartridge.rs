//! Game Boy cartridge loading, the GBX footer, and MBC dispatch

mod huc3;
mod mappers;
mod mbc3;
mod mbc7;

use crate::api::GameBoyLoadError;
use bincode::{Decode, Encode};
use cartridge_mappers::{Huc1, M161, Mbc1, Mbc2, Mbc5, Mbc6, Mmm01, Tama5, WisdomTree};
use mappers as cartridge_mappers;
use mbc3::Mbc3;
use mbc7::Mbc7;
use retrocore_common::frontend::{PartialClone, SaveWriter};
use retrocore_proc_macros::{FakeDecode, FakeEncode};
use std::ops::Deref;

pub(crate) use huc3::Huc3;

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
pub(crate) struct Rom(pub(crate) Box<[u8]>);

impl Deref for Rom {
    type Target = Box<[u8]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The 64-byte GBX footer appended by preservation dumps. When present, its explicit mapper
/// id and hardware flags override the standard header bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GbxFooter {
    pub mapper_id: [u8; 4],
    pub has_battery: bool,
    pub has_rumble: bool,
    pub has_rtc: bool,
    pub rom_size: u32,
    pub ram_size: u32,
}

impl GbxFooter {
    const FOOTER_LEN: usize = 64;
    const MAGIC: &'static [u8; 4] = b"GBX!";

    /// Parse the footer from the end of a ROM image, if present.
    #[must_use]
    pub fn parse(rom: &[u8]) -> Option<Self> {
        if rom.len() < Self::FOOTER_LEN {
            return None;
        }
        let footer = &rom[rom.len() - Self::FOOTER_LEN..];
        // Magic lives in the last 16 bytes: "GBX!" + footer size + versions
        if &footer[48..52] != Self::MAGIC {
            return None;
        }

        Some(Self {
            mapper_id: footer[0..4].try_into().expect("slice length 4"),
            has_battery: footer[4] != 0,
            has_rumble: footer[5] != 0,
            has_rtc: footer[6] != 0,
            rom_size: u32::from_be_bytes(footer[8..12].try_into().expect("slice length 4")),
            ram_size: u32::from_be_bytes(footer[12..16].try_into().expect("slice length 4")),
        })
    }

    fn mapper_str(&self) -> &str {
        let end = self.mapper_id.iter().position(|&b| b == 0).unwrap_or(4);
        std::str::from_utf8(&self.mapper_id[..end]).unwrap_or("")
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) enum Mapper {
    None,
    Mbc1(Mbc1),
    Mbc2(Mbc2),
    Mbc3(Mbc3),
    Mbc5(Mbc5),
    Mbc6(Mbc6),
    Mbc7(Mbc7),
    Mmm01(Mmm01),
    Huc1(Huc1),
    Huc3(Huc3),
    M161(M161),
    Tama5(Tama5),
    WisdomTree(WisdomTree),
}

impl Mapper {
    fn mapper_type(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Mbc1(..) => "MBC1",
            Self::Mbc2(..) => "MBC2",
            Self::Mbc3(..) => "MBC3",
            Self::Mbc5(..) => "MBC5",
            Self::Mbc6(..) => "MBC6",
            Self::Mbc7(..) => "MBC7",
            Self::Mmm01(..) => "MMM01",
            Self::Huc1(..) => "HuC1",
            Self::Huc3(..) => "HuC3",
            Self::M161(..) => "M161",
            Self::Tama5(..) => "TAMA5",
            Self::WisdomTree(..) => "Wisdom Tree",
        }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Cartridge {
    #[partial_clone(default)]
    rom: Rom,
    sram: Box<[u8]>,
    mapper: Mapper,
    sram_dirty: bool,
    has_battery: bool,
}

impl Cartridge {
    pub(crate) fn create(
        rom: Box<[u8]>,
        initial_sram: Option<Vec<u8>>,
        rtc_bytes: Option<Vec<u8>>,
    ) -> Result<Self, GameBoyLoadError> {
        let gbx_footer = GbxFooter::parse(&rom);
        if let Some(footer) = &gbx_footer {
            log::info!("GBX footer present; mapper '{}' overrides header", footer.mapper_str());
        }

        // $0149 declares SRAM size
        let sram_len_byte = rom.get(0x0149).copied().unwrap_or(0);
        let sram_len = match &gbx_footer {
            Some(footer) => footer.ram_size as usize,
            None => match sram_len_byte {
                0x00 | 0x01 => 0,
                0x02 => 8 * 1024,
                0x03 => 32 * 1024,
                0x04 => 128 * 1024,
                0x05 => 64 * 1024,
                _ => return Err(GameBoyLoadError::InvalidSramByte(sram_len_byte)),
            },
        };

        let mapper_byte = rom.get(0x0147).copied().unwrap_or(0);
        let rom_len = rom.len() as u32;

        let mapper = if let Some(footer) = &gbx_footer {
            mapper_from_gbx(footer, rom_len, sram_len as u32, rtc_bytes)?
        } else {
            mapper_from_header(mapper_byte, rom_len, sram_len as u32, rtc_bytes, &rom)?
        };

        let has_battery = match &gbx_footer {
            Some(footer) => footer.has_battery,
            None => matches!(
                mapper_byte,
                0x03 | 0x06 | 0x09 | 0x0D | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E | 0x22 | 0xFF
            ),
        };

        log::info!("Mapper: {}", mapper.mapper_type());
        log::info!("SRAM size: {sram_len} bytes, battery: {has_battery}");

        let sram = match initial_sram {
            Some(initial_sram) if initial_sram.len() == sram_len => initial_sram,
            _ => vec![0; sram_len],
        };

        Ok(Self { rom: Rom(rom), sram: sram.into_boxed_slice(), mapper, sram_dirty: false, has_battery })
    }

    pub(crate) fn read_rom(&self, address: u16) -> u8 {
        let rom_addr = match &self.mapper {
            Mapper::None => u32::from(address) & 0x7FFF,
            Mapper::Mbc1(mbc1) => mbc1.map_rom_address(address),
            Mapper::Mbc2(mbc2) => mbc2.map_rom_address(address),
            Mapper::Mbc3(mbc3) => mbc3.map_rom_address(address),
            Mapper::Mbc5(mbc5) => mbc5.map_rom_address(address),
            Mapper::Mbc6(mbc6) => mbc6.map_rom_address(address),
            Mapper::Mbc7(mbc7) => mbc7.map_rom_address(address),
            Mapper::Mmm01(mmm01) => mmm01.map_rom_address(address),
            Mapper::Huc1(huc1) => huc1.map_rom_address(address),
            Mapper::Huc3(huc3) => huc3.map_rom_address(address),
            Mapper::M161(m161) => m161.map_rom_address(address),
            Mapper::Tama5(tama5) => tama5.map_rom_address(address),
            Mapper::WisdomTree(wt) => wt.map_rom_address(address),
        };
        self.rom[(rom_addr as usize) & (self.rom.len() - 1)]
    }

    pub(crate) fn write_rom(&mut self, address: u16, value: u8) {
        match &mut self.mapper {
            Mapper::None => {}
            Mapper::Mbc1(mbc1) => mbc1.write_rom_address(address, value),
            Mapper::Mbc2(mbc2) => mbc2.write_rom_address(address, value),
            Mapper::Mbc3(mbc3) => mbc3.write_rom_address(address, value),
            Mapper::Mbc5(mbc5) => mbc5.write_rom_address(address, value),
            Mapper::Mbc6(mbc6) => mbc6.write_rom_address(address, value),
            Mapper::Mbc7(mbc7) => mbc7.write_rom_address(address, value),
            Mapper::Mmm01(mmm01) => mmm01.write_rom_address(address, value),
            Mapper::Huc1(huc1) => huc1.write_rom_address(address, value),
            Mapper::Huc3(huc3) => huc3.write_rom_address(address, value),
            Mapper::M161(m161) => m161.write_rom_address(address, value),
            Mapper::Tama5(tama5) => tama5.write_rom_address(address, value),
            Mapper::WisdomTree(wt) => wt.write_rom_address(address, value),
        }
    }

    pub(crate) fn read_ram(&self, address: u16) -> u8 {
        match &self.mapper {
            Mapper::None => basic_ram_read(&self.sram, address, true),
            Mapper::Mbc1(mbc1) => mbc1
                .map_ram_address(address)
                .map_or(0xFF, |addr| self.sram[(addr as usize) % self.sram.len().max(1)]),
            Mapper::Mbc2(mbc2) => mbc2.read_ram(address),
            Mapper::Mbc3(mbc3) => mbc3.read_ram(address, &self.sram),
            Mapper::Mbc5(mbc5) => mbc5
                .map_ram_address(address)
                .map_or(0xFF, |addr| self.sram[(addr as usize) % self.sram.len().max(1)]),
            Mapper::Mbc6(mbc6) => mbc6.read_ram(address, &self.sram),
            Mapper::Mbc7(mbc7) => mbc7.read_ram(address),
            Mapper::Mmm01(mmm01) => mmm01
                .map_ram_address(address)
                .map_or(0xFF, |addr| self.sram[(addr as usize) % self.sram.len().max(1)]),
            Mapper::Huc1(huc1) => huc1.read_ram(address, &self.sram),
            Mapper::Huc3(huc3) => huc3.read_ram(address, &self.sram),
            Mapper::M161(..) => 0xFF,
            Mapper::Tama5(tama5) => tama5.read_ram(address),
            Mapper::WisdomTree(..) => 0xFF,
        }
    }

    pub(crate) fn write_ram(&mut self, address: u16, value: u8) {
        let sram = &mut self.sram;
        let mut wrote = false;
        match &mut self.mapper {
            Mapper::None => {
                if !sram.is_empty() {
                    let len = sram.len();
                    sram[(address as usize) & (len - 1)] = value;
                    wrote = true;
                }
            }
            Mapper::Mbc1(mbc1) => {
                if let Some(addr) = mbc1.map_ram_address(address) {
                    if !sram.is_empty() {
                        let len = sram.len();
                        sram[(addr as usize) % len] = value;
                        wrote = true;
                    }
                }
            }
            Mapper::Mbc2(mbc2) => wrote = mbc2.write_ram(address, value),
            Mapper::Mbc3(mbc3) => wrote = mbc3.write_ram(address, value, sram),
            Mapper::Mbc5(mbc5) => {
                if let Some(addr) = mbc5.map_ram_address(address) {
                    if !sram.is_empty() {
                        let len = sram.len();
                        sram[(addr as usize) % len] = value;
                        wrote = true;
                    }
                }
            }
            Mapper::Mbc6(mbc6) => wrote = mbc6.write_ram(address, value, sram),
            Mapper::Mbc7(mbc7) => mbc7.write_ram(address, value),
            Mapper::Mmm01(mmm01) => {
                if let Some(addr) = mmm01.map_ram_address(address) {
                    if !sram.is_empty() {
                        let len = sram.len();
                        sram[(addr as usize) % len] = value;
                        wrote = true;
                    }
                }
            }
            Mapper::Huc1(huc1) => wrote = huc1.write_ram(address, value, sram),
            Mapper::Huc3(huc3) => wrote = huc3.write_ram(address, value, sram),
            Mapper::Tama5(tama5) => tama5.write_ram(address, value),
            Mapper::M161(..) | Mapper::WisdomTree(..) => {}
        }

        if wrote && self.has_battery {
            self.sram_dirty = true;
        }
    }

    /// Advance any RTC hardware from the wall clock.
    pub(crate) fn update_rtc(&mut self) {
        match &mut self.mapper {
            Mapper::Mbc3(mbc3) => mbc3.update_rtc_time(),
            Mapper::Huc3(huc3) => huc3.update_rtc_time(),
            _ => {}
        }
    }

    pub(crate) fn get_and_clear_sram_dirty(&mut self) -> bool {
        std::mem::take(&mut self.sram_dirty)
    }

    pub(crate) fn sram(&self) -> &[u8] {
        &self.sram
    }

    /// Persist battery-backed state: `.sav` (raw SRAM), `.rtc` (registers + timestamp), and
    /// the MBC7 EEPROM image.
    pub(crate) fn persist_battery<S: SaveWriter>(&self, save_writer: &mut S) -> Result<(), S::Err> {
        if !self.sram.is_empty() {
            save_writer.persist_bytes("sav", &self.sram)?;
        }

        match &self.mapper {
            Mapper::Mbc3(mbc3) => {
                if let Some(rtc_bytes) = mbc3.rtc_battery_bytes() {
                    save_writer.persist_bytes("rtc", &rtc_bytes)?;
                }
            }
            Mapper::Mbc7(mbc7) => {
                save_writer.persist_bytes("eeprom", mbc7.eeprom_bytes())?;
            }
            _ => {}
        }

        Ok(())
    }

    pub(crate) fn set_inputs(&mut self, tilt_x: f32, tilt_y: f32) {
        if let Mapper::Mbc7(mbc7) = &mut self.mapper {
            mbc7.set_tilt(tilt_x, tilt_y);
        }
    }

    pub(crate) fn take_rom_from(&mut self, other: &mut Self) {
        self.rom = std::mem::take(&mut other.rom);
    }
}

fn basic_ram_read(sram: &[u8], address: u16, enabled: bool) -> u8 {
    if !enabled || sram.is_empty() {
        return 0xFF;
    }
    sram[(address as usize) & (sram.len() - 1)]
}

fn mapper_from_header(
    mapper_byte: u8,
    rom_len: u32,
    ram_len: u32,
    rtc_bytes: Option<Vec<u8>>,
    rom: &[u8],
) -> Result<Mapper, GameBoyLoadError> {
    Ok(match mapper_byte {
        0x00 | 0x08 | 0x09 => Mapper::None,
        0x01..=0x03 => Mapper::Mbc1(Mbc1::new(rom_len, ram_len, Mbc1::detect_multicart(rom))),
        0x05 | 0x06 => Mapper::Mbc2(Mbc2::new(rom_len, vec![])),
        0x0B..=0x0D => Mapper::Mmm01(Mmm01::new(rom_len, ram_len)),
        0x0F | 0x10 => Mapper::Mbc3(Mbc3::new(rom_len, ram_len, true, rtc_bytes)),
        0x11..=0x13 => Mapper::Mbc3(Mbc3::new(rom_len, ram_len, false, None)),
        0x19..=0x1E => Mapper::Mbc5(Mbc5::new(rom_len, ram_len)),
        0x20 => Mapper::Mbc6(Mbc6::new(rom_len)),
        0x22 => Mapper::Mbc7(Mbc7::new(rom_len, None)),
        0xC0 => Mapper::M161(M161::new()),
        0xFD => Mapper::Tama5(Tama5::new(rom_len)),
        0xFE => Mapper::Huc3(Huc3::new(rom_len, ram_len)),
        0xFF => Mapper::Huc1(Huc1::new(rom_len, ram_len)),
        _ => return Err(GameBoyLoadError::UnsupportedMapperByte(mapper_byte)),
    })
}

fn mapper_from_gbx(
    footer: &GbxFooter,
    rom_len: u32,
    ram_len: u32,
    rtc_bytes: Option<Vec<u8>>,
) -> Result<Mapper, GameBoyLoadError> {
    Ok(match &footer.mapper_id {
        b"ROM\0" => Mapper::None,
        b"MBC1" => Mapper::Mbc1(Mbc1::new(rom_len, ram_len, false)),
        b"MB1M" => Mapper::Mbc1(Mbc1::new(rom_len, ram_len, true)),
        b"MBC2" => Mapper::Mbc2(Mbc2::new(rom_len, vec![])),
        b"MBC3" => {
            Mapper::Mbc3(Mbc3::new(rom_len, ram_len, footer.has_rtc, rtc_bytes))
        }
        b"MBC5" => Mapper::Mbc5(Mbc5::new(rom_len, ram_len)),
        b"MBC6" => Mapper::Mbc6(Mbc6::new(rom_len)),
        b"MBC7" => Mapper::Mbc7(Mbc7::new(rom_len, None)),
        b"MM01" => Mapper::Mmm01(Mmm01::new(rom_len, ram_len)),
        b"HUC1" => Mapper::Huc1(Huc1::new(rom_len, ram_len)),
        b"HUC3" => Mapper::Huc3(Huc3::new(rom_len, ram_len)),
        b"M161" => Mapper::M161(M161::new()),
        b"TAMA" => Mapper::Tama5(Tama5::new(rom_len)),
        b"WISD" => Mapper::WisdomTree(WisdomTree::new(rom_len)),
        other => {
            return Err(GameBoyLoadError::UnsupportedGbxMapper(
                String::from_utf8_lossy(other).into_owned(),
            ));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn rom_with_mapper(mapper_byte: u8, banks: usize) -> Box<[u8]> {
        let mut rom = vec![0_u8; 16 * 1024 * banks];
        rom[0x0147] = mapper_byte;
        rom[0x0149] = 0x03; // 32KB RAM
        // Mark each bank with its index at the bank start
        for bank in 0..banks {
            rom[bank * 16 * 1024] = bank as u8;
        }
        rom.into_boxed_slice()
    }

    #[test]
    fn mbc1_bank_zero_quirk() {
        // 256KB MBC1 ROM: writing 0 to $2000 selects bank 1
        let mut cartridge = Cartridge::create(rom_with_mapper(0x01, 16), None, None).unwrap();
        cartridge.write_rom(0x2000, 0x00);
        assert_eq!(cartridge.read_rom(0x4000), 1);

        cartridge.write_rom(0x2000, 0x05);
        assert_eq!(cartridge.read_rom(0x4000), 5);
    }

    #[test]
    fn mbc2_ram_reads_upper_nibble_set() {
        let mut cartridge = Cartridge::create(rom_with_mapper(0x06, 8), None, None).unwrap();
        // Enable RAM: write with address bit 8 clear
        cartridge.write_rom(0x0000, 0x0A);
        cartridge.write_ram(0xA000, 0x05);
        assert_eq!(cartridge.read_ram(0xA000), 0xF5);
        cartridge.write_ram(0xA001, 0xAB);
        assert_eq!(cartridge.read_ram(0xA001), 0xFB);
    }

    #[test]
    fn mbc5_allows_bank_zero() {
        let mut cartridge = Cartridge::create(rom_with_mapper(0x19, 16), None, None).unwrap();
        cartridge.write_rom(0x2000, 0x00);
        assert_eq!(cartridge.read_rom(0x4000), 0);
        cartridge.write_rom(0x2000, 0x03);
        assert_eq!(cartridge.read_rom(0x4000), 3);
    }

    #[test]
    fn tama5_bank_select_and_ready_handshake() {
        let mut cartridge = Cartridge::create(rom_with_mapper(0xFD, 16), None, None).unwrap();
        // Select register $0A and poll for the ready value
        cartridge.write_ram(0xA001, 0x0A);
        assert_eq!(cartridge.read_ram(0xA000), 0xF1);

        // Bank number arrives as two nibble writes
        cartridge.write_ram(0xA001, 0x00);
        cartridge.write_ram(0xA000, 0x05);
        cartridge.write_ram(0xA001, 0x01);
        cartridge.write_ram(0xA000, 0x00);
        assert_eq!(cartridge.read_rom(0x4000), 5);
    }

    #[test]
    fn ram_disabled_reads_ff() {
        let mut cartridge = Cartridge::create(rom_with_mapper(0x03, 16), None, None).unwrap();
        assert_eq!(cartridge.read_ram(0xA000), 0xFF);
        cartridge.write_rom(0x0000, 0x0A);
        cartridge.write_ram(0xA000, 0x12);
        assert_eq!(cartridge.read_ram(0xA000), 0x12);
        cartridge.write_rom(0x0000, 0x00);
        assert_eq!(cartridge.read_ram(0xA000), 0xFF);
    }

    #[test]
    fn gbx_footer_parses() {
        let mut rom = vec![0_u8; 32 * 1024 + 64];
        let footer_start = rom.len() - 64;
        rom[footer_start..footer_start + 4].copy_from_slice(b"MBC3");
        rom[footer_start + 4] = 1; // battery
        rom[footer_start + 6] = 1; // rtc
        rom[footer_start + 8..footer_start + 12].copy_from_slice(&(32 * 1024_u32).to_be_bytes());
        rom[footer_start + 12..footer_start + 16].copy_from_slice(&(8 * 1024_u32).to_be_bytes());
        rom[footer_start + 48..footer_start + 52].copy_from_slice(b"GBX!");

        let footer = GbxFooter::parse(&rom).unwrap();
        assert_eq!(&footer.mapper_id, b"MBC3");
        assert!(footer.has_battery && footer.has_rtc && !footer.has_rumble);
        assert_eq!(footer.ram_size, 8 * 1024);
    }
}
