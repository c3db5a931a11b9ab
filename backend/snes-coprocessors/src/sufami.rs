//! Sufami Turbo: Bandai's dual mini-cartridge adapter
//!
//! The adapter BIOS owns the low LoROM banks, slot A sits above it at $20-$3F, slot B at
//! $40-$5F, and each slot's save RAM gets a four-bank window. Either the BIOS or a slot A
//! mini-cart can be the loaded image; the remaining pieces come from the host.

use bincode::{Decode, Encode};
use retrocore_common::frontend::PartialClone;
use retrocore_proc_macros::{FakeDecode, FakeEncode};

/// Every Sufami Turbo image (BIOS and mini-carts alike) starts with this marker.
pub(crate) const IMAGE_MAGIC: &[u8] = b"BANDAI SFC-ADX";

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
struct SlotRom(Vec<u8>);

/// Mini-carts have no header RAM-size field; the titles that save are known by their
/// in-ROM markers.
pub(crate) fn save_ram_size(rom: &[u8]) -> usize {
    fn contains(rom: &[u8], marker: &[u8]) -> bool {
        rom.windows(marker.len()).any(|window| window == marker)
    }

    if contains(rom, b"POIPOI.Ver") || contains(rom, b"SDBATTLE ") {
        0x800
    } else if contains(rom, b"SD \xB6\xDE\xDD\xC0\xDE\xD1 GN") {
        // SD Gundam Generation, title in half-width katakana
        0x2000
    } else {
        0
    }
}

fn mirrored_byte(rom: &[u8], address: u32) -> u8 {
    if rom.is_empty() {
        // Empty slot: data lines read pulled high
        return 0xFF;
    }
    rom[(address as usize) % rom.len()]
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct SufamiTurbo {
    /// Empty when the loaded image is the BIOS itself.
    #[partial_clone(default)]
    bios: SlotRom,
    #[partial_clone(default)]
    slot_b_rom: SlotRom,
    slot_a_ram: Vec<u8>,
    slot_b_ram: Vec<u8>,
    bios_is_loaded_image: bool,
}

impl SufamiTurbo {
    /// The adapter with no mini-carts inserted; boots to the BIOS insert-cartridge screen.
    pub(crate) fn bios_only() -> Self {
        Self {
            bios: SlotRom(Vec::new()),
            slot_b_rom: SlotRom(Vec::new()),
            slot_a_ram: Vec::new(),
            slot_b_ram: Vec::new(),
            bios_is_loaded_image: true,
        }
    }

    /// The loaded image is the slot A mini-cart; the BIOS and an optional slot B cart are
    /// supplied by the host.
    pub(crate) fn new(bios: Vec<u8>, slot_a_rom: &[u8], slot_b_rom: Option<Vec<u8>>) -> Self {
        let slot_a_ram = vec![0; save_ram_size(slot_a_rom)];
        let slot_b_ram =
            vec![0; slot_b_rom.as_deref().map_or(0, save_ram_size)];

        Self {
            bios: SlotRom(bios),
            slot_b_rom: SlotRom(slot_b_rom.unwrap_or_default()),
            slot_a_ram,
            slot_b_ram,
            bios_is_loaded_image: false,
        }
    }

    pub(crate) fn take_rom_from(&mut self, other: &mut Self) {
        self.bios = std::mem::take(&mut other.bios);
        self.slot_b_rom = std::mem::take(&mut other.slot_b_rom);
    }

    pub(crate) fn read(&self, address: u32, rom: &[u8]) -> Option<u8> {
        let bank = (address >> 16) as u8 & 0x7F;
        let offset = address as u16;
        if offset < 0x8000 {
            return None;
        }
        let rom_addr = |base_bank: u8| {
            (u32::from(bank - base_bank) << 15) | u32::from(offset & 0x7FFF)
        };

        match bank {
            0x00..=0x1F => {
                let bios = if self.bios_is_loaded_image { rom } else { &self.bios.0 };
                Some(mirrored_byte(bios, rom_addr(0x00)))
            }
            0x20..=0x3F => {
                let slot_a: &[u8] = if self.bios_is_loaded_image { &[] } else { rom };
                Some(mirrored_byte(slot_a, rom_addr(0x20)))
            }
            0x40..=0x5F => Some(mirrored_byte(&self.slot_b_rom.0, rom_addr(0x40))),
            0x60..=0x63 => Some(mirrored_byte(&self.slot_a_ram, rom_addr(0x60))),
            0x70..=0x73 => Some(mirrored_byte(&self.slot_b_ram, rom_addr(0x70))),
            _ => None,
        }
    }

    pub(crate) fn write(&mut self, address: u32, value: u8) -> bool {
        let bank = (address >> 16) as u8 & 0x7F;
        let offset = address as u16;
        if offset < 0x8000 {
            return false;
        }
        let ram_addr = |base_bank: u8| {
            ((u32::from(bank - base_bank) << 15) | u32::from(offset & 0x7FFF)) as usize
        };

        match bank {
            0x60..=0x63 if !self.slot_a_ram.is_empty() => {
                let index = ram_addr(0x60) % self.slot_a_ram.len();
                self.slot_a_ram[index] = value;
                true
            }
            0x70..=0x73 if !self.slot_b_ram.is_empty() => {
                let index = ram_addr(0x70) % self.slot_b_ram.len();
                self.slot_b_ram[index] = value;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minicart(marker: &[u8]) -> Vec<u8> {
        let mut rom = vec![0_u8; 0x20000];
        rom[..IMAGE_MAGIC.len()].copy_from_slice(IMAGE_MAGIC);
        rom[0x100..0x100 + marker.len()].copy_from_slice(marker);
        for (i, byte) in rom.iter_mut().enumerate().skip(0x8000) {
            *byte = (i >> 15) as u8;
        }
        rom
    }

    #[test]
    fn save_ram_size_from_markers() {
        assert_eq!(save_ram_size(&minicart(b"POIPOI.Ver1.0")), 0x800);
        assert_eq!(save_ram_size(&minicart(b"SDBATTLE ")), 0x800);
        assert_eq!(save_ram_size(&minicart(b"SD \xB6\xDE\xDD\xC0\xDE\xD1 GN")), 0x2000);
        assert_eq!(save_ram_size(&minicart(b"NO SAVE")), 0);
    }

    #[test]
    fn bios_and_slots_map_to_their_banks() {
        let bios: Vec<u8> = (0..0x40000_u32).map(|i| (i % 251) as u8).collect();
        let slot_a = minicart(b"GAME A");
        let slot_b = minicart(b"GAME B");
        let st = SufamiTurbo::new(bios.clone(), &slot_a, Some(slot_b.clone()));

        // BIOS at $00-$1F:8000+, 32KB banks
        assert_eq!(st.read(0x008000, &slot_a), Some(bios[0]));
        assert_eq!(st.read(0x018000, &slot_a), Some(bios[0x8000]));
        // Slot A at $20-$3F, slot B at $40-$5F, mirrored into the top banks
        assert_eq!(st.read(0x218000, &slot_a), Some(slot_a[0x8000]));
        assert_eq!(st.read(0xC18000, &slot_a), Some(slot_b[0x8000]));
        // Lower offsets fall through to the system decode
        assert_eq!(st.read(0x001234, &slot_a), None);
    }

    #[test]
    fn slot_a_ram_is_write_claimed() {
        let bios = vec![0_u8; 0x40000];
        let slot_a = minicart(b"POIPOI.Ver1.0");
        let mut st = SufamiTurbo::new(bios, &slot_a, None);

        assert!(st.write(0x608123, 0xAB));
        assert_eq!(st.read(0x608123, &slot_a), Some(0xAB));
        // No slot B cart: its RAM window swallows nothing and reads pulled high
        assert!(!st.write(0x708000, 0x55));
        assert_eq!(st.read(0x708000, &slot_a), Some(0xFF));
    }

    #[test]
    fn bios_only_serves_the_loaded_image() {
        let st = SufamiTurbo::bios_only();
        let bios = minicart(b"BIOS");
        assert_eq!(st.read(0x008000, &bios), Some(bios[0]));
        assert_eq!(st.read(0x018000, &bios), Some(bios[0x8000]));
        // Empty slot A
        assert_eq!(st.read(0x208000, &bios), Some(0xFF));
    }
}
