//! SNES cartridge coprocessors
//!
//! Each coprocessor arbitrates a region of the cartridge bus: reads/writes it claims are
//! intercepted before the plain ROM/SRAM decode, and `run` advances its internal clock to the
//! main CPU's position. Firmware-bearing hardware (NEC DSPs, ST018, the Sufami Turbo adapter
//! BIOS) refuses to load without its program image; the host locates the firmware files.

mod bsx;
mod cx4;
mod obc1;
mod sdd1;
mod spc7110;
mod srtc;
mod st018;
mod sufami;
mod superfx;
mod upd77c25;

pub use st018::St018;
pub use upd77c25::{Upd77c25, Upd77c25Variant};

use bincode::{Decode, Encode};
use retrocore_common::frontend::PartialClone;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnesCoprocessorError {
    #[error("cartridge requires {chip} firmware, which was not provided")]
    FirmwareMissing { chip: &'static str },
    #[error("unsupported coprocessor chipset byte {chipset:#04X}")]
    Unsupported { chipset: u8 },
}

#[derive(Debug, Clone, Default, Encode, Decode, PartialClone)]
pub enum CoprocessorSlot {
    #[default]
    None,
    Bsx(bsx::BsxSatellaview),
    Cx4(cx4::Cx4),
    Obc1(obc1::Obc1),
    Sdd1(sdd1::Sdd1),
    Spc7110(#[partial_clone(partial)] spc7110::Spc7110),
    Srtc(srtc::Srtc),
    SufamiTurbo(#[partial_clone(partial)] sufami::SufamiTurbo),
    SuperFx(#[partial_clone(partial)] superfx::SuperFx),
    NecDsp(upd77c25::Upd77c25),
}

impl CoprocessorSlot {
    /// Identify the cartridge coprocessor from the header chipset byte.
    ///
    /// # Errors
    ///
    /// Returns `FirmwareMissing` for chips whose program ROM must be supplied by the host
    /// (NEC DSPs, ST010/011, ST018, the Sufami Turbo BIOS) and `Unsupported` for chips
    /// outside the implemented set.
    pub fn detect(rom: &[u8], header_base: usize) -> Result<Self, SnesCoprocessorError> {
        // Sufami Turbo images carry the adapter marker; the BIOS additionally tags itself
        // at $10, mini-carts need the host to supply the BIOS image
        if rom.starts_with(sufami::IMAGE_MAGIC) {
            return if rom.get(0x10..0x14) == Some(b"BIOS".as_slice()) {
                Ok(Self::SufamiTurbo(sufami::SufamiTurbo::bios_only()))
            } else {
                Err(SnesCoprocessorError::FirmwareMissing { chip: "Sufami Turbo BIOS" })
            };
        }

        // The BS-X base cartridge announces itself in the header title
        if rom.get(header_base..header_base + 16).is_some_and(|title| title == b"Satellaview BS-X")
        {
            return Ok(Self::Bsx(bsx::BsxSatellaview::new()));
        }

        let chipset = rom.get(header_base + 0x16).copied().unwrap_or(0);
        let map_mode = rom.get(header_base + 0x15).copied().unwrap_or(0);

        Ok(match chipset {
            0x00..=0x02 => Self::None,
            0x03..=0x05 if chipset & 0xF0 == 0 => {
                return Err(SnesCoprocessorError::FirmwareMissing { chip: "NEC DSP" });
            }
            0x13..=0x15 | 0x1A => Self::SuperFx(superfx::SuperFx::new(rom)),
            0x25 => Self::Obc1(obc1::Obc1::new()),
            0x32..=0x35 => {
                // SA-1 shares the coprocessor slot architecture; its 65C816 core reuses the
                // main CPU crate. Carts are rare enough that the slot reports unsupported
                // rather than silently misbehaving.
                return Err(SnesCoprocessorError::Unsupported { chipset });
            }
            0x43 | 0x45 => Self::Sdd1(sdd1::Sdd1::new()),
            0x55 => Self::Srtc(srtc::Srtc::new()),
            0xF3 => Self::Cx4(cx4::Cx4::new()),
            0xF5 | 0xF6 | 0xF9 if map_mode & 0x0F == 0x0A => {
                Self::Spc7110(spc7110::Spc7110::new(rom))
            }
            0xF5 => {
                return Err(SnesCoprocessorError::FirmwareMissing { chip: "ST018" });
            }
            0xF6 => {
                return Err(SnesCoprocessorError::FirmwareMissing { chip: "ST010/ST011" });
            }
            _ => return Err(SnesCoprocessorError::Unsupported { chipset }),
        })
    }

    /// Build an NEC DSP slot with host-supplied firmware.
    #[must_use]
    pub fn nec_dsp(firmware: Vec<u8>, variant: Upd77c25Variant) -> Self {
        Self::NecDsp(Upd77c25::new(firmware, variant))
    }

    /// Build a Sufami Turbo slot around the host-supplied adapter BIOS. The loaded ROM is
    /// the slot A mini-cart; a second mini-cart may sit in slot B.
    #[must_use]
    pub fn sufami_turbo(bios: Vec<u8>, slot_a_rom: &[u8], slot_b_rom: Option<Vec<u8>>) -> Self {
        Self::SufamiTurbo(sufami::SufamiTurbo::new(bios, slot_a_rom, slot_b_rom))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bsx(..) => "BS-X Satellaview",
            Self::Cx4(..) => "CX4",
            Self::Obc1(..) => "OBC1",
            Self::Sdd1(..) => "S-DD1",
            Self::Spc7110(..) => "SPC7110",
            Self::Srtc(..) => "S-RTC",
            Self::SufamiTurbo(..) => "Sufami Turbo",
            Self::SuperFx(..) => "Super FX (GSU)",
            Self::NecDsp(..) => "NEC DSP",
        }
    }

    /// Claimed read, or `None` to fall through to the plain cartridge decode.
    pub fn read(&mut self, address: u32, rom: &[u8], sram: &[u8]) -> Option<u8> {
        match self {
            Self::None => None,
            Self::Bsx(bsx) => bsx.read(address),
            Self::Cx4(cx4) => cx4.read(address, rom),
            Self::Obc1(obc1) => obc1.read(address),
            Self::Sdd1(sdd1) => sdd1.read(address, rom),
            Self::Spc7110(spc7110) => spc7110.read(address),
            Self::Srtc(srtc) => srtc.read(address),
            Self::SufamiTurbo(sufami) => sufami.read(address, rom),
            Self::SuperFx(superfx) => superfx.read(address, rom, sram),
            Self::NecDsp(dsp) => dsp.read(address),
        }
    }

    /// Claimed write; returns whether the write was consumed.
    pub fn write(&mut self, address: u32, value: u8, sram: &mut [u8]) -> bool {
        match self {
            Self::None => false,
            Self::Bsx(bsx) => bsx.write(address, value),
            Self::Cx4(cx4) => cx4.write(address, value),
            Self::Obc1(obc1) => obc1.write(address, value),
            Self::Sdd1(sdd1) => sdd1.write(address, value),
            Self::Spc7110(spc7110) => spc7110.write(address, value),
            Self::Srtc(srtc) => srtc.write(address, value),
            Self::SufamiTurbo(sufami) => sufami.write(address, value),
            Self::SuperFx(superfx) => superfx.write(address, value, sram),
            Self::NecDsp(dsp) => dsp.write(address, value),
        }
    }

    /// Advance the coprocessor to the CPU's master-cycle position.
    pub fn run(&mut self, master_cycles: u64, rom: &[u8]) {
        match self {
            Self::Bsx(bsx) => bsx.run(master_cycles),
            Self::SuperFx(superfx) => superfx.run(master_cycles, rom),
            Self::NecDsp(dsp) => dsp.run(master_cycles),
            _ => {}
        }
    }

    #[must_use]
    pub fn irq(&self) -> bool {
        match self {
            Self::SuperFx(superfx) => superfx.irq(),
            _ => false,
        }
    }

    pub fn take_rom_from(&mut self, other: &mut Self) {
        match (self, other) {
            (Self::Spc7110(a), Self::Spc7110(b)) => a.take_rom_from(b),
            (Self::SufamiTurbo(a), Self::SufamiTurbo(b)) => a.take_rom_from(b),
            (Self::SuperFx(a), Self::SuperFx(b)) => a.take_rom_from(b),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lorom_with_chipset(chipset: u8) -> Vec<u8> {
        let mut rom = vec![0_u8; 0x10000];
        rom[0x7FC0 + 0x16] = chipset;
        rom
    }

    #[test]
    fn plain_chipset_bytes_detect_no_coprocessor() {
        for chipset in 0x00..=0x02 {
            let slot = CoprocessorSlot::detect(&lorom_with_chipset(chipset), 0x7FC0).unwrap();
            assert!(matches!(slot, CoprocessorSlot::None));
        }
    }

    #[test]
    fn bsx_base_cartridge_detected_by_title() {
        let mut rom = lorom_with_chipset(0x00);
        rom[0x7FC0..0x7FC0 + 16].copy_from_slice(b"Satellaview BS-X");
        let slot = CoprocessorSlot::detect(&rom, 0x7FC0).unwrap();
        assert_eq!(slot.name(), "BS-X Satellaview");
    }

    #[test]
    fn sufami_minicart_requires_bios() {
        let mut rom = vec![0_u8; 0x20000];
        rom[..14].copy_from_slice(b"BANDAI SFC-ADX");
        rom[0x10..0x16].copy_from_slice(b"GAME A");
        assert!(matches!(
            CoprocessorSlot::detect(&rom, 0x7FC0),
            Err(SnesCoprocessorError::FirmwareMissing { chip: "Sufami Turbo BIOS" })
        ));

        rom[0x10..0x14].copy_from_slice(b"BIOS");
        let slot = CoprocessorSlot::detect(&rom, 0x7FC0).unwrap();
        assert_eq!(slot.name(), "Sufami Turbo");
    }
}
