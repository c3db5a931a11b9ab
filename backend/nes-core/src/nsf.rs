//! NSF (NES Sound Format) playback
//!
//! The NSF data is mapped as banked PRG with the $5FF8-$5FFF bank registers, and a tiny
//! driver loop in RAM repeatedly calls the tune's PLAY routine once per frame after running
//! INIT once.

use crate::bus::cartridge::mappers::PpuMapResult;
use crate::bus::cartridge::{Cartridge, HasBasicPpuMapping, Mapper, MapperImpl};
use crate::bus::Bus;
use bincode::{Decode, Encode};
use mos6502_emu::bus::BusInterface;
use mos6502_emu::Mos6502;
use retrocore_common::frontend::TimingMode;
use thiserror::Error;

const HEADER_LEN: usize = 0x80;
/// RAM address of the 3-byte `JMP $07F0` idle loop the player installs.
const IDLE_LOOP_ADDRESS: u16 = 0x07F0;

#[derive(Debug, Error)]
pub enum NsfError {
    #[error("NSF file is too short")]
    Truncated,
    #[error("NSF load address {0:04X} is outside $8000-$FFFF")]
    BadLoadAddress(u16),
}

pub(crate) fn is_nsf(bytes: &[u8]) -> bool {
    bytes.len() >= 5 && &bytes[..5] == b"NESM\x1A"
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct NsfRom {
    /// 4KB bank indices for $8000-$FFFF
    banks: [u8; 8],
    banked: bool,
    load_offset: u16,
}

impl MapperImpl<NsfRom> {
    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x5FFF => cpu_open_bus,
            0x6000..=0x7FFF => self.cartridge.get_prg_ram(u32::from(address & 0x1FFF)),
            0x8000..=0xFFFF => {
                let rom_addr = if self.data.banked {
                    let bank = self.data.banks[((address - 0x8000) >> 12) as usize];
                    (u32::from(bank) << 12) | u32::from(address & 0x0FFF)
                } else {
                    u32::from(address - 0x8000 + self.data.load_offset)
                };
                self.map_or_open_bus(rom_addr, cpu_open_bus)
            }
        }
    }

    fn map_or_open_bus(&self, rom_addr: u32, cpu_open_bus: u8) -> u8 {
        if rom_addr < self.cartridge.prg_rom_len() {
            self.cartridge.get_prg_rom(rom_addr)
        } else {
            cpu_open_bus
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match address {
            0x5FF8..=0x5FFF => {
                self.data.banks[(address - 0x5FF8) as usize] = value;
            }
            0x6000..=0x7FFF => {
                self.cartridge.set_prg_ram(u32::from(address & 0x1FFF), value);
            }
            _ => {}
        }
    }
}

impl HasBasicPpuMapping for MapperImpl<NsfRom> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        // NSF playback never renders; give the PPU CHR RAM so fetches stay harmless
        match address {
            0x0000..=0x1FFF => PpuMapResult::ChrRAM(address.into()),
            _ => PpuMapResult::Vram(address & 0x07FF),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum PlayerPhase {
    RunInit,
    Running,
    Idle,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct NsfPlayer {
    init_address: u16,
    play_address: u16,
    starting_song: u8,
    total_songs: u8,
    current_song: u8,
    pal_mode: bool,
    phase: PlayerPhase,
    last_played_frame: u64,
}

impl NsfPlayer {
    /// Prime RAM with the idle loop and arrange for INIT to run.
    pub(crate) fn init(&self, cpu: &mut Mos6502, bus: &mut Bus) {
        // JMP $07F0
        bus.write(IDLE_LOOP_ADDRESS, 0x4C);
        bus.write(IDLE_LOOP_ADDRESS + 1, (IDLE_LOOP_ADDRESS & 0xFF) as u8);
        bus.write(IDLE_LOOP_ADDRESS + 2, (IDLE_LOOP_ADDRESS >> 8) as u8);

        let mut registers = cpu.registers().clone();
        registers.accumulator = self.current_song.saturating_sub(1);
        registers.x = u8::from(self.pal_mode);
        registers.pc = self.init_address;
        // Return address for the routine's RTS: idle loop minus 1
        let return_address = IDLE_LOOP_ADDRESS - 1;
        bus.write(0x0100 | u16::from(registers.sp), (return_address >> 8) as u8);
        registers.sp = registers.sp.wrapping_sub(1);
        bus.write(0x0100 | u16::from(registers.sp), (return_address & 0xFF) as u8);
        registers.sp = registers.sp.wrapping_sub(1);
        cpu.set_registers(registers);
    }

    /// Called once per instruction: dispatch PLAY once per video frame while idle.
    pub(crate) fn drive(&mut self, cpu: &mut Mos6502, bus: &mut Bus) {
        let at_idle = cpu.pc() == IDLE_LOOP_ADDRESS;

        match self.phase {
            PlayerPhase::RunInit | PlayerPhase::Running => {
                if at_idle {
                    self.phase = PlayerPhase::Idle;
                }
            }
            PlayerPhase::Idle => {
                let frame = bus.ppu.frame_count();
                if at_idle && frame > self.last_played_frame {
                    self.last_played_frame = frame;
                    self.phase = PlayerPhase::Running;

                    let mut registers = cpu.registers().clone();
                    registers.pc = self.play_address;
                    let return_address = IDLE_LOOP_ADDRESS - 1;
                    bus.write(0x0100 | u16::from(registers.sp), (return_address >> 8) as u8);
                    registers.sp = registers.sp.wrapping_sub(1);
                    bus.write(0x0100 | u16::from(registers.sp), (return_address & 0xFF) as u8);
                    registers.sp = registers.sp.wrapping_sub(1);
                    cpu.set_registers(registers);
                }
            }
        }
    }
}

/// Parse an NSF file into a player and its banked-ROM mapper.
pub(crate) fn load(bytes: &[u8]) -> Result<(NsfPlayer, Mapper), NsfError> {
    if bytes.len() < HEADER_LEN {
        return Err(NsfError::Truncated);
    }

    let total_songs = bytes[0x06];
    let starting_song = bytes[0x07].max(1);
    let load_address = u16::from_le_bytes([bytes[0x08], bytes[0x09]]);
    let init_address = u16::from_le_bytes([bytes[0x0A], bytes[0x0B]]);
    let play_address = u16::from_le_bytes([bytes[0x0C], bytes[0x0D]]);
    let bank_setup: [u8; 8] = bytes[0x70..0x78].try_into().expect("slice length is 8");
    let pal_mode = bytes[0x7A] & 0x01 != 0;

    if load_address < 0x8000 {
        return Err(NsfError::BadLoadAddress(load_address));
    }

    let banked = bank_setup.iter().any(|&b| b != 0);
    let data = &bytes[HEADER_LEN..];

    let prg_rom = if banked {
        // Banked: data starts at load_address & 0x0FFF within the first bank
        let pad = (load_address & 0x0FFF) as usize;
        let mut rom = vec![0; pad];
        rom.extend_from_slice(data);
        let len = rom.len().next_power_of_two().max(4096);
        rom.resize(len, 0);
        rom
    } else {
        let mut rom = data.to_vec();
        let len = (rom.len() + (load_address - 0x8000) as usize).next_power_of_two().max(0x8000);
        rom.resize(len.saturating_sub((load_address - 0x8000) as usize), 0);
        rom
    };

    let timing_mode = if pal_mode { TimingMode::Pal } else { TimingMode::Ntsc };
    let cartridge = Cartridge::from_parts(timing_mode, prg_rom, vec![0; 8 * 1024], vec![0; 8 * 1024]);

    let initial_banks = if banked { bank_setup } else { [0, 1, 2, 3, 4, 5, 6, 7] };
    let mapper = Mapper::Nsf(MapperImpl {
        cartridge,
        data: NsfRom { banks: initial_banks, banked, load_offset: load_address - 0x8000 },
    });

    let player = NsfPlayer {
        init_address,
        play_address,
        starting_song,
        total_songs,
        current_song: starting_song,
        pal_mode,
        phase: PlayerPhase::RunInit,
        last_played_frame: 0,
    };

    log::info!(
        "NSF: {total_songs} songs, load {load_address:04X}, init {init_address:04X}, play {play_address:04X}, banked: {banked}"
    );

    Ok((player, mapper))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nsf_file(load: u16, banked: bool) -> Vec<u8> {
        let mut file = vec![0_u8; HEADER_LEN + 0x1000];
        file[..5].copy_from_slice(b"NESM\x1A");
        file[0x06] = 3;
        file[0x07] = 1;
        file[0x08..0x0A].copy_from_slice(&load.to_le_bytes());
        file[0x0A..0x0C].copy_from_slice(&0x8000_u16.to_le_bytes());
        file[0x0C..0x0E].copy_from_slice(&0x8003_u16.to_le_bytes());
        if banked {
            file[0x70] = 0;
            file[0x71] = 1;
        }
        file
    }

    #[test]
    fn detects_nsf_magic() {
        assert!(is_nsf(b"NESM\x1Amore"));
        assert!(!is_nsf(b"NES\x1Amore"));
    }

    #[test]
    fn parses_addresses() {
        let (player, _mapper) = load(&nsf_file(0x8000, false)).unwrap();
        assert_eq!(player.init_address, 0x8000);
        assert_eq!(player.play_address, 0x8003);
        assert_eq!(player.total_songs, 3);
    }

    #[test]
    fn rejects_low_load_address() {
        assert!(matches!(load(&nsf_file(0x4000, false)), Err(NsfError::BadLoadAddress(0x4000))));
    }
}
