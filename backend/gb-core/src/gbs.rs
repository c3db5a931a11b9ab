//! GBS (Game Boy Sound) playback
//!
//! Like the NSF player: the GBS data maps in as a ROM image, a small idle loop in HRAM keeps
//! the CPU parked, and the PLAY routine runs once per frame (or at the timer rate when TAC
//! requests timer-based playback).

use crate::sm83::{BusInterface, Sm83};
use crate::bus::Bus;
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;
use thiserror::Error;

const HEADER_LEN: usize = 0x70;
/// Idle loop in HRAM: JR -2
const IDLE_LOOP_ADDRESS: u16 = 0xFF80;

#[derive(Debug, Error)]
pub enum GbsError {
    #[error("GBS file is too short")]
    Truncated,
    #[error("GBS load address {0:04X} is below $0400")]
    BadLoadAddress(u16),
}

pub(crate) fn is_gbs(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && &bytes[..3] == b"GBS"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum PlayerPhase {
    Running,
    Idle,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct GbsPlayer {
    pub(crate) load_address: u16,
    init_address: u16,
    play_address: u16,
    pub(crate) song_count: u8,
    first_song: u8,
    current_song: u8,
    timer_modulo: u8,
    timer_control: u8,
    stack_pointer: u16,
    phase: PlayerPhase,
    last_played_frame: u64,
    frame_counter: u64,
}

impl GbsPlayer {
    /// Parse the 0x70-byte GBS header.
    pub(crate) fn parse(bytes: &[u8]) -> Result<(Self, Vec<u8>), GbsError> {
        if bytes.len() < HEADER_LEN {
            return Err(GbsError::Truncated);
        }

        let song_count = bytes[0x04];
        let first_song = bytes[0x05].max(1);
        let load_address = u16::from_le_bytes([bytes[0x06], bytes[0x07]]);
        let init_address = u16::from_le_bytes([bytes[0x08], bytes[0x09]]);
        let play_address = u16::from_le_bytes([bytes[0x0A], bytes[0x0B]]);
        let stack_pointer = u16::from_le_bytes([bytes[0x0C], bytes[0x0D]]);
        let timer_modulo = bytes[0x0E];
        let timer_control = bytes[0x0F];

        if load_address < 0x0400 {
            return Err(GbsError::BadLoadAddress(load_address));
        }

        // Build a ROM image with the data at the load address
        let data = &bytes[HEADER_LEN..];
        let total = (load_address as usize + data.len()).max(0x8000);
        let mut rom = vec![0; total.next_power_of_two()];
        rom[load_address as usize..load_address as usize + data.len()].copy_from_slice(data);
        // A minimal header so cartridge parsing sees MBC1 with no RAM
        rom[0x0147] = 0x01;
        rom[0x0149] = 0x00;

        let player = Self {
            load_address,
            init_address,
            play_address,
            song_count,
            first_song,
            current_song: first_song,
            timer_modulo,
            timer_control,
            stack_pointer,
            phase: PlayerPhase::Running,
            last_played_frame: 0,
            frame_counter: 0,
        };

        log::info!(
            "GBS: {song_count} songs, load {load_address:04X}, init {init_address:04X}, play {play_address:04X}"
        );

        Ok((player, rom))
    }

    pub(crate) fn install(&self, cpu: &mut Sm83, bus: &mut Bus) {
        // JR -2 idle loop in HRAM
        bus.write(IDLE_LOOP_ADDRESS, 0x18);
        bus.write(IDLE_LOOP_ADDRESS + 1, 0xFE);

        // Timer-based playback programs TMA/TAC from the header
        if self.timer_control.bit(2) {
            bus.write(0xFF06, self.timer_modulo);
            bus.write(0xFF07, self.timer_control & 0x07);
        }

        cpu.registers.sp = self.stack_pointer;
        cpu.registers.a = self.current_song - 1;
        cpu.registers.pc = self.init_address;
        // RET from INIT lands on the idle loop
        cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
        bus.write(cpu.registers.sp, (IDLE_LOOP_ADDRESS >> 8) as u8);
        cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
        bus.write(cpu.registers.sp, (IDLE_LOOP_ADDRESS & 0xFF) as u8);
    }

    /// Called once per rendered frame boundary and once per instruction.
    pub(crate) fn drive(&mut self, cpu: &mut Sm83, bus: &mut Bus, frame_count: u64) {
        let at_idle = cpu.registers.pc == IDLE_LOOP_ADDRESS;

        match self.phase {
            PlayerPhase::Running => {
                if at_idle {
                    self.phase = PlayerPhase::Idle;
                }
            }
            PlayerPhase::Idle => {
                self.frame_counter = frame_count;
                if at_idle && frame_count > self.last_played_frame {
                    self.last_played_frame = frame_count;
                    self.phase = PlayerPhase::Running;

                    cpu.registers.pc = self.play_address;
                    cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
                    bus.write(cpu.registers.sp, (IDLE_LOOP_ADDRESS >> 8) as u8);
                    cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
                    bus.write(cpu.registers.sp, (IDLE_LOOP_ADDRESS & 0xFF) as u8);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gbs_file() -> Vec<u8> {
        let mut file = vec![0_u8; HEADER_LEN + 0x4000];
        file[..3].copy_from_slice(b"GBS");
        file[0x03] = 1;
        file[0x04] = 5;
        file[0x05] = 1;
        file[0x06..0x08].copy_from_slice(&0x0400_u16.to_le_bytes());
        file[0x08..0x0A].copy_from_slice(&0x0400_u16.to_le_bytes());
        file[0x0A..0x0C].copy_from_slice(&0x0500_u16.to_le_bytes());
        file[0x0C..0x0E].copy_from_slice(&0xFFFE_u16.to_le_bytes());
        file
    }

    #[test]
    fn parses_header() {
        let (player, rom) = GbsPlayer::parse(&gbs_file()).unwrap();
        assert_eq!(player.song_count, 5);
        assert_eq!(player.play_address, 0x0500);
        assert!(rom.len() >= 0x8000);
    }

    #[test]
    fn rejects_low_load_address() {
        let mut file = gbs_file();
        file[0x06..0x08].copy_from_slice(&0x0100_u16.to_le_bytes());
        assert!(matches!(GbsPlayer::parse(&file), Err(GbsError::BadLoadAddress(0x0100))));
    }
}
