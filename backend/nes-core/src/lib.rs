//! NES / Famicom emulation core
//!
//! The bus couples a `mos6502-emu` CPU to the PPU, APU, input latches, and the cartridge
//! mapper. One [`api::NesEmulator::tick`] executes one CPU instruction and advances the PPU
//! three dots per CPU cycle (NTSC) or at the 16:5 PAL ratio.

pub mod api;
mod apu;
mod bus;
mod input;
mod nsf;
mod ppu;

pub use api::{NesEmulator, NesEmulatorConfig, NesError, NesLoadError};
pub use bus::cartridge::INesHeader;
pub use input::{JoypadState, NesInputs};
