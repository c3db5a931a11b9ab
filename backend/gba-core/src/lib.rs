//! Game Boy Advance emulation core

pub mod api;
mod apu;
mod cartridge;
mod dma;
mod interrupts;
mod memory;
mod ppu;
mod prefetch;
mod timers;

pub use api::{GbaEmulator, GbaEmulatorConfig, GbaLoadError};

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct GbaInputs {
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub l: bool,
    pub r: bool,
}
