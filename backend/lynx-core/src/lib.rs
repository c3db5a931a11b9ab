//! Atari Lynx emulation core
//!
//! The 65SC02 drives Mikey (timers, palette, audio, display scan-out from RAM) and Suzy
//! (the sprite engine, math unit, and cartridge shifter). Suzy sprite draws run to
//! completion when the GO bit is set, with their cycle cost charged to the CPU.

pub mod api;
mod cart;
pub mod decrypt;
mod mikey;
mod suzy;

pub use api::{LynxEmulator, LynxEmulatorConfig, LynxLoadError};
pub use cart::LnxHeader;

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct LynxInputs {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub option1: bool,
    pub option2: bool,
    pub pause: bool,
}
