//! Bandai WonderSwan / WonderSwan Color emulation core
//!
//! The V30MZ is an 80186-class x86 core; the interpreter here covers the instruction set
//! commercial WonderSwan software uses, with the WS I/O page, banked ROM windows, the
//! tile-based PPU, and the four wave channels.

pub mod api;
mod memory;
mod ppu;
mod v30mz;

pub use api::{WsEmulator, WsEmulatorConfig, WsLoadError};

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct WsInputs {
    pub x1: bool,
    pub x2: bool,
    pub x3: bool,
    pub x4: bool,
    pub y1: bool,
    pub y2: bool,
    pub y3: bool,
    pub y4: bool,
    pub a: bool,
    pub b: bool,
    pub start: bool,
    /// Vertical-orientation bit reported through the system status port
    pub rotated: bool,
}
