//! PC Engine / TurboGrafx-16 emulation core

pub mod api;
mod memory;
mod psg;
mod vdc;

pub use api::{PceEmulator, PceEmulatorConfig, PceLoadError};

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct PceInputs {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub button1: bool,
    pub button2: bool,
    pub select: bool,
    pub run: bool,
}
