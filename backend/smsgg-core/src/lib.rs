//! Sega Master System / Game Gear emulation core

pub mod api;
mod bus;
mod memory;
mod psg;
mod vdp;

pub use api::{SmsGgEmulator, SmsGgEmulatorConfig, SmsGgLoadError};

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum SmsGgHardware {
    #[default]
    MasterSystem,
    GameGear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct SmsGgInputs {
    pub p1_up: bool,
    pub p1_down: bool,
    pub p1_left: bool,
    pub p1_right: bool,
    pub p1_button1: bool,
    pub p1_button2: bool,
    pub p2_up: bool,
    pub p2_down: bool,
    pub p2_left: bool,
    pub p2_right: bool,
    pub p2_button1: bool,
    pub p2_button2: bool,
    /// Pause button (SMS, raises NMI) / Start button (Game Gear)
    pub pause: bool,
}
