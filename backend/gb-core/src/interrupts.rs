//! Interrupt enable / flag registers

use crate::sm83::InterruptType;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct InterruptRegisters {
    enabled: u8,
    flags: u8,
}

impl InterruptRegisters {
    pub(crate) fn read_ie(&self) -> u8 {
        self.enabled | 0xE0
    }

    pub(crate) fn write_ie(&mut self, value: u8) {
        self.enabled = value & 0x1F;
    }

    pub(crate) fn read_if(&self) -> u8 {
        self.flags | 0xE0
    }

    pub(crate) fn write_if(&mut self, value: u8) {
        self.flags = value & 0x1F;
    }

    pub(crate) fn enabled_mask(&self) -> u8 {
        self.enabled
    }

    pub(crate) fn flags_mask(&self) -> u8 {
        self.flags
    }

    pub(crate) fn set_flag(&mut self, interrupt_type: InterruptType) {
        log::trace!("interrupt flag set: {interrupt_type:?}");
        self.flags |= interrupt_type.register_mask();
    }

    pub(crate) fn clear_flag_mask(&mut self, mask: u8) {
        self.flags &= !mask;
    }
}
