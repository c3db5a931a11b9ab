//! OAM DMA and the CGB VRAM DMA unit (general-purpose and per-hblank)

use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct OamDma {
    source_page: u8,
    bytes_copied: u8,
    active: bool,
}

impl OamDma {
    pub(crate) fn start(&mut self, source_page: u8) {
        self.source_page = source_page;
        self.bytes_copied = 0;
        self.active = true;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn read_register(&self) -> u8 {
        self.source_page
    }

    /// One byte transfers per M-cycle; returns (source address, OAM offset).
    pub(crate) fn next_transfer(&mut self) -> Option<(u16, u8)> {
        if !self.active {
            return None;
        }
        let offset = self.bytes_copied;
        let source = (u16::from(self.source_page) << 8) | u16::from(offset);
        self.bytes_copied += 1;
        if self.bytes_copied == 160 {
            self.active = false;
        }
        Some((source, offset))
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct VramDma {
    source: u16,
    destination: u16,
    /// Remaining length in 16-byte blocks minus one, as HDMA5 stores it
    blocks_remaining: u8,
    active: bool,
    hblank_mode: bool,
    hblank_block_pending: bool,
}

impl VramDma {
    pub(crate) fn write_source_high(&mut self, value: u8) {
        self.source = (self.source & 0x00FF) | (u16::from(value) << 8);
    }

    pub(crate) fn write_source_low(&mut self, value: u8) {
        self.source = (self.source & 0xFF00) | u16::from(value & 0xF0);
    }

    pub(crate) fn write_destination_high(&mut self, value: u8) {
        self.destination = (self.destination & 0x00FF) | (u16::from(value & 0x1F) << 8);
    }

    pub(crate) fn write_destination_low(&mut self, value: u8) {
        self.destination = (self.destination & 0xFF00) | u16::from(value & 0xF0);
    }

    pub(crate) fn write_control(&mut self, value: u8) {
        if self.active && self.hblank_mode && !value.bit(7) {
            // Writing with bit 7 clear cancels an in-progress HDMA
            self.active = false;
            self.blocks_remaining = value & 0x7F;
            return;
        }

        self.blocks_remaining = value & 0x7F;
        self.hblank_mode = value.bit(7);
        self.active = true;
        self.hblank_block_pending = false;
    }

    pub(crate) fn read_control(&self) -> u8 {
        (u8::from(!self.active) << 7) | (self.blocks_remaining & 0x7F)
    }

    pub(crate) fn is_active_general(&self) -> bool {
        self.active && !self.hblank_mode
    }

    /// Called at each hblank start; arms one 16-byte block.
    pub(crate) fn notify_hblank(&mut self) {
        if self.active && self.hblank_mode {
            self.hblank_block_pending = true;
        }
    }

    pub(crate) fn take_pending_block(&mut self) -> Option<(u16, u16)> {
        let transfer_now =
            self.is_active_general() || (self.active && std::mem::take(&mut self.hblank_block_pending));
        if !transfer_now {
            return None;
        }

        let block = (self.source, self.destination);
        self.source = self.source.wrapping_add(16);
        self.destination = (self.destination.wrapping_add(16)) & 0x1FF0;
        if self.blocks_remaining == 0 {
            self.active = false;
            self.blocks_remaining = 0x7F;
        } else {
            self.blocks_remaining -= 1;
        }
        Some(block)
    }
}
