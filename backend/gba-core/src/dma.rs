//! The four DMA channels: immediate, VBlank, HBlank, and FIFO (channels 1/2) triggers

use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum DmaTrigger {
    Immediate,
    VBlank,
    HBlank,
    Special,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct DmaChannel {
    pub(crate) source: u32,
    pub(crate) destination: u32,
    pub(crate) word_count: u16,
    pub(crate) internal_source: u32,
    pub(crate) internal_destination: u32,
    pub(crate) control: u16,
    pub(crate) pending: bool,
}

impl DmaChannel {
    pub(crate) fn enabled(&self) -> bool {
        self.control.bit(15)
    }

    pub(crate) fn trigger(&self) -> DmaTrigger {
        match (self.control >> 12) & 0x03 {
            0 => DmaTrigger::Immediate,
            1 => DmaTrigger::VBlank,
            2 => DmaTrigger::HBlank,
            _ => DmaTrigger::Special,
        }
    }

    pub(crate) fn word_transfer(&self) -> bool {
        self.control.bit(10)
    }

    pub(crate) fn repeat(&self) -> bool {
        self.control.bit(9)
    }

    pub(crate) fn irq_enabled(&self) -> bool {
        self.control.bit(14)
    }

    /// 0 increment, 1 decrement, 2 fixed, 3 increment+reload (destination only)
    pub(crate) fn destination_adjust(&self) -> u16 {
        (self.control >> 5) & 0x03
    }

    pub(crate) fn source_adjust(&self) -> u16 {
        (self.control >> 7) & 0x03
    }

    pub(crate) fn reload_internal(&mut self) {
        self.internal_source = self.source;
        self.internal_destination = self.destination;
    }

    pub(crate) fn write_control(&mut self, value: u16) {
        let was_enabled = self.enabled();
        self.control = value;
        if self.enabled() && !was_enabled {
            self.reload_internal();
            if self.trigger() == DmaTrigger::Immediate {
                self.pending = true;
            }
        }
    }

    pub(crate) fn notify(&mut self, trigger: DmaTrigger) {
        if self.enabled() && self.trigger() == trigger {
            self.pending = true;
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct DmaController {
    pub(crate) channels: [DmaChannel; 4],
}

impl DmaController {
    pub(crate) fn notify_vblank(&mut self) {
        for channel in &mut self.channels {
            channel.notify(DmaTrigger::VBlank);
        }
    }

    pub(crate) fn notify_hblank(&mut self) {
        for channel in &mut self.channels {
            channel.notify(DmaTrigger::HBlank);
        }
    }

    /// FIFO DMA request from the APU (channels 1 and 2 only).
    pub(crate) fn notify_fifo(&mut self, channel_index: usize) {
        let channel = &mut self.channels[channel_index];
        if channel.enabled() && channel.trigger() == DmaTrigger::Special {
            channel.pending = true;
        }
    }

    pub(crate) fn write_register(&mut self, address: u32, value: u8) {
        let offset = address - 0x0400_00B0;
        let channel = &mut self.channels[(offset / 12) as usize];
        let field = offset % 12;
        match field {
            0..=3 => {
                let shift = field * 8;
                channel.source =
                    (channel.source & !(0xFF << shift)) | (u32::from(value) << shift);
            }
            4..=7 => {
                let shift = (field - 4) * 8;
                channel.destination =
                    (channel.destination & !(0xFF << shift)) | (u32::from(value) << shift);
            }
            8 => channel.word_count = (channel.word_count & 0xFF00) | u16::from(value),
            9 => channel.word_count = (channel.word_count & 0x00FF) | (u16::from(value) << 8),
            10 => channel.write_control((channel.control & 0xFF00) | u16::from(value)),
            _ => channel.write_control((channel.control & 0x00FF) | (u16::from(value) << 8)),
        }
    }

    pub(crate) fn read_register(&self, address: u32) -> u8 {
        let offset = address - 0x0400_00B0;
        let channel = &self.channels[(offset / 12) as usize];
        match offset % 12 {
            10 => channel.control as u8,
            11 => (channel.control >> 8) as u8,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_dma_pends_on_enable() {
        let mut dma = DmaController::default();
        dma.write_register(0x0400_00BA, 0x00);
        dma.write_register(0x0400_00BB, 0x80);
        assert!(dma.channels[0].pending);
    }

    #[test]
    fn hblank_dma_waits_for_notify() {
        let mut dma = DmaController::default();
        dma.write_register(0x0400_00BB, 0xA0); // enable, hblank trigger
        assert!(!dma.channels[0].pending);
        dma.notify_hblank();
        assert!(dma.channels[0].pending);
    }
}
