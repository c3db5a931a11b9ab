//! 8-channel GPDMA / HDMA controller
//!
//! GPDMA runs to completion when $420B is written, stealing 8 master cycles per byte from the
//! CPU. A zero byte counter transfers 65536 bytes. HDMA reloads at frame start and transfers
//! per scanline; a line-count byte of $00 terminates the table, bit 7 selects repeat mode.

use bincode::{Decode, Encode};
use retrocore_common::num::{GetBit, U16Ext};

pub(crate) const DMA_CYCLES_PER_BYTE: u64 = 8;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct DmaChannel {
    // $43x0 DMAP
    pub(crate) direction_b_to_a: bool,
    pub(crate) indirect_hdma: bool,
    pub(crate) decrement: bool,
    pub(crate) fixed: bool,
    pub(crate) transfer_unit: u8,
    // $43x1 BBAD
    pub(crate) b_address: u8,
    // $43x2-4 A1Tx
    pub(crate) a_address: u16,
    pub(crate) a_bank: u8,
    // $43x5-6 DAS: byte counter / HDMA indirect address
    pub(crate) byte_counter: u16,
    // $43x7 indirect HDMA bank
    pub(crate) indirect_bank: u8,
    // $43x8-9 HDMA table address
    pub(crate) hdma_table_address: u16,
    // $43xA HDMA line counter
    pub(crate) hdma_line_counter: u8,
    pub(crate) hdma_active: bool,
    pub(crate) hdma_do_transfer: bool,
}

impl DmaChannel {
    fn write_dmap(&mut self, value: u8) {
        self.direction_b_to_a = value.bit(7);
        self.indirect_hdma = value.bit(6);
        self.decrement = value.bit(4);
        self.fixed = value.bit(3);
        self.transfer_unit = value & 0x07;
    }

    fn read_dmap(&self) -> u8 {
        (u8::from(self.direction_b_to_a) << 7)
            | (u8::from(self.indirect_hdma) << 6)
            | (u8::from(self.decrement) << 4)
            | (u8::from(self.fixed) << 3)
            | self.transfer_unit
    }

    /// B-bus register offsets for each unit within the transfer pattern.
    pub(crate) fn unit_offsets(&self) -> &'static [u8] {
        match self.transfer_unit {
            0 => &[0],
            1 => &[0, 1],
            2 | 6 => &[0, 0],
            3 | 7 => &[0, 0, 1, 1],
            4 => &[0, 1, 2, 3],
            5 => &[0, 1, 0, 1],
            _ => unreachable!("transfer unit is masked to 3 bits"),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct DmaController {
    pub(crate) channels: [DmaChannel; 8],
    pub(crate) pending_gpdma: u8,
    pub(crate) hdma_enabled: u8,
}

impl DmaController {
    pub(crate) fn new() -> Self {
        Self { channels: Default::default(), pending_gpdma: 0, hdma_enabled: 0 }
    }

    pub(crate) fn start_gpdma(&mut self, mask: u8) {
        self.pending_gpdma = mask;
    }

    pub(crate) fn set_hdma_enabled(&mut self, mask: u8) {
        self.hdma_enabled = mask;
    }

    pub(crate) fn read_register(&self, address: u16) -> Option<u8> {
        let channel = &self.channels[usize::from((address >> 4) & 0x07)];
        match address & 0x0F {
            0x0 => Some(channel.read_dmap()),
            0x1 => Some(channel.b_address),
            0x2 => Some(channel.a_address.lsb()),
            0x3 => Some(channel.a_address.msb()),
            0x4 => Some(channel.a_bank),
            0x5 => Some(channel.byte_counter.lsb()),
            0x6 => Some(channel.byte_counter.msb()),
            0x7 => Some(channel.indirect_bank),
            0x8 => Some(channel.hdma_table_address.lsb()),
            0x9 => Some(channel.hdma_table_address.msb()),
            0xA => Some(channel.hdma_line_counter),
            _ => None,
        }
    }

    pub(crate) fn write_register(&mut self, address: u16, value: u8) {
        let channel = &mut self.channels[usize::from((address >> 4) & 0x07)];
        match address & 0x0F {
            0x0 => channel.write_dmap(value),
            0x1 => channel.b_address = value,
            0x2 => channel.a_address.set_lsb(value),
            0x3 => channel.a_address.set_msb(value),
            0x4 => channel.a_bank = value,
            0x5 => channel.byte_counter.set_lsb(value),
            0x6 => channel.byte_counter.set_msb(value),
            0x7 => channel.indirect_bank = value,
            0x8 => channel.hdma_table_address.set_lsb(value),
            0x9 => channel.hdma_table_address.set_msb(value),
            0xA => channel.hdma_line_counter = value,
            _ => {}
        }
    }
}

/// Execute all pending GPDMA channels against the bus. Returns stolen master cycles.
pub(crate) fn run_gpdma(bus: &mut crate::memory::Bus) -> u64 {
    let mask = std::mem::take(&mut bus.dma.pending_gpdma);
    if mask == 0 {
        return 0;
    }

    let mut stolen = 0;
    for channel_index in 0..8 {
        if !mask.bit(channel_index) {
            continue;
        }

        // Byte count of 0 means 65536
        let mut remaining: u32 = {
            let count = bus.dma.channels[channel_index as usize].byte_counter;
            if count == 0 { 0x10000 } else { u32::from(count) }
        };

        let mut unit_position = 0;
        while remaining > 0 {
            let channel = bus.dma.channels[channel_index as usize].clone();
            let offsets = channel.unit_offsets();
            let b_offset = offsets[unit_position % offsets.len()];
            unit_position += 1;

            let a_address =
                (u32::from(channel.a_bank) << 16) | u32::from(channel.a_address);
            let b_address = 0x002100 | u32::from(channel.b_address.wrapping_add(b_offset));

            if channel.direction_b_to_a {
                let value = bus.read_byte(b_address);
                bus.write_byte(a_address, value);
            } else {
                let value = bus.read_byte(a_address);
                bus.write_byte(b_address, value);
            }
            stolen += DMA_CYCLES_PER_BYTE;

            let channel = &mut bus.dma.channels[channel_index as usize];
            if !channel.fixed {
                channel.a_address = if channel.decrement {
                    channel.a_address.wrapping_sub(1)
                } else {
                    channel.a_address.wrapping_add(1)
                };
            }
            remaining -= 1;
            channel.byte_counter = channel.byte_counter.wrapping_sub(1);
        }
    }

    stolen
}

/// Reload HDMA tables at the start of a frame.
pub(crate) fn hdma_frame_init(bus: &mut crate::memory::Bus) {
    for channel_index in 0..8_u8 {
        let enabled = bus.dma.hdma_enabled.bit(channel_index);
        let channel = &mut bus.dma.channels[channel_index as usize];
        channel.hdma_active = enabled;
        if !enabled {
            continue;
        }

        channel.hdma_table_address = channel.a_address;
        channel.hdma_line_counter = 0;
        channel.hdma_do_transfer = true;
    }

    for channel_index in 0..8_u8 {
        if bus.dma.channels[channel_index as usize].hdma_active {
            hdma_reload_line_counter(bus, channel_index);
        }
    }
}

fn hdma_reload_line_counter(bus: &mut crate::memory::Bus, channel_index: u8) {
    let channel = &bus.dma.channels[channel_index as usize];
    let table_address =
        (u32::from(channel.a_bank) << 16) | u32::from(channel.hdma_table_address);
    let line_count = bus.read_byte(table_address);

    let channel = &mut bus.dma.channels[channel_index as usize];
    channel.hdma_table_address = channel.hdma_table_address.wrapping_add(1);
    channel.hdma_line_counter = line_count;
    channel.hdma_do_transfer = true;

    if line_count == 0 {
        // Zero terminates the table for the rest of the frame
        channel.hdma_active = false;
        return;
    }

    if channel.indirect_hdma {
        let channel_data = bus.dma.channels[channel_index as usize].clone();
        let table_address =
            (u32::from(channel_data.a_bank) << 16) | u32::from(channel_data.hdma_table_address);
        let low = bus.read_byte(table_address);
        let high = bus.read_byte(table_address + 1);
        let channel = &mut bus.dma.channels[channel_index as usize];
        channel.hdma_table_address = channel.hdma_table_address.wrapping_add(2);
        channel.byte_counter = u16::from_le_bytes([low, high]);
    }
}

/// Per-scanline HDMA processing. Returns stolen master cycles.
pub(crate) fn run_hdma_for_line(bus: &mut crate::memory::Bus) -> u64 {
    let mut stolen = 0;

    for channel_index in 0..8_u8 {
        if !bus.dma.channels[channel_index as usize].hdma_active {
            continue;
        }

        let do_transfer = bus.dma.channels[channel_index as usize].hdma_do_transfer;
        if do_transfer {
            let channel = bus.dma.channels[channel_index as usize].clone();
            let offsets = channel.unit_offsets();

            for (i, &b_offset) in offsets.iter().enumerate() {
                let a_address = if channel.indirect_hdma {
                    (u32::from(channel.indirect_bank) << 16)
                        | u32::from(channel.byte_counter.wrapping_add(i as u16))
                } else {
                    (u32::from(channel.a_bank) << 16)
                        | u32::from(channel.hdma_table_address.wrapping_add(i as u16))
                };
                let b_address = 0x002100 | u32::from(channel.b_address.wrapping_add(b_offset));

                if channel.direction_b_to_a {
                    let value = bus.read_byte(b_address);
                    bus.write_byte(a_address, value);
                } else {
                    let value = bus.read_byte(a_address);
                    bus.write_byte(b_address, value);
                }
                stolen += DMA_CYCLES_PER_BYTE;
            }

            let unit_len = offsets.len() as u16;
            let channel = &mut bus.dma.channels[channel_index as usize];
            if channel.indirect_hdma {
                channel.byte_counter = channel.byte_counter.wrapping_add(unit_len);
            } else {
                channel.hdma_table_address = channel.hdma_table_address.wrapping_add(unit_len);
            }
        }

        // Decrement the line counter; bit 7 is the repeat flag
        let channel = &mut bus.dma.channels[channel_index as usize];
        channel.hdma_line_counter = channel.hdma_line_counter.wrapping_sub(1);
        channel.hdma_do_transfer = channel.hdma_line_counter.bit(7);
        if channel.hdma_line_counter & 0x7F == 0 {
            hdma_reload_line_counter(bus, channel_index);
        }
    }

    stolen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_byte_counter_transfers_65536_bytes() {
        let channel = DmaChannel::default();
        assert_eq!(channel.byte_counter, 0);
        let remaining = if channel.byte_counter == 0 { 0x10000_u32 } else { u32::from(channel.byte_counter) };
        assert_eq!(remaining, 0x10000);
    }

    #[test]
    fn transfer_unit_patterns() {
        let mut channel = DmaChannel::default();
        channel.transfer_unit = 1;
        assert_eq!(channel.unit_offsets(), &[0, 1]);
        channel.transfer_unit = 3;
        assert_eq!(channel.unit_offsets(), &[0, 0, 1, 1]);
        channel.transfer_unit = 4;
        assert_eq!(channel.unit_offsets(), &[0, 1, 2, 3]);
    }
}
