//! BS-X Satellaview base unit: the satellite receiver's $2188-$219F register block
//!
//! The St.GIGA broadcasts are long off the air, so the receiver is modeled with the
//! time/date channel live and every other channel idle. That is enough for BS-X software
//! to boot, sync its clock, and report "no broadcast" instead of hanging.

use bincode::{Decode, Encode};
use retrocore_common::timeutils;

/// Channel 0 carries time/date synchronization packets.
const TIME_CHANNEL: u16 = 0;

/// NTSC master clock; time packets arrive roughly once per second.
const PACKET_INTERVAL_CYCLES: u64 = 21_477_270;

const TIME_PACKET_LEN: usize = 17;

/// One broadcast reception channel.
#[derive(Debug, Clone, Encode, Decode)]
struct BsxStream {
    channel: u16,
    prefix_latch: bool,
    data_latch: bool,
    first_packet: bool,
    packet: [u8; TIME_PACKET_LEN],
    packet_pos: u8,
    packet_ready: bool,
    prefix_queued: bool,
    refill_counter: u64,
}

impl BsxStream {
    fn new() -> Self {
        Self {
            channel: 0,
            prefix_latch: false,
            data_latch: false,
            first_packet: true,
            packet: [0; TIME_PACKET_LEN],
            packet_pos: 0,
            packet_ready: false,
            prefix_queued: false,
            refill_counter: 0,
        }
    }

    fn set_channel_low(&mut self, value: u8) {
        self.channel = (self.channel & 0xFF00) | u16::from(value);
    }

    /// Writing the high byte retunes the stream and restarts reception.
    fn set_channel_high(&mut self, value: u8) {
        self.channel = (self.channel & 0x00FF) | (u16::from(value & 0x3F) << 8);
        self.first_packet = true;
        self.packet_ready = false;
        self.prefix_queued = false;
        self.packet_pos = 0;
        self.refill_counter = 0;
    }

    fn prefix_count(&self) -> u8 {
        u8::from(self.prefix_queued)
    }

    /// Packet header byte: bit 7 set while the stream is live, bit 4 flags the head packet
    /// of a transmission.
    fn pop_prefix(&mut self) -> u8 {
        if !self.prefix_queued {
            return 0x00;
        }
        self.prefix_queued = false;
        let prefix = if self.first_packet { 0x90 } else { 0x80 };
        self.first_packet = false;
        prefix
    }

    fn pop_data(&mut self) -> u8 {
        if !self.packet_ready {
            return 0x00;
        }
        let value = self.packet[usize::from(self.packet_pos)];
        self.packet_pos += 1;
        if usize::from(self.packet_pos) >= TIME_PACKET_LEN {
            // Packet consumed; the next one queues on the broadcast schedule
            self.packet_ready = false;
            self.packet_pos = 0;
        }
        value
    }

    fn status(&mut self, reset: bool) -> u8 {
        let status = if self.packet_ready { 0x80 } else { 0x00 };
        if reset {
            self.refill_counter = 0;
        }
        status
    }

    fn tick(&mut self, master_cycles: u64) {
        if !self.prefix_latch || !self.data_latch {
            return;
        }

        self.refill_counter += master_cycles;
        if self.refill_counter < PACKET_INTERVAL_CYCLES {
            return;
        }
        self.refill_counter -= PACKET_INTERVAL_CYCLES;

        // Only the time channel transmits; other channels stay silent
        if self.channel == TIME_CHANNEL && !self.packet_ready {
            self.packet = time_packet();
            self.packet_pos = 0;
            self.packet_ready = true;
            self.prefix_queued = true;
        }
    }
}

/// Build the channel-0 time packet from the host clock: a fixed 10-byte header followed by
/// second/minute/hour, weekday (1 = Sunday), day, month, and years since 1900.
fn time_packet() -> [u8; TIME_PACKET_LEN] {
    let total_seconds = timeutils::current_time_millis() / 1000;
    let second = (total_seconds % 60) as u8;
    let minute = ((total_seconds / 60) % 60) as u8;
    let hour = ((total_seconds / 3600) % 24) as u8;

    // Count days from 2000-01-01 (Unix day 10957) using the RTC calendar rules
    let mut days = (total_seconds / 86_400).saturating_sub(10_957);
    let mut year: u8 = 0;
    loop {
        let year_days = if year % 4 == 0 { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }
    let mut month: u8 = 1;
    while days >= u64::from(timeutils::days_in_month(month, year)) {
        days -= u64::from(timeutils::days_in_month(month, year));
        month += 1;
    }
    let day = days as u8 + 1;
    let weekday = timeutils::day_of_week(day, month, year);

    [
        0x00,
        0x00,
        0x00,
        0x00,
        0x10,
        0x01,
        0x01,
        0x00,
        0x00,
        0x00,
        second,
        minute,
        hour,
        weekday + 1,
        day,
        month,
        year.wrapping_add(100),
    ]
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct BsxSatellaview {
    streams: [BsxStream; 2],
    stream_reg: u8,
    ext_output: u8,
}

impl BsxSatellaview {
    pub(crate) fn new() -> Self {
        Self { streams: [BsxStream::new(), BsxStream::new()], stream_reg: 0, ext_output: 0 }
    }

    fn claims(address: u32) -> bool {
        matches!((address >> 16) as u8 & 0x7F, 0x00..=0x3F)
            && matches!(address as u16, 0x2188..=0x219F)
    }

    pub(crate) fn read(&mut self, address: u32) -> Option<u8> {
        if !Self::claims(address) {
            return None;
        }

        let offset = address as u16;
        let value = match offset {
            0x2188..=0x2193 => {
                let stream = &mut self.streams[usize::from(offset >= 0x218E)];
                match (offset - 0x2188) % 6 {
                    0 => stream.channel as u8,
                    1 => (stream.channel >> 8) as u8,
                    2 => stream.prefix_count(),
                    3 => stream.pop_prefix(),
                    4 => stream.pop_data(),
                    _ => stream.status(true),
                }
            }
            0x2194 => self.stream_reg,
            0x2197 => self.ext_output,
            _ => 0x00,
        };
        Some(value)
    }

    pub(crate) fn write(&mut self, address: u32, value: u8) -> bool {
        if !Self::claims(address) {
            return false;
        }

        let offset = address as u16;
        match offset {
            0x2188..=0x2193 => {
                let stream = &mut self.streams[usize::from(offset >= 0x218E)];
                match (offset - 0x2188) % 6 {
                    0 => stream.set_channel_low(value),
                    1 => stream.set_channel_high(value),
                    3 => stream.prefix_latch = value != 0,
                    4 => stream.data_latch = value != 0,
                    _ => {}
                }
            }
            0x2194 => self.stream_reg = value,
            0x2197 => self.ext_output = value,
            _ => {}
        }
        true
    }

    pub(crate) fn run(&mut self, master_cycles: u64) {
        for stream in &mut self.streams {
            stream.tick(master_cycles);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receive_packet(bsx: &mut BsxSatellaview) {
        // Tune stream 1 to the time channel and arm both latches
        bsx.write(0x002188, 0x00);
        bsx.write(0x002189, 0x00);
        bsx.write(0x00218B, 0x01);
        bsx.write(0x00218C, 0x01);
        bsx.run(PACKET_INTERVAL_CYCLES);
    }

    #[test]
    fn time_channel_delivers_packets_on_schedule() {
        let mut bsx = BsxSatellaview::new();
        assert_eq!(bsx.read(0x00218A), Some(0));

        receive_packet(&mut bsx);
        assert_eq!(bsx.read(0x00218A), Some(1));
        // Head packet prefix
        assert_eq!(bsx.read(0x00218B), Some(0x90));

        let packet: Vec<u8> =
            (0..TIME_PACKET_LEN).map(|_| bsx.read(0x00218C).unwrap()).collect();
        assert_eq!(&packet[..10], &[0x00, 0x00, 0x00, 0x00, 0x10, 0x01, 0x01, 0x00, 0x00, 0x00]);
        assert!(packet[12] < 24);
        assert!((1..=31).contains(&packet[14]));
        assert!((1..=12).contains(&packet[15]));
    }

    #[test]
    fn retuning_restarts_the_stream() {
        let mut bsx = BsxSatellaview::new();
        receive_packet(&mut bsx);
        assert_eq!(bsx.read(0x00218B), Some(0x90));

        // Tune away and back: the next packet is a head packet again
        bsx.write(0x002189, 0x01);
        bsx.write(0x002189, 0x00);
        bsx.run(PACKET_INTERVAL_CYCLES);
        assert_eq!(bsx.read(0x00218B), Some(0x90));
    }

    #[test]
    fn silent_channels_queue_nothing() {
        let mut bsx = BsxSatellaview::new();
        bsx.write(0x002188, 0x34);
        bsx.write(0x002189, 0x12 & 0x3F);
        bsx.write(0x00218B, 0x01);
        bsx.write(0x00218C, 0x01);
        bsx.run(10 * PACKET_INTERVAL_CYCLES);
        assert_eq!(bsx.read(0x00218A), Some(0));
        assert_eq!(bsx.read(0x00218D), Some(0x00));
    }

    #[test]
    fn registers_outside_the_block_fall_through() {
        let mut bsx = BsxSatellaview::new();
        assert_eq!(bsx.read(0x002180), None);
        assert!(!bsx.write(0x004200, 0xFF));
        // Only system banks decode the receiver
        assert_eq!(bsx.read(0x402188), None);
    }
}
