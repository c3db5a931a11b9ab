//! MBC3 / MBC30 with the battery-backed real-time clock
//!
//! The `.rtc` battery format is 5 bytes of RTC registers (S, M, H, DL, DH) followed by an
//! 8-byte big-endian milliseconds-since-epoch timestamp. On load, the clock advances by the
//! wall-clock time elapsed since the save.

use crate::cartridge::mappers::{basic_map_ram_address, basic_map_rom_address};
use bincode::{Decode, Encode};
use retrocore_common::num::{GetBit, U16Ext};
use retrocore_common::timeutils;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct RtcTime {
    nanos: u64,
    seconds: u8,
    minutes: u8,
    hours: u8,
    days: u16,
    day_overflow: bool,
}

impl RtcTime {
    fn advance_seconds(&mut self, seconds: u64) {
        let total_seconds = u64::from(self.seconds) + seconds;
        self.seconds = (total_seconds % 60) as u8;
        let total_minutes = u64::from(self.minutes) + total_seconds / 60;
        if total_seconds < 60 {
            return;
        }
        self.minutes = (total_minutes % 60) as u8;
        let total_hours = u64::from(self.hours) + total_minutes / 60;
        if total_minutes < 60 {
            return;
        }
        self.hours = (total_hours % 24) as u8;
        let total_days = u64::from(self.days) + total_hours / 24;
        if total_hours < 24 {
            return;
        }
        self.days = (total_days % 512) as u16;
        if total_days >= 512 {
            self.day_overflow = true;
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Mbc3Rtc {
    current_time: RtcTime,
    latched_time: RtcTime,
    last_update_millis: u64,
    last_latch_write: u8,
    halted: bool,
}

impl Mbc3Rtc {
    fn new() -> Self {
        Self {
            current_time: RtcTime::default(),
            latched_time: RtcTime::default(),
            last_update_millis: timeutils::current_time_millis(),
            last_latch_write: 0xFF,
            halted: false,
        }
    }

    /// Restore from the `.rtc` battery format and advance by the elapsed wall-clock time.
    fn from_battery_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 13 {
            return None;
        }

        let mut rtc = Self::new();
        rtc.current_time.seconds = bytes[0] % 60;
        rtc.current_time.minutes = bytes[1] % 60;
        rtc.current_time.hours = bytes[2] % 24;
        rtc.current_time.days = u16::from(bytes[3]) | (u16::from(bytes[4] & 0x01) << 8);
        rtc.halted = bytes[4].bit(6);
        rtc.current_time.day_overflow = bytes[4].bit(7);

        let saved_millis = u64::from_be_bytes(bytes[5..13].try_into().expect("slice length 8"));
        let now_millis = timeutils::current_time_millis();
        if !rtc.halted && now_millis > saved_millis {
            let elapsed_seconds = (now_millis - saved_millis) / 1000;
            rtc.current_time.advance_seconds(elapsed_seconds);
        }

        Some(rtc)
    }

    fn to_battery_bytes(&self) -> [u8; 13] {
        let mut bytes = [0; 13];
        bytes[0] = self.current_time.seconds;
        bytes[1] = self.current_time.minutes;
        bytes[2] = self.current_time.hours;
        bytes[3] = self.current_time.days.lsb();
        bytes[4] = (self.current_time.days.msb() & 0x01)
            | (u8::from(self.halted) << 6)
            | (u8::from(self.current_time.day_overflow) << 7);
        bytes[5..13].copy_from_slice(&timeutils::current_time_millis().to_be_bytes());
        bytes
    }

    fn read_register(&self, register: u8) -> u8 {
        match register {
            0x08 => self.latched_time.seconds,
            0x09 => self.latched_time.minutes,
            0x0A => self.latched_time.hours,
            0x0B => self.latched_time.days.lsb(),
            0x0C => {
                (self.latched_time.days.msb() & 0x01)
                    | (u8::from(self.halted) << 6)
                    | (u8::from(self.latched_time.day_overflow) << 7)
            }
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, register: u8, value: u8) {
        match register {
            0x08 => {
                self.current_time.seconds = value % 60;
                self.current_time.nanos = 0;
            }
            0x09 => self.current_time.minutes = value % 60,
            0x0A => self.current_time.hours = value % 24,
            0x0B => self.current_time.days.set_lsb(value),
            0x0C => {
                self.current_time.days.set_msb(value & 0x01);
                self.halted = value.bit(6);
                self.current_time.day_overflow = value.bit(7);
            }
            _ => {}
        }
    }

    fn write_latch(&mut self, value: u8) {
        // A $00 then $01 write sequence latches the live time
        if self.last_latch_write == 0x00 && value == 0x01 {
            self.latched_time = self.current_time;
        }
        self.last_latch_write = value;
    }

    fn update_time(&mut self) {
        let now_millis = timeutils::current_time_millis();
        if now_millis < self.last_update_millis {
            log::error!(
                "wall clock went backwards ({} -> {now_millis} ms); RTC frozen for this interval",
                self.last_update_millis
            );
            self.last_update_millis = now_millis;
            return;
        }

        let elapsed_millis = now_millis - self.last_update_millis;
        self.last_update_millis = now_millis;

        if self.halted {
            return;
        }

        let total_nanos = self.current_time.nanos + elapsed_millis * 1_000_000;
        self.current_time.nanos = total_nanos % 1_000_000_000;
        self.current_time.advance_seconds(total_nanos / 1_000_000_000);
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Mbc3 {
    rom_bank: u8,
    rom_addr_mask: u32,
    ram_bank: u8,
    ram_addr_mask: u32,
    ram_enabled: bool,
    rtc: Option<Mbc3Rtc>,
}

impl Mbc3 {
    pub(crate) fn new(
        rom_len: u32,
        ram_len: u32,
        has_rtc: bool,
        rtc_battery_bytes: Option<Vec<u8>>,
    ) -> Self {
        let rtc = has_rtc.then(|| {
            rtc_battery_bytes
                .as_deref()
                .and_then(Mbc3Rtc::from_battery_bytes)
                .unwrap_or_else(Mbc3Rtc::new)
        });

        Self {
            rom_bank: 0,
            rom_addr_mask: rom_len - 1,
            ram_bank: 0,
            ram_addr_mask: if ram_len != 0 { ram_len - 1 } else { 0 },
            ram_enabled: false,
            rtc,
        }
    }

    pub(crate) fn map_rom_address(&self, address: u16) -> u32 {
        basic_map_rom_address(address, self.rom_bank.into(), false, self.rom_addr_mask)
    }

    pub(crate) fn write_rom_address(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => {
                self.ram_enabled = value & 0x0F == 0x0A;
            }
            0x2000..=0x3FFF => {
                // MBC30 carts use all 8 bits; standard MBC3 masks to 7
                self.rom_bank = value & 0x7F;
            }
            0x4000..=0x5FFF => {
                // $00-$07 select an SRAM bank; $08-$0C select an RTC register
                self.ram_bank = value & 0x0F;
            }
            0x6000..=0x7FFF => {
                if let Some(rtc) = &mut self.rtc {
                    rtc.write_latch(value);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn read_ram(&self, address: u16, sram: &[u8]) -> u8 {
        match self.ram_bank {
            0x00..=0x07 => basic_map_ram_address(
                self.ram_enabled,
                address,
                self.ram_bank.into(),
                self.ram_addr_mask,
            )
            .filter(|_| !sram.is_empty())
            .map_or(0xFF, |addr| sram[addr as usize]),
            0x08..=0x0C => {
                if self.ram_enabled {
                    self.rtc.as_ref().map_or(0xFF, |rtc| rtc.read_register(self.ram_bank))
                } else {
                    0xFF
                }
            }
            _ => 0xFF,
        }
    }

    pub(crate) fn write_ram(&mut self, address: u16, value: u8, sram: &mut [u8]) -> bool {
        match self.ram_bank {
            0x00..=0x07 => {
                let addr = basic_map_ram_address(
                    self.ram_enabled,
                    address,
                    self.ram_bank.into(),
                    self.ram_addr_mask,
                );
                match addr {
                    Some(addr) if !sram.is_empty() => {
                        sram[addr as usize] = value;
                        true
                    }
                    _ => false,
                }
            }
            0x08..=0x0C => {
                if self.ram_enabled {
                    if let Some(rtc) = &mut self.rtc {
                        rtc.write_register(self.ram_bank, value);
                        return true;
                    }
                }
                false
            }
            _ => false,
        }
    }

    pub(crate) fn update_rtc_time(&mut self) {
        if let Some(rtc) = &mut self.rtc {
            rtc.update_time();
        }
    }

    pub(crate) fn rtc_battery_bytes(&self) -> Option<[u8; 13]> {
        self.rtc.as_ref().map(Mbc3Rtc::to_battery_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_latch_requires_00_01_sequence() {
        let mut rtc = Mbc3Rtc::new();
        rtc.current_time.seconds = 30;
        rtc.write_latch(0x01);
        assert_eq!(rtc.latched_time.seconds, 0);
        rtc.write_latch(0x00);
        rtc.write_latch(0x01);
        assert_eq!(rtc.latched_time.seconds, 30);
    }

    #[test]
    fn battery_round_trip_advances_by_elapsed_time() {
        let mut rtc = Mbc3Rtc::new();
        rtc.current_time.seconds = 50;
        rtc.current_time.minutes = 59;

        let mut bytes = rtc.to_battery_bytes();
        // Simulate a save made 10 wall-clock seconds in the past
        let saved_millis = u64::from_be_bytes(bytes[5..13].try_into().unwrap()) - 10_000;
        bytes[5..13].copy_from_slice(&saved_millis.to_be_bytes());

        let restored = Mbc3Rtc::from_battery_bytes(&bytes).unwrap();
        assert_eq!(restored.current_time.seconds, 0);
        assert_eq!(restored.current_time.minutes, 0);
        assert_eq!(restored.current_time.hours, 1);
    }

    #[test]
    fn halted_rtc_does_not_advance_on_load() {
        let mut rtc = Mbc3Rtc::new();
        rtc.current_time.seconds = 10;
        rtc.halted = true;

        let mut bytes = rtc.to_battery_bytes();
        let saved_millis = u64::from_be_bytes(bytes[5..13].try_into().unwrap()) - 60_000;
        bytes[5..13].copy_from_slice(&saved_millis.to_be_bytes());

        let restored = Mbc3Rtc::from_battery_bytes(&bytes).unwrap();
        assert_eq!(restored.current_time.seconds, 10);
    }

    #[test]
    fn day_counter_wraps_at_512_with_overflow_flag() {
        let mut time = RtcTime { days: 511, hours: 23, minutes: 59, seconds: 59, ..RtcTime::default() };
        time.advance_seconds(1);
        assert_eq!(time.days, 0);
        assert!(time.day_overflow);
    }

    #[test]
    fn rtc_registers_not_selected_without_ram_enable() {
        let mut mbc3 = Mbc3::new(128 * 1024, 8 * 1024, true, None);
        mbc3.write_rom_address(0x4000, 0x08);
        let sram = vec![0_u8; 8 * 1024];
        assert_eq!(mbc3.read_ram(0xA000, &sram), 0xFF);

        mbc3.write_rom_address(0x0000, 0x0A);
        assert_ne!(mbc3.read_ram(0xA000, &sram), 0xFF);
    }
}
