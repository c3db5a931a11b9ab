//! Serial link port; no link partner is attached, so transfers shift in $FF

use crate::interrupts::InterruptRegisters;
use crate::sm83::InterruptType;
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct SerialPort {
    data: u8,
    transfer_active: bool,
    internal_clock: bool,
    bits_remaining: u8,
    cycle_counter: u16,
}

impl SerialPort {
    // 8192 Hz bit clock at 1 MiHz M-cycle rate
    const M_CYCLES_PER_BIT: u16 = 128;

    pub(crate) fn tick_m_cycle(&mut self, interrupts: &mut InterruptRegisters) {
        if !self.transfer_active || !self.internal_clock {
            // External clock with no partner never completes
            return;
        }

        self.cycle_counter += 1;
        if self.cycle_counter >= Self::M_CYCLES_PER_BIT {
            self.cycle_counter = 0;
            self.data = (self.data << 1) | 1;
            self.bits_remaining -= 1;
            if self.bits_remaining == 0 {
                self.transfer_active = false;
                interrupts.set_flag(InterruptType::Serial);
            }
        }
    }

    pub(crate) fn read_sb(&self) -> u8 {
        self.data
    }

    pub(crate) fn write_sb(&mut self, value: u8) {
        self.data = value;
    }

    pub(crate) fn read_sc(&self) -> u8 {
        0x7E | (u8::from(self.transfer_active) << 7) | u8::from(self.internal_clock)
    }

    pub(crate) fn write_sc(&mut self, value: u8) {
        self.internal_clock = value.bit(0);
        if value.bit(7) {
            self.transfer_active = true;
            self.bits_remaining = 8;
            self.cycle_counter = 0;
        }
    }
}
