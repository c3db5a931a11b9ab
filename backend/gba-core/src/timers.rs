//! The four 16-bit timers with prescalers and count-up cascading

use crate::interrupts::{InterruptRegisters, IrqSource};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Default, Encode, Decode)]
struct Timer {
    counter: u16,
    reload: u16,
    prescaler: u8,
    count_up: bool,
    irq_enabled: bool,
    enabled: bool,
    prescaler_counter: u16,
}

impl Timer {
    fn prescaler_period(&self) -> u16 {
        match self.prescaler {
            0 => 1,
            1 => 64,
            2 => 256,
            _ => 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct Timers {
    timers: [Timer; 4],
    /// Set when a timer overflowed this tick; consumed by the APU FIFO logic
    pub(crate) overflowed: [bool; 4],
}

impl Timers {
    pub(crate) fn tick(&mut self, cycles: u32, interrupts: &mut InterruptRegisters) {
        self.overflowed = [false; 4];

        for _ in 0..cycles {
            let mut previous_overflowed = false;
            for index in 0..4 {
                let timer = &mut self.timers[index];
                if !timer.enabled {
                    previous_overflowed = false;
                    continue;
                }

                let should_tick = if timer.count_up && index > 0 {
                    previous_overflowed
                } else {
                    timer.prescaler_counter += 1;
                    if timer.prescaler_counter >= timer.prescaler_period() {
                        timer.prescaler_counter = 0;
                        true
                    } else {
                        false
                    }
                };

                previous_overflowed = false;
                if should_tick {
                    let (counter, overflowed) = timer.counter.overflowing_add(1);
                    timer.counter = if overflowed { timer.reload } else { counter };
                    if overflowed {
                        self.overflowed[index] = true;
                        previous_overflowed = true;
                        if timer.irq_enabled {
                            interrupts.set_flag(match index {
                                0 => IrqSource::Timer0,
                                1 => IrqSource::Timer1,
                                2 => IrqSource::Timer2,
                                _ => IrqSource::Timer3,
                            });
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn read_register(&self, address: u32) -> u8 {
        let index = ((address - 0x0400_0100) / 4) as usize;
        let timer = &self.timers[index & 3];
        match address & 3 {
            0 => timer.counter as u8,
            1 => (timer.counter >> 8) as u8,
            2 => {
                timer.prescaler
                    | (u8::from(timer.count_up) << 2)
                    | (u8::from(timer.irq_enabled) << 6)
                    | (u8::from(timer.enabled) << 7)
            }
            _ => 0,
        }
    }

    pub(crate) fn write_register(&mut self, address: u32, value: u8) {
        let index = ((address - 0x0400_0100) / 4) as usize;
        let timer = &mut self.timers[index & 3];
        match address & 3 {
            0 => timer.reload = (timer.reload & 0xFF00) | u16::from(value),
            1 => timer.reload = (timer.reload & 0x00FF) | (u16::from(value) << 8),
            2 => {
                let was_enabled = timer.enabled;
                timer.prescaler = value & 0x03;
                timer.count_up = value.bit(2);
                timer.irq_enabled = value.bit(6);
                timer.enabled = value.bit(7);
                if timer.enabled && !was_enabled {
                    timer.counter = timer.reload;
                    timer.prescaler_counter = 0;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_reloads_and_raises_irq() {
        let mut timers = Timers::default();
        let mut interrupts = InterruptRegisters::default();
        timers.write_register(0x0400_0100, 0xFE); // reload 0xFFFE
        timers.write_register(0x0400_0101, 0xFF);
        timers.write_register(0x0400_0102, 0xC0); // enable + irq

        timers.tick(2, &mut interrupts);
        assert!(timers.overflowed[0]);
        assert_eq!(timers.timers[0].counter, 0xFFFE);
        assert!(interrupts.flags & (1 << 3) != 0);
    }

    #[test]
    fn count_up_cascade() {
        let mut timers = Timers::default();
        let mut interrupts = InterruptRegisters::default();
        timers.write_register(0x0400_0100, 0xFF);
        timers.write_register(0x0400_0101, 0xFF);
        timers.write_register(0x0400_0102, 0x80);
        // Timer 1 in count-up mode
        timers.write_register(0x0400_0106, 0x84);

        timers.tick(1, &mut interrupts);
        assert_eq!(timers.timers[1].counter, 1);
    }
}
