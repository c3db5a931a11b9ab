//! HuC6280 PSG: six wavetable channels, noise mode on channels 5-6, and the LFO

use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
struct PsgChannel {
    frequency: u16,
    control: u8,
    balance: u8,
    wavetable: [u8; 32],
    wave_position: u8,
    wave_write_index: u8,
    timer: u16,
    noise_control: u8,
    noise_lfsr: u32,
    noise_timer: u16,
}

impl Default for PsgChannel {
    fn default() -> Self {
        Self {
            frequency: 0,
            control: 0,
            balance: 0xFF,
            wavetable: [0; 32],
            wave_position: 0,
            wave_write_index: 0,
            timer: 0,
            noise_control: 0,
            noise_lfsr: 1,
            noise_timer: 0,
        }
    }
}

impl PsgChannel {
    fn enabled(&self) -> bool {
        self.control.bit(7)
    }

    fn tick(&mut self, can_noise: bool) {
        if !self.enabled() {
            return;
        }

        if can_noise && self.noise_control.bit(7) {
            if self.noise_timer == 0 {
                let freq = u16::from(!self.noise_control & 0x1F) << 6;
                self.noise_timer = freq.max(32);
                let feedback = (self.noise_lfsr ^ (self.noise_lfsr >> 1)) & 1;
                self.noise_lfsr = (self.noise_lfsr >> 1) | (feedback << 17);
            } else {
                self.noise_timer -= 1;
            }
            return;
        }

        if self.timer == 0 {
            self.timer = self.frequency.max(1);
            self.wave_position = (self.wave_position + 1) & 0x1F;
        } else {
            self.timer -= 1;
        }
    }

    fn output(&self, can_noise: bool) -> (f64, f64) {
        if !self.enabled() {
            return (0.0, 0.0);
        }

        let sample = if can_noise && self.noise_control.bit(7) {
            if self.noise_lfsr & 1 != 0 { 0x1F } else { 0 }
        } else {
            self.wavetable[usize::from(self.wave_position)]
        };

        let volume = f64::from(self.control & 0x1F) / 31.0;
        let value = (f64::from(sample) / 31.0 * 2.0 - 1.0) * volume;

        let left = f64::from(self.balance >> 4) / 15.0;
        let right = f64::from(self.balance & 0x0F) / 15.0;
        (value * left, value * right)
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct Psg {
    channels: [PsgChannel; 6],
    channel_select: u8,
    main_balance: u8,
    lfo_frequency: u8,
    lfo_control: u8,
    divider: u8,
}

impl Psg {
    pub(crate) fn new() -> Self {
        Self { main_balance: 0xFF, ..Self::default() }
    }

    pub(crate) fn write_register(&mut self, address: u16, value: u8) {
        match address & 0x0F {
            0x0 => self.channel_select = value & 0x07,
            0x1 => self.main_balance = value,
            0x2..=0x7 => {
                let Some(channel) =
                    self.channels.get_mut(usize::from(self.channel_select))
                else {
                    return;
                };
                match address & 0x0F {
                    0x2 => channel.frequency = (channel.frequency & 0x0F00) | u16::from(value),
                    0x3 => {
                        channel.frequency =
                            (channel.frequency & 0x00FF) | (u16::from(value & 0x0F) << 8);
                    }
                    0x4 => {
                        let was_enabled = channel.enabled();
                        channel.control = value;
                        // DDA write mode resets the wave write pointer
                        if !was_enabled && channel.enabled() && value.bit(6) {
                            channel.wave_write_index = 0;
                        }
                        if !channel.enabled() && !value.bit(6) {
                            channel.wave_write_index = 0;
                        }
                    }
                    0x5 => channel.balance = value,
                    0x6 => {
                        let index = usize::from(channel.wave_write_index);
                        channel.wavetable[index] = value & 0x1F;
                        channel.wave_write_index = (channel.wave_write_index + 1) & 0x1F;
                    }
                    0x7 => channel.noise_control = value,
                    _ => unreachable!("masked to 4 bits"),
                }
            }
            0x8 => self.lfo_frequency = value,
            0x9 => self.lfo_control = value,
            _ => {}
        }
    }

    /// Tick one CPU clock; channel timers run at CPU/6.
    pub(crate) fn tick(&mut self) {
        self.divider += 1;
        if self.divider < 6 {
            return;
        }
        self.divider = 0;

        for (i, channel) in self.channels.iter_mut().enumerate() {
            channel.tick(i >= 4);
        }
    }

    pub(crate) fn sample(&self) -> (f64, f64) {
        let mut left = 0.0;
        let mut right = 0.0;
        for (i, channel) in self.channels.iter().enumerate() {
            let (l, r) = channel.output(i >= 4);
            left += l;
            right += r;
        }

        let main_left = f64::from(self.main_balance >> 4) / 15.0;
        let main_right = f64::from(self.main_balance & 0x0F) / 15.0;
        ((left / 6.0 * main_left), (right / 6.0 * main_right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wavetable_write_pointer_wraps() {
        let mut psg = Psg::new();
        psg.write_register(0x800, 0); // select channel 0
        for i in 0..33 {
            psg.write_register(0x806, i);
        }
        // 33rd write wrapped to index 0
        assert_eq!(psg.channels[0].wavetable[0], 32 & 0x1F);
    }

    #[test]
    fn noise_only_on_channels_5_and_6() {
        let mut psg = Psg::new();
        for select in [3_u8, 5] {
            psg.write_register(0x800, select);
            psg.write_register(0x807, 0x9F);
            psg.write_register(0x804, 0x9F);
        }
        for _ in 0..6000 {
            psg.tick();
        }
        assert_eq!(psg.channels[3].noise_lfsr, 1);
        assert_ne!(psg.channels[5].noise_lfsr, 1);
    }
}
