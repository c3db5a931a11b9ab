//! Physical memory map: HuCard ROM, work RAM, save RAM, and the hardware page at $FF

use crate::psg::Psg;
use crate::vdc::Vdc;
use crate::PceInputs;
use bincode::{Decode, Encode};
use huc6280_emu::BusInterface;
use retrocore_common::frontend::PartialClone;
use retrocore_common::num::GetBit;
use retrocore_proc_macros::{FakeDecode, FakeEncode};
use std::ops::Deref;

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
pub(crate) struct Rom(pub(crate) Box<[u8]>);

impl Deref for Rom {
    type Target = Box<[u8]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Bus {
    #[partial_clone(default)]
    pub(crate) rom: Rom,
    pub(crate) work_ram: Vec<u8>,
    pub(crate) save_ram: Vec<u8>,
    save_ram_dirty: bool,
    pub(crate) vdc: Vdc,
    pub(crate) psg: Psg,
    pub(crate) inputs: PceInputs,
    joypad_select: bool,
    joypad_clear: bool,
    // Timer
    timer_reload: u8,
    timer_counter: u8,
    timer_enabled: bool,
    timer_prescaler: u16,
    timer_irq: bool,
    // IRQ disable register
    irq_disable: u8,
    /// Streaming-ROM mapper used by the Street Fighter II' HuCard
    sf2_bank: u8,
}

impl Bus {
    pub(crate) fn new(rom: Box<[u8]>) -> Self {
        Self {
            rom: Rom(rom),
            work_ram: vec![0; 0x2000],
            save_ram: vec![0; 0x800],
            save_ram_dirty: false,
            vdc: Vdc::new(),
            psg: Psg::new(),
            inputs: PceInputs::default(),
            joypad_select: false,
            joypad_clear: false,
            timer_reload: 0,
            timer_counter: 0,
            timer_enabled: false,
            timer_prescaler: 0,
            timer_irq: false,
            irq_disable: 0,
            sf2_bank: 0,
        }
    }

    /// Tick the timer at CPU rate; the counter decrements every 1024 cycles.
    pub(crate) fn tick_timer(&mut self, cycles: u32) {
        if !self.timer_enabled {
            return;
        }
        self.timer_prescaler += cycles as u16;
        while self.timer_prescaler >= 1024 {
            self.timer_prescaler -= 1024;
            if self.timer_counter == 0 {
                self.timer_counter = self.timer_reload;
                self.timer_irq = true;
            } else {
                self.timer_counter -= 1;
            }
        }
    }

    fn joypad_value(&self) -> u8 {
        // Active low, multiplexed by the select line
        if self.joypad_clear {
            return 0;
        }
        if self.joypad_select {
            // Directions
            !(u8::from(self.inputs.up)
                | (u8::from(self.inputs.right) << 1)
                | (u8::from(self.inputs.down) << 2)
                | (u8::from(self.inputs.left) << 3))
                & 0x0F
        } else {
            !(u8::from(self.inputs.button1)
                | (u8::from(self.inputs.button2) << 1)
                | (u8::from(self.inputs.select) << 2)
                | (u8::from(self.inputs.run) << 3))
                & 0x0F
        }
    }

    pub(crate) fn take_save_ram_dirty(&mut self) -> bool {
        std::mem::take(&mut self.save_ram_dirty)
    }
}

impl BusInterface for Bus {
    fn read(&mut self, address: u32) -> u8 {
        let page = (address >> 13) as u16;
        let offset = (address & 0x1FFF) as u16;

        match page {
            // HuCard ROM
            0x00..=0x7F => {
                // SF2 mapper: pages $40-$7F window into the banked upper half
                let linear = if self.rom.len() > 0x100000 && page >= 0x40 {
                    (usize::from(self.sf2_bank) + 1) * 0x80000
                        + ((usize::from(page - 0x40) << 13) | usize::from(offset))
                            % 0x80000
                } else {
                    (usize::from(page) << 13) | usize::from(offset)
                };
                self.rom[linear % self.rom.len().max(1)]
            }
            // Save RAM
            0xF7 => {
                let value = self.save_ram[usize::from(offset) % self.save_ram.len()];
                value
            }
            // Work RAM
            0xF8..=0xFB => self.work_ram[usize::from(offset)],
            // Hardware page
            0xFF => match offset & 0x1C00 {
                0x0000 => {
                    let Bus { vdc, .. } = self;
                    vdc.read_port(offset)
                }
                0x0400 => self.vdc.read_vce(offset),
                0x0800 => 0xFF,
                0x0C00 => {
                    if offset & 1 == 0 {
                        self.timer_counter
                    } else {
                        0
                    }
                }
                0x1000 => 0xB0 | self.joypad_value(),
                0x1400 => match offset & 0x03 {
                    2 => self.irq_disable,
                    3 => {
                        // IRQ status: bit 2 timer, bit 1 IRQ1 (VDC), bit 0 IRQ2
                        (u8::from(self.timer_irq) << 2) | (u8::from(self.vdc.irq_line()) << 1)
                    }
                    _ => 0,
                },
                _ => 0xFF,
            },
            _ => 0xFF,
        }
    }

    fn write(&mut self, address: u32, value: u8) {
        let page = (address >> 13) as u16;
        let offset = (address & 0x1FFF) as u16;

        match page {
            0x00..=0x7F => {
                // SF2 mapper bank select at $1FF0-$1FF3
                if (0x1FF0..=0x1FF3).contains(&offset) {
                    self.sf2_bank = (offset & 0x03) as u8;
                }
            }
            0xF7 => {
                let index = usize::from(offset) % self.save_ram.len();
                self.save_ram[index] = value;
                self.save_ram_dirty = true;
            }
            0xF8..=0xFB => self.work_ram[usize::from(offset)] = value,
            0xFF => match offset & 0x1C00 {
                0x0000 => self.vdc.write_port(offset, value),
                0x0400 => self.vdc.write_vce(offset, value),
                0x0800 => self.psg.write_register(offset, value),
                0x0C00 => {
                    if offset & 1 == 0 {
                        self.timer_reload = value & 0x7F;
                    } else {
                        let was_enabled = self.timer_enabled;
                        self.timer_enabled = value.bit(0);
                        if self.timer_enabled && !was_enabled {
                            self.timer_counter = self.timer_reload;
                            self.timer_prescaler = 0;
                        }
                    }
                }
                0x1000 => {
                    self.joypad_select = value.bit(0);
                    self.joypad_clear = value.bit(1);
                }
                0x1400 => match offset & 0x03 {
                    2 => self.irq_disable = value & 0x07,
                    3 => self.timer_irq = false,
                    _ => {}
                },
                _ => {}
            },
            _ => {}
        }
    }

    fn st_port(&mut self, port: u8, value: u8) {
        self.vdc.write_port(u16::from(port), value);
    }

    fn irq1(&self) -> bool {
        self.vdc.irq_line() && !self.irq_disable.bit(1)
    }

    fn irq2(&self) -> bool {
        false
    }

    fn timer_irq(&self) -> bool {
        self.timer_irq && !self.irq_disable.bit(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_underflow_raises_irq_and_reloads() {
        let mut bus = Bus::new(vec![0; 0x2000].into_boxed_slice());
        bus.write(0xFF << 13 | 0x0C00, 2);
        bus.write(0xFF << 13 | 0x0C01, 1);

        bus.tick_timer(1024 * 4);
        assert!(!bus.timer_irq);
        bus.tick_timer(1024);
        assert!(BusInterface::timer_irq(&bus) || bus.timer_irq);

        // Acknowledge
        bus.write(0xFF << 13 | 0x1403, 0);
        assert!(!bus.timer_irq);
    }

    #[test]
    fn joypad_multiplexes_directions_and_buttons() {
        let mut bus = Bus::new(vec![0; 0x2000].into_boxed_slice());
        bus.inputs.run = true;
        bus.write(0xFF << 13 | 0x1000, 0x00); // buttons
        assert_eq!(bus.read(0xFF << 13 | 0x1000) & 0x08, 0);

        bus.inputs.up = true;
        bus.write(0xFF << 13 | 0x1000, 0x01); // directions
        assert_eq!(bus.read(0xFF << 13 | 0x1000) & 0x01, 0);
    }
}
