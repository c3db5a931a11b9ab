//! Main bus: address decoding and per-M-cycle component clocking

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::dma::{OamDma, VramDma};
use crate::interrupts::InterruptRegisters;
use crate::ppu::{Ppu, PpuMode};
use crate::serial::SerialPort;
use crate::sm83::{self, InterruptType};
use crate::timer::GbTimer;
use crate::{GameBoyInputs, HardwareMode};
use bincode::{Decode, Encode};
use retrocore_common::boxedarray::BoxedByteArray;
use retrocore_common::num::GetBit;
use retrocore_proc_macros::PartialClone;

const WRAM_LEN: usize = 0x8000;

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Bus {
    pub(crate) hardware_mode: HardwareMode,
    #[partial_clone(partial)]
    pub(crate) cartridge: Cartridge,
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) timer: GbTimer,
    pub(crate) serial: SerialPort,
    pub(crate) interrupts: InterruptRegisters,
    oam_dma: OamDma,
    vram_dma: VramDma,
    wram: BoxedByteArray<WRAM_LEN>,
    wram_bank: u8,
    hram: [u8; 127],
    joypad_select: u8,
    inputs: GameBoyInputs,
    pub(crate) double_speed: bool,
    speed_switch_armed: bool,
    prev_ppu_mode: PpuMode,
    apu_phase: bool,
}

impl Bus {
    pub(crate) fn new(hardware_mode: HardwareMode, cartridge: Cartridge) -> Self {
        Self {
            hardware_mode,
            cartridge,
            ppu: Ppu::new(hardware_mode),
            apu: Apu::new(),
            timer: GbTimer::new(),
            serial: SerialPort::default(),
            interrupts: InterruptRegisters::default(),
            oam_dma: OamDma::default(),
            vram_dma: VramDma::default(),
            wram: BoxedByteArray::new(),
            wram_bank: 1,
            hram: [0; 127],
            joypad_select: 0x30,
            inputs: GameBoyInputs::default(),
            double_speed: false,
            speed_switch_armed: false,
            prev_ppu_mode: PpuMode::OamScan,
            apu_phase: false,
        }
    }

    pub(crate) fn set_inputs(&mut self, inputs: GameBoyInputs) {
        let any_pressed = |i: &GameBoyInputs| {
            i.a || i.b || i.select || i.start || i.up || i.down || i.left || i.right
        };
        if !any_pressed(&self.inputs) && any_pressed(&inputs) {
            self.interrupts.set_flag(InterruptType::Joypad);
        }
        self.inputs = inputs;
        self.cartridge.set_inputs(inputs.tilt_x, inputs.tilt_y);
    }

    /// STOP executes a speed switch when KEY1 is armed.
    pub(crate) fn maybe_switch_speed(&mut self) {
        if self.hardware_mode == HardwareMode::Cgb && self.speed_switch_armed {
            self.double_speed = !self.double_speed;
            self.speed_switch_armed = false;
            log::debug!("speed switched; double speed: {}", self.double_speed);
        }
    }

    /// Advance one CPU M-cycle worth of component time.
    pub(crate) fn tick_m_cycle(&mut self) {
        self.timer.tick_m_cycle(&mut self.interrupts);
        self.serial.tick_m_cycle(&mut self.interrupts);

        // In double speed the CPU runs twice as fast as the PPU and APU
        let ppu_dots: u8 = if self.double_speed { 2 } else { 4 };
        self.apu_phase = !self.apu_phase;
        if !self.double_speed || self.apu_phase {
            self.apu.tick_m_cycle();
        }

        for _ in 0..ppu_dots {
            let mode = self.ppu.tick(&mut self.interrupts);
            if mode == PpuMode::HBlank && self.prev_ppu_mode != PpuMode::HBlank {
                self.vram_dma.notify_hblank();
            }
            self.prev_ppu_mode = mode;
        }

        // OAM DMA moves one byte per M-cycle
        if let Some((source, offset)) = self.oam_dma.next_transfer() {
            let value = self.read_for_dma(source);
            self.ppu.write_oam_dma(offset, value);
        }

        // CGB VRAM DMA: general-purpose runs to completion block by block, HDMA one block
        // per hblank
        if self.hardware_mode == HardwareMode::Cgb {
            while let Some((source, destination)) = self.vram_dma.take_pending_block() {
                for i in 0..16 {
                    let value = self.read_for_dma(source.wrapping_add(i));
                    self.ppu.write_vram_dma(destination.wrapping_add(i), value);
                }
            }
        }
    }

    fn read_for_dma(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x7FFF => self.cartridge.read_rom(address),
            0x8000..=0x9FFF => 0xFF,
            0xA000..=0xBFFF => self.cartridge.read_ram(address),
            0xC000..=0xFDFF => self.wram[wram_index(address, self.wram_bank)],
            _ => 0xFF,
        }
    }
}

fn wram_index(address: u16, bank: u8) -> usize {
    let offset = (address & 0x1FFF) as usize;
    if offset < 0x1000 {
        offset
    } else {
        usize::from(bank.max(1)) * 0x1000 + (offset - 0x1000)
    }
}

impl sm83::BusInterface for Bus {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0x7FFF => self.cartridge.read_rom(address),
            0x8000..=0x9FFF => self.ppu.read_vram(address),
            0xA000..=0xBFFF => self.cartridge.read_ram(address),
            0xC000..=0xFDFF => self.wram[wram_index(address, self.wram_bank)],
            0xFE00..=0xFE9F => {
                if self.oam_dma.is_active() {
                    0xFF
                } else {
                    self.ppu.read_oam(address)
                }
            }
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => {
                // Joypad: low nibble active-low, selected by bits 4-5
                let mut value = 0xC0 | self.joypad_select | 0x0F;
                if !self.joypad_select.bit(4) {
                    value &= !(u8::from(self.inputs.right)
                        | (u8::from(self.inputs.left) << 1)
                        | (u8::from(self.inputs.up) << 2)
                        | (u8::from(self.inputs.down) << 3));
                }
                if !self.joypad_select.bit(5) {
                    value &= !(u8::from(self.inputs.a)
                        | (u8::from(self.inputs.b) << 1)
                        | (u8::from(self.inputs.select) << 2)
                        | (u8::from(self.inputs.start) << 3));
                }
                value
            }
            0xFF01 => self.serial.read_sb(),
            0xFF02 => self.serial.read_sc(),
            0xFF04 => self.timer.read_div(),
            0xFF05 => self.timer.read_tima(),
            0xFF06 => self.timer.read_tma(),
            0xFF07 => self.timer.read_tac(),
            0xFF0F => self.interrupts.read_if(),
            0xFF10..=0xFF3F => self.apu.read_register(address),
            0xFF46 => self.oam_dma.read_register(),
            0xFF4D => {
                if self.hardware_mode == HardwareMode::Cgb {
                    0x7E | (u8::from(self.double_speed) << 7) | u8::from(self.speed_switch_armed)
                } else {
                    0xFF
                }
            }
            0xFF55 => {
                if self.hardware_mode == HardwareMode::Cgb {
                    self.vram_dma.read_control()
                } else {
                    0xFF
                }
            }
            0xFF70 => {
                if self.hardware_mode == HardwareMode::Cgb {
                    0xF8 | self.wram_bank
                } else {
                    0xFF
                }
            }
            0xFF40..=0xFF6C => self.ppu.read_register(address),
            0xFF80..=0xFFFE => self.hram[(address - 0xFF80) as usize],
            0xFFFF => self.interrupts.read_ie(),
            _ => 0xFF,
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x7FFF => self.cartridge.write_rom(address, value),
            0x8000..=0x9FFF => self.ppu.write_vram(address, value),
            0xA000..=0xBFFF => self.cartridge.write_ram(address, value),
            0xC000..=0xFDFF => {
                self.wram[wram_index(address, self.wram_bank)] = value;
            }
            0xFE00..=0xFE9F => self.ppu.write_oam(address, value),
            0xFEA0..=0xFEFF => {}
            0xFF00 => {
                self.joypad_select = value & 0x30;
            }
            0xFF01 => self.serial.write_sb(value),
            0xFF02 => self.serial.write_sc(value),
            0xFF04 => self.timer.write_div(),
            0xFF05 => self.timer.write_tima(value),
            0xFF06 => self.timer.write_tma(value),
            0xFF07 => self.timer.write_tac(value),
            0xFF0F => self.interrupts.write_if(value),
            0xFF10..=0xFF3F => self.apu.write_register(address, value),
            0xFF46 => self.oam_dma.start(value),
            0xFF4D => {
                if self.hardware_mode == HardwareMode::Cgb {
                    self.speed_switch_armed = value.bit(0);
                }
            }
            0xFF51 => self.vram_dma.write_source_high(value),
            0xFF52 => self.vram_dma.write_source_low(value),
            0xFF53 => self.vram_dma.write_destination_high(value),
            0xFF54 => self.vram_dma.write_destination_low(value),
            0xFF55 => {
                if self.hardware_mode == HardwareMode::Cgb {
                    self.vram_dma.write_control(value);
                }
            }
            0xFF70 => {
                if self.hardware_mode == HardwareMode::Cgb {
                    self.wram_bank = (value & 0x07).max(1);
                }
            }
            0xFF40..=0xFF6C => self.ppu.write_register(address, value),
            0xFF80..=0xFFFE => {
                self.hram[(address - 0xFF80) as usize] = value;
            }
            0xFFFF => self.interrupts.write_ie(value),
            _ => {}
        }
    }

    fn interrupt_flags(&self) -> u8 {
        self.interrupts.flags_mask()
    }

    fn interrupt_enable(&self) -> u8 {
        self.interrupts.enabled_mask()
    }

    fn acknowledge_interrupt(&mut self, mask: u8) {
        self.interrupts.clear_flag_mask(mask);
    }
}
