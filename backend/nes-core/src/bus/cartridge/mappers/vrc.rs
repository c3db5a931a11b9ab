//! Konami VRC mappers: VRC2/VRC4 (mappers 21/22/23/25) and VRC6 (mappers 24/26)
//!
//! The VRC IRQ counter is shared between the families: a prescaler of 341/3 CPU cycles in
//! scanline mode, or one clock per CPU cycle in cycle mode.

use crate::bus::cartridge::mappers::{
    BankSizeKb, ChrType, CpuMapResult, NametableMirroring, PpuMapResult,
};
use crate::bus::cartridge::{HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct VrcIrqCounter {
    counter: u8,
    reload_value: u8,
    enabled: bool,
    enabled_after_ack: bool,
    cycle_mode: bool,
    prescaler: i16,
    flag: bool,
}

impl VrcIrqCounter {
    fn write_latch_low(&mut self, value: u8) {
        self.reload_value = (self.reload_value & 0xF0) | (value & 0x0F);
    }

    fn write_latch_high(&mut self, value: u8) {
        self.reload_value = (self.reload_value & 0x0F) | (value << 4);
    }

    fn write_latch(&mut self, value: u8) {
        self.reload_value = value;
    }

    fn write_control(&mut self, value: u8) {
        self.enabled_after_ack = value.bit(0);
        self.enabled = value.bit(1);
        self.cycle_mode = value.bit(2);
        self.flag = false;

        if self.enabled {
            self.counter = self.reload_value;
            self.prescaler = 341;
        }
    }

    fn acknowledge(&mut self) {
        self.flag = false;
        self.enabled = self.enabled_after_ack;
    }

    fn tick_cpu(&mut self) {
        if !self.enabled {
            return;
        }

        if !self.cycle_mode {
            self.prescaler -= 3;
            if self.prescaler > 0 {
                return;
            }
            self.prescaler += 341;
        }

        if self.counter == 0xFF {
            self.counter = self.reload_value;
            self.flag = true;
        } else {
            self.counter += 1;
        }
    }
}

// VRC4 (and VRC2) ---------------------------------------------------------------------------

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Vrc4 {
    mapper_number: u16,
    chr_type: ChrType,
    prg_bank_0: u8,
    prg_bank_1: u8,
    prg_swap_mode: bool,
    chr_banks: [u16; 8],
    nametable_mirroring: NametableMirroring,
    irq: VrcIrqCounter,
}

impl Vrc4 {
    pub(crate) fn new(mapper_number: u16, chr_type: ChrType) -> Self {
        Self {
            mapper_number,
            chr_type,
            prg_bank_0: 0,
            prg_bank_1: 0,
            prg_swap_mode: false,
            chr_banks: [0; 8],
            nametable_mirroring: NametableMirroring::Vertical,
            irq: VrcIrqCounter::default(),
        }
    }

    /// Normalize the scrambled A0/A1 register lines per mapper number into bits 0-1.
    fn register_select(&self, address: u16) -> u16 {
        let (a0, a1) = match self.mapper_number {
            // VRC4a/c (21): A1/A2 or A6/A7
            21 => (address.bit(1) || address.bit(6), address.bit(2) || address.bit(7)),
            // VRC2a (22): A1/A0 swapped
            22 => (address.bit(1), address.bit(0)),
            // VRC4f/e (23): A0/A1 or A2/A3
            23 => (address.bit(0) || address.bit(2), address.bit(1) || address.bit(3)),
            // VRC4b/d (25): A1/A0 or A3/A2
            25 => (address.bit(1) || address.bit(3), address.bit(0) || address.bit(2)),
            _ => (address.bit(0), address.bit(1)),
        };
        (address & 0xF000) | (u16::from(a1) << 1) | u16::from(a0)
    }

    fn is_vrc2(&self) -> bool {
        self.mapper_number == 22
    }
}

impl MapperImpl<Vrc4> {
    fn map_cpu_address(&self, address: u16) -> CpuMapResult {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x5FFF => CpuMapResult::None,
            0x6000..=0x7FFF => {
                if self.cartridge.prg_ram_is_empty() {
                    CpuMapResult::None
                } else {
                    CpuMapResult::PrgRAM(u32::from(address & 0x1FFF))
                }
            }
            0x8000..=0x9FFF => {
                let bank = if self.data.prg_swap_mode {
                    return CpuMapResult::PrgROM(BankSizeKb::Eight.to_absolute_address_from_end(
                        2_u32,
                        self.cartridge.prg_rom_len(),
                        address,
                    ));
                } else {
                    self.data.prg_bank_0
                };
                CpuMapResult::PrgROM(BankSizeKb::Eight.to_absolute_address(bank, address))
            }
            0xA000..=0xBFFF => CpuMapResult::PrgROM(
                BankSizeKb::Eight.to_absolute_address(self.data.prg_bank_1, address),
            ),
            0xC000..=0xDFFF => {
                if self.data.prg_swap_mode {
                    CpuMapResult::PrgROM(
                        BankSizeKb::Eight.to_absolute_address(self.data.prg_bank_0, address),
                    )
                } else {
                    CpuMapResult::PrgROM(BankSizeKb::Eight.to_absolute_address_from_end(
                        2_u32,
                        self.cartridge.prg_rom_len(),
                        address,
                    ))
                }
            }
            0xE000..=0xFFFF => CpuMapResult::PrgROM(
                BankSizeKb::Eight
                    .to_absolute_address_last_bank(self.cartridge.prg_rom_len(), address),
            ),
        }
    }

    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        self.map_cpu_address(address).read(&self.cartridge).unwrap_or(cpu_open_bus)
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        if let 0x6000..=0x7FFF = address {
            self.map_cpu_address(address).write(value, &mut self.cartridge);
            return;
        }
        if address < 0x8000 {
            return;
        }

        let normalized = self.data.register_select(address);
        match normalized {
            0x8000..=0x8003 => self.data.prg_bank_0 = value & 0x1F,
            0x9000 | 0x9001 if !self.data.is_vrc2() => {
                self.data.nametable_mirroring = match value & 0x03 {
                    0x00 => NametableMirroring::Vertical,
                    0x01 => NametableMirroring::Horizontal,
                    0x02 => NametableMirroring::SingleScreenBank0,
                    0x03 => NametableMirroring::SingleScreenBank1,
                    _ => unreachable!("value & 0x03 is always <= 0x03"),
                };
            }
            0x9000..=0x9003 if self.data.is_vrc2() => {
                self.data.nametable_mirroring = if value.bit(0) {
                    NametableMirroring::Horizontal
                } else {
                    NametableMirroring::Vertical
                };
            }
            0x9002 | 0x9003 => {
                self.data.prg_swap_mode = value.bit(1);
            }
            0xA000..=0xA003 => self.data.prg_bank_1 = value & 0x1F,
            0xB000..=0xE003 => {
                // CHR bank registers: two writes per 4-bit half, register pairs per 1KB bank
                let register = (2 * ((normalized >> 12) - 0xB) + ((normalized & 0x02) >> 1)) as usize;
                let low_half = normalized & 0x01 == 0;
                let current = self.data.chr_banks[register];
                self.data.chr_banks[register] = if low_half {
                    (current & 0x1F0) | u16::from(value & 0x0F)
                } else {
                    (current & 0x00F) | (u16::from(value & 0x1F) << 4)
                };
            }
            0xF000 => self.data.irq.write_latch_low(value),
            0xF001 => self.data.irq.write_latch_high(value),
            0xF002 => self.data.irq.write_control(value),
            0xF003 => self.data.irq.acknowledge(),
            _ => {}
        }
    }

    pub(crate) fn tick_cpu(&mut self) {
        self.data.irq.tick_cpu();
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        self.data.irq.flag
    }
}

impl HasBasicPpuMapping for MapperImpl<Vrc4> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => {
                let register = (address >> 10) as usize;
                let mut bank = self.data.chr_banks[register];
                if self.data.is_vrc2() {
                    // VRC2a drops the low bank bit (CHR A10 is wired to the register's bit 1)
                    bank >>= 1;
                }
                self.data
                    .chr_type
                    .to_map_result(BankSizeKb::One.to_absolute_address(bank, address))
            }
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}

// VRC6 --------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Encode, Decode)]
struct Vrc6PulseChannel {
    volume: u8,
    duty: u8,
    mode: bool,
    enabled: bool,
    period: u16,
    timer: u16,
    duty_position: u8,
}

impl Vrc6PulseChannel {
    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        if self.timer == 0 {
            self.timer = self.period;
            self.duty_position = (self.duty_position + 1) & 0x0F;
        } else {
            self.timer -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        if self.mode || self.duty_position <= self.duty { self.volume } else { 0 }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct Vrc6SawChannel {
    accumulator_rate: u8,
    accumulator: u8,
    enabled: bool,
    period: u16,
    timer: u16,
    step: u8,
}

impl Vrc6SawChannel {
    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        if self.timer == 0 {
            self.timer = self.period;
            self.step += 1;
            if self.step == 14 {
                self.step = 0;
                self.accumulator = 0;
            } else if self.step % 2 == 0 {
                self.accumulator = self.accumulator.wrapping_add(self.accumulator_rate);
            }
        } else {
            self.timer -= 1;
        }
    }

    fn output(&self) -> u8 {
        if self.enabled { self.accumulator >> 3 } else { 0 }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Vrc6 {
    mapper_number: u16,
    chr_type: ChrType,
    prg_16kb_bank: u8,
    prg_8kb_bank: u8,
    chr_banks: [u8; 8],
    nametable_mirroring: NametableMirroring,
    irq: VrcIrqCounter,
    pulse1: Vrc6PulseChannel,
    pulse2: Vrc6PulseChannel,
    saw: Vrc6SawChannel,
}

impl Vrc6 {
    pub(crate) fn new(mapper_number: u16, chr_type: ChrType) -> Self {
        Self {
            mapper_number,
            chr_type,
            prg_16kb_bank: 0,
            prg_8kb_bank: 0,
            chr_banks: [0; 8],
            nametable_mirroring: NametableMirroring::Vertical,
            irq: VrcIrqCounter::default(),
            pulse1: Vrc6PulseChannel::default(),
            pulse2: Vrc6PulseChannel::default(),
            saw: Vrc6SawChannel::default(),
        }
    }

    /// Mapper 26 swaps A0/A1.
    fn normalize(&self, address: u16) -> u16 {
        if self.mapper_number == 26 {
            (address & 0xFFFC) | ((address & 0x01) << 1) | ((address & 0x02) >> 1)
        } else {
            address
        }
    }
}

impl MapperImpl<Vrc6> {
    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x5FFF => cpu_open_bus,
            0x6000..=0x7FFF => {
                if self.cartridge.prg_ram_is_empty() {
                    cpu_open_bus
                } else {
                    self.cartridge.get_prg_ram(u32::from(address & 0x1FFF))
                }
            }
            0x8000..=0xBFFF => self.cartridge.get_prg_rom(
                BankSizeKb::Sixteen.to_absolute_address(self.data.prg_16kb_bank, address),
            ),
            0xC000..=0xDFFF => self.cartridge.get_prg_rom(
                BankSizeKb::Eight.to_absolute_address(self.data.prg_8kb_bank, address),
            ),
            0xE000..=0xFFFF => self.cartridge.get_prg_rom(
                BankSizeKb::Eight
                    .to_absolute_address_last_bank(self.cartridge.prg_rom_len(), address),
            ),
        }
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        if let 0x6000..=0x7FFF = address {
            self.cartridge.set_prg_ram(u32::from(address & 0x1FFF), value);
            return;
        }
        if address < 0x8000 {
            return;
        }

        let normalized = self.data.normalize(address) & 0xF003;
        match normalized {
            0x8000..=0x8003 => self.data.prg_16kb_bank = value & 0x0F,
            0x9000 => {
                self.data.pulse1.volume = value & 0x0F;
                self.data.pulse1.duty = (value >> 4) & 0x07;
                self.data.pulse1.mode = value.bit(7);
            }
            0x9001 => {
                self.data.pulse1.period = (self.data.pulse1.period & 0x0F00) | u16::from(value);
            }
            0x9002 => {
                self.data.pulse1.period =
                    (self.data.pulse1.period & 0x00FF) | (u16::from(value & 0x0F) << 8);
                self.data.pulse1.enabled = value.bit(7);
            }
            0xA000 => {
                self.data.pulse2.volume = value & 0x0F;
                self.data.pulse2.duty = (value >> 4) & 0x07;
                self.data.pulse2.mode = value.bit(7);
            }
            0xA001 => {
                self.data.pulse2.period = (self.data.pulse2.period & 0x0F00) | u16::from(value);
            }
            0xA002 => {
                self.data.pulse2.period =
                    (self.data.pulse2.period & 0x00FF) | (u16::from(value & 0x0F) << 8);
                self.data.pulse2.enabled = value.bit(7);
            }
            0xB000 => self.data.saw.accumulator_rate = value & 0x3F,
            0xB001 => {
                self.data.saw.period = (self.data.saw.period & 0x0F00) | u16::from(value);
            }
            0xB002 => {
                self.data.saw.period =
                    (self.data.saw.period & 0x00FF) | (u16::from(value & 0x0F) << 8);
                self.data.saw.enabled = value.bit(7);
            }
            0xB003 => {
                self.data.nametable_mirroring = match (value >> 2) & 0x03 {
                    0x00 => NametableMirroring::Vertical,
                    0x01 => NametableMirroring::Horizontal,
                    0x02 => NametableMirroring::SingleScreenBank0,
                    0x03 => NametableMirroring::SingleScreenBank1,
                    _ => unreachable!("value & 0x03 is always <= 0x03"),
                };
            }
            0xC000..=0xC003 => self.data.prg_8kb_bank = value & 0x1F,
            0xD000..=0xD003 => {
                self.data.chr_banks[(normalized & 0x03) as usize] = value;
            }
            0xE000..=0xE003 => {
                self.data.chr_banks[4 + (normalized & 0x03) as usize] = value;
            }
            0xF000 => self.data.irq.write_latch(value),
            0xF001 => self.data.irq.write_control(value),
            0xF002 => self.data.irq.acknowledge(),
            _ => {}
        }
    }

    pub(crate) fn tick_cpu(&mut self) {
        self.data.irq.tick_cpu();
        self.data.pulse1.tick();
        self.data.pulse2.tick();
        self.data.saw.tick();
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        self.data.irq.flag
    }

    /// Mix the VRC6 expansion channels into the APU output.
    pub(crate) fn sample_audio(&self, mixed_apu_sample: f64) -> f64 {
        let expansion = f64::from(
            self.data.pulse1.output() + self.data.pulse2.output() + self.data.saw.output(),
        );
        mixed_apu_sample - expansion / 61.0
    }
}

impl HasBasicPpuMapping for MapperImpl<Vrc6> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => {
                let bank = self.data.chr_banks[(address >> 10) as usize];
                self.data
                    .chr_type
                    .to_map_result(BankSizeKb::One.to_absolute_address(bank, address))
            }
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => unreachable!("palette addresses are handled by the PPU"),
        }
    }
}
