//! Bandai FCG boards (mappers 16, 153, 159): bank registers, a 16-bit countdown IRQ, and the
//! 24C0x serial EEPROM some boards carry for saves

use crate::bus::cartridge::mappers::{
    BankSizeKb, ChrType, CpuMapResult, NametableMirroring, PpuMapResult,
};
use crate::bus::cartridge::{HasBasicPpuMapping, MapperImpl};
use bincode::{Decode, Encode};
use retrocore_common::num::GetBit;

const EEPROM_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum I2cState {
    Idle,
    Address,
    AckAddress,
    WordAddress,
    AckWord,
    Write,
    AckWrite,
    Read,
    AckRead,
}

/// 24C02-style I2C EEPROM: start/stop detection on SDA edges while SCL is high, then 8-bit
/// frames with an ACK slot.
#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct X24C02 {
    memory: [u8; EEPROM_LEN],
    state: I2cState,
    shift: u8,
    bit_count: u8,
    address: u8,
    read_mode: bool,
    sda_out: bool,
    last_sda: bool,
    last_scl: bool,
    dirty: bool,
}

impl X24C02 {
    fn new(initial: Option<&[u8]>) -> Self {
        let mut memory = [0xFF; EEPROM_LEN];
        if let Some(initial) = initial {
            if initial.len() == EEPROM_LEN {
                memory.copy_from_slice(initial);
            }
        }
        Self {
            memory,
            state: I2cState::Idle,
            shift: 0,
            bit_count: 0,
            address: 0,
            read_mode: false,
            sda_out: true,
            last_sda: true,
            last_scl: true,
            dirty: false,
        }
    }

    fn set_lines(&mut self, scl: bool, sda: bool) {
        if self.last_scl && scl {
            if self.last_sda && !sda {
                // Start condition
                self.state = I2cState::Address;
                self.shift = 0;
                self.bit_count = 0;
            } else if !self.last_sda && sda {
                // Stop condition
                self.state = I2cState::Idle;
                self.sda_out = true;
            }
        } else if !self.last_scl && scl {
            self.clock_rising(sda);
        }

        self.last_scl = scl;
        self.last_sda = sda;
    }

    fn clock_rising(&mut self, sda: bool) {
        match self.state {
            I2cState::Idle => {}
            I2cState::Address | I2cState::WordAddress | I2cState::Write => {
                self.shift = (self.shift << 1) | u8::from(sda);
                self.bit_count += 1;
                if self.bit_count == 8 {
                    self.bit_count = 0;
                    match self.state {
                        I2cState::Address => {
                            self.read_mode = self.shift.bit(0);
                            self.state = I2cState::AckAddress;
                        }
                        I2cState::WordAddress => {
                            self.address = self.shift;
                            self.state = I2cState::AckWord;
                        }
                        _ => {
                            self.memory[usize::from(self.address)] = self.shift;
                            self.address = self.address.wrapping_add(1);
                            self.dirty = true;
                            self.state = I2cState::AckWrite;
                        }
                    }
                }
            }
            I2cState::AckAddress => {
                self.sda_out = false;
                // Reads resume from the current address pointer; writes take a word address
                self.state = if self.read_mode {
                    self.shift = self.memory[usize::from(self.address)];
                    I2cState::Read
                } else {
                    I2cState::WordAddress
                };
            }
            I2cState::AckWord | I2cState::AckWrite => {
                self.sda_out = false;
                self.state = I2cState::Write;
            }
            I2cState::Read => {
                self.sda_out = self.shift.bit(7 - self.bit_count);
                self.bit_count += 1;
                if self.bit_count == 8 {
                    self.bit_count = 0;
                    self.address = self.address.wrapping_add(1);
                    self.state = I2cState::AckRead;
                }
            }
            I2cState::AckRead => {
                // Master ACK (SDA low) continues the sequential read
                if !sda {
                    self.shift = self.memory[usize::from(self.address)];
                    self.state = I2cState::Read;
                } else {
                    self.state = I2cState::Idle;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct BandaiFcg {
    mapper_number: u16,
    chr_type: ChrType,
    chr_banks: [u8; 8],
    prg_bank: u8,
    /// Mapper 153 repurposes the CHR registers as a PRG high bit
    prg_high_bit: u8,
    nametable_mirroring: NametableMirroring,
    irq_enabled: bool,
    irq_counter: u16,
    irq_reload: u16,
    irq_flag: bool,
    eeprom: Option<X24C02>,
}

impl BandaiFcg {
    pub(crate) fn new(mapper_number: u16, chr_type: ChrType, sav_bytes: Option<&[u8]>) -> Self {
        // Mappers 16 and 159 carry a serial EEPROM; 153 uses battery PRG RAM instead
        let eeprom = (mapper_number != 153).then(|| X24C02::new(sav_bytes));

        Self {
            mapper_number,
            chr_type,
            chr_banks: [0; 8],
            prg_bank: 0,
            prg_high_bit: 0,
            nametable_mirroring: NametableMirroring::Vertical,
            irq_enabled: false,
            irq_counter: 0,
            irq_reload: 0,
            irq_flag: false,
            eeprom,
        }
    }
}

impl MapperImpl<BandaiFcg> {
    fn map_cpu_address(&self, address: u16) -> CpuMapResult {
        match address {
            0x0000..=0x401F => unreachable!("bus routes only cartridge addresses here"),
            0x4020..=0x5FFF => CpuMapResult::None,
            0x6000..=0x7FFF => {
                if self.data.mapper_number == 153 && !self.cartridge.prg_ram_is_empty() {
                    CpuMapResult::PrgRAM(u32::from(address & 0x1FFF))
                } else {
                    CpuMapResult::None
                }
            }
            0x8000..=0xBFFF => {
                let bank = u32::from(self.data.prg_bank) | (u32::from(self.data.prg_high_bit) << 4);
                CpuMapResult::PrgROM(BankSizeKb::Sixteen.to_absolute_address(bank, address))
            }
            0xC000..=0xFFFF => {
                // Fixed to the last 16KB bank of the current 256KB outer bank
                let last_bank =
                    ((self.cartridge.prg_rom_len() >> 14) - 1).min(0x0F);
                let bank = (u32::from(self.data.prg_high_bit) << 4) | last_bank;
                CpuMapResult::PrgROM(BankSizeKb::Sixteen.to_absolute_address(bank, address))
            }
        }
    }

    pub(crate) fn read_cpu_address(&self, address: u16, cpu_open_bus: u8) -> u8 {
        if let 0x6000..=0x7FFF = address {
            // EEPROM data out reads back on bit 4
            if let Some(eeprom) = &self.data.eeprom {
                return (cpu_open_bus & 0xEF) | (u8::from(eeprom.sda_out) << 4);
            }
        }
        self.map_cpu_address(address).read(&self.cartridge).unwrap_or(cpu_open_bus)
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        if let 0x6000..=0x7FFF = address {
            if self.data.mapper_number == 153 {
                self.map_cpu_address(address).write(value, &mut self.cartridge);
                return;
            }
        }
        if address < 0x6000 {
            return;
        }

        // FCG-2 decodes $6000-$7FFF, LZ93D50 $8000-$FFFF; registers mirror across both
        match address & 0x000F {
            0x0..=0x7 => {
                let register = usize::from(address & 0x07);
                self.data.chr_banks[register] = value;
                if self.data.mapper_number == 153 {
                    self.data.prg_high_bit = value & 0x01;
                }
            }
            0x8 => self.data.prg_bank = value & 0x0F,
            0x9 => {
                self.data.nametable_mirroring = match value & 0x03 {
                    0x00 => NametableMirroring::Vertical,
                    0x01 => NametableMirroring::Horizontal,
                    0x02 => NametableMirroring::SingleScreenBank0,
                    0x03 => NametableMirroring::SingleScreenBank1,
                    _ => unreachable!("value & 0x03 is always <= 0x03"),
                };
            }
            0xA => {
                self.data.irq_enabled = value.bit(0);
                self.data.irq_counter = self.data.irq_reload;
                self.data.irq_flag = false;
            }
            0xB => {
                self.data.irq_reload = (self.data.irq_reload & 0xFF00) | u16::from(value);
            }
            0xC => {
                self.data.irq_reload = (self.data.irq_reload & 0x00FF) | (u16::from(value) << 8);
            }
            0xD => {
                if let Some(eeprom) = &mut self.data.eeprom {
                    eeprom.set_lines(value.bit(5), value.bit(6));
                }
            }
            _ => {}
        }
    }

    pub(crate) fn tick_cpu(&mut self) {
        if self.data.irq_enabled {
            if self.data.irq_counter == 0 {
                self.data.irq_flag = true;
            }
            self.data.irq_counter = self.data.irq_counter.wrapping_sub(1);
        }
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        self.data.irq_flag
    }

    pub(crate) fn eeprom_bytes(&self) -> Option<&[u8]> {
        self.data.eeprom.as_ref().map(|eeprom| eeprom.memory.as_slice())
    }

    pub(crate) fn get_and_clear_eeprom_dirty(&mut self) -> bool {
        self.data
            .eeprom
            .as_mut()
            .is_some_and(|eeprom| std::mem::take(&mut eeprom.dirty))
    }
}

impl HasBasicPpuMapping for MapperImpl<BandaiFcg> {
    fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => {
                let bank = self.data.chr_banks[usize::from(address >> 10)];
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

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn i2c_write_byte(eeprom: &mut X24C02, byte: u8) {
        for bit in (0..8).rev() {
            let sda = byte & (1 << bit) != 0;
            eeprom.set_lines(false, sda);
            eeprom.set_lines(true, sda);
        }
        // ACK clock
        eeprom.set_lines(false, false);
        eeprom.set_lines(true, false);
    }

    fn i2c_start(eeprom: &mut X24C02) {
        eeprom.set_lines(true, true);
        eeprom.set_lines(true, false);
    }

    #[test]
    fn eeprom_write_then_read_round_trips() {
        let mut eeprom = X24C02::new(None);

        // Write $42 to address 5 (device address, word address, data)
        i2c_start(&mut eeprom);
        i2c_write_byte(&mut eeprom, 0xA0);
        i2c_write_byte(&mut eeprom, 0x05);
        i2c_write_byte(&mut eeprom, 0x42);
        assert_eq!(eeprom.memory[5], 0x42);
        assert!(eeprom.dirty);

        // Random read: dummy write sets the address, repeated start, then 8 data clocks
        i2c_start(&mut eeprom);
        i2c_write_byte(&mut eeprom, 0xA0);
        i2c_write_byte(&mut eeprom, 0x05);
        i2c_start(&mut eeprom);
        i2c_write_byte(&mut eeprom, 0xA1);
        let mut value = 0_u8;
        for _ in 0..8 {
            eeprom.set_lines(false, true);
            eeprom.set_lines(true, true);
            value = (value << 1) | u8::from(eeprom.sda_out);
        }
        assert_eq!(value, 0x42);
    }

    #[test]
    fn irq_counts_down_from_reload() {
        let cartridge = crate::bus::cartridge::Cartridge::for_tests(
            vec![0; 128 * 1024],
            vec![0; 8 * 1024],
        );
        let mut mapper =
            MapperImpl { cartridge, data: BandaiFcg::new(16, ChrType::ROM, None) };

        mapper.write_cpu_address(0x800B, 3);
        mapper.write_cpu_address(0x800C, 0);
        mapper.write_cpu_address(0x800A, 1);

        for _ in 0..3 {
            mapper.tick_cpu();
            assert!(!mapper.interrupt_flag());
        }
        mapper.tick_cpu();
        assert!(mapper.interrupt_flag());
    }
}
