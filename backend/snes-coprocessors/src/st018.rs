//! ST018: an ARMv3 core (21.47 MHz) with its own program/data ROM and work RAM, talking to
//! the SNES through a pair of byte-wide mailboxes at $3800-$3804

use arm7tdmi_emu::bus::{BusInterface as ArmBus, MemoryCycle};
use arm7tdmi_emu::{Arm7Tdmi, ArmVersion};
use bincode::{Decode, Encode};
use retrocore_proc_macros::{FakeDecode, FakeEncode};

const PROGRAM_ROM_LEN: usize = 0x20000;
const DATA_ROM_LEN: usize = 0x8000;
const WORK_RAM_LEN: usize = 0x4000;

#[derive(Debug, Clone, Default, FakeEncode, FakeDecode)]
struct Firmware {
    program_rom: Vec<u8>,
    data_rom: Vec<u8>,
}

#[derive(Debug, Clone, Encode, Decode)]
struct St018Bus {
    firmware: Firmware,
    work_ram: Vec<u8>,
    /// SNES -> ARM mailbox
    snes_to_arm: Option<u8>,
    /// ARM -> SNES mailbox
    arm_to_snes: Option<u8>,
    signal_reset: bool,
}

impl St018Bus {
    fn byte(&self, address: u32) -> u8 {
        match address {
            0x0000_0000..=0x0001_FFFF => {
                self.firmware.program_rom.get(address as usize).copied().unwrap_or(0)
            }
            0xA000_0000..=0xA000_7FFF => self
                .firmware
                .data_rom
                .get((address & 0x7FFF) as usize)
                .copied()
                .unwrap_or(0),
            0xE000_0000..=0xE000_3FFF => self.work_ram[(address & 0x3FFF) as usize],
            // Mailbox status/data
            0x4000_0010 => self.snes_to_arm.unwrap_or(0),
            0x4000_0020 => {
                (u8::from(self.arm_to_snes.is_none()) << 3)
                    | (u8::from(self.snes_to_arm.is_some()) << 2)
            }
            _ => 0,
        }
    }
}

impl ArmBus for St018Bus {
    fn read_byte(&mut self, address: u32, _cycle: MemoryCycle) -> u8 {
        let value = self.byte(address);
        if address == 0x4000_0010 {
            self.snes_to_arm = None;
        }
        value
    }

    fn read_halfword(&mut self, address: u32, cycle: MemoryCycle) -> u16 {
        u16::from(self.read_byte(address, cycle))
            | (u16::from(self.read_byte(address | 1, cycle)) << 8)
    }

    fn read_word(&mut self, address: u32, _cycle: MemoryCycle) -> u32 {
        u32::from_le_bytes([
            self.byte(address),
            self.byte(address + 1),
            self.byte(address + 2),
            self.byte(address + 3),
        ])
    }

    fn write_byte(&mut self, address: u32, value: u8, _cycle: MemoryCycle) {
        match address {
            0xE000_0000..=0xE000_3FFF => {
                self.work_ram[(address & 0x3FFF) as usize] = value;
            }
            0x4000_0000 => {
                self.arm_to_snes = Some(value);
            }
            _ => {}
        }
    }

    fn write_halfword(&mut self, address: u32, value: u16, cycle: MemoryCycle) {
        self.write_byte(address, value as u8, cycle);
        self.write_byte(address | 1, (value >> 8) as u8, cycle);
    }

    fn write_word(&mut self, address: u32, value: u32, cycle: MemoryCycle) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_byte(address + i as u32, byte, cycle);
        }
    }

    fn irq(&self) -> bool {
        false
    }

    fn internal_cycles(&mut self, _cycles: u32) {}
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct St018 {
    cpu: Arm7Tdmi,
    bus: St018Bus,
    cycle_debt: u64,
}

impl St018 {
    /// Build the coprocessor from host-supplied firmware: 128KB program ROM followed by 32KB
    /// data ROM.
    #[must_use]
    pub fn new(firmware: &[u8]) -> Self {
        let program_rom = firmware.get(..PROGRAM_ROM_LEN).unwrap_or(firmware).to_vec();
        let data_rom = firmware
            .get(PROGRAM_ROM_LEN..PROGRAM_ROM_LEN + DATA_ROM_LEN)
            .unwrap_or(&[])
            .to_vec();

        Self {
            cpu: Arm7Tdmi::with_version(ArmVersion::V3),
            bus: St018Bus {
                firmware: Firmware { program_rom, data_rom },
                work_ram: vec![0; WORK_RAM_LEN],
                snes_to_arm: None,
                arm_to_snes: None,
                signal_reset: false,
            },
            cycle_debt: 0,
        }
    }

    /// SNES-side register reads at $3800-$3804.
    pub fn read(&mut self, offset: u16) -> Option<u8> {
        match offset {
            0x3800 => {
                let value = self.bus.arm_to_snes.take();
                Some(value.unwrap_or(0))
            }
            0x3804 => {
                // Status: ARM-ready + mailbox flags
                Some(
                    0x40 | (u8::from(self.bus.arm_to_snes.is_some()))
                        | (u8::from(self.bus.snes_to_arm.is_none()) << 3),
                )
            }
            _ => None,
        }
    }

    pub fn write(&mut self, offset: u16, value: u8) -> bool {
        match offset {
            0x3802 => {
                self.bus.snes_to_arm = Some(value);
                true
            }
            0x3804 => {
                // Reset request
                self.cpu.reset();
                self.bus.signal_reset = true;
                true
            }
            _ => false,
        }
    }

    /// The ARM runs at the SNES master clock rate.
    pub fn run(&mut self, master_cycles: u64) {
        self.cycle_debt += master_cycles;
        // Defensive cap per synchronization point
        let mut budget = self.cycle_debt.min(2048);
        self.cycle_debt -= budget;

        while budget > 0 {
            let consumed = u64::from(self.cpu.execute_instruction(&mut self.bus)).max(1);
            budget = budget.saturating_sub(consumed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firmware_with_arm(opcodes: &[u32]) -> Vec<u8> {
        let mut firmware = vec![0_u8; PROGRAM_ROM_LEN + DATA_ROM_LEN];
        for (i, opcode) in opcodes.iter().enumerate() {
            firmware[i * 4..i * 4 + 4].copy_from_slice(&opcode.to_le_bytes());
        }
        firmware
    }

    #[test]
    fn arm_writes_reach_the_snes_mailbox() {
        // MOV R0, #0x42 ; MOV R1, #0x40000000 ; STRB R0, [R1] ; B .
        let firmware = firmware_with_arm(&[
            0xE3A0_0042,
            0xE3A0_1101, // MOV R1, #0x40000000 (0x01 ror 2)
            0xE5C1_0000,
            0xEAFF_FFFD,
        ]);
        let mut st018 = St018::new(&firmware);
        st018.run(64);

        assert_eq!(st018.read(0x3800), Some(0x42));
        // Mailbox is cleared by the read
        assert_eq!(st018.read(0x3804).map(|status| status & 0x01), Some(0));
    }

    #[test]
    fn snes_mailbox_visible_to_arm() {
        // LDR-based poll loop is unnecessary for the test: write then read the bus directly
        let firmware = firmware_with_arm(&[0xEAFF_FFFE]);
        let mut st018 = St018::new(&firmware);
        st018.write(0x3802, 0x99);
        assert_eq!(st018.bus.byte(0x4000_0010), 0x99);
    }
}
