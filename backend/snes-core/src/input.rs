//! Joypad latches: manual $4016/$4017 shifting plus auto-joypad read

use crate::{SnesInputs, SnesJoypadState};
use bincode::{Decode, Encode};

fn to_bits(state: SnesJoypadState) -> u16 {
    (u16::from(state.b) << 15)
        | (u16::from(state.y) << 14)
        | (u16::from(state.select) << 13)
        | (u16::from(state.start) << 12)
        | (u16::from(state.up) << 11)
        | (u16::from(state.down) << 10)
        | (u16::from(state.left) << 9)
        | (u16::from(state.right) << 8)
        | (u16::from(state.a) << 7)
        | (u16::from(state.x) << 6)
        | (u16::from(state.l) << 5)
        | (u16::from(state.r) << 4)
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct InputState {
    inputs: SnesInputs,
    strobe: bool,
    p1_shift: u16,
    p2_shift: u16,
    auto_read_result: [u16; 2],
    auto_read_in_progress: bool,
}

impl InputState {
    pub(crate) fn set_inputs(&mut self, inputs: SnesInputs) {
        self.inputs = inputs;
        if self.strobe {
            self.reload();
        }
    }

    fn reload(&mut self) {
        self.p1_shift = to_bits(self.inputs.p1);
        self.p2_shift = to_bits(self.inputs.p2);
    }

    pub(crate) fn write_strobe(&mut self, value: u8) {
        let strobe = value & 0x01 != 0;
        if self.strobe && !strobe {
            self.reload();
        }
        self.strobe = strobe;
    }

    pub(crate) fn read_4016(&mut self) -> u8 {
        if self.strobe {
            self.reload();
        }
        let bit = (self.p1_shift >> 15) as u8;
        self.p1_shift = (self.p1_shift << 1) | 1;
        bit
    }

    pub(crate) fn read_4017(&mut self) -> u8 {
        if self.strobe {
            self.reload();
        }
        let bit = (self.p2_shift >> 15) as u8;
        self.p2_shift = (self.p2_shift << 1) | 1;
        bit
    }

    /// Auto-joypad read, performed by the hardware in the first vblank lines.
    pub(crate) fn perform_auto_read(&mut self) {
        self.auto_read_result[0] = to_bits(self.inputs.p1);
        self.auto_read_result[1] = to_bits(self.inputs.p2);
        self.auto_read_in_progress = false;
    }

    pub(crate) fn auto_read_in_progress(&self) -> bool {
        self.auto_read_in_progress
    }

    pub(crate) fn start_auto_read(&mut self) {
        self.auto_read_in_progress = true;
    }

    pub(crate) fn read_auto_joypad(&self, address: u16) -> u8 {
        match address {
            0x4218 => self.auto_read_result[0] as u8,
            0x4219 => (self.auto_read_result[0] >> 8) as u8,
            0x421A => self.auto_read_result[1] as u8,
            0x421B => (self.auto_read_result[1] >> 8) as u8,
            _ => 0,
        }
    }
}
