//! Joypad latches for the standard NES controller

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct JoypadState {
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl JoypadState {
    /// Some games glitch badly when opposing directions are pressed simultaneously; the
    /// hardware can't produce that input with a stock D-pad.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.up && self.down {
            self.down = false;
        }
        if self.left && self.right {
            self.right = false;
        }
        self
    }

    fn to_bits(self) -> u8 {
        u8::from(self.a)
            | (u8::from(self.b) << 1)
            | (u8::from(self.select) << 2)
            | (u8::from(self.start) << 3)
            | (u8::from(self.up) << 4)
            | (u8::from(self.down) << 5)
            | (u8::from(self.left) << 6)
            | (u8::from(self.right) << 7)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct NesInputs {
    pub p1: JoypadState,
    pub p2: JoypadState,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct InputState {
    p1: JoypadState,
    p2: JoypadState,
    strobe: bool,
    p1_shift: u8,
    p2_shift: u8,
}

impl InputState {
    pub(crate) fn set_inputs(&mut self, inputs: NesInputs, allow_opposing: bool) {
        self.p1 = if allow_opposing { inputs.p1 } else { inputs.p1.sanitized() };
        self.p2 = if allow_opposing { inputs.p2 } else { inputs.p2.sanitized() };
        if self.strobe {
            self.reload();
        }
    }

    fn reload(&mut self) {
        self.p1_shift = self.p1.to_bits();
        self.p2_shift = self.p2.to_bits();
    }

    pub(crate) fn write_strobe(&mut self, value: u8) {
        let strobe = value & 0x01 != 0;
        if self.strobe && !strobe {
            self.reload();
        }
        self.strobe = strobe;
    }

    pub(crate) fn read_p1(&mut self) -> u8 {
        if self.strobe {
            return u8::from(self.p1.a);
        }
        let bit = self.p1_shift & 0x01;
        // A shifted-out controller reads 1s
        self.p1_shift = (self.p1_shift >> 1) | 0x80;
        bit
    }

    pub(crate) fn read_p2(&mut self) -> u8 {
        if self.strobe {
            return u8::from(self.p2.a);
        }
        let bit = self.p2_shift & 0x01;
        self.p2_shift = (self.p2_shift >> 1) | 0x80;
        bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_buttons_in_hardware_order() {
        let mut input = InputState::default();
        input.set_inputs(
            NesInputs {
                p1: JoypadState { a: true, start: true, ..JoypadState::default() },
                p2: JoypadState::default(),
            },
            false,
        );
        input.write_strobe(1);
        input.write_strobe(0);

        // Order: A, B, Select, Start, Up, Down, Left, Right
        let expected = [1, 0, 0, 1, 0, 0, 0, 0];
        for bit in expected {
            assert_eq!(input.read_p1(), bit);
        }
        // Further reads return 1
        assert_eq!(input.read_p1(), 1);
    }

    #[test]
    fn opposing_directions_are_sanitized() {
        let state = JoypadState { up: true, down: true, left: true, right: true, ..JoypadState::default() }
            .sanitized();
        assert!(state.up && !state.down);
        assert!(state.left && !state.right);
    }
}
