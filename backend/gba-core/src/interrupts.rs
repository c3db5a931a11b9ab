//! IE / IF / IME interrupt registers

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IrqSource {
    VBlank = 0,
    HBlank = 1,
    VCounter = 2,
    Timer0 = 3,
    Timer1 = 4,
    Timer2 = 5,
    Timer3 = 6,
    Serial = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    Cartridge = 13,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct InterruptRegisters {
    pub(crate) ime: bool,
    pub(crate) enabled: u16,
    pub(crate) flags: u16,
}

impl InterruptRegisters {
    pub(crate) fn set_flag(&mut self, source: IrqSource) {
        self.flags |= 1 << (source as u16);
    }

    /// IF is write-1-to-clear.
    pub(crate) fn acknowledge(&mut self, mask: u16) {
        self.flags &= !mask;
    }

    pub(crate) fn irq_line(&self) -> bool {
        self.ime && self.enabled & self.flags != 0
    }
}
