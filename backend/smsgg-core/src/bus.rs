//! Z80 bus wiring: memory map plus the I/O port decode

use crate::memory::Memory;
use crate::psg::Psg;
use crate::vdp::Vdp;
use crate::{SmsGgHardware, SmsGgInputs};
use bincode::{Decode, Encode};
use retrocore_proc_macros::PartialClone;
use z80_emu::traits::{BusInterface, InterruptLine};

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Bus {
    pub(crate) hardware: SmsGgHardware,
    #[partial_clone(partial)]
    pub(crate) memory: Memory,
    pub(crate) vdp: Vdp,
    pub(crate) psg: Psg,
    pub(crate) inputs: SmsGgInputs,
    last_pause: bool,
    nmi_pending: bool,
}

impl Bus {
    pub(crate) fn new(hardware: SmsGgHardware, memory: Memory) -> Self {
        Self {
            hardware,
            memory,
            vdp: Vdp::new(hardware),
            psg: Psg::new(),
            inputs: SmsGgInputs::default(),
            last_pause: false,
            nmi_pending: false,
        }
    }

    pub(crate) fn set_inputs(&mut self, inputs: SmsGgInputs) {
        // SMS Pause raises an NMI edge
        if self.hardware == SmsGgHardware::MasterSystem && inputs.pause && !self.last_pause {
            self.nmi_pending = true;
        }
        self.last_pause = inputs.pause;
        self.inputs = inputs;
    }

    fn port_dc(&self) -> u8 {
        // Active-low: P1 directions + buttons, P2 up/down
        !(u8::from(self.inputs.p1_up)
            | (u8::from(self.inputs.p1_down) << 1)
            | (u8::from(self.inputs.p1_left) << 2)
            | (u8::from(self.inputs.p1_right) << 3)
            | (u8::from(self.inputs.p1_button1) << 4)
            | (u8::from(self.inputs.p1_button2) << 5)
            | (u8::from(self.inputs.p2_up) << 6)
            | (u8::from(self.inputs.p2_down) << 7))
    }

    fn port_dd(&self) -> u8 {
        !(u8::from(self.inputs.p2_left)
            | (u8::from(self.inputs.p2_right) << 1)
            | (u8::from(self.inputs.p2_button1) << 2)
            | (u8::from(self.inputs.p2_button2) << 3))
    }

    fn port_00(&self) -> u8 {
        // Game Gear Start button, active low on bit 7
        0x7F | (u8::from(!self.inputs.pause) << 7)
    }
}

impl BusInterface for Bus {
    fn read_memory(&mut self, address: u16) -> u8 {
        self.memory.read(address)
    }

    fn write_memory(&mut self, address: u16, value: u8) {
        self.memory.write(address, value);
    }

    fn read_io(&mut self, address: u16) -> u8 {
        let port = address as u8;
        match port {
            0x00..=0x3F => {
                if self.hardware == SmsGgHardware::GameGear && port == 0x00 {
                    self.port_00()
                } else {
                    0xFF
                }
            }
            0x40..=0x7F => {
                if port & 1 == 0 {
                    self.vdp.v_counter()
                } else {
                    // H counter not implemented precisely; return the latch
                    0x00
                }
            }
            0x80..=0xBF => {
                if port & 1 == 0 {
                    self.vdp.read_data()
                } else {
                    self.vdp.read_control()
                }
            }
            0xC0..=0xFF => {
                if port & 1 == 0 {
                    self.port_dc()
                } else {
                    self.port_dd()
                }
            }
        }
    }

    fn write_io(&mut self, address: u16, value: u8) {
        let port = address as u8;
        match port {
            0x00..=0x3F => {
                if self.hardware == SmsGgHardware::GameGear && port == 0x06 {
                    self.psg.write_stereo_control(value);
                }
                // $3E memory control / $3F joypad control: nothing to do without expansion
            }
            0x40..=0x7F => self.psg.write(value),
            0x80..=0xBF => {
                if port & 1 == 0 {
                    self.vdp.write_data(value);
                } else {
                    self.vdp.write_control(value);
                }
            }
            0xC0..=0xFF => {}
        }
    }

    fn nmi(&self) -> InterruptLine {
        if self.nmi_pending { InterruptLine::Low } else { InterruptLine::High }
    }

    fn int(&self) -> InterruptLine {
        if self.vdp.interrupt_line() { InterruptLine::Low } else { InterruptLine::High }
    }
}

impl Bus {
    pub(crate) fn clear_nmi(&mut self) {
        self.nmi_pending = false;
    }
}
