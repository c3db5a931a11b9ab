//! S-SMP glue: 64KB audio RAM, the four CPU mailbox ports, timers 0-2, the boot ROM, and the
//! S-DSP. The SPC700 is run in catch-up fashion: the coordinator hands the APU a master-cycle
//! target and the CPU+DSP advance until they reach it.

mod dsp;

use bincode::{Decode, Encode};
use dsp::SDsp;
use retrocore_common::boxedarray::BoxedByteArray;
use retrocore_common::num::GetBit;
use spc700_emu::{BusInterface, Spc700};

const AUDIO_RAM_LEN: usize = 0x10000;

// ~1.024 MHz SPC700 clock vs 21.477 MHz master clock
const MASTER_CYCLES_PER_SPC_CYCLE: u64 = 21;

/// The 64-byte S-SMP boot ROM, mapped at $FFC0 until disabled via $F1.
const IPL_ROM: [u8; 64] = [
    0xCD, 0xEF, 0xBD, 0xE8, 0x00, 0xC6, 0x1D, 0xD0, 0xFC, 0x8F, 0xAA, 0xF4, 0x8F, 0xBB, 0xF5,
    0x78, 0xCC, 0xF4, 0xD0, 0xFB, 0x2F, 0x19, 0xEB, 0xF4, 0xD0, 0xFC, 0x7E, 0xF4, 0xD0, 0x0B,
    0xE4, 0xF5, 0xCB, 0xF4, 0xD7, 0x00, 0xFC, 0xD0, 0xF3, 0xAB, 0x01, 0x10, 0xEF, 0x7E, 0xF4,
    0x10, 0xEB, 0xBA, 0xF6, 0xDA, 0x00, 0xBA, 0xF4, 0xC4, 0xF4, 0xDD, 0x5D, 0xD0, 0xDB, 0x1F,
    0x00, 0x00, 0xC0, 0xFF,
];

#[derive(Debug, Clone, Encode, Decode)]
struct SpcTimer {
    enabled: bool,
    divider: u8,
    target: u8,
    internal_counter: u8,
    output_counter: u8,
    /// Prescaler in SPC cycles (128 for timers 0/1, 16 for timer 2)
    prescaler: u16,
    prescaler_counter: u16,
}

impl SpcTimer {
    fn new(prescaler: u16) -> Self {
        Self {
            enabled: false,
            divider: 0,
            target: 0,
            internal_counter: 0,
            output_counter: 0,
            prescaler,
            prescaler_counter: 0,
        }
    }

    fn tick(&mut self, spc_cycles: u64) {
        if !self.enabled {
            return;
        }

        self.prescaler_counter += spc_cycles as u16;
        while self.prescaler_counter >= self.prescaler {
            self.prescaler_counter -= self.prescaler;
            self.internal_counter = self.internal_counter.wrapping_add(1);
            if self.internal_counter == self.target {
                self.internal_counter = 0;
                self.output_counter = (self.output_counter + 1) & 0x0F;
            }
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.internal_counter = 0;
            self.output_counter = 0;
        }
        self.enabled = enabled;
    }

    fn read_output(&mut self) -> u8 {
        std::mem::take(&mut self.output_counter)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct ApuBus {
    ram: BoxedByteArray<AUDIO_RAM_LEN>,
    ipl_rom_enabled: bool,
    /// CPU-to-APU mailbox values
    input_ports: [u8; 4],
    /// APU-to-CPU mailbox values
    output_ports: [u8; 4],
    timers: [SpcTimer; 3],
    dsp_address: u8,
    dsp: SDsp,
}

impl ApuBus {
    fn new() -> Self {
        Self {
            ram: BoxedByteArray::new(),
            ipl_rom_enabled: true,
            input_ports: [0; 4],
            output_ports: [0; 4],
            timers: [SpcTimer::new(128), SpcTimer::new(128), SpcTimer::new(16)],
            dsp_address: 0,
            dsp: SDsp::new(),
        }
    }
}

impl BusInterface for ApuBus {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x00F2 => self.dsp_address,
            0x00F3 => self.dsp.read_register(self.dsp_address),
            0x00F4..=0x00F7 => self.input_ports[usize::from(address - 0x00F4)],
            0x00FD => self.timers[0].read_output(),
            0x00FE => self.timers[1].read_output(),
            0x00FF => self.timers[2].read_output(),
            0xFFC0..=0xFFFF if self.ipl_rom_enabled => {
                IPL_ROM[usize::from(address - 0xFFC0)]
            }
            _ => self.ram[usize::from(address)],
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x00F1 => {
                self.timers[0].set_enabled(value.bit(0));
                self.timers[1].set_enabled(value.bit(1));
                self.timers[2].set_enabled(value.bit(2));
                if value.bit(4) {
                    self.input_ports[0] = 0;
                    self.input_ports[1] = 0;
                }
                if value.bit(5) {
                    self.input_ports[2] = 0;
                    self.input_ports[3] = 0;
                }
                self.ipl_rom_enabled = value.bit(7);
            }
            0x00F2 => self.dsp_address = value,
            0x00F3 => {
                let dsp_address = self.dsp_address;
                let ram = &self.ram;
                self.dsp.write_register(dsp_address, value, ram);
            }
            0x00F4..=0x00F7 => {
                self.output_ports[usize::from(address - 0x00F4)] = value;
            }
            0x00FA => self.timers[0].target = value,
            0x00FB => self.timers[1].target = value,
            0x00FC => self.timers[2].target = value,
            _ => {}
        }
        // Writes always land in RAM underneath the registers
        self.ram[usize::from(address)] = value;
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Apu {
    cpu: Spc700,
    bus: ApuBus,
    master_cycle_debt: u64,
    sample_accumulator: Vec<(f64, f64)>,
    /// SPC cycles until the next 32 KHz DSP sample
    cycles_to_next_sample: u64,
}

impl Apu {
    pub(crate) fn new() -> Self {
        let mut bus = ApuBus::new();
        let cpu = Spc700::new(&mut bus);
        Self {
            cpu,
            bus,
            master_cycle_debt: 0,
            sample_accumulator: Vec::with_capacity(64),
            cycles_to_next_sample: 32,
        }
    }

    pub(crate) fn read_port(&mut self, port: u8) -> u8 {
        self.bus.output_ports[usize::from(port & 0x03)]
    }

    pub(crate) fn write_port(&mut self, port: u8, value: u8) {
        self.bus.input_ports[usize::from(port & 0x03)] = value;
    }

    /// Run the SPC700 and DSP until the given number of master cycles has been covered.
    pub(crate) fn catch_up(&mut self, master_cycles: u64) {
        self.master_cycle_debt += master_cycles;

        while self.master_cycle_debt >= MASTER_CYCLES_PER_SPC_CYCLE {
            let spc_cycles = u64::from(self.cpu.step(&mut self.bus));
            let consumed = spc_cycles * MASTER_CYCLES_PER_SPC_CYCLE;
            self.master_cycle_debt = self.master_cycle_debt.saturating_sub(consumed);

            for timer in &mut self.bus.timers {
                timer.tick(spc_cycles);
            }

            // One output sample per 32 SPC cycles (~32 KHz)
            self.cycles_to_next_sample = self.cycles_to_next_sample.saturating_sub(spc_cycles);
            if self.cycles_to_next_sample == 0 {
                self.cycles_to_next_sample = 32;
                let sample = self.bus.dsp.generate_sample(&self.bus.ram);
                self.sample_accumulator.push(sample);
            }
        }
    }

    pub(crate) fn drain_samples(&mut self) -> std::vec::Drain<'_, (f64, f64)> {
        self.sample_accumulator.drain(..)
    }

    /// Install an SPC snapshot: 64KB RAM plus DSP registers.
    pub(crate) fn load_spc_snapshot(&mut self, ram: &[u8], dsp_registers: &[u8], registers: SpcRegisters) {
        self.bus.ram.copy_from_slice(&ram[..AUDIO_RAM_LEN]);
        self.bus.dsp.load_registers(dsp_registers);
        self.bus.ipl_rom_enabled = false;

        let cpu_registers = self.cpu.registers_mut();
        cpu_registers.pc = registers.pc;
        cpu_registers.a = registers.a;
        cpu_registers.x = registers.x;
        cpu_registers.y = registers.y;
        cpu_registers.sp = registers.sp;
        cpu_registers.psw = spc700_emu::StatusFlags::from_byte(registers.psw);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SpcRegisters {
    pub(crate) pc: u16,
    pub(crate) a: u8,
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) psw: u8,
    pub(crate) sp: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_ports_connect_both_directions() {
        let mut apu = Apu::new();
        apu.write_port(0, 0xAA);
        assert_eq!(apu.bus.input_ports[0], 0xAA);

        apu.bus.output_ports[1] = 0x55;
        assert_eq!(apu.read_port(1), 0x55);
    }

    #[test]
    fn ipl_rom_visible_at_reset() {
        let mut apu = Apu::new();
        assert_eq!(apu.bus.read(0xFFC0), IPL_ROM[0]);
        // Reset vector points into the IPL ROM
        assert_eq!(apu.cpu.registers().pc, 0xFFC0);
    }

    #[test]
    fn boot_rom_reports_ready_signature() {
        let mut apu = Apu::new();
        // The IPL ROM writes $AA/$BB to ports 0/1 once initialized
        apu.catch_up(21 * 10_000);
        assert_eq!(apu.read_port(0), 0xAA);
        assert_eq!(apu.read_port(1), 0xBB);
    }

    #[test]
    fn timer_2_runs_at_8x_rate() {
        let mut apu = Apu::new();
        apu.bus.timers[0].target = 10;
        apu.bus.timers[2].target = 10;
        apu.bus.timers[0].set_enabled(true);
        apu.bus.timers[2].set_enabled(true);

        for timer in &mut apu.bus.timers {
            timer.tick(1280);
        }
        assert_eq!(apu.bus.timers[0].output_counter, 1);
        assert_eq!(apu.bus.timers[2].output_counter, 8);
    }
}
