//! Public emulator surface for the NES core

use crate::apu::ApuState;
use crate::bus::cartridge::{self, CartridgeFileError};
use crate::bus::Bus;
use crate::input::NesInputs;
use crate::nsf;
use crate::ppu::{self, PpuState};
use bincode::{Decode, Encode};
use mos6502_emu::{Mos6502, Mos6502Variant};
use retrocore_common::audio::CubicResampler;
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, PartialClone, Renderer, SaveWriter, TickEffect,
    TickError, TimingMode,
};
use retrocore_common::savestate::{SaveStateError, SaveStateReader, SaveStateWriter};
use std::mem;
use thiserror::Error;

const NTSC_CPU_FREQUENCY: f64 = 1_789_772.72;
const PAL_CPU_FREQUENCY: f64 = 1_662_607.03;

pub const SAVE_STATE_SYSTEM_TAG: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct NesEmulatorConfig {
    /// Force NTSC/PAL instead of trusting the ROM header.
    pub forced_timing_mode: Option<TimingMode>,
    /// Silence the triangle channel when it runs at ultrasonic frequencies; reduces popping
    /// in games that park the triangle at period 0.
    pub silence_ultrasonic_triangle_output: bool,
    /// Allow simultaneous left+right / up+down joypad inputs.
    pub allow_opposing_joypad_inputs: bool,
    /// Fill RAM with random bytes at power-on the way real front-loaders do. Off by default
    /// so that cold boots stay deterministic.
    pub randomize_power_on_ram: bool,
}

impl Default for NesEmulatorConfig {
    fn default() -> Self {
        Self {
            forced_timing_mode: None,
            silence_ultrasonic_triangle_output: true,
            allow_opposing_joypad_inputs: false,
            randomize_power_on_ram: false,
        }
    }
}

pub type NesError<RErr, AErr, SErr> = TickError<RErr, AErr, SErr>;

#[derive(Debug, Error)]
pub enum NesLoadError {
    #[error("error loading cartridge ROM: {0}")]
    CartridgeLoad(#[from] CartridgeFileError),
    #[error("error parsing NSF file: {0}")]
    Nsf(#[from] nsf::NsfError),
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub struct NesEmulator {
    cpu: Mos6502,
    #[partial_clone(partial)]
    bus: Bus,
    config: NesEmulatorConfig,
    rgba_frame_buffer: Vec<Color>,
    audio_resampler: CubicResampler,
    nsf_player: Option<nsf::NsfPlayer>,
    ppu_dot_accumulator: u32,
    #[partial_clone(default)]
    raw_rom_bytes: Vec<u8>,
}

impl NesEmulator {
    /// Create an emulator from iNES ROM data.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be parsed or uses an unsupported mapper.
    pub fn create<S: SaveWriter>(
        rom_bytes: Vec<u8>,
        config: NesEmulatorConfig,
        save_writer: &mut S,
    ) -> Result<Self, NesLoadError> {
        if nsf::is_nsf(&rom_bytes) {
            return Self::create_nsf(rom_bytes, config);
        }

        log::info!("ROM CRC32: {:08X}", retrocore_common::hash::crc32(&rom_bytes));

        let sav_bytes = save_writer.load_bytes("sav").ok();
        let mapper = cartridge::from_ines_file(&rom_bytes, sav_bytes, config.forced_timing_mode)?;
        let timing_mode = mapper.timing_mode();

        let ppu = PpuState::new(timing_mode);
        let apu = ApuState::new(timing_mode);
        let mut bus = Bus::new(mapper, ppu, apu);
        if config.randomize_power_on_ram {
            use rand::Rng;
            rand::rng().fill_bytes(&mut bus.ram);
        }
        let cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);

        Ok(Self {
            cpu,
            bus,
            config,
            rgba_frame_buffer: vec![
                Color::default();
                ppu::SCREEN_WIDTH as usize * ppu::SCREEN_HEIGHT as usize
            ],
            audio_resampler: CubicResampler::new(cpu_frequency(timing_mode)),
            nsf_player: None,
            ppu_dot_accumulator: 0,
            raw_rom_bytes: rom_bytes,
        })
    }

    fn create_nsf(rom_bytes: Vec<u8>, config: NesEmulatorConfig) -> Result<Self, NesLoadError> {
        let (player, mapper) = nsf::load(&rom_bytes)?;
        let timing_mode = mapper.timing_mode();

        let ppu = PpuState::new(timing_mode);
        let apu = ApuState::new(timing_mode);
        let mut bus = Bus::new(mapper, ppu, apu);
        let mut cpu = Mos6502::new(&mut bus, Mos6502Variant::Nes);
        player.init(&mut cpu, &mut bus);

        Ok(Self {
            cpu,
            bus,
            config,
            rgba_frame_buffer: vec![
                Color::default();
                ppu::SCREEN_WIDTH as usize * ppu::SCREEN_HEIGHT as usize
            ],
            audio_resampler: CubicResampler::new(cpu_frequency(timing_mode)),
            nsf_player: Some(player),
            ppu_dot_accumulator: 0,
            raw_rom_bytes: rom_bytes,
        })
    }

    #[must_use]
    pub fn timing_mode(&self) -> TimingMode {
        self.bus.mapper.timing_mode()
    }

    /// Execute one CPU instruction and advance all other components in lockstep, plus any DMA
    /// stall cycles the instruction provoked.
    fn step_instruction(&mut self) {
        self.cpu.set_nmi_line(self.bus.ppu.nmi_line());
        let irq = self.bus.apu.irq_line() || self.bus.mapper.interrupt_flag();
        self.cpu.set_irq_line(irq);

        if let Some(player) = &mut self.nsf_player {
            player.drive(&mut self.cpu, &mut self.bus);
        }

        let cycles = self.cpu.step(&mut self.bus);
        self.advance_components(cycles);

        // OAM DMA: 256 byte copies plus stall, 513/514 CPU cycles
        if let Some(page) = self.bus.take_pending_oam_dma() {
            use mos6502_emu::bus::BusInterface;
            for i in 0..=255_u8 {
                let byte = self.bus.read(u16::from(page) << 8 | u16::from(i));
                self.bus.ppu.write_oam_dma_byte(byte);
                self.advance_components(2);
            }
            self.advance_components(1);
        }

        // DMC sample fetch: 4-cycle CPU stall per byte
        if let Some(address) = self.bus.apu.dmc_sample_request() {
            use mos6502_emu::bus::BusInterface;
            let value = self.bus.read(address);
            self.bus.apu.dmc_deliver_sample(value);
            self.advance_components(4);
        }
    }

    fn advance_components(&mut self, cpu_cycles: u32) {
        // 3 PPU dots per CPU cycle on NTSC; 3.2 on PAL (16 PPU dots per 5 CPU cycles)
        let (dots_num, dots_den) = match self.timing_mode() {
            TimingMode::Ntsc => (3, 1),
            TimingMode::Pal => (16, 5),
        };

        for _ in 0..cpu_cycles {
            self.bus.apu.tick_cpu();
            self.bus.mapper.tick_cpu();

            self.ppu_dot_accumulator += dots_num;
            while self.ppu_dot_accumulator >= dots_den {
                self.ppu_dot_accumulator -= dots_den;
                self.bus.tick_ppu();
            }

            let sample = self.bus.apu.sample(self.config.silence_ultrasonic_triangle_output);
            let sample = self.bus.mapper.sample_audio(sample);
            self.audio_resampler.collect_sample(sample, sample);
        }
    }

    fn render_frame<R: Renderer>(&mut self, renderer: &mut R) -> Result<(), R::Err> {
        for (i, &palette_index) in self.bus.ppu.frame_buffer().iter().enumerate() {
            let (r, g, b) = ppu::PALETTE[(palette_index & 0x3F) as usize];
            self.rgba_frame_buffer[i] = Color::rgb(r, g, b);
        }

        let frame_size = FrameSize {
            width: ppu::SCREEN_WIDTH.into(),
            height: ppu::SCREEN_HEIGHT.into(),
        };
        renderer.render_frame(&self.rgba_frame_buffer, frame_size)
    }

    /// Serialize the full machine state into the keyed container format.
    ///
    /// # Errors
    ///
    /// Propagates component encoding errors.
    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        let mut writer = SaveStateWriter::new(SAVE_STATE_SYSTEM_TAG);
        writer.write_component("cpu", &self.cpu)?;
        writer.write_component("bus", &self.bus)?;
        writer.write_component("config", &self.config)?;
        writer.write_component("nsf", &self.nsf_player)?;
        Ok(writer.finish())
    }

    /// Restore a previously saved state. ROM data is carried over from the current instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is for a different system, malformed, or truncated.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let reader = SaveStateReader::new(bytes, SAVE_STATE_SYSTEM_TAG)?;
        let cpu = reader.read_component::<Mos6502>("cpu")?;
        let mut bus = reader.read_component::<Bus>("bus")?;
        let nsf_player = reader.read_component::<Option<nsf::NsfPlayer>>("nsf")?;

        bus.mapper.move_rom_from(&mut self.bus.mapper);
        self.cpu = cpu;
        self.bus = bus;
        self.nsf_player = nsf_player;
        Ok(())
    }
}

fn cpu_frequency(timing_mode: TimingMode) -> f64 {
    match timing_mode {
        TimingMode::Ntsc => NTSC_CPU_FREQUENCY,
        TimingMode::Pal => PAL_CPU_FREQUENCY,
    }
}

impl EmulatorTrait for NesEmulator {
    type Inputs = NesInputs;
    type Config = NesEmulatorConfig;

    fn tick<R, A, S>(
        &mut self,
        renderer: &mut R,
        audio_output: &mut A,
        inputs: &Self::Inputs,
        save_writer: &mut S,
    ) -> Result<TickEffect, TickError<R::Err, A::Err, S::Err>>
    where
        R: Renderer,
        A: AudioOutput,
        S: SaveWriter,
        R::Err: std::fmt::Debug,
        A::Err: std::fmt::Debug,
        S::Err: std::fmt::Debug,
    {
        self.bus.input.set_inputs(*inputs, self.config.allow_opposing_joypad_inputs);

        self.step_instruction();

        self.audio_resampler.output_samples(audio_output).map_err(TickError::Audio)?;

        if self.bus.ppu.take_frame_complete() {
            self.bus.mapper.notify_vblank();
            self.render_frame(renderer).map_err(TickError::Render)?;

            if self.bus.mapper.get_and_clear_ram_dirty_bit() {
                let sram = self.bus.mapper.get_prg_ram();
                save_writer.persist_bytes("sav", sram).map_err(TickError::SaveWrite)?;
            }

            return Ok(TickEffect::FrameRendered);
        }

        Ok(TickEffect::None)
    }

    fn force_render<R>(&mut self, renderer: &mut R) -> Result<(), R::Err>
    where
        R: Renderer,
    {
        self.render_frame(renderer)
    }

    fn reload_config(&mut self, config: &Self::Config) {
        self.config = *config;
    }

    fn take_rom_from(&mut self, other: &mut Self) {
        self.bus.mapper.move_rom_from(&mut other.bus.mapper);
        self.raw_rom_bytes = mem::take(&mut other.raw_rom_bytes);
    }

    fn soft_reset(&mut self) {
        self.cpu.reset(&mut self.bus);
        self.bus.ppu.reset();
        self.bus.apu.reset();
    }

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let rom_bytes = mem::take(&mut self.raw_rom_bytes);
        *self = Self::create(rom_bytes, self.config, save_writer)
            .expect("creation during hard reset cannot fail; the ROM loaded before");
    }

    fn target_fps(&self) -> f64 {
        match self.timing_mode() {
            TimingMode::Ntsc => 60.0988,
            TimingMode::Pal => 50.007,
        }
    }

    fn update_audio_output_frequency(&mut self, output_frequency: u64) {
        self.audio_resampler.update_output_frequency(output_frequency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) struct NullSaveWriter;

    impl SaveWriter for NullSaveWriter {
        type Err = std::io::Error;

        fn load_bytes(&mut self, _extension: &str) -> Result<Vec<u8>, Self::Err> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no save"))
        }

        fn persist_bytes(&mut self, _extension: &str, _bytes: &[u8]) -> Result<(), Self::Err> {
            Ok(())
        }

        fn load_serialized<D: Decode<()>>(&mut self, _extension: &str) -> Result<D, Self::Err> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no save"))
        }

        fn persist_serialized<E: Encode>(
            &mut self,
            _extension: &str,
            _data: E,
        ) -> Result<(), Self::Err> {
            Ok(())
        }
    }

    fn test_rom() -> Vec<u8> {
        // NROM with an infinite loop at the reset vector
        let mut file = vec![0_u8; 16 + 32 * 1024 + 8 * 1024];
        file[0..4].copy_from_slice(&[b'N', b'E', b'S', 0x1A]);
        file[4] = 2; // 32KB PRG
        file[5] = 1; // 8KB CHR
        // JMP $8000 at $8000
        file[16] = 0x4C;
        file[17] = 0x00;
        file[18] = 0x80;
        // Reset vector
        let reset_lo = 16 + 0x7FFC;
        file[reset_lo] = 0x00;
        file[reset_lo + 1] = 0x80;
        file
    }

    #[test]
    fn save_state_round_trips_byte_for_byte() {
        let mut emulator =
            NesEmulator::create(test_rom(), NesEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();

        for _ in 0..5000 {
            emulator.step_instruction();
        }

        let state = emulator.save_state().unwrap();
        emulator.load_state(&state).unwrap();
        let state2 = emulator.save_state().unwrap();
        assert_eq!(state, state2);
    }

    #[test]
    fn runs_a_full_frame() {
        let mut emulator =
            NesEmulator::create(test_rom(), NesEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();

        let start_frame = emulator.bus.ppu.frame_count();
        for _ in 0..60_000 {
            emulator.step_instruction();
            if emulator.bus.ppu.frame_count() > start_frame {
                return;
            }
        }
        panic!("no frame completed within the instruction budget");
    }
}
