//! Public emulator surface for the SMS / Game Gear core

use crate::bus::Bus;
use crate::memory::Memory;
use crate::vdp;
use crate::{SmsGgHardware, SmsGgInputs};
use bincode::{Decode, Encode};
use retrocore_common::audio::CubicResampler;
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, PartialClone, Renderer, SaveWriter, TickEffect,
    TickError,
};
use retrocore_common::savestate::{SaveStateError, SaveStateReader, SaveStateWriter};
use std::mem;
use thiserror::Error;
use z80_emu::Z80;

const Z80_FREQUENCY: f64 = 3_579_545.0;

pub const SAVE_STATE_SYSTEM_TAG: u8 = 0x03;

#[derive(Debug, Error)]
pub enum SmsGgLoadError {
    #[error("ROM image is too small ({0} bytes)")]
    RomTooSmall(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SmsGgEmulatorConfig {
    pub hardware: SmsGgHardware,
}

impl Default for SmsGgEmulatorConfig {
    fn default() -> Self {
        Self { hardware: SmsGgHardware::MasterSystem }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub struct SmsGgEmulator {
    cpu: Z80,
    #[partial_clone(partial)]
    bus: Bus,
    config: SmsGgEmulatorConfig,
    rgba_frame_buffer: Vec<Color>,
    audio_resampler: CubicResampler,
    vdp_cycle_remainder: u32,
    #[partial_clone(default)]
    raw_rom_bytes: Vec<u8>,
}

impl SmsGgEmulator {
    /// Create an emulator from an SMS/GG ROM image.
    ///
    /// # Errors
    ///
    /// Returns an error for undersized ROM images.
    pub fn create<S: SaveWriter>(
        rom_bytes: Vec<u8>,
        config: SmsGgEmulatorConfig,
        save_writer: &mut S,
    ) -> Result<Self, SmsGgLoadError> {
        if rom_bytes.len() < 0x4000 {
            return Err(SmsGgLoadError::RomTooSmall(rom_bytes.len()));
        }

        let sav_bytes = save_writer.load_bytes("sav").ok();
        let memory = Memory::new(rom_bytes.clone().into_boxed_slice(), sav_bytes);
        let bus = Bus::new(config.hardware, memory);
        let mut cpu = Z80::new();
        cpu.reset();

        Ok(Self {
            cpu,
            bus,
            config,
            rgba_frame_buffer: vec![Color::default(); vdp::SCREEN_WIDTH * vdp::SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(Z80_FREQUENCY),
            vdp_cycle_remainder: 0,
            raw_rom_bytes: rom_bytes,
        })
    }

    fn step_instruction(&mut self) {
        let t_states = self.cpu.execute_instruction(&mut self.bus);
        self.bus.clear_nmi();

        // VDP runs at 3 cycles per 2 Z80 T-states
        let vdp_cycles = t_states * 3 + self.vdp_cycle_remainder;
        self.vdp_cycle_remainder = vdp_cycles % 2;
        self.bus.vdp.tick((vdp_cycles / 2) as u16);

        for _ in 0..t_states {
            self.bus.psg.tick();
            let (left, right) = self.bus.psg.sample();
            self.audio_resampler.collect_sample(left, right);
        }
    }

    fn render_frame<R: Renderer>(&mut self, renderer: &mut R) -> Result<(), R::Err> {
        let (x0, y0, width, height) = self.bus.vdp.viewport();
        let frame = self.bus.vdp.frame_buffer();

        for y in 0..height {
            for x in 0..width {
                let source = (y0 + y) * vdp::SCREEN_WIDTH + x0 + x;
                self.rgba_frame_buffer[y * width + x] = Color::from_rgb555(frame[source]);
            }
        }

        renderer.render_frame(
            &self.rgba_frame_buffer,
            FrameSize { width: width as u32, height: height as u32 },
        )
    }

    /// Serialize the machine state.
    ///
    /// # Errors
    ///
    /// Propagates component encoding errors.
    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        let mut writer = SaveStateWriter::new(SAVE_STATE_SYSTEM_TAG);
        writer.write_component("cpu", &self.cpu)?;
        writer.write_component("bus", &self.bus)?;
        Ok(writer.finish())
    }

    /// Restore a saved state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is malformed or for another system.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let reader = SaveStateReader::new(bytes, SAVE_STATE_SYSTEM_TAG)?;
        let cpu = reader.read_component::<Z80>("cpu")?;
        let mut bus = reader.read_component::<Bus>("bus")?;

        bus.memory.take_rom_from(&mut self.bus.memory);
        self.cpu = cpu;
        self.bus = bus;
        Ok(())
    }
}

impl EmulatorTrait for SmsGgEmulator {
    type Inputs = SmsGgInputs;
    type Config = SmsGgEmulatorConfig;

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
        self.bus.set_inputs(*inputs);
        self.step_instruction();

        self.audio_resampler.output_samples(audio_output).map_err(TickError::Audio)?;

        if self.bus.vdp.take_frame_complete() {
            self.render_frame(renderer).map_err(TickError::Render)?;

            if self.bus.memory.get_and_clear_ram_dirty() {
                save_writer
                    .persist_bytes("sav", self.bus.memory.cartridge_ram())
                    .map_err(TickError::SaveWrite)?;
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
        self.bus.memory.take_rom_from(&mut other.bus.memory);
        self.raw_rom_bytes = mem::take(&mut other.raw_rom_bytes);
    }

    fn soft_reset(&mut self) {
        self.cpu.reset();
    }

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let rom_bytes = mem::take(&mut self.raw_rom_bytes);
        *self = Self::create(rom_bytes, self.config, save_writer)
            .expect("creation during hard reset cannot fail; the ROM loaded before");
    }

    fn target_fps(&self) -> f64 {
        59.9227
    }

    fn update_audio_output_frequency(&mut self, output_frequency: u64) {
        self.audio_resampler.update_output_frequency(output_frequency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSaveWriter;

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

    #[test]
    fn runs_and_round_trips_state() {
        // JR -2 at the reset vector
        let mut rom = vec![0_u8; 32 * 1024];
        rom[0] = 0x18;
        rom[1] = 0xFE;

        let mut emulator =
            SmsGgEmulator::create(rom, SmsGgEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();
        for _ in 0..10_000 {
            emulator.step_instruction();
        }

        let state = emulator.save_state().unwrap();
        emulator.load_state(&state).unwrap();
        assert_eq!(emulator.save_state().unwrap(), state);
    }
}
