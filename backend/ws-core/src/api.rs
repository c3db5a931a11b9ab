//! Public emulator surface for the WonderSwan core

use crate::memory::{Bus, Rom};
use crate::ppu;
use crate::v30mz::V30Mz;
use crate::WsInputs;
use bincode::{Decode, Encode};
use retrocore_common::audio::CubicResampler;
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, PartialClone, Renderer, SaveWriter, TickEffect,
    TickError,
};
use retrocore_common::savestate::{SaveStateError, SaveStateReader, SaveStateWriter};
use std::mem;
use thiserror::Error;

const CPU_FREQUENCY: f64 = 3_072_000.0;

pub const SAVE_STATE_SYSTEM_TAG: u8 = 0x08;

const IRQ_LINE_COMPARE: u8 = 4;
const IRQ_VBLANK: u8 = 6;

#[derive(Debug, Error)]
pub enum WsLoadError {
    #[error("ROM image is too small ({0} bytes)")]
    RomTooSmall(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct WsEmulatorConfig {
    pub color_model: bool,
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub struct WsEmulator {
    cpu: V30Mz,
    #[partial_clone(partial)]
    bus: Bus,
    rgba_frame_buffer: Vec<Color>,
    audio_resampler: CubicResampler,
    #[partial_clone(default)]
    raw_rom_bytes: Vec<u8>,
}

impl WsEmulator {
    /// Create an emulator from a WonderSwan ROM image.
    ///
    /// # Errors
    ///
    /// Returns an error for undersized images.
    pub fn create<S: SaveWriter>(
        rom_bytes: Vec<u8>,
        config: WsEmulatorConfig,
        save_writer: &mut S,
    ) -> Result<Self, WsLoadError> {
        if rom_bytes.len() < 0x10000 {
            return Err(WsLoadError::RomTooSmall(rom_bytes.len()));
        }

        let sram = save_writer.load_bytes("sav").ok();
        let mut bus = Bus::new(rom_bytes.clone().into_boxed_slice(), sram);
        bus.ppu.color_mode = config.color_model;

        Ok(Self {
            cpu: V30Mz::new(),
            bus,
            rgba_frame_buffer: vec![Color::default(); ppu::SCREEN_WIDTH * ppu::SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(CPU_FREQUENCY / 32.0),
            raw_rom_bytes: rom_bytes,
        })
    }

    fn step_instruction(&mut self) {
        let cycles = self.cpu.step(&mut self.bus);

        let Bus { ppu, ram, .. } = &mut self.bus;
        ppu.tick(cycles, ram);

        if mem::take(&mut self.bus.ppu.vblank_irq) {
            self.bus.raise_interrupt(IRQ_VBLANK);
        }
        if mem::take(&mut self.bus.ppu.line_irq) {
            self.bus.raise_interrupt(IRQ_LINE_COMPARE);
        }

        let (left, right) = self.bus.tick_audio(cycles / 32);
        self.audio_resampler.collect_sample(left, right);
    }

    fn render_frame<R: Renderer>(&mut self, renderer: &mut R) -> Result<(), R::Err> {
        for (i, &rgb555) in self.bus.ppu.frame_buffer().iter().enumerate() {
            self.rgba_frame_buffer[i] = Color::from_rgb555(rgb555);
        }
        renderer.render_frame(
            &self.rgba_frame_buffer,
            FrameSize { width: ppu::SCREEN_WIDTH as u32, height: ppu::SCREEN_HEIGHT as u32 },
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
        let cpu = reader.read_component::<V30Mz>("cpu")?;
        let mut bus = reader.read_component::<Bus>("bus")?;
        bus.rom = mem::take(&mut self.bus.rom);
        self.cpu = cpu;
        self.bus = bus;
        Ok(())
    }
}

impl EmulatorTrait for WsEmulator {
    type Inputs = WsInputs;
    type Config = WsEmulatorConfig;

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
        self.bus.inputs = *inputs;
        self.step_instruction();

        self.audio_resampler.output_samples(audio_output).map_err(TickError::Audio)?;

        if mem::take(&mut self.bus.ppu.frame_complete) {
            self.render_frame(renderer).map_err(TickError::Render)?;

            if mem::take(&mut self.bus.sram_dirty) {
                save_writer.persist_bytes("sav", &self.bus.sram).map_err(TickError::SaveWrite)?;
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
        self.bus.ppu.color_mode = config.color_model;
    }

    fn take_rom_from(&mut self, other: &mut Self) {
        self.bus.rom = mem::take(&mut other.bus.rom);
        self.raw_rom_bytes = mem::take(&mut other.raw_rom_bytes);
    }

    fn soft_reset(&mut self) {
        self.cpu = V30Mz::new();
    }

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let rom_bytes = mem::take(&mut self.raw_rom_bytes);
        *self = Self::create(rom_bytes, WsEmulatorConfig::default(), save_writer)
            .expect("creation during hard reset cannot fail; the ROM loaded before");
    }

    fn target_fps(&self) -> f64 {
        75.47
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

    fn test_rom() -> Vec<u8> {
        // Execution starts at FFFF:0000 = linear 0xFFFF0, which maps into the top of the
        // linear ROM window. JMP short -2 there.
        let mut rom = vec![0_u8; 0x100000];
        rom[0xFFFF0] = 0xEB;
        rom[0xFFFF1] = 0xFE;
        rom
    }

    #[test]
    fn runs_and_round_trips_state() {
        let mut emulator =
            WsEmulator::create(test_rom(), WsEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();
        for _ in 0..20_000 {
            emulator.step_instruction();
        }

        let state = emulator.save_state().unwrap();
        emulator.load_state(&state).unwrap();
        assert_eq!(emulator.save_state().unwrap(), state);
    }

    #[test]
    fn produces_frames() {
        let mut emulator =
            WsEmulator::create(test_rom(), WsEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();
        for _ in 0..200_000 {
            emulator.step_instruction();
            if mem::take(&mut emulator.bus.ppu.frame_complete) {
                return;
            }
        }
        panic!("no frame completed");
    }
}
