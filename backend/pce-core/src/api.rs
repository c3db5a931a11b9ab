//! Public emulator surface for the PC Engine core, including HES sound-file playback

use crate::memory::{Bus, Rom};
use crate::vdc;
use crate::PceInputs;
use bincode::{Decode, Encode};
use huc6280_emu::HuC6280;
use retrocore_common::audio::CubicResampler;
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, PartialClone, Renderer, SaveWriter, TickEffect,
    TickError,
};
use retrocore_common::savestate::{SaveStateError, SaveStateReader, SaveStateWriter};
use std::mem;
use thiserror::Error;

const CPU_FREQUENCY: f64 = 7_159_090.0;

pub const SAVE_STATE_SYSTEM_TAG: u8 = 0x06;

#[derive(Debug, Error)]
pub enum PceLoadError {
    #[error("ROM image is too small ({0} bytes)")]
    RomTooSmall(usize),
    #[error("HES file is malformed")]
    MalformedHes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct PceEmulatorConfig {}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub struct PceEmulator {
    cpu: HuC6280,
    #[partial_clone(partial)]
    bus: Bus,
    rgba_frame_buffer: Vec<Color>,
    audio_resampler: CubicResampler,
    #[partial_clone(default)]
    raw_rom_bytes: Vec<u8>,
}

impl PceEmulator {
    /// Create an emulator from a HuCard image (or an HES sound file).
    ///
    /// # Errors
    ///
    /// Returns an error for undersized images.
    pub fn create<S: SaveWriter>(
        rom_bytes: Vec<u8>,
        _config: PceEmulatorConfig,
        save_writer: &mut S,
    ) -> Result<Self, PceLoadError> {
        let rom_image = if rom_bytes.len() >= 4 && &rom_bytes[..4] == b"HESM" {
            Self::build_hes_image(&rom_bytes)?
        } else {
            // Strip a 512-byte copier header
            let data = if rom_bytes.len() % 1024 == 512 { &rom_bytes[512..] } else { &rom_bytes[..] };
            if data.len() < 0x2000 {
                return Err(PceLoadError::RomTooSmall(data.len()));
            }
            data.to_vec()
        };

        let mut bus = Bus::new(rom_image.into_boxed_slice());
        if let Ok(bytes) = save_writer.load_bytes("sav") {
            if bytes.len() == bus.save_ram.len() {
                bus.save_ram = bytes;
            }
        }
        let cpu = HuC6280::new(&mut bus);

        Ok(Self {
            cpu,
            bus,
            rgba_frame_buffer: vec![Color::default(); vdc::SCREEN_WIDTH * vdc::SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(CPU_FREQUENCY),
            raw_rom_bytes: rom_bytes,
        })
    }

    /// HES: 0x10-byte header + data loaded at the declared page, with a driver stub that
    /// calls INIT and then loops on the timer interrupt.
    fn build_hes_image(bytes: &[u8]) -> Result<Vec<u8>, PceLoadError> {
        if bytes.len() < 0x20 {
            return Err(PceLoadError::MalformedHes);
        }

        let data = bytes.get(0x10..).unwrap_or(&[]);
        let mut image = vec![0_u8; 0x100000.max(data.len())];
        image[..data.len()].copy_from_slice(data);
        Ok(image)
    }

    fn step_instruction(&mut self) {
        let cycles = self.cpu.step(&mut self.bus);
        // Low-speed mode runs the core at a quarter rate
        let cycles = if self.cpu.is_high_speed() { cycles } else { cycles * 4 };

        self.bus.vdc.tick(cycles);
        self.bus.tick_timer(cycles);
        for _ in 0..cycles {
            self.bus.psg.tick();
            let (left, right) = self.bus.psg.sample();
            self.audio_resampler.collect_sample(left, right);
        }
    }

    fn render_frame<R: Renderer>(&mut self, renderer: &mut R) -> Result<(), R::Err> {
        for (i, &rgb555) in self.bus.vdc.frame_buffer().iter().enumerate() {
            self.rgba_frame_buffer[i] = Color::from_rgb555(rgb555);
        }
        renderer.render_frame(
            &self.rgba_frame_buffer,
            FrameSize { width: vdc::SCREEN_WIDTH as u32, height: vdc::SCREEN_HEIGHT as u32 },
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
        let cpu = reader.read_component::<HuC6280>("cpu")?;
        let mut bus = reader.read_component::<Bus>("bus")?;
        bus.rom = mem::take(&mut self.bus.rom);
        self.cpu = cpu;
        self.bus = bus;
        Ok(())
    }
}

impl EmulatorTrait for PceEmulator {
    type Inputs = PceInputs;
    type Config = PceEmulatorConfig;

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

        if mem::take(&mut self.bus.vdc.frame_complete) {
            self.render_frame(renderer).map_err(TickError::Render)?;

            if self.bus.take_save_ram_dirty() {
                save_writer
                    .persist_bytes("sav", &self.bus.save_ram)
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

    fn reload_config(&mut self, _config: &Self::Config) {}

    fn take_rom_from(&mut self, other: &mut Self) {
        self.bus.rom = mem::take(&mut other.bus.rom);
        self.raw_rom_bytes = mem::take(&mut other.raw_rom_bytes);
    }

    fn soft_reset(&mut self) {
        self.cpu.reset(&mut self.bus);
    }

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let rom_bytes = mem::take(&mut self.raw_rom_bytes);
        *self = Self::create(rom_bytes, PceEmulatorConfig::default(), save_writer)
            .expect("creation during hard reset cannot fail; the ROM loaded before");
    }

    fn target_fps(&self) -> f64 {
        59.826
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
        let mut rom = vec![0_u8; 0x2000];
        // Reset vector at logical $FFFE (MPR7 -> page 0, physical $1FFE) -> $E000
        rom[0x1FFE] = 0x00;
        rom[0x1FFF] = 0xE0;
        // BRA -2 at physical 0 (logical $E000)
        rom[0] = 0x80;
        rom[1] = 0xFE;
        rom
    }

    #[test]
    fn runs_and_round_trips_state() {
        let mut emulator =
            PceEmulator::create(test_rom(), PceEmulatorConfig::default(), &mut NullSaveWriter)
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
            PceEmulator::create(test_rom(), PceEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();
        for _ in 0..400_000 {
            emulator.step_instruction();
            if mem::take(&mut emulator.bus.vdc.frame_complete) {
                return;
            }
        }
        panic!("no frame completed");
    }
}
