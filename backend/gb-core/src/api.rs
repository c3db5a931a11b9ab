//! Public emulator surface for the Game Boy core

use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::gbs::{self, GbsError, GbsPlayer};
use crate::ppu;
use crate::sm83::Sm83;
use crate::{GameBoyInputs, HardwareMode};
use bincode::{Decode, Encode};
use retrocore_common::audio::CubicResampler;
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, PartialClone, Renderer, SaveWriter, TickEffect,
    TickError,
};
use retrocore_common::savestate::{SaveStateError, SaveStateReader, SaveStateWriter};
use std::mem;
use thiserror::Error;

// 4.194304 MHz master clock / 4 = M-cycle rate; audio samples are taken per M-cycle
const APU_SAMPLE_RATE: f64 = 1_048_576.0;

pub const SAVE_STATE_SYSTEM_TAG: u8 = 0x02;

#[derive(Debug, Error)]
pub enum GameBoyLoadError {
    #[error("unsupported cartridge type byte: {0:#04X}")]
    UnsupportedMapperByte(u8),
    #[error("unsupported GBX footer mapper: {0}")]
    UnsupportedGbxMapper(String),
    #[error("invalid SRAM size byte: {0:#04X}")]
    InvalidSramByte(u8),
    #[error("ROM image is too small")]
    RomTooSmall,
    #[error("error parsing GBS file: {0}")]
    Gbs(#[from] GbsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct GameBoyEmulatorConfig {
    /// Force DMG or CGB hardware; None picks CGB when the ROM declares support.
    pub forced_hardware_mode: Option<HardwareMode>,
}

impl Default for GameBoyEmulatorConfig {
    fn default() -> Self {
        Self { forced_hardware_mode: None }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub struct GameBoyEmulator {
    cpu: Sm83,
    #[partial_clone(partial)]
    bus: Bus,
    config: GameBoyEmulatorConfig,
    rgba_frame_buffer: Vec<Color>,
    audio_resampler: CubicResampler,
    gbs_player: Option<GbsPlayer>,
    frame_count: u64,
    #[partial_clone(default)]
    raw_rom_bytes: Vec<u8>,
}

impl GameBoyEmulator {
    /// Create an emulator from a GB/GBC ROM image or a GBS sound file.
    ///
    /// # Errors
    ///
    /// Returns an error for undersized ROMs and unsupported cartridge types.
    pub fn create<S: SaveWriter>(
        rom_bytes: Vec<u8>,
        config: GameBoyEmulatorConfig,
        save_writer: &mut S,
    ) -> Result<Self, GameBoyLoadError> {
        if gbs::is_gbs(&rom_bytes) {
            return Self::create_gbs(rom_bytes, config);
        }

        if rom_bytes.len() < 0x150 {
            return Err(GameBoyLoadError::RomTooSmall);
        }

        let hardware_mode = config.forced_hardware_mode.unwrap_or_else(|| {
            // $0143 bit 7 indicates CGB support
            if rom_bytes[0x0143] & 0x80 != 0 { HardwareMode::Cgb } else { HardwareMode::Dmg }
        });

        let sav_bytes = save_writer.load_bytes("sav").ok();
        let rtc_bytes = save_writer.load_bytes("rtc").ok();
        let cartridge =
            Cartridge::create(rom_bytes.clone().into_boxed_slice(), sav_bytes, rtc_bytes)?;

        let bus = Bus::new(hardware_mode, cartridge);
        let cpu = Sm83::new(hardware_mode);

        Ok(Self {
            cpu,
            bus,
            config,
            rgba_frame_buffer: vec![Color::default(); ppu::SCREEN_WIDTH * ppu::SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(APU_SAMPLE_RATE),
            gbs_player: None,
            frame_count: 0,
            raw_rom_bytes: rom_bytes,
        })
    }

    fn create_gbs(
        rom_bytes: Vec<u8>,
        config: GameBoyEmulatorConfig,
    ) -> Result<Self, GameBoyLoadError> {
        let (player, rom_image) = GbsPlayer::parse(&rom_bytes)?;
        let cartridge = Cartridge::create(rom_image.into_boxed_slice(), None, None)?;

        let mut bus = Bus::new(HardwareMode::Dmg, cartridge);
        let mut cpu = Sm83::new(HardwareMode::Dmg);
        player.install(&mut cpu, &mut bus);

        Ok(Self {
            cpu,
            bus,
            config,
            rgba_frame_buffer: vec![Color::default(); ppu::SCREEN_WIDTH * ppu::SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(APU_SAMPLE_RATE),
            gbs_player: Some(player),
            frame_count: 0,
            raw_rom_bytes: rom_bytes,
        })
    }

    fn step_instruction(&mut self) {
        if let Some(player) = &mut self.gbs_player {
            player.drive(&mut self.cpu, &mut self.bus, self.frame_count);
        }

        let t_cycles = self.cpu.execute_instruction(&mut self.bus);
        let m_cycles = t_cycles / 4;

        for _ in 0..m_cycles {
            self.bus.tick_m_cycle();
            let (left, right) = self.bus.apu.sample();
            if !self.bus.double_speed {
                self.audio_resampler.collect_sample(left, right);
            }
        }

        // STOP-based speed switching is detected by the armed KEY1 bit
        self.bus.maybe_switch_speed();
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

    /// Serialize the full machine state.
    ///
    /// # Errors
    ///
    /// Propagates component encoding errors.
    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        let mut writer = SaveStateWriter::new(SAVE_STATE_SYSTEM_TAG);
        writer.write_component("cpu", &self.cpu)?;
        writer.write_component("bus", &self.bus)?;
        writer.write_component("gbs", &self.gbs_player)?;
        writer.write_component("frames", &self.frame_count)?;
        Ok(writer.finish())
    }

    /// Restore a previously saved state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is malformed or for another system.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let reader = SaveStateReader::new(bytes, SAVE_STATE_SYSTEM_TAG)?;
        let cpu = reader.read_component::<Sm83>("cpu")?;
        let mut bus = reader.read_component::<Bus>("bus")?;
        let gbs_player = reader.read_component::<Option<GbsPlayer>>("gbs")?;
        let frame_count = reader.read_component::<u64>("frames")?;

        bus.cartridge.take_rom_from(&mut self.bus.cartridge);
        self.cpu = cpu;
        self.bus = bus;
        self.gbs_player = gbs_player;
        self.frame_count = frame_count;
        Ok(())
    }
}

impl EmulatorTrait for GameBoyEmulator {
    type Inputs = GameBoyInputs;
    type Config = GameBoyEmulatorConfig;

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

        if self.bus.ppu.take_frame_complete() {
            self.frame_count += 1;
            self.bus.cartridge.update_rtc();
            self.render_frame(renderer).map_err(TickError::Render)?;

            if self.bus.cartridge.get_and_clear_sram_dirty() {
                self.bus.cartridge.persist_battery(save_writer).map_err(TickError::SaveWrite)?;
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
        self.bus.cartridge.take_rom_from(&mut other.bus.cartridge);
        self.raw_rom_bytes = mem::take(&mut other.raw_rom_bytes);
    }

    fn soft_reset(&mut self) {
        self.cpu = Sm83::new(self.bus.hardware_mode);
    }

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let rom_bytes = mem::take(&mut self.raw_rom_bytes);
        *self = Self::create(rom_bytes, self.config, save_writer)
            .expect("creation during hard reset cannot fail; the ROM loaded before");
    }

    fn target_fps(&self) -> f64 {
        4_194_304.0 / (456.0 * 154.0)
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
        let mut rom = vec![0_u8; 32 * 1024];
        // JR -2 at the entry point
        rom[0x0100] = 0x18;
        rom[0x0101] = 0xFE;
        rom[0x0147] = 0x00;
        rom[0x0149] = 0x00;
        rom
    }

    #[test]
    fn save_state_round_trips() {
        let mut emulator = GameBoyEmulator::create(
            test_rom(),
            GameBoyEmulatorConfig::default(),
            &mut NullSaveWriter,
        )
        .unwrap();

        for _ in 0..10_000 {
            emulator.step_instruction();
        }

        let state = emulator.save_state().unwrap();
        emulator.load_state(&state).unwrap();
        let state2 = emulator.save_state().unwrap();
        assert_eq!(state, state2);
    }

    #[test]
    fn produces_frames() {
        let mut emulator = GameBoyEmulator::create(
            test_rom(),
            GameBoyEmulatorConfig::default(),
            &mut NullSaveWriter,
        )
        .unwrap();

        for _ in 0..100_000 {
            emulator.step_instruction();
            if emulator.bus.ppu.take_frame_complete() {
                return;
            }
        }
        panic!("no frame completed");
    }
}
