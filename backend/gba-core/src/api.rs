//! Public emulator surface for the GBA core

use crate::cartridge::CartridgeState;
use crate::dma::DmaTrigger;
use crate::interrupts::IrqSource;
use crate::memory::{Bus, Rom};
use crate::ppu;
use crate::GbaInputs;
use arm7tdmi_emu::bus::{BusInterface, MemoryCycle};
use arm7tdmi_emu::Arm7Tdmi;
use bincode::{Decode, Encode};
use retrocore_common::audio::CubicResampler;
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, PartialClone, Renderer, SaveWriter, TickEffect,
    TickError,
};
use retrocore_common::num::GetBit;
use retrocore_common::savestate::{SaveStateError, SaveStateReader, SaveStateWriter};
use std::mem;
use thiserror::Error;

const CPU_FREQUENCY: f64 = 16_777_216.0;

pub const SAVE_STATE_SYSTEM_TAG: u8 = 0x05;

#[derive(Debug, Error)]
pub enum GbaLoadError {
    #[error("ROM image is too small ({0} bytes)")]
    RomTooSmall(usize),
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct GbaEmulatorConfig {
    /// Optional BIOS image; without one, a minimal stub handles SWI-free games.
    pub bios: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub struct GbaEmulator {
    cpu: Arm7Tdmi,
    #[partial_clone(partial)]
    bus: Bus,
    rgba_frame_buffer: Vec<Color>,
    audio_resampler: CubicResampler,
    sample_counter: u64,
    frame_ready: bool,
    #[partial_clone(default)]
    raw_rom_bytes: Vec<u8>,
}

impl GbaEmulator {
    /// Create an emulator from GBA ROM data.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM is too small to contain the cartridge header.
    pub fn create<S: SaveWriter>(
        rom_bytes: Vec<u8>,
        config: GbaEmulatorConfig,
        save_writer: &mut S,
    ) -> Result<Self, GbaLoadError> {
        if rom_bytes.len() < 0xC0 {
            return Err(GbaLoadError::RomTooSmall(rom_bytes.len()));
        }

        let save_bytes = save_writer.load_bytes("sav").ok();
        let cartridge = CartridgeState::new(&rom_bytes, save_bytes);
        let bios = config.bios.unwrap_or_else(|| vec![0; 0x4000]);

        let mut bus = Bus::new(rom_bytes.clone().into_boxed_slice(), cartridge, bios);
        let mut cpu = Arm7Tdmi::new();
        // Boot straight into the cartridge the way the BIOS hands off
        cpu.set_pc(0x0800_0000);

        Ok(Self {
            cpu,
            bus,
            rgba_frame_buffer: vec![Color::default(); ppu::SCREEN_WIDTH * ppu::SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(CPU_FREQUENCY / 512.0),
            sample_counter: 0,
            frame_ready: false,
            raw_rom_bytes: rom_bytes,
        })
    }

    fn step_instruction(&mut self) {
        let start = self.bus.elapsed_cycles;

        if self.bus.halted {
            // Halt until any enabled interrupt flag is raised
            self.bus.elapsed_cycles += 4;
            if self.bus.interrupts.enabled & self.bus.interrupts.flags != 0 {
                self.bus.halted = false;
            }
        } else {
            self.cpu.execute_instruction(&mut self.bus);
        }

        let elapsed = (self.bus.elapsed_cycles - start) as u32;

        // PPU
        let events = self.bus.ppu.tick(elapsed);
        if events.entered_vblank {
            self.frame_ready = true;
            self.bus.dma.notify_vblank();
            if self.bus.ppu.read_register(0x0400_0004).bit(3) {
                self.bus.interrupts.set_flag(IrqSource::VBlank);
            }
        }
        if events.entered_hblank {
            self.bus.dma.notify_hblank();
            if self.bus.ppu.read_register(0x0400_0004).bit(4) {
                self.bus.interrupts.set_flag(IrqSource::HBlank);
            }
        }
        if events.vcounter_match && self.bus.ppu.read_register(0x0400_0004).bit(5) {
            self.bus.interrupts.set_flag(IrqSource::VCounter);
        }

        // Timers and APU
        self.bus.timers.tick(elapsed, &mut self.bus.interrupts);
        let overflows = self.bus.timers.overflowed;
        let fifo_refills = self.bus.apu.tick(elapsed, &overflows);
        if fifo_refills[0] {
            self.bus.dma.notify_fifo(1);
        }
        if fifo_refills[1] {
            self.bus.dma.notify_fifo(2);
        }

        // Audio sampling at CPU/512 rate
        self.sample_counter += u64::from(elapsed);
        while self.sample_counter >= 512 {
            self.sample_counter -= 512;
            let (left, right) = self.bus.apu.sample();
            self.audio_resampler.collect_sample(left, right);
        }

        self.service_dma();
    }

    fn service_dma(&mut self) {
        for index in 0..4 {
            if !self.bus.dma.channels[index].pending {
                continue;
            }
            self.bus.dma.channels[index].pending = false;

            let channel = self.bus.dma.channels[index].clone();
            let is_fifo = channel.trigger() == DmaTrigger::Special && (index == 1 || index == 2);

            let count = if is_fifo {
                4
            } else if channel.word_count == 0 {
                if index == 3 { 0x10000 } else { 0x4000 }
            } else {
                u32::from(channel.word_count)
            };

            let word = channel.word_transfer() || is_fifo;
            let unit: u32 = if word { 4 } else { 2 };

            let mut source = self.bus.dma.channels[index].internal_source & !(unit - 1);
            let mut destination = self.bus.dma.channels[index].internal_destination & !(unit - 1);

            for _ in 0..count {
                if word {
                    let value = self.bus.read_word(source, MemoryCycle::N);
                    self.bus.write_word(destination, value, MemoryCycle::N);
                } else {
                    let value = self.bus.read_halfword(source, MemoryCycle::N);
                    self.bus.write_halfword(destination, value, MemoryCycle::N);
                }

                source = match channel.source_adjust() {
                    0 => source.wrapping_add(unit),
                    1 => source.wrapping_sub(unit),
                    _ => source,
                };
                if !is_fifo {
                    destination = match channel.destination_adjust() {
                        0 | 3 => destination.wrapping_add(unit),
                        1 => destination.wrapping_sub(unit),
                        _ => destination,
                    };
                }
            }

            let channel_state = &mut self.bus.dma.channels[index];
            channel_state.internal_source = source;
            channel_state.internal_destination = destination;

            if channel.repeat() && channel.trigger() != DmaTrigger::Immediate {
                if channel.destination_adjust() == 3 {
                    channel_state.internal_destination = channel_state.destination;
                }
            } else {
                channel_state.control &= !(1 << 15);
            }

            if channel.irq_enabled() {
                self.bus.interrupts.set_flag(match index {
                    0 => IrqSource::Dma0,
                    1 => IrqSource::Dma1,
                    2 => IrqSource::Dma2,
                    _ => IrqSource::Dma3,
                });
            }
        }
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

    /// Restore a previously saved state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is malformed or for another system.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let reader = SaveStateReader::new(bytes, SAVE_STATE_SYSTEM_TAG)?;
        let cpu = reader.read_component::<Arm7Tdmi>("cpu")?;
        let mut bus = reader.read_component::<Bus>("bus")?;
        bus.rom = mem::take(&mut self.bus.rom);
        self.cpu = cpu;
        self.bus = bus;
        Ok(())
    }
}

impl EmulatorTrait for GbaEmulator {
    type Inputs = GbaInputs;
    type Config = GbaEmulatorConfig;

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

        if mem::take(&mut self.frame_ready) {
            self.render_frame(renderer).map_err(TickError::Render)?;

            if self.bus.cartridge.take_dirty() {
                if let Some(bytes) = self.bus.cartridge.save_bytes() {
                    save_writer.persist_bytes("sav", bytes).map_err(TickError::SaveWrite)?;
                }
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
        self.cpu.reset();
        self.cpu.set_pc(0x0800_0000);
    }

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let rom_bytes = mem::take(&mut self.raw_rom_bytes);
        *self = Self::create(rom_bytes, GbaEmulatorConfig::default(), save_writer)
            .expect("creation during hard reset cannot fail; the ROM loaded before");
    }

    fn target_fps(&self) -> f64 {
        CPU_FREQUENCY / (f64::from(ppu::CYCLES_PER_LINE) * f64::from(ppu::TOTAL_LINES))
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
        let mut rom = vec![0_u8; 0x1000];
        // B . (infinite loop) at the entry point
        rom[0..4].copy_from_slice(&0xEAFF_FFFE_u32.to_le_bytes());
        rom
    }

    #[test]
    fn runs_and_round_trips_state() {
        let mut emulator =
            GbaEmulator::create(test_rom(), GbaEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();

        for _ in 0..10_000 {
            emulator.step_instruction();
        }

        let state = emulator.save_state().unwrap();
        emulator.load_state(&state).unwrap();
        assert_eq!(emulator.save_state().unwrap(), state);
    }

    #[test]
    fn produces_frames() {
        let mut emulator =
            GbaEmulator::create(test_rom(), GbaEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();
        for _ in 0..200_000 {
            emulator.step_instruction();
            if mem::take(&mut emulator.frame_ready) {
                return;
            }
        }
        panic!("no frame completed");
    }
}
