//! Public emulator surface for the SNES core

use crate::apu::SpcRegisters;
use crate::memory::{Bus, Cartridge, CartridgeLayout, Rom};
use crate::ppu::{self, PpuEvents};
use crate::{dma, SnesInputs};
use bincode::{Decode, Encode};
use retrocore_common::audio::CubicResampler;
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, PartialClone, Renderer, SaveWriter, TickEffect,
    TickError,
};
use retrocore_common::savestate::{SaveStateError, SaveStateReader, SaveStateWriter};
use snes_coprocessors::{CoprocessorSlot, SnesCoprocessorError};
use std::mem;
use thiserror::Error;
use wdc65816_emu::Wdc65816;

const DSP_SAMPLE_RATE: f64 = 32_040.0;
const MASTER_CYCLES_PER_DOT: u64 = 4;

pub const SAVE_STATE_SYSTEM_TAG: u8 = 0x04;

#[derive(Debug, Error)]
pub enum SnesLoadError {
    #[error("ROM image is too small ({0} bytes)")]
    RomTooSmall(usize),
    #[error(transparent)]
    Coprocessor(#[from] SnesCoprocessorError),
    #[error("SPC file is malformed")]
    MalformedSpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct SnesEmulatorConfig {
    /// Coprocessor firmware supplied by the host (DSP-1..4, ST010/011, ST018).
    pub firmware_loaded: bool,
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub struct SnesEmulator {
    cpu: Wdc65816,
    #[partial_clone(partial)]
    bus: Bus,
    config: SnesEmulatorConfig,
    rgba_frame_buffer: Vec<Color>,
    audio_resampler: CubicResampler,
    ppu_cycle_debt: u64,
    spc_playback: bool,
    #[partial_clone(default)]
    raw_rom_bytes: Vec<u8>,
}

impl SnesEmulator {
    /// Create an emulator from a SNES ROM (or an SPC audio snapshot).
    ///
    /// # Errors
    ///
    /// Returns an error for undersized ROMs and missing coprocessor firmware.
    pub fn create<S: SaveWriter>(
        rom_bytes: Vec<u8>,
        config: SnesEmulatorConfig,
        save_writer: &mut S,
    ) -> Result<Self, SnesLoadError> {
        if rom_bytes.len() >= 0x100 && &rom_bytes[..27] == b"SNES-SPC700 Sound File Data" {
            return Self::create_spc(rom_bytes, config);
        }

        // Strip a 512-byte copier header if the size is 512 mod 1024
        let rom_bytes_clean: Vec<u8> = if rom_bytes.len() % 1024 == 512 {
            rom_bytes[512..].to_vec()
        } else {
            rom_bytes.clone()
        };

        if rom_bytes_clean.len() < 0x8000 {
            return Err(SnesLoadError::RomTooSmall(rom_bytes_clean.len()));
        }

        let layout = CartridgeLayout::detect(&rom_bytes_clean);
        let header_base = match layout {
            CartridgeLayout::LoRom => 0x7FC0,
            CartridgeLayout::HiRom | CartridgeLayout::ExHiRom => 0xFFC0,
        };
        let sram_size_byte = rom_bytes_clean.get(header_base + 0x18).copied().unwrap_or(0);
        let sram_len = if sram_size_byte == 0 || sram_size_byte > 0x0C {
            0
        } else {
            0x400_usize << sram_size_byte
        };

        let sav_bytes = save_writer.load_bytes("srm").ok();
        let sram = match sav_bytes {
            Some(bytes) if bytes.len() == sram_len => bytes,
            _ => vec![0; sram_len],
        };

        let coprocessor = CoprocessorSlot::detect(&rom_bytes_clean, header_base)?;
        if !matches!(coprocessor, CoprocessorSlot::None) {
            log::info!("cartridge coprocessor: {}", coprocessor.name());
        }
        log::info!("cartridge layout: {layout:?}, SRAM {sram_len} bytes");

        let cartridge = Cartridge {
            rom: Rom(rom_bytes_clean.into_boxed_slice()),
            sram: sram.into_boxed_slice(),
            layout,
            sram_dirty: false,
            coprocessor,
        };

        let mut bus = Bus::new(cartridge);
        let mut cpu = Wdc65816::new();
        cpu.reset(&mut bus);

        Ok(Self {
            cpu,
            bus,
            config,
            rgba_frame_buffer: vec![Color::default(); ppu::SCREEN_WIDTH * ppu::SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(DSP_SAMPLE_RATE),
            ppu_cycle_debt: 0,
            spc_playback: false,
            raw_rom_bytes: rom_bytes,
        })
    }

    fn create_spc(
        spc_bytes: Vec<u8>,
        config: SnesEmulatorConfig,
    ) -> Result<Self, SnesLoadError> {
        // SPC layout: $25 PC, $27 A, $28 X, $29 Y, $2A PSW, $2B SP, $100 RAM, $10100 DSP regs
        if spc_bytes.len() < 0x10180 {
            return Err(SnesLoadError::MalformedSpc);
        }

        let registers = SpcRegisters {
            pc: u16::from_le_bytes([spc_bytes[0x25], spc_bytes[0x26]]),
            a: spc_bytes[0x27],
            x: spc_bytes[0x28],
            y: spc_bytes[0x29],
            psw: spc_bytes[0x2A],
            sp: spc_bytes[0x2B],
        };

        let cartridge = Cartridge {
            rom: Rom(vec![0; 0x8000].into_boxed_slice()),
            sram: vec![].into_boxed_slice(),
            layout: CartridgeLayout::LoRom,
            sram_dirty: false,
            coprocessor: CoprocessorSlot::None,
        };

        let mut bus = Bus::new(cartridge);
        bus.apu.load_spc_snapshot(
            &spc_bytes[0x100..0x10100],
            &spc_bytes[0x10100..0x10180],
            registers,
        );

        let mut cpu = Wdc65816::new();
        cpu.reset(&mut bus);

        Ok(Self {
            cpu,
            bus,
            config,
            rgba_frame_buffer: vec![Color::default(); ppu::SCREEN_WIDTH * ppu::SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(DSP_SAMPLE_RATE),
            ppu_cycle_debt: 0,
            spc_playback: true,
            raw_rom_bytes: spc_bytes,
        })
    }

    fn step_instruction(&mut self) {
        let start_cycles = self.bus.elapsed_master_cycles;
        self.cpu.step(&mut self.bus);

        // GPDMA fires after the triggering instruction completes
        let stolen = dma::run_gpdma(&mut self.bus);
        self.bus.elapsed_master_cycles += stolen;

        let elapsed = self.bus.elapsed_master_cycles - start_cycles;

        // Let the cartridge coprocessor catch up to the CPU
        self.bus.cartridge.coprocessor.run(elapsed, &self.bus.cartridge.rom.0);

        // Advance the PPU in dot units
        let total = elapsed + self.ppu_cycle_debt;
        self.ppu_cycle_debt = total % MASTER_CYCLES_PER_DOT;
        let events = self.bus.ppu.advance_dots(total / MASTER_CYCLES_PER_DOT);
        self.process_ppu_events(events);

        // APU catch-up and sample collection
        self.bus.apu.catch_up(elapsed);
        let samples: Vec<(f64, f64)> = self.bus.apu.drain_samples().collect();
        for (left, right) in samples {
            self.audio_resampler.collect_sample(left, right);
        }
    }

    fn process_ppu_events(&mut self, events: PpuEvents) {
        if events.entered_vblank {
            self.bus.nmi_flag = true;
            if self.bus.auto_joypad_read {
                self.bus.input.start_auto_read();
                self.bus.input.perform_auto_read();
            }
        }
        if events.frame_start {
            self.bus.nmi_flag = false;
            dma::hdma_frame_init(&mut self.bus);
        }
        if events.entered_hblank && !self.bus.ppu.in_vblank() {
            let stolen = dma::run_hdma_for_line(&mut self.bus);
            self.bus.elapsed_master_cycles += stolen;
        }
        if events.line_start {
            // H/V timer IRQ: V compare at line start covers the vtime-only and h+v modes
            let scanline = self.bus.ppu.scanline;
            if self.bus.vtime_irq_enabled && scanline == self.bus.vtime {
                self.bus.irq_flag = true;
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

    /// Serialize the full machine state.
    ///
    /// # Errors
    ///
    /// Propagates component encoding errors.
    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        let mut writer = SaveStateWriter::new(SAVE_STATE_SYSTEM_TAG);
        writer.write_component("cpu", &self.cpu)?;
        writer.write_component("bus", &self.bus)?;
        writer.write_component("spc_playback", &self.spc_playback)?;
        Ok(writer.finish())
    }

    /// Restore a previously saved state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is malformed or for another system.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let reader = SaveStateReader::new(bytes, SAVE_STATE_SYSTEM_TAG)?;
        let cpu = reader.read_component::<Wdc65816>("cpu")?;
        let mut bus = reader.read_component::<Bus>("bus")?;
        let spc_playback = reader.read_component::<bool>("spc_playback")?;

        bus.cartridge.rom = mem::take(&mut self.bus.cartridge.rom);
        bus.cartridge.coprocessor.take_rom_from(&mut self.bus.cartridge.coprocessor);
        self.cpu = cpu;
        self.bus = bus;
        self.spc_playback = spc_playback;
        Ok(())
    }
}

impl EmulatorTrait for SnesEmulator {
    type Inputs = SnesInputs;
    type Config = SnesEmulatorConfig;

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
        self.bus.input.set_inputs(*inputs);
        self.step_instruction();

        self.audio_resampler.output_samples(audio_output).map_err(TickError::Audio)?;

        if self.bus.ppu.take_frame_complete() {
            self.render_frame(renderer).map_err(TickError::Render)?;

            if mem::take(&mut self.bus.cartridge.sram_dirty)
                && !self.bus.cartridge.sram.is_empty()
            {
                save_writer
                    .persist_bytes("srm", &self.bus.cartridge.sram)
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
        self.bus.cartridge.rom = mem::take(&mut other.bus.cartridge.rom);
        self.bus.cartridge.coprocessor.take_rom_from(&mut other.bus.cartridge.coprocessor);
        self.raw_rom_bytes = mem::take(&mut other.raw_rom_bytes);
    }

    fn soft_reset(&mut self) {
        self.cpu.reset(&mut self.bus);
    }

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let rom_bytes = mem::take(&mut self.raw_rom_bytes);
        *self = Self::create(rom_bytes, self.config, save_writer)
            .expect("creation during hard reset cannot fail; the ROM loaded before");
    }

    fn target_fps(&self) -> f64 {
        60.0988
    }

    fn update_audio_output_frequency(&mut self, output_frequency: u64) {
        self.audio_resampler.update_output_frequency(output_frequency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

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
        let mut rom = vec![0_u8; 0x80000];
        // Reset vector -> $8000; BRA -2 loop at $8000
        rom[0x7FFC] = 0x00;
        rom[0x7FFD] = 0x80;
        rom[0x0000] = 0x80;
        rom[0x0001] = 0xFE;
        rom
    }

    #[test]
    fn save_state_round_trips() {
        let mut emulator =
            SnesEmulator::create(test_rom(), SnesEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();
        for _ in 0..5_000 {
            emulator.step_instruction();
        }

        let state = emulator.save_state().unwrap();
        emulator.load_state(&state).unwrap();
        assert_eq!(emulator.save_state().unwrap(), state);
    }

    #[test]
    fn produces_frames() {
        let mut emulator =
            SnesEmulator::create(test_rom(), SnesEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();
        for _ in 0..400_000 {
            emulator.step_instruction();
            if emulator.bus.ppu.take_frame_complete() {
                return;
            }
        }
        panic!("no frame completed");
    }
}
