//! Public emulator surface for the Lynx core

use crate::cart::{Cart, LnxError};
use crate::mikey::{Mikey, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::suzy::Suzy;
use crate::LynxInputs;
use bincode::{Decode, Encode};
use mos6502_emu::bus::BusInterface;
use mos6502_emu::{Mos6502, Mos6502Variant};
use retrocore_common::audio::CubicResampler;
use retrocore_common::boxedarray::BoxedByteArray;
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, PartialClone, Renderer, SaveWriter, TickEffect,
    TickError,
};
use retrocore_common::savestate::{SaveStateError, SaveStateReader, SaveStateWriter};
use std::mem;
use thiserror::Error;

const CPU_FREQUENCY: f64 = 4_000_000.0;

pub const SAVE_STATE_SYSTEM_TAG: u8 = 0x07;

#[derive(Debug, Error)]
pub enum LynxLoadError {
    #[error(transparent)]
    Cart(#[from] LnxError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct LynxEmulatorConfig {}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub(crate) struct Bus {
    ram: BoxedByteArray<0x10000>,
    pub(crate) mikey: Mikey,
    pub(crate) suzy: Suzy,
    #[partial_clone(partial)]
    pub(crate) cart: Cart,
    /// Extra cycles charged by Suzy sprite draws, drained by the coordinator
    pub(crate) stall_cycles: u32,
}

impl BusInterface for Bus {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0xFC00..=0xFCFF => {
                // CART0/CART1 data strobes live in Suzy's page
                match address {
                    0xFCB2 => self.cart.read_bank0(),
                    0xFCB3 => self.cart.read_bank1(),
                    _ => self.suzy.read_register(address),
                }
            }
            0xFD00..=0xFDFF => self.mikey.read_register(address),
            _ => self.ram[usize::from(address)],
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0xFC00..=0xFCFF => {
                self.suzy.write_register(address, value);
                if address == 0xFC91 {
                    // SPRGO: the sprite engine owns the bus until the chain completes
                    let Bus { ram, suzy, stall_cycles, .. } = self;
                    *stall_cycles += suzy.run_sprites(&mut ram[..]);
                }
            }
            0xFD00..=0xFDFF => {
                self.mikey.write_register(address, value);
                if address == 0xFD8B {
                    // IODAT bit 1 is the cartridge address data line, bit 4 the strobe
                    let iodat = self.mikey.iodat;
                    self.cart.strobe(iodat & 0x02 != 0, iodat & 0x10 != 0);
                }
            }
            _ => self.ram[usize::from(address)] = value,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialClone)]
pub struct LynxEmulator {
    cpu: Mos6502,
    #[partial_clone(partial)]
    bus: Bus,
    rgba_frame_buffer: Vec<Color>,
    audio_resampler: CubicResampler,
    #[partial_clone(default)]
    raw_rom_bytes: Vec<u8>,
}

impl LynxEmulator {
    /// Create an emulator from an LNX image (or a headerless `.o` file).
    ///
    /// # Errors
    ///
    /// Returns an error for empty images.
    pub fn create<S: SaveWriter>(
        rom_bytes: Vec<u8>,
        _config: LynxEmulatorConfig,
        _save_writer: &mut S,
    ) -> Result<Self, LynxLoadError> {
        let (cart, header) = Cart::create(&rom_bytes)?;
        if let Some(header) = &header {
            log::info!("Lynx cart '{}', bank0 page size {}", header.name, header.bank0_page_size);
        }

        let mut bus = Bus {
            ram: BoxedByteArray::new(),
            mikey: Mikey::new(),
            suzy: Suzy::new(),
            cart,
            stall_cycles: 0,
        };

        // Without the boot ROM the reset vector points into RAM; load the cart's first bank
        // at the top of RAM the way the boot ROM's loader leaves it
        let bank0_len = bus.cart.data.bank0.len().min(0x10000);
        let mut first_page = vec![0; bank0_len.min(0x2000)];
        first_page.copy_from_slice(&bus.cart.data.bank0[..first_page.len()]);
        let load_base = 0x0200;
        for (i, &byte) in first_page.iter().enumerate() {
            if load_base + i < 0xFC00 {
                bus.ram[load_base + i] = byte;
            }
        }
        bus.ram[0xFFFC] = 0x00;
        bus.ram[0xFFFD] = 0x02;

        let cpu = Mos6502::new(&mut bus, Mos6502Variant::Cmos);

        Ok(Self {
            cpu,
            bus,
            rgba_frame_buffer: vec![Color::default(); SCREEN_WIDTH * SCREEN_HEIGHT],
            audio_resampler: CubicResampler::new(CPU_FREQUENCY),
            raw_rom_bytes: rom_bytes,
        })
    }

    fn step_instruction(&mut self) {
        self.cpu.set_irq_line(self.bus.mikey.irq_line());
        let cycles = self.cpu.step(&mut self.bus) * 4 + mem::take(&mut self.bus.stall_cycles);

        self.bus.mikey.tick(cycles);
        for _ in 0..cycles / 4 {
            let (left, right) = self.bus.mikey.sample();
            self.audio_resampler.collect_sample(left, right);
        }
    }

    /// Scan the 4bpp framebuffer out of RAM through the palette.
    fn render_frame<R: Renderer>(&mut self, renderer: &mut R) -> Result<(), R::Err> {
        let base = usize::from(self.bus.mikey.display_address);
        for y in 0..SCREEN_HEIGHT {
            for x in 0..SCREEN_WIDTH {
                let byte = self.bus.ram[(base + y * SCREEN_WIDTH / 2 + x / 2) & 0xFFFF];
                let pen = if x % 2 == 0 { byte >> 4 } else { byte & 0x0F };
                self.rgba_frame_buffer[y * SCREEN_WIDTH + x] =
                    Color::from_rgb555(self.bus.mikey.pen_color(pen));
            }
        }

        renderer.render_frame(
            &self.rgba_frame_buffer,
            FrameSize { width: SCREEN_WIDTH as u32, height: SCREEN_HEIGHT as u32 },
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
        let cpu = reader.read_component::<Mos6502>("cpu")?;
        let mut bus = reader.read_component::<Bus>("bus")?;
        bus.cart.data = mem::take(&mut self.bus.cart.data);
        self.cpu = cpu;
        self.bus = bus;
        Ok(())
    }
}

impl EmulatorTrait for LynxEmulator {
    type Inputs = LynxInputs;
    type Config = LynxEmulatorConfig;

    fn tick<R, A, S>(
        &mut self,
        renderer: &mut R,
        audio_output: &mut A,
        inputs: &Self::Inputs,
        _save_writer: &mut S,
    ) -> Result<TickEffect, TickError<R::Err, A::Err, S::Err>>
    where
        R: Renderer,
        A: AudioOutput,
        S: SaveWriter,
        R::Err: std::fmt::Debug,
        A::Err: std::fmt::Debug,
        S::Err: std::fmt::Debug,
    {
        self.bus.suzy.inputs = *inputs;
        self.step_instruction();

        self.audio_resampler.output_samples(audio_output).map_err(TickError::Audio)?;

        if mem::take(&mut self.bus.mikey.frame_complete) {
            self.render_frame(renderer).map_err(TickError::Render)?;
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
        self.bus.cart.data = mem::take(&mut other.bus.cart.data);
        self.raw_rom_bytes = mem::take(&mut other.raw_rom_bytes);
    }

    fn soft_reset(&mut self) {
        self.cpu.reset(&mut self.bus);
    }

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S) {
        let rom_bytes = mem::take(&mut self.raw_rom_bytes);
        *self = Self::create(rom_bytes, LynxEmulatorConfig::default(), save_writer)
            .expect("creation during hard reset cannot fail; the ROM loaded before");
    }

    fn target_fps(&self) -> f64 {
        60.0
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
        // Headerless image: BRA -2 at the load address
        let mut rom = vec![0_u8; 2048];
        rom[0] = 0x80;
        rom[1] = 0xFE;
        rom
    }

    #[test]
    fn runs_and_round_trips_state() {
        let mut emulator =
            LynxEmulator::create(test_rom(), LynxEmulatorConfig::default(), &mut NullSaveWriter)
                .unwrap();
        for _ in 0..10_000 {
            emulator.step_instruction();
        }

        let state = emulator.save_state().unwrap();
        emulator.load_state(&state).unwrap();
        assert_eq!(emulator.save_state().unwrap(), state);
    }
}
