//! Traits and types that form the contract between the emulation cores and their host

use bincode::{Decode, Encode};
use std::fmt::Debug;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable, Encode, Decode)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    #[must_use]
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Convert a 15-bit BGR555 color (the native color format of several of the emulated
    /// systems) to RGB888.
    #[must_use]
    #[inline]
    pub fn from_rgb555(color: u16) -> Self {
        let r = (color & 0x1F) as u8;
        let g = ((color >> 5) & 0x1F) as u8;
        let b = ((color >> 10) & 0x1F) as u8;
        Self::rgb(expand_5bit(r), expand_5bit(g), expand_5bit(b))
    }
}

#[inline]
fn expand_5bit(component: u8) -> u8 {
    (component << 3) | (component >> 2)
}

impl Default for Color {
    #[inline]
    fn default() -> Self {
        Self::BLACK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum TimingMode {
    #[default]
    Ntsc,
    Pal,
}

/// What a single `tick` call accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEffect {
    None,
    FrameRendered,
}

pub trait Renderer {
    type Err;

    /// Render a completed frame.
    ///
    /// The frame buffer may be larger than the specified frame size, but its length must be at
    /// least `frame_size.width * frame_size.height`.
    ///
    /// # Errors
    ///
    /// Propagates any error encountered while rendering the frame.
    fn render_frame(&mut self, frame_buffer: &[Color], frame_size: FrameSize)
        -> Result<(), Self::Err>;
}

pub trait AudioOutput {
    type Err;

    /// Push one stereo audio sample.
    ///
    /// # Errors
    ///
    /// Propagates any error encountered while pushing the sample to the audio device.
    fn push_sample(&mut self, sample_l: f64, sample_r: f64) -> Result<(), Self::Err>;
}

pub trait SaveWriter {
    type Err;

    /// Read a previously persisted byte array using the given extension.
    ///
    /// # Errors
    ///
    /// Propagates any error encountered while reading.
    fn load_bytes(&mut self, extension: &str) -> Result<Vec<u8>, Self::Err>;

    /// Persist a byte slice using the given extension.
    ///
    /// # Errors
    ///
    /// Propagates any error encountered while writing.
    fn persist_bytes(&mut self, extension: &str, bytes: &[u8]) -> Result<(), Self::Err>;

    /// Read and deserialize a previously persisted value using the given extension.
    ///
    /// # Errors
    ///
    /// Propagates any error encountered while reading or deserializing.
    fn load_serialized<D: Decode<()>>(&mut self, extension: &str) -> Result<D, Self::Err>;

    /// Serialize and persist a value using the given extension.
    ///
    /// # Errors
    ///
    /// Propagates any error encountered while serializing or writing.
    fn persist_serialized<E: Encode>(&mut self, extension: &str, data: E) -> Result<(), Self::Err>;
}

pub trait PartialClone {
    /// Create a partial clone of `self`, cloning all emulation state but not necessarily
    /// read-only fields such as ROMs and firmware.
    #[must_use]
    fn partial_clone(&self) -> Self;
}

pub use retrocore_proc_macros::PartialClone;

/// The surface every per-system emulator exposes to the driver layer.
pub trait EmulatorTrait: Encode + Decode<()> + PartialClone {
    type Inputs: Default + Clone;
    type Config: Clone;

    /// Tick the emulator for a small amount of time, e.g. a single CPU instruction.
    ///
    /// Returns [`TickEffect::FrameRendered`] when a completed frame was handed to the renderer.
    ///
    /// # Errors
    ///
    /// Propagates any error encountered while rendering frames, pushing audio samples, or
    /// persisting save files.
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
        R::Err: Debug,
        A::Err: Debug,
        S::Err: Debug;

    /// Forcibly render the current frame buffer.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the renderer.
    fn force_render<R>(&mut self, renderer: &mut R) -> Result<(), R::Err>
    where
        R: Renderer;

    fn reload_config(&mut self, config: &Self::Config);

    /// Move ROM/firmware bytes out of another instance, typically one that was just replaced by
    /// a deserialized save state.
    fn take_rom_from(&mut self, other: &mut Self);

    fn soft_reset(&mut self);

    fn hard_reset<S: SaveWriter>(&mut self, save_writer: &mut S);

    fn target_fps(&self) -> f64;

    fn update_audio_output_frequency(&mut self, output_frequency: u64);
}

/// Error wrapper for the three host callbacks a tick can invoke.
#[derive(Debug, thiserror::Error)]
pub enum TickError<RErr, AErr, SErr>
where
    RErr: Debug,
    AErr: Debug,
    SErr: Debug,
{
    #[error("Error rendering frame: {0:?}")]
    Render(RErr),
    #[error("Error outputting audio samples: {0:?}")]
    Audio(AErr),
    #[error("Error persisting save file: {0:?}")]
    SaveWrite(SErr),
}
