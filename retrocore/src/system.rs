//! The `System` wrapper: one enum over all backends plus the host-facing buffers

use gb_core::{GameBoyEmulator, GameBoyEmulatorConfig, GameBoyInputs, GameBoyLoadError};
use gba_core::{GbaEmulator, GbaEmulatorConfig, GbaInputs, GbaLoadError};
use lynx_core::{LynxEmulator, LynxEmulatorConfig, LynxInputs, LynxLoadError};
use nes_core::{NesEmulator, NesEmulatorConfig, NesInputs, NesLoadError};
use pce_core::{PceEmulator, PceEmulatorConfig, PceInputs, PceLoadError};
use retrocore_common::frontend::{
    AudioOutput, Color, EmulatorTrait, FrameSize, Renderer, SaveWriter, TickEffect,
};
use retrocore_common::rewind::RewindManager;
use retrocore_common::savestate::SaveStateError;
use smsgg_core::{SmsGgEmulator, SmsGgEmulatorConfig, SmsGgHardware, SmsGgInputs, SmsGgLoadError};
use snes_core::{SnesEmulator, SnesEmulatorConfig, SnesInputs, SnesLoadError};
use std::collections::VecDeque;
use thiserror::Error;
use ws_core::{WsEmulator, WsEmulatorConfig, WsInputs, WsLoadError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not determine the system for '{path}'")]
    UnknownSystem { path: String },
    #[error("NES: {0}")]
    Nes(#[from] NesLoadError),
    #[error("Game Boy: {0}")]
    GameBoy(#[from] GameBoyLoadError),
    #[error("SMS/Game Gear: {0}")]
    SmsGg(#[from] SmsGgLoadError),
    #[error("SNES: {0}")]
    Snes(#[from] SnesLoadError),
    #[error("GBA: {0}")]
    Gba(#[from] GbaLoadError),
    #[error("PC Engine: {0}")]
    Pce(#[from] PceLoadError),
    #[error("Lynx: {0}")]
    Lynx(#[from] LynxLoadError),
    #[error("WonderSwan: {0}")]
    Ws(#[from] WsLoadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemKind {
    Nes,
    GameBoy,
    MasterSystem,
    GameGear,
    Snes,
    Gba,
    PcEngine,
    Lynx,
    WonderSwan,
}

impl SystemKind {
    /// Pick a system from the file extension, falling back to header sniffing.
    fn detect(path: &str, bytes: &[u8]) -> Option<Self> {
        let extension = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match extension.as_str() {
            "nes" | "nsf" | "nsfe" => return Some(Self::Nes),
            "gb" | "gbc" | "gbx" | "gbs" => return Some(Self::GameBoy),
            "sms" => return Some(Self::MasterSystem),
            "gg" => return Some(Self::GameGear),
            "sfc" | "smc" | "spc" => return Some(Self::Snes),
            "gba" => return Some(Self::Gba),
            "pce" | "hes" => return Some(Self::PcEngine),
            "lnx" | "o" => return Some(Self::Lynx),
            "ws" | "wsc" => return Some(Self::WonderSwan),
            _ => {}
        }

        if bytes.starts_with(b"NES\x1A") || bytes.starts_with(b"NESM\x1A") {
            Some(Self::Nes)
        } else if bytes.starts_with(b"GBS") {
            Some(Self::GameBoy)
        } else if bytes.starts_with(b"LYNX") {
            Some(Self::Lynx)
        } else if bytes.starts_with(b"HESM") {
            Some(Self::PcEngine)
        } else if bytes.len() >= 0x108 && bytes[0x104..0x108] == [0xCE, 0xED, 0x66, 0x66] {
            Some(Self::GameBoy)
        } else {
            None
        }
    }
}

/// Combined input state; each backend reads its own field.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInputs {
    pub nes: NesInputs,
    pub game_boy: GameBoyInputs,
    pub smsgg: SmsGgInputs,
    pub snes: SnesInputs,
    pub gba: GbaInputs,
    pub pce: PceInputs,
    pub lynx: LynxInputs,
    pub ws: WsInputs,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
    pub frame_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    FrameReady,
    StateLoaded,
    SaveWritten,
}

enum Emulator {
    Nes(Box<NesEmulator>),
    GameBoy(Box<GameBoyEmulator>),
    SmsGg(Box<SmsGgEmulator>),
    Snes(Box<SnesEmulator>),
    Gba(Box<GbaEmulator>),
    Pce(Box<PceEmulator>),
    Lynx(Box<LynxEmulator>),
    Ws(Box<WsEmulator>),
}

// Host-callback plumbing --------------------------------------------------------------------

struct FrameCapture {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    captured: bool,
}

impl Renderer for FrameCapture {
    type Err = std::convert::Infallible;

    fn render_frame(
        &mut self,
        frame_buffer: &[Color],
        frame_size: FrameSize,
    ) -> Result<(), Self::Err> {
        self.width = frame_size.width;
        self.height = frame_size.height;
        let pixel_count = (frame_size.width * frame_size.height) as usize;
        self.pixels.clear();
        self.pixels.extend(frame_buffer.iter().take(pixel_count).map(|color| {
            u32::from_le_bytes([color.r, color.g, color.b, color.a])
        }));
        self.captured = true;
        Ok(())
    }
}

struct AudioCapture {
    samples: VecDeque<i16>,
}

impl AudioOutput for AudioCapture {
    type Err = std::convert::Infallible;

    fn push_sample(&mut self, sample_l: f64, sample_r: f64) -> Result<(), Self::Err> {
        self.samples.push_back((sample_l.clamp(-1.0, 1.0) * 32767.0) as i16);
        self.samples.push_back((sample_r.clamp(-1.0, 1.0) * 32767.0) as i16);
        Ok(())
    }
}

/// In-memory battery store; the embedding host flushes these to disk.
#[derive(Default)]
struct MemorySaveWriter {
    saves: std::collections::HashMap<String, Vec<u8>>,
    wrote: bool,
}

#[derive(Debug, Error)]
#[error("no saved data")]
struct NoSave;

impl SaveWriter for MemorySaveWriter {
    type Err = NoSave;

    fn load_bytes(&mut self, extension: &str) -> Result<Vec<u8>, Self::Err> {
        self.saves.get(extension).cloned().ok_or(NoSave)
    }

    fn persist_bytes(&mut self, extension: &str, bytes: &[u8]) -> Result<(), Self::Err> {
        self.saves.insert(extension.into(), bytes.to_vec());
        self.wrote = true;
        Ok(())
    }

    fn load_serialized<D: bincode::Decode<()>>(
        &mut self,
        extension: &str,
    ) -> Result<D, Self::Err> {
        let bytes = self.saves.get(extension).ok_or(NoSave)?;
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(|_| NoSave)
    }

    fn persist_serialized<E: bincode::Encode>(
        &mut self,
        extension: &str,
        data: E,
    ) -> Result<(), Self::Err> {
        let bytes =
            bincode::encode_to_vec(data, bincode::config::standard()).map_err(|_| NoSave)?;
        self.saves.insert(extension.into(), bytes);
        self.wrote = true;
        Ok(())
    }
}

/// Rewind control surface returned by [`System::rewind`].
pub struct RewindHandle<'a> {
    system: &'a mut System,
}

impl RewindHandle<'_> {
    pub fn start(&mut self) {
        self.system.rewind.start();
    }

    pub fn stop(&mut self) {
        self.system.rewind.stop();
    }

    /// Step back one captured frame, restoring the machine state.
    ///
    /// # Errors
    ///
    /// Propagates save-state errors from the restore.
    pub fn pop(&mut self) -> Result<bool, SaveStateError> {
        let Some((state, _inputs)) = self.system.rewind.pop_snapshot() else {
            return Ok(false);
        };
        self.system.load_state(&state)?;
        Ok(true)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.system.rewind.snapshot_count()
    }
}

pub struct System {
    emulator: Emulator,
    kind: SystemKind,
    inputs: SystemInputs,
    frame: FrameCapture,
    audio: AudioCapture,
    saves: MemorySaveWriter,
    events: VecDeque<SystemEvent>,
    frame_number: u64,
    rewind: RewindManager<()>,
}

impl System {
    /// Load a ROM, detecting the target system from the path hint and file contents.
    ///
    /// # Errors
    ///
    /// Returns an error when the system cannot be identified or the backend rejects the ROM.
    pub fn load_rom(path_hint: &str, bytes: Vec<u8>) -> Result<Self, LoadError> {
        let kind = SystemKind::detect(path_hint, &bytes)
            .ok_or_else(|| LoadError::UnknownSystem { path: path_hint.into() })?;

        let mut saves = MemorySaveWriter::default();
        let emulator = match kind {
            SystemKind::Nes => Emulator::Nes(Box::new(NesEmulator::create(
                bytes,
                NesEmulatorConfig::default(),
                &mut saves,
            )?)),
            SystemKind::GameBoy => Emulator::GameBoy(Box::new(GameBoyEmulator::create(
                bytes,
                GameBoyEmulatorConfig::default(),
                &mut saves,
            )?)),
            SystemKind::MasterSystem | SystemKind::GameGear => {
                let hardware = if kind == SystemKind::GameGear {
                    SmsGgHardware::GameGear
                } else {
                    SmsGgHardware::MasterSystem
                };
                Emulator::SmsGg(Box::new(SmsGgEmulator::create(
                    bytes,
                    SmsGgEmulatorConfig { hardware },
                    &mut saves,
                )?))
            }
            SystemKind::Snes => Emulator::Snes(Box::new(SnesEmulator::create(
                bytes,
                SnesEmulatorConfig::default(),
                &mut saves,
            )?)),
            SystemKind::Gba => Emulator::Gba(Box::new(GbaEmulator::create(
                bytes,
                GbaEmulatorConfig::default(),
                &mut saves,
            )?)),
            SystemKind::PcEngine => Emulator::Pce(Box::new(PceEmulator::create(
                bytes,
                PceEmulatorConfig::default(),
                &mut saves,
            )?)),
            SystemKind::Lynx => Emulator::Lynx(Box::new(LynxEmulator::create(
                bytes,
                LynxEmulatorConfig::default(),
                &mut saves,
            )?)),
            SystemKind::WonderSwan => Emulator::Ws(Box::new(WsEmulator::create(
                bytes,
                WsEmulatorConfig::default(),
                &mut saves,
            )?)),
        };

        Ok(Self {
            emulator,
            kind,
            inputs: SystemInputs::default(),
            frame: FrameCapture { width: 0, height: 0, pixels: Vec::new(), captured: false },
            audio: AudioCapture { samples: VecDeque::new() },
            saves,
            events: VecDeque::new(),
            frame_number: 0,
            rewind: RewindManager::new(64 * 1024 * 1024),
        })
    }

    #[must_use]
    pub fn kind(&self) -> SystemKind {
        self.kind
    }

    pub fn set_inputs(&mut self, inputs: SystemInputs) {
        self.inputs = inputs;
    }

    pub fn reset(&mut self, cold: bool) {
        macro_rules! dispatch {
            ($($variant:ident),*) => {
                match &mut self.emulator {
                    $(Emulator::$variant(emulator) => {
                        if cold {
                            emulator.hard_reset(&mut self.saves);
                        } else {
                            emulator.soft_reset();
                        }
                    })*
                }
            };
        }
        dispatch!(Nes, GameBoy, SmsGg, Snes, Gba, Pce, Lynx, Ws);
    }

    /// Run until the next frame is complete.
    pub fn run_frame(&mut self) {
        // Defensive cap on ticks per frame in case a core wedges
        const MAX_TICKS_PER_FRAME: u32 = 4_000_000;

        self.frame.captured = false;
        for _ in 0..MAX_TICKS_PER_FRAME {
            let effect = self.tick_once();
            if effect == TickEffect::FrameRendered {
                break;
            }
        }

        self.frame_number += 1;
        self.events.push_back(SystemEvent::FrameReady);
        if std::mem::take(&mut self.saves.wrote) {
            self.events.push_back(SystemEvent::SaveWritten);
        }

        if self.rewind.is_enabled() {
            self.rewind.record_input(());
            if let Ok(state) = self.save_state() {
                self.rewind.push_snapshot(state);
            }
        }
    }

    fn tick_once(&mut self) -> TickEffect {
        macro_rules! dispatch {
            ($($variant:ident => $inputs:expr),*) => {
                match &mut self.emulator {
                    $(Emulator::$variant(emulator) => emulator
                        .tick(&mut self.frame, &mut self.audio, $inputs, &mut self.saves)
                        .unwrap_or(TickEffect::None),)*
                }
            };
        }
        dispatch!(
            Nes => &self.inputs.nes,
            GameBoy => &self.inputs.game_boy,
            SmsGg => &self.inputs.smsgg,
            Snes => &self.inputs.snes,
            Gba => &self.inputs.gba,
            Pce => &self.inputs.pce,
            Lynx => &self.inputs.lynx,
            Ws => &self.inputs.ws
        )
    }

    /// The most recent completed frame, if one has been rendered.
    #[must_use]
    pub fn poll_video(&self) -> Option<Frame> {
        if self.frame.pixels.is_empty() {
            return None;
        }
        Some(Frame {
            width: self.frame.width,
            height: self.frame.height,
            pixels: self.frame.pixels.clone(),
            frame_number: self.frame_number,
        })
    }

    /// Drain buffered stereo-interleaved samples.
    pub fn poll_audio(&mut self) -> Vec<i16> {
        self.audio.samples.drain(..).collect()
    }

    pub fn poll_notification(&mut self) -> Option<SystemEvent> {
        self.events.pop_front()
    }

    /// Serialize the machine state in the keyed container format.
    ///
    /// # Errors
    ///
    /// Propagates component encoding errors.
    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        match &self.emulator {
            Emulator::Nes(emulator) => emulator.save_state(),
            Emulator::GameBoy(emulator) => emulator.save_state(),
            Emulator::SmsGg(emulator) => emulator.save_state(),
            Emulator::Snes(emulator) => emulator.save_state(),
            Emulator::Gba(emulator) => emulator.save_state(),
            Emulator::Pce(emulator) => emulator.save_state(),
            Emulator::Lynx(emulator) => emulator.save_state(),
            Emulator::Ws(emulator) => emulator.save_state(),
        }
    }

    /// Restore a previously saved state.
    ///
    /// # Errors
    ///
    /// Returns an error when the state targets a different system or is malformed.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let result = match &mut self.emulator {
            Emulator::Nes(emulator) => emulator.load_state(bytes),
            Emulator::GameBoy(emulator) => emulator.load_state(bytes),
            Emulator::SmsGg(emulator) => emulator.load_state(bytes),
            Emulator::Snes(emulator) => emulator.load_state(bytes),
            Emulator::Gba(emulator) => emulator.load_state(bytes),
            Emulator::Pce(emulator) => emulator.load_state(bytes),
            Emulator::Lynx(emulator) => emulator.load_state(bytes),
            Emulator::Ws(emulator) => emulator.load_state(bytes),
        };
        if result.is_ok() {
            self.events.push_back(SystemEvent::StateLoaded);
        }
        result
    }

    pub fn rewind(&mut self) -> RewindHandle<'_> {
        RewindHandle { system: self }
    }

    /// Battery files accumulated by the cores, keyed by extension.
    #[must_use]
    pub fn battery_saves(&self) -> Vec<(&str, &[u8])> {
        self.saves
            .saves
            .iter()
            .map(|(extension, bytes)| (extension.as_str(), bytes.as_slice()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn nes_rom() -> Vec<u8> {
        let mut file = vec![0_u8; 16 + 32 * 1024 + 8 * 1024];
        file[0..4].copy_from_slice(&[b'N', b'E', b'S', 0x1A]);
        file[4] = 2;
        file[5] = 1;
        file[16] = 0x4C;
        file[17] = 0x00;
        file[18] = 0x80;
        let reset = 16 + 0x7FFC;
        file[reset] = 0x00;
        file[reset + 1] = 0x80;
        file
    }

    #[test]
    fn detects_system_by_extension_and_header() {
        assert_eq!(SystemKind::detect("game.gba", &[]), Some(SystemKind::Gba));
        assert_eq!(SystemKind::detect("game.sfc", &[]), Some(SystemKind::Snes));
        assert_eq!(SystemKind::detect("dump.bin", b"NES\x1Arest"), Some(SystemKind::Nes));
        assert_eq!(SystemKind::detect("mystery.xyz", b"garbage"), None);
    }

    #[test]
    fn load_run_and_poll() {
        let mut system = System::load_rom("test.nes", nes_rom()).unwrap();
        system.run_frame();

        let frame = system.poll_video().expect("frame should be rendered");
        assert_eq!(frame.width, 256);
        assert_eq!(frame.height, 240);
        assert_eq!(system.poll_notification(), Some(SystemEvent::FrameReady));

        // Audio should have accumulated samples over a frame
        assert!(!system.poll_audio().is_empty());
    }

    #[test]
    fn save_state_round_trips_through_driver() {
        let mut system = System::load_rom("test.nes", nes_rom()).unwrap();
        for _ in 0..3 {
            system.run_frame();
        }

        let state = system.save_state().unwrap();
        system.run_frame();
        system.load_state(&state).unwrap();
        assert_eq!(system.poll_notification(), Some(SystemEvent::FrameReady));

        let state2 = system.save_state().unwrap();
        assert_eq!(state, state2);
    }

    #[test]
    fn rewind_restores_prior_state() {
        let mut system = System::load_rom("test.nes", nes_rom()).unwrap();
        system.rewind().start();

        for _ in 0..5 {
            system.run_frame();
        }
        let depth_before = system.rewind().depth();
        assert!(depth_before >= 5);

        let state_before_pop = system.save_state().unwrap();
        assert!(system.rewind().pop().unwrap());
        // Popping restored the latest snapshot; states must match
        assert_eq!(system.save_state().unwrap(), state_before_pop);
        assert!(system.rewind().pop().unwrap());
        assert!(system.rewind().depth() < depth_before);
    }

    #[test]
    fn rejects_unknown_files() {
        assert!(matches!(
            System::load_rom("mystery.xyz", vec![0; 1024]),
            Err(LoadError::UnknownSystem { .. })
        ));
    }
}
