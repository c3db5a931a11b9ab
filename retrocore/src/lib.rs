//! Headless multi-system driver
//!
//! Realizes the frontend contract over every backend core: `load_rom` picks the system from
//! the file extension and header sniffing, `run_frame` blocks until the next completed frame,
//! and video/audio/notifications are polled from owned buffers. Rewind snapshots are captured
//! at frame boundaries through the shared [`retrocore_common::rewind::RewindManager`].

mod system;

pub use system::{
    Frame, LoadError, RewindHandle, System, SystemEvent, SystemInputs, SystemKind,
};

pub use retrocore_common::frontend::Color;
