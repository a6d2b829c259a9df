//! XM (FastTracker 2) module playback engine
//!
//! Loads `.xm` tracker modules and plays them back with sample-accurate
//! timing: a binary parser with delta-coded PCM decoding, a tick-driven
//! sequencer covering the full legacy effect table, per-voice envelope and
//! LFO generators, and a 64-slot interpolating software mixer with
//! click-free voice stealing.
//!
//! # Crate feature flags
//! - `streaming` (optional): real-time audio output via rodio
//! - `export-wav` (optional): offline rendering to WAV via hound
//!
//! # Quick start
//! ## Offline mixing
//! ```no_run
//! use xmplay::{Mixer, Module, PlayerState};
//!
//! # fn main() -> xmplay::Result<()> {
//! let data = std::fs::read("song.xm")?;
//! let module = Module::load(&mut std::io::Cursor::new(data))?;
//!
//! let mut player = PlayerState::new(module);
//! let mut mixer = Mixer::new(44_100);
//! let mut block = vec![0i16; 2 * 4096];
//! let info = mixer.fill(&mut player, &mut block);
//! println!("order {} row {}", info.position.order, info.position.row);
//! # Ok(())
//! # }
//! ```
//!
//! ## Real-time playback
//! ```no_run
//! # #[cfg(feature = "streaming")]
//! # {
//! use xmplay::{DriverConfig, Module, Playback, RodioDriver};
//!
//! let data = std::fs::read("song.xm").unwrap();
//! let module = Module::load(&mut std::io::Cursor::new(data)).unwrap();
//!
//! let playback = Playback::start(module, DriverConfig::default(), RodioDriver::new())
//!     .expect("audio device");
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! println!("at {} ms, row {}", playback.time_ms(), playback.position().row);
//! playback.stop();
//! # }
//! ```

#![warn(missing_docs)]

pub mod driver;
pub mod mixer;
pub mod module;
pub mod playback;
pub mod player;
pub mod source;

#[cfg(feature = "export-wav")]
pub mod export;

/// Error type for module loading and playback operations.
#[derive(thiserror::Error, Debug)]
pub enum XmError {
    /// The file is not a well-formed XM module.
    #[error("malformed XM data: {0}")]
    Format(String),

    /// The file declares an XM version this player does not handle.
    #[error("unsupported XM version {0:#06x}")]
    UnsupportedVersion(u16),

    /// IO error from the byte source or filesystem.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio device error.
    #[error("audio device error: {0}")]
    Device(String),

    /// Invalid playback configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for module loading and playback operations.
pub type Result<T> = std::result::Result<T, XmError>;

// Public API exports
pub use driver::{DriverConfig, PlaybackDriver};
pub use mixer::{FillInfo, Mixer};
pub use module::{Instrument, Module, Pattern, PatternCell, Position, Sample};
pub use playback::Playback;
pub use player::PlayerState;
pub use source::ByteSource;

#[cfg(feature = "streaming")]
pub use driver::RodioDriver;

#[cfg(feature = "export-wav")]
pub use export::{export_to_wav, ExportConfig};
