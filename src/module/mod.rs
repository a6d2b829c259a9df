//! Song data model
//!
//! A [`Module`] is the parsed, immutable representation of an XM file:
//! header fields, the pattern order table, up to 256 patterns and up to 128
//! instruments with decoded PCM. It is built once by the loader and then
//! exclusively owned by the sequencer for the playback session.

pub mod envelope;
pub mod instrument;
pub mod loader;

pub use envelope::{Envelope, EnvelopeFlags, EnvelopeKind, EnvelopePoint, EnvelopeState};
pub use instrument::{AutoVibrato, Instrument, LoopMode, Sample};
pub use loader::SampleLoadFn;

use bitflags::bitflags;

/// Maximum playback channels.
pub const MAX_CHANNELS: usize = 32;
/// Maximum patterns per module.
pub const MAX_PATTERNS: usize = 256;
/// Maximum instruments per module.
pub const MAX_INSTRUMENTS: usize = 128;
/// Maximum rows per pattern.
pub const MAX_ROWS: usize = 256;
/// Maximum entries in the pattern order table.
pub const MAX_ORDERS: usize = 256;

/// Highest real note value; larger values are key-off or invalid.
pub const NOTE_MAX: u8 = 96;
/// Note value signalling key-off.
pub const NOTE_KEY_OFF: u8 = 97;

bitflags! {
    /// Module header flags word.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ModuleFlags: u16 {
        /// Linear frequency table; Amiga periods when clear.
        const LINEAR_FREQUENCY = 0x0001;
    }
}

/// One pattern cell: what a single channel does on a single row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternCell {
    /// 0 = none, 1..=96 = pitch, 97 = key-off.
    pub note: u8,
    /// Instrument number, 0 = keep previous.
    pub instrument: u8,
    /// Packed volume-column byte.
    pub volume: u8,
    /// Effect id 0..=33.
    pub effect: u8,
    /// Effect parameter byte.
    pub param: u8,
}

/// A row×channel grid of [`PatternCell`]s.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    rows: usize,
    channels: usize,
    cells: Vec<PatternCell>,
}

impl Pattern {
    /// An empty pattern of the given dimensions.
    pub fn empty(rows: usize, channels: usize) -> Pattern {
        Pattern {
            rows,
            channels,
            cells: vec![PatternCell::default(); rows * channels],
        }
    }

    /// Number of rows (1..=256).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The cell at `(row, channel)`.
    pub fn cell(&self, row: usize, channel: usize) -> &PatternCell {
        &self.cells[row * self.channels + channel]
    }

    /// Mutable cell access, used by the loader and by tests building
    /// synthetic patterns.
    pub fn cell_mut(&mut self, row: usize, channel: usize) -> &mut PatternCell {
        &mut self.cells[row * self.channels + channel]
    }
}

/// A `(order, row)` song position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    /// Index into the pattern order table.
    pub order: usize,
    /// Row inside the ordered pattern.
    pub row: usize,
}

/// A fully parsed XM module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Song title from the header.
    pub name: String,
    /// Number of used entries in the order table (≤256).
    pub song_length: usize,
    /// Order index playback restarts from after the last order.
    pub restart_position: usize,
    /// Channel count (1..=32).
    pub num_channels: usize,
    /// Header flags (frequency table selection).
    pub flags: ModuleFlags,
    /// Default ticks per row.
    pub default_speed: u32,
    /// Default BPM.
    pub default_bpm: u32,
    /// Pattern order table, `song_length` entries.
    pub order_table: Vec<u8>,
    /// Patterns (≤256).
    pub patterns: Vec<Pattern>,
    /// Instruments (≤128) with decoded PCM.
    pub instruments: Vec<Instrument>,
}

impl Module {
    /// Whether periods use the linear frequency formula.
    pub fn linear_frequency(&self) -> bool {
        self.flags.contains(ModuleFlags::LINEAR_FREQUENCY)
    }

    /// The pattern scheduled at an order position, if both indices are valid.
    pub fn pattern_at_order(&self, order: usize) -> Option<&Pattern> {
        let idx = *self.order_table.get(order)? as usize;
        self.patterns.get(idx)
    }

    /// Instrument by 1-based cell number.
    pub fn instrument(&self, number: usize) -> Option<&Instrument> {
        number.checked_sub(1).and_then(|i| self.instruments.get(i))
    }
}
