//! Instruments and samples
//!
//! An XM instrument maps the 96 playable notes onto up to 16 samples and
//! carries the volume/pan envelopes, fade-out rate and auto-vibrato settings
//! shared by all of its samples.

use crate::module::envelope::Envelope;

/// Number of playable note slots in the note→sample map.
pub const NOTE_RANGE: usize = 96;

/// Maximum samples per instrument.
pub const MAX_SAMPLES: usize = 16;

/// How a sample continues past its loop boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Play once, then the voice ends.
    #[default]
    Off,
    /// Wrap from loop end back to loop start.
    Normal,
    /// Reflect at the loop boundaries (ping-pong).
    Bidi,
}

impl LoopMode {
    /// Decode the low bits of the sample type byte.
    pub fn from_type_byte(value: u8) -> LoopMode {
        match value & 0x03 {
            1 => LoopMode::Normal,
            2 | 3 => LoopMode::Bidi,
            _ => LoopMode::Off,
        }
    }
}

/// Instrument-level automatic pitch LFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoVibrato {
    /// Waveform selector: 0 sine, 1 square, 2 inverse sawtooth, 3 sawtooth.
    pub waveform: u8,
    /// Ticks over which the vibrato ramps in after a trigger.
    pub sweep: u8,
    /// Depth in period units.
    pub depth: u8,
    /// Phase advance per tick.
    pub rate: u8,
}

/// One decoded PCM sample.
///
/// `data` always holds `length + 1` values: the final element is a guard
/// sample patched past the loop/end boundary so linear interpolation can read
/// `data[i + 1]` without a bounds branch.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    /// Sample name from the file.
    pub name: String,
    /// Length in sample frames (already halved for 16-bit data).
    pub length: u32,
    /// Loop start in sample frames.
    pub loop_start: u32,
    /// Loop length in sample frames.
    pub loop_length: u32,
    /// Loop behavior (forced to `Off` when `loop_length` is 0).
    pub loop_mode: LoopMode,
    /// Default volume 0..64.
    pub default_volume: u8,
    /// Default pan 0..255.
    pub default_pan: u8,
    /// Fine-tune in 1/128 semitone steps.
    pub finetune: i8,
    /// Semitone offset added to every note played with this sample.
    pub relative_note: i8,
    /// Whether the file stored 16-bit deltas.
    pub sixteen_bit: bool,
    /// Decoded PCM, `length + 1` values (guard sample appended).
    pub data: Vec<i16>,
}

impl Sample {
    /// Exclusive end of the playable region: loop end when looping,
    /// otherwise the sample length.
    pub fn play_end(&self) -> u32 {
        match self.loop_mode {
            LoopMode::Off => self.length,
            LoopMode::Normal | LoopMode::Bidi => self.loop_start + self.loop_length,
        }
    }

    /// Patch the guard value past the loop/end boundary. Called after the
    /// PCM data is in place (either decoded or injected via callback).
    pub fn patch_guard(&mut self) {
        let len = self.length as usize;
        debug_assert_eq!(self.data.len(), len + 1);
        if len == 0 {
            return;
        }
        let guard = match self.loop_mode {
            LoopMode::Off => self.data[len - 1],
            LoopMode::Normal | LoopMode::Bidi => {
                let start = (self.loop_start as usize).min(len - 1);
                self.data[start]
            }
        };
        let end = (self.play_end() as usize).min(len);
        self.data[end] = guard;
    }
}

/// One XM instrument: note map, samples, envelopes, fade-out, auto-vibrato.
#[derive(Debug, Clone)]
pub struct Instrument {
    /// Instrument name from the file.
    pub name: String,
    /// Note→sample index map for notes 1..=96.
    pub note_to_sample: [u8; NOTE_RANGE],
    /// The instrument's samples (≤16).
    pub samples: Vec<Sample>,
    /// Volume envelope, `None` when inactive.
    pub volume_envelope: Option<Envelope>,
    /// Panning envelope, `None` when inactive.
    pub pan_envelope: Option<Envelope>,
    /// Per-tick fade-out subtracted from the 0..65536 fade volume after key-off.
    pub fadeout: u16,
    /// Automatic pitch vibrato.
    pub vibrato: AutoVibrato,
}

// `[u8; 96]` has no derived `Default`, so the empty instrument is spelled out.
impl Default for Instrument {
    fn default() -> Instrument {
        Instrument {
            name: String::new(),
            note_to_sample: [0; NOTE_RANGE],
            samples: Vec::new(),
            volume_envelope: None,
            pan_envelope: None,
            fadeout: 0,
            vibrato: AutoVibrato::default(),
        }
    }
}

impl Instrument {
    /// Resolve a note (1..=96) to a sample index.
    ///
    /// Invalid notes and map entries pointing past the sample list fall back
    /// to sample 0, so the lookup always resolves when any sample exists.
    pub fn sample_index_for_note(&self, note: u8) -> Option<usize> {
        if self.samples.is_empty() {
            return None;
        }
        let slot = note
            .checked_sub(1)
            .map(|n| n as usize)
            .filter(|&n| n < NOTE_RANGE)
            .map(|n| self.note_to_sample[n] as usize)
            .unwrap_or(0);
        Some(if slot < self.samples.len() { slot } else { 0 })
    }

    /// The sample a note resolves to, if any sample exists.
    pub fn sample_for_note(&self, note: u8) -> Option<&Sample> {
        self.sample_index_for_note(note).map(|i| &self.samples[i])
    }
}
