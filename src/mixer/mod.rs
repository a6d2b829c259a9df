//! Software mixer
//!
//! The [`Mixer`] owns 64 voice slots, a float accumulation buffer and the
//! tick budget that couples rendering to the sequencer. [`Mixer::fill`]
//! produces interleaved stereo `i16`, pulling sequencer ticks whenever the
//! per-tick sample budget runs out, so the mixer is the only clock source
//! and playback stays sample-accurate at any block size.

pub mod channel;

pub use channel::{MixerChannel, VoiceKey};

use crate::module::{Module, Position};
use crate::player::PlayerState;

/// Sequencer voices; also the ghost-slot offset.
pub const NUM_VOICES: usize = 32;
/// Total mixer slots: one primary plus one ghost per voice.
pub const NUM_SLOTS: usize = NUM_VOICES * 2;

/// Gain-smoothing time constant in seconds. Short enough to track tremolo,
/// long enough to remove trigger clicks.
const RAMP_SECONDS: f32 = 0.002;

/// What a completed [`Mixer::fill`] reports back to the delivery layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillInfo {
    /// Song position sounding at the end of the block.
    pub position: Position,
    /// Total sample frames rendered since the session started.
    pub total_samples: u64,
}

/// The 64-slot accumulating mixer.
pub struct Mixer {
    slots: Vec<MixerChannel>,
    float_buffer: Vec<f32>,
    sample_rate: u32,
    /// One-pole gain filter coefficient derived from [`RAMP_SECONDS`].
    filter_k: f32,
    /// Sample frames left before the sequencer must tick again.
    tick_budget: u32,
    total_samples: u64,
    position: Position,
}

impl Mixer {
    /// A silent mixer rendering at `sample_rate` Hz.
    pub fn new(sample_rate: u32) -> Mixer {
        let filter_k = 1.0 - (-1.0 / (sample_rate as f32 * RAMP_SECONDS)).exp();
        Mixer {
            slots: vec![MixerChannel::default(); NUM_SLOTS],
            float_buffer: Vec::new(),
            sample_rate,
            filter_k,
            tick_budget: 0,
            total_samples: 0,
            position: Position::default(),
        }
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total sample frames rendered so far.
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Mutable access to a voice slot.
    pub fn channel_mut(&mut self, index: usize) -> &mut MixerChannel {
        &mut self.slots[index]
    }

    /// Move a sounding voice into its ghost slot before a retrigger. The
    /// ghost keeps the current gains but ramps to silence, masking the
    /// discontinuity the restart would otherwise click with.
    pub fn steal_to_ghost(&mut self, index: usize) {
        debug_assert!(index < NUM_VOICES);
        let mut ghost = self.slots[index].clone();
        ghost.target_left = 0.0;
        ghost.target_right = 0.0;
        self.slots[index + NUM_VOICES] = ghost;
    }

    /// Drop all voices and rewind the session counters.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.release();
        }
        self.tick_budget = 0;
        self.total_samples = 0;
        self.position = Position::default();
    }

    /// Render interleaved stereo `i16` into `out`, driving the sequencer
    /// whenever the tick budget runs out.
    ///
    /// `out` holds whole stereo frames; a dangling element left by an odd
    /// length belongs to no frame and is zeroed.
    pub fn fill(&mut self, player: &mut PlayerState, out: &mut [i16]) -> FillInfo {
        let frames = out.len() / 2;
        self.float_buffer.clear();
        self.float_buffer.resize(frames * 2, 0.0);

        let mut mixed = 0;
        while mixed < frames {
            if self.tick_budget == 0 {
                self.position = player.tick(self);
                self.tick_budget = samples_per_tick(self.sample_rate, player.bpm());
            }
            let run = (frames - mixed).min(self.tick_budget as usize);
            self.mix_block(player.module(), mixed, run);
            mixed += run;
            self.tick_budget -= run as u32;
        }

        for (dst, acc) in out.iter_mut().zip(&self.float_buffer) {
            *dst = acc.clamp(-32768.0, 32767.0) as i16;
        }
        if out.len() > frames * 2 {
            out[frames * 2] = 0;
        }

        self.total_samples += frames as u64;
        FillInfo {
            position: self.position,
            total_samples: self.total_samples,
        }
    }

    /// Accumulate one run of frames from every sounding slot. Ghost slots
    /// whose ramp-down has finished are freed here.
    fn mix_block(&mut self, module: &Module, offset: usize, frames: usize) {
        let out = &mut self.float_buffer[offset * 2..(offset + frames) * 2];
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(key) = slot.key else { continue };
            let Some(data) = module
                .instrument(key.instrument as usize)
                .and_then(|i| i.samples.get(key.sample_index as usize))
                .map(|s| s.data.as_slice())
            else {
                slot.release();
                continue;
            };

            slot.mix(data, out, frames, self.sample_rate, self.filter_k);

            let is_ghost = index >= NUM_VOICES;
            if is_ghost
                && slot.gain_left.abs() < 1e-4
                && slot.gain_right.abs() < 1e-4
            {
                slot.release();
            }
        }
    }
}

/// Sample frames per sequencer tick: `rate × 5 / (bpm × 2)`, the classic
/// 2.5-per-minute tick formula.
pub fn samples_per_tick(sample_rate: u32, bpm: u32) -> u32 {
    sample_rate * 5 / (bpm * 2)
}
