//! One mixer voice slot
//!
//! A [`MixerChannel`] resamples one PCM sample at an arbitrary frequency and
//! accumulates it into the shared float buffer. The slot stores only a
//! [`VoiceKey`] naming the sample; the PCM data itself stays inside the
//! module and is handed in per block, so voices never own sample memory.

use crate::module::LoopMode;

/// Names the sample a slot is playing: 1-based instrument number plus the
/// index into that instrument's sample list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceKey {
    /// Instrument number, 1-based like pattern cells.
    pub instrument: u16,
    /// Sample index inside the instrument.
    pub sample_index: u16,
}

/// A single resampling voice.
///
/// `position` is a fractional cursor in sample frames. Output is linearly
/// interpolated between `data[i]` and `data[i + 1]`; the decoder guarantees
/// a guard value at `data[play_end]`, so the cursor may approach the
/// boundary without a bounds branch in the inner loop.
#[derive(Debug, Clone, Default)]
pub struct MixerChannel {
    /// Sample being played, `None` when the slot is free.
    pub key: Option<VoiceKey>,
    /// Fractional read cursor in sample frames.
    pub position: f64,
    /// Playback direction; only bidirectional loops ever clear this.
    pub forward: bool,
    /// Loop behavior copied from the sample at trigger time.
    pub loop_mode: LoopMode,
    /// Loop start in frames.
    pub loop_start: f64,
    /// Exclusive end of the playable region.
    pub play_end: f64,
    /// Playback frequency in Hz.
    frequency: f32,
    /// Gain targets computed by the sequencer once per tick.
    pub target_left: f32,
    /// Right-side gain target.
    pub target_right: f32,
    /// Smoothed gains, relaxed toward the targets per output sample.
    pub gain_left: f32,
    /// Right-side smoothed gain.
    pub gain_right: f32,
}

impl MixerChannel {
    /// Free the slot. Gains are cleared too, so a rebind ramps in from
    /// silence.
    pub fn release(&mut self) {
        self.key = None;
        self.position = 0.0;
        self.forward = true;
        self.target_left = 0.0;
        self.target_right = 0.0;
        self.gain_left = 0.0;
        self.gain_right = 0.0;
    }

    /// Whether the slot currently holds a voice.
    pub fn active(&self) -> bool {
        self.key.is_some()
    }

    /// Set the resampling frequency for the coming block.
    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
    }

    /// Fold the cursor back into the loop window after a boundary crossing.
    /// Returns `false` when the voice ended (one-shot past the end, or a
    /// degenerate loop).
    ///
    /// A bidi reflection of an exact landing leaves the backward cursor
    /// parked on `play_end` itself; that is a valid resting state, and the
    /// clamped read in [`mix`](Self::mix) resolves it to the guard value.
    fn resolve_boundary(&mut self) -> bool {
        loop {
            if self.forward {
                if self.position < self.play_end {
                    return true;
                }
                match self.loop_mode {
                    LoopMode::Off => {
                        self.release();
                        return false;
                    }
                    LoopMode::Normal => {
                        let len = self.play_end - self.loop_start;
                        if len <= 0.0 {
                            self.release();
                            return false;
                        }
                        while self.position >= self.play_end {
                            self.position -= len;
                        }
                    }
                    LoopMode::Bidi => {
                        if self.play_end - self.loop_start <= 0.0 {
                            self.release();
                            return false;
                        }
                        self.position = 2.0 * self.play_end - self.position;
                        self.forward = false;
                    }
                }
            } else if self.position < self.loop_start {
                self.position = 2.0 * self.loop_start - self.position;
                self.forward = true;
            } else {
                return true;
            }
        }
    }

    /// Accumulate `frames` stereo frames into `out` (interleaved, length
    /// `2 × frames`), handling loop boundaries between inner runs.
    ///
    /// The inner loop is branch-free with respect to boundaries: the run
    /// length is pre-computed so the cursor cannot cross `play_end` (or
    /// `loop_start` when moving backwards) mid-run. The cursor is folded
    /// back into the loop window after the last run too, so it never rests
    /// past a boundary between calls.
    pub fn mix(&mut self, data: &[i16], out: &mut [f32], frames: usize, sample_rate: u32, filter_k: f32) {
        let step = self.frequency as f64 / sample_rate as f64;
        if step <= 0.0 {
            return;
        }
        if data.len() < 2 {
            self.release();
            return;
        }

        let mut i = 0;
        while i < frames {
            if !self.resolve_boundary() {
                return;
            }

            let remaining = if self.forward {
                self.play_end - self.position
            } else {
                self.position - self.loop_start
            };
            let run = ((remaining / step).ceil() as usize).max(1).min(frames - i);
            let signed_step = if self.forward { step } else { -step };

            for _ in 0..run {
                // A backward cursor parked exactly on play_end clamps onto
                // the guard element (frac 1.0 extrapolates to data[index+1]).
                let index = (self.position as usize).min(data.len() - 2);
                let frac = (self.position - index as f64) as f32;
                let a = data[index] as f32;
                let b = data[index + 1] as f32;
                let value = a + (b - a) * frac;

                self.gain_left += (self.target_left - self.gain_left) * filter_k;
                self.gain_right += (self.target_right - self.gain_right) * filter_k;
                out[i * 2] += value * self.gain_left;
                out[i * 2 + 1] += value * self.gain_right;

                self.position += signed_step;
                i += 1;
            }
        }

        self.resolve_boundary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looped_slot(loop_start: f64, play_end: f64, mode: LoopMode) -> MixerChannel {
        let mut slot = MixerChannel::default();
        slot.key = Some(VoiceKey {
            instrument: 1,
            sample_index: 0,
        });
        slot.forward = true;
        slot.loop_mode = mode;
        slot.loop_start = loop_start;
        slot.play_end = play_end;
        slot.target_left = 0.5;
        slot.target_right = 0.5;
        slot.gain_left = 0.5;
        slot.gain_right = 0.5;
        slot.set_frequency(22_050.0);
        slot
    }

    fn sample_data(len: usize) -> Vec<i16> {
        // Guard value included; contents only need to be readable.
        vec![1000i16; len + 1]
    }

    #[test]
    fn test_normal_loop_wraps_to_loop_start() {
        // Loop of 50 frames starting at 100: the cursor must wrap back to
        // the 100..150 window and never read frame 150 or beyond.
        let data = sample_data(150);
        let mut slot = looped_slot(100.0, 150.0, LoopMode::Normal);
        let mut out = vec![0.0f32; 2 * 64];

        for _ in 0..40 {
            slot.mix(&data, &mut out, 64, 44_100, 0.05);
            assert!(slot.position < 150.0, "cursor escaped the loop window");
        }
        assert!(slot.position >= 100.0, "cursor fell before loop start");
        assert!(slot.active());
    }

    #[test]
    fn test_bidi_loop_reflects_and_flips_direction() {
        let data = sample_data(150);
        let mut slot = looped_slot(100.0, 150.0, LoopMode::Bidi);
        slot.position = 100.0;
        let mut out = vec![0.0f32; 2 * 64];

        let mut flips = 0;
        let mut last_forward = slot.forward;
        for _ in 0..60 {
            slot.mix(&data, &mut out, 64, 44_100, 0.05);
            assert!(slot.position >= 100.0 - 1.0 && slot.position <= 150.0);
            if slot.forward != last_forward {
                flips += 1;
                last_forward = slot.forward;
            }
        }
        assert!(flips >= 2, "direction must alternate at the boundaries");
        assert!(slot.active());
    }

    #[test]
    fn test_bidi_cursor_parked_on_loop_end() {
        // A sample offset clamped to the loop end parks the cursor exactly
        // on play_end; the reflection lands on the boundary itself and the
        // first read must resolve to the guard element, not past it.
        let data = sample_data(64);
        let mut slot = looped_slot(0.0, 64.0, LoopMode::Bidi);
        slot.position = 64.0;
        let mut out = vec![0.0f32; 2 * 32];

        slot.mix(&data, &mut out, 32, 44_100, 1.0);
        assert!(!slot.forward, "the boundary landing must turn the voice around");
        assert!(slot.position < 64.0);
        assert!(slot.active());
    }

    #[test]
    fn test_dyadic_step_hits_boundaries_exactly() {
        // frequency = rate/2 gives step 0.5, so the cursor lands on every
        // boundary with no fractional part. The window invariant must hold
        // after every call, including calls that end exactly on a boundary.
        let data = sample_data(64);
        for mode in [LoopMode::Normal, LoopMode::Bidi] {
            let mut slot = looped_slot(0.0, 64.0, mode);
            let mut out = vec![0.0f32; 2 * 128];
            for _ in 0..16 {
                slot.mix(&data, &mut out, 128, 44_100, 0.05);
                assert!(
                    slot.position >= 0.0 && slot.position <= 64.0,
                    "cursor escaped the loop window in {mode:?}"
                );
            }
            assert!(slot.active());
        }
    }

    #[test]
    fn test_one_shot_releases_at_end() {
        let data = sample_data(32);
        let mut slot = looped_slot(0.0, 32.0, LoopMode::Off);
        let mut out = vec![0.0f32; 2 * 256];

        slot.mix(&data, &mut out, 256, 44_100, 1.0);
        assert!(!slot.active(), "one-shot voice must free its slot");

        // Later output samples stay silent.
        assert_eq!(out[2 * 200], 0.0);
    }

    #[test]
    fn test_gain_relaxes_toward_target() {
        let data = sample_data(1024);
        let mut slot = looped_slot(0.0, 1024.0, LoopMode::Normal);
        slot.gain_left = 0.0;
        slot.gain_right = 0.0;
        slot.target_left = 1.0;
        slot.target_right = 0.25;
        let mut out = vec![0.0f32; 2 * 512];

        slot.mix(&data, &mut out, 512, 44_100, 0.02);
        assert!(slot.gain_left > 0.9, "gain_left = {}", slot.gain_left);
        assert!((slot.gain_right - 0.25).abs() < 0.05);

        // The first output sample must be near silence (ramp-in).
        assert!(out[0].abs() < 1000.0 * 0.05);
    }

    #[test]
    fn test_interpolation_reads_guard_sample() {
        // Cursor lands between the last frame and the guard value.
        let mut data = sample_data(4);
        data[3] = 100;
        data[4] = 100; // guard
        let mut slot = looped_slot(0.0, 4.0, LoopMode::Off);
        slot.position = 3.5;
        slot.set_frequency(11_025.0);
        let mut out = vec![0.0f32; 2 * 8];

        slot.mix(&data, &mut out, 8, 44_100, 1.0);
        // One in-range sample interpolated between data[3] and data[4].
        assert!((out[0] - 100.0 * 0.5).abs() < 1e-3);
    }
}
