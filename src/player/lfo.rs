//! Low-frequency oscillators
//!
//! Two flavors of periodic modulation: the effect-column vibrato/tremolo LFO
//! (64-step phase, waveform selectable per channel) and the instrument-level
//! auto-vibrato (256-step phase with a sweep-in ramp).

use crate::module::AutoVibrato;
use std::f32::consts::PI;

/// Waveform selector for the effect-column LFO (`E4x` / `E7x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    /// Sine wave.
    #[default]
    Sine,
    /// Descending ramp.
    RampDown,
    /// Square wave.
    Square,
    /// "Random" selector; classic players fall back to square here.
    Random,
}

impl Waveform {
    /// Decode the low bits of a waveform-control nibble. Bit 2 ("don't
    /// retrigger on new note") is handled by the caller.
    pub fn from_bits(value: u8) -> Waveform {
        match value & 0x03 {
            1 => Waveform::RampDown,
            2 => Waveform::Square,
            3 => Waveform::Random,
            _ => Waveform::Sine,
        }
    }
}

/// Effect-column vibrato/tremolo oscillator.
///
/// Phase runs −32..32 over one cycle. Vibrato emits a period offset,
/// tremolo a volume offset; both use the same raw waveform with different
/// scaling, which is why the struct only stores phase state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lfo {
    /// Current phase, −32..32.
    pos: i8,
    /// Phase advance per tick (set from the effect's speed nibble).
    pub speed: u8,
    /// Modulation depth (set from the effect's depth nibble).
    pub depth: u8,
    /// Selected waveform.
    pub waveform: Waveform,
    /// When set, the phase is not reset on a new note (`E4x`/`E7x` bit 2).
    pub keep_phase: bool,
}

impl Lfo {
    /// Raw waveform value for the current phase, roughly −256..256.
    fn raw(&self) -> f32 {
        match self.waveform {
            Waveform::Sine => (self.pos as f32 * PI / 32.0).sin() * 256.0,
            Waveform::RampDown => -(self.pos as f32) * 8.0,
            Waveform::Square | Waveform::Random => {
                if self.pos >= 0 {
                    255.0
                } else {
                    -255.0
                }
            }
        }
    }

    /// Period offset for vibrato at the current phase (XM quarter units).
    pub fn vibrato_delta(&self) -> f32 {
        self.raw() * self.depth as f32 / 128.0 * 4.0
    }

    /// Volume offset for tremolo at the current phase.
    pub fn tremolo_delta(&self) -> f32 {
        self.raw() * self.depth as f32 / 64.0
    }

    /// Advance the phase by the programmed speed, wrapping at ±32.
    pub fn advance(&mut self) {
        let mut pos = self.pos as i32 + self.speed as i32;
        if pos > 31 {
            pos -= 64;
        }
        self.pos = pos as i8;
    }

    /// Reset the phase for a new note unless `keep_phase` is set.
    pub fn retrigger(&mut self) {
        if !self.keep_phase {
            self.pos = 0;
        }
    }
}

/// Runtime state of the instrument auto-vibrato.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoVibratoState {
    /// 256-step phase.
    pos: u8,
    /// Ticks elapsed since trigger, capped at the sweep length.
    sweep_pos: u32,
}

impl AutoVibratoState {
    /// Reset for a freshly triggered note.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.sweep_pos = 0;
    }

    /// Period offset for the current tick, then advance phase and sweep.
    ///
    /// Waveforms: 0 sine, 1 square, 2 inverse sawtooth, 3 sawtooth. The
    /// sweep linearly ramps the depth in over `sweep` ticks after a trigger.
    pub fn advance(&mut self, params: &AutoVibrato) -> f32 {
        if params.depth == 0 {
            return 0.0;
        }

        let raw = match params.waveform & 0x03 {
            0 => (self.pos as f32 * 2.0 * PI / 256.0).sin() * 64.0,
            1 => {
                if self.pos < 128 {
                    64.0
                } else {
                    -64.0
                }
            }
            2 => (128.0 - ((self.pos as i32 + 128) % 256) as f32) / 2.0,
            _ => (((self.pos as i32 + 128) % 256) as f32 - 128.0) / 2.0,
        };

        let mut delta = raw * params.depth as f32;
        if params.sweep > 0 {
            delta = delta * self.sweep_pos as f32 / params.sweep as f32;
        }

        self.sweep_pos = (self.sweep_pos + 1).min(params.sweep as u32);
        self.pos = self.pos.wrapping_add(params.rate);

        delta / 64.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sine_starts_at_zero() {
        let lfo = Lfo {
            depth: 8,
            ..Default::default()
        };
        assert_relative_eq!(lfo.vibrato_delta(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sine_peaks_at_quarter_cycle() {
        let mut lfo = Lfo {
            speed: 4,
            depth: 8,
            ..Default::default()
        };
        // Four advances of speed 4 put the phase at 16 = quarter cycle.
        for _ in 0..4 {
            lfo.advance();
        }
        let expected = 256.0 * 8.0 / 128.0 * 4.0;
        assert_relative_eq!(lfo.vibrato_delta(), expected, epsilon = 1e-3);
    }

    #[test]
    fn test_phase_wraps() {
        let mut lfo = Lfo {
            speed: 15,
            ..Default::default()
        };
        for _ in 0..100 {
            lfo.advance();
        }
        // Exercised 100 ticks without leaving the representable phase range;
        // the delta must stay bounded by the raw amplitude.
        lfo.depth = 15;
        assert!(lfo.vibrato_delta().abs() <= 256.0 * 15.0 / 128.0 * 4.0 + 1.0);
    }

    #[test]
    fn test_retrigger_respects_keep_phase() {
        let mut lfo = Lfo {
            speed: 9,
            ..Default::default()
        };
        lfo.advance();
        lfo.retrigger();
        assert_relative_eq!(lfo.raw(), 0.0, epsilon = 1e-6);

        lfo.keep_phase = true;
        lfo.advance();
        let before = lfo.raw();
        lfo.retrigger();
        assert_relative_eq!(lfo.raw(), before, epsilon = 1e-6);
    }

    #[test]
    fn test_auto_vibrato_sweep_ramps_in() {
        let params = AutoVibrato {
            waveform: 1, // square: full depth from phase 0
            sweep: 10,
            depth: 4,
            rate: 0,
        };
        let mut state = AutoVibratoState::default();

        let first = state.advance(&params);
        assert_relative_eq!(first, 0.0, epsilon = 1e-6);

        let mut last = first;
        for _ in 0..10 {
            last = state.advance(&params);
        }
        // Fully swept in: square at full depth.
        assert_relative_eq!(last, 64.0 * 4.0 / 64.0, epsilon = 1e-4);
    }

    #[test]
    fn test_auto_vibrato_zero_depth_is_silent() {
        let params = AutoVibrato::default();
        let mut state = AutoVibratoState::default();
        for _ in 0..32 {
            assert_relative_eq!(state.advance(&params), 0.0);
        }
    }
}
