//! Period and frequency conversion
//!
//! Tracker pitch is a "period", inversely related to frequency. XM modules
//! select one of two conversions with a header flag: the linear table
//! (constant 64 period units per semitone) or the logarithmic Amiga table
//! carried over from Protracker.

/// Reference sample rate of a C-4 note (NTSC Amiga lineage).
pub const C4_RATE: f32 = 8363.0;

/// Period units per octave in the linear table (12 × 16 × 4).
const UNITS_PER_OCTAVE: f32 = 768.0;

/// Amiga period of C-4 in XM quarter units.
const AMIGA_C4_PERIOD: f32 = 1712.0;

/// Frequencies below this are inaudible and would make the mixer's
/// step-count math degenerate.
pub const MIN_FREQUENCY: f32 = 100.0;

/// Linear-table period for a 0-based real note with fine-tune
/// (1/128 semitone units).
pub fn linear_period(real_note: i32, finetune: i32) -> i32 {
    7680 - real_note * 64 - finetune / 2
}

/// Playback frequency for a linear-table period.
pub fn linear_frequency(period: f32) -> f32 {
    C4_RATE * ((4608.0 - period) / UNITS_PER_OCTAVE).exp2()
}

/// Amiga-table period for a 0-based real note (no fine-tune).
fn amiga_period_raw(real_note: i32) -> f32 {
    // C-4 is note 48; one octave halves the period.
    AMIGA_C4_PERIOD * ((48 - real_note) as f32 / 12.0).exp2()
}

/// Amiga-table period with fine-tune interpolated toward the neighbor note.
pub fn amiga_period(real_note: i32, finetune: i32) -> i32 {
    let period = amiga_period_raw(real_note);
    if finetune == 0 {
        return period.round() as i32;
    }
    let direction = if finetune > 0 { 1 } else { -1 };
    let neighbor = amiga_period_raw(real_note + direction);
    let fraction = finetune.abs() as f32 / 128.0;
    (period + (neighbor - period) * fraction).round() as i32
}

/// Playback frequency for an Amiga-table period.
pub fn amiga_frequency(period: f32) -> f32 {
    if period <= 0.0 {
        return MIN_FREQUENCY;
    }
    C4_RATE * AMIGA_C4_PERIOD / period
}

/// Period for a note under the module's frequency mode.
pub fn note_to_period(real_note: i32, finetune: i32, linear: bool) -> i32 {
    if linear {
        linear_period(real_note, finetune)
    } else {
        amiga_period(real_note, finetune)
    }
}

/// The nearest exact-semitone period for the given fine-tune, used by the
/// `E3x` glissando mode to quantize a portamento slide.
pub fn snap_to_semitone(period: i32, finetune: i32, linear: bool) -> i32 {
    if linear {
        // Invert the linear formula and round to the nearest note.
        let note = (7680 - finetune / 2 - period + 32) / 64;
        linear_period(note.clamp(0, 8 * 12 - 1), finetune)
    } else {
        let mut best = period;
        let mut best_dist = i32::MAX;
        for note in 0..8 * 12 {
            let candidate = amiga_period(note, finetune);
            let dist = (candidate - period).abs();
            if dist < best_dist {
                best_dist = dist;
                best = candidate;
            }
        }
        best
    }
}

/// Playback frequency for a period under the module's frequency mode,
/// floored at [`MIN_FREQUENCY`].
pub fn period_to_frequency(period: f32, linear: bool) -> f32 {
    let freq = if linear {
        linear_frequency(period)
    } else {
        amiga_frequency(period)
    };
    freq.max(MIN_FREQUENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_c4_is_reference_rate() {
        let period = linear_period(48, 0);
        assert_eq!(period, 4608);
        assert_relative_eq!(linear_frequency(period as f32), C4_RATE, epsilon = 0.01);
    }

    #[test]
    fn test_linear_octave_doubles_frequency() {
        let low = linear_frequency(linear_period(48, 0) as f32);
        let high = linear_frequency(linear_period(60, 0) as f32);
        assert_relative_eq!(high / low, 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_linear_finetune_shifts_up() {
        let plain = linear_period(48, 0);
        let tuned = linear_period(48, 127);
        assert!(tuned < plain, "positive finetune must raise pitch");
    }

    #[test]
    fn test_amiga_c4_is_reference_rate() {
        let period = amiga_period(48, 0);
        assert_eq!(period, 1712);
        assert_relative_eq!(amiga_frequency(period as f32), C4_RATE, epsilon = 0.5);
    }

    #[test]
    fn test_amiga_octave_halves_period() {
        let c4 = amiga_period(48, 0);
        let c5 = amiga_period(60, 0);
        assert_eq!(c5 * 2, c4);
    }

    #[test]
    fn test_amiga_finetune_interpolates() {
        let plain = amiga_period(48, 0);
        let up = amiga_period(48, 64);
        let next = amiga_period(49, 0);
        assert!(up < plain && up > next);
    }

    #[test]
    fn test_semitone_snap_rounds_to_nearest_note() {
        // Linear: 64 units per semitone; 20 units into the gap rounds down,
        // 40 units rounds up to the next note.
        let c4 = linear_period(48, 0);
        assert_eq!(snap_to_semitone(c4 - 20, 0, true), c4);
        assert_eq!(snap_to_semitone(c4 - 40, 0, true), linear_period(49, 0));

        // Amiga: a period between two notes snaps to the closer one.
        let a4 = amiga_period(57, 0);
        assert_eq!(snap_to_semitone(a4 + 1, 0, false), a4);
        assert_eq!(snap_to_semitone(a4, 0, false), a4);
    }

    #[test]
    fn test_minimum_frequency_floor() {
        // An absurdly high period must not produce a sub-audible frequency.
        assert_eq!(period_to_frequency(100_000.0, true), MIN_FREQUENCY);
        assert_eq!(period_to_frequency(1_000_000.0, false), MIN_FREQUENCY);
    }
}
