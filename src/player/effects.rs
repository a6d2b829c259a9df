//! Effect command decoding
//!
//! The raw effect id/parameter pair from a pattern cell is decoded once into
//! a typed [`Effect`], and the packed volume-column byte into a
//! [`VolumeCmd`]. The sequencer then dispatches on the typed values for both
//! the tick-0 and the per-tick branch; there is no feature-gated subsetting
//! of the table, every command is always live.

/// Typed effect command, parameter nibbles pre-split where useful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Effect {
    /// No effect on this cell.
    #[default]
    None,
    /// `0xy`: cycle +0/+x/+y semitones each tick.
    Arpeggio(u8),
    /// `1xx`: slide period down (pitch up) every tick.
    PortaUp(u8),
    /// `2xx`: slide period up (pitch down) every tick.
    PortaDown(u8),
    /// `3xx`: slide toward the target note's period.
    TonePorta(u8),
    /// `4xy`: vibrato, x speed, y depth.
    Vibrato(u8, u8),
    /// `5xy`: continue tone portamento + volume slide.
    TonePortaVolSlide(u8),
    /// `6xy`: continue vibrato + volume slide.
    VibratoVolSlide(u8),
    /// `7xy`: tremolo, x speed, y depth.
    Tremolo(u8, u8),
    /// `8xx`: set pan position.
    SetPan(u8),
    /// `9xx`: start sample at offset `xx × 256`.
    SampleOffset(u8),
    /// `Axy`: volume slide, x up or y down per tick.
    VolumeSlide(u8),
    /// `Bxx`: jump to order `xx`.
    PatternJump(u8),
    /// `Cxx`: set volume.
    SetVolume(u8),
    /// `Dxy`: break to row `x×10+y` of the next order.
    PatternBreak(u8),
    /// `Exy` sub-commands.
    Special(Special),
    /// `Fxx`: <0x20 sets ticks per row, otherwise BPM.
    SetSpeedBpm(u8),
    /// `Gxx`: set global volume.
    SetGlobalVolume(u8),
    /// `Hxy`: global volume slide.
    GlobalVolumeSlide(u8),
    /// `Kxx`: key off at tick `xx`.
    KeyOff(u8),
    /// `Lxx`: set envelope position.
    SetEnvelopePos(u8),
    /// `Pxy`: pan slide, x right or y left.
    PanSlide(u8),
    /// `Rxy`: retrigger every y ticks, applying volume operator x.
    MultiRetrig(u8, u8),
    /// `Txy`: tremor, x+1 ticks on then y+1 ticks off.
    Tremor(u8, u8),
    /// `X1y`/`X2y`: extra-fine portamento up/down.
    ExtraFinePorta(u8, u8),
}

/// `Exy` sub-commands, keyed by the parameter's high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    /// `E1x`: fine portamento up, once per row.
    FinePortaUp(u8),
    /// `E2x`: fine portamento down, once per row.
    FinePortaDown(u8),
    /// `E3x`: glissando control.
    Glissando(bool),
    /// `E4x`: vibrato waveform control.
    SetVibratoWave(u8),
    /// `E5x`: override the sample fine-tune.
    SetFinetune(u8),
    /// `E60` marks the loop row, `E6x` jumps back x times.
    PatternLoop(u8),
    /// `E7x`: tremolo waveform control.
    SetTremoloWave(u8),
    /// `E8x`: coarse pan.
    SetPanCoarse(u8),
    /// `E9x`: retrigger every x ticks.
    Retrig(u8),
    /// `EAx`: fine volume slide up, once per row.
    FineVolUp(u8),
    /// `EBx`: fine volume slide down, once per row.
    FineVolDown(u8),
    /// `ECx`: cut volume to zero at tick x.
    NoteCut(u8),
    /// `EDx`: delay the note until tick x.
    NoteDelay(u8),
    /// `EEx`: extend the row by x row-lengths.
    PatternDelay(u8),
    /// Anything this player does not interpret (E0x filter, EFx funk).
    Ignored,
}

impl Effect {
    /// Decode a raw effect id/parameter pair. Unknown ids decode to `None`.
    pub fn decode(effect: u8, param: u8) -> Effect {
        let x = param >> 4;
        let y = param & 0x0F;
        match effect {
            0 if param != 0 => Effect::Arpeggio(param),
            1 => Effect::PortaUp(param),
            2 => Effect::PortaDown(param),
            3 => Effect::TonePorta(param),
            4 => Effect::Vibrato(x, y),
            5 => Effect::TonePortaVolSlide(param),
            6 => Effect::VibratoVolSlide(param),
            7 => Effect::Tremolo(x, y),
            8 => Effect::SetPan(param),
            9 => Effect::SampleOffset(param),
            10 => Effect::VolumeSlide(param),
            11 => Effect::PatternJump(param),
            12 => Effect::SetVolume(param),
            13 => Effect::PatternBreak(param),
            14 => Effect::Special(Special::decode(x, y)),
            15 => Effect::SetSpeedBpm(param),
            16 => Effect::SetGlobalVolume(param),
            17 => Effect::GlobalVolumeSlide(param),
            20 => Effect::KeyOff(param),
            21 => Effect::SetEnvelopePos(param),
            25 => Effect::PanSlide(param),
            27 => Effect::MultiRetrig(x, y),
            29 => Effect::Tremor(x, y),
            33 if x == 1 => Effect::ExtraFinePorta(0, y),
            33 if x == 2 => Effect::ExtraFinePorta(1, y),
            _ => Effect::None,
        }
    }
}

impl Special {
    fn decode(x: u8, y: u8) -> Special {
        match x {
            1 => Special::FinePortaUp(y),
            2 => Special::FinePortaDown(y),
            3 => Special::Glissando(y != 0),
            4 => Special::SetVibratoWave(y),
            5 => Special::SetFinetune(y),
            6 => Special::PatternLoop(y),
            7 => Special::SetTremoloWave(y),
            8 => Special::SetPanCoarse(y),
            9 => Special::Retrig(y),
            10 => Special::FineVolUp(y),
            11 => Special::FineVolDown(y),
            12 => Special::NoteCut(y),
            13 => Special::NoteDelay(y),
            14 => Special::PatternDelay(y),
            _ => Special::Ignored,
        }
    }
}

/// Target row of a pattern break: `x×10 + y`, clamped to 0 when past the
/// 64-row convention the parameter encoding assumes.
pub fn pattern_break_row(param: u8) -> usize {
    let row = (param >> 4) as usize * 10 + (param & 0x0F) as usize;
    if row > 63 {
        0
    } else {
        row
    }
}

/// Volume change for one multi-retrigger, by operator index 0..=15.
pub fn retrig_volume(volume: i32, operator: u8) -> i32 {
    let v = match operator & 0x0F {
        1 => volume - 1,
        2 => volume - 2,
        3 => volume - 4,
        4 => volume - 8,
        5 => volume - 16,
        6 => volume * 2 / 3,
        7 => volume / 2,
        9 => volume + 1,
        10 => volume + 2,
        11 => volume + 4,
        12 => volume + 8,
        13 => volume + 16,
        14 => volume * 3 / 2,
        15 => volume * 2,
        _ => volume, // 0 and 8: unchanged
    };
    v.clamp(0, 64)
}

/// Decoded volume-column byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeCmd {
    /// 0x00..=0x0F: nothing.
    #[default]
    None,
    /// 0x10..=0x50: absolute volume 0..=64.
    Set(u8),
    /// 0x60..=0x6F: slide down every tick.
    SlideDown(u8),
    /// 0x70..=0x7F: slide up every tick.
    SlideUp(u8),
    /// 0x80..=0x8F: fine slide down, once per row.
    FineDown(u8),
    /// 0x90..=0x9F: fine slide up, once per row.
    FineUp(u8),
    /// 0xA0..=0xAF: set vibrato speed.
    VibratoSpeed(u8),
    /// 0xB0..=0xBF: set vibrato depth and run the vibrato.
    VibratoDepth(u8),
    /// 0xC0..=0xCF: set pan to `x << 4`.
    SetPan(u8),
    /// 0xD0..=0xDF: pan slide left every tick.
    PanSlideLeft(u8),
    /// 0xE0..=0xEF: pan slide right every tick.
    PanSlideRight(u8),
    /// 0xF0..=0xFF: tone portamento with speed `x << 4`.
    TonePorta(u8),
}

impl VolumeCmd {
    /// Decode the packed volume-column byte.
    pub fn decode(byte: u8) -> VolumeCmd {
        let y = byte & 0x0F;
        match byte {
            0x10..=0x50 => VolumeCmd::Set(byte - 0x10),
            0x60..=0x6F => VolumeCmd::SlideDown(y),
            0x70..=0x7F => VolumeCmd::SlideUp(y),
            0x80..=0x8F => VolumeCmd::FineDown(y),
            0x90..=0x9F => VolumeCmd::FineUp(y),
            0xA0..=0xAF => VolumeCmd::VibratoSpeed(y),
            0xB0..=0xBF => VolumeCmd::VibratoDepth(y),
            0xC0..=0xCF => VolumeCmd::SetPan(y),
            0xD0..=0xDF => VolumeCmd::PanSlideLeft(y),
            0xE0..=0xEF => VolumeCmd::PanSlideRight(y),
            0xF0..=0xFF => VolumeCmd::TonePorta(y),
            _ => VolumeCmd::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_break_decimal_decode() {
        assert_eq!(pattern_break_row(0x23), 23);
        assert_eq!(pattern_break_row(0x00), 0);
        assert_eq!(pattern_break_row(0x63), 63);
    }

    #[test]
    fn test_pattern_break_clamps_past_63() {
        assert_eq!(pattern_break_row(0x64), 0);
        assert_eq!(pattern_break_row(0x99), 0);
    }

    #[test]
    fn test_arpeggio_zero_is_none() {
        assert_eq!(Effect::decode(0, 0), Effect::None);
        assert_eq!(Effect::decode(0, 0x37), Effect::Arpeggio(0x37));
    }

    #[test]
    fn test_unknown_ids_decode_to_none() {
        for id in [18u8, 19, 22, 24, 26, 28, 30, 31, 32, 34, 200] {
            assert_eq!(Effect::decode(id, 0x42), Effect::None, "effect id {id}");
        }
    }

    #[test]
    fn test_special_nibble_routing() {
        assert_eq!(
            Effect::decode(14, 0x93),
            Effect::Special(Special::Retrig(3))
        );
        assert_eq!(
            Effect::decode(14, 0xC2),
            Effect::Special(Special::NoteCut(2))
        );
        assert_eq!(
            Effect::decode(14, 0x01),
            Effect::Special(Special::Ignored)
        );
    }

    #[test]
    fn test_extra_fine_porta_directions() {
        assert_eq!(Effect::decode(33, 0x15), Effect::ExtraFinePorta(0, 5));
        assert_eq!(Effect::decode(33, 0x27), Effect::ExtraFinePorta(1, 7));
        assert_eq!(Effect::decode(33, 0x35), Effect::None);
    }

    #[test]
    fn test_retrig_volume_operators() {
        assert_eq!(retrig_volume(32, 0), 32);
        assert_eq!(retrig_volume(32, 1), 31);
        assert_eq!(retrig_volume(32, 5), 16);
        assert_eq!(retrig_volume(32, 6), 21);
        assert_eq!(retrig_volume(32, 7), 16);
        assert_eq!(retrig_volume(32, 8), 32);
        assert_eq!(retrig_volume(32, 13), 48);
        assert_eq!(retrig_volume(32, 14), 48);
        assert_eq!(retrig_volume(40, 15), 64, "doubling clamps at 64");
        assert_eq!(retrig_volume(1, 5), 0, "subtraction clamps at 0");
    }

    #[test]
    fn test_volume_column_ranges() {
        assert_eq!(VolumeCmd::decode(0x00), VolumeCmd::None);
        assert_eq!(VolumeCmd::decode(0x10), VolumeCmd::Set(0));
        assert_eq!(VolumeCmd::decode(0x50), VolumeCmd::Set(64));
        assert_eq!(VolumeCmd::decode(0x6A), VolumeCmd::SlideDown(10));
        assert_eq!(VolumeCmd::decode(0x73), VolumeCmd::SlideUp(3));
        assert_eq!(VolumeCmd::decode(0x85), VolumeCmd::FineDown(5));
        assert_eq!(VolumeCmd::decode(0x9F), VolumeCmd::FineUp(15));
        assert_eq!(VolumeCmd::decode(0xA2), VolumeCmd::VibratoSpeed(2));
        assert_eq!(VolumeCmd::decode(0xB4), VolumeCmd::VibratoDepth(4));
        assert_eq!(VolumeCmd::decode(0xC8), VolumeCmd::SetPan(8));
        assert_eq!(VolumeCmd::decode(0xD1), VolumeCmd::PanSlideLeft(1));
        assert_eq!(VolumeCmd::decode(0xE1), VolumeCmd::PanSlideRight(1));
        assert_eq!(VolumeCmd::decode(0xF4), VolumeCmd::TonePorta(4));
    }
}
