//! Playback engine
//!
//! [`PlayerState`] is the sequencer: it owns the parsed [`Module`] and one
//! [`Channel`] per pattern column, and advances in two nested clocks. The
//! fine clock is the tick, pulled by the mixer whenever its per-tick sample
//! budget runs out. `ticks_per_row + pattern_delay` ticks make one row. Row
//! positions are double-buffered: the position decided while processing
//! tick 0 takes effect on the following row, so jump/break/loop effects
//! override a "next" slot instead of mutating the current one.

pub mod channel;
pub mod effects;
pub mod lfo;
pub mod period;

pub use channel::Channel;
pub use effects::{Effect, Special, VolumeCmd};
pub use lfo::{Lfo, Waveform};

use crate::mixer::Mixer;
use crate::module::{Module, PatternCell, Position, NOTE_KEY_OFF, NOTE_MAX};
use effects::{pattern_break_row, retrig_volume};

/// Lowest period a portamento can slide to (about two octaves above the
/// note range top).
const MIN_PERIOD: i32 = 56;
/// Highest period a portamento can slide to.
const MAX_PERIOD: i32 = 32000;

/// The tick-driven sequencer state machine.
pub struct PlayerState {
    module: Module,
    channels: Vec<Channel>,
    /// Ticks per row.
    speed: u32,
    bpm: u32,
    /// Tick index inside the current row.
    tick: u32,
    /// Extra ticks appended to the current row by `EEx`.
    pattern_delay: u32,
    global_volume: i32,
    current: Position,
    next: Position,
    /// Set once a row-altering effect has claimed the next position;
    /// later overrides on the same row are ignored (legacy quirk).
    next_overridden: bool,
    /// The pending `next` came from wrapping past the last order.
    wrap_next: bool,
    /// A wrapped position has been promoted; the song has played through.
    song_wrapped: bool,
}

impl PlayerState {
    /// Wrap a module for playback, channels initialized for a fresh session.
    pub fn new(module: Module) -> PlayerState {
        let channels = (0..module.num_channels).map(Channel::new).collect();
        let speed = module.default_speed;
        let bpm = module.default_bpm;
        PlayerState {
            module,
            channels,
            speed,
            bpm,
            tick: 0,
            pattern_delay: 0,
            global_volume: 64,
            current: Position::default(),
            next: Position::default(),
            next_overridden: false,
            wrap_next: false,
            song_wrapped: false,
        }
    }

    /// The module being played.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Give the module back, ending the session.
    pub fn into_module(self) -> Module {
        self.module
    }

    /// Current tempo in beats per minute.
    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    /// Current ticks-per-row setting.
    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// Current global volume 0..=64.
    pub fn global_volume(&self) -> i32 {
        self.global_volume
    }

    /// Position of the row currently sounding.
    pub fn position(&self) -> Position {
        self.current
    }

    /// Whether playback has wrapped past the last order at least once.
    pub fn song_wrapped(&self) -> bool {
        self.song_wrapped
    }

    /// Rewind to the start of the song, re-initializing every channel.
    pub fn reset(&mut self) {
        let n = self.module.num_channels;
        self.channels = (0..n).map(Channel::new).collect();
        self.speed = self.module.default_speed;
        self.bpm = self.module.default_bpm;
        self.tick = 0;
        self.pattern_delay = 0;
        self.global_volume = 64;
        self.current = Position::default();
        self.next = Position::default();
        self.next_overridden = false;
        self.wrap_next = false;
        self.song_wrapped = false;
    }

    /// Advance the sequencer by one tick and push every voice's render
    /// parameters into the mixer. Returns the sounding position, which the
    /// mixer caches for time-sync queries.
    pub fn tick(&mut self, mixer: &mut Mixer) -> Position {
        if self.tick == 0 {
            self.update_note();
        } else {
            self.update_tick();
        }

        self.global_volume = self.global_volume.clamp(0, 64);

        let linear = self.module.linear_frequency();
        for ch in &mut self.channels {
            ch.update_volume();
            let instrument = self.module.instrument(ch.instrument_no);
            if let Some(instrument) = instrument {
                ch.process_instrument(instrument);
            }
            ch.send_to_mixer(mixer, instrument, self.global_volume, linear);
        }

        self.tick += 1;
        if self.tick >= self.speed + self.pattern_delay {
            self.tick = 0;
            self.pattern_delay = 0;
        }

        self.current
    }

    /// Compute the default follow-up position: row+1, wrapping into the next
    /// order, wrapping the order list into the restart position.
    fn default_next(&mut self) -> Position {
        let rows = self
            .module
            .pattern_at_order(self.current.order)
            .map(|p| p.rows())
            .unwrap_or(1);
        let mut next = self.current;
        next.row += 1;
        if next.row >= rows {
            next.row = 0;
            next.order += 1;
            if next.order >= self.module.song_length {
                next.order = self.module.restart_position;
                self.wrap_next = true;
            }
        }
        next
    }

    /// Claim the next position for a row-altering effect. First claim wins.
    fn override_next(&mut self, position: Position) {
        if !self.next_overridden {
            self.next = position;
            self.next_overridden = true;
            self.wrap_next = false;
        }
    }

    /// Tick 0: promote the pending position and interpret the new row.
    fn update_note(&mut self) {
        self.current = self.next;
        if self.wrap_next {
            self.song_wrapped = true;
        }
        self.wrap_next = false;
        self.next = self.default_next();
        self.next_overridden = false;

        let Some(pattern) = self.module.pattern_at_order(self.current.order) else {
            return;
        };
        let row = self.current.row.min(pattern.rows() - 1);

        // The pattern grid is part of the immutable module, so cells are
        // copied out before the mutable channel pass.
        let cells: Vec<PatternCell> = (0..self.channels.len())
            .map(|ch| *pattern.cell(row, ch))
            .collect();

        for (ch_index, cell) in cells.iter().enumerate() {
            self.process_cell(ch_index, cell);
        }
    }

    fn process_cell(&mut self, ch_index: usize, cell: &PatternCell) {
        let effect = Effect::decode(cell.effect, cell.param);
        let volume_cmd = VolumeCmd::decode(cell.volume);

        let porta = matches!(
            effect,
            Effect::TonePorta(_) | Effect::TonePortaVolSlide(_)
        ) || matches!(volume_cmd, VolumeCmd::TonePorta(_));

        let delay_tick = match effect {
            Effect::Special(Special::NoteDelay(x)) if x > 0 => Some(x),
            _ => None,
        };

        let linear = self.module.linear_frequency();
        let current = self.current;
        let ch = &mut self.channels[ch_index];

        ch.row_effect = effect;
        ch.row_volume_cmd = volume_cmd;
        ch.period_delta = 0.0;
        ch.vol_delta = 0;
        ch.delayed_note = None;

        if delay_tick.is_some() {
            // The whole cell is held back until the programmed tick.
            ch.delayed_note = Some((cell.note, cell.instrument));
            return;
        }

        // New instrument number: remember it and reinitialize the voice
        // from the sample defaults.
        if cell.instrument != 0 {
            let number = cell.instrument as usize;
            if let Some(instrument) = self.module.instrument(number) {
                ch.instrument_no = number;
                let note = if cell.note >= 1 && cell.note <= NOTE_MAX {
                    cell.note
                } else {
                    ch.note
                };
                if let Some(sample) = instrument.sample_for_note(note) {
                    ch.reset(sample.default_volume, sample.default_pan);
                }
            }
        }

        match cell.note {
            1..=NOTE_MAX => {
                let mut resolved = false;
                if let Some(instrument) = self.module.instrument(ch.instrument_no) {
                    if let Some(sample) = instrument.sample_for_note(cell.note) {
                        let real_note =
                            cell.note as i32 - 1 + sample.relative_note as i32;
                        if (0..8 * 12).contains(&real_note) {
                            resolved = true;
                            let finetune = sample.finetune as i32;
                            let target =
                                period::note_to_period(real_note, finetune, linear);
                            if porta {
                                // Portamento suppresses the retrigger; the new
                                // note only becomes the slide target.
                                ch.porta_target = target;
                            } else {
                                ch.note = cell.note;
                                ch.real_note = real_note;
                                ch.finetune = finetune;
                                ch.period = target;
                                ch.porta_target = target;
                                ch.trigger = true;
                                ch.sample_offset = 0;
                                ch.vibrato.retrigger();
                                ch.tremolo.retrigger();
                            }
                        }
                    }
                }
                if !resolved {
                    // Unplayable note: cut whatever the voice was doing.
                    ch.stop = true;
                }
            }
            NOTE_KEY_OFF => ch.key_off = true,
            _ => {}
        }

        ch.process_volume_note();
        self.apply_effect_note(ch_index, current);
    }

    /// Tick-0 branch of the effect table.
    fn apply_effect_note(&mut self, ch_index: usize, current: Position) {
        let song_length = self.module.song_length;
        let ch = &mut self.channels[ch_index];

        // Borrowed out so row-global overrides below can use `self`.
        let mut jump: Option<Position> = None;

        match ch.row_effect {
            Effect::Arpeggio(param) => ch.arpeggio_param = param,
            Effect::PortaUp(p) => {
                if p > 0 {
                    ch.porta_up_speed = p;
                }
            }
            Effect::PortaDown(p) => {
                if p > 0 {
                    ch.porta_down_speed = p;
                }
            }
            Effect::TonePorta(p) => {
                if p > 0 {
                    ch.tone_porta_speed = p;
                }
            }
            Effect::Vibrato(x, y) => {
                if x > 0 {
                    ch.vibrato.speed = x;
                }
                if y > 0 {
                    ch.vibrato.depth = y;
                }
                ch.period_delta += ch.vibrato.vibrato_delta();
            }
            Effect::TonePortaVolSlide(p) | Effect::VibratoVolSlide(p) => {
                if p > 0 {
                    ch.vol_slide = p;
                }
            }
            Effect::Tremolo(x, y) => {
                if x > 0 {
                    ch.tremolo.speed = x;
                }
                if y > 0 {
                    ch.tremolo.depth = y;
                }
            }
            Effect::SetPan(p) => ch.pan = p as i32,
            Effect::SampleOffset(p) => {
                if p > 0 {
                    ch.offset_param = p;
                }
                ch.sample_offset = ch.offset_param as u32 * 256;
            }
            Effect::VolumeSlide(p) => {
                if p > 0 {
                    ch.vol_slide = p;
                }
            }
            Effect::PatternJump(order) => {
                let order = (order as usize).min(song_length.saturating_sub(1));
                jump = Some(Position { order, row: 0 });
            }
            Effect::SetVolume(v) => ch.volume = (v as i32).min(64),
            Effect::PatternBreak(param) => {
                let mut order = current.order + 1;
                if order >= song_length {
                    order = self.module.restart_position;
                }
                jump = Some(Position {
                    order,
                    row: pattern_break_row(param),
                });
            }
            Effect::Special(special) => match special {
                Special::FinePortaUp(y) => {
                    if y > 0 {
                        ch.fine_porta_up = y;
                    }
                    ch.period =
                        (ch.period - ch.fine_porta_up as i32 * 4).max(MIN_PERIOD);
                }
                Special::FinePortaDown(y) => {
                    if y > 0 {
                        ch.fine_porta_down = y;
                    }
                    ch.period =
                        (ch.period + ch.fine_porta_down as i32 * 4).min(MAX_PERIOD);
                }
                Special::Glissando(on) => ch.glissando = on,
                Special::SetVibratoWave(y) => {
                    ch.vibrato.waveform = Waveform::from_bits(y);
                    ch.vibrato.keep_phase = y & 0x04 != 0;
                }
                Special::SetFinetune(y) => ch.finetune = (y as i32 - 8) * 16,
                Special::PatternLoop(y) => {
                    if y == 0 {
                        ch.mark_loop_row(current);
                    } else {
                        if ch.loop_count == 0 {
                            ch.loop_count = y as u32;
                        } else {
                            ch.loop_count -= 1;
                        }
                        if ch.loop_count > 0 {
                            jump = Some(Position {
                                order: current.order,
                                row: ch.loop_row,
                            });
                        }
                    }
                }
                Special::SetTremoloWave(y) => {
                    ch.tremolo.waveform = Waveform::from_bits(y);
                    ch.tremolo.keep_phase = y & 0x04 != 0;
                }
                Special::SetPanCoarse(y) => ch.pan = (y as i32) << 4,
                Special::Retrig(y) => ch.retrig_ticks = y,
                Special::FineVolUp(y) => {
                    if y > 0 {
                        ch.fine_vol_up = y;
                    }
                    ch.volume += ch.fine_vol_up as i32;
                }
                Special::FineVolDown(y) => {
                    if y > 0 {
                        ch.fine_vol_down = y;
                    }
                    ch.volume -= ch.fine_vol_down as i32;
                }
                Special::NoteCut(0) => ch.volume = 0,
                Special::NoteCut(_) => {}
                Special::NoteDelay(_) => {}
                Special::PatternDelay(x) => {
                    if self.pattern_delay == 0 {
                        self.pattern_delay = x as u32 * self.speed;
                    }
                }
                Special::Ignored => {}
            },
            Effect::SetSpeedBpm(p) => {
                if p == 0 {
                    // F00 stops playback in some trackers; ignored here.
                } else if p < 0x20 {
                    self.speed = p as u32;
                } else {
                    self.bpm = p as u32;
                }
            }
            Effect::SetGlobalVolume(v) => self.global_volume = (v as i32).min(64),
            Effect::GlobalVolumeSlide(p) => {
                if p > 0 {
                    ch.global_vol_slide = p;
                }
            }
            Effect::KeyOff(0) => ch.key_off = true,
            Effect::KeyOff(_) => {}
            Effect::SetEnvelopePos(p) => {
                if let Some(instrument) = self.module.instrument(ch.instrument_no) {
                    if let Some(env) = &instrument.volume_envelope {
                        ch.env_volume.set_position(env, p as u32);
                    }
                }
            }
            Effect::PanSlide(p) => {
                if p > 0 {
                    ch.pan_slide = p;
                }
            }
            Effect::MultiRetrig(x, y) => {
                if y > 0 {
                    ch.retrig_ticks = y;
                }
                if x > 0 {
                    ch.retrig_operator = x;
                }
            }
            Effect::Tremor(x, y) => {
                ch.tremor_on = x + 1;
                ch.tremor_off = y + 1;
            }
            Effect::ExtraFinePorta(direction, y) => {
                if y > 0 {
                    ch.extra_fine_porta = y;
                }
                let step = ch.extra_fine_porta as i32;
                ch.period = if direction == 0 {
                    (ch.period - step).max(MIN_PERIOD)
                } else {
                    (ch.period + step).min(MAX_PERIOD)
                };
            }
            Effect::None => {}
        }

        if let Some(position) = jump {
            self.override_next(position);
        }
    }

    /// Tick N>0: re-run the continuously-evaluated branch of the table.
    fn update_tick(&mut self) {
        let linear = self.module.linear_frequency();
        let tick = self.tick;

        for ch_index in 0..self.channels.len() {
            let ch = &mut self.channels[ch_index];
            ch.period_delta = 0.0;
            ch.vol_delta = 0;

            // A note delay fires exactly at its programmed tick.
            if let Some((note, instrument_no)) = ch.delayed_note {
                if let Effect::Special(Special::NoteDelay(x)) = ch.row_effect {
                    if tick == x as u32 {
                        ch.delayed_note = None;
                        let cell = PatternCell {
                            note,
                            instrument: instrument_no,
                            volume: 0,
                            effect: 0,
                            param: 0,
                        };
                        let keep_volume_cmd = ch.row_volume_cmd;
                        self.process_delayed(ch_index, &cell, keep_volume_cmd);
                        continue;
                    }
                }
                continue;
            }

            ch.process_volume_tick(linear);

            match ch.row_effect {
                Effect::Arpeggio(param) => {
                    let offset = match tick % 3 {
                        1 => (param >> 4) as i32,
                        2 => (param & 0x0F) as i32,
                        _ => 0,
                    };
                    if offset != 0 {
                        let base =
                            period::note_to_period(ch.real_note, ch.finetune, linear);
                        let shifted = period::note_to_period(
                            ch.real_note + offset,
                            ch.finetune,
                            linear,
                        );
                        ch.period_delta += (shifted - base) as f32;
                    }
                }
                Effect::PortaUp(_) => {
                    ch.period =
                        (ch.period - ch.porta_up_speed as i32 * 4).max(MIN_PERIOD);
                }
                Effect::PortaDown(_) => {
                    ch.period =
                        (ch.period + ch.porta_down_speed as i32 * 4).min(MAX_PERIOD);
                }
                Effect::TonePorta(_) => ch.tone_portamento(linear),
                Effect::Vibrato(_, _) => {
                    ch.period_delta += ch.vibrato.vibrato_delta();
                    ch.vibrato.advance();
                }
                Effect::TonePortaVolSlide(_) => {
                    ch.tone_portamento(linear);
                    apply_volume_slide(ch);
                }
                Effect::VibratoVolSlide(_) => {
                    ch.period_delta += ch.vibrato.vibrato_delta();
                    ch.vibrato.advance();
                    apply_volume_slide(ch);
                }
                Effect::Tremolo(_, _) => {
                    ch.vol_delta += ch.tremolo.tremolo_delta() as i32;
                    ch.tremolo.advance();
                }
                Effect::VolumeSlide(_) => apply_volume_slide(ch),
                Effect::Special(Special::Retrig(y)) => {
                    if y > 0 && tick % y as u32 == 0 {
                        ch.trigger = true;
                    }
                }
                Effect::Special(Special::NoteCut(x)) => {
                    if tick == x as u32 {
                        ch.volume = 0;
                    }
                }
                Effect::GlobalVolumeSlide(_) => {
                    let p = ch.global_vol_slide;
                    let (x, y) = (p >> 4, p & 0x0F);
                    if x > 0 {
                        self.global_volume += x as i32;
                    } else {
                        self.global_volume -= y as i32;
                    }
                }
                Effect::KeyOff(x) => {
                    if tick == x as u32 {
                        ch.key_off = true;
                    }
                }
                Effect::PanSlide(_) => {
                    let p = ch.pan_slide;
                    let (x, y) = (p >> 4, p & 0x0F);
                    if x > 0 {
                        ch.pan += x as i32;
                    } else {
                        ch.pan -= y as i32;
                    }
                }
                Effect::MultiRetrig(_, _) => {
                    if ch.retrig_ticks > 0 && tick % ch.retrig_ticks as u32 == 0 {
                        ch.volume = retrig_volume(ch.volume, ch.retrig_operator);
                        ch.trigger = true;
                    }
                }
                Effect::Tremor(_, _) => ch.tremor(),
                _ => {}
            }
        }
    }

    /// Fire a note held back by `EDx`: trigger plus the volume-column note
    /// branch, as if the cell had landed on this tick.
    fn process_delayed(&mut self, ch_index: usize, cell: &PatternCell, volume_cmd: VolumeCmd) {
        let linear = self.module.linear_frequency();

        if cell.instrument != 0 {
            let number = cell.instrument as usize;
            if let Some(instrument) = self.module.instrument(number) {
                if let Some(sample) = instrument.sample_for_note(cell.note) {
                    let (dv, dp) = (sample.default_volume, sample.default_pan);
                    let ch = &mut self.channels[ch_index];
                    ch.instrument_no = number;
                    ch.reset(dv, dp);
                }
            }
        }

        if (1..=NOTE_MAX).contains(&cell.note) {
            let instrument_no = self.channels[ch_index].instrument_no;
            if let Some(instrument) = self.module.instrument(instrument_no) {
                if let Some(sample) = instrument.sample_for_note(cell.note) {
                    let real_note = cell.note as i32 - 1 + sample.relative_note as i32;
                    if (0..8 * 12).contains(&real_note) {
                        let finetune = sample.finetune as i32;
                        let ch = &mut self.channels[ch_index];
                        ch.note = cell.note;
                        ch.real_note = real_note;
                        ch.finetune = finetune;
                        ch.period = period::note_to_period(real_note, finetune, linear);
                        ch.porta_target = ch.period;
                        ch.trigger = true;
                        ch.vibrato.retrigger();
                        ch.tremolo.retrigger();
                    }
                }
            }
        } else if cell.note == NOTE_KEY_OFF {
            self.channels[ch_index].key_off = true;
        }

        let ch = &mut self.channels[ch_index];
        ch.row_volume_cmd = volume_cmd;
        ch.process_volume_note();
    }
}

/// `Axy` family: x slides up, otherwise y slides down, every tick.
fn apply_volume_slide(ch: &mut Channel) {
    let (x, y) = (ch.vol_slide >> 4, ch.vol_slide & 0x0F);
    if x > 0 {
        ch.volume += x as i32;
    } else {
        ch.volume -= y as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{
        instrument::Sample, Instrument, LoopMode, Module, ModuleFlags, Pattern,
    };

    fn test_sample(frames: u32) -> Sample {
        let mut s = Sample {
            length: frames,
            loop_start: 0,
            loop_length: frames,
            loop_mode: LoopMode::Normal,
            default_volume: 64,
            default_pan: 128,
            data: vec![1000i16; frames as usize + 1],
            ..Default::default()
        };
        s.patch_guard();
        s
    }

    fn test_instrument() -> Instrument {
        Instrument {
            samples: vec![test_sample(64)],
            ..Default::default()
        }
    }

    /// One-instrument module with the given patterns and order table.
    fn test_module(patterns: Vec<Pattern>, order: &[u8]) -> Module {
        Module {
            song_length: order.len(),
            restart_position: 0,
            num_channels: 1,
            flags: ModuleFlags::LINEAR_FREQUENCY,
            default_speed: 6,
            default_bpm: 125,
            order_table: order.to_vec(),
            patterns,
            instruments: vec![test_instrument()],
            ..Default::default()
        }
    }

    fn run_rows(player: &mut PlayerState, mixer: &mut Mixer, rows: u32) -> Vec<Position> {
        let mut positions = Vec::new();
        for _ in 0..rows {
            for _ in 0..player.speed() {
                player.tick(mixer);
            }
            positions.push(player.position());
        }
        positions
    }

    #[test]
    fn test_default_row_advance_and_order_wrap() {
        let pattern = Pattern::empty(4, 1);
        let module = test_module(vec![pattern.clone(), pattern], &[0, 1]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        let positions = run_rows(&mut player, &mut mixer, 9);
        let expected: Vec<(usize, usize)> = vec![
            (0, 0),
            (0, 1),
            (0, 2),
            (0, 3),
            (1, 0),
            (1, 1),
            (1, 2),
            (1, 3),
            (0, 0), // wrapped to restart position
        ];
        let got: Vec<(usize, usize)> = positions.iter().map(|p| (p.order, p.row)).collect();
        assert_eq!(got, expected);
        assert!(player.song_wrapped());
    }

    #[test]
    fn test_pattern_break_targets_decoded_row() {
        let mut p0 = Pattern::empty(8, 1);
        p0.cell_mut(0, 0).effect = 13; // D
        p0.cell_mut(0, 0).param = 0x23;
        let p1 = Pattern::empty(32, 1);
        let module = test_module(vec![p0, p1], &[0, 1]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        let positions = run_rows(&mut player, &mut mixer, 2);
        assert_eq!((positions[1].order, positions[1].row), (1, 23));
    }

    #[test]
    fn test_pattern_jump_first_override_wins() {
        // Jump to order 2 and break on the same row; the jump is first in
        // channel order, so the break must be ignored.
        let mut p0 = Pattern::empty(4, 2);
        p0.cell_mut(0, 0).effect = 11; // B: jump to order 2
        p0.cell_mut(0, 0).param = 2;
        p0.cell_mut(0, 1).effect = 13; // D: break to row 1
        p0.cell_mut(0, 1).param = 0x01;
        let filler = Pattern::empty(4, 2);
        let mut module = test_module(vec![p0, filler.clone(), filler], &[0, 1, 2]);
        module.num_channels = 2;
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        let positions = run_rows(&mut player, &mut mixer, 2);
        assert_eq!((positions[1].order, positions[1].row), (2, 0));
    }

    #[test]
    fn test_pattern_loop_repeats_marked_row() {
        let mut p0 = Pattern::empty(4, 1);
        p0.cell_mut(1, 0).effect = 14; // E60: mark row 1
        p0.cell_mut(1, 0).param = 0x60;
        p0.cell_mut(2, 0).effect = 14; // E62: loop back twice
        p0.cell_mut(2, 0).param = 0x62;
        let module = test_module(vec![p0], &[0]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        let positions = run_rows(&mut player, &mut mixer, 8);
        let rows: Vec<usize> = positions.iter().map(|p| p.row).collect();
        // 0,1,2 then loop → 1,2 loop → 1,2 then fall through to 3.
        assert_eq!(rows, vec![0, 1, 2, 1, 2, 1, 2, 3]);
    }

    #[test]
    fn test_set_speed_changes_ticks_per_row() {
        let mut p0 = Pattern::empty(4, 1);
        p0.cell_mut(0, 0).effect = 15; // F03
        p0.cell_mut(0, 0).param = 3;
        let module = test_module(vec![p0], &[0]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        player.tick(&mut mixer);
        assert_eq!(player.speed(), 3);

        // Two more ticks finish the row at the new speed.
        player.tick(&mut mixer);
        player.tick(&mut mixer);
        player.tick(&mut mixer);
        assert_eq!(player.position().row, 1);
    }

    #[test]
    fn test_set_bpm_does_not_touch_speed() {
        let mut p0 = Pattern::empty(4, 1);
        p0.cell_mut(0, 0).effect = 15; // F8C: bpm 140
        p0.cell_mut(0, 0).param = 0x8C;
        let module = test_module(vec![p0], &[0]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        player.tick(&mut mixer);
        assert_eq!(player.bpm(), 140);
        assert_eq!(player.speed(), 6);
    }

    #[test]
    fn test_pattern_delay_stretches_row() {
        let mut p0 = Pattern::empty(4, 1);
        p0.cell_mut(0, 0).effect = 14; // EE1: one extra row length
        p0.cell_mut(0, 0).param = 0xE1;
        let module = test_module(vec![p0], &[0]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        // 6 normal + 6 delay ticks before row 1.
        for _ in 0..12 {
            assert_eq!(player.position().row, 0);
            player.tick(&mut mixer);
        }
        player.tick(&mut mixer);
        assert_eq!(player.position().row, 1);
    }

    #[test]
    fn test_note_triggers_voice() {
        let mut p0 = Pattern::empty(4, 1);
        p0.cell_mut(0, 0).note = 49; // C-4
        p0.cell_mut(0, 0).instrument = 1;
        let module = test_module(vec![p0], &[0]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        player.tick(&mut mixer);
        let slot = mixer.channel_mut(0);
        assert!(slot.key.is_some(), "voice must be bound after a note");
        assert!(slot.target_left > 0.0 || slot.target_right > 0.0);
    }

    #[test]
    fn test_key_off_starts_fadeout() {
        let mut p0 = Pattern::empty(4, 1);
        p0.cell_mut(0, 0).note = 49;
        p0.cell_mut(0, 0).instrument = 1;
        p0.cell_mut(1, 0).note = 97; // key-off
        let mut module = test_module(vec![p0], &[0]);
        module.instruments[0].fadeout = 4096;
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        run_rows(&mut player, &mut mixer, 2);
        let ch = &player.channels[0];
        assert!(ch.key_off);
        assert!(ch.fadeout < crate::player::channel::FADEOUT_MAX);
    }

    #[test]
    fn test_global_volume_clamped() {
        let mut p0 = Pattern::empty(4, 1);
        p0.cell_mut(0, 0).effect = 16; // Gxx with oversized parameter
        p0.cell_mut(0, 0).param = 0x80;
        let module = test_module(vec![p0], &[0]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        player.tick(&mut mixer);
        assert_eq!(player.global_volume(), 64);
    }

    #[test]
    fn test_portamento_suppresses_retrigger() {
        let mut p0 = Pattern::empty(4, 1);
        p0.cell_mut(0, 0).note = 49;
        p0.cell_mut(0, 0).instrument = 1;
        p0.cell_mut(1, 0).note = 61; // octave up, but with 3xx
        p0.cell_mut(1, 0).effect = 3;
        p0.cell_mut(1, 0).param = 0x10;
        let module = test_module(vec![p0], &[0]);
        let mut player = PlayerState::new(module);
        let mut mixer = Mixer::new(44_100);

        run_rows(&mut player, &mut mixer, 1);
        let period_before = player.channels[0].period;

        player.tick(&mut mixer); // tick 0 of row 1
        let ch = &player.channels[0];
        assert!(!ch.trigger, "tone portamento must not retrigger the voice");
        assert_eq!(ch.period, period_before, "period unchanged at tick 0");
        assert!(ch.porta_target < period_before, "target set to the new note");
    }
}
