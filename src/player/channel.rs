//! Per-voice playback state
//!
//! A [`Channel`] carries everything one pattern column needs between ticks:
//! the current note and period, volume/pan and their per-tick deltas,
//! envelope and LFO cursors, fade-out, and the remembered parameters of
//! every effect (classic tracker semantics: a zero parameter reuses the last
//! non-zero one). Once per tick the channel folds all of that into gain and
//! pitch targets for its mixer slot.

use crate::mixer::{Mixer, VoiceKey};
use crate::module::{EnvelopeState, Instrument, Position, Sample};
use crate::player::effects::{Effect, VolumeCmd};
use crate::player::lfo::{AutoVibratoState, Lfo};
use crate::player::period::{self, period_to_frequency};

/// Fixed normalization for the composite gain
/// volume(0..64) × fadeout(0..65536) × global(0..64), sized so the full
/// multiplicative range maps to 1.0.
const GAIN_NORM: f32 = 1.0 / (64.0 * 65536.0 * 64.0);

/// Starting fade-out volume after a trigger.
pub const FADEOUT_MAX: i32 = 65536;

/// One sequencer voice.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Voice index; also the primary mixer slot index.
    pub index: usize,

    // Note state
    /// Current note 1..=96, 0 when nothing played yet.
    pub note: u8,
    /// Current instrument number (1-based, 0 = none).
    pub instrument_no: usize,
    /// Note adjusted by the sample's relative-note offset, 0-based.
    pub real_note: i32,
    /// Active fine-tune (from the sample, or overridden by `E5x`).
    pub finetune: i32,
    /// Current period.
    pub period: i32,
    /// Per-tick pitch offset (vibrato, arpeggio, auto-vibrato).
    pub period_delta: f32,
    /// Portamento target period.
    pub porta_target: i32,

    // Volume state
    /// Channel volume 0..=64.
    pub volume: i32,
    /// Per-tick volume offset (tremolo, tremor).
    pub vol_delta: i32,
    /// Pan 0..=255.
    pub pan: i32,
    /// Fade-out volume 0..=65536, decays after key-off.
    pub fadeout: i32,
    /// Key-off received.
    pub key_off: bool,

    // Generators
    /// Volume envelope cursor.
    pub env_volume: EnvelopeState,
    /// Pan envelope cursor.
    pub env_pan: EnvelopeState,
    /// Instrument auto-vibrato state.
    pub auto_vibrato: AutoVibratoState,
    /// Effect-column vibrato LFO.
    pub vibrato: Lfo,
    /// Effect-column tremolo LFO.
    pub tremolo: Lfo,

    // Transient flags, consumed by `send_to_mixer` once per tick
    /// Start (or restart) the voice this tick.
    pub trigger: bool,
    /// Stop the voice this tick.
    pub stop: bool,
    /// Sample start offset applied at trigger.
    pub sample_offset: u32,

    // The row's decoded commands, re-dispatched on every non-zero tick
    /// Effect active on the current row.
    pub row_effect: Effect,
    /// Volume-column command active on the current row.
    pub row_volume_cmd: VolumeCmd,
    /// Cell held back by a note delay (`EDx`), replayed at the target tick.
    pub delayed_note: Option<(u8, u8)>,

    // Remembered effect parameters
    /// `1xx` speed.
    pub porta_up_speed: u8,
    /// `2xx` speed.
    pub porta_down_speed: u8,
    /// `3xx` speed.
    pub tone_porta_speed: u8,
    /// `E1x` amount.
    pub fine_porta_up: u8,
    /// `E2x` amount.
    pub fine_porta_down: u8,
    /// `X1y`/`X2y` amount.
    pub extra_fine_porta: u8,
    /// `Axy`/`5xy`/`6xy` parameter.
    pub vol_slide: u8,
    /// `EAx` amount.
    pub fine_vol_up: u8,
    /// `EBx` amount.
    pub fine_vol_down: u8,
    /// `Hxy` parameter.
    pub global_vol_slide: u8,
    /// `Pxy` parameter.
    pub pan_slide: u8,
    /// `9xx` parameter.
    pub offset_param: u8,
    /// `Rxy` tick modulus.
    pub retrig_ticks: u8,
    /// `Rxy` volume operator.
    pub retrig_operator: u8,
    /// `0xy` parameter.
    pub arpeggio_param: u8,
    /// Glissando flag (`E3x`); periods snap to semitones when set.
    pub glissando: bool,

    // Tremor
    /// Ticks the tremor keeps the voice audible.
    pub tremor_on: u8,
    /// Ticks the tremor mutes the voice.
    pub tremor_off: u8,
    /// Persistent tremor phase counter.
    pub tremor_pos: u8,

    // Pattern loop (`E6x`), kept per channel like FastTracker does
    /// Row marked by `E60`.
    pub loop_row: usize,
    /// Remaining loop iterations.
    pub loop_count: u32,
}

impl Channel {
    /// A silent voice bound to mixer slot `index`.
    pub fn new(index: usize) -> Channel {
        Channel {
            index,
            note: 0,
            instrument_no: 0,
            real_note: 0,
            finetune: 0,
            period: 0,
            period_delta: 0.0,
            porta_target: 0,
            volume: 64,
            vol_delta: 0,
            pan: 128,
            fadeout: FADEOUT_MAX,
            key_off: false,
            env_volume: EnvelopeState::new(1.0),
            env_pan: EnvelopeState::new(0.0),
            auto_vibrato: AutoVibratoState::default(),
            vibrato: Lfo::default(),
            tremolo: Lfo::default(),
            trigger: false,
            stop: false,
            sample_offset: 0,
            row_effect: Effect::None,
            row_volume_cmd: VolumeCmd::None,
            delayed_note: None,
            porta_up_speed: 0,
            porta_down_speed: 0,
            tone_porta_speed: 0,
            fine_porta_up: 0,
            fine_porta_down: 0,
            extra_fine_porta: 0,
            vol_slide: 0,
            fine_vol_up: 0,
            fine_vol_down: 0,
            global_vol_slide: 0,
            pan_slide: 0,
            offset_param: 0,
            retrig_ticks: 0,
            retrig_operator: 0,
            arpeggio_param: 0,
            glissando: false,
            tremor_on: 0,
            tremor_off: 0,
            tremor_pos: 0,
            loop_row: 0,
            loop_count: 0,
        }
    }

    /// Reinitialize the voice for a fresh instrument number: volume/pan from
    /// the sample defaults, envelopes rewound, key-off and LFO phases cleared.
    pub fn reset(&mut self, volume: u8, pan: u8) {
        self.volume = volume as i32;
        self.pan = pan as i32;
        self.env_volume = EnvelopeState::new(1.0);
        self.env_pan = EnvelopeState::new(0.0);
        self.key_off = false;
        self.fadeout = FADEOUT_MAX;
        self.auto_vibrato.reset();
        self.vol_delta = 0;
        self.tremor_pos = 0;
    }

    /// Tick-0 interpretation of the volume column. Absolute sets and effect
    /// setup live here; the continuously-applied subset is in
    /// [`process_volume_tick`](Self::process_volume_tick).
    pub fn process_volume_note(&mut self) {
        match self.row_volume_cmd {
            VolumeCmd::Set(v) => self.volume = v as i32,
            VolumeCmd::FineDown(y) => self.volume -= y as i32,
            VolumeCmd::FineUp(y) => self.volume += y as i32,
            VolumeCmd::VibratoSpeed(x) => {
                if x > 0 {
                    self.vibrato.speed = x;
                }
            }
            VolumeCmd::SetPan(x) => self.pan = (x as i32) << 4,
            VolumeCmd::TonePorta(x) => {
                if x > 0 {
                    self.tone_porta_speed = x << 4;
                }
            }
            _ => {}
        }
    }

    /// Per-tick interpretation of the volume column.
    pub fn process_volume_tick(&mut self, linear: bool) {
        match self.row_volume_cmd {
            VolumeCmd::SlideDown(y) => self.volume -= y as i32,
            VolumeCmd::SlideUp(y) => self.volume += y as i32,
            VolumeCmd::VibratoDepth(y) => {
                if y > 0 {
                    self.vibrato.depth = y;
                }
                self.period_delta += self.vibrato.vibrato_delta();
                self.vibrato.advance();
            }
            VolumeCmd::PanSlideLeft(y) => self.pan -= y as i32,
            VolumeCmd::PanSlideRight(y) => self.pan += y as i32,
            VolumeCmd::TonePorta(_) => self.tone_portamento(linear),
            _ => {}
        }
    }

    /// Slide the period toward the portamento target by the remembered speed.
    ///
    /// Glissando mode (`E31`) keeps the slide itself exact but quantizes the
    /// emitted pitch to whole semitones through the per-tick delta.
    pub fn tone_portamento(&mut self, linear: bool) {
        if self.porta_target == 0 {
            return;
        }
        let step = self.tone_porta_speed as i32 * 4;
        if self.period < self.porta_target {
            self.period = (self.period + step).min(self.porta_target);
        } else {
            self.period = (self.period - step).max(self.porta_target);
        }
        if self.glissando && self.period != self.porta_target {
            let snapped = period::snap_to_semitone(self.period, self.finetune, linear);
            self.period_delta += (snapped - self.period) as f32;
        }
    }

    /// Alternate the voice between audible and muted on the programmed
    /// on/off tick counts.
    pub fn tremor(&mut self) {
        if self.tremor_pos >= self.tremor_on {
            self.vol_delta = -self.volume;
        }
        self.tremor_pos += 1;
        if self.tremor_pos >= self.tremor_on + self.tremor_off {
            self.tremor_pos = 0;
        }
    }

    /// Advance envelopes, fade-out and auto-vibrato by one tick.
    pub fn process_instrument(&mut self, instrument: &Instrument) {
        if let Some(env) = &instrument.volume_envelope {
            self.env_volume.advance(env, self.key_off);
        } else if self.key_off {
            // No volume envelope: key-off silences the voice immediately.
            self.fadeout = 0;
        }
        if let Some(env) = &instrument.pan_envelope {
            self.env_pan.advance(env, self.key_off);
        }

        if self.key_off {
            self.fadeout = (self.fadeout - instrument.fadeout as i32).max(0);
        }

        self.period_delta += self.auto_vibrato.advance(&instrument.vibrato);
    }

    /// Clamp the composite volume levels into their legal ranges.
    pub fn update_volume(&mut self) {
        self.volume = self.volume.clamp(0, 64);
        self.vol_delta = self
            .vol_delta
            .clamp(-self.volume, 64 - self.volume);
        self.pan = self.pan.clamp(0, 255);
    }

    /// Push this tick's render parameters into the voice's mixer slot,
    /// handling trigger (with ghost-slot stealing) and stop transitions.
    pub fn send_to_mixer(
        &mut self,
        mixer: &mut Mixer,
        instrument: Option<&Instrument>,
        global_volume: i32,
        linear_frequency: bool,
    ) {
        let sample_index = instrument.and_then(|i| i.sample_index_for_note(self.note));

        if self.stop {
            self.stop = false;
            self.trigger = false;
            mixer.channel_mut(self.index).release();
            return;
        }

        if self.trigger {
            self.trigger = false;
            if let (Some(instrument), Some(sample_index)) = (instrument, sample_index) {
                mixer.steal_to_ghost(self.index);
                self.bind_voice(mixer, &instrument.samples[sample_index], sample_index);
            }
        }

        if sample_index.is_none() {
            return;
        }

        let volume = (self.volume + self.vol_delta) as f32
            * self.fadeout as f32
            * global_volume as f32
            * GAIN_NORM
            * self.env_volume.value();

        let pan = self.pan as f32;
        let pan = (pan + self.env_pan.value() * (128.0 - (pan - 128.0).abs())).clamp(0.0, 255.0);

        let frequency = period_to_frequency(
            self.period as f32 + self.period_delta,
            linear_frequency,
        );

        let slot = mixer.channel_mut(self.index);
        slot.target_left = volume * (255.0 - pan) / 255.0;
        slot.target_right = volume * pan / 255.0;
        slot.set_frequency(frequency);
    }

    fn bind_voice(&mut self, mixer: &mut Mixer, sample: &Sample, sample_index: usize) {
        let slot = mixer.channel_mut(self.index);
        slot.key = Some(VoiceKey {
            instrument: self.instrument_no as u16,
            sample_index: sample_index as u16,
        });
        slot.loop_mode = sample.loop_mode;
        slot.loop_start = sample.loop_start as f64;
        slot.play_end = sample.play_end() as f64;
        // An offset past the playable range ends an unlooped voice at once.
        slot.position = (self.sample_offset as f64).min(sample.play_end() as f64);
        slot.forward = true;
        // Ramp in from silence rather than inheriting the stolen gains.
        slot.gain_left = 0.0;
        slot.gain_right = 0.0;
        self.sample_offset = 0;
    }

    /// Remember the row the next `E6x` jumps back to.
    pub fn mark_loop_row(&mut self, position: Position) {
        self.loop_row = position.row;
    }
}
