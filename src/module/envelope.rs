//! Instrument envelopes
//!
//! XM volume and panning envelopes are breakpoint curves evaluated once per
//! sequencer tick. Points are pre-converted at load time into
//! `{position, value, per-tick delta}` triples so the runtime advance is O(1):
//! no searching for the bracketing segment, just one multiply-add.

use bitflags::bitflags;

/// Maximum number of envelope points in the XM format.
pub const MAX_ENVELOPE_POINTS: usize = 12;

bitflags! {
    /// Envelope type byte from the extended instrument header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnvelopeFlags: u8 {
        /// Envelope is evaluated at all.
        const ENABLED = 0x01;
        /// Hold at the sustain point until key-off.
        const SUSTAIN = 0x02;
        /// Wrap from the loop end point back to the loop start point.
        const LOOP = 0x04;
    }
}

/// Which value range an envelope's raw points use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Volume envelope: raw 0..64 rescaled to 0.0..1.0.
    Volume,
    /// Panning envelope: raw stored as 0..64 around center 32, rescaled to -1.0..1.0.
    Pan,
}

/// One pre-converted envelope breakpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopePoint {
    /// Tick position of this point.
    pub position: u32,
    /// Rescaled value at this point.
    pub value: f32,
    /// Linear per-tick delta toward the next point (0 for the last point).
    pub delta: f32,
}

/// An instrument envelope definition (immutable after load).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    points: Vec<EnvelopePoint>,
    sustain: Option<usize>,
    loop_points: Option<(usize, usize)>,
}

impl Envelope {
    /// Build an envelope from raw file points.
    ///
    /// Returns `None` when the envelope is inactive: fewer than two points or
    /// the `ENABLED` flag missing. Sustain/loop markers outside the point
    /// count are dropped rather than rejected, matching tracker behavior.
    pub fn from_raw(
        raw: &[(u16, u16)],
        count: u8,
        sustain: u8,
        loop_start: u8,
        loop_end: u8,
        flags: EnvelopeFlags,
        kind: EnvelopeKind,
    ) -> Option<Envelope> {
        if !flags.contains(EnvelopeFlags::ENABLED) {
            return None;
        }
        let count = (count as usize).min(raw.len()).min(MAX_ENVELOPE_POINTS);
        if count < 2 {
            return None;
        }

        let rescale = |v: u16| -> f32 {
            match kind {
                EnvelopeKind::Volume => v.min(64) as f32 / 64.0,
                EnvelopeKind::Pan => (v.min(64) as f32 - 32.0) / 32.0,
            }
        };

        let mut points: Vec<EnvelopePoint> = raw[..count]
            .iter()
            .map(|&(pos, val)| EnvelopePoint {
                position: pos as u32,
                value: rescale(val),
                delta: 0.0,
            })
            .collect();

        for i in 0..points.len() - 1 {
            let span = points[i + 1].position.saturating_sub(points[i].position);
            points[i].delta = if span > 0 {
                (points[i + 1].value - points[i].value) / span as f32
            } else {
                0.0
            };
        }

        let sustain = flags
            .contains(EnvelopeFlags::SUSTAIN)
            .then_some(sustain as usize)
            .filter(|&s| s < count);
        let loop_points = flags
            .contains(EnvelopeFlags::LOOP)
            .then_some((loop_start as usize, loop_end as usize))
            .filter(|&(s, e)| s <= e && e < count);

        Some(Envelope {
            points,
            sustain,
            loop_points,
        })
    }

    /// Direct construction from pre-scaled `(tick, value)` pairs. Used by the
    /// alternate sample-sourcing path and tests.
    pub fn from_points(pairs: &[(u32, f32)]) -> Option<Envelope> {
        if pairs.len() < 2 || pairs.len() > MAX_ENVELOPE_POINTS {
            return None;
        }
        let mut points: Vec<EnvelopePoint> = pairs
            .iter()
            .map(|&(position, value)| EnvelopePoint {
                position,
                value,
                delta: 0.0,
            })
            .collect();
        for i in 0..points.len() - 1 {
            let span = points[i + 1].position.saturating_sub(points[i].position);
            if span > 0 {
                points[i].delta = (points[i + 1].value - points[i].value) / span as f32;
            }
        }
        Some(Envelope {
            points,
            sustain: None,
            loop_points: None,
        })
    }

    /// The pre-converted points.
    pub fn points(&self) -> &[EnvelopePoint] {
        &self.points
    }

    /// Sustain point index, if sustain is enabled.
    pub fn sustain(&self) -> Option<usize> {
        self.sustain
    }

    /// Loop `(start, end)` point indices, if looping is enabled.
    pub fn loop_points(&self) -> Option<(usize, usize)> {
        self.loop_points
    }
}

/// Runtime cursor over an [`Envelope`], advanced once per sequencer tick.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeState {
    /// Current tick position.
    tick: u32,
    /// Index of the segment the cursor sits in.
    index: usize,
    /// Value emitted by the last advance.
    value: f32,
}

impl EnvelopeState {
    /// A fresh cursor reporting `initial` until its first advance.
    pub fn new(initial: f32) -> Self {
        EnvelopeState {
            tick: 0,
            index: 0,
            value: initial,
        }
    }

    /// Value emitted by the last [`advance`](Self::advance).
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Jump the cursor to an absolute tick (effect `Lxx`, set envelope position).
    pub fn set_position(&mut self, env: &Envelope, tick: u32) {
        self.tick = tick;
        self.index = 0;
        let points = env.points();
        while self.index + 1 < points.len() && points[self.index + 1].position <= tick {
            self.index += 1;
        }
    }

    /// Evaluate the envelope at the current tick, then step one tick forward.
    ///
    /// Past the last point the value freezes. With sustain enabled and no
    /// key-off yet, the cursor holds at the sustain point. With looping
    /// enabled, reaching the loop-end tick rewinds to the loop start.
    pub fn advance(&mut self, env: &Envelope, key_off: bool) -> f32 {
        let points = env.points();
        debug_assert!(points.len() >= 2);

        if let Some((loop_start, loop_end)) = env.loop_points() {
            if self.tick >= points[loop_end].position {
                self.index = loop_start;
                self.tick = points[loop_start].position;
            }
        }

        // Step to the segment containing the current tick.
        while self.index + 1 < points.len() && points[self.index + 1].position <= self.tick {
            self.index += 1;
        }

        let p = points[self.index];
        self.value = if self.index + 1 < points.len() {
            p.value + p.delta * (self.tick - p.position) as f32
        } else {
            // Frozen at the last point.
            p.value
        };

        let held = match env.sustain() {
            Some(s) => !key_off && self.tick >= points[s].position && self.index >= s,
            None => false,
        };
        if !held {
            self.tick += 1;
        }

        self.value
    }
}
