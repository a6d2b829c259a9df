//! XM binary parsing
//!
//! Fixed-layout, little-endian decode of the XM wire format: the 336-byte
//! module header, 9-byte pattern sub-headers with a packed cell stream,
//! 29-byte instrument headers with a 214-byte extension, 40-byte sample
//! headers and delta-coded PCM.
//!
//! Unlike the historical players this parser bound-checks every file-derived
//! count before allocating; malformed counts are rejected with
//! [`XmError::Format`] instead of being trusted.

use crate::module::envelope::{Envelope, EnvelopeFlags, EnvelopeKind, MAX_ENVELOPE_POINTS};
use crate::module::instrument::{AutoVibrato, Instrument, LoopMode, Sample, MAX_SAMPLES, NOTE_RANGE};
use crate::module::{
    Module, ModuleFlags, Pattern, PatternCell, MAX_CHANNELS, MAX_INSTRUMENTS, MAX_ORDERS,
    MAX_PATTERNS, MAX_ROWS, NOTE_KEY_OFF,
};
use crate::source::{read_padded_string, ByteSource, ReadLe};
use crate::{Result, XmError};
use std::io::SeekFrom;

/// 17-byte file magic.
pub const XM_MAGIC: &[u8; 17] = b"Extended Module: ";
/// Only format revision 1.04 is produced by FastTracker 2 and its clones.
pub const XM_VERSION: u16 = 0x0104;

/// Highest effect id the sequencer interprets.
const MAX_EFFECT_ID: u8 = 33;

/// Alternate PCM sourcing: fills the pre-sized buffer for
/// `(instrument_index, sample_index)` instead of reading the file's
/// delta-coded data.
pub type SampleLoadFn<'a> = dyn FnMut(usize, usize, &mut [i16]) -> Result<()> + 'a;

fn format_err(msg: impl Into<String>) -> XmError {
    XmError::Format(msg.into())
}

impl Module {
    /// Parse a module from a byte source, decoding PCM from the file itself.
    pub fn load<S: ByteSource>(source: &mut S) -> Result<Module> {
        Self::load_with_samples(source, None)
    }

    /// Parse a module, optionally sourcing PCM through `sample_loader`.
    ///
    /// When a loader is supplied the file's sample data bytes are skipped and
    /// the callback fills each sample buffer instead (the buffer length is the
    /// sample's frame count; the guard element is patched afterwards).
    pub fn load_with_samples<S: ByteSource>(
        source: &mut S,
        mut sample_loader: Option<&mut SampleLoadFn<'_>>,
    ) -> Result<Module> {
        let mut magic = [0u8; 17];
        source.read_exact_bytes(&mut magic)?;
        if &magic != XM_MAGIC {
            return Err(format_err("not an XM module (bad magic)"));
        }

        let name = read_padded_string(source, 20)?;
        source.skip(1)?; // 0x1A marker
        source.skip(20)?; // tracker name

        let version = source.read_u16_le()?;
        if version != XM_VERSION {
            return Err(XmError::UnsupportedVersion(version));
        }

        // header_size is measured from its own offset (60).
        let header_start = source.tell()?;
        let header_size = source.read_u32_le()? as u64;

        let song_length = source.read_u16_le()? as usize;
        let restart_position = source.read_u16_le()? as usize;
        let num_channels = source.read_u16_le()? as usize;
        let num_patterns = source.read_u16_le()? as usize;
        let num_instruments = source.read_u16_le()? as usize;
        let flags = ModuleFlags::from_bits_truncate(source.read_u16_le()?);
        let default_speed = source.read_u16_le()? as u32;
        let default_bpm = source.read_u16_le()? as u32;

        if song_length == 0 || song_length > MAX_ORDERS {
            return Err(format_err(format!("bad song length {song_length}")));
        }
        if num_channels == 0 || num_channels > MAX_CHANNELS {
            return Err(format_err(format!("bad channel count {num_channels}")));
        }
        if num_patterns > MAX_PATTERNS {
            return Err(format_err(format!("bad pattern count {num_patterns}")));
        }
        if num_instruments > MAX_INSTRUMENTS {
            return Err(format_err(format!(
                "bad instrument count {num_instruments}"
            )));
        }

        let mut order_table = vec![0u8; MAX_ORDERS];
        source.read_exact_bytes(&mut order_table)?;
        order_table.truncate(song_length);

        source.seek(SeekFrom::Start(header_start + header_size))?;

        let mut patterns = Vec::with_capacity(num_patterns);
        for index in 0..num_patterns {
            let pattern = read_pattern(source, num_channels)
                .map_err(|e| format_err(format!("pattern {index}: {e}")))?;
            patterns.push(pattern);
        }

        let mut instruments = Vec::with_capacity(num_instruments);
        for index in 0..num_instruments {
            let instrument = read_instrument(source, index, sample_loader.as_deref_mut())
                .map_err(|e| format_err(format!("instrument {index}: {e}")))?;
            instruments.push(instrument);
        }

        Ok(Module {
            name,
            song_length,
            // A restart past the song end restarts from the top.
            restart_position: if restart_position < song_length {
                restart_position
            } else {
                0
            },
            num_channels,
            flags,
            default_speed: default_speed.max(1),
            default_bpm: default_bpm.max(1),
            order_table,
            patterns,
            instruments,
        })
    }
}

fn read_pattern<S: ByteSource>(source: &mut S, num_channels: usize) -> Result<Pattern> {
    // 9-byte sub-header; its length field includes itself.
    let header_start = source.tell()?;
    let header_length = source.read_u32_le()? as u64;
    let _packing_type = source.read_u8()?;
    let num_rows = source.read_u16_le()? as usize;
    let packed_size = source.read_u16_le()? as usize;

    if num_rows == 0 || num_rows > MAX_ROWS {
        return Err(format_err(format!("bad row count {num_rows}")));
    }

    source.seek(SeekFrom::Start(header_start + header_length))?;

    let mut pattern = Pattern::empty(num_rows, num_channels);
    if packed_size > 0 {
        let data_start = source.tell()?;
        for row in 0..num_rows {
            for channel in 0..num_channels {
                *pattern.cell_mut(row, channel) = read_cell(source)?;
            }
        }
        source.seek(SeekFrom::Start(data_start + packed_size as u64))?;
    }

    Ok(pattern)
}

/// Decode one cell of the compressed stream.
///
/// A lead byte with the high bit set is a sparse cell: its low five bits
/// select which of {note, instrument, volume, effect, param} follow. Without
/// the high bit the lead byte is the note, followed by the four raw bytes.
pub(crate) fn read_cell<S: ByteSource>(source: &mut S) -> Result<PatternCell> {
    let lead = source.read_u8()?;
    let mut cell = PatternCell::default();

    if lead & 0x80 != 0 {
        if lead & 0x01 != 0 {
            cell.note = source.read_u8()?;
        }
        if lead & 0x02 != 0 {
            cell.instrument = source.read_u8()?;
        }
        if lead & 0x04 != 0 {
            cell.volume = source.read_u8()?;
        }
        if lead & 0x08 != 0 {
            cell.effect = source.read_u8()?;
        }
        if lead & 0x10 != 0 {
            cell.param = source.read_u8()?;
        }
    } else {
        cell.note = lead;
        cell.instrument = source.read_u8()?;
        cell.volume = source.read_u8()?;
        cell.effect = source.read_u8()?;
        cell.param = source.read_u8()?;
    }

    // Field sanitation per classic tracker rules.
    if cell.note > NOTE_KEY_OFF {
        cell.note = 0;
    }
    if cell.instrument > MAX_INSTRUMENTS as u8 {
        cell.instrument = 0; // keep previous
    }
    if cell.effect > MAX_EFFECT_ID {
        cell.effect = 0;
        cell.param = 0;
    }

    Ok(cell)
}

struct SampleHeader {
    sample: Sample,
    byte_length: u32,
}

fn read_instrument<S: ByteSource>(
    source: &mut S,
    instrument_index: usize,
    mut sample_loader: Option<&mut SampleLoadFn<'_>>,
) -> Result<Instrument> {
    // 29-byte base header; header_size is measured from its own offset.
    let header_start = source.tell()?;
    let header_size = source.read_u32_le()? as u64;
    if header_size < 29 {
        source.seek(SeekFrom::Start(header_start + header_size.max(4)))?;
        return Ok(Instrument::default());
    }

    let name = read_padded_string(source, 22)?;
    let _instrument_type = source.read_u8()?;
    let num_samples = source.read_u16_le()? as usize;
    if num_samples > MAX_SAMPLES {
        return Err(format_err(format!("bad sample count {num_samples}")));
    }

    let mut instrument = Instrument {
        name,
        ..Default::default()
    };

    if num_samples == 0 {
        source.seek(SeekFrom::Start(header_start + header_size))?;
        return Ok(instrument);
    }

    // 214-byte extended header.
    let _sample_header_size = source.read_u32_le()?;
    let mut note_map = [0u8; NOTE_RANGE];
    source.read_exact_bytes(&mut note_map)?;
    instrument.note_to_sample = note_map;

    let mut vol_points = [(0u16, 0u16); MAX_ENVELOPE_POINTS];
    for point in &mut vol_points {
        point.0 = source.read_u16_le()?;
        point.1 = source.read_u16_le()?;
    }
    let mut pan_points = [(0u16, 0u16); MAX_ENVELOPE_POINTS];
    for point in &mut pan_points {
        point.0 = source.read_u16_le()?;
        point.1 = source.read_u16_le()?;
    }

    let num_vol_points = source.read_u8()?;
    let num_pan_points = source.read_u8()?;
    let vol_sustain = source.read_u8()?;
    let vol_loop_start = source.read_u8()?;
    let vol_loop_end = source.read_u8()?;
    let pan_sustain = source.read_u8()?;
    let pan_loop_start = source.read_u8()?;
    let pan_loop_end = source.read_u8()?;
    let vol_type = EnvelopeFlags::from_bits_truncate(source.read_u8()?);
    let pan_type = EnvelopeFlags::from_bits_truncate(source.read_u8()?);

    instrument.vibrato = AutoVibrato {
        waveform: source.read_u8()?,
        sweep: source.read_u8()?,
        depth: source.read_u8()?,
        rate: source.read_u8()?,
    };
    instrument.fadeout = source.read_u16_le()?;

    instrument.volume_envelope = Envelope::from_raw(
        &vol_points,
        num_vol_points,
        vol_sustain,
        vol_loop_start,
        vol_loop_end,
        vol_type,
        EnvelopeKind::Volume,
    );
    instrument.pan_envelope = Envelope::from_raw(
        &pan_points,
        num_pan_points,
        pan_sustain,
        pan_loop_start,
        pan_loop_end,
        pan_type,
        EnvelopeKind::Pan,
    );

    // Skip reserved bytes / vendor extensions up to the declared header size.
    source.seek(SeekFrom::Start(header_start + header_size))?;

    // All sample headers precede all sample data.
    let mut headers = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        headers.push(read_sample_header(source)?);
    }

    for (sample_index, header) in headers.into_iter().enumerate() {
        let SampleHeader {
            mut sample,
            byte_length,
        } = header;
        let frames = sample.length as usize;
        match sample_loader.as_deref_mut() {
            Some(loader) => {
                source.skip(byte_length as i64)?;
                let mut data = vec![0i16; frames + 1];
                loader(instrument_index, sample_index, &mut data[..frames])?;
                sample.data = data;
            }
            None => {
                // Checked before allocating: a malformed length field must
                // not demand a multi-gigabyte buffer.
                let here = source.tell()?;
                let end = source.seek(SeekFrom::End(0))?;
                source.seek(SeekFrom::Start(here))?;
                if byte_length as u64 > end.saturating_sub(here) {
                    return Err(format_err(format!(
                        "sample data length {byte_length} exceeds remaining file size"
                    )));
                }
                let mut raw = vec![0u8; byte_length as usize];
                source.read_exact_bytes(&mut raw)?;
                sample.data = if sample.sixteen_bit {
                    delta_decode_16(&raw)
                } else {
                    delta_decode_8(&raw)
                };
            }
        }
        sample.patch_guard();
        instrument.samples.push(sample);
    }

    Ok(instrument)
}

fn read_sample_header<S: ByteSource>(source: &mut S) -> Result<SampleHeader> {
    // 40-byte sample header; length fields are in bytes.
    let byte_length = source.read_u32_le()?;
    let loop_start = source.read_u32_le()?;
    let loop_length = source.read_u32_le()?;
    let default_volume = source.read_u8()?.min(64);
    let finetune = source.read_i8()?;
    let type_byte = source.read_u8()?;
    let default_pan = source.read_u8()?;
    let relative_note = source.read_i8()?;
    let _reserved = source.read_u8()?;
    let name = read_padded_string(source, 22)?;

    let sixteen_bit = type_byte & 0x10 != 0;
    let shift = if sixteen_bit { 1 } else { 0 };
    let length = byte_length >> shift;
    let loop_start = loop_start >> shift;
    let loop_length = loop_length >> shift;

    let mut loop_mode = LoopMode::from_type_byte(type_byte);
    if loop_length == 0 {
        loop_mode = LoopMode::Off;
    }

    // A loop escaping the sample data would let the mixer read wild memory;
    // degrade it to a one-shot sample instead of rejecting the file.
    if loop_mode != LoopMode::Off && loop_start.saturating_add(loop_length) > length {
        loop_mode = LoopMode::Off;
    }

    Ok(SampleHeader {
        sample: Sample {
            name,
            length,
            loop_start,
            loop_length,
            loop_mode,
            default_volume,
            default_pan,
            finetune,
            relative_note,
            sixteen_bit,
            data: Vec::new(),
        },
        byte_length,
    })
}

/// Running-sum decode of 8-bit deltas, pre-widened to 16-bit range.
/// The output carries one zeroed guard element past the end.
pub(crate) fn delta_decode_8(raw: &[u8]) -> Vec<i16> {
    let mut data = Vec::with_capacity(raw.len() + 1);
    let mut acc: i8 = 0;
    for &delta in raw {
        acc = acc.wrapping_add(delta as i8);
        data.push(acc as i16 * 256);
    }
    data.push(0);
    data
}

/// Running-sum decode of 16-bit little-endian deltas.
/// The output carries one zeroed guard element past the end.
pub(crate) fn delta_decode_16(raw: &[u8]) -> Vec<i16> {
    let mut data = Vec::with_capacity(raw.len() / 2 + 1);
    let mut acc: i16 = 0;
    for pair in raw.chunks_exact(2) {
        acc = acc.wrapping_add(i16::from_le_bytes([pair[0], pair[1]]));
        data.push(acc);
    }
    data.push(0);
    data
}
