//! Offline rendering to WAV
//!
//! Renders a module through the same mixer the real-time path uses, but
//! pulled synchronously: blocks are filled until the sequencer wraps past
//! the end of the song (or a configured duration cap), then written out as
//! interleaved stereo 16-bit WAV via `hound`.

use crate::mixer::Mixer;
use crate::module::Module;
use crate::player::PlayerState;
use crate::{Result, XmError};
use std::path::Path;

/// Frames rendered per fill during export.
const EXPORT_BLOCK_FRAMES: usize = 4096;

/// Offline render settings.
#[derive(Debug, Clone, Copy)]
pub struct ExportConfig {
    /// Render sample rate in Hz.
    pub sample_rate: u32,
    /// Hard cap on the rendered duration, for songs that never wrap.
    pub max_seconds: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            sample_rate: 44_100,
            max_seconds: 600,
        }
    }
}

/// Render the whole song to interleaved stereo `i16`.
///
/// Rendering stops at the first wrap past the last order (one full play of
/// the song) or at the configured duration cap, whichever comes first.
pub fn render_song(module: Module, config: &ExportConfig) -> Vec<i16> {
    let mut player = PlayerState::new(module);
    let mut mixer = Mixer::new(config.sample_rate);

    let cap_frames = config.sample_rate as u64 * config.max_seconds as u64;
    let mut rendered: Vec<i16> = Vec::new();
    let mut block = vec![0i16; EXPORT_BLOCK_FRAMES * 2];

    while !player.song_wrapped() && (rendered.len() / 2) < cap_frames as usize {
        mixer.fill(&mut player, &mut block);
        rendered.extend_from_slice(&block);
    }

    rendered
}

/// Render a module and write it to a WAV file.
pub fn export_to_wav<P: AsRef<Path>>(
    module: Module,
    output_path: P,
    config: ExportConfig,
) -> Result<()> {
    let samples = render_song(module, &config);
    write_wav_file(output_path.as_ref(), &samples, config.sample_rate)
}

/// Write interleaved stereo samples as a 16-bit PCM WAV file.
fn write_wav_file(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| XmError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("WAV create failed: {e}"))))?;

    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| XmError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("WAV write failed: {e}"))))?;
    }

    writer
        .finalize()
        .map_err(|e| XmError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("WAV finalize failed: {e}"))))?;

    Ok(())
}
