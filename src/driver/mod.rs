//! Output driver abstraction
//!
//! A [`PlaybackDriver`] consumes fixed-size rendered blocks and reports how
//! many it has played so far; the render thread in [`crate::playback`] uses
//! that counter to stay a whole buffer ahead of the device. The bundled
//! rodio implementation lives in [`audio_device`] behind the `streaming`
//! feature; embedders with their own audio plumbing implement the trait
//! directly.

#[cfg(feature = "streaming")]
pub mod audio_device;

#[cfg(feature = "streaming")]
pub use audio_device::RodioDriver;

use crate::Result;

/// Buffering geometry for a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Mix and output rate in Hz.
    pub sample_rate: u32,
    /// Total buffered audio in milliseconds.
    pub buffer_ms: u32,
    /// Duration of one block in milliseconds; also the position granularity.
    pub latency_ms: u32,
}

impl DriverConfig {
    /// Frames per block: `rate × latency / 1000`, rounded up to a multiple
    /// of four so SIMD-friendly copies stay aligned.
    pub fn block_size(&self) -> usize {
        let raw = (self.sample_rate as usize * self.latency_ms as usize) / 1000;
        (raw + 3) & !3
    }

    /// Number of blocks kept in flight: double the buffer/latency ratio.
    pub fn total_blocks(&self) -> usize {
        2 * (self.buffer_ms / self.latency_ms) as usize
    }

    /// Reject geometries the block math cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(crate::XmError::Config("sample rate must be non-zero".into()));
        }
        if self.latency_ms == 0 {
            return Err(crate::XmError::Config("latency must be non-zero".into()));
        }
        if self.buffer_ms < self.latency_ms {
            return Err(crate::XmError::Config(
                "buffer must hold at least one latency interval".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            sample_rate: 44_100,
            buffer_ms: 1000,
            latency_ms: 20,
        }
    }
}

/// Sink for rendered blocks.
///
/// `blocks_played` must be monotonic; the render thread computes the number
/// of owed blocks as `played + total_blocks − rendered` and sleeps when the
/// difference reaches zero.
pub trait PlaybackDriver: Send {
    /// Open the output and begin consuming queued blocks. Called once; a
    /// device failure here aborts playback, there is no retry.
    fn start(&mut self, config: &DriverConfig) -> Result<()>;

    /// Queue one rendered block of interleaved stereo `i16`
    /// (`2 × block_size` values).
    fn write_block(&mut self, block: &[i16]) -> Result<()>;

    /// Monotonic count of blocks the output has consumed.
    fn blocks_played(&self) -> u64;

    /// Stop consuming and release the output.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_rounds_up_to_four() {
        let config = DriverConfig {
            sample_rate: 44_100,
            buffer_ms: 1000,
            latency_ms: 20,
        };
        // 44100 × 20 / 1000 = 882 → 884.
        assert_eq!(config.block_size(), 884);

        let exact = DriverConfig {
            sample_rate: 48_000,
            buffer_ms: 1000,
            latency_ms: 20,
        };
        // 960 is already a multiple of four.
        assert_eq!(exact.block_size(), 960);
    }

    #[test]
    fn test_total_blocks_doubles_ratio() {
        let config = DriverConfig::default();
        assert_eq!(config.total_blocks(), 100);

        let tight = DriverConfig {
            buffer_ms: 120,
            latency_ms: 40,
            ..DriverConfig::default()
        };
        assert_eq!(tight.total_blocks(), 6);
    }

    #[test]
    fn test_validate_rejects_degenerate_geometry() {
        let zero_latency = DriverConfig {
            latency_ms: 0,
            ..DriverConfig::default()
        };
        assert!(zero_latency.validate().is_err());

        let zero_rate = DriverConfig {
            sample_rate: 0,
            ..DriverConfig::default()
        };
        assert!(zero_rate.validate().is_err());

        let undersized = DriverConfig {
            buffer_ms: 10,
            latency_ms: 20,
            ..DriverConfig::default()
        };
        assert!(undersized.validate().is_err());

        assert!(DriverConfig::default().validate().is_ok());
    }
}
