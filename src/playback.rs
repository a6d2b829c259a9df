//! Playback session
//!
//! [`Playback`] ties the pieces together: it spawns a render thread that
//! keeps a [`PlaybackDriver`] a whole buffer ahead by pulling blocks out of
//! the mixer, and publishes the playing position through a packed atomic so
//! the control thread can query order/row/time without locks.

use crate::driver::{DriverConfig, PlaybackDriver};
use crate::mixer::{FillInfo, Mixer};
use crate::module::{Module, Position};
use crate::player::PlayerState;
use crate::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Render-thread poll interval while the driver is caught up.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Pack a fill report into one atomic word:
/// bits 63..32 rendered samples, 15..8 order, 7..0 row.
fn pack_snapshot(info: FillInfo) -> u64 {
    (info.total_samples as u32 as u64) << 32
        | ((info.position.order as u64 & 0xFF) << 8)
        | (info.position.row as u64 & 0xFF)
}

fn unpack_snapshot(word: u64) -> (u64, Position) {
    let samples = word >> 32;
    let position = Position {
        order: ((word >> 8) & 0xFF) as usize,
        row: (word & 0xFF) as usize,
    };
    (samples, position)
}

/// A running playback session. Dropping the handle stops it.
pub struct Playback {
    thread: Option<JoinHandle<()>>,
    exit: Arc<AtomicBool>,
    snapshot: Arc<AtomicU64>,
    sample_rate: u32,
}

impl Playback {
    /// Start playing `module` through `driver`.
    ///
    /// The device is opened before the thread spawns, so a device failure
    /// surfaces here and nothing is left running.
    pub fn start<D>(module: Module, config: DriverConfig, mut driver: D) -> Result<Playback>
    where
        D: PlaybackDriver + 'static,
    {
        config.validate()?;
        driver.start(&config)?;

        let exit = Arc::new(AtomicBool::new(false));
        let snapshot = Arc::new(AtomicU64::new(0));
        let thread = {
            let exit = Arc::clone(&exit);
            let snapshot = Arc::clone(&snapshot);
            thread::spawn(move || render_loop(module, config, driver, &exit, &snapshot))
        };

        Ok(Playback {
            thread: Some(thread),
            exit,
            snapshot,
            sample_rate: config.sample_rate,
        })
    }

    /// The `(order, row)` most recently rendered.
    pub fn position(&self) -> Position {
        unpack_snapshot(self.snapshot.load(Ordering::Acquire)).1
    }

    /// Milliseconds of audio rendered since the session started.
    pub fn time_ms(&self) -> u64 {
        let (samples, _) = unpack_snapshot(self.snapshot.load(Ordering::Acquire));
        samples * 1000 / self.sample_rate as u64
    }

    /// Stop rendering and release the driver. Blocks until the render
    /// thread exits, which is bounded by one block plus the poll interval.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.exit.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keep the driver `total_blocks` ahead, sleeping when caught up. A block
/// in progress always completes before the exit flag is honored.
fn render_loop<D: PlaybackDriver>(
    module: Module,
    config: DriverConfig,
    mut driver: D,
    exit: &AtomicBool,
    snapshot: &AtomicU64,
) {
    let mut player = PlayerState::new(module);
    let mut mixer = Mixer::new(config.sample_rate);
    let mut block = vec![0i16; config.block_size() * 2];
    let total_blocks = config.total_blocks() as u64;
    let mut rendered: u64 = 0;

    while !exit.load(Ordering::Acquire) {
        let played = driver.blocks_played();
        if rendered < played + total_blocks {
            let info = mixer.fill(&mut player, &mut block);
            if driver.write_block(&block).is_err() {
                break;
            }
            rendered += 1;
            snapshot.store(pack_snapshot(info), Ordering::Release);
        } else {
            thread::sleep(POLL_INTERVAL);
        }
    }

    driver.stop();
}
