//! Background current sampling.
//!
//! Spawns a thread that owns the `SampleFrontEnd` and runs it every sample
//! period. The thread only ever accumulates into the shared windows; the
//! control thread drains them. Read errors are counted and the newest one is
//! kept in a one-slot channel; the last-ok timestamp feeds stall detection.
//!
//! Each `Sampler` spawns exactly one thread, shut down and joined on drop.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use stm_traits::Clock;

use crate::acquisition::SampleFrontEnd;

#[derive(Debug, Default)]
struct Stats {
    samples: AtomicU64,
    errors: AtomicU64,
    last_ok_us: AtomicU64,
}

pub struct Sampler {
    stats: Arc<Stats>,
    errors_rx: xch::Receiver<String>,
    clock: Box<dyn Clock + Send + Sync>,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Sampler {
    pub fn spawn<C: Clock + Clone + Send + Sync + 'static>(
        mut front_end: SampleFrontEnd,
        period_us: u64,
        clock: C,
    ) -> Self {
        let (tx, errors_rx) = xch::bounded::<String>(1);
        let stale_rx = errors_rx.clone();
        let watch_clock: Box<dyn Clock + Send + Sync> = Box::new(clock.clone());
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let stats = Arc::new(Stats::default());
        let stats_clone = stats.clone();
        let period = Duration::from_micros(period_us.max(1));
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("sampler thread received shutdown signal");
                    break;
                }

                match front_end.sample_current() {
                    Ok(_) => {
                        stats_clone.samples.fetch_add(1, Ordering::Relaxed);
                        stats_clone
                            .last_ok_us
                            .store(clock.us_since(epoch), Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats_clone.errors.fetch_add(1, Ordering::Relaxed);
                        // One slot: evict the pending error so the newest one wins.
                        if let Err(xch::TrySendError::Full(msg)) = tx.try_send(format!("{e:#}")) {
                            let _ = stale_rx.try_recv();
                            let _ = tx.try_send(msg);
                        }
                    }
                }

                clock.sleep(period);
            }
            tracing::trace!("sampler thread exiting cleanly");
        });

        Self {
            stats,
            errors_rx,
            clock: watch_clock,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn samples_taken(&self) -> u64 {
        self.stats.samples.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.stats.errors.load(Ordering::Relaxed)
    }

    /// Most recent read error not yet taken, if any.
    pub fn take_error(&self) -> Option<String> {
        self.errors_rx.try_recv().ok()
    }

    /// Microseconds since the last good sample, given `now_us` on this sampler's epoch.
    pub fn stalled_for(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.stats.last_ok_us.load(Ordering::Relaxed))
    }

    /// Stall measured on the sampler's own clock.
    pub fn stalled_for_now(&self) -> u64 {
        self.stalled_for(self.clock.us_since(self.epoch))
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("sampler thread joined"),
                Err(e) => tracing::warn!(?e, "sampler thread panicked during shutdown"),
            }
        }
    }
}
