use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Frame and observation counters, reset on every read.
#[derive(Default)]
pub struct Meter {
    raw_frames: AtomicU64,
    analyzed_frames: AtomicU64,
    logged_observations: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            raw_frames: AtomicU64::new(0),
            analyzed_frames: AtomicU64::new(0),
            logged_observations: AtomicU64::new(0),
        }
    }

    pub fn tick_raw(&self) {
        self.raw_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_analyzed(&self) {
        self.analyzed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_logged(&self) {
        self.logged_observations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_raw(&self) -> u64 {
        self.raw_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_analyzed(&self) -> u64 {
        self.analyzed_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_logged(&self) -> u64 {
        self.logged_observations.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let raw_frames = METER.get_reset_raw();
            let analyzed_frames = METER.get_reset_analyzed();
            let logged = METER.get_reset_logged();
            let elapsed = start.elapsed().as_secs_f32();

            if raw_frames > 0 {
                log::info!("Raw frames per second: {:.2}", raw_frames as f32 / elapsed);
            }
            if analyzed_frames > 0 {
                log::info!(
                    "Analyzed frames per second: {:.2}",
                    analyzed_frames as f32 / elapsed
                );
            }
            if logged > 0 {
                log::info!("Logged {logged} observations");
            }
        }
    })
}
