//! Heartbeat scheduling: one timing wheel, one driver task, many instances.
//!
//! The driver advances the wheel once per tick and spawns a short-lived task
//! per due beat, so a slow or failing registry call never delays the wheel or
//! the other beats. Beats keep firing on schedule regardless of how many of
//! them fail; registration is only dropped by an explicit cancel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

pub use super::wheel::TaskHandle;
use super::wheel::TimingWheel;
use super::DiscoveryConfig;
use crate::instance::Instance;
use crate::naming::NamingClient;

/// State shared between the scheduler handle, the driver, and beat tasks.
struct SchedulerShared {
    naming: NamingClient,
    /// Guarded wheel; held only for arithmetic, never across an await.
    wheel: Mutex<TimingWheel<Arc<Instance>>>,
    /// Whether `clientBeatInterval` hints from the server retime tasks.
    honor_server_interval: bool,
}

/// Drives periodic heartbeats for every scheduled instance.
pub struct HeartbeatScheduler {
    shared: Arc<SchedulerShared>,
    /// Cancels the driver when the scheduler is dropped without `shutdown`.
    guard: DropGuard,
    driver: JoinHandle<()>,
}

impl HeartbeatScheduler {
    pub(crate) fn new(naming: NamingClient, config: &DiscoveryConfig) -> Self {
        let shared = Arc::new(SchedulerShared {
            naming,
            wheel: Mutex::new(TimingWheel::new(config.wheel_tick, config.wheel_slots)),
            honor_server_interval: config.honor_server_interval,
        });
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(run_driver(
            Arc::clone(&shared),
            config.wheel_tick,
            cancel.clone(),
        ));
        Self {
            shared,
            guard: cancel.drop_guard(),
            driver,
        }
    }

    /// Schedules recurring beats for `instance`, first firing one `interval`
    /// from now.
    pub fn schedule(&self, instance: Arc<Instance>, interval: Duration) -> TaskHandle {
        let handle = self
            .shared
            .wheel
            .lock()
            .expect("lock poisoned")
            .insert(Arc::clone(&instance), interval);
        debug!(key = %instance.key(), ?interval, "heartbeat task scheduled");
        handle
    }

    /// Cancels a heartbeat task.
    ///
    /// Returns `false` when the handle is unknown or already cancelled; the
    /// call is a no-op in that case.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let removed = self
            .shared
            .wheel
            .lock()
            .expect("lock poisoned")
            .cancel(handle);
        if removed {
            debug!("heartbeat task cancelled");
        }
        removed
    }

    /// Number of heartbeat tasks currently scheduled.
    pub fn task_count(&self) -> usize {
        self.shared.wheel.lock().expect("lock poisoned").len()
    }

    /// Stops the driver and waits for it to exit.
    ///
    /// In-flight beat tasks are left to finish on their own; no new beats
    /// fire after this returns.
    pub(crate) async fn shutdown(self) {
        let Self { guard, driver, .. } = self;
        drop(guard);
        if let Err(error) = driver.await {
            warn!(%error, "heartbeat driver panicked");
        }
    }
}

/// Advances the wheel once per tick until cancelled.
async fn run_driver(shared: Arc<SchedulerShared>, tick: Duration, cancel: CancellationToken) {
    // First tick lands one full tick from now so freshly scheduled tasks
    // cannot fire early; missed ticks are skipped rather than bursted.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(?tick, "heartbeat driver started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let due = shared.wheel.lock().expect("lock poisoned").advance();
                for (handle, instance) in due {
                    tokio::spawn(send_beat(Arc::clone(&shared), handle, instance));
                }
            }
            () = cancel.cancelled() => {
                break;
            }
        }
    }
    info!("heartbeat driver stopped");
}

/// Sends a single beat and applies the server's interval hint, if any.
async fn send_beat(shared: Arc<SchedulerShared>, handle: TaskHandle, instance: Arc<Instance>) {
    match shared.naming.heartbeat(&instance).await {
        Ok(hint) => {
            if shared.honor_server_interval && hint > Duration::ZERO {
                let retimed = shared
                    .wheel
                    .lock()
                    .expect("lock poisoned")
                    .set_interval(handle, hint);
                if retimed {
                    debug!(key = %instance.key(), ?hint, "adopted server beat interval");
                }
            }
        }
        Err(error) => {
            // The task stays armed; the next beat goes out on schedule.
            warn!(key = %instance.key(), %error, "heartbeat failed");
        }
    }
}
