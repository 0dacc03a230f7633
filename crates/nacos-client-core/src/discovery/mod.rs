//! Discovery facade tying registration, heartbeats, and selection together.
//!
//! [`Discovery`] owns the shared mutable state of the naming side: the
//! instance-to-task table here and the timing wheel inside the scheduler.
//! Both follow the same discipline: a std mutex held for map or wheel
//! arithmetic only, never across an await.

pub mod heartbeat;
pub mod selector;
mod wheel;

pub use heartbeat::{HeartbeatScheduler, TaskHandle};
pub use selector::{select, Random, RoundRobin, Selector};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::http::HttpError;
use crate::instance::{Instance, InstanceFilter, InstanceKey};
use crate::naming::{NamingClient, ServiceList};

/// Fallback interval between heartbeats for a registered instance.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Default timing-wheel resolution.
pub const DEFAULT_WHEEL_TICK: Duration = Duration::from_secs(1);
/// Default timing-wheel slot count; with a one-second tick that is an hour
/// of horizon.
pub const DEFAULT_WHEEL_SLOTS: usize = 3600;
/// Page size used when listing services through the facade, large enough to
/// return every name in one page.
const SERVICE_PAGE_SIZE: u32 = 9999;

/// Failures surfaced by the discovery facade.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The caller passed something unusable, like an instance without a
    /// service name or an empty candidate list.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A lookup matched no instance.
    #[error("no instance available for service {service:?}")]
    NotFound {
        /// Service name the lookup was for.
        service: String,
    },
    /// The underlying registry call failed.
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Tunables for the facade and its heartbeat scheduler.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Interval between heartbeats for a newly registered instance.
    pub heartbeat_interval: Duration,
    /// Whether `clientBeatInterval` hints in beat acknowledgements retime
    /// the instance's heartbeat task.
    pub honor_server_interval: bool,
    /// Timing-wheel resolution; beats cannot fire more often than this.
    pub wheel_tick: Duration,
    /// Timing-wheel slot count, bounding the horizon together with the tick.
    pub wheel_slots: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            honor_server_interval: true,
            wheel_tick: DEFAULT_WHEEL_TICK,
            wheel_slots: DEFAULT_WHEEL_SLOTS,
        }
    }
}

impl DiscoveryConfig {
    /// Replaces zero values, which would stall or spin the wheel, with the
    /// defaults.
    pub(crate) fn sanitise(mut self) -> Self {
        if self.heartbeat_interval.is_zero() {
            warn!(
                clamped = ?DEFAULT_HEARTBEAT_INTERVAL,
                "heartbeat interval of zero, clamping"
            );
            self.heartbeat_interval = DEFAULT_HEARTBEAT_INTERVAL;
        }
        if self.wheel_tick.is_zero() {
            warn!(clamped = ?DEFAULT_WHEEL_TICK, "wheel tick of zero, clamping");
            self.wheel_tick = DEFAULT_WHEEL_TICK;
        }
        if self.wheel_slots == 0 {
            warn!(clamped = DEFAULT_WHEEL_SLOTS, "wheel without slots, clamping");
            self.wheel_slots = DEFAULT_WHEEL_SLOTS;
        }
        self
    }
}

/// High-level service discovery client.
///
/// Registration keeps the instance alive through the heartbeat scheduler
/// until it is deregistered or the facade is shut down; lookups resolve a
/// service name to concrete instances, optionally picking one through the
/// configured [`Selector`].
pub struct Discovery {
    naming: NamingClient,
    scheduler: HeartbeatScheduler,
    selector: Box<dyn Selector>,
    config: DiscoveryConfig,
    /// Heartbeat handle per registered instance identity.
    tasks: Mutex<HashMap<InstanceKey, TaskHandle>>,
}

impl Discovery {
    /// Builds a facade with the [`Random`] selection strategy.
    pub fn new(naming: NamingClient, config: DiscoveryConfig) -> Self {
        Self::with_selector(naming, config, Box::new(Random::new()))
    }

    /// Builds a facade with a caller-provided selection strategy.
    pub fn with_selector(
        naming: NamingClient,
        config: DiscoveryConfig,
        selector: Box<dyn Selector>,
    ) -> Self {
        let config = config.sanitise();
        let scheduler = HeartbeatScheduler::new(naming.clone(), &config);
        Self {
            naming,
            scheduler,
            selector,
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Direct access to the underlying naming API, for operations the facade
    /// does not wrap.
    pub fn naming(&self) -> &NamingClient {
        &self.naming
    }

    /// Registers `instance` and starts heartbeating it.
    ///
    /// Registering the same identity again replaces its heartbeat task with
    /// a fresh one carrying the new payload, never a duplicate.
    pub async fn register(&self, instance: Instance) -> Result<(), DiscoveryError> {
        if let Err(reason) = instance.check_identity() {
            return Err(DiscoveryError::InvalidArgument(reason));
        }
        self.naming.register_instance(&instance).await?;

        let key = instance.key();
        let instance = Arc::new(instance);
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        if let Some(previous) = tasks.remove(&key) {
            self.scheduler.cancel(previous);
            debug!(key = %key, "replacing heartbeat task of re-registered instance");
        }
        let handle = self
            .scheduler
            .schedule(instance, self.config.heartbeat_interval);
        tasks.insert(key, handle);
        Ok(())
    }

    /// Deregisters `instance`.
    ///
    /// The heartbeat task is cancelled before the registry call goes out, so
    /// a deregistered instance is never beaten again even when the registry
    /// rejects the call.
    pub async fn deregister(&self, instance: &Instance) -> Result<(), DiscoveryError> {
        if let Err(reason) = instance.check_identity() {
            return Err(DiscoveryError::InvalidArgument(reason));
        }
        let removed = self
            .tasks
            .lock()
            .expect("lock poisoned")
            .remove(&instance.key());
        if let Some(handle) = removed {
            self.scheduler.cancel(handle);
        }
        self.naming.deregister_instance(instance).await?;
        Ok(())
    }

    /// Pushes updated fields of a registered instance to the registry.
    ///
    /// The heartbeat keeps sending the payload captured at registration;
    /// re-register to refresh it.
    pub async fn update(&self, instance: &Instance) -> Result<(), DiscoveryError> {
        if let Err(reason) = instance.check_identity() {
            return Err(DiscoveryError::InvalidArgument(reason));
        }
        self.naming.update_instance(instance).await?;
        Ok(())
    }

    /// Returns the instances of `service_name` matching `filter`.
    pub async fn query_instances(
        &self,
        service_name: &str,
        filter: &InstanceFilter,
    ) -> Result<Vec<Instance>, DiscoveryError> {
        Ok(self.naming.query_instances(service_name, filter).await?)
    }

    /// Resolves `service_name` to one healthy instance using the configured
    /// selection strategy.
    ///
    /// The filter's `healthy_only` flag is forced on; an empty result set is
    /// a [`DiscoveryError::NotFound`].
    pub async fn select_instance(
        &self,
        service_name: &str,
        filter: &InstanceFilter,
    ) -> Result<Instance, DiscoveryError> {
        let mut filter = filter.clone();
        filter.healthy_only = true;
        let instances = self.naming.query_instances(service_name, &filter).await?;
        if instances.is_empty() {
            return Err(DiscoveryError::NotFound {
                service: service_name.to_string(),
            });
        }
        let picked = select(self.selector.as_ref(), &instances)?;
        Ok(picked.clone())
    }

    /// Lists every service name in `group_name`/`namespace`.
    pub async fn query_services(
        &self,
        group_name: &str,
        namespace: &str,
    ) -> Result<ServiceList, DiscoveryError> {
        Ok(self
            .naming
            .list_services(1, SERVICE_PAGE_SIZE, group_name, namespace)
            .await?)
    }

    /// Number of instances currently kept alive by this facade.
    pub fn heartbeat_task_count(&self) -> usize {
        self.scheduler.task_count()
    }

    /// Stops the heartbeat driver and waits for it to exit.
    ///
    /// Instances are left registered; without beats, ephemeral entries expire
    /// on the registry side.
    pub async fn shutdown(self) {
        let Self { scheduler, .. } = self;
        scheduler.shutdown().await;
    }
}
