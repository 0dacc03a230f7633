//! Client library for a Nacos-compatible coordination service.
//!
//! Two halves share one HTTP layer: the config side fetches and long-poll
//! watches configuration entries, the naming side registers service
//! instances, keeps them alive with scheduled heartbeats, and resolves
//! service names to concrete endpoints. The crate root re-exports the types
//! needed to use both without digging into the module layout.

pub mod config;
pub mod discovery;
pub mod env;
pub mod http;
pub mod instance;
pub mod naming;
pub mod watch;

pub use config::ConfigClient;
pub use discovery::{
    select, Discovery, DiscoveryConfig, DiscoveryError, HeartbeatScheduler, Random, RoundRobin,
    Selector, TaskHandle,
};
pub use env::ClientEnv;
pub use http::{ApiClient, HttpError};
pub use instance::{Instance, InstanceFilter, InstanceKey, Metadata};
pub use naming::{Cluster, HealthChecker, NamingClient, Service, ServiceList};
pub use watch::{ChangeEvent, DeliveryMode, ListenOptions, Listener};
