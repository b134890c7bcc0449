//! Shared service state handed to every server and connection task.

use std::sync::Arc;

use shotclock_core::SessionRegistry;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::driver::{DriverSettings, DriverSupervisor};
use crate::hub::ChannelHub;

pub struct ServiceState {
    pub config: DaemonConfig,
    pub registry: Arc<SessionRegistry>,
    pub hub: ChannelHub,
    pub drivers: DriverSupervisor,
    /// Root shutdown token; long-lived streams end when it fires.
    pub cancel: CancellationToken,
}

pub type SharedState = Arc<ServiceState>;

impl ServiceState {
    /// Build an isolated instance: its own registry, hub and driver flags.
    /// Drivers stop when `cancel` fires.
    pub fn new(config: DaemonConfig, cancel: CancellationToken) -> SharedState {
        let registry = Arc::new(SessionRegistry::new(config.default_length_ms));
        let hub = ChannelHub::new();
        let drivers = DriverSupervisor::new(
            Arc::clone(&registry),
            hub.clone(),
            DriverSettings {
                session_period: config.tick_period(),
                aggregate_period: config.aggregate_period(),
                idle_policy: config.idle_policy,
            },
            cancel.clone(),
        );
        Arc::new(Self {
            config,
            registry,
            hub,
            drivers,
            cancel,
        })
    }
}
