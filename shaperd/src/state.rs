//! Shared daemon state.
//!
//! One explicitly owned state object, created at startup and passed by
//! handle to every request handler and background task. Configuration is
//! never deleted: reset restores the seeded defaults.

use std::{sync::Arc, time::Instant};

use parking_lot::RwLock;
use shaper_core::{
    command::Executor,
    dhcp::{LeaseMonitor, PoolInfo},
    net,
    probe::Prober,
    shaper,
    telemetry::TrafficMonitor,
    ShapingConfig, ShapingPlanner, SystemExecutor,
};

use crate::settings::Settings;

pub struct AppState {
    pub settings: Settings,
    pub executor: Arc<dyn Executor>,
    pub planner: ShapingPlanner,
    pub config: RwLock<ShapingConfig>,
    pub traffic: Arc<TrafficMonitor>,
    pub leases: Arc<LeaseMonitor>,
    pub prober: Prober,
    pub started: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Arc<Self> {
        let executor: Arc<dyn Executor> =
            Arc::new(SystemExecutor::new(settings.command_timeout));
        let prober = Prober::new(executor.clone());
        let leases = LeaseMonitor::new(executor.clone(), prober.clone()).with_pool(PoolInfo {
            subnet: settings.dhcp_subnet.clone(),
            range: settings.dhcp_range.clone(),
        });

        Arc::new(Self {
            planner: ShapingPlanner::new(executor.clone()),
            config: RwLock::new(seeded_config(&settings)),
            traffic: Arc::new(TrafficMonitor::new()),
            leases: Arc::new(leases),
            prober,
            executor,
            started: Instant::now(),
            settings,
        })
    }

    /// Spawns the periodic background samplers.
    pub fn spawn_monitors(&self) {
        let _ = self.traffic.spawn(self.settings.sample_period);
        let _ = self.leases.spawn(self.settings.lease_refresh_period);
    }

    pub fn current_config(&self) -> ShapingConfig {
        self.config.read().clone()
    }

    /// Validates and applies a new configuration, storing it once kernel
    /// state has converged. Readers keep seeing the previous configuration
    /// until then: from their perspective it is either the old plan or the
    /// new one, never something in between.
    pub async fn apply_config(&self, new: ShapingConfig) -> shaper::Result<ShapingConfig> {
        self.planner.apply(&new, &net::interface_names()).await?;
        *self.config.write() = new.clone();
        Ok(new)
    }

    /// Disables shaping everywhere and restores the seeded defaults.
    pub async fn reset(&self) -> shaper::Result<ShapingConfig> {
        self.apply_config(seeded_config(&self.settings)).await
    }
}

/// The disabled baseline configuration, with interface names seeded from the
/// environment defaults.
fn seeded_config(settings: &Settings) -> ShapingConfig {
    ShapingConfig {
        interface_in: settings.default_interface_in.clone(),
        interface_out: settings.default_interface_out.clone(),
        ..ShapingConfig::default()
    }
}
