//! Owns the resource pools and keeps them in sync with the host.

use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::ResourceConfig;
use crate::discovery::discover;
use crate::discovery::DiscoveredPool;
use crate::error::DeviceError;
use crate::factory::ResourceFactory;
use crate::health::device_health;
use crate::inventory::InventorySource;
use crate::pool::Health;
use crate::pool::PoolPhase;
use crate::pool::ResourcePool;

/// Result of one discovery pass for one pool.
#[derive(Debug)]
pub struct ScannedPool {
    pub found: DiscoveredPool,
    /// Health of each found device, by bus address
    pub health: Vec<(String, Health)>,
}

pub struct ResourceManager {
    inventory: Arc<dyn InventorySource>,
    factory: Arc<dyn ResourceFactory>,
    pools: Vec<Arc<ResourcePool>>,
    refresh_requested: Notify,
}

impl ResourceManager {
    /// Creates one pool per config, in config order. Pools stay
    /// `Initializing` until the first [`ResourceManager::refresh`].
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        factory: Arc<dyn ResourceFactory>,
        configs: Vec<ResourceConfig>,
    ) -> Self {
        let pools = configs.into_iter().map(ResourcePool::new).collect();
        Self {
            inventory,
            factory,
            pools,
            refresh_requested: Notify::new(),
        }
    }

    pub fn pools(&self) -> &[Arc<ResourcePool>] {
        &self.pools
    }

    /// Looks a pool up by resource name or by full `<prefix>/<name>`.
    pub fn pool(&self, name: &str) -> Option<Arc<ResourcePool>> {
        self.pools
            .iter()
            .find(|p| p.name() == name || p.config().full_name() == name)
            .cloned()
    }

    fn configs(&self) -> Vec<ResourceConfig> {
        self.pools.iter().map(|p| p.config().clone()).collect()
    }

    /// Runs a discovery pass on the blocking pool and checks the health of
    /// every device found; sysfs reads never stall allocation handlers.
    pub async fn discover(&self) -> Result<Vec<ScannedPool>, Report<DeviceError>> {
        let inventory = self.inventory.clone();
        let factory = self.factory.clone();
        let configs = self.configs();
        tokio::task::spawn_blocking(move || -> Result<Vec<ScannedPool>, Report<DeviceError>> {
            let pools = discover(&*inventory, &*factory, &configs)?;
            Ok(pools
                .into_iter()
                .map(|found| {
                    let health = found
                        .devices
                        .iter()
                        .map(|d| (d.address().to_string(), device_health(factory.sysfs(), d)))
                        .collect();
                    ScannedPool { found, health }
                })
                .collect())
        })
        .await
        .map_err(|e| {
            Report::new(DeviceError::Inventory {
                message: format!("discovery task failed: {e}"),
            })
        })?
    }

    /// Discovers devices and applies the result and the device health to
    /// every pool. A pool that fails to take the update keeps its previous
    /// device set.
    pub async fn refresh(&self) -> Result<(), Report<DeviceError>> {
        for pool in &self.pools {
            if pool.phase().await == PoolPhase::Ready {
                if let Err(e) = pool.begin_update().await {
                    debug!(pool = %pool.name(), error = ?e, "pool not updatable");
                }
            }
        }

        let scanned = match self.discover().await {
            Ok(scanned) => scanned,
            Err(e) => {
                for pool in &self.pools {
                    pool.abort_update().await;
                }
                return Err(e);
            }
        };

        for (pool, scan) in self.pools.iter().zip(scanned) {
            let result = match pool.phase().await {
                PoolPhase::Initializing => pool.initialize(scan.found.devices).await,
                _ => pool.reconcile(scan.found.devices).await,
            };
            if let Err(e) = result {
                warn!(pool = %pool.name(), error = ?e, "failed to apply discovery result");
                continue;
            }
            for (address, health) in &scan.health {
                if let Err(e) = pool.set_health(address, *health).await {
                    warn!(
                        pool = %pool.name(),
                        address = %address,
                        error = ?e,
                        "failed to update health"
                    );
                }
            }
        }
        Ok(())
    }

    /// Asks the run loop for an immediate re-discovery.
    pub fn trigger_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    /// Refreshes every `interval` and on [`ResourceManager::trigger_refresh`]
    /// until `cancellation_token` fires, then stops all pools.
    #[tracing::instrument(skip(self, cancellation_token), fields(pools = self.pools.len()))]
    pub async fn run(&self, cancellation_token: CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?interval, "resource manager started");

        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("resource manager shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.refresh_requested.notified() => {
                    debug!("re-discovery requested");
                }
            }
            if let Err(e) = self.refresh().await {
                error!(error = ?e, "discovery pass failed");
            }
        }

        self.stop().await;
    }

    pub async fn stop(&self) {
        for pool in &self.pools {
            pool.stop().await;
        }
    }
}
