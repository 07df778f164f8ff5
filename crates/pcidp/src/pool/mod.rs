//! Resource pools: the devices matched by one resource config, their health
//! and their allocation state.
//!
//! A pool moves through `Initializing -> Ready -> (Updating <-> Ready) -> Stopped`.
//! All mutations go through one async mutex, and a reconciliation swaps the
//! device set inside a single critical section, so readers and allocators see
//! either the old or the new set, never a mix.

mod response;

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use error_stack::Report;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub use response::container_allocate_response;
pub use response::env_var_name;

use crate::api;
use crate::config::ResourceConfig;
use crate::error::PoolError;
use crate::netdevice::PciNetDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum PoolPhase {
    Initializing,
    Ready,
    Updating,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Health {
    #[display("Healthy")]
    Healthy,
    #[display("Unhealthy")]
    Unhealthy,
}

impl Health {
    pub fn as_api_str(self) -> &'static str {
        match self {
            Self::Healthy => api::HEALTHY,
            Self::Unhealthy => api::UNHEALTHY,
        }
    }
}

/// Ask for `count` devices, taking the `preferred` addresses first when they
/// are free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationRequest {
    pub count: usize,
    pub preferred: Vec<String>,
}

impl AllocationRequest {
    pub fn count(count: usize) -> Self {
        Self {
            count,
            preferred: Vec::new(),
        }
    }
}

/// What a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub kept: Vec<String>,
    /// Removed devices that were allocated at the time
    pub force_released: Vec<String>,
}

#[derive(Debug)]
struct PoolEntry {
    device: Arc<PciNetDevice>,
    health: Health,
    allocated: bool,
}

impl PoolEntry {
    fn new(device: PciNetDevice) -> Self {
        Self {
            device: Arc::new(device),
            health: Health::Healthy,
            allocated: false,
        }
    }

    fn is_allocatable(&self) -> bool {
        self.health == Health::Healthy && !self.allocated
    }

    fn api_device(&self) -> api::Device {
        api::Device {
            health: self.health.as_api_str().to_string(),
            ..self.device.api_device()
        }
    }
}

#[derive(Debug)]
struct PoolState {
    phase: PoolPhase,
    /// Keyed and therefore ordered by bus address
    entries: BTreeMap<String, PoolEntry>,
}

impl PoolState {
    fn api_devices(&self) -> Vec<api::Device> {
        self.entries.values().map(PoolEntry::api_device).collect()
    }

    fn available(&self) -> usize {
        self.entries.values().filter(|e| e.is_allocatable()).count()
    }
}

#[derive(Debug)]
pub struct ResourcePool {
    config: ResourceConfig,
    state: Mutex<PoolState>,
    updates: watch::Sender<Vec<api::Device>>,
}

impl ResourcePool {
    pub fn new(config: ResourceConfig) -> Arc<Self> {
        let (updates, _) = watch::channel(Vec::new());
        Arc::new(Self {
            config,
            state: Mutex::new(PoolState {
                phase: PoolPhase::Initializing,
                entries: BTreeMap::new(),
            }),
            updates,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.resource_name
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub async fn phase(&self) -> PoolPhase {
        self.state.lock().await.phase
    }

    fn error(&self, make: impl FnOnce(String) -> PoolError) -> Report<PoolError> {
        Report::new(make(self.config.resource_name.clone()))
    }

    fn unknown_device(&self, id: &str) -> Report<PoolError> {
        self.error(|pool| PoolError::UnknownDevice {
            pool,
            id: id.to_string(),
        })
    }

    /// Rejects operations on pools that are stopped or not yet initialized.
    fn check_serving(&self, state: &PoolState) -> Result<(), Report<PoolError>> {
        match state.phase {
            PoolPhase::Stopped => Err(self.error(|pool| PoolError::PoolStopped { pool })),
            PoolPhase::Initializing => Err(self.error(|pool| PoolError::NotReady { pool })),
            PoolPhase::Ready | PoolPhase::Updating => Ok(()),
        }
    }

    fn publish(&self, state: &PoolState) {
        self.updates.send_replace(state.api_devices());
    }

    /// Installs the first device set and makes the pool ready. On a pool that
    /// is already serving this is a reconciliation.
    pub async fn initialize(
        &self,
        devices: Vec<PciNetDevice>,
    ) -> Result<ReconcileSummary, Report<PoolError>> {
        let mut state = self.state.lock().await;
        match state.phase {
            PoolPhase::Stopped => return Err(self.error(|pool| PoolError::PoolStopped { pool })),
            PoolPhase::Initializing => {}
            PoolPhase::Ready | PoolPhase::Updating => {
                drop(state);
                return self.reconcile(devices).await;
            }
        }

        let mut summary = ReconcileSummary::default();
        for device in devices {
            let address = device.address().to_string();
            summary.added.push(address.clone());
            state.entries.insert(address, PoolEntry::new(device));
        }
        state.phase = PoolPhase::Ready;
        self.publish(&state);

        info!(pool = %self.name(), devices = state.entries.len(), "resource pool ready");
        Ok(summary)
    }

    /// Marks a re-discovery as in flight. The current device set keeps
    /// serving until [`ResourcePool::reconcile`] swaps in the new one.
    pub async fn begin_update(&self) -> Result<(), Report<PoolError>> {
        let mut state = self.state.lock().await;
        self.check_serving(&state)?;
        state.phase = PoolPhase::Updating;
        Ok(())
    }

    /// Returns an `Updating` pool to `Ready` without touching its devices,
    /// for when the re-discovery failed.
    pub async fn abort_update(&self) {
        let mut state = self.state.lock().await;
        if state.phase == PoolPhase::Updating {
            state.phase = PoolPhase::Ready;
            debug!(pool = %self.name(), "update aborted, keeping current devices");
        }
    }

    /// Replaces the device set with `devices`.
    ///
    /// Devices present in both sets keep their health and allocation; devices
    /// that disappeared are dropped even when allocated; new devices join as
    /// healthy and free.
    pub async fn reconcile(
        &self,
        devices: Vec<PciNetDevice>,
    ) -> Result<ReconcileSummary, Report<PoolError>> {
        let mut state = self.state.lock().await;
        self.check_serving(&state)?;

        let mut summary = ReconcileSummary::default();
        let mut entries = BTreeMap::new();
        for device in devices {
            let address = device.address().to_string();
            let entry = match state.entries.remove(&address) {
                Some(old) => {
                    summary.kept.push(address.clone());
                    PoolEntry {
                        device: Arc::new(device),
                        health: old.health,
                        allocated: old.allocated,
                    }
                }
                None => {
                    summary.added.push(address.clone());
                    PoolEntry::new(device)
                }
            };
            entries.insert(address, entry);
        }

        for (address, old) in std::mem::take(&mut state.entries) {
            if old.allocated {
                warn!(
                    pool = %self.name(),
                    address = %address,
                    "allocated device disappeared, releasing it"
                );
                summary.force_released.push(address.clone());
            } else {
                debug!(pool = %self.name(), address = %address, "device removed from pool");
            }
            summary.removed.push(address);
        }

        state.entries = entries;
        state.phase = PoolPhase::Ready;
        self.publish(&state);

        if !summary.added.is_empty() || !summary.removed.is_empty() {
            info!(
                pool = %self.name(),
                added = summary.added.len(),
                removed = summary.removed.len(),
                kept = summary.kept.len(),
                "resource pool reconciled"
            );
        }
        Ok(summary)
    }

    pub async fn devices(&self) -> Result<Vec<Arc<PciNetDevice>>, Report<PoolError>> {
        let state = self.state.lock().await;
        self.check_serving(&state)?;
        Ok(state.entries.values().map(|e| e.device.clone()).collect())
    }

    pub async fn api_devices(&self) -> Result<Vec<api::Device>, Report<PoolError>> {
        let state = self.state.lock().await;
        self.check_serving(&state)?;
        Ok(state.api_devices())
    }

    /// Number of healthy, unallocated devices.
    pub async fn available(&self) -> Result<usize, Report<PoolError>> {
        let state = self.state.lock().await;
        self.check_serving(&state)?;
        Ok(state.available())
    }

    pub async fn health(&self, id: &str) -> Result<Health, Report<PoolError>> {
        let state = self.state.lock().await;
        self.check_serving(&state)?;
        state
            .entries
            .get(id)
            .map(|e| e.health)
            .ok_or_else(|| self.unknown_device(id))
    }

    /// Watch channel carrying the advertised device list after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<api::Device>> {
        self.updates.subscribe()
    }

    pub async fn set_health(&self, id: &str, health: Health) -> Result<(), Report<PoolError>> {
        let mut state = self.state.lock().await;
        self.check_serving(&state)?;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| self.unknown_device(id))?;
        if entry.health == health {
            return Ok(());
        }
        entry.health = health;
        info!(pool = %self.name(), address = %id, health = %health, "device health changed");
        self.publish(&state);
        Ok(())
    }

    /// Leases `request.count` healthy devices. Either the whole request is
    /// granted or nothing changes.
    pub async fn allocate(
        &self,
        request: &AllocationRequest,
    ) -> Result<Vec<Arc<PciNetDevice>>, Report<PoolError>> {
        let mut state = self.state.lock().await;
        self.check_serving(&state)?;

        let available = state.available();
        if request.count > available {
            return Err(self.error(|pool| PoolError::InsufficientResources {
                pool,
                requested: request.count,
                available,
            }));
        }

        let mut chosen: Vec<String> = Vec::with_capacity(request.count);
        for address in &request.preferred {
            if chosen.len() == request.count {
                break;
            }
            let free = state
                .entries
                .get(address)
                .is_some_and(PoolEntry::is_allocatable);
            if free && !chosen.contains(address) {
                chosen.push(address.clone());
            }
        }
        for (address, entry) in &state.entries {
            if chosen.len() == request.count {
                break;
            }
            if entry.is_allocatable() && !chosen.contains(address) {
                chosen.push(address.clone());
            }
        }

        Ok(self.lease(&mut state, &chosen))
    }

    /// Leases exactly the devices in `ids`, as kubelet requests them.
    pub async fn allocate_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<Arc<PciNetDevice>>, Report<PoolError>> {
        let mut state = self.state.lock().await;
        self.check_serving(&state)?;

        let mut seen = HashSet::new();
        for id in ids {
            let entry = state
                .entries
                .get(id)
                .ok_or_else(|| self.unknown_device(id))?;
            let reason = if !seen.insert(id.as_str()) {
                Some("requested more than once")
            } else if entry.allocated {
                Some("already allocated")
            } else if entry.health != Health::Healthy {
                Some("unhealthy")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(self.error(|pool| PoolError::DeviceUnavailable {
                    pool,
                    id: id.clone(),
                    reason: reason.to_string(),
                }));
            }
        }

        Ok(self.lease(&mut state, ids))
    }

    /// Resolves the devices kubelet assigned to a container without leasing
    /// them. Kubelet owns the assignment and hands the same ids out again
    /// after a pod ends or the kubelet restarts, so only existence and health
    /// are checked.
    pub async fn resolve_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<Arc<PciNetDevice>>, Report<PoolError>> {
        let state = self.state.lock().await;
        self.check_serving(&state)?;

        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = state
                .entries
                .get(id)
                .ok_or_else(|| self.unknown_device(id))?;
            if entry.health != Health::Healthy {
                return Err(self.error(|pool| PoolError::DeviceUnavailable {
                    pool,
                    id: id.clone(),
                    reason: "unhealthy".to_string(),
                }));
            }
            devices.push(entry.device.clone());
        }
        Ok(devices)
    }

    fn lease(&self, state: &mut PoolState, ids: &[String]) -> Vec<Arc<PciNetDevice>> {
        let mut leased = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = state.entries.get_mut(id) {
                entry.allocated = true;
                leased.push(entry.device.clone());
            }
        }
        debug!(pool = %self.name(), devices = ?ids, "devices allocated");
        leased
    }

    /// Returns devices to the pool. Ids that are unknown or not allocated are
    /// skipped; the number of released devices is returned.
    pub async fn release(&self, ids: &[String]) -> Result<usize, Report<PoolError>> {
        let mut state = self.state.lock().await;
        self.check_serving(&state)?;

        let mut released = 0;
        for id in ids {
            match state.entries.get_mut(id) {
                Some(entry) if entry.allocated => {
                    entry.allocated = false;
                    released += 1;
                }
                _ => debug!(pool = %self.name(), address = %id, "nothing to release"),
            }
        }
        Ok(released)
    }

    /// Terminal shutdown: drops every device and lease.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.phase == PoolPhase::Stopped {
            return;
        }
        state.phase = PoolPhase::Stopped;
        state.entries.clear();
        self.publish(&state);
        info!(pool = %self.name(), "resource pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::mock::fake_device;

    fn config() -> ResourceConfig {
        ResourceConfig {
            resource_name: "sriov_net".into(),
            resource_prefix: "intel.com".into(),
            ..Default::default()
        }
    }

    fn devices(addresses: &[&str]) -> Vec<PciNetDevice> {
        addresses.iter().map(|a| fake_device(a, Some(0))).collect()
    }

    async fn ready_pool(addresses: &[&str]) -> Arc<ResourcePool> {
        let pool = ResourcePool::new(config());
        pool.initialize(devices(addresses)).await.unwrap();
        pool
    }

    fn ids(addresses: &[&str]) -> Vec<String> {
        addresses.iter().map(|a| a.to_string()).collect()
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let pool = ResourcePool::new(config());
        assert_eq!(pool.phase().await, PoolPhase::Initializing);
        let err = pool.allocate(&AllocationRequest::count(1)).await.unwrap_err();
        assert!(matches!(err.current_context(), PoolError::NotReady { .. }));
    }

    #[tokio::test]
    async fn initialize_marks_all_devices_healthy() {
        let pool = ready_pool(&["0000:00:00.2", "0000:00:00.1"]).await;
        assert_eq!(pool.phase().await, PoolPhase::Ready);

        let listed = pool.api_devices().await.unwrap();
        assert_eq!(
            listed.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec!["0000:00:00.1", "0000:00:00.2"]
        );
        assert!(listed.iter().all(|d| d.health == api::HEALTHY));
        assert_eq!(pool.available().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn allocate_prefers_requested_addresses() {
        let pool = ready_pool(&["0000:00:00.1", "0000:00:00.2", "0000:00:00.3"]).await;
        let leased = pool
            .allocate(&AllocationRequest {
                count: 2,
                preferred: ids(&["0000:00:00.3"]),
            })
            .await
            .unwrap();

        let addresses: Vec<&str> = leased.iter().map(|d| d.address()).collect();
        assert_eq!(addresses, vec!["0000:00:00.3", "0000:00:00.1"]);
        assert_eq!(pool.available().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn allocation_is_all_or_nothing() {
        let pool = ready_pool(&["0000:00:00.1", "0000:00:00.2"]).await;
        let err = pool.allocate(&AllocationRequest::count(3)).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &PoolError::InsufficientResources {
                pool: "sriov_net".into(),
                requested: 3,
                available: 2,
            }
        );
        assert_eq!(pool.available().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_allocations_are_exclusive() {
        const N: usize = 8;
        let addresses: Vec<String> = (0..N).map(|i| format!("0000:00:01.{i}")).collect();
        let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
        let pool = ready_pool(&refs).await;

        let handles: Vec<_> = (0..=N)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.allocate(&AllocationRequest::count(1)).await })
            })
            .collect();

        let mut granted = HashSet::new();
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(leased) => {
                    assert_eq!(leased.len(), 1);
                    assert!(granted.insert(leased[0].address().to_string()));
                }
                Err(e) => {
                    assert!(matches!(
                        e.current_context(),
                        PoolError::InsufficientResources { .. }
                    ));
                    insufficient += 1;
                }
            }
        }
        assert_eq!(granted.len(), N);
        assert_eq!(insufficient, 1);
    }

    #[tokio::test]
    async fn allocate_ids_rejects_unavailable_devices() {
        let pool = ready_pool(&["0000:00:00.1", "0000:00:00.2"]).await;
        pool.allocate_ids(&ids(&["0000:00:00.1"])).await.unwrap();

        let err = pool
            .allocate_ids(&ids(&["0000:00:00.2", "0000:00:00.1"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            PoolError::DeviceUnavailable { .. }
        ));
        // nothing from the failed request was leased
        assert_eq!(pool.available().await.unwrap(), 1);

        let err = pool.allocate_ids(&ids(&["0000:ff:00.0"])).await.unwrap_err();
        assert!(matches!(err.current_context(), PoolError::UnknownDevice { .. }));
    }

    #[tokio::test]
    async fn resolve_ids_does_not_lease() {
        let pool = ready_pool(&["0000:00:00.1", "0000:00:00.2"]).await;
        let first = pool.resolve_ids(&ids(&["0000:00:00.2"])).await.unwrap();
        let again = pool.resolve_ids(&ids(&["0000:00:00.2"])).await.unwrap();
        assert_eq!(first[0].address(), again[0].address());
        assert_eq!(pool.available().await.unwrap(), 2);

        pool.set_health("0000:00:00.2", Health::Unhealthy).await.unwrap();
        let err = pool.resolve_ids(&ids(&["0000:00:00.2"])).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            PoolError::DeviceUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn unhealthy_devices_are_not_allocated() {
        let pool = ready_pool(&["0000:00:00.1", "0000:00:00.2"]).await;
        let mut updates = pool.subscribe();
        pool.set_health("0000:00:00.1", Health::Unhealthy).await.unwrap();

        assert!(updates.has_changed().unwrap());
        let advertised = updates.borrow_and_update().clone();
        assert_eq!(advertised[0].health, api::UNHEALTHY);

        let leased = pool.allocate(&AllocationRequest::count(1)).await.unwrap();
        assert_eq!(leased[0].address(), "0000:00:00.2");
        assert!(pool.allocate(&AllocationRequest::count(1)).await.is_err());
    }

    #[tokio::test]
    async fn release_returns_devices() {
        let pool = ready_pool(&["0000:00:00.1"]).await;
        pool.allocate(&AllocationRequest::count(1)).await.unwrap();
        assert_eq!(pool.available().await.unwrap(), 0);

        let released = pool
            .release(&ids(&["0000:00:00.1", "0000:ff:00.0"]))
            .await
            .unwrap();
        assert_eq!(released, 1);
        assert_eq!(pool.available().await.unwrap(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn reconcile_keeps_allocations_and_drops_vanished_devices() {
        let pool = ready_pool(&["0000:00:00.1", "0000:00:00.2", "0000:00:00.3"]).await;
        pool.allocate_ids(&ids(&["0000:00:00.1", "0000:00:00.2"]))
            .await
            .unwrap();
        pool.set_health("0000:00:00.3", Health::Unhealthy).await.unwrap();

        pool.begin_update().await.unwrap();
        assert_eq!(pool.phase().await, PoolPhase::Updating);
        let summary = pool
            .reconcile(devices(&["0000:00:00.1", "0000:00:00.3", "0000:00:00.4"]))
            .await
            .unwrap();

        assert_eq!(
            summary,
            ReconcileSummary {
                added: ids(&["0000:00:00.4"]),
                removed: ids(&["0000:00:00.2"]),
                kept: ids(&["0000:00:00.1", "0000:00:00.3"]),
                force_released: ids(&["0000:00:00.2"]),
            }
        );
        assert_eq!(pool.phase().await, PoolPhase::Ready);
        assert_eq!(pool.health("0000:00:00.3").await.unwrap(), Health::Unhealthy);
        // .1 still allocated, .3 unhealthy, so only the new .4 is free
        let leased = pool.allocate(&AllocationRequest::count(1)).await.unwrap();
        assert_eq!(leased[0].address(), "0000:00:00.4");
    }

    #[tokio::test]
    async fn stopped_pool_rejects_everything() {
        let pool = ready_pool(&["0000:00:00.1"]).await;
        let updates = pool.subscribe();
        pool.stop().await;

        assert_eq!(pool.phase().await, PoolPhase::Stopped);
        assert!(updates.borrow().is_empty());
        for err in [
            pool.allocate(&AllocationRequest::count(1)).await.map(|_| ()).unwrap_err(),
            pool.api_devices().await.map(|_| ()).unwrap_err(),
            pool.reconcile(devices(&["0000:00:00.1"])).await.map(|_| ()).unwrap_err(),
            pool.initialize(Vec::new()).await.map(|_| ()).unwrap_err(),
            pool.set_health("0000:00:00.1", Health::Unhealthy).await.unwrap_err(),
        ] {
            assert!(matches!(err.current_context(), PoolError::PoolStopped { .. }));
        }
    }
}
