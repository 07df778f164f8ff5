//! Device plugin service of one resource pool, as kubelet sees it.

use std::sync::Arc;

use error_stack::Report;
use futures::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use crate::api::AllocateRequest;
use crate::api::AllocateResponse;
use crate::api::DevicePluginOptions;
use crate::api::ListAndWatchResponse;
use crate::error::PoolError;
use crate::pool::container_allocate_response;
use crate::pool::ResourcePool;

#[derive(Debug, Clone)]
pub struct DevicePluginService {
    pool: Arc<ResourcePool>,
}

impl DevicePluginService {
    pub fn new(pool: Arc<ResourcePool>) -> Self {
        Self { pool }
    }

    /// Extended resource name the service registers under.
    pub fn resource_name(&self) -> String {
        self.pool.config().full_name()
    }

    pub fn get_device_plugin_options(&self) -> DevicePluginOptions {
        DevicePluginOptions::default()
    }

    /// The current device list, then a new list on every change until the
    /// pool goes away.
    pub fn list_and_watch(&self) -> impl Stream<Item = ListAndWatchResponse> + Send + 'static {
        info!(resource = %self.resource_name(), "starting to watch device list");
        WatchStream::new(self.pool.subscribe()).map(|devices| ListAndWatchResponse { devices })
    }

    /// Maps the devices kubelet assigned to each container to what the
    /// container needs. Kubelet tracks assignments itself, so nothing is
    /// leased here and the same ids may be requested again later.
    pub async fn allocate(
        &self,
        request: AllocateRequest,
    ) -> Result<AllocateResponse, Report<PoolError>> {
        let mut container_responses = Vec::with_capacity(request.container_requests.len());

        for container_req in &request.container_requests {
            info!(
                resource = %self.resource_name(),
                devices = ?container_req.devices_ids,
                "allocating devices to container"
            );
            let devices = self.pool.resolve_ids(&container_req.devices_ids).await?;
            container_responses.push(container_allocate_response(self.pool.config(), &devices));
        }

        Ok(AllocateResponse {
            container_responses,
        })
    }
}
