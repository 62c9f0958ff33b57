//! Registry façade: the seam between the reconciler and the concrete
//! registry backend, real or mock.

mod mock;
mod writer;
mod zk_conn;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

pub use mock::MockRegistry;
pub use writer::{RegistryWriter, ServiceNode, DEFAULT_CONFIG};

use crate::error::Error;
use crate::pod::RpcService;

/// The operations the reconciler needs from a registry backend, independent
/// of whether it is backed by a live store or a mock.
#[async_trait]
pub trait RegistryFacade: Send + Sync {
	/// Replaces a service's full address set (used by the periodic sweep).
	async fn refresh_service(&self, name: &str, services: &[RpcService]) -> Result<(), Error>;
	/// Adds or confirms a single address for a service (used by event-driven
	/// updates).
	async fn add_or_update_service_instance(&self, service: &RpcService) -> Result<(), Error>;
	/// Removes a single address from a service.
	async fn delete_service_instance(&self, service: &RpcService) -> Result<(), Error>;
}

/// Backs [`RegistryFacade`] with a live [`RegistryWriter`].
pub struct RealRegistry {
	writer: Arc<RegistryWriter>,
}

impl RealRegistry {
	pub async fn connect(
		servers: &[String],
		base_path: String,
		qps: f64,
		shutdown: watch::Receiver<bool>,
	) -> Result<Self, Error> {
		let writer = RegistryWriter::connect(servers, base_path, qps, shutdown).await?;
		Ok(Self {
			writer: Arc::new(writer),
		})
	}
}

#[async_trait]
impl RegistryFacade for RealRegistry {
	async fn refresh_service(&self, name: &str, services: &[RpcService]) -> Result<(), Error> {
		let addresses: Vec<String> = services.iter().map(|s| s.address.clone()).collect();
		self.writer.update(name, &addresses).await
	}

	async fn add_or_update_service_instance(&self, service: &RpcService) -> Result<(), Error> {
		self.writer.add(&service.service_name, &service.address).await
	}

	async fn delete_service_instance(&self, service: &RpcService) -> Result<(), Error> {
		self.writer.delete(&service.service_name, &service.address).await
	}
}

/// Default write rate against the store: one mutation per 100ms.
pub const DEFAULT_QPS: f64 = 10.0;
