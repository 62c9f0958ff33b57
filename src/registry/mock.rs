//! In-process stand-in for [`RealRegistry`](super::RealRegistry), selected by
//! `--mockregistry`. Logs every call at info and never fails, so the
//! rest of the reconciler can be exercised without a store.

use async_trait::async_trait;
use tracing::info;

use crate::error::Error;
use crate::pod::RpcService;
use crate::registry::RegistryFacade;

pub struct MockRegistry;

#[async_trait]
impl RegistryFacade for MockRegistry {
	async fn refresh_service(&self, name: &str, services: &[RpcService]) -> Result<(), Error> {
		let addresses: Vec<&str> = services.iter().map(|s| s.address.as_str()).collect();
		info!(name, ?addresses, "mock registry: refresh_service");
		Ok(())
	}

	async fn add_or_update_service_instance(&self, service: &RpcService) -> Result<(), Error> {
		info!(
			service = service.service_name,
			addr = service.address,
			"mock registry: add_or_update_service_instance"
		);
		Ok(())
	}

	async fn delete_service_instance(&self, service: &RpcService) -> Result<(), Error> {
		info!(
			service = service.service_name,
			addr = service.address,
			"mock registry: delete_service_instance"
		);
		Ok(())
	}
}
