//! Pod projector: a pure function from a pod snapshot to the RPC
//! services it declares.

use k8s_openapi::api::core::v1::Pod;

use crate::pod::{pod_ip, RpcService, RPC_SERVICE_ANNOTATION};

/// Projects a pod's `rpc-service` annotation into the services it declares,
/// overwriting each declared `Address` with the pod's own IP. A missing or
/// malformed annotation projects to an empty sequence; this function never
/// fails.
pub fn project(pod: &Pod) -> Vec<RpcService> {
	let raw = match pod
		.metadata
		.annotations
		.as_ref()
		.and_then(|a| a.get(RPC_SERVICE_ANNOTATION))
	{
		Some(raw) => raw,
		None => return Vec::new(),
	};

	let mut services: Vec<RpcService> = match serde_json::from_str(raw) {
		Ok(services) => services,
		Err(e) => {
			tracing::debug!(
				pod = %crate::pod::PodKey::from_pod(pod).map(|k| k.0).unwrap_or_default(),
				error = %e,
				"rpc-service annotation did not decode; projecting to no services",
			);
			return Vec::new();
		}
	};

	let ip = pod_ip(pod).unwrap_or_default().to_string();
	for service in &mut services {
		service.address = ip.clone();
	}

	services
}
