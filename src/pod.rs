//! Data model shared across the projector, queue and reconciler.

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

/// Label that opts a pod into being watched by this bridge.
pub const RPC_SERVICE_LABEL: &str = "rpc-service";
/// Value of [`RPC_SERVICE_LABEL`] that means "yes, watch me".
pub const RPC_SERVICE_LABEL_VALUE: &str = "true";
/// Annotation carrying the JSON-encoded `RpcService` array.
pub const RPC_SERVICE_ANNOTATION: &str = "rpc-service";

/// One RPC service declaration, as carried in the `rpc-service` pod
/// annotation. `address` is always overwritten by the projector with the
/// pod's own IP; whatever the annotation says there is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcService {
	#[serde(rename = "ServiceName")]
	pub service_name: String,

	#[serde(rename = "Address", default)]
	pub address: String,

	/// Unknown annotation fields, preserved (but never consulted) to keep
	/// the type an honest mirror of whatever operators put in the
	/// annotation.
	#[serde(flatten)]
	pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Identifies a pod across its lifetime: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodKey(pub String);

impl PodKey {
	pub fn from_pod(pod: &Pod) -> Option<Self> {
		let meta = &pod.metadata;
		let namespace = meta.namespace.as_deref()?;
		let name = meta.name.as_deref()?;
		Some(PodKey(format!("{}/{}", namespace, name)))
	}
}

impl std::fmt::Display for PodKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A `(key, pod-snapshot)` pair as produced by the watch event handler.
///
/// The snapshot is only authoritative for the delete path: on add/update the
/// reconciler re-reads the shared cache instead of trusting the event's
/// payload, since the cache may already carry a newer version of the pod.
#[derive(Debug, Clone)]
pub struct PodEvent {
	pub key: PodKey,
	pub pod: Pod,
}

impl crate::queue::WorkItem for PodEvent {
	type Key = PodKey;

	fn key(&self) -> Self::Key {
		self.key.clone()
	}
}

pub fn pod_ip(pod: &Pod) -> Option<&str> {
	pod.status.as_ref()?.pod_ip.as_deref().filter(|ip| !ip.is_empty())
}

pub fn pod_name(pod: &Pod) -> Option<&str> {
	pod.metadata.name.as_deref().filter(|n| !n.is_empty())
}

pub fn has_rpc_service_label(pod: &Pod) -> bool {
	pod.metadata
		.labels
		.as_ref()
		.and_then(|labels| labels.get(RPC_SERVICE_LABEL))
		.map(|v| v == RPC_SERVICE_LABEL_VALUE)
		.unwrap_or(false)
}
