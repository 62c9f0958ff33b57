//! Cluster watch: wraps `kube::runtime`'s watcher/reflector pair into a
//! shared pod cache plus the queue-feeding event stream.

use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client};
use tokio::sync::watch as tokio_watch;
use tracing::{debug, warn};

use crate::error::Error;
use crate::pod::{has_rpc_service_label, PodEvent, PodKey, RPC_SERVICE_LABEL, RPC_SERVICE_LABEL_VALUE};
use crate::queue::WorkQueue;

/// How long to wait for the initial list to complete before giving up.
const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Starts the watch/reflector pair scoped to `namespace` (`None` means every
/// namespace), waits for the initial cache sync, and spawns the task that
/// feeds the work queue from the resulting event stream. Returns the shared
/// cache, which the reconciler consults as the source of truth for add and
/// update processing.
pub async fn start(
	client: Client,
	namespace: Option<&str>,
	queue: std::sync::Arc<WorkQueue<PodEvent>>,
	shutdown: tokio_watch::Receiver<bool>,
) -> Result<Store<Pod>, Error> {
	let api: Api<Pod> = match namespace {
		Some(ns) => Api::namespaced(client, ns),
		None => Api::all(client),
	};

	let config = watcher::Config::default()
		.labels(&format!("{}={}", RPC_SERVICE_LABEL, RPC_SERVICE_LABEL_VALUE));

	let (reader, writer) = reflector::store();
	let stream = reflector::reflector(writer, watcher::watcher(api, config)).boxed();

	tokio::spawn(feed_queue(stream, queue, shutdown));

	tokio::time::timeout(CACHE_SYNC_TIMEOUT, reader.wait_until_ready())
		.await
		.map_err(|_| Error::CacheSyncTimeout)?
		.map_err(|_| Error::CacheSyncTimeout)?;

	Ok(reader)
}

async fn feed_queue<S>(
	mut stream: S,
	queue: std::sync::Arc<WorkQueue<PodEvent>>,
	mut shutdown: tokio_watch::Receiver<bool>,
) where
	S: futures::Stream<Item = Result<Event<Pod>, watcher::Error>> + Unpin,
{
	loop {
		tokio::select! {
			next = stream.next() => {
				match next {
					Some(Ok(event)) => handle_event(&queue, event).await,
					Some(Err(e)) => warn!(error = %e, "watch stream error; kube's backoff will retry"),
					None => {
						debug!("watch stream ended");
						return;
					}
				}
			}
			_ = shutdown.changed() => {
				if *shutdown.borrow() {
					return;
				}
			}
		}
	}
}

async fn handle_event(queue: &std::sync::Arc<WorkQueue<PodEvent>>, event: Event<Pod>) {
	match event {
		Event::Applied(pod) => enqueue_if_labeled(queue, pod).await,
		Event::Deleted(pod) => enqueue_if_labeled(queue, pod).await,
		Event::Restarted(pods) => {
			for pod in pods {
				enqueue_if_labeled(queue, pod).await;
			}
		}
	}
}

async fn enqueue_if_labeled(queue: &std::sync::Arc<WorkQueue<PodEvent>>, pod: Pod) {
	if !has_rpc_service_label(&pod) {
		return;
	}
	let key = match PodKey::from_pod(&pod) {
		Some(key) => key,
		None => {
			debug!("pod without namespace/name observed on watch stream, ignoring");
			return;
		}
	};
	queue.add(PodEvent { key, pod }).await;
}
