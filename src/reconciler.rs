//! Reconciler: the event loop and periodic sweep, serialized against
//! the registry façade through a single coarse mutex.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::reflector::Store;
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::pod::{pod_ip, pod_name, PodEvent, PodKey, RpcService};
use crate::projector::project;
use crate::queue::{Next, WorkQueue};
use crate::registry::RegistryFacade;

/// Requeues beyond this count are dropped rather than retried forever.
const MAX_RETRIES: u32 = 5;

pub struct Reconciler<F: RegistryFacade> {
	queue: Arc<WorkQueue<PodEvent>>,
	cache: Store<Pod>,
	facade: Arc<F>,
	sync_period: Duration,
	registry_mutex: Mutex<()>,
}

impl<F: RegistryFacade + 'static> Reconciler<F> {
	pub fn new(
		queue: Arc<WorkQueue<PodEvent>>,
		cache: Store<Pod>,
		facade: Arc<F>,
		sync_period: Duration,
	) -> Self {
		Self {
			queue,
			cache,
			facade,
			sync_period,
			registry_mutex: Mutex::new(()),
		}
	}

	/// Runs the worker and sweep loops to completion, both cancelled by
	/// `shutdown`. Returns once both have stopped, after the work queue has
	/// been shut down, which unblocks any in-flight `get` with the shutdown
	/// flag rather than leaving it abandoned mid-item.
	pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
		let worker = tokio::spawn(self.clone().worker_loop(shutdown.clone()));
		let sweep = tokio::spawn(self.clone().sweep_loop(shutdown.clone()));
		let queue_shutdown = tokio::spawn(self.clone().shut_down_queue_on_signal(shutdown));

		let _ = tokio::join!(worker, sweep, queue_shutdown);
	}

	async fn shut_down_queue_on_signal(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		if *shutdown.borrow() {
			self.queue.shut_down().await;
			return;
		}
		if shutdown.changed().await.is_ok() && *shutdown.borrow() {
			self.queue.shut_down().await;
		}
	}

	async fn worker_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		loop {
			if *shutdown.borrow() {
				return;
			}

			let next = tokio::select! {
				next = self.queue.get() => next,
				_ = shutdown.changed() => {
					if *shutdown.borrow() {
						return;
					}
					continue;
				}
			};

			let item = match next {
				Next::Item(item) => item,
				Next::ShuttingDown => return,
			};

			self.process_item(item).await;
		}
	}

	async fn process_item(&self, item: PodEvent) {
		let _guard = self.registry_mutex.lock().await;

		let key = item.key.clone();
		let result = self.reconcile_one(&item).await;
		drop(_guard);

		// Done must run before any re-add for this key (including the
		// rate-limited re-add below), so a re-queue that arrived while
		// this item was processing becomes visible.
		self.queue.done(&item).await;

		match result {
			Ok(()) => self.queue.forget(&item).await,
			Err(e) => {
				let requeues = self.queue.num_requeues(&item).await;
				if requeues < MAX_RETRIES {
					warn!(pod = %key, error = %e, attempt = requeues + 1, "reconcile failed, will retry");
					self.queue.add_rate_limited(item).await;
				} else {
					error!(pod = %key, error = %e, "reconcile failed after {} attempts, dropping", requeues);
					self.queue.forget(&item).await;
				}
			}
		}
	}

	async fn reconcile_one(&self, item: &PodEvent) -> Result<(), crate::error::Error> {
		match self.cache.get(&cache_key(&item.key)) {
			Some(current) => self.reconcile_present(&current).await,
			None => self.reconcile_absent(&item.pod).await,
		}
	}

	async fn reconcile_present(&self, pod: &Pod) -> Result<(), crate::error::Error> {
		if pod_name(pod).is_none() || pod_ip(pod).is_none() {
			return Ok(());
		}
		for service in project(pod) {
			self.facade.add_or_update_service_instance(&service).await?;
		}
		Ok(())
	}

	async fn reconcile_absent(&self, pod: &Pod) -> Result<(), crate::error::Error> {
		for service in project(pod) {
			self.facade.delete_service_instance(&service).await?;
		}
		Ok(())
	}

	async fn sweep_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		let mut interval = tokio::time::interval(self.sync_period);
		// the first tick fires immediately; skip it so the sweep does not
		// race the initial cache sync that already seeded every pod
		interval.tick().await;

		loop {
			tokio::select! {
				_ = interval.tick() => self.sweep().await,
				_ = shutdown.changed() => {
					if *shutdown.borrow() {
						return;
					}
				}
			}
		}
	}

	async fn sweep(&self) {
		let _guard = self.registry_mutex.lock().await;
		info!("starting periodic full sweep");

		let mut by_service: BTreeMap<String, Vec<RpcService>> = BTreeMap::new();
		for pod in self.cache.state() {
			for service in project(&pod) {
				by_service
					.entry(service.service_name.clone())
					.or_default()
					.push(service);
			}
		}

		for (name, services) in by_service {
			if services.is_empty() {
				continue;
			}
			if let Err(e) = self.facade.refresh_service(&name, &services).await {
				error!(service = %name, error = %e, "sweep refresh failed");
			}
		}

		info!("periodic full sweep complete");
	}
}

fn cache_key(key: &PodKey) -> kube::runtime::reflector::ObjectRef<Pod> {
	let (namespace, name) = key
		.0
		.split_once('/')
		.expect("PodKey is always namespace/name");
	kube::runtime::reflector::ObjectRef::new(name).within(namespace)
}
