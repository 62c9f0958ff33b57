//! Registry Writer: a rate-limited, version-aware mutator against the
//! hierarchical store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, Interval};

use crate::diff;
use crate::error::Error;
use crate::registry::zk_conn::{is_bad_version, is_no_node, is_node_exists, StoreConn, ZkConn};

/// Applied only on node creation; never rewritten on update. Part of the
/// external contract with the legacy RPC layer — do not change the text or
/// order.
pub const DEFAULT_CONFIG: [&str; 3] = [
	"zone kg 8M",
	"kg_round_robin broken_tries=2 health_checks=5 max_uri_slots=0",
	"keepalive 32",
];

/// Bounds version-thrash retries against a permanently racing peer. Never
/// reached under the documented single-active-instance concurrency model.
const MAX_ATTEMPTS: u32 = 10;

/// The JSON body stored at `<base_path>/<service>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
	pub config: Vec<String>,
	pub servers: Vec<String>,
}

impl ServiceNode {
	fn with_default_config(servers: Vec<String>) -> Self {
		Self {
			config: DEFAULT_CONFIG.iter().map(|s| s.to_string()).collect(),
			servers,
		}
	}
}

enum Outcome {
	Done,
	Retry,
}

pub struct RegistryWriter {
	conn: Box<dyn StoreConn>,
	base_path: String,
	throttle: Mutex<Interval>,
	shutdown: watch::Receiver<bool>,
}

impl RegistryWriter {
	/// Connects to the store, ensures `base_path` exists, and sets up the
	/// write throttle. `shutdown` unblocks any throttle wait in progress
	/// when the process is shutting down.
	pub async fn connect(
		servers: &[String],
		base_path: String,
		qps: f64,
		shutdown: watch::Receiver<bool>,
	) -> Result<Self, Error> {
		if servers.is_empty() {
			return Err(Error::EmptyServers);
		}
		let conn = ZkConn::connect(servers, Duration::from_secs(30)).await?;
		Self::from_conn(Box::new(conn), base_path, qps, shutdown).await
	}

	async fn from_conn(
		conn: Box<dyn StoreConn>,
		base_path: String,
		qps: f64,
		shutdown: watch::Receiver<bool>,
	) -> Result<Self, Error> {
		if base_path.is_empty() {
			return Err(Error::EmptyBasePath);
		}
		if qps <= 0.0 {
			return Err(Error::InvalidQps);
		}

		conn.ensure_exists(&base_path).await?;

		let period = Duration::from_secs_f64(1.0 / qps);
		Ok(Self {
			conn,
			base_path,
			throttle: Mutex::new(interval(period)),
			shutdown,
		})
	}

	fn path_for(&self, service: &str) -> String {
		format!("{}/{}", self.base_path.trim_end_matches('/'), service)
	}

	async fn throttle_wait(&self) -> Result<(), Error> {
		if *self.shutdown.borrow() {
			return Err(Error::Message("registry writer is shutting down".into()));
		}
		let mut throttle = self.throttle.lock().await;
		let mut shutdown = self.shutdown.clone();
		tokio::select! {
			_ = throttle.tick() => Ok(()),
			_ = shutdown.changed() => Err(Error::Message("registry writer is shutting down".into())),
		}
	}

	async fn read_node(&self, service: &str) -> Result<Option<(ServiceNode, i32)>, Error> {
		let path = self.path_for(service);
		match self.conn.read(&path).await? {
			None => Ok(None),
			Some((body, version)) => {
				let node: ServiceNode = serde_json::from_slice(&body)
					.map_err(|e| Error::InvalidNodeBody(path, e))?;
				Ok(Some((node, version)))
			}
		}
	}

	async fn create(&self, service: &str, node: &ServiceNode) -> Result<Outcome, Error> {
		self.throttle_wait().await?;
		let body = serde_json::to_vec(node).expect("ServiceNode always serializes");
		match self.conn.create(&self.path_for(service), body).await {
			Ok(()) => Ok(Outcome::Done),
			Err(e) if is_node_exists(&e) => Ok(Outcome::Retry),
			Err(e) => Err(e),
		}
	}

	async fn set(&self, service: &str, node: &ServiceNode, version: i32) -> Result<Outcome, Error> {
		self.throttle_wait().await?;
		let body = serde_json::to_vec(node).expect("ServiceNode always serializes");
		match self.conn.set(&self.path_for(service), body, version).await {
			Ok(()) => Ok(Outcome::Done),
			Err(e) if is_no_node(&e) => Ok(Outcome::Retry),
			Err(e) if is_bad_version(&e) => Ok(Outcome::Retry),
			Err(e) => Err(e),
		}
	}

	async fn delete_node(&self, service: &str, version: i32) -> Result<Outcome, Error> {
		self.throttle_wait().await?;
		match self.conn.delete(&self.path_for(service), version).await {
			Ok(()) => Ok(Outcome::Done),
			Err(e) if is_no_node(&e) => Ok(Outcome::Done),
			Err(e) if is_bad_version(&e) => Ok(Outcome::Retry),
			Err(e) => Err(e),
		}
	}

	/// Forces `service`'s address set to exactly `addresses`. Fails
	/// immediately, without touching the store, if `addresses` is empty.
	pub async fn update(&self, service: &str, addresses: &[String]) -> Result<(), Error> {
		if addresses.is_empty() {
			return Err(Error::EmptyAddresses);
		}

		for _ in 0..MAX_ATTEMPTS {
			let outcome = match self.read_node(service).await? {
				Some((mut node, version)) => {
					if diff::differs(&node.servers, addresses) {
						node.servers = addresses.to_vec();
						self.set(service, &node, version).await?
					} else {
						Outcome::Done
					}
				}
				None => {
					let node = ServiceNode::with_default_config(addresses.to_vec());
					self.create(service, &node).await?
				}
			};

			if let Outcome::Done = outcome {
				return Ok(());
			}
		}

		Err(Error::TooManyAttempts(MAX_ATTEMPTS))
	}

	/// Ensures `addr` is present in `service`'s address set.
	pub async fn add(&self, service: &str, addr: &str) -> Result<(), Error> {
		let addr = addr.trim();

		for _ in 0..MAX_ATTEMPTS {
			let outcome = match self.read_node(service).await? {
				Some((mut node, version)) => {
					let already_present = node.servers.iter().any(|s| s.trim() == addr);
					if already_present {
						Outcome::Done
					} else {
						node.servers.push(addr.to_string());
						self.set(service, &node, version).await?
					}
				}
				None => {
					let node = ServiceNode::with_default_config(vec![addr.to_string()]);
					self.create(service, &node).await?
				}
			};

			if let Outcome::Done = outcome {
				return Ok(());
			}
		}

		Err(Error::TooManyAttempts(MAX_ATTEMPTS))
	}

	/// Ensures `addr` is absent from `service`'s address set. Succeeds
	/// without a store write if the service is already missing.
	pub async fn delete(&self, service: &str, addr: &str) -> Result<(), Error> {
		let addr = addr.trim();

		for _ in 0..MAX_ATTEMPTS {
			let outcome = match self.read_node(service).await? {
				None => return Ok(()),
				Some((mut node, version)) => {
					let before = node.servers.len();
					node.servers.retain(|s| s.trim() != addr);
					if node.servers.len() == before {
						Outcome::Done
					} else if node.servers.is_empty() {
						self.delete_node(service, version).await?
					} else {
						self.set(service, &node, version).await?
					}
				}
			};

			if let Outcome::Done = outcome {
				return Ok(());
			}
		}

		Err(Error::TooManyAttempts(MAX_ATTEMPTS))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;
	use tokio::sync::Mutex as AsyncMutex;

	/// In-memory fake implementing the same read/create/set/delete surface
	/// the real `zookeeper_async`-backed conn exposes, so the Writer's
	/// state machine can be exercised without a live ZooKeeper ensemble.
	struct FakeConn {
		nodes: AsyncMutex<HashMap<String, (Vec<u8>, i32)>>,
		bad_version_once: AtomicU32,
	}

	impl FakeConn {
		fn new() -> Self {
			Self {
				nodes: AsyncMutex::new(HashMap::new()),
				bad_version_once: AtomicU32::new(0),
			}
		}

		/// Causes the next `set` call to fail with `BadVersion`, simulating
		/// a racing concurrent writer.
		fn inject_bad_version_once(&self) {
			self.bad_version_once.store(1, Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl StoreConn for FakeConn {
		async fn read(&self, path: &str) -> Result<Option<(Vec<u8>, i32)>, Error> {
			Ok(self.nodes.lock().await.get(path).cloned())
		}

		async fn create(&self, path: &str, data: Vec<u8>) -> Result<(), Error> {
			let mut nodes = self.nodes.lock().await;
			if nodes.contains_key(path) {
				return Err(Error::ZooKeeper(zookeeper_async::ZkError::NodeExists));
			}
			nodes.insert(path.to_string(), (data, 0));
			Ok(())
		}

		async fn set(&self, path: &str, data: Vec<u8>, version: i32) -> Result<(), Error> {
			if self.bad_version_once.swap(0, Ordering::SeqCst) == 1 {
				return Err(Error::ZooKeeper(zookeeper_async::ZkError::BadVersion));
			}
			let mut nodes = self.nodes.lock().await;
			match nodes.get(path) {
				None => Err(Error::ZooKeeper(zookeeper_async::ZkError::NoNode)),
				Some((_, current_version)) if *current_version != version => {
					Err(Error::ZooKeeper(zookeeper_async::ZkError::BadVersion))
				}
				Some(_) => {
					nodes.insert(path.to_string(), (data, version + 1));
					Ok(())
				}
			}
		}

		async fn delete(&self, path: &str, version: i32) -> Result<(), Error> {
			let mut nodes = self.nodes.lock().await;
			match nodes.get(path) {
				None => Err(Error::ZooKeeper(zookeeper_async::ZkError::NoNode)),
				Some((_, current_version)) if *current_version != version => {
					Err(Error::ZooKeeper(zookeeper_async::ZkError::BadVersion))
				}
				Some(_) => {
					nodes.remove(path);
					Ok(())
				}
			}
		}

		async fn ensure_exists(&self, path: &str) -> Result<(), Error> {
			let mut nodes = self.nodes.lock().await;
			nodes.entry(path.to_string()).or_insert((Vec::new(), 0));
			Ok(())
		}
	}

	async fn writer_with_fake(fake: Arc<FakeConn>) -> RegistryWriter {
		let (_tx, rx) = watch::channel(false);
		RegistryWriter::from_conn(Box::new(FakeConnHandle(fake)), "/rpc_v2".into(), 1000.0, rx)
			.await
			.unwrap()
	}

	/// `StoreConn` is `Box<dyn ...>`; this thin handle lets the test keep an
	/// `Arc<FakeConn>` around to inspect/mutate after handing a boxed copy
	/// to the writer.
	struct FakeConnHandle(Arc<FakeConn>);

	#[async_trait]
	impl StoreConn for FakeConnHandle {
		async fn read(&self, path: &str) -> Result<Option<(Vec<u8>, i32)>, Error> {
			self.0.read(path).await
		}
		async fn create(&self, path: &str, data: Vec<u8>) -> Result<(), Error> {
			self.0.create(path, data).await
		}
		async fn set(&self, path: &str, data: Vec<u8>, version: i32) -> Result<(), Error> {
			self.0.set(path, data, version).await
		}
		async fn delete(&self, path: &str, version: i32) -> Result<(), Error> {
			self.0.delete(path, version).await
		}
		async fn ensure_exists(&self, path: &str) -> Result<(), Error> {
			self.0.ensure_exists(path).await
		}
	}

	fn node_at<'a>(fake: &'a HashMap<String, (Vec<u8>, i32)>, path: &str) -> ServiceNode {
		let (body, _) = fake.get(path).expect("node should exist");
		serde_json::from_slice(body).unwrap()
	}

	#[tokio::test]
	async fn update_creates_with_default_config() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		writer
			.update("svc.a", &["10.0.0.1".to_string()])
			.await
			.unwrap();

		let nodes = fake.nodes.lock().await;
		let node = node_at(&nodes, "/rpc_v2/svc.a");
		assert_eq!(node.servers, vec!["10.0.0.1".to_string()]);
		assert_eq!(node.config.len(), 3);
		assert_eq!(node.config[0], DEFAULT_CONFIG[0]);
	}

	#[tokio::test]
	async fn update_preserves_config_on_subsequent_write() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		writer
			.update("svc.a", &["10.0.0.1".to_string()])
			.await
			.unwrap();
		writer
			.update(
				"svc.a",
				&["10.0.0.1".to_string(), "10.0.0.2".to_string()],
			)
			.await
			.unwrap();

		let nodes = fake.nodes.lock().await;
		let node = node_at(&nodes, "/rpc_v2/svc.a");
		assert_eq!(
			node.servers,
			vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
		);
		assert_eq!(node.config[0], DEFAULT_CONFIG[0]);
	}

	#[tokio::test]
	async fn update_with_unchanged_set_causes_no_write() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		writer
			.update("svc.a", &["10.0.0.1".to_string()])
			.await
			.unwrap();
		let version_before = fake.nodes.lock().await.get("/rpc_v2/svc.a").unwrap().1;

		writer
			.update("svc.a", &["10.0.0.1".to_string()])
			.await
			.unwrap();
		let version_after = fake.nodes.lock().await.get("/rpc_v2/svc.a").unwrap().1;

		assert_eq!(version_before, version_after, "no-op update must not write");
	}

	#[tokio::test]
	async fn update_rejects_empty_addresses() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		let err = writer.update("svc.a", &[]).await.unwrap_err();
		assert!(matches!(err, Error::EmptyAddresses));
		assert!(fake.nodes.lock().await.get("/rpc_v2/svc.a").is_none());
	}

	#[tokio::test]
	async fn add_is_idempotent() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		writer.add("svc.a", "10.0.0.1").await.unwrap();
		writer.add("svc.a", "10.0.0.1").await.unwrap();

		let nodes = fake.nodes.lock().await;
		let node = node_at(&nodes, "/rpc_v2/svc.a");
		assert_eq!(node.servers, vec!["10.0.0.1".to_string()]);
	}

	#[tokio::test]
	async fn delete_on_missing_service_is_a_noop_success() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		writer.delete("svc.never-existed", "10.0.0.1").await.unwrap();
	}

	#[tokio::test]
	async fn delete_last_address_removes_the_node() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		writer.add("svc.a", "10.0.0.1").await.unwrap();
		writer.delete("svc.a", "10.0.0.1").await.unwrap();

		assert!(fake.nodes.lock().await.get("/rpc_v2/svc.a").is_none());
	}

	#[tokio::test]
	async fn delete_one_of_two_addresses_sets_remainder() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		writer.add("svc.a", "10.0.0.1").await.unwrap();
		writer.add("svc.a", "10.0.0.2").await.unwrap();
		writer.delete("svc.a", "10.0.0.1").await.unwrap();

		let nodes = fake.nodes.lock().await;
		let node = node_at(&nodes, "/rpc_v2/svc.a");
		assert_eq!(node.servers, vec!["10.0.0.2".to_string()]);
	}

	#[tokio::test]
	async fn bad_version_causes_one_retry_and_converges() {
		let fake = Arc::new(FakeConn::new());
		let writer = writer_with_fake(fake.clone()).await;

		writer.add("svc.a", "10.0.0.1").await.unwrap();
		fake.inject_bad_version_once();
		writer.add("svc.a", "10.0.0.2").await.unwrap();

		let nodes = fake.nodes.lock().await;
		let node = node_at(&nodes, "/rpc_v2/svc.a");
		let mut servers = node.servers.clone();
		servers.sort();
		assert_eq!(servers, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
	}

	#[tokio::test]
	async fn throttle_wait_is_cancelled_by_shutdown() {
		let fake = Arc::new(FakeConn::new());
		let (tx, rx) = watch::channel(false);
		let writer = RegistryWriter::from_conn(
			Box::new(FakeConnHandle(fake)),
			"/rpc_v2".into(),
			// a very low QPS so the throttle tick would otherwise take a
			// long time, to prove shutdown wins the race
			0.001,
			rx,
		)
		.await
		.unwrap();

		tx.send(true).unwrap();
		let err = writer.add("svc.a", "10.0.0.1").await.unwrap_err();
		assert!(matches!(err, Error::Message(_)));
	}
}
