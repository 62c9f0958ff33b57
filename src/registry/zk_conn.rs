//! Thin seam between the Writer's state machine and the ZooKeeper client,
//! so `writer.rs`'s conflict-handling logic can be exercised in tests
//! against an in-memory fake instead of a live ensemble.

use std::time::Duration;

use async_trait::async_trait;
use zookeeper_async::{Acl, CreateMode, Watcher, ZkError, ZooKeeper};

use crate::error::Error;

/// The subset of a hierarchical-store client the Writer needs: read a
/// node's body and version, and perform versioned creates/sets/deletes.
#[async_trait]
pub(crate) trait StoreConn: Send + Sync {
	/// Returns `None` if the node does not exist, otherwise its body and
	/// version.
	async fn read(&self, path: &str) -> Result<Option<(Vec<u8>, i32)>, Error>;
	async fn create(&self, path: &str, data: Vec<u8>) -> Result<(), Error>;
	async fn set(&self, path: &str, data: Vec<u8>, version: i32) -> Result<(), Error>;
	async fn delete(&self, path: &str, version: i32) -> Result<(), Error>;
	/// Creates `path` with world-permissive ACL if it does not already
	/// exist. Idempotent.
	async fn ensure_exists(&self, path: &str) -> Result<(), Error>;
}

struct NoopWatcher;

impl Watcher for NoopWatcher {
	fn handle(&self, _event: zookeeper_async::WatchedEvent) {}
}

pub(crate) struct ZkConn {
	client: ZooKeeper,
}

impl ZkConn {
	pub(crate) async fn connect(servers: &[String], session_timeout: Duration) -> Result<Self, Error> {
		let connect_string = servers.join(",");
		let client = ZooKeeper::connect(&connect_string, session_timeout, NoopWatcher)
			.await
			.map_err(Error::ZooKeeper)?;
		Ok(Self { client })
	}
}

#[async_trait]
impl StoreConn for ZkConn {
	async fn read(&self, path: &str) -> Result<Option<(Vec<u8>, i32)>, Error> {
		match self.client.get_data(path, false).await {
			Ok((data, stat)) => Ok(Some((data, stat.version))),
			Err(ZkError::NoNode) => Ok(None),
			Err(e) => Err(Error::ZooKeeper(e)),
		}
	}

	async fn create(&self, path: &str, data: Vec<u8>) -> Result<(), Error> {
		match self
			.client
			.create(path, data, Acl::open_unsafe().clone(), CreateMode::Persistent)
			.await
		{
			Ok(_) => Ok(()),
			Err(e) => Err(Error::ZooKeeper(e)),
		}
	}

	async fn set(&self, path: &str, data: Vec<u8>, version: i32) -> Result<(), Error> {
		match self.client.set_data(path, data, version).await {
			Ok(_) => Ok(()),
			Err(e) => Err(Error::ZooKeeper(e)),
		}
	}

	async fn delete(&self, path: &str, version: i32) -> Result<(), Error> {
		match self.client.delete(path, version).await {
			Ok(()) => Ok(()),
			Err(e) => Err(Error::ZooKeeper(e)),
		}
	}

	async fn ensure_exists(&self, path: &str) -> Result<(), Error> {
		match self.client.exists(path, false).await {
			Ok(Some(_)) => Ok(()),
			Ok(None) => match self
				.client
				.create(path, Vec::new(), Acl::open_unsafe().clone(), CreateMode::Persistent)
				.await
			{
				Ok(_) | Err(ZkError::NodeExists) => Ok(()),
				Err(e) => Err(Error::ZooKeeper(e)),
			},
			Err(e) => Err(Error::ZooKeeper(e)),
		}
	}
}

pub(crate) fn is_node_exists(err: &Error) -> bool {
	matches!(err, Error::ZooKeeper(ZkError::NodeExists))
}

pub(crate) fn is_no_node(err: &Error) -> bool {
	matches!(err, Error::ZooKeeper(ZkError::NoNode))
}

pub(crate) fn is_bad_version(err: &Error) -> bool {
	matches!(err, Error::ZooKeeper(ZkError::BadVersion))
}
