//! Crate-wide error type.

use err_derive::Error;

/// Errors that can surface from configuration, the registry writer, the
/// façade, or the reconciler.
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "configuration error: {}", _0)]
	Config(String),

	#[error(display = "servers list can not be empty")]
	EmptyServers,

	#[error(display = "base path can not be empty")]
	EmptyBasePath,

	#[error(display = "qps must be strictly positive")]
	InvalidQps,

	#[error(display = "addresses can not be empty")]
	EmptyAddresses,

	#[error(display = "gave up after {} attempts against a racing writer", _0)]
	TooManyAttempts(u32),

	#[error(display = "zookeeper error: {}", _0)]
	ZooKeeper(#[error(source)] zookeeper_async::ZkError),

	#[error(display = "invalid node body at {}: {}", _0, _1)]
	InvalidNodeBody(String, serde_json::Error),

	#[error(display = "kubernetes client error: {}", _0)]
	Kube(#[error(source)] kube::Error),

	#[error(display = "timed out waiting for the pod cache to sync")]
	CacheSyncTimeout,

	#[error(display = "{}", _0)]
	Message(String),
}

pub type Result<T> = std::result::Result<T, Error>;
