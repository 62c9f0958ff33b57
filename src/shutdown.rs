//! Shutdown signal plumbing: a single `watch::Receiver<bool>` cloned into
//! every long-running task, flipped by a signal handler task.

use tokio::sync::watch;
use tracing::info;

/// Spawns the signal-listening task and returns a receiver that flips to
/// `true` once `SIGINT`/`SIGTERM` (or, off Unix, Ctrl-C) is observed.
pub fn watch_shutdown_signal() -> watch::Receiver<bool> {
	imp::watch_shutdown_signal()
}

#[cfg(unix)]
mod imp {
	use super::*;
	use tokio::signal::unix::{signal, SignalKind};

	pub fn watch_shutdown_signal() -> watch::Receiver<bool> {
		let (send_cancel, watch_cancel) = watch::channel(false);
		tokio::spawn(async move {
			let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
			let mut sigterm =
				signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
			tokio::select! {
				_ = sigint.recv() => info!("received SIGINT, shutting down"),
				_ = sigterm.recv() => info!("received SIGTERM, shutting down"),
			}
			let _ = send_cancel.send(true);
		});
		watch_cancel
	}
}

#[cfg(not(unix))]
mod imp {
	use super::*;
	use tokio::signal::ctrl_c;

	pub fn watch_shutdown_signal() -> watch::Receiver<bool> {
		let (send_cancel, watch_cancel) = watch::channel(false);
		tokio::spawn(async move {
			let _ = ctrl_c().await;
			info!("received Ctrl-C, shutting down");
			let _ = send_cancel.send(true);
		});
		watch_cancel
	}
}

/// Resolves once `chan` observes `true`. Used to gate long-running server
/// loops on the shutdown signal.
pub async fn wait_for_shutdown(mut chan: watch::Receiver<bool>) {
	while !*chan.borrow() {
		if chan.changed().await.is_err() {
			return;
		}
	}
}
