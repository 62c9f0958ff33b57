//! Rate-limiting, deduplicating work queue, modeled on
//! `client-go`'s `workqueue.RateLimitingInterface`. No crate in this
//! ecosystem reproduces that contract, so it is hand-rolled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

/// Base delay for the first rate-limited requeue.
const BASE_DELAY: Duration = Duration::from_millis(5);
/// Ceiling on the exponential backoff, matching
/// `client-go`'s `DefaultControllerRateLimiter`.
const MAX_DELAY: Duration = Duration::from_secs(1000);

/// An item that can be deduplicated and requeued by a stable key.
pub trait WorkItem: Send + 'static {
	type Key: Clone + Eq + std::hash::Hash + Send + std::fmt::Debug;

	fn key(&self) -> Self::Key;
}

struct Inner<T: WorkItem> {
	/// FIFO order of keys ready to be handed out by `get`.
	queue: VecDeque<T::Key>,
	/// Keys currently present in `queue`, to avoid double-queuing.
	queued: HashSet<T::Key>,
	/// Latest snapshot per key, whether queued, processing, or deferred.
	items: HashMap<T::Key, T>,
	/// Keys currently checked out via `get` and not yet `done`.
	processing: HashSet<T::Key>,
	/// Keys re-added while they were processing; made visible on `done`.
	dirty_while_processing: HashSet<T::Key>,
	/// Requeue counts since the last `forget`, used for backoff and
	/// `num_requeues`.
	retries: HashMap<T::Key, u32>,
	shutting_down: bool,
}

impl<T: WorkItem> Inner<T> {
	fn new() -> Self {
		Self {
			queue: VecDeque::new(),
			queued: HashSet::new(),
			items: HashMap::new(),
			processing: HashSet::new(),
			dirty_while_processing: HashSet::new(),
			retries: HashMap::new(),
			shutting_down: false,
		}
	}

	fn enqueue(&mut self, item: T) {
		let key = item.key();
		self.items.insert(key.clone(), item);

		if self.processing.contains(&key) {
			self.dirty_while_processing.insert(key);
		} else if self.queued.insert(key.clone()) {
			self.queue.push_back(key);
		}
	}
}

/// Outcome of [`WorkQueue::get`].
pub enum Next<T> {
	Item(T),
	ShuttingDown,
}

pub struct WorkQueue<T: WorkItem> {
	inner: Mutex<Inner<T>>,
	notify: Notify,
}

impl<T: WorkItem + Clone> WorkQueue<T> {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			inner: Mutex::new(Inner::new()),
			notify: Notify::new(),
		})
	}

	/// Deduplicates by key; if the same key is already queued (or currently
	/// being processed), the later-arriving snapshot wins.
	pub async fn add(&self, item: T) {
		let mut inner = self.inner.lock().await;
		if inner.shutting_down {
			return;
		}
		inner.enqueue(item);
		drop(inner);
		self.notify.notify_one();
	}

	/// Resolves when an item is available or the queue has been shut down.
	pub async fn get(&self) -> Next<T> {
		loop {
			let notified = self.notify.notified();
			{
				let mut inner = self.inner.lock().await;
				if let Some(key) = inner.queue.pop_front() {
					inner.queued.remove(&key);
					let item = inner
						.items
						.remove(&key)
						.expect("queue/items invariant violated");
					inner.processing.insert(key);
					return Next::Item(item);
				}
				if inner.shutting_down {
					return Next::ShuttingDown;
				}
			}
			notified.await;
		}
	}

	/// Marks processing complete for `item`'s key; a re-queue that arrived
	/// during processing becomes visible.
	pub async fn done(&self, item: &T) {
		let key = item.key();
		let mut inner = self.inner.lock().await;
		inner.processing.remove(&key);
		if inner.dirty_while_processing.remove(&key) && inner.queued.insert(key.clone()) {
			inner.queue.push_back(key);
		}
		drop(inner);
		self.notify.notify_one();
	}

	/// Resets per-item retry state.
	pub async fn forget(&self, item: &T) {
		let mut inner = self.inner.lock().await;
		inner.retries.remove(&item.key());
	}

	/// Re-enqueues `item` after an exponential backoff derived from prior
	/// failures for its key.
	pub async fn add_rate_limited(self: &Arc<Self>, item: T) {
		let key = item.key();
		let attempt = {
			let mut inner = self.inner.lock().await;
			let attempt = inner.retries.entry(key).or_insert(0);
			*attempt += 1;
			*attempt
		};

		let delay = backoff_for(attempt);
		let queue = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			queue.add(item).await;
		});
	}

	/// Count of retry-requeues since the last `forget` for `item`'s key.
	pub async fn num_requeues(&self, item: &T) -> u32 {
		let inner = self.inner.lock().await;
		inner.retries.get(&item.key()).copied().unwrap_or(0)
	}

	/// Unblocks all pending and future `get` waiters.
	pub async fn shut_down(&self) {
		let mut inner = self.inner.lock().await;
		inner.shutting_down = true;
		drop(inner);
		self.notify.notify_waiters();
	}
}

fn backoff_for(attempt: u32) -> Duration {
	BASE_DELAY
		.checked_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX))
		.unwrap_or(MAX_DELAY)
		.min(MAX_DELAY)
}
