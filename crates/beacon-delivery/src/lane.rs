// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Single-threaded bounded task lanes.
//!
//! A lane is one OS thread driving its own current-thread tokio runtime and
//! draining a bounded queue of tasks strictly one at a time. Submissions
//! beyond the queue capacity are shed, never blocked on.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::thread::JoinHandle;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::DeliveryError;

type LaneTask = BoxFuture<'static, ()>;

/// Cloneable submission side of a [`Lane`].
#[derive(Clone)]
pub struct LaneHandle {
	name: &'static str,
	tx: mpsc::Sender<LaneTask>,
}

impl LaneHandle {
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Queues a task. Returns `false` if the queue is full or the lane has
	/// stopped; the task is dropped in that case.
	pub fn submit<F>(&self, task: F) -> bool
	where
		F: Future<Output = ()> + Send + 'static,
	{
		match self.tx.try_send(task.boxed()) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				warn!(lane = self.name, "lane queue full, dropping task");
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				warn!(lane = self.name, "lane stopped, dropping task");
				false
			}
		}
	}

	/// Number of tasks queued but not yet started.
	pub fn pending(&self) -> usize {
		self.tx.max_capacity() - self.tx.capacity()
	}

	pub fn capacity(&self) -> usize {
		self.tx.max_capacity()
	}

	/// Queues a no-op task and waits until the lane reaches it, i.e. until
	/// every task queued before it has finished.
	///
	/// Waits for queue space as well as for the task itself, all within
	/// `timeout`. Returns `false` on timeout or if the lane has stopped.
	pub async fn barrier(&self, timeout: Duration) -> bool {
		let (done_tx, done_rx) = oneshot::channel::<()>();
		let task = async move {
			let _ = done_tx.send(());
		}
		.boxed();

		let wait = async {
			if self.tx.send(task).await.is_err() {
				return false;
			}
			done_rx.await.is_ok()
		};

		match tokio::time::timeout(timeout, wait).await {
			Ok(reached) => reached,
			Err(_) => {
				debug!(lane = self.name, timeout_ms = timeout.as_millis() as u64, "lane barrier timed out");
				false
			}
		}
	}
}

/// A named worker thread with a bounded task queue.
pub struct Lane {
	handle: LaneHandle,
	worker: Option<JoinHandle<()>>,
}

impl Lane {
	/// Starts a lane whose queue holds at most `capacity` pending tasks.
	pub fn spawn(name: &'static str, capacity: usize) -> Result<Self, DeliveryError> {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.map_err(|source| DeliveryError::LaneSpawn { lane: name, source })?;

		let (tx, mut rx) = mpsc::channel::<LaneTask>(capacity.max(1));

		let worker = std::thread::Builder::new()
			.name(format!("beacon-{name}"))
			.spawn(move || {
				runtime.block_on(async move {
					while let Some(task) = rx.recv().await {
						if AssertUnwindSafe(task).catch_unwind().await.is_err() {
							error!(lane = name, "lane task panicked");
						}
					}
				});
				debug!(lane = name, "lane stopped");
			})
			.map_err(|source| DeliveryError::LaneSpawn { lane: name, source })?;

		debug!(lane = name, capacity, "lane started");

		Ok(Self {
			handle: LaneHandle { name, tx },
			worker: Some(worker),
		})
	}

	pub fn handle(&self) -> LaneHandle {
		self.handle.clone()
	}

	pub fn submit<F>(&self, task: F) -> bool
	where
		F: Future<Output = ()> + Send + 'static,
	{
		self.handle.submit(task)
	}

	pub fn pending(&self) -> usize {
		self.handle.pending()
	}

	/// Stops accepting tasks from this handle, lets queued tasks finish and
	/// joins the worker once every other [`LaneHandle`] has been dropped.
	pub fn shutdown(mut self) {
		let name = self.handle.name;
		let worker = self.worker.take();
		drop(self);

		if let Some(worker) = worker {
			if worker.join().is_err() {
				error!(lane = name, "lane worker panicked during shutdown");
			}
		}
	}
}
