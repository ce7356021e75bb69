// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! File-backed FIFO queue of serialized event records.
//!
//! The store owns a single newline-delimited file, `events/eventsFile`.
//! Records are appended at the tail and consumed from the head through an
//! [`EventIterator`]; delivered records are dropped by rewriting the file
//! under `events/eventsFile.tmp` and renaming it over the original.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::{DeliveryError, StoreError};

pub const EVENTS_DIR: &str = "events";
pub const EVENTS_FILE: &str = "eventsFile";
pub const DEFAULT_MAX_STORAGE_SIZE: u64 = 5 * 1024 * 1024;

struct StoreInner {
	dir: PathBuf,
	path: PathBuf,
	tmp_path: PathBuf,
	max_storage_size: u64,
	lock: ReentrantMutex<()>,
}

/// Durable FIFO queue of event records.
///
/// Cloning is cheap and every clone shares the same file and lock. Reads,
/// writes and compactions are mutually exclusive.
#[derive(Clone)]
pub struct EventStore {
	inner: Arc<StoreInner>,
}

impl EventStore {
	/// Creates a store rooted at `base_dir`. Nothing is touched on disk until
	/// the first successful `put`.
	pub fn new(base_dir: impl AsRef<Path>, max_storage_size: u64) -> Self {
		let dir = base_dir.as_ref().join(EVENTS_DIR);
		let path = dir.join(EVENTS_FILE);
		let tmp_path = dir.join(format!("{EVENTS_FILE}.tmp"));

		Self {
			inner: Arc::new(StoreInner {
				dir,
				path,
				tmp_path,
				max_storage_size,
				lock: ReentrantMutex::new(()),
			}),
		}
	}

	/// Creates a store under `$XDG_DATA_HOME/beacon`.
	pub fn from_xdg(max_storage_size: u64) -> Result<Self, DeliveryError> {
		let data_dir = dirs::data_dir().ok_or(DeliveryError::NoDataDir)?;
		let base = data_dir.join("beacon");

		info!(base_dir = %base.display(), "initialized event store");

		Ok(Self::new(base, max_storage_size))
	}

	pub fn path(&self) -> &Path {
		&self.inner.path
	}

	pub fn max_storage_size(&self) -> u64 {
		self.inner.max_storage_size
	}

	/// Appends one record.
	///
	/// Returns `false` without touching the file when the record is empty or
	/// contains a line break, when it would push the file past
	/// `max_storage_size`, or when the write fails.
	pub fn put(&self, record: &str) -> bool {
		if record.is_empty() {
			warn!("rejecting empty event record");
			return false;
		}
		if record.contains(['\n', '\r']) {
			warn!(bytes = record.len(), "rejecting event record containing a line break");
			return false;
		}

		self.with_lock(|| {
			let current = match self.size_on_disk() {
				Ok(size) => size,
				Err(e) => {
					error!(path = %self.inner.path.display(), error = %e, "failed to stat event store");
					return false;
				}
			};

			let line_bytes = record.len() as u64 + 1;
			if current + line_bytes > self.inner.max_storage_size {
				warn!(
					current_bytes = current,
					record_bytes = line_bytes,
					max_bytes = self.inner.max_storage_size,
					"event store full, dropping record"
				);
				return false;
			}

			match self.append_line(record, current) {
				Ok(()) => true,
				Err(e) => {
					error!(path = %self.inner.path.display(), error = %e, "failed to write event record");
					false
				}
			}
		})
	}

	/// Returns a cursor positioned at the head of the queue.
	pub fn iterator(&self) -> EventIterator {
		EventIterator {
			store: self.clone(),
			reader: None,
			peeked: None,
			lines_read: 0,
		}
	}

	/// Snapshot of every stored record, oldest first. Consumes nothing.
	pub fn read_all(&self) -> Vec<String> {
		self.with_lock(|| self.iterator().collect())
	}

	/// Current size of the backing file in bytes.
	pub fn size_bytes(&self) -> u64 {
		self.with_lock(|| self.size_on_disk().unwrap_or(0))
	}

	fn with_lock<T>(&self, f: impl FnOnce() -> T) -> T {
		let guard = self.inner.lock.lock();
		let out = f();
		ReentrantMutexGuard::unlock_fair(guard);
		out
	}

	fn size_on_disk(&self) -> io::Result<u64> {
		match std::fs::metadata(&self.inner.path) {
			Ok(meta) => Ok(meta.len()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
			Err(e) => Err(e),
		}
	}

	fn append_line(&self, record: &str, size_before: u64) -> io::Result<()> {
		std::fs::create_dir_all(&self.inner.dir)?;

		let mut opts = OpenOptions::new();
		opts.create(true).append(true);
		#[cfg(unix)]
		opts.mode(0o600);
		let mut file = opts.open(&self.inner.path)?;

		let mut line = Vec::with_capacity(record.len() + 1);
		line.extend_from_slice(record.as_bytes());
		line.push(b'\n');

		if let Err(e) = file.write_all(&line).and_then(|_| file.flush()) {
			// Never leave half a record behind.
			if let Err(truncate_err) = file.set_len(size_before) {
				error!(error = %truncate_err, "failed to roll back partial event write");
			}
			return Err(e);
		}

		Ok(())
	}

	/// Rewrites the backing file keeping only the records after the first
	/// `skip`. The original file is replaced only once the copy is complete.
	fn compact(&self, skip: usize) -> Result<(), StoreError> {
		self.compact_into(skip, open_tmp_file)
	}

	fn compact_into<W: CompactionSink>(
		&self,
		skip: usize,
		open: impl FnOnce(&Path) -> io::Result<W>,
	) -> Result<(), StoreError> {
		let source = match File::open(&self.inner.path) {
			Ok(file) => file,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(StoreError::io(&self.inner.path, e)),
		};

		let kept = match self.write_tail(source, skip, open) {
			Ok(kept) => kept,
			Err(e) => {
				self.discard_tmp();
				return Err(StoreError::io(&self.inner.tmp_path, e));
			}
		};

		if let Err(e) = std::fs::rename(&self.inner.tmp_path, &self.inner.path) {
			self.discard_tmp();
			return Err(StoreError::io(&self.inner.path, e));
		}

		debug!(removed = skip, kept, "compacted event store");
		Ok(())
	}

	fn write_tail<W: CompactionSink>(
		&self,
		source: File,
		skip: usize,
		open: impl FnOnce(&Path) -> io::Result<W>,
	) -> io::Result<usize> {
		let mut reader = BufReader::new(source);
		let mut writer = BufWriter::new(open(&self.inner.tmp_path)?);

		let mut seen = 0usize;
		let mut kept = 0usize;
		while let Some(record) = read_record(&mut reader)? {
			seen += 1;
			if seen <= skip {
				continue;
			}
			writer.write_all(record.as_bytes())?;
			writer.write_all(b"\n")?;
			kept += 1;
		}

		let mut sink = writer.into_inner().map_err(|e| e.into_error())?;
		sink.sync()?;
		Ok(kept)
	}

	fn discard_tmp(&self) {
		match std::fs::remove_file(&self.inner.tmp_path) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => {
				warn!(path = %self.inner.tmp_path.display(), error = %e, "failed to remove compaction file");
			}
		}
	}
}

/// Destination of a compaction rewrite.
trait CompactionSink: Write {
	/// Makes everything written so far durable.
	fn sync(&mut self) -> io::Result<()>;
}

impl CompactionSink for File {
	fn sync(&mut self) -> io::Result<()> {
		self.sync_all()
	}
}

fn open_tmp_file(path: &Path) -> io::Result<File> {
	let mut opts = OpenOptions::new();
	opts.write(true).create(true).truncate(true);
	#[cfg(unix)]
	opts.mode(0o600);
	opts.open(path)
}

/// Reads the next non-blank line, without its `\n` terminator.
fn read_record(reader: &mut impl BufRead) -> io::Result<Option<String>> {
	loop {
		let mut line = String::new();
		if reader.read_line(&mut line)? == 0 {
			return Ok(None);
		}
		if line.ends_with('\n') {
			line.pop();
		}
		if !line.is_empty() {
			return Ok(Some(line));
		}
	}
}

/// Forward-only cursor over an [`EventStore`] with one record of lookahead.
///
/// `lines_read` counts records handed out by `next` since the cursor was
/// created or last compacted; [`EventIterator::remove_read_events`] drops
/// exactly those records from the store.
pub struct EventIterator {
	store: EventStore,
	reader: Option<BufReader<File>>,
	peeked: Option<String>,
	lines_read: usize,
}

impl EventIterator {
	/// True if a record is buffered or one more can be read. Closes the read
	/// handle at end of file.
	pub fn has_next(&mut self) -> bool {
		if self.peeked.is_some() {
			return true;
		}

		let store = self.store.clone();
		store.with_lock(|| {
			if self.reader.is_none() {
				match self.open_reader() {
					Ok(Some(reader)) => self.reader = Some(reader),
					Ok(None) => return false,
					Err(e) => {
						error!(path = %self.store.path().display(), error = %e, "failed to open event store");
						return false;
					}
				}
			}

			let Some(reader) = self.reader.as_mut() else {
				return false;
			};

			match read_record(reader) {
				Ok(Some(record)) => {
					self.peeked = Some(record);
					true
				}
				Ok(None) => {
					self.reader = None;
					false
				}
				Err(e) => {
					error!(path = %self.store.path().display(), error = %e, "failed to read event store");
					self.reader = None;
					false
				}
			}
		})
	}

	/// Returns the next record without consuming it.
	pub fn peek(&mut self) -> Option<&str> {
		if self.has_next() {
			self.peeked.as_deref()
		} else {
			None
		}
	}

	/// Number of records consumed since creation or the last compaction.
	pub fn lines_read(&self) -> usize {
		self.lines_read
	}

	/// Deletes every record this cursor has consumed from the store.
	///
	/// On success the cursor is positioned at the head of the compacted
	/// store. On failure the backing file is left exactly as it was and the
	/// cursor restarts from its head.
	pub fn remove_read_events(&mut self) -> Result<(), StoreError> {
		let store = self.store.clone();
		store.with_lock(|| {
			self.reader = None;
			let result = store.compact(self.lines_read);
			self.lines_read = 0;
			self.peeked = None;
			result
		})
	}

	/// Opens the backing file and skips past already consumed records.
	fn open_reader(&self) -> io::Result<Option<BufReader<File>>> {
		let file = match File::open(self.store.path()) {
			Ok(file) => file,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e),
		};

		let mut reader = BufReader::new(file);
		for _ in 0..self.lines_read {
			if read_record(&mut reader)?.is_none() {
				break;
			}
		}
		Ok(Some(reader))
	}
}

impl Iterator for EventIterator {
	type Item = String;

	fn next(&mut self) -> Option<String> {
		if !self.has_next() {
			return None;
		}
		let record = self.peeked.take()?;
		self.lines_read += 1;
		Some(record)
	}
}
