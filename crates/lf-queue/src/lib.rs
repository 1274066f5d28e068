// SPDX-License-Identifier: MIT OR Apache-2.0
//! The event queue sitting between the processing pipeline and the flusher.
//!
//! [`Store`] is the persistence seam: [`MemoryStore`] is the default and
//! loses its contents on process exit, [`FileStore`] appends newline-
//! delimited JSON to a file and fsyncs on every write so a crash between
//! flushes doesn't silently drop telemetry. [`EventQueue`] is the handle the
//! rest of the SDK holds; it owns no locking of its own because both stores
//! already serialize their own access internally.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use lf_core::Event;
use lf_error::LangfuseError;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// A backing store for queued events.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append events to the tail of the queue, in order.
    async fn append(&self, events: Vec<Event>) -> Result<(), LangfuseError>;

    /// Remove and return up to `n` events from the head of the queue.
    async fn drain_up_to(&self, n: usize) -> Result<Vec<Event>, LangfuseError>;

    /// Re-insert events at the head of the queue, in their given order,
    /// ahead of anything already present. Used to carry over a batch that
    /// failed to ship.
    async fn prepend(&self, events: Vec<Event>) -> Result<(), LangfuseError>;

    /// The number of events currently queued.
    async fn len(&self) -> Result<usize, LangfuseError>;

    /// Whether the queue is currently empty.
    async fn is_empty(&self) -> Result<bool, LangfuseError> {
        Ok(self.len().await? == 0)
    }
}

/// An in-memory [`Store`]. The default; contents do not survive restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<VecDeque<Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append(&self, events: Vec<Event>) -> Result<(), LangfuseError> {
        let mut guard = self.events.lock().await;
        guard.extend(events);
        Ok(())
    }

    async fn drain_up_to(&self, n: usize) -> Result<Vec<Event>, LangfuseError> {
        let mut guard = self.events.lock().await;
        let take = n.min(guard.len());
        Ok(guard.drain(..take).collect())
    }

    async fn prepend(&self, events: Vec<Event>) -> Result<(), LangfuseError> {
        let mut guard = self.events.lock().await;
        for event in events.into_iter().rev() {
            guard.push_front(event);
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, LangfuseError> {
        Ok(self.events.lock().await.len())
    }
}

/// A durable [`Store`] backed by a newline-delimited JSON file. Every
/// mutation is followed by an `fsync` so a crash mid-flush loses at most the
/// in-flight batch, not the whole queue.
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), guard: Mutex::new(()) }
    }

    async fn read_all(&self) -> Result<Vec<Event>, LangfuseError> {
        match tokio::fs::File::open(&self.path).await {
            Ok(mut file) => {
                let mut contents = String::new();
                file.read_to_string(&mut contents)
                    .await
                    .map_err(|e| LangfuseError::new(lf_error::ErrorKind::Internal, "failed to read queue file").with_source(e))?;
                parse_lines(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(LangfuseError::new(lf_error::ErrorKind::Internal, "failed to open queue file").with_source(e)),
        }
    }

    async fn write_all(&self, events: &[Event]) -> Result<(), LangfuseError> {
        let mut contents = String::new();
        for event in events {
            let line = serde_json::to_string(event)
                .map_err(|e| LangfuseError::serialization("failed to serialize queued event").with_source(e))?;
            contents.push_str(&line);
            contents.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| LangfuseError::new(lf_error::ErrorKind::Internal, "failed to create queue directory").with_source(e))?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(|e| LangfuseError::new(lf_error::ErrorKind::Internal, "failed to open queue file").with_source(e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| LangfuseError::new(lf_error::ErrorKind::Internal, "failed to write queue file").with_source(e))?;
        file.sync_all()
            .await
            .map_err(|e| LangfuseError::new(lf_error::ErrorKind::Internal, "failed to fsync queue file").with_source(e))?;
        Ok(())
    }
}

fn parse_lines(contents: &str) -> Result<Vec<Event>, LangfuseError> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| LangfuseError::serialization("failed to parse persisted event").with_source(e))
        })
        .collect()
}

#[async_trait]
impl Store for FileStore {
    async fn append(&self, events: Vec<Event>) -> Result<(), LangfuseError> {
        let _guard = self.guard.lock().await;
        let mut existing = self.read_all().await?;
        existing.extend(events);
        self.write_all(&existing).await
    }

    async fn drain_up_to(&self, n: usize) -> Result<Vec<Event>, LangfuseError> {
        let _guard = self.guard.lock().await;
        let mut existing = self.read_all().await?;
        let take = n.min(existing.len());
        let drained: Vec<Event> = existing.drain(..take).collect();
        self.write_all(&existing).await?;
        Ok(drained)
    }

    async fn prepend(&self, events: Vec<Event>) -> Result<(), LangfuseError> {
        let _guard = self.guard.lock().await;
        let existing = self.read_all().await?;
        let mut combined = events;
        combined.extend(existing);
        self.write_all(&combined).await
    }

    async fn len(&self) -> Result<usize, LangfuseError> {
        let _guard = self.guard.lock().await;
        Ok(self.read_all().await?.len())
    }
}

/// The queue handle shared by the processing pipeline and the flusher.
#[derive(Clone)]
pub struct EventQueue {
    store: Arc<dyn Store>,
}

impl EventQueue {
    /// An in-memory queue; the default for a freshly built client.
    pub fn memory() -> Self {
        Self { store: Arc::new(MemoryStore::new()) }
    }

    /// A file-backed queue persisted at `path`.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self { store: Arc::new(FileStore::new(path.as_ref())) }
    }

    /// Build a queue over a caller-supplied store, e.g. in tests.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn append(&self, events: Vec<Event>) -> Result<(), LangfuseError> {
        self.store.append(events).await
    }

    pub async fn drain_up_to(&self, n: usize) -> Result<Vec<Event>, LangfuseError> {
        self.store.drain_up_to(n).await
    }

    pub async fn prepend(&self, events: Vec<Event>) -> Result<(), LangfuseError> {
        self.store.prepend(events).await
    }

    pub async fn len(&self) -> Result<usize, LangfuseError> {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> Result<bool, LangfuseError> {
        self.store.is_empty().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_core::{EventBody, TraceBody};

    fn trace_event(id: &str) -> Event {
        Event::new(EventBody::TraceCreate(TraceBody { id: id.into(), ..Default::default() }))
    }

    // ── MemoryStore ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn memory_append_and_drain_preserve_order() {
        let queue = EventQueue::memory();
        queue.append(vec![trace_event("a"), trace_event("b"), trace_event("c")]).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 3);
        let drained = queue.drain_up_to(2).await.unwrap();
        assert_eq!(drained.iter().map(|e| e.body.target_id()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_drain_up_to_caps_at_queue_length() {
        let queue = EventQueue::memory();
        queue.append(vec![trace_event("a")]).await.unwrap();
        let drained = queue.drain_up_to(10).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn memory_prepend_reinserts_ahead_of_existing_in_order() {
        let queue = EventQueue::memory();
        queue.append(vec![trace_event("c")]).await.unwrap();
        queue.prepend(vec![trace_event("a"), trace_event("b")]).await.unwrap();
        let drained = queue.drain_up_to(10).await.unwrap();
        assert_eq!(
            drained.iter().map(|e| e.body.target_id()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    // ── FileStore ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        {
            let queue = EventQueue::file(&path);
            queue.append(vec![trace_event("a"), trace_event("b")]).await.unwrap();
        }
        let reopened = EventQueue::file(&path);
        assert_eq!(reopened.len().await.unwrap(), 2);
        let drained = reopened.drain_up_to(10).await.unwrap();
        assert_eq!(drained.iter().map(|e| e.body.target_id()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn file_store_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.jsonl");
        let queue = EventQueue::file(&path);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_store_prepend_orders_ahead_of_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        let queue = EventQueue::file(&path);
        queue.append(vec![trace_event("c")]).await.unwrap();
        queue.prepend(vec![trace_event("a"), trace_event("b")]).await.unwrap();
        let drained = queue.drain_up_to(10).await.unwrap();
        assert_eq!(
            drained.iter().map(|e| e.body.target_id()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }
}
