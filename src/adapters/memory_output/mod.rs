//! In-memory output backend
//!
//! Keeps every published output as a list of frames instead of a file. Used
//! by `record --dry-run` and by tests, which can also inject open and write
//! failures at chosen points.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::model::{Frame, SegmentRecord};
use crate::error::{EventCamError, EventCamResult};
use crate::ports::{FrameWriter, OutputRequest, SegmentReader, WriterFactory};

#[derive(Debug, Default)]
struct Store {
    published: BTreeMap<PathBuf, Vec<Frame>>,
    finish_order: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Open calls (0-based) that fail
    open: Vec<usize>,
    /// Open call -> number of frames accepted before writes start failing
    write: HashMap<usize, u64>,
}

/// Writer factory publishing into a shared in-memory store
#[derive(Debug, Clone)]
pub struct MemoryWriterFactory {
    extension: String,
    store: Arc<Mutex<Store>>,
    faults: Arc<Mutex<Faults>>,
    opens: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for MemoryWriterFactory {
    fn default() -> Self {
        Self::new("frames")
    }
}

impl MemoryWriterFactory {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
            store: Arc::new(Mutex::new(Store::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
            opens: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the `call`-th open (0-based) fail
    pub fn fail_open(self, call: usize) -> Self {
        lock(&self.faults).open.push(call);
        self
    }

    /// Make the writer from the `call`-th open fail after `after` frames
    pub fn fail_write(self, call: usize, after: u64) -> Self {
        lock(&self.faults).write.insert(call, after);
        self
    }

    /// Number of open attempts so far
    pub fn open_calls(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Writers opened but neither finished nor dropped
    pub fn live_writers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Published outputs in the order they were finished
    pub fn published(&self) -> Vec<PathBuf> {
        lock(&self.store).finish_order.clone()
    }

    /// Frame indices stored under `path`
    pub fn indices(&self, path: &Path) -> Option<Vec<u64>> {
        lock(&self.store)
            .published
            .get(path)
            .map(|frames| frames.iter().map(Frame::index).collect())
    }

    /// Segment reader over this factory's store
    pub fn reader(&self) -> MemorySegmentReader {
        MemorySegmentReader {
            store: Arc::clone(&self.store),
        }
    }
}

impl WriterFactory for MemoryWriterFactory {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn open(&self, request: &OutputRequest) -> EventCamResult<Box<dyn FrameWriter>> {
        let call = self.opens.fetch_add(1, Ordering::SeqCst);
        let faults = lock(&self.faults);
        if faults.open.contains(&call) {
            return Err(EventCamError::IoError(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("injected open failure for {}", request.path.display()),
            )));
        }
        let fail_after = faults.write.get(&call).copied();
        drop(faults);

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWriter {
            path: request.path.clone(),
            frames: Vec::new(),
            fail_after,
            store: Arc::clone(&self.store),
            live: Arc::clone(&self.live),
        }))
    }
}

struct MemoryWriter {
    path: PathBuf,
    frames: Vec<Frame>,
    fail_after: Option<u64>,
    store: Arc<Mutex<Store>>,
    live: Arc<AtomicUsize>,
}

impl FrameWriter for MemoryWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame) -> EventCamResult<()> {
        if self.fail_after.is_some_and(|after| self.frames.len() as u64 >= after) {
            return Err(EventCamError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames.len() as u64
    }

    fn finish(mut self: Box<Self>) -> EventCamResult<PathBuf> {
        let frames = std::mem::take(&mut self.frames);
        let mut store = lock(&self.store);
        store.published.insert(self.path.clone(), frames);
        store.finish_order.push(self.path.clone());
        Ok(self.path.clone())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reads event ranges back out of outputs published to a `MemoryWriterFactory`
#[derive(Debug, Clone)]
pub struct MemorySegmentReader {
    store: Arc<Mutex<Store>>,
}

impl SegmentReader for MemorySegmentReader {
    fn copy_range(
        &self,
        segment: &SegmentRecord,
        range: Range<u64>,
        out: &mut dyn FrameWriter,
    ) -> EventCamResult<Option<u64>> {
        let frames: Vec<Frame> = {
            let store = lock(&self.store);
            let stored = store
                .published
                .get(&segment.path)
                .ok_or_else(|| EventCamError::SegmentReadFailed {
                    path: segment.path.display().to_string(),
                    message: "no such output".to_string(),
                })?;
            stored
                .iter()
                .filter(|f| range.contains(&f.index()))
                .cloned()
                .collect()
        };

        for frame in &frames {
            out.write_frame(frame)?;
        }
        Ok(frames.last().map(|f| f.index()))
    }
}
