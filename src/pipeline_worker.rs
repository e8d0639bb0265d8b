// Queue-backed builders: frames and builds run on dedicated worker threads

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::builder::{BuilderFactory, CursorBuilder};
use crate::config::ConcurrencyConfig;
use crate::error::{CursorError, Result};
use crate::model::Hotspot;

pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Which queue encodes the frames of a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameQueuePolicy {
    Global,
    #[default]
    PerCursor,
    /// One queue per target directory.
    PerTheme,
}

/// Which queue runs `build()` for a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildQueuePolicy {
    /// The target's frame queue.
    #[default]
    Frame,
    Global,
    PerTheme,
    PerCursor,
}

enum Message {
    Run(Task),
    Fence(Sender<()>),
}

/// A serial task queue drained by one worker thread.
///
/// Tasks run in submission order. A failing task does not stop the queue;
/// the first failure is kept and reported by the next [`WorkQueue::await_idle`].
pub struct WorkQueue {
    name: String,
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<CursorError>>>,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, capacity: Option<usize>) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = match capacity {
            Some(cap) => crossbeam_channel::bounded(cap.max(1)),
            None => crossbeam_channel::unbounded(),
        };
        let failure = Arc::new(Mutex::new(None));
        let worker_failure = Arc::clone(&failure);
        let worker_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("queue {name}"))
            .spawn(move || run_worker(&worker_name, rx, &worker_failure))?;
        debug!("started queue {name}");
        Ok(Self {
            name,
            tx: Some(tx),
            handle: Some(handle),
            failure,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `task`; blocks only while a bounded queue is full.
    pub fn submit(&self, task: Task) -> Result<()> {
        self.sender()?
            .send(Message::Run(task))
            .map_err(|_| CursorError::state(format!("queue {} has stopped", self.name)))
    }

    /// Waits until every task submitted so far has run, then reports the
    /// first failure among them.
    pub fn await_idle(&self) -> Result<()> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let stopped = || CursorError::state(format!("queue {} has stopped", self.name));
        self.sender()?
            .send(Message::Fence(reply_tx))
            .map_err(|_| stopped())?;
        reply_rx.recv().map_err(|_| stopped())?;
        self.take_failure()
    }

    /// Drains the queue, stops the worker and reports any pending failure.
    pub fn shutdown(mut self) -> Result<()> {
        self.close()?;
        self.take_failure()
    }

    fn sender(&self) -> Result<&Sender<Message>> {
        self.tx
            .as_ref()
            .ok_or_else(|| CursorError::state(format!("queue {} is closed", self.name)))
    }

    fn take_failure(&self) -> Result<()> {
        match lock(&self.failure)?.take() {
            Some(source) => Err(CursorError::Deferred {
                queue: self.name.clone(),
                source: Box::new(source),
            }),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return Ok(());
            }
            handle
                .join()
                .map_err(|_| {
                    CursorError::state(format!("worker of queue {} panicked", self.name))
                })?;
        }
        Ok(())
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{e}");
        }
    }
}

fn run_worker(name: &str, rx: Receiver<Message>, failure: &Mutex<Option<CursorError>>) {
    for message in rx {
        let task = match message {
            Message::Run(task) => task,
            Message::Fence(reply) => {
                let _ = reply.send(());
                continue;
            }
        };
        let result = panic::catch_unwind(AssertUnwindSafe(task))
            .unwrap_or_else(|_| Err(CursorError::state("task panicked")));
        if let Err(e) = result {
            warn!("task on queue {name} failed: {e}");
            match failure.lock() {
                Ok(mut slot) if slot.is_none() => *slot = Some(e),
                Ok(_) => {}
                Err(_) => warn!("failure slot of queue {name} is poisoned"),
            }
        }
    }
    debug!("queue {name} stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| CursorError::state("pipeline lock poisoned"))
}

type SharedBuilder = Arc<Mutex<Option<Box<dyn CursorBuilder>>>>;

/// Handle to a builder whose work runs on queues.
///
/// Clones share the same underlying builder, so several producer threads can
/// feed one target. Calls return once the work is queued.
#[derive(Clone)]
pub struct ConcurrentBuilder {
    target: PathBuf,
    inner: SharedBuilder,
    frame_queue: Arc<WorkQueue>,
    build_queue: Option<Arc<WorkQueue>>,
}

impl ConcurrentBuilder {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn submit_frame(
        &self,
        frame: u32,
        nominal_size: u32,
        hotspot: Hotspot,
        image: RgbaImage,
        delay_ms: u32,
    ) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let target = self.target.clone();
        self.frame_queue.submit(Box::new(move || -> Result<()> {
            match lock(&inner)?.as_mut() {
                Some(builder) => builder.add_frame(frame, nominal_size, hotspot, image, delay_ms),
                None => Err(CursorError::state(format!(
                    "frame {frame} for {} arrived after build",
                    target.display()
                ))),
            }
        }))
    }

    /// Queues the build behind every frame submitted so far.
    pub fn submit_build(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let target = self.target.clone();
        let build_queue = self.build_queue.clone();
        self.frame_queue.submit(Box::new(move || -> Result<()> {
            let builder = lock(&inner)?.take().ok_or_else(|| {
                CursorError::state(format!("{} was already built", target.display()))
            })?;
            match build_queue {
                Some(queue) => queue.submit(Box::new(move || builder.build())),
                None => builder.build(),
            }
        }))
    }
}

impl CursorBuilder for ConcurrentBuilder {
    fn add_frame(
        &mut self,
        frame: u32,
        nominal_size: u32,
        hotspot: Hotspot,
        image: RgbaImage,
        delay_ms: u32,
    ) -> Result<()> {
        self.submit_frame(frame, nominal_size, hotspot, image, delay_ms)
    }

    fn build(self: Box<Self>) -> Result<()> {
        self.submit_build()
    }
}

/// Wraps a factory so that frame encoding and builds run on worker queues.
///
/// Builder acquisition itself stays on the calling thread, so acquisition
/// errors surface immediately. Each target maps to one frame queue for the
/// lifetime of the factory.
pub struct ConcurrentFactory<F: BuilderFactory> {
    inner: F,
    frame_policy: FrameQueuePolicy,
    build_policy: BuildQueuePolicy,
    capacity: Option<usize>,
    frame_queues: BTreeMap<String, Arc<WorkQueue>>,
    build_queues: BTreeMap<String, Arc<WorkQueue>>,
}

impl<F: BuilderFactory> ConcurrentFactory<F> {
    pub fn new(inner: F, frame_policy: FrameQueuePolicy, build_policy: BuildQueuePolicy) -> Self {
        Self {
            inner,
            frame_policy,
            build_policy,
            capacity: None,
            frame_queues: BTreeMap::new(),
            build_queues: BTreeMap::new(),
        }
    }

    pub fn from_config(inner: F, config: &ConcurrencyConfig) -> Self {
        Self::new(inner, config.frame_queue, config.build_queue)
            .with_capacity(config.queue_capacity)
    }

    pub fn with_capacity(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn frame_queue_count(&self) -> usize {
        self.frame_queues.len()
    }

    pub fn build_queue_count(&self) -> usize {
        self.build_queues.len()
    }

    pub fn builder_for_shared(
        &mut self,
        target: &Path,
        update_existing: bool,
        frame_delay_hint: Option<u32>,
    ) -> Result<ConcurrentBuilder> {
        let inner = self
            .inner
            .builder_for(target, update_existing, frame_delay_hint)?;

        // queues are keyed on what gets written, not on how the caller named it
        let output = self.inner.output_path(target, frame_delay_hint);
        let frame_key = match self.frame_policy {
            FrameQueuePolicy::Global => "frames".to_string(),
            FrameQueuePolicy::PerCursor => format!("frames:{}", output.display()),
            FrameQueuePolicy::PerTheme => format!("frames:{}", theme_key(&output).display()),
        };
        let build_key = match self.build_policy {
            BuildQueuePolicy::Frame => None,
            BuildQueuePolicy::Global => Some("builds".to_string()),
            BuildQueuePolicy::PerTheme => Some(format!("builds:{}", theme_key(&output).display())),
            BuildQueuePolicy::PerCursor => Some(format!("builds:{}", output.display())),
        };

        let frame_queue = queue(&mut self.frame_queues, frame_key, self.capacity)?;
        let build_queue = match build_key {
            Some(key) => Some(queue(&mut self.build_queues, key, self.capacity)?),
            None => None,
        };
        Ok(ConcurrentBuilder {
            target: target.to_path_buf(),
            inner: Arc::new(Mutex::new(Some(inner))),
            frame_queue,
            build_queue,
        })
    }

    /// Waits for every queue, finalizes the wrapped factory and stops the
    /// workers, returning the wrapped factory.
    pub fn shutdown(mut self) -> Result<F> {
        let result = self.finalize_themes();
        self.frame_queues.clear();
        self.build_queues.clear();
        result.map(|()| self.inner)
    }
}

impl<F: BuilderFactory> BuilderFactory for ConcurrentFactory<F> {
    fn builder_for(
        &mut self,
        target: &Path,
        update_existing: bool,
        frame_delay_hint: Option<u32>,
    ) -> Result<Box<dyn CursorBuilder>> {
        let builder = self.builder_for_shared(target, update_existing, frame_delay_hint)?;
        Ok(Box::new(builder))
    }

    fn output_path(&self, target: &Path, frame_delay_hint: Option<u32>) -> PathBuf {
        self.inner.output_path(target, frame_delay_hint)
    }

    /// Frame queues drain first since their last tasks hand builds to the
    /// build queues. The wrapped factory is finalized even after a failure;
    /// the first failure is returned.
    fn finalize_themes(&mut self) -> Result<()> {
        let mut first = None;
        for queue in self.frame_queues.values().chain(self.build_queues.values()) {
            if let Err(e) = queue.await_idle() {
                first.get_or_insert(e);
            }
        }
        if let Err(e) = self.inner.finalize_themes() {
            first.get_or_insert(e);
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn theme_key(target: &Path) -> &Path {
    target.parent().unwrap_or(Path::new(""))
}

fn queue(
    queues: &mut BTreeMap<String, Arc<WorkQueue>>,
    key: String,
    capacity: Option<usize>,
) -> Result<Arc<WorkQueue>> {
    if let Some(queue) = queues.get(&key) {
        return Ok(Arc::clone(queue));
    }
    let queue = Arc::new(WorkQueue::new(key.clone(), capacity)?);
    queues.insert(key, Arc::clone(&queue));
    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CursorBuilderFactory;
    use crate::config::BuildConfig;
    use crate::formats::test_support::frame_image;
    use crate::model::STATIC_FRAME;
    use rand::seq::SliceRandom;
    use rayon::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    const SIZES: [u32; 2] = [24, 32];

    fn config(format: &str) -> BuildConfig {
        BuildConfig {
            output_format: format.to_string(),
            ..BuildConfig::default()
        }
    }

    fn frames(count: u32) -> Vec<(u32, u32)> {
        (1..=count)
            .flat_map(|frame| SIZES.iter().map(move |&size| (frame, size)))
            .collect()
    }

    fn hotspot(size: u32) -> Hotspot {
        Hotspot::new(size / 4, size / 3)
    }

    fn build_sync(format: &str, target: &Path, count: u32) {
        let mut factory = CursorBuilderFactory::new(&config(format)).unwrap();
        let mut builder = factory.builder_for(target, false, Some(60)).unwrap();
        for (frame, size) in frames(count) {
            builder
                .add_frame(frame, size, hotspot(size), frame_image(size, frame), 60)
                .unwrap();
        }
        builder.build().unwrap();
        factory.finalize_themes().unwrap();
    }

    #[test]
    fn test_queue_runs_in_order() {
        let queue = WorkQueue::new("order", Some(2)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            queue
                .submit(Box::new(move || -> Result<()> {
                    seen.lock().unwrap().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        queue.await_idle().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
        queue.shutdown().unwrap();
    }

    #[test]
    fn test_failure_is_deferred_not_fatal() {
        let queue = WorkQueue::new("failing", None).unwrap();
        let ran = Arc::new(Mutex::new(0));
        queue
            .submit(Box::new(|| -> Result<()> { Err(CursorError::format("bad frame")) }))
            .unwrap();
        queue
            .submit(Box::new(|| -> Result<()> { Err(CursorError::state("second failure")) }))
            .unwrap();
        let counter = Arc::clone(&ran);
        queue
            .submit(Box::new(move || -> Result<()> {
                *counter.lock().unwrap() += 1;
                Ok(())
            }))
            .unwrap();

        let err = queue.await_idle().unwrap_err();
        assert!(matches!(err, CursorError::Deferred { ref queue, .. } if queue == "failing"));
        assert!(matches!(err.root(), CursorError::Format(_)));
        assert_eq!(*ran.lock().unwrap(), 1);

        queue.await_idle().unwrap();
    }

    #[test]
    fn test_panicking_task_is_reported() {
        let queue = WorkQueue::new("panics", None).unwrap();
        queue
            .submit(Box::new(|| -> Result<()> { panic!("boom") }))
            .unwrap();
        assert!(queue.shutdown().is_err());
    }

    #[test]
    fn test_shuffled_producers_match_sync_build() {
        let cases = [
            (
                "xcursor",
                "left_ptr",
                "left_ptr",
                FrameQueuePolicy::PerCursor,
                BuildQueuePolicy::Frame,
            ),
            (
                "windows",
                "wait",
                "wait.ani",
                FrameQueuePolicy::Global,
                BuildQueuePolicy::Global,
            ),
            (
                "mousecape",
                "wait",
                "theme.cape",
                FrameQueuePolicy::PerTheme,
                BuildQueuePolicy::PerCursor,
            ),
        ];
        for (format, name, written, frame_policy, build_policy) in cases {
            let sync_dir = tempdir().unwrap();
            let sync_target = sync_dir.path().join("theme").join(name);
            build_sync(format, &sync_target, 6);

            let async_dir = tempdir().unwrap();
            let async_target = async_dir.path().join("theme").join(name);
            let inner = CursorBuilderFactory::new(&config(format)).unwrap();
            let mut factory = ConcurrentFactory::new(inner, frame_policy, build_policy)
                .with_capacity(Some(4));
            let builder = factory
                .builder_for_shared(&async_target, false, Some(60))
                .unwrap();

            let mut work = frames(6);
            work.shuffle(&mut rand::thread_rng());
            work.par_iter().for_each(|&(frame, size)| {
                builder
                    .submit_frame(frame, size, hotspot(size), frame_image(size, frame), 60)
                    .unwrap();
            });
            builder.submit_build().unwrap();
            factory.shutdown().unwrap();

            let expected = fs::read(sync_dir.path().join("theme").join(written)).unwrap();
            let actual = fs::read(async_dir.path().join("theme").join(written)).unwrap();
            assert!(expected == actual, "{format} output differs");
        }
    }

    #[test]
    fn test_animation_gap_surfaces_on_finalize() {
        let dir = tempdir().unwrap();
        let inner = CursorBuilderFactory::new(&config("windows")).unwrap();
        let mut factory =
            ConcurrentFactory::new(inner, FrameQueuePolicy::PerCursor, BuildQueuePolicy::Global);
        let mut builder = factory
            .builder_for(&dir.path().join("busy"), false, Some(100))
            .unwrap();
        for frame in [1, 2, 4] {
            builder
                .add_frame(frame, 32, hotspot(32), frame_image(32, frame), 100)
                .unwrap();
        }
        builder.build().unwrap();

        let err = factory.finalize_themes().unwrap_err();
        assert!(matches!(err, CursorError::Deferred { .. }));
        assert!(matches!(err.root(), CursorError::State(_)));
        assert!(!dir.path().join("busy.ani").exists());
    }

    #[test]
    fn test_unsupported_update_is_eager() {
        let dir = tempdir().unwrap();
        let inner = CursorBuilderFactory::new(&config("mousecape")).unwrap();
        let mut factory =
            ConcurrentFactory::new(inner, FrameQueuePolicy::Global, BuildQueuePolicy::Frame);
        let err = factory
            .builder_for(&dir.path().join("left_ptr"), true, None)
            .err()
            .unwrap();
        assert!(matches!(err, CursorError::Unsupported(_)));
        assert_eq!(factory.frame_queue_count(), 0);
    }

    #[test]
    fn test_queue_assignment() {
        let dir = tempdir().unwrap();
        let targets = [
            dir.path().join("a").join("left_ptr"),
            dir.path().join("a").join("text"),
            dir.path().join("b").join("left_ptr"),
        ];
        let expected = [
            (FrameQueuePolicy::Global, BuildQueuePolicy::Frame, 1, 0),
            (FrameQueuePolicy::PerTheme, BuildQueuePolicy::Global, 2, 1),
            (FrameQueuePolicy::PerCursor, BuildQueuePolicy::PerTheme, 3, 2),
            (FrameQueuePolicy::Global, BuildQueuePolicy::PerCursor, 1, 3),
        ];
        for (frame_policy, build_policy, frame_queues, build_queues) in expected {
            let inner = CursorBuilderFactory::new(&config("xcursor")).unwrap();
            let mut factory = ConcurrentFactory::new(inner, frame_policy, build_policy);
            for target in &targets {
                let builder = factory.builder_for_shared(target, false, None).unwrap();
                builder
                    .submit_frame(STATIC_FRAME, 24, hotspot(24), frame_image(24, 0), 0)
                    .unwrap();
                builder.submit_build().unwrap();
            }
            assert_eq!(factory.frame_queue_count(), frame_queues);
            assert_eq!(factory.build_queue_count(), build_queues);
            factory.shutdown().unwrap();
        }
    }

    #[test]
    fn test_targets_naming_one_file_share_a_queue() {
        let dir = tempdir().unwrap();
        let inner = CursorBuilderFactory::new(&config("windows")).unwrap();
        let mut factory =
            ConcurrentFactory::new(inner, FrameQueuePolicy::PerCursor, BuildQueuePolicy::PerCursor);
        for target in ["busy", "busy.ani"] {
            let builder = factory
                .builder_for_shared(&dir.path().join(target), false, Some(50))
                .unwrap();
            assert_eq!(builder.target(), dir.path().join(target));
        }
        // a static cursor of the same name is a different file
        factory
            .builder_for_shared(&dir.path().join("busy"), false, None)
            .unwrap();
        assert_eq!(factory.frame_queue_count(), 2);
        assert_eq!(factory.build_queue_count(), 2);
        assert_eq!(
            factory.output_path(&dir.path().join("busy"), Some(50)),
            dir.path().join("busy.ani")
        );
        factory.shutdown().unwrap();
    }

    #[test]
    fn test_mousecape_aliases_share_a_queue() {
        let dir = tempdir().unwrap();
        let theme = dir.path().join("Snow");
        let inner = CursorBuilderFactory::new(&config("mousecape")).unwrap();
        let mut factory =
            ConcurrentFactory::new(inner, FrameQueuePolicy::PerCursor, BuildQueuePolicy::Frame);
        factory
            .builder_for_shared(&theme.join("left_ptr"), false, None)
            .unwrap();
        factory
            .builder_for_shared(&theme.join("com.apple.coregraphics.Arrow"), false, None)
            .unwrap();
        factory
            .builder_for_shared(&theme.join("wait"), false, None)
            .unwrap();
        assert_eq!(factory.frame_queue_count(), 2);
        factory.shutdown().unwrap();
    }
}
