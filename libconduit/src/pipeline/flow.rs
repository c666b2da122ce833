use log::*;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Every task the epics run, including the work they spawn. Aborted together when the engine shuts down.
#[derive(Clone, Default)]
pub struct TaskSet {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        // The set is only ever spawned into or aborted, so a poisoned lock still holds a usable set.
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        reap(&mut tasks);
        tasks.spawn(task);
    }

    /// The number of tasks still running.
    pub fn len(&self) -> usize {
        let mut tasks = self.lock();
        reap(&mut tasks);
        tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn abort_all(&self) {
        self.lock().abort_all();
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            if e.is_panic() {
                error!("An engine task panicked: {e}");
            }
        }
    }
}

/// Drop-if-busy: a trigger arriving while the previous unit of work is still running is discarded.
#[derive(Clone)]
pub struct Exhaust {
    busy: Arc<AtomicBool>,
    tasks: TaskSet,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Exhaust {
    pub fn new(tasks: &TaskSet) -> Self {
        Self { busy: Arc::default(), tasks: tasks.clone() }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Spawns `work` unless a previous unit is still in flight. Returns whether it was spawned.
    pub fn run<F>(&self, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            trace!("Exhaust: busy, dropping trigger");
            return false;
        }
        let guard = BusyGuard(self.busy.clone());
        self.tasks.spawn(async move {
            let _guard = guard;
            work.await;
        });
        true
    }
}

/// Strictly sequential processing: items are handled one at a time, in the order they were pushed.
pub struct Concat<T> {
    sender: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Concat<T> {
    /// Spawns the worker that feeds every pushed item through `handler`, awaiting each before taking the next.
    pub fn spawn<F, Fut>(tasks: &TaskSet, mut handler: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
        tasks.spawn(async move {
            while let Some(item) = receiver.recv().await {
                handler(item).await;
            }
        });
        Self { sender }
    }

    pub fn push(&self, item: T) {
        if self.sender.send(item).is_err() {
            warn!("Concat worker has stopped. Dropping item");
        }
    }
}

impl<T> Clone for Concat<T> {
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone() }
    }
}
