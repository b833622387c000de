use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::concurrent_stack::ConcurrentStack;

/// Type-erased value carried from a task to its finalizer.
pub type TaskPayload = Box<dyn Any + Send>;

type TaskFn = Box<dyn FnOnce() -> TaskPayload + Send>;
type FinalizerFn = Box<dyn FnOnce(TaskPayload) + Send>;

struct TaskEntry {
    group: u64,
    task: TaskFn,
    finalizer: Option<FinalizerFn>,
}

#[derive(Default)]
struct GroupState {
    /// Tasks not yet executed plus completed tasks whose finalizer has not
    /// run yet. The group is drained when this reaches zero.
    unfinished: usize,
    /// Finalizers of completed tasks, in completion order.
    ready_finalizers: VecDeque<(FinalizerFn, TaskPayload)>,
}

struct PoolShared {
    tasks: ConcurrentStack<TaskEntry>,
    shutdown: AtomicBool,
    /// Guards worker sleep; submissions notify under this lock so a worker
    /// re-checking the queue cannot miss a wakeup.
    sleep_lock: Mutex<()>,
    worker_cv: Condvar,
    groups: Mutex<HashMap<u64, GroupState>>,
    group_cv: Condvar,
}

impl PoolShared {
    fn complete_task(&self, group: u64, completion: Option<(FinalizerFn, TaskPayload)>) {
        {
            let mut groups = self.groups.lock().unwrap();
            let state = groups.get_mut(&group).unwrap();
            match completion {
                Some(ready) => state.ready_finalizers.push_back(ready),
                None => state.unfinished -= 1,
            }
        }
        self.group_cv.notify_all();
    }

    fn worker_loop(&self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if let Some(entry) = self.tasks.try_pop_front() {
                let TaskEntry {
                    group,
                    task,
                    finalizer,
                } = entry;
                match catch_unwind(AssertUnwindSafe(task)) {
                    Ok(result) => {
                        self.complete_task(group, finalizer.map(|f| (f, result)));
                    }
                    Err(_) => {
                        // Keep the group's bookkeeping sound; the finalizer
                        // of a panicked task never runs.
                        log::warn!("task in group {group} panicked; skipping its finalizer");
                        self.complete_task(group, None);
                    }
                }
                continue;
            }

            let mut sleep = self.sleep_lock.lock().unwrap();
            loop {
                if self.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if !self.tasks.is_empty() {
                    break;
                }
                sleep = self.worker_cv.wait(sleep).unwrap();
            }
        }
    }
}

/// A cloneable handle for submitting and draining work from inside tasks
/// and finalizers.
///
/// Carries no ownership of the worker threads; it stays valid for the
/// pool's lifetime and is cheap to clone into task closures.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    /// Enqueues a task whose result is handed to `finalizer`.
    ///
    /// The task runs on a worker thread; the finalizer runs later, on
    /// whichever thread drains the group via
    /// [`finalize_tasks`](Self::finalize_tasks).
    pub fn submit<R, T, F>(&self, group: u64, task: T, finalizer: F)
    where
        R: Send + 'static,
        T: FnOnce() -> R + Send + 'static,
        F: FnOnce(R) + Send + 'static,
    {
        let task: TaskFn = Box::new(move || Box::new(task()) as TaskPayload);
        let finalizer: FinalizerFn = Box::new(move |payload| {
            let value = payload
                .downcast::<R>()
                .expect("task result type does not match its finalizer");
            finalizer(*value);
        });
        self.submit_entry(group, task, Some(finalizer));
    }

    /// Enqueues a task with no finalizer.
    pub fn submit_detached<R, T>(&self, group: u64, task: T)
    where
        R: Send + 'static,
        T: FnOnce() -> R + Send + 'static,
    {
        let task: TaskFn = Box::new(move || Box::new(task()) as TaskPayload);
        self.submit_entry(group, task, None);
    }

    fn submit_entry(&self, group: u64, task: TaskFn, finalizer: Option<FinalizerFn>) {
        {
            let mut groups = self.shared.groups.lock().unwrap();
            groups.entry(group).or_default().unfinished += 1;
        }
        self.shared.tasks.push_front(TaskEntry {
            group,
            task,
            finalizer,
        });
        let _sleep = self.shared.sleep_lock.lock().unwrap();
        self.shared.worker_cv.notify_one();
    }

    /// Blocks until every task and finalizer of `group` has completed.
    ///
    /// Finalizers of the group run serially **on this thread**, in the
    /// order their tasks completed. Work submitted to the group while it
    /// drains (by its own tasks or finalizers) extends the drain; the call
    /// returns only once the group is empty. Other groups are unaffected.
    ///
    /// A task may drain a *different* group with a nested call, provided
    /// the pool has more workers than the nesting is deep; nesting inside a
    /// single-worker pool deadlocks (known limitation).
    pub fn finalize_tasks(&self, group: u64) {
        loop {
            let mut groups = self.shared.groups.lock().unwrap();
            let ready = loop {
                let state = match groups.get_mut(&group) {
                    Some(state) => state,
                    // Nothing was ever submitted to this group.
                    None => return,
                };
                if let Some(ready) = state.ready_finalizers.pop_front() {
                    break ready;
                }
                if state.unfinished == 0 {
                    return;
                }
                groups = self.shared.group_cv.wait(groups).unwrap();
            };
            drop(groups);

            let (finalizer, payload) = ready;
            finalizer(payload);

            {
                let mut groups = self.shared.groups.lock().unwrap();
                groups.get_mut(&group).unwrap().unfinished -= 1;
            }
            self.shared.group_cv.notify_all();
        }
    }
}

/// A pool of OS worker threads with grouped submit/drain semantics.
///
/// Tasks go onto a shared [`ConcurrentStack`]; execution order across
/// workers is unspecified. Each task belongs to a group (plain `u64`,
/// conventionally 0) and may carry a finalizer that receives the task's
/// result. Finalizers never run on workers: they run on the thread that
/// calls [`finalize_tasks`](ThreadPool::finalize_tasks) for their group,
/// which is what lets single-threaded state live in finalizers.
///
/// Dropping the pool asks workers to stop: running tasks finish, queued
/// tasks are dropped unexecuted and their finalizers never run.
///
/// # Example
///
/// ```
/// use loam_ecs::ThreadPool;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let pool = ThreadPool::new(3);
/// let done = Arc::new(AtomicU32::new(0));
///
/// for _ in 0..10 {
///     let done = Arc::clone(&done);
///     pool.submit(0, || 2u32, move |result| {
///         done.fetch_add(result, Ordering::Relaxed);
///     });
/// }
/// pool.finalize_tasks(0);
/// assert_eq!(done.load(Ordering::Relaxed), 20);
/// ```
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool with `worker_count` worker threads.
    pub fn new(worker_count: usize) -> Self {
        let mut pool = Self {
            shared: Arc::new(PoolShared {
                tasks: ConcurrentStack::new(),
                shutdown: AtomicBool::new(false),
                sleep_lock: Mutex::new(()),
                worker_cv: Condvar::new(),
                groups: Mutex::new(HashMap::new()),
                group_cv: Condvar::new(),
            }),
            workers: Vec::new(),
        };
        pool.spawn_threads(worker_count);
        pool
    }

    /// Spawns `count` additional worker threads.
    ///
    /// Deferred startup for pools created with [`ThreadPool::default`].
    pub fn spawn_threads(&mut self, count: usize) {
        let base = self.workers.len();
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("loam-worker-{}", base + index))
                .spawn(move || shared.worker_loop())
                .expect("failed to spawn worker thread");
            self.workers.push(handle);
        }
    }

    /// Returns the number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns a cloneable submission handle for use inside tasks.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// See [`PoolHandle::submit`].
    pub fn submit<R, T, F>(&self, group: u64, task: T, finalizer: F)
    where
        R: Send + 'static,
        T: FnOnce() -> R + Send + 'static,
        F: FnOnce(R) + Send + 'static,
    {
        self.handle().submit(group, task, finalizer);
    }

    /// See [`PoolHandle::submit_detached`].
    pub fn submit_detached<R, T>(&self, group: u64, task: T)
    where
        R: Send + 'static,
        T: FnOnce() -> R + Send + 'static,
    {
        self.handle().submit_detached(group, task);
    }

    /// See [`PoolHandle::finalize_tasks`].
    pub fn finalize_tasks(&self, group: u64) {
        self.handle().finalize_tasks(group);
    }
}

impl Default for ThreadPool {
    /// A pool with no workers yet; call
    /// [`spawn_threads`](Self::spawn_threads) before submitting.
    fn default() -> Self {
        Self::new(0)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let _sleep = self.shared.sleep_lock.lock().unwrap();
            self.shared.worker_cv.notify_all();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("worker thread panicked before shutdown");
            }
        }
    }
}
