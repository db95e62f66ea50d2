use futures::Future;
use log::trace;
use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

mod thread_pool;
use thread_pool::*;

/// Opaque reference to the tracked task a worker is currently running.
///
/// Written by the termination-tracking layer, `locus` itself only clears it.
pub type TaskHandle = Arc<dyn Any + Send + Sync>;

thread_local! {
    static WORKER_SLOT: WorkerSlot = WorkerSlot::new();
}

/// Per-worker "current task" slot.
///
/// Every pool thread owns one, units of work submitted through the scheduling
/// hook get a reference to the slot of the worker running them.
pub struct WorkerSlot {
    current: RefCell<Option<TaskHandle>>,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            current: RefCell::new(None),
        }
    }

    /// Mark the worker as running `task`, returning the previous task.
    pub fn set(&self, task: TaskHandle) -> Option<TaskHandle> {
        self.current.replace(Some(task))
    }

    /// Mark the worker as running untracked work.
    pub fn clear(&self) -> Option<TaskHandle> {
        self.current.take()
    }

    pub fn current(&self) -> Option<TaskHandle> {
        self.current.borrow().clone()
    }

    pub fn is_tracked(&self) -> bool {
        self.current.borrow().is_some()
    }
}

/// The worker pool executing units of work for a place.
pub(crate) struct ThreadPoolExecutor {
    pool: Arc<ThreadPoolWrapper>,
}

impl ThreadPoolExecutor {
    pub(crate) fn new(
        pool_size: Option<usize>,
        name_prefix: Option<&str>,
    ) -> Result<Self, std::io::Error> {
        let pool = ThreadPoolWrapper::new(pool_size, name_prefix)?;
        Ok(Self { pool })
    }

    /// Submit a unit of work for execution on one of the pool workers.
    pub(crate) fn submit_local<F>(&self, work: F)
    where
        F: FnOnce(&WorkerSlot) + Send + 'static,
    {
        self.spawn_ok(async move {
            WORKER_SLOT.with(|slot| work(slot));
        });
    }

    /// Spawn a future in the executor.
    pub(crate) fn spawn_ok<Fut>(&self, task: Fut)
    where
        Fut: 'static + Future<Output = ()> + Send,
    {
        trace!("pool_executor_spawn");
        self.pool.spawn(task);
    }
}
