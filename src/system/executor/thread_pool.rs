use futures::Future;
use std::sync::Arc;

#[cfg(not(feature = "threadpool-tokio"))]
use futures::executor::{ThreadPool, ThreadPoolBuilder};

#[cfg(not(feature = "threadpool-tokio"))]
pub(super) struct ThreadPoolWrapper {
    inner: ThreadPool,
}

#[cfg(all(feature = "threadpool-tokio"))]
use tokio::runtime::{Builder, Runtime};

#[cfg(all(feature = "threadpool-tokio"))]
pub(super) struct ThreadPoolWrapper {
    // None once shut down.
    inner: Option<Runtime>,
}

fn pool_prefix(name_prefix: Option<&str>) -> String {
    let mut pool_prefix = "locus_pool_worker_".to_owned();
    if let Some(prefix) = name_prefix {
        pool_prefix += prefix;
    }
    pool_prefix
}

fn pool_threads(pool_size: Option<usize>) -> usize {
    pool_size
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
        .max(1)
}

#[cfg(not(feature = "threadpool-tokio"))]
impl ThreadPoolWrapper {
    pub(super) fn new(
        pool_size: Option<usize>,
        name_prefix: Option<&str>,
    ) -> Result<Arc<Self>, std::io::Error> {
        let mut builder = ThreadPoolBuilder::new();
        builder.name_prefix(pool_prefix(name_prefix));
        builder.pool_size(pool_threads(pool_size));
        let pool = builder.create()?;

        Ok(Arc::new(Self { inner: pool }))
    }

    pub(super) fn spawn<Fut>(&self, task: Fut)
    where
        Fut: 'static + Future<Output = ()> + Send,
    {
        self.inner.spawn_ok(task);
    }
}

#[cfg(all(feature = "threadpool-tokio"))]
impl ThreadPoolWrapper {
    pub(super) fn new(
        pool_size: Option<usize>,
        name_prefix: Option<&str>,
    ) -> Result<Arc<Self>, std::io::Error> {
        let tokio_rt = Builder::new_multi_thread()
            .worker_threads(pool_threads(pool_size))
            .thread_name(pool_prefix(name_prefix))
            .build()?;

        Ok(Arc::new(Self {
            inner: Some(tokio_rt),
        }))
    }

    pub(super) fn spawn<Fut>(&self, task: Fut)
    where
        Fut: 'static + Future<Output = ()> + Send,
    {
        if let Some(tokio_rt) = &self.inner {
            tokio_rt.spawn(task);
        }
    }
}

// The last reference may be released by one of the pool's own workers, where a
// blocking drop of the tokio runtime panics.
#[cfg(all(feature = "threadpool-tokio"))]
impl Drop for ThreadPoolWrapper {
    fn drop(&mut self) {
        if let Some(tokio_rt) = self.inner.take() {
            tokio_rt.shutdown_background();
        }
    }
}
