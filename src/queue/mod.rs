//! Job/result queues used by every statistical task
//!
//! Contract: push every job, call [`WorkQueue::done_pushing`], then drain
//! with [`WorkQueue::get_result`] until it returns `None`. Results come back
//! in no particular order.
//!
//! Two implementations: [`SynchronousQueue`] runs each job inside
//! `push_work`, and [`WorkerPool`] fans jobs out to long-lived threads.
//! A job stuck inside a provider blocks its worker (and the drain) forever;
//! there is no cancellation or timeout.

mod pool;

pub use pool::WorkerPool;

use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;

/// Push/drain contract shared by both queue kinds
pub trait WorkQueue<J, R> {
    /// Enqueue one unit of work
    ///
    /// # Errors
    /// Returns [`Error::QueueClosed`] after [`Self::done_pushing`]
    fn push_work(&mut self, job: J) -> Result<()>;

    /// Signal that no more jobs will be pushed
    fn done_pushing(&mut self);

    /// Next completed result, `None` once everything was drained
    ///
    /// Blocks while workers are still running.
    fn get_result(&mut self) -> Option<R>;

    /// Jobs that never produced a result, known once drained
    ///
    /// Non-zero only when a worker died mid-job.
    fn lost_results(&self) -> usize {
        0
    }

    /// [`Error::LostResults`] if the drained queue lost any job
    ///
    /// # Errors
    /// Returns [`Error::LostResults`] naming `task` and the shortfall
    fn ensure_complete(&self, task: &str) -> Result<()> {
        match self.lost_results() {
            0 => Ok(()),
            lost => Err(Error::LostResults {
                task: task.to_string(),
                lost,
            }),
        }
    }
}

/// Turns a job into a result (one instance per worker)
pub trait JobRunner<J, R> {
    /// Execute one job
    fn run(&mut self, job: J) -> R;
}

impl<J, R, F: FnMut(J) -> R> JobRunner<J, R> for F {
    fn run(&mut self, job: J) -> R {
        self(job)
    }
}

/// Builds a runner inside each worker
pub type RunnerFactory<J, R> = Arc<dyn Fn() -> Box<dyn JobRunner<J, R>> + Send + Sync>;

/// Wrap a runner constructor into a shareable factory
pub fn runner_factory<J, R, F>(make: F) -> RunnerFactory<J, R>
where
    F: Fn() -> Box<dyn JobRunner<J, R>> + Send + Sync + 'static,
{
    Arc::new(make)
}

/// Single-worker queue: jobs run synchronously in `push_work`
pub struct SynchronousQueue<J, R> {
    runner: Box<dyn JobRunner<J, R>>,
    results: VecDeque<R>,
    closed: bool,
}

impl<J, R> SynchronousQueue<J, R> {
    /// Queue around one runner
    #[must_use]
    pub fn new(runner: Box<dyn JobRunner<J, R>>) -> Self {
        Self {
            runner,
            results: VecDeque::new(),
            closed: false,
        }
    }
}

impl<J, R> WorkQueue<J, R> for SynchronousQueue<J, R> {
    fn push_work(&mut self, job: J) -> Result<()> {
        if self.closed {
            return Err(Error::QueueClosed);
        }
        let result = self.runner.run(job);
        self.results.push_back(result);
        Ok(())
    }

    fn done_pushing(&mut self) {
        self.closed = true;
    }

    fn get_result(&mut self) -> Option<R> {
        self.results.pop_front()
    }
}

/// Synchronous queue for one worker, thread pool otherwise
#[must_use]
pub fn build_queue<J, R>(n_workers: usize, factory: RunnerFactory<J, R>) -> Box<dyn WorkQueue<J, R>>
where
    J: Send + 'static,
    R: Send + 'static,
{
    if n_workers <= 1 {
        Box::new(SynchronousQueue::new(factory()))
    } else {
        Box::new(WorkerPool::new(n_workers, factory))
    }
}
