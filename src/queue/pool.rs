//! Thread pool behind [`WorkQueue`]
//!
//! Jobs go through an unbounded crossbeam channel shared by every worker.
//! Closing is done by dropping the only job sender: each worker sees the
//! disconnection exactly once after the channel is drained and exits. The
//! result channel disconnects when the last worker exits, which is how
//! `get_result` knows the pool is drained.

use super::{RunnerFactory, WorkQueue};
use crate::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Fixed-size pool of long-lived worker threads
pub struct WorkerPool<J, R> {
    jobs: Option<Sender<J>>,
    results: Receiver<R>,
    workers: Vec<JoinHandle<()>>,
    pushed: usize,
    received: usize,
    lost: usize,
}

impl<J, R> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Spawn `n_workers` threads (at least one), each with its own runner
    #[must_use]
    pub fn new(n_workers: usize, factory: RunnerFactory<J, R>) -> Self {
        let n_workers = n_workers.max(1);
        let (job_tx, job_rx) = unbounded::<J>();
        let (result_tx, result_rx) = unbounded::<R>();

        let workers = (0..n_workers)
            .map(|id| {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let factory = factory.clone();
                thread::spawn(move || {
                    let mut runner = factory();
                    let mut done = 0usize;
                    while let Ok(job) = jobs.recv() {
                        if results.send(runner.run(job)).is_err() {
                            break;
                        }
                        done += 1;
                    }
                    debug!(worker = id, jobs = done, "worker exiting");
                })
            })
            .collect();

        debug!(workers = n_workers, "worker pool started");
        Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
            pushed: 0,
            received: 0,
            lost: 0,
        }
    }

    /// Number of worker threads still attached
    #[must_use]
    pub fn n_workers(&self) -> usize {
        self.workers.len()
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("a worker thread panicked; its in-flight job produced no result");
            }
        }
    }
}

impl<J, R> WorkQueue<J, R> for WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    fn push_work(&mut self, job: J) -> Result<()> {
        let sender = self.jobs.as_ref().ok_or(Error::QueueClosed)?;
        sender.send(job).map_err(|_| Error::QueueClosed)?;
        self.pushed += 1;
        Ok(())
    }

    fn done_pushing(&mut self) {
        self.jobs = None;
    }

    fn get_result(&mut self) -> Option<R> {
        if let Ok(result) = self.results.recv() {
            self.received += 1;
            return Some(result);
        }
        self.join_workers();
        self.lost = self.pushed - self.received;
        if self.lost > 0 {
            warn!(
                pushed = self.pushed,
                received = self.received,
                "worker pool drained with missing results"
            );
        }
        None
    }

    fn lost_results(&self) -> usize {
        self.lost
    }
}

impl<J, R> Drop for WorkerPool<J, R> {
    fn drop(&mut self) {
        self.jobs = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
