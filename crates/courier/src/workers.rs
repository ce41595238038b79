//! Bounded pool of named threads running listener callbacks.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

pub(crate) const WORKERS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::workers");

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of worker threads draining a shared job queue.
///
/// A panicking job is logged and the worker carries on with the next one.
/// Dropping the pool closes the queue and joins every worker once the queued
/// jobs have run.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(size: usize) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let queue = Arc::new(Mutex::new(receiver));
        let workers = (0..size.max(1))
            .map(|index| {
                let queue = Arc::clone(&queue);
                thread::Builder::new()
                    .name(format!("courier-worker-{index}"))
                    .spawn(move || work(&queue))
            })
            .collect::<io::Result<Vec<_>>>()?;
        debug!(target: WORKERS_TARGET, threads = workers.len(), "worker pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues `job`; returns `false` once the pool is shutting down.
    pub(crate) fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        if sender.send(Box::new(job)).is_err() {
            error!(target: WORKERS_TARGET, "worker queue closed; job dropped");
            return false;
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A job may hold the last handle to the pool; never join ourselves.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!(target: WORKERS_TARGET, "worker thread terminated abnormally");
            }
        }
    }
}

fn work(queue: &Mutex<Receiver<Job>>) {
    loop {
        let next = {
            let receiver = queue.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.recv()
        };
        let Ok(job) = next else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                target: WORKERS_TARGET,
                panic = panic_message(payload.as_ref()),
                "listener callback panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
