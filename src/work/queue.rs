use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};

use crate::error::{CoordinatorError, Result};

/// A unit of work: a state transition executed exclusively on the queue thread.
///
/// Units receive the queue itself so they can schedule follow-up work, which
/// runs after the current unit returns.
pub type Work<S> = Box<dyn FnOnce(&mut S, &WorkQueue<S>) + Send + 'static>;

enum Envelope<S> {
    Run { name: &'static str, work: Work<S> },
    Stop,
}

struct Shared {
    closed: AtomicBool,
    worker: OnceLock<ThreadId>,
}

/// Submission handle for the single-threaded work queue.
///
/// Cloning is cheap; every clone feeds the same FIFO.
pub struct WorkQueue<S> {
    tx: mpsc::UnboundedSender<Envelope<S>>,
    shared: Arc<Shared>,
}

impl<S> Clone for WorkQueue<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Owner of the queue thread. Stopping it drains the queue and hands the state back.
pub struct WorkQueueWorker<S> {
    queue: WorkQueue<S>,
    thread: Option<JoinHandle<S>>,
}

impl<S: Send + 'static> WorkQueue<S> {
    /// Spawn the queue thread, moving `state` onto it.
    pub fn start(name: &str, state: S) -> std::io::Result<(WorkQueue<S>, WorkQueueWorker<S>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = WorkQueue {
            tx,
            shared: Arc::new(Shared {
                closed: AtomicBool::new(false),
                worker: OnceLock::new(),
            }),
        };

        let thread_queue = queue.clone();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(state, thread_queue, rx))?;

        tracing::debug!(queue = name, "Work queue started");
        Ok((
            queue.clone(),
            WorkQueueWorker {
                queue,
                thread: Some(thread),
            },
        ))
    }

    /// Enqueue a unit without waiting for it.
    pub fn submit<F>(&self, name: &'static str, work: F) -> Result<()>
    where
        F: FnOnce(&mut S, &WorkQueue<S>) + Send + 'static,
    {
        if self.is_closed() {
            return Err(CoordinatorError::WorkQueueStopped);
        }
        self.tx
            .send(Envelope::Run {
                name,
                work: Box::new(work),
            })
            .map_err(|_| CoordinatorError::WorkQueueStopped)
    }

    /// Enqueue a unit and wait asynchronously for its return value.
    pub async fn call<R, F>(&self, name: &'static str, work: F) -> Result<R>
    where
        F: FnOnce(&mut S, &WorkQueue<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let rx = self.submit_returning(name, work)?;
        rx.await.map_err(|_| CoordinatorError::WorkAborted)
    }

    /// Enqueue a unit and park the calling thread until it has run.
    ///
    /// Must not be called from inside an async runtime or from a unit of work.
    pub fn call_blocking<R, F>(&self, name: &'static str, work: F) -> Result<R>
    where
        F: FnOnce(&mut S, &WorkQueue<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.shared.worker.get() == Some(&std::thread::current().id()) {
            return Err(CoordinatorError::Internal(format!(
                "{name} waited on the work queue from inside a unit of work"
            )));
        }
        let rx = self.submit_returning(name, work)?;
        rx.blocking_recv()
            .map_err(|_| CoordinatorError::WorkAborted)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn submit_returning<R, F>(&self, name: &'static str, work: F) -> Result<oneshot::Receiver<R>>
    where
        F: FnOnce(&mut S, &WorkQueue<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(name, move |state, queue| {
            // The caller may have given up waiting.
            let _ = tx.send(work(state, queue));
        })?;
        Ok(rx)
    }
}

impl<S: Send + 'static> WorkQueueWorker<S> {
    /// Close the queue to new submissions, run everything submitted before the
    /// call, then join the thread and return the final state.
    ///
    /// Units submitted by other units while draining are rejected.
    pub fn stop(mut self) -> Option<S> {
        self.close();
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(state) => Some(state),
            Err(_) => {
                tracing::error!("Work queue thread panicked outside a unit of work");
                None
            }
        }
    }

    fn close(&self) {
        if !self.queue.shared.closed.swap(true, Ordering::AcqRel) {
            let _ = self.queue.tx.send(Envelope::Stop);
        }
    }
}

impl<S> Drop for WorkQueueWorker<S> {
    fn drop(&mut self) {
        if self.thread.is_some() && !self.queue.shared.closed.swap(true, Ordering::AcqRel) {
            let _ = self.queue.tx.send(Envelope::Stop);
        }
    }
}

fn run<S>(mut state: S, queue: WorkQueue<S>, mut rx: mpsc::UnboundedReceiver<Envelope<S>>) -> S {
    let _ = queue.shared.worker.set(std::thread::current().id());

    while let Some(envelope) = rx.blocking_recv() {
        match envelope {
            Envelope::Run { name, work } => {
                let outcome = catch_unwind(AssertUnwindSafe(|| work(&mut state, &queue)));
                if let Err(panic) = outcome {
                    // Any response sink owned by the unit was dropped during
                    // unwinding, so its caller observes the failure.
                    tracing::error!(unit = name, panic = %panic_message(&*panic), "Work unit panicked");
                }
            }
            Envelope::Stop => break,
        }
    }

    let discarded = {
        rx.close();
        let mut count = 0usize;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    };
    if discarded > 0 {
        tracing::warn!(discarded, "Work queue stopped with units still queued");
    }
    tracing::debug!("Work queue drained");
    state
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
