//! Background threads feeding the main context.
//!
//! - `Worker`: one thread draining a FIFO job queue; each job's result is
//!   handed to a continuation that runs on the glib main context
//! - `Updater`: runs a progress iterator on its own thread and reports every
//!   item on the main context, then a final callback
//!
//! Continuations never run on the background threads, so they may hold
//! `Rc`/`RefCell` state owned by the main loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use tracing::{debug, error, trace, warn};

/// How often the worker checks for shutdown while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

type Job = Box<dyn FnOnce() + Send>;

/// Single background thread running blocking jobs in submission order.
pub struct Worker {
    context: glib::MainContext,
    job_tx: Sender<Job>,
    job_rx: Receiver<Job>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker; continuations run on `context`.
    pub fn new(context: &glib::MainContext) -> Result<Self> {
        let (job_tx, job_rx) = flume::unbounded::<Job>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let rx = job_rx.clone();
        let stop = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("worker".into())
            .spawn(move || worker_loop(rx, stop))
            .context("Failed to spawn worker thread")?;

        debug!("Started worker");

        Ok(Self {
            context: context.clone(),
            job_tx,
            job_rx,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Queue `job`; on success `continuation` receives its result on the
    /// main context. Failed jobs log a warning and skip the continuation.
    pub fn push<T, J, C>(&self, job: J, continuation: C)
    where
        T: Send + 'static,
        J: FnOnce() -> Result<T> + Send + 'static,
        C: FnOnce(T) + 'static,
    {
        let (tx, rx) = async_channel::bounded::<T>(1);

        let wrapped: Job = Box::new(move || match job() {
            Ok(value) => {
                // The receiving side is gone when the main context was dropped
                let _ = tx.send_blocking(value);
            }
            Err(err) => warn!(error = %err, "Worker job failed"),
        });

        if self.job_tx.send(wrapped).is_err() {
            error!("Worker stopped, dropping job");
            return;
        }

        self.context.spawn_local(async move {
            if let Ok(value) = rx.recv().await {
                continuation(value);
            }
        });
    }

    /// Drop every queued job that has not started yet.
    pub fn clear(&self) {
        let dropped = self.job_rx.drain().count();
        if dropped > 0 {
            debug!(dropped, "Cleared worker queue");
        }
    }

    /// Ask the thread to exit after its current job.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
        self.clear();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        debug!("Worker shut down");
    }
}

fn worker_loop(rx: Receiver<Job>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                trace!("Running job");
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Worker job panicked");
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Worker thread exiting");
}

/// Progress reporter for long operations.
pub struct Updater;

impl Updater {
    /// Run `iter` on a new thread.
    ///
    /// Each `Ok` item is passed to `on_progress` on `context`. The first
    /// error item is logged and ends the iteration. `on_finish` runs on
    /// `context` once the iterator is done, after which the thread is joined.
    pub fn spawn<I, P, F, D>(
        context: &glib::MainContext,
        name: &str,
        iter: I,
        mut on_progress: F,
        on_finish: D,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Result<P>> + Send + 'static,
        P: Send + 'static,
        F: FnMut(P) + 'static,
        D: FnOnce() + 'static,
    {
        let (tx, rx) = async_channel::unbounded::<P>();
        let label = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("updater-{}", name))
            .spawn(move || {
                for item in iter {
                    match item {
                        Ok(progress) => {
                            if tx.send_blocking(progress).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(updater = %label, error = %err, "Update failed");
                            break;
                        }
                    }
                }
            })
            .context("Failed to spawn updater thread")?;

        let name = name.to_string();
        context.spawn_local(async move {
            while let Ok(progress) = rx.recv().await {
                on_progress(progress);
            }
            on_finish();
            if handle.join().is_err() {
                error!(updater = %name, "Updater thread panicked");
            }
            debug!(updater = %name, "Updater finished");
        });

        Ok(())
    }
}
