//! Worker threads that each run one reactor.
//!
//! # Responsibilities
//! - Own a dedicated OS thread with a current_thread runtime and LocalSet
//! - Run the prologue on the worker thread to build thread-confined state
//! - Block until stopped, then hand the state to the epilogue
//! - Signal a shutdown coordinator if the prologue fails

use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tokio::task::LocalSet;

use crate::dns::Resolve;
use crate::lifecycle::Shutdown;
use crate::reactor::Reactor;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to build event loop for worker {id}: {source}")]
    Runtime { id: usize, source: io::Error },

    #[error("failed to spawn thread for worker {id}: {source}")]
    Spawn { id: usize, source: io::Error },

    #[error("worker {0} already started")]
    AlreadyStarted(usize),

    #[error("worker {0} panicked")]
    Panicked(usize),

    #[error("worker {id} prologue failed: {reason}")]
    Prologue { id: usize, reason: String },

    #[error("no tokio runtime is available on this thread")]
    NoRuntime,
}

type Prologue<S> = Box<dyn FnOnce(&Rc<Reactor>) -> Result<S, WorkerError> + Send>;
type Epilogue<S> = Box<dyn FnOnce(&Rc<Reactor>, S) + Send>;

/// One event loop on its own thread.
///
/// `S` is the state the prologue builds on the worker thread. It never leaves
/// that thread, so it may hold `Rc`s and other thread-confined values.
pub struct Worker<S: 'static = ()> {
    id: usize,
    runtime: Option<Runtime>,
    resolver: Arc<dyn Resolve>,
    prologue: Option<Prologue<S>>,
    epilogue: Option<Epilogue<S>>,
    failure: Option<Shutdown>,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker<()> {
    /// A worker with no per-thread state.
    pub fn new(id: usize, resolver: Arc<dyn Resolve>) -> Result<Self, WorkerError> {
        Self::with_prologue(id, resolver, |_| Ok(()))
    }
}

impl<S: 'static> Worker<S> {
    /// Create a worker whose event loop is built now and started later.
    pub fn with_prologue<P>(id: usize, resolver: Arc<dyn Resolve>, prologue: P) -> Result<Self, WorkerError>
    where
        P: FnOnce(&Rc<Reactor>) -> Result<S, WorkerError> + Send + 'static,
    {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| WorkerError::Runtime { id, source })?;

        Ok(Self {
            id,
            runtime: Some(runtime),
            resolver,
            prologue: Some(Box::new(prologue)),
            epilogue: None,
            failure: None,
            stop_tx: None,
            thread: None,
        })
    }

    /// Run `epilogue` on the worker thread after the loop stops.
    pub fn set_epilogue<E>(&mut self, epilogue: E)
    where
        E: FnOnce(&Rc<Reactor>, S) + Send + 'static,
    {
        self.epilogue = Some(Box::new(epilogue));
    }

    /// Trigger `shutdown` if the prologue fails.
    pub fn notify_on_failure(&mut self, shutdown: Shutdown) {
        self.failure = Some(shutdown);
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Spawn the worker thread and run the loop there.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        let (Some(runtime), Some(prologue)) = (self.runtime.take(), self.prologue.take()) else {
            return Err(WorkerError::AlreadyStarted(self.id));
        };
        let id = self.id;
        let resolver = Arc::clone(&self.resolver);
        let epilogue = self.epilogue.take();
        let failure = self.failure.clone();
        let (stop_tx, stop_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || run(id, runtime, resolver, prologue, epilogue, failure, stop_rx))
            .map_err(|source| WorkerError::Spawn { id, source })?;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        tracing::debug!(worker = id, "Worker started");
        Ok(())
    }

    /// Ask the loop to exit and wait for the thread to finish.
    pub fn stop(&mut self) -> Result<(), WorkerError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread.join().map_err(|_| WorkerError::Panicked(self.id))?;
        tracing::debug!(worker = self.id, "Worker stopped");
        Ok(())
    }
}

impl<S: 'static> Drop for Worker<S> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(worker = self.id, error = %err, "Worker did not stop cleanly");
        }
    }
}

fn run<S>(
    id: usize,
    runtime: Runtime,
    resolver: Arc<dyn Resolve>,
    prologue: Prologue<S>,
    epilogue: Option<Epilogue<S>>,
    failure: Option<Shutdown>,
    stop_rx: oneshot::Receiver<()>,
) {
    let local = LocalSet::new();
    local.block_on(&runtime, async move {
        let reactor = match Reactor::new(id, resolver) {
            Ok(reactor) => reactor,
            Err(err) => {
                tracing::error!(worker = id, error = %err, "Failed to create reactor");
                if let Some(failure) = failure {
                    failure.trigger();
                }
                return;
            }
        };
        let _current = reactor.enter();

        let state = match prologue(&reactor) {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(worker = id, error = %err, "Worker prologue failed");
                if let Some(failure) = failure {
                    failure.trigger();
                }
                return;
            }
        };
        tracing::debug!(worker = id, "Worker event loop running");

        // a dropped sender counts as a stop request
        let _ = stop_rx.await;

        match epilogue {
            Some(epilogue) => epilogue(&reactor, state),
            None => drop(state),
        }
        tracing::debug!(worker = id, "Worker event loop finished");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::GatewayResolver;
    use crate::reactor;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::time::Duration;

    fn resolver() -> Arc<dyn Resolve> {
        Arc::new(GatewayResolver::static_only(HashMap::new()))
    }

    #[test]
    fn prologue_runs_on_worker_thread_with_reactor() {
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let mut worker = Worker::with_prologue(3, resolver(), move |reactor| {
            let bound = reactor::current().map(|r| r.id());
            tx.send((reactor.id(), bound, thread::current().name().map(str::to_owned)))
                .ok();
            Ok(Rc::new(42u32))
        })
        .unwrap();
        worker.set_epilogue(move |_reactor, state| {
            done_tx.send(*state).ok();
        });

        worker.start().unwrap();
        let (id, bound, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, 3);
        assert_eq!(bound, Some(3));
        assert_eq!(name.as_deref(), Some("worker-3"));
        assert!(worker.is_running());

        worker.stop().unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert!(!worker.is_running());
        assert!(reactor::current().is_none());
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut worker = Worker::new(0, resolver()).unwrap();
        worker.start().unwrap();
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyStarted(0))));
        worker.stop().unwrap();
        // stopping again is a no-op
        worker.stop().unwrap();
    }

    #[test]
    fn prologue_failure_triggers_shutdown() {
        let shutdown = Shutdown::new();
        let mut watcher = shutdown.subscribe();
        let mut worker: Worker<()> = Worker::with_prologue(1, resolver(), |_| {
            Err(WorkerError::Prologue {
                id: 1,
                reason: "bind failed".into(),
            })
        })
        .unwrap();
        worker.notify_on_failure(shutdown.clone());
        worker.start().unwrap();
        worker.stop().unwrap();

        assert!(watcher.try_recv().is_ok());
        assert!(shutdown.is_triggered());
    }
}
