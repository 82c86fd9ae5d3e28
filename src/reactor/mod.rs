//! Per-thread event loop context.
//!
//! # Data Flow
//! ```text
//! Worker thread
//!     → current_thread runtime + LocalSet (worker.rs)
//!     → Reactor entered (thread-local)
//!     → prologue builds thread-confined state
//!     → channels / listeners / DNS lookups spawn onto the LocalSet
//!     → stop signal → epilogue tears the state down
//! ```
//!
//! # Design Decisions
//! - One reactor per worker thread; nothing registered on it ever migrates
//! - The DNS resolver is created once per worker and shared by its sessions
//! - `current()` is how the net layer finds the loop it must spawn onto

pub mod worker;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::dns::Resolve;

pub use worker::{Worker, WorkerError};

thread_local! {
    static CURRENT: RefCell<Option<Rc<Reactor>>> = const { RefCell::new(None) };
}

/// Event loop context bound to one worker thread.
pub struct Reactor {
    id: usize,
    resolver: Arc<dyn Resolve>,
    handle: Handle,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor").field("id", &self.id).finish()
    }
}

impl Reactor {
    /// Create a reactor for the runtime running on this thread.
    pub fn new(id: usize, resolver: Arc<dyn Resolve>) -> Result<Rc<Self>, WorkerError> {
        let handle = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        Ok(Rc::new(Self { id, resolver, handle }))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// DNS context shared by everything running on this reactor.
    pub fn resolver(&self) -> &Arc<dyn Resolve> {
        &self.resolver
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Bind this reactor to the calling thread until the guard drops.
    pub fn enter(self: &Rc<Self>) -> ReactorGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(Rc::clone(self)));
        ReactorGuard { previous }
    }
}

/// Restores the previously bound reactor on drop.
pub struct ReactorGuard {
    previous: Option<Rc<Reactor>>,
}

impl Drop for ReactorGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Reactor bound to the calling thread, if any.
pub fn current() -> Option<Rc<Reactor>> {
    CURRENT.with(|current| current.borrow().clone())
}
