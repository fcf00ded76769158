use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};

use tracing::{error, info};

/// Cooperative cancellation flag shared between a worker and its owner.
///
/// Workers check it before each registry request; a request already in flight
/// completes normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owner side of a background worker thread.
///
/// Events arrive in the order the worker sent them. Dropping the handle cancels
/// the worker without waiting for it.
#[derive(Debug)]
pub struct WorkerHandle<E> {
    events: mpsc::Receiver<E>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> WorkerHandle<E> {
    /// Run `job` on a named thread.
    ///
    /// A panic inside `job` is caught and reported as `on_panic(message)`, so the
    /// owner always sees a terminal event.
    pub fn spawn<F>(name: &str, on_panic: fn(String) -> E, job: F) -> std::io::Result<Self>
    where
        F: FnOnce(mpsc::Sender<E>, CancelToken) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let thread_name = name.to_string();

        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            let tx_guard = tx.clone();
            let result = catch_unwind(AssertUnwindSafe(|| job(tx, worker_cancel)));
            if let Err(payload) = result {
                let message = panic_message(payload.as_ref());
                error!(worker = %thread_name, %message, "Worker thread panicked");
                let _ = tx_guard.send(on_panic(message));
            }
        })?;
        info!(worker = name, "Worker started");

        Ok(Self {
            events: rx,
            cancel,
            thread: Some(thread),
        })
    }
}

impl<E> WorkerHandle<E> {
    /// Request cancellation; the worker stops before its next request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drain at most `max` pending events without blocking.
    pub fn poll(&self, max: usize) -> Vec<E> {
        let mut events = Vec::with_capacity(max.min(64));
        while events.len() < max {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }

    /// Block for the next event. `None` once the worker is gone and the queue is empty.
    pub fn recv(&self) -> Option<E> {
        self.events.recv().ok()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            // Panics were already reported through the channel
            let _ = thread.join();
        }
    }

    /// Cancel and wait for the worker thread to exit.
    pub fn stop(&mut self) {
        self.cancel();
        self.join();
    }
}

impl<E> Drop for WorkerHandle<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker thread panicked".to_string())
}
