use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use tokio_util::sync::CancellationToken;

type Callbacks = Arc<SyncMutex<HashMap<u32, Box<dyn Fn() + Send + Sync>>>>;

fn dispatch(callbacks: &Callbacks) {
    // A poisoned lock only means a callback panicked; keep dispatching.
    let callbacks = callbacks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    for callback in callbacks.values() {
        callback();
    }
}

/// Fans a single process-wide Ctrl-C signal out to every registered callback.
///
/// The ctrlc crate accepts one handler per process, so this must be created
/// at most once.
#[derive(Clone)]
pub struct CtrlcHandler {
    callbacks: Callbacks,
}

impl CtrlcHandler {
    pub fn new() -> Result<CtrlcHandler, ctrlc::Error> {
        let callbacks: Callbacks = Arc::new(SyncMutex::new(HashMap::new()));
        let callbacks_clone = Arc::clone(&callbacks);
        ctrlc::set_handler(move || dispatch(&callbacks_clone))?;
        Ok(CtrlcHandler { callbacks })
    }

    /// A handler that is never wired to the process signal.
    #[cfg(test)]
    pub fn unattached() -> CtrlcHandler {
        CtrlcHandler {
            callbacks: Arc::new(SyncMutex::new(HashMap::new())),
        }
    }

    /// Runs every callback as if ctrl+c had been pressed.
    #[cfg(test)]
    pub fn trigger(&self) {
        dispatch(&self.callbacks);
    }

    #[cfg(test)]
    pub fn handler_count(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn add_handler<F>(&mut self, handler: F) -> u32
    where
        F: Fn() + Send + Sync + 'static,
    {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Box::new(handler));
        id
    }

    pub fn remove_handler(&mut self, id: u32) {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
    }

    /// A token that is cancelled on the next Ctrl-C. Pass the returned id to
    /// `remove_handler` once the guarded work is done.
    pub fn cancel_token(&mut self) -> (CancellationToken, u32) {
        let token = CancellationToken::new();
        let child = token.clone();
        let id = self.add_handler(move || child.cancel());
        (token, id)
    }
}
