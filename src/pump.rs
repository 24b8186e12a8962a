//! Frame delivery thread used by driver backends.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A named thread that runs until its stop flag is raised.
pub(crate) struct Pump {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Pump {
    /// Spawn `body` on a thread called `name`. `body` should return soon
    /// after the flag it is handed turns `true`.
    pub(crate) fn spawn<F>(name: String, body: F) -> io::Result<Self>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || body(&flag))?;
        Ok(Self { stop, thread })
    }

    /// Stop the thread and wait for it.
    ///
    /// Frame callbacks run on the pump thread, so a callback that ends the
    /// capture lands here on the very thread being stopped. In that case the
    /// flag is raised and the thread detached; its loop exits once the
    /// callback returns.
    pub(crate) fn join(self) {
        self.stop.store(true, Ordering::Release);
        if self.thread.thread().id() == thread::current().id() {
            tracing::debug!(
                thread = self.thread.thread().name().unwrap_or("pump"),
                "stopped from its own thread, detaching"
            );
            return;
        }
        if self.thread.join().is_err() {
            tracing::error!("pump thread panicked");
        }
    }
}
