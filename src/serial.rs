//! Serial tunnel over the camera's auxiliary channel, and its heartbeat.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::camera::HandleCell;
use crate::lock;
use crate::traits::NativeDriver;

struct Schedule {
    next_beat: Instant,
    shutdown: bool,
}

/// Byte pipe to the peripheral behind the camera.
///
/// Failures are reported as `false`/`None`, never as errors: the heartbeat
/// writes through the same path and must keep ticking while the camera is
/// closed or the link is down.
pub(crate) struct SerialTunnel {
    driver: Arc<dyn NativeDriver>,
    handle: Arc<HandleCell>,
    write_lock: Mutex<()>,
    schedule: Mutex<Schedule>,
    wake: Condvar,
    interval: Duration,
    heartbeat: [u8; 2],
}

impl SerialTunnel {
    pub(crate) fn new(
        driver: Arc<dyn NativeDriver>,
        handle: Arc<HandleCell>,
        interval: Duration,
        heartbeat: [u8; 2],
    ) -> Self {
        Self {
            driver,
            handle,
            write_lock: Mutex::new(()),
            schedule: Mutex::new(Schedule {
                next_beat: Instant::now() + interval,
                shutdown: false,
            }),
            wake: Condvar::new(),
            interval,
            heartbeat,
        }
    }

    /// Write one frame. A successful write pushes the next heartbeat a full
    /// interval away.
    pub(crate) fn write(&self, bytes: &[u8]) -> bool {
        let Some(handle) = self.handle.get() else {
            return false;
        };
        let written = {
            let _frame = lock(&self.write_lock);
            self.driver.serial_write(handle, bytes)
        };
        match written {
            Ok(()) => {
                self.defer_heartbeat();
                true
            }
            Err(status) => {
                tracing::debug!(%handle, %status, len = bytes.len(), "serial write failed");
                false
            }
        }
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> Option<usize> {
        let handle = self.handle.get()?;
        match self.driver.serial_read(handle, buf) {
            Ok(received) => Some(received),
            Err(status) => {
                tracing::debug!(%handle, %status, "serial read failed");
                None
            }
        }
    }

    fn defer_heartbeat(&self) {
        lock(&self.schedule).next_beat = Instant::now() + self.interval;
        self.wake.notify_all();
    }

    fn run_heartbeat(&self) {
        let mut schedule = lock(&self.schedule);
        while !schedule.shutdown {
            let now = Instant::now();
            if now < schedule.next_beat {
                let wait = schedule.next_beat - now;
                schedule = self
                    .wake
                    .wait_timeout(schedule, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
                continue;
            }

            // A failed beat still waits a full interval before the next try.
            schedule.next_beat = now + self.interval;
            drop(schedule);
            let sent = self.write(&self.heartbeat);
            tracing::trace!(sent, "heartbeat");
            schedule = lock(&self.schedule);
        }
    }

    fn stop_heartbeat(&self) {
        lock(&self.schedule).shutdown = true;
        self.wake.notify_all();
    }
}

/// Background thread sending heartbeats for as long as it lives.
pub(crate) struct Heartbeat {
    tunnel: Arc<SerialTunnel>,
    thread: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub(crate) fn spawn(tunnel: Arc<SerialTunnel>) -> Self {
        let worker = Arc::clone(&tunnel);
        let thread = thread::Builder::new()
            .name("camera-heartbeat".to_owned())
            .spawn(move || worker.run_heartbeat())
            .map_err(|err| tracing::error!(%err, "failed to start heartbeat thread"))
            .ok();
        Self { tunnel, thread }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.tunnel.stop_heartbeat();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("heartbeat thread panicked");
            }
        }
    }
}
