//! Capture session: pool allocation, frame recycling and teardown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::thread;
use std::time::Duration;

use crate::attributes::names;
use crate::buffer::{BufferLedger, FrameBufferPool, FRAME_POOL_SIZE};
use crate::camera::HandleCell;
use crate::lock;
use crate::notify::{Frame, Observers};
use crate::traits::{
    CameraError, CompletedFrame, DeviceHandle, FrameCallback, FrameInfo, FrameStatus,
    NativeDriver, QueuedFrame, Result,
};

/// How often an observer waiting to end the capture rechecks the session.
const LIFECYCLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Capturing,
    Draining,
}

struct SessionState {
    phase: Phase,
    driver_started: bool,
    pool: Option<FrameBufferPool>,
    callback: Option<FrameCallback>,
}

impl SessionState {
    fn pool_for(&mut self, generation: u64) -> Option<&mut FrameBufferPool> {
        self.pool
            .as_mut()
            .filter(|pool| pool.generation() == generation)
    }
}

pub(crate) struct CaptureSession {
    driver: Arc<dyn NativeDriver>,
    handle: Arc<HandleCell>,
    observers: Arc<Observers>,
    ledger: BufferLedger,
    lifecycle: Mutex<()>,
    state: Mutex<SessionState>,
    settled: Condvar,
    next_generation: AtomicU64,
}

impl CaptureSession {
    pub(crate) fn new(
        driver: Arc<dyn NativeDriver>,
        handle: Arc<HandleCell>,
        observers: Arc<Observers>,
    ) -> Self {
        Self {
            driver,
            handle,
            observers,
            ledger: BufferLedger::default(),
            lifecycle: Mutex::new(()),
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                driver_started: false,
                pool: None,
                callback: None,
            }),
            settled: Condvar::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    pub(crate) fn is_capturing(&self) -> bool {
        lock(&self.state).phase != Phase::Idle
    }

    pub(crate) fn pool_len(&self) -> Option<usize> {
        lock(&self.state).pool.as_ref().map(FrameBufferPool::len)
    }

    pub(crate) fn live_buffers(&self) -> usize {
        self.ledger.live()
    }

    /// Hold the lifecycle lock as a running `begin` or `end` would.
    #[cfg(test)]
    pub(crate) fn lifecycle_guard_for_test(&self) -> MutexGuard<'_, ()> {
        lock(&self.lifecycle)
    }

    pub(crate) fn begin(self: &Arc<Self>, frame_rate: f32) -> Result<()> {
        let lifecycle = lock(&self.lifecycle);
        let result = self.begin_locked(frame_rate);
        drop(lifecycle);
        self.settled.notify_all();
        result
    }

    fn begin_locked(self: &Arc<Self>, frame_rate: f32) -> Result<()> {
        let handle = self.handle.require()?;
        if lock(&self.state).phase != Phase::Idle {
            return Err(CameraError::Unavailable);
        }

        match self.start(handle, frame_rate) {
            Ok(()) => {
                tracing::info!(%handle, frame_rate, "capture started");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%handle, %err, "capture start failed, tearing down");
                if let Err(teardown) = self.teardown(handle) {
                    tracing::warn!(%handle, %teardown, "teardown after failed start");
                }
                Err(err)
            }
        }
    }

    fn start(self: &Arc<Self>, handle: DeviceHandle, frame_rate: f32) -> Result<()> {
        self.driver.capture_start(handle)?;
        lock(&self.state).driver_started = true;

        let frame_size = self.driver.attr_u32_get(handle, names::TOTAL_BYTES_PER_FRAME)?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut pool = FrameBufferPool::allocate(generation, frame_size, &self.ledger);
        let callback = self.completion_callback();

        {
            let mut state = lock(&self.state);
            let mut queued = Ok(());
            for index in 0..FRAME_POOL_SIZE {
                let Some(frame) = pool.take_for_queue(index) else {
                    continue;
                };
                if let Err(rejected) =
                    self.driver
                        .capture_queue_frame(handle, frame, Arc::clone(&callback))
                {
                    queued = Err(rejected.status);
                    drop(pool.restore(rejected.frame));
                    break;
                }
            }
            state.pool = Some(pool);
            state.callback = Some(callback);
            state.phase = Phase::Capturing;
            queued?;
        }

        self.driver
            .attr_f32_set(handle, names::FRAME_RATE, frame_rate)?;
        self.driver
            .attr_enum_set(handle, names::FRAME_START_TRIGGER_MODE, names::FIXED_RATE)?;
        self.driver
            .attr_enum_set(handle, names::ACQUISITION_MODE, names::CONTINUOUS)?;
        self.driver.command_run(handle, names::ACQUISITION_START)?;
        Ok(())
    }

    pub(crate) fn end(&self) -> Result<()> {
        let _lifecycle = if self.dispatching_here() {
            let Some(guard) = self.lifecycle_from_observer() else {
                return Ok(());
            };
            guard
        } else {
            lock(&self.lifecycle)
        };
        let handle = self.handle.require()?;
        self.teardown(handle)
    }

    /// Whether the calling thread is inside one of this session's observers.
    fn dispatching_here(&self) -> bool {
        let current = thread::current().id();
        lock(&self.state)
            .pool
            .as_ref()
            .is_some_and(|pool| pool.held_by(current))
    }

    /// Lifecycle lock for an observer ending the capture. A teardown in
    /// progress elsewhere waits for this observer's buffer, so it is left to
    /// finish and `None` is returned; a capture still starting is waited out.
    fn lifecycle_from_observer(&self) -> Option<MutexGuard<'_, ()>> {
        loop {
            match self.lifecycle.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            let state = lock(&self.state);
            if state.phase == Phase::Draining {
                return None;
            }
            drop(
                self.settled
                    .wait_timeout(state, LIFECYCLE_POLL)
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
    }

    fn teardown(&self, handle: DeviceHandle) -> Result<()> {
        let driver_started = {
            let mut state = lock(&self.state);
            if !state.driver_started && state.pool.is_none() {
                state.phase = Phase::Idle;
                return Ok(());
            }
            state.phase = Phase::Draining;
            state.driver_started
        };
        self.settled.notify_all();

        let mut first_error: Option<CameraError> = None;
        let cleared = self
            .driver
            .capture_queue_clear(handle)
            .map_err(|status| {
                tracing::warn!(%handle, %status, "failed to clear capture queue");
                first_error.get_or_insert(status.into());
            })
            .ok();

        let mut state = lock(&self.state);
        let include_driver = cleared.is_some();
        for frame in cleared.into_iter().flatten() {
            let generation = frame.descriptor.generation;
            if let Some(orphan) = state.pool_for(generation).and_then(|pool| pool.restore(frame)) {
                tracing::debug!(index = orphan.descriptor.index, "dropping orphaned frame");
            }
        }

        let current = thread::current().id();
        let mut state = self.wait_for_buffers(state, current, include_driver);
        if let Some(pool) = state.pool.take() {
            pool.release();
        }
        state.callback = None;
        state.phase = Phase::Idle;
        state.driver_started = false;
        drop(state);

        if driver_started {
            if let Err(status) = self.driver.command_run(handle, names::ACQUISITION_STOP) {
                tracing::warn!(%handle, %status, "failed to stop acquisition");
                first_error.get_or_insert(status.into());
            }
            if let Err(status) = self.driver.capture_end(handle) {
                tracing::warn!(%handle, %status, "failed to end capture");
                first_error.get_or_insert(status.into());
            }
        }
        tracing::info!(%handle, "capture ended");

        first_error.map_or(Ok(()), Err)
    }

    fn wait_for_buffers<'a>(
        &self,
        state: MutexGuard<'a, SessionState>,
        current: thread::ThreadId,
        include_driver: bool,
    ) -> MutexGuard<'a, SessionState> {
        self.settled
            .wait_while(state, |state| {
                state
                    .pool
                    .as_ref()
                    .is_some_and(|pool| pool.in_flight(current, include_driver) > 0)
            })
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn completion_callback(self: &Arc<Self>) -> FrameCallback {
        let session: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |completed: CompletedFrame| {
            if let Some(session) = session.upgrade() {
                session.on_completed(completed);
            }
        })
    }

    fn on_completed(&self, completed: CompletedFrame) {
        let CompletedFrame {
            descriptor,
            buffer,
            status,
            info,
        } = completed;
        let frame = QueuedFrame { descriptor, buffer };

        {
            let mut state = lock(&self.state);
            let Some(pool) = state.pool_for(descriptor.generation) else {
                tracing::trace!(index = descriptor.index, "frame from a finished session dropped");
                return;
            };
            if !pool.hand_to_consumer(&descriptor, thread::current().id()) {
                tracing::warn!(index = descriptor.index, "callback for a frame that was not queued");
                return;
            }
        }

        match status {
            FrameStatus::Complete => self.notify(&frame, info),
            FrameStatus::Failed(reason) => {
                tracing::debug!(index = descriptor.index, %reason, "incomplete frame skipped");
            }
            FrameStatus::Cancelled => {}
        }
        self.recycle(frame, status);
    }

    fn notify(&self, frame: &QueuedFrame, info: FrameInfo) {
        tracing::trace!(index = frame.descriptor.index, count = info.frame_count, "frame ready");
        self.observers
            .dispatch(&Frame::new(frame.buffer.as_slice(), info));
    }

    /// Send a consumed buffer back to the driver, or home to the pool once
    /// the session is winding down.
    fn recycle(&self, frame: QueuedFrame, status: FrameStatus) {
        let index = frame.descriptor.index;
        let generation = frame.descriptor.generation;
        let mut state = lock(&self.state);
        let requeue = state.phase == Phase::Capturing && status != FrameStatus::Cancelled;
        let callback = state.callback.clone();
        let Some(pool) = state.pool_for(generation) else {
            return;
        };

        let frame = match (requeue, self.handle.get(), callback) {
            (true, Some(handle), Some(callback)) => {
                pool.mark_requeued(index);
                match self.driver.capture_queue_frame(handle, frame, callback) {
                    Ok(()) => None,
                    Err(rejected) => {
                        tracing::warn!(%handle, index, status = %rejected.status, "re-queue failed");
                        Some(rejected.frame)
                    }
                }
            }
            (true, None, _) => {
                tracing::warn!(index, err = %CameraError::Unavailable, "re-queue failed");
                Some(frame)
            }
            _ => Some(frame),
        };

        if let Some(frame) = frame {
            drop(pool.restore(frame));
        }
        drop(state);
        self.settled.notify_all();
    }
}
