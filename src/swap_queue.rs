//! Buffer Swap Queue
//!
//! Bounded handoff of ready buffers between the submitting side (a surface's
//! stream) and the compositor. The queue owns a fixed number of slots, set at
//! construction. Every slot is always in exactly one of three places:
//!
//! ```text
//!            submit()              compositor_acquire()
//!   ┌──────┐ ───────► ┌────────┐ ─────────────────────► ┌──────────┐
//!   │ free │          │ queued │                        │ acquired │
//!   └──────┘ ◄─────────────────────────────────────────  └──────────┘
//!                         compositor_release()
//! ```
//!
//! Once every slot is queued or acquired, producers block until the
//! compositor releases one. That is the backpressure that bounds memory;
//! a full queue is never an error. In framedropping (mailbox) mode a producer
//! facing a full queue replaces the oldest queued buffer instead of waiting.
//!
//! Blocking uses condition variables only; there is no timeout. Waiters are
//! woken by the matching release/submit or by [`SwapQueue::shutdown`].

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwapQueueError {
    #[error("a swap queue needs at least one buffer slot")]
    ZeroCapacity,
    #[error("swap queue was shut down")]
    Shutdown,
}

/// Index of a slot inside the queue's fixed pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

/// A buffer the compositor holds exclusively until it hands it back
#[derive(Debug)]
#[must_use = "acquired buffers must be handed back with compositor_release"]
pub struct AcquiredBuffer<B> {
    slot: SlotId,
    buffer: B,
}

impl<B> AcquiredBuffer<B> {
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

/// Snapshot of where the slots currently are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    pub free: usize,
    pub queued: usize,
    pub acquired: usize,
    pub waiting_producers: usize,
    pub waiting_consumers: usize,
}

struct QueueState<B> {
    free: Vec<SlotId>,
    queued: VecDeque<(SlotId, B)>,
    acquired: usize,
    waiting_producers: usize,
    waiting_consumers: usize,
    shutdown: bool,
    framedropping: bool,
}

pub struct SwapQueue<B> {
    capacity: usize,
    state: Mutex<QueueState<B>>,
    /// Signalled when a slot returns to the free pool
    slot_freed: Condvar,
    /// Signalled when a buffer is queued
    buffer_ready: Condvar,
}

impl<B> SwapQueue<B> {
    pub fn new(capacity: usize) -> Result<Self, SwapQueueError> {
        if capacity == 0 {
            return Err(SwapQueueError::ZeroCapacity);
        }

        Ok(Self {
            capacity,
            state: Mutex::new(QueueState {
                free: (0..capacity).rev().map(SlotId).collect(),
                queued: VecDeque::with_capacity(capacity),
                acquired: 0,
                waiting_producers: 0,
                waiting_consumers: 0,
                shutdown: false,
                framedropping: false,
            }),
            slot_freed: Condvar::new(),
            buffer_ready: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mailbox mode: a full queue drops its oldest queued buffer instead of blocking
    pub fn allow_framedropping(&self, allow: bool) {
        self.state.lock().framedropping = allow;
    }

    /// Queues `buffer` for the compositor, blocking while no slot is free.
    ///
    /// Returns the buffer that was dropped to make room in framedropping mode.
    pub fn submit(&self, buffer: B) -> Result<Option<B>, SwapQueueError> {
        let mut state = self.state.lock();
        let mut dropped = None;

        let slot = loop {
            if state.shutdown {
                return Err(SwapQueueError::Shutdown);
            }
            if let Some(slot) = state.free.pop() {
                break slot;
            }
            if state.framedropping {
                if let Some((slot, old)) = state.queued.pop_front() {
                    debug!("Dropping queued frame in slot {:?} (mailbox)", slot);
                    dropped = Some(old);
                    break slot;
                }
            }
            state.waiting_producers += 1;
            self.slot_freed.wait(&mut state);
            state.waiting_producers -= 1;
        };

        state.queued.push_back((slot, buffer));
        self.buffer_ready.notify_one();
        Ok(dropped)
    }

    /// Pops the oldest queued buffer, blocking while the queue is empty
    pub fn compositor_acquire(&self) -> Result<AcquiredBuffer<B>, SwapQueueError> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(SwapQueueError::Shutdown);
            }
            if let Some((slot, buffer)) = state.queued.pop_front() {
                state.acquired += 1;
                return Ok(AcquiredBuffer { slot, buffer });
            }
            state.waiting_consumers += 1;
            self.buffer_ready.wait(&mut state);
            state.waiting_consumers -= 1;
        }
    }

    /// Non-blocking variant for render loops that must not stall on idle streams
    pub fn try_compositor_acquire(&self) -> Option<AcquiredBuffer<B>> {
        let mut state = self.state.lock();
        if state.shutdown {
            return None;
        }
        let (slot, buffer) = state.queued.pop_front()?;
        state.acquired += 1;
        Some(AcquiredBuffer { slot, buffer })
    }

    /// Returns an acquired slot to the free pool and hands the buffer back to
    /// the caller, which decides how long to keep it. Wakes one producer.
    pub fn compositor_release(&self, acquired: AcquiredBuffer<B>) -> B {
        let mut state = self.state.lock();
        debug_assert!(state.acquired > 0, "release without matching acquire");
        state.acquired = state.acquired.saturating_sub(1);
        state.free.push(acquired.slot);
        self.slot_freed.notify_one();
        acquired.buffer
    }

    /// Moves every queued buffer back to the free pool and returns them.
    /// Acquired buffers stay with the compositor until released.
    pub fn drain(&self) -> Vec<B> {
        let mut state = self.state.lock();
        let mut drained = Vec::with_capacity(state.queued.len());
        while let Some((slot, buffer)) = state.queued.pop_front() {
            state.free.push(slot);
            drained.push(buffer);
        }
        if !drained.is_empty() {
            self.slot_freed.notify_all();
        }
        drained
    }

    /// Unblocks every waiter; later submits and acquires fail with `Shutdown`
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        if state.waiting_producers > 0 || state.waiting_consumers > 0 {
            warn!(
                "Shutting down swap queue with {} producers and {} consumers waiting",
                state.waiting_producers, state.waiting_consumers
            );
        }
        self.slot_freed.notify_all();
        self.buffer_ready.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            capacity: self.capacity,
            free: state.free.len(),
            queued: state.queued.len(),
            acquired: state.acquired,
            waiting_producers: state.waiting_producers,
            waiting_consumers: state.waiting_consumers,
        }
    }
}
