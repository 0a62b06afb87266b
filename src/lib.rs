//! Go-style synchronous channels and select for multi-threaded Rust.
//!
//! A [`Channel`] is a typed, bounded FIFO conduit between threads with the
//! rendezvous semantics of Go's channels. A channel of capacity zero forces
//! every send to pair up with a receive; a buffered channel decouples the two
//! sides until the buffer fills up. Closing a channel wakes every blocked
//! receiver, and a closed, drained channel yields `None` rather than an error
//! so that consumer loops terminate naturally.
//!
//! A [`Select`] performs exactly one send or receive among any number of
//! channels of heterogeneous element types, choosing at random among the
//! operations that are ready and blocking until at least one is.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use chanix::Channel;
//!
//! let ch = Arc::new(Channel::with_capacity(3));
//!
//! let producer = thread::spawn({
//!     let ch = Arc::clone(&ch);
//!     move || {
//!         for i in 0..10 {
//!             ch.send(i).unwrap();
//!         }
//!         ch.close();
//!     }
//! });
//!
//! let sum: i32 = ch.iter().sum();
//! assert_eq!(sum, 45);
//!
//! producer.join().unwrap();
//! ```
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

mod loom_exports;
mod ring;
mod select;
mod time;
mod waiter;

use std::error;
use std::fmt;
use std::sync::{Arc, Mutex};

use crossbeam_utils::sync::Parker;

use crate::ring::RingBuffer;
use crate::waiter::{Waiter, WaiterQueue};

pub use crate::select::{RecvOp, Select, SendOp};
pub use crate::time::after;

std::thread_local! {
    /// Parking primitive of the current thread.
    ///
    /// Every blocking call parks at most once and is unparked exactly once,
    /// so the parker can be reused across calls without leaking a stale
    /// unpark token.
    static PARKER: Parker = Parker::new();
}

/// Runs `f` with the current thread's parker.
pub(crate) fn with_parker<R>(f: impl FnOnce(&Parker) -> R) -> R {
    PARKER.with(f)
}

/// Outcome of a non-blocking select registration attempt.
pub(crate) enum TryRegister {
    /// The operation completed; for a receive the waiter slot holds the value
    /// (or nothing if the channel is closed), for a send the slot is empty
    /// (or still holds the message if the channel is closed).
    Ready,
    /// The operation would have to park.
    NotReady,
}

/// Outcome of parking a select operation on a channel.
pub(crate) enum Park {
    /// The waiter was appended to the channel's wait queue.
    Queued,
    /// The operation looks ready; the select must abort the pass and poll
    /// again instead of parking.
    Ready,
}

/// Shared state of a channel, protected by the channel lock.
struct Inner<T> {
    /// Buffered values.
    buffer: RingBuffer<T>,
    /// Senders waiting for buffer space or a rendezvous partner.
    senders: WaiterQueue<T>,
    /// Receivers waiting for a value.
    receivers: WaiterQueue<T>,
    /// Set once by `close`, never cleared.
    closed: bool,
}

/// A bounded channel for communicating between threads.
///
/// The channel pairs senders and receivers in FIFO order. With a capacity of
/// zero every [`send`](Channel::send) blocks until a receiver takes the value
/// directly; with a positive capacity, sends complete immediately while the
/// buffer has room.
///
/// A channel is typically shared via [`Arc`] and used concurrently from any
/// number of threads.
pub struct Channel<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Channel<T> {
    /// Creates an unbuffered (rendezvous) channel.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a channel able to buffer `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if the requested capacity is `usize::MAX`.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity < usize::MAX,
            "the capacity may not exceed {}",
            usize::MAX - 1
        );

        Self {
            inner: Mutex::new(Inner {
                buffer: RingBuffer::new(capacity),
                senders: WaiterQueue::new(),
                receivers: WaiterQueue::new(),
                closed: false,
            }),
        }
    }

    /// Maximum number of values the channel can buffer.
    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().buffer.capacity()
    }

    /// Current number of buffered values.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().buffer.len()
    }

    /// Whether no values are currently buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().buffer.is_empty()
    }

    /// Checks if the channel is closed.
    ///
    /// Note that even if the channel is closed, buffered values can still be
    /// received.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Sends a value, if necessary waiting until a receiver or buffer space
    /// becomes available.
    ///
    /// Fails if the channel is or becomes closed before the value is
    /// delivered; the error returns the value to the caller.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        with_parker(|parker| {
            let mut inner = self.inner.lock().unwrap();

            if inner.closed {
                return Err(SendError(value));
            }

            // Hand off directly to the longest-parked receiver.
            if inner.buffer.is_empty() {
                if let Some(receiver) = inner.receivers.dequeue() {
                    receiver.put(value);
                    receiver.wake();
                    return Ok(());
                }
            }

            if !inner.buffer.is_full() {
                inner.buffer.push(value);
                return Ok(());
            }

            let waiter = Waiter::new_sender(parker.unparker().clone(), value);
            inner.senders.enqueue(waiter.clone());
            drop(inner);

            parker.park();

            match waiter.take() {
                // The value was handed off or moved into the buffer.
                None => Ok(()),
                // The channel was closed while waiting.
                Some(value) => Err(SendError(value)),
            }
        })
    }

    /// Attempts to send a value without blocking.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            return Err(TrySendError::Closed(value));
        }

        if inner.buffer.is_empty() {
            if let Some(receiver) = inner.receivers.dequeue() {
                receiver.put(value);
                receiver.wake();
                return Ok(());
            }
        }

        if !inner.buffer.is_full() {
            inner.buffer.push(value);
            return Ok(());
        }

        Err(TrySendError::Full(value))
    }

    /// Receives a value, if necessary waiting until one becomes available.
    ///
    /// Returns `None` once the channel is closed and all buffered values have
    /// been received.
    pub fn recv(&self) -> Option<T> {
        with_parker(|parker| {
            let mut inner = self.inner.lock().unwrap();

            if let Some(value) = inner.buffer.pop() {
                // A slot was freed: move the longest-parked sender's value
                // into the buffer.
                if let Some(sender) = inner.senders.dequeue() {
                    let promoted = sender
                        .take()
                        .expect("a parked sender always carries a value");
                    inner.buffer.push(promoted);
                    sender.wake();
                }
                return Some(value);
            }

            if let Some(sender) = inner.senders.dequeue() {
                let value = sender
                    .take()
                    .expect("a parked sender always carries a value");
                sender.wake();
                return Some(value);
            }

            if inner.closed {
                return None;
            }

            let waiter = Waiter::new_receiver(parker.unparker().clone());
            inner.receivers.enqueue(waiter.clone());
            drop(inner);

            parker.park();

            // Filled by a sender, or still empty if the channel was closed.
            waiter.take()
        })
    }

    /// Attempts to receive a value without blocking.
    ///
    /// Returns `None` when no value is immediately available, whether because
    /// the channel is empty or because it is closed and drained.
    pub fn try_recv(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(value) = inner.buffer.pop() {
            if let Some(sender) = inner.senders.dequeue() {
                let promoted = sender
                    .take()
                    .expect("a parked sender always carries a value");
                inner.buffer.push(promoted);
                sender.wake();
            }
            return Some(value);
        }

        if let Some(sender) = inner.senders.dequeue() {
            let value = sender
                .take()
                .expect("a parked sender always carries a value");
            sender.wake();
            return Some(value);
        }

        None
    }

    /// Closes the channel.
    ///
    /// Subsequent sends fail and subsequent receives drain the buffer, then
    /// return `None`. Receivers blocked at the time of the call are woken and
    /// return `None`; senders blocked at the time of the call are woken and
    /// fail, each recovering its undelivered value. Closing an already closed
    /// channel has no effect.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            return;
        }
        inner.closed = true;

        // At most one of the two queues is non-empty. Receivers are woken
        // with an empty slot so they report the close; senders keep their
        // value in the slot so the send call returns it in the error.
        while let Some(receiver) = inner.receivers.dequeue() {
            receiver.wake();
        }
        while let Some(sender) = inner.senders.dequeue() {
            sender.wake();
        }
    }

    /// Returns an iterator yielding received values until the channel is
    /// closed and drained.
    ///
    /// The iterator blocks between elements whenever the channel is empty but
    /// not closed.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { channel: self }
    }

    /// Attempts a select receive without ever parking the waiter.
    ///
    /// Only called while the owning select has nothing parked anywhere, so
    /// completing the operation here can only involve counterparty commit
    /// tokens, never the select's own.
    pub(crate) fn try_register_recv(&self, waiter: &Arc<Waiter<T>>) -> TryRegister {
        let mut inner = self.inner.lock().unwrap();

        if let Some(value) = inner.buffer.pop() {
            // A slot was freed: move the longest-parked sender's value into
            // the buffer.
            if let Some(sender) = inner.senders.dequeue() {
                let promoted = sender
                    .take()
                    .expect("a parked sender always carries a value");
                inner.buffer.push(promoted);
                sender.wake();
            }
            waiter.put(value);
            return TryRegister::Ready;
        }

        if let Some(sender) = inner.senders.dequeue() {
            let value = sender
                .take()
                .expect("a parked sender always carries a value");
            waiter.put(value);
            sender.wake();
            return TryRegister::Ready;
        }

        if inner.closed {
            // Selectable with no value: the empty slot reports the close.
            return TryRegister::Ready;
        }

        TryRegister::NotReady
    }

    /// Attempts a select send without ever parking the waiter; the message is
    /// taken from the waiter slot on delivery.
    pub(crate) fn try_register_send(&self, waiter: &Arc<Waiter<T>>) -> TryRegister {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            // Selectable as a failed send: the message stays in the slot.
            return TryRegister::Ready;
        }

        if inner.buffer.is_empty() {
            if let Some(receiver) = inner.receivers.dequeue() {
                let value = waiter
                    .take()
                    .expect("a send operation always carries a message");
                receiver.put(value);
                receiver.wake();
                return TryRegister::Ready;
            }
        }

        if !inner.buffer.is_full() {
            let value = waiter
                .take()
                .expect("a send operation always carries a message");
            inner.buffer.push(value);
            return TryRegister::Ready;
        }

        TryRegister::NotReady
    }

    /// Parks a select receive waiter, unless the channel looks ready.
    ///
    /// The readiness check is conservative: dead waiters of finished select
    /// passes count as candidates, and the resulting aborted pass cleans them
    /// up when it polls again. The select's own parked operations do not
    /// count, since a select must never rendezvous with itself.
    pub(crate) fn park_recv(&self, waiter: &Arc<Waiter<T>>) -> Park {
        let token = waiter.token();
        let mut inner = self.inner.lock().unwrap();

        if !inner.buffer.is_empty() || inner.closed || inner.senders.has_candidate(token.as_ref())
        {
            return Park::Ready;
        }

        inner.receivers.enqueue(waiter.clone());
        Park::Queued
    }

    /// Parks a select send waiter, unless the channel looks ready.
    pub(crate) fn park_send(&self, waiter: &Arc<Waiter<T>>) -> Park {
        let token = waiter.token();
        let mut inner = self.inner.lock().unwrap();

        if inner.closed
            || !inner.buffer.is_full()
            || inner.receivers.has_candidate(token.as_ref())
        {
            return Park::Ready;
        }

        inner.senders.enqueue(waiter.clone());
        Park::Queued
    }

    /// Unlinks a select receive waiter that lost its call.
    pub(crate) fn remove_recv_waiter(&self, waiter: &Arc<Waiter<T>>) {
        self.inner.lock().unwrap().receivers.remove(waiter);
    }

    /// Unlinks a select send waiter that lost its call.
    pub(crate) fn remove_send_waiter(&self, waiter: &Arc<Waiter<T>>) {
        self.inner.lock().unwrap().senders.remove(waiter);
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

impl<'a, T> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// A blocking iterator over values received from a channel.
///
/// Created by [`Channel::iter`]; ends once the channel is closed and drained.
pub struct Iter<'a, T> {
    channel: &'a Channel<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.recv()
    }
}

impl<T> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").finish_non_exhaustive()
    }
}

/// An error returned when sending into a closed channel.
///
/// The undelivered value is returned to the caller.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct SendError<T>(pub T);

impl<T: fmt::Debug> error::Error for SendError<T> {}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "sending into a closed channel".fmt(f)
    }
}

/// An error returned when an attempt to send without blocking is
/// unsuccessful.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrySendError<T> {
    /// The channel is full.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

impl<T: fmt::Debug> error::Error for TrySendError<T> {}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => "Full(..)".fmt(f),
            TrySendError::Closed(_) => "Closed(..)".fmt(f),
        }
    }
}

/// An error returned when a select has no operation left to wait on.
///
/// Blocking in that state could never be woken, so it is reported instead.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SelectError;

impl error::Error for SelectError {}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "selecting among no active operations".fmt(f)
    }
}
