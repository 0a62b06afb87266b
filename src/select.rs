//! Waiting on multiple channel operations at once.

use std::fmt;
use std::sync::Arc;

use crossbeam_utils::sync::Unparker;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::waiter::{CommitToken, Waiter};
use crate::{with_parker, Channel, Park, SelectError, TryRegister};

/// The side of one select operation that a channel can drive without knowing
/// the element type.
///
/// Each operation owns a typed channel reference and a typed waiter; behind
/// this object-safe protocol a single `Select` can multiplex channels of
/// heterogeneous element types.
trait Participant: Send {
    /// Prepares the waiter for a parking pass: membership in the pass and the
    /// caller's completion target.
    fn bind(&self, token: &Arc<CommitToken>, index: usize, unparker: &Unparker);

    /// Prepares the waiter for a polling pass, dropping any membership left
    /// over from a previous parking pass.
    fn unbind(&self);

    /// Whether the operation can take part in a call. A send operation whose
    /// message was already delivered is disarmed until re-armed.
    fn is_armed(&self) -> bool;

    /// Attempts the operation without ever parking.
    fn try_register(&self) -> TryRegister;

    /// Parks the waiter on the channel, unless the channel looks ready.
    fn park(&self) -> Park;

    /// Unlinks the waiter from the channel if it is still queued there.
    fn unregister(&self);
}

struct RecvParticipant<T> {
    channel: Arc<Channel<T>>,
    waiter: Arc<Waiter<T>>,
}

impl<T: Send> Participant for RecvParticipant<T> {
    fn bind(&self, token: &Arc<CommitToken>, index: usize, unparker: &Unparker) {
        // Discard a value won by a previous call but never taken.
        let _ = self.waiter.take();
        self.waiter.bind(token, index, unparker);
    }

    fn unbind(&self) {
        let _ = self.waiter.take();
        self.waiter.unbind();
    }

    fn is_armed(&self) -> bool {
        true
    }

    fn try_register(&self) -> TryRegister {
        self.channel.try_register_recv(&self.waiter)
    }

    fn park(&self) -> Park {
        self.channel.park_recv(&self.waiter)
    }

    fn unregister(&self) {
        self.channel.remove_recv_waiter(&self.waiter);
    }
}

struct SendParticipant<T> {
    channel: Arc<Channel<T>>,
    waiter: Arc<Waiter<T>>,
}

impl<T: Send> Participant for SendParticipant<T> {
    fn bind(&self, token: &Arc<CommitToken>, index: usize, unparker: &Unparker) {
        // The outgoing message stays in the slot.
        self.waiter.bind(token, index, unparker);
    }

    fn unbind(&self) {
        self.waiter.unbind();
    }

    fn is_armed(&self) -> bool {
        self.waiter.is_loaded()
    }

    fn try_register(&self) -> TryRegister {
        self.channel.try_register_send(&self.waiter)
    }

    fn park(&self) -> Park {
        self.channel.park_send(&self.waiter)
    }

    fn unregister(&self) {
        self.channel.remove_send_waiter(&self.waiter);
    }
}

/// One registered operation of a select.
struct Entry {
    participant: Box<dyn Participant>,
    cleared: bool,
}

/// A multiplexer performing exactly one send or receive among a set of
/// channels.
///
/// Operations are added up front with [`recv`](Select::recv) and
/// [`send`](Select::send), each returning a typed handle for accessing the
/// transferred value; the select itself only reports *which* operation
/// completed. The set can then be exercised any number of times with
/// [`select`](Select::select) and [`try_select`](Select::try_select).
///
/// Among operations that are ready at the same time the choice is randomized;
/// declaration order carries no weight.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use chanix::{Channel, Select};
///
/// let numbers = Arc::new(Channel::with_capacity(1));
/// let words = Arc::new(Channel::<&str>::with_capacity(1));
///
/// numbers.send(7).unwrap();
///
/// let mut select = Select::new();
/// let number = select.recv(&numbers);
/// let word = select.recv(&words);
///
/// // Only `numbers` holds a value, so its operation wins.
/// assert_eq!(select.select(), Ok(number.index()));
/// assert_eq!(number.take(), Some(7));
/// assert!(word.take().is_none());
/// ```
pub struct Select {
    entries: Vec<Entry>,
    poll_order: Vec<usize>,
    rng: SmallRng,
}

impl Select {
    /// Creates a select with no operations.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            poll_order: Vec::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Adds a receive operation on `channel` and returns its typed handle.
    pub fn recv<T: Send + 'static>(&mut self, channel: &Arc<Channel<T>>) -> RecvOp<T> {
        let waiter = Waiter::new_detached();
        let index = self.entries.len();

        self.entries.push(Entry {
            participant: Box::new(RecvParticipant {
                channel: channel.clone(),
                waiter: waiter.clone(),
            }),
            cleared: false,
        });
        self.poll_order.push(index);

        RecvOp { waiter, index }
    }

    /// Adds a send operation on `channel`, armed with `message`, and returns
    /// its typed handle.
    ///
    /// Once the message is delivered the operation is skipped until re-armed
    /// with [`SendOp::set`].
    pub fn send<T: Send + 'static>(&mut self, channel: &Arc<Channel<T>>, message: T) -> SendOp<T> {
        let waiter = Waiter::new_detached();
        waiter.put(message);
        let index = self.entries.len();

        self.entries.push(Entry {
            participant: Box::new(SendParticipant {
                channel: channel.clone(),
                waiter: waiter.clone(),
            }),
            cleared: false,
        });
        self.poll_order.push(index);

        SendOp { waiter, index }
    }

    /// Marks the operation at `index` as cleared; subsequent calls skip it.
    ///
    /// This is the equivalent of a `nil` channel case in a Go select.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not refer to an operation of this select.
    pub fn clear(&mut self, index: usize) {
        self.entries[index].cleared = true;
    }

    /// Performs exactly one of the registered operations, blocking until one
    /// is ready.
    ///
    /// Returns the index of the completed operation; the value transferred,
    /// if any, is available through that operation's handle. A receive
    /// operation on a closed channel is immediately ready and its handle
    /// yields `None`; a send operation on a closed channel is immediately
    /// ready and its handle recovers the undelivered message.
    ///
    /// Fails if every operation is cleared or disarmed, since blocking would
    /// then never end.
    pub fn select(&mut self) -> Result<usize, SelectError> {
        with_parker(|parker| {
            let unparker = parker.unparker().clone();

            loop {
                // Polling pass: nothing of this call is parked yet, so
                // completing an operation here only ever claims counterparty
                // commit tokens, never this call's own.
                self.poll_order.shuffle(&mut self.rng);

                let mut active = 0_usize;
                for position in 0..self.poll_order.len() {
                    let index = self.poll_order[position];
                    let entry = &self.entries[index];
                    if entry.cleared || !entry.participant.is_armed() {
                        continue;
                    }
                    active += 1;

                    entry.participant.unbind();
                    if let TryRegister::Ready = entry.participant.try_register() {
                        return Ok(index);
                    }
                }

                if active == 0 {
                    return Err(SelectError);
                }

                // Parking pass: park a waiter on every operation's channel,
                // then suspend until one of them is committed.
                let token = Arc::new(CommitToken::new());
                let mut parked = false;
                let mut interrupted = false;

                for position in 0..self.poll_order.len() {
                    let index = self.poll_order[position];
                    let entry = &self.entries[index];
                    if entry.cleared || !entry.participant.is_armed() {
                        continue;
                    }

                    entry.participant.bind(&token, index, &unparker);
                    match entry.participant.park() {
                        Park::Queued => parked = true,
                        // A channel became ready while the pass was being
                        // set up; stop and poll again.
                        Park::Ready => {
                            interrupted = true;
                            break;
                        }
                    }
                }

                if interrupted && token.abort() {
                    // The abort won: no operation of this pass can commit
                    // anymore, so the parked waiters can safely be taken
                    // back before the next polling pass.
                    if parked {
                        self.unregister_all();
                    }
                    continue;
                }

                // Every operation is parked, or one was committed while the
                // pass was being set up. The committing side signals only
                // after the transfer, so the winning operation is complete
                // once the park ends.
                parker.park();
                let winner = token
                    .winner()
                    .expect("a parked select can only be woken by a committed operation");

                // Drop the losing waiters from their channel queues so stale
                // entries do not accumulate across calls.
                self.unregister_all();

                return Ok(winner);
            }
        })
    }

    fn unregister_all(&self) {
        for entry in &self.entries {
            if !entry.cleared {
                entry.participant.unregister();
            }
        }
    }

    /// Performs at most one of the registered operations, without blocking.
    ///
    /// Returns the index of the completed operation, or `None` if none was
    /// ready (including when every operation is cleared or disarmed).
    pub fn try_select(&mut self) -> Option<usize> {
        self.poll_order.shuffle(&mut self.rng);

        for position in 0..self.poll_order.len() {
            let index = self.poll_order[position];
            let entry = &self.entries[index];
            if entry.cleared || !entry.participant.is_armed() {
                continue;
            }

            entry.participant.unbind();
            match entry.participant.try_register() {
                TryRegister::Ready => return Some(index),
                TryRegister::NotReady => {}
            }
        }

        None
    }
}

impl Default for Select {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("operations", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Typed handle to a receive operation registered with a [`Select`].
pub struct RecvOp<T> {
    waiter: Arc<Waiter<T>>,
    index: usize,
}

impl<T> RecvOp<T> {
    /// Index of this operation within its select.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Takes the received value after this operation won a call.
    ///
    /// Returns `None` if the operation won because the channel was closed.
    pub fn take(&self) -> Option<T> {
        self.waiter.take()
    }
}

impl<T> fmt::Debug for RecvOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvOp")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Typed handle to a send operation registered with a [`Select`].
pub struct SendOp<T> {
    waiter: Arc<Waiter<T>>,
    index: usize,
}

impl<T> SendOp<T> {
    /// Index of this operation within its select.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Arms the operation with a new outgoing message, replacing any message
    /// not yet delivered.
    pub fn set(&self, message: T) {
        let _ = self.waiter.take();
        self.waiter.put(message);
    }

    /// Takes the pending message back out of the operation.
    ///
    /// After the operation won a call, `Some` means the channel was closed
    /// before the message could be delivered; `None` means delivery
    /// succeeded. The operation is disarmed either way.
    pub fn take(&self) -> Option<T> {
        self.waiter.take()
    }
}

impl<T> fmt::Debug for SendOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOp")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
