//! Parked-operation records, waiter queues and the select commit token.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crossbeam_utils::sync::Unparker;

use crate::loom_exports::sync::atomic::AtomicUsize;

/// Sentinel stored in an unclaimed commit token.
const UNCLAIMED: usize = usize::MAX;

/// Sentinel stored in an aborted commit token.
const ABORTED: usize = usize::MAX - 1;

/// A single-slot atomic cell recording which operation of a `select` call
/// committed.
///
/// One token is created per parking `select` pass and shared by all of the
/// pass's waiters. Whichever side completes an operation must first claim the
/// token with that operation's index; the claim succeeds exactly once, so at
/// most one operation of the pass ever commits. The selecting thread itself
/// can instead abort the token, which permanently prevents any claim and lets
/// it safely take all of its waiters back.
#[derive(Debug)]
pub(crate) struct CommitToken {
    cell: AtomicUsize,
}

impl CommitToken {
    pub(crate) fn new() -> Self {
        Self {
            cell: AtomicUsize::new(UNCLAIMED),
        }
    }

    /// Attempts to commit operation `index`; succeeds exactly once per token.
    pub(crate) fn claim(&self, index: usize) -> bool {
        debug_assert!(index < ABORTED);

        // Ordering: Acquire-Release is necessary so that the claimer observes
        // the waiter state published before the waiter was enqueued, and so
        // that the value written into the waiter slot before the completion
        // signal is visible to the selecting thread once it reads the winner.
        self.cell
            .compare_exchange(UNCLAIMED, index, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempts to abort the pass before any operation commits.
    ///
    /// Fails if an operation was already committed, in which case the
    /// completion signal for that operation is or will shortly be pending.
    pub(crate) fn abort(&self) -> bool {
        // Ordering: Acquire-Release for the same reasons as `claim`.
        self.cell
            .compare_exchange(UNCLAIMED, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Index of the committed operation, if any.
    pub(crate) fn winner(&self) -> Option<usize> {
        // Ordering: Acquire pairs with the Release half of the claim so the
        // winner's slot contents are visible.
        match self.cell.load(Ordering::Acquire) {
            UNCLAIMED | ABORTED => None,
            index => Some(index),
        }
    }
}

/// Select membership of a waiter: the shared token and the waiter's operation
/// index within its `Select`.
#[derive(Debug)]
struct Binding {
    token: Arc<CommitToken>,
    index: usize,
}

/// Mutable state of a waiter.
#[derive(Debug)]
struct WaiterCore<T> {
    /// Value slot. Holds the outgoing value for a sender, receives the
    /// incoming value for a receiver.
    slot: Option<T>,
    /// Completion signal target for the parked caller.
    unparker: Option<Unparker>,
    /// Select membership, absent for plain blocking operations.
    binding: Option<Binding>,
}

/// A suspended send or receive operation.
///
/// A waiter is shared between the suspended caller and the channel queue it
/// is parked on; for select operations it is additionally referenced by the
/// operation handle. All interactions are short critical sections on the
/// internal mutex, and the completion protocol guarantees that the slot is
/// never accessed by both sides at once: the completing side writes or takes
/// the value strictly before signalling, the parked side reads it strictly
/// after waking.
#[derive(Debug)]
pub(crate) struct Waiter<T> {
    core: Mutex<WaiterCore<T>>,
}

impl<T> Waiter<T> {
    /// Creates a waiter for a plain blocking receive.
    pub(crate) fn new_receiver(unparker: Unparker) -> Arc<Self> {
        Arc::new(Self {
            core: Mutex::new(WaiterCore {
                slot: None,
                unparker: Some(unparker),
                binding: None,
            }),
        })
    }

    /// Creates a waiter for a plain blocking send of `value`.
    pub(crate) fn new_sender(unparker: Unparker, value: T) -> Arc<Self> {
        Arc::new(Self {
            core: Mutex::new(WaiterCore {
                slot: Some(value),
                unparker: Some(unparker),
                binding: None,
            }),
        })
    }

    /// Creates a detached waiter for a select operation; `bind` and `unbind`
    /// set it up before each pass.
    pub(crate) fn new_detached() -> Arc<Self> {
        Arc::new(Self {
            core: Mutex::new(WaiterCore {
                slot: None,
                unparker: None,
                binding: None,
            }),
        })
    }

    /// Installs the select membership and completion target for a parking
    /// pass.
    ///
    /// Must only be called while the waiter is not queued on any channel.
    pub(crate) fn bind(&self, token: &Arc<CommitToken>, index: usize, unparker: &Unparker) {
        let mut core = self.core.lock().unwrap();
        core.binding = Some(Binding {
            token: token.clone(),
            index,
        });
        core.unparker = Some(unparker.clone());
    }

    /// Clears the select membership and completion target, for polling passes
    /// that never park.
    pub(crate) fn unbind(&self) {
        let mut core = self.core.lock().unwrap();
        core.binding = None;
        core.unparker = None;
    }

    /// Claims this waiter's branch of its select, if it belongs to one.
    ///
    /// Plain blocking waiters always succeed: removal from the channel queue
    /// under the channel lock is their commit point.
    pub(crate) fn claim(&self) -> bool {
        let core = self.core.lock().unwrap();
        match &core.binding {
            Some(binding) => binding.token.claim(binding.index),
            None => true,
        }
    }

    /// The commit token this waiter is bound to, if any.
    pub(crate) fn token(&self) -> Option<Arc<CommitToken>> {
        self.core
            .lock()
            .unwrap()
            .binding
            .as_ref()
            .map(|binding| binding.token.clone())
    }

    /// Whether this waiter belongs to the select pass identified by `token`.
    pub(crate) fn is_bound_to(&self, token: &Arc<CommitToken>) -> bool {
        match &self.core.lock().unwrap().binding {
            Some(binding) => Arc::ptr_eq(&binding.token, token),
            None => false,
        }
    }

    /// Takes the value out of the slot.
    pub(crate) fn take(&self) -> Option<T> {
        self.core.lock().unwrap().slot.take()
    }

    /// Stores a value into the slot.
    pub(crate) fn put(&self, value: T) {
        let prev = self.core.lock().unwrap().slot.replace(value);
        debug_assert!(prev.is_none());
    }

    /// Whether the slot currently holds a value.
    pub(crate) fn is_loaded(&self) -> bool {
        self.core.lock().unwrap().slot.is_some()
    }

    /// Fires the completion signal.
    pub(crate) fn wake(&self) {
        let unparker = {
            let core = self.core.lock().unwrap();
            core.unparker
                .clone()
                .expect("signalled a waiter that was never given a completion target")
        };
        unparker.unpark();
    }
}

/// FIFO queue of waiters parked on one side of a channel.
///
/// Not synchronized: the owning channel's lock covers all access.
#[derive(Debug)]
pub(crate) struct WaiterQueue<T> {
    queue: VecDeque<Arc<Waiter<T>>>,
}

impl<T> WaiterQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Appends a waiter at the tail.
    pub(crate) fn enqueue(&mut self, waiter: Arc<Waiter<T>>) {
        self.queue.push_back(waiter);
    }

    /// Removes and returns the oldest waiter whose select branch can still be
    /// claimed.
    ///
    /// Waiters whose commit token was already claimed or aborted are dead
    /// entries left behind by a finished select pass; they are discarded on
    /// the way.
    pub(crate) fn dequeue(&mut self) -> Option<Arc<Waiter<T>>> {
        while let Some(waiter) = self.queue.pop_front() {
            if waiter.claim() {
                return Some(waiter);
            }
        }

        None
    }

    /// Whether the queue holds any waiter from outside the select pass
    /// identified by `exclude`.
    ///
    /// A select must never rendezvous with one of its own operations, so its
    /// own parked waiters do not count as rendezvous candidates. Dead waiters
    /// of finished passes do count; dequeuing skips and reclaims them later.
    pub(crate) fn has_candidate(&self, exclude: Option<&Arc<CommitToken>>) -> bool {
        match exclude {
            Some(token) => self.queue.iter().any(|waiter| !waiter.is_bound_to(token)),
            None => !self.queue.is_empty(),
        }
    }

    /// Unlinks `waiter` by identity, if still present.
    pub(crate) fn remove(&mut self, waiter: &Arc<Waiter<T>>) {
        if let Some(position) = self
            .queue
            .iter()
            .position(|queued| Arc::ptr_eq(queued, waiter))
        {
            self.queue.remove(position);
        }
    }
}
