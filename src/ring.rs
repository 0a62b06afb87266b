//! A fixed-capacity FIFO buffer of value slots.

/// A bounded FIFO ring buffer.
///
/// The buffer owns `capacity + 1` slots and distinguishes the empty and full
/// states with head/tail indices alone, without an auxiliary count. A
/// zero-capacity buffer therefore owns a single slot and reports itself both
/// empty and full at all times; the channel uses this as a permanently closed
/// gate that forces every send to rendezvous with a receive.
///
/// The buffer is not synchronized: it is only ever accessed while the owning
/// channel's lock is held.
pub(crate) struct RingBuffer<T> {
    /// Slot storage, of length `capacity + 1`.
    slots: Box<[Option<T>]>,
    /// Index of the slot holding the oldest value.
    head: usize,
    /// Index of the slot to which the next value will be written.
    tail: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer able to hold `capacity` values.
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.resize_with(capacity + 1, || None);

        Self {
            slots: slots.into(),
            head: 0,
            tail: 0,
        }
    }

    /// Maximum number of values the buffer can hold.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Current number of buffered values.
    pub(crate) fn len(&self) -> usize {
        // The tail is always at or "ahead" of the head, modulo the slot count.
        (self.tail + self.slots.len() - self.head) % self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub(crate) fn is_full(&self) -> bool {
        (self.tail + 1) % self.slots.len() == self.head
    }

    /// Appends a value.
    ///
    /// The caller must have checked that the buffer is not full.
    pub(crate) fn push(&mut self, value: T) {
        debug_assert!(!self.is_full());

        self.slots[self.tail] = Some(value);
        self.tail = (self.tail + 1) % self.slots.len();
    }

    /// Removes and returns the oldest value, if any.
    pub(crate) fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let value = self.slots[self.head].take();
        debug_assert!(value.is_some());
        self.head = (self.head + 1) % self.slots.len();

        value
    }
}
