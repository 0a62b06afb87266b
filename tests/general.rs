//! Channel semantics driven by real threads.
//!
//! Note: timer-based tests are disabled for MIRI.

use std::sync::Arc;
use std::thread;
#[cfg(not(miri))]
use std::time::{Duration, Instant};

use chanix::{Channel, SendError, TrySendError};

// Sleep for the provided number of milliseconds.
#[cfg(not(miri))]
fn sleep(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

// An unbuffered send completes only once a receiver shows up.
#[cfg(not(miri))]
#[test]
fn unbuffered_send_waits_for_receiver() {
    let ch = Arc::new(Channel::new());

    let t0 = Instant::now();
    let th_recv = thread::spawn({
        let ch = Arc::clone(&ch);
        move || {
            sleep(100);
            ch.recv() // t = t0 + 100
        }
    });

    ch.send(7).unwrap(); // blocked from t0 to t0 + 100
    assert!(t0.elapsed() >= Duration::from_millis(100));

    assert_eq!(th_recv.join().unwrap(), Some(7));
}

// A parked receiver is reachable by a non-blocking send.
#[cfg(not(miri))]
#[test]
fn try_send_reaches_parked_receiver() {
    let ch = Arc::new(Channel::new());

    let th_recv = thread::spawn({
        let ch = Arc::clone(&ch);
        move || ch.recv()
    });

    sleep(100);
    assert_eq!(ch.try_send(5), Ok(())); // t = t0 + 100
    assert_eq!(th_recv.join().unwrap(), Some(5));
}

#[test]
fn try_send_unbuffered_without_receiver_fails() {
    let ch = Channel::<i32>::new();

    assert_eq!(ch.try_send(1), Err(TrySendError::Full(1)));
}

// Basic buffered overflow behavior.
#[test]
fn try_send_fills_then_overflows() {
    let ch = Channel::with_capacity(1);

    assert_eq!(ch.try_send(true), Ok(()));
    assert_eq!(ch.try_send(true), Err(TrySendError::Full(true)));
    assert_eq!(ch.recv(), Some(true));
    assert_eq!(ch.try_send(true), Ok(()));
}

// A blocked sender resumes as soon as a receive frees a buffer slot, and
// buffered values keep their order.
#[cfg(not(miri))]
#[test]
fn buffered_send_blocks_at_capacity() {
    let ch = Arc::new(Channel::with_capacity(2));
    ch.send(1).unwrap(); // t = t0
    ch.send(2).unwrap(); // t = t0

    let th_send = thread::spawn({
        let ch = Arc::clone(&ch);
        move || ch.send(3).unwrap() // blocked until t0 + 100
    });

    sleep(100);
    assert_eq!(ch.recv(), Some(1)); // t = t0 + 100
    assert_eq!(ch.recv(), Some(2));
    assert_eq!(ch.recv(), Some(3));

    th_send.join().unwrap();
}

// Close drains buffered values in order, then reports the close forever.
#[test]
fn close_drains_in_order_then_reports_none() {
    let ch = Channel::with_capacity(2);

    ch.send(1).unwrap();
    ch.send(2).unwrap();
    ch.close();

    assert_eq!(ch.recv(), Some(1));
    assert_eq!(ch.recv(), Some(2));
    assert_eq!(ch.recv(), None);
    assert_eq!(ch.recv(), None);
}

#[test]
fn send_after_close_fails() {
    let ch = Channel::with_capacity(2);

    ch.send(3).unwrap();
    ch.close();
    // Double-close is a no-op.
    ch.close();

    assert_eq!(ch.send(13), Err(SendError(13)));
    assert_eq!(ch.try_send(42), Err(TrySendError::Closed(42)));
    assert_eq!(ch.recv(), Some(3));
    assert_eq!(ch.try_recv(), None);
}

#[test]
fn try_recv_reports_empty_and_closed_as_none() {
    let ch = Channel::with_capacity(1);

    assert_eq!(ch.try_recv(), None);
    ch.try_send(9).unwrap();
    assert_eq!(ch.try_recv(), Some(9));
    ch.close();
    assert_eq!(ch.try_recv(), None);
}

// A receiver blocked on an empty channel is woken by the close.
#[cfg(not(miri))]
#[test]
fn blocked_recv_woken_by_close() {
    let ch = Arc::new(Channel::<i32>::new());

    let th_recv = thread::spawn({
        let ch = Arc::clone(&ch);
        move || ch.recv() // blocked from t0 to t0 + 100
    });

    sleep(100);
    ch.close(); // t = t0 + 100

    assert_eq!(th_recv.join().unwrap(), None);
}

// A sender blocked on a full channel fails on close and recovers its value,
// while the buffered values survive the close.
#[cfg(not(miri))]
#[test]
fn blocked_send_fails_on_close() {
    let ch = Arc::new(Channel::with_capacity(1));
    ch.send(1).unwrap();

    let th_send = thread::spawn({
        let ch = Arc::clone(&ch);
        move || ch.send(2) // blocked from t0 to t0 + 100
    });

    sleep(100);
    ch.close(); // t = t0 + 100

    assert_eq!(th_send.join().unwrap(), Err(SendError(2)));
    assert_eq!(ch.recv(), Some(1));
    assert_eq!(ch.recv(), None);
}

// A parked sender is reachable by a non-blocking receive.
#[cfg(not(miri))]
#[test]
fn try_recv_pairs_with_parked_sender() {
    let ch = Arc::new(Channel::new());

    let th_send = thread::spawn({
        let ch = Arc::clone(&ch);
        move || ch.send(11)
    });

    sleep(100);
    assert_eq!(ch.try_recv(), Some(11)); // t = t0 + 100
    th_send.join().unwrap().unwrap();
}

// Senders parked on a full channel are promoted into the buffer in arrival
// order.
#[cfg(not(miri))]
#[test]
fn parked_senders_complete_in_order() {
    let ch = Arc::new(Channel::with_capacity(1));
    ch.send(1).unwrap();

    let th_a = thread::spawn({
        let ch = Arc::clone(&ch);
        move || ch.send(2).unwrap() // parked at t = t0
    });
    sleep(100);
    let th_b = thread::spawn({
        let ch = Arc::clone(&ch);
        move || ch.send(3).unwrap() // parked at t = t0 + 100
    });
    sleep(100);

    assert_eq!(ch.recv(), Some(1)); // t = t0 + 200
    assert_eq!(ch.recv(), Some(2));
    assert_eq!(ch.recv(), Some(3));

    th_a.join().unwrap();
    th_b.join().unwrap();
}

#[test]
fn channel_reference_is_iterable() {
    let ch = Channel::with_capacity(3);
    ch.send(1).unwrap();
    ch.send(2).unwrap();
    ch.close();

    let collected: Vec<_> = (&ch).into_iter().collect();
    assert_eq!(collected, vec![1, 2]);
}

#[test]
fn accessors_track_state() {
    let ch = Channel::with_capacity(2);

    assert_eq!(ch.capacity(), 2);
    assert!(ch.is_empty());
    assert!(!ch.is_closed());

    ch.send(1).unwrap();
    assert_eq!(ch.len(), 1);
    assert!(!ch.is_empty());

    ch.close();
    assert!(ch.is_closed());
    assert_eq!(ch.len(), 1);
}

// SPSC stress test; the iterator ends once the channel is closed and drained.
#[test]
fn spsc_ordered_stress() {
    const CAPACITY: usize = 3;
    const COUNT: usize = if cfg!(miri) { 50 } else { 100_000 };

    let ch = Arc::new(Channel::with_capacity(CAPACITY));

    let th_send = thread::spawn({
        let ch = Arc::clone(&ch);
        move || {
            for i in 0..COUNT {
                ch.send(i).unwrap();
            }
            ch.close();
        }
    });

    let mut expected = 0;
    for value in ch.iter() {
        assert_eq!(value, expected);
        expected += 1;
    }
    assert_eq!(expected, COUNT);

    th_send.join().unwrap();
}

// Rendezvous stress test: every send pairs with one receive.
#[test]
fn rendezvous_stress() {
    const COUNT: usize = if cfg!(miri) { 50 } else { 50_000 };

    let ch = Arc::new(Channel::new());

    let th_send = thread::spawn({
        let ch = Arc::clone(&ch);
        move || {
            for i in 0..COUNT {
                ch.send(i).unwrap();
            }
            ch.close();
        }
    });

    for i in 0..COUNT {
        assert_eq!(ch.recv(), Some(i));
    }
    assert_eq!(ch.recv(), None);

    th_send.join().unwrap();
}

// MPMC stress test: nothing is lost, nothing is duplicated.
#[test]
fn mpmc_stress() {
    const COUNT: usize = if cfg!(miri) { 20 } else { 25_000 };
    const SENDERS: usize = 4;
    const RECEIVERS: usize = 2;

    let ch = Arc::new(Channel::with_capacity(3));

    let th_send: Vec<_> = (0..SENDERS)
        .map(|_| {
            thread::spawn({
                let ch = Arc::clone(&ch);
                move || {
                    for i in 0..COUNT {
                        ch.send(i).unwrap();
                    }
                }
            })
        })
        .collect();

    let th_recv: Vec<_> = (0..RECEIVERS)
        .map(|_| {
            thread::spawn({
                let ch = Arc::clone(&ch);
                move || {
                    let mut count = 0_usize;
                    let mut sum = 0_usize;
                    while let Some(value) = ch.recv() {
                        count += 1;
                        sum += value;
                    }
                    (count, sum)
                }
            })
        })
        .collect();

    for th in th_send {
        th.join().unwrap();
    }
    ch.close();

    let (count, sum) = th_recv
        .into_iter()
        .map(|th| th.join().unwrap())
        .fold((0, 0), |acc, part| (acc.0 + part.0, acc.1 + part.1));

    assert_eq!(count, SENDERS * COUNT);
    assert_eq!(sum, SENDERS * COUNT * (COUNT - 1) / 2);
}
