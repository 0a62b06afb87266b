//! Timer-driven channels.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::Channel;

/// Returns a channel that receives the current time once `duration` has
/// elapsed, and is closed right after.
///
/// The channel is buffered with a capacity of one, so the timer thread never
/// blocks and the timestamp is kept even if it is only received later.
/// Receiving from the channel a second time yields `None`. Composed with a
/// [`Select`](crate::Select), this provides a timeout for any set of channel
/// operations.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// let timeout = chanix::after(Duration::from_millis(10));
///
/// assert!(timeout.recv().is_some());
/// assert!(timeout.recv().is_none());
/// ```
pub fn after(duration: Duration) -> Arc<Channel<Instant>> {
    let channel = Arc::new(Channel::with_capacity(1));
    let timer = Arc::clone(&channel);

    thread::spawn(move || {
        thread::sleep(duration);
        let _ = timer.try_send(Instant::now());
        timer.close();
    });

    channel
}
