pub mod manager;
pub mod signal;

pub use manager::{ExitStatus, JoinSummary, WorkerArgs, WorkerEntry, WorkerError, WorkerExit, WorkerGroup, WorkerSpec};
pub use signal::Signal;

use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::queue::{BoundedQueue, PutMode, QueueError};

/// How long a worker blocks in one queue call before re-checking its signal.
pub const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Hand `item` to the next stage, retrying until it lands or exit is requested.
///
/// Returns `false` when the item was abandoned: exit was requested, or a
/// non-blocking queue was full.
pub fn forward<T: Serialize + DeserializeOwned>(
    queue: &BoundedQueue<T>,
    item: &T,
    signal: &Signal,
) -> Result<bool, QueueError>{
    if queue.mode() == PutMode::NonBlocking{
        return match queue.put(item){
            Ok(()) => Ok(true),
            Err(QueueError::Full) => {
                debug!(queue = queue.name(), "queue full, item dropped");
                Ok(false)
            }
            Err(e) => Err(e),
        };
    }

    loop{
        match queue.put_timeout(item, QUEUE_POLL){
            Ok(()) => return Ok(true),
            Err(QueueError::Timeout) if signal.is_exit_requested() => return Ok(false),
            Err(QueueError::Timeout) => {}
            Err(e) => return Err(e),
        }
    }
}

/// Sleep for `duration` in `QUEUE_POLL` steps, cut short by an exit request.
pub fn idle(signal: &Signal, duration: Duration){
    let deadline = Instant::now() + duration;
    while !signal.is_exit_requested(){
        let now = Instant::now();
        if now >= deadline{
            break;
        }
        thread::sleep((deadline - now).min(QUEUE_POLL));
    }
}
