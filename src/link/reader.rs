use std::time::Duration;

use tracing::{debug, info};

use super::{Connection, LinkInbox};
use crate::worker::{Signal, WorkerArgs};

/// How long the reader waits on the link before re-checking its signal.
pub const READ_POLL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ReaderArgs{
    pub connection: Connection,
    pub inbox: LinkInbox,
    pub signal: Signal,
    pub poll: Duration,
}

impl WorkerArgs for ReaderArgs{
    fn validate(&self) -> Result<(), String>{
        if self.poll.is_zero(){
            return Err("link read poll must be non-zero".into());
        }
        Ok(())
    }
}

/// Sole receiver on the link. Every decoded message goes to its inbox queue.
pub fn reader_worker(args: ReaderArgs) -> anyhow::Result<()>{
    let mut routed = 0u64;
    let mut discarded = 0u64;
    info!("link reader running");

    while !args.signal.is_exit_requested(){
        args.signal.check_pause();

        let message = match args.connection.receive_any(args.poll){
            Some(message) => message,
            None => continue,
        };
        routed += 1;
        if args.inbox.route(&message)?{
            discarded += 1;
            debug!(kind = ?message.kind(), discarded, "inbox overflow");
        }
    }

    info!(routed, discarded, "link reader exiting");
    Ok(())
}
