use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::HeartbeatStatus;
use crate::link::{LinkInbox, MessageKind};

/// Consecutive misses after which the link is reported disconnected.
pub const DISCONNECT_THRESHOLD: u32 = 5;

/// How long one `run` waits for a heartbeat.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Miss-counter state machine over incoming vehicle heartbeats.
///
/// Starts `Connected`. Any receipt resets the counter and reconnects; the
/// status flips to `Disconnected` once `DISCONNECT_THRESHOLD` receives in a
/// row came back empty, and stays there until the next receipt.
pub struct HeartbeatMonitor{
    inbox: LinkInbox,
    status: HeartbeatStatus,
    miss_count: u32,
    timeout: Duration,
}

impl HeartbeatMonitor{
    pub fn create(inbox: LinkInbox) -> Self{
        HeartbeatMonitor{
            inbox,
            status: HeartbeatStatus::Connected,
            miss_count: 0,
            timeout: RECEIVE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self{
        self.timeout = timeout;
        self
    }

    /// One blocking receive attempt, then the state transition.
    pub fn run(&mut self) -> HeartbeatStatus{
        let received = self
            .inbox
            .receive(MessageKind::Heartbeat, true, self.timeout)
            .is_some();
        self.observe(received)
    }

    pub fn observe(&mut self, received: bool) -> HeartbeatStatus{
        if received{
            if self.status == HeartbeatStatus::Disconnected{
                info!(missed = self.miss_count, "heartbeat back, link reconnected");
            }else{
                debug!("heartbeat received");
            }
            self.miss_count = 0;
            self.status = HeartbeatStatus::Connected;
            return self.status;
        }

        self.miss_count = self.miss_count.saturating_add(1);
        warn!(missed = self.miss_count, "missed heartbeat");
        if self.miss_count >= DISCONNECT_THRESHOLD && self.status == HeartbeatStatus::Connected{
            error!(missed = self.miss_count, "link lost");
            self.status = HeartbeatStatus::Disconnected;
        }
        self.status
    }

    pub fn status(&self) -> HeartbeatStatus{
        self.status
    }

    pub fn miss_count(&self) -> u32{
        self.miss_count
    }
}
