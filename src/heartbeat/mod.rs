pub mod receiver;
pub mod sender;
pub mod worker;

pub use receiver::{HeartbeatMonitor, DISCONNECT_THRESHOLD, RECEIVE_TIMEOUT};
pub use sender::{HeartbeatSender, SEND_PERIOD};
pub use worker::{receiver_worker, sender_worker, ReceiverArgs, SenderArgs};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Liveness of the vehicle link as seen by the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatStatus{
    Connected,
    Disconnected,
}

impl fmt::Display for HeartbeatStatus{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        match self{
            HeartbeatStatus::Connected => f.write_str("Connected"),
            HeartbeatStatus::Disconnected => f.write_str("Disconnected"),
        }
    }
}
