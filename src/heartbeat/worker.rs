use std::time::Duration;

use tracing::{debug, info, warn};

use super::{HeartbeatMonitor, HeartbeatSender, HeartbeatStatus};
use crate::link::{Connection, LinkInbox};
use crate::queue::BoundedQueue;
use crate::worker::{forward, idle, Signal, WorkerArgs};

#[derive(Clone)]
pub struct ReceiverArgs{
    pub inbox: LinkInbox,
    pub output: BoundedQueue<HeartbeatStatus>,
    pub signal: Signal,
    pub timeout: Duration,
}

impl WorkerArgs for ReceiverArgs{
    fn validate(&self) -> Result<(), String>{
        if self.timeout.is_zero(){
            return Err("heartbeat receive timeout must be non-zero".into());
        }
        Ok(())
    }
}

/// Pushes the monitor status every cycle, repeats included.
pub fn receiver_worker(args: ReceiverArgs) -> anyhow::Result<()>{
    let mut monitor = HeartbeatMonitor::create(args.inbox).with_timeout(args.timeout);
    info!("heartbeat receiver running");

    while !args.signal.is_exit_requested(){
        args.signal.check_pause();

        let status = monitor.run();
        if !forward(&args.output, &status, &args.signal)?{
            break;
        }
    }

    info!("heartbeat receiver exiting");
    Ok(())
}

#[derive(Clone)]
pub struct SenderArgs{
    pub connection: Connection,
    pub signal: Signal,
    pub period: Duration,
}

impl WorkerArgs for SenderArgs{
    fn validate(&self) -> Result<(), String>{
        if self.period.is_zero(){
            return Err("heartbeat period must be non-zero".into());
        }
        Ok(())
    }
}

pub fn sender_worker(args: SenderArgs) -> anyhow::Result<()>{
    let sender = HeartbeatSender::create(args.connection);
    info!("heartbeat sender running");

    while !args.signal.is_exit_requested(){
        args.signal.check_pause();

        match sender.run(){
            Ok(()) => debug!("heartbeat sent"),
            Err(e) => warn!(error = %e, "heartbeat send failed"),
        }
        idle(&args.signal, args.period);
    }

    info!("heartbeat sender exiting");
    Ok(())
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::link::ScriptedLink;
    use std::thread;

    #[test]
    fn test_receiver_reports_every_cycle(){
        let output: BoundedQueue<HeartbeatStatus> = BoundedQueue::new("heartbeat", 16).unwrap();
        let signal = Signal::new().unwrap();
        let args = ReceiverArgs{
            inbox: LinkInbox::create(4).unwrap(),
            output: output.clone(),
            signal: signal.clone(),
            timeout: Duration::from_millis(5),
        };

        let handle = thread::spawn(move || receiver_worker(args));

        let mut statuses = Vec::new();
        while statuses.len() < 6{
            if let Some(status) = output.get(Duration::from_secs(1)).unwrap(){
                statuses.push(status);
            }
        }
        signal.request_exit();
        output.fill_and_drain().unwrap();
        handle.join().unwrap().unwrap();

        assert_eq!(&statuses[..4], &[HeartbeatStatus::Connected; 4]);
        assert_eq!(statuses[4], HeartbeatStatus::Disconnected);
        assert_eq!(statuses[5], HeartbeatStatus::Disconnected);
    }

    #[test]
    fn test_zero_period_rejected(){
        let args = SenderArgs{
            connection: Connection::new(ScriptedLink::new()),
            signal: Signal::new().unwrap(),
            period: Duration::ZERO,
        };
        assert!(args.validate().is_err());
    }
}
