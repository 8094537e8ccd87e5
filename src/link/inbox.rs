/**
 * Link Inbox
 *
 * One shared queue per message kind. The link reader routes every decoded
 * message into the queue of its kind; the heartbeat monitor and telemetry
 * fusion receive from these queues, never from the link itself.
 *
 * A full queue discards its oldest entry, so the reader never blocks on a
 * slow consumer and that consumer always sees recent samples.
 */

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{LinkMessage, MessageKind};
use crate::queue::{BoundedQueue, Drainable, QueueError};

#[derive(Debug, Clone)]
pub struct LinkInbox{
    heartbeat: BoundedQueue<LinkMessage>,
    attitude: BoundedQueue<LinkMessage>,
    position: BoundedQueue<LinkMessage>,
}

impl LinkInbox{
    /// `capacity` applies to each kind; `<= 0` means unbounded.
    pub fn create(capacity: i64) -> Result<Self, QueueError>{
        Ok(LinkInbox{
            heartbeat: BoundedQueue::new("inbox.heartbeat", capacity)?,
            attitude: BoundedQueue::new("inbox.attitude", capacity)?,
            position: BoundedQueue::new("inbox.position", capacity)?,
        })
    }

    fn queue(&self, kind: MessageKind) -> &BoundedQueue<LinkMessage>{
        match kind{
            MessageKind::Heartbeat => &self.heartbeat,
            MessageKind::Attitude => &self.attitude,
            MessageKind::LocalPosition => &self.position,
        }
    }

    /// Queue `message` under its kind. Returns `true` when an older message
    /// had to be discarded to make room.
    pub fn route(&self, message: &LinkMessage) -> Result<bool, QueueError>{
        let queue = self.queue(message.kind());
        match queue.try_put(message){
            Ok(()) => return Ok(false),
            Err(QueueError::Full) => {}
            Err(e) => return Err(e),
        }

        //a consumer may have made room in between
        match queue.try_get(){
            Ok(_) | Err(QueueError::Empty) => {}
            Err(e) => return Err(e),
        }
        match queue.try_put(message){
            Ok(()) => debug!(queue = queue.name(), "inbox full, oldest message discarded"),
            Err(QueueError::Full) => debug!(queue = queue.name(), "inbox still full, message discarded"),
            Err(e) => return Err(e),
        }
        Ok(true)
    }

    /// Next message of `kind`. `None` on timeout, when a non-blocking call
    /// finds nothing, or when a drain released the caller.
    pub fn receive(&self, kind: MessageKind, blocking: bool, timeout: Duration) -> Option<LinkMessage>{
        let queue = self.queue(kind);
        let received = if blocking{ queue.get(timeout) }else{ queue.try_get() };

        match received{
            Ok(message) => message,
            Err(QueueError::Timeout) | Err(QueueError::Empty) => None,
            Err(e) => {
                warn!(queue = queue.name(), error = %e, "inbox receive failed");
                None
            }
        }
    }

    pub fn len(&self, kind: MessageKind) -> usize{
        self.queue(kind).len()
    }

    /// The three queues, for drain bookkeeping.
    pub fn drainables(&self) -> Vec<Arc<dyn Drainable>>{
        vec![self.heartbeat.drainable(), self.attitude.drainable(), self.position.drainable()]
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::link::{AttitudeMsg, HeartbeatMsg};
    use std::thread;
    use std::time::Instant;

    fn beat(custom_mode: u32) -> LinkMessage{
        LinkMessage::Heartbeat(HeartbeatMsg{ custom_mode, ..Default::default() })
    }

    #[test]
    fn test_messages_split_by_kind(){
        let inbox = LinkInbox::create(4).unwrap();
        inbox.route(&beat(1)).unwrap();
        inbox.route(&LinkMessage::Attitude(AttitudeMsg{ time_boot_ms: 7, ..Default::default() })).unwrap();
        inbox.route(&beat(2)).unwrap();

        assert_eq!(inbox.len(MessageKind::Heartbeat), 2);
        assert_eq!(inbox.len(MessageKind::Attitude), 1);
        assert_eq!(inbox.len(MessageKind::LocalPosition), 0);

        match inbox.receive(MessageKind::Attitude, false, Duration::ZERO){
            Some(LinkMessage::Attitude(msg)) => assert_eq!({ msg.time_boot_ms }, 7),
            other => panic!("unexpected {other:?}"),
        }
        for expected in [1u32, 2]{
            match inbox.receive(MessageKind::Heartbeat, false, Duration::ZERO){
                Some(LinkMessage::Heartbeat(msg)) => assert_eq!({ msg.custom_mode }, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(inbox.receive(MessageKind::LocalPosition, false, Duration::ZERO).is_none());
    }

    #[test]
    fn test_full_kind_discards_oldest(){
        let inbox = LinkInbox::create(2).unwrap();
        assert!(!inbox.route(&beat(1)).unwrap());
        assert!(!inbox.route(&beat(2)).unwrap());
        assert!(inbox.route(&beat(3)).unwrap());

        //other kinds are unaffected by a full heartbeat queue
        assert!(!inbox.route(&LinkMessage::Attitude(AttitudeMsg::default())).unwrap());

        let kept: Vec<u32> = (0..2)
            .filter_map(|_| match inbox.receive(MessageKind::Heartbeat, false, Duration::ZERO){
                Some(LinkMessage::Heartbeat(msg)) => Some(msg.custom_mode),
                _ => None,
            })
            .collect();
        assert_eq!(kept, vec![2, 3]);
    }

    #[test]
    fn test_blocking_receive_times_out(){
        let inbox = LinkInbox::create(2).unwrap();
        let start = Instant::now();
        assert!(inbox.receive(MessageKind::Heartbeat, true, Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_drain_releases_waiting_receiver(){
        let inbox = LinkInbox::create(2).unwrap();
        let waiting = inbox.clone();
        let handle = thread::spawn(move || waiting.receive(MessageKind::Attitude, true, Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        for queue in inbox.drainables(){
            queue.drain().unwrap();
        }

        assert!(handle.join().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
