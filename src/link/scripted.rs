use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{LinkError, LinkMessage, MessageKind, VehicleCommand, VehicleLink};

/// In-memory link: replays queued messages in arrival order and records
/// every command sent through it.
///
/// A forked worker gets its own copy of the remaining script and of the
/// command log, so only one process (the link reader) should receive.
#[derive(Default)]
pub struct ScriptedLink{
    script: VecDeque<LinkMessage>,
    sent: Arc<Mutex<Vec<VehicleCommand>>>,
}

impl ScriptedLink{
    pub fn new() -> Self{
        Self::default()
    }

    pub fn with_messages(messages: impl IntoIterator<Item = LinkMessage>) -> Self{
        let mut link = Self::new();
        for message in messages{
            link.push(message);
        }
        link
    }

    pub fn push(&mut self, message: LinkMessage){
        self.script.push_back(message);
    }

    /// Shared log of sent commands, readable after the link moved into a `Connection`.
    pub fn sent(&self) -> Arc<Mutex<Vec<VehicleCommand>>>{
        Arc::clone(&self.sent)
    }
}

impl VehicleLink for ScriptedLink{
    fn send_command(&mut self, command: &VehicleCommand) -> Result<(), LinkError>{
        self.sent.lock().map_err(|_| LinkError::Poisoned)?.push(*command);
        Ok(())
    }

    fn receive(&mut self, kind: MessageKind, blocking: bool, timeout: Duration) -> Option<LinkMessage>{
        let message = self
            .script
            .iter()
            .position(|message| message.kind() == kind)
            .and_then(|index| self.script.remove(index));
        if message.is_none() && blocking{
            //nothing will ever arrive, behave like a silent vehicle
            thread::sleep(timeout);
        }
        message
    }

    fn receive_any(&mut self, timeout: Duration) -> Option<LinkMessage>{
        let message = self.script.pop_front();
        if message.is_none(){
            thread::sleep(timeout);
        }
        message
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::link::protocol::{AttitudeMsg, HeartbeatMsg};
    use crate::link::Connection;
    use std::time::Instant;

    #[test]
    fn test_replays_per_kind_in_order(){
        let mut link = ScriptedLink::with_messages([
            LinkMessage::Attitude(AttitudeMsg{ time_boot_ms: 1, ..Default::default() }),
            LinkMessage::Heartbeat(HeartbeatMsg::default()),
            LinkMessage::Attitude(AttitudeMsg{ time_boot_ms: 2, ..Default::default() }),
        ]);

        for expected in [1u32, 2]{
            match link.receive(MessageKind::Attitude, false, Duration::ZERO){
                Some(LinkMessage::Attitude(msg)) => assert_eq!({ msg.time_boot_ms }, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(link.receive(MessageKind::Heartbeat, false, Duration::ZERO).is_some());
        assert!(link.receive(MessageKind::Heartbeat, false, Duration::ZERO).is_none());
    }

    #[test]
    fn test_receive_any_keeps_arrival_order(){
        let mut link = ScriptedLink::with_messages([
            LinkMessage::Attitude(AttitudeMsg::default()),
            LinkMessage::Heartbeat(HeartbeatMsg::default()),
        ]);

        assert_eq!(link.receive_any(Duration::ZERO).map(|m| m.kind()), Some(MessageKind::Attitude));
        assert_eq!(link.receive_any(Duration::ZERO).map(|m| m.kind()), Some(MessageKind::Heartbeat));
        assert!(link.receive_any(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_blocking_receive_waits_out_timeout(){
        let mut link = ScriptedLink::new();
        let start = Instant::now();
        assert!(link.receive(MessageKind::LocalPosition, true, Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_records_sent_commands(){
        let link = ScriptedLink::new();
        let sent = link.sent();
        let connection = Connection::new(link);

        connection.send_command(VehicleCommand::Heartbeat).unwrap();
        connection.send_command(VehicleCommand::ChangeAltitude{ rate: 1.0, altitude: 30.0 }).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], VehicleCommand::ChangeAltitude{ rate: 1.0, altitude: 30.0 });
    }
}
