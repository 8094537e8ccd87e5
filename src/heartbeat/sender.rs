use std::time::Duration;

use crate::link::{Connection, LinkError, VehicleCommand};

/// Interval between ground station heartbeats.
pub const SEND_PERIOD: Duration = Duration::from_secs(1);

//announces the ground station to the vehicle
pub struct HeartbeatSender{
    connection: Connection,
}

impl HeartbeatSender{
    pub fn create(connection: Connection) -> Self{
        HeartbeatSender{ connection }
    }

    pub fn run(&self) -> Result<(), LinkError>{
        self.connection.send_command(VehicleCommand::Heartbeat)
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::link::ScriptedLink;

    #[test]
    fn test_sends_heartbeat_command(){
        let link = ScriptedLink::new();
        let sent = link.sent();
        let sender = HeartbeatSender::create(Connection::new(link));

        sender.run().unwrap();
        sender.run().unwrap();

        assert_eq!(*sent.lock().unwrap(), vec![VehicleCommand::Heartbeat; 2]);
    }
}
