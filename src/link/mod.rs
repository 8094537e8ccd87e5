/**
 * Vehicle Link
 *
 * Connection between the ground station and the vehicle:
 * 1. Wire messages (protocol) and frame codec (framing)
 * 2. FramedLink over a serial port or TCP stream
 * 3. ScriptedLink replaying canned messages
 * 4. Connection, the cloneable handle handed to workers
 * 5. LinkInbox and the link reader, the single owner of the read side
 *
 * Forked workers share the link's file descriptor. Only the link reader
 * receives from it; everyone else reads their kind from the inbox queues.
 */

pub mod framed;
pub mod framing;
pub mod inbox;
pub mod protocol;
pub mod reader;
pub mod scripted;

pub use framed::FramedLink;
pub use framing::{encode_frame, Frame, FrameParser, MsgType};
pub use inbox::LinkInbox;
pub use protocol::*;
pub use reader::{reader_worker, ReaderArgs, READ_POLL};
pub use scripted::ScriptedLink;

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LinkError{
    #[error("link i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("invalid link address {0:?}, expected tcp:<host>:<port> or serial:<path>:<baud>")]
    InvalidAddress(String),

    #[error("payload of {size} bytes does not fit in a frame")]
    PayloadTooLarge{ size: usize },

    #[error("link lock poisoned")]
    Poisoned,

    #[error("no heartbeat within {0:?}")]
    NoHeartbeat(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind{
    Heartbeat,
    Attitude,
    LocalPosition,
}

impl MessageKind{
    pub fn msg_type(self) -> MsgType{
        match self{
            MessageKind::Heartbeat => MsgType::Heartbeat,
            MessageKind::Attitude => MsgType::Attitude,
            MessageKind::LocalPosition => MsgType::LocalPosition,
        }
    }
}

/// Message received from the vehicle.
///
/// Crosses the inbox queues as its kind plus the packed wire payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(into = "WireRecord", try_from = "WireRecord")]
pub enum LinkMessage{
    Heartbeat(HeartbeatMsg),
    Attitude(AttitudeMsg),
    LocalPosition(LocalPositionMsg),
}

#[derive(Serialize, Deserialize)]
struct WireRecord{
    kind: MessageKind,
    payload: Vec<u8>,
}

impl From<LinkMessage> for WireRecord{
    fn from(message: LinkMessage) -> Self{
        WireRecord{
            kind: message.kind(),
            payload: message.payload(),
        }
    }
}

impl TryFrom<WireRecord> for LinkMessage{
    type Error = String;

    fn try_from(record: WireRecord) -> Result<Self, Self::Error>{
        LinkMessage::from_payload(record.kind.msg_type(), &record.payload)
            .ok_or_else(|| format!("{:?} payload of {} bytes", record.kind, record.payload.len()))
    }
}

impl LinkMessage{
    pub fn kind(&self) -> MessageKind{
        match self{
            LinkMessage::Heartbeat(_) => MessageKind::Heartbeat,
            LinkMessage::Attitude(_) => MessageKind::Attitude,
            LinkMessage::LocalPosition(_) => MessageKind::LocalPosition,
        }
    }

    pub fn decode(frame: &Frame) -> Option<Self>{
        Self::from_payload(frame.msg_type, &frame.payload)
    }

    fn from_payload(msg_type: MsgType, payload: &[u8]) -> Option<Self>{
        match msg_type{
            MsgType::Heartbeat => HeartbeatMsg::from_bytes(payload).map(LinkMessage::Heartbeat),
            MsgType::Attitude => AttitudeMsg::from_bytes(payload).map(LinkMessage::Attitude),
            MsgType::LocalPosition => LocalPositionMsg::from_bytes(payload).map(LinkMessage::LocalPosition),
            MsgType::CommandLong => None,
        }
    }

    fn payload(&self) -> Vec<u8>{
        match self{
            LinkMessage::Heartbeat(msg) => msg.to_bytes(),
            LinkMessage::Attitude(msg) => msg.to_bytes(),
            LinkMessage::LocalPosition(msg) => msg.to_bytes(),
        }
    }

    /// Full frame, sync byte to checksum.
    pub fn encode(&self) -> Option<Vec<u8>>{
        encode_frame(self.kind().msg_type(), &self.payload())
    }
}

/// Command sent from the ground station to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VehicleCommand{
    Heartbeat,
    ChangeAltitude{ rate: f64, altitude: f64 },
    ConditionYaw{ angle: f64, rate: f64, direction: f64, relative: bool },
}

impl VehicleCommand{
    //COMMAND_LONG form, None for commands with their own message
    pub fn to_command_long(&self) -> Option<CommandLongMsg>{
        match *self{
            VehicleCommand::Heartbeat => None,
            VehicleCommand::ChangeAltitude{ rate, altitude } => Some(CommandLongMsg::new(
                MAV_CMD_CONDITION_CHANGE_ALT,
                [rate as f32, 0.0, 0.0, 0.0, 0.0, 0.0, altitude as f32],
            )),
            VehicleCommand::ConditionYaw{ angle, rate, direction, relative } => Some(CommandLongMsg::new(
                MAV_CMD_CONDITION_YAW,
                [angle as f32, rate as f32, direction as f32, if relative{ 1.0 }else{ 0.0 }, 0.0, 0.0, 0.0],
            )),
        }
    }
}

pub trait VehicleLink: Send{
    /// Fire-and-forget: callers only log a failure.
    fn send_command(&mut self, command: &VehicleCommand) -> Result<(), LinkError>;

    /// Next message of `kind`. A non-blocking call returns at once.
    fn receive(&mut self, kind: MessageKind, blocking: bool, timeout: Duration) -> Option<LinkMessage>;

    /// Next message of any kind, waiting at most `timeout`.
    fn receive_any(&mut self, timeout: Duration) -> Option<LinkMessage>;
}

/// Cloneable handle to one vehicle link.
///
/// After a fork every worker owns its own copy of the link object while the
/// underlying file descriptor is shared. Every copy can send; only one
/// process may receive, see `reader_worker`.
#[derive(Clone)]
pub struct Connection{
    link: Arc<Mutex<Box<dyn VehicleLink>>>,
}

impl Connection{
    pub fn new(link: impl VehicleLink + 'static) -> Self{
        Connection{
            link: Arc::new(Mutex::new(Box::new(link))),
        }
    }

    pub fn send_command(&self, command: VehicleCommand) -> Result<(), LinkError>{
        let mut link = self.link.lock().map_err(|_| LinkError::Poisoned)?;
        link.send_command(&command)
    }

    pub fn receive(&self, kind: MessageKind, blocking: bool, timeout: Duration) -> Option<LinkMessage>{
        match self.link.lock(){
            Ok(mut link) => link.receive(kind, blocking, timeout),
            Err(_) => {
                warn!("link lock poisoned, receive skipped");
                None
            }
        }
    }

    pub fn receive_any(&self, timeout: Duration) -> Option<LinkMessage>{
        match self.link.lock(){
            Ok(mut link) => link.receive_any(timeout),
            Err(_) => {
                warn!("link lock poisoned, receive skipped");
                None
            }
        }
    }

    pub fn wait_heartbeat(&self, timeout: Duration) -> Result<HeartbeatMsg, LinkError>{
        match self.receive(MessageKind::Heartbeat, true, timeout){
            Some(LinkMessage::Heartbeat(msg)) => Ok(msg),
            _ => Err(LinkError::NoHeartbeat(timeout)),
        }
    }
}

impl fmt::Debug for Connection{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddress{
    Tcp{ host: String, port: u16 },
    Serial{ path: String, baud: u32 },
}

impl FromStr for LinkAddress{
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err>{
        let invalid = || LinkError::InvalidAddress(s.to_string());

        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (target, number) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if target.is_empty(){
            return Err(invalid());
        }

        match scheme{
            "tcp" => Ok(LinkAddress::Tcp{
                host: target.to_string(),
                port: number.parse().map_err(|_| invalid())?,
            }),
            "serial" => Ok(LinkAddress::Serial{
                path: target.to_string(),
                baud: number.parse().map_err(|_| invalid())?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for LinkAddress{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        match self{
            LinkAddress::Tcp{ host, port } => write!(f, "tcp:{host}:{port}"),
            LinkAddress::Serial{ path, baud } => write!(f, "serial:{path}:{baud}"),
        }
    }
}

pub fn open_link(address: &LinkAddress) -> Result<Connection, LinkError>{
    info!(%address, "opening vehicle link");
    let connection = match address{
        LinkAddress::Tcp{ host, port } => Connection::new(framed::open_tcp(&format!("{host}:{port}"))?),
        LinkAddress::Serial{ path, baud } => Connection::new(framed::open_serial(path, *baud)?),
    };
    Ok(connection)
}
