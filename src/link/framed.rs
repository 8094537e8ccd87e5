use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, warn};

use super::framing::{encode_frame, FrameParser, MsgType};
use super::protocol::{HeartbeatMsg, WireMessage};
use super::{LinkError, LinkMessage, MessageKind, VehicleCommand, VehicleLink};
use crate::ring_buffer::RingBuffer;

const READ_TIMEOUT: Duration = Duration::from_millis(10);
const INBOX_DEPTH: usize = 16;

/// Vehicle link speaking the sync-byte frame protocol over any byte stream.
///
/// Frames of other kinds read while waiting for a specific one are parked in
/// a per-kind inbox. The inbox keeps the freshest `INBOX_DEPTH` entries.
///
/// Not safe to read from several processes at once: whichever process reads
/// a chunk keeps its frames. Forked workers go through `LinkInbox` instead.
pub struct FramedLink<S>{
    stream: S,
    parser: FrameParser,
    inbox: HashMap<MessageKind, RingBuffer<LinkMessage>>,
}

impl<S: Read + Write + Send> FramedLink<S>{
    /// `stream` should have a short read timeout so polling stays responsive.
    pub fn new(stream: S) -> Self{
        FramedLink{
            stream,
            parser: FrameParser::new(),
            inbox: HashMap::new(),
        }
    }

    pub fn send_frame(&mut self, msg_type: MsgType, payload: &[u8]) -> Result<(), LinkError>{
        let frame = encode_frame(msg_type, payload).ok_or(LinkError::PayloadTooLarge{ size: payload.len() })?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    //one read from the stream, decoded frames go to the inbox
    fn pump(&mut self) -> io::Result<usize>{
        let mut read_buf = [0u8; 256];
        let n = match self.stream.read(&mut read_buf){
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "link closed")),
            Ok(n) => n,
            Err(ref e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => return Ok(0),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        };

        self.parser.extend(&read_buf[..n]);
        let mut decoded = 0;
        while let Some(frame) = self.parser.next_frame(){
            match LinkMessage::decode(&frame){
                Some(message) => {
                    self.inbox
                        .entry(message.kind())
                        .or_insert_with(|| RingBuffer::new(INBOX_DEPTH))
                        .push(message);
                    decoded += 1;
                }
                None => debug!(msg_type = ?frame.msg_type, len = frame.payload.len(), "undecodable frame skipped"),
            }
        }
        Ok(decoded)
    }

    fn take(&mut self, kind: MessageKind) -> Option<LinkMessage>{
        self.inbox.get_mut(&kind).and_then(|ring| ring.pop())
    }

    fn take_any(&mut self) -> Option<LinkMessage>{
        [MessageKind::Heartbeat, MessageKind::Attitude, MessageKind::LocalPosition]
            .into_iter()
            .find_map(|kind| self.take(kind))
    }

    //take, pump, take again until something turns up or time runs out
    fn poll_inbox<F>(&mut self, blocking: bool, timeout: Duration, mut take: F) -> Option<LinkMessage>
    where
        F: FnMut(&mut Self) -> Option<LinkMessage>,
    {
        let deadline = Instant::now() + timeout;
        loop{
            if let Some(message) = take(self){
                return Some(message);
            }

            if let Err(e) = self.pump(){
                warn!(error = %e, "link read failed");
                if blocking{
                    thread::sleep(READ_TIMEOUT);
                }
            }

            if let Some(message) = take(self){
                return Some(message);
            }
            if !blocking || Instant::now() >= deadline{
                return None;
            }
        }
    }

    /// Messages of `kind` overwritten in the inbox before anyone asked for them.
    pub fn dropped(&self, kind: MessageKind) -> u64{
        self.inbox.get(&kind).map_or(0, |ring| ring.dropped())
    }
}

impl<S: Read + Write + Send> VehicleLink for FramedLink<S>{
    fn send_command(&mut self, command: &VehicleCommand) -> Result<(), LinkError>{
        match command.to_command_long(){
            Some(msg) => self.send_frame(MsgType::CommandLong, &msg.to_bytes()),
            None => self.send_frame(MsgType::Heartbeat, &HeartbeatMsg::ground_station().to_bytes()),
        }
    }

    fn receive(&mut self, kind: MessageKind, blocking: bool, timeout: Duration) -> Option<LinkMessage>{
        self.poll_inbox(blocking, timeout, |link| link.take(kind))
    }

    fn receive_any(&mut self, timeout: Duration) -> Option<LinkMessage>{
        self.poll_inbox(true, timeout, Self::take_any)
    }
}

pub fn open_serial(path: &str, baud: u32) -> Result<FramedLink<Box<dyn SerialPort>>, LinkError>{
    let port = serialport::new(path, baud)
        .timeout(READ_TIMEOUT)
        .open()?;
    Ok(FramedLink::new(port))
}

pub fn open_tcp(addr: &str) -> Result<FramedLink<TcpStream>, LinkError>{
    let stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.set_nodelay(true)?;
    Ok(FramedLink::new(stream))
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::link::protocol::{AttitudeMsg, LocalPositionMsg, CommandLongMsg, MAV_CMD_CONDITION_CHANGE_ALT};
    use crate::link::framing::SYNC_BYTE;
    use std::io::Cursor;

    //in-memory stream: reads from a canned buffer, records writes
    struct Loopback{
        rx: Cursor<Vec<u8>>,
        tx: Vec<u8>,
    }

    impl Read for Loopback{
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>{
            match self.rx.read(buf)?{
                0 => Err(io::Error::new(io::ErrorKind::TimedOut, "idle")),
                n => Ok(n),
            }
        }
    }

    impl Write for Loopback{
        fn write(&mut self, buf: &[u8]) -> io::Result<usize>{
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()>{
            Ok(())
        }
    }

    fn link_with(messages: &[LinkMessage]) -> FramedLink<Loopback>{
        let mut rx = Vec::new();
        for message in messages{
            rx.extend(message.encode().unwrap());
        }
        FramedLink::new(Loopback{ rx: Cursor::new(rx), tx: Vec::new() })
    }

    #[test]
    fn test_receive_parks_other_kinds(){
        let attitude = AttitudeMsg{ time_boot_ms: 120, yaw: 0.5, ..Default::default() };
        let position = LocalPositionMsg{ time_boot_ms: 150, z: 29.0, ..Default::default() };
        let mut link = link_with(&[LinkMessage::Attitude(attitude), LinkMessage::LocalPosition(position)]);

        //position is read past the attitude frame, which stays parked
        match link.receive(MessageKind::LocalPosition, true, Duration::from_millis(50)){
            Some(LinkMessage::LocalPosition(msg)) => assert_eq!({ msg.time_boot_ms }, 150),
            other => panic!("unexpected {other:?}"),
        }
        match link.receive(MessageKind::Attitude, false, Duration::ZERO){
            Some(LinkMessage::Attitude(msg)) => assert_eq!({ msg.time_boot_ms }, 120),
            other => panic!("unexpected {other:?}"),
        }
        assert!(link.receive(MessageKind::Heartbeat, false, Duration::ZERO).is_none());
    }

    #[test]
    fn test_blocking_receive_times_out(){
        let mut link = link_with(&[]);
        let start = Instant::now();
        assert!(link.receive(MessageKind::Heartbeat, true, Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_inbox_keeps_freshest(){
        let beats: Vec<LinkMessage> = (0..INBOX_DEPTH as u32 + 4)
            .map(|i| LinkMessage::Heartbeat(HeartbeatMsg{ custom_mode: i, ..Default::default() }))
            .collect();
        let mut link = link_with(&beats);

        //drain the stream without consuming heartbeats
        while link.pump().map(|n| n > 0).unwrap_or(false){}

        assert_eq!(link.dropped(MessageKind::Heartbeat), 4);
        match link.receive(MessageKind::Heartbeat, false, Duration::ZERO){
            Some(LinkMessage::Heartbeat(msg)) => assert_eq!({ msg.custom_mode }, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_receive_any_returns_parked_frames_first(){
        let attitude = AttitudeMsg{ time_boot_ms: 120, ..Default::default() };
        let mut link = link_with(&[
            LinkMessage::Attitude(attitude),
            LinkMessage::Heartbeat(HeartbeatMsg::default()),
        ]);

        //parks the attitude frame
        assert!(link.receive(MessageKind::Heartbeat, true, Duration::from_millis(50)).is_some());

        match link.receive_any(Duration::from_millis(50)){
            Some(LinkMessage::Attitude(msg)) => assert_eq!({ msg.time_boot_ms }, 120),
            other => panic!("unexpected {other:?}"),
        }
        assert!(link.receive_any(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_send_command_writes_command_long_frame(){
        let mut link = link_with(&[]);
        link.send_command(&VehicleCommand::ChangeAltitude{ rate: 1.0, altitude: 30.0 }).unwrap();

        let tx = &link.stream.tx;
        assert_eq!(tx[0], SYNC_BYTE);
        assert_eq!(tx[1], MsgType::CommandLong as u8);
        let msg = CommandLongMsg::from_bytes(&tx[3..tx.len() - 1]).unwrap();
        assert_eq!({ msg.command }, MAV_CMD_CONDITION_CHANGE_ALT);
    }
}
