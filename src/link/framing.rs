//frame format: [SYNC][TYPE][LEN][PAYLOAD...][CHECKSUM]
//              0xAA  1byte 1byte  LEN bytes   1byte
//checksum is the wrapping sum of TYPE, LEN and PAYLOAD

pub const SYNC_BYTE: u8 = 0xAA;
pub const MAX_MSG_SIZE: usize = 244;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType{
    Heartbeat = 0x04,
    Attitude = 0x05,
    LocalPosition = 0x06,
    CommandLong = 0x10,
}

impl MsgType{
    pub fn from_u8(val: u8) -> Option<Self>{
        match val{
            0x04 => Some(MsgType::Heartbeat),
            0x05 => Some(MsgType::Attitude),
            0x06 => Some(MsgType::LocalPosition),
            0x10 => Some(MsgType::CommandLong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame{
    pub msg_type: MsgType,
    pub payload: Vec<u8>,
}

pub fn checksum(data: &[u8]) -> u8{
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode one frame. `None` if the payload does not fit in a frame.
pub fn encode_frame(msg_type: MsgType, payload: &[u8]) -> Option<Vec<u8>>{
    if payload.len() > MAX_MSG_SIZE{
        return None;
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(SYNC_BYTE);
    frame.push(msg_type as u8);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame[1..]));
    Some(frame)
}

//incremental decoder, resyncs on the next sync byte after garbage or a bad checksum
#[derive(Debug, Default)]
pub struct FrameParser{
    rx_buffer: Vec<u8>,
}

impl FrameParser{
    pub fn new() -> Self{
        FrameParser{ rx_buffer: Vec::with_capacity(512) }
    }

    pub fn extend(&mut self, data: &[u8]){
        self.rx_buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize{
        self.rx_buffer.len()
    }

    pub fn next_frame(&mut self) -> Option<Frame>{
        loop{
            let sync_pos = match self.rx_buffer.iter().position(|&b| b == SYNC_BYTE){
                Some(pos) => pos,
                None => {
                    self.rx_buffer.clear();
                    return None;
                }
            };
            if sync_pos > 0{
                self.rx_buffer.drain(0..sync_pos);
            }

            if self.rx_buffer.len() < 4{
                return None;
            }

            let len = self.rx_buffer[2] as usize;
            if len > MAX_MSG_SIZE{
                self.rx_buffer.remove(0);
                continue;
            }

            let frame_len = 4 + len; //sync + type + len + payload + checksum
            if self.rx_buffer.len() < frame_len{
                return None;
            }

            if self.rx_buffer[3 + len] != checksum(&self.rx_buffer[1..3 + len]){
                self.rx_buffer.remove(0);
                continue;
            }

            let type_byte = self.rx_buffer[1];
            let payload = self.rx_buffer[3..3 + len].to_vec();
            self.rx_buffer.drain(0..frame_len);

            match MsgType::from_u8(type_byte){
                Some(msg_type) => return Some(Frame{ msg_type, payload }),
                //valid frame of a type we don't speak
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests{
    use super::*;

    #[test]
    fn test_msg_type_conversion(){
        assert_eq!(MsgType::from_u8(0x04), Some(MsgType::Heartbeat));
        assert_eq!(MsgType::from_u8(0x06), Some(MsgType::LocalPosition));
        assert_eq!(MsgType::from_u8(0xFF), None);
    }

    #[test]
    fn test_checksum(){
        let data = [0x01, 0x05, 0xAB, 0xCD];
        assert_eq!(checksum(&data), 0x01u8.wrapping_add(0x05).wrapping_add(0xAB).wrapping_add(0xCD));
    }

    #[test]
    fn test_oversized_payload_rejected(){
        assert!(encode_frame(MsgType::Attitude, &[0u8; MAX_MSG_SIZE + 1]).is_none());
    }

    #[test]
    fn test_parser_survives_noise(){
        let mut stream = vec![0x00, 0x13, SYNC_BYTE, 0x99, 0xFF]; //garbage and a false sync
        stream.extend(encode_frame(MsgType::Heartbeat, &[1, 2, 3]).unwrap());

        let mut corrupted = encode_frame(MsgType::Attitude, &[9, 9]).unwrap();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        stream.extend(corrupted);

        stream.extend(encode_frame(MsgType::LocalPosition, &[4, 5]).unwrap());

        let mut parser = FrameParser::new();
        //feed in small chunks like a serial port would
        let mut frames = Vec::new();
        for chunk in stream.chunks(3){
            parser.extend(chunk);
            while let Some(frame) = parser.next_frame(){
                frames.push(frame);
            }
        }

        assert_eq!(frames, vec![
            Frame{ msg_type: MsgType::Heartbeat, payload: vec![1, 2, 3] },
            Frame{ msg_type: MsgType::LocalPosition, payload: vec![4, 5] },
        ]);
    }

    #[test]
    fn test_partial_frame_waits_for_more(){
        let frame = encode_frame(MsgType::Heartbeat, &[7; 8]).unwrap();
        let mut parser = FrameParser::new();

        parser.extend(&frame[..5]);
        assert!(parser.next_frame().is_none());
        assert_eq!(parser.buffered(), 5);

        parser.extend(&frame[5..]);
        assert_eq!(parser.next_frame().unwrap().payload, vec![7; 8]);
    }
}
