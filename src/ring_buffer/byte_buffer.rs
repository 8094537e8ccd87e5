//fixed slot size (must accm. largest encoded queue item + header)
pub const SLOT_SIZE: usize = 512;
pub const HEADER_SIZE: usize = 8; //4(kind) + 4(len)
pub const MAX_PAYLOAD_SIZE: usize = SLOT_SIZE - HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotKind{
    Item = 1,
    Sentinel = 2, //written by the drain protocol, carries no payload
}

impl SlotKind{
    fn from_u32(val: u32) -> Option<Self>{
        match val{
            1 => Some(SlotKind::Item),
            2 => Some(SlotKind::Sentinel),
            _ => None,
        }
    }
}

//a slot with inline kind + length header
#[repr(C)]
pub struct ByteSlot{
    kind: u32,
    len: u32,
    data: [u8; MAX_PAYLOAD_SIZE],
}

impl Default for ByteSlot{
    fn default() -> Self{
        ByteSlot{
            kind: 0,
            len: 0,
            data: [0u8; MAX_PAYLOAD_SIZE],
        }
    }
}

impl Clone for ByteSlot{
    fn clone(&self) -> Self{
        let mut data = [0u8; MAX_PAYLOAD_SIZE];
        data.copy_from_slice(&self.data);
        ByteSlot{
            kind: self.kind,
            len: self.len,
            data,
        }
    }
}

//ring cursor, stored next to the slots (in shared memory for queues)
#[repr(C)]
#[derive(Debug, Default)]
pub struct RingState{
    head: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError{
    Full,
    TooLarge,
}

//strict fifo over borrowed slots: never overwrites, the caller serialises access
pub struct ByteRing<'a>{
    state: &'a mut RingState,
    slots: &'a mut [ByteSlot],
}

impl<'a> ByteRing<'a>{
    pub fn new(state: &'a mut RingState, slots: &'a mut [ByteSlot]) -> Self{
        assert!(!slots.is_empty(), "ring needs at least one slot");
        ByteRing{ state, slots }
    }

    pub fn push(&mut self, kind: SlotKind, data: &[u8]) -> Result<(), PushError>{
        if data.len() > MAX_PAYLOAD_SIZE{
            return Err(PushError::TooLarge);
        }
        if self.is_full(){
            return Err(PushError::Full);
        }

        let slot = &mut self.slots[self.state.head];
        slot.kind = kind as u32;
        slot.len = data.len() as u32;
        slot.data[..data.len()].copy_from_slice(data);

        self.state.head = (self.state.head + 1) % self.slots.len();
        self.state.len += 1;
        Ok(())
    }

    //pop oldest slot, returns (kind, payload)
    pub fn pop(&mut self) -> Option<(SlotKind, Vec<u8>)>{
        while self.state.len > 0{
            let tail = self.tail();
            self.state.len -= 1;

            let slot = &self.slots[tail];
            let len = (slot.len as usize).min(MAX_PAYLOAD_SIZE);
            match SlotKind::from_u32(slot.kind){
                Some(kind) => return Some((kind, slot.data[..len].to_vec())),
                //torn slot left by a writer that died mid-push, skip it
                None => continue,
            }
        }
        None
    }

    fn tail(&self) -> usize{
        let capacity = self.slots.len();
        (self.state.head + capacity - self.state.len) % capacity
    }

    pub fn len(&self) -> usize{
        self.state.len
    }

    pub fn is_empty(&self) -> bool{
        self.state.len == 0
    }

    pub fn is_full(&self) -> bool{
        self.state.len == self.slots.len()
    }

    pub fn capacity(&self) -> usize{
        self.slots.len()
    }
}
