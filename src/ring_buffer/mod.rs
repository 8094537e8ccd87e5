pub mod byte_buffer;

pub use byte_buffer::{ByteRing, ByteSlot, PushError, RingState, SlotKind, MAX_PAYLOAD_SIZE, SLOT_SIZE};

//in-process ring with freshness bias: when full, the oldest entry is overwritten
pub struct RingBuffer<T>{
    buffer: Vec<Option<T>>,
    head: usize,
    len: usize,
    dropped: u64,
}

impl<T> RingBuffer<T>{
    pub fn new(capacity: usize) -> Self{
        assert!(capacity > 0, "ring capacity must be greater than 0");

        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);

        RingBuffer{
            buffer,
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    //push item, overwriting the oldest when full
    pub fn push(&mut self, item: T){
        let capacity = self.buffer.len();
        let tail = (self.head + capacity - self.len) % capacity;

        if self.len == capacity{
            //full, discard oldest
            self.buffer[tail] = None;
            self.len -= 1;
            self.dropped += 1;
        }

        self.buffer[self.head] = Some(item);
        self.head = (self.head + 1) % capacity;
        self.len += 1;
    }

    //pop the oldest item
    pub fn pop(&mut self) -> Option<T>{
        if self.len == 0{
            return None;
        }

        let capacity = self.buffer.len();
        let tail = (self.head + capacity - self.len) % capacity;
        self.len -= 1;
        self.buffer[tail].take()
    }

    pub fn len(&self) -> usize{
        self.len
    }

    pub fn is_empty(&self) -> bool{
        self.len == 0
    }

    pub fn is_full(&self) -> bool{
        self.len == self.buffer.len()
    }

    pub fn capacity(&self) -> usize{
        self.buffer.len()
    }

    //total entries overwritten before anyone popped them
    pub fn dropped(&self) -> u64{
        self.dropped
    }
}
