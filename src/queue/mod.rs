/**
 * Bounded Queue
 *
 * Multi-producer / multi-consumer FIFO shared by every process forked after
 * it was created. Items are serialized into fixed slots of a ByteRing living
 * in a shared mapping, guarded by a process-shared mutex and two condvars.
 *
 * Shutdown relies on the drain protocol (`fill_and_drain`): it wakes every
 * consumer parked in `get` and empties the queue until no producer is left
 * blocked in `put`.
 */

use std::fmt::Debug;
use std::io;
use std::marker::PhantomData;
use std::ptr::addr_of_mut;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ring_buffer::{ByteRing, ByteSlot, PushError, RingState, SlotKind, MAX_PAYLOAD_SIZE};
use crate::shm::{ProcessCondvar, ProcessMutex, ProcessMutexGuard, SharedMemory};

/// Slot count backing a queue created with capacity `<= 0`.
pub const UNBOUNDED_SLOTS: usize = 16_384;

const WAIT_STEP: Duration = Duration::from_millis(100);
const DRAIN_STEP: Duration = Duration::from_millis(10);
const DRAIN_ROUNDS: usize = 100;

#[derive(Debug, Error)]
pub enum QueueError{
    #[error("shared memory error: {0}")]
    Io(#[from] io::Error),

    #[error("queue is full")]
    Full,

    #[error("queue is empty")]
    Empty,

    #[error("timed out waiting on queue")]
    Timeout,

    #[error("item of {size} bytes exceeds slot payload of {max} bytes")]
    ItemTooLarge{ size: usize, max: usize },

    #[error("item codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutMode{
    /// `put` waits for free space.
    #[default]
    Blocking,
    /// `put` fails with [`QueueError::Full`] at once.
    NonBlocking,
}

#[repr(C)]
struct Waiters{
    generation: u64, //bumped by fill_and_drain to release parked consumers
    producers: usize,
    consumers: usize,
}

#[repr(C)]
struct QueueHeader{
    lock: ProcessMutex,
    not_empty: ProcessCondvar,
    not_full: ProcessCondvar,
    ring: RingState,
    waiters: Waiters,
}

fn slots_offset() -> usize{
    let align = std::mem::align_of::<ByteSlot>();
    (std::mem::size_of::<QueueHeader>() + align - 1) / align * align
}

struct QueueInner{
    name: String,
    mem: SharedMemory,
    slots: usize,
    bounded: bool,
    mode: PutMode,
}

enum Wait{
    Never,
    Until(Instant),
    Forever,
}

impl Wait{
    //length of the next condvar wait, None once the caller has to give up
    fn step(&self) -> Option<Duration>{
        match self{
            Wait::Never => None,
            Wait::Until(deadline) => {
                let now = Instant::now();
                if now >= *deadline{
                    None
                }else{
                    Some((*deadline - now).min(WAIT_STEP))
                }
            }
            Wait::Forever => Some(WAIT_STEP),
        }
    }

    fn give_up(&self, when_never: QueueError) -> QueueError{
        match self{
            Wait::Never => when_never,
            _ => QueueError::Timeout,
        }
    }
}

//queue header + slots while the shared lock is held
struct Locked<'a>{
    guard: ProcessMutexGuard<'a>,
    header: *mut QueueHeader,
    slots: *mut ByteSlot,
    slot_count: usize,
}

impl Locked<'_>{
    fn ring(&mut self) -> ByteRing<'_>{
        unsafe{
            ByteRing::new(
                &mut *addr_of_mut!((*self.header).ring),
                std::slice::from_raw_parts_mut(self.slots, self.slot_count),
            )
        }
    }

    fn waiters(&mut self) -> &mut Waiters{
        unsafe{ &mut *addr_of_mut!((*self.header).waiters) }
    }

    fn wait_not_empty(&self, timeout: Duration) -> io::Result<bool>{
        let cond = unsafe{ &(*self.header).not_empty };
        cond.wait_timeout(&self.guard, timeout)
    }

    fn wait_not_full(&self, timeout: Duration) -> io::Result<bool>{
        let cond = unsafe{ &(*self.header).not_full };
        cond.wait_timeout(&self.guard, timeout)
    }

    fn notify_not_empty(&self){
        unsafe{ &(*self.header).not_empty }.notify_all();
    }

    fn notify_not_full(&self){
        unsafe{ &(*self.header).not_full }.notify_all();
    }
}

/// Cross-process FIFO of serializable items.
///
/// Cloning a handle is cheap; all clones (and all forked copies) refer to the
/// same shared buffer.
pub struct BoundedQueue<T>{
    inner: Arc<QueueInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for BoundedQueue<T>{
    fn clone(&self) -> Self{
        BoundedQueue{
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for BoundedQueue<T>{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result{
        f.debug_struct("BoundedQueue")
            .field("name", &self.inner.name)
            .field("capacity", &self.capacity())
            .field("mode", &self.inner.mode)
            .finish()
    }
}

impl<T> BoundedQueue<T>{
    pub fn name(&self) -> &str{
        &self.inner.name
    }

    /// `None` for a queue created unbounded.
    pub fn capacity(&self) -> Option<usize>{
        self.inner.bounded.then_some(self.inner.slots)
    }

    pub fn mode(&self) -> PutMode{
        self.inner.mode
    }

    /// Snapshot only: another process may change it right after.
    pub fn try_len(&self) -> Result<usize, QueueError>{
        Ok(self.lock()?.ring().len())
    }

    /// Like `try_len`, but a broken lock reads as empty and is logged.
    pub fn len(&self) -> usize{
        match self.try_len(){
            Ok(len) => len,
            Err(e) => {
                warn!(queue = %self.inner.name, error = %e, "queue length unavailable, reporting 0");
                0
            }
        }
    }

    /// Advisory: never use it as a precondition for a non-blocking get.
    pub fn is_empty(&self) -> bool{
        self.len() == 0
    }

    fn lock(&self) -> Result<Locked<'_>, QueueError>{
        let base = self.inner.mem.as_ptr();
        let header = base as *mut QueueHeader;
        let guard = unsafe{ &(*header).lock }.lock()?;
        let slots = unsafe{ base.add(slots_offset()) as *mut ByteSlot };

        Ok(Locked{
            guard,
            header,
            slots,
            slot_count: self.inner.slots,
        })
    }
}

impl<T: Serialize + DeserializeOwned> BoundedQueue<T>{
    /// Blocking queue; `capacity <= 0` means unbounded.
    pub fn new(name: &str, capacity: i64) -> Result<Self, QueueError>{
        Self::with_mode(name, capacity, PutMode::Blocking)
    }

    pub fn with_mode(name: &str, capacity: i64, mode: PutMode) -> Result<Self, QueueError>{
        let bounded = capacity > 0;
        let slots = if bounded{ capacity as usize }else{ UNBOUNDED_SLOTS };

        let bytes = slots
            .checked_mul(std::mem::size_of::<ByteSlot>())
            .and_then(|b| b.checked_add(slots_offset()))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "queue capacity overflows"))?;
        let mem = SharedMemory::map(bytes)?;

        let header = mem.as_ptr() as *mut QueueHeader;
        unsafe{
            ProcessMutex::init_in_place(addr_of_mut!((*header).lock))?;
            ProcessCondvar::init_in_place(addr_of_mut!((*header).not_empty))?;
            ProcessCondvar::init_in_place(addr_of_mut!((*header).not_full))?;
        }

        debug!(queue = name, slots, bounded, ?mode, "queue created");

        Ok(BoundedQueue{
            inner: Arc::new(QueueInner{
                name: name.to_string(),
                mem,
                slots,
                bounded,
                mode,
            }),
            _marker: PhantomData,
        })
    }

    /// Enqueue, waiting for space in `Blocking` mode.
    pub fn put(&self, item: &T) -> Result<(), QueueError>{
        match self.inner.mode{
            PutMode::Blocking => self.put_with(item, Wait::Forever),
            PutMode::NonBlocking => self.put_with(item, Wait::Never),
        }
    }

    pub fn put_timeout(&self, item: &T, timeout: Duration) -> Result<(), QueueError>{
        self.put_with(item, Wait::Until(Instant::now() + timeout))
    }

    pub fn try_put(&self, item: &T) -> Result<(), QueueError>{
        self.put_with(item, Wait::Never)
    }

    /// Dequeue, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the caller was released by the drain protocol (or
    /// dequeued one of its sentinels) and should re-check its exit flag.
    pub fn get(&self, timeout: Duration) -> Result<Option<T>, QueueError>{
        self.get_with(Wait::Until(Instant::now() + timeout))
    }

    pub fn try_get(&self) -> Result<Option<T>, QueueError>{
        self.get_with(Wait::Never)
    }

    fn put_with(&self, item: &T, wait: Wait) -> Result<(), QueueError>{
        let payload = serde_json::to_vec(item)?;
        if payload.len() > MAX_PAYLOAD_SIZE{
            return Err(QueueError::ItemTooLarge{ size: payload.len(), max: MAX_PAYLOAD_SIZE });
        }

        let mut locked = self.lock()?;
        while locked.ring().is_full(){
            let step = wait.step().ok_or_else(|| wait.give_up(QueueError::Full))?;

            locked.waiters().producers += 1;
            let waited = locked.wait_not_full(step);
            locked.waiters().producers -= 1;
            waited?;
        }

        match locked.ring().push(SlotKind::Item, &payload){
            Ok(()) => {}
            Err(PushError::Full) => return Err(QueueError::Full),
            Err(PushError::TooLarge) => {
                return Err(QueueError::ItemTooLarge{ size: payload.len(), max: MAX_PAYLOAD_SIZE });
            }
        }
        locked.notify_not_empty();
        Ok(())
    }

    fn get_with(&self, wait: Wait) -> Result<Option<T>, QueueError>{
        let mut locked = self.lock()?;
        let generation = locked.waiters().generation;

        loop{
            let popped = locked.ring().pop();
            if let Some((kind, payload)) = popped{
                locked.notify_not_full();
                drop(locked);
                return match kind{
                    SlotKind::Sentinel => Ok(None),
                    SlotKind::Item => Ok(Some(serde_json::from_slice(&payload)?)),
                };
            }

            if locked.waiters().generation != generation{
                return Ok(None);
            }

            let step = wait.step().ok_or_else(|| wait.give_up(QueueError::Empty))?;

            locked.waiters().consumers += 1;
            let waited = locked.wait_not_empty(step);
            locked.waiters().consumers -= 1;
            waited?;
        }
    }

    /// Drain protocol.
    ///
    /// Fills every free slot with a sentinel so parked consumers return, then
    /// pops until the queue is empty and no producer is blocked in `put`.
    /// Returns the real items that were still queued.
    pub fn fill_and_drain(&self) -> Result<Vec<T>, QueueError>{
        let mut locked = self.lock()?;

        let waiters = locked.waiters();
        waiters.generation = waiters.generation.wrapping_add(1);
        let consumers = waiters.consumers;

        let target = if self.inner.bounded{
            self.inner.slots
        }else{
            consumers.max(1).min(self.inner.slots)
        };
        let mut filled = 0usize;
        while locked.ring().len() < target{
            if locked.ring().push(SlotKind::Sentinel, &[]).is_err(){
                break;
            }
            filled += 1;
        }
        locked.notify_not_empty();

        let mut drained = Vec::new();
        let mut undecodable = 0usize;
        for _ in 0..DRAIN_ROUNDS{
            loop{
                let popped = locked.ring().pop();
                match popped{
                    Some((SlotKind::Item, payload)) => match serde_json::from_slice(&payload){
                        Ok(item) => drained.push(item),
                        Err(_) => undecodable += 1,
                    },
                    Some((SlotKind::Sentinel, _)) => {}
                    None => break,
                }
            }
            locked.notify_not_full();

            if locked.waiters().producers == 0{
                break;
            }
            //released producers need the lock to finish their put
            locked.wait_not_empty(DRAIN_STEP)?;
        }

        let still_blocked = locked.waiters().producers;
        drop(locked);

        if still_blocked > 0{
            warn!(queue = %self.inner.name, producers = still_blocked, "producers still blocked after drain");
        }
        if undecodable > 0{
            warn!(queue = %self.inner.name, undecodable, "dropped undecodable items during drain");
        }
        debug!(queue = %self.inner.name, filled, drained = drained.len(), "queue filled and drained");

        Ok(drained)
    }

    pub fn drainable(&self) -> Arc<dyn Drainable>
    where
        T: Debug + 'static,
    {
        Arc::new(self.clone())
    }
}

/// Type-erased view of a queue, used for shutdown bookkeeping.
pub trait Drainable: Send + Sync{
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    /// Run the drain protocol, returning how many undelivered items were discarded.
    fn drain(&self) -> Result<usize, QueueError>;
}

impl<T: Serialize + DeserializeOwned + Debug> Drainable for BoundedQueue<T>{
    fn name(&self) -> &str{
        BoundedQueue::name(self)
    }

    fn len(&self) -> usize{
        BoundedQueue::len(self)
    }

    fn drain(&self) -> Result<usize, QueueError>{
        let items = self.fill_and_drain()?;
        for item in &items{
            info!(queue = %self.name(), ?item, "undelivered at shutdown");
        }
        Ok(items.len())
    }
}

/// Drain `queues` in the order given; pass them downstream first.
pub fn drain_in_order(queues: &[Arc<dyn Drainable>]) -> Result<usize, QueueError>{
    let mut discarded = 0;
    for queue in queues{
        discarded += queue.drain()?;
        debug!(queue = queue.name(), "drained");
    }
    Ok(discarded)
}
