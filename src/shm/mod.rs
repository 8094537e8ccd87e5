/**
 * Shared Memory
 *
 * Anonymous MAP_SHARED mappings created in the supervisor before any worker
 * is forked. Every child inherits the mapping at the same address, so plain
 * pointers into it stay valid in all processes of the tree.
 */

pub mod sync;

use std::io;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};

pub use sync::{ProcessCondvar, ProcessMutex, ProcessMutexGuard};

//raw zero-filled region shared with every child forked after map()
pub struct SharedMemory{
    ptr: NonNull<u8>,
    len: usize,
}

//the mapping is plain memory, synchronisation is up to the user
unsafe impl Send for SharedMemory{}
unsafe impl Sync for SharedMemory{}

impl SharedMemory{
    pub fn map(len: usize) -> io::Result<Self>{
        if len == 0{
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "cannot map an empty region"));
        }

        let addr = unsafe{
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED{
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping"))?;

        Ok(SharedMemory{ ptr, len })
    }

    pub fn as_ptr(&self) -> *mut u8{
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize{
        self.len
    }

    pub fn is_empty(&self) -> bool{
        self.len == 0
    }
}

impl Drop for SharedMemory{
    fn drop(&mut self){
        //only unmaps this process' view, children keep theirs
        unsafe{
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// A single value placed in shared memory.
///
/// `T` must be self-contained (no heap pointers, no file handles): children
/// see the same bytes, not a deep copy.
pub struct Shared<T>{
    mem: SharedMemory,
    _marker: PhantomData<T>,
}

impl<T> Shared<T>{
    pub fn new(value: T) -> io::Result<Self>{
        let mem = SharedMemory::map(std::mem::size_of::<T>().max(1))?;
        //mappings are page aligned
        unsafe{
            ptr::write(mem.as_ptr() as *mut T, value);
        }
        Ok(Shared{ mem, _marker: PhantomData })
    }
}

impl<T> Deref for Shared<T>{
    type Target = T;

    fn deref(&self) -> &T{
        unsafe{ &*(self.mem.as_ptr() as *const T) }
    }
}

impl<T> Drop for Shared<T>{
    fn drop(&mut self){
        unsafe{
            ptr::drop_in_place(self.mem.as_ptr() as *mut T);
        }
    }
}
