use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;
use std::time::Duration;

//process-shared, robust pthread mutex. lives inside a SharedMemory mapping and must never move
#[repr(C)]
pub struct ProcessMutex{
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for ProcessMutex{}
unsafe impl Sync for ProcessMutex{}

fn check(rc: libc::c_int) -> io::Result<()>{
    if rc == 0{
        Ok(())
    }else{
        Err(io::Error::from_raw_os_error(rc))
    }
}

impl ProcessMutex{
    /// Initialise the mutex where it lies.
    ///
    /// # Safety
    /// `this` must point at zeroed, writable memory that stays mapped at the
    /// same address for the lifetime of every process using it.
    pub unsafe fn init_in_place(this: *mut Self) -> io::Result<()>{
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;

        let mut rc = libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        if rc == 0{
            //a worker killed mid-operation must not wedge its siblings
            rc = libc::pthread_mutexattr_setrobust(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST);
        }
        if rc == 0{
            rc = libc::pthread_mutex_init((*this).inner.get(), attr.as_ptr());
        }
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        check(rc)
    }

    pub fn lock(&self) -> io::Result<ProcessMutexGuard<'_>>{
        let rc = unsafe{ libc::pthread_mutex_lock(self.inner.get()) };
        self.recover(rc)?;
        Ok(ProcessMutexGuard{ mutex: self })
    }

    fn recover(&self, rc: libc::c_int) -> io::Result<()>{
        if rc == libc::EOWNERDEAD{
            tracing::warn!("previous lock holder died, marking shared state consistent");
            return check(unsafe{ libc::pthread_mutex_consistent(self.inner.get()) });
        }
        check(rc)
    }
}

pub struct ProcessMutexGuard<'a>{
    mutex: &'a ProcessMutex,
}

impl Drop for ProcessMutexGuard<'_>{
    fn drop(&mut self){
        unsafe{
            libc::pthread_mutex_unlock(self.mutex.inner.get());
        }
    }
}

//process-shared condvar on CLOCK_MONOTONIC
#[repr(C)]
pub struct ProcessCondvar{
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for ProcessCondvar{}
unsafe impl Sync for ProcessCondvar{}

impl ProcessCondvar{
    /// # Safety
    /// Same requirements as [`ProcessMutex::init_in_place`].
    pub unsafe fn init_in_place(this: *mut Self) -> io::Result<()>{
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        check(libc::pthread_condattr_init(attr.as_mut_ptr()))?;

        let mut rc = libc::pthread_condattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        if rc == 0{
            rc = libc::pthread_condattr_setclock(attr.as_mut_ptr(), libc::CLOCK_MONOTONIC);
        }
        if rc == 0{
            rc = libc::pthread_cond_init((*this).inner.get(), attr.as_ptr());
        }
        libc::pthread_condattr_destroy(attr.as_mut_ptr());
        check(rc)
    }

    //wait at most `timeout`, returns true if the wait timed out
    pub fn wait_timeout(&self, guard: &ProcessMutexGuard<'_>, timeout: Duration) -> io::Result<bool>{
        let deadline = monotonic_deadline(timeout);
        let rc = unsafe{
            libc::pthread_cond_timedwait(self.inner.get(), guard.mutex.inner.get(), &deadline)
        };
        match rc{
            0 => Ok(false),
            libc::ETIMEDOUT => Ok(true),
            other => guard.mutex.recover(other).map(|_| false),
        }
    }

    pub fn notify_all(&self){
        unsafe{
            libc::pthread_cond_broadcast(self.inner.get());
        }
    }
}

fn monotonic_deadline(timeout: Duration) -> libc::timespec{
    let mut now: libc::timespec = unsafe{ std::mem::zeroed() };
    unsafe{
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now);
    }

    let nanos = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
    let secs = now.tv_sec as u64 + timeout.as_secs() + nanos / 1_000_000_000;

    let mut deadline: libc::timespec = unsafe{ std::mem::zeroed() };
    deadline.tv_sec = secs as libc::time_t;
    deadline.tv_nsec = (nanos % 1_000_000_000) as _;
    deadline
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::shm::SharedMemory;
    use std::time::Instant;

    #[repr(C)]
    struct Pair{
        lock: ProcessMutex,
        cond: ProcessCondvar,
    }

    fn shared_pair() -> (SharedMemory, *mut Pair){
        let mem = SharedMemory::map(std::mem::size_of::<Pair>()).unwrap();
        let pair = mem.as_ptr() as *mut Pair;
        unsafe{
            ProcessMutex::init_in_place(std::ptr::addr_of_mut!((*pair).lock)).unwrap();
            ProcessCondvar::init_in_place(std::ptr::addr_of_mut!((*pair).cond)).unwrap();
        }
        (mem, pair)
    }

    #[test]
    fn test_wait_times_out(){
        let (_mem, pair) = shared_pair();
        let pair = unsafe{ &*pair };

        let guard = pair.lock.lock().unwrap();
        let start = Instant::now();
        let timed_out = pair.cond.wait_timeout(&guard, Duration::from_millis(30)).unwrap();

        assert!(timed_out);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_lock_recovers_after_owner_died(){
        let (_mem, pair) = shared_pair();
        let pair = unsafe{ &*pair };

        let pid = unsafe{ libc::fork() };
        assert!(pid >= 0);
        if pid == 0{
            //die while holding the lock
            let guard = pair.lock.lock();
            std::mem::forget(guard);
            unsafe{ libc::_exit(0) };
        }
        let mut status = 0;
        unsafe{ libc::waitpid(pid, &mut status, 0) };

        assert!(pair.lock.lock().is_ok());
    }
}
