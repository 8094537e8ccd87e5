use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::shm::Shared;

const PAUSE_POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Flags{
    exit: AtomicBool,
    pause: AtomicBool,
}

/// Exit/pause flag pair shared by the supervisor and every worker forked
/// after it was created.
#[derive(Clone)]
pub struct Signal{
    flags: Arc<Shared<Flags>>,
}

impl Signal{
    pub fn new() -> io::Result<Self>{
        Ok(Signal{
            flags: Arc::new(Shared::new(Flags::default())?),
        })
    }

    pub fn request_exit(&self){
        self.flags.exit.store(true, Ordering::SeqCst);
    }

    pub fn is_exit_requested(&self) -> bool{
        self.flags.exit.load(Ordering::SeqCst)
    }

    pub fn clear_exit(&self){
        self.flags.exit.store(false, Ordering::SeqCst);
    }

    pub fn request_pause(&self){
        self.flags.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self){
        self.flags.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_pause_requested(&self) -> bool{
        self.flags.pause.load(Ordering::SeqCst)
    }

    //loop-top suspension point, holds the caller until resume()
    pub fn check_pause(&self){
        while self.is_pause_requested(){
            thread::sleep(PAUSE_POLL);
        }
    }
}

impl std::fmt::Debug for Signal{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result{
        f.debug_struct("Signal")
            .field("exit", &self.is_exit_requested())
            .field("pause", &self.is_pause_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[test]
    fn test_exit_is_idempotent_and_clearable(){
        let signal = Signal::new().unwrap();
        assert!(!signal.is_exit_requested());

        signal.request_exit();
        signal.request_exit();
        assert!(signal.is_exit_requested());

        signal.clear_exit();
        assert!(!signal.is_exit_requested());
    }

    #[test]
    fn test_check_pause_returns_at_once_when_not_paused(){
        let signal = Signal::new().unwrap();
        let start = Instant::now();
        signal.check_pause();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_pause_holds_thread_until_resume(){
        let signal = Signal::new().unwrap();
        let ticks = Arc::new(AtomicU32::new(0));
        signal.request_pause();

        let worker = {
            let signal = signal.clone();
            let ticks = Arc::clone(&ticks);
            thread::spawn(move ||{
                while !signal.is_exit_requested(){
                    signal.check_pause();
                    ticks.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                }
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        signal.resume();
        thread::sleep(Duration::from_millis(50));
        signal.request_exit();
        worker.join().unwrap();

        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_exit_visible_across_fork(){
        let signal = Signal::new().unwrap();

        let pid = unsafe{ libc::fork() };
        assert!(pid >= 0);
        if pid == 0{
            signal.request_exit();
            unsafe{ libc::_exit(0) };
        }

        let mut status = 0;
        unsafe{ libc::waitpid(pid, &mut status, 0) };
        assert!(signal.is_exit_requested());
    }
}
