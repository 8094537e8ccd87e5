/**
 * Worker Manager
 *
 * Forks N processes running the same entry function with bound arguments.
 * Children share nothing with the supervisor except the queue and signal
 * mappings created before the fork. A crash in one child never reaches its
 * siblings; the supervisor only observes it as an exit status at join.
 */

use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::queue::Drainable;

const JOIN_POLL: Duration = Duration::from_millis(10);

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_PANICKED: i32 = 101;

#[derive(Debug, Error)]
pub enum WorkerError{
    #[error("worker group {name}: count must be at least 1, got {count}")]
    InvalidCount{ name: String, count: usize },

    #[error("worker group {name}: invalid arguments: {reason}")]
    InvalidArguments{ name: String, reason: String },

    #[error("worker group {name} already started")]
    AlreadyStarted{ name: String },

    #[error("worker group {name}: started {started} of {requested} workers")]
    PartialStart{ name: String, started: usize, requested: usize },

    #[error("worker group {name}: workers {pids:?} still running at join deadline")]
    Hung{ name: String, pids: Vec<i32> },

    #[error("worker group {name} was never started")]
    NotStarted{ name: String },
}

/// Arguments bound to every worker of a group.
///
/// They are moved into the child by `fork`, so they only need to be valid in
/// the child's copy of the address space.
pub trait WorkerArgs: Clone{
    fn validate(&self) -> Result<(), String>{
        Ok(())
    }
}

pub type WorkerEntry<A> = fn(A) -> anyhow::Result<()>;

pub struct WorkerSpec<A: WorkerArgs>{
    name: String,
    count: usize,
    entry: WorkerEntry<A>,
    arguments: A,
    input_queues: Vec<Arc<dyn Drainable>>,
    output_queues: Vec<Arc<dyn Drainable>>,
}

impl<A: WorkerArgs> WorkerSpec<A>{
    pub fn create(
        name: &str,
        count: usize,
        entry: WorkerEntry<A>,
        arguments: A,
        input_queues: Vec<Arc<dyn Drainable>>,
        output_queues: Vec<Arc<dyn Drainable>>,
    ) -> Result<Self, WorkerError>{
        let spec = WorkerSpec{
            name: name.to_string(),
            count,
            entry,
            arguments,
            input_queues,
            output_queues,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), WorkerError>{
        if self.count < 1{
            return Err(WorkerError::InvalidCount{ name: self.name.clone(), count: self.count });
        }
        self.arguments.validate().map_err(|reason| WorkerError::InvalidArguments{
            name: self.name.clone(),
            reason,
        })
    }

    pub fn name(&self) -> &str{
        &self.name
    }

    pub fn count(&self) -> usize{
        self.count
    }

    pub fn input_queues(&self) -> &[Arc<dyn Drainable>]{
        &self.input_queues
    }

    pub fn output_queues(&self) -> &[Arc<dyn Drainable>]{
        &self.output_queues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus{
    Code(i32),
    Signal(i32),
    //reaped by someone else, status unknown
    Lost,
}

impl ExitStatus{
    fn from_wait_status(status: libc::c_int) -> Self{
        if libc::WIFEXITED(status){
            ExitStatus::Code(libc::WEXITSTATUS(status))
        }else if libc::WIFSIGNALED(status){
            ExitStatus::Signal(libc::WTERMSIG(status))
        }else{
            ExitStatus::Lost
        }
    }

    pub fn success(&self) -> bool{
        matches!(self, ExitStatus::Code(EXIT_OK))
    }
}

impl fmt::Display for ExitStatus{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        match self{
            ExitStatus::Code(EXIT_PANICKED) => write!(f, "panicked (exit code {EXIT_PANICKED})"),
            ExitStatus::Code(code) => write!(f, "exit code {code}"),
            ExitStatus::Signal(sig) => write!(f, "killed by signal {sig}"),
            ExitStatus::Lost => write!(f, "status lost"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit{
    pub index: usize,
    pub pid: i32,
    pub status: ExitStatus,
}

#[derive(Debug, Clone, Default)]
pub struct JoinSummary{
    pub clean: usize,
    pub crashed: Vec<WorkerExit>,
}

impl JoinSummary{
    pub fn is_clean(&self) -> bool{
        self.crashed.is_empty()
    }
}

struct Worker{
    index: usize,
    pid: libc::pid_t,
    exit: Option<ExitStatus>,
}

pub struct WorkerGroup<A: WorkerArgs>{
    spec: WorkerSpec<A>,
    workers: Vec<Worker>,
    started: bool,
}

impl<A: WorkerArgs> WorkerGroup<A>{
    pub fn create(spec: WorkerSpec<A>) -> Result<Self, WorkerError>{
        spec.validate()?;
        Ok(WorkerGroup{
            spec,
            workers: Vec::new(),
            started: false,
        })
    }

    pub fn name(&self) -> &str{
        &self.spec.name
    }

    /// Fork every worker. Returns how many were started.
    pub fn start(&mut self) -> Result<usize, WorkerError>{
        if self.started{
            return Err(WorkerError::AlreadyStarted{ name: self.spec.name.clone() });
        }
        self.started = true;

        for index in 0..self.spec.count{
            //unflushed output would be written twice
            let _ = io::stdout().flush();
            let _ = io::stderr().flush();

            match unsafe{ libc::fork() }{
                -1 => {
                    let err = io::Error::last_os_error();
                    error!(group = %self.spec.name, index, error = %err, "fork failed");
                }
                0 => run_child(&self.spec.name, index, self.spec.entry, self.spec.arguments.clone()),
                pid => {
                    debug!(group = %self.spec.name, index, pid, "worker forked");
                    self.workers.push(Worker{ index, pid, exit: None });
                }
            }
        }

        let started = self.workers.len();
        info!(group = %self.spec.name, started, requested = self.spec.count, "worker group started");
        if started < self.spec.count{
            return Err(WorkerError::PartialStart{
                name: self.spec.name.clone(),
                started,
                requested: self.spec.count,
            });
        }
        Ok(started)
    }

    /// Wait for every worker to exit, at most `timeout`.
    pub fn join(&mut self, timeout: Duration) -> Result<JoinSummary, WorkerError>{
        if !self.started{
            return Err(WorkerError::NotStarted{ name: self.spec.name.clone() });
        }

        let deadline = Instant::now() + timeout;
        loop{
            self.reap();
            if self.running() == 0{
                break;
            }
            if Instant::now() >= deadline{
                let pids = self.pids();
                warn!(group = %self.spec.name, ?pids, "workers still running at join deadline");
                return Err(WorkerError::Hung{ name: self.spec.name.clone(), pids });
            }
            thread::sleep(JOIN_POLL);
        }

        let mut summary = JoinSummary::default();
        for worker in &self.workers{
            match worker.exit{
                Some(status) if status.success() => summary.clean += 1,
                Some(status) => summary.crashed.push(WorkerExit{ index: worker.index, pid: worker.pid, status }),
                None => {}
            }
        }
        info!(group = %self.spec.name, clean = summary.clean, crashed = summary.crashed.len(), "worker group joined");
        Ok(summary)
    }

    /// SIGKILL and reap every worker still running. Returns how many were killed.
    pub fn terminate(&mut self) -> usize{
        let mut killed = 0;
        for worker in self.workers.iter_mut().filter(|w| w.exit.is_none()){
            unsafe{
                libc::kill(worker.pid, libc::SIGKILL);
            }

            let mut status = 0;
            let rc = unsafe{ libc::waitpid(worker.pid, &mut status, 0) };
            worker.exit = Some(if rc == worker.pid{
                ExitStatus::from_wait_status(status)
            }else{
                ExitStatus::Lost
            });
            warn!(group = %self.spec.name, index = worker.index, pid = worker.pid, "worker terminated");
            killed += 1;
        }
        killed
    }

    //non-blocking waitpid over every live worker
    fn reap(&mut self){
        for worker in self.workers.iter_mut().filter(|w| w.exit.is_none()){
            let mut status = 0;
            let rc = unsafe{ libc::waitpid(worker.pid, &mut status, libc::WNOHANG) };
            if rc == 0{
                continue;
            }

            let exit = if rc == worker.pid{
                ExitStatus::from_wait_status(status)
            }else{
                ExitStatus::Lost
            };
            if exit.success(){
                debug!(group = %self.spec.name, index = worker.index, pid = worker.pid, "worker exited");
            }else{
                error!(group = %self.spec.name, index = worker.index, pid = worker.pid, status = %exit, "worker crashed");
            }
            worker.exit = Some(exit);
        }
    }

    /// Pids of workers not yet reaped.
    pub fn pids(&self) -> Vec<i32>{
        self.workers.iter().filter(|w| w.exit.is_none()).map(|w| w.pid).collect()
    }

    pub fn running(&self) -> usize{
        self.workers.iter().filter(|w| w.exit.is_none()).count()
    }

    pub fn is_started(&self) -> bool{
        self.started
    }

    pub fn input_queues(&self) -> &[Arc<dyn Drainable>]{
        self.spec.input_queues()
    }

    pub fn output_queues(&self) -> &[Arc<dyn Drainable>]{
        self.spec.output_queues()
    }
}

impl<A: WorkerArgs> Drop for WorkerGroup<A>{
    fn drop(&mut self){
        if self.running() > 0{
            warn!(group = %self.spec.name, pids = ?self.pids(), "dropping group with live workers");
            self.terminate();
        }
    }
}

//body of a forked worker; never returns into the caller's stack
fn run_child<A>(name: &str, index: usize, entry: WorkerEntry<A>, arguments: A) -> !{
    let pid = std::process::id();
    let span = info_span!("worker", name, index, pid);

    let code = {
        let _guard = span.enter();
        debug!("worker running");
        match panic::catch_unwind(AssertUnwindSafe(|| entry(arguments))){
            Ok(Ok(())) => {
                debug!("worker finished");
                EXIT_OK
            }
            Ok(Err(err)) => {
                error!(error = %format!("{err:#}"), "worker failed");
                EXIT_FAILED
            }
            Err(_) => {
                error!("worker panicked");
                EXIT_PANICKED
            }
        }
    };

    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    unsafe{ libc::_exit(code) }
}

#[cfg(test)]
mod tests{
    use super::*;
    use serial_test::serial;

    #[derive(Clone)]
    struct Nap{
        millis: u64,
    }

    impl WorkerArgs for Nap{
        fn validate(&self) -> Result<(), String>{
            if self.millis > 60_000{
                return Err(format!("nap of {} ms is too long", self.millis));
            }
            Ok(())
        }
    }

    fn nap(args: Nap) -> anyhow::Result<()>{
        thread::sleep(Duration::from_millis(args.millis));
        Ok(())
    }

    fn fail(_: Nap) -> anyhow::Result<()>{
        anyhow::bail!("nothing to do")
    }

    fn spec(count: usize, entry: WorkerEntry<Nap>, millis: u64) -> Result<WorkerSpec<Nap>, WorkerError>{
        WorkerSpec::create("nap", count, entry, Nap{ millis }, Vec::new(), Vec::new())
    }

    #[test]
    fn test_zero_count_rejected(){
        assert!(matches!(spec(0, nap, 1), Err(WorkerError::InvalidCount{ count: 0, .. })));
    }

    #[test]
    fn test_invalid_arguments_rejected(){
        assert!(matches!(spec(1, nap, 120_000), Err(WorkerError::InvalidArguments{ .. })));
    }

    #[test]
    fn test_group_keeps_spec_queues(){
        let input: crate::queue::BoundedQueue<u8> = crate::queue::BoundedQueue::new("in", 1).unwrap();
        let output: crate::queue::BoundedQueue<u8> = crate::queue::BoundedQueue::new("out", 1).unwrap();
        let spec = WorkerSpec::create("nap", 2, nap, Nap{ millis: 1 }, vec![input.drainable()], vec![output.drainable()]).unwrap();
        assert_eq!(spec.name(), "nap");
        assert_eq!(spec.count(), 2);
        assert_eq!(spec.input_queues()[0].name(), "in");

        let group = WorkerGroup::create(spec).unwrap();
        assert_eq!(group.name(), "nap");
        assert!(!group.is_started());
        assert_eq!(group.input_queues()[0].name(), "in");
        assert_eq!(group.output_queues()[0].name(), "out");
    }

    #[test]
    fn test_join_before_start(){
        let mut group = WorkerGroup::create(spec(1, nap, 1).unwrap()).unwrap();
        assert!(matches!(group.join(Duration::from_millis(10)), Err(WorkerError::NotStarted{ .. })));
    }

    #[test]
    #[serial]
    fn test_start_and_join_clean(){
        let mut group = WorkerGroup::create(spec(3, nap, 20).unwrap()).unwrap();
        assert_eq!(group.start().unwrap(), 3);
        assert!(matches!(group.start(), Err(WorkerError::AlreadyStarted{ .. })));

        let summary = group.join(Duration::from_secs(5)).unwrap();
        assert_eq!(summary.clean, 3);
        assert!(summary.is_clean());
        assert_eq!(group.running(), 0);
    }

    #[test]
    #[serial]
    fn test_failing_entry_reported(){
        let mut group = WorkerGroup::create(spec(2, fail, 0).unwrap()).unwrap();
        group.start().unwrap();

        let summary = group.join(Duration::from_secs(5)).unwrap();
        assert_eq!(summary.clean, 0);
        assert_eq!(summary.crashed.len(), 2);
        assert!(summary.crashed.iter().all(|w| w.status == ExitStatus::Code(EXIT_FAILED)));
    }

    #[test]
    #[serial]
    fn test_hung_worker_surfaced_then_terminated(){
        let mut group = WorkerGroup::create(spec(1, nap, 30_000).unwrap()).unwrap();
        group.start().unwrap();

        match group.join(Duration::from_millis(100)){
            Err(WorkerError::Hung{ pids, .. }) => assert_eq!(pids.len(), 1),
            other => panic!("expected hung worker, got {other:?}"),
        }

        assert_eq!(group.terminate(), 1);
        assert_eq!(group.running(), 0);
    }

    #[test]
    fn test_exit_status_display(){
        assert_eq!(ExitStatus::Code(1).to_string(), "exit code 1");
        assert_eq!(ExitStatus::Signal(9).to_string(), "killed by signal 9");
        assert!(ExitStatus::Code(0).success());
        assert!(!ExitStatus::Signal(9).success());
    }
}
