/**
 * Pipeline
 *
 * Supervisor wiring the ground station together:
 *
 *   heartbeat sender --> link
 *   link --> link reader --> inbox (heartbeat, attitude, position)
 *   inbox --> heartbeat receiver --> heartbeat queue --> supervisor
 *   inbox --> telemetry --> telemetry queue --> command --> report queue --> supervisor
 *
 * The link reader is the only process receiving on the link. The supervisor
 * never blocks on a worker: it polls its two queues with try_get every
 * 100 ms. Shutdown always runs in the same order: exit flag, drain queues
 * downstream first, join groups downstream first, then one more poll and
 * drain for anything a worker pushed after the first drain.
 */

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::command::{command_worker, CommandArgs, Report};
use crate::config::{Config, ConfigError};
use crate::heartbeat::{receiver_worker, sender_worker, HeartbeatStatus, ReceiverArgs, SenderArgs, RECEIVE_TIMEOUT, SEND_PERIOD};
use crate::link::{reader_worker, Connection, LinkInbox, ReaderArgs, READ_POLL};
use crate::queue::{drain_in_order, BoundedQueue, Drainable, QueueError};
use crate::telemetry::{telemetry_worker, TelemetryArgs, TelemetryData};
use crate::worker::{Signal, WorkerArgs, WorkerError, WorkerGroup, WorkerSpec};

pub const SUPERVISOR_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PipelineError{
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("shared signal: {0}")]
    Io(#[from] io::Error),
}

/// What the supervisor observed over one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary{
    pub reports: usize,
    pub last_report: Option<Report>,
    pub heartbeats: usize,
    pub disconnected: bool,
    pub undelivered: usize,
    pub crashed: usize,
    pub hung: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary{
    pub fn is_clean(&self) -> bool{
        self.crashed == 0 && self.hung.is_empty()
    }
}

pub struct Pipeline{
    signal: Signal,
    heartbeat_queue: BoundedQueue<HeartbeatStatus>,
    report_queue: BoundedQueue<Report>,
    reader: WorkerGroup<ReaderArgs>,
    sender: WorkerGroup<SenderArgs>,
    receiver: WorkerGroup<ReceiverArgs>,
    telemetry: WorkerGroup<TelemetryArgs>,
    command: WorkerGroup<CommandArgs>,
    join_timeout: Duration,
    summary: RunSummary,
    stopped: bool,
}

fn group<A: WorkerArgs>(
    name: &str,
    count: usize,
    entry: fn(A) -> anyhow::Result<()>,
    arguments: A,
    input_queues: Vec<Arc<dyn Drainable>>,
    output_queues: Vec<Arc<dyn Drainable>>,
) -> Result<WorkerGroup<A>, WorkerError>{
    WorkerGroup::create(WorkerSpec::create(name, count, entry, arguments, input_queues, output_queues)?)
}

impl Pipeline{
    /// Build queues, signal and worker groups. Nothing is forked yet.
    pub fn create(config: &Config, connection: Connection) -> Result<Self, PipelineError>{
        config.validate()?;

        let signal = Signal::new()?;
        let heartbeat_queue: BoundedQueue<HeartbeatStatus> = BoundedQueue::new("heartbeat", config.queues.heartbeat)?;
        let telemetry_queue: BoundedQueue<TelemetryData> = BoundedQueue::new("telemetry", config.queues.telemetry)?;
        let report_queue: BoundedQueue<Report> = BoundedQueue::new("report", config.queues.report)?;
        let inbox = LinkInbox::create(config.queues.inbox)?;

        //exactly one process may receive on the link
        let reader = group(
            "link_reader",
            1,
            reader_worker,
            ReaderArgs{
                connection: connection.clone(),
                inbox: inbox.clone(),
                signal: signal.clone(),
                poll: READ_POLL,
            },
            Vec::new(),
            inbox.drainables(),
        )?;

        let sender = group(
            "heartbeat_sender",
            config.workers.heartbeat_sender,
            sender_worker,
            SenderArgs{
                connection: connection.clone(),
                signal: signal.clone(),
                period: SEND_PERIOD,
            },
            Vec::new(),
            Vec::new(),
        )?;

        let receiver = group(
            "heartbeat_receiver",
            config.workers.heartbeat_receiver,
            receiver_worker,
            ReceiverArgs{
                inbox: inbox.clone(),
                output: heartbeat_queue.clone(),
                signal: signal.clone(),
                timeout: RECEIVE_TIMEOUT,
            },
            inbox.drainables(),
            vec![heartbeat_queue.drainable()],
        )?;

        let telemetry = group(
            "telemetry",
            config.workers.telemetry,
            telemetry_worker,
            TelemetryArgs{
                inbox,
                output: telemetry_queue.clone(),
                signal: signal.clone(),
            },
            Vec::new(),
            vec![telemetry_queue.drainable()],
        )?;

        let command = group(
            "command",
            config.workers.command,
            command_worker,
            CommandArgs{
                connection,
                target: config.target,
                input: telemetry_queue.clone(),
                output: report_queue.clone(),
                signal: signal.clone(),
            },
            vec![telemetry_queue.drainable()],
            vec![report_queue.drainable()],
        )?;

        Ok(Pipeline{
            signal,
            heartbeat_queue,
            report_queue,
            reader,
            sender,
            receiver,
            telemetry,
            command,
            join_timeout: config.join_timeout(),
            summary: RunSummary::default(),
            stopped: false,
        })
    }

    pub fn signal(&self) -> &Signal{
        &self.signal
    }

    /// Fork every group, upstream first.
    pub fn start(&mut self) -> Result<(), PipelineError>{
        self.reader.start()?;
        self.sender.start()?;
        self.receiver.start()?;
        self.telemetry.start()?;
        self.command.start()?;
        info!("pipeline started");
        Ok(())
    }

    /// Collect whatever the workers produced since the last poll.
    pub fn poll(&mut self) -> Result<(), PipelineError>{
        loop{
            match self.heartbeat_queue.try_get(){
                Ok(Some(status)) => {
                    self.summary.heartbeats += 1;
                    info!(%status, "heartbeat status");
                    if status == HeartbeatStatus::Disconnected{
                        self.summary.disconnected = true;
                    }
                }
                Ok(None) => {}
                Err(QueueError::Empty) => break,
                Err(e) => return Err(e.into()),
            }
        }

        loop{
            match self.report_queue.try_get(){
                Ok(Some(report)) => {
                    self.summary.reports += 1;
                    self.summary.last_report = Some(report);
                    info!(%report, "command report");
                }
                Ok(None) => {}
                Err(QueueError::Empty) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Start, supervise for `runtime` (or until the link is lost), shut down.
    pub fn run(&mut self, runtime: Duration) -> Result<RunSummary, PipelineError>{
        let started = Instant::now();
        if let Err(e) = self.start(){
            error!(error = %e, "pipeline failed to start");
            self.shutdown_after(&e);
            return Err(e);
        }

        while started.elapsed() < runtime{
            if let Err(e) = self.poll(){
                error!(error = %e, "supervisor poll failed");
                self.shutdown_after(&e);
                return Err(e);
            }
            if self.summary.disconnected{
                warn!("vehicle disconnected, stopping early");
                break;
            }
            thread::sleep(SUPERVISOR_POLL);
        }

        let mut summary = self.shutdown()?;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// Fixed shutdown sequence. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<RunSummary, PipelineError>{
        if self.stopped{
            return Ok(self.summary.clone());
        }
        self.stopped = true;

        //paused workers could never observe the exit flag
        self.signal.resume();
        self.signal.request_exit();
        info!("exit requested");

        //last chance for reports already queued
        self.poll()?;

        let queues = self.output_queues();
        self.summary.undelivered += drain_in_order(&queues)?;
        info!(undelivered = self.summary.undelivered, "queues drained");

        let timeout = self.join_timeout;
        join_group(&mut self.command, timeout, &mut self.summary);
        join_group(&mut self.telemetry, timeout, &mut self.summary);
        join_group(&mut self.receiver, timeout, &mut self.summary);
        join_group(&mut self.reader, timeout, &mut self.summary);
        join_group(&mut self.sender, timeout, &mut self.summary);

        //workers may have pushed between the drain and noticing the exit flag
        self.poll()?;
        let late = drain_in_order(&queues)?;
        if late > 0{
            warn!(late, "items queued after the drain were discarded");
        }
        self.summary.undelivered += late;

        info!(
            reports = self.summary.reports,
            crashed = self.summary.crashed,
            hung = self.summary.hung.len(),
            "pipeline stopped"
        );
        Ok(self.summary.clone())
    }

    //every group's outputs, downstream first
    fn output_queues(&self) -> Vec<Arc<dyn Drainable>>{
        self.command
            .output_queues()
            .iter()
            .chain(self.telemetry.output_queues())
            .chain(self.receiver.output_queues())
            .chain(self.reader.output_queues())
            .cloned()
            .collect()
    }

    //shutdown on an error path: its own failure is logged, the cause is returned
    fn shutdown_after(&mut self, cause: &PipelineError){
        if let Err(e) = self.shutdown(){
            error!(error = %e, cause = %cause, "shutdown after failure also failed");
        }
    }
}

fn join_group<A: WorkerArgs>(group: &mut WorkerGroup<A>, timeout: Duration, summary: &mut RunSummary){
    if !group.is_started(){
        return;
    }
    match group.join(timeout){
        Ok(joined) => summary.crashed += joined.crashed.len(),
        Err(WorkerError::Hung{ name, pids }) => {
            error!(group = %name, ?pids, "workers hung, terminating");
            group.terminate();
            summary.hung.push(name);
        }
        Err(e) => error!(group = group.name(), error = %e, "join failed"),
    }
}
