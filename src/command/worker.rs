use tracing::{debug, info, warn};

use super::{DecisionLoop, Position, Report};
use crate::link::Connection;
use crate::queue::{BoundedQueue, QueueError};
use crate::telemetry::TelemetryData;
use crate::worker::{forward, Signal, WorkerArgs, QUEUE_POLL};

#[derive(Clone)]
pub struct CommandArgs{
    pub connection: Connection,
    pub target: Position,
    pub input: BoundedQueue<TelemetryData>,
    pub output: BoundedQueue<Report>,
    pub signal: Signal,
}

impl WorkerArgs for CommandArgs{
    fn validate(&self) -> Result<(), String>{
        if !self.target.is_finite(){
            return Err(format!("target {:?} is not finite", self.target));
        }
        Ok(())
    }
}

pub fn command_worker(args: CommandArgs) -> anyhow::Result<()>{
    let mut decision = DecisionLoop::create(args.connection);
    decision.set_target(args.target)?;
    info!(goal = ?args.target, "command worker running");

    while !args.signal.is_exit_requested(){
        args.signal.check_pause();

        let data = match args.input.get(QUEUE_POLL){
            Ok(Some(data)) => data,
            //released by a drain, or nothing yet
            Ok(None) | Err(QueueError::Timeout) => continue,
            Err(e) => return Err(e.into()),
        };

        match decision.run(&data){
            Ok(Some(report)) => {
                if !forward(&args.output, &report, &args.signal)?{
                    break;
                }
            }
            Ok(None) => debug!("on target, no correction"),
            Err(e) => warn!(error = %e, "decision cycle skipped"),
        }
    }

    info!("command worker exiting");
    Ok(())
}
