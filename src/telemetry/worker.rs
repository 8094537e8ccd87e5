use tracing::{debug, info, warn};

use super::{TelemetryData, TelemetryFusion};
use crate::link::LinkInbox;
use crate::queue::BoundedQueue;
use crate::worker::{forward, Signal, WorkerArgs};

#[derive(Clone)]
pub struct TelemetryArgs{
    pub inbox: LinkInbox,
    pub output: BoundedQueue<TelemetryData>,
    pub signal: Signal,
}

impl WorkerArgs for TelemetryArgs{}

pub fn telemetry_worker(args: TelemetryArgs) -> anyhow::Result<()>{
    let fusion = TelemetryFusion::create(args.inbox);
    info!("telemetry worker running");

    while !args.signal.is_exit_requested(){
        args.signal.check_pause();

        match fusion.run(){
            Ok(data) => {
                debug!(time_since_boot = ?data.time_since_boot, "forwarding telemetry");
                if !forward(&args.output, &data, &args.signal)?{
                    break;
                }
            }
            //non-fatal, next cycle retries
            Err(e) => warn!(error = %e, "telemetry cycle failed"),
        }
    }

    info!("telemetry worker exiting");
    Ok(())
}
