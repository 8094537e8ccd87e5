/**
 * Telemetry Fusion
 *
 * Attitude and local position arrive as separate, unsynchronised streams,
 * each in its own inbox queue. One fusion cycle polls both for up to a
 * second and merges the two readings into a single TelemetryData snapshot.
 */

pub mod worker;

pub use worker::{telemetry_worker, TelemetryArgs};

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::link::{AttitudeMsg, LinkInbox, LinkMessage, LocalPositionMsg, MessageKind};

/// Longest a fusion cycle waits for both streams.
pub const FUSION_DEADLINE: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One fused reading of the vehicle state. `None` means unknown, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData{
    pub time_since_boot: Option<u64>, //ms
    pub x: Option<f64>,               //m, local frame
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub x_velocity: Option<f64>,      //m/s
    pub y_velocity: Option<f64>,
    pub z_velocity: Option<f64>,
    pub roll: Option<f64>,            //rad
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub roll_speed: Option<f64>,      //rad/s
    pub pitch_speed: Option<f64>,
    pub yaw_speed: Option<f64>,
}

struct Field<'a, T>(&'a Option<T>);

impl<T: fmt::Display> fmt::Display for Field<'_, T>{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        match self.0{
            Some(v) => v.fmt(f),
            None => f.write_str("None"),
        }
    }
}

impl fmt::Display for TelemetryData{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        write!(
            f,
            "{{time_since_boot: {}, x: {}, y: {}, z: {}, x_velocity: {}, y_velocity: {}, z_velocity: {}, \
             roll: {}, pitch: {}, yaw: {}, roll_speed: {}, pitch_speed: {}, yaw_speed: {}}}",
            Field(&self.time_since_boot),
            Field(&self.x),
            Field(&self.y),
            Field(&self.z),
            Field(&self.x_velocity),
            Field(&self.y_velocity),
            Field(&self.z_velocity),
            Field(&self.roll),
            Field(&self.pitch),
            Field(&self.yaw),
            Field(&self.roll_speed),
            Field(&self.pitch_speed),
            Field(&self.yaw_speed),
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FusionError{
    /// Flags name the streams that produced nothing before the deadline.
    #[error("telemetry incomplete after deadline (attitude missing: {attitude}, position missing: {position})")]
    Timeout{ attitude: bool, position: bool },
}

/// Merge one attitude and one position reading.
pub fn fuse(attitude: &AttitudeMsg, position: &LocalPositionMsg) -> TelemetryData{
    let time_att = attitude.time_boot_ms;
    let time_pos = position.time_boot_ms;

    TelemetryData{
        time_since_boot: Some(u64::from(time_att.max(time_pos))),
        x: Some(f64::from(position.x)),
        y: Some(f64::from(position.y)),
        z: Some(f64::from(position.z)),
        x_velocity: Some(f64::from(position.vx)),
        y_velocity: Some(f64::from(position.vy)),
        z_velocity: Some(f64::from(position.vz)),
        roll: Some(f64::from(attitude.roll)),
        pitch: Some(f64::from(attitude.pitch)),
        yaw: Some(f64::from(attitude.yaw)),
        roll_speed: Some(f64::from(attitude.rollspeed)),
        pitch_speed: Some(f64::from(attitude.pitchspeed)),
        yaw_speed: Some(f64::from(attitude.yawspeed)),
    }
}

pub struct TelemetryFusion{
    inbox: LinkInbox,
    deadline: Duration,
}

impl TelemetryFusion{
    pub fn create(inbox: LinkInbox) -> Self{
        TelemetryFusion{
            inbox,
            deadline: FUSION_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self{
        self.deadline = deadline;
        self
    }

    /// One fusion cycle: non-blocking polls every 10 ms until both streams
    /// have delivered or the deadline passes.
    pub fn run(&self) -> Result<TelemetryData, FusionError>{
        let start = Instant::now();
        let mut attitude = None;
        let mut position = None;

        loop{
            if attitude.is_none(){
                if let Some(LinkMessage::Attitude(msg)) = self.inbox.receive(MessageKind::Attitude, false, Duration::ZERO){
                    attitude = Some(msg);
                }
            }
            if position.is_none(){
                if let Some(LinkMessage::LocalPosition(msg)) = self.inbox.receive(MessageKind::LocalPosition, false, Duration::ZERO){
                    position = Some(msg);
                }
            }

            if let (Some(att), Some(pos)) = (&attitude, &position){
                let data = fuse(att, pos);
                debug!(%data, "telemetry fused");
                return Ok(data);
            }
            if start.elapsed() >= self.deadline{
                return Err(FusionError::Timeout{
                    attitude: attitude.is_none(),
                    position: position.is_none(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
