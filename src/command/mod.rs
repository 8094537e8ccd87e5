/**
 * Decision Loop
 *
 * Threshold-gated corrector steering the vehicle toward a fixed target:
 * 1. Altitude first: |target.z - z| > 0.5 m issues a climb/descend command
 * 2. Otherwise heading: |yaw error| > 5 deg issues a relative yaw command
 * 3. Otherwise nothing
 *
 * At most one correction per cycle.
 */

pub mod worker;

pub use worker::{command_worker, CommandArgs};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::link::{Connection, VehicleCommand};
use crate::telemetry::TelemetryData;

pub const ALTITUDE_TOLERANCE: f64 = 0.5; //m
pub const YAW_TOLERANCE: f64 = 5.0;      //deg
pub const CLIMB_RATE: f64 = 1.0;         //m/s
pub const TURN_RATE: f64 = 5.0;          //deg/s

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position{
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position{
    pub fn new(x: f64, y: f64, z: f64) -> Self{
        Position{ x, y, z }
    }

    pub fn is_finite(&self) -> bool{
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Correction issued in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Report{
    Altitude{ delta_z: f64 },
    Yaw{ yaw_error: f64 },
}

impl Report{
    /// Turn direction sent with a yaw correction: -1 for a non-negative error, +1 otherwise.
    pub fn direction(&self) -> Option<f64>{
        match self{
            Report::Altitude{ .. } => None,
            Report::Yaw{ yaw_error } => Some(yaw_direction(*yaw_error)),
        }
    }
}

impl fmt::Display for Report{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        match self{
            Report::Altitude{ delta_z } => write!(f, "CHANGE ALTITUDE: {delta_z:.2}"),
            Report::Yaw{ yaw_error } => write!(f, "CHANGE YAW: {yaw_error:.2}"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError{
    #[error("no target set")]
    NoTarget,

    #[error("telemetry is missing {0}")]
    MissingField(&'static str),

    #[error("invalid target {0:?}")]
    InvalidTarget(Position),
}

/// Wrap an angle in degrees into [-180, 180).
pub fn wrap_degrees(angle: f64) -> f64{
    (angle + 180.0).rem_euclid(360.0) - 180.0
}

fn yaw_direction(yaw_error: f64) -> f64{
    if yaw_error >= 0.0{ -1.0 }else{ 1.0 }
}

pub struct DecisionLoop{
    connection: Connection,
    target: Option<Position>,
    velocity_sum: Position,
    sample_count: u64,
}

impl DecisionLoop{
    pub fn create(connection: Connection) -> Self{
        DecisionLoop{
            connection,
            target: None,
            velocity_sum: Position::new(0.0, 0.0, 0.0),
            sample_count: 0,
        }
    }

    pub fn set_target(&mut self, target: Position) -> Result<(), CommandError>{
        if !target.is_finite(){
            return Err(CommandError::InvalidTarget(target));
        }
        self.target = Some(target);
        Ok(())
    }

    pub fn target(&self) -> Option<Position>{
        self.target
    }

    /// Mean velocity over every snapshot seen so far, unknown components counted as 0.
    pub fn average_velocity(&self) -> Option<Position>{
        if self.sample_count == 0{
            return None;
        }
        let n = self.sample_count as f64;
        Some(Position::new(self.velocity_sum.x / n, self.velocity_sum.y / n, self.velocity_sum.z / n))
    }

    pub fn run(&mut self, data: &TelemetryData) -> Result<Option<Report>, CommandError>{
        let target = self.target.ok_or(CommandError::NoTarget)?;

        self.velocity_sum.x += data.x_velocity.unwrap_or(0.0);
        self.velocity_sum.y += data.y_velocity.unwrap_or(0.0);
        self.velocity_sum.z += data.z_velocity.unwrap_or(0.0);
        self.sample_count += 1;
        if let Some(avg) = self.average_velocity(){
            info!("average velocity so far: ({:.2}, {:.2}, {:.2})", avg.x, avg.y, avg.z);
        }

        let z = data.z.ok_or(CommandError::MissingField("z"))?;
        let delta_z = target.z - z;
        if delta_z.abs() > ALTITUDE_TOLERANCE{
            self.send(VehicleCommand::ChangeAltitude{ rate: CLIMB_RATE, altitude: target.z });
            let report = Report::Altitude{ delta_z };
            info!(%report, "altitude correction");
            return Ok(Some(report));
        }

        let x = data.x.ok_or(CommandError::MissingField("x"))?;
        let y = data.y.ok_or(CommandError::MissingField("y"))?;
        let yaw = data.yaw.ok_or(CommandError::MissingField("yaw"))?;

        let desired_yaw = (target.y - y).atan2(target.x - x).to_degrees();
        let yaw_error = wrap_degrees(desired_yaw - yaw.to_degrees());
        if yaw_error.abs() > YAW_TOLERANCE{
            self.send(VehicleCommand::ConditionYaw{
                angle: yaw_error.abs(),
                rate: TURN_RATE,
                direction: yaw_direction(yaw_error),
                relative: true,
            });
            let report = Report::Yaw{ yaw_error };
            info!(%report, "yaw correction");
            return Ok(Some(report));
        }

        Ok(None)
    }

    fn send(&self, command: VehicleCommand){
        if let Err(e) = self.connection.send_command(command){
            warn!(error = %e, ?command, "command send failed");
        }
    }
}
