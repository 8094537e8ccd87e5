use std::time::Duration;

use serial_test::serial;

use drone_sync::command::Report;
use drone_sync::config::Config;
use drone_sync::link::{AttitudeMsg, Connection, HeartbeatMsg, LinkMessage, LocalPositionMsg, ScriptedLink};
use drone_sync::pipeline::Pipeline;

//vehicle sitting 1 m below the target altitude
fn scripted_vehicle(heartbeats: usize) -> Connection{
    let mut link = ScriptedLink::new();
    for _ in 0..heartbeats{
        link.push(LinkMessage::Heartbeat(HeartbeatMsg::default()));
    }
    link.push(LinkMessage::Attitude(AttitudeMsg{ time_boot_ms: 120, yaw: 0.0, ..Default::default() }));
    link.push(LinkMessage::LocalPosition(LocalPositionMsg{ time_boot_ms: 150, x: 0.0, y: 0.0, z: 29.0, ..Default::default() }));
    Connection::new(link)
}

#[test]
#[serial]
fn test_pipeline_reports_altitude_correction(){
    let config = Config{ runtime_secs: 3, ..Config::default() };
    let mut pipeline = Pipeline::create(&config, scripted_vehicle(10)).unwrap();

    let summary = pipeline.run(config.runtime()).unwrap();

    assert_eq!(summary.reports, 1);
    assert_eq!(summary.last_report, Some(Report::Altitude{ delta_z: 1.0 }));
    assert_eq!(summary.last_report.unwrap().to_string(), "CHANGE ALTITUDE: 1.00");
    assert!(summary.heartbeats >= 1);
    assert!(!summary.disconnected);
    assert!(summary.is_clean(), "{summary:?}");
}

#[test]
#[serial]
fn test_pipeline_stops_on_lost_link(){
    let config = Config{ runtime_secs: 30, ..Config::default() };
    let mut pipeline = Pipeline::create(&config, scripted_vehicle(0)).unwrap();

    let summary = pipeline.run(config.runtime()).unwrap();

    assert!(summary.disconnected);
    //five one-second misses, well short of the runtime
    assert!(summary.elapsed < Duration::from_secs(15), "{summary:?}");
    assert!(summary.is_clean(), "{summary:?}");
}

#[test]
#[serial]
fn test_shutdown_twice_is_harmless(){
    let config = Config{
        runtime_secs: 1,
        queues: drone_sync::config::QueueConfig{ heartbeat: 0, telemetry: 0, report: 0, inbox: 0 },
        ..Config::default()
    };
    let mut pipeline = Pipeline::create(&config, scripted_vehicle(3)).unwrap();
    pipeline.start().unwrap();

    let first = pipeline.shutdown().unwrap();
    let second = pipeline.shutdown().unwrap();

    assert!(first.is_clean(), "{first:?}");
    assert_eq!(first.reports, second.reports);
    assert!(pipeline.signal().is_exit_requested());
}

#[test]
fn test_invalid_config_rejected_before_fork(){
    let mut config = Config::default();
    config.workers.command = 0;
    assert!(Pipeline::create(&config, scripted_vehicle(0)).is_err());
}
