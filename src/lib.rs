pub mod shm;
pub mod ring_buffer;
pub mod queue;
pub mod worker;
pub mod link;
pub mod heartbeat;
pub mod telemetry;
pub mod command;
pub mod pipeline;
pub mod config;
pub mod logging;

pub use ring_buffer::RingBuffer;
pub use ring_buffer::byte_buffer::{ByteRing, ByteSlot, SLOT_SIZE, MAX_PAYLOAD_SIZE};

pub use queue::{BoundedQueue, Drainable, PutMode, QueueError};
pub use worker::{Signal, WorkerArgs, WorkerError, WorkerGroup, WorkerSpec};
pub use link::{Connection, LinkAddress, LinkError, LinkInbox, LinkMessage, MessageKind, ScriptedLink, VehicleCommand, VehicleLink};
pub use heartbeat::{HeartbeatMonitor, HeartbeatSender, HeartbeatStatus};
pub use telemetry::{FusionError, TelemetryData, TelemetryFusion};
pub use command::{CommandError, DecisionLoop, Position, Report};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
pub use config::{Config, ConfigError};
