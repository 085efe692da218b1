//! The MQTT agent: command queue, dispatch loop and session resumption
//!
//! A single [`MqttAgent`] owns every connection. Application tasks hold
//! [`AgentHandle`]s and talk to it only by enqueuing commands.

pub mod command;
pub mod dispatcher;
pub mod handle;
pub mod queue;
mod resumption;
pub mod schedule;

pub use command::{completion_channel, on_complete, Command, CommandCallback, CommandKind, Operation};
pub use dispatcher::{AgentExit, MqttAgent};
pub use handle::AgentHandle;
pub use queue::{command_queue, CommandQueue, CommandSender, Dequeued};
pub use schedule::ServiceSchedule;
