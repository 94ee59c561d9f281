//! Flotilla controller.
//!
//! The coordinating side of a session: advertises the session, registers
//! answering agents, issues commands, distributes models and collects
//! status reports, results and heartbeats.

pub mod error;
pub mod liveness;
pub mod orchestrator;
pub mod registry;

pub use error::ControllerError;
pub use liveness::LivenessTracker;
pub use orchestrator::{ControllerSettings, SessionOrchestrator};
pub use registry::{AgentRecord, ControllerState, ReceivedResult, TaskRecord};
