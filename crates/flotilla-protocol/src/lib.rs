//! Flotilla Protocol - topic schema, message envelopes and codec
//!
//! Defines the publish/subscribe contract between a federated-learning
//! controller and its compute agents: canonical topic strings, flat JSON
//! envelopes with base64-embedded binary payloads, and the task kinds and
//! statuses that drive the agent's per-task state machine.

pub mod codec;
pub mod constants;
pub mod digest;
pub mod error;
pub mod messages;
pub mod topics;
pub mod types;

pub use codec::{decode, decode_blob, encode, encode_blob};
pub use constants::*;
pub use error::*;
pub use messages::*;
pub use topics::FlotillaTopics;
pub use types::*;
