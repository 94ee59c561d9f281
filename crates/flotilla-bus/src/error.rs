#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to '{filter}' failed: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("invalid topic filter '{0}'")]
    InvalidFilter(String),

    #[error("bus client closed")]
    Closed,
}
