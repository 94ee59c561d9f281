use flotilla_bus::BusError;
use flotilla_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] BusError),

    #[error("agent '{0}' has not registered")]
    UnknownAgent(String),

    #[error("inbound stream already consumed")]
    InboundConsumed,
}
