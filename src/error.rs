use thiserror::Error;

/// failures of the signaling channel itself
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignalingError {
    /// the websocket handshake did not complete within the allotted time
    #[error("timed out connecting to the signaling server")]
    ConnectTimeout,
    /// transport-level failure while reaching the signaling endpoint
    #[error("failed to reach the signaling server: {0}")]
    ConnectError(String),
    /// a request/response call received no answer in time
    #[error("'{event}' received no response in time")]
    CallTimeout { event: &'static str },
    /// the server explicitly rejected the request
    #[error("'{event}' rejected by the server: {message}")]
    Remote { event: &'static str, message: String },
    /// the server answered with a payload the client cannot decode
    #[error("malformed '{event}' payload: {message}")]
    Payload { event: &'static str, message: String },
    /// the underlying connection is gone. fatal for the session; the caller
    /// restarts the whole flow rather than reconnecting in place
    #[error("signaling channel closed")]
    ChannelClosed,
}

/// session-level failures, surfaced through the room state when they occur
/// during the mandatory connect sequence
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    /// the router response carried no usable capability payload
    #[error("router reported no rtp capabilities")]
    CapabilitiesUnavailable,
    /// the local codec table and the router's have an empty intersection
    #[error("no codecs in common with the router")]
    IncompatibleDevice,
    #[error("join may only be called once per session")]
    AlreadyJoined,
    #[error("session is not connected")]
    NotConnected,
    #[error("transport is closed")]
    TransportClosed,
}
