use std::net::IpAddr;

use thiserror::Error;

/// Failures from the UDP transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response from {addr} within the request timeout")]
    Timeout { addr: IpAddr },
}

/// Failures from decoding a wire frame.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("datagram too short ({len} bytes)")]
    Malformed { len: usize },

    #[error("unrecognized response byte 0x{byte:02x}")]
    UnknownResponse { byte: u8 },
}

/// Failures surfaced to callers of the public controller/discovery API.
#[derive(Debug, Error)]
pub enum EsceaError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{value} is outside the controller's range [{min}, {max}]")]
    TempOutOfRange { value: i32, min: i32, max: i32 },

    #[error("no controllers responded to the discovery broadcast")]
    NoControllersResponded,
}
