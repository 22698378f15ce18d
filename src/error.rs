use std::io;
use std::net::SocketAddr;

use failure::Fail;
use tokio_util::codec::LinesCodecError;

/// Everything that can end a connection (or, for a bind failure, the process).
#[derive(Debug, Fail)]
pub enum RelayError {
    #[fail(display = "Username '{}' is already active", _0)]
    AlreadyActive(String),

    #[fail(display = "Invalid username. Disconnecting...")]
    InvalidUsername,

    #[fail(display = "peer disconnected")]
    PeerDisconnected,

    #[fail(display = "read failed: {}", _0)]
    ReadFailure(String),

    #[fail(display = "write to {} failed: {}", _0, _1)]
    WriteFailure(SocketAddr, #[cause] LinesCodecError),

    #[fail(display = "failed to listen on {}: {}", _0, _1)]
    ListenBindFailure(SocketAddr, #[cause] io::Error),
}
