//! Error types for dt-net.

use dt_coord::CoordError;
use dt_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error("connection closed mid-frame")]
    Truncated,

    #[error("server hub is gone")]
    HubGone,

    #[error("could not reach {addr} after {attempts} attempts")]
    Unreachable { addr: String, attempts: u32 },
}

/// Alias for `Result<T, NetError>`.
pub type NetResult<T> = Result<T, NetError>;
