//! Wire error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u16),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

pub type ProtoResult<T> = Result<T, ProtoError>;
