//! Framework error type.
//!
//! Sub-crates define their own error enums and convert `DtError` into them
//! via `From` impls.

use thiserror::Error;

use crate::{EdgeId, NodeId};

/// The top-level error type for `dt-core` and a common base for sub-crates.
#[derive(Debug, Error)]
pub enum DtError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result type for all `dt-*` crates.
pub type DtResult<T> = Result<T, DtError>;
