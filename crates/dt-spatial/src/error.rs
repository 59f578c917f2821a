//! Spatial-subsystem error type.

use thiserror::Error;

use dt_core::{EdgeId, NodeId};

/// Errors produced by `dt-spatial`.
#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("no route from {from} to {to}")]
    NoRoute { from: NodeId, to: NodeId },

    #[error("node {0} not found in network")]
    NodeNotFound(NodeId),

    #[error("edge {0} not found in network")]
    EdgeNotFound(EdgeId),

    #[error("invalid road graph: {0}")]
    InvalidGraph(String),
}

pub type SpatialResult<T> = Result<T, SpatialError>;
