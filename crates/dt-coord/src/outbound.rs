//! Messages produced by the sans-IO drivers, addressed for the transport.

use dt_core::WorkerIndex;
use dt_proto::Message;

/// One message a driver wants delivered.
///
/// [`Coordinator`](crate::Coordinator) and [`WorkerNode`](crate::WorkerNode)
/// never perform I/O; they return these and the transport (TCP in
/// `dt-net`, in-memory in [`LocalCluster`](crate::LocalCluster)) delivers
/// them.  Every outbound message is an owned copy.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// Worker → server.
    ToServer(Message),
    /// Server → the worker registered under `name`.
    ToWorker { name: String, msg: Message },
    /// Server → the connection whose join under `name` was refused.  Not
    /// routed by name, since the name may belong to an admitted worker.
    Refused { name: String, msg: Message },
    /// Worker → fellow.
    ToFellow { fellow: WorkerIndex, msg: Message },
    /// Re-enter the worker's step loop once pending input has been handled.
    Wake,
}

impl Outbound {
    pub fn message(&self) -> Option<&Message> {
        match self {
            Outbound::ToServer(msg)
            | Outbound::ToWorker { msg, .. }
            | Outbound::Refused { msg, .. }
            | Outbound::ToFellow { msg, .. } => Some(msg),
            Outbound::Wake => None,
        }
    }
}
