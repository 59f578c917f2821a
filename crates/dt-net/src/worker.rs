//! Worker side: one event loop owning a [`WorkerNode`], fed by the server
//! connection, a peer listener and the node's own wake-ups.
//!
//! Outgoing fellow connections are dialled on first use and cached per
//! fellow index until the next setup.  Each gets a writer task, so payloads
//! to one fellow keep their order while the loop never waits on a connect.

use std::collections::HashMap;
use std::time::Duration;

use dt_coord::{Outbound, WorkerNode};
use dt_core::WorkerIndex;
use dt_mobility::LocalSimulation;
use dt_proto::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::frame::{read_frame, spawn_writer, write_frame};
use crate::{NetError, NetResult};

/// Connect attempts per fellow before its payloads are dropped.
const DIAL_ATTEMPTS: u32 = 20;
const DIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Why a worker loop ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// The server sent `KillWorker`.
    Killed { shared_process: bool },
    /// The server connection closed.
    ServerClosed,
}

enum NodeEvent {
    Server(Message),
    Peer(Message),
    ServerClosed,
    Wake,
}

/// Join the server at `server_addr` as `name` and serve until killed.
///
/// The peer listener binds an ephemeral port on the interface that reaches
/// the server, which is the address advertised to fellows.
pub async fn run_worker<S>(server_addr: &str, name: String, sim: S) -> NetResult<WorkerExit>
where
    S: LocalSimulation + Send + 'static,
{
    let server = TcpStream::connect(server_addr).await?;
    server.set_nodelay(true)?;
    let local_ip = server.local_addr()?.ip();
    let listener = TcpListener::bind((local_ip, 0)).await?;
    let port = listener.local_addr()?.port();
    info!(worker = %name, server = server_addr, peer_addr = %local_ip, port, "worker connecting");

    let (events, mut rx) = mpsc::unbounded_channel();
    let (mut reader, mut writer) = server.into_split();

    let mut node = WorkerNode::new(name, local_ip.to_string(), port, sim);
    write_frame(&mut writer, &node.join_message()).await?;
    let to_server = spawn_writer(writer, server_addr.to_string());

    let server_events = events.clone();
    let server_reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(msg)) => {
                    if server_events.send(NodeEvent::Server(msg)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "server connection failed");
                    break;
                }
            }
        }
        let _ = server_events.send(NodeEvent::ServerClosed);
    });
    let peers = tokio::spawn(accept_peers(listener, events.clone()));

    let mut fellows: HashMap<WorkerIndex, mpsc::UnboundedSender<Message>> = HashMap::new();
    let exit = loop {
        let Some(event) = rx.recv().await else { break WorkerExit::ServerClosed };
        let out = match event {
            NodeEvent::Server(msg) => {
                let kill = match &msg {
                    Message::KillWorker { is_shared_process_space } => Some(*is_shared_process_space),
                    _ => None,
                };
                if matches!(msg, Message::Setup(_)) {
                    fellows.clear();
                }
                let out = node.handle(msg);
                if let Some(shared_process) = kill {
                    break WorkerExit::Killed { shared_process };
                }
                out
            }
            NodeEvent::Peer(msg) => node.handle(msg),
            NodeEvent::Wake => node.wake(),
            NodeEvent::ServerClosed => break WorkerExit::ServerClosed,
        };
        for o in out {
            match o {
                Outbound::ToServer(msg) => {
                    if to_server.send(msg).is_err() {
                        warn!(worker = %node.name(), "server writer gone");
                    }
                }
                Outbound::ToFellow { fellow, msg } => {
                    let tx = match fellows.get(&fellow) {
                        Some(tx) if !tx.is_closed() => tx.clone(),
                        _ => match node.fellow_meta(fellow) {
                            Some(meta) => {
                                let tx = spawn_dialer(format!("{}:{}", meta.address, meta.port));
                                fellows.insert(fellow, tx.clone());
                                tx
                            }
                            None => {
                                warn!(worker = %node.name(), %fellow, "unknown fellow");
                                continue;
                            }
                        },
                    };
                    let _ = tx.send(msg);
                }
                Outbound::Wake => {
                    let _ = events.send(NodeEvent::Wake);
                }
                other => warn!(worker = %node.name(), ?other, "not routable from a worker"),
            }
        }
    };

    info!(worker = %node.name(), ?exit, "worker stopped");
    server_reader.abort();
    peers.abort();
    Ok(exit)
}

/// Run a worker as a task of this process, with the reference simulation
/// of the caller's choosing.
pub fn spawn_local_worker<S>(server_addr: String, name: String, sim: S) -> JoinHandle<NetResult<WorkerExit>>
where
    S: LocalSimulation + Send + 'static,
{
    tokio::spawn(async move { run_worker(&server_addr, name, sim).await })
}

async fn accept_peers(listener: TcpListener, events: mpsc::UnboundedSender<NodeEvent>) {
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "peer accept failed");
                continue;
            }
        };
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "nodelay");
            }
            loop {
                match read_frame(&mut stream).await {
                    Ok(Some(msg)) => {
                        if events.send(NodeEvent::Peer(msg)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!(%peer, error = %e, "fellow connection failed");
                        return;
                    }
                }
            }
        });
    }
}

/// Connect to a fellow in the background and forward every queued message.
fn spawn_dialer(addr: String) -> mpsc::UnboundedSender<Message> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        let mut stream = match dial(&addr).await {
            Ok(s) => s,
            Err(e) => {
                warn!(fellow = %addr, error = %e, "fellow unreachable");
                return;
            }
        };
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_frame(&mut stream, &msg).await {
                warn!(fellow = %addr, kind = msg.kind(), error = %e, "fellow write failed");
                return;
            }
        }
    });
    tx
}

async fn dial(addr: &str) -> NetResult<TcpStream> {
    for attempt in 1..=DIAL_ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(s) => {
                s.set_nodelay(true)?;
                debug!(fellow = addr, attempt, "fellow connected");
                return Ok(s);
            }
            Err(e) => {
                debug!(fellow = addr, attempt, error = %e, "dial failed");
                tokio::time::sleep(DIAL_BACKOFF * attempt).await;
            }
        }
    }
    Err(NetError::Unreachable { addr: addr.to_string(), attempts: DIAL_ATTEMPTS })
}
