//! Server side: an accept loop plus one hub task that owns the
//! [`Coordinator`].
//!
//! ```text
//! TcpListener ─accept─► conn task ─frames─┐
//!                       conn task ─frames─┼─► hub task (Coordinator) ─► writer tasks
//! ServerHandle ─────────commands──────────┘         │
//!                                                    └─► watch<ServerStatus>
//! ```
//!
//! Workers are addressed by the name they joined under, and frames naming a
//! worker are only accepted on that worker's connection.  A refused join is
//! answered on the connection it arrived on.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use dt_coord::{Coordinator, Outbound, Phase, ReportObserver, RunSummary, ServerCommand};
use dt_core::{SimConfig, Step};
use dt_proto::Message;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::frame::{read_frame, spawn_writer};
use crate::{NetError, NetResult};

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 7400;

/// Snapshot of the hub, published after every event.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerStatus {
    pub phase: Phase,
    /// Workers currently admitted.
    pub joined: usize,
    pub step: Step,
    /// Outcome of the most recent run.
    pub outcome: Option<RunSummary>,
}

enum HubEvent {
    Connected { conn: u64, tx: mpsc::UnboundedSender<Message>, peer: SocketAddr },
    Frame { conn: u64, msg: Message },
    Closed { conn: u64 },
    Command { cmd: ServerCommand, reply: oneshot::Sender<NetResult<()>> },
}

/// A bound listener and the coordinator it will serve.
pub struct Server {
    listener: TcpListener,
    coordinator: Coordinator,
}

impl Server {
    /// Bind `addr` and validate `config`.
    pub async fn bind(addr: impl ToSocketAddrs, config: SimConfig) -> NetResult<Self> {
        let coordinator = Coordinator::new(config)?;
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "server listening");
        Ok(Server { listener, coordinator })
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start accepting workers.  Merged steps go to `observer`.
    pub fn spawn(self, observer: Box<dyn ReportObserver>) -> NetResult<ServerHandle> {
        let local_addr = self.listener.local_addr()?;
        let (events, rx) = mpsc::unbounded_channel();
        let hub = Hub::new(self.coordinator, observer);
        let status = hub.status.subscribe();
        tokio::spawn(hub.run(rx));

        let accept = tokio::spawn(accept_loop(self.listener, events.clone()));
        Ok(ServerHandle { events, status, local_addr, accept: accept.abort_handle() })
    }
}

/// Control side of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    events: mpsc::UnboundedSender<HubEvent>,
    status: watch::Receiver<ServerStatus>,
    local_addr: SocketAddr,
    accept: AbortHandle,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address a worker on this host dials.  A wildcard listen address is
    /// replaced by loopback on the same port.
    pub fn connect_addr(&self) -> SocketAddr {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        addr
    }

    pub fn status(&self) -> ServerStatus {
        self.status.borrow().clone()
    }

    /// Apply an operator command and wait for the coordinator's verdict.
    pub async fn command(&self, cmd: ServerCommand) -> NetResult<()> {
        let (reply, rx) = oneshot::channel();
        self.events.send(HubEvent::Command { cmd, reply }).map_err(|_| NetError::HubGone)?;
        rx.await.map_err(|_| NetError::HubGone)?
    }

    /// Wait until the published status satisfies `pred`.
    pub async fn wait_until(&self, mut pred: impl FnMut(&ServerStatus) -> bool) -> NetResult<ServerStatus> {
        let mut rx = self.status.clone();
        let status = rx.wait_for(|s| pred(s)).await.map_err(|_| NetError::HubGone)?;
        Ok(status.clone())
    }

    /// Wait for `n` workers, set up, start, and wait for the run to end.
    pub async fn run_to_end(&self, n: usize) -> NetResult<RunSummary> {
        self.wait_until(|s| s.joined >= n).await?;
        self.command(ServerCommand::Setup).await?;
        self.wait_until(|s| s.phase == Phase::Ready).await?;
        self.command(ServerCommand::Start).await?;
        let done = self.wait_until(|s| s.phase == Phase::Stopped && s.outcome.is_some()).await?;
        done.outcome.ok_or(NetError::HubGone)
    }

    /// Stop accepting connections.  Existing connections stay open.
    pub fn close(&self) {
        self.accept.abort();
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<HubEvent>) {
    let mut next_conn = 0u64;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let conn = next_conn;
        next_conn += 1;
        tokio::spawn(serve_conn(conn, stream, peer, events.clone()));
    }
}

async fn serve_conn(conn: u64, stream: TcpStream, peer: SocketAddr, events: mpsc::UnboundedSender<HubEvent>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "nodelay");
    }
    let (mut reader, writer) = stream.into_split();
    let tx = spawn_writer(writer, peer.to_string());
    if events.send(HubEvent::Connected { conn, tx, peer }).is_err() {
        return;
    }
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(msg)) => {
                if events.send(HubEvent::Frame { conn, msg }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "dropping connection");
                break;
            }
        }
    }
    let _ = events.send(HubEvent::Closed { conn });
}

struct Hub {
    coordinator: Coordinator,
    observer: Box<dyn ReportObserver>,
    conns: HashMap<u64, mpsc::UnboundedSender<Message>>,
    /// Admitted worker name → connection.
    names: HashMap<String, u64>,
    status: watch::Sender<ServerStatus>,
}

impl Hub {
    fn new(coordinator: Coordinator, observer: Box<dyn ReportObserver>) -> Self {
        let (status, _) = watch::channel(ServerStatus {
            phase: coordinator.phase(),
            joined: 0,
            step: coordinator.step(),
            outcome: None,
        });
        Hub { coordinator, observer, conns: HashMap::new(), names: HashMap::new(), status }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<HubEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                HubEvent::Connected { conn, tx, peer } => {
                    debug!(conn, %peer, "connection opened");
                    self.conns.insert(conn, tx);
                }
                HubEvent::Frame { conn, msg } => self.on_frame(conn, msg),
                HubEvent::Closed { conn } => self.on_closed(conn),
                HubEvent::Command { cmd, reply } => {
                    let result = self.coordinator.command(cmd, self.observer.as_mut());
                    let verdict = match result {
                        Ok(out) => {
                            self.route(None, out);
                            Ok(())
                        }
                        Err(e) => Err(NetError::from(e)),
                    };
                    self.publish();
                    let _ = reply.send(verdict);
                }
            }
            self.publish();
        }
        debug!("hub stopped");
    }

    fn on_frame(&mut self, conn: u64, msg: Message) {
        let joining = match &msg {
            Message::Join { name, .. } => Some(name.clone()),
            _ => None,
        };
        if joining.is_none() {
            if let Some(name) = msg.worker_name() {
                if self.names.get(name) != Some(&conn) {
                    warn!(conn, worker = name, kind = msg.kind(), "frame not from that worker's connection, dropped");
                    return;
                }
            }
        }
        let out = self.coordinator.handle(msg, self.observer.as_mut());
        if let Some(name) = joining {
            let refused = out.iter().any(|o| matches!(o, Outbound::Refused { .. }));
            if !refused {
                self.names.insert(name, conn);
            }
        }
        self.route(Some(conn), out);
    }

    fn on_closed(&mut self, conn: u64) {
        self.conns.remove(&conn);
        let Some(name) = self.names.iter().find(|(_, c)| **c == conn).map(|(n, _)| n.clone()) else {
            debug!(conn, "connection closed");
            return;
        };
        self.names.remove(&name);
        info!(worker = %name, "worker disconnected");
        let out = self.coordinator.remove_worker(&name, self.observer.as_mut());
        self.route(None, out);
    }

    fn route(&mut self, from: Option<u64>, out: Vec<Outbound>) {
        for o in out {
            match o {
                Outbound::ToWorker { name, msg } => {
                    let tx = self.names.get(&name).and_then(|c| self.conns.get(c));
                    match tx {
                        Some(tx) => {
                            if tx.send(msg).is_err() {
                                warn!(worker = %name, "worker connection gone");
                            }
                        }
                        None => warn!(worker = %name, kind = msg.kind(), "no connection for worker"),
                    }
                }
                Outbound::Refused { name, msg } => match from.and_then(|c| self.conns.get(&c)) {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => warn!(worker = %name, "refused connection already gone"),
                },
                other => warn!(?other, "not routable from the server"),
            }
        }
    }

    fn publish(&self) {
        let next = ServerStatus {
            phase: self.coordinator.phase(),
            joined: self.coordinator.registry().len(),
            step: self.coordinator.step(),
            outcome: self.coordinator.outcome(),
        };
        self.status.send_if_modified(|s| {
            if *s == next {
                false
            } else {
                *s = next;
                true
            }
        });
    }
}
