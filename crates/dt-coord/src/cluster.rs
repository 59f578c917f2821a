//! In-process cluster: one [`Coordinator`] and several [`WorkerNode`]s wired
//! together by in-memory channels.
//!
//! Every ordered pair of endpoints gets its own FIFO queue, matching the
//! guarantee of one TCP connection.  Delivery picks among non-empty queues
//! either in a fixed order or, with [`LocalCluster::with_reordering`],
//! randomly from a seeded RNG, which interleaves peers differently on every
//! seed while staying reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use dt_core::{SimConfig, SimRng};
use dt_mobility::LocalSimulation;
use dt_proto::Message;
use tracing::{debug, warn};

use crate::coordinator::{Coordinator, ServerCommand};
use crate::observer::{ReportObserver, RunSummary};
use crate::outbound::Outbound;
use crate::worker::WorkerNode;
use crate::{CoordError, CoordResult};

/// Upper bound on deliveries per [`LocalCluster::run_until_idle`] call.
pub const MAX_DELIVERIES: usize = 2_000_000;

/// One end of an in-memory channel.  Workers are numbered in creation
/// order, which is also their join order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Endpoint {
    Server,
    Worker(usize),
}

/// Record of one delivered message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub from: Endpoint,
    pub to: Endpoint,
    pub kind: &'static str,
}

pub struct LocalCluster<S: LocalSimulation> {
    coordinator: Coordinator,
    nodes: Vec<WorkerNode<S>>,
    channels: BTreeMap<(Endpoint, Endpoint), VecDeque<Message>>,
    wakes: BTreeSet<usize>,
    rng: Option<SimRng>,
    log: Vec<Delivery>,
}

impl<S: LocalSimulation> LocalCluster<S> {
    /// One worker per simulation, named `worker-<i>`.  Their join requests
    /// are queued but not yet delivered.
    pub fn new(config: SimConfig, sims: Vec<S>) -> CoordResult<Self> {
        let coordinator = Coordinator::new(config)?;
        let nodes: Vec<WorkerNode<S>> = sims
            .into_iter()
            .enumerate()
            .map(|(i, sim)| WorkerNode::new(format!("worker-{i}"), "local", 0, sim))
            .collect();
        let mut cluster = LocalCluster {
            coordinator,
            nodes,
            channels: BTreeMap::new(),
            wakes: BTreeSet::new(),
            rng: None,
            log: Vec::new(),
        };
        for i in 0..cluster.nodes.len() {
            let join = cluster.nodes[i].join_message();
            cluster.push(Endpoint::Worker(i), Endpoint::Server, join);
        }
        Ok(cluster)
    }

    /// Deliver from a randomly chosen non-empty channel each time.
    pub fn with_reordering(mut self, seed: u64) -> Self {
        self.rng = Some(SimRng::new(seed));
        self
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn nodes(&self) -> &[WorkerNode<S>] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> Option<&WorkerNode<S>> {
        self.nodes.get(i)
    }

    /// Direct access, bypassing the channels.
    pub fn node_mut(&mut self, i: usize) -> Option<&mut WorkerNode<S>> {
        self.nodes.get_mut(i)
    }

    pub fn log(&self) -> &[Delivery] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.log)
    }

    /// Messages waiting in any channel.
    pub fn in_flight(&self) -> usize {
        self.channels.values().map(VecDeque::len).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0 && self.wakes.is_empty()
    }

    // ── Driving ───────────────────────────────────────────────────────────

    pub fn command(&mut self, cmd: ServerCommand, observer: &mut dyn ReportObserver) -> CoordResult<()> {
        let out = self.coordinator.command(cmd, observer)?;
        self.route(Endpoint::Server, out);
        Ok(())
    }

    /// Hand `msg` to the server as if `from` had sent it, bypassing the
    /// channels.
    pub fn inject_to_server(&mut self, from: usize, msg: Message, observer: &mut dyn ReportObserver) {
        let out = self.coordinator.handle(msg, observer);
        self.route(Endpoint::Worker(from), out);
    }

    /// Cut worker `i` off: its queued traffic is dropped and the server
    /// learns it is gone.
    pub fn disconnect(&mut self, i: usize, observer: &mut dyn ReportObserver) {
        let Some(node) = self.nodes.get(i) else { return };
        let name = node.name().to_string();
        let gone = Endpoint::Worker(i);
        self.channels.retain(|(from, to), _| *from != gone && *to != gone);
        self.wakes.remove(&i);
        let out = self.coordinator.remove_worker(&name, observer);
        self.route(Endpoint::Server, out);
    }

    /// Queue `msg` on the channel `from → to`.
    pub fn inject(&mut self, from: Endpoint, to: Endpoint, msg: Message) {
        self.push(from, to, msg);
    }

    /// Deliver one message, or run one pending wake when no message is
    /// waiting.  `None` once the cluster is idle.
    pub fn deliver_next(&mut self, observer: &mut dyn ReportObserver) -> Option<Delivery> {
        let Some(key) = self.pick_channel() else {
            let i = self.wakes.pop_first()?;
            let out = self.nodes.get_mut(i).map(WorkerNode::wake).unwrap_or_default();
            self.route(Endpoint::Worker(i), out);
            let d = Delivery { from: Endpoint::Worker(i), to: Endpoint::Worker(i), kind: "wake" };
            self.log.push(d.clone());
            return Some(d);
        };
        let msg = self.channels.get_mut(&key).and_then(VecDeque::pop_front)?;
        if self.channels.get(&key).is_some_and(VecDeque::is_empty) {
            self.channels.remove(&key);
        }
        let (from, to) = key;
        let d = Delivery { from, to, kind: msg.kind() };
        self.log.push(d.clone());

        let out = match to {
            Endpoint::Server => self.coordinator.handle(msg, observer),
            Endpoint::Worker(i) => match self.nodes.get_mut(i) {
                Some(node) if !node.is_killed() => node.handle(msg),
                _ => {
                    debug!(worker = i, kind = d.kind, "dropped, worker gone");
                    Vec::new()
                }
            },
        };
        self.route(to, out);
        Some(d)
    }

    /// Deliver until idle.  Returns the number of deliveries.
    pub fn run_until_idle(&mut self, observer: &mut dyn ReportObserver) -> usize {
        let mut n = 0;
        while n < MAX_DELIVERIES && self.deliver_next(observer).is_some() {
            n += 1;
        }
        if n == MAX_DELIVERIES {
            warn!(in_flight = self.in_flight(), "delivery limit reached");
        }
        n
    }

    /// Admit every worker, set up, start, and run until the run terminates.
    pub fn run_to_end(&mut self, observer: &mut dyn ReportObserver) -> CoordResult<RunSummary> {
        self.run_until_idle(observer);
        self.command(ServerCommand::Setup, observer)?;
        self.run_until_idle(observer);
        self.command(ServerCommand::Start, observer)?;
        self.run_until_idle(observer);
        self.coordinator.outcome().ok_or(CoordError::InvalidCommand {
            command: "run_to_end",
            phase: self.coordinator.phase().as_str(),
        })
    }

    // ── Routing ───────────────────────────────────────────────────────────

    fn pick_channel(&mut self) -> Option<(Endpoint, Endpoint)> {
        match self.rng.as_mut() {
            None => self.channels.keys().next().copied(),
            Some(rng) => {
                let keys: Vec<_> = self.channels.keys().copied().collect();
                rng.choose(&keys).copied()
            }
        }
    }

    fn push(&mut self, from: Endpoint, to: Endpoint, msg: Message) {
        self.channels.entry((from, to)).or_default().push_back(msg);
    }

    fn route(&mut self, from: Endpoint, out: Vec<Outbound>) {
        for o in out {
            match o {
                Outbound::ToServer(msg) => self.push(from, Endpoint::Server, msg),
                Outbound::ToWorker { name, msg } => {
                    match self.nodes.iter().position(|n| n.name() == name) {
                        Some(i) => self.push(from, Endpoint::Worker(i), msg),
                        None => warn!(worker = %name, kind = msg.kind(), "no such worker"),
                    }
                }
                Outbound::Refused { name, msg } => {
                    // The refused join came from whichever worker handed it in.
                    match self.sender_of_join(&name) {
                        Some(i) => self.push(from, Endpoint::Worker(i), msg),
                        None => warn!(worker = %name, "refused worker not found"),
                    }
                }
                Outbound::ToFellow { fellow, msg } => {
                    match self.nodes.iter().position(|n| n.index() == Some(fellow)) {
                        Some(i) => self.push(from, Endpoint::Worker(i), msg),
                        None => warn!(%fellow, kind = msg.kind(), "no worker with that index"),
                    }
                }
                Outbound::Wake => {
                    if let Endpoint::Worker(i) = from {
                        self.wakes.insert(i);
                    }
                }
            }
        }
    }

    /// Node whose join under `name` was refused: the one not registered
    /// under that name.
    fn sender_of_join(&self, name: &str) -> Option<usize> {
        let registered = self.coordinator.registry().get(name).is_some();
        let mut matches = self.nodes.iter().enumerate().filter(|(_, n)| n.name() == name).map(|(i, _)| i);
        if registered {
            matches.nth(1)
        } else {
            matches.next()
        }
    }
}
