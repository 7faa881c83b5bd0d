//! The dataflow graph and scheduler (`spec.md` §4.B, component B).
//!
//! An acyclic graph of operators connected by edges. `new_input()` hands out
//! a root input whose `send_data` enqueues a batch; `finalize()` freezes the
//! topology; `run()` drains pending work to a fixpoint. There is no wall-clock
//! timer and no internal task scheduler: progress is driven entirely by
//! external `send_data` calls (from the subscription driver, §4.G) plus the
//! `run()` loop itself, which is single-threaded.
//!
//! Unlike the teacher's timely-backed graph, operators here have no notion of
//! logical time or progress tracking — batches are delivered in FIFO order
//! off a worklist and operators are multiset-semantic, so delivery order
//! affects nothing but the arbitrary tie-breaking of fractional indexes
//! (`spec.md` §5 "Ordering guarantees").

use std::collections::VecDeque;

use tracing::trace;

use crate::collection::Batch;
use crate::error::InvariantViolation;

/// An operator with up to two input ports and exactly one output port. Every
/// stateless (C) and stateful (D, E) operator in this crate implements this
/// trait; the graph owns the operator and calls `push` once per delivered
/// batch.
pub trait Operator: Send {
    /// Human-readable name, used only for logging.
    fn name(&self) -> &'static str;

    /// Processes one batch arriving on `port`, returning the (possibly empty)
    /// output batch it produces in response.
    fn push(&mut self, port: usize, batch: Batch) -> Batch;

    /// How many more rows this operator needs from upstream before it can
    /// make progress. Only the top-K operator overrides this (`spec.md`
    /// §4.G mode 3, "the driver polls the operator's `dataNeeded()`");
    /// every other operator is satisfied by whatever arrives.
    fn data_needed(&self) -> Option<usize> {
        None
    }

    /// Drains any internal-invariant violations this operator has observed
    /// since the last call (`spec.md` §7.2). Empty for operators that can't
    /// detect one from their local state alone.
    fn take_violations(&mut self) -> Vec<InvariantViolation> {
        Vec::new()
    }
}

type NodeBox = Box<dyn Operator>;

struct Node {
    operator: NodeBox,
    output: Option<EdgeId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

enum EdgeTarget {
    /// Delivered to an operator node at the given port.
    Node(NodeId, usize),
    /// Delivered to the graph's terminal sink (the materializer reads this).
    Sink,
}

struct Edge {
    target: EdgeTarget,
    pending: VecDeque<Batch>,
}

/// The acyclic operator graph plus its pending-work worklist.
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    finalized: bool,
    /// Edge ids with non-empty `pending` queues, processed FIFO.
    worklist: VecDeque<EdgeId>,
    /// Batches delivered to the terminal sink, drained by the materializer
    /// after each `run()`.
    sink: Vec<Batch>,
}

/// A handle returned by `new_input`; the only way external code feeds data
/// into the graph.
pub struct InputHandle {
    edge: EdgeId,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph { nodes: Vec::new(), edges: Vec::new(), finalized: false, worklist: VecDeque::new(), sink: Vec::new() }
    }

    fn new_edge(&mut self) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.edges.push(Edge { target: EdgeTarget::Sink, pending: VecDeque::new() });
        id
    }

    /// Allocates a root input edge, defaulting to the terminal sink until
    /// `wire` points it somewhere else.
    pub fn new_input(&mut self) -> InputHandle {
        assert!(!self.finalized, "cannot add an input after finalize()");
        InputHandle { edge: self.new_edge() }
    }

    /// Registers an operator with `input_count` input ports, returning its
    /// node id. No edges are wired yet.
    pub fn add_operator(&mut self, operator: NodeBox) -> NodeId {
        assert!(!self.finalized, "cannot add an operator after finalize()");
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { operator, output: None });
        id
    }

    pub fn input_edge(&self, handle: &InputHandle) -> EdgeId {
        handle.edge
    }

    /// Points `source`'s deliveries at `node`'s `port`'th input. `source` is
    /// an input handle's edge or another node's output edge (from
    /// `output_edge`); each edge may only be wired once.
    pub fn wire(&mut self, source: EdgeId, node: NodeId, port: usize) {
        assert!(!self.finalized, "cannot wire after finalize()");
        self.edges[source.0].target = EdgeTarget::Node(node, port);
    }

    /// Points `source`'s deliveries at the terminal sink.
    pub fn wire_to_sink(&mut self, source: EdgeId) {
        assert!(!self.finalized, "cannot wire after finalize()");
        self.edges[source.0].target = EdgeTarget::Sink;
    }

    /// Returns (allocating on first call) the output edge of `node`.
    pub fn output_edge(&mut self, node: NodeId) -> EdgeId {
        if let Some(edge) = self.nodes[node.0].output {
            return edge;
        }
        let edge = self.new_edge();
        self.nodes[node.0].output = Some(edge);
        edge
    }

    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Enqueues `batch` on `input`'s edge, for delivery during the next
    /// (or current, if mid-`run`) scheduler pass.
    pub fn send_data(&mut self, input: &InputHandle, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        self.enqueue(input.edge, batch);
    }

    fn enqueue(&mut self, edge: EdgeId, batch: Batch) {
        self.edges[edge.0].pending.push_back(batch);
        self.worklist.push_back(edge);
    }

    /// Drains the worklist to a fixpoint: every edge with pending data is
    /// delivered to its target, which may itself enqueue further work on
    /// downstream edges, until nothing remains pending.
    pub fn run(&mut self) {
        assert!(self.finalized, "run() called before finalize()");
        while let Some(edge_id) = self.worklist.pop_front() {
            let Some(batch) = self.edges[edge_id.0].pending.pop_front() else { continue };
            if !self.edges[edge_id.0].pending.is_empty() {
                self.worklist.push_back(edge_id);
            }
            match self.edges[edge_id.0].target {
                EdgeTarget::Sink => self.sink.push(batch),
                EdgeTarget::Node(node, port) => {
                    let tuples_in = batch.len();
                    let output = self.nodes[node.0].operator.push(port, batch);
                    trace!(operator = self.nodes[node.0].operator.name(), port, tuples_in, tuples_out = output.len(), "operator push");
                    if let Some(output_edge) = self.nodes[node.0].output {
                        if !output.is_empty() {
                            self.enqueue(output_edge, output);
                        }
                    } else if !output.is_empty() {
                        self.sink.push(output);
                    }
                }
            }
        }
    }

    /// Drains and returns batches delivered to the terminal sink since the
    /// last call.
    pub fn drain_sink(&mut self) -> Vec<Batch> {
        std::mem::take(&mut self.sink)
    }

    pub fn node_operator_mut(&mut self, node: NodeId) -> &mut dyn Operator {
        self.nodes[node.0].operator.as_mut()
    }
}
