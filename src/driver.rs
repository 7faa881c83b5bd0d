//! The subscription driver (`spec.md` §4.G, component G).
//!
//! Bridges the source collections compiled by [`crate::compiler::Compiler`]
//! to the dataflow graph: for each source it picks one of three subscription
//! modes, turns `ChangeMessage`s into multiset tuples, and feeds the
//! corresponding [`InputHandle`]. Mode selection follows the compiler's
//! classification directly — this module does not re-derive it:
//!
//! - a collection named in `optimizable_order_by` gets mode 3 (ordered-bounded),
//! - a collection in `lazy_collections` gets mode 2 (lazy-matching),
//! - everything else gets mode 1 (all-changes).

use std::sync::mpsc;

use fnv::FnvHashMap;
use tracing::debug;

use crate::change::ChangeMessage;
use crate::collection::{Batch, Payload};
use crate::compiler::CompiledPipeline;
use crate::error::Result;
use crate::graph::Graph;
use crate::ir::{Expr, ScopedExpr};
use crate::source::{ChangeListener, SourceCollection, SubscribeOptions, Unsubscribe};
use crate::value::{Key, Value};

/// Forwards a source collection's pushed change batches into the driver's
/// inbox. Since the engine has no internal task scheduler (`spec.md` §5),
/// the driver drains this channel synchronously from [`SubscriptionDriver::poll`]
/// rather than reacting to the callback inline.
struct ChannelListener {
    collection: String,
    sender: mpsc::Sender<(String, Vec<ChangeMessage>)>,
}

impl ChangeListener for ChannelListener {
    fn on_changes(&mut self, changes: Vec<ChangeMessage>) {
        let _ = self.sender.send((self.collection.clone(), changes));
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ModeTag {
    AllChanges,
    LazyMatching,
    OrderedBounded,
}

/// Per-collection bookkeeping the driver needs beyond what the compiled
/// pipeline already tracks (`spec.md` §4.G "Tracking").
enum ModeState {
    AllChanges,
    LazyMatching {
        sent_keys: std::collections::HashSet<Key>,
        loaded_full_state: bool,
    },
    OrderedBounded {
        sent_keys: std::collections::HashSet<Key>,
        biggest_sent: Option<Value>,
        initial_loaded: bool,
        /// Set once this collection cannot supply any more rows — either it
        /// never had a usable sorted index (the whole filtered state was
        /// loaded up front) or an `index.take` call returned fewer rows
        /// than requested. A collection in this state can never drive
        /// `dataNeeded()` to 0 on its own, so readiness must not wait on it
        /// (`spec.md` §4.G step 4 would otherwise block forever whenever a
        /// query's `OFFSET + LIMIT` exceeds the collection's size).
        exhausted: bool,
    },
}

pub struct SubscriptionDriver {
    sources: FnvHashMap<String, Box<dyn SourceCollection>>,
    graph: Graph,
    inputs: FnvHashMap<String, crate::graph::InputHandle>,
    topk_node: Option<crate::graph::NodeId>,
    mode_state: FnvHashMap<String, ModeState>,
    /// `offset + limit` of the ordered-bounded collection, plus the
    /// configured overprovision `δ` (`spec.md` §5 "Resource bounds") — the
    /// size of the initial bounded load before any refill round.
    initial_take: usize,
    collection_where_clauses: FnvHashMap<String, Option<Expr>>,
    /// The mode-3 collection's row comparator, if any (`spec.md` §4.G mode 3
    /// step 2 "drop above current max"). `None` when the query has no
    /// order-by-optimized collection.
    order_comparator: Option<Box<dyn Fn(&Value, &Value) -> std::cmp::Ordering + Send>>,
    unsubscribes: Vec<Box<dyn Unsubscribe>>,
    inbox_rx: mpsc::Receiver<(String, Vec<ChangeMessage>)>,
    inbox_tx: mpsc::Sender<(String, Vec<ChangeMessage>)>,
}

impl SubscriptionDriver {
    pub fn new(pipeline: CompiledPipeline, sources: FnvHashMap<String, Box<dyn SourceCollection>>, top_k_overprovision: usize) -> Self {
        let CompiledPipeline { graph, inputs, collection_where_clauses, lazy_collections, optimizable_order_by, topk_node } = pipeline;

        let initial_take = optimizable_order_by.as_ref().map(|o| o.offset + o.limit + top_k_overprovision).unwrap_or(0);

        let mut mode_state = FnvHashMap::default();
        for collection in inputs.keys() {
            let is_ordered = optimizable_order_by.as_ref().map(|o| &o.collection) == Some(collection);
            let state = if is_ordered {
                ModeState::OrderedBounded { sent_keys: Default::default(), biggest_sent: None, initial_loaded: false, exhausted: false }
            } else if lazy_collections.contains(collection) {
                ModeState::LazyMatching { sent_keys: Default::default(), loaded_full_state: false }
            } else {
                ModeState::AllChanges
            };
            mode_state.insert(collection.clone(), state);
        }

        let order_comparator = optimizable_order_by.map(|o| o.compare);

        let (inbox_tx, inbox_rx) = mpsc::channel();

        SubscriptionDriver {
            sources,
            graph,
            inputs,
            topk_node,
            mode_state,
            initial_take,
            collection_where_clauses,
            order_comparator,
            unsubscribes: Vec::new(),
            inbox_rx,
            inbox_tx,
        }
    }

    fn scoped_where(&self, collection: &str) -> Option<ScopedExpr> {
        self.collection_where_clauses
            .get(collection)
            .and_then(|o| o.clone())
            .map(|expr| ScopedExpr { collection: collection.to_string(), expr })
    }

    /// Registers a push subscription for every non-lazy collection (mode 2's
    /// subscription is deferred until the compiler's lazy-load callback fires
    /// its first `load_keys`/`load_initial_state` call), performs each
    /// collection's initial load per its mode, runs the graph, and drives the
    /// top-K refill loop to completion (`spec.md` §4.G mode 3, steps 1–4).
    pub fn start(&mut self) -> Result<()> {
        let collections: Vec<String> = self.inputs.keys().cloned().collect();
        for collection in &collections {
            self.subscribe(collection)?;
        }
        for collection in &collections {
            self.load_initial(collection)?;
        }
        self.graph.run();
        self.drive_topk_refill();
        Ok(())
    }

    fn subscribe(&mut self, collection: &str) -> Result<()> {
        let include_initial_state = !matches!(self.mode_state.get(collection), Some(ModeState::LazyMatching { .. }));
        let where_expression = self.scoped_where(collection);
        let listener = Box::new(ChannelListener { collection: collection.to_string(), sender: self.inbox_tx.clone() });
        let Some(source) = self.sources.get_mut(collection) else { return Ok(()) };
        let unsubscribe = source.subscribe_changes(listener, SubscribeOptions { include_initial_state, where_expression })?;
        self.unsubscribes.push(unsubscribe);
        Ok(())
    }

    /// Drains pushed changes queued by [`ChannelListener`]s since the last
    /// call, feeding each through [`deliver`](Self::deliver), then re-runs
    /// the top-K refill loop (a retraction can shrink the window below
    /// `offset+limit` again).
    pub fn poll(&mut self) {
        let pending: Vec<_> = self.inbox_rx.try_iter().collect();
        for (collection, changes) in pending {
            self.deliver(&collection, changes);
        }
        self.drive_topk_refill();
    }

    fn mode_tag(&self, collection: &str) -> Option<ModeTag> {
        self.mode_state.get(collection).map(|state| match state {
            ModeState::AllChanges => ModeTag::AllChanges,
            ModeState::LazyMatching { .. } => ModeTag::LazyMatching,
            ModeState::OrderedBounded { .. } => ModeTag::OrderedBounded,
        })
    }

    fn load_initial(&mut self, collection: &str) -> Result<()> {
        let where_expr = self.scoped_where(collection);
        let Some(tag) = self.mode_tag(collection) else { return Ok(()) };
        match tag {
            ModeTag::AllChanges => {
                let changes = self.sources[collection].current_state_as_changes(where_expr.as_ref());
                debug!(collection, count = changes.len(), "mode 1 initial burst");
                self.inject(collection, changes);
            }
            ModeTag::LazyMatching => {
                debug!(collection, "mode 2: deferring initial load to join-key demand");
            }
            ModeTag::OrderedBounded => {
                let Some(source) = self.sources.get(collection) else { return Ok(()) };
                let Some(index) = source.index() else {
                    debug!(collection, "mode 3 collection has no sorted index; falling back to full scan");
                    let changes = source.current_state_as_changes(where_expr.as_ref());
                    // The whole filtered state is loaded, so every key is
                    // tracked as sent (future updates/deletes must still
                    // retract correctly), but `biggest_sent` is deliberately
                    // left unset: `current_state_as_changes` makes no
                    // ordering guarantee, so there is no meaningful "largest
                    // admitted row" to cap future inserts against — and none
                    // is needed, since nothing was left unloaded to bound.
                    self.mark_sent(collection, &changes);
                    self.inject(collection, changes);
                    if let Some(ModeState::OrderedBounded { initial_loaded, exhausted, .. }) = self.mode_state.get_mut(collection) {
                        *initial_loaded = true;
                        *exhausted = true;
                    }
                    return Ok(());
                };
                let keys = index.take(self.initial_take, None);
                let exhausted_now = keys.len() < self.initial_take;
                let changes: Vec<ChangeMessage> =
                    keys.iter().filter_map(|k| source.get(k).map(|v| ChangeMessage::Insert { key: k.clone(), value: v })).collect();
                debug!(collection, count = changes.len(), "mode 3 initial bounded load");
                self.update_ordered_tracking(collection, &changes);
                self.inject(collection, changes);
                if let Some(ModeState::OrderedBounded { initial_loaded, exhausted, .. }) = self.mode_state.get_mut(collection) {
                    *initial_loaded = true;
                    *exhausted = *exhausted || exhausted_now;
                }
            }
        }
        Ok(())
    }

    /// Injects externally-arriving changes for `collection` (ongoing
    /// subscription deliveries, not the initial burst), applying the
    /// masking/dropping rules of whichever mode this collection is in.
    pub fn deliver(&mut self, collection: &str, changes: Vec<ChangeMessage>) {
        let compare = self.order_comparator.as_deref();
        let masked = match self.mode_state.get_mut(collection) {
            Some(ModeState::LazyMatching { sent_keys, loaded_full_state }) => {
                if *loaded_full_state {
                    changes
                } else {
                    mask_unseen(changes, sent_keys)
                }
            }
            Some(ModeState::OrderedBounded { sent_keys, biggest_sent, .. }) => {
                drop_above_max(changes, biggest_sent.as_ref(), sent_keys, compare)
            }
            _ => changes,
        };
        // Mode 3's forwarded inserts must be recorded the same way
        // `load_initial`/`drive_topk_refill` already do, or a later
        // update/delete of the same key won't find it in `sent_keys` and
        // `drop_above_max` will mis-handle it (dropped retraction, or a
        // second insert of an already-admitted key).
        self.update_ordered_tracking(collection, &masked);
        self.inject(collection, masked);
        self.graph.run();
    }

    /// Mode 2's `loadKeys` callback: performs point lookups for `keys` and
    /// injects them as inserts (`spec.md` §4.G mode 2).
    pub fn load_keys(&mut self, collection: &str, keys: &[Key]) {
        let Some(source) = self.sources.get(collection) else { return };
        let changes: Vec<ChangeMessage> = keys
            .iter()
            .filter(|k| !self.already_sent(collection, k))
            .filter_map(|k| source.get(k).map(|v| ChangeMessage::Insert { key: k.clone(), value: v }))
            .collect();
        if let Some(ModeState::LazyMatching { sent_keys, .. }) = self.mode_state.get_mut(collection) {
            for change in &changes {
                sent_keys.insert(change.key().clone());
            }
        }
        self.inject(collection, changes);
        self.graph.run();
    }

    /// Mode 2's `loadInitialState` sentinel: injects the full filtered state
    /// and switches the collection into unseen-key masking for subsequent
    /// updates (`spec.md` §4.G mode 2).
    pub fn load_initial_state(&mut self, collection: &str) {
        let where_expr = self.scoped_where(collection);
        let Some(source) = self.sources.get(collection) else { return };
        let changes = source.current_state_as_changes(where_expr.as_ref());
        if let Some(ModeState::LazyMatching { sent_keys, loaded_full_state }) = self.mode_state.get_mut(collection) {
            *loaded_full_state = true;
            for change in &changes {
                sent_keys.insert(change.key().clone());
            }
        }
        self.inject(collection, changes);
        self.graph.run();
    }

    fn already_sent(&self, collection: &str, key: &Key) -> bool {
        match self.mode_state.get(collection) {
            Some(ModeState::LazyMatching { sent_keys, .. }) => sent_keys.contains(key),
            _ => false,
        }
    }

    /// After the graph has run to quiescence, asks the top-K operator how
    /// many more rows it needs and, for mode-3 collections, pulls that many
    /// more from the sorted index (`spec.md` §4.G mode 3 step 3). Loops
    /// until `dataNeeded() == 0`; bounded because each iteration either
    /// admits at least one row or the index is exhausted.
    fn drive_topk_refill(&mut self) {
        let Some(topk_node) = self.topk_node else { return };
        loop {
            let needed = self.graph.node_operator_mut(topk_node).data_needed().unwrap_or(0);
            if needed == 0 {
                break;
            }
            let Some((collection, _)) = self
                .mode_state
                .iter()
                .find(|(_, s)| matches!(s, ModeState::OrderedBounded { exhausted: false, .. }))
            else {
                break;
            };
            let collection = collection.clone();
            let Some(source) = self.sources.get(&collection) else { break };
            let Some(index) = source.index() else {
                if let Some(ModeState::OrderedBounded { exhausted, .. }) = self.mode_state.get_mut(&collection) {
                    *exhausted = true;
                }
                break;
            };
            let biggest_sent = match self.mode_state.get(&collection) {
                Some(ModeState::OrderedBounded { biggest_sent, .. }) => biggest_sent.clone(),
                _ => None,
            };
            let keys = index.take(needed, biggest_sent.as_ref());
            if keys.len() < needed {
                if let Some(ModeState::OrderedBounded { exhausted, .. }) = self.mode_state.get_mut(&collection) {
                    *exhausted = true;
                }
            }
            if keys.is_empty() {
                debug!(collection, "mode 3 refill: index exhausted before dataNeeded reached 0");
                break;
            }
            let changes: Vec<ChangeMessage> =
                keys.iter().filter_map(|k| source.get(k).map(|v| ChangeMessage::Insert { key: k.clone(), value: v })).collect();
            debug!(collection, requested = needed, fetched = changes.len(), "mode 3 refill round");
            self.update_ordered_tracking(&collection, &changes);
            self.inject(&collection, changes);
            self.graph.run();
        }
    }

    /// Records `changes`' keys as sent without touching `biggest_sent`
    /// (used by the no-index full-scan fallback, where there is no
    /// meaningful "largest admitted row" — see the call site).
    fn mark_sent(&mut self, collection: &str, changes: &[ChangeMessage]) {
        if let Some(ModeState::OrderedBounded { sent_keys, .. }) = self.mode_state.get_mut(collection) {
            for change in changes {
                sent_keys.insert(change.key().clone());
            }
        }
    }

    fn update_ordered_tracking(&mut self, collection: &str, changes: &[ChangeMessage]) {
        if let Some(ModeState::OrderedBounded { sent_keys, biggest_sent, .. }) = self.mode_state.get_mut(collection) {
            for change in changes {
                sent_keys.insert(change.key().clone());
                if let ChangeMessage::Insert { value, .. } = change {
                    *biggest_sent = Some(value.clone());
                }
            }
        }
    }

    fn inject(&mut self, collection: &str, changes: Vec<ChangeMessage>) {
        let Some(input) = self.inputs.get(collection) else { return };
        let mut batch = Batch::new();
        for change in changes {
            for ((key, value), mult) in change.split_into_tuples() {
                batch.push(key, Payload::new(value), mult);
            }
        }
        self.graph.send_data(input, batch);
    }

    /// `true` once every source has delivered its initial state and the
    /// top-K operator (if any) no longer needs more rows (`spec.md` §4.G
    /// step 4). A mode-3 collection that has been marked `exhausted` can
    /// never drive `dataNeeded()` to 0 by itself (there simply aren't enough
    /// rows upstream of `OFFSET + LIMIT`); readiness must not wait on it.
    pub fn is_ready(&mut self) -> bool {
        let ordered_bounded_exhausted = self
            .mode_state
            .values()
            .any(|s| matches!(s, ModeState::OrderedBounded { exhausted: true, .. }));
        let topk_satisfied = match self.topk_node {
            Some(node) => {
                ordered_bounded_exhausted || self.graph.node_operator_mut(node).data_needed().unwrap_or(0) == 0
            }
            None => true,
        };
        topk_satisfied && self.sources.values().all(|s| s.is_ready())
    }

    pub fn drain_sink(&mut self) -> Vec<Batch> {
        self.graph.drain_sink()
    }

    /// Drains invariant violations recorded by any operator in the graph
    /// since the last call (`spec.md` §7.2). Currently only the top-K
    /// operator detects these from local state alone.
    pub fn take_violations(&mut self) -> Vec<crate::error::InvariantViolation> {
        let Some(node) = self.topk_node else { return Vec::new() };
        self.graph.node_operator_mut(node).take_violations()
    }

    /// Tears down every registered subscription (`spec.md` §5
    /// "Cancellation"). The driver (and the graph state it owns) is not
    /// reusable afterwards; a restart must recompile from the IR (`spec.md`
    /// §9 "Graph finalization vs reuse").
    pub fn teardown(&mut self) {
        for mut unsubscribe in std::mem::take(&mut self.unsubscribes) {
            unsubscribe.unsubscribe();
        }
    }
}

/// Mode 2's masking rule before `loadInitialState` has been called: treat an
/// update/delete of a key never yet sent as a no-op, since the driving join
/// never saw it in the first place (`spec.md` §4.G mode 2).
fn mask_unseen(changes: Vec<ChangeMessage>, sent_keys: &std::collections::HashSet<Key>) -> Vec<ChangeMessage> {
    changes
        .into_iter()
        .filter(|change| match change {
            ChangeMessage::Insert { .. } => true,
            ChangeMessage::Update { key, .. } | ChangeMessage::Delete { key, .. } => sent_keys.contains(key),
        })
        .collect()
}

/// Mode 3's drop-above-max rule: split updates into delete+insert, then drop
/// any insert whose row sorts strictly after the largest value currently
/// admitted into the window — it cannot affect the top-K until an earlier
/// row retracts (`spec.md` §4.G mode 3 step 2). Deletes of keys we never
/// sent are dropped outright; a row the driver never forwarded cannot be
/// retracted downstream. `compare` is `None` only when no mode-3 collection
/// exists in this query, in which case this function is never called.
fn drop_above_max(
    changes: Vec<ChangeMessage>,
    biggest_sent: Option<&Value>,
    sent_keys: &std::collections::HashSet<Key>,
    compare: Option<&(dyn Fn(&Value, &Value) -> std::cmp::Ordering + Send)>,
) -> Vec<ChangeMessage> {
    let exceeds_max = |value: &Value| match (compare, biggest_sent) {
        (Some(cmp), Some(max)) => cmp(value, max) == std::cmp::Ordering::Greater,
        _ => false,
    };
    let mut out = Vec::new();
    for change in changes {
        match change {
            ChangeMessage::Update { key, previous_value, value } => {
                if sent_keys.contains(&key) {
                    out.push(ChangeMessage::Delete { key: key.clone(), value: previous_value });
                }
                if !exceeds_max(&value) {
                    out.push(ChangeMessage::Insert { key, value });
                }
            }
            ChangeMessage::Delete { key, value } => {
                if sent_keys.contains(&key) {
                    out.push(ChangeMessage::Delete { key, value });
                }
            }
            ChangeMessage::Insert { key, value } => {
                if !exceeds_max(&value) {
                    out.push(ChangeMessage::Insert { key, value });
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_unseen_drops_updates_of_unknown_keys() {
        let mut sent = std::collections::HashSet::new();
        sent.insert(Key::Int(1));
        let changes = vec![
            ChangeMessage::Update { key: Key::Int(1), previous_value: Value::Int(1), value: Value::Int(2) },
            ChangeMessage::Update { key: Key::Int(2), previous_value: Value::Int(1), value: Value::Int(2) },
            ChangeMessage::Insert { key: Key::Int(3), value: Value::Int(5) },
        ];
        let out = mask_unseen(changes, &sent);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn drop_above_max_keeps_deletes_of_sent_keys_only() {
        let mut sent = std::collections::HashSet::new();
        sent.insert(Key::Int(1));
        let changes = vec![
            ChangeMessage::Delete { key: Key::Int(1), value: Value::Int(1) },
            ChangeMessage::Delete { key: Key::Int(2), value: Value::Int(1) },
        ];
        let out = drop_above_max(changes, None, &sent, None);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn drop_above_max_filters_inserts_past_the_window_ceiling() {
        let sent = std::collections::HashSet::new();
        let compare = |a: &Value, b: &Value| match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        };
        let changes = vec![
            ChangeMessage::Insert { key: Key::Int(1), value: Value::Int(5) },
            ChangeMessage::Insert { key: Key::Int(2), value: Value::Int(50) },
        ];
        let out = drop_above_max(changes, Some(&Value::Int(10)), &sent, Some(&compare));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key(), &Key::Int(1));
    }
}
