//! The top-level facade: wires the compiler, subscription driver, and
//! materializer (components F, G, H) into the one object an embedder holds
//! per materialized query.
//!
//! This mirrors how the teacher's `server` crate sits on top of
//! `differential_dataflow`'s `Collection`/`Trace` primitives to expose a
//! single "run this query, get a maintained view" entry point rather than
//! making every caller assemble the graph, driver, and materializer by hand.

use fnv::FnvHashMap;

use crate::compiler::Compiler;
use crate::config::EngineConfig;
use crate::driver::SubscriptionDriver;
use crate::error::{EngineError, Result};
use crate::ir::QueryPlan;
use crate::materializer::{Materializer, ResultSink};
use crate::source::SourceCollection;
use crate::value::Key;

/// One running materialized query: a compiled graph, its subscription
/// driver, and the materializer folding the driver's output into a result
/// collection (`spec.md` §2 data-flow summary).
pub struct LiveQuery {
    driver: SubscriptionDriver,
    materializer: Materializer,
    ready: bool,
}

impl LiveQuery {
    /// Compiles `plan` and wires it to `sources` (`spec.md` §4.F, §4.G).
    /// Returns a `CompileError` synchronously if the plan is invalid
    /// (`spec.md` §7.1) — e.g. `LIMIT`/`OFFSET` without `ORDER BY`.
    pub fn new(plan: &QueryPlan, sources: FnvHashMap<String, Box<dyn SourceCollection>>, config: &EngineConfig) -> Result<Self> {
        let pipeline = Compiler::compile(plan, config)?;
        let driver = SubscriptionDriver::new(pipeline, sources, config.top_k_overprovision);
        Ok(LiveQuery { driver, materializer: Materializer::new(), ready: false })
    }

    /// Subscribes to every source, runs the initial load (including the
    /// mode-3 refill loop), and materializes whatever that produces into
    /// `sink`. Must be called exactly once before [`poll`](Self::poll).
    pub fn start(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        self.driver.start()?;
        self.drain_and_materialize(sink)
    }

    /// Drains whatever change batches have arrived on source subscriptions
    /// since the last call, runs them to quiescence, and materializes the
    /// result (`spec.md` §5 "each externally-initiated delivery is one
    /// atomic batch that runs through the graph to quiescence").
    pub fn poll(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        self.driver.poll();
        self.drain_and_materialize(sink)
    }

    /// Mode 2's `loadKeys` callback, exposed for a join operator's driving
    /// side to call when it observes a new key it has no inner-side rows
    /// for yet (`spec.md` §4.G mode 2).
    pub fn load_keys(&mut self, collection: &str, keys: &[Key], sink: &mut dyn ResultSink) -> Result<()> {
        self.driver.load_keys(collection, keys);
        self.drain_and_materialize(sink)
    }

    /// Mode 2's `loadInitialState` sentinel (`spec.md` §4.G mode 2).
    pub fn load_initial_state(&mut self, collection: &str, sink: &mut dyn ResultSink) -> Result<()> {
        self.driver.load_initial_state(collection);
        self.drain_and_materialize(sink)
    }

    fn drain_and_materialize(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        let batches = self.driver.drain_sink();
        self.materializer.apply(batches, sink);

        let mut violations = self.materializer.take_violations();
        violations.extend(self.driver.take_violations());
        if let Some(violation) = violations.into_iter().next() {
            self.teardown();
            return Err(EngineError::InvariantViolation(violation));
        }

        if !self.ready && self.driver.is_ready() {
            self.ready = true;
            sink.mark_ready();
        }
        Ok(())
    }

    /// The comparator an external consumer should use to present
    /// materialized rows in order: a plain string compare over the
    /// fractional-index side table (`spec.md` §6 "A `compare(a,b)` function
    /// computed from the fractional indexes").
    pub fn compare(&self, a: &Key, b: &Key) -> std::cmp::Ordering {
        self.materializer.compare(a, b)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Unsubscribes from every source and discards graph state (`spec.md`
    /// §5 "Cancellation"). The caller must not re-enter `start`/`poll`
    /// during an in-flight call; this crate does not attempt to detect
    /// reentrancy since the engine is single-threaded cooperative by
    /// construction (`spec.md` §5).
    pub fn teardown(&mut self) {
        self.driver.teardown();
    }
}
