//! A live query engine: turns a declarative relational query (projection,
//! filter, join, group-by with aggregates, order-by with limit/offset) over
//! one or more source collections into a materialized, incrementally
//! maintained result collection.
//!
//! When a row is inserted, updated, or deleted in any source collection,
//! the result collection emits the minimal set of insert/update/delete
//! change messages needed to stay consistent with what a full re-evaluation
//! of the query would produce.
//!
//! The crate is organized around the same components named in its design
//! document, leaves first:
//!
//! - [`collection`] / [`consolidation`]: signed-multiplicity multiset
//!   batches and the grouping arithmetic that cancels retractions.
//! - [`graph`]: the acyclic operator graph and its fixpoint scheduler.
//! - [`operators`]: `map`, `filter`, `concat`, `negate`, `consolidate`
//!   (stateless), `join`, `distinct`, `reduce` (stateful), and `topk` (the
//!   order-by + top-K operator, the central algorithm of this crate).
//! - [`fractional_index`]: the lexicographically comparable strings `topk`
//!   stamps onto each materialized row.
//! - [`ir`] / [`compiler`]: the pre-built query plan and the compiler that
//!   walks it into a wired operator graph.
//! - [`source`] / [`driver`]: the source-collection contract and the
//!   subscription driver that bridges it to the graph's inputs.
//! - [`materializer`]: folds the graph's terminal output into
//!   insert/update/delete transactions against a result collection.
//! - [`engine`]: the `LiveQuery` facade tying F, G, and H together.

pub mod change;
pub mod collection;
pub mod compiler;
pub mod config;
pub mod consolidation;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fractional_index;
pub mod graph;
pub mod hashable;
pub mod ir;
pub mod materializer;
pub mod operators;
pub mod source;
pub mod value;

pub use change::ChangeMessage;
pub use config::EngineConfig;
pub use engine::LiveQuery;
pub use error::{EngineError, Result};
pub use materializer::{RecordingSink, ResultSink};
pub use value::{Key, Value};
