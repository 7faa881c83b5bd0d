//! The source-collection contract (`spec.md` §6) — what the runtime assumes
//! about its upstream data, and nothing more. The collection implementation
//! itself is out of scope (`spec.md` §1); this module only defines the trait
//! the subscription driver (`driver.rs`) programs against.

use crate::change::ChangeMessage;
use crate::ir::ScopedExpr;
use crate::value::{Key, Value};

/// Readiness of a source collection, named in `spec.md` §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionStatus {
    InitialCommit,
    Ready,
}

/// Options accompanying a `subscribe_changes` call (`spec.md` §4.G, §6).
pub struct SubscribeOptions {
    pub include_initial_state: bool,
    pub where_expression: Option<ScopedExpr>,
}

/// An opaque subscription handle; dropping or calling `unsubscribe` tears
/// down the listener registration. The engine never inspects this beyond
/// holding it for the lifetime of the query (`spec.md` §5 "Cancellation").
pub trait Unsubscribe: Send {
    fn unsubscribe(&mut self);
}

/// Receives change-message batches from a subscription.
pub trait ChangeListener: Send {
    fn on_changes(&mut self, changes: Vec<ChangeMessage>);
}

/// The contract a source collection must satisfy (`spec.md` §6). `index`
/// is `None` for collections without a sorted index usable for mode 3
/// (`spec.md` §4.G "Required only for order-by-optimized collections").
pub trait SourceCollection: Send {
    fn collection_id(&self) -> &str;

    fn subscribe_changes(
        &mut self,
        listener: Box<dyn ChangeListener>,
        options: SubscribeOptions,
    ) -> crate::error::Result<Box<dyn Unsubscribe>>;

    fn get(&self, key: &Key) -> Option<Value>;

    fn has(&self, key: &Key) -> bool;

    /// Current rows matching `where_expression`, as a burst of inserts
    /// (`spec.md` §6 `currentStateAsChanges`).
    fn current_state_as_changes(&self, where_expression: Option<&ScopedExpr>) -> Vec<ChangeMessage>;

    fn status(&self) -> CollectionStatus;

    fn is_ready(&self) -> bool {
        self.status() == CollectionStatus::Ready
    }

    fn get_key(&self, value: &Value) -> Key;

    /// `Some` only for collections with a usable sorted index (`spec.md`
    /// §4.G mode 3).
    fn index(&self) -> Option<&dyn SortedIndex>;
}

/// The sorted-index contract a mode-3 collection exposes (`spec.md` §6
/// `index.take`).
pub trait SortedIndex: Send {
    /// Returns up to `n` keys strictly after `after_value` (or from the
    /// start when `None`), in the index's order-by order.
    fn take(&self, n: usize, after_value: Option<&Value>) -> Vec<Key>;
}
