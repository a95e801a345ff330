//! Per-request resolution state.
//!
//! A [`ResolutionContext`] carries everything that changes while virtual
//! fields are resolved: the nesting depth and per-item state of every field
//! currently being derived, and the accessor memo for the current request.
//! Field definitions themselves stay immutable, so a fresh context per host
//! request is all it takes to keep requests from seeing each other's state.

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};

use serde_json::Value;
use tracing::trace;

use crate::coordinator::Coordinator;
use crate::error::ResolveError;
use crate::field::FieldId;
use crate::host::ContentHost;
use crate::types::{ContentItem, ItemId, ItemState, QueryContext};

#[derive(Debug, Default)]
struct FieldState {
    depth: u32,
    items: BTreeMap<ItemId, ItemState>,
}

/// Mutable state for one host request.
pub struct ResolutionContext<'h> {
    host: &'h dyn ContentHost,
    coordinator: Option<&'h Coordinator>,
    fields: HashMap<FieldId, FieldState>,
    active: Vec<FieldId>,
    memo: HashMap<(ItemId, FieldId), Value>,
}

impl<'h> ResolutionContext<'h> {
    /// Context without a coordinator: nested queries return their input unchanged.
    pub fn new(host: &'h dyn ContentHost) -> Self {
        Self {
            host,
            coordinator: None,
            fields: HashMap::new(),
            active: Vec::new(),
            memo: HashMap::new(),
        }
    }

    pub(crate) fn with_coordinator(host: &'h dyn ContentHost, coordinator: &'h Coordinator) -> Self {
        Self {
            coordinator: Some(coordinator),
            ..Self::new(host)
        }
    }

    /// The host this request reads content from.
    pub fn host(&self) -> &'h dyn ContentHost {
        self.host
    }

    /// Current nesting depth of derived evaluations for `field`.
    pub fn depth(&self, field: FieldId) -> u32 {
        self.fields.get(&field).map_or(0, |s| s.depth)
    }

    /// State of `item` for `field` in the current chain.
    ///
    /// `None` until the field has started evaluating for that item.
    pub fn item_state(&self, field: FieldId, item: &ItemId) -> Option<ItemState> {
        self.fields
            .get(&field)
            .and_then(|s| s.items.get(item))
            .copied()
    }

    /// Every item `field` has started evaluating for, with its state.
    pub fn states(&self, field: FieldId) -> BTreeMap<ItemId, ItemState> {
        self.fields
            .get(&field)
            .map(|s| s.items.clone())
            .unwrap_or_default()
    }

    /// The field whose derived function is running right now, if any.
    pub fn current(&self) -> Option<FieldId> {
        self.active.last().copied()
    }

    /// True when the running field is already being computed for `item`
    /// further up the stack. Derived functions use this to break cycles.
    pub fn in_flight(&self, item: &ItemId) -> bool {
        self.current()
            .and_then(|field| self.item_state(field, item))
            == Some(ItemState::Processing)
    }

    /// Run a secondary query through the coordinator within this chain.
    ///
    /// Recursion counters carry over, so depth limits apply to the nested pass.
    pub fn query(
        &mut self,
        items: &[ContentItem],
        query: &QueryContext,
    ) -> Result<Vec<ContentItem>, ResolveError> {
        match self.coordinator {
            Some(coordinator) => coordinator.query(items, query, self),
            None => Ok(items.to_vec()),
        }
    }

    /// Forget recursion state between independent top-level chains.
    pub fn reset_recursion(&mut self) {
        self.fields.clear();
        self.active.clear();
    }

    /// Start a new host request: recursion state and memo are dropped.
    pub fn reset(&mut self) {
        self.reset_recursion();
        self.memo.clear();
    }

    pub(crate) fn memoized(&self, item: &ItemId, field: FieldId) -> Option<&Value> {
        self.memo.get(&(item.clone(), field))
    }

    pub(crate) fn memoize(&mut self, item: ItemId, field: FieldId, value: Value) {
        self.memo.insert((item, field), value);
    }

    /// Mark `item` as processing for `field` and bump its depth.
    ///
    /// The returned guard restores both when dropped, including on unwind.
    pub(crate) fn enter(&mut self, field: FieldId, item: &ItemId) -> EvaluationGuard<'_, 'h> {
        let state = self.fields.entry(field).or_default();
        let previous = state.items.insert(item.clone(), ItemState::Processing);
        state.depth += 1;
        trace!(field = %field, item = %item, depth = state.depth, "enter");
        self.active.push(field);

        EvaluationGuard {
            ctx: self,
            field,
            item: item.clone(),
            previous,
        }
    }
}

/// Restores recursion bookkeeping for one derived evaluation.
pub(crate) struct EvaluationGuard<'c, 'h> {
    ctx: &'c mut ResolutionContext<'h>,
    field: FieldId,
    item: ItemId,
    previous: Option<ItemState>,
}

impl<'h> Deref for EvaluationGuard<'_, 'h> {
    type Target = ResolutionContext<'h>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for EvaluationGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for EvaluationGuard<'_, '_> {
    fn drop(&mut self) {
        if let Some(pos) = self.ctx.active.iter().rposition(|f| *f == self.field) {
            self.ctx.active.remove(pos);
        }
        let state = self.ctx.fields.entry(self.field).or_default();
        state.depth = state.depth.saturating_sub(1);
        // Re-entry for the same item leaves the outer evaluation in flight.
        let restored = match self.previous {
            Some(ItemState::Processing) => ItemState::Processing,
            _ => ItemState::Processed,
        };
        state.items.insert(self.item.clone(), restored);
        trace!(field = %self.field, item = %self.item, depth = state.depth, "exit");
    }
}
