//! Virtual field definitions.
//!
//! A [`FieldDefinition`] names one computed field, says where its value comes
//! from and where it must not appear. It is built once at setup time and is
//! immutable afterwards; all runtime state lives in the
//! [`ResolutionContext`](crate::ResolutionContext) passed to evaluation.
//!
//! ```
//! use serde_json::json;
//! use virtual_fields::{ContentItem, FieldDefinition, MemoryHost, ResolutionContext};
//!
//! let field = FieldDefinition::make("wordCount")
//!     .unwrap()
//!     .simple(|post| {
//!         let body = post.get_str("content").unwrap_or_default();
//!         Ok(json!(body.split_whitespace().count()))
//!     });
//!
//! let host = MemoryHost::new();
//! let mut ctx = ResolutionContext::new(&host);
//! let post = ContentItem::new(1u64, "article").with("content", "a b c");
//! assert_eq!(field.get_value(&post, &mut ctx).unwrap(), json!(3));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::context::ResolutionContext;
use crate::error::{BoxError, FieldError, ResolveError};
use crate::types::{ContentItem, Surface, RESERVED_NAMES};

/// Default nesting bound: a field may appear two layers deep.
pub const DEFAULT_MAX_RECURSIVE_DEPTH: u32 = 2;

/// Longest accepted field name.
pub const MAX_NAME_LEN: usize = 64;

/// Derived value function receiving the item and the resolution context.
pub type DeriveFn =
    dyn Fn(&ContentItem, &mut ResolutionContext<'_>) -> Result<Value, BoxError> + Send + Sync;

/// Derived value function receiving only the item.
pub type SimpleFn = dyn Fn(&ContentItem) -> Result<Value, BoxError> + Send + Sync;

static NEXT_FIELD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one field definition instance.
///
/// Recursion bookkeeping is keyed by this, so two definitions never share
/// counters even when they carry the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u64);

impl FieldId {
    fn next() -> Self {
        FieldId(NEXT_FIELD_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        FieldId(raw)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a field's value comes from.
#[derive(Clone)]
pub enum ValueSource {
    /// The same value for every item.
    Constant(Value),
    /// Computed per item, with access to the resolution context.
    Derived(Arc<DeriveFn>),
    /// Computed per item from the item alone.
    Simple(Arc<SimpleFn>),
}

impl ValueSource {
    /// Short name of the source kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ValueSource::Constant(_) => "constant",
            ValueSource::Derived(_) => "derived",
            ValueSource::Simple(_) => "simple",
        }
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            ValueSource::Derived(_) => f.write_str("Derived(..)"),
            ValueSource::Simple(_) => f.write_str("Simple(..)"),
        }
    }
}

/// Serializable snapshot of a field's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSettings {
    pub name: String,
    pub source: &'static str,
    pub excluded_from: Vec<Surface>,
    pub max_recursive_depth: u32,
}

/// One computed field.
#[derive(Debug)]
pub struct FieldDefinition {
    id: FieldId,
    name: String,
    source: ValueSource,
    excluded: BTreeSet<Surface>,
    max_recursive_depth: u32,
}

impl FieldDefinition {
    /// Create a field with a `null` constant value.
    ///
    /// # Errors
    ///
    /// Returns `FieldError::InvalidName` if `name` is not a valid field name.
    pub fn make(name: impl Into<String>) -> Result<Self, FieldError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            id: FieldId::next(),
            name,
            source: ValueSource::Constant(Value::Null),
            excluded: BTreeSet::new(),
            max_recursive_depth: DEFAULT_MAX_RECURSIVE_DEPTH,
        })
    }

    /// Use a constant value.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.source = ValueSource::Constant(value.into());
        self
    }

    /// Derive the value from the item and the resolution context.
    pub fn derive<F>(mut self, f: F) -> Self
    where
        F: Fn(&ContentItem, &mut ResolutionContext<'_>) -> Result<Value, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.source = ValueSource::Derived(Arc::new(f));
        self
    }

    /// Derive the value from the item alone.
    pub fn simple<F>(mut self, f: F) -> Self
    where
        F: Fn(&ContentItem) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.source = ValueSource::Simple(Arc::new(f));
        self
    }

    /// Replace the exclusion set from surface tags.
    ///
    /// # Errors
    ///
    /// Returns `FieldError::InvalidExclusionTag` listing every unknown tag
    /// together with the allowed ones.
    pub fn exclude_from<I, S>(mut self, tags: I) -> Result<Self, FieldError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut excluded = BTreeSet::new();
        let mut invalid = Vec::new();
        for tag in tags {
            let tag = tag.as_ref();
            match Surface::parse(tag) {
                Some(surface) => {
                    excluded.insert(surface);
                }
                None => invalid.push(tag.to_string()),
            }
        }

        if !invalid.is_empty() {
            return Err(FieldError::InvalidExclusionTag {
                invalid,
                allowed: Surface::ALLOWED_TAGS.to_vec(),
            });
        }

        self.excluded = excluded;
        Ok(self)
    }

    /// Replace the exclusion set with already-typed surfaces.
    pub fn exclude_surfaces(mut self, surfaces: impl IntoIterator<Item = Surface>) -> Self {
        self.excluded = surfaces.into_iter().collect();
        self
    }

    /// Set how many nested evaluations of this field one chain may make.
    /// Zero disables the field everywhere.
    pub fn max_recursive_depth(mut self, depth: u32) -> Self {
        self.max_recursive_depth = depth;
        self
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ValueSource {
        &self.source
    }

    pub fn max_depth(&self) -> u32 {
        self.max_recursive_depth
    }

    pub fn is_excluded_from(&self, surface: Surface) -> bool {
        self.excluded.contains(&surface)
    }

    pub fn excluded_from(&self) -> impl Iterator<Item = Surface> + '_ {
        self.excluded.iter().copied()
    }

    pub fn settings(&self) -> FieldSettings {
        FieldSettings {
            name: self.name.clone(),
            source: self.source.kind(),
            excluded_from: self.excluded_from().collect(),
            max_recursive_depth: self.max_recursive_depth,
        }
    }

    /// Evaluate the field for `item`.
    ///
    /// Constants are returned as-is. Function sources run with the item marked
    /// processing and this field's depth raised by one; both are restored
    /// when the function returns, fails or panics.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::ResolutionFailure` wrapping the function's error.
    pub fn get_value(
        &self,
        item: &ContentItem,
        ctx: &mut ResolutionContext<'_>,
    ) -> Result<Value, ResolveError> {
        let result = match &self.source {
            ValueSource::Constant(value) => return Ok(value.clone()),
            ValueSource::Derived(f) => {
                let mut guard = ctx.enter(self.id, &item.id);
                f(item, &mut *guard)
            }
            ValueSource::Simple(f) => {
                let _guard = ctx.enter(self.id, &item.id);
                f(item)
            }
        };

        result.map_err(|source| ResolveError::ResolutionFailure {
            field: self.name.clone(),
            item: item.id.clone(),
            source,
        })
    }

    /// Evaluate the field for a raw host input.
    ///
    /// Returns `Ok(None)` when the host cannot normalize `raw` into an item.
    pub fn get_value_raw(
        &self,
        raw: &Value,
        ctx: &mut ResolutionContext<'_>,
    ) -> Result<Option<Value>, ResolveError> {
        match ctx.host().as_content_item(raw) {
            Some(item) => self.get_value(&item, ctx).map(Some),
            None => Ok(None),
        }
    }
}

/// Check that `name` can be used as a field name.
///
/// Accepts ASCII letters, digits, `_` and `-`, starting with a letter or `_`.
pub fn validate_name(name: &str) -> Result<(), FieldError> {
    let invalid = |reason: &str| {
        Err(FieldError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    let Some(first) = name.chars().next() else {
        return invalid("name is empty");
    };
    if name.len() > MAX_NAME_LEN {
        return invalid("name is longer than 64 characters");
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return invalid("name must start with a letter or underscore");
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return invalid(&format!("character '{}' is not allowed", c));
    }
    if RESERVED_NAMES.contains(&name) {
        return invalid("name is reserved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::types::ItemState;
    use serde_json::json;

    fn post(id: u64) -> ContentItem {
        ContentItem::new(id, "article").with("content", "a b c")
    }

    // === Construction ===

    #[test]
    fn make_accepts_valid_names() {
        for name in ["wordCount", "related_titles", "_private", "seo-title", "a1"] {
            assert!(FieldDefinition::make(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn make_rejects_invalid_names() {
        for name in ["", "1st", "-x", "has space", "dot.ted", "id", "type", "naïve"] {
            assert!(
                matches!(FieldDefinition::make(name), Err(FieldError::InvalidName { .. })),
                "{name}"
            );
        }
        assert!(FieldDefinition::make("x".repeat(65)).is_err());
    }

    #[test]
    fn defaults() {
        let field = FieldDefinition::make("f").unwrap();
        assert_eq!(field.max_depth(), DEFAULT_MAX_RECURSIVE_DEPTH);
        assert_eq!(field.excluded_from().count(), 0);
        assert_eq!(field.source().kind(), "constant");
    }

    #[test]
    fn each_definition_gets_its_own_id() {
        let a = FieldDefinition::make("same").unwrap();
        let b = FieldDefinition::make("same").unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn exclude_from_parses_tags() {
        let field = FieldDefinition::make("f")
            .unwrap()
            .exclude_from(["rest", "acf"])
            .unwrap();
        assert!(field.is_excluded_from(Surface::FieldAccessor));
        assert!(field.is_excluded_from(Surface::ExternalProjection));
        assert!(!field.is_excluded_from(Surface::BatchQuery));
    }

    #[test]
    fn exclude_from_replaces_previous_set() {
        let field = FieldDefinition::make("f")
            .unwrap()
            .exclude_from(["rest"])
            .unwrap()
            .exclude_from(["core"])
            .unwrap();
        assert_eq!(field.excluded_from().collect::<Vec<_>>(), vec![Surface::BatchQuery]);
    }

    #[test]
    fn exclude_from_reports_invalid_and_allowed() {
        let err = FieldDefinition::make("f")
            .unwrap()
            .exclude_from(["rest", "bogus", "other"])
            .unwrap_err();
        match err {
            FieldError::InvalidExclusionTag { invalid, allowed } => {
                assert_eq!(invalid, vec!["bogus", "other"]);
                assert_eq!(allowed, vec!["core", "rest", "rest_revisions", "acf"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn settings_snapshot() {
        let field = FieldDefinition::make("f")
            .unwrap()
            .simple(|_| Ok(Value::Null))
            .exclude_surfaces([Surface::Revision])
            .max_recursive_depth(1);
        assert_eq!(
            serde_json::to_value(field.settings()).unwrap(),
            json!({
                "name": "f",
                "source": "simple",
                "excluded_from": ["rest_revisions"],
                "max_recursive_depth": 1
            })
        );
    }

    // === Evaluation ===

    #[test]
    fn constant_value_does_not_touch_state() {
        let host = MemoryHost::new();
        let mut ctx = ResolutionContext::new(&host);
        let field = FieldDefinition::make("brand").unwrap().value("acme");

        assert_eq!(field.get_value(&post(1), &mut ctx).unwrap(), json!("acme"));
        assert_eq!(ctx.item_state(field.id(), &post(1).id), None);
    }

    #[test]
    fn derived_sees_processing_state_and_depth() {
        let host = MemoryHost::new();
        let mut ctx = ResolutionContext::new(&host);
        let field = FieldDefinition::make("probe").unwrap().derive(|item, ctx| {
            let field = ctx.current().ok_or("no active field")?;
            Ok(json!({
                "depth": ctx.depth(field),
                "in_flight": ctx.in_flight(&item.id),
            }))
        });

        let value = field.get_value(&post(4), &mut ctx).unwrap();
        assert_eq!(value, json!({ "depth": 1, "in_flight": true }));
        assert_eq!(ctx.depth(field.id()), 0);
        assert_eq!(
            ctx.item_state(field.id(), &post(4).id),
            Some(ItemState::Processed)
        );
    }

    #[test]
    fn failure_restores_counter_and_propagates() {
        let host = MemoryHost::new();
        let mut ctx = ResolutionContext::new(&host);
        let field = FieldDefinition::make("broken")
            .unwrap()
            .simple(|_| Err("lookup failed".into()));

        let err = field.get_value(&post(2), &mut ctx).unwrap_err();
        assert!(matches!(
            &err,
            ResolveError::ResolutionFailure { field, .. } if field == "broken"
        ));
        assert_eq!(ctx.depth(field.id()), 0);
        assert_eq!(
            ctx.item_state(field.id(), &post(2).id),
            Some(ItemState::Processed)
        );
    }

    #[test]
    fn get_value_raw_normalizes_through_host() {
        let host = MemoryHost::from_items([post(7)]);
        let mut ctx = ResolutionContext::new(&host);
        let field = FieldDefinition::make("len").unwrap().simple(|item| {
            Ok(json!(item.get_str("content").map(str::len).unwrap_or(0)))
        });

        assert_eq!(field.get_value_raw(&json!(7), &mut ctx).unwrap(), Some(json!(5)));
        assert_eq!(field.get_value_raw(&json!(8), &mut ctx).unwrap(), None);
    }
}
