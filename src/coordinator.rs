//! Resolution coordinator - attaches registered virtual fields to content
//! items on each output surface.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::context::ResolutionContext;
use crate::error::{RegistrationError, ResolveError};
use crate::field::FieldDefinition;
use crate::host::ContentHost;
use crate::policy::{Decision, Pass};
use crate::types::{ContentItem, QueryContext, Surface, CONTENT_KEY};

/// One or many content type tags.
pub trait IntoContentTypes {
    fn into_content_types(self) -> Vec<String>;
}

impl IntoContentTypes for &str {
    fn into_content_types(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoContentTypes for String {
    fn into_content_types(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoContentTypes for Vec<String> {
    fn into_content_types(self) -> Vec<String> {
        self
    }
}

impl IntoContentTypes for Vec<&str> {
    fn into_content_types(self) -> Vec<String> {
        self.into_iter().map(String::from).collect()
    }
}

impl IntoContentTypes for &[&str] {
    fn into_content_types(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IntoContentTypes for [&str; N] {
    fn into_content_types(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

/// Fields bound to a set of content types.
///
/// Exclusion filtering happens here, once, so resolution only walks the
/// fields that can appear on a surface.
#[derive(Debug)]
pub struct Registration {
    content_types: Vec<String>,
    fields: Vec<Arc<FieldDefinition>>,
    applicable: BTreeMap<Surface, Vec<Arc<FieldDefinition>>>,
}

impl Registration {
    /// # Errors
    ///
    /// Returns `RegistrationError` if there are no content types, no fields,
    /// or two fields share a name.
    pub fn new(
        content_types: Vec<String>,
        fields: Vec<Arc<FieldDefinition>>,
    ) -> Result<Self, RegistrationError> {
        let mut content_types = content_types;
        let mut seen_types = HashSet::new();
        content_types.retain(|t| !t.is_empty() && seen_types.insert(t.clone()));
        if content_types.is_empty() {
            return Err(RegistrationError::NoContentTypes);
        }
        if fields.is_empty() {
            return Err(RegistrationError::NoFields);
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name()) {
                return Err(RegistrationError::DuplicateField {
                    name: field.name().to_string(),
                });
            }
        }

        let applicable = Surface::ALL
            .iter()
            .map(|surface| {
                let policy = surface.policy();
                let on_surface = fields
                    .iter()
                    .filter(|f| policy.applies(f))
                    .cloned()
                    .collect();
                (*surface, on_surface)
            })
            .collect();

        Ok(Self {
            content_types,
            fields,
            applicable,
        })
    }

    pub fn content_types(&self) -> &[String] {
        &self.content_types
    }

    pub fn fields(&self) -> &[Arc<FieldDefinition>] {
        &self.fields
    }

    pub fn covers(&self, content_type: &str) -> bool {
        self.content_types.iter().any(|t| t == content_type)
    }

    /// Fields not excluded from `surface`, in registration order.
    pub fn fields_for(&self, surface: Surface) -> &[Arc<FieldDefinition>] {
        self.applicable
            .get(&surface)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// A read-only accessor for one field on the per-field API surface.
#[derive(Debug, Clone, Copy)]
pub struct FieldAccessor<'c> {
    registration: &'c Registration,
    field: &'c Arc<FieldDefinition>,
}

impl<'c> FieldAccessor<'c> {
    pub fn name(&self) -> &'c str {
        self.field.name()
    }

    pub fn content_types(&self) -> &'c [String] {
        self.registration.content_types()
    }

    pub fn field(&self) -> &'c FieldDefinition {
        self.field
    }

    /// Resolve the field for an item in the host's native representation.
    ///
    /// Returns `Ok(None)` when the item cannot be resolved, is of a type this
    /// accessor is not registered on, or the field's depth limit is reached.
    /// Values computed outside any other evaluation are memoized per
    /// `(item, field instance)` for the lifetime of `ctx`.
    pub fn get(
        &self,
        raw: &Value,
        ctx: &mut ResolutionContext<'_>,
    ) -> Result<Option<Value>, ResolveError> {
        let Some(item) = ctx.host().as_content_item(raw) else {
            debug!(field = self.name(), "accessor input did not resolve to an item");
            return Ok(None);
        };
        if !self.registration.covers(&item.item_type) {
            return Ok(None);
        }

        let policy = Surface::FieldAccessor.policy();
        if let Decision::Skip(reason) = policy.decide(self.field, ctx, Pass::default()) {
            debug!(field = self.name(), item = %item.id, %reason, "skipped");
            return Ok(None);
        }

        // Inside a chain the depth limit may cut a value short.
        let top_level = ctx.current().is_none();
        if top_level {
            if let Some(value) = ctx.memoized(&item.id, self.field.id()) {
                return Ok(Some(value.clone()));
            }
        }

        let value = self.field.get_value(&item, ctx)?;
        if top_level {
            ctx.memoize(item.id.clone(), self.field.id(), value.clone());
        }
        Ok(Some(value))
    }
}

/// Input for the single [`Coordinator::resolve`] entry point.
#[derive(Debug)]
pub enum SurfaceRequest<'a> {
    BatchQuery {
        items: &'a [ContentItem],
        query: &'a QueryContext,
    },
    FieldAccessor {
        content_type: &'a str,
        field: &'a str,
        item: &'a Value,
    },
    Revision {
        response: Map<String, Value>,
        revision: &'a ContentItem,
    },
    ExternalProjection {
        records: Value,
    },
}

impl SurfaceRequest<'_> {
    pub fn surface(&self) -> Surface {
        match self {
            SurfaceRequest::BatchQuery { .. } => Surface::BatchQuery,
            SurfaceRequest::FieldAccessor { .. } => Surface::FieldAccessor,
            SurfaceRequest::Revision { .. } => Surface::Revision,
            SurfaceRequest::ExternalProjection { .. } => Surface::ExternalProjection,
        }
    }
}

/// Output of [`Coordinator::resolve`], one variant per surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOutput {
    Items(Vec<ContentItem>),
    Value(Option<Value>),
    Response(Map<String, Value>),
    Records(Value),
}

/// Holds every registration and resolves them on the output surfaces.
#[derive(Debug, Default)]
pub struct Coordinator {
    registrations: Vec<Registration>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fields` on one or many content types.
    ///
    /// Fields may be passed owned or as shared `Arc`s. A field instance shared
    /// across content types also shares its recursion bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError` for empty type or field lists and
    /// duplicate field names.
    pub fn register_virtual_fields<T, I>(
        &mut self,
        content_types: T,
        fields: I,
    ) -> Result<(), RegistrationError>
    where
        T: IntoContentTypes,
        I: IntoIterator,
        I::Item: Into<Arc<FieldDefinition>>,
    {
        let fields: Vec<Arc<FieldDefinition>> = fields.into_iter().map(Into::into).collect();
        let registration = Registration::new(content_types.into_content_types(), fields)?;
        info!(
            content_types = ?registration.content_types(),
            fields = registration.fields().len(),
            "registered virtual fields"
        );
        self.registrations.push(registration);
        Ok(())
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Whether any registration covers `content_type`.
    pub fn covers(&self, content_type: &str) -> bool {
        self.registrations.iter().any(|r| r.covers(content_type))
    }

    /// Fresh per-request context bound to this coordinator, so derived
    /// functions can run nested queries through it.
    pub fn context<'h>(&'h self, host: &'h dyn ContentHost) -> ResolutionContext<'h> {
        ResolutionContext::with_coordinator(host, self)
    }

    /// Fields on `surface` for items of `content_type`, across registrations.
    pub fn fields_for<'a, 'b>(
        &'a self,
        content_type: &'b str,
        surface: Surface,
    ) -> impl Iterator<Item = &'a Arc<FieldDefinition>> + 'b
    where
        'a: 'b,
    {
        self.registrations
            .iter()
            .filter(move |r| r.covers(content_type))
            .flat_map(move |r| r.fields_for(surface).iter())
    }

    /// Single entry point dispatching on the surface of `request`.
    pub fn resolve(
        &self,
        request: SurfaceRequest<'_>,
        ctx: &mut ResolutionContext<'_>,
    ) -> Result<SurfaceOutput, ResolveError> {
        match request {
            SurfaceRequest::BatchQuery { items, query } => {
                self.query(items, query, ctx).map(SurfaceOutput::Items)
            }
            SurfaceRequest::FieldAccessor {
                content_type,
                field,
                item,
            } => {
                let accessor = self.accessor(content_type, field).ok_or_else(|| {
                    ResolveError::UnknownField {
                        field: field.to_string(),
                        content_type: content_type.to_string(),
                    }
                })?;
                accessor.get(item, ctx).map(SurfaceOutput::Value)
            }
            SurfaceRequest::Revision { response, revision } => self
                .prepare_revision(response, revision, ctx)
                .map(SurfaceOutput::Response),
            SurfaceRequest::ExternalProjection { records } => {
                self.project(records, ctx).map(SurfaceOutput::Records)
            }
        }
    }

    /// Attach fields to the results of a content query.
    ///
    /// Returns one item per input item. Items of covered types are copies
    /// with fields attached; the host's instances are never touched. A field
    /// that is skipped at its depth limit, or on a nested query when it is
    /// limited to one layer, is also removed from the copy if a previous
    /// pass left it there.
    pub fn query(
        &self,
        items: &[ContentItem],
        query: &QueryContext,
        ctx: &mut ResolutionContext<'_>,
    ) -> Result<Vec<ContentItem>, ResolveError> {
        if let Some(content_type) = &query.content_type {
            if !self.covers(content_type) {
                return Ok(items.to_vec());
            }
        }

        let policy = Surface::BatchQuery.policy();
        let pass = Pass {
            nested: query.nested,
        };

        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
            let mut copy = item.clone();
            for field in self.fields_for(&item.item_type, Surface::BatchQuery) {
                match policy.decide(field, ctx, pass) {
                    Decision::Compute => {
                        let value = field.get_value(&copy, ctx)?;
                        copy.set(field.name(), value);
                    }
                    Decision::Skip(reason) => {
                        if copy.remove(field.name()).is_some() {
                            debug!(field = field.name(), item = %copy.id, %reason, "scrubbed");
                        } else {
                            debug!(field = field.name(), item = %copy.id, %reason, "skipped");
                        }
                    }
                }
            }
            resolved.push(copy);
        }

        Ok(resolved)
    }

    /// Every per-field accessor, one per registration and applicable field.
    /// Fields excluded from the API surface have none.
    pub fn accessors(&self) -> Vec<FieldAccessor<'_>> {
        self.registrations
            .iter()
            .flat_map(|registration| {
                registration
                    .fields_for(Surface::FieldAccessor)
                    .iter()
                    .map(move |field| FieldAccessor {
                        registration,
                        field,
                    })
            })
            .collect()
    }

    /// The accessor for `field` on `content_type`, if one is registered.
    ///
    /// When several registrations on the type define the same name, the
    /// latest one wins, as it does for batch query results.
    pub fn accessor(&self, content_type: &str, field: &str) -> Option<FieldAccessor<'_>> {
        self.registrations
            .iter()
            .rev()
            .filter(|r| r.covers(content_type))
            .find_map(|registration| {
                registration
                    .fields_for(Surface::FieldAccessor)
                    .iter()
                    .find(|f| f.name() == field)
                    .map(|field| FieldAccessor {
                        registration,
                        field,
                    })
            })
    }

    /// Add fields to a revision API response.
    ///
    /// The revision's parent is looked up through the host and its body is
    /// swapped for the revision's before fields are computed against it.
    /// Responses for revisions of uncovered types come back unchanged.
    pub fn prepare_revision(
        &self,
        mut response: Map<String, Value>,
        revision: &ContentItem,
        ctx: &mut ResolutionContext<'_>,
    ) -> Result<Map<String, Value>, ResolveError> {
        let Some(parent_id) = revision.parent_id() else {
            return Ok(response);
        };
        let Some(mut parent) = ctx.host().get_item(&parent_id) else {
            debug!(revision = %revision.id, parent = %parent_id, "revision parent not found");
            return Ok(response);
        };

        let fields: Vec<&Arc<FieldDefinition>> = self
            .fields_for(&parent.item_type, Surface::Revision)
            .collect();
        if fields.is_empty() {
            return Ok(response);
        }

        if let Some(content) = revision.get(CONTENT_KEY) {
            parent.set(CONTENT_KEY, content.clone());
        }

        let policy = Surface::Revision.policy();
        for field in fields {
            match policy.decide(field, ctx, Pass::default()) {
                Decision::Compute => {
                    let value = field.get_value(&parent, ctx)?;
                    response.insert(field.name().to_string(), value);
                }
                Decision::Skip(reason) => {
                    debug!(field = field.name(), revision = %revision.id, %reason, "skipped");
                }
            }
        }

        Ok(response)
    }

    /// Merge fields into plain records for an external integration.
    ///
    /// Accepts a single record or an array of records and returns the same
    /// shape. Records that do not normalize to a covered item pass through.
    pub fn project(
        &self,
        records: Value,
        ctx: &mut ResolutionContext<'_>,
    ) -> Result<Value, ResolveError> {
        match records {
            Value::Array(batch) => batch
                .into_iter()
                .map(|record| self.project_record(record, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            record => self.project_record(record, ctx),
        }
    }

    fn project_record(
        &self,
        record: Value,
        ctx: &mut ResolutionContext<'_>,
    ) -> Result<Value, ResolveError> {
        let Some(item) = ctx.host().as_content_item(&record) else {
            return Ok(record);
        };
        let mut map = match record {
            Value::Object(map) => map,
            other => return Ok(other),
        };

        let policy = Surface::ExternalProjection.policy();
        for field in self.fields_for(&item.item_type, Surface::ExternalProjection) {
            match policy.decide(field, ctx, Pass::default()) {
                Decision::Compute => {
                    let value = field.get_value(&item, ctx)?;
                    map.insert(field.name().to_string(), value);
                }
                Decision::Skip(reason) => {
                    debug!(field = field.name(), item = %item.id, %reason, "skipped");
                }
            }
        }

        Ok(Value::Object(map))
    }
}
