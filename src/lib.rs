//! Virtual Fields
//!
//! Read-time computed fields for content items.
//!
//! A virtual field is never stored. It is computed whenever a content item
//! leaves the system through one of four output surfaces, attached to a copy
//! of the item, and dropped again on the way out.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use virtual_fields::{ContentItem, Coordinator, FieldDefinition, MemoryHost, QueryContext};
//!
//! let word_count = FieldDefinition::make("wordCount")
//!     .unwrap()
//!     .simple(|post| {
//!         let body = post.get_str("content").unwrap_or_default();
//!         Ok(json!(body.split_whitespace().count()))
//!     });
//!
//! let mut coordinator = Coordinator::new();
//! coordinator.register_virtual_fields("article", [word_count]).unwrap();
//!
//! let post = ContentItem::new(1u64, "article").with("content", "a b c");
//! let host = MemoryHost::from_items([post.clone()]);
//! let mut ctx = coordinator.context(&host);
//!
//! let resolved = coordinator
//!     .query(&[post], &QueryContext::new("article"), &mut ctx)
//!     .unwrap();
//! assert_eq!(resolved[0].get("wordCount"), Some(&json!(3)));
//! ```
//!
//! # Surfaces
//!
//! | Surface | Tag | Input | Output |
//! |---------|-----|-------|--------|
//! | Batch query | `core` | query results | field-augmented copies |
//! | Field accessor | `rest` | one item, one field | the value or `None` |
//! | Revision | `rest_revisions` | response map + revision | augmented response |
//! | External projection | `acf` | one record or a batch | same shape, fields merged |
//!
//! A field lists the tags it is excluded from; excluded fields never appear
//! on that surface.
//!
//! # Recursion
//!
//! A derived field may trigger another resolution pass that needs the same
//! field again (a related item pointing back). Every field has a
//! `max_recursive_depth` (default 2). While a field is being derived its
//! depth is raised by one in the [`ResolutionContext`]; once the depth
//! reaches the bound the field is skipped instead of computed.

mod context;
mod coordinator;
mod error;
mod field;
mod host;
mod loader;
mod manifest;
mod policy;
mod types;

pub use context::ResolutionContext;
pub use coordinator::{
    Coordinator, FieldAccessor, IntoContentTypes, Registration, SurfaceOutput, SurfaceRequest,
};
pub use error::{
    BoxError, FieldError, LoadError, ManifestError, ManifestViolation, RegistrationError,
    ResolveError,
};
pub use field::{
    validate_name, DeriveFn, FieldDefinition, FieldId, FieldSettings, SimpleFn, ValueSource,
    DEFAULT_MAX_RECURSIVE_DEPTH, MAX_NAME_LEN,
};
pub use host::{ContentHost, MemoryHost};
pub use loader::{is_url, load_items, load_json, load_json_auto, load_json_str, parse_items};
pub use manifest::{
    load_manifest, manifest_schema, parse_manifest, ContentTypesSpec, Derivation, FieldSpec,
    Manifest, RegistrationSpec,
};
pub use policy::{Decision, Pass, SurfacePolicy};
pub use types::{
    json_type_name, ContentItem, ItemId, ItemState, QueryContext, SkipReason, Surface,
    CONTENT_KEY, ID_KEY, PARENT_KEY, RESERVED_NAMES, TYPE_KEY,
};

#[cfg(feature = "remote")]
pub use loader::load_json_url;
