//! Per-surface attach policy.
//!
//! Each output surface decides, per field, whether the field takes part at
//! all (exclusion, checked once when a registration is set up) and whether
//! it is computed for a given item right now (recursion depth and query
//! position, checked at resolution time).

use crate::context::ResolutionContext;
use crate::field::FieldDefinition;
use crate::types::{SkipReason, Surface};

/// Outcome for one field on one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Compute,
    Skip(SkipReason),
}

/// Where in a query chain the current pass sits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pass {
    /// A secondary query issued while assembling another response.
    pub nested: bool,
}

/// Attach policy of one output surface.
pub trait SurfacePolicy: Sync {
    fn surface(&self) -> Surface;

    /// Whether `field` takes part on this surface at all.
    fn applies(&self, field: &FieldDefinition) -> bool {
        !field.is_excluded_from(self.surface())
    }

    /// Whether `field` is computed right now.
    fn decide(&self, field: &FieldDefinition, ctx: &ResolutionContext<'_>, _pass: Pass) -> Decision {
        if !self.applies(field) {
            return Decision::Skip(SkipReason::ExcludedForSurface);
        }
        depth_decision(field, ctx)
    }
}

fn depth_decision(field: &FieldDefinition, ctx: &ResolutionContext<'_>) -> Decision {
    if ctx.depth(field.id()) < field.max_depth() {
        Decision::Compute
    } else {
        Decision::Skip(SkipReason::RecursionDepthExceeded)
    }
}

/// Results of general content queries.
///
/// Fields limited to a single layer (`max_recursive_depth <= 1`) only ever
/// appear on the directly requested items, never on nested query results.
pub struct BatchQueryPolicy;

impl SurfacePolicy for BatchQueryPolicy {
    fn surface(&self) -> Surface {
        Surface::BatchQuery
    }

    fn decide(&self, field: &FieldDefinition, ctx: &ResolutionContext<'_>, pass: Pass) -> Decision {
        if !self.applies(field) {
            return Decision::Skip(SkipReason::ExcludedForSurface);
        }
        if pass.nested && field.max_depth() <= 1 {
            return Decision::Skip(SkipReason::SecondaryQueryTopLevelOnly);
        }
        depth_decision(field, ctx)
    }
}

/// Read-only per-field API accessors.
pub struct FieldAccessorPolicy;

impl SurfacePolicy for FieldAccessorPolicy {
    fn surface(&self) -> Surface {
        Surface::FieldAccessor
    }
}

/// Revision API responses.
pub struct RevisionPolicy;

impl SurfacePolicy for RevisionPolicy {
    fn surface(&self) -> Surface {
        Surface::Revision
    }
}

/// Plain records handed to an external integration.
pub struct ExternalProjectionPolicy;

impl SurfacePolicy for ExternalProjectionPolicy {
    fn surface(&self) -> Surface {
        Surface::ExternalProjection
    }
}

impl Surface {
    /// The attach policy for this surface.
    pub fn policy(&self) -> &'static dyn SurfacePolicy {
        match self {
            Surface::BatchQuery => &BatchQueryPolicy,
            Surface::FieldAccessor => &FieldAccessorPolicy,
            Surface::Revision => &RevisionPolicy,
            Surface::ExternalProjection => &ExternalProjectionPolicy,
        }
    }
}
