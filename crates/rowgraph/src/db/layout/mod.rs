//! Column layout trees: the reusable description of how the columns of one
//! statement map onto an entity graph.
//!
//! The materializer drives the cursor; a layout tree only decides, per row,
//! whether the row starts a new master entity or continues the current one.
//! Rows of the same master must be contiguous (the join is ordered by master
//! identity); the materializer never hashes identities to regroup them.

mod context;
mod tree;


use crate::{db::entity::Entity, error::InternalError};

// re-exports
pub use context::{LazyLoadBinding, LazyLoadState, PersistenceContext, ReadContext};
pub use tree::{NodeSpec, Relation, SqlTree};

///
/// LoadOutcome
///
/// Tagged identity comparison produced by [`LayoutTree::load`].
///

#[derive(Debug)]
pub enum LoadOutcome<E> {
    /// Identity columns changed: the row starts a new master entity.
    Started(E),

    /// The row belongs to the current entity; its many-side element (if any)
    /// has been appended into it.
    Continued,
}

///
/// ManyProperty
///
/// The one-to-many relationship that multiplies rows in a statement.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManyProperty {
    pub name: String,
    pub target_entity: String,
}

///
/// LayoutTree
///
/// Immutable, shareable plan for reading one master entity per row group.
///
/// Contract for `load`:
/// - consumes exactly the columns the tree owns, starting at the current
///   cursor position, and only reads from the row source;
/// - with no many relationship, always returns `Started`;
/// - with a many relationship, returns `Continued` only when `current` is
///   present and the row's identity equals it.
///

pub trait LayoutTree: Send + Sync {
    type Entity: Entity;

    fn load(
        &self,
        ctx: &mut ReadContext<'_>,
        current: Option<&mut Self::Entity>,
    ) -> Result<LoadOutcome<Self::Entity>, InternalError>;

    /// Called once per entity when it is complete and about to be handed
    /// out, after read-only marking. Lazy loads attach it to its parent here.
    fn complete(
        &self,
        _entity: &Self::Entity,
        _lazy: Option<&mut LazyLoadState>,
    ) -> Result<(), InternalError> {
        Ok(())
    }

    fn many_property(&self) -> Option<&ManyProperty>;

    /// Whether each row starts with a synthetic row-number column.
    fn row_number_included(&self) -> bool;

    /// Short shape description used for diagnostics and plan keys.
    fn summary(&self) -> String;
}
