use crate::{
    db::{cursor::RowCursor, entity::Record},
    error::{ErrorClass, ErrorOrigin, InternalError},
    obs::NodeUsage,
    value::Value,
};
use std::{collections::VecDeque, sync::Arc};

///
/// PersistenceContext
///
/// Identity map of already-loaded entities. Used when a fetch lazily loads
/// the many side for a batch of parents that are already in memory.
///

pub trait PersistenceContext: Send + Sync {
    fn contains(&self, entity: &str, id: &Value) -> bool;

    fn add_to_collection(&self, entity: &str, id: &Value, property: &str, child: &Record);
}

///
/// LazyLoadBinding
///
/// Routes every loaded record into the `property` collection of its parent.
///

#[derive(Clone)]
pub struct LazyLoadBinding {
    pub persistence: Arc<dyn PersistenceContext>,
    pub parent_entity: String,
    pub property: String,
}

impl std::fmt::Debug for LazyLoadBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyLoadBinding")
            .field("parent_entity", &self.parent_entity)
            .field("property", &self.property)
            .finish_non_exhaustive()
    }
}

///
/// LazyLoadState
///
/// Binding plus the last resolved parent, so consecutive children of the same
/// parent resolve it once. Parents are queued in start order and consumed as
/// each child is completed, because a grouped child is only whole once its
/// last row has been read.
///

#[derive(Debug)]
pub struct LazyLoadState {
    binding: LazyLoadBinding,
    last_parent: Option<(Value, bool)>,
    awaiting: VecDeque<Option<Value>>,
}

impl LazyLoadState {
    pub(crate) const fn new(binding: LazyLoadBinding) -> Self {
        Self {
            binding,
            last_parent: None,
            awaiting: VecDeque::new(),
        }
    }

    /// Add a completed child to the collection of the parent queued for it.
    pub fn attach_completed(&mut self, child: &Record) {
        let Some(Some(parent_id)) = self.awaiting.pop_front() else {
            return;
        };

        self.binding.persistence.add_to_collection(
            &self.binding.parent_entity,
            &parent_id,
            &self.binding.property,
            child,
        );
    }
}

///
/// ReadContext
///
/// Per-row view handed to a layout tree: the positioned cursor plus the
/// fetch-level state a tree may feed (node usage, lazy-load attachment).
///

pub struct ReadContext<'a> {
    cursor: &'a mut RowCursor,
    usage: Option<&'a mut NodeUsage>,
    lazy: Option<&'a mut LazyLoadState>,
}

impl<'a> ReadContext<'a> {
    pub(crate) const fn new(
        cursor: &'a mut RowCursor,
        usage: Option<&'a mut NodeUsage>,
        lazy: Option<&'a mut LazyLoadState>,
    ) -> Self {
        Self {
            cursor,
            usage,
            lazy,
        }
    }

    /// Standalone context over a cursor, without profiling or lazy loading.
    pub const fn detached(cursor: &'a mut RowCursor) -> Self {
        Self::new(cursor, None, None)
    }

    pub const fn cursor(&mut self) -> &mut RowCursor {
        self.cursor
    }

    /// Read the next column value.
    pub fn read(&mut self) -> Result<Value, InternalError> {
        Ok(self.cursor.read()?)
    }

    /// Skip columns owned by nodes that are not materialized for this row.
    pub const fn skip(&mut self, columns: usize) {
        self.cursor.increment_position(columns);
    }

    #[must_use]
    pub const fn is_usage_profiling(&self) -> bool {
        self.usage.is_some()
    }

    pub fn record_node_usage(&mut self, path: &str) {
        if let Some(usage) = self.usage.as_deref_mut() {
            usage.record(path);
        }
    }

    /// Resolve the parent of a child that has just been started and queue it
    /// for attachment once the child is complete. No-op outside a lazy load;
    /// a null parent id queues nothing to attach.
    pub fn set_lazy_loaded_parent(&mut self, parent_id: &Value) -> Result<(), InternalError> {
        let Some(lazy) = self.lazy.as_deref_mut() else {
            return Ok(());
        };
        if parent_id.is_null() {
            lazy.awaiting.push_back(None);
            return Ok(());
        }

        let cached = match &lazy.last_parent {
            Some((last, present)) if last == parent_id => Some(*present),
            _ => None,
        };
        let binding = &lazy.binding;
        let present = match cached {
            Some(present) => present,
            None => {
                let present = binding
                    .persistence
                    .contains(&binding.parent_entity, parent_id);
                lazy.last_parent = Some((parent_id.clone(), present));
                present
            }
        };

        if !present {
            return Err(InternalError::new(
                ErrorClass::NotFound,
                ErrorOrigin::Layout,
                format!(
                    "lazy-load parent {}:{parent_id} is not in the persistence context",
                    lazy.binding.parent_entity
                ),
            ));
        }

        lazy.awaiting.push_back(Some(parent_id.clone()));

        Ok(())
    }
}
