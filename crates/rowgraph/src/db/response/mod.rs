//! Result containers for bulk fetches and the assembler strategies that
//! populate them.


use crate::{
    db::{entity::Entity, request::FetchMode},
    error::{ErrorClass, InternalError},
    value::Value,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error as ThisError;

///
/// ResponseError
/// Errors related to assembling a materialized response.
///

#[derive(Debug, ThisError)]
pub enum ResponseError {
    #[error("expected at most one row, found another (entity {entity}, id {id})")]
    NotUnique { entity: String, id: Value },

    #[error("map key property '{property}' missing on {entity} {id}")]
    MissingMapKey {
        entity: String,
        id: Value,
        property: String,
    },
}

impl ResponseError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::NotUnique { .. } => ErrorClass::Conflict,
            Self::MissingMapKey { .. } => ErrorClass::InvariantViolation,
        }
    }
}

///
/// ResultContainer
///
/// Terminal artifact of a bulk fetch, handed to the caller exactly once.
///

#[derive(Debug)]
pub enum ResultContainer<E> {
    Single(Option<E>),
    List(Vec<E>),
    /// Distinct by identity, in first-seen order.
    Set(Vec<E>),
    Map(BTreeMap<Value, E>),
}

impl<E> ResultContainer<E> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(entity) => usize::from(entity.is_some()),
            Self::List(entities) | Self::Set(entities) => entities.len(),
            Self::Map(entities) => entities.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into a list, in container order.
    #[must_use]
    pub fn into_list(self) -> Vec<E> {
        match self {
            Self::Single(entity) => entity.into_iter().collect(),
            Self::List(entities) | Self::Set(entities) => entities,
            Self::Map(entities) => entities.into_values().collect(),
        }
    }

    /// The single entity; `None` for empty results or non-single containers.
    #[must_use]
    pub fn into_single(self) -> Option<E> {
        match self {
            Self::Single(entity) => entity,
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<Value, E>> {
        match self {
            Self::Map(entities) => Some(entities),
            _ => None,
        }
    }
}

///
/// Assembler
///
/// Container strategy for one fetch mode. `append` is the only mutation path.
///

pub trait Assembler<E: Entity>: Send {
    fn create_empty(&self) -> ResultContainer<E>;

    fn append(&mut self, container: &mut ResultContainer<E>, entity: E) -> Result<(), InternalError>;
}

/// Select the container strategy for a fetch mode; `None` when iterating.
#[must_use]
pub fn assembler_for<E: Entity + 'static>(mode: &FetchMode) -> Option<Box<dyn Assembler<E>>> {
    match mode {
        FetchMode::Single => Some(Box::new(SingleAssembler)),
        FetchMode::List => Some(Box::new(ListAssembler)),
        FetchMode::Set => Some(Box::new(SetAssembler::default())),
        FetchMode::Map { key_property } => Some(Box::new(MapAssembler {
            key_property: key_property.clone(),
        })),
        FetchMode::Iterate => None,
    }
}

fn mismatched(mode: &str) -> InternalError {
    InternalError::materializer_invariant(format!(
        "{mode} assembler received a container of another shape"
    ))
}

///
/// SingleAssembler
///

pub struct SingleAssembler;

impl<E: Entity> Assembler<E> for SingleAssembler {
    fn create_empty(&self) -> ResultContainer<E> {
        ResultContainer::Single(None)
    }

    fn append(&mut self, container: &mut ResultContainer<E>, entity: E) -> Result<(), InternalError> {
        let ResultContainer::Single(slot) = container else {
            return Err(mismatched("single"));
        };
        if slot.is_some() {
            return Err(ResponseError::NotUnique {
                entity: entity.entity_name().to_string(),
                id: entity.identity().clone(),
            }
            .into());
        }

        *slot = Some(entity);
        Ok(())
    }
}

///
/// ListAssembler
///

pub struct ListAssembler;

impl<E: Entity> Assembler<E> for ListAssembler {
    fn create_empty(&self) -> ResultContainer<E> {
        ResultContainer::List(Vec::new())
    }

    fn append(&mut self, container: &mut ResultContainer<E>, entity: E) -> Result<(), InternalError> {
        let ResultContainer::List(entities) = container else {
            return Err(mismatched("list"));
        };

        entities.push(entity);
        Ok(())
    }
}

///
/// SetAssembler
/// Keeps the first entity seen per identity.
///

#[derive(Default)]
pub struct SetAssembler {
    seen: BTreeSet<Value>,
}

impl<E: Entity> Assembler<E> for SetAssembler {
    fn create_empty(&self) -> ResultContainer<E> {
        ResultContainer::Set(Vec::new())
    }

    fn append(&mut self, container: &mut ResultContainer<E>, entity: E) -> Result<(), InternalError> {
        let ResultContainer::Set(entities) = container else {
            return Err(mismatched("set"));
        };

        if self.seen.insert(entity.identity().clone()) {
            entities.push(entity);
        }

        Ok(())
    }
}

///
/// MapAssembler
/// Later entities with an equal key replace earlier ones.
///

pub struct MapAssembler {
    key_property: Option<String>,
}

impl<E: Entity> Assembler<E> for MapAssembler {
    fn create_empty(&self) -> ResultContainer<E> {
        ResultContainer::Map(BTreeMap::new())
    }

    fn append(&mut self, container: &mut ResultContainer<E>, entity: E) -> Result<(), InternalError> {
        let ResultContainer::Map(entities) = container else {
            return Err(mismatched("map"));
        };

        let key = match &self.key_property {
            None => entity.identity().clone(),
            Some(property) => match entity.property(property) {
                Some(value) => value.clone(),
                None => {
                    return Err(ResponseError::MissingMapKey {
                        entity: entity.entity_name().to_string(),
                        id: entity.identity().clone(),
                        property: property.clone(),
                    }
                    .into());
                }
            },
        };

        entities.insert(key, entity);
        Ok(())
    }
}
