//! Process-lifetime cache of query plans keyed by query shape.

use crate::{
    db::{layout::LayoutTree, plan::QueryPlan},
    error::InternalError,
};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, fmt, sync::Arc};

///
/// PlanKey
///
/// Deterministic fingerprint of a query shape: entity, statement text, and
/// layout summary. Bind values are not part of the shape.
///

#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PlanKey([u8; 32]);

impl PlanKey {
    #[must_use]
    pub fn for_shape(entity: &str, sql: &str, layout_summary: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"planshape:v1");
        write_str(&mut hasher, entity);
        write_str(&mut hasher, sql);
        write_str(&mut hasher, layout_summary);

        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[expect(clippy::cast_possible_truncation)]
fn write_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u32).to_be_bytes());
    hasher.update(value.as_bytes());
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlanKey({self})")
    }
}

///
/// PlanCache
///
/// Shared read-mostly map of built plans. Plans are immutable apart from
/// their rolling statistics and safe to use from concurrent fetches.
///

pub struct PlanCache<L: LayoutTree> {
    plans: RwLock<HashMap<PlanKey, Arc<QueryPlan<L>>>>,
}

impl<L: LayoutTree> PlanCache<L> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get(&self, key: &PlanKey) -> Option<Arc<QueryPlan<L>>> {
        self.plans.read().get(key).cloned()
    }

    /// Return the cached plan for `key`, building and caching it on a miss.
    ///
    /// A failed build caches nothing. When two threads race on the same
    /// miss, the first plan stored wins and both callers receive it.
    pub fn get_or_build(
        &self,
        key: PlanKey,
        build: impl FnOnce() -> Result<QueryPlan<L>, InternalError>,
    ) -> Result<Arc<QueryPlan<L>>, InternalError> {
        if let Some(plan) = self.get(&key) {
            return Ok(plan);
        }

        let built = Arc::new(build()?);
        let mut plans = self.plans.write();
        let plan = plans.entry(key).or_insert(built);

        Ok(Arc::clone(plan))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.read().is_empty()
    }

    pub fn clear(&self) {
        self.plans.write().clear();
    }
}

impl<L: LayoutTree> Default for PlanCache<L> {
    fn default() -> Self {
        Self::new()
    }
}
