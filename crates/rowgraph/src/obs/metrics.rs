use crate::obs::sink::{FetchOutcome, MetricsEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap};

///
/// EventState
/// Process-wide, in-memory counters and simple perf totals for fetches.
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub perf: EventPerf,
    pub entities: BTreeMap<String, EntityCounters>,
}

impl EventState {
    const fn new() -> Self {
        Self {
            ops: EventOps::new(),
            perf: EventPerf::new(),
            entities: BTreeMap::new(),
        }
    }

    /// Fold one metrics event into the counters.
    pub(crate) fn apply(&mut self, event: &MetricsEvent) {
        match event {
            MetricsEvent::FetchStart { entity } => {
                self.ops.fetch_calls = self.ops.fetch_calls.saturating_add(1);
                let entry = self.entities.entry((*entity).to_string()).or_default();
                entry.fetch_calls = entry.fetch_calls.saturating_add(1);
            }

            MetricsEvent::FetchFinish {
                entity,
                outcome,
                rows_read,
                entities_loaded,
                elapsed_micros,
            } => {
                match outcome {
                    FetchOutcome::Completed => {
                        self.ops.fetch_completed = self.ops.fetch_completed.saturating_add(1);
                    }
                    FetchOutcome::Cancelled => {
                        self.ops.fetch_cancelled = self.ops.fetch_cancelled.saturating_add(1);
                    }
                    FetchOutcome::Failed => {
                        self.ops.fetch_failed = self.ops.fetch_failed.saturating_add(1);
                    }
                }
                self.ops.rows_read = self.ops.rows_read.saturating_add(*rows_read);
                self.ops.entities_loaded = self.ops.entities_loaded.saturating_add(*entities_loaded);
                add_micros(
                    &mut self.perf.fetch_micros_total,
                    &mut self.perf.fetch_micros_max,
                    *elapsed_micros,
                );

                let entry = self.entities.entry((*entity).to_string()).or_default();
                entry.rows_read = entry.rows_read.saturating_add(*rows_read);
                entry.entities_loaded = entry.entities_loaded.saturating_add(*entities_loaded);
            }
        }
    }
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventOps {
    pub fetch_calls: u64,
    pub fetch_completed: u64,
    pub fetch_cancelled: u64,
    pub fetch_failed: u64,

    pub rows_read: u64,
    pub entities_loaded: u64,
}

impl EventOps {
    const fn new() -> Self {
        Self {
            fetch_calls: 0,
            fetch_completed: 0,
            fetch_cancelled: 0,
            fetch_failed: 0,
            rows_read: 0,
            entities_loaded: 0,
        }
    }
}

///
/// EntityCounters
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntityCounters {
    pub fetch_calls: u64,
    pub rows_read: u64,
    pub entities_loaded: u64,
}

///
/// EventPerf
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventPerf {
    pub fetch_micros_total: u128,
    pub fetch_micros_max: u64,
}

impl EventPerf {
    const fn new() -> Self {
        Self {
            fetch_micros_total: 0,
            fetch_micros_max: 0,
        }
    }
}

static EVENT_STATE: Mutex<EventState> = parking_lot::const_mutex(EventState::new());

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    f(&EVENT_STATE.lock())
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    f(&mut EVENT_STATE.lock())
}

/// Reset all counters and perf totals.
pub fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

/// Accumulate elapsed time and track a max.
fn add_micros(total: &mut u128, max: &mut u64, delta: u64) {
    *total = total.saturating_add(u128::from(delta));
    if delta > *max {
        *max = delta;
    }
}

///
/// EventReport
/// Snapshot of the counters plus a per-entity summary.
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventReport {
    pub counters: Option<EventState>,
    pub entity_counters: Vec<EntitySummary>,
}

///
/// EntitySummary
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntitySummary {
    pub entity: String,
    pub fetch_calls: u64,
    pub rows_read: u64,
    pub entities_loaded: u64,
    pub avg_entities_per_fetch: f64,
    pub avg_rows_per_entity: f64,
}

/// Build a metrics report by inspecting in-memory counters only.
#[must_use]
pub fn report() -> EventReport {
    build_report(with_state(Clone::clone))
}

#[expect(clippy::cast_precision_loss)]
fn build_report(snap: EventState) -> EventReport {
    let mut entity_counters: Vec<EntitySummary> = snap
        .entities
        .iter()
        .map(|(entity, ops)| {
            let avg_entities_per_fetch = if ops.fetch_calls > 0 {
                ops.entities_loaded as f64 / ops.fetch_calls as f64
            } else {
                0.0
            };
            let avg_rows_per_entity = if ops.entities_loaded > 0 {
                ops.rows_read as f64 / ops.entities_loaded as f64
            } else {
                0.0
            };

            EntitySummary {
                entity: entity.clone(),
                fetch_calls: ops.fetch_calls,
                rows_read: ops.rows_read,
                entities_loaded: ops.entities_loaded,
                avg_entities_per_fetch,
                avg_rows_per_entity,
            }
        })
        .collect();

    entity_counters.sort_by(|a, b| {
        match b
            .avg_entities_per_fetch
            .partial_cmp(&a.avg_entities_per_fetch)
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Equal => a.entity.cmp(&b.entity),
            other => other,
        }
    });

    EventReport {
        counters: Some(snap),
        entity_counters,
    }
}

///
/// TESTS
///

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn finish(entity: &'static str, outcome: FetchOutcome, rows: u64, entities: u64) -> MetricsEvent {
        MetricsEvent::FetchFinish {
            entity,
            outcome,
            rows_read: rows,
            entities_loaded: entities,
            elapsed_micros: rows * 10,
        }
    }

    #[test]
    fn apply_tracks_outcomes_and_perf_max() {
        let mut state = EventState::default();
        state.apply(&MetricsEvent::FetchStart { entity: "order" });
        state.apply(&finish("order", FetchOutcome::Completed, 6, 3));
        state.apply(&MetricsEvent::FetchStart { entity: "order" });
        state.apply(&finish("order", FetchOutcome::Cancelled, 2, 1));

        assert_eq!(state.ops.fetch_calls, 2);
        assert_eq!(state.ops.fetch_completed, 1);
        assert_eq!(state.ops.fetch_cancelled, 1);
        assert_eq!(state.ops.fetch_failed, 0);
        assert_eq!(state.ops.rows_read, 8);
        assert_eq!(state.perf.fetch_micros_total, 80);
        assert_eq!(state.perf.fetch_micros_max, 60);
        assert_eq!(state.entities["order"].entities_loaded, 4);
    }

    #[test]
    fn report_sorts_entities_by_average_entities() {
        let mut state = EventState::default();
        for entity in ["alpha", "beta"] {
            state.apply(&MetricsEvent::FetchStart { entity });
        }
        state.apply(&finish("alpha", FetchOutcome::Completed, 4, 2));
        state.apply(&finish("beta", FetchOutcome::Completed, 10, 5));

        let report = build_report(state);
        let names: Vec<_> = report
            .entity_counters
            .iter()
            .map(|summary| summary.entity.as_str())
            .collect();

        assert_eq!(names, vec!["beta", "alpha"]);
        assert_eq!(report.entity_counters[0].avg_rows_per_entity, 2.0);
    }
}
