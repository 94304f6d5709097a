//! Shared crossfilter selection
//!
//! The [`SelectionStore`] holds at most one [`Clause`] per producer and
//! pushes each registered consumer the conjunction of every clause except
//! the consumer's own. One instance is owned by the session root and handed
//! to surfaces at construction.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::events::{EventBus, SelectionChanged};
use crate::expression::{Expression, ExpressionError};
use crate::predicate;

/// Identity of a surface taking part in the selection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(Arc<str>);

impl SurfaceId {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One producer's contribution to the selection
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub producer: SurfaceId,
    /// Opaque interaction value (interval bounds, toggled set, brush center)
    pub value: Value,
    /// `None` imposes no restriction
    pub predicate: Option<Expression>,
}

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("producer '{producer}' submitted a malformed predicate: {source}")]
    MalformedPredicate {
        producer: SurfaceId,
        #[source]
        source: ExpressionError,
    },
}

/// Receives the effective predicate whenever the selection changes
pub trait SelectionConsumer: Send + Sync {
    /// Called synchronously from [`SelectionStore::update`]. Must not call
    /// `update` on the same store.
    fn on_selection_change(&self, predicate: Option<&Expression>);
}

struct Registration {
    identity: Option<SurfaceId>,
    consumer: Weak<dyn SelectionConsumer>,
}

pub struct SelectionStore {
    clauses: RwLock<IndexMap<SurfaceId, Clause>>,
    consumers: RwLock<Vec<Registration>>,
    /// Serializes updates so deliveries never interleave
    update_lock: Mutex<()>,
    events: Option<Arc<EventBus>>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self {
            clauses: RwLock::new(IndexMap::new()),
            consumers: RwLock::new(Vec::new()),
            update_lock: Mutex::new(()),
            events: None,
        }
    }

    /// Publish a [`SelectionChanged`] event after every update
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a consumer. `identity` is set when the consumer also
    /// produces clauses, so its own clause is left out of what it receives.
    ///
    /// The store keeps a weak reference; dropping the consumer unregisters it.
    pub fn register(&self, identity: Option<SurfaceId>, consumer: Arc<dyn SelectionConsumer>) {
        self.consumers.write().push(Registration {
            identity,
            consumer: Arc::downgrade(&consumer),
        });
    }

    /// Upsert `producer`'s clause and notify every other consumer, in
    /// registration order, before returning.
    pub fn update(
        &self,
        producer: &SurfaceId,
        value: Value,
        predicate: Option<Expression>,
    ) -> Result<(), SelectionError> {
        if let Some(expr) = &predicate {
            if let Err(source) = expr.validate() {
                error!("Rejected predicate from '{}': {}", producer, source);
                return Err(SelectionError::MalformedPredicate {
                    producer: producer.clone(),
                    source,
                });
            }
        }

        let _guard = self.update_lock.lock();

        let active_clauses = {
            let mut clauses = self.clauses.write();
            if value.is_null() && predicate.is_none() {
                clauses.shift_remove(producer);
            } else {
                clauses.insert(
                    producer.clone(),
                    Clause {
                        producer: producer.clone(),
                        value,
                        predicate,
                    },
                );
            }
            clauses.values().filter(|c| c.predicate.is_some()).count()
        };

        // Resolve every target's predicate before delivering anything
        let deliveries: Vec<(Arc<dyn SelectionConsumer>, Option<Expression>)> = {
            let mut consumers = self.consumers.write();
            consumers.retain(|r| r.consumer.strong_count() > 0);

            let clauses = self.clauses.read();
            consumers
                .iter()
                .filter(|r| r.identity.as_ref() != Some(producer))
                .filter_map(|r| {
                    let consumer = r.consumer.upgrade()?;
                    Some((consumer, conjunction(&clauses, r.identity.as_ref())))
                })
                .collect()
        };

        debug!(
            "Selection update from '{}': {} active clause(s), notifying {} consumer(s)",
            producer,
            active_clauses,
            deliveries.len()
        );

        let notified = deliveries.len();
        for (consumer, predicate) in deliveries {
            consumer.on_selection_change(predicate.as_ref());
        }

        if let Some(events) = &self.events {
            events.publish(SelectionChanged {
                producer: producer.to_string(),
                active_clauses,
                notified,
            });
        }

        Ok(())
    }

    /// Remove `producer`'s restriction
    pub fn clear(&self, producer: &SurfaceId) -> Result<(), SelectionError> {
        self.update(producer, Value::Null, None)
    }

    /// Effective predicate for a consumer with the given identity
    pub fn predicate_for(&self, identity: Option<&SurfaceId>) -> Option<Expression> {
        conjunction(&self.clauses.read(), identity)
    }

    /// Current clause of a producer
    pub fn clause(&self, producer: &SurfaceId) -> Option<Clause> {
        self.clauses.read().get(producer).cloned()
    }

    /// Snapshot of all clauses in first-submission order
    pub fn clauses(&self) -> Vec<Clause> {
        self.clauses.read().values().cloned().collect()
    }

    /// Number of live registered consumers
    pub fn consumer_count(&self) -> usize {
        self.consumers
            .read()
            .iter()
            .filter(|r| r.consumer.strong_count() > 0)
            .count()
    }
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn conjunction(clauses: &IndexMap<SurfaceId, Clause>, exclude: Option<&SurfaceId>) -> Option<Expression> {
    predicate::and(
        clauses
            .values()
            .filter(|c| Some(&c.producer) != exclude)
            .map(|c| c.predicate.clone()),
    )
}
