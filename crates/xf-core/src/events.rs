//! Session events
//!
//! Non-fatal notifications published while the session runs: selection
//! changes, applied and failed queries, brush mode transitions. Handlers are
//! typed closures keyed by the event's `TypeId`.

use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::trace;

/// Marker for types that can travel on the [`EventBus`]
pub trait Event: Any + Debug + Send + Sync {}

/// A producer changed its clause
#[derive(Debug, Clone)]
pub struct SelectionChanged {
    pub producer: String,
    /// Clauses currently restricting rows
    pub active_clauses: usize,
    pub notified: usize,
}

/// A query result replaced a surface's data
#[derive(Debug, Clone)]
pub struct QueryApplied {
    pub surface: String,
    pub stamp: u64,
    pub rows: usize,
}

/// A query failed; the surface keeps its previous data
#[derive(Debug, Clone)]
pub struct QueryFailed {
    pub surface: String,
    pub stamp: u64,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct BrushModeChanged {
    pub active: bool,
}

impl Event for SelectionChanged {}
impl Event for QueryApplied {}
impl Event for QueryFailed {}
impl Event for BrushModeChanged {}

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Session-wide event bus
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<AHashMap<TypeId, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every published `E`
    pub fn subscribe<E, F>(&self, handler: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });
        self.handlers.write().entry(TypeId::of::<E>()).or_default().push(erased);
    }

    /// Deliver `event` to its subscribers on the calling thread. Handlers
    /// run outside the bus lock and may publish or subscribe themselves.
    pub fn publish<E: Event>(&self, event: E) {
        let handlers = match self.handlers.read().get(&TypeId::of::<E>()) {
            Some(handlers) => handlers.clone(),
            None => return,
        };
        trace!("Publishing {:?} to {} handler(s)", event, handlers.len());
        for handler in handlers {
            handler(&event);
        }
    }

    /// Number of handlers subscribed to `E`
    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers.read().get(&TypeId::of::<E>()).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_handlers_only_see_their_type() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.subscribe(move |failed: &QueryFailed| sink.lock().push(failed.error.clone()));

        bus.publish(QueryApplied { surface: "map".into(), stamp: 1, rows: 10 });
        bus.publish(QueryFailed { surface: "map".into(), stamp: 2, error: "boom".into() });

        assert_eq!(*seen.lock(), vec!["boom".to_string()]);
        assert_eq!(bus.handler_count::<QueryFailed>(), 1);
        assert_eq!(bus.handler_count::<QueryApplied>(), 0);
    }

    #[test]
    fn test_handler_may_publish() {
        let bus = Arc::new(EventBus::new());
        let modes = Arc::new(Mutex::new(Vec::new()));

        let relay = Arc::downgrade(&bus);
        bus.subscribe(move |applied: &QueryApplied| {
            if let Some(bus) = relay.upgrade() {
                bus.publish(BrushModeChanged { active: applied.rows > 0 });
            }
        });
        let sink = modes.clone();
        bus.subscribe(move |changed: &BrushModeChanged| sink.lock().push(changed.active));

        bus.publish(QueryApplied { surface: "map".into(), stamp: 1, rows: 3 });
        assert_eq!(*modes.lock(), vec![true]);
    }
}
