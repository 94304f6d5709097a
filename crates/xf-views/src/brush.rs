//! Spatial brush
//!
//! While brush mode is on, pointer hovers over the map become a circular
//! distance clause in the shared selection. Hovers are coalesced: the first
//! hover opens a window of `min_interval_ms`, later hovers inside the window
//! replace the pending anchor, and only the latest anchor is submitted when
//! the window closes. This bounds clause updates to one per window.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info};
use xf_core::events::BrushModeChanged;
use xf_core::{BrushConfig, EventBus, SelectionError, SelectionStore, SpatialColumns, SurfaceId};

use crate::query_client::UnfilteredReload;

/// Brush mode state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrushState {
    Inactive,
    /// Brush mode is on and waiting for hovers
    Armed,
    /// A clause is being submitted
    Emitting,
}

/// Trailing-edge coalescing of hover anchors
#[derive(Debug, Clone)]
pub struct BrushThrottle {
    min_interval: Duration,
    deadline: Option<Instant>,
    pending: Option<(f64, f64)>,
}

impl BrushThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            deadline: None,
            pending: None,
        }
    }

    /// Record a hover. Returns the flush time when this hover opened a new
    /// window; `None` when it joined the window already open.
    pub fn offer(&mut self, anchor: (f64, f64), now: Instant) -> Option<Instant> {
        self.pending = Some(anchor);
        match self.deadline {
            Some(_) => None,
            None => {
                let deadline = now + self.min_interval;
                self.deadline = Some(deadline);
                Some(deadline)
            }
        }
    }

    /// Take the pending anchor if its window has closed
    pub fn take_due(&mut self, now: Instant) -> Option<(f64, f64)> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drop any pending anchor and close the window
    pub fn reset(&mut self) {
        self.deadline = None;
        self.pending = None;
    }
}

struct BrushShared {
    state: BrushState,
    sync: bool,
    radius_m: f64,
    anchor: Option<(f64, f64)>,
    throttle: BrushThrottle,
    /// Bumped whenever pending hovers must be forgotten
    generation: u64,
}

struct BrushInner {
    identity: SurfaceId,
    store: Arc<SelectionStore>,
    columns: SpatialColumns,
    config: BrushConfig,
    reload: Arc<dyn UnfilteredReload>,
    events: Option<Arc<EventBus>>,
    runtime: Handle,
    shared: Mutex<BrushShared>,
}

/// Pointer-driven circular selection over the map surface
#[derive(Clone)]
pub struct SpatialBrush {
    inner: Arc<BrushInner>,
}

impl SpatialBrush {
    /// `identity` is the map surface's producer identity; `reload` restores
    /// the map's full dataset when the brush stops filtering.
    pub fn new(
        identity: SurfaceId,
        store: Arc<SelectionStore>,
        columns: SpatialColumns,
        config: BrushConfig,
        reload: Arc<dyn UnfilteredReload>,
        events: Option<Arc<EventBus>>,
        runtime: Handle,
    ) -> Self {
        let radius_m = config.normalize_radius(config.default_radius_m);
        let throttle = BrushThrottle::new(Duration::from_millis(config.min_interval_ms));
        Self {
            inner: Arc::new(BrushInner {
                identity,
                store,
                columns,
                config,
                reload,
                events,
                runtime,
                shared: Mutex::new(BrushShared {
                    state: BrushState::Inactive,
                    sync: true,
                    radius_m,
                    anchor: None,
                    throttle,
                    generation: 0,
                }),
            }),
        }
    }

    /// Turn brush mode on
    pub fn enter(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.state != BrushState::Inactive {
            return;
        }
        shared.state = BrushState::Armed;
        drop(shared);

        info!("Brush mode on");
        self.publish_mode(true);
    }

    /// Turn brush mode off, remove the map's clause and reload the map
    /// unfiltered
    pub fn exit(&self) -> Result<(), SelectionError> {
        let mut shared = self.inner.shared.lock();
        if shared.state == BrushState::Inactive {
            return Ok(());
        }
        shared.state = BrushState::Inactive;
        Self::forget_pending(&mut shared);
        self.inner.store.clear(&self.inner.identity)?;
        drop(shared);

        info!("Brush mode off");
        self.inner.reload.reload_unfiltered();
        self.publish_mode(false);
        Ok(())
    }

    /// Hover at `(lon, lat)` using the runtime clock; schedules the
    /// submission when this hover opens a window
    pub fn hover(&self, lon: f64, lat: f64) {
        let now = Instant::now();
        if let Some(deadline) = self.hover_at(lon, lat, now) {
            let brush = self.clone();
            let generation = self.inner.shared.lock().generation;
            self.inner.runtime.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Err(err) = brush.flush_generation(deadline, Some(generation)) {
                    tracing::error!("Brush update rejected: {}", err);
                }
            });
        }
    }

    /// Record a hover at an explicit time without scheduling anything.
    /// Returns the flush time when a new window opened.
    pub fn hover_at(&self, lon: f64, lat: f64, now: Instant) -> Option<Instant> {
        if !lon.is_finite() || !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            debug!("Ignoring hover outside coordinate range ({}, {})", lon, lat);
            return None;
        }

        let mut shared = self.inner.shared.lock();
        if shared.state == BrushState::Inactive || !shared.sync {
            return None;
        }
        shared.throttle.offer((lon, lat), now)
    }

    /// Submit the pending anchor if its window has closed at `now`.
    /// Returns whether a clause was submitted.
    pub fn flush_at(&self, now: Instant) -> Result<bool, SelectionError> {
        self.flush_generation(now, None)
    }

    fn flush_generation(&self, now: Instant, generation: Option<u64>) -> Result<bool, SelectionError> {
        let mut shared = self.inner.shared.lock();
        if generation.is_some_and(|g| g != shared.generation) || shared.state == BrushState::Inactive || !shared.sync {
            return Ok(false);
        }
        let (lon, lat) = match shared.throttle.take_due(now) {
            Some(anchor) => anchor,
            None => return Ok(false),
        };

        shared.state = BrushState::Emitting;
        shared.anchor = Some((lon, lat));
        let radius_m = shared.radius_m;
        let predicate = self.inner.columns.circular_distance(lon, lat, radius_m);
        debug!("Brush at ({:.4}, {:.4}) radius {} m", lon, lat, radius_m);

        // Held across the update so an exit cannot slip in between
        let result = self
            .inner
            .store
            .update(&self.inner.identity, json!([lon, lat, radius_m]), Some(predicate));
        shared.state = BrushState::Armed;
        result.map(|_| true)
    }

    /// Enable or disable pushing hovers into the selection. Disabling while
    /// brushing removes the map's clause and reloads the map unfiltered.
    pub fn set_sync(&self, sync: bool) -> Result<(), SelectionError> {
        let mut shared = self.inner.shared.lock();
        if shared.sync == sync {
            return Ok(());
        }
        shared.sync = sync;
        if sync || shared.state == BrushState::Inactive {
            return Ok(());
        }
        Self::forget_pending(&mut shared);
        self.inner.store.clear(&self.inner.identity)?;
        drop(shared);

        self.inner.reload.reload_unfiltered();
        Ok(())
    }

    /// Set the radius used for subsequent hovers, clamped and snapped to
    /// the configured step. Returns the radius in effect.
    pub fn set_radius(&self, radius_m: f64) -> f64 {
        let radius_m = self.inner.config.normalize_radius(radius_m);
        self.inner.shared.lock().radius_m = radius_m;
        radius_m
    }

    pub fn state(&self) -> BrushState {
        self.inner.shared.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() != BrushState::Inactive
    }

    pub fn is_synced(&self) -> bool {
        self.inner.shared.lock().sync
    }

    pub fn radius(&self) -> f64 {
        self.inner.shared.lock().radius_m
    }

    /// Center of the last submitted brush
    pub fn anchor(&self) -> Option<(f64, f64)> {
        self.inner.shared.lock().anchor
    }

    fn forget_pending(shared: &mut BrushShared) {
        shared.generation += 1;
        shared.throttle.reset();
        shared.anchor = None;
    }

    fn publish_mode(&self, active: bool) {
        if let Some(events) = &self.inner.events {
            events.publish(BrushModeChanged { active });
        }
    }
}
