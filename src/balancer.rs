//! Smooth weighted round-robin load balancing.
//!
//! Each route owns one [`LoadBalancer`]. Every registered backend carries a
//! current-weight accumulator that persists across selections. A selection
//! round adds each alive backend's weight to its accumulator, picks the
//! largest accumulator and subtracts the round's total alive weight from it,
//! which spreads picks evenly instead of bursting to the heaviest backend.

use crate::{backend::Backend, GatewayError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// A registered backend and its accumulator.
#[derive(Debug)]
struct Slot {
    backend: Arc<Backend>,
    current_weight: i64,
}

/// Weighted backend selector for a single route.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    /// Backends in registration order; guarded as a whole
    slots: Mutex<Vec<Slot>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a balancer over `backends`, keeping their order.
    pub fn with_backends<I>(backends: I) -> Result<Self>
    where
        I: IntoIterator<Item = Backend>,
    {
        let balancer = Self::new();
        for backend in backends {
            balancer.add_backend(Arc::new(backend))?;
        }
        Ok(balancer)
    }

    /// Register a backend at the end of the rotation with a zero accumulator.
    pub fn add_backend(&self, backend: Arc<Backend>) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.iter().any(|slot| slot.backend.name() == backend.name()) {
            return Err(GatewayError::DuplicateBackend {
                backend: backend.name().to_string(),
            });
        }
        slots.push(Slot {
            backend,
            current_weight: 0,
        });
        Ok(())
    }

    /// Remove the backend called `name` together with its accumulator.
    ///
    /// Returns the removed backend; removing an unknown name is a no-op.
    pub fn remove_backend(&self, name: &str) -> Option<Arc<Backend>> {
        let mut slots = self.slots.lock();
        let position = slots.iter().position(|slot| slot.backend.name() == name)?;
        Some(slots.remove(position).backend)
    }

    /// Pick the next backend, or `None` when no backend is alive.
    pub fn select_backend(&self) -> Option<Arc<Backend>> {
        let mut slots = self.slots.lock();
        if slots.is_empty() {
            return None;
        }

        let mut sum_weight: i64 = 0;
        // (index, accumulator) of the best candidate so far
        let mut chosen: Option<(usize, i64)> = None;

        for (idx, slot) in slots.iter_mut().enumerate() {
            if !slot.backend.is_alive() {
                continue;
            }

            let weight = i64::from(slot.backend.weight());
            slot.current_weight += weight;
            sum_weight += weight;

            // Strict comparison keeps the first backend on ties.
            if chosen.map_or(true, |(_, best)| slot.current_weight > best) {
                chosen = Some((idx, slot.current_weight));
            }
        }

        let (idx, _) = chosen?;
        let slot = &mut slots[idx];
        slot.current_weight -= sum_weight;
        Some(slot.backend.clone())
    }

    /// Snapshot of the registered backends in rotation order.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.slots.lock().iter().map(|slot| slot.backend.clone()).collect()
    }

    /// Snapshot of `(name, accumulator)` pairs in rotation order.
    pub fn current_weights(&self) -> Vec<(String, i64)> {
        self.slots
            .lock()
            .iter()
            .map(|slot| (slot.backend.name().to_string(), slot.current_weight))
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Backend>> {
        self.slots
            .lock()
            .iter()
            .find(|slot| slot.backend.name() == name)
            .map(|slot| slot.backend.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
