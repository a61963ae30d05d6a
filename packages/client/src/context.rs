//! Shared Location Context.
//!
//! `LocationContext` owns the state; consumers hold `LocationHandle`s. A handle
//! used after its provider is gone fails with `ContextError::OutsideProvider`
//! instead of silently reading a default.

use std::sync::{Arc, Weak};

use tokio::sync::watch;

use crate::{
    domain::{Coordinate, LocationState, SearchRadius},
    error::ContextError,
};

/// Owner of the shared `{lat, lng, radius}` state.
pub struct LocationContext {
    state: Arc<watch::Sender<LocationState>>,
}

impl LocationContext {
    /// Provide a fresh context with the default state.
    pub fn provide() -> Self {
        Self::with_state(LocationState::default())
    }

    pub fn with_state(state: LocationState) -> Self {
        let (sender, _) = watch::channel(state);
        Self {
            state: Arc::new(sender),
        }
    }

    pub fn handle(&self) -> LocationHandle {
        LocationHandle {
            state: Arc::downgrade(&self.state),
        }
    }
}

/// Consumer-side access to the shared location state
#[derive(Clone)]
pub struct LocationHandle {
    state: Weak<watch::Sender<LocationState>>,
}

impl LocationHandle {
    fn sender(&self) -> Result<Arc<watch::Sender<LocationState>>, ContextError> {
        self.state.upgrade().ok_or(ContextError::OutsideProvider)
    }

    pub fn get(&self) -> Result<LocationState, ContextError> {
        Ok(*self.sender()?.borrow())
    }

    /// Replace the whole state.
    pub fn set(&self, state: LocationState) -> Result<(), ContextError> {
        self.sender()?.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        Ok(())
    }

    /// Functional update; fields the closure leaves alone are kept.
    ///
    /// Returns the state after the update.
    pub fn update(
        &self,
        apply: impl FnOnce(&mut LocationState),
    ) -> Result<LocationState, ContextError> {
        let sender = self.sender()?;
        sender.send_if_modified(|current| {
            let before = *current;
            apply(current);
            *current != before
        });
        let state = *sender.borrow();
        Ok(state)
    }

    pub fn set_position(&self, coordinate: Coordinate) -> Result<LocationState, ContextError> {
        self.update(|state| {
            state.lat = coordinate.lat;
            state.lng = coordinate.lng;
        })
    }

    pub fn set_radius(&self, radius: SearchRadius) -> Result<LocationState, ContextError> {
        self.update(|state| state.radius = radius)
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> Result<watch::Receiver<LocationState>, ContextError> {
        Ok(self.sender()?.subscribe())
    }
}
