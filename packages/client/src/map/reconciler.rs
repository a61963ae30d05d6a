//! Proximity Reconciler.
//!
//! The backend is the source of truth for who is near: every
//! `cercanosActualizados` payload replaces the marker set, nothing is merged.

use std::{
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    api::BackendApi,
    channel::{ConnectionManager, OutboundEvent, Subscription},
    context::LocationHandle,
    domain::{Coordinate, CounterpartMarker, LocationState, SearchRadius, UserId},
    error::ClientError,
    notifier::{Toast, UserNotifier},
};

use super::store::{MapStore, MarkerSelection, SelectionDetail};

const PROFILE_ERROR_TITLE: &str = "Could not load profile";
const PROFILE_ERROR_FALLBACK: &str = "The profile could not be loaded";

pub struct ProximityReconciler {
    api: Arc<dyn BackendApi>,
    channel: Arc<ConnectionManager>,
    context: LocationHandle,
    map: MapStore,
    notifier: Arc<dyn UserNotifier>,
    region_debounce: Duration,
    selection_generation: AtomicU64,
    nearby_generation: AtomicU64,
    debounce: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ProximityReconciler {
    pub fn new(
        api: Arc<dyn BackendApi>,
        channel: Arc<ConnectionManager>,
        context: LocationHandle,
        map: MapStore,
        notifier: Arc<dyn UserNotifier>,
        region_debounce: Duration,
    ) -> Self {
        Self {
            api,
            channel,
            context,
            map,
            notifier,
            region_debounce,
            selection_generation: AtomicU64::new(0),
            nearby_generation: AtomicU64::new(0),
            debounce: StdMutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn map(&self) -> &MapStore {
        &self.map
    }

    /// Replace the marker set with a `cercanosActualizados` payload.
    ///
    /// A malformed payload leaves the current markers untouched.
    pub fn apply_snapshot(&self, payload: Value) -> Result<usize, serde_json::Error> {
        let markers: Vec<CounterpartMarker> = serde_json::from_value(payload)?;
        let count = markers.len();
        self.map.replace_markers(markers);
        tracing::debug!("Nearby snapshot applied: {} marker(s)", count);
        Ok(count)
    }

    /// Emit `buscarCercanosTiempoReal` for the current context, outside the
    /// uplink throttle.
    pub async fn request_nearby_now(&self) -> Result<(), ClientError> {
        let state = self.context.get()?;
        let event = OutboundEvent::find_nearby(state.lat, state.lng, state.radius);
        self.channel.send(&event).await?;
        Ok(())
    }

    /// Consume channel events and radius changes until `cancel` fires.
    ///
    /// The subscriptions are dropped (and thereby unregistered) on return.
    pub async fn run(
        self: Arc<Self>,
        mut nearby_updates: Subscription,
        mut location_updates: Subscription,
        mut location: watch::Receiver<LocationState>,
        cancel: CancellationToken,
    ) {
        let mut last_radius = location.borrow_and_update().radius;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                payload = nearby_updates.recv() => {
                    let Some(payload) = payload else { break };
                    if let Err(e) = self.apply_snapshot(payload) {
                        tracing::warn!("Ignoring malformed nearby snapshot: {}", e);
                    }
                }
                payload = location_updates.recv() => {
                    let Some(payload) = payload else { break };
                    tracing::debug!("Location update received: {}", payload);
                }
                changed = location.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Location context gone, reconciler stopping");
                        break;
                    }
                    let radius = location.borrow_and_update().radius;
                    if radius != last_radius {
                        last_radius = radius;
                        tracing::info!("Radius changed to {}, refreshing nearby", radius);
                        if let Err(e) = self.request_nearby_now().await {
                            tracing::warn!("Failed to request nearby counterparts: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Open the detail modal for a tapped marker and fetch the profile.
    ///
    /// Only the newest tap's response is applied.
    pub fn select_marker(self: &Arc<Self>, user_id: UserId) -> JoinHandle<()> {
        let generation = self.selection_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.map.update(|state| {
            state.selection = Some(MarkerSelection {
                user_id,
                detail: SelectionDetail::Loading,
            })
        });

        let this = self.clone();
        tokio::spawn(async move {
            let result = this.api.fetch_user(user_id).await;

            let detail = match result {
                Ok(user) => SelectionDetail::Loaded(user),
                Err(e) => {
                    tracing::warn!("Failed to load profile of user {}: {}", user_id, e);
                    SelectionDetail::Failed(e.user_message(PROFILE_ERROR_FALLBACK))
                }
            };
            let failure = match &detail {
                SelectionDetail::Failed(message) => Some(message.clone()),
                _ => None,
            };

            let applied = this.map.update_if(|state| {
                if this.selection_generation.load(Ordering::SeqCst) != generation {
                    return false;
                }
                state.selection = Some(MarkerSelection { user_id, detail });
                true
            });

            if !applied {
                tracing::debug!("Discarded stale profile response for user {}", user_id);
            } else if let Some(message) = failure {
                this.notifier.toast(Toast::error(PROFILE_ERROR_TITLE, message));
            }
        })
    }

    /// Close the detail modal; an in-flight fetch is discarded.
    pub fn clear_selection(&self) {
        self.selection_generation.fetch_add(1, Ordering::SeqCst);
        self.map.update_if(|state| state.selection.take().is_some());
    }

    /// Load the REST nearby snapshot around `center`.
    ///
    /// Only the newest request lands, and nothing lands after `shutdown`.
    pub async fn load_nearby(&self, center: Coordinate, radius: SearchRadius) {
        let generation = self.nearby_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.map.update(|state| state.loading_nearby = true);

        let result = self.api.fetch_nearby(center, radius).await;

        self.map.update_if(|state| {
            if self.closed.load(Ordering::SeqCst)
                || self.nearby_generation.load(Ordering::SeqCst) != generation
            {
                return false;
            }
            match result {
                Ok(items) => {
                    tracing::debug!("Loaded {} nearby entities", items.len());
                    state.nearby = items;
                }
                Err(e) => tracing::warn!("Failed to load nearby entities: {}", e),
            }
            state.loading_nearby = false;
            true
        });
    }

    /// Debounced reaction to the user panning the map.
    ///
    /// After the quiet period the context moves to `center` (radius kept)
    /// and the REST snapshot is reloaded.
    pub fn region_changed(self: &Arc<Self>, center: Coordinate) {
        let Ok(mut debounce) = self.debounce.lock() else {
            return;
        };
        if let Some(pending) = debounce.take() {
            pending.abort();
        }
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let this = self.clone();
        let delay = self.region_debounce;
        *debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.closed.load(Ordering::SeqCst) {
                return;
            }
            match this.context.set_position(center) {
                Ok(state) => this.load_nearby(center, state.radius).await,
                Err(e) => tracing::warn!("Region change ignored: {}", e),
            }
        }));
    }

    /// Cancel the pending debounce timer and discard in-flight responses.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut debounce) = self.debounce.lock()
            && let Some(pending) = debounce.take()
        {
            pending.abort();
        }
        self.selection_generation.fetch_add(1, Ordering::SeqCst);
        self.nearby_generation.fetch_add(1, Ordering::SeqCst);
    }
}
