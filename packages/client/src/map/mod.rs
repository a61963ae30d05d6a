//! Map screen state and the Proximity Reconciler feeding it.

mod reconciler;
mod store;

pub use reconciler::ProximityReconciler;
pub use store::{CameraTarget, MapState, MapStore, MarkerSelection, SelectionDetail};
