//! Observable map screen state.

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::{Coordinate, CounterpartMarker, NearbyEntity, PositionFix, User, UserId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTarget {
    pub center: Coordinate,
    pub zoom: u8,
}

/// Detail modal content for a tapped marker
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionDetail {
    Loading,
    Loaded(User),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSelection {
    pub user_id: UserId,
    pub detail: SelectionDetail,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapState {
    /// Where the camera was last animated to
    pub camera: Option<CameraTarget>,
    /// Number of camera animations since mount
    pub camera_moves: u32,
    /// Real-time counterparts; replaced wholesale on every snapshot
    pub markers: Vec<CounterpartMarker>,
    /// Last REST nearby snapshot
    pub nearby: Vec<NearbyEntity>,
    pub loading_nearby: bool,
    pub selection: Option<MarkerSelection>,
    pub last_fix: Option<PositionFix>,
}

/// Cloneable handle to the map state; renderers `subscribe` to changes.
#[derive(Clone)]
pub struct MapStore {
    state: Arc<watch::Sender<MapState>>,
}

impl Default for MapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MapStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(MapState::default());
        Self {
            state: Arc::new(sender),
        }
    }

    pub fn snapshot(&self) -> MapState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MapState> {
        self.state.subscribe()
    }

    /// Apply `update`; subscribers are notified only if it returns `true`.
    pub fn update_if(&self, update: impl FnOnce(&mut MapState) -> bool) -> bool {
        self.state.send_if_modified(update)
    }

    pub fn update(&self, update: impl FnOnce(&mut MapState)) {
        self.state.send_modify(update);
    }

    /// Replace the whole marker set.
    pub fn replace_markers(&self, markers: Vec<CounterpartMarker>) {
        self.update(|state| state.markers = markers);
    }

    pub fn animate_camera(&self, center: Coordinate, zoom: u8) {
        self.update(|state| {
            state.camera = Some(CameraTarget { center, zoom });
            state.camera_moves += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(id: u64) -> CounterpartMarker {
        CounterpartMarker {
            user_id: UserId::new(id),
            lat: 0.0,
            lng: 0.0,
        }
    }

    #[test]
    fn test_replace_markers_discards_previous_set() {
        // テスト項目: マーカーの置き換えで以前のマーカーは残らない
        // given (前提条件):
        let store = MapStore::new();
        store.replace_markers(vec![marker(1), marker(2)]);

        // when (操作):
        store.replace_markers(vec![marker(3)]);

        // then (期待する結果):
        assert_eq!(store.snapshot().markers, vec![marker(3)]);
    }

    #[test]
    fn test_animate_camera_counts_moves() {
        // テスト項目: カメラ移動の回数が記録される
        // given (前提条件):
        let store = MapStore::new();

        // when (操作):
        store.animate_camera(Coordinate::new(1.0, 2.0), 16);

        // then (期待する結果):
        let state = store.snapshot();
        assert_eq!(state.camera_moves, 1);
        assert_eq!(
            state.camera,
            Some(CameraTarget {
                center: Coordinate::new(1.0, 2.0),
                zoom: 16
            })
        );
    }

    #[tokio::test]
    async fn test_unmodified_update_does_not_notify() {
        // テスト項目: 変更なしの更新では購読者に通知されない
        // given (前提条件):
        let store = MapStore::new();
        let receiver = store.subscribe();

        // when (操作):
        let modified = store.update_if(|_| false);

        // then (期待する結果):
        assert!(!modified);
        assert!(!receiver.has_changed().unwrap());
    }
}
