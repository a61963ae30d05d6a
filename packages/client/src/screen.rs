//! Map screen orchestration.
//!
//! `MapScreen::mount` wires the pipeline for one visit of the map screen and
//! `MapScreen::teardown` undoes it: position watch stopped, pending timers
//! cancelled, channel handlers removed, channel lease released.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    api::BackendApi,
    channel::{
        ChannelLease, ConnectionManager, OutboundEvent, Subscription,
        events::{CONNECT, DISCONNECT, LOCATION_UPDATED, NEARBY_UPDATED, NOTIFICATION},
    },
    config::ClientConfig,
    context::LocationHandle,
    domain::{Coordinate, PositionFix, SearchRadius, User, UserId},
    error::ClientError,
    location::{LocationProvider, LocationSampler},
    map::{MapStore, ProximityReconciler},
    notification::{AcceptOutcome, NotificationMediator},
    notifier::UserNotifier,
    uplink::ThrottledUplink,
};

/// Collaborators shared across screen visits
#[derive(Clone)]
pub struct MapScreenDeps {
    pub api: Arc<dyn BackendApi>,
    pub channel: Arc<ConnectionManager>,
    pub provider: Arc<dyn LocationProvider>,
    pub notifier: Arc<dyn UserNotifier>,
    pub context: LocationHandle,
}

pub struct MapScreen {
    user: Option<User>,
    context: LocationHandle,
    map: MapStore,
    reconciler: Arc<ProximityReconciler>,
    mediator: Arc<NotificationMediator>,
    sampler: LocationSampler,
    lease: Option<ChannelLease>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    camera_zoom: u8,
}

impl MapScreen {
    /// Mount the screen for `user`.
    ///
    /// Channel or permission failures are reported and the screen mounts
    /// anyway with the affected feature inactive.
    pub async fn mount(deps: MapScreenDeps, config: &ClientConfig, user: Option<User>) -> Self {
        let MapScreenDeps {
            api,
            channel,
            provider,
            notifier,
            context,
        } = deps;

        // Handlers are registered before connecting so the first `connect`
        // event is not missed.
        let nearby_updates = channel.subscribe(NEARBY_UPDATED);
        let location_updates = channel.subscribe(LOCATION_UPDATED);
        let notifications = channel.subscribe(NOTIFICATION);
        let connects = channel.subscribe(CONNECT);
        let disconnects = channel.subscribe(DISCONNECT);

        let already_connected = channel.is_connected();
        let lease = match channel.acquire().await {
            Ok(lease) => Some(lease),
            Err(e) => {
                tracing::warn!("Real-time channel unavailable: {}", e);
                None
            }
        };
        if already_connected && let Some(user) = &user {
            join(&channel, user.id).await;
        }

        let map = MapStore::new();
        let reconciler = Arc::new(ProximityReconciler::new(
            api.clone(),
            channel.clone(),
            context.clone(),
            map.clone(),
            notifier.clone(),
            config.region_debounce,
        ));
        let mediator = Arc::new(NotificationMediator::new(
            api,
            notifier.clone(),
            user.as_ref().map(|user| user.id),
        ));

        let mut sampler = LocationSampler::new(provider, config.watch_options.clone());
        let fixes = sampler.subscribe();
        if let Err(e) = sampler.start(notifier.as_ref()).await {
            tracing::info!("Map mounted without location: {}", e);
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let uplink = ThrottledUplink::new(
            channel.clone(),
            context.clone(),
            user.clone(),
            config.throttle_window,
        );
        tasks.push(tokio::spawn(run_fix_loop(
            fixes,
            uplink,
            reconciler.clone(),
            context.clone(),
            config.camera_zoom,
            cancel.clone(),
        )));

        match context.subscribe() {
            Ok(location) => tasks.push(tokio::spawn(reconciler.clone().run(
                nearby_updates,
                location_updates,
                location,
                cancel.clone(),
            ))),
            Err(e) => tracing::warn!("Proximity updates disabled: {}", e),
        }

        tasks.push(tokio::spawn(
            mediator.clone().run(notifications, cancel.clone()),
        ));

        tasks.push(tokio::spawn(run_connection_events(
            channel,
            user.as_ref().map(|user| user.id),
            connects,
            disconnects,
            cancel.clone(),
        )));

        tracing::info!("Map screen mounted");
        Self {
            user,
            context,
            map,
            reconciler,
            mediator,
            sampler,
            lease,
            cancel,
            tasks,
            camera_zoom: config.camera_zoom,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn map(&self) -> &MapStore {
        &self.map
    }

    pub fn mediator(&self) -> &Arc<NotificationMediator> {
        &self.mediator
    }

    pub fn context(&self) -> &LocationHandle {
        &self.context
    }

    pub fn select_radius(&self, radius: SearchRadius) -> Result<(), ClientError> {
        self.context.set_radius(radius)?;
        Ok(())
    }

    pub fn tap_marker(&self, user_id: UserId) -> JoinHandle<()> {
        self.reconciler.select_marker(user_id)
    }

    pub fn close_marker_detail(&self) {
        self.reconciler.clear_selection();
    }

    pub fn region_changed(&self, center: Coordinate) {
        self.reconciler.region_changed(center);
    }

    /// Animate the camera back to the last fix. `false` when there is none yet.
    pub fn recenter(&self) -> bool {
        let Some(fix) = self.map.snapshot().last_fix else {
            return false;
        };
        self.map.animate_camera(fix.coordinate(), self.camera_zoom);
        true
    }

    pub async fn accept_notification(&self) -> Option<AcceptOutcome> {
        self.mediator.accept().await
    }

    pub fn dismiss_notification(&self) -> bool {
        self.mediator.dismiss()
    }

    /// Unmount the screen.
    pub async fn teardown(mut self) {
        self.sampler.stop().await;
        self.reconciler.shutdown();

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!("Map screen task failed: {}", e);
            }
        }

        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }
        tracing::info!("Map screen unmounted");
    }
}

impl Drop for MapScreen {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.reconciler.shutdown();
    }
}

async fn join(channel: &ConnectionManager, user_id: UserId) {
    if let Err(e) = channel.send(&OutboundEvent::join(user_id)).await {
        tracing::warn!("Failed to join as user {}: {}", user_id, e);
    }
}

async fn run_fix_loop(
    mut fixes: mpsc::UnboundedReceiver<PositionFix>,
    mut uplink: ThrottledUplink,
    reconciler: Arc<ProximityReconciler>,
    context: LocationHandle,
    camera_zoom: u8,
    cancel: CancellationToken,
) {
    loop {
        let fix = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fix = fixes.recv() => match fix {
                Some(fix) => fix,
                None => break,
            },
        };

        reconciler.map().update(|state| state.last_fix = Some(fix));
        let outcome = match uplink.on_fix(&fix).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Stopping fix handling: {}", e);
                break;
            }
        };

        if outcome.first_fix {
            let center = fix.coordinate();
            reconciler.map().animate_camera(center, camera_zoom);
            let radius = context.get().map(|state| state.radius).unwrap_or_default();
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.load_nearby(center, radius).await });
        }
    }
}

async fn run_connection_events(
    channel: Arc<ConnectionManager>,
    user_id: Option<UserId>,
    mut connects: Subscription,
    mut disconnects: Subscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            connected = connects.recv() => {
                if connected.is_none() {
                    break;
                }
                tracing::info!("Real-time channel connected");
                if let Some(user_id) = user_id {
                    join(&channel, user_id).await;
                }
            }
            disconnected = disconnects.recv() => {
                if disconnected.is_none() {
                    break;
                }
                tracing::info!("Real-time channel disconnected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::events::{FIND_NEARBY, JOIN, SHARE_LOCATION},
        context::LocationContext,
        domain::LocationState,
        location::{PERMISSION_ALERT_TITLE, PermissionStatus, SimulatedLocationProvider},
        notification::MediatorState,
        testing::{FakeBackend, RecordingNotifier, RecordingTransport, test_user},
    };
    use serde_json::json;

    // ========================================
    // 【何をテストするか】
    // - マウント時の接続・join 送信
    // - 位置情報の転送と初回のカメラ移動
    // - アンマウント時の 4 つのクリーンアップ
    // ========================================

    struct Fixture {
        deps: MapScreenDeps,
        config: ClientConfig,
        _context: LocationContext,
        transport: Arc<RecordingTransport>,
        backend: Arc<FakeBackend>,
        provider: Arc<SimulatedLocationProvider>,
        notifier: Arc<RecordingNotifier>,
    }

    fn create_fixture(permission: PermissionStatus) -> Fixture {
        let context = LocationContext::provide();
        let transport = Arc::new(RecordingTransport::new());
        let backend = Arc::new(FakeBackend::default());
        let provider = Arc::new(SimulatedLocationProvider::new(permission));
        let notifier = Arc::new(RecordingNotifier::default());
        let deps = MapScreenDeps {
            api: backend.clone(),
            channel: Arc::new(ConnectionManager::new(transport.clone())),
            provider: provider.clone(),
            notifier: notifier.clone(),
            context: context.handle(),
        };
        Fixture {
            deps,
            config: ClientConfig::default(),
            _context: context,
            transport,
            backend,
            provider,
            notifier,
        }
    }

    async fn wait_for_camera_moves(screen: &MapScreen, moves: u32) {
        screen
            .map()
            .subscribe()
            .wait_for(|state| state.camera_moves == moves)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mount_connects_and_joins() {
        // テスト項目: マウントで接続し、connect 時に join を送信する
        // given (前提条件):
        let fixture = create_fixture(PermissionStatus::Granted);

        // when (操作):
        let screen =
            MapScreen::mount(fixture.deps.clone(), &fixture.config, Some(test_user(3, Some(1))))
                .await;
        fixture.transport.wait_for_sent(JOIN, 1).await;

        // then (期待する結果):
        assert!(fixture.deps.channel.is_connected());
        assert_eq!(fixture.deps.channel.lease_count(), 1);
        assert_eq!(fixture.transport.sent_named(JOIN), vec![json!({"userId": 3})]);
        screen.teardown().await;
    }

    #[tokio::test]
    async fn test_first_fix_recenters_once_and_loads_nearby() {
        // テスト項目: 最初の位置情報でのみカメラが移動し、近隣一覧が読み込まれる
        // given (前提条件):
        let fixture = create_fixture(PermissionStatus::Granted);
        let screen =
            MapScreen::mount(fixture.deps.clone(), &fixture.config, Some(test_user(3, Some(1))))
                .await;

        // when (操作):
        assert!(fixture.provider.push_fix(Coordinate::new(-12.0, -77.0)));
        wait_for_camera_moves(&screen, 1).await;
        assert!(fixture.provider.push_fix(Coordinate::new(-12.01, -77.0)));
        screen
            .map()
            .subscribe()
            .wait_for(|state| state.last_fix.is_some_and(|fix| fix.latitude == -12.01))
            .await
            .unwrap();

        // then (期待する結果):
        let state = screen.map().snapshot();
        assert_eq!(state.camera_moves, 1);
        assert_eq!(state.camera.unwrap().center, Coordinate::new(-12.0, -77.0));
        assert_eq!(state.camera.unwrap().zoom, 16);
        assert_eq!(fixture.transport.sent_named(SHARE_LOCATION).len(), 1);
        screen.teardown().await;
        assert_eq!(
            fixture.backend.nearby_calls(),
            vec![(Coordinate::new(-12.0, -77.0), SearchRadius::Km5)]
        );
    }

    #[tokio::test]
    async fn test_searcher_fix_queries_nearby_with_selected_radius() {
        // テスト項目: 探索者の位置情報は選択中の半径で近隣検索として送られる
        // given (前提条件):
        let fixture = create_fixture(PermissionStatus::Granted);
        let screen =
            MapScreen::mount(fixture.deps.clone(), &fixture.config, Some(test_user(4, Some(2))))
                .await;
        tokio::task::yield_now().await;
        screen.select_radius(SearchRadius::Km20).unwrap();
        fixture.transport.wait_for_sent(FIND_NEARBY, 1).await;

        // when (操作):
        fixture.provider.push_fix(Coordinate::new(1.0, 2.0));
        fixture.transport.wait_for_sent(FIND_NEARBY, 2).await;

        // then (期待する結果):
        let sent = fixture.transport.sent_named(FIND_NEARBY);
        assert_eq!(sent[1], json!({"lat": 1.0, "lng": 2.0, "radio": 20}));
        assert_eq!(screen.context().get().unwrap().radius, SearchRadius::Km20);
        screen.teardown().await;
    }

    #[tokio::test]
    async fn test_radius_change_bypasses_closed_throttle_gate() {
        // テスト項目: 転送直後でスロットルが閉じていても、半径の変更は即座に近隣検索を送る
        // given (前提条件):
        let fixture = create_fixture(PermissionStatus::Granted);
        let screen =
            MapScreen::mount(fixture.deps.clone(), &fixture.config, Some(test_user(4, Some(2))))
                .await;
        tokio::task::yield_now().await;
        let started = tokio::time::Instant::now();
        fixture.provider.push_fix(Coordinate::new(1.0, 2.0));
        fixture.transport.wait_for_sent(FIND_NEARBY, 1).await;

        // when (操作):
        screen.select_radius(SearchRadius::Km10).unwrap();
        fixture.transport.wait_for_sent(FIND_NEARBY, 2).await;

        // then (期待する結果):
        assert!(started.elapsed() < fixture.config.throttle_window);
        let sent = fixture.transport.sent_named(FIND_NEARBY);
        assert_eq!(sent[0], json!({"lat": 1.0, "lng": 2.0, "radio": 5}));
        assert_eq!(sent[1], json!({"lat": 1.0, "lng": 2.0, "radio": 10}));
        screen.teardown().await;
    }

    #[tokio::test]
    async fn test_denied_permission_still_mounts() {
        // テスト項目: 位置情報が拒否されてもアラートを出して画面は動作する
        // given (前提条件):
        let fixture = create_fixture(PermissionStatus::Denied);

        // when (操作):
        let screen =
            MapScreen::mount(fixture.deps.clone(), &fixture.config, Some(test_user(3, Some(1))))
                .await;

        // then (期待する結果):
        let alerts = fixture.notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, PERMISSION_ALERT_TITLE);
        assert!(!fixture.provider.push_fix(Coordinate::new(1.0, 1.0)));
        assert!(fixture.deps.channel.is_connected());
        screen.teardown().await;
    }

    #[tokio::test]
    async fn test_recenter_requires_a_fix() {
        // テスト項目: 位置情報がなければ再センタリングしない
        // given (前提条件):
        let fixture = create_fixture(PermissionStatus::Granted);
        let screen = MapScreen::mount(fixture.deps.clone(), &fixture.config, None).await;
        assert!(!screen.recenter());

        // when (操作):
        fixture.provider.push_fix(Coordinate::new(5.0, 5.0));
        wait_for_camera_moves(&screen, 1).await;
        let recentered = screen.recenter();

        // then (期待する結果):
        assert!(recentered);
        assert_eq!(screen.map().snapshot().camera_moves, 2);
        screen.teardown().await;
    }

    #[tokio::test]
    async fn test_accept_notification_applies_as_current_user() {
        // テスト項目: 画面から通知を承諾すると現在のユーザーで応募する
        // given (前提条件):
        let fixture = create_fixture(PermissionStatus::Granted);
        fixture.backend.add_user(test_user(1, Some(2)));
        let screen =
            MapScreen::mount(fixture.deps.clone(), &fixture.config, Some(test_user(3, Some(1))))
                .await;
        fixture.transport.push(
            NOTIFICATION,
            json!({"empresaId": 1, "mensaje": "hola", "publicacionId": 7}),
        );
        screen
            .mediator()
            .subscribe()
            .wait_for(|state| matches!(state, MediatorState::Visible(_)))
            .await
            .unwrap();

        // when (操作):
        let outcome = screen.accept_notification().await;

        // then (期待する結果):
        assert_eq!(outcome, Some(AcceptOutcome::Submitted));
        assert_eq!(
            fixture.backend.created_applications(),
            vec![(crate::domain::PostingId::new(7), UserId::new(3))]
        );
        screen.teardown().await;
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        // テスト項目: アンマウント後は位置情報もイベントも一切処理されない
        // given (前提条件):
        let fixture = create_fixture(PermissionStatus::Granted);
        let channel = fixture.deps.channel.clone();
        let context = fixture.deps.context.clone();
        let screen =
            MapScreen::mount(fixture.deps.clone(), &fixture.config, Some(test_user(3, Some(1))))
                .await;
        let map = screen.map().clone();
        screen.region_changed(Coordinate::new(9.0, 9.0));

        // when (操作):
        screen.teardown().await;
        let accepted = fixture.provider.push_fix(Coordinate::new(1.0, 1.0));
        fixture
            .transport
            .push(NEARBY_UPDATED, json!([{"userId": 1, "lat": 1, "lng": 1}]));
        tokio::time::sleep(std::time::Duration::from_millis(700)).await;

        // then (期待する結果):
        assert!(!accepted);
        for event in [NEARBY_UPDATED, LOCATION_UPDATED, NOTIFICATION, CONNECT, DISCONNECT] {
            assert_eq!(channel.subscriber_count(event), 0, "{}", event);
        }
        assert_eq!(channel.lease_count(), 0);
        assert!(!channel.is_connected());
        assert_eq!(fixture.transport.close_count(), 1);
        assert_eq!(fixture.transport.sent_named(SHARE_LOCATION).len(), 0);
        assert_eq!(context.get().unwrap(), LocationState::default());
        assert!(fixture.backend.nearby_calls().is_empty());
        assert!(map.snapshot().markers.is_empty());
    }
}
