//! Location Sampler: continuous device location updates.

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use mapsapp_shared::time::{Clock, SystemClock};

use crate::{
    domain::{Coordinate, PositionFix},
    error::LocationError,
    notifier::UserNotifier,
};

pub const PERMISSION_ALERT_TITLE: &str = "Location permission";
pub const PERMISSION_ALERT_MESSAGE: &str = "Enable it to see your location.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    /// Approximate location only; still usable
    Limited,
    Denied,
    Blocked,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted | PermissionStatus::Limited)
    }
}

/// Configuration of a continuous location watch
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Minimum movement in meters before a new fix is delivered
    pub distance_filter_m: f64,
    pub interval: Duration,
    pub fastest_interval: Duration,
    pub timeout: Duration,
    /// Cached fixes older than this are not delivered
    pub maximum_age: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: false,
            distance_filter_m: 10.0,
            interval: Duration::from_millis(6000),
            fastest_interval: Duration::from_millis(3000),
            timeout: Duration::from_millis(20000),
            maximum_age: Duration::from_millis(30000),
        }
    }
}

pub type FixStream = BoxStream<'static, Result<PositionFix, LocationError>>;

/// Device location capability.
///
/// Dropping the stream returned by `watch` clears the watch.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> PermissionStatus;

    fn watch(&self, options: &WatchOptions) -> Result<FixStream, LocationError>;
}

/// Forwards fixes from a `LocationProvider` watch to registered consumers.
pub struct LocationSampler {
    provider: Arc<dyn LocationProvider>,
    options: WatchOptions,
    consumers: Vec<mpsc::UnboundedSender<PositionFix>>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl LocationSampler {
    pub fn new(provider: Arc<dyn LocationProvider>, options: WatchOptions) -> Self {
        Self {
            provider,
            options,
            consumers: Vec::new(),
            running: None,
        }
    }

    /// Register a consumer. Register before `start`.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PositionFix> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.consumers.push(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Ask for permission and start watching.
    ///
    /// A denied permission is shown to the user and the sampler stays idle.
    pub async fn start(&mut self, notifier: &dyn UserNotifier) -> Result<(), LocationError> {
        if self.is_running() {
            return Ok(());
        }

        let permission = self.provider.request_permission().await;
        if !permission.is_granted() {
            tracing::info!("Location permission {:?}, sampler not started", permission);
            notifier.alert(PERMISSION_ALERT_TITLE, PERMISSION_ALERT_MESSAGE);
            return Err(LocationError::PermissionDenied);
        }

        let mut stream = self.provider.watch(&self.options)?;
        let consumers = self.consumers.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(fix)) => {
                            tracing::debug!(
                                "Fix {:.6},{:.6} (±{:.0} m)",
                                fix.latitude,
                                fix.longitude,
                                fix.accuracy
                            );
                            for consumer in &consumers {
                                consumer.send(fix).ok();
                            }
                        }
                        Some(Err(e)) => tracing::warn!("Location watch error: {}", e),
                        None => {
                            tracing::debug!("Location watch ended");
                            break;
                        }
                    },
                }
            }
        });

        tracing::info!("Location sampler started");
        self.running = Some((cancel, handle));
        Ok(())
    }

    /// Stop watching. Once this returns no further fix is delivered.
    pub async fn stop(&mut self) {
        if let Some((cancel, handle)) = self.running.take() {
            cancel.cancel();
            handle.await.ok();
            tracing::info!("Location sampler stopped");
        }
    }
}

impl Drop for LocationSampler {
    fn drop(&mut self) {
        if let Some((cancel, _)) = &self.running {
            cancel.cancel();
        }
    }
}

type FixSender = mpsc::UnboundedSender<Result<PositionFix, LocationError>>;

/// Location provider fed programmatically (route replay, tests).
///
/// Honors `distance_filter_m`; other watch options are accepted as-is.
pub struct SimulatedLocationProvider {
    permission: StdMutex<PermissionStatus>,
    active: StdMutex<Option<FixSender>>,
    clock: Arc<dyn Clock>,
}

impl SimulatedLocationProvider {
    pub fn new(permission: PermissionStatus) -> Self {
        Self::with_clock(permission, Arc::new(SystemClock))
    }

    pub fn with_clock(permission: PermissionStatus, clock: Arc<dyn Clock>) -> Self {
        Self {
            permission: StdMutex::new(permission),
            active: StdMutex::new(None),
            clock,
        }
    }

    pub fn set_permission(&self, permission: PermissionStatus) {
        if let Ok(mut current) = self.permission.lock() {
            *current = permission;
        }
    }

    /// Whether a watch is currently consuming fixes.
    pub fn is_watching(&self) -> bool {
        self.active
            .lock()
            .map(|active| active.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    /// Inject a fix at `coordinate`. Returns `false` when nobody is watching.
    pub fn push_fix(&self, coordinate: Coordinate) -> bool {
        self.push(Ok(PositionFix {
            latitude: coordinate.lat,
            longitude: coordinate.lng,
            timestamp: self.clock.now_millis(),
            accuracy: 5.0,
        }))
    }

    pub fn push_error(&self, error: LocationError) -> bool {
        self.push(Err(error))
    }

    fn push(&self, item: Result<PositionFix, LocationError>) -> bool {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(|tx| tx.send(item).is_ok()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocationProvider {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission
            .lock()
            .map(|permission| *permission)
            .unwrap_or(PermissionStatus::Denied)
    }

    fn watch(&self, options: &WatchOptions) -> Result<FixStream, LocationError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.active
            .lock()
            .map_err(|e| LocationError::ProviderUnavailable(e.to_string()))?
            .replace(tx);

        let distance_filter_m = options.distance_filter_m;
        let mut last_delivered: Option<Coordinate> = None;
        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).filter(move |item| {
            let deliver = match item {
                Ok(fix) => {
                    let coordinate = fix.coordinate();
                    let moved = last_delivered
                        .is_none_or(|last| last.distance_m(&coordinate) >= distance_filter_m);
                    if moved {
                        last_delivered = Some(coordinate);
                    }
                    moved
                }
                Err(_) => true,
            };
            futures_util::future::ready(deliver)
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;
    use mapsapp_shared::time::FixedClock;

    fn create_sampler(
        permission: PermissionStatus,
    ) -> (LocationSampler, Arc<SimulatedLocationProvider>) {
        let provider = Arc::new(SimulatedLocationProvider::with_clock(
            permission,
            Arc::new(FixedClock::new(1_700_000_000_000)),
        ));
        let sampler = LocationSampler::new(provider.clone(), WatchOptions::default());
        (sampler, provider)
    }

    #[tokio::test]
    async fn test_fixes_are_delivered_to_consumers() {
        // テスト項目: 位置情報がすべての購読者に配信される
        // given (前提条件):
        let (mut sampler, provider) = create_sampler(PermissionStatus::Granted);
        let mut first = sampler.subscribe();
        let mut second = sampler.subscribe();
        let notifier = RecordingNotifier::default();
        sampler.start(&notifier).await.unwrap();

        // when (操作):
        assert!(provider.push_fix(Coordinate::new(-12.046, -77.042)));

        // then (期待する結果):
        let fix = first.recv().await.unwrap();
        assert_eq!(fix.coordinate(), Coordinate::new(-12.046, -77.042));
        assert_eq!(fix.timestamp, 1_700_000_000_000);
        assert_eq!(second.recv().await.unwrap(), fix);
    }

    #[tokio::test]
    async fn test_permission_denied_alerts_and_never_starts() {
        // テスト項目: 権限が拒否された場合はアラートを出し開始しない
        // given (前提条件):
        let (mut sampler, provider) = create_sampler(PermissionStatus::Denied);
        let notifier = RecordingNotifier::default();

        // when (操作):
        let result = sampler.start(&notifier).await;

        // then (期待する結果):
        assert_eq!(result, Err(LocationError::PermissionDenied));
        assert!(!sampler.is_running());
        assert!(!provider.is_watching());
        assert_eq!(
            notifier.alerts(),
            vec![(
                PERMISSION_ALERT_TITLE.to_string(),
                PERMISSION_ALERT_MESSAGE.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_limited_permission_is_usable() {
        // テスト項目: LIMITED 権限でも開始できる
        // given (前提条件):
        let (mut sampler, _provider) = create_sampler(PermissionStatus::Limited);

        // when (操作):
        let result = sampler.start(&RecordingNotifier::default()).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(sampler.is_running());
    }

    #[tokio::test]
    async fn test_watch_errors_do_not_stop_the_sampler() {
        // テスト項目: 位置取得エラーの後も配信が続く
        // given (前提条件):
        let (mut sampler, provider) = create_sampler(PermissionStatus::Granted);
        let mut fixes = sampler.subscribe();
        sampler.start(&RecordingNotifier::default()).await.unwrap();

        // when (操作):
        provider.push_error(LocationError::Timeout);
        provider.push_fix(Coordinate::new(1.0, 1.0));

        // then (期待する結果):
        assert_eq!(fixes.recv().await.unwrap().coordinate(), Coordinate::new(1.0, 1.0));
        assert!(sampler.is_running());
    }

    #[tokio::test]
    async fn test_stop_clears_the_watch() {
        // テスト項目: 停止後は位置情報が配信されない
        // given (前提条件):
        let (mut sampler, provider) = create_sampler(PermissionStatus::Granted);
        let mut fixes = sampler.subscribe();
        sampler.start(&RecordingNotifier::default()).await.unwrap();

        // when (操作):
        sampler.stop().await;
        let accepted = provider.push_fix(Coordinate::new(1.0, 1.0));

        // then (期待する結果):
        assert!(!accepted);
        assert!(!provider.is_watching());
        assert!(fixes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_distance_filter_skips_small_moves() {
        // テスト項目: 距離フィルタ未満の移動は配信されない
        // given (前提条件):
        let (mut sampler, provider) = create_sampler(PermissionStatus::Granted);
        let mut fixes = sampler.subscribe();
        sampler.start(&RecordingNotifier::default()).await.unwrap();

        // when (操作):
        provider.push_fix(Coordinate::new(-12.0460, -77.042));
        provider.push_fix(Coordinate::new(-12.04601, -77.042)); // ~1 m
        provider.push_fix(Coordinate::new(-12.0470, -77.042)); // ~111 m

        // then (期待する結果):
        assert_eq!(fixes.recv().await.unwrap().latitude, -12.0460);
        assert_eq!(fixes.recv().await.unwrap().latitude, -12.0470);
    }
}
