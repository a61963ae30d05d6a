//! Hand-written fakes shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Notify, watch};

use crate::{
    api::{BackendApi, LoginResponse, NotifyNearbyRequest},
    channel::{
        InboundEvent, Transport,
        transport::{AckSender, InboundSink},
    },
    domain::{
        Application, ApplicationId, Coordinate, GeoPoint, NearbyEntity, PostingId, RoleRecord,
        SearchRadius, User, UserId,
    },
    error::{ApiError, ChannelError},
    notifier::{Toast, UserNotifier},
};

pub fn test_user(id: u64, role_id: Option<u32>) -> User {
    User {
        id: UserId::new(id),
        name: format!("User{}", id),
        last_name: Some("Tester".to_string()),
        email: Some(format!("user{}@example.com", id)),
        photo_url: Some(format!("https://example.com/photos/{}.png", id)),
        description: None,
        roles: role_id
            .map(|role_id| {
                vec![RoleRecord {
                    id: role_id,
                    name: format!("role{}", role_id),
                }]
            })
            .unwrap_or_default(),
    }
}

pub fn nearby_entity(id: &str, position: Coordinate) -> NearbyEntity {
    NearbyEntity {
        id: id.to_string(),
        name: Some(id.to_string()),
        last_name: None,
        description: None,
        photo_url: None,
        rating: Some(4.5),
        active: Some(true),
        location: GeoPoint {
            kind: "Point".to_string(),
            coordinates: [position.lng, position.lat],
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentEvent {
    pub name: String,
    pub payload: Value,
    pub with_ack: bool,
}

/// In-memory transport: records sends, acknowledges immediately (unless
/// `hold_acks`) and lets tests push inbound events.
pub struct RecordingTransport {
    inbound: Mutex<Option<InboundSink>>,
    sent: Mutex<Vec<SentEvent>>,
    sent_count: watch::Sender<usize>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_next_open: AtomicBool,
    hold_acks: AtomicBool,
    held: Mutex<Vec<AckSender>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        let (sent_count, _) = watch::channel(0);
        Self {
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            sent_count,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_next_open: AtomicBool::new(false),
            hold_acks: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_named(&self, name: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|event| event.name == name)
            .map(|event| event.payload)
            .collect()
    }

    /// Wait until at least `count` events named `name` were sent.
    pub async fn wait_for_sent(&self, name: &str, count: usize) {
        let mut receiver = self.sent_count.subscribe();
        receiver
            .wait_for(|_| self.sent_named(name).len() >= count)
            .await
            .unwrap();
    }

    /// Deliver an event as if the server had sent it.
    pub fn push(&self, name: &str, payload: Value) {
        if let Some(sink) = self.inbound.lock().unwrap().as_ref() {
            let _ = sink.send(InboundEvent::new(name, payload));
        }
    }

    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Keep ack senders instead of answering, like a backend that never acks.
    pub fn hold_acks(&self) {
        self.hold_acks.store(true, Ordering::SeqCst);
    }

    pub fn held_acks(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Held acks whose requester is still waiting
    pub fn awaited_acks(&self) -> usize {
        self.held
            .lock()
            .unwrap()
            .iter()
            .filter(|ack| !ack.is_closed())
            .count()
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        if let Some(sink) = self.inbound.lock().unwrap().take() {
            let _ = sink.send(InboundEvent::disconnected());
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn open(&self, inbound: InboundSink) -> Result<(), ChannelError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(ChannelError::ConnectionFailed("refused".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let _ = inbound.send(InboundEvent::connected());
        *self.inbound.lock().unwrap() = Some(inbound);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(sink) = self.inbound.lock().unwrap().take() {
            let _ = sink.send(InboundEvent::disconnected());
        }
    }

    async fn send(
        &self,
        event: &str,
        payload: Value,
        ack: Option<AckSender>,
    ) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(SentEvent {
            name: event.to_string(),
            payload,
            with_ack: ack.is_some(),
        });
        self.sent_count.send_modify(|count| *count += 1);
        if let Some(ack) = ack {
            if self.hold_acks.load(Ordering::SeqCst) {
                self.held.lock().unwrap().push(ack);
            } else {
                let _ = ack.send(json!({"ok": true}));
            }
        }
        Ok(())
    }
}

/// Notifier that keeps everything it was asked to show
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<(String, String)>>,
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<(String, String)> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().unwrap().clone()
    }
}

impl UserNotifier for RecordingNotifier {
    fn alert(&self, title: &str, message: &str) {
        self.alerts
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }

    fn toast(&self, toast: Toast) {
        self.toasts.lock().unwrap().push(toast);
    }
}

/// Backend with canned data. `gate_user` holds profile lookups of one user
/// until `release_user`.
#[derive(Default)]
pub struct FakeBackend {
    users: Mutex<HashMap<UserId, User>>,
    gates: Mutex<HashMap<UserId, Arc<Notify>>>,
    login_as: Mutex<Option<User>>,
    nearby: Mutex<Vec<NearbyEntity>>,
    nearby_calls: Mutex<Vec<(Coordinate, SearchRadius)>>,
    created: Mutex<Vec<(PostingId, UserId)>>,
    applications: Mutex<Vec<Application>>,
    accepted: Mutex<Vec<(ApplicationId, UserId)>>,
    notified: Mutex<Vec<NotifyNearbyRequest>>,
}

impl FakeBackend {
    pub fn add_user(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn gate_user(&self, user_id: UserId) {
        self.gates
            .lock()
            .unwrap()
            .insert(user_id, Arc::new(Notify::new()));
    }

    pub fn release_user(&self, user_id: UserId) {
        if let Some(gate) = self.gates.lock().unwrap().remove(&user_id) {
            gate.notify_one();
        }
    }

    pub fn set_login(&self, user: User) {
        *self.login_as.lock().unwrap() = Some(user);
    }

    pub fn set_nearby(&self, entities: Vec<NearbyEntity>) {
        *self.nearby.lock().unwrap() = entities;
    }

    pub fn nearby_calls(&self) -> Vec<(Coordinate, SearchRadius)> {
        self.nearby_calls.lock().unwrap().clone()
    }

    pub fn created_applications(&self) -> Vec<(PostingId, UserId)> {
        self.created.lock().unwrap().clone()
    }

    pub fn set_applications(&self, applications: Vec<Application>) {
        *self.applications.lock().unwrap() = applications;
    }

    pub fn accepted_applications(&self) -> Vec<(ApplicationId, UserId)> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn notify_requests(&self) -> Vec<NotifyNearbyRequest> {
        self.notified.lock().unwrap().clone()
    }
}

fn not_found() -> ApiError {
    ApiError::Status {
        status: 404,
        message: Some("Not found".to_string()),
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn login(&self, _dni: &str, _password: &str) -> Result<LoginResponse, ApiError> {
        match self.login_as.lock().unwrap().clone() {
            Some(user) => Ok(LoginResponse {
                token: Some("token".to_string()),
                user: Some(user),
            }),
            None => Err(ApiError::Status {
                status: 401,
                message: Some("Credenciales inválidas".to_string()),
            }),
        }
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<User, ApiError> {
        let gate = self.gates.lock().unwrap().get(&user_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn fetch_nearby(
        &self,
        center: Coordinate,
        radius: SearchRadius,
    ) -> Result<Vec<NearbyEntity>, ApiError> {
        self.nearby_calls.lock().unwrap().push((center, radius));
        Ok(self.nearby.lock().unwrap().clone())
    }

    async fn create_application(
        &self,
        posting_id: PostingId,
        worker_id: UserId,
    ) -> Result<(), ApiError> {
        self.created.lock().unwrap().push((posting_id, worker_id));
        Ok(())
    }

    async fn applications_for_posting(
        &self,
        posting_id: PostingId,
    ) -> Result<Vec<Application>, ApiError> {
        Ok(self
            .applications
            .lock()
            .unwrap()
            .iter()
            .filter(|application| {
                application
                    .posting
                    .as_ref()
                    .is_none_or(|posting| posting.id == posting_id)
            })
            .cloned()
            .collect())
    }

    async fn accept_application(
        &self,
        application_id: ApplicationId,
        issuer_id: UserId,
    ) -> Result<(), ApiError> {
        self.accepted
            .lock()
            .unwrap()
            .push((application_id, issuer_id));
        Ok(())
    }

    async fn notify_nearby(&self, request: &NotifyNearbyRequest) -> Result<(), ApiError> {
        self.notified.lock().unwrap().push(request.clone());
        Ok(())
    }
}
