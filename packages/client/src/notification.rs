//! Notification Mediator.
//!
//! At most one notification is pending at a time: a newer `notificacion`
//! replaces whatever is being looked up or displayed.
//!
//! ```text
//! Idle ──receive──▶ AwaitingIssuerLookup ──lookup done──▶ Visible
//!   ▲                      │ dismiss                        │ accept / dismiss
//!   └──────────────────────┴────────────────────────────────┘
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    api::BackendApi,
    channel::Subscription,
    domain::{NotificationEvent, PostingId, UserId},
    notifier::{Toast, UserNotifier},
};

pub const FALLBACK_ISSUER_NAME: &str = "Company";
const APPLIED_TITLE: &str = "Application sent";
const APPLIED_DETAIL: &str = "The company will receive your request.";
const APPLY_FAILED_TITLE: &str = "Could not apply";
const APPLY_FAILED_FALLBACK: &str = "The application could not be sent";

/// Modal content
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationCard {
    pub issuer_id: UserId,
    pub issuer_name: String,
    pub issuer_photo: Option<String>,
    pub message: String,
    pub posting_id: PostingId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum MediatorState {
    #[default]
    Idle,
    AwaitingIssuerLookup {
        ticket: u64,
        notification: NotificationEvent,
    },
    Visible(NotificationCard),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Submitted,
    Failed(String),
}

pub struct NotificationMediator {
    api: Arc<dyn BackendApi>,
    notifier: Arc<dyn UserNotifier>,
    worker_id: Option<UserId>,
    state: watch::Sender<MediatorState>,
    next_ticket: AtomicU64,
}

impl NotificationMediator {
    pub fn new(
        api: Arc<dyn BackendApi>,
        notifier: Arc<dyn UserNotifier>,
        worker_id: Option<UserId>,
    ) -> Self {
        let (state, _) = watch::channel(MediatorState::Idle);
        Self {
            api,
            notifier,
            worker_id,
            state,
            next_ticket: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> MediatorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MediatorState> {
        self.state.subscribe()
    }

    /// Take in a notification and resolve its issuer in the background.
    ///
    /// A failed lookup still shows the card, with a placeholder issuer.
    pub fn receive(self: &Arc<Self>, notification: NotificationEvent) -> JoinHandle<()> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "Notification from issuer {} for posting {}",
            notification.issuer_id,
            notification.posting_id
        );
        self.state.send_replace(MediatorState::AwaitingIssuerLookup {
            ticket,
            notification: notification.clone(),
        });

        let this = self.clone();
        tokio::spawn(async move {
            let (issuer_name, issuer_photo) =
                match this.api.fetch_user(notification.issuer_id).await {
                    Ok(issuer) => (issuer.display_name(), issuer.photo_url),
                    Err(e) => {
                        tracing::warn!(
                            "Issuer lookup for {} failed: {}",
                            notification.issuer_id,
                            e
                        );
                        (FALLBACK_ISSUER_NAME.to_string(), None)
                    }
                };
            let card = NotificationCard {
                issuer_id: notification.issuer_id,
                issuer_name,
                issuer_photo,
                message: notification.message,
                posting_id: notification.posting_id,
            };

            let shown = this.state.send_if_modified(|state| match state {
                MediatorState::AwaitingIssuerLookup { ticket: pending, .. }
                    if *pending == ticket =>
                {
                    *state = MediatorState::Visible(card);
                    true
                }
                _ => false,
            });
            if !shown {
                tracing::debug!("Notification lookup {} superseded", ticket);
            }
        })
    }

    /// Decode a raw `notificacion` payload and receive it.
    pub fn receive_payload(self: &Arc<Self>, payload: Value) -> Option<JoinHandle<()>> {
        match serde_json::from_value::<NotificationEvent>(payload) {
            Ok(notification) => Some(self.receive(notification)),
            Err(e) => {
                tracing::warn!("Ignoring malformed notification: {}", e);
                None
            }
        }
    }

    /// Apply to the visible notification's posting.
    ///
    /// The modal closes before the request goes out, so the mediator is idle
    /// whatever the outcome. Returns `None` when nothing was visible.
    pub async fn accept(&self) -> Option<AcceptOutcome> {
        let mut accepted = None;
        self.state.send_if_modified(|state| {
            let MediatorState::Visible(card) = state else {
                return false;
            };
            accepted = Some(card.clone());
            *state = MediatorState::Idle;
            true
        });
        let card = accepted?;

        let Some(worker_id) = self.worker_id else {
            tracing::warn!("Cannot apply to posting {} without a user", card.posting_id);
            self.notifier
                .toast(Toast::error(APPLY_FAILED_TITLE, APPLY_FAILED_FALLBACK));
            return Some(AcceptOutcome::Failed(APPLY_FAILED_FALLBACK.to_string()));
        };

        match self.api.create_application(card.posting_id, worker_id).await {
            Ok(()) => {
                tracing::info!("Applied to posting {}", card.posting_id);
                self.notifier.toast(Toast::success(APPLIED_TITLE, APPLIED_DETAIL));
                Some(AcceptOutcome::Submitted)
            }
            Err(e) => {
                tracing::warn!("Application to posting {} failed: {}", card.posting_id, e);
                let message = e.user_message(APPLY_FAILED_FALLBACK);
                self.notifier
                    .toast(Toast::error(APPLY_FAILED_TITLE, message.clone()));
                Some(AcceptOutcome::Failed(message))
            }
        }
    }

    /// Close the modal without side effects. Returns whether anything was pending.
    pub fn dismiss(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == MediatorState::Idle {
                return false;
            }
            *state = MediatorState::Idle;
            true
        })
    }

    pub async fn run(self: Arc<Self>, mut notifications: Subscription, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                payload = notifications.recv() => {
                    let Some(payload) = payload else { break };
                    self.receive_payload(payload);
                }
            }
        }
    }
}
