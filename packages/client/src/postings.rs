//! Posting-owner side: review applications to a posting and ask the backend
//! to notify workers around the current position.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use crate::{
    api::{BackendApi, NotifyNearbyRequest},
    domain::{Application, ApplicationId, LocationState, PostingId, UserId},
    error::ClientError,
    notifier::{Toast, UserNotifier},
};

const LOAD_FAILED_TITLE: &str = "Error";
const LOAD_FAILED_FALLBACK: &str = "Applicants could not be loaded";
const APPROVED_TITLE: &str = "Applicant accepted";
const APPROVE_FAILED_TITLE: &str = "Could not accept";
const APPROVE_FAILED_FALLBACK: &str = "The application could not be accepted";
const NOTIFIED_TITLE: &str = "Workers notified";
const NOTIFY_FAILED_TITLE: &str = "Could not notify";
const NOTIFY_FAILED_FALLBACK: &str = "Nearby workers could not be notified";

pub struct PostingDesk {
    api: Arc<dyn BackendApi>,
    notifier: Arc<dyn UserNotifier>,
    owner: Option<UserId>,
    /// Whether each listed application can still be accepted
    listed: StdMutex<HashMap<ApplicationId, bool>>,
}

impl PostingDesk {
    pub fn new(
        api: Arc<dyn BackendApi>,
        notifier: Arc<dyn UserNotifier>,
        owner: Option<UserId>,
    ) -> Self {
        Self {
            api,
            notifier,
            owner,
            listed: StdMutex::new(HashMap::new()),
        }
    }

    /// Applications received by `posting_id`.
    ///
    /// Listed applications are remembered so `approve` can refuse the ones
    /// that are no longer pending.
    pub async fn applications(
        &self,
        posting_id: PostingId,
    ) -> Result<Vec<Application>, ClientError> {
        let applications = match self.api.applications_for_posting(posting_id).await {
            Ok(applications) => applications,
            Err(e) => {
                tracing::warn!("Failed to load applications of posting {}: {}", posting_id, e);
                self.notifier
                    .alert(LOAD_FAILED_TITLE, &e.user_message(LOAD_FAILED_FALLBACK));
                return Err(e.into());
            }
        };

        if let Ok(mut listed) = self.listed.lock() {
            listed.extend(
                applications
                    .iter()
                    .map(|application| (application.id, application.can_accept())),
            );
        }
        tracing::info!(
            "Posting {} has {} application(s)",
            posting_id,
            applications.len()
        );
        Ok(applications)
    }

    /// Accept one application as the posting owner.
    pub async fn approve(&self, application_id: ApplicationId) -> Result<(), ClientError> {
        let owner = self.owner.ok_or(ClientError::NotLoggedIn)?;
        let acceptable = self
            .listed
            .lock()
            .ok()
            .and_then(|listed| listed.get(&application_id).copied());
        if acceptable == Some(false) {
            return Err(ClientError::NotPending(application_id));
        }

        if let Err(e) = self.api.accept_application(application_id, owner).await {
            tracing::warn!("Failed to accept application {}: {}", application_id, e);
            self.notifier.toast(Toast::error(
                APPROVE_FAILED_TITLE,
                e.user_message(APPROVE_FAILED_FALLBACK),
            ));
            return Err(e.into());
        }

        if let Ok(mut listed) = self.listed.lock() {
            listed.insert(application_id, false);
        }
        self.notifier.toast(Toast::success(
            APPROVED_TITLE,
            format!("Application #{} accepted", application_id),
        ));
        Ok(())
    }

    /// Ask the backend to notify workers within the selected radius of the
    /// current position about `posting_id`.
    pub async fn notify_nearby(
        &self,
        posting_id: PostingId,
        location: LocationState,
    ) -> Result<(), ClientError> {
        let issuer_id = self.owner.ok_or(ClientError::NotLoggedIn)?;
        let request = NotifyNearbyRequest {
            issuer_id,
            posting_id,
            lat: location.lat,
            lng: location.lng,
            radius: location.radius,
        };

        if let Err(e) = self.api.notify_nearby(&request).await {
            tracing::warn!("Failed to notify workers about posting {}: {}", posting_id, e);
            self.notifier.toast(Toast::error(
                NOTIFY_FAILED_TITLE,
                e.user_message(NOTIFY_FAILED_FALLBACK),
            ));
            return Err(e.into());
        }

        self.notifier.toast(Toast::success(
            NOTIFIED_TITLE,
            format!(
                "Workers within {} were told about posting #{}",
                location.radius, posting_id
            ),
        ));
        Ok(())
    }
}
