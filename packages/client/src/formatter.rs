//! Terminal rendering of the map screen state.

use mapsapp_shared::time::timestamp_to_rfc3339;

use crate::{
    domain::{
        Application, ApplicationState, CounterpartMarker, NearbyEntity, PositionFix, PostingId,
    },
    map::{MarkerSelection, SelectionDetail},
    notification::NotificationCard,
    notifier::{Toast, ToastKind},
};

const RULE: &str = "============================================================";
const THIN_RULE: &str = "------------------------------------------------------------";

/// Formatter for the map screen as shown in the terminal
pub struct MapFormatter;

impl MapFormatter {
    /// Format the real-time counterpart markers
    ///
    /// # Arguments
    ///
    /// * `markers` - Current marker snapshot
    ///
    /// # Returns
    ///
    /// A formatted block listing every marker
    pub fn format_markers(markers: &[CounterpartMarker]) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{}\nNearby now:\n", RULE));

        if markers.is_empty() {
            output.push_str("(Nobody nearby)\n");
        } else {
            for marker in markers {
                output.push_str(&format!(
                    "#{} at {:.5}, {:.5}\n",
                    marker.user_id, marker.lat, marker.lng
                ));
            }
        }

        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Format the REST nearby snapshot
    pub fn format_nearby(entities: &[NearbyEntity], loading: bool) -> String {
        if loading {
            return "\nLoading nearby places...\n".to_string();
        }

        let mut output = String::new();
        output.push_str(&format!("\n{}\nAround the map center:\n", RULE));
        if entities.is_empty() {
            output.push_str("(No results)\n");
        }
        for entity in entities {
            let position = entity.position();
            let rating = entity
                .rating
                .map(|rating| format!(" ★{:.1}", rating))
                .unwrap_or_default();
            output.push_str(&format!(
                "{}{} at {:.5}, {:.5}\n",
                entity.title(),
                rating,
                position.lat,
                position.lng
            ));
        }
        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Format the applications received by one posting
    ///
    /// # Arguments
    ///
    /// * `posting_id` - The posting the applications belong to
    /// * `applications` - Applications as returned by the backend
    ///
    /// # Returns
    ///
    /// One line per application; pending ones carry the approve hint
    pub fn format_applications(posting_id: PostingId, applications: &[Application]) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{}\nApplications to posting #{}:\n", RULE, posting_id));

        if applications.is_empty() {
            output.push_str("(No applications yet)\n");
        }
        for application in applications {
            let worker = application
                .worker
                .as_ref()
                .map(|worker| worker.display_name())
                .unwrap_or_else(|| "Unknown worker".to_string());
            let state = match application.state {
                ApplicationState::Pendiente => "PENDIENTE",
                ApplicationState::Aceptado => "ACEPTADO",
                ApplicationState::Rechazado => "RECHAZADO",
            };
            output.push_str(&format!("#{} {} [{}]", application.id, worker, state));
            if application.can_accept() {
                output.push_str(&format!("  (approve {})", application.id));
            }
            output.push('\n');
        }

        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Format the detail modal of a tapped marker
    pub fn format_selection(selection: &MarkerSelection) -> String {
        match &selection.detail {
            SelectionDetail::Loading => format!("\nLoading profile of #{}...\n", selection.user_id),
            SelectionDetail::Failed(message) => {
                format!("\nProfile of #{} unavailable: {}\n", selection.user_id, message)
            }
            SelectionDetail::Loaded(user) => {
                let mut output = format!("\n{}\n{}\n", THIN_RULE, user.display_name());
                if let Some(email) = &user.email {
                    output.push_str(&format!("{}\n", email));
                }
                if let Some(description) = &user.description {
                    output.push_str(&format!("{}\n", description));
                }
                output.push_str(THIN_RULE);
                output.push('\n');
                output
            }
        }
    }

    /// Format the notification modal
    ///
    /// # Arguments
    ///
    /// * `card` - The visible notification
    ///
    /// # Returns
    ///
    /// The modal text with the accept/dismiss hint
    pub fn format_notification(card: &NotificationCard) -> String {
        format!(
            "\n\n{}\n\
             {} (posting #{})\n\
             {}\n\
             Type 'accept' to apply or 'dismiss' to close.\n\
             {}\n",
            RULE, card.issuer_name, card.posting_id, card.message, RULE
        )
    }

    pub fn format_toast(toast: &Toast) -> String {
        let marker = match toast.kind {
            ToastKind::Success => "✔",
            ToastKind::Error => "✖",
            ToastKind::Info => "ℹ",
        };
        format!("\n{} {}\n", marker, toast)
    }

    pub fn format_alert(title: &str, message: &str) -> String {
        format!("\n! {}: {}\n", title, message)
    }

    /// Format the last position fix
    pub fn format_fix(fix: &PositionFix) -> String {
        format!(
            "You are at {:.5}, {:.5} (±{:.0} m, {})\n",
            fix.latitude,
            fix.longitude,
            fix.accuracy,
            timestamp_to_rfc3339(fix.timestamp)
        )
    }
}
