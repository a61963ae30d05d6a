//! Throttled Uplink: forwards position fixes to the channel at a bounded rate.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::{
    channel::{ConnectionManager, OutboundEvent},
    context::LocationHandle,
    domain::{PositionFix, Role, SearchRadius, User},
    error::ClientError,
};

/// Fixed-window gate driven by a single last-sent instant.
///
/// Nothing is buffered: a fix arriving while the gate is closed is simply
/// not forwarded.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_sent: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: None,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.last_sent
            .is_none_or(|last| now.saturating_duration_since(last) >= self.window)
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}

/// Event a fix turns into for the given user, if any.
///
/// Senders publish their own position; searchers ask for counterparts around
/// it. Without a user or a role nothing is sent.
pub fn uplink_event(
    user: Option<&User>,
    fix: &PositionFix,
    radius: SearchRadius,
) -> Option<OutboundEvent> {
    let user = user?;
    match user.role()? {
        Role::Sender => Some(OutboundEvent::share_location(user.id, fix)),
        Role::Searcher => Some(OutboundEvent::find_nearby(
            fix.latitude,
            fix.longitude,
            radius,
        )),
    }
}

/// What happened to one fix
#[derive(Debug, Clone, PartialEq)]
pub struct FixOutcome {
    /// Event sent over the channel, when the gate was open
    pub forwarded: Option<OutboundEvent>,
    /// First fix since mount
    pub first_fix: bool,
}

pub struct ThrottledUplink {
    channel: Arc<ConnectionManager>,
    context: LocationHandle,
    user: Option<User>,
    throttle: Throttle,
    first_fix_done: bool,
}

impl ThrottledUplink {
    pub fn new(
        channel: Arc<ConnectionManager>,
        context: LocationHandle,
        user: Option<User>,
        window: Duration,
    ) -> Self {
        Self {
            channel,
            context,
            user,
            throttle: Throttle::new(window),
            first_fix_done: false,
        }
    }

    /// Record the fix in the shared context and forward it if the throttle
    /// window has elapsed.
    ///
    /// Channel failures are logged, not returned; only a context used outside
    /// its provider is an error.
    pub async fn on_fix(&mut self, fix: &PositionFix) -> Result<FixOutcome, ClientError> {
        let state = self.context.set_position(fix.coordinate())?;
        let first_fix = !std::mem::replace(&mut self.first_fix_done, true);

        let now = Instant::now();
        if !self.throttle.is_open(now) {
            return Ok(FixOutcome {
                forwarded: None,
                first_fix,
            });
        }

        let Some(event) = uplink_event(self.user.as_ref(), fix, state.radius) else {
            tracing::debug!("No user role, fix not forwarded");
            return Ok(FixOutcome {
                forwarded: None,
                first_fix,
            });
        };

        self.throttle.mark_sent(now);
        match self.channel.send(&event).await {
            Ok(()) => {
                tracing::debug!("Location forwarded as '{}'", event.name());
                Ok(FixOutcome {
                    forwarded: Some(event),
                    first_fix,
                })
            }
            Err(e) => {
                tracing::warn!("Failed to forward location: {}", e);
                Ok(FixOutcome {
                    forwarded: None,
                    first_fix,
                })
            }
        }
    }
}
