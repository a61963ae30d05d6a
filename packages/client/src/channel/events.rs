//! Event names and payloads of the real-time channel.

use serde::Serialize;
use serde_json::Value;

use crate::domain::{PositionFix, SearchRadius, UserId};

/// Synthetic event dispatched when the namespace connects
pub const CONNECT: &str = "connect";
/// Synthetic event dispatched when the connection is lost or closed
pub const DISCONNECT: &str = "disconnect";

pub const JOIN: &str = "join";
pub const SHARE_LOCATION: &str = "enviarUbicacion";
pub const FIND_NEARBY: &str = "buscarCercanosTiempoReal";

pub const NOTIFICATION: &str = "notificacion";
pub const LOCATION_UPDATED: &str = "ubicacionActualizada";
pub const NEARBY_UPDATED: &str = "cercanosActualizados";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinPayload {
    #[serde(rename = "userId")]
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareLocationPayload {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "foto_url", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(rename = "tituloProfesional", skip_serializing_if = "Option::is_none")]
    pub professional_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyQueryPayload {
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "radio")]
    pub radius: SearchRadius,
}

/// Event sent from the client to the backend
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Join(JoinPayload),
    ShareLocation(ShareLocationPayload),
    FindNearby(NearbyQueryPayload),
}

impl OutboundEvent {
    pub fn join(user_id: UserId) -> Self {
        OutboundEvent::Join(JoinPayload { user_id })
    }

    pub fn share_location(user_id: UserId, fix: &PositionFix) -> Self {
        OutboundEvent::ShareLocation(ShareLocationPayload {
            user_id,
            lat: fix.latitude,
            lng: fix.longitude,
            photo_url: None,
            professional_title: None,
        })
    }

    pub fn find_nearby(lat: f64, lng: f64, radius: SearchRadius) -> Self {
        OutboundEvent::FindNearby(NearbyQueryPayload { lat, lng, radius })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Join(_) => JOIN,
            OutboundEvent::ShareLocation(_) => SHARE_LOCATION,
            OutboundEvent::FindNearby(_) => FIND_NEARBY,
        }
    }

    /// Whether the backend answers this event with an acknowledgment.
    pub fn expects_ack(&self) -> bool {
        matches!(self, OutboundEvent::FindNearby(_))
    }

    pub fn payload(&self) -> Value {
        let payload = match self {
            OutboundEvent::Join(payload) => serde_json::to_value(payload),
            OutboundEvent::ShareLocation(payload) => serde_json::to_value(payload),
            OutboundEvent::FindNearby(payload) => serde_json::to_value(payload),
        };
        // Plain structs of numbers and strings always serialize.
        payload.unwrap_or(Value::Null)
    }
}
