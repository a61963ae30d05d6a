//! Domain types of the location-sharing pipeline.
//!
//! Field names follow the backend's JSON (Spanish keys) through serde
//! renames; the Rust side uses English names.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Backend user id
    UserId
);
numeric_id!(
    /// Backend posting (publicación) id
    PostingId
);
numeric_id!(
    /// Backend application (postulación) id
    ApplicationId
);

/// Role of the current user in the location pipeline.
///
/// Backend role id 1 shares its own location (workers), role id 2 searches
/// for nearby counterparts (companies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Searcher,
}

impl Role {
    /// Map a backend role id. Unknown ids have no role in the pipeline.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Role::Sender),
            2 => Some(Role::Searcher),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Role::Sender => 1,
            Role::Searcher => 2,
        }
    }
}

/// Role record as sent by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: u32,
    #[serde(rename = "nombre", default)]
    pub name: String,
}

/// User profile (`GET /usuarios/{id}`, login response, persisted session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(rename = "nombre", default)]
    pub name: String,
    #[serde(rename = "apellido", default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "foto_url", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(rename = "descripcion", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleRecord>,
}

impl User {
    /// Pipeline role, taken from the first role record.
    pub fn role(&self) -> Option<Role> {
        self.roles.first().and_then(|record| Role::from_id(record.id))
    }

    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last_name) if !last_name.is_empty() => format!("{} {}", self.name, last_name),
            _ => self.name.clone(),
        }
    }
}

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// One device location reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
}

impl PositionFix {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Search radius selectable on the map screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SearchRadius {
    Km2,
    #[default]
    Km5,
    Km10,
    Km20,
    Km50,
}

impl SearchRadius {
    pub const ALL: [SearchRadius; 5] = [
        SearchRadius::Km2,
        SearchRadius::Km5,
        SearchRadius::Km10,
        SearchRadius::Km20,
        SearchRadius::Km50,
    ];

    pub fn km(&self) -> u32 {
        match self {
            SearchRadius::Km2 => 2,
            SearchRadius::Km5 => 5,
            SearchRadius::Km10 => 10,
            SearchRadius::Km20 => 20,
            SearchRadius::Km50 => 50,
        }
    }
}

/// Rejected radius value
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} km is not a selectable radius")]
pub struct InvalidRadius(pub u32);

impl TryFrom<u32> for SearchRadius {
    type Error = InvalidRadius;

    fn try_from(km: u32) -> Result<Self, Self::Error> {
        SearchRadius::ALL
            .into_iter()
            .find(|radius| radius.km() == km)
            .ok_or(InvalidRadius(km))
    }
}

impl From<SearchRadius> for u32 {
    fn from(radius: SearchRadius) -> Self {
        radius.km()
    }
}

impl fmt::Display for SearchRadius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} km", self.km())
    }
}

/// Shared Location State: last known position plus selected radius
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocationState {
    pub lat: f64,
    pub lng: f64,
    pub radius: SearchRadius,
}

impl LocationState {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// Nearby counterpart pushed over the real-time channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartMarker {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub lat: f64,
    pub lng: f64,
}

/// GeoJSON point; `coordinates` is `[lng, lat]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub coordinates: [f64; 2],
}

/// Entity returned by `GET /ubicaciones/cercanos`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyEntity {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(rename = "activo", default)]
    pub active: Option<bool>,
    pub location: GeoPoint,
}

impl NearbyEntity {
    /// Position in `{lat, lng}` order (the backend sends `[lng, lat]`).
    pub fn position(&self) -> Coordinate {
        let [lng, lat] = self.location.coordinates;
        Coordinate::new(lat, lng)
    }

    pub fn title(&self) -> String {
        let name = self.name.as_deref().unwrap_or_default();
        match self.last_name.as_deref() {
            Some(last_name) if !last_name.is_empty() => format!("{} {}", name, last_name),
            _ => name.to_string(),
        }
    }
}

/// Server-pushed prompt to apply to a posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "empresaId")]
    pub issuer_id: UserId,
    #[serde(rename = "mensaje", default)]
    pub message: String,
    #[serde(rename = "publicacionId")]
    pub posting_id: PostingId,
}

/// Application lifecycle state.
///
/// `Rechazado` is only ever produced by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationState {
    Pendiente,
    Aceptado,
    Rechazado,
}

/// Posting as embedded in an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingSummary {
    pub id: PostingId,
    #[serde(rename = "titulo", default)]
    pub title: Option<String>,
}

/// Worker's application to a posting (`/postulaciones`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    #[serde(rename = "estado")]
    pub state: ApplicationState,
    #[serde(rename = "fechaPostulacion", default)]
    pub applied_at: Option<String>,
    #[serde(rename = "trabajador", default)]
    pub worker: Option<User>,
    #[serde(rename = "publicacion", default)]
    pub posting: Option<PostingSummary>,
}

impl Application {
    /// Only pending applications can be accepted by the posting owner.
    pub fn can_accept(&self) -> bool {
        self.state == ApplicationState::Pendiente
    }

    pub fn is_from(&self, worker_id: UserId) -> bool {
        self.worker.as_ref().is_some_and(|worker| worker.id == worker_id)
    }
}
