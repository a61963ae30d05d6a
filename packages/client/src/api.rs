//! REST client for the backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    domain::{
        Application, ApplicationId, ApplicationState, Coordinate, NearbyEntity, PostingId,
        SearchRadius, User, UserId,
    },
    error::ApiError,
};

/// `POST /auth/login` response. The token key differs between backend versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default, alias = "accessToken", alias = "jwt")]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct LoginRequest<'a> {
    dni: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct CreateApplicationRequest {
    #[serde(rename = "publicacionId")]
    posting_id: PostingId,
    #[serde(rename = "trabajadorId")]
    worker_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct UpdateApplicationRequest {
    #[serde(rename = "estado")]
    state: ApplicationState,
    #[serde(rename = "empresaId")]
    issuer_id: UserId,
}

/// `POST /publicacion/notificar`: ask the backend to notify workers near a point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotifyNearbyRequest {
    #[serde(rename = "empresaId")]
    pub issuer_id: UserId,
    #[serde(rename = "publicacionId")]
    pub posting_id: PostingId,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "radio")]
    pub radius: SearchRadius,
}

/// Backend REST operations used by the client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn login(&self, dni: &str, password: &str) -> Result<LoginResponse, ApiError>;

    async fn fetch_user(&self, user_id: UserId) -> Result<User, ApiError>;

    async fn fetch_nearby(
        &self,
        center: Coordinate,
        radius: SearchRadius,
    ) -> Result<Vec<NearbyEntity>, ApiError>;

    async fn create_application(
        &self,
        posting_id: PostingId,
        worker_id: UserId,
    ) -> Result<(), ApiError>;

    async fn applications_for_posting(
        &self,
        posting_id: PostingId,
    ) -> Result<Vec<Application>, ApiError>;

    /// Move a pending application to `ACEPTADO`.
    async fn accept_application(
        &self,
        application_id: ApplicationId,
        issuer_id: UserId,
    ) -> Result<(), ApiError>;

    async fn notify_nearby(&self, request: &NotifyNearbyRequest) -> Result<(), ApiError>;
}

/// `BackendApi` over HTTP with `reqwest`
pub struct HttpBackendApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackendApi {
    /// Every request fails with `ApiError::Timeout` after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| extract_server_message(&body));
        tracing::debug!("Request failed with {}: {:?}", status, message);
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

/// Pull the human-readable message out of an error body.
///
/// The backend sends `message` (string or list of strings) or `error`.
pub fn extract_server_message(body: &Value) -> Option<String> {
    let from = |value: &Value| match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    };
    body.get("message")
        .and_then(from)
        .or_else(|| body.get("error").and_then(from))
}

#[async_trait]
impl BackendApi for HttpBackendApi {
    async fn login(&self, dni: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { dni, password })
            .send()
            .await?;
        Self::json(response).await
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<User, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/usuarios/{}", user_id)))
            .send()
            .await?;
        Self::json(response).await
    }

    async fn fetch_nearby(
        &self,
        center: Coordinate,
        radius: SearchRadius,
    ) -> Result<Vec<NearbyEntity>, ApiError> {
        let response = self
            .client
            .get(self.url("/ubicaciones/cercanos"))
            .query(&[
                ("lat", center.lat.to_string()),
                ("lng", center.lng.to_string()),
                ("radio", radius.km().to_string()),
            ])
            .send()
            .await?;
        let body: Value = Self::json(response).await?;
        if !body.is_array() {
            tracing::warn!("Nearby response is not a list, treating as empty");
            return Ok(Vec::new());
        }
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn create_application(
        &self,
        posting_id: PostingId,
        worker_id: UserId,
    ) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/postulaciones"))
            .json(&CreateApplicationRequest {
                posting_id,
                worker_id,
            })
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn applications_for_posting(
        &self,
        posting_id: PostingId,
    ) -> Result<Vec<Application>, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/postulaciones/publicacion/{}", posting_id)))
            .send()
            .await?;
        Self::json(response).await
    }

    async fn accept_application(
        &self,
        application_id: ApplicationId,
        issuer_id: UserId,
    ) -> Result<(), ApiError> {
        let response = self
            .client
            .patch(self.url(&format!("/postulaciones/{}", application_id)))
            .json(&UpdateApplicationRequest {
                state: ApplicationState::Aceptado,
                issuer_id,
            })
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn notify_nearby(&self, request: &NotifyNearbyRequest) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/publicacion/notificar"))
            .json(request)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}
