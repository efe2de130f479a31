use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use media_engine::SessionDescription;

use crate::pairing::{PairingError, SharedRegistry, SlotStatus};

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    reason: &'static str,
}

/// HTTP-facing rendering of a [`PairingError`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, reason: &'static str) -> Self {
        Self { status, reason }
    }

    /// `create_sender` before any receiver claim is a caller ordering
    /// mistake, not a gateway problem.
    fn precondition_failed() -> Self {
        Self::new(StatusCode::PRECONDITION_FAILED, "receiver_unclaimed")
    }
}

impl From<PairingError> for ApiError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::SlotClaimed => Self::new(StatusCode::CONFLICT, "receiver_claimed"),
            PairingError::Unclaimed => Self::new(StatusCode::BAD_GATEWAY, "receiver_unclaimed"),
            PairingError::Forbidden => Self::new(StatusCode::FORBIDDEN, "forbidden"),
            PairingError::SenderExists => Self::new(StatusCode::CONFLICT, "sender_exists"),
            PairingError::NoSender => Self::new(StatusCode::FORBIDDEN, "no_sender"),
            PairingError::NoForwardingTrack => {
                Self::new(StatusCode::BAD_REQUEST, "no_forwarding_track")
            }
            PairingError::Engine(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "engine_failure")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                success: false,
                reason: self.reason,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct CheckStateResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSenderRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifySenderRequest {
    pub token: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SenderConnectRequest {
    pub token: String,
    pub offer: SessionDescription,
}

#[derive(Debug, Deserialize)]
pub struct ReceiverConnectRequest {
    pub offer: SessionDescription,
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /receiver/create - claim the receiver slot.
pub async fn claim_receiver(
    State(registry): State<SharedRegistry>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = registry.claim()?;
    Ok(Json(TokenResponse { token }))
}

/// POST /receiver/check_state - poll the slot for sender activity.
pub async fn check_receiver_state(
    State(registry): State<SharedRegistry>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<CheckStateResponse>, ApiError> {
    let response = match registry.check_state(&payload.token)? {
        SlotStatus::Idle => CheckStateResponse {
            exists: false,
            completed: None,
            accepted: None,
            name: None,
            code: None,
        },
        SlotStatus::SenderAttempt {
            name,
            code,
            accepted,
            connected,
        } => CheckStateResponse {
            exists: true,
            completed: Some(connected),
            accepted: Some(accepted),
            name: Some(name),
            code: Some(code),
        },
    };
    Ok(Json(response))
}

/// POST /receiver/release - un-claim the slot and drop any pairing.
pub async fn release_receiver(
    State(registry): State<SharedRegistry>,
    Json(payload): Json<TokenRequest>,
) -> Result<StatusCode, ApiError> {
    registry.release(&payload.token).await?;
    Ok(StatusCode::OK)
}

/// POST /receiver/connect - receiver-side signaling exchange.
pub async fn connect_receiver(
    State(registry): State<SharedRegistry>,
    Json(payload): Json<ReceiverConnectRequest>,
) -> Result<Json<SessionDescription>, ApiError> {
    let answer = registry.receiver_signal(payload.offer).await?;
    Ok(Json(answer))
}

/// POST /sender/create - open a new sender attempt.
pub async fn create_sender(
    State(registry): State<SharedRegistry>,
    Json(payload): Json<CreateSenderRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    debug!(name = %payload.name, "sender attempt requested");
    let token = registry.create_sender(&payload.name).map_err(|err| match err {
        PairingError::Unclaimed => ApiError::precondition_failed(),
        other => other.into(),
    })?;
    Ok(Json(TokenResponse { token }))
}

/// POST /sender/attempt - submit the challenge code for verification.
pub async fn verify_sender(
    State(registry): State<SharedRegistry>,
    Json(payload): Json<VerifySenderRequest>,
) -> Result<StatusCode, ApiError> {
    match registry.verify(&payload.token, &payload.code) {
        Ok(()) => Ok(StatusCode::OK),
        Err(PairingError::NoSender) => Ok(StatusCode::NO_CONTENT),
        Err(err) => Err(err.into()),
    }
}

/// POST /sender/connect - sender-side signaling exchange.
pub async fn connect_sender(
    State(registry): State<SharedRegistry>,
    Json(payload): Json<SenderConnectRequest>,
) -> Result<Json<SessionDescription>, ApiError> {
    let answer = registry.sender_signal(&payload.token, payload.offer).await?;
    Ok(Json(answer))
}
