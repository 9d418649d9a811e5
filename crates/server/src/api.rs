use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use slotline_agent::{BookingService, ConversationRuntime, TurnReport};
use slotline_channel::inbound::{normalize, InboundEnvelope};
use slotline_channel::DeliveryQueue;
use slotline_core::delivery::{BulkSummary, DeliveryError, DeliveryStats};
use slotline_core::domain::booking::{Booking, BookingError, BookingId, BookingPatch, PaymentInfo};
use slotline_core::domain::outbound::{OutboundRequest, Priority};
use slotline_core::domain::tenant::{ChannelIdentity, TenantId};
use slotline_core::errors::{ApplicationError, InterfaceError};

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<ConversationRuntime>,
    pub bookings: Arc<BookingService>,
    pub delivery: DeliveryQueue,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/inbound", post(receive_inbound))
        .route("/v1/delivery/stats", get(all_stats))
        .route("/v1/delivery/stats/{tenant_id}", get(tenant_stats))
        .route("/v1/delivery/{tenant_id}/bulk", post(submit_bulk))
        .route(
            "/v1/tenants/{tenant_id}/bookings/{booking_id}",
            get(get_booking).patch(update_booking),
        )
        .route("/v1/tenants/{tenant_id}/bookings/{booking_id}/payment", post(record_payment))
        .route("/v1/tenants/{tenant_id}/bookings/{booking_id}/confirm", post(confirm_booking))
        .route("/v1/tenants/{tenant_id}/bookings/{booking_id}/cancel", post(cancel_booking))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match &self.0 {
            InterfaceError::BadRequest { code, message, .. } => {
                (StatusCode::BAD_REQUEST, *code, message.clone())
            }
            InterfaceError::NotFound { message, .. } => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", message.clone())
            }
            InterfaceError::ServiceUnavailable { message, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message.clone())
            }
            InterfaceError::Internal { message, .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message.clone())
            }
        };
        let body = ErrorBody {
            error,
            message: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn booking_error(error: BookingError, correlation_id: &str) -> ApiError {
    ApplicationError::from(error).into_interface(correlation_id).into()
}

fn delivery_error(error: DeliveryError, correlation_id: &str) -> ApiError {
    match error {
        DeliveryError::UnknownTenant(tenant) => InterfaceError::NotFound {
            message: format!("channel credentials for tenant {tenant}"),
            correlation_id: correlation_id.to_string(),
        },
        DeliveryError::ShutDown => InterfaceError::ServiceUnavailable {
            message: error.to_string(),
            correlation_id: correlation_id.to_string(),
        },
    }
    .into()
}

async fn receive_inbound(
    State(state): State<ApiState>,
    Json(envelope): Json<InboundEnvelope>,
) -> Result<Json<TurnReport>, ApiError> {
    let correlation_id = envelope.message.id.clone();
    let envelope = normalize(envelope).map_err(|rejection| {
        warn!(
            event_name = "api.inbound.rejected",
            correlation_id = %correlation_id,
            error = %rejection,
            "inbound message failed normalization"
        );
        ApiError(InterfaceError::BadRequest {
            code: "INVALID_INBOUND",
            message: rejection.to_string(),
            correlation_id: correlation_id.clone(),
        })
    })?;

    state
        .runtime
        .handle_inbound(&ChannelIdentity(envelope.channel_identity), envelope.message)
        .await
        .map(Json)
        .map_err(|error| ApplicationError::from(error).into_interface(correlation_id).into())
}

async fn all_stats(State(state): State<ApiState>) -> Json<Vec<DeliveryStats>> {
    Json(state.delivery.stats_all().await)
}

async fn tenant_stats(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<DeliveryStats>, ApiError> {
    state.delivery.stats(&TenantId(tenant_id.clone())).await.map(Json).ok_or_else(|| {
        ApiError(InterfaceError::NotFound {
            message: format!("delivery lane for tenant {tenant_id}"),
            correlation_id: tenant_id,
        })
    })
}

#[derive(Debug, Deserialize)]
pub struct BulkMessage {
    pub recipient: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub messages: Vec<BulkMessage>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

async fn submit_bulk(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<BulkRequest>,
) -> Result<Json<BulkSummary>, ApiError> {
    let requests = request
        .messages
        .into_iter()
        .map(|message| OutboundRequest::text(message.recipient, message.body))
        .collect();
    state
        .delivery
        .submit_bulk(&TenantId(tenant_id.clone()), requests, request.priority.unwrap_or(Priority::Low))
        .await
        .map(Json)
        .map_err(|error| delivery_error(error, &tenant_id))
}

async fn get_booking(
    State(state): State<ApiState>,
    Path((tenant_id, booking_id)): Path<(String, String)>,
) -> Result<Json<Booking>, ApiError> {
    state
        .bookings
        .get(&TenantId(tenant_id), &BookingId(booking_id.clone()))
        .await
        .map(Json)
        .map_err(|error| booking_error(error, &booking_id))
}

async fn update_booking(
    State(state): State<ApiState>,
    Path((tenant_id, booking_id)): Path<(String, String)>,
    Json(patch): Json<BookingPatch>,
) -> Result<Json<Booking>, ApiError> {
    state
        .bookings
        .update(&TenantId(tenant_id), &BookingId(booking_id.clone()), patch)
        .await
        .map(Json)
        .map_err(|error| booking_error(error, &booking_id))
}

async fn record_payment(
    State(state): State<ApiState>,
    Path((tenant_id, booking_id)): Path<(String, String)>,
    Json(payment): Json<PaymentInfo>,
) -> Result<Json<Booking>, ApiError> {
    state
        .bookings
        .record_payment(&TenantId(tenant_id), &BookingId(booking_id.clone()), payment)
        .await
        .map(Json)
        .map_err(|error| booking_error(error, &booking_id))
}

async fn confirm_booking(
    State(state): State<ApiState>,
    Path((tenant_id, booking_id)): Path<(String, String)>,
) -> Result<Json<Booking>, ApiError> {
    state
        .bookings
        .confirm(&TenantId(tenant_id), &BookingId(booking_id.clone()))
        .await
        .map(Json)
        .map_err(|error| booking_error(error, &booking_id))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

async fn cancel_booking(
    State(state): State<ApiState>,
    Path((tenant_id, booking_id)): Path<(String, String)>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Booking>, ApiError> {
    state
        .bookings
        .cancel(&TenantId(tenant_id), &BookingId(booking_id.clone()), &request.reason)
        .await
        .map(Json)
        .map_err(|error| booking_error(error, &booking_id))
}
