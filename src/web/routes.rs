//! Thin signaling and state surface
//!
//! One transport adapter over the core: exchange one offer for one
//! answer, read the published display, list live sessions. No
//! templating, no assets, no auth.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::{AnswerResponse, OfferRequest, SdpOffer, SessionDescriptor};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/offer", post(offer))
        .route("/display", get(display))
        .route("/sessions", get(sessions))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Exchange an SDP offer for an answer
async fn offer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OfferRequest>,
) -> Result<Json<AnswerResponse>> {
    if request.kind != "offer" {
        return Err(AppError::Negotiation(format!(
            "expected description type \"offer\", got {:?}",
            request.kind
        )));
    }

    let answer = state.broker.negotiate(SdpOffer::new(request.sdp)).await?;
    Ok(Json(AnswerResponse::new(answer)))
}

#[derive(Serialize)]
struct DisplayResponse {
    /// Display number of the active run, absent when stopped
    display: Option<u32>,
}

/// Read the published display handle
async fn display(State(state): State<Arc<AppState>>) -> Json<DisplayResponse> {
    Json(DisplayResponse {
        display: state.display_registry.get().map(|handle| handle.0),
    })
}

/// List live sessions
async fn sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionDescriptor>> {
    Json(state.broker.list_sessions().await)
}

async fn health() -> &'static str {
    "ok"
}
